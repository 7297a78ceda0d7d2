//! Core engine for the Communications Hub
//!
//! Aggregates inbox views into one item set, keeps it current from push
//! events and polling, and carries the compose-side helpers (recipient
//! resolution, draft autosave) and the pure view pipeline.

mod aggregator;
mod bulk;
mod config;
mod counts;
mod draft;
mod engine;
mod error;
mod item;
mod reconcile;
mod recipients;
mod thread;
mod view;

#[cfg(test)]
mod testing;

pub use aggregator::{merge_views, Aggregator, AuxiliaryData, RefreshOutcome, Resource};
pub use bulk::{apply_optimistic, targets as bulk_targets, BulkOutcome};
pub use config::{HubConfig, ENV_BASE_URL, ENV_TOKEN};
pub use counts::InboxCounts;
pub use draft::{DraftBuffer, DraftEvent, DraftSession};
pub use engine::{HubCommand, HubEngine, HubEvent, HubHandle};
pub use error::{CoreError, CoreResult};
pub use item::{
    truncate_preview, Channel, DetailRoute, Direction, FlagPatch, ItemId, ItemKind, ItemType,
    UnifiedItem,
};
pub use reconcile::{InboxSnapshot, InboxState};
pub use recipients::{
    is_valid_email, tokenize, LookupBatch, Recipient, RecipientField, RecipientResolver,
    RecipientStatus,
};
pub use thread::{ConversationThread, Participant, ThreadMessage};
pub use view::{
    group_by_date, project, ChannelFilter, DateBucket, DateGroup, Folder, KeyboardCursor,
    ViewQuery,
};

/// Re-export the wire types for convenience
pub mod api {
    pub use commhub_api::*;
}
