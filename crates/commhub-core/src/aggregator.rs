//! Merges the backend's inbox views into one item set

use crate::item::{ItemId, UnifiedItem};
use crate::HubConfig;
use commhub_api::{
    ContactSummary, EmailTemplate, HubBackend, InboxItemDto, InboxView, TagSummary,
};
use futures::future::join_all;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one aggregation pass
#[derive(Debug, Clone, Default)]
pub struct RefreshOutcome {
    /// Merged items in arrival order
    pub items: Vec<UnifiedItem>,
    /// Views whose request failed; their items are missing from `items`
    pub failed_views: Vec<InboxView>,
    /// Rows dropped for an unusable id
    pub dropped: usize,
}

impl RefreshOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failed_views.is_empty()
    }
}

/// Load state of one auxiliary resource
#[derive(Debug, Clone, PartialEq)]
pub enum Resource<T> {
    Loaded(Vec<T>),
    Failed(String),
}

impl<T> Resource<T> {
    pub fn loaded(&self) -> Option<&[T]> {
        match self {
            Resource::Loaded(v) => Some(v),
            Resource::Failed(_) => None,
        }
    }
}

/// Templates, contacts and tags fetched alongside the inbox
#[derive(Debug, Clone, PartialEq)]
pub struct AuxiliaryData {
    pub templates: Resource<EmailTemplate>,
    pub contacts: Resource<ContactSummary>,
    pub tags: Resource<TagSummary>,
}

impl AuxiliaryData {
    /// Inline status lines for resources that failed to load
    pub fn failure_messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if matches!(self.templates, Resource::Failed(_)) {
            messages.push("Failed to load templates".to_string());
        }
        if matches!(self.contacts, Resource::Failed(_)) {
            messages.push("Failed to load contacts".to_string());
        }
        if matches!(self.tags, Resource::Failed(_)) {
            messages.push("Failed to load tags".to_string());
        }
        messages
    }
}

/// Merge view results into one set keyed by composite id.
///
/// A later row with an id already seen overwrites the earlier one but keeps
/// its position. Rows with an unusable id are dropped.
pub fn merge_views(
    views: impl IntoIterator<Item = Vec<InboxItemDto>>,
    preview_chars: usize,
) -> (Vec<UnifiedItem>, usize) {
    let mut merged: IndexMap<ItemId, UnifiedItem> = IndexMap::new();
    let mut dropped = 0;

    for dto in views.into_iter().flatten() {
        let raw_id = dto.id.clone();
        match UnifiedItem::from_dto(dto, preview_chars) {
            Ok(item) => {
                merged.insert(item.id, item);
            }
            Err(e) => {
                warn!("Dropping inbox row {}: {}", raw_id, e);
                dropped += 1;
            }
        }
    }

    (merged.into_values().collect(), dropped)
}

/// Fetches the `all`, `sent` and `draft` views and merges them
pub struct Aggregator {
    backend: Arc<dyn HubBackend>,
    page_size: u32,
    preview_chars: usize,
}

impl Aggregator {
    pub fn new(backend: Arc<dyn HubBackend>, config: &HubConfig) -> Self {
        Self {
            backend,
            page_size: config.page_size,
            preview_chars: config.preview_chars,
        }
    }

    /// Fetch all views concurrently and merge whatever succeeded.
    ///
    /// Never fails: a failed view is logged and reported in
    /// [`RefreshOutcome::failed_views`].
    pub async fn refresh(&self, silent: bool) -> RefreshOutcome {
        if silent {
            debug!("Background refresh started");
        } else {
            info!("Refreshing inbox");
        }

        let requests = InboxView::ALL_VIEWS
            .iter()
            .map(|view| self.backend.list_inbox(*view, self.page_size));
        let results = join_all(requests).await;

        let mut lists = Vec::with_capacity(results.len());
        let mut failed_views = Vec::new();
        for (view, result) in InboxView::ALL_VIEWS.iter().zip(results) {
            match result {
                Ok(list) => lists.push(list),
                Err(e) => {
                    warn!("Inbox view {} failed, continuing without it: {}", view, e);
                    failed_views.push(*view);
                }
            }
        }

        let (items, dropped) = merge_views(lists, self.preview_chars);
        debug!(
            "Merged {} items ({} dropped, {} views failed)",
            items.len(),
            dropped,
            failed_views.len()
        );

        RefreshOutcome {
            items,
            failed_views,
            dropped,
        }
    }

    /// Best-effort fetch of the resources other Hub panels use
    pub async fn fetch_auxiliary(&self) -> AuxiliaryData {
        let (templates, contacts, tags) = futures::join!(
            self.backend.list_templates(),
            self.backend.list_contacts(),
            self.backend.list_tags()
        );

        AuxiliaryData {
            templates: settle("templates", templates),
            contacts: settle("contacts", contacts),
            tags: settle("tags", tags),
        }
    }
}

fn settle<T>(name: &str, result: commhub_api::ApiResult<Vec<T>>) -> Resource<T> {
    match result {
        Ok(values) => Resource::Loaded(values),
        Err(e) => {
            warn!("Failed to load {}: {}", name, e);
            Resource::Failed(e.to_string())
        }
    }
}
