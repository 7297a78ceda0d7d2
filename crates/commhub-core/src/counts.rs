//! Inbox badge counts

use crate::item::{ItemKind, UnifiedItem};
use commhub_api::CountsDto;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxCounts {
    pub unread_count: u32,
    pub flagged_count: u32,
    pub draft_count: u32,
    pub sent_count: u32,
}

impl InboxCounts {
    /// Approximate counts from the local item set
    pub fn local(items: &[UnifiedItem]) -> Self {
        let mut counts = InboxCounts::default();
        for item in items {
            if item.kind == ItemKind::Draft {
                counts.draft_count += 1;
            }
            if item.is_archived {
                continue;
            }
            if item.is_unread {
                counts.unread_count += 1;
            }
            if item.is_starred {
                counts.flagged_count += 1;
            }
            if item.is_outbound() {
                counts.sent_count += 1;
            }
        }
        counts
    }

    /// Server counts, with any omitted field approximated locally
    pub fn resolve(server: &CountsDto, items: &[UnifiedItem]) -> Self {
        let local = InboxCounts::local(items);
        InboxCounts {
            unread_count: server.unread_count.unwrap_or(local.unread_count),
            flagged_count: server.flagged_count.unwrap_or(local.flagged_count),
            draft_count: server.draft_count.unwrap_or(local.draft_count),
            sent_count: server.sent_count.unwrap_or(local.sent_count),
        }
    }
}
