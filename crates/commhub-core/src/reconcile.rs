//! Live inbox state and the rules for folding server data into it
//!
//! [`InboxState`] is owned by exactly one task (the engine). Full refreshes
//! replace the item list in one step; push deltas patch it in place. Neither
//! touches the open conversation except through the explicit append path.

use crate::aggregator::AuxiliaryData;
use crate::bulk::{self, BulkOutcome};
use crate::counts::InboxCounts;
use crate::item::{FlagPatch, ItemId, UnifiedItem};
use crate::thread::{ConversationThread, ThreadMessage};
use crate::view::{project, ViewQuery};
use commhub_api::{CountsDto, ThreadUpdatePayload};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone)]
struct Selection {
    id: ItemId,
    token: u64,
    detail: Option<ConversationThread>,
    /// Messages pushed for this thread before its detail arrived
    pending: Vec<ThreadMessage>,
}

/// Point-in-time copy of the state for readers
#[derive(Debug, Clone, Default)]
pub struct InboxSnapshot {
    pub items: Vec<UnifiedItem>,
    pub counts: InboxCounts,
    pub selected: Option<ItemId>,
    pub detail: Option<ConversationThread>,
    pub checked: Vec<ItemId>,
    pub loading: bool,
    pub auxiliary: Option<AuxiliaryData>,
}

impl InboxSnapshot {
    pub fn project(&self, query: &ViewQuery) -> Vec<&UnifiedItem> {
        project(&self.items, query)
    }

    pub fn item(&self, id: ItemId) -> Option<&UnifiedItem> {
        self.items.iter().find(|item| item.id == id)
    }
}

#[derive(Debug, Default)]
pub struct InboxState {
    items: Vec<UnifiedItem>,
    counts: InboxCounts,
    selection: Option<Selection>,
    next_token: u64,
    checked: BTreeSet<ItemId>,
    loading: bool,
    auxiliary: Option<AuxiliaryData>,
}

impl InboxState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[UnifiedItem] {
        &self.items
    }

    pub fn counts(&self) -> InboxCounts {
        self.counts
    }

    pub fn set_loading(&mut self, loading: bool) -> bool {
        let changed = self.loading != loading;
        self.loading = loading;
        changed
    }

    /// Swap in a freshly aggregated list. Selection and open detail are kept,
    /// as are local drafts the server has not assigned an id to yet.
    pub fn replace_items(&mut self, mut items: Vec<UnifiedItem>) {
        items.extend(
            self.items
                .drain(..)
                .filter(|item| item.id.is_local_draft()),
        );
        self.items = items;
        let present: BTreeSet<ItemId> = self.items.iter().map(|item| item.id).collect();
        self.checked.retain(|id| present.contains(id));
    }

    pub fn set_auxiliary(&mut self, auxiliary: AuxiliaryData) {
        self.auxiliary = Some(auxiliary);
    }

    pub fn apply_counts(&mut self, server: &CountsDto) -> InboxCounts {
        self.counts = InboxCounts::resolve(server, &self.items);
        self.counts
    }

    /// Fall back to locally derived counts when the server gave none
    pub fn approximate_counts(&mut self) -> InboxCounts {
        self.counts = InboxCounts::local(&self.items);
        self.counts
    }

    /// Patch a single item. Returns true if a flag changed.
    pub fn patch_item(&mut self, id: ItemId, patch: FlagPatch) -> bool {
        let changed = self
            .items
            .iter_mut()
            .filter(|item| item.id == id)
            .fold(false, |acc, item| patch.apply(item) | acc);

        if let Some(thread_id) = id.thread_id() {
            self.patch_open_thread(thread_id, patch);
        }
        changed
    }

    /// Apply a `thread_update` push to every item of the thread.
    /// Returns the ids whose flags changed.
    pub fn apply_thread_update(&mut self, update: &ThreadUpdatePayload) -> Vec<ItemId> {
        let patch = FlagPatch::from(update);
        if patch.is_empty() {
            return Vec::new();
        }

        let mut changed = Vec::new();
        for item in self
            .items
            .iter_mut()
            .filter(|item| item.thread_id() == Some(update.thread_id))
        {
            if patch.apply(item) {
                changed.push(item.id);
            }
        }
        self.patch_open_thread(update.thread_id, patch);
        changed
    }

    fn patch_open_thread(&mut self, thread_id: i64, patch: FlagPatch) {
        let Some(detail) = self
            .selection
            .as_mut()
            .filter(|s| s.id.thread_id() == Some(thread_id))
            .and_then(|s| s.detail.as_mut())
        else {
            return;
        };
        if let Some(flagged) = patch.is_starred {
            detail.is_flagged = flagged;
        }
        if let Some(archived) = patch.is_archived {
            detail.is_archived = archived;
        }
    }

    /// Append a pushed message to the open thread when it is the one shown.
    /// While its detail is still loading the message is held and folded in
    /// once the detail commits.
    pub fn append_to_open_thread(&mut self, thread_id: i64, message: ThreadMessage) -> bool {
        let Some(selection) = self
            .selection
            .as_mut()
            .filter(|s| s.id.thread_id() == Some(thread_id))
        else {
            return false;
        };
        match selection.detail.as_mut() {
            Some(detail) => detail.append_message(message),
            None if selection.pending.iter().any(|m| m.id == message.id) => false,
            None => {
                selection.pending.push(message);
                true
            }
        }
    }

    /// Make `id` the selected item and return the token its detail response
    /// must carry to be accepted.
    pub fn select(&mut self, id: ItemId) -> u64 {
        self.next_token += 1;
        self.selection = Some(Selection {
            id,
            token: self.next_token,
            detail: None,
            pending: Vec::new(),
        });
        self.next_token
    }

    pub fn deselect(&mut self) -> bool {
        self.selection.take().is_some()
    }

    pub fn selected(&self) -> Option<ItemId> {
        self.selection.as_ref().map(|s| s.id)
    }

    pub fn detail(&self) -> Option<&ConversationThread> {
        self.selection.as_ref().and_then(|s| s.detail.as_ref())
    }

    /// True while `token` belongs to the current selection
    pub fn is_current(&self, token: u64) -> bool {
        self.selection.as_ref().is_some_and(|s| s.token == token)
    }

    /// Store a detail response unless the selection moved on since it was requested
    pub fn commit_detail(&mut self, token: u64, mut detail: ConversationThread) -> bool {
        match self.selection.as_mut() {
            Some(selection) if selection.token == token => {
                for message in selection.pending.drain(..) {
                    detail.append_message(message);
                }
                selection.detail = Some(detail);
                true
            }
            _ => {
                debug!("Discarding stale detail for {}", detail.id);
                false
            }
        }
    }

    pub fn set_checked(&mut self, id: ItemId, checked: bool) {
        if checked {
            self.checked.insert(id);
        } else {
            self.checked.remove(&id);
        }
    }

    pub fn clear_checked(&mut self) {
        self.checked.clear();
    }

    pub fn checked(&self) -> &BTreeSet<ItemId> {
        &self.checked
    }

    /// Reflect a confirmed bulk action and drop the checked set
    pub fn apply_bulk(&mut self, outcome: &BulkOutcome) -> usize {
        let changed = bulk::apply_optimistic(outcome.action, &outcome.applied, &mut self.items);
        self.checked.clear();
        changed
    }

    /// Insert or overwrite the row of a draft being composed
    pub fn upsert_draft(&mut self, item: UnifiedItem) {
        match self.items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => self.items.insert(0, item),
        }
    }

    /// Rename a local draft to its server identity. The only id change allowed.
    /// Returns true if the local row was renamed or folded into the server row.
    pub fn promote_draft(&mut self, local: ItemId, server: ItemId) -> bool {
        if !local.is_local_draft() || !server.is_draft() {
            return false;
        }
        let mut changed = false;
        // a refresh may already have delivered the server row
        if self.items.iter().any(|item| item.id == server) {
            let before = self.items.len();
            self.items.retain(|item| item.id != local);
            changed = self.items.len() != before;
        } else {
            for item in self.items.iter_mut().filter(|item| item.id == local) {
                item.id = server;
                changed = true;
            }
        }
        if self.checked.remove(&local) {
            self.checked.insert(server);
        }
        changed
    }

    pub fn snapshot(&self) -> InboxSnapshot {
        InboxSnapshot {
            items: self.items.clone(),
            counts: self.counts,
            selected: self.selected(),
            detail: self.detail().cloned(),
            checked: self.checked.iter().copied().collect(),
            loading: self.loading,
            auxiliary: self.auxiliary.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::sample_item;
    use chrono::Utc;
    use commhub_api::BulkAction;

    fn detail(id: ItemId, message_ids: &[i64]) -> ConversationThread {
        ConversationThread {
            id,
            subject: None,
            party_id: None,
            party_name: None,
            participants: Vec::new(),
            messages: message_ids.iter().map(|m| message(*m)).collect(),
            is_flagged: false,
            is_archived: false,
        }
    }

    fn message(id: i64) -> ThreadMessage {
        ThreadMessage {
            id,
            body: String::new(),
            sender_name: None,
            sender_party_id: None,
            direction: None,
            created_at: Utc::now(),
        }
    }

    fn state_with(ids: &[&str]) -> InboxState {
        let mut state = InboxState::new();
        state.replace_items(ids.iter().map(|id| sample_item(id)).collect());
        state
    }

    #[test]
    fn test_thread_update_is_partial() {
        let mut state = state_with(&["thread:1", "thread:2"]);
        state.patch_item(
            ItemId::thread(1),
            FlagPatch {
                is_unread: Some(true),
                ..Default::default()
            },
        );

        let changed = state.apply_thread_update(&ThreadUpdatePayload {
            thread_id: 1,
            flagged: Some(true),
            ..Default::default()
        });
        assert_eq!(changed, vec![ItemId::thread(1)]);

        let item = &state.items()[0];
        assert!(item.is_starred);
        assert!(item.is_unread, "omitted field must be left untouched");
        assert!(!state.items()[1].is_starred);
    }

    #[test]
    fn test_thread_update_redelivery_is_idempotent() {
        let mut state = state_with(&["thread:1"]);
        let update = ThreadUpdatePayload {
            thread_id: 1,
            archived: Some(true),
            ..Default::default()
        };
        assert_eq!(state.apply_thread_update(&update).len(), 1);
        assert!(state.apply_thread_update(&update).is_empty());
        assert!(state.items()[0].is_archived);
    }

    #[test]
    fn test_replace_keeps_selection_and_detail() {
        let mut state = state_with(&["thread:1"]);
        let token = state.select(ItemId::thread(1));
        assert!(state.commit_detail(token, detail(ItemId::thread(1), &[1])));

        state.replace_items(vec![sample_item("thread:1"), sample_item("thread:9")]);
        assert_eq!(state.selected(), Some(ItemId::thread(1)));
        assert!(state.detail().is_some());
    }

    #[test]
    fn test_stale_detail_discarded() {
        let mut state = state_with(&["thread:1", "thread:2"]);
        let first = state.select(ItemId::thread(1));
        let second = state.select(ItemId::thread(2));

        assert!(!state.commit_detail(first, detail(ItemId::thread(1), &[])));
        assert!(state.detail().is_none());
        assert!(state.commit_detail(second, detail(ItemId::thread(2), &[])));
        assert_eq!(state.detail().map(|d| d.id), Some(ItemId::thread(2)));
    }

    #[test]
    fn test_append_only_to_matching_open_thread() {
        let mut state = state_with(&["thread:1"]);
        let token = state.select(ItemId::thread(1));
        state.commit_detail(token, detail(ItemId::thread(1), &[10]));

        assert!(!state.append_to_open_thread(2, message(11)));
        assert!(state.append_to_open_thread(1, message(11)));
        assert!(!state.append_to_open_thread(1, message(11)));
        assert_eq!(state.detail().map(|d| d.messages.len()), Some(2));
    }

    #[test]
    fn test_message_pushed_before_detail_is_kept() {
        let mut state = state_with(&["thread:1"]);
        let token = state.select(ItemId::thread(1));

        assert!(state.append_to_open_thread(1, message(10)));
        assert!(state.append_to_open_thread(1, message(11)));
        assert!(!state.append_to_open_thread(1, message(11)));
        assert!(!state.append_to_open_thread(2, message(12)));

        // the response already carries 10 but predates 11
        assert!(state.commit_detail(token, detail(ItemId::thread(1), &[10])));
        let ids: Vec<i64> = state
            .detail()
            .map(|d| d.messages.iter().map(|m| m.id).collect())
            .unwrap_or_default();
        assert_eq!(ids, vec![10, 11]);
    }

    #[test]
    fn test_held_messages_dropped_on_reselect() {
        let mut state = state_with(&["thread:1", "thread:2"]);
        state.select(ItemId::thread(1));
        state.append_to_open_thread(1, message(11));

        let token = state.select(ItemId::thread(1));
        assert!(state.commit_detail(token, detail(ItemId::thread(1), &[10])));
        assert_eq!(state.detail().map(|d| d.messages.len()), Some(1));
    }

    #[test]
    fn test_token_currency() {
        let mut state = state_with(&["thread:1"]);
        let first = state.select(ItemId::thread(1));
        assert!(state.is_current(first));

        let second = state.select(ItemId::thread(1));
        assert!(!state.is_current(first));
        assert!(state.is_current(second));

        state.deselect();
        assert!(!state.is_current(second));
    }

    #[test]
    fn test_checked_cleared_after_bulk() {
        let mut state = state_with(&["thread:1", "draft:5"]);
        state.set_checked(ItemId::thread(1), true);
        state.set_checked(ItemId::draft(5), true);

        let outcome = BulkOutcome {
            action: BulkAction::Archive,
            applied: vec![ItemId::thread(1), ItemId::draft(5)],
            failed: Vec::new(),
        };
        assert_eq!(state.apply_bulk(&outcome), 2);
        assert!(state.checked().is_empty());
        assert!(state.items().iter().all(|i| i.is_archived));
    }

    #[test]
    fn test_promote_draft() {
        let mut state = state_with(&["draft:-1", "thread:1"]);
        state.set_checked(ItemId::draft(-1), true);

        assert!(state.promote_draft(ItemId::draft(-1), ItemId::draft(100)));
        assert_eq!(state.items()[0].id, ItemId::draft(100));
        assert!(state.checked().contains(&ItemId::draft(100)));

        // ids outside the draft namespace never change
        assert!(!state.promote_draft(ItemId::thread(1), ItemId::draft(7)));
        // neither do drafts the server already knows
        assert!(!state.promote_draft(ItemId::draft(100), ItemId::draft(101)));
    }

    #[test]
    fn test_promote_folds_into_refreshed_server_row() {
        let mut state = state_with(&["draft:-2"]);
        state.replace_items(vec![sample_item("draft:100")]);
        assert_eq!(state.items().len(), 2, "local draft survives the refresh");

        assert!(state.promote_draft(ItemId::draft(-2), ItemId::draft(100)));
        let ids: Vec<ItemId> = state.items().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![ItemId::draft(100)]);
    }

    #[test]
    fn test_upsert_draft_overwrites_row() {
        let mut state = state_with(&["thread:1"]);
        let mut row = sample_item("draft:-3");
        state.upsert_draft(row.clone());
        assert_eq!(state.items()[0].id, ItemId::draft(-3));

        row.preview = "second pass".to_string();
        state.upsert_draft(row);
        assert_eq!(state.items().len(), 2);
        assert_eq!(state.items()[0].preview, "second pass");
    }

    #[test]
    fn test_refresh_drops_vanished_checked_ids() {
        let mut state = state_with(&["thread:1", "thread:2"]);
        state.set_checked(ItemId::thread(2), true);
        state.replace_items(vec![sample_item("thread:1")]);
        assert!(state.checked().is_empty());
    }
}
