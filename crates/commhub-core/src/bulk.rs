//! One action over a set of checked items

use crate::item::{FlagPatch, ItemId, UnifiedItem};
use crate::{CoreError, CoreResult};
use commhub_api::{BulkAction, BulkRequest, HubBackend};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Ids an action applies to. `DeleteDrafts` only touches `draft:` ids, and
/// drafts the server has not created yet are never sent.
pub fn targets(action: BulkAction, ids: &BTreeSet<ItemId>) -> Vec<ItemId> {
    ids.iter()
        .filter(|id| !id.is_local_draft())
        .filter(|id| action != BulkAction::DeleteDrafts || id.is_draft())
        .copied()
        .collect()
}

fn patch_for(action: BulkAction) -> Option<FlagPatch> {
    match action {
        BulkAction::Archive => Some(FlagPatch {
            is_archived: Some(true),
            ..Default::default()
        }),
        BulkAction::Flag => Some(FlagPatch {
            is_starred: Some(true),
            ..Default::default()
        }),
        BulkAction::MarkRead => Some(FlagPatch {
            is_unread: Some(false),
            ..Default::default()
        }),
        BulkAction::DeleteDrafts => None,
    }
}

/// Reflect a confirmed action locally. Returns how many items changed.
pub fn apply_optimistic(action: BulkAction, ids: &[ItemId], items: &mut Vec<UnifiedItem>) -> usize {
    let ids: HashSet<ItemId> = ids.iter().copied().collect();
    match patch_for(action) {
        Some(patch) => items
            .iter_mut()
            .filter(|item| ids.contains(&item.id))
            .map(|item| patch.apply(item))
            .filter(|changed| *changed)
            .count(),
        None => {
            let before = items.len();
            items.retain(|item| !ids.contains(&item.id));
            before - items.len()
        }
    }
}

/// What the backend confirmed for one bulk request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOutcome {
    pub action: BulkAction,
    pub applied: Vec<ItemId>,
    pub failed: Vec<ItemId>,
}

/// Send the batched request.
///
/// When the backend reports per-id failures only the remaining ids count as
/// applied; otherwise the overall result covers every id.
pub async fn execute(
    backend: &dyn HubBackend,
    action: BulkAction,
    ids: &BTreeSet<ItemId>,
) -> CoreResult<BulkOutcome> {
    let targets = targets(action, ids);
    if targets.is_empty() {
        debug!("Bulk {:?}: nothing to do", action);
        return Ok(BulkOutcome {
            action,
            applied: Vec::new(),
            failed: Vec::new(),
        });
    }

    let request = BulkRequest {
        ids: targets.iter().map(ItemId::to_string).collect(),
        action,
    };
    let response = backend.bulk_action(&request).await?;
    if !response.success {
        return Err(CoreError::Api(format!("bulk {:?} rejected", action)));
    }

    let failed: Vec<ItemId> = response
        .failed_ids
        .unwrap_or_default()
        .iter()
        .filter_map(|raw| match raw.parse::<ItemId>() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Ignoring unparseable failed id {}: {}", raw, e);
                None
            }
        })
        .collect();
    let applied: Vec<ItemId> = targets
        .into_iter()
        .filter(|id| !failed.contains(id))
        .collect();

    info!(
        "Bulk {:?}: {} applied, {} failed",
        action,
        applied.len(),
        failed.len()
    );
    Ok(BulkOutcome {
        action,
        applied,
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::sample_item;
    use crate::testing::{Call, FakeBackend};
    use commhub_api::BulkResponse;

    fn ids(raw: &[&str]) -> BTreeSet<ItemId> {
        raw.iter().map(|r| r.parse().unwrap()).collect()
    }

    #[test]
    fn test_archive_applies_to_drafts_too() {
        let mut items = vec![sample_item("thread:1"), sample_item("draft:5")];
        let selected = ids(&["thread:1", "draft:5"]);

        let changed = apply_optimistic(
            BulkAction::Archive,
            &targets(BulkAction::Archive, &selected),
            &mut items,
        );
        assert_eq!(changed, 2);
        assert!(items.iter().all(|i| i.is_archived));
    }

    #[test]
    fn test_delete_drafts_filters_selection() {
        let selected = ids(&["thread:1", "draft:5"]);
        assert_eq!(
            targets(BulkAction::DeleteDrafts, &selected),
            vec![ItemId::draft(5)]
        );

        let mut items = vec![sample_item("thread:1"), sample_item("draft:5")];
        let removed = apply_optimistic(
            BulkAction::DeleteDrafts,
            &targets(BulkAction::DeleteDrafts, &selected),
            &mut items,
        );
        assert_eq!(removed, 1);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, ItemId::thread(1));
        assert!(!items[0].is_archived);
    }

    #[test]
    fn test_flag_and_mark_read() {
        let mut item = sample_item("thread:1");
        item.is_unread = true;
        let mut items = vec![item];

        apply_optimistic(BulkAction::Flag, &[ItemId::thread(1)], &mut items);
        apply_optimistic(BulkAction::MarkRead, &[ItemId::thread(1)], &mut items);
        assert!(items[0].is_starred);
        assert!(!items[0].is_unread);
    }

    #[tokio::test]
    async fn test_execute_sends_one_batch() {
        let backend = FakeBackend::new();
        let outcome = execute(
            backend.as_ref(),
            BulkAction::DeleteDrafts,
            &ids(&["thread:1", "draft:5", "draft:6"]),
        )
        .await
        .unwrap();

        assert_eq!(outcome.applied, vec![ItemId::draft(5), ItemId::draft(6)]);
        assert_eq!(
            backend.calls(),
            vec![Call::Bulk(
                BulkAction::DeleteDrafts,
                vec!["draft:5".to_string(), "draft:6".to_string()]
            )]
        );
    }

    #[tokio::test]
    async fn test_execute_skips_empty_target_set() {
        let backend = FakeBackend::new();
        let outcome = execute(backend.as_ref(), BulkAction::DeleteDrafts, &ids(&["thread:1"]))
            .await
            .unwrap();
        assert!(outcome.applied.is_empty());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_execute_honours_reported_failures() {
        let backend = FakeBackend::new();
        backend.with(|s| {
            s.bulk_response = Some(BulkResponse {
                success: true,
                failed_ids: Some(vec!["thread:2".to_string()]),
            })
        });

        let outcome = execute(backend.as_ref(), BulkAction::Archive, &ids(&["thread:1", "thread:2"]))
            .await
            .unwrap();
        assert_eq!(outcome.applied, vec![ItemId::thread(1)]);
        assert_eq!(outcome.failed, vec![ItemId::thread(2)]);
    }

    #[tokio::test]
    async fn test_execute_rejected_batch_is_error() {
        let backend = FakeBackend::new();
        backend.with(|s| {
            s.bulk_response = Some(BulkResponse {
                success: false,
                failed_ids: None,
            })
        });
        let result = execute(backend.as_ref(), BulkAction::Flag, &ids(&["thread:1"])).await;
        assert!(matches!(result, Err(CoreError::Api(_))));
    }
}
