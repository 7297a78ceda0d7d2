//! Backend seam used by the inbox engine

use crate::client::HubClient;
use crate::error::ApiResult;
use crate::types::*;
use async_trait::async_trait;

/// Everything the unified inbox engine needs from the backend.
///
/// [`HubClient`] is the production implementation; tests substitute an
/// in-memory double.
#[async_trait]
pub trait HubBackend: Send + Sync {
    async fn list_inbox(&self, view: InboxView, limit: u32) -> ApiResult<Vec<InboxItemDto>>;
    async fn get_thread(&self, thread_id: i64) -> ApiResult<ThreadDetailDto>;
    async fn get_email(&self, composite_id: &str) -> ApiResult<EmailDetailDto>;
    async fn send_thread_message(
        &self,
        thread_id: i64,
        message: &OutgoingThreadMessage,
    ) -> ApiResult<()>;
    async fn send_email(&self, email: &OutgoingEmail) -> ApiResult<()>;
    async fn patch_thread(&self, thread_id: i64, patch: &ThreadFlagsPatch) -> ApiResult<()>;
    async fn bulk_action(&self, request: &BulkRequest) -> ApiResult<BulkResponse>;
    async fn get_counts(&self) -> ApiResult<CountsDto>;
    async fn create_draft(&self, draft: &DraftPayload) -> ApiResult<i64>;
    async fn update_draft(&self, draft_id: i64, draft: &DraftPayload) -> ApiResult<()>;
    async fn delete_draft(&self, draft_id: i64) -> ApiResult<()>;
    async fn lookup_by_email(&self, emails: &[String]) -> ApiResult<LookupResponse>;
    async fn list_templates(&self) -> ApiResult<Vec<EmailTemplate>>;
    async fn list_contacts(&self) -> ApiResult<Vec<ContactSummary>>;
    async fn list_tags(&self) -> ApiResult<Vec<TagSummary>>;
}

#[async_trait]
impl HubBackend for HubClient {
    async fn list_inbox(&self, view: InboxView, limit: u32) -> ApiResult<Vec<InboxItemDto>> {
        HubClient::list_inbox(self, view, limit).await
    }

    async fn get_thread(&self, thread_id: i64) -> ApiResult<ThreadDetailDto> {
        HubClient::get_thread(self, thread_id).await
    }

    async fn get_email(&self, composite_id: &str) -> ApiResult<EmailDetailDto> {
        HubClient::get_email(self, composite_id).await
    }

    async fn send_thread_message(
        &self,
        thread_id: i64,
        message: &OutgoingThreadMessage,
    ) -> ApiResult<()> {
        HubClient::send_thread_message(self, thread_id, message).await
    }

    async fn send_email(&self, email: &OutgoingEmail) -> ApiResult<()> {
        HubClient::send_email(self, email).await
    }

    async fn patch_thread(&self, thread_id: i64, patch: &ThreadFlagsPatch) -> ApiResult<()> {
        HubClient::patch_thread(self, thread_id, patch).await
    }

    async fn bulk_action(&self, request: &BulkRequest) -> ApiResult<BulkResponse> {
        HubClient::bulk_action(self, request).await
    }

    async fn get_counts(&self) -> ApiResult<CountsDto> {
        HubClient::get_counts(self).await
    }

    async fn create_draft(&self, draft: &DraftPayload) -> ApiResult<i64> {
        HubClient::create_draft(self, draft).await
    }

    async fn update_draft(&self, draft_id: i64, draft: &DraftPayload) -> ApiResult<()> {
        HubClient::update_draft(self, draft_id, draft).await
    }

    async fn delete_draft(&self, draft_id: i64) -> ApiResult<()> {
        HubClient::delete_draft(self, draft_id).await
    }

    async fn lookup_by_email(&self, emails: &[String]) -> ApiResult<LookupResponse> {
        HubClient::lookup_by_email(self, emails).await
    }

    async fn list_templates(&self) -> ApiResult<Vec<EmailTemplate>> {
        HubClient::list_templates(self).await
    }

    async fn list_contacts(&self) -> ApiResult<Vec<ContactSummary>> {
        HubClient::list_contacts(self).await
    }

    async fn list_tags(&self) -> ApiResult<Vec<TagSummary>> {
        HubClient::list_tags(self).await
    }
}
