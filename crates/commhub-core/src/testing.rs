//! In-memory backend double for engine tests

use async_trait::async_trait;
use commhub_api::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ListInbox(InboxView),
    GetThread(i64),
    GetEmail(String),
    SendThreadMessage(i64, String),
    SendEmail(OutgoingEmail),
    PatchThread(i64, ThreadFlagsPatch),
    Bulk(BulkAction, Vec<String>),
    GetCounts,
    CreateDraft(DraftPayload),
    UpdateDraft(i64, DraftPayload),
    DeleteDraft(i64),
    Lookup(Vec<String>),
    Templates,
    Contacts,
    Tags,
}

#[derive(Default)]
pub struct FakeState {
    pub lists: HashMap<InboxView, Vec<InboxItemDto>>,
    pub failing_views: HashSet<InboxView>,
    pub threads: HashMap<i64, ThreadDetailDto>,
    pub thread_delays: HashMap<i64, Duration>,
    pub emails: HashMap<String, EmailDetailDto>,
    pub counts: CountsDto,
    pub bulk_response: Option<BulkResponse>,
    pub fail_bulk: bool,
    pub directory: HashMap<String, PartyMatch>,
    /// Addresses the lookup leaves out of both `matches` and `unmatched`
    pub lookup_omits: HashSet<String>,
    pub fail_lookup: bool,
    pub fail_sends: bool,
    pub next_draft_id: i64,
    pub fail_draft_saves: bool,
    pub fail_templates: bool,
    pub calls: Vec<Call>,
}

pub struct FakeBackend {
    state: Mutex<FakeState>,
}

fn failure() -> ApiError {
    ApiError::ApiError {
        status: 500,
        body: "fake failure".to_string(),
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                next_draft_id: 100,
                ..Default::default()
            }),
        })
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.with(|s| s.calls.iter().filter(|c| pred(c)).count())
    }

    fn record(&self, call: Call) {
        self.with(|s| s.calls.push(call));
    }
}

/// Minimal inbox row for tests
pub fn item_dto(id: &str) -> InboxItemDto {
    InboxItemDto {
        id: id.to_string(),
        channel: None,
        kind: None,
        party_id: None,
        party_name: Some("Test Party".to_string()),
        subject: None,
        preview: Some(format!("preview of {}", id)),
        timestamp: None,
        is_unread: false,
        is_starred: false,
        is_archived: false,
        direction: None,
        tags: Vec::new(),
        meta: None,
    }
}

pub fn thread_detail(id: i64, message_ids: &[i64]) -> ThreadDetailDto {
    ThreadDetailDto {
        id,
        subject: Some(format!("thread {}", id)),
        party_id: None,
        party_name: None,
        participants: Vec::new(),
        messages: message_ids
            .iter()
            .map(|m| MessageDto {
                id: *m,
                body: format!("message {}", m),
                sender_name: None,
                sender_party_id: None,
                direction: None,
                created_at: None,
            })
            .collect(),
        flagged: false,
        archived: false,
    }
}

#[async_trait]
impl HubBackend for FakeBackend {
    async fn list_inbox(&self, view: InboxView, _limit: u32) -> ApiResult<Vec<InboxItemDto>> {
        self.record(Call::ListInbox(view));
        self.with(|s| {
            if s.failing_views.contains(&view) {
                return Err(failure());
            }
            Ok(s.lists.get(&view).cloned().unwrap_or_default())
        })
    }

    async fn get_thread(&self, thread_id: i64) -> ApiResult<ThreadDetailDto> {
        self.record(Call::GetThread(thread_id));
        let delay = self.with(|s| s.thread_delays.get(&thread_id).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with(|s| s.threads.get(&thread_id).cloned().ok_or_else(failure))
    }

    async fn get_email(&self, composite_id: &str) -> ApiResult<EmailDetailDto> {
        self.record(Call::GetEmail(composite_id.to_string()));
        self.with(|s| s.emails.get(composite_id).cloned().ok_or_else(failure))
    }

    async fn send_thread_message(
        &self,
        thread_id: i64,
        message: &OutgoingThreadMessage,
    ) -> ApiResult<()> {
        self.record(Call::SendThreadMessage(thread_id, message.body.clone()));
        self.with(|s| if s.fail_sends { Err(failure()) } else { Ok(()) })
    }

    async fn send_email(&self, email: &OutgoingEmail) -> ApiResult<()> {
        self.record(Call::SendEmail(email.clone()));
        self.with(|s| if s.fail_sends { Err(failure()) } else { Ok(()) })
    }

    async fn patch_thread(&self, thread_id: i64, patch: &ThreadFlagsPatch) -> ApiResult<()> {
        self.record(Call::PatchThread(thread_id, patch.clone()));
        Ok(())
    }

    async fn bulk_action(&self, request: &BulkRequest) -> ApiResult<BulkResponse> {
        self.record(Call::Bulk(request.action, request.ids.clone()));
        self.with(|s| {
            if s.fail_bulk {
                return Err(failure());
            }
            Ok(s.bulk_response.clone().unwrap_or(BulkResponse {
                success: true,
                failed_ids: None,
            }))
        })
    }

    async fn get_counts(&self) -> ApiResult<CountsDto> {
        self.record(Call::GetCounts);
        Ok(self.with(|s| s.counts.clone()))
    }

    async fn create_draft(&self, draft: &DraftPayload) -> ApiResult<i64> {
        self.record(Call::CreateDraft(draft.clone()));
        self.with(|s| {
            if s.fail_draft_saves {
                return Err(failure());
            }
            let id = s.next_draft_id;
            s.next_draft_id += 1;
            Ok(id)
        })
    }

    async fn update_draft(&self, draft_id: i64, draft: &DraftPayload) -> ApiResult<()> {
        self.record(Call::UpdateDraft(draft_id, draft.clone()));
        self.with(|s| if s.fail_draft_saves { Err(failure()) } else { Ok(()) })
    }

    async fn delete_draft(&self, draft_id: i64) -> ApiResult<()> {
        self.record(Call::DeleteDraft(draft_id));
        Ok(())
    }

    async fn lookup_by_email(&self, emails: &[String]) -> ApiResult<LookupResponse> {
        self.record(Call::Lookup(emails.to_vec()));
        self.with(|s| {
            if s.fail_lookup {
                return Err(failure());
            }
            let mut response = LookupResponse::default();
            for email in emails {
                if s.lookup_omits.contains(email) {
                    continue;
                }
                match s.directory.get(email) {
                    Some(hit) => response.matches.push(hit.clone()),
                    None => response.unmatched.push(email.clone()),
                }
            }
            Ok(response)
        })
    }

    async fn list_templates(&self) -> ApiResult<Vec<EmailTemplate>> {
        self.record(Call::Templates);
        self.with(|s| if s.fail_templates { Err(failure()) } else { Ok(Vec::new()) })
    }

    async fn list_contacts(&self) -> ApiResult<Vec<ContactSummary>> {
        self.record(Call::Contacts);
        Ok(Vec::new())
    }

    async fn list_tags(&self) -> ApiResult<Vec<TagSummary>> {
        self.record(Call::Tags);
        Ok(Vec::new())
    }
}
