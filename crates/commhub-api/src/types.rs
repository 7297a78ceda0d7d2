use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend list views merged into the unified inbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboxView {
    All,
    Sent,
    Draft,
}

impl InboxView {
    pub const ALL_VIEWS: [InboxView; 3] = [InboxView::All, InboxView::Sent, InboxView::Draft];

    /// Value of the `status` query parameter
    pub fn as_query(&self) -> &'static str {
        match self {
            InboxView::All => "all",
            InboxView::Sent => "sent",
            InboxView::Draft => "draft",
        }
    }
}

impl std::fmt::Display for InboxView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_query())
    }
}

/// Response wrapper for inbox list endpoints.
///
/// Older deployments return a bare array, newer ones wrap it in `items`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListResponse<T> {
    Wrapped { items: Vec<T> },
    Bare(Vec<T>),
}

impl<T> ListResponse<T> {
    pub fn into_items(self) -> Vec<T> {
        match self {
            ListResponse::Wrapped { items } => items,
            ListResponse::Bare(items) => items,
        }
    }
}

/// One row of the inbox list as served by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboxItemDto {
    /// Composite id, e.g. `thread:12` or `partyEmail:7`
    pub id: String,
    pub channel: Option<String>,
    pub kind: Option<String>,
    pub party_id: Option<i64>,
    #[serde(default)]
    pub party_name: Option<String>,
    pub subject: Option<String>,
    pub preview: Option<String>,
    #[serde(alias = "lastActivityAt")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_unread: bool,
    #[serde(default)]
    pub is_starred: bool,
    #[serde(default)]
    pub is_archived: bool,
    pub direction: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Enrichment block (lead status, waitlist position, ...), passed through untouched
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

/// A single message inside a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: i64,
    #[serde(default)]
    pub body: String,
    pub sender_name: Option<String>,
    pub sender_party_id: Option<i64>,
    pub direction: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantDto {
    pub party_id: Option<i64>,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Response of `GET threads/:id`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDetailDto {
    pub id: i64,
    pub subject: Option<String>,
    pub party_id: Option<i64>,
    pub party_name: Option<String>,
    #[serde(default)]
    pub participants: Vec<ParticipantDto>,
    #[serde(default)]
    pub messages: Vec<MessageDto>,
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub archived: bool,
}

/// Response of `GET email/:compositeId`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailDetailDto {
    pub subject: Option<String>,
    pub from_address: Option<String>,
    #[serde(default)]
    pub to_addresses: Vec<String>,
    #[serde(default)]
    pub cc_addresses: Vec<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub party_id: Option<i64>,
    pub party_name: Option<String>,
    pub direction: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub archived: bool,
    /// Present when the backend already threads the email
    #[serde(default)]
    pub messages: Vec<MessageDto>,
}

/// Response of `GET communications/counts`. Any field may be omitted.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CountsDto {
    pub unread_count: Option<u32>,
    pub flagged_count: Option<u32>,
    pub draft_count: Option<u32>,
    pub sent_count: Option<u32>,
}

/// Action tag for `POST communications/bulk`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BulkAction {
    Archive,
    Flag,
    MarkRead,
    DeleteDrafts,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkRequest {
    pub ids: Vec<String>,
    pub action: BulkAction,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    /// Ids the backend could not apply the action to, when it reports them
    #[serde(default)]
    pub failed_ids: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

/// Body of `PATCH threads/:id`
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ThreadFlagsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flagged: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

/// Body of `POST drafts` and `PUT drafts/:id`
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DraftPayload {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i64>,
    pub to_addresses: Vec<String>,
    pub cc_addresses: Vec<String>,
    pub bcc_addresses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
}

/// Response of `POST drafts`
#[derive(Debug, Clone, Deserialize)]
pub struct DraftCreated {
    pub id: i64,
}

/// A directory hit for an email address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartyMatch {
    pub email: String,
    pub party_id: i64,
    pub party_kind: String,
    pub party_name: String,
}

/// Response of `GET parties/lookup-by-email`
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LookupResponse {
    #[serde(default)]
    pub matches: Vec<PartyMatch>,
    #[serde(default)]
    pub unmatched: Vec<String>,
}

/// Body of `POST threads/:id/messages`
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingThreadMessage {
    pub body: String,
}

/// Body of `POST emails/send`
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailTemplate {
    pub id: i64,
    pub name: String,
    pub subject: Option<String>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContactSummary {
    pub id: i64,
    #[serde(alias = "displayName")]
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TagSummary {
    pub id: i64,
    pub name: String,
    pub color: Option<String>,
}

/// Payload of the `new_message` push event
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub thread_id: i64,
    pub message: MessageDto,
}

/// Payload of the `thread_update` push event. Omitted fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThreadUpdatePayload {
    pub thread_id: i64,
    pub is_read: Option<bool>,
    pub flagged: Option<bool>,
    pub archived: Option<bool>,
}

/// Payload of the `new_email` push event
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewEmailPayload {
    pub email_id: Option<String>,
    pub party_id: Option<i64>,
}

/// Event delivered by the push channel
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum PushEvent {
    NewMessage(NewMessagePayload),
    ThreadUpdate(ThreadUpdatePayload),
    NewEmail(NewEmailPayload),
}

impl PushEvent {
    /// Decode one `{ "event": ..., "payload": ... }` frame
    pub fn from_json(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_event_decoding() {
        let frame = r#"{"event":"thread_update","payload":{"threadId":4,"flagged":true}}"#;
        let event = PushEvent::from_json(frame).unwrap();
        assert_eq!(
            event,
            PushEvent::ThreadUpdate(ThreadUpdatePayload {
                thread_id: 4,
                flagged: Some(true),
                ..Default::default()
            })
        );

        let frame = r#"{"event":"new_message","payload":{"threadId":9,"message":{"id":31,"body":"hi"}}}"#;
        match PushEvent::from_json(frame).unwrap() {
            PushEvent::NewMessage(p) => {
                assert_eq!(p.thread_id, 9);
                assert_eq!(p.message.id, 31);
                assert_eq!(p.message.body, "hi");
            }
            other => panic!("unexpected event {:?}", other),
        }

        let frame = r#"{"event":"new_email","payload":{}}"#;
        assert!(matches!(
            PushEvent::from_json(frame).unwrap(),
            PushEvent::NewEmail(_)
        ));

        assert!(PushEvent::from_json(r#"{"event":"typing","payload":{}}"#).is_err());
    }

    #[test]
    fn test_list_response_shapes() {
        let bare: ListResponse<serde_json::Value> = serde_json::from_str(r#"[{"id":"thread:1"}]"#).unwrap();
        assert_eq!(bare.into_items().len(), 1);

        let wrapped: ListResponse<serde_json::Value> =
            serde_json::from_str(r#"{"items":[{"id":"thread:1"},{"id":"draft:2"}]}"#).unwrap();
        assert_eq!(wrapped.into_items().len(), 2);
    }

    #[test]
    fn test_item_dto_defaults() {
        let dto: InboxItemDto = serde_json::from_str(
            r#"{"id":"partyEmail:3","lastActivityAt":"2024-05-01T10:00:00Z","direction":"inbound"}"#,
        )
        .unwrap();
        assert_eq!(dto.id, "partyEmail:3");
        assert!(!dto.is_unread);
        assert!(dto.tags.is_empty());
        assert!(dto.timestamp.is_some());
    }

    #[test]
    fn test_bulk_action_wire_names() {
        let req = BulkRequest {
            ids: vec!["thread:1".into()],
            action: BulkAction::DeleteDrafts,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["action"], "deleteDrafts");

        let resp: BulkResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.success);
        assert!(resp.failed_ids.is_none());
    }

    #[test]
    fn test_flags_patch_omits_unset_fields() {
        let patch = ThreadFlagsPatch {
            flagged: Some(true),
            archived: None,
        };
        assert_eq!(serde_json::to_string(&patch).unwrap(), r#"{"flagged":true}"#);
    }
}
