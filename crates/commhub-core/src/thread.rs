//! Hydrated conversation detail

use crate::item::{Direction, ItemId};
use chrono::{DateTime, Utc};
use commhub_api::{EmailDetailDto, MessageDto, ThreadDetailDto};

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadMessage {
    pub id: i64,
    pub body: String,
    pub sender_name: Option<String>,
    pub sender_party_id: Option<i64>,
    pub direction: Option<Direction>,
    pub created_at: DateTime<Utc>,
}

impl From<MessageDto> for ThreadMessage {
    fn from(dto: MessageDto) -> Self {
        Self {
            id: dto.id,
            body: dto.body,
            sender_name: dto.sender_name,
            sender_party_id: dto.sender_party_id,
            direction: dto.direction.as_deref().and_then(Direction::parse),
            created_at: dto.created_at.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub party_id: Option<i64>,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Full detail of the selected thread or email
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationThread {
    pub id: ItemId,
    pub subject: Option<String>,
    pub party_id: Option<i64>,
    pub party_name: Option<String>,
    pub participants: Vec<Participant>,
    /// Ordered oldest first
    pub messages: Vec<ThreadMessage>,
    pub is_flagged: bool,
    pub is_archived: bool,
}

impl ConversationThread {
    pub fn from_thread(id: ItemId, dto: ThreadDetailDto) -> Self {
        let mut messages: Vec<ThreadMessage> =
            dto.messages.into_iter().map(ThreadMessage::from).collect();
        messages.sort_by_key(|m| m.created_at);

        Self {
            id,
            subject: dto.subject,
            party_id: dto.party_id,
            party_name: dto.party_name,
            participants: dto
                .participants
                .into_iter()
                .map(|p| Participant {
                    party_id: p.party_id,
                    name: p.name,
                    email: p.email,
                })
                .collect(),
            messages,
            is_flagged: dto.flagged,
            is_archived: dto.archived,
        }
    }

    /// An email detail becomes a one-message conversation unless the backend
    /// already threads it.
    pub fn from_email(id: ItemId, dto: EmailDetailDto) -> Self {
        let mut participants = Vec::new();
        if let Some(from) = &dto.from_address {
            participants.push(Participant {
                party_id: None,
                name: None,
                email: Some(from.clone()),
            });
        }
        for address in dto.to_addresses.iter().chain(dto.cc_addresses.iter()) {
            participants.push(Participant {
                party_id: None,
                name: None,
                email: Some(address.clone()),
            });
        }

        let mut messages: Vec<ThreadMessage> =
            dto.messages.into_iter().map(ThreadMessage::from).collect();
        if messages.is_empty() {
            messages.push(ThreadMessage {
                id: id.number(),
                body: dto.body_text.or(dto.body_html).unwrap_or_default(),
                sender_name: dto.from_address.clone(),
                sender_party_id: None,
                direction: dto.direction.as_deref().and_then(Direction::parse),
                created_at: dto.sent_at.unwrap_or_default(),
            });
        }
        messages.sort_by_key(|m| m.created_at);

        Self {
            id,
            subject: dto.subject,
            party_id: dto.party_id,
            party_name: dto.party_name,
            participants,
            messages,
            is_flagged: dto.flagged,
            is_archived: dto.archived,
        }
    }

    /// Append a pushed message. Redelivery of a known message id is a no-op.
    pub fn append_message(&mut self, message: ThreadMessage) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: i64, body: &str) -> ThreadMessage {
        ThreadMessage {
            id,
            body: body.to_string(),
            sender_name: None,
            sender_party_id: None,
            direction: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_append_is_idempotent() {
        let mut thread = ConversationThread {
            id: ItemId::thread(1),
            subject: None,
            party_id: None,
            party_name: None,
            participants: Vec::new(),
            messages: vec![message(10, "first")],
            is_flagged: false,
            is_archived: false,
        };

        assert!(thread.append_message(message(11, "second")));
        assert!(!thread.append_message(message(11, "second again")));
        assert_eq!(thread.messages.len(), 2);
        assert_eq!(thread.messages[1].body, "second");
    }

    #[test]
    fn test_email_detail_synthesizes_message() {
        let dto: EmailDetailDto = serde_json::from_value(serde_json::json!({
            "subject": "Deposit received",
            "fromAddress": "buyer@example.com",
            "toAddresses": ["kennel@example.com"],
            "bodyText": "Thanks!",
            "direction": "inbound"
        }))
        .unwrap();
        let id: ItemId = "partyEmail:8".parse().unwrap();

        let thread = ConversationThread::from_email(id, dto);
        assert_eq!(thread.messages.len(), 1);
        assert_eq!(thread.messages[0].id, 8);
        assert_eq!(thread.messages[0].body, "Thanks!");
        assert_eq!(thread.participants.len(), 2);
    }
}
