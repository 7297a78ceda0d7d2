//! Canonical inbox item and its composite identity
//!
//! Every row the backend serves carries an id of the form `<type>:<n>`. The
//! type prefix is parsed once, here, into [`ItemType`]; the rest of the engine
//! dispatches on the enum and never re-parses the string.

use crate::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use commhub_api::InboxItemDto;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespace of a composite id, naming the backend sub-resource that owns the item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemType {
    /// Direct-message thread
    Thread,
    /// Legacy email record
    Email,
    /// Email linked to a known party
    PartyEmail,
    /// Email with no party link
    UnlinkedEmail,
    /// Compose draft
    Draft,
}

impl ItemType {
    pub const ALL: [ItemType; 5] = [
        ItemType::Thread,
        ItemType::Email,
        ItemType::PartyEmail,
        ItemType::UnlinkedEmail,
        ItemType::Draft,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            ItemType::Thread => "thread",
            ItemType::Email => "email",
            ItemType::PartyEmail => "partyEmail",
            ItemType::UnlinkedEmail => "unlinkedEmail",
            ItemType::Draft => "draft",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        ItemType::ALL.into_iter().find(|t| t.prefix() == prefix)
    }

    /// Whether the item is one of the email-like sub-resources
    pub fn is_email(&self) -> bool {
        matches!(
            self,
            ItemType::Email | ItemType::PartyEmail | ItemType::UnlinkedEmail
        )
    }
}

/// Parsed composite id (`thread:12`, `partyEmail:7`, `draft:3`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId {
    item_type: ItemType,
    number: i64,
}

impl ItemId {
    pub fn new(item_type: ItemType, number: i64) -> Self {
        Self { item_type, number }
    }

    pub fn thread(number: i64) -> Self {
        Self::new(ItemType::Thread, number)
    }

    pub fn draft(number: i64) -> Self {
        Self::new(ItemType::Draft, number)
    }

    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    pub fn number(&self) -> i64 {
        self.number
    }

    pub fn is_draft(&self) -> bool {
        self.item_type == ItemType::Draft
    }

    /// A compose draft not yet created on the server
    pub fn is_local_draft(&self) -> bool {
        self.is_draft() && self.number < 0
    }

    pub fn thread_id(&self) -> Option<i64> {
        (self.item_type == ItemType::Thread).then_some(self.number)
    }

    pub fn email_id(&self) -> Option<i64> {
        self.item_type.is_email().then_some(self.number)
    }

    pub fn draft_id(&self) -> Option<i64> {
        self.is_draft().then_some(self.number)
    }

    /// Detail endpoint that hydrates this item
    pub fn detail_route(&self) -> DetailRoute {
        match self.item_type {
            ItemType::Thread => DetailRoute::Thread(self.number),
            ItemType::Email | ItemType::PartyEmail | ItemType::UnlinkedEmail => {
                DetailRoute::Email(self.to_string())
            }
            ItemType::Draft => DetailRoute::Compose(self.number),
        }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.item_type.prefix(), self.number)
    }
}

impl FromStr for ItemId {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let (prefix, suffix) = s
            .split_once(':')
            .ok_or_else(|| CoreError::InvalidItemId(s.to_string()))?;

        let item_type = ItemType::from_prefix(prefix)
            .ok_or_else(|| CoreError::UnrecognizedItemType(prefix.to_string()))?;

        let number = suffix
            .parse::<i64>()
            .map_err(|_| CoreError::InvalidItemId(s.to_string()))?;

        Ok(Self { item_type, number })
    }
}

impl Serialize for ItemId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Where the detail view of an item is loaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailRoute {
    /// `GET threads/:n`
    Thread(i64),
    /// `GET email/:compositeId`
    Email(String),
    /// Drafts open in the compose surface; there is no detail fetch
    Compose(i64),
}

impl DetailRoute {
    /// Backend path, relative to the API root
    pub fn path(&self) -> Option<String> {
        match self {
            DetailRoute::Thread(n) => Some(format!("threads/{}", n)),
            DetailRoute::Email(composite) => Some(format!("email/{}", composite)),
            DetailRoute::Compose(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Dm,
}

impl Channel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "email" => Some(Channel::Email),
            "dm" => Some(Channel::Dm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Dm => "dm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Email,
    Dm,
    Draft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "inbound" | "incoming" => Some(Direction::Inbound),
            "outbound" | "outgoing" => Some(Direction::Outbound),
            _ => None,
        }
    }
}

/// A message, email or draft as shown in the unified list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedItem {
    pub id: ItemId,
    pub channel: Channel,
    pub kind: ItemKind,
    pub party_id: Option<i64>,
    pub party_name: String,
    pub subject: Option<String>,
    pub preview: String,
    /// Last activity
    pub timestamp: DateTime<Utc>,
    pub is_unread: bool,
    pub is_starred: bool,
    pub is_archived: bool,
    pub direction: Option<Direction>,
    /// Ordered, duplicate-free labels
    pub tags: Vec<String>,
    /// Opaque enrichment block
    pub meta: Option<serde_json::Value>,
}

impl UnifiedItem {
    /// Convert a server row. Fails only on an unusable id.
    pub fn from_dto(dto: InboxItemDto, preview_chars: usize) -> CoreResult<Self> {
        let id: ItemId = dto.id.parse()?;

        let channel = dto
            .channel
            .as_deref()
            .and_then(Channel::parse)
            .unwrap_or(match id.item_type() {
                ItemType::Thread => Channel::Dm,
                _ => Channel::Email,
            });

        let kind = if id.is_draft() {
            ItemKind::Draft
        } else {
            match channel {
                Channel::Email => ItemKind::Email,
                Channel::Dm => ItemKind::Dm,
            }
        };

        let mut tags: Vec<String> = Vec::with_capacity(dto.tags.len());
        for tag in dto.tags {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        Ok(Self {
            id,
            channel,
            kind,
            party_id: dto.party_id,
            party_name: dto.party_name.unwrap_or_else(|| "Unknown".to_string()),
            subject: dto.subject,
            preview: truncate_preview(dto.preview.as_deref().unwrap_or(""), preview_chars),
            timestamp: dto.timestamp.unwrap_or_default(),
            is_unread: dto.is_unread,
            is_starred: dto.is_starred,
            is_archived: dto.is_archived,
            direction: dto.direction.as_deref().and_then(Direction::parse),
            tags,
            meta: dto.meta,
        })
    }

    pub fn thread_id(&self) -> Option<i64> {
        self.id.thread_id()
    }

    pub fn is_outbound(&self) -> bool {
        self.direction == Some(Direction::Outbound)
    }
}

/// Collapse whitespace and cut to `max_chars`, marking the cut with an ellipsis
pub fn truncate_preview(body: &str, max_chars: usize) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(max_chars).collect();
    cut.truncate(cut.trim_end().len());
    cut.push('…');
    cut
}

/// Partial update of an item's flags. `None` leaves a flag untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagPatch {
    pub is_unread: Option<bool>,
    pub is_starred: Option<bool>,
    pub is_archived: Option<bool>,
}

impl FlagPatch {
    pub fn is_empty(&self) -> bool {
        self.is_unread.is_none() && self.is_starred.is_none() && self.is_archived.is_none()
    }

    /// Combine two patches; fields set in `later` win
    pub fn merge(self, later: FlagPatch) -> FlagPatch {
        FlagPatch {
            is_unread: later.is_unread.or(self.is_unread),
            is_starred: later.is_starred.or(self.is_starred),
            is_archived: later.is_archived.or(self.is_archived),
        }
    }

    /// Returns true if any flag changed
    pub fn apply(&self, item: &mut UnifiedItem) -> bool {
        let before = (item.is_unread, item.is_starred, item.is_archived);
        if let Some(v) = self.is_unread {
            item.is_unread = v;
        }
        if let Some(v) = self.is_starred {
            item.is_starred = v;
        }
        if let Some(v) = self.is_archived {
            item.is_archived = v;
        }
        before != (item.is_unread, item.is_starred, item.is_archived)
    }
}

impl From<&commhub_api::ThreadUpdatePayload> for FlagPatch {
    fn from(update: &commhub_api::ThreadUpdatePayload) -> Self {
        FlagPatch {
            is_unread: update.is_read.map(|read| !read),
            is_starred: update.flagged,
            is_archived: update.archived,
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_item(id: &str) -> UnifiedItem {
    let dto = InboxItemDto {
        id: id.to_string(),
        channel: None,
        kind: None,
        party_id: None,
        party_name: Some("Sample".to_string()),
        subject: None,
        preview: None,
        timestamp: None,
        is_unread: false,
        is_starred: false,
        is_archived: false,
        direction: None,
        tags: Vec::new(),
        meta: None,
    };
    UnifiedItem::from_dto(dto, 140).expect("sample id must parse")
}
