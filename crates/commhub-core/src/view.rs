//! Filtered, sorted and grouped projection of the item set
//!
//! Everything here is a pure function of its inputs; nothing mutates items.

use crate::item::{Channel, ItemId, ItemKind, UnifiedItem};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::cmp::Reverse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Folder {
    #[default]
    Inbox,
    All,
    Sent,
    Drafts,
    Flagged,
    Archived,
    Email,
    Dm,
}

impl Folder {
    pub fn matches(&self, item: &UnifiedItem) -> bool {
        match self {
            Folder::All => !item.is_archived,
            Folder::Inbox => !item.is_archived && !item.is_outbound(),
            Folder::Sent => !item.is_archived && item.is_outbound(),
            Folder::Drafts => item.kind == ItemKind::Draft,
            Folder::Flagged => !item.is_archived && item.is_starred,
            Folder::Archived => item.is_archived,
            Folder::Email => !item.is_archived && item.channel == Channel::Email,
            Folder::Dm => !item.is_archived && item.channel == Channel::Dm,
        }
    }

    /// Whether the channel filter is honoured in this folder
    pub fn uses_channel_filter(&self) -> bool {
        matches!(self, Folder::All | Folder::Inbox | Folder::Flagged)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "inbox" => Some(Folder::Inbox),
            "all" => Some(Folder::All),
            "sent" => Some(Folder::Sent),
            "drafts" | "draft" => Some(Folder::Drafts),
            "flagged" | "starred" => Some(Folder::Flagged),
            "archived" | "archive" => Some(Folder::Archived),
            "email" => Some(Folder::Email),
            "dm" => Some(Folder::Dm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelFilter {
    #[default]
    All,
    Only(Channel),
}

impl ChannelFilter {
    fn matches(&self, item: &UnifiedItem) -> bool {
        match self {
            ChannelFilter::All => true,
            ChannelFilter::Only(channel) => item.channel == *channel,
        }
    }
}

/// Inputs of [`project`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewQuery {
    pub folder: Folder,
    pub channel: ChannelFilter,
    pub tag: Option<String>,
    pub search: String,
}

impl ViewQuery {
    pub fn folder(folder: Folder) -> Self {
        Self {
            folder,
            ..Default::default()
        }
    }
}

fn matches_search(item: &UnifiedItem, needle: &str) -> bool {
    item.party_name.to_lowercase().contains(needle)
        || item
            .subject
            .as_deref()
            .is_some_and(|s| s.to_lowercase().contains(needle))
        || item.preview.to_lowercase().contains(needle)
}

/// Items visible for `query`.
///
/// The inbox is ordered unread first, then newest first. Other folders keep
/// the order the items arrived in.
pub fn project<'a>(items: &'a [UnifiedItem], query: &ViewQuery) -> Vec<&'a UnifiedItem> {
    let needle = query.search.trim().to_lowercase();
    let channel_applies = query.folder.uses_channel_filter();

    let mut projected: Vec<&UnifiedItem> = items
        .iter()
        .filter(|item| query.folder.matches(item))
        .filter(|item| !channel_applies || query.channel.matches(item))
        .filter(|item| match &query.tag {
            Some(tag) => item.tags.iter().any(|t| t == tag),
            None => true,
        })
        .filter(|item| needle.is_empty() || matches_search(item, &needle))
        .collect();

    if query.folder == Folder::Inbox {
        projected.sort_by_key(|item| (Reverse(item.is_unread), Reverse(item.timestamp)));
    }

    projected
}

/// Date section of the list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBucket {
    Today,
    Yesterday,
    ThisWeek,
    ThisMonth,
    Month { year: i32, month: u32 },
}

impl DateBucket {
    /// Bucket of `timestamp` as seen from `now`, in `now`'s time zone
    pub fn for_timestamp<Tz: TimeZone>(timestamp: DateTime<Utc>, now: &DateTime<Tz>) -> Self {
        let local = timestamp.with_timezone(&now.timezone());
        let day = local.date_naive();
        let today = now.date_naive();
        let age = (today - day).num_days();

        if age <= 0 {
            DateBucket::Today
        } else if age == 1 {
            DateBucket::Yesterday
        } else if age < 7 {
            DateBucket::ThisWeek
        } else if day.year() == today.year() && day.month() == today.month() {
            DateBucket::ThisMonth
        } else {
            DateBucket::Month {
                year: day.year(),
                month: day.month(),
            }
        }
    }

    pub fn label(&self) -> String {
        match self {
            DateBucket::Today => "Today".to_string(),
            DateBucket::Yesterday => "Yesterday".to_string(),
            DateBucket::ThisWeek => "This Week".to_string(),
            DateBucket::ThisMonth => "This Month".to_string(),
            DateBucket::Month { year, month } => {
                match chrono::NaiveDate::from_ymd_opt(*year, *month, 1) {
                    Some(date) => date.format("%B %Y").to_string(),
                    None => format!("{}-{:02}", year, month),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateGroup<'a> {
    pub bucket: DateBucket,
    pub items: Vec<&'a UnifiedItem>,
}

impl DateGroup<'_> {
    pub fn label(&self) -> String {
        self.bucket.label()
    }
}

/// Split a projection into contiguous date runs. Not cached: labels follow `now`.
pub fn group_by_date<'a, Tz: TimeZone>(
    projection: &[&'a UnifiedItem],
    now: &DateTime<Tz>,
) -> Vec<DateGroup<'a>> {
    let mut groups: Vec<DateGroup<'a>> = Vec::new();
    for &item in projection {
        let bucket = DateBucket::for_timestamp(item.timestamp, now);
        if let Some(group) = groups.last_mut().filter(|g| g.bucket == bucket) {
            group.items.push(item);
            continue;
        }
        groups.push(DateGroup {
            bucket,
            items: vec![item],
        });
    }
    groups
}

/// Keyboard position inside the current projection
#[derive(Debug, Clone, Default)]
pub struct KeyboardCursor {
    index: Option<usize>,
    seen: Vec<ItemId>,
}

impl KeyboardCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-anchor against a (possibly changed) projection, clamping the index
    /// to its bounds.
    pub fn sync(&mut self, projection: &[&UnifiedItem]) {
        let same = self.seen.len() == projection.len()
            && self.seen.iter().zip(projection).all(|(a, b)| *a == b.id);
        if same {
            return;
        }
        self.seen = projection.iter().map(|item| item.id).collect();
        self.index = match (self.index, projection.len()) {
            (_, 0) => None,
            (Some(i), len) if i >= len => Some(len - 1),
            (index, _) => index,
        };
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn current(&self) -> Option<ItemId> {
        self.index.and_then(|i| self.seen.get(i).copied())
    }

    pub fn next(&mut self) {
        let len = self.seen.len();
        if len == 0 {
            self.index = None;
            return;
        }
        self.index = Some(match self.index {
            None => 0,
            Some(i) => (i + 1).min(len - 1),
        });
    }

    pub fn prev(&mut self) {
        if self.seen.is_empty() {
            self.index = None;
            return;
        }
        self.index = Some(self.index.map_or(0, |i| i.saturating_sub(1)));
    }

    pub fn first(&mut self) {
        self.index = (!self.seen.is_empty()).then_some(0);
    }

    pub fn last(&mut self) {
        self.index = self.seen.len().checked_sub(1);
    }
}
