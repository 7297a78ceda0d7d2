//! Resolves free-typed compose recipients against the party directory
//!
//! Each address moves `Pending -> Matched | Unmatched`, or starts (and stays)
//! `Invalid`. A resolved address never goes back to `Pending`; removing and
//! re-adding it starts a new lifecycle.

use commhub_api::{ApiResult, HubBackend, LookupResponse, PartyMatch};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::{debug, warn};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

static SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,;\s]+").expect("separator pattern compiles"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipientField {
    To,
    Cc,
    Bcc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientStatus {
    Pending,
    Matched,
    Unmatched,
    Invalid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub email: String,
    pub status: RecipientStatus,
    pub party: Option<PartyMatch>,
}

impl Recipient {
    /// Matched or unmatched; the address will be sent to
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.status,
            RecipientStatus::Matched | RecipientStatus::Unmatched
        )
    }
}

/// Addresses from one `add` call awaiting a single directory lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupBatch {
    pub emails: Vec<String>,
}

impl LookupBatch {
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

pub fn is_valid_email(address: &str) -> bool {
    EMAIL_RE.is_match(address)
}

/// Split raw input on commas, semicolons and whitespace; lower-case each token
pub fn tokenize(raw: &str) -> Vec<String> {
    SEPARATOR_RE
        .split(raw)
        .map(|t| t.trim_matches(|c| c == '<' || c == '>').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// To/Cc/Bcc recipient lists of one compose surface
#[derive(Debug, Clone, Default)]
pub struct RecipientResolver {
    to: Vec<Recipient>,
    cc: Vec<Recipient>,
    bcc: Vec<Recipient>,
}

impl RecipientResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(&self, field: RecipientField) -> &[Recipient] {
        match field {
            RecipientField::To => &self.to,
            RecipientField::Cc => &self.cc,
            RecipientField::Bcc => &self.bcc,
        }
    }

    fn field_mut(&mut self, field: RecipientField) -> &mut Vec<Recipient> {
        match field {
            RecipientField::To => &mut self.to,
            RecipientField::Cc => &mut self.cc,
            RecipientField::Bcc => &mut self.bcc,
        }
    }

    fn all(&self) -> impl Iterator<Item = &Recipient> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    fn all_mut(&mut self) -> impl Iterator<Item = &mut Recipient> {
        self.to
            .iter_mut()
            .chain(self.cc.iter_mut())
            .chain(self.bcc.iter_mut())
    }

    /// Parse `raw` into `field` and return the addresses that need a lookup.
    ///
    /// An address already present in any of the three lists, or repeated in
    /// `raw`, is dropped.
    pub fn stage(&mut self, field: RecipientField, raw: &str) -> LookupBatch {
        let mut seen: HashSet<String> = self.all().map(|r| r.email.clone()).collect();
        let mut batch = LookupBatch::default();

        for email in tokenize(raw) {
            if !seen.insert(email.clone()) {
                debug!("Skipping duplicate recipient {}", email);
                continue;
            }

            let status = if is_valid_email(&email) {
                batch.emails.push(email.clone());
                RecipientStatus::Pending
            } else {
                RecipientStatus::Invalid
            };

            self.field_mut(field).push(Recipient {
                email,
                status,
                party: None,
            });
        }

        batch
    }

    /// Apply a lookup result to the pending entries of `batch`.
    ///
    /// Addresses the lookup does not mention are unmatched; a failed lookup
    /// marks the whole batch unmatched.
    pub fn complete(&mut self, batch: &LookupBatch, result: ApiResult<LookupResponse>) {
        let matches: HashMap<String, PartyMatch> = match result {
            Ok(response) => response
                .matches
                .into_iter()
                .map(|m| (m.email.to_lowercase(), m))
                .collect(),
            Err(e) => {
                warn!(
                    "Recipient lookup failed for {} addresses, marking unmatched: {}",
                    batch.emails.len(),
                    e
                );
                HashMap::new()
            }
        };

        let pending: HashSet<&str> = batch.emails.iter().map(String::as_str).collect();
        for recipient in self.all_mut() {
            if recipient.status != RecipientStatus::Pending
                || !pending.contains(recipient.email.as_str())
            {
                continue;
            }
            match matches.get(&recipient.email) {
                Some(hit) => {
                    recipient.status = RecipientStatus::Matched;
                    recipient.party = Some(hit.clone());
                }
                None => recipient.status = RecipientStatus::Unmatched,
            }
        }
    }

    /// Stage `raw` and resolve it with one directory request
    pub async fn add_emails(
        &mut self,
        field: RecipientField,
        raw: &str,
        backend: &dyn HubBackend,
    ) {
        let batch = self.stage(field, raw);
        if batch.is_empty() {
            return;
        }
        let result = backend.lookup_by_email(&batch.emails).await;
        self.complete(&batch, result);
    }

    /// Remove an address so it can be added again later
    pub fn remove(&mut self, field: RecipientField, email: &str) -> bool {
        let email = email.to_lowercase();
        let list = self.field_mut(field);
        let before = list.len();
        list.retain(|r| r.email != email);
        list.len() != before
    }

    pub fn has_pending(&self) -> bool {
        self.all().any(|r| r.status == RecipientStatus::Pending)
    }

    /// At least one resolved address and nothing still in flight
    pub fn can_send(&self) -> bool {
        !self.has_pending() && self.all().any(Recipient::is_resolved)
    }

    /// Party shared by every matched recipient, if there is exactly one
    pub fn canonical_party_id(&self) -> Option<i64> {
        let mut parties = self
            .all()
            .filter_map(|r| r.party.as_ref().map(|p| p.party_id));
        let first = parties.next()?;
        parties.all(|id| id == first).then_some(first)
    }

    /// Resolved addresses of `field`, in entry order
    pub fn sendable(&self, field: RecipientField) -> Vec<String> {
        self.field(field)
            .iter()
            .filter(|r| r.is_resolved())
            .map(|r| r.email.clone())
            .collect()
    }
}
