//! Debounced autosave of the compose buffer
//!
//! One [`DraftSession`] lives as long as a compose surface is open. Edits
//! restart the debounce timer; when it expires the latest buffer is written,
//! creating the server draft on first save and updating it afterwards.

use crate::item::{truncate_preview, Channel, ItemId, ItemKind, UnifiedItem};
use crate::recipients::{RecipientField, RecipientResolver, RecipientStatus};
use crate::{CoreError, CoreResult, HubConfig};
use chrono::Utc;
use commhub_api::{DraftPayload, HubBackend};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Client-side draft numbers are negative so they never collide with server ids
static NEXT_LOCAL_DRAFT: AtomicI64 = AtomicI64::new(-1);

fn next_local_draft_id() -> ItemId {
    ItemId::draft(NEXT_LOCAL_DRAFT.fetch_sub(1, Ordering::Relaxed))
}

/// In-progress compose state
#[derive(Debug, Clone, PartialEq)]
pub struct DraftBuffer {
    pub channel: Channel,
    /// Party for a DM compose
    pub party_id: Option<i64>,
    /// Thread being replied to
    pub thread_id: Option<i64>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: Option<String>,
    pub body: String,
}

impl DraftBuffer {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            party_id: None,
            thread_id: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: None,
            body: String::new(),
        }
    }

    pub fn has_content(&self) -> bool {
        !self.body.trim().is_empty()
    }

    /// Copy every syntactically valid address from the resolver
    pub fn set_recipients(&mut self, resolver: &RecipientResolver) {
        let valid = |field: RecipientField| {
            resolver
                .field(field)
                .iter()
                .filter(|r| r.status != RecipientStatus::Invalid)
                .map(|r| r.email.clone())
                .collect::<Vec<_>>()
        };
        self.to = valid(RecipientField::To);
        self.cc = valid(RecipientField::Cc);
        self.bcc = valid(RecipientField::Bcc);
        if self.party_id.is_none() {
            self.party_id = resolver.canonical_party_id();
        }
    }

    /// Inbox row shown for this buffer until the server list carries it
    pub fn to_item(&self, id: ItemId, preview_chars: usize) -> UnifiedItem {
        let party_name = match self.to.first() {
            Some(first) if self.to.len() > 1 => format!("{first} +{}", self.to.len() - 1),
            Some(first) => first.clone(),
            None => "Draft".to_string(),
        };
        UnifiedItem {
            id,
            channel: self.channel,
            kind: ItemKind::Draft,
            party_id: self.party_id,
            party_name,
            subject: self.subject.clone(),
            preview: truncate_preview(&self.body, preview_chars),
            timestamp: Utc::now(),
            is_unread: false,
            is_starred: false,
            is_archived: false,
            direction: None,
            tags: Vec::new(),
            meta: None,
        }
    }

    pub fn to_payload(&self) -> DraftPayload {
        DraftPayload {
            channel: self.channel.as_str().to_string(),
            party_id: self.party_id,
            thread_id: self.thread_id,
            to_addresses: self.to.clone(),
            cc_addresses: self.cc.clone(),
            bcc_addresses: self.bcc.clone(),
            subject: self.subject.clone(),
            body: self.body.clone(),
        }
    }
}

/// Notifications from a draft session
#[derive(Debug, Clone, PartialEq)]
pub enum DraftEvent {
    /// Buffer persisted; `created` is true for the first save
    Saved { server_id: i64, created: bool },
    /// The local draft id was replaced by the server-assigned one
    Promoted { local: ItemId, server: ItemId },
    /// Autosave failed; the next edit will try again
    SaveFailed { error: String },
    Discarded { server_id: Option<i64> },
    Closed { server_id: Option<i64> },
}

enum DraftCommand {
    Edit(DraftBuffer),
    Discard(oneshot::Sender<CoreResult<()>>),
    Close(oneshot::Sender<Option<i64>>),
}

/// Handle to the autosave task of one compose surface
pub struct DraftSession {
    local_id: ItemId,
    cmd_tx: mpsc::Sender<DraftCommand>,
    task: JoinHandle<()>,
}

impl DraftSession {
    /// Start composing from an empty (or prefilled) buffer
    pub fn open_new(
        backend: Arc<dyn HubBackend>,
        config: &HubConfig,
        buffer: DraftBuffer,
    ) -> (Self, mpsc::Receiver<DraftEvent>) {
        Self::spawn(backend, config, buffer, None)
    }

    /// Resume an existing server draft; no create step happens
    pub fn open_existing(
        backend: Arc<dyn HubBackend>,
        config: &HubConfig,
        server_id: i64,
        buffer: DraftBuffer,
    ) -> (Self, mpsc::Receiver<DraftEvent>) {
        Self::spawn(backend, config, buffer, Some(server_id))
    }

    fn spawn(
        backend: Arc<dyn HubBackend>,
        config: &HubConfig,
        buffer: DraftBuffer,
        server_id: Option<i64>,
    ) -> (Self, mpsc::Receiver<DraftEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(100);

        let local_id = match server_id {
            Some(id) => ItemId::draft(id),
            None => next_local_draft_id(),
        };

        let worker = DraftWorker {
            backend,
            debounce: config.autosave_debounce(),
            local_id,
            server_id,
            buffer,
            cmd_rx,
            event_tx,
        };
        let task = tokio::spawn(worker.run());

        (
            Self {
                local_id,
                cmd_tx,
                task,
            },
            event_rx,
        )
    }

    /// Id the draft had when the session opened
    pub fn local_id(&self) -> ItemId {
        self.local_id
    }

    /// Replace the buffer and restart the debounce timer
    pub async fn edit(&self, buffer: DraftBuffer) -> CoreResult<()> {
        self.cmd_tx
            .send(DraftCommand::Edit(buffer))
            .await
            .map_err(|_| CoreError::EngineStopped)
    }

    /// Cancel any pending save and delete the server draft, if one exists
    pub async fn discard(self) -> CoreResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(DraftCommand::Discard(reply_tx))
            .await
            .map_err(|_| CoreError::EngineStopped)?;
        let result = reply_rx.await.map_err(|_| CoreError::EngineStopped)?;
        let _ = self.task.await;
        result
    }

    /// Cancel any pending save and keep whatever is already persisted.
    /// Returns the server id, if the draft was ever saved.
    pub async fn close(self) -> CoreResult<Option<i64>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(DraftCommand::Close(reply_tx))
            .await
            .map_err(|_| CoreError::EngineStopped)?;
        let server_id = reply_rx.await.map_err(|_| CoreError::EngineStopped)?;
        let _ = self.task.await;
        Ok(server_id)
    }
}

struct DraftWorker {
    backend: Arc<dyn HubBackend>,
    debounce: Duration,
    local_id: ItemId,
    server_id: Option<i64>,
    buffer: DraftBuffer,
    cmd_rx: mpsc::Receiver<DraftCommand>,
    event_tx: mpsc::Sender<DraftEvent>,
}

impl DraftWorker {
    async fn run(mut self) {
        debug!("Draft session {} opened", self.local_id);
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    Some(DraftCommand::Edit(buffer)) => {
                        self.buffer = buffer;
                        deadline = Some(Instant::now() + self.debounce);
                    }
                    Some(DraftCommand::Discard(reply)) => {
                        let result = self.discard().await;
                        let _ = reply.send(result);
                        break;
                    }
                    Some(DraftCommand::Close(reply)) => {
                        debug!("Draft session {} closed", self.local_id);
                        let _ = reply.send(self.server_id);
                        self.emit(DraftEvent::Closed { server_id: self.server_id }).await;
                        break;
                    }
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    self.persist().await;
                }
            }
        }
    }

    async fn emit(&self, event: DraftEvent) {
        let _ = self.event_tx.send(event).await;
    }

    async fn persist(&mut self) {
        if !self.buffer.has_content() {
            debug!("Draft {} has an empty body, not saving", self.local_id);
            return;
        }

        let payload = self.buffer.to_payload();
        match self.server_id {
            None => match self.backend.create_draft(&payload).await {
                Ok(id) => {
                    info!("Draft {} saved as draft:{}", self.local_id, id);
                    self.server_id = Some(id);
                    self.emit(DraftEvent::Saved {
                        server_id: id,
                        created: true,
                    })
                    .await;
                    self.emit(DraftEvent::Promoted {
                        local: self.local_id,
                        server: ItemId::draft(id),
                    })
                    .await;
                }
                Err(e) => {
                    warn!("Autosave of {} failed: {}", self.local_id, e);
                    self.emit(DraftEvent::SaveFailed {
                        error: e.to_string(),
                    })
                    .await;
                }
            },
            Some(id) => match self.backend.update_draft(id, &payload).await {
                Ok(()) => {
                    debug!("Draft {} updated", id);
                    self.emit(DraftEvent::Saved {
                        server_id: id,
                        created: false,
                    })
                    .await;
                }
                Err(e) => {
                    warn!("Autosave of draft:{} failed: {}", id, e);
                    self.emit(DraftEvent::SaveFailed {
                        error: e.to_string(),
                    })
                    .await;
                }
            },
        }
    }

    async fn discard(&mut self) -> CoreResult<()> {
        let server_id = self.server_id.take();
        if let Some(id) = server_id {
            self.backend.delete_draft(id).await?;
            info!("Discarded draft:{}", id);
        } else {
            debug!("Discarded unsaved draft {}", self.local_id);
        }
        self.emit(DraftEvent::Discarded { server_id }).await;
        Ok(())
    }
}
