//! Hub engine: the reconciliation loop
//!
//! A single background task owns the [`InboxState`]. It multiplexes commands
//! from the [`HubHandle`], push events, the poll timer and the results of the
//! network work it spawned. Network calls never run inline, so push deltas
//! keep flowing while a refresh is in flight.

use crate::aggregator::{Aggregator, AuxiliaryData, RefreshOutcome};
use crate::bulk::{self, BulkOutcome};
use crate::counts::InboxCounts;
use crate::draft::DraftBuffer;
use crate::item::{DetailRoute, FlagPatch, ItemId};
use crate::reconcile::{InboxSnapshot, InboxState};
use crate::thread::{ConversationThread, ThreadMessage};
use crate::{CoreError, CoreResult, HubConfig};
use commhub_api::{
    ApiResult, BulkAction, CountsDto, HubBackend, InboxView, OutgoingEmail,
    OutgoingThreadMessage, PushEvent, ThreadFlagsPatch, ThreadUpdatePayload,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const CHANNEL_CAPACITY: usize = 100;

/// Commands sent from the UI to the engine
#[derive(Debug)]
pub enum HubCommand {
    /// Re-fetch every inbox view. A silent refresh does not toggle loading.
    Refresh { silent: bool },
    /// Open an item and hydrate its conversation
    Select(ItemId),
    /// Close the conversation view
    Deselect,
    /// Add or remove an item from the bulk selection
    SetChecked { id: ItemId, checked: bool },
    ClearChecked,
    /// Apply an action to an explicit set of ids
    Bulk {
        action: BulkAction,
        ids: BTreeSet<ItemId>,
    },
    /// Apply an action to the current bulk selection
    BulkChecked(BulkAction),
    SetThreadFlags {
        id: ItemId,
        flagged: Option<bool>,
        archived: Option<bool>,
    },
    Reply { thread_id: i64, body: String },
    SendEmail(OutgoingEmail),
    /// Show a compose buffer in the inbox under the session's local id
    DraftEdited { id: ItemId, buffer: DraftBuffer },
    /// A compose session received its server id
    DraftPromoted { local: ItemId, server: ItemId },
    Snapshot(oneshot::Sender<InboxSnapshot>),
    Shutdown,
}

/// Events sent from the engine to the UI
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    LoadingChanged(bool),
    /// The item list was replaced by a refresh
    ItemsReplaced {
        count: usize,
        failed_views: Vec<InboxView>,
    },
    /// Flags changed on these items
    ItemsPatched { ids: Vec<ItemId> },
    CountsUpdated(InboxCounts),
    DetailLoaded(ItemId),
    DetailCleared,
    /// A pushed message was appended to the open conversation
    MessageAppended { thread_id: i64, message_id: i64 },
    /// Inline status lines for auxiliary resources that failed
    AuxiliaryStatus { failures: Vec<String> },
    BulkCompleted(BulkOutcome),
    BulkFailed { action: BulkAction, error: String },
    MessageSent,
    /// A reply or outgoing email was rejected
    SendFailed { error: String },
    Error { message: String },
}

/// Result of work the engine spawned
enum Completion {
    Refreshed(RefreshOutcome),
    Auxiliary(AuxiliaryData),
    Counts(ApiResult<CountsDto>),
    Detail {
        token: u64,
        id: ItemId,
        result: CoreResult<ConversationThread>,
    },
    Bulk {
        action: BulkAction,
        result: CoreResult<BulkOutcome>,
    },
    FlagsPatched {
        thread_id: i64,
        result: ApiResult<()>,
    },
    Sent(ApiResult<()>),
}

/// Handle to a running engine
pub struct HubHandle {
    cmd_tx: mpsc::Sender<HubCommand>,
    push_tx: mpsc::Sender<PushEvent>,
    task: JoinHandle<()>,
}

impl HubHandle {
    async fn send(&self, command: HubCommand) -> CoreResult<()> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| CoreError::EngineStopped)
    }

    /// Sender for the push subscription feeding this engine
    pub fn push_sender(&self) -> mpsc::Sender<PushEvent> {
        self.push_tx.clone()
    }

    pub async fn push(&self, event: PushEvent) -> CoreResult<()> {
        self.push_tx
            .send(event)
            .await
            .map_err(|_| CoreError::EngineStopped)
    }

    pub async fn refresh(&self, silent: bool) -> CoreResult<()> {
        self.send(HubCommand::Refresh { silent }).await
    }

    pub async fn select(&self, id: ItemId) -> CoreResult<()> {
        self.send(HubCommand::Select(id)).await
    }

    pub async fn deselect(&self) -> CoreResult<()> {
        self.send(HubCommand::Deselect).await
    }

    pub async fn set_checked(&self, id: ItemId, checked: bool) -> CoreResult<()> {
        self.send(HubCommand::SetChecked { id, checked }).await
    }

    pub async fn clear_checked(&self) -> CoreResult<()> {
        self.send(HubCommand::ClearChecked).await
    }

    pub async fn bulk(&self, action: BulkAction, ids: BTreeSet<ItemId>) -> CoreResult<()> {
        self.send(HubCommand::Bulk { action, ids }).await
    }

    pub async fn bulk_checked(&self, action: BulkAction) -> CoreResult<()> {
        self.send(HubCommand::BulkChecked(action)).await
    }

    pub async fn set_thread_flags(
        &self,
        id: ItemId,
        flagged: Option<bool>,
        archived: Option<bool>,
    ) -> CoreResult<()> {
        self.send(HubCommand::SetThreadFlags {
            id,
            flagged,
            archived,
        })
        .await
    }

    pub async fn reply(&self, thread_id: i64, body: impl Into<String>) -> CoreResult<()> {
        self.send(HubCommand::Reply {
            thread_id,
            body: body.into(),
        })
        .await
    }

    pub async fn send_email(&self, email: OutgoingEmail) -> CoreResult<()> {
        self.send(HubCommand::SendEmail(email)).await
    }

    pub async fn draft_edited(&self, id: ItemId, buffer: DraftBuffer) -> CoreResult<()> {
        self.send(HubCommand::DraftEdited { id, buffer }).await
    }

    pub async fn draft_promoted(&self, local: ItemId, server: ItemId) -> CoreResult<()> {
        self.send(HubCommand::DraftPromoted { local, server }).await
    }

    /// Copy of the current state, ordered after every command sent before it
    pub async fn snapshot(&self) -> CoreResult<InboxSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(HubCommand::Snapshot(reply_tx)).await?;
        reply_rx.await.map_err(|_| CoreError::EngineStopped)
    }

    /// Stop polling, drop the push subscription and wait for the task to exit
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(HubCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            error!("Hub engine task failed: {}", e);
        }
    }
}

/// Owner of the inbox state
pub struct HubEngine {
    backend: Arc<dyn HubBackend>,
    aggregator: Arc<Aggregator>,
    state: InboxState,
    poll_interval: Duration,
    preview_chars: usize,
    command_rx: mpsc::Receiver<HubCommand>,
    push_rx: mpsc::Receiver<PushEvent>,
    push_open: bool,
    event_tx: mpsc::Sender<HubEvent>,
    tasks: JoinSet<Completion>,
    /// `Some(silent)` while a refresh is in flight
    refresh_running: Option<bool>,
    /// Refresh requested while another was running
    refresh_pending: Option<bool>,
}

impl HubEngine {
    /// Start the engine task. Returns its handle and the event stream.
    pub fn spawn(
        backend: Arc<dyn HubBackend>,
        config: &HubConfig,
    ) -> (HubHandle, mpsc::Receiver<HubEvent>) {
        let (cmd_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (push_tx, push_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let engine = HubEngine {
            aggregator: Arc::new(Aggregator::new(backend.clone(), config)),
            backend,
            state: InboxState::new(),
            poll_interval: config.poll_interval(),
            preview_chars: config.preview_chars,
            command_rx,
            push_rx,
            push_open: true,
            event_tx,
            tasks: JoinSet::new(),
            refresh_running: None,
            refresh_pending: None,
        };
        let task = tokio::spawn(engine.run());

        (
            HubHandle {
                cmd_tx,
                push_tx,
                task,
            },
            event_rx,
        )
    }

    async fn run(mut self) {
        info!(
            "Hub engine started (poll every {:?})",
            self.poll_interval
        );

        let mut poll = time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.request_refresh(false).await;
        self.request_counts();

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(HubCommand::Shutdown) | None => {
                        info!("Hub engine shutting down");
                        break;
                    }
                    Some(command) => {
                        if let Err(e) = self.handle_command(command).await {
                            error!("Error handling hub command: {}", e);
                            self.emit(HubEvent::Error {
                                message: e.to_string(),
                            })
                            .await;
                        }
                    }
                },
                event = self.push_rx.recv(), if self.push_open => match event {
                    Some(event) => self.handle_push(event).await,
                    None => {
                        debug!("Push subscription closed");
                        self.push_open = false;
                    }
                },
                _ = poll.tick() => {
                    debug!("Poll tick");
                    self.request_refresh(true).await;
                    self.request_counts();
                }
                Some(done) = self.tasks.join_next(), if !self.tasks.is_empty() => match done {
                    Ok(completion) => self.handle_completion(completion).await,
                    Err(e) => error!("Hub task failed: {}", e),
                },
            }
        }

        self.tasks.abort_all();
        info!("Hub engine stopped");
    }

    async fn emit(&self, event: HubEvent) {
        let _ = self.event_tx.send(event).await;
    }

    async fn handle_command(&mut self, command: HubCommand) -> CoreResult<()> {
        match command {
            HubCommand::Refresh { silent } => self.request_refresh(silent).await,
            HubCommand::Select(id) => self.select(id).await,
            HubCommand::Deselect => {
                if self.state.deselect() {
                    self.emit(HubEvent::DetailCleared).await;
                }
            }
            HubCommand::SetChecked { id, checked } => self.state.set_checked(id, checked),
            HubCommand::ClearChecked => self.state.clear_checked(),
            HubCommand::Bulk { action, ids } => self.start_bulk(action, ids),
            HubCommand::BulkChecked(action) => {
                let ids = self.state.checked().clone();
                self.start_bulk(action, ids);
            }
            HubCommand::SetThreadFlags {
                id,
                flagged,
                archived,
            } => self.set_thread_flags(id, flagged, archived).await?,
            HubCommand::Reply { thread_id, body } => {
                info!("Replying to thread {}", thread_id);
                let backend = self.backend.clone();
                self.tasks.spawn(async move {
                    let message = OutgoingThreadMessage { body };
                    Completion::Sent(backend.send_thread_message(thread_id, &message).await)
                });
            }
            HubCommand::SendEmail(email) => {
                info!("Sending email to {} recipient(s)", email.to.len());
                let backend = self.backend.clone();
                self.tasks
                    .spawn(async move { Completion::Sent(backend.send_email(&email).await) });
            }
            HubCommand::DraftEdited { id, buffer } => {
                if !id.is_local_draft() {
                    return Err(CoreError::InvalidItemId(format!(
                        "{} is not a local draft",
                        id
                    )));
                }
                self.state
                    .upsert_draft(buffer.to_item(id, self.preview_chars));
                self.emit(HubEvent::ItemsPatched { ids: vec![id] }).await;
            }
            HubCommand::DraftPromoted { local, server } => {
                if self.state.promote_draft(local, server) {
                    debug!("Draft {} is now {}", local, server);
                    self.emit(HubEvent::ItemsPatched { ids: vec![server] })
                        .await;
                }
            }
            HubCommand::Snapshot(reply) => {
                let _ = reply.send(self.state.snapshot());
            }
            HubCommand::Shutdown => {}
        }
        Ok(())
    }

    async fn handle_push(&mut self, event: PushEvent) {
        match event {
            PushEvent::NewMessage(payload) => {
                let message_id = payload.message.id;
                debug!("Push: new message {} in thread {}", message_id, payload.thread_id);
                let message = ThreadMessage::from(payload.message);
                if self.state.append_to_open_thread(payload.thread_id, message) {
                    self.emit(HubEvent::MessageAppended {
                        thread_id: payload.thread_id,
                        message_id,
                    })
                    .await;
                }
                self.request_refresh(true).await;
            }
            PushEvent::ThreadUpdate(update) => {
                debug!("Push: thread {} updated", update.thread_id);
                let ids = self.state.apply_thread_update(&update);
                if !ids.is_empty() {
                    self.emit(HubEvent::ItemsPatched { ids }).await;
                }
            }
            PushEvent::NewEmail(_) => {
                debug!("Push: new email");
                self.request_refresh(true).await;
            }
        }
    }

    /// Start a refresh, or queue one behind the refresh already running
    async fn request_refresh(&mut self, silent: bool) {
        if self.refresh_running.is_some() {
            let queued = self.refresh_pending.map_or(silent, |p| p && silent);
            self.refresh_pending = Some(queued);
            return;
        }

        if !silent && self.state.set_loading(true) {
            self.emit(HubEvent::LoadingChanged(true)).await;
        }
        self.refresh_running = Some(silent);

        let aggregator = self.aggregator.clone();
        self.tasks
            .spawn(async move { Completion::Refreshed(aggregator.refresh(silent).await) });
    }

    fn request_counts(&mut self) {
        let backend = self.backend.clone();
        self.tasks
            .spawn(async move { Completion::Counts(backend.get_counts().await) });
    }

    async fn select(&mut self, id: ItemId) {
        let had_detail = self.state.detail().is_some();
        let token = self.state.select(id);
        if had_detail {
            self.emit(HubEvent::DetailCleared).await;
        }

        let unread_thread = id.thread_id().is_some()
            && self
                .state
                .items()
                .iter()
                .any(|item| item.id == id && item.is_unread);
        if unread_thread {
            let read = FlagPatch {
                is_unread: Some(false),
                ..Default::default()
            };
            if self.state.patch_item(id, read) {
                self.emit(HubEvent::ItemsPatched { ids: vec![id] }).await;
            }
        }

        let backend = self.backend.clone();
        match id.detail_route() {
            DetailRoute::Thread(thread_id) => {
                debug!("Fetching thread {}", thread_id);
                self.tasks.spawn(async move {
                    let result = backend
                        .get_thread(thread_id)
                        .await
                        .map(|dto| ConversationThread::from_thread(id, dto))
                        .map_err(CoreError::from);
                    Completion::Detail { token, id, result }
                });
            }
            DetailRoute::Email(composite) => {
                debug!("Fetching email {}", composite);
                self.tasks.spawn(async move {
                    let result = backend
                        .get_email(&composite)
                        .await
                        .map(|dto| ConversationThread::from_email(id, dto))
                        .map_err(CoreError::from);
                    Completion::Detail { token, id, result }
                });
            }
            DetailRoute::Compose(_) => debug!("{} opens in compose, no detail to fetch", id),
        }
    }

    fn start_bulk(&mut self, action: BulkAction, ids: BTreeSet<ItemId>) {
        info!("Bulk {:?} over {} item(s)", action, ids.len());
        let backend = self.backend.clone();
        self.tasks.spawn(async move {
            let result = bulk::execute(backend.as_ref(), action, &ids).await;
            Completion::Bulk { action, result }
        });
    }

    async fn set_thread_flags(
        &mut self,
        id: ItemId,
        flagged: Option<bool>,
        archived: Option<bool>,
    ) -> CoreResult<()> {
        let thread_id = id
            .thread_id()
            .ok_or_else(|| CoreError::InvalidItemId(format!("{} is not a thread", id)))?;
        if flagged.is_none() && archived.is_none() {
            return Ok(());
        }

        let ids = self.state.apply_thread_update(&ThreadUpdatePayload {
            thread_id,
            is_read: None,
            flagged,
            archived,
        });
        if !ids.is_empty() {
            self.emit(HubEvent::ItemsPatched { ids }).await;
        }

        let backend = self.backend.clone();
        self.tasks.spawn(async move {
            let patch = ThreadFlagsPatch { flagged, archived };
            let result = backend.patch_thread(thread_id, &patch).await;
            Completion::FlagsPatched { thread_id, result }
        });
        Ok(())
    }

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Refreshed(outcome) => self.finish_refresh(outcome).await,
            Completion::Auxiliary(auxiliary) => {
                let failures = auxiliary.failure_messages();
                self.state.set_auxiliary(auxiliary);
                self.emit(HubEvent::AuxiliaryStatus { failures }).await;
            }
            Completion::Counts(Ok(server)) => {
                let counts = self.state.apply_counts(&server);
                self.emit(HubEvent::CountsUpdated(counts)).await;
            }
            Completion::Counts(Err(e)) => {
                warn!("Counts unavailable, deriving locally: {}", e);
                let counts = self.state.approximate_counts();
                self.emit(HubEvent::CountsUpdated(counts)).await;
            }
            Completion::Detail { token, id, result } => match result {
                Ok(detail) => {
                    if self.state.commit_detail(token, detail) {
                        self.emit(HubEvent::DetailLoaded(id)).await;
                    }
                }
                Err(e) => {
                    if self.state.is_current(token) {
                        warn!("Failed to load {}: {}", id, e);
                        self.emit(HubEvent::Error {
                            message: format!("Failed to load conversation: {}", e),
                        })
                        .await;
                    }
                }
            },
            Completion::Bulk { action, result } => match result {
                Ok(outcome) => {
                    self.state.apply_bulk(&outcome);
                    self.emit(HubEvent::BulkCompleted(outcome)).await;
                    self.request_counts();
                }
                Err(e) => {
                    error!("Bulk {:?} failed: {}", action, e);
                    self.emit(HubEvent::BulkFailed {
                        action,
                        error: e.to_string(),
                    })
                    .await;
                }
            },
            Completion::FlagsPatched { thread_id, result } => match result {
                Ok(()) => self.request_counts(),
                Err(e) => {
                    warn!("Flag update for thread {} failed: {}", thread_id, e);
                    self.emit(HubEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                    self.request_refresh(true).await;
                }
            },
            Completion::Sent(result) => match result {
                Ok(()) => {
                    info!("Message sent");
                    self.emit(HubEvent::MessageSent).await;
                    self.request_refresh(true).await;
                    self.request_counts();
                }
                Err(e) => {
                    error!("Send failed: {}", e);
                    self.emit(HubEvent::SendFailed {
                        error: e.to_string(),
                    })
                    .await;
                }
            },
        }
    }

    async fn finish_refresh(&mut self, outcome: RefreshOutcome) {
        let silent = self.refresh_running.take().unwrap_or(true);

        if outcome.failed_views.len() == InboxView::ALL_VIEWS.len() {
            warn!("Every inbox view failed, keeping previous items");
            self.emit(HubEvent::Error {
                message: "Failed to refresh inbox".to_string(),
            })
            .await;
        } else {
            let count = outcome.items.len();
            self.state.replace_items(outcome.items);
            self.emit(HubEvent::ItemsReplaced {
                count,
                failed_views: outcome.failed_views,
            })
            .await;

            let aggregator = self.aggregator.clone();
            self.tasks
                .spawn(async move { Completion::Auxiliary(aggregator.fetch_auxiliary().await) });
        }

        if !silent && self.state.set_loading(false) {
            self.emit(HubEvent::LoadingChanged(false)).await;
        }

        if let Some(queued) = self.refresh_pending.take() {
            self.request_refresh(queued).await;
        }
    }
}
