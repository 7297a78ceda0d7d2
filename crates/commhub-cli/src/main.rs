//! CommHub - headless runner for the unified inbox engine
//!
//! `watch` keeps the engine running, feeds it push frames read as JSON lines
//! from stdin and prints the projected inbox whenever it changes. The other
//! subcommands perform one action through the engine and exit.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use commhub_api::{BulkAction, HubBackend, HubClient, OutgoingEmail, PushEvent};
use commhub_core::{
    group_by_date, Channel, ChannelFilter, DraftBuffer, DraftEvent, DraftSession, Folder, HubConfig,
    HubEngine, HubEvent, HubHandle, ItemId, RecipientField, RecipientResolver, ViewQuery,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "commhub")]
#[command(about = "Unified inbox engine for the Communications Hub")]
struct Cli {
    /// Path to JSON config file (base_url, access_token, poll_interval_secs, ...)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the inbox live and print it on every change
    Watch {
        /// Folder: inbox, all, sent, drafts, flagged, archived, email, dm
        #[arg(long, default_value = "inbox")]
        folder: String,

        /// Only show one channel (email or dm)
        #[arg(long)]
        channel: Option<String>,

        /// Only show items carrying this tag
        #[arg(long)]
        tag: Option<String>,

        /// Case-insensitive search over party, subject and preview
        #[arg(long, short = 'q', default_value = "")]
        query: String,

        /// Print items as JSON lines
        #[arg(long)]
        json: bool,

        /// Exit after the first load
        #[arg(long)]
        once: bool,
    },

    /// Reply to a direct-message thread
    Reply {
        /// Numeric thread id
        thread_id: i64,
        /// Message body
        body: String,
    },

    /// Compose and send an email
    Send {
        /// Comma or space separated recipients
        #[arg(long)]
        to: String,
        #[arg(long, default_value = "")]
        cc: String,
        #[arg(long, default_value = "")]
        bcc: String,
        #[arg(long, default_value = "")]
        subject: String,
        #[arg(long)]
        body: String,
        /// Keep the message as a draft instead of sending it
        #[arg(long)]
        draft_only: bool,
    },

    /// Apply one action to a set of items
    Bulk {
        /// archive, flag, mark-read or delete-drafts
        action: String,
        /// Composite ids such as thread:12 or draft:4
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("commhub=debug".parse()?))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => HubConfig::load(path)?,
        None => HubConfig::from_env()?,
    };
    info!("Starting CommHub against {}", config.base_url);

    let client = HubClient::new(&config.base_url, config.access_token.clone())
        .context("invalid backend URL")?;
    let backend: Arc<dyn HubBackend> = Arc::new(client);

    let command = cli.command.unwrap_or(Commands::Watch {
        folder: "inbox".to_string(),
        channel: None,
        tag: None,
        query: String::new(),
        json: false,
        once: false,
    });

    match command {
        Commands::Watch {
            folder,
            channel,
            tag,
            query,
            json,
            once,
        } => {
            let query = build_query(&folder, channel.as_deref(), tag, query)?;
            watch(backend, &config, query, json, once).await
        }
        Commands::Reply { thread_id, body } => {
            let (handle, events) = HubEngine::spawn(backend, &config);
            handle.reply(thread_id, body).await?;
            let result = wait_for_send(events).await;
            handle.shutdown().await;
            result
        }
        Commands::Send {
            to,
            cc,
            bcc,
            subject,
            body,
            draft_only,
        } => {
            let (handle, events) = HubEngine::spawn(backend.clone(), &config);
            let composed = compose(backend, &handle, &config, &to, &cc, &bcc, subject, body).await;
            let result = match composed {
                Ok(_) if draft_only => Ok(()),
                Ok(email) => match handle.send_email(email).await {
                    Ok(()) => wait_for_send(events).await,
                    Err(e) => Err(e.into()),
                },
                Err(e) => Err(e),
            };
            handle.shutdown().await;
            result
        }
        Commands::Bulk { action, ids } => {
            let action = parse_action(&action)?;
            let ids = ids
                .iter()
                .map(|raw| raw.parse::<ItemId>())
                .collect::<Result<BTreeSet<_>, _>>()?;
            let (handle, events) = HubEngine::spawn(backend, &config);
            handle.bulk(action, ids).await?;
            let result = wait_for_bulk(events).await;
            handle.shutdown().await;
            result
        }
    }
}

fn build_query(
    folder: &str,
    channel: Option<&str>,
    tag: Option<String>,
    search: String,
) -> Result<ViewQuery> {
    let folder = Folder::parse(folder).ok_or_else(|| anyhow!("unknown folder: {}", folder))?;
    let channel = match channel {
        Some(raw) => ChannelFilter::Only(
            Channel::parse(raw).ok_or_else(|| anyhow!("unknown channel: {}", raw))?,
        ),
        None => ChannelFilter::All,
    };
    Ok(ViewQuery {
        folder,
        channel,
        tag,
        search,
    })
}

fn parse_action(raw: &str) -> Result<BulkAction> {
    match raw.to_ascii_lowercase().replace('_', "-").as_str() {
        "archive" => Ok(BulkAction::Archive),
        "flag" => Ok(BulkAction::Flag),
        "mark-read" | "markread" => Ok(BulkAction::MarkRead),
        "delete-drafts" | "deletedrafts" => Ok(BulkAction::DeleteDrafts),
        other => bail!("unknown bulk action: {}", other),
    }
}

async fn watch(
    backend: Arc<dyn HubBackend>,
    config: &HubConfig,
    query: ViewQuery,
    json: bool,
    once: bool,
) -> Result<()> {
    let (handle, mut events) = HubEngine::spawn(backend, config);
    let reader = tokio::spawn(read_push_frames(handle.push_sender()));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let changed = match &event {
                    HubEvent::ItemsReplaced { failed_views, .. } => {
                        for view in failed_views {
                            warn!("View {} unavailable, showing partial results", view);
                        }
                        true
                    }
                    HubEvent::ItemsPatched { .. } | HubEvent::BulkCompleted(_) => true,
                    HubEvent::CountsUpdated(counts) => {
                        info!(
                            "Unread {} | Flagged {} | Drafts {} | Sent {}",
                            counts.unread_count,
                            counts.flagged_count,
                            counts.draft_count,
                            counts.sent_count
                        );
                        false
                    }
                    HubEvent::AuxiliaryStatus { failures } => {
                        for failure in failures {
                            warn!("{}", failure);
                        }
                        false
                    }
                    HubEvent::Error { message } => {
                        warn!("{}", message);
                        false
                    }
                    other => {
                        debug!("{:?}", other);
                        false
                    }
                };

                if changed {
                    print_projection(&handle, &query, json).await?;
                    if once {
                        break;
                    }
                }
            }
        }
    }

    reader.abort();
    handle.shutdown().await;
    Ok(())
}

/// Forward `{"event": ..., "payload": ...}` lines from stdin to the engine
async fn read_push_frames(push: mpsc::Sender<PushEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match PushEvent::from_json(line) {
                    Ok(event) => {
                        if push.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring malformed push frame: {}", e),
                }
            }
            Ok(None) => {
                debug!("Push input closed");
                break;
            }
            Err(e) => {
                warn!("Failed to read push input: {}", e);
                break;
            }
        }
    }
}

async fn print_projection(handle: &HubHandle, query: &ViewQuery, json: bool) -> Result<()> {
    let snapshot = handle.snapshot().await?;
    let projection = snapshot.project(query);

    if json {
        for item in &projection {
            println!("{}", serde_json::to_string(item)?);
        }
        return Ok(());
    }

    println!("== {:?}: {} item(s) ==", query.folder, projection.len());
    for group in group_by_date(&projection, &Local::now()) {
        println!("-- {} --", group.label());
        for item in group.items {
            let marker = match (item.is_unread, item.is_starred) {
                (true, true) => "*!",
                (true, false) => "* ",
                (false, true) => " !",
                (false, false) => "  ",
            };
            println!(
                "{} {:<20} {:<24} {}",
                marker,
                item.id.to_string(),
                item.party_name,
                item.subject.as_deref().unwrap_or(&item.preview)
            );
        }
    }
    Ok(())
}

/// Resolve recipients, persist the draft and build the outgoing email.
/// The draft is shown in the engine's inbox under its local id until the
/// server assigns one.
#[allow(clippy::too_many_arguments)]
async fn compose(
    backend: Arc<dyn HubBackend>,
    hub: &HubHandle,
    config: &HubConfig,
    to: &str,
    cc: &str,
    bcc: &str,
    subject: String,
    body: String,
) -> Result<OutgoingEmail> {
    let mut resolver = RecipientResolver::new();
    for (field, raw) in [
        (RecipientField::To, to),
        (RecipientField::Cc, cc),
        (RecipientField::Bcc, bcc),
    ] {
        resolver.add_emails(field, raw, backend.as_ref()).await;
    }
    for field in [RecipientField::To, RecipientField::Cc, RecipientField::Bcc] {
        for recipient in resolver.field(field) {
            debug!("{:?} {} -> {:?}", field, recipient.email, recipient.status);
        }
    }
    if !resolver.can_send() {
        bail!("no valid recipients");
    }

    let mut buffer = DraftBuffer::new(Channel::Email);
    buffer.set_recipients(&resolver);
    buffer.subject = Some(subject.clone());
    buffer.body = body.clone();

    let (session, mut draft_events) =
        DraftSession::open_new(backend, config, DraftBuffer::new(Channel::Email));
    let will_save = buffer.has_content();
    hub.draft_edited(session.local_id(), buffer.clone()).await?;
    session.edit(buffer).await?;
    while will_save {
        match draft_events.recv().await {
            Some(DraftEvent::Promoted { local, server }) => {
                hub.draft_promoted(local, server).await?;
                break;
            }
            Some(DraftEvent::SaveFailed { error }) => {
                warn!("Autosave failed: {}", error);
                break;
            }
            Some(other) => debug!("{:?}", other),
            None => break,
        }
    }
    let draft_id = session.close().await?;
    match draft_id {
        Some(id) => info!("Draft saved as draft:{}", id),
        None => warn!("Draft was not saved"),
    }

    Ok(OutgoingEmail {
        to: resolver.sendable(RecipientField::To),
        cc: resolver.sendable(RecipientField::Cc),
        bcc: resolver.sendable(RecipientField::Bcc),
        subject,
        body,
        party_id: resolver.canonical_party_id(),
        draft_id,
    })
}

async fn wait_for_send(mut events: mpsc::Receiver<HubEvent>) -> Result<()> {
    while let Some(event) = events.recv().await {
        match event {
            HubEvent::MessageSent => {
                info!("Sent");
                return Ok(());
            }
            HubEvent::SendFailed { error } => bail!("send failed: {}", error),
            HubEvent::Error { message } => debug!("Ignoring unrelated error: {}", message),
            _ => {}
        }
    }
    bail!("engine stopped before the message was sent")
}

async fn wait_for_bulk(mut events: mpsc::Receiver<HubEvent>) -> Result<()> {
    while let Some(event) = events.recv().await {
        match event {
            HubEvent::BulkCompleted(outcome) => {
                info!(
                    "{:?}: {} applied, {} failed",
                    outcome.action,
                    outcome.applied.len(),
                    outcome.failed.len()
                );
                for id in &outcome.failed {
                    warn!("Not applied to {}", id);
                }
                return Ok(());
            }
            HubEvent::BulkFailed { action, error } => bail!("{:?} failed: {}", action, error),
            _ => {}
        }
    }
    bail!("engine stopped before the action completed")
}
