//! Session controller: owns the store and everything that mutates it
//!
//! Inbound messages are applied through the reducer and correlator; every
//! change is broadcast as a `StoreEvent` so views can re-read the store.
//! Outbound operations live in `orchestrator`, `approvals` and `hydration`
//! as further `impl` blocks on the same controller.

use crate::approvals::{self, Decision};
use crate::orchestrator::{Attachment, IdeContext};
use crate::protocol::{self, ServerMessage};
use crate::reducer;
use crate::store::Store;
use crate::transport::AgentTransport;
use crate::{AccessMode, SessionConfig};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How often `run` checks for stalled turns
const STALL_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// One-shot message for the user (failed request, stall, hydration failure)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub level: NoticeLevel,
    pub thread_id: Option<String>,
    pub message: String,
}

/// What changed in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum StoreEvent {
    ThreadsChanged,
    #[serde(rename_all = "camelCase")]
    ThreadChanged { thread_id: String },
    #[serde(rename_all = "camelCase")]
    ThreadArchived { thread_id: String },
    ApprovalsChanged,
    #[serde(rename_all = "camelCase")]
    MetricsChanged { thread_id: Option<String> },
    Notice(Notice),
}

/// User action routed into a running session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Send {
        text: String,
        attachments: Vec<Attachment>,
    },
    Stop,
    Decide {
        item_id: String,
        decision: Decision,
    },
    NewThread,
    OpenThread {
        thread_id: String,
    },
    ResumeThread {
        thread_id: String,
    },
    ArchiveThread {
        thread_id: String,
    },
    SetMode(AccessMode),
    SetIdeContext(Option<IdeContext>),
}

/// Send awaiting its first stream activity
#[derive(Debug, Clone)]
pub(crate) struct PendingSend {
    pub turn_id: String,
    pub sent_at: Instant,
}

pub struct SessionController<T> {
    pub(crate) store: Store,
    pub(crate) transport: T,
    pub(crate) config: SessionConfig,
    pub(crate) ide_context: Option<IdeContext>,
    /// Access mode of the previous send, per thread
    pub(crate) last_mode: HashMap<String, AccessMode>,
    /// Sends not yet followed by any notification, per thread
    pub(crate) awaiting_activity: HashMap<String, PendingSend>,
    pub(crate) next_local_id: u64,
    events: broadcast::Sender<StoreEvent>,
}

impl<T: AgentTransport> SessionController<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store: Store::new(),
            transport,
            config,
            ide_context: None,
            last_mode: HashMap::new(),
            awaiting_activity: HashMap::new(),
            next_local_id: 1,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Switch access mode for subsequent sends.
    pub fn set_mode(&mut self, mode: AccessMode) {
        self.config.mode = mode;
    }

    /// Editor state folded into the next turn's text
    pub fn set_ide_context(&mut self, context: Option<IdeContext>) {
        self.ide_context = context;
    }

    /// Focus a thread without fetching anything; events for it are admitted
    /// from now on even before it is tracked.
    pub fn set_active_thread(&mut self, thread_id: Option<String>) {
        self.store.active_thread = thread_id;
        self.emit(StoreEvent::ThreadsChanged);
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn notice(&self, level: NoticeLevel, thread_id: Option<&str>, message: String) {
        match level {
            NoticeLevel::Info => info!("{}", message),
            NoticeLevel::Warning | NoticeLevel::Error => warn!("{}", message),
        }
        self.emit(StoreEvent::Notice(Notice {
            level,
            thread_id: thread_id.map(String::from),
            message,
        }));
    }

    /// Apply one inbound message.
    pub fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Notification { method, params } => {
                if let Some(thread_id) = protocol::thread_id_of(&params) {
                    self.awaiting_activity.remove(thread_id);
                }
                if let Some(event) = reducer::apply(&mut self.store, &method, &params) {
                    self.emit(event);
                }
            }
            ServerMessage::Request { id, method, params } => {
                if protocol::is_approval_method(&method)
                    || method.to_ascii_lowercase().contains("approval")
                {
                    approvals::record(&mut self.store, id, &method, params);
                    self.emit(StoreEvent::ApprovalsChanged);
                } else {
                    warn!("Unhandled server request {} ({})", method, id);
                }
            }
            ServerMessage::Response { id, .. } => {
                debug!("Ignoring response {} outside the transport", id);
            }
        }
    }

    /// Warn once per send that saw no stream activity within the configured
    /// window. Turn state is left alone.
    pub fn check_stalls(&mut self, now: Instant) {
        let limit = self.config.stall_notice_after;
        let stalled: Vec<(String, PendingSend)> = self
            .awaiting_activity
            .iter()
            .filter(|(_, pending)| now.saturating_duration_since(pending.sent_at) >= limit)
            .map(|(thread_id, pending)| (thread_id.clone(), pending.clone()))
            .collect();
        for (thread_id, pending) in stalled {
            self.awaiting_activity.remove(&thread_id);
            self.notice(
                NoticeLevel::Warning,
                Some(&thread_id),
                format!(
                    "No activity from the agent {}s after starting turn {}",
                    limit.as_secs(),
                    pending.turn_id
                ),
            );
        }
    }

    /// Carry out one user command. Failed requests have already been
    /// surfaced as notices by the operation itself.
    pub async fn execute(&mut self, command: SessionCommand) {
        let outcome = match command {
            SessionCommand::Send { text, attachments } => self
                .send(&text, &attachments)
                .await
                .map(|outcome| debug!("Send finished: {:?}", outcome)),
            SessionCommand::Stop => self.stop().await.map(|_| ()),
            SessionCommand::Decide { item_id, decision } => {
                self.decide(&item_id, decision).await;
                Ok(())
            }
            SessionCommand::NewThread => self.create_thread().await.map(|_| ()),
            SessionCommand::OpenThread { thread_id } => self.open_thread(&thread_id).await,
            SessionCommand::ResumeThread { thread_id } => self.resume_thread(&thread_id).await,
            SessionCommand::ArchiveThread { thread_id } => self.archive_thread(&thread_id).await,
            SessionCommand::SetMode(mode) => {
                self.set_mode(mode);
                Ok(())
            }
            SessionCommand::SetIdeContext(context) => {
                self.set_ide_context(context);
                Ok(())
            }
        };
        if let Err(e) = outcome {
            debug!("Command failed: {}", e);
        }
    }

    /// Consume inbound messages and user commands until the agent
    /// connection closes. A closed command channel only stops commands.
    pub async fn run(
        &mut self,
        mut inbound: mpsc::Receiver<ServerMessage>,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) {
        let mut ticker = tokio::time::interval(STALL_CHECK_INTERVAL);
        let mut commands_open = true;
        loop {
            tokio::select! {
                biased;
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.execute(command).await,
                    None => commands_open = false,
                },
                message = inbound.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => {
                        info!("Agent connection closed");
                        break;
                    }
                },
                _ = ticker.tick() => self.check_stalls(Instant::now()),
            }
        }
    }
}
