//! Turn submission and the other outbound thread operations
//!
//! `send` is single-flight per thread: it refuses while a turn is running,
//! creates a thread on first use, derives the approval and sandbox policies
//! from the access mode and echoes the user's message optimistically until
//! the server's own copy arrives.

use crate::hydration;
use crate::protocol::{self, methods};
use crate::session::{NoticeLevel, PendingSend, SessionController, StoreEvent};
use crate::store::{Item, ItemKind, ItemStatus, SnapshotState, ThreadSummary, Turn, TurnStatus};
use crate::transport::AgentTransport;
use crate::{AccessMode, AgentDeskError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use tracing::{debug, info};

/// Something attached to a prompt besides its text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Attachment {
    /// Inlined into the prompt
    Text { name: String, content: String },
    /// Local image sent by reference
    Image { path: PathBuf },
    /// Remote image sent by reference
    ImageUrl { url: String },
}

/// Active editor state used to prefix prompts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdeContext {
    pub active_file: Option<String>,
    pub selection: Option<String>,
    /// 1-based inclusive line range of the selection
    pub selection_range: Option<(u32, u32)>,
}

impl IdeContext {
    pub fn is_empty(&self) -> bool {
        self.active_file.is_none() && self.selection.as_deref().is_none_or(str::is_empty)
    }

    fn render(&self) -> String {
        let mut out = String::from("# IDE context\n");
        if let Some(file) = &self.active_file {
            out.push_str(&format!("Active file: {}\n", file));
        }
        if let Some(selection) = self.selection.as_deref().filter(|s| !s.is_empty()) {
            match self.selection_range {
                Some((start, end)) => out.push_str(&format!("Selection (lines {}-{}):\n", start, end)),
                None => out.push_str("Selection:\n"),
            }
            out.push_str(&format!("```\n{}\n```\n", selection.trim_end_matches('\n')));
        }
        out
    }
}

/// Result of `send`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { thread_id: String, turn_id: String },
    /// Nothing to send
    Empty,
    /// The thread already has a turn in progress
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    OnRequest,
    Never,
}

impl ApprovalPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalPolicy::OnRequest => "on-request",
            ApprovalPolicy::Never => "never",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SandboxPolicy {
    ReadOnly,
    #[serde(rename_all = "camelCase")]
    WorkspaceWrite {
        writable_roots: Vec<String>,
        network_access: bool,
    },
    DangerFullAccess,
}

/// Policies for a turn, derived only from the mode and the configured roots.
pub fn resolve_policy(
    mode: AccessMode,
    cwd: &Path,
    writable_roots: &[PathBuf],
    network_access: bool,
) -> (ApprovalPolicy, SandboxPolicy) {
    match mode {
        // Mutations fail closed instead of prompting
        AccessMode::ReadOnly => (ApprovalPolicy::Never, SandboxPolicy::ReadOnly),
        AccessMode::Auto => {
            let mut roots = vec![cwd.display().to_string()];
            for root in writable_roots {
                let root = root.display().to_string();
                if !roots.contains(&root) {
                    roots.push(root);
                }
            }
            (
                ApprovalPolicy::OnRequest,
                SandboxPolicy::WorkspaceWrite {
                    writable_roots: roots,
                    network_access,
                },
            )
        }
        AccessMode::FullAccess => (ApprovalPolicy::Never, SandboxPolicy::DangerFullAccess),
    }
}

/// Input blocks for `turn/start`: the text (optionally prefixed with IDE
/// context), then one block per attachment.
pub fn build_content_blocks(text: &str, attachments: &[Attachment], ide: Option<&IdeContext>) -> Vec<Value> {
    let mut blocks = Vec::new();
    let prompt = match ide.filter(|ide| !ide.is_empty()) {
        Some(ide) => format!("{}\n{}", ide.render(), text),
        None => text.to_string(),
    };
    if !prompt.trim().is_empty() {
        blocks.push(json!({ "type": "text", "text": prompt }));
    }
    for attachment in attachments {
        blocks.push(match attachment {
            Attachment::Text { name, content } => json!({
                "type": "text",
                "text": format!("File: {}\n```\n{}\n```", name, content.trim_end_matches('\n')),
            }),
            Attachment::Image { path } => json!({ "type": "localImage", "path": path }),
            Attachment::ImageUrl { url } => json!({ "type": "image", "url": url }),
        });
    }
    blocks
}

fn attachment_images(attachments: &[Attachment]) -> Vec<String> {
    attachments
        .iter()
        .filter_map(|attachment| match attachment {
            Attachment::Image { path } => Some(path.display().to_string()),
            Attachment::ImageUrl { url } => Some(url.clone()),
            Attachment::Text { .. } => None,
        })
        .collect()
}

impl<T: AgentTransport> SessionController<T> {
    fn local_id(&mut self, prefix: &str) -> String {
        let id = format!("local-{}-{}", prefix, self.next_local_id);
        self.next_local_id += 1;
        id
    }

    /// Report a failed outbound request once, then hand the error back.
    fn request_failed(&self, what: &str, thread_id: Option<&str>, error: AgentDeskError) -> AgentDeskError {
        self.notice(NoticeLevel::Error, thread_id, format!("Failed to {}: {}", what, error));
        error
    }

    /// Submit a new turn on the active thread.
    pub async fn send(&mut self, text: &str, attachments: &[Attachment]) -> Result<SendOutcome> {
        if text.trim().is_empty() && attachments.is_empty() {
            return Ok(SendOutcome::Empty);
        }
        if self
            .store
            .active_thread()
            .is_some_and(|thread| thread.has_in_progress_turn())
        {
            debug!("Turn already in progress, not sending");
            return Ok(SendOutcome::Busy);
        }

        let thread_id = match self.store.active_thread.clone() {
            Some(thread_id) => thread_id,
            None => self.create_thread().await?,
        };

        let mode = self.config.mode;
        let (approval, sandbox) = resolve_policy(
            mode,
            &self.config.cwd,
            &self.config.writable_roots,
            self.config.network_access,
        );
        let ide = self
            .ide_context
            .as_ref()
            .filter(|_| self.config.include_ide_context);
        let input = build_content_blocks(text, attachments, ide);
        let params = protocol::turn_start_params(
            &thread_id,
            input,
            &self.config.cwd.display().to_string(),
            approval.as_str(),
            serde_json::to_value(&sandbox)?,
            self.config.model.as_deref(),
            self.config.effort.as_deref(),
        );

        let response = match self.transport.request(methods::TURN_START, params).await {
            Ok(response) => response,
            Err(e) => return Err(self.request_failed("start turn", Some(&thread_id), e)),
        };
        let server_turn_id = protocol::turn_id_of(&response).map(String::from);

        let mode_changed = self
            .last_mode
            .insert(thread_id.clone(), mode)
            .is_some_and(|previous| previous != mode);
        let placeholder_id = self.local_id("turn");
        let mode_marker_id = self.local_id("mode");
        let echo_id = self.local_id("user");

        let thread = self.store.ensure_thread(&thread_id);
        let turn = match &server_turn_id {
            Some(turn_id) => thread.ensure_turn(turn_id),
            None => {
                let mut turn = Turn::new(placeholder_id).with_status(TurnStatus::InProgress);
                turn.local = true;
                thread.turns.push(turn);
                let index = thread.turns.len() - 1;
                &mut thread.turns[index]
            }
        };
        turn.status = turn.status.merge(TurnStatus::InProgress);
        if mode_changed {
            turn.upsert_item(
                Item::new(mode_marker_id, ItemKind::ModeChange { mode: mode.to_string() })
                    .with_status(ItemStatus::Completed),
            );
        }
        if !turn.items.iter().any(|item| item.is_user_message()) {
            turn.upsert_item(Item::optimistic_user_message(
                echo_id,
                text,
                attachment_images(attachments),
            ));
        }
        let turn_id = turn.id.clone();

        self.awaiting_activity.insert(
            thread_id.clone(),
            PendingSend {
                turn_id: turn_id.clone(),
                sent_at: Instant::now(),
            },
        );
        info!("Started turn {} on thread {}", turn_id, thread_id);
        self.emit(StoreEvent::ThreadChanged {
            thread_id: thread_id.clone(),
        });
        Ok(SendOutcome::Sent { thread_id, turn_id })
    }

    /// Create a thread and make it the active one.
    pub async fn create_thread(&mut self) -> Result<String> {
        let params = protocol::thread_start_params(&self.config.cwd.display().to_string());
        let response = match self.transport.request(methods::THREAD_START, params).await {
            Ok(response) => response,
            Err(e) => return Err(self.request_failed("create thread", None, e)),
        };
        let summary = response
            .get("thread")
            .and_then(ThreadSummary::from_value)
            .or_else(|| protocol::thread_id_of(&response).map(ThreadSummary::new));
        let Some(summary) = summary else {
            let error = AgentDeskError::UnexpectedResponse("thread/start returned no thread id".to_string());
            return Err(self.request_failed("create thread", None, error));
        };

        let thread_id = summary.id.clone();
        self.store.upsert_summary(summary);
        self.store.ensure_thread(&thread_id);
        // Nothing persisted yet worth merging
        self.store.hydrated.insert(thread_id.clone());
        self.store.active_thread = Some(thread_id.clone());
        info!("Created thread {}", thread_id);
        self.emit(StoreEvent::ThreadsChanged);
        Ok(thread_id)
    }

    /// Ask the server to interrupt the running turn on the active thread.
    /// Local state is left for the server's completion or error to settle.
    pub async fn stop(&mut self) -> Result<bool> {
        let Some(thread) = self.store.active_thread() else {
            return Ok(false);
        };
        let Some(turn) = thread.in_progress_turn() else {
            return Ok(false);
        };
        let thread_id = thread.id.clone();
        let turn_id = (!turn.local).then(|| turn.id.clone());

        let params = protocol::turn_interrupt_params(&thread_id, turn_id.as_deref());
        if let Err(e) = self.transport.request(methods::TURN_INTERRUPT, params).await {
            return Err(self.request_failed("interrupt turn", Some(&thread_id), e));
        }
        info!("Requested interrupt on thread {}", thread_id);
        Ok(true)
    }

    /// Fetch one page of the thread directory into the summaries. Returns
    /// the cursor of the next page, if any.
    pub async fn list_threads(&mut self, cursor: Option<&str>) -> Result<Option<String>> {
        let params = match cursor {
            Some(cursor) => json!({ "cursor": cursor }),
            None => json!({}),
        };
        let response = match self.transport.request(methods::THREAD_LIST, params).await {
            Ok(response) => response,
            Err(e) => return Err(self.request_failed("list threads", None, e)),
        };

        let summaries: Vec<ThreadSummary> = response
            .get("data")
            .or_else(|| response.get("threads"))
            .and_then(Value::as_array)
            .map(|threads| threads.iter().filter_map(ThreadSummary::from_value).collect())
            .unwrap_or_default();
        debug!("Listed {} thread(s)", summaries.len());
        // Newest first on the wire; insert oldest first to keep that order
        for summary in summaries.into_iter().rev() {
            self.store.upsert_summary(summary);
        }
        self.emit(StoreEvent::ThreadsChanged);

        Ok(protocol::str_field(&response, &["nextCursor"]).map(String::from))
    }

    /// Resume a persisted thread, focus it and merge its transcript.
    pub async fn resume_thread(&mut self, thread_id: &str) -> Result<()> {
        let params = protocol::thread_id_params(thread_id);
        let response = match self.transport.request(methods::THREAD_RESUME, params).await {
            Ok(response) => response,
            Err(e) => return Err(self.request_failed("resume thread", Some(thread_id), e)),
        };

        let thread = response.get("thread").unwrap_or(&response);
        if let Some(summary) = ThreadSummary::from_value(thread) {
            self.store.upsert_summary(summary);
        }
        self.store.ensure_thread(thread_id);
        self.store.active_thread = Some(thread_id.to_string());

        let persisted = hydration::parse_turns(thread);
        if let Some(detail) = self.store.thread_mut(thread_id) {
            let stats = hydration::merge_transcript(detail, persisted);
            info!("Resumed thread {}: {}", thread_id, stats);
        }
        self.store.hydrated.insert(thread_id.to_string());
        self.emit(StoreEvent::ThreadsChanged);
        self.emit(StoreEvent::ThreadChanged {
            thread_id: thread_id.to_string(),
        });
        Ok(())
    }

    /// Archive a thread on the server, then forget it locally.
    pub async fn archive_thread(&mut self, thread_id: &str) -> Result<()> {
        let params = protocol::thread_id_params(thread_id);
        if let Err(e) = self.transport.request(methods::THREAD_ARCHIVE, params).await {
            return Err(self.request_failed("archive thread", Some(thread_id), e));
        }
        self.store.archive(thread_id);
        self.last_mode.remove(thread_id);
        self.awaiting_activity.remove(thread_id);
        info!("Archived thread {}", thread_id);
        self.emit(StoreEvent::ThreadArchived {
            thread_id: thread_id.to_string(),
        });
        self.emit(StoreEvent::ThreadsChanged);
        Ok(())
    }

    /// Apply a turn's file-change snapshot on the active thread.
    pub async fn apply_snapshot(&mut self, turn_id: &str) -> Result<()> {
        self.snapshot_request(methods::SNAPSHOT_APPLY, turn_id, SnapshotState::Applied, "apply changes")
            .await
    }

    /// Revert a previously applied snapshot.
    pub async fn revert_snapshot(&mut self, turn_id: &str) -> Result<()> {
        self.snapshot_request(methods::SNAPSHOT_REVERT, turn_id, SnapshotState::Available, "revert changes")
            .await
    }

    async fn snapshot_request(&mut self, method: &str, turn_id: &str, state: SnapshotState, what: &str) -> Result<()> {
        let Some(thread_id) = self.store.active_thread.clone() else {
            return Err(AgentDeskError::UnexpectedResponse(
                "no active thread for snapshot request".to_string(),
            ));
        };
        let params = protocol::snapshot_params(&thread_id, turn_id);
        if let Err(e) = self.transport.request(method, params).await {
            return Err(self.request_failed(what, Some(&thread_id), e));
        }
        if let Some(turn) = self
            .store
            .thread_mut(&thread_id)
            .and_then(|thread| thread.turn_mut(turn_id))
        {
            turn.snapshot = state;
        }
        self.emit(StoreEvent::ThreadChanged { thread_id });
        Ok(())
    }
}
