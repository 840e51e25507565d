//! Session store: the aggregate root for everything the UI reads.
//!
//! Mutated only through the reducer, the orchestrator, the approval
//! correlator and hydration. All of them run on one logical thread of
//! control, so nothing here is synchronized.

mod item;
mod thread;

pub use item::{
    ChangeKind, FileChangeEntry, Item, ItemKind, ItemStatus, ReasoningPart, ToolCallInfo,
    MAX_REASONING_SEGMENTS,
};
pub(crate) use item::{command_text, text_or_json};
pub use thread::{
    derive_title, PlanStep, SnapshotState, ThreadDetail, ThreadSummary, Turn, TurnError,
    TurnPlan, TurnStatus,
};

use crate::protocol::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Server-initiated approval request awaiting a user decision
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    pub rpc_id: RequestId,
    pub method: String,
    pub params: Value,
    pub thread_id: Option<String>,
    pub turn_id: Option<String>,
}

impl PendingApproval {
    /// File-change approvals, including the legacy `applyPatchApproval` form
    pub fn is_file_change(&self) -> bool {
        self.method.contains("fileChange") || self.method.contains("Patch")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenBreakdown {
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_output_tokens: u64,
}

/// Per-thread token accounting, replaced wholesale on each update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenUsage {
    pub total: TokenBreakdown,
    pub last: TokenBreakdown,
    pub model_context_window: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitWindow {
    pub used_percent: f64,
    pub window_duration_mins: Option<i64>,
    pub resets_at: Option<i64>,
}

/// Account-wide rate limit snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimits {
    pub primary: Option<RateLimitWindow>,
    pub secondary: Option<RateLimitWindow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    /// Newest first
    pub summaries: Vec<ThreadSummary>,
    pub threads: BTreeMap<String, ThreadDetail>,
    /// Keyed by the item id the request refers to
    pub approvals: BTreeMap<String, PendingApproval>,
    pub token_usage: BTreeMap<String, TokenUsage>,
    pub rate_limits: Option<RateLimits>,
    /// Thread currently shown; admits events for threads not tracked yet
    pub active_thread: Option<String>,
    /// Threads whose persisted transcript was already merged
    pub hydrated: BTreeSet<String>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tracked(&self, thread_id: &str) -> bool {
        self.threads.contains_key(thread_id)
    }

    /// Notifications are only processed for tracked or focused threads.
    pub fn admits(&self, thread_id: &str) -> bool {
        self.is_tracked(thread_id) || self.active_thread.as_deref() == Some(thread_id)
    }

    pub fn thread(&self, thread_id: &str) -> Option<&ThreadDetail> {
        self.threads.get(thread_id)
    }

    pub fn thread_mut(&mut self, thread_id: &str) -> Option<&mut ThreadDetail> {
        self.threads.get_mut(thread_id)
    }

    pub fn active_thread(&self) -> Option<&ThreadDetail> {
        self.active_thread
            .as_deref()
            .and_then(|id| self.threads.get(id))
    }

    pub fn summary(&self, thread_id: &str) -> Option<&ThreadSummary> {
        self.summaries.iter().find(|s| s.id == thread_id)
    }

    /// Insert or merge a summary and mirror its fields into an existing detail.
    pub fn upsert_summary(&mut self, summary: ThreadSummary) {
        if let Some(detail) = self.threads.get_mut(&summary.id) {
            detail.apply_summary(&summary);
        }
        match self.summaries.iter_mut().find(|s| s.id == summary.id) {
            Some(existing) => existing.merge_from(summary),
            None => self.summaries.insert(0, summary),
        }
    }

    /// Get or create the detail (and summary) for a thread. Never touches existing turns.
    pub fn ensure_thread(&mut self, thread_id: &str) -> &mut ThreadDetail {
        if !self.summaries.iter().any(|s| s.id == thread_id) {
            self.summaries.insert(0, ThreadSummary::new(thread_id));
        }
        let summaries = &self.summaries;
        self.threads
            .entry(thread_id.to_string())
            .or_insert_with(|| {
                summaries
                    .iter()
                    .find(|s| s.id == thread_id)
                    .map(ThreadDetail::from_summary)
                    .unwrap_or_else(|| ThreadDetail::new(thread_id))
            })
    }

    /// Set title/preview on both the summary and the detail.
    pub fn set_thread_labels(&mut self, thread_id: &str, title: Option<String>, preview: Option<String>) {
        if let Some(summary) = self.summaries.iter_mut().find(|s| s.id == thread_id) {
            if let Some(title) = &title {
                summary.title = Some(title.clone());
            }
            if let Some(preview) = &preview {
                summary.preview = preview.clone();
            }
        }
        if let Some(detail) = self.threads.get_mut(thread_id) {
            if let Some(title) = title {
                detail.title = Some(title);
            }
            if let Some(preview) = preview {
                detail.preview = preview;
            }
        }
    }

    /// Remove every trace of a thread. Returns false when it was unknown.
    pub fn archive(&mut self, thread_id: &str) -> bool {
        let had_summary = self.summaries.iter().any(|s| s.id == thread_id);
        self.summaries.retain(|s| s.id != thread_id);
        let detail = self.threads.remove(thread_id);
        let had_detail = detail.is_some();
        self.token_usage.remove(thread_id);
        self.hydrated.remove(thread_id);

        // Approvals without a thread id are matched through the thread's
        // turns and items instead.
        let mut turn_ids = BTreeSet::new();
        let mut item_keys = BTreeSet::new();
        for turn in detail.iter().flat_map(|detail| &detail.turns) {
            turn_ids.insert(turn.id.as_str());
            for item in &turn.items {
                item_keys.insert(item.id.as_str());
                item_keys.extend(item.call_id.as_deref());
            }
        }
        self.approvals.retain(|key, approval| match approval.thread_id.as_deref() {
            Some(owner) => owner != thread_id,
            None => {
                !item_keys.contains(key.as_str())
                    && !approval
                        .turn_id
                        .as_deref()
                        .is_some_and(|turn_id| turn_ids.contains(turn_id))
            }
        });
        if self.active_thread.as_deref() == Some(thread_id) {
            self.active_thread = None;
        }
        had_summary || had_detail
    }
}
