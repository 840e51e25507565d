//! Threads and turns

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::item::{Item, ItemKind};

/// Max characters of a derived thread title
const TITLE_MAX_CHARS: usize = 60;

/// Normalized turn lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TurnStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Error,
}

impl TurnStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "notStarted" | "not_started" | "pending" | "queued" => Some(TurnStatus::NotStarted),
            "inProgress" | "in_progress" | "running" | "started" => Some(TurnStatus::InProgress),
            "completed" | "interrupted" | "cancelled" | "canceled" => Some(TurnStatus::Completed),
            "failed" | "error" | "errored" => Some(TurnStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TurnStatus::Completed | TurnStatus::Error)
    }

    /// A late non-terminal event never reopens a finished turn, and `Error`
    /// absorbs `Completed` so arrival order does not decide the outcome.
    pub fn merge(self, incoming: TurnStatus) -> TurnStatus {
        match (self, incoming) {
            (TurnStatus::Error, _) => TurnStatus::Error,
            (current, incoming) if current.is_terminal() && !incoming.is_terminal() => current,
            (_, incoming) => incoming,
        }
    }
}

/// Whether a turn's file changes can be applied or reverted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotState {
    #[default]
    None,
    Available,
    Applied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step: String,
    #[serde(default)]
    pub status: String,
}

/// Plan snapshot; always complete, replaced wholesale
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnPlan {
    pub explanation: Option<String>,
    pub steps: Vec<PlanStep>,
}

impl TurnPlan {
    pub fn from_value(params: &Value) -> Option<TurnPlan> {
        let steps: Vec<PlanStep> = params
            .get("plan")
            .and_then(Value::as_array)?
            .iter()
            .filter_map(|step| serde_json::from_value(step.clone()).ok())
            .collect();
        Some(TurnPlan {
            explanation: params
                .get("explanation")
                .and_then(Value::as_str)
                .map(String::from),
            steps,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.explanation.as_deref().is_none_or(str::is_empty)
    }
}

/// Terminal error attached to a turn, payload kept verbatim
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnError {
    pub message: String,
    pub raw: Value,
}

impl TurnError {
    pub fn from_value(value: &Value) -> Option<TurnError> {
        let message = value
            .as_str()
            .or_else(|| value.get("message").and_then(Value::as_str))?;
        Some(TurnError {
            message: message.to_string(),
            raw: value.clone(),
        })
    }
}

/// One request/response cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: String,
    pub status: TurnStatus,
    pub items: Vec<Item>,
    pub plan: Option<TurnPlan>,
    pub diff: Option<String>,
    pub error: Option<TurnError>,
    pub snapshot: SnapshotState,
    /// Placeholder inserted before the server assigned an id
    pub local: bool,
}

impl Turn {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TurnStatus::NotStarted,
            items: Vec::new(),
            plan: None,
            diff: None,
            error: None,
            snapshot: SnapshotState::None,
            local: false,
        }
    }

    pub fn with_status(mut self, status: TurnStatus) -> Self {
        self.status = status;
        self
    }

    pub fn item(&self, item_id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id == item_id)
    }

    /// Insert or merge an item by id, returning its index. User messages
    /// open the turn, so a late one goes ahead of streamed content.
    pub fn upsert_item(&mut self, item: Item) -> usize {
        if let Some(index) = self.items.iter().position(|existing| existing.id == item.id) {
            self.items[index].merge_from(item);
            return index;
        }
        let index = if item.is_user_message() {
            self.items
                .iter()
                .position(|existing| {
                    !existing.is_user_message()
                        && !matches!(existing.kind, ItemKind::ModeChange { .. })
                })
                .unwrap_or(self.items.len())
        } else {
            self.items.len()
        };
        self.items.insert(index, item);
        index
    }

    /// Drop local echoes once the server's own user message shows up.
    pub fn purge_optimistic_user_messages(&mut self) -> usize {
        let before = self.items.len();
        self.items
            .retain(|item| !(item.optimistic && item.is_user_message()));
        before - self.items.len()
    }

    pub fn has_tool_items(&self) -> bool {
        self.items.iter().any(|item| item.kind.is_tool_like())
    }

    pub fn user_text(&self) -> String {
        self.joined_text(Item::is_user_message)
    }

    pub fn agent_text(&self) -> String {
        self.joined_text(Item::is_agent_message)
    }

    fn joined_text(&self, filter: fn(&Item) -> bool) -> String {
        self.items
            .iter()
            .filter(|item| filter(item))
            .filter_map(Item::text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Lightweight summary shown in thread lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub id: String,
    pub title: Option<String>,
    pub preview: String,
    pub created_at: Option<DateTime<Utc>>,
    pub cwd: Option<String>,
    pub path: Option<String>,
}

impl ThreadSummary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            preview: String::new(),
            created_at: None,
            cwd: None,
            path: None,
        }
    }

    /// Parse a thread object as sent in `thread/started`, `thread/list` and responses.
    pub fn from_value(value: &Value) -> Option<ThreadSummary> {
        let id = value.get("id").and_then(Value::as_str)?;
        Some(ThreadSummary {
            id: id.to_string(),
            title: value
                .get("name")
                .or_else(|| value.get("title"))
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .map(String::from),
            preview: value
                .get("preview")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            created_at: value.get("createdAt").and_then(parse_timestamp),
            cwd: value.get("cwd").and_then(Value::as_str).map(String::from),
            path: value.get("path").and_then(Value::as_str).map(String::from),
        })
    }

    /// Fill in from a newer observation without erasing known fields.
    pub fn merge_from(&mut self, incoming: ThreadSummary) {
        if incoming.title.is_some() {
            self.title = incoming.title;
        }
        if !incoming.preview.is_empty() {
            self.preview = incoming.preview;
        }
        if incoming.created_at.is_some() {
            self.created_at = incoming.created_at;
        }
        if incoming.cwd.is_some() {
            self.cwd = incoming.cwd;
        }
        if incoming.path.is_some() {
            self.path = incoming.path;
        }
    }
}

/// Full per-thread state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDetail {
    pub id: String,
    pub title: Option<String>,
    pub preview: String,
    pub created_at: Option<DateTime<Utc>>,
    pub cwd: Option<String>,
    pub turns: Vec<Turn>,
}

impl ThreadDetail {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            preview: String::new(),
            created_at: None,
            cwd: None,
            turns: Vec::new(),
        }
    }

    pub fn from_summary(summary: &ThreadSummary) -> Self {
        Self {
            id: summary.id.clone(),
            title: summary.title.clone(),
            preview: summary.preview.clone(),
            created_at: summary.created_at,
            cwd: summary.cwd.clone(),
            turns: Vec::new(),
        }
    }

    pub fn apply_summary(&mut self, summary: &ThreadSummary) {
        if summary.title.is_some() {
            self.title = summary.title.clone();
        }
        if !summary.preview.is_empty() {
            self.preview = summary.preview.clone();
        }
        if summary.created_at.is_some() {
            self.created_at = summary.created_at;
        }
        if summary.cwd.is_some() {
            self.cwd = summary.cwd.clone();
        }
    }

    pub fn turn(&self, turn_id: &str) -> Option<&Turn> {
        self.turns.iter().find(|turn| turn.id == turn_id)
    }

    pub fn turn_mut(&mut self, turn_id: &str) -> Option<&mut Turn> {
        self.turns.iter_mut().find(|turn| turn.id == turn_id)
    }

    /// Get or append a turn; item events may arrive before `turn/started`.
    /// The first server id seen while a local placeholder exists adopts it.
    pub fn ensure_turn(&mut self, turn_id: &str) -> &mut Turn {
        let index = match self.turns.iter().position(|turn| turn.id == turn_id) {
            Some(index) => index,
            None => match self.turns.iter().rposition(|turn| turn.local) {
                Some(index) => {
                    let turn = &mut self.turns[index];
                    debug!("Adopting placeholder turn {} as {}", turn.id, turn_id);
                    turn.id = turn_id.to_string();
                    turn.local = false;
                    index
                }
                None => {
                    self.turns
                        .push(Turn::new(turn_id).with_status(TurnStatus::InProgress));
                    self.turns.len() - 1
                }
            },
        };
        &mut self.turns[index]
    }

    /// Most recent turn still running
    pub fn in_progress_turn(&self) -> Option<&Turn> {
        self.turns
            .iter()
            .rev()
            .find(|turn| turn.status == TurnStatus::InProgress)
    }

    pub fn has_in_progress_turn(&self) -> bool {
        self.in_progress_turn().is_some()
    }

    /// Turn owning an item, searching newest first
    pub fn turn_of_item_mut(&mut self, item_id: &str) -> Option<&mut Turn> {
        self.turns
            .iter_mut()
            .rev()
            .find(|turn| turn.item(item_id).is_some())
    }

    /// Latest non-empty turn diff
    pub fn latest_diff(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .filter_map(|turn| turn.diff.as_deref())
            .find(|diff| !diff.trim().is_empty())
    }

    /// Set a derived title only when none exists yet.
    pub fn derive_title(&mut self, text: &str) -> Option<String> {
        if self.title.is_some() {
            return None;
        }
        let title = derive_title(text)?;
        self.title = Some(title.clone());
        Some(title)
    }
}

/// First non-empty line, whitespace collapsed, truncated on a char boundary.
pub fn derive_title(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|line| !line.is_empty())?;
    let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return Some(collapsed);
    }
    let truncated: String = collapsed.chars().take(TITLE_MAX_CHARS - 1).collect();
    Some(format!("{}…", truncated.trim_end()))
}

/// Unix seconds, unix milliseconds, or RFC 3339
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(secs) = value.as_i64() {
        return if secs > 100_000_000_000 {
            Utc.timestamp_millis_opt(secs).single()
        } else {
            Utc.timestamp_opt(secs, 0).single()
        };
    }
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
