//! Items: the tagged units of content inside a turn

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

/// Upper bound on reasoning summary or content segments per item.
pub const MAX_REASONING_SEGMENTS: usize = 256;

/// Lifecycle of a single item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemStatus {
    InProgress,
    Completed,
    Failed,
    Declined,
}

impl ItemStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inProgress" | "in_progress" | "running" | "pending" | "started" => {
                Some(ItemStatus::InProgress)
            }
            "completed" | "success" | "succeeded" => Some(ItemStatus::Completed),
            "failed" | "error" => Some(ItemStatus::Failed),
            "declined" | "rejected" | "denied" => Some(ItemStatus::Declined),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ItemStatus::InProgress)
    }

    /// Terminal states never fall back to in-progress.
    pub fn merge(self, incoming: ItemStatus) -> ItemStatus {
        if self.is_terminal() && !incoming.is_terminal() {
            self
        } else {
            incoming
        }
    }
}

/// Kind of change applied to one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Add,
    Update,
    Delete,
}

impl ChangeKind {
    /// Accepts `"add"`, `{"type": "add"}` and `{"update": {...}}` shapes.
    pub fn from_value(value: &Value) -> ChangeKind {
        let name = value
            .as_str()
            .or_else(|| value.get("type").and_then(Value::as_str))
            .or_else(|| value.as_object().and_then(|o| o.keys().next()).map(String::as_str))
            .unwrap_or("update");
        match name.to_ascii_lowercase().as_str() {
            "add" | "create" | "added" => ChangeKind::Add,
            "delete" | "remove" | "deleted" => ChangeKind::Delete,
            _ => ChangeKind::Update,
        }
    }
}

/// One path within a file-change item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeEntry {
    pub path: String,
    pub kind: ChangeKind,
    pub diff: String,
}

/// Fields of a generic tool call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallInfo {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    pub input: String,
    pub output: String,
}

impl ToolCallInfo {
    /// Non-empty incoming fields win; output only grows.
    pub fn merge_from(&mut self, incoming: ToolCallInfo) {
        if self.call_id.is_empty() {
            self.call_id = incoming.call_id;
        }
        replace_if_set(&mut self.name, incoming.name);
        replace_if_set(&mut self.arguments, incoming.arguments);
        replace_if_set(&mut self.input, incoming.input);
        keep_longer(&mut self.output, incoming.output);
    }
}

/// Which reasoning stream a delta targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningPart {
    Summary,
    Content,
}

/// Item payload, one variant per kind
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ItemKind {
    UserMessage {
        text: String,
        images: Vec<String>,
    },
    AgentMessage {
        text: String,
    },
    /// Index-addressed segments so parallel streams never interleave
    Reasoning {
        summary: Vec<String>,
        content: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    CommandExecution {
        command: String,
        cwd: Option<String>,
        output: String,
        exit_code: Option<i64>,
        duration_ms: Option<i64>,
    },
    FileChange {
        changes: Vec<FileChangeEntry>,
        output: String,
    },
    ToolCall(ToolCallInfo),
    // UI-only markers
    ModeChange {
        mode: String,
    },
    TurnDiff {
        diff: String,
    },
    TurnError {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Other {
        item_type: String,
        raw: Value,
    },
}

impl ItemKind {
    pub fn name(&self) -> &'static str {
        match self {
            ItemKind::UserMessage { .. } => "userMessage",
            ItemKind::AgentMessage { .. } => "agentMessage",
            ItemKind::Reasoning { .. } => "reasoning",
            ItemKind::CommandExecution { .. } => "commandExecution",
            ItemKind::FileChange { .. } => "fileChange",
            ItemKind::ToolCall(_) => "toolCall",
            ItemKind::ModeChange { .. } => "modeChange",
            ItemKind::TurnDiff { .. } => "turnDiff",
            ItemKind::TurnError { .. } => "turnError",
            ItemKind::Other { .. } => "other",
        }
    }

    pub fn same_variant(&self, other: &ItemKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn empty_agent_message() -> Self {
        ItemKind::AgentMessage {
            text: String::new(),
        }
    }

    pub fn empty_command() -> Self {
        ItemKind::CommandExecution {
            command: String::new(),
            cwd: None,
            output: String::new(),
            exit_code: None,
            duration_ms: None,
        }
    }

    pub fn empty_reasoning() -> Self {
        ItemKind::Reasoning {
            summary: Vec::new(),
            content: Vec::new(),
        }
    }

    /// Tool-ish work shown between reasoning and the final answer
    pub fn is_tool_like(&self) -> bool {
        matches!(
            self,
            ItemKind::CommandExecution { .. } | ItemKind::FileChange { .. } | ItemKind::ToolCall(_)
        )
    }

    pub fn is_marker(&self) -> bool {
        matches!(
            self,
            ItemKind::ModeChange { .. } | ItemKind::TurnDiff { .. } | ItemKind::TurnError { .. }
        )
    }

    /// The text a plain delta appends to. Markers and user messages have none.
    pub fn accumulator_mut(&mut self) -> Option<&mut String> {
        match self {
            ItemKind::AgentMessage { text } => Some(text),
            ItemKind::CommandExecution { output, .. } => Some(output),
            ItemKind::FileChange { output, .. } => Some(output),
            ItemKind::ToolCall(call) => Some(&mut call.output),
            ItemKind::Reasoning { content, .. } => {
                if content.is_empty() {
                    content.push(String::new());
                }
                content.last_mut()
            }
            ItemKind::UserMessage { .. }
            | ItemKind::ModeChange { .. }
            | ItemKind::TurnDiff { .. }
            | ItemKind::TurnError { .. }
            | ItemKind::Other { .. } => None,
        }
    }

    pub fn accumulator(&self) -> Option<&str> {
        match self {
            ItemKind::AgentMessage { text } => Some(text),
            ItemKind::CommandExecution { output, .. } => Some(output),
            ItemKind::FileChange { output, .. } => Some(output),
            ItemKind::ToolCall(call) => Some(&call.output),
            ItemKind::Reasoning { content, .. } => content.last().map(String::as_str),
            ItemKind::UserMessage { .. }
            | ItemKind::ModeChange { .. }
            | ItemKind::TurnDiff { .. }
            | ItemKind::TurnError { .. }
            | ItemKind::Other { .. } => None,
        }
    }

    /// Whether any delta-fed text has been filled in.
    pub fn has_content(&self) -> bool {
        match self {
            ItemKind::Reasoning { summary, content } => {
                summary.iter().chain(content).any(|segment| !segment.is_empty())
            }
            kind => kind.accumulator().is_some_and(|text| !text.is_empty()),
        }
    }

    /// Append to an index-addressed reasoning segment, growing the list as needed.
    /// Indexes at or past `MAX_REASONING_SEGMENTS` are refused.
    pub fn append_reasoning(&mut self, part: ReasoningPart, index: usize, delta: &str) -> bool {
        let ItemKind::Reasoning { summary, content } = self else {
            return false;
        };
        let segments = match part {
            ReasoningPart::Summary => summary,
            ReasoningPart::Content => content,
        };
        if !grow_to_index(segments, index) {
            return false;
        }
        segments[index].push_str(delta);
        true
    }

    /// Open an empty summary slot at `index`.
    pub fn add_summary_part(&mut self, index: usize) -> bool {
        let ItemKind::Reasoning { summary, .. } = self else {
            return false;
        };
        grow_to_index(summary, index)
    }

    /// Merge an authoritative payload of the same kind. Accumulators only grow.
    pub fn merge_from(&mut self, incoming: ItemKind) {
        match (self, incoming) {
            (
                ItemKind::UserMessage { text, images },
                ItemKind::UserMessage {
                    text: new_text,
                    images: new_images,
                },
            ) => {
                keep_longer(text, new_text);
                if !new_images.is_empty() {
                    *images = new_images;
                }
            }
            (ItemKind::AgentMessage { text }, ItemKind::AgentMessage { text: new_text }) => {
                keep_longer(text, new_text);
            }
            (
                ItemKind::Reasoning { summary, content },
                ItemKind::Reasoning {
                    summary: new_summary,
                    content: new_content,
                },
            ) => {
                merge_segments(summary, new_summary);
                merge_segments(content, new_content);
            }
            (
                ItemKind::CommandExecution {
                    command,
                    cwd,
                    output,
                    exit_code,
                    duration_ms,
                },
                ItemKind::CommandExecution {
                    command: new_command,
                    cwd: new_cwd,
                    output: new_output,
                    exit_code: new_exit,
                    duration_ms: new_duration,
                },
            ) => {
                replace_if_set(command, new_command);
                if new_cwd.is_some() {
                    *cwd = new_cwd;
                }
                keep_longer(output, new_output);
                if new_exit.is_some() {
                    *exit_code = new_exit;
                }
                if new_duration.is_some() {
                    *duration_ms = new_duration;
                }
            }
            (
                ItemKind::FileChange { changes, output },
                ItemKind::FileChange {
                    changes: new_changes,
                    output: new_output,
                },
            ) => {
                if !new_changes.is_empty() {
                    *changes = new_changes;
                }
                keep_longer(output, new_output);
            }
            (ItemKind::ToolCall(call), ItemKind::ToolCall(new_call)) => call.merge_from(new_call),
            (ItemKind::ModeChange { mode }, ItemKind::ModeChange { mode: new_mode }) => {
                *mode = new_mode;
            }
            (ItemKind::TurnDiff { diff }, ItemKind::TurnDiff { diff: new_diff }) => {
                *diff = new_diff;
            }
            (ItemKind::TurnError { message }, ItemKind::TurnError { message: new_message }) => {
                *message = new_message;
            }
            (
                ItemKind::Other { item_type, raw },
                ItemKind::Other {
                    item_type: new_type,
                    raw: new_raw,
                },
            ) => {
                *item_type = new_type;
                *raw = new_raw;
            }
            (current, incoming) => {
                debug!(
                    "Ignoring {} payload for item already classified as {}",
                    incoming.name(),
                    current.name()
                );
            }
        }
    }
}

/// One discrete unit of content or action within a turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub status: ItemStatus,
    /// Local echo inserted before the server confirmed it
    pub optimistic: bool,
    /// Shell created by an unrecognized delta; kind is only a guess
    pub provisional: bool,
    /// Call id for items that started life as a generic tool call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Raw tool-call fields, kept after reclassification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolCallInfo>,
    pub kind: ItemKind,
    #[serde(skip)]
    applied_seqs: BTreeSet<u64>,
}

impl Item {
    pub fn new(id: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            id: id.into(),
            status: ItemStatus::InProgress,
            optimistic: false,
            provisional: false,
            call_id: None,
            tool: None,
            kind,
            applied_seqs: BTreeSet::new(),
        }
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn optimistic_user_message(id: impl Into<String>, text: &str, images: Vec<String>) -> Self {
        let mut item = Self::new(
            id,
            ItemKind::UserMessage {
                text: text.to_string(),
                images,
            },
        )
        .with_status(ItemStatus::Completed);
        item.optimistic = true;
        item
    }

    pub fn is_user_message(&self) -> bool {
        matches!(self.kind, ItemKind::UserMessage { .. })
    }

    pub fn is_agent_message(&self) -> bool {
        matches!(self.kind, ItemKind::AgentMessage { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            ItemKind::UserMessage { text, .. } | ItemKind::AgentMessage { text } => Some(text),
            _ => None,
        }
    }

    /// Finished with its text filled in by an authoritative payload. Late
    /// deltas for a settled item are stale.
    pub fn is_settled(&self) -> bool {
        self.status.is_terminal() && !self.optimistic && self.kind.has_content()
    }

    /// Returns false when this sequence number was already applied.
    pub fn mark_seq(&mut self, seq: u64) -> bool {
        self.applied_seqs.insert(seq)
    }

    /// Merge an authoritative copy of this item into the stored one.
    pub fn merge_from(&mut self, incoming: Item) {
        self.status = self.status.merge(incoming.status);
        if self.call_id.is_none() {
            self.call_id = incoming.call_id;
        }
        if let Some(tool) = incoming.tool {
            match &mut self.tool {
                Some(existing) => existing.merge_from(tool),
                None => self.tool = Some(tool),
            }
        }

        if self.provisional && !incoming.provisional && !self.kind.same_variant(&incoming.kind) {
            debug!(
                "Item {} guessed as {} is really {}",
                self.id,
                self.kind.name(),
                incoming.kind.name()
            );
            let streamed = self.kind.accumulator().unwrap_or_default().to_string();
            self.kind = incoming.kind;
            if let Some(text) = self.kind.accumulator_mut() {
                keep_longer(text, streamed);
            }
            self.provisional = false;
            return;
        }
        if !incoming.provisional {
            self.provisional = false;
        }
        self.kind.merge_from(incoming.kind);
    }

    /// Parse a server item payload. Returns `None` when it carries no id.
    pub fn from_value(value: &Value) -> Option<Item> {
        let id = value.get("id").and_then(Value::as_str)?.to_string();
        let item_type = value.get("type").and_then(Value::as_str).unwrap_or("");
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .and_then(ItemStatus::parse);

        let mut call_id = None;
        let mut tool = None;
        let kind = match normalize_type(item_type).as_str() {
            "usermessage" => {
                let (text, images) = parse_user_content(value);
                ItemKind::UserMessage { text, images }
            }
            "agentmessage" => ItemKind::AgentMessage {
                text: str_of(value, "text"),
            },
            "reasoning" => ItemKind::Reasoning {
                summary: parse_segments(value.get("summary")),
                content: parse_segments(value.get("content")),
            },
            "commandexecution" => ItemKind::CommandExecution {
                command: command_text(value.get("command")),
                cwd: value.get("cwd").and_then(Value::as_str).map(String::from),
                output: value
                    .get("aggregatedOutput")
                    .or_else(|| value.get("output"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                exit_code: value.get("exitCode").and_then(Value::as_i64),
                duration_ms: value.get("durationMs").and_then(Value::as_i64),
            },
            "filechange" => ItemKind::FileChange {
                changes: parse_changes(value.get("changes")),
                output: String::new(),
            },
            "toolcall" | "mcptoolcall" | "functioncall" => {
                let info = ToolCallInfo {
                    call_id: value
                        .get("callId")
                        .and_then(Value::as_str)
                        .unwrap_or(&id)
                        .to_string(),
                    name: value
                        .get("name")
                        .or_else(|| value.get("tool"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    arguments: text_or_json(value.get("arguments")),
                    input: text_or_json(value.get("input")),
                    output: text_or_json(value.get("output").or_else(|| value.get("result"))),
                };
                call_id = Some(info.call_id.clone());
                tool = Some(info.clone());
                ItemKind::ToolCall(info)
            }
            _ => ItemKind::Other {
                item_type: item_type.to_string(),
                raw: value.clone(),
            },
        };

        let mut item = Item::new(id, kind);
        item.call_id = call_id;
        item.tool = tool;
        if let Some(status) = status {
            item.status = status;
        }
        Some(item)
    }
}

fn normalize_type(item_type: &str) -> String {
    item_type.replace(['_', '-'], "").to_ascii_lowercase()
}

fn str_of(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Strings pass through, anything else is rendered as compact JSON
pub(crate) fn text_or_json(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Commands arrive as a string or an argv array; `bash -lc "<script>"` shows the script.
pub(crate) fn command_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => {
            let argv: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
            match argv.as_slice() {
                [shell, flag, script] if is_shell(shell) && flag.starts_with('-') => {
                    script.to_string()
                }
                _ => argv.join(" "),
            }
        }
        _ => String::new(),
    }
}

fn is_shell(program: &str) -> bool {
    let base = program.rsplit('/').next().unwrap_or(program);
    matches!(base, "bash" | "sh" | "zsh" | "pwsh" | "powershell")
}

fn parse_user_content(value: &Value) -> (String, Vec<String>) {
    let Some(parts) = value.get("content").and_then(Value::as_array) else {
        return (str_of(value, "text"), Vec::new());
    };
    let mut texts = Vec::new();
    let mut images = Vec::new();
    for part in parts {
        match part.get("type").and_then(Value::as_str).unwrap_or("text") {
            "text" => {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    texts.push(text.to_string());
                }
            }
            "image" => {
                if let Some(url) = part.get("url").and_then(Value::as_str) {
                    images.push(url.to_string());
                }
            }
            "localImage" => {
                if let Some(path) = part.get("path").and_then(Value::as_str) {
                    images.push(path.to_string());
                }
            }
            _ => {}
        }
    }
    (texts.join("\n"), images)
}

fn parse_segments(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .map(|part| {
                    part.as_str()
                        .or_else(|| part.get("text").and_then(Value::as_str))
                        .unwrap_or_default()
                        .to_string()
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_changes(value: Option<&Value>) -> Vec<FileChangeEntry> {
    value
        .and_then(Value::as_array)
        .map(|changes| {
            changes
                .iter()
                .filter_map(|change| {
                    let path = change.get("path").and_then(Value::as_str)?;
                    Some(FileChangeEntry {
                        path: path.to_string(),
                        kind: change
                            .get("kind")
                            .map(ChangeKind::from_value)
                            .unwrap_or(ChangeKind::Update),
                        diff: str_of(change, "diff"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn grow_to_index(segments: &mut Vec<String>, index: usize) -> bool {
    match index.checked_add(1) {
        Some(len) if len <= MAX_REASONING_SEGMENTS => {
            ensure_len(segments, len);
            true
        }
        _ => false,
    }
}

fn ensure_len(segments: &mut Vec<String>, len: usize) {
    if segments.len() < len {
        segments.resize(len, String::new());
    }
}

fn merge_segments(current: &mut Vec<String>, incoming: Vec<String>) {
    ensure_len(current, incoming.len());
    for (slot, text) in current.iter_mut().zip(incoming) {
        keep_longer(slot, text);
    }
}

/// Accumulators are monotonic: a shorter snapshot never truncates streamed text.
pub(crate) fn keep_longer(current: &mut String, incoming: String) {
    if incoming.len() > current.len() {
        *current = incoming;
    }
}

fn replace_if_set(current: &mut String, incoming: String) {
    if !incoming.is_empty() {
        *current = incoming;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_user_message_content() {
        let item = Item::from_value(&json!({
            "type": "userMessage",
            "id": "u1",
            "content": [
                {"type": "text", "text": "hello"},
                {"type": "localImage", "path": "/tmp/a.png"}
            ]
        }))
        .unwrap();
        assert_eq!(item.text(), Some("hello"));
        match item.kind {
            ItemKind::UserMessage { images, .. } => assert_eq!(images, vec!["/tmp/a.png"]),
            other => panic!("Expected user message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_command_argv() {
        let item = Item::from_value(&json!({
            "type": "commandExecution",
            "id": "c1",
            "command": ["/bin/bash", "-lc", "cargo fmt"],
            "status": "completed",
            "exitCode": 0
        }))
        .unwrap();
        assert_eq!(item.status, ItemStatus::Completed);
        match item.kind {
            ItemKind::CommandExecution { command, exit_code, .. } => {
                assert_eq!(command, "cargo fmt");
                assert_eq!(exit_code, Some(0));
            }
            other => panic!("Expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_kept_as_other() {
        let item = Item::from_value(&json!({"type": "webSearch", "id": "w1", "query": "rust"}))
            .unwrap();
        assert!(matches!(item.kind, ItemKind::Other { ref item_type, .. } if item_type == "webSearch"));
        assert!(Item::from_value(&json!({"type": "agentMessage"})).is_none());
    }

    #[test]
    fn test_merge_never_truncates() {
        let mut item = Item::new("a1", ItemKind::AgentMessage { text: "Hello".into() });
        item.merge_from(Item::new("a1", ItemKind::empty_agent_message()));
        assert_eq!(item.text(), Some("Hello"));
        item.merge_from(Item::new("a1", ItemKind::AgentMessage { text: "Hello world".into() }));
        assert_eq!(item.text(), Some("Hello world"));
    }

    #[test]
    fn test_status_does_not_regress() {
        let mut item = Item::new("a1", ItemKind::empty_agent_message()).with_status(ItemStatus::Completed);
        item.merge_from(Item::new("a1", ItemKind::empty_agent_message()));
        assert_eq!(item.status, ItemStatus::Completed);
    }

    #[test]
    fn test_kind_fixed_after_classification() {
        let mut item = Item::new("x", ItemKind::AgentMessage { text: "hi".into() });
        item.merge_from(Item::new("x", ItemKind::empty_command()));
        assert_eq!(item.kind.name(), "agentMessage");
    }

    #[test]
    fn test_provisional_shell_takes_real_kind() {
        let mut item = Item::new("x", ItemKind::AgentMessage { text: "out".into() });
        item.provisional = true;
        item.merge_from(Item::new("x", ItemKind::empty_command()));
        assert!(!item.provisional);
        match item.kind {
            ItemKind::CommandExecution { output, .. } => assert_eq!(output, "out"),
            other => panic!("Expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_reasoning_slots_do_not_interleave() {
        let mut kind = ItemKind::empty_reasoning();
        kind.append_reasoning(ReasoningPart::Summary, 1, "B1");
        kind.append_reasoning(ReasoningPart::Summary, 0, "A1");
        kind.append_reasoning(ReasoningPart::Summary, 1, "B2");
        kind.append_reasoning(ReasoningPart::Summary, 0, "A2");
        match kind {
            ItemKind::Reasoning { summary, .. } => assert_eq!(summary, vec!["A1A2", "B1B2"]),
            other => panic!("Expected reasoning, got {:?}", other),
        }
    }

    #[test]
    fn test_change_kind_shapes() {
        assert_eq!(ChangeKind::from_value(&json!("add")), ChangeKind::Add);
        assert_eq!(ChangeKind::from_value(&json!({"type": "delete"})), ChangeKind::Delete);
        assert_eq!(
            ChangeKind::from_value(&json!({"update": {"move_path": null}})),
            ChangeKind::Update
        );
    }
}
