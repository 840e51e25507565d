//! Generic tool calls and their reclassification
//!
//! Tool calls are keyed by call id. Every upsert re-runs a static name
//! lookup: shell-like tools become command executions, patch tools become
//! file changes with the raw patch split into per-path hunks. The remap
//! happens once; later updates merge into the remapped kind.

use crate::protocol;
use crate::store::{
    command_text, text_or_json, ChangeKind, FileChangeEntry, Item, ItemKind, ItemStatus, Store,
    ToolCallInfo,
};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

const SHELL_TOOLS: &[&str] = &[
    "shell",
    "shell_command",
    "local_shell",
    "exec_command",
    "container.exec",
    "unified_exec",
    "bash",
    "run_command",
    "execute_command",
];

const PATCH_TOOLS: &[&str] = &["apply_patch", "applypatch", "patch", "edit_file"];

static PATCH_HEADER: OnceLock<Regex> = OnceLock::new();

fn patch_header() -> &'static Regex {
    PATCH_HEADER.get_or_init(|| Regex::new(r"^\*\*\* (Add|Update|Delete) File: (.+)$").unwrap())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolClass {
    Shell,
    Patch,
    Generic,
}

/// Classify a tool by name, ignoring case and any namespace prefix.
pub fn classify_tool(name: &str) -> ToolClass {
    let name = name.trim().to_ascii_lowercase();
    let base = name.rsplit('/').next().unwrap_or(&name);
    if SHELL_TOOLS.contains(&name.as_str()) || SHELL_TOOLS.contains(&base) {
        ToolClass::Shell
    } else if PATCH_TOOLS.contains(&name.as_str()) || PATCH_TOOLS.contains(&base) {
        ToolClass::Patch
    } else {
        ToolClass::Generic
    }
}

/// Split an apply-patch document into one entry per file section.
pub fn parse_patch(patch: &str) -> Vec<FileChangeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<(String, ChangeKind, Vec<&str>)> = None;

    for line in patch.lines() {
        if let Some(caps) = patch_header().captures(line) {
            if let Some(section) = current.take() {
                entries.push(finish_section(section));
            }
            let kind = match &caps[1] {
                "Add" => ChangeKind::Add,
                "Delete" => ChangeKind::Delete,
                _ => ChangeKind::Update,
            };
            current = Some((caps[2].trim().to_string(), kind, Vec::new()));
            continue;
        }
        if line.starts_with("*** Begin Patch")
            || line.starts_with("*** End Patch")
            || line.starts_with("*** Move to:")
            || line.starts_with("*** End of File")
        {
            continue;
        }
        if let Some((_, _, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    if let Some(section) = current {
        entries.push(finish_section(section));
    }
    entries
}

fn finish_section((path, kind, lines): (String, ChangeKind, Vec<&str>)) -> FileChangeEntry {
    let mut diff = lines.join("\n");
    if !diff.is_empty() {
        diff.push('\n');
    }
    FileChangeEntry { path, kind, diff }
}

/// Upsert a generic tool call from `item/toolCall/*`.
pub(super) fn apply(store: &mut Store, thread_id: &str, params: &Value, default_status: ItemStatus) -> bool {
    let payload = params.get("toolCall").unwrap_or(params);
    let Some(call_id) = protocol::str_field(payload, &["callId", "call_id"])
        .or_else(|| protocol::item_id_of(params))
    else {
        debug!("Dropping tool call without a call id");
        return false;
    };
    let item_id = protocol::item_id_of(params).unwrap_or(call_id);
    let info = ToolCallInfo {
        call_id: call_id.to_string(),
        name: protocol::str_field(payload, &["name", "tool"])
            .unwrap_or_default()
            .to_string(),
        arguments: text_or_json(payload.get("arguments")),
        input: text_or_json(payload.get("input")),
        output: text_or_json(payload.get("output").or_else(|| payload.get("result"))),
    };
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .and_then(ItemStatus::parse)
        .unwrap_or(default_status);

    let Some(turn_id) = resolve_turn(store, thread_id, params, call_id, item_id) else {
        debug!("Dropping tool call {} with no turn to hold it", call_id);
        return false;
    };
    let Some(thread) = store.thread_mut(thread_id) else {
        return false;
    };
    let turn = thread.ensure_turn(&turn_id);

    let existing = turn
        .items
        .iter()
        .position(|item| item.call_id.as_deref() == Some(call_id) || item.id == item_id);
    let item = match existing {
        Some(index) => {
            let item = &mut turn.items[index];
            item.status = item.status.merge(status);
            match &mut item.tool {
                Some(tool) => tool.merge_from(info.clone()),
                None => item.tool = Some(info.clone()),
            }
            if let ItemKind::ToolCall(call) = &mut item.kind {
                call.merge_from(info);
            }
            item.call_id.get_or_insert_with(|| call_id.to_string());
            item
        }
        None => {
            let mut item = Item::new(item_id, ItemKind::ToolCall(info.clone())).with_status(status);
            item.call_id = Some(call_id.to_string());
            item.tool = Some(info);
            turn.items.push(item);
            let index = turn.items.len() - 1;
            &mut turn.items[index]
        }
    };
    refresh(item);
    true
}

fn resolve_turn(store: &Store, thread_id: &str, params: &Value, call_id: &str, item_id: &str) -> Option<String> {
    if let Some(turn_id) = protocol::turn_id_of(params) {
        return Some(turn_id.to_string());
    }
    let thread = store.thread(thread_id)?;
    thread
        .turns
        .iter()
        .rev()
        .find(|turn| {
            turn.items
                .iter()
                .any(|item| item.call_id.as_deref() == Some(call_id) || item.id == item_id)
        })
        .or_else(|| thread.turns.last())
        .map(|turn| turn.id.clone())
}

/// Re-derive the item kind from its raw tool fields.
pub(crate) fn refresh(item: &mut Item) {
    let tool = match (&item.tool, &item.kind) {
        (Some(tool), _) => tool.clone(),
        (None, ItemKind::ToolCall(call)) => call.clone(),
        (None, _) => return,
    };
    if item.tool.is_none() {
        item.tool = Some(tool.clone());
    }
    let derived = match classify_tool(&tool.name) {
        ToolClass::Shell => command_kind(&tool),
        ToolClass::Patch => patch_kind(&tool),
        ToolClass::Generic => return,
    };

    if matches!(item.kind, ItemKind::ToolCall(_)) {
        debug!(
            "Reclassifying tool call {} ({}) as {}",
            tool.call_id,
            tool.name,
            derived.name()
        );
        item.kind = derived;
    } else if item.kind.same_variant(&derived) {
        item.kind.merge_from(derived);
    }
}

fn command_kind(tool: &ToolCallInfo) -> ItemKind {
    let args: Value = serde_json::from_str(&tool.arguments).unwrap_or(Value::Null);
    let command = args
        .get("command")
        .or_else(|| args.get("cmd"))
        .map(|command| command_text(Some(command)))
        .filter(|command| !command.is_empty())
        .or_else(|| Some(tool.input.clone()).filter(|input| !input.is_empty()))
        .unwrap_or_else(|| {
            if args.is_object() {
                String::new()
            } else {
                tool.arguments.clone()
            }
        });
    let cwd = protocol::str_field(&args, &["workdir", "cwd"]).map(String::from);

    // Shell tools often wrap their result as {"output": ..., "metadata": {...}}
    let result: Value = serde_json::from_str(&tool.output).unwrap_or(Value::Null);
    let output = result
        .get("output")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| tool.output.clone());
    let metadata = result.get("metadata").unwrap_or(&result);
    let exit_code = metadata
        .get("exit_code")
        .or_else(|| metadata.get("exitCode"))
        .and_then(Value::as_i64);
    let duration_ms = metadata
        .get("duration_seconds")
        .and_then(Value::as_f64)
        .map(|secs| (secs * 1000.0) as i64);

    ItemKind::CommandExecution {
        command,
        cwd,
        output,
        exit_code,
        duration_ms,
    }
}

fn patch_kind(tool: &ToolCallInfo) -> ItemKind {
    let args: Value = serde_json::from_str(&tool.arguments).unwrap_or(Value::Null);
    let patch = if !tool.input.is_empty() {
        tool.input.clone()
    } else if let Some(patch) = protocol::str_field(&args, &["input", "patch"]) {
        patch.to_string()
    } else {
        tool.arguments.clone()
    };
    ItemKind::FileChange {
        changes: parse_patch(&patch),
        output: tool.output.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::apply as reduce;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tracked() -> Store {
        let mut store = Store::new();
        reduce(&mut store, "thread/started", &json!({"thread": {"id": "t1"}}));
        store
    }

    fn items(store: &Store) -> &[Item] {
        &store.thread("t1").unwrap().turns[0].items
    }

    #[test]
    fn test_classify_tool() {
        assert_eq!(classify_tool("shell_command"), ToolClass::Shell);
        assert_eq!(classify_tool("Container.Exec"), ToolClass::Shell);
        assert_eq!(classify_tool("apply_patch"), ToolClass::Patch);
        assert_eq!(classify_tool("functions/apply_patch"), ToolClass::Patch);
        assert_eq!(classify_tool("web_search"), ToolClass::Generic);
    }

    #[test]
    fn test_parse_patch_multiple_files() {
        let patch = "*** Begin Patch\n*** Add File: new.txt\n+hello\n*** Update File: src/lib.rs\n@@ fn main\n-a\n+b\n*** Delete File: old.txt\n*** End Patch\n";
        let entries = parse_patch(patch);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].path, "new.txt");
        assert_eq!(entries[0].kind, ChangeKind::Add);
        assert_eq!(entries[0].diff, "+hello\n");
        assert_eq!(entries[1].path, "src/lib.rs");
        assert_eq!(entries[1].diff, "@@ fn main\n-a\n+b\n");
        assert_eq!(entries[2].kind, ChangeKind::Delete);
        assert_eq!(entries[2].diff, "");
    }

    #[test]
    fn test_shell_tool_becomes_command() {
        let mut store = tracked();
        reduce(
            &mut store,
            "item/toolCall/completed",
            &json!({
                "threadId": "t1", "turnId": "a", "callId": "c1",
                "name": "shell_command", "arguments": "{\"command\":\"ls\"}", "output": "a.txt\n"
            }),
        );
        let item = &items(&store)[0];
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.call_id.as_deref(), Some("c1"));
        match &item.kind {
            ItemKind::CommandExecution { command, output, .. } => {
                assert_eq!(command, "ls");
                assert_eq!(output, "a.txt\n");
            }
            other => panic!("Expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_patch_tool_becomes_file_change() {
        let mut store = tracked();
        reduce(
            &mut store,
            "item/toolCall/completed",
            &json!({
                "threadId": "t1", "turnId": "a", "callId": "c2",
                "name": "apply_patch", "input": "*** Update File: a.txt\n@@\n-old\n+new\n"
            }),
        );
        match &items(&store)[0].kind {
            ItemKind::FileChange { changes, .. } => {
                assert_eq!(
                    changes,
                    &vec![FileChangeEntry {
                        path: "a.txt".to_string(),
                        kind: ChangeKind::Update,
                        diff: "@@\n-old\n+new\n".to_string(),
                    }]
                );
            }
            other => panic!("Expected file change, got {:?}", other),
        }
    }

    #[test]
    fn test_remapped_item_keeps_merging_updates() {
        let mut store = tracked();
        let base = json!({
            "threadId": "t1", "turnId": "a", "callId": "c1",
            "name": "exec_command", "arguments": {"cmd": ["bash", "-lc", "cargo test"], "workdir": "/repo"}
        });
        reduce(&mut store, "item/toolCall/started", &base);
        let mut done = base.clone();
        done["output"] = json!({"output": "ok\n", "metadata": {"exit_code": 0, "duration_seconds": 1.5}});
        reduce(&mut store, "item/toolCall/completed", &done);
        reduce(&mut store, "item/toolCall/updated", &base);

        let items = items(&store);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, ItemStatus::Completed);
        match &items[0].kind {
            ItemKind::CommandExecution {
                command,
                cwd,
                output,
                exit_code,
                duration_ms,
            } => {
                assert_eq!(command, "cargo test");
                assert_eq!(cwd.as_deref(), Some("/repo"));
                assert_eq!(output, "ok\n");
                assert_eq!(*exit_code, Some(0));
                assert_eq!(*duration_ms, Some(1500));
            }
            other => panic!("Expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_tool_stays_tool_call() {
        let mut store = tracked();
        reduce(
            &mut store,
            "item/toolCall/completed",
            &json!({"threadId": "t1", "turnId": "a", "callId": "c3", "name": "web_search", "arguments": {"q": "rust"}}),
        );
        match &items(&store)[0].kind {
            ItemKind::ToolCall(call) => {
                assert_eq!(call.name, "web_search");
                assert_eq!(call.arguments, "{\"q\":\"rust\"}");
            }
            other => panic!("Expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_item_from_item_started_is_classified() {
        let mut store = tracked();
        reduce(
            &mut store,
            "item/completed",
            &json!({"threadId": "t1", "turnId": "a", "item": {
                "id": "i9", "type": "toolCall", "callId": "c9", "name": "shell", "arguments": "{\"command\":[\"ls\",\"-la\"]}"
            }}),
        );
        match &items(&store)[0].kind {
            ItemKind::CommandExecution { command, .. } => assert_eq!(command, "ls -la"),
            other => panic!("Expected command, got {:?}", other),
        }
    }
}
