//! Hydration of persisted transcripts into live turns
//!
//! Persisted turns are paired with live ones by id, falling back to a
//! content signature (normalized, truncated user and agent text) because
//! ids can drift across resume and fork. Pairing by content is best effort:
//! two turns with near-identical prompts can be mis-paired.

use crate::protocol::{self, methods};
use crate::reducer;
use crate::session::{NoticeLevel, SessionController, StoreEvent};
use crate::store::{Item, ItemStatus, ThreadDetail, ThreadSummary, Turn, TurnError, TurnPlan, TurnStatus};
use crate::transport::AgentTransport;
use crate::Result;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info};

/// Characters of normalized text compared when pairing by content
const SIGNATURE_CHARS: usize = 160;

/// What a merge did, for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub matched_by_id: usize,
    pub matched_by_signature: usize,
    pub inserted_turns: usize,
    pub injected_items: usize,
}

impl fmt::Display for MergeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} turn(s) matched by id, {} by content, {} inserted, {} item(s) injected",
            self.matched_by_id, self.matched_by_signature, self.inserted_turns, self.injected_items
        )
    }
}

/// Parse the `turns` array of a persisted thread.
pub fn parse_turns(thread: &Value) -> Vec<Turn> {
    thread
        .get("turns")
        .and_then(Value::as_array)
        .map(|turns| turns.iter().filter_map(parse_turn).collect())
        .unwrap_or_default()
}

fn parse_turn(value: &Value) -> Option<Turn> {
    let id = value.get("id").and_then(Value::as_str)?;
    let status = value
        .get("status")
        .and_then(Value::as_str)
        .and_then(TurnStatus::parse)
        .unwrap_or(TurnStatus::Completed);
    let mut turn = Turn::new(id).with_status(status);
    turn.plan = TurnPlan::from_value(value).filter(|plan| !plan.is_empty());
    turn.diff = value
        .get("diff")
        .and_then(Value::as_str)
        .filter(|diff| !diff.is_empty())
        .map(String::from);
    turn.error = value
        .get("error")
        .filter(|error| !error.is_null())
        .and_then(TurnError::from_value);

    for raw in value.get("items").and_then(Value::as_array).into_iter().flatten() {
        let Some(mut item) = Item::from_value(raw) else {
            continue;
        };
        if raw.get("status").is_none() {
            item.status = ItemStatus::Completed;
        }
        if item.tool.is_some() {
            reducer::reclassify(&mut item);
        }
        turn.upsert_item(item);
    }
    Some(turn)
}

#[derive(Debug, PartialEq)]
struct Signature {
    user: String,
    agent: String,
}

impl Signature {
    /// Turns without user text have no usable signature.
    fn of(turn: &Turn) -> Option<Signature> {
        let user = normalize(&turn.user_text());
        if user.is_empty() {
            return None;
        }
        Some(Signature {
            user,
            agent: normalize(&turn.agent_text()),
        })
    }

    /// Agent text only counts when both sides have some.
    fn matches(&self, other: &Signature) -> bool {
        self.user == other.user
            && (self.agent.is_empty() || other.agent.is_empty() || self.agent == other.agent)
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(SIGNATURE_CHARS)
        .collect()
}

/// Merge persisted turns into a thread. Unpaired persisted turns are placed
/// after the last paired one so history stays ahead of live-only turns.
pub fn merge_transcript(thread: &mut ThreadDetail, persisted: Vec<Turn>) -> MergeStats {
    let mut stats = MergeStats::default();
    let mut paired = vec![false; thread.turns.len()];
    let mut cursor = 0;

    for incoming in persisted {
        let by_id = thread.turns.iter().position(|turn| turn.id == incoming.id);
        let index = match by_id {
            Some(index) => {
                stats.matched_by_id += 1;
                Some(index)
            }
            None => {
                let found = Signature::of(&incoming).and_then(|signature| {
                    thread.turns.iter().enumerate().position(|(index, turn)| {
                        !paired[index]
                            && Signature::of(turn).is_some_and(|live| live.matches(&signature))
                    })
                });
                if found.is_some() {
                    stats.matched_by_signature += 1;
                }
                found
            }
        };

        match index {
            Some(index) => {
                debug!("Pairing persisted turn {} with {}", incoming.id, thread.turns[index].id);
                stats.injected_items += merge_turn(&mut thread.turns[index], incoming);
                paired[index] = true;
                cursor = cursor.max(index + 1);
            }
            None => {
                let at = cursor.min(thread.turns.len());
                thread.turns.insert(at, incoming);
                paired.insert(at, true);
                cursor = at + 1;
                stats.inserted_turns += 1;
            }
        }
    }
    stats
}

/// Fill a live turn from its persisted copy without overwriting live data.
fn merge_turn(live: &mut Turn, persisted: Turn) -> usize {
    live.status = live.status.merge(persisted.status);
    if live.plan.is_none() {
        live.plan = persisted.plan;
    }
    if live.diff.is_none() {
        live.diff = persisted.diff;
    }
    if live.error.is_none() {
        live.error = persisted.error;
    }

    // Nothing streamed beyond markers: take the whole transcript
    if live.items.iter().all(|item| item.kind.is_marker()) {
        let mut added = 0;
        for item in persisted.items {
            if live.item(&item.id).is_none() {
                live.items.push(item);
                added += 1;
            }
        }
        return added;
    }

    if live.has_tool_items() {
        return 0;
    }
    let tools: Vec<Item> = persisted
        .items
        .into_iter()
        .filter(|item| item.kind.is_tool_like() && live.item(&item.id).is_none())
        .collect();
    let at = live
        .items
        .iter()
        .rposition(Item::is_agent_message)
        .unwrap_or(live.items.len());
    let added = tools.len();
    for (offset, item) in tools.into_iter().enumerate() {
        live.items.insert(at + offset, item);
    }
    added
}

impl<T: AgentTransport> SessionController<T> {
    /// Focus a thread and, the first time, merge its persisted transcript.
    /// A failed read is reported once; the thread keeps its live state.
    pub async fn open_thread(&mut self, thread_id: &str) -> Result<()> {
        self.store.active_thread = Some(thread_id.to_string());
        self.emit(StoreEvent::ThreadsChanged);
        if self.store.hydrated.contains(thread_id) {
            debug!("Thread {} already hydrated", thread_id);
            return Ok(());
        }

        let path = self.store.summary(thread_id).and_then(|s| s.path.clone());
        let params = protocol::thread_read_params(thread_id, path.as_deref());
        let response = match self.transport.request(methods::THREAD_READ, params).await {
            Ok(response) => response,
            Err(e) => {
                self.notice(
                    NoticeLevel::Warning,
                    Some(thread_id),
                    format!("Could not load history for thread {}: {}", thread_id, e),
                );
                return Err(e);
            }
        };

        let thread = response.get("thread").unwrap_or(&response);
        if let Some(summary) = ThreadSummary::from_value(thread) {
            self.store.upsert_summary(summary);
        }
        let persisted = parse_turns(thread);
        let stats = merge_transcript(self.store.ensure_thread(thread_id), persisted);
        self.store.hydrated.insert(thread_id.to_string());
        info!("Hydrated thread {}: {}", thread_id, stats);
        self.emit(StoreEvent::ThreadChanged {
            thread_id: thread_id.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ItemKind;
    use crate::transport::testing::RecordingTransport;
    use crate::SessionConfig;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn persisted_turn(id: &str, user: &str, agent: &str, with_tool: bool) -> Value {
        let mut items = vec![json!({"type": "userMessage", "id": format!("{id}-u"), "content": [{"type": "text", "text": user}]})];
        if with_tool {
            items.push(json!({
                "type": "commandExecution", "id": format!("{id}-c"), "command": "ls",
                "aggregatedOutput": "a.txt\n", "exitCode": 0
            }));
        }
        items.push(json!({"type": "agentMessage", "id": format!("{id}-m"), "text": agent}));
        json!({"id": id, "status": "completed", "items": items})
    }

    fn live_turn(id: &str, user: &str, agent: &str) -> Turn {
        let mut turn = Turn::new(id).with_status(TurnStatus::Completed);
        turn.items.push(Item::new(
            format!("{id}-live-u"),
            ItemKind::UserMessage {
                text: user.to_string(),
                images: vec![],
            },
        ));
        turn.items.push(Item::new(
            format!("{id}-live-m"),
            ItemKind::AgentMessage {
                text: agent.to_string(),
            },
        ));
        turn
    }

    #[test]
    fn test_parse_turns_defaults() {
        let turns = parse_turns(&json!({"turns": [
            persisted_turn("a", "hi", "hello", true),
            {"items": []},
            {"id": "b", "status": "interrupted", "items": [{"type": "toolCall", "id": "x", "name": "apply_patch", "input": "*** Add File: n.txt\n+1\n"}]}
        ]}));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].items.len(), 3);
        assert_eq!(turns[0].items[0].status, ItemStatus::Completed);
        assert_eq!(turns[1].status, TurnStatus::Completed);
        assert!(matches!(turns[1].items[0].kind, ItemKind::FileChange { .. }));
    }

    #[test]
    fn test_tools_injected_before_final_answer() {
        let mut thread = ThreadDetail::new("t1");
        thread.turns.push(live_turn("a", "list files", "done"));
        let persisted = parse_turns(&json!({"turns": [persisted_turn("a", "list files", "done", true)]}));

        let stats = merge_transcript(&mut thread, persisted);
        assert_eq!(stats.matched_by_id, 1);
        assert_eq!(stats.injected_items, 1);
        let kinds: Vec<&str> = thread.turns[0].items.iter().map(|i| i.kind.name()).collect();
        assert_eq!(kinds, vec!["userMessage", "commandExecution", "agentMessage"]);
    }

    #[test]
    fn test_live_tools_never_overwritten() {
        let mut thread = ThreadDetail::new("t1");
        let mut turn = live_turn("a", "list files", "done");
        turn.items.insert(1, Item::new("live-c", ItemKind::empty_command()));
        thread.turns.push(turn);
        let persisted = parse_turns(&json!({"turns": [persisted_turn("a", "list files", "done", true)]}));

        merge_transcript(&mut thread, persisted);
        assert_eq!(thread.turns[0].items.len(), 3);
        assert_eq!(thread.turns[0].items[1].id, "live-c");
    }

    #[test]
    fn test_signature_pairs_drifted_ids() {
        let mut thread = ThreadDetail::new("t1");
        thread.turns.push(live_turn("local-a", "  Fix   the bug ", ""));
        let persisted = parse_turns(&json!({"turns": [persisted_turn("srv-a", "Fix the bug", "fixed", true)]}));

        let stats = merge_transcript(&mut thread, persisted);
        assert_eq!(stats.matched_by_signature, 1);
        assert_eq!(thread.turns.len(), 1);
        assert!(thread.turns[0].has_tool_items());
    }

    #[test]
    fn test_agent_text_mismatch_blocks_pairing() {
        let mut thread = ThreadDetail::new("t1");
        thread.turns.push(live_turn("x", "again", "first answer"));
        let persisted = parse_turns(&json!({"turns": [persisted_turn("y", "again", "second answer", false)]}));

        let stats = merge_transcript(&mut thread, persisted);
        assert_eq!(stats.inserted_turns, 1);
        assert_eq!(thread.turns[0].id, "y");
        assert_eq!(thread.turns[1].id, "x");
    }

    #[test]
    fn test_marker_only_turn_takes_transcript() {
        let mut thread = ThreadDetail::new("t1");
        let mut turn = Turn::new("a");
        turn.items.push(Item::new("a:diff", ItemKind::TurnDiff { diff: "d".into() }));
        thread.turns.push(turn);
        let persisted = parse_turns(&json!({"turns": [persisted_turn("a", "hi", "hello", false)]}));

        merge_transcript(&mut thread, persisted);
        assert_eq!(thread.turns[0].items.len(), 3);
        assert_eq!(thread.turns[0].status, TurnStatus::Completed);
    }

    #[tokio::test]
    async fn test_open_thread_hydrates_once() {
        let transport = RecordingTransport::default().reply(
            "thread/read",
            json!({"thread": {"id": "t1", "preview": "hi", "turns": [persisted_turn("a", "hi", "hello", false)]}}),
        );
        let mut session = SessionController::new(transport, SessionConfig::new("/repo".into()));

        session.open_thread("t1").await.unwrap();
        session.open_thread("t1").await.unwrap();
        assert_eq!(session.transport().methods(), vec!["thread/read"]);
        let thread = session.store().thread("t1").unwrap();
        assert_eq!(thread.turns.len(), 1);
        assert_eq!(thread.preview, "hi");
    }

    #[tokio::test]
    async fn test_open_thread_failure_keeps_thread_usable() {
        let transport = RecordingTransport::default().fail("thread/read", "rollout missing");
        let mut session = SessionController::new(transport, SessionConfig::new("/repo".into()));
        let mut events = session.subscribe();

        assert!(session.open_thread("t1").await.is_err());
        assert_eq!(session.store().active_thread.as_deref(), Some("t1"));
        assert!(!session.store().hydrated.contains("t1"));
        assert_eq!(events.try_recv().unwrap(), StoreEvent::ThreadsChanged);
        assert!(matches!(events.try_recv().unwrap(), StoreEvent::Notice(_)));
    }
}
