//! Streaming deltas: append-only fragments targeting one item's accumulator

use crate::protocol::{self, notifications};
use crate::store::{Item, ItemKind, ReasoningPart, Store, MAX_REASONING_SEGMENTS};
use serde_json::Value;
use tracing::{debug, warn};

/// Kind guessed for an item first seen through an unrecognized delta method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredKind {
    CommandExecution,
    AgentMessage,
}

impl InferredKind {
    fn from_method(method: &str) -> Self {
        let method = method.to_ascii_lowercase();
        if ["command", "exec", "output", "terminal"]
            .iter()
            .any(|hint| method.contains(hint))
        {
            InferredKind::CommandExecution
        } else {
            InferredKind::AgentMessage
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaRoute {
    AgentMessage,
    CommandOutput,
    Reasoning { part: ReasoningPart },
    SummaryPartAdded,
    /// Any other method mentioning "delta"; the raw method is kept for logging
    Unknown { method: String, inferred: InferredKind },
}

impl DeltaRoute {
    fn shell_kind(&self) -> ItemKind {
        match self {
            DeltaRoute::AgentMessage
            | DeltaRoute::Unknown {
                inferred: InferredKind::AgentMessage,
                ..
            } => ItemKind::empty_agent_message(),
            DeltaRoute::CommandOutput
            | DeltaRoute::Unknown {
                inferred: InferredKind::CommandExecution,
                ..
            } => ItemKind::empty_command(),
            DeltaRoute::Reasoning { .. } | DeltaRoute::SummaryPartAdded => {
                ItemKind::empty_reasoning()
            }
        }
    }

    /// Payload key addressing a reasoning segment.
    fn index_key(&self) -> Option<&'static str> {
        match self {
            DeltaRoute::Reasoning {
                part: ReasoningPart::Content,
            } => Some("contentIndex"),
            DeltaRoute::Reasoning {
                part: ReasoningPart::Summary,
            }
            | DeltaRoute::SummaryPartAdded => Some("summaryIndex"),
            _ => None,
        }
    }
}

pub fn route(method: &str) -> Option<DeltaRoute> {
    use notifications::*;

    let route = match method {
        AGENT_MESSAGE_DELTA => DeltaRoute::AgentMessage,
        COMMAND_OUTPUT_DELTA => DeltaRoute::CommandOutput,
        REASONING_TEXT_DELTA => DeltaRoute::Reasoning {
            part: ReasoningPart::Content,
        },
        REASONING_SUMMARY_TEXT_DELTA => DeltaRoute::Reasoning {
            part: ReasoningPart::Summary,
        },
        REASONING_SUMMARY_PART_ADDED => DeltaRoute::SummaryPartAdded,
        m if m.to_ascii_lowercase().contains("delta") => DeltaRoute::Unknown {
            method: m.to_string(),
            inferred: InferredKind::from_method(m),
        },
        _ => return None,
    };
    Some(route)
}

/// Append one delta, creating an in-progress shell item on first sight.
pub(super) fn apply(store: &mut Store, thread_id: &str, route: DeltaRoute, params: &Value) -> bool {
    let Some(item_id) = protocol::item_id_of(params) else {
        debug!("Dropping delta without an item id");
        return false;
    };
    let delta = protocol::str_field(params, &["delta", "text"]).unwrap_or_default();
    if delta.is_empty() && route != DeltaRoute::SummaryPartAdded {
        return false;
    }
    let segment = match route.index_key() {
        Some(key) => match segment_index(params, key) {
            Some(index) => index,
            None => return false,
        },
        None => 0,
    };
    let Some(turn_id) = super::resolve_turn_id(store, thread_id, params, Some(item_id)) else {
        debug!("Dropping delta for item {} with no turn to hold it", item_id);
        return false;
    };
    let Some(thread) = store.thread_mut(thread_id) else {
        return false;
    };
    let turn = thread.ensure_turn(&turn_id);

    let index = match turn.items.iter().position(|item| item.id == item_id) {
        Some(index) => index,
        None => {
            let mut shell = Item::new(item_id, route.shell_kind());
            if let DeltaRoute::Unknown { method, inferred } = &route {
                warn!(
                    "Unknown delta method {}, treating item {} as {:?} until classified",
                    method, item_id, inferred
                );
                shell.provisional = true;
            }
            turn.items.push(shell);
            turn.items.len() - 1
        }
    };
    let item = &mut turn.items[index];

    // A recognized delta method pins down the kind of a guessed shell.
    if item.provisional && !matches!(route, DeltaRoute::Unknown { .. }) {
        item.merge_from(Item::new(item_id, route.shell_kind()));
    }

    if item.is_settled() {
        debug!(
            "Dropping {} delta for settled item {}",
            item.kind.name(),
            item_id
        );
        return false;
    }

    if let Some(seq) = params
        .get("seq")
        .or_else(|| params.get("sequence"))
        .and_then(Value::as_u64)
    {
        if !item.mark_seq(seq) {
            debug!("Dropping duplicate delta #{} for item {}", seq, item_id);
            return false;
        }
    }

    match route {
        DeltaRoute::Reasoning { part } => item.kind.append_reasoning(part, segment, delta),
        DeltaRoute::SummaryPartAdded => item.kind.add_summary_part(segment),
        DeltaRoute::AgentMessage | DeltaRoute::CommandOutput | DeltaRoute::Unknown { .. } => {
            match item.kind.accumulator_mut() {
                Some(text) => {
                    text.push_str(delta);
                    true
                }
                None => {
                    debug!("Item {} ({}) has no text to append to", item_id, item.kind.name());
                    false
                }
            }
        }
    }
}

/// Reasoning segment index, defaulting to 0. Out-of-range indexes are dropped.
fn segment_index(params: &Value, key: &str) -> Option<usize> {
    let Some(raw) = params
        .get(key)
        .or_else(|| params.get("index"))
        .filter(|raw| !raw.is_null())
    else {
        return Some(0);
    };
    match raw.as_u64().and_then(|index| usize::try_from(index).ok()) {
        Some(index) if index < MAX_REASONING_SEGMENTS => Some(index),
        _ => {
            warn!("Dropping reasoning delta with {} {}", key, raw);
            None
        }
    }
}
