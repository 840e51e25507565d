//! Notification reducer
//!
//! `apply` routes one `{method, params}` notification to a merge rule and
//! mutates the store in place. Every rule is idempotent and tolerates the
//! events of one turn arriving in any order: items may precede their turn,
//! deltas may precede their item, and terminal snapshots never erase data
//! that was streamed in the meantime. Malformed payloads are ignored field
//! by field; the reducer never fails.

mod deltas;
mod tool_calls;

pub use deltas::{DeltaRoute, InferredKind};
pub use tool_calls::{classify_tool, parse_patch, ToolClass};
pub(crate) use tool_calls::refresh as reclassify;

use crate::approvals;
use crate::protocol::{self, notifications, RequestId};
use crate::session::{Notice, NoticeLevel, StoreEvent};
use crate::store::{
    Item, ItemKind, ItemStatus, RateLimits, Store, ThreadSummary, TokenUsage, Turn, TurnError,
    TurnPlan, TurnStatus,
};
use serde_json::Value;
use tracing::debug;

/// Merge rule selected for a notification method
#[derive(Debug, Clone, PartialEq)]
enum Route {
    ThreadStarted,
    ThreadLabels,
    TokenUsage,
    RateLimits,
    Approval,
    TurnStarted,
    TurnCompleted,
    PlanUpdated,
    DiffUpdated,
    TurnError,
    ServerError,
    ItemUpsert { default_status: ItemStatus },
    ToolCall { default_status: ItemStatus },
    Delta(DeltaRoute),
}

fn route(method: &str) -> Option<Route> {
    use notifications::*;

    let route = match method {
        THREAD_STARTED => Route::ThreadStarted,
        THREAD_PREVIEW_UPDATED | THREAD_NAME_UPDATED => Route::ThreadLabels,
        TURN_STARTED => Route::TurnStarted,
        TURN_COMPLETED => Route::TurnCompleted,
        TURN_PLAN_UPDATED | TURN_PLAN_UPDATED_ALT => Route::PlanUpdated,
        TURN_DIFF_UPDATED | TURN_DIFF_UPDATED_ALT => Route::DiffUpdated,
        TURN_ERROR => Route::TurnError,
        ERROR => Route::ServerError,
        ITEM_COMPLETED => Route::ItemUpsert {
            default_status: ItemStatus::Completed,
        },
        ITEM_STARTED | ITEM_UPDATED | ITEM_ADDED => Route::ItemUpsert {
            default_status: ItemStatus::InProgress,
        },
        TOOL_CALL_COMPLETED => Route::ToolCall {
            default_status: ItemStatus::Completed,
        },
        TOOL_CALL_STARTED | TOOL_CALL_UPDATED => Route::ToolCall {
            default_status: ItemStatus::InProgress,
        },
        m if protocol::is_token_usage_method(m) => Route::TokenUsage,
        m if protocol::is_rate_limits_method(m) => Route::RateLimits,
        m if protocol::is_approval_method(m) => Route::Approval,
        m => Route::Delta(deltas::route(m)?),
    };
    Some(route)
}

/// Apply one notification to the store. Returns what changed, if anything.
pub fn apply(store: &mut Store, method: &str, params: &Value) -> Option<StoreEvent> {
    let Some(route) = route(method) else {
        debug!("Ignoring unrecognized notification {}", method);
        return None;
    };

    // Account-wide, thread-creating and approval events bypass admission.
    match route {
        Route::ThreadStarted => return thread_started(store, params),
        Route::RateLimits => return rate_limits(store, params),
        Route::Approval => return approval_requested(store, method, params),
        _ => {}
    }

    let thread_id = protocol::thread_id_of(params)
        .map(String::from)
        .or_else(|| store.active_thread.clone())?;
    if !store.admits(&thread_id) {
        debug!("Ignoring {} for untracked thread {}", method, thread_id);
        return None;
    }

    if route == Route::TokenUsage {
        return token_usage(store, thread_id, params);
    }
    store.ensure_thread(&thread_id);

    let changed = match route {
        Route::ThreadLabels => return thread_labels(store, &thread_id, params),
        Route::ServerError => return server_error(store, &thread_id, params),
        Route::TurnStarted => turn_snapshot(store, &thread_id, params, TurnStatus::InProgress),
        Route::TurnCompleted => turn_snapshot(store, &thread_id, params, TurnStatus::Completed),
        Route::PlanUpdated => plan_updated(store, &thread_id, params),
        Route::DiffUpdated => diff_updated(store, &thread_id, params),
        Route::TurnError => turn_error(store, &thread_id, params),
        Route::ItemUpsert { default_status } => {
            item_upsert(store, &thread_id, params, default_status)
        }
        Route::ToolCall { default_status } => {
            tool_calls::apply(store, &thread_id, params, default_status)
        }
        Route::Delta(delta) => deltas::apply(store, &thread_id, delta, params),
        Route::ThreadStarted | Route::RateLimits | Route::Approval | Route::TokenUsage => false,
    };

    changed.then_some(StoreEvent::ThreadChanged { thread_id })
}

/// Insert or merge an item into a turn. Server user messages replace the
/// local echo and name the thread when it has no title yet.
pub(crate) fn upsert_item(store: &mut Store, thread_id: &str, turn_id: &str, item: Item) {
    let authoritative_user = item.is_user_message() && !item.optimistic;
    let thread = store.ensure_thread(thread_id);
    let title = if authoritative_user {
        item.text().and_then(|text| thread.derive_title(text))
    } else {
        None
    };

    let turn = thread.ensure_turn(turn_id);
    if authoritative_user {
        let purged = turn.purge_optimistic_user_messages();
        if purged > 0 {
            debug!("Replaced {} optimistic user message(s) in turn {}", purged, turn_id);
        }
    }
    let index = turn.upsert_item(item);
    if turn.items[index].tool.is_some() {
        tool_calls::refresh(&mut turn.items[index]);
    }

    if let Some(title) = title {
        if let Some(summary) = store.summaries.iter_mut().find(|s| s.id == thread_id) {
            summary.title.get_or_insert(title);
        }
    }
}

/// Turn an item notification refers to: explicit id, else the turn already
/// holding the item, else the newest turn.
fn resolve_turn_id(store: &Store, thread_id: &str, params: &Value, item_id: Option<&str>) -> Option<String> {
    if let Some(turn_id) = protocol::turn_id_of(params) {
        return Some(turn_id.to_string());
    }
    let thread = store.thread(thread_id)?;
    item_id
        .and_then(|id| thread.turns.iter().rev().find(|turn| turn.item(id).is_some()))
        .or_else(|| thread.turns.last())
        .map(|turn| turn.id.clone())
}

fn thread_started(store: &mut Store, params: &Value) -> Option<StoreEvent> {
    let summary = params
        .get("thread")
        .and_then(ThreadSummary::from_value)
        .or_else(|| protocol::thread_id_of(params).map(ThreadSummary::new))?;
    let thread_id = summary.id.clone();
    store.upsert_summary(summary);
    store.ensure_thread(&thread_id);
    Some(StoreEvent::ThreadsChanged)
}

fn thread_labels(store: &mut Store, thread_id: &str, params: &Value) -> Option<StoreEvent> {
    let title = protocol::str_field(params, &["title", "threadName", "name"])
        .filter(|title| !title.is_empty())
        .map(String::from);
    let preview = protocol::str_field(params, &["preview"]).map(String::from);
    if title.is_none() && preview.is_none() {
        return None;
    }
    store.set_thread_labels(thread_id, title, preview);
    Some(StoreEvent::ThreadsChanged)
}

fn token_usage(store: &mut Store, thread_id: String, params: &Value) -> Option<StoreEvent> {
    let payload = params
        .get("tokenUsage")
        .or_else(|| params.get("usage"))
        .unwrap_or(params);
    let usage: TokenUsage = serde_json::from_value(payload.clone()).ok()?;
    store.token_usage.insert(thread_id.clone(), usage);
    Some(StoreEvent::MetricsChanged {
        thread_id: Some(thread_id),
    })
}

fn rate_limits(store: &mut Store, params: &Value) -> Option<StoreEvent> {
    let payload = params.get("rateLimits").unwrap_or(params);
    let limits: RateLimits = serde_json::from_value(payload.clone()).ok()?;
    store.rate_limits = Some(limits);
    Some(StoreEvent::MetricsChanged { thread_id: None })
}

/// Approval delivered as a notification carrying its own request id
fn approval_requested(store: &mut Store, method: &str, params: &Value) -> Option<StoreEvent> {
    let rpc_id = params
        .get("requestId")
        .or_else(|| params.get("id"))
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());
    let Some(rpc_id) = rpc_id else {
        debug!("Ignoring {} without a request id", method);
        return None;
    };
    approvals::record(store, rpc_id, method, params.clone());
    Some(StoreEvent::ApprovalsChanged)
}

/// Shared rule for `turn/started` and `turn/completed`: insert or merge by
/// id, never letting an emptier payload replace items, plan or diff.
fn turn_snapshot(store: &mut Store, thread_id: &str, params: &Value, default_status: TurnStatus) -> bool {
    let payload = params.get("turn").unwrap_or(params);
    let Some(turn_id) = payload
        .get("id")
        .and_then(Value::as_str)
        .or_else(|| protocol::turn_id_of(params))
        .map(String::from)
    else {
        return false;
    };

    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .and_then(TurnStatus::parse)
        .unwrap_or(default_status);
    let error = payload
        .get("error")
        .filter(|e| !e.is_null())
        .and_then(TurnError::from_value);
    let plan = TurnPlan::from_value(payload).filter(|plan| !plan.is_empty());
    let diff = payload
        .get("diff")
        .and_then(Value::as_str)
        .filter(|diff| !diff.is_empty())
        .map(String::from);
    let items: Vec<Item> = payload
        .get("items")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Item::from_value).collect())
        .unwrap_or_default();

    if let Some(thread) = store.thread_mut(thread_id) {
        let turn = thread.ensure_turn(&turn_id);
        turn.status = turn.status.merge(status);
        if let Some(error) = error {
            attach_error(turn, &turn_id, error);
        }
        if plan.is_some() {
            turn.plan = plan;
        }
        if diff.is_some() {
            turn.diff = diff;
        }
    }
    for item in items {
        upsert_item(store, thread_id, &turn_id, item);
    }
    true
}

fn plan_updated(store: &mut Store, thread_id: &str, params: &Value) -> bool {
    let (Some(turn_id), Some(plan)) = (protocol::turn_id_of(params), TurnPlan::from_value(params)) else {
        return false;
    };
    let Some(thread) = store.thread_mut(thread_id) else {
        return false;
    };
    thread.ensure_turn(turn_id).plan = Some(plan);
    true
}

fn diff_updated(store: &mut Store, thread_id: &str, params: &Value) -> bool {
    let (Some(turn_id), Some(diff)) = (
        protocol::turn_id_of(params),
        params.get("diff").and_then(Value::as_str),
    ) else {
        return false;
    };
    let Some(thread) = store.thread_mut(thread_id) else {
        return false;
    };
    let turn = thread.ensure_turn(turn_id);
    turn.diff = Some(diff.to_string());

    let marker_id = format!("{}:diff", turn_id);
    let marker = ItemKind::TurnDiff {
        diff: diff.to_string(),
    };
    if turn.item(&marker_id).is_some() || !diff.trim().is_empty() {
        turn.upsert_item(Item::new(marker_id, marker).with_status(ItemStatus::Completed));
    }
    true
}

fn turn_error(store: &mut Store, thread_id: &str, params: &Value) -> bool {
    let Some(turn_id) = protocol::turn_id_of(params) else {
        return false;
    };
    let Some(error) = TurnError::from_value(params.get("error").unwrap_or(params)) else {
        return false;
    };
    let Some(thread) = store.thread_mut(thread_id) else {
        return false;
    };
    attach_error(thread.ensure_turn(turn_id), turn_id, error);
    true
}

/// A turn carrying an error is in `Error` and shows one inline marker,
/// whichever notification delivered it.
fn attach_error(turn: &mut Turn, turn_id: &str, error: TurnError) {
    turn.status = turn.status.merge(TurnStatus::Error);
    let marker = ItemKind::TurnError {
        message: error.message.clone(),
    };
    turn.error = Some(error);
    turn.upsert_item(Item::new(format!("{}:error", turn_id), marker).with_status(ItemStatus::Failed));
}

/// Generic `error` notification: terminal ones with a turn id become turn
/// errors, the rest surface as a notice.
fn server_error(store: &mut Store, thread_id: &str, params: &Value) -> Option<StoreEvent> {
    let will_retry = params
        .get("willRetry")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !will_retry && protocol::turn_id_of(params).is_some() && turn_error(store, thread_id, params) {
        return Some(StoreEvent::ThreadChanged {
            thread_id: thread_id.to_string(),
        });
    }
    let message = TurnError::from_value(params.get("error").unwrap_or(params))?.message;
    Some(StoreEvent::Notice(Notice {
        level: if will_retry {
            NoticeLevel::Warning
        } else {
            NoticeLevel::Error
        },
        thread_id: Some(thread_id.to_string()),
        message,
    }))
}

fn item_upsert(store: &mut Store, thread_id: &str, params: &Value, default_status: ItemStatus) -> bool {
    let Some(payload) = params.get("item") else {
        return false;
    };
    let Some(mut item) = Item::from_value(payload) else {
        return false;
    };
    if payload.get("status").is_none() {
        item.status = default_status;
    }
    let Some(turn_id) = resolve_turn_id(store, thread_id, params, Some(&item.id)) else {
        debug!("Dropping item {} with no turn to hold it", item.id);
        return false;
    };
    upsert_item(store, thread_id, &turn_id, item);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tracked(thread_id: &str) -> Store {
        let mut store = Store::new();
        apply(&mut store, "thread/started", &json!({"thread": {"id": thread_id}}));
        store
    }

    #[test]
    fn test_unrecognized_method_is_noop() {
        let mut store = tracked("t1");
        let before = store.clone();
        assert!(apply(&mut store, "thread/somethingNew", &json!({"threadId": "t1"})).is_none());
        assert_eq!(store, before);
    }

    #[test]
    fn test_untracked_thread_is_ignored() {
        let mut store = tracked("t1");
        let event = apply(
            &mut store,
            "item/started",
            &json!({"threadId": "t2", "turnId": "a", "item": {"id": "i1", "type": "agentMessage", "text": "x"}}),
        );
        assert!(event.is_none());
        assert!(store.thread("t2").is_none());
    }

    #[test]
    fn test_focused_thread_admits_first_event() {
        let mut store = Store::new();
        store.active_thread = Some("t9".to_string());
        apply(
            &mut store,
            "turn/started",
            &json!({"threadId": "t9", "turn": {"id": "a", "items": [], "status": "inProgress"}}),
        );
        let thread = store.thread("t9").unwrap();
        assert_eq!(thread.turns.len(), 1);
        assert_eq!(thread.turns[0].status, TurnStatus::InProgress);
    }

    #[test]
    fn test_thread_started_keeps_existing_items() {
        let mut store = tracked("t1");
        apply(
            &mut store,
            "item/completed",
            &json!({"threadId": "t1", "turnId": "a", "item": {"id": "i1", "type": "agentMessage", "text": "done"}}),
        );
        apply(&mut store, "thread/started", &json!({"thread": {"id": "t1", "preview": "p"}}));
        let thread = store.thread("t1").unwrap();
        assert_eq!(thread.turns[0].items.len(), 1);
        assert_eq!(thread.preview, "p");
    }

    #[test]
    fn test_late_turn_started_keeps_items_and_status() {
        let mut store = tracked("t1");
        apply(
            &mut store,
            "item/completed",
            &json!({"threadId": "t1", "turnId": "a", "item": {"id": "i1", "type": "agentMessage", "text": "hi"}}),
        );
        apply(
            &mut store,
            "turn/completed",
            &json!({"threadId": "t1", "turn": {"id": "a", "items": [], "status": "completed"}}),
        );
        apply(
            &mut store,
            "turn/started",
            &json!({"threadId": "t1", "turn": {"id": "a", "items": [], "status": "inProgress"}}),
        );
        let turn = &store.thread("t1").unwrap().turns[0];
        assert_eq!(turn.status, TurnStatus::Completed);
        assert_eq!(turn.items.len(), 1);
    }

    #[test]
    fn test_turn_completed_keeps_plan_and_diff_when_empty() {
        let mut store = tracked("t1");
        apply(
            &mut store,
            "turn/planUpdated",
            &json!({"threadId": "t1", "turnId": "a", "plan": [{"step": "read", "status": "completed"}]}),
        );
        apply(
            &mut store,
            "turn/diffUpdated",
            &json!({"threadId": "t1", "turnId": "a", "diff": "diff --git a/x b/x"}),
        );
        apply(
            &mut store,
            "turn/completed",
            &json!({"threadId": "t1", "turn": {"id": "a", "items": [], "status": "failed", "error": {"message": "boom"}}}),
        );
        let thread = store.thread("t1").unwrap();
        let turn = &thread.turns[0];
        assert_eq!(turn.status, TurnStatus::Error);
        assert_eq!(turn.plan.as_ref().unwrap().steps.len(), 1);
        assert_eq!(turn.diff.as_deref(), Some("diff --git a/x b/x"));
        assert_eq!(turn.error.as_ref().unwrap().message, "boom");
        assert_eq!(thread.latest_diff(), Some("diff --git a/x b/x"));
    }

    #[test]
    fn test_plan_is_full_replace() {
        let mut store = tracked("t1");
        for plan in [json!([{"step": "a"}, {"step": "b"}]), json!([{"step": "c"}])] {
            apply(
                &mut store,
                "turn/plan/updated",
                &json!({"threadId": "t1", "turnId": "a", "plan": plan}),
            );
        }
        let plan = store.thread("t1").unwrap().turns[0].plan.clone().unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].step, "c");
    }

    #[test]
    fn test_turn_error_attaches_marker() {
        let mut store = tracked("t1");
        apply(
            &mut store,
            "turn/error",
            &json!({"threadId": "t1", "turnId": "a", "error": {"message": "quota exceeded"}}),
        );
        apply(
            &mut store,
            "turn/error",
            &json!({"threadId": "t1", "turnId": "a", "error": {"message": "quota exceeded"}}),
        );
        let turn = &store.thread("t1").unwrap().turns[0];
        assert_eq!(turn.status, TurnStatus::Error);
        assert_eq!(turn.items.len(), 1);
        assert!(matches!(turn.items[0].kind, ItemKind::TurnError { .. }));
    }

    #[test]
    fn test_error_outlasts_completion_in_either_order() {
        let error = json!({"threadId": "t1", "turnId": "a", "error": {"message": "boom"}});
        let completed = json!({"threadId": "t1", "turn": {"id": "a", "status": "completed"}});
        let orders = [
            [("turn/error", &error), ("turn/completed", &completed)],
            [("turn/completed", &completed), ("turn/error", &error)],
        ];
        for order in orders {
            let mut store = tracked("t1");
            for (method, params) in order {
                apply(&mut store, method, params);
            }
            let turn = &store.thread("t1").unwrap().turns[0];
            assert_eq!(turn.status, TurnStatus::Error);
            assert_eq!(turn.error.as_ref().unwrap().message, "boom");
        }
    }

    #[test]
    fn test_completed_with_error_attaches_marker() {
        let mut store = tracked("t1");
        apply(
            &mut store,
            "turn/completed",
            &json!({"threadId": "t1", "turn": {"id": "a", "status": "completed", "error": {"message": "context overflow"}}}),
        );
        apply(
            &mut store,
            "turn/error",
            &json!({"threadId": "t1", "turnId": "a", "error": {"message": "context overflow"}}),
        );
        let turn = &store.thread("t1").unwrap().turns[0];
        assert_eq!(turn.status, TurnStatus::Error);
        assert_eq!(turn.items.len(), 1);
        match &turn.items[0].kind {
            ItemKind::TurnError { message } => assert_eq!(message, "context overflow"),
            other => panic!("Expected turn error marker, got {:?}", other),
        }
    }

    #[test]
    fn test_retryable_error_is_notice() {
        let mut store = tracked("t1");
        let event = apply(
            &mut store,
            "error",
            &json!({"threadId": "t1", "turnId": "a", "willRetry": true, "error": {"message": "reconnecting"}}),
        );
        match event {
            Some(StoreEvent::Notice(notice)) => {
                assert_eq!(notice.level, NoticeLevel::Warning);
                assert_eq!(notice.message, "reconnecting");
            }
            other => panic!("Expected notice, got {:?}", other),
        }
        assert!(store.thread("t1").unwrap().turns.is_empty());
    }

    #[test]
    fn test_user_message_derives_title_once() {
        let mut store = tracked("t1");
        for (id, text) in [("u1", "Fix the login bug"), ("u2", "Something else")] {
            apply(
                &mut store,
                "item/completed",
                &json!({"threadId": "t1", "turnId": id, "item": {"id": id, "type": "userMessage", "content": [{"type": "text", "text": text}]}}),
            );
        }
        assert_eq!(store.thread("t1").unwrap().title.as_deref(), Some("Fix the login bug"));
        assert_eq!(store.summary("t1").unwrap().title.as_deref(), Some("Fix the login bug"));
    }

    #[test]
    fn test_preview_updated_only_touches_labels() {
        let mut store = tracked("t1");
        apply(&mut store, "thread/previewUpdated", &json!({"threadId": "t1", "preview": "new preview"}));
        apply(&mut store, "thread/name/updated", &json!({"threadId": "t1", "threadName": "Renamed"}));
        let summary = store.summary("t1").unwrap();
        assert_eq!(summary.preview, "new preview");
        assert_eq!(summary.title.as_deref(), Some("Renamed"));
        assert!(store.thread("t1").unwrap().turns.is_empty());
    }

    #[test]
    fn test_metrics_are_replaced() {
        let mut store = tracked("t1");
        apply(
            &mut store,
            "thread/tokenUsage/updated",
            &json!({"threadId": "t1", "tokenUsage": {"total": {"totalTokens": 10}, "modelContextWindow": 1000}}),
        );
        apply(
            &mut store,
            "thread/tokenUsage/updated",
            &json!({"threadId": "t1", "tokenUsage": {"total": {"totalTokens": 25}}}),
        );
        let usage = &store.token_usage["t1"];
        assert_eq!(usage.total.total_tokens, 25);
        assert_eq!(usage.model_context_window, None);

        apply(
            &mut store,
            "account/rateLimits/updated",
            &json!({"rateLimits": {"primary": {"usedPercent": 12.5}}}),
        );
        let limits = store.rate_limits.as_ref().unwrap();
        assert_eq!(limits.primary.as_ref().unwrap().used_percent, 12.5);
    }

    #[test]
    fn test_approval_notification_records_without_touching_items() {
        let mut store = tracked("t1");
        let event = apply(
            &mut store,
            "item/fileChange/requestApproval",
            &json!({"requestId": 5, "threadId": "t1", "turnId": "a", "itemId": "fc1"}),
        );
        assert_eq!(event, Some(StoreEvent::ApprovalsChanged));
        assert_eq!(store.approvals["fc1"].rpc_id, RequestId::Integer(5));
        assert!(store.thread("t1").unwrap().turns.is_empty());
    }
}
