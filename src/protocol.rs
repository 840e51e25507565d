//! Protocol definitions for talking to the agent app-server
//!
//! JSON-RPC envelopes, method names, request builders and the small
//! field extractors shared by the reducer, correlator and hydration.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// JSON-RPC id; the server may use numbers or strings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Integer(id) => write!(f, "{}", id),
            RequestId::String(id) => write!(f, "{}", id),
        }
    }
}

/// JSON-RPC request structure (a notification when `id` is absent)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A message from the server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// `{method, params}`
    Notification { method: String, params: Value },
    /// `{id, method, params}`; needs a correlated reply
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    /// `{id, result|error}` for one of our requests
    Response {
        id: RequestId,
        result: std::result::Result<Value, JsonRpcError>,
    },
}

impl ServerMessage {
    pub fn from_json(json: &Value) -> Option<Self> {
        let params = json.get("params").cloned().unwrap_or(Value::Null);
        let id = json
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

        if let Some(method) = json.get("method").and_then(Value::as_str) {
            let method = method.to_string();
            return Some(match id {
                Some(id) => ServerMessage::Request { id, method, params },
                None => ServerMessage::Notification { method, params },
            });
        }

        let id = id?;
        let result = match json.get("error") {
            Some(error) => Err(serde_json::from_value(error.clone()).unwrap_or(JsonRpcError {
                code: -1,
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_string(),
                data: None,
            })),
            None => Ok(json.get("result").cloned().unwrap_or(Value::Null)),
        };
        Some(ServerMessage::Response { id, result })
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            ServerMessage::Notification { method, .. } | ServerMessage::Request { method, .. } => {
                Some(method)
            }
            ServerMessage::Response { .. } => None,
        }
    }
}

/// Client request methods
pub mod methods {
    pub const THREAD_START: &str = "thread/start";
    pub const THREAD_RESUME: &str = "thread/resume";
    pub const THREAD_LIST: &str = "thread/list";
    pub const THREAD_READ: &str = "thread/read";
    pub const THREAD_ARCHIVE: &str = "thread/archive";
    pub const TURN_START: &str = "turn/start";
    pub const TURN_INTERRUPT: &str = "turn/interrupt";
    pub const SNAPSHOT_APPLY: &str = "turn/snapshot/apply";
    pub const SNAPSHOT_REVERT: &str = "turn/snapshot/revert";
}

/// Server notification methods
pub mod notifications {
    // Thread lifecycle
    pub const THREAD_STARTED: &str = "thread/started";
    pub const THREAD_PREVIEW_UPDATED: &str = "thread/previewUpdated";
    pub const THREAD_NAME_UPDATED: &str = "thread/name/updated";

    // Turn lifecycle
    pub const TURN_STARTED: &str = "turn/started";
    pub const TURN_COMPLETED: &str = "turn/completed";
    pub const TURN_PLAN_UPDATED: &str = "turn/planUpdated";
    pub const TURN_PLAN_UPDATED_ALT: &str = "turn/plan/updated";
    pub const TURN_DIFF_UPDATED: &str = "turn/diffUpdated";
    pub const TURN_DIFF_UPDATED_ALT: &str = "turn/diff/updated";
    pub const TURN_ERROR: &str = "turn/error";

    // Items
    pub const ITEM_STARTED: &str = "item/started";
    pub const ITEM_COMPLETED: &str = "item/completed";
    pub const ITEM_UPDATED: &str = "item/updated";
    pub const ITEM_ADDED: &str = "item/added";

    // Deltas
    pub const AGENT_MESSAGE_DELTA: &str = "item/agentMessage/delta";
    pub const COMMAND_OUTPUT_DELTA: &str = "item/commandExecution/outputDelta";
    pub const REASONING_TEXT_DELTA: &str = "item/reasoning/textDelta";
    pub const REASONING_SUMMARY_TEXT_DELTA: &str = "item/reasoning/summaryTextDelta";
    pub const REASONING_SUMMARY_PART_ADDED: &str = "item/reasoning/summaryPartAdded";

    // Generic tool calls
    pub const TOOL_CALL_STARTED: &str = "item/toolCall/started";
    pub const TOOL_CALL_UPDATED: &str = "item/toolCall/updated";
    pub const TOOL_CALL_COMPLETED: &str = "item/toolCall/completed";

    // Approval requests (server -> client)
    pub const COMMAND_APPROVAL: &str = "item/commandExecution/requestApproval";
    pub const FILE_CHANGE_APPROVAL: &str = "item/fileChange/requestApproval";

    // Metrics
    pub const THREAD_TOKEN_USAGE_UPDATED: &str = "thread/tokenUsage/updated";
    pub const ACCOUNT_RATE_LIMITS_UPDATED: &str = "account/rateLimits/updated";

    // Errors
    pub const ERROR: &str = "error";
}

pub fn is_approval_method(method: &str) -> bool {
    method.ends_with("/requestApproval")
}

pub fn is_token_usage_method(method: &str) -> bool {
    method.ends_with("/tokenUsage/updated")
}

pub fn is_rate_limits_method(method: &str) -> bool {
    method.ends_with("/rateLimits/updated")
}

/// Create thread/start params
pub fn thread_start_params(cwd: &str) -> Value {
    json!({ "cwd": cwd })
}

/// Create turn/start params
pub fn turn_start_params(
    thread_id: &str,
    input: Vec<Value>,
    cwd: &str,
    approval_policy: &str,
    sandbox_policy: Value,
    model: Option<&str>,
    effort: Option<&str>,
) -> Value {
    let mut params = json!({
        "threadId": thread_id,
        "input": input,
        "cwd": cwd,
        "approvalPolicy": approval_policy,
        "sandboxPolicy": sandbox_policy,
    });
    if let Some(model) = model {
        params["model"] = json!(model);
    }
    if let Some(effort) = effort {
        params["effort"] = json!(effort);
    }
    params
}

/// Create turn/interrupt params. Local placeholder turns have no server id yet.
pub fn turn_interrupt_params(thread_id: &str, turn_id: Option<&str>) -> Value {
    let mut params = json!({ "threadId": thread_id });
    if let Some(turn_id) = turn_id {
        params["turnId"] = json!(turn_id);
    }
    params
}

/// Create thread/read params, preferring the rollout path when known
pub fn thread_read_params(thread_id: &str, path: Option<&str>) -> Value {
    let mut params = json!({ "threadId": thread_id, "includeTurns": true });
    if let Some(path) = path {
        params["path"] = json!(path);
    }
    params
}

pub fn thread_id_params(thread_id: &str) -> Value {
    json!({ "threadId": thread_id })
}

pub fn snapshot_params(thread_id: &str, turn_id: &str) -> Value {
    json!({ "threadId": thread_id, "turnId": turn_id })
}

/// Reply body for an approval request
pub fn approval_reply(decision: &str) -> Value {
    json!({ "decision": decision })
}

/// String field lookup trying each key in order
pub fn str_field<'a>(params: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| params.get(*key).and_then(Value::as_str))
}

/// Thread id referenced by a notification, wherever the server put it
pub fn thread_id_of(params: &Value) -> Option<&str> {
    str_field(params, &["threadId", "conversationId"])
        .or_else(|| params.get("thread").and_then(|t| t.get("id")).and_then(Value::as_str))
}

/// Turn id referenced by a notification
pub fn turn_id_of(params: &Value) -> Option<&str> {
    str_field(params, &["turnId"])
        .or_else(|| params.get("turn").and_then(|t| t.get("id")).and_then(Value::as_str))
}

/// Item id referenced by a notification or approval request
pub fn item_id_of(params: &Value) -> Option<&str> {
    str_field(params, &["itemId"])
        .or_else(|| params.get("item").and_then(|i| i.get("id")).and_then(Value::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_messages() {
        let notification = json!({"method": "turn/started", "params": {"threadId": "t1"}});
        assert!(matches!(
            ServerMessage::from_json(&notification),
            Some(ServerMessage::Notification { ref method, .. }) if method == "turn/started"
        ));

        let request = json!({"id": 7, "method": "item/fileChange/requestApproval", "params": {}});
        assert!(matches!(
            ServerMessage::from_json(&request),
            Some(ServerMessage::Request { id: RequestId::Integer(7), .. })
        ));

        let response = json!({"id": "abc", "result": {"ok": true}});
        match ServerMessage::from_json(&response) {
            Some(ServerMessage::Response { id, result }) => {
                assert_eq!(id, RequestId::String("abc".to_string()));
                assert_eq!(result.unwrap()["ok"], true);
            }
            other => panic!("Expected response, got {:?}", other),
        }

        let error = json!({"id": 3, "error": {"code": -32000, "message": "busy"}});
        match ServerMessage::from_json(&error) {
            Some(ServerMessage::Response { result: Err(e), .. }) => assert_eq!(e.message, "busy"),
            other => panic!("Expected error response, got {:?}", other),
        }

        assert!(ServerMessage::from_json(&json!({"foo": 1})).is_none());
    }

    #[test]
    fn test_id_extractors() {
        let params = json!({"thread": {"id": "t9"}, "turn": {"id": "u1"}, "item": {"id": "i1"}});
        assert_eq!(thread_id_of(&params), Some("t9"));
        assert_eq!(turn_id_of(&params), Some("u1"));
        assert_eq!(item_id_of(&params), Some("i1"));
    }

    #[test]
    fn test_method_families() {
        assert!(is_approval_method("item/commandExecution/requestApproval"));
        assert!(is_token_usage_method("thread/tokenUsage/updated"));
        assert!(is_rate_limits_method("account/rateLimits/updated"));
        assert!(!is_rate_limits_method("account/updated"));
    }
}
