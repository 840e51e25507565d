//! Approval correlator
//!
//! Server-initiated approval requests are parked in the store keyed by the
//! item they refer to. A decision removes the entry and sends exactly one
//! reply carrying the original request id.

use crate::protocol::{self, RequestId};
use crate::session::{SessionController, StoreEvent};
use crate::store::{PendingApproval, SnapshotState, Store};
use crate::transport::AgentTransport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// User answer to an approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Decision {
    Accept,
    AcceptForSession,
    Decline,
    Cancel,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Accept => "accept",
            Decision::AcceptForSession => "acceptForSession",
            Decision::Decline => "decline",
            Decision::Cancel => "cancel",
        }
    }

    /// Whether the user made a call on the change itself
    fn settles_change(self) -> bool {
        !matches!(self, Decision::Cancel)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Key an approval is stored under: the referenced item, else the call id,
/// else one built from the method and request id so odd shapes still show up.
pub fn approval_key(rpc_id: &RequestId, method: &str, params: &Value) -> String {
    protocol::item_id_of(params)
        .or_else(|| protocol::str_field(params, &["callId", "call_id"]))
        .map(String::from)
        .unwrap_or_else(|| format!("{}#{}", method, rpc_id))
}

/// Record an approval request. A redelivery replaces the earlier entry.
pub fn record(store: &mut Store, rpc_id: RequestId, method: &str, params: Value) -> String {
    let key = approval_key(&rpc_id, method, &params);
    let approval = PendingApproval {
        rpc_id,
        method: method.to_string(),
        thread_id: protocol::thread_id_of(&params).map(String::from),
        turn_id: protocol::turn_id_of(&params).map(String::from),
        params,
    };
    if store.approvals.insert(key.clone(), approval).is_some() {
        debug!("Approval for {} delivered again", key);
    } else {
        info!("Approval requested for {} via {}", key, method);
    }
    key
}

impl<T: AgentTransport> SessionController<T> {
    pub fn pending_approval(&self, item_id: &str) -> Option<&PendingApproval> {
        self.store.approvals.get(item_id)
    }

    /// Answer a pending approval. Returns false when nothing was pending
    /// for the item. Reply failures are logged and otherwise dropped.
    pub async fn decide(&mut self, item_id: &str, decision: Decision) -> bool {
        let Some(approval) = self.store.approvals.remove(item_id) else {
            debug!("No pending approval for {}", item_id);
            return false;
        };

        let mut changed_thread = None;
        if approval.is_file_change() && decision.settles_change() {
            let thread_id = approval
                .thread_id
                .clone()
                .or_else(|| self.store.active_thread.clone());
            if let Some(thread_id) = thread_id {
                if self.mark_snapshot_available(&thread_id, approval.turn_id.as_deref(), item_id) {
                    changed_thread = Some(thread_id);
                }
            }
        }

        self.emit(StoreEvent::ApprovalsChanged);
        if let Some(thread_id) = changed_thread {
            self.emit(StoreEvent::ThreadChanged { thread_id });
        }

        let reply = protocol::approval_reply(decision.as_str());
        if let Err(e) = self.transport.respond(approval.rpc_id.clone(), reply).await {
            warn!("Approval reply for {} ({}) failed: {}", item_id, approval.rpc_id, e);
        }
        true
    }

    fn mark_snapshot_available(&mut self, thread_id: &str, turn_id: Option<&str>, item_id: &str) -> bool {
        let Some(thread) = self.store.thread_mut(thread_id) else {
            return false;
        };
        let turn = match turn_id {
            Some(turn_id) => thread.turn_mut(turn_id),
            None => thread.turn_of_item_mut(item_id),
        };
        match turn {
            Some(turn) if turn.snapshot == SnapshotState::None => {
                turn.snapshot = SnapshotState::Available;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::RecordingTransport;
    use crate::SessionConfig;
    use serde_json::json;

    fn session() -> SessionController<RecordingTransport> {
        SessionController::new(RecordingTransport::default(), SessionConfig::new("/repo".into()))
    }

    #[test]
    fn test_key_falls_back_when_item_missing() {
        let id = RequestId::Integer(9);
        assert_eq!(approval_key(&id, "m", &json!({"itemId": "i1"})), "i1");
        assert_eq!(approval_key(&id, "m", &json!({"callId": "c1"})), "c1");
        assert_eq!(
            approval_key(&id, "execCommandApproval", &json!({})),
            "execCommandApproval#9"
        );
    }

    #[test]
    fn test_redelivery_keeps_one_entry() {
        let mut store = Store::new();
        let params = json!({"threadId": "t1", "itemId": "c1"});
        record(&mut store, RequestId::Integer(1), "item/commandExecution/requestApproval", params.clone());
        record(&mut store, RequestId::Integer(1), "item/commandExecution/requestApproval", params);
        assert_eq!(store.approvals.len(), 1);
        assert_eq!(store.approvals["c1"].thread_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_decide_replies_once() {
        let mut session = session();
        record(
            &mut session.store,
            RequestId::String("req-7".to_string()),
            "item/commandExecution/requestApproval",
            json!({"threadId": "t1", "turnId": "a", "itemId": "c1"}),
        );

        assert!(session.decide("c1", Decision::AcceptForSession).await);
        assert!(!session.decide("c1", Decision::Accept).await);

        let responses = session.transport().responses.lock().unwrap().clone();
        assert_eq!(
            responses,
            vec![(
                RequestId::String("req-7".to_string()),
                json!({"decision": "acceptForSession"})
            )]
        );
        assert!(session.store().approvals.is_empty());
    }

    #[tokio::test]
    async fn test_file_change_decision_enables_snapshot() {
        let mut session = session();
        session.store.ensure_thread("t1").ensure_turn("a");
        record(
            &mut session.store,
            RequestId::Integer(3),
            "item/fileChange/requestApproval",
            json!({"threadId": "t1", "turnId": "a", "itemId": "fc1"}),
        );
        session.decide("fc1", Decision::Decline).await;
        let turn = session.store().thread("t1").unwrap().turn("a").unwrap();
        assert_eq!(turn.snapshot, SnapshotState::Available);
    }

    #[tokio::test]
    async fn test_cancel_leaves_snapshot_alone() {
        let mut session = session();
        session.store.ensure_thread("t1").ensure_turn("a");
        record(
            &mut session.store,
            RequestId::Integer(3),
            "item/fileChange/requestApproval",
            json!({"threadId": "t1", "turnId": "a", "itemId": "fc1"}),
        );
        session.decide("fc1", Decision::Cancel).await;
        let turn = session.store().thread("t1").unwrap().turn("a").unwrap();
        assert_eq!(turn.snapshot, SnapshotState::None);
    }
}
