//! JSON-RPC transport to the agent app-server
//!
//! The connection itself (process spawning, sockets) belongs to the caller;
//! `JsonlTransport` only needs a pair of byte streams carrying one JSON
//! message per line.

use crate::protocol::{JsonRpcRequest, JsonRpcResponse, RequestId, ServerMessage};
use crate::{AgentDeskError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outbound side used by the orchestrator, correlator and hydration
#[allow(async_fn_in_trait)]
pub trait AgentTransport {
    /// Send a request and wait for its correlated result.
    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    /// Reply to a server-initiated request.
    async fn respond(&self, id: RequestId, result: Value) -> Result<()>;
}

type PendingRequests = HashMap<RequestId, oneshot::Sender<Result<Value>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Newline-delimited JSON-RPC over an async reader/writer pair
pub struct JsonlTransport {
    writer: Arc<Mutex<Writer>>,
    pending: Arc<Mutex<PendingRequests>>,
    next_id: AtomicI64,
    reader_task: Option<JoinHandle<()>>,
}

impl JsonlTransport {
    /// Start the reader task. Notifications and server requests arrive on
    /// the returned channel; responses resolve pending requests directly.
    pub fn connect<R, W>(reader: R, writer: W) -> (Self, mpsc::Receiver<ServerMessage>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: Arc<Mutex<PendingRequests>> = Arc::new(Mutex::new(HashMap::new()));
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let pending_reader = pending.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let value: Value = match serde_json::from_str(trimmed) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("Skipping malformed line from server: {}", e);
                        continue;
                    }
                };
                let Some(message) = ServerMessage::from_json(&value) else {
                    debug!("Skipping unclassifiable message: {}", trimmed);
                    continue;
                };

                match message {
                    ServerMessage::Response { id, result } => {
                        let result = result.map_err(|e| AgentDeskError::Rpc {
                            code: e.code,
                            message: e.message,
                        });
                        match pending_reader.lock().await.remove(&id) {
                            Some(sender) => {
                                let _ = sender.send(result);
                            }
                            None => warn!("Response {} has no pending request", id),
                        }
                    }
                    other => {
                        if inbound_tx.send(other).await.is_err() {
                            break;
                        }
                    }
                }
            }

            for (_, sender) in pending_reader.lock().await.drain() {
                let _ = sender.send(Err(AgentDeskError::ConnectionClosed));
            }
        });

        let writer: Writer = Box::new(writer);
        (
            Self {
                writer: Arc::new(Mutex::new(writer)),
                pending,
                next_id: AtomicI64::new(1),
                reader_task: Some(reader_task),
            },
            inbound_rx,
        )
    }

    async fn send_json<T: serde::Serialize>(&self, message: &T) -> Result<()> {
        let mut payload = serde_json::to_string(message)?;
        payload.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(payload.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Wait for the reader task to finish after the server closed its end.
    pub async fn shutdown(mut self) {
        if let Some(task) = self.reader_task.take() {
            let _ = task.await;
        }
    }
}

impl AgentTransport for JsonlTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = RequestId::Integer(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let request = JsonRpcRequest {
            method: method.to_string(),
            id: Some(id.clone()),
            params: Some(params),
        };
        if let Err(e) = self.send_json(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }
        debug!("Sent {} as request {}", method, id);

        rx.await.map_err(|_| AgentDeskError::ConnectionClosed)?
    }

    async fn respond(&self, id: RequestId, result: Value) -> Result<()> {
        let response = JsonRpcResponse {
            id,
            result: Some(result),
            error: None,
        };
        self.send_json(&response).await
    }
}

impl Drop for JsonlTransport {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}
