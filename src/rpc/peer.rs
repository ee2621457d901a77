//! Outbound peer calls
//!
//! The server calls back into its RPC peer for sampling. Outbound requests
//! get a monotone id and a slot in the pending-reply table; the reader loop
//! resolves slots as responses arrive. A reply landing after its deadline
//! finds the slot gone, because the waiter has already failed with `timeout`.

use super::protocol::{Notification, Request, RpcError, to_frame};
use crate::error::{AssistError, Result};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Handle for talking to the peer on the other side of the wire.
pub struct PeerHandle {
    outbound: mpsc::UnboundedSender<String>,
    pending: DashMap<i64, oneshot::Sender<std::result::Result<Value, RpcError>>>,
    next_id: AtomicI64,
}

impl PeerHandle {
    /// Build a handle over the writer channel.
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Arc<Self> {
        Arc::new(Self {
            outbound,
            pending: DashMap::new(),
            next_id: AtomicI64::new(1),
        })
    }

    /// Send a request and await its response under `deadline`.
    pub async fn call(&self, method: &str, params: Value, deadline: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let request = Request::new(id, method, params);
        if self.outbound.send(to_frame(&request)).is_err() {
            self.pending.remove(&id);
            return Err(AssistError::network("peer connection closed"));
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(rpc_error))) => Err(AssistError::external_tool(format!(
                "peer returned error {}: {}",
                rpc_error.code, rpc_error.message
            ))),
            // resolver dropped without answering: wire shut down
            Ok(Err(_)) => Err(AssistError::network("peer connection closed")),
            Err(_) => {
                self.pending.remove(&id);
                Err(AssistError::timeout(format!(
                    "peer did not answer {} within {:?}",
                    method, deadline
                )))
            }
        }
    }

    /// Fire a notification at the peer.
    pub fn notify(&self, method: &str, params: Value) {
        let notification = Notification::new(method, params);
        // losing a notification on shutdown is acceptable
        let _ = self.outbound.send(to_frame(&notification));
    }

    /// Resolve a pending call from an inbound response frame.
    pub fn resolve(&self, id: &Value, result: std::result::Result<Value, RpcError>) {
        let Some(id) = id.as_i64() else {
            log::debug!("inbound response with non-numeric id {}", id);
            return;
        };
        match self.pending.remove(&id) {
            Some((_, tx)) => {
                let _ = tx.send(result);
            }
            // waiter already timed out; drop the late reply
            None => log::debug!("dropping late reply for request {}", id),
        }
    }

    /// Outstanding outbound calls, for diagnostics.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
