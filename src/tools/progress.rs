//! Progress reporting
//!
//! Tools never touch the RPC layer; they emit [`ProgressEvent`]s through the
//! sink injected into their context. The front-end forwards events as
//! `notifications/progress` frames in emission order.

use crate::rpc::peer::PeerHandle;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// One progress tick for an in-flight tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    /// Stable token correlating events to the originating request
    #[serde(rename = "progressToken")]
    pub token: Value,
    pub step: u32,
    pub total: u32,
    pub percentage: f64,
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ProgressEvent {
    pub fn new(token: Value, step: u32, total: u32, status: &str, message: &str) -> Self {
        let percentage = if total == 0 {
            0.0
        } else {
            (step as f64 / total as f64 * 100.0).min(100.0)
        };
        Self {
            token,
            step,
            total,
            percentage,
            status: status.to_string(),
            message: message.to_string(),
            metadata: None,
        }
    }
}

/// Destination for progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Forwards events to the RPC peer as notifications.
pub struct PeerProgressSink {
    peer: Arc<PeerHandle>,
}

impl PeerProgressSink {
    pub fn new(peer: Arc<PeerHandle>) -> Arc<dyn ProgressSink> {
        Arc::new(Self { peer })
    }
}

impl ProgressSink for PeerProgressSink {
    fn emit(&self, event: ProgressEvent) {
        let params = serde_json::to_value(&event).unwrap_or(Value::Null);
        self.peer.notify("notifications/progress", params);
    }
}

/// Swallows events; used for transient internal invocations.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Collects events in order; the test double.
#[derive(Default)]
pub struct RecordingProgressSink {
    events: parking_lot::Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}
