//! Request Correlator
//!
//! Assigns ids to outbound calls and completes them when the matching
//! `packetType: "response"` frame arrives. Ids increase monotonically from 1
//! and are never reused within a client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use super::messages::{RequestEnvelope, ResponseEnvelope};

/// Call failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The socket closed before the response arrived.
    #[error("connection lost before response to request {id}")]
    ConnectionLost {
        /// Request id.
        id: u64,
    },

    /// The client is closed or dead; the call was never sent.
    #[error("client closed")]
    Closed,

    /// The request could not be encoded.
    #[error("request encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug)]
struct PendingRequest {
    service_name: String,
    issued_at: Instant,
    tx: oneshot::Sender<Result<Value, CallError>>,
}

/// Pending-call table.
#[derive(Debug)]
pub struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a call and build its envelope.
    pub fn issue(
        &self,
        service_name: &str,
        data: Value,
        timestamp_ms: i64,
    ) -> (RequestEnvelope, oneshot::Receiver<Result<Value, CallError>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            id,
            PendingRequest {
                service_name: service_name.to_string(),
                issued_at: Instant::now(),
                tx,
            },
        );
        (RequestEnvelope::new(id, service_name, data, timestamp_ms), rx)
    }

    /// Withdraw a call that was never sent.
    pub fn cancel(&self, id: u64) {
        self.pending.lock().remove(&id);
    }

    /// Complete the call matching `response`.
    ///
    /// Returns the response back if no call is waiting on its id.
    pub fn complete(&self, response: ResponseEnvelope) -> Option<ResponseEnvelope> {
        let Some(pending) = self.pending.lock().remove(&response.id) else {
            return Some(response);
        };
        tracing::debug!(
            id = response.id,
            service = %pending.service_name,
            elapsed_ms = u64::try_from(pending.issued_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Request completed"
        );
        // The caller may have stopped waiting.
        let _ = pending.tx.send(Ok(response.data));
        None
    }

    /// Fail every pending call with [`CallError::ConnectionLost`].
    ///
    /// Returns how many calls were failed.
    pub fn reject_all(&self) -> usize {
        let drained: Vec<(u64, PendingRequest)> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (id, pending) in drained {
            let _ = pending.tx.send(Err(CallError::ConnectionLost { id }));
        }
        if count > 0 {
            tracing::warn!(count, "Rejected pending requests after connection loss");
        }
        count
    }

    /// Number of calls awaiting a response.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}
