//! Request/response correlation
//!
//! Matches an outbound CALL to its eventual CALLRESULT/CALLERROR by unique
//! id. A caller awaiting [`CorrelationTable::send`] suspends until the
//! matching response arrives, the per-call timeout elapses, or the session
//! is torn down. Registration and resolution go through one locked map, so
//! `send` and `resolve` never race on the same id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::OcppError;
use crate::frame::{Call, OcppMessage};

/// The settled result of one call
pub type CallOutcome = Result<Value, OcppError>;

/// Outstanding request awaiting its response
struct PendingCall {
    action: String,
    sent_at: Instant,
    deadline: Instant,
    response_tx: oneshot::Sender<CallOutcome>,
}

/// Tracks outstanding requests by unique id.
///
/// Clonable; all clones share the same pending map and outgoing channel.
#[derive(Clone)]
pub struct CorrelationTable {
    pending: Arc<RwLock<HashMap<String, PendingCall>>>,
    outgoing: mpsc::Sender<OcppMessage>,
    timeout: Duration,
}

impl CorrelationTable {
    /// Create a table transmitting calls through `outgoing`
    pub fn new(outgoing: mpsc::Sender<OcppMessage>, timeout: Duration) -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
            outgoing,
            timeout,
        }
    }

    /// Send a call and await its settled outcome.
    ///
    /// Allocates a fresh unique id, records the pending entry, transmits,
    /// and suspends. On timeout the entry is removed first, so a late
    /// response becomes a no-op.
    pub async fn send(&self, action: &str, payload: Value) -> CallOutcome {
        let unique_id = self.fresh_id().await;
        let (response_tx, response_rx) = oneshot::channel();
        let sent_at = Instant::now();

        {
            let mut pending = self.pending.write().await;
            pending.insert(
                unique_id.clone(),
                PendingCall {
                    action: action.to_string(),
                    sent_at,
                    deadline: sent_at + self.timeout,
                    response_tx,
                },
            );
        }

        let call = Call {
            unique_id: unique_id.clone(),
            action: action.to_string(),
            payload,
        };

        if self.outgoing.send(OcppMessage::Call(call)).await.is_err() {
            self.pending.write().await.remove(&unique_id);
            return Err(OcppError::TransportClosed);
        }

        match tokio::time::timeout(self.timeout, response_rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without resolving: the session went away
            Ok(Err(_)) => Err(OcppError::Cancelled),
            Err(_) => {
                let mut pending = self.pending.write().await;
                if let Some(entry) = pending.remove(&unique_id) {
                    let overdue = Instant::now().saturating_duration_since(entry.deadline);
                    warn!(
                        action = %entry.action,
                        unique_id = %unique_id,
                        elapsed_ms = entry.sent_at.elapsed().as_millis() as u64,
                        overdue_ms = overdue.as_millis() as u64,
                        "call timed out"
                    );
                }
                Err(OcppError::Timeout)
            }
        }
    }

    /// Settle the pending call with the given id.
    ///
    /// An id with no matching entry is a no-op; this protects against
    /// duplicate or late responses.
    pub async fn resolve(&self, unique_id: &str, outcome: CallOutcome) {
        let entry = self.pending.write().await.remove(unique_id);
        match entry {
            Some(pending) => {
                let _ = pending.response_tx.send(outcome);
            }
            None => {
                debug!(unique_id, "response for unknown or expired call, ignoring");
            }
        }
    }

    /// Settle every pending call as cancelled
    pub async fn cancel_all(&self) {
        let mut pending = self.pending.write().await;
        for (unique_id, entry) in pending.drain() {
            debug!(unique_id = %unique_id, action = %entry.action, "cancelling pending call");
            let _ = entry.response_tx.send(Err(OcppError::Cancelled));
        }
    }

    /// Number of calls currently awaiting a response
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    async fn fresh_id(&self) -> String {
        // UUIDs collide with pending ids only in theory, but the invariant
        // is "never reuse an id while pending", so check anyway.
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.pending.read().await.contains_key(&id) {
                return id;
            }
        }
    }
}
