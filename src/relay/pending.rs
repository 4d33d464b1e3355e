//! Pending-response registry
//!
//! The one piece of shared state in the relay: a correlation-id keyed
//! map of waiting callers, safe under concurrent registration and
//! resolution. A response whose id is no longer in the map is late;
//! it gets dropped here as a lookup miss.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace, warn};

use super::engine::RelayError;
use super::message::{CorrelationId, RelayResponse};

/// What a waiting caller eventually receives
pub type RelayOutcome = Result<RelayResponse, RelayError>;

/// Lifecycle of a relayed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// Registered, not yet handed to a link
    Created,
    /// Handed to the link
    Dispatched,
    /// Caller is waiting for the executor's reply
    AwaitingResponse,
    /// Response delivered to the caller
    Completed,
    /// Caller gave up waiting
    TimedOut,
    /// Transport dropped before a response arrived
    TransportFailed,
}

impl RequestPhase {
    /// True once the request can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::TimedOut | Self::TransportFailed
        )
    }

    /// True while a response could still arrive
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }
}

struct PendingEntry {
    tx: oneshot::Sender<RelayOutcome>,
    phase: RequestPhase,
    registered_at: DateTime<Utc>,
}

/// Correlation-id keyed registry of waiting callers
pub struct PendingRequests {
    entries: Mutex<HashMap<CorrelationId, PendingEntry>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a caller and returns the handle its outcome arrives on
    pub async fn register(&self, id: CorrelationId) -> oneshot::Receiver<RelayOutcome> {
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry {
            tx,
            phase: RequestPhase::Created,
            registered_at: Utc::now(),
        };
        if self.entries.lock().await.insert(id.clone(), entry).is_some() {
            warn!("Replaced pending entry for duplicate correlation id {}", id);
        }
        rx
    }

    /// Marks the request as handed to a link
    pub async fn mark_dispatched(&self, id: &CorrelationId) {
        self.set_phase(id, RequestPhase::Dispatched).await;
    }

    /// Marks the caller as waiting on the executor
    pub async fn mark_awaiting(&self, id: &CorrelationId) {
        self.set_phase(id, RequestPhase::AwaitingResponse).await;
    }

    async fn set_phase(&self, id: &CorrelationId, phase: RequestPhase) {
        if let Some(entry) = self.entries.lock().await.get_mut(id) {
            trace!("Request {} entering phase {:?}", id, phase);
            entry.phase = phase;
        }
    }

    /// Current phase, while the request is still pending
    pub async fn phase_of(&self, id: &CorrelationId) -> Option<RequestPhase> {
        self.entries.lock().await.get(id).map(|entry| entry.phase)
    }

    /// Number of requests currently in flight
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Resolves a pending request with its response
    ///
    /// Returns false on a lookup miss: the caller stopped waiting or
    /// never existed, and the response is dropped.
    pub async fn complete(&self, response: RelayResponse) -> bool {
        let entry = self.entries.lock().await.remove(&response.id);
        match entry {
            Some(entry) => {
                let waited = Utc::now() - entry.registered_at;
                debug!(
                    "Completing request {} after {}ms",
                    response.id,
                    waited.num_milliseconds()
                );
                let _ = entry.tx.send(Ok(response));
                true
            }
            None => {
                warn!(
                    "No pending request for correlation id {}, dropping response",
                    response.id
                );
                false
            }
        }
    }

    /// Drops a pending entry without notifying the caller
    ///
    /// Used when the caller itself stopped waiting (timeout) or when
    /// dispatch never happened.
    pub async fn abandon(&self, id: &CorrelationId) {
        self.entries.lock().await.remove(id);
    }

    /// Fails every in-flight request, e.g. when the transport drops
    pub async fn fail_all(&self, reason: &str) {
        let mut entries = self.entries.lock().await;
        if entries.is_empty() {
            return;
        }
        warn!("Failing {} in-flight request(s): {}", entries.len(), reason);
        for (_, entry) in entries.drain() {
            let _ = entry.tx.send(Err(RelayError::TransportFailed(reason.to_string())));
        }
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}
