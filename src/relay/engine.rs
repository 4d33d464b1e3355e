//! Relay engine
//!
//! Owns the pending registry and the current executor link, and walks
//! each request through its lifecycle: fail-fast availability check,
//! a single delivery attempt, then a correlated wait with timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::link::{ExecutorLink, LinkError};
use super::message::{RelayRequest, RelayResponse};
use super::pending::PendingRequests;

/// Default seconds a caller waits for the executor
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Relay-level failures
///
/// Distinct from errors the executor reports inside a response: these
/// mean the query never ran, or its result never made it back.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No executor reachable; raised before any delivery attempt
    #[error("No executor available: {0}")]
    TransportUnavailable(String),

    /// The transport dropped after dispatch, before a response
    #[error("Transport failed: {0}")]
    TransportFailed(String),

    /// The executor did not answer in time
    #[error("Timed out after {0}s waiting for the executor")]
    TimedOut(u64),
}

struct LinkSlot {
    generation: u64,
    link: Arc<dyn ExecutorLink>,
}

/// Cross-context request relay
pub struct Relay {
    pending: Arc<PendingRequests>,
    link: RwLock<Option<LinkSlot>>,
    next_generation: AtomicU64,
    timeout: Duration,
}

impl Relay {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            pending: Arc::new(PendingRequests::new()),
            link: RwLock::new(None),
            next_generation: AtomicU64::new(1),
            timeout,
        }
    }

    /// Shared pending registry, for links that resolve responses
    pub fn pending(&self) -> Arc<PendingRequests> {
        self.pending.clone()
    }

    /// Attaches the link requests are forwarded over, replacing any
    /// previous one
    ///
    /// Returns a generation to pass back to [`Relay::detach_link`], so
    /// a stale link going away cannot tear down its replacement.
    pub async fn attach_link(&self, link: Arc<dyn ExecutorLink>) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        info!(
            "Attaching {} executor link (generation {})",
            link.name(),
            generation
        );
        *self.link.write().await = Some(LinkSlot { generation, link });
        generation
    }

    /// Detaches the link if the generation still matches, failing all
    /// requests in flight over it
    pub async fn detach_link(&self, generation: u64, reason: &str) {
        let mut slot = self.link.write().await;
        match slot.as_ref() {
            Some(current) if current.generation == generation => {
                warn!(
                    "Detaching {} executor link: {}",
                    current.link.name(),
                    reason
                );
                *slot = None;
                drop(slot);
                self.pending.fail_all(reason).await;
            }
            _ => {
                // a newer link already took over
            }
        }
    }

    /// Whether a link with a live executor is attached
    pub async fn is_available(&self) -> bool {
        match self.link.read().await.as_ref() {
            Some(slot) => slot.link.is_attached().await,
            None => false,
        }
    }

    /// Relays one request to the executor and awaits its response
    ///
    /// Exactly one delivery attempt; resubmission is the caller's
    /// decision. When no live executor is reachable this returns
    /// [`RelayError::TransportUnavailable`] immediately, without
    /// dispatching anything. After a timeout the caller stops waiting
    /// but the executor is not chased down; a late response is dropped
    /// on lookup miss.
    pub async fn execute(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        let link = {
            let slot = self.link.read().await;
            match slot.as_ref() {
                Some(slot) if slot.link.is_attached().await => slot.link.clone(),
                Some(slot) => {
                    return Err(RelayError::TransportUnavailable(format!(
                        "{} link has no live executor",
                        slot.link.name()
                    )))
                }
                None => {
                    return Err(RelayError::TransportUnavailable(
                        "no executor link attached".to_string(),
                    ))
                }
            }
        };

        let id = request.id.clone();
        let receiver = self.pending.register(id.clone()).await;

        if let Err(error) = link.forward(&request).await {
            self.pending.abandon(&id).await;
            return Err(match error {
                LinkError::NoExecutor(detail) => RelayError::TransportUnavailable(detail),
                LinkError::ChannelClosed(detail) => RelayError::TransportFailed(detail),
            });
        }
        self.pending.mark_dispatched(&id).await;
        self.pending.mark_awaiting(&id).await;

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_closed)) => Err(RelayError::TransportFailed(
                "response channel closed".to_string(),
            )),
            Err(_elapsed) => {
                self.pending.abandon(&id).await;
                warn!(
                    "Request {} timed out after {}s",
                    id,
                    self.timeout.as_secs()
                );
                Err(RelayError::TimedOut(self.timeout.as_secs()))
            }
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}
