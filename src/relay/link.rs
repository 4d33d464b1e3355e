//! Executor links
//!
//! A link is the hop that carries a query toward whatever context
//! holds the live session. The relay drives an in-process executor
//! and a framed socket to a remote host through the same trait, so
//! the engine never knows which one it is talking to.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::message::RelayRequest;
use super::pending::PendingRequests;
use crate::executor::SessionRegistry;

/// Errors raised while handing a request to a link
#[derive(Debug, Error)]
pub enum LinkError {
    /// No executor is reachable behind this link
    #[error("No executor available: {0}")]
    NoExecutor(String),

    /// The channel to the executor dropped
    #[error("Executor channel closed: {0}")]
    ChannelClosed(String),
}

/// One hop toward the executor context
#[async_trait]
pub trait ExecutorLink: Send + Sync {
    /// Short name for diagnostics
    fn name(&self) -> &'static str;

    /// Whether a live executor is currently reachable
    ///
    /// Checked before dispatch so an unreachable executor fails fast
    /// instead of timing out.
    async fn is_attached(&self) -> bool;

    /// Hands a request to the link
    ///
    /// Delivery only; the response comes back through the pending
    /// registry.
    async fn forward(&self, request: &RelayRequest) -> Result<(), LinkError>;
}

/// Direct link to executors living in this process
pub struct LocalLink {
    registry: Arc<SessionRegistry>,
    pending: Arc<PendingRequests>,
}

impl LocalLink {
    pub fn new(registry: Arc<SessionRegistry>, pending: Arc<PendingRequests>) -> Self {
        Self { registry, pending }
    }
}

#[async_trait]
impl ExecutorLink for LocalLink {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn is_attached(&self) -> bool {
        self.registry.live_count().await > 0
    }

    async fn forward(&self, request: &RelayRequest) -> Result<(), LinkError> {
        let executor = self
            .registry
            .find_for(request.endpoint.as_deref())
            .await
            .ok_or_else(|| LinkError::NoExecutor("no live session".to_string()))?;

        debug!("Forwarding request {} to a local session", request.id);

        let pending = self.pending.clone();
        let request = request.clone();
        tokio::spawn(async move {
            let response = executor.execute(&request).await;
            pending.complete(response).await;
        });
        Ok(())
    }
}
