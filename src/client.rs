//! Forwarder client
//!
//! Talks to the broker's client port: one connection per query, a
//! single JSON request out, a single JSON reply back. A connection
//! refusal means no forwarder is running, reported as its own error
//! so callers can fail fast instead of waiting out a timeout.

use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::relay::{ClientRequest, CorrelationId, RelayResponse};
use crate::security::{GuardError, QueryGuard};

/// Default seconds to wait for the forwarder's reply
///
/// Longer than the relay's own executor timeout, so the structured
/// timeout answer normally arrives before this fires.
const DEFAULT_REPLY_TIMEOUT_SECS: u64 = 45;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Nothing is listening at the forwarder address
    #[error("Forwarder unavailable at {0}")]
    Unavailable(String),

    #[error("I/O error talking to the forwarder: {0}")]
    Io(#[from] std::io::Error),

    /// The local guard refused the query before it travelled
    #[error("Query rejected before submission: {0}")]
    Rejected(#[from] GuardError),

    #[error("No reply within {0}s")]
    TimedOut(u64),

    #[error("Invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Client for the broker's one-shot query protocol
pub struct RelayClient {
    addr: String,
    timeout: Duration,
    guard: Option<QueryGuard>,
}

impl RelayClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: Duration::from_secs(DEFAULT_REPLY_TIMEOUT_SECS),
            guard: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validates queries locally before they travel
    pub fn with_guard(mut self, guard: QueryGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Submits a query with no variables against the default endpoint
    pub async fn query(&self, query: &str) -> Result<RelayResponse, ClientError> {
        self.execute_query(query, Map::new(), None).await
    }

    /// Submits one query and returns the structured outcome
    ///
    /// A `Ok` return means the forwarder answered; whether the query
    /// itself succeeded is `RelayResponse::success`.
    pub async fn execute_query(
        &self,
        query: &str,
        variables: Map<String, Value>,
        endpoint: Option<String>,
    ) -> Result<RelayResponse, ClientError> {
        if let Some(guard) = &self.guard {
            guard.validate(query)?;
        }

        let id = CorrelationId::generate();
        debug!("Submitting query {} to {}", id, self.addr);
        let request = ClientRequest::ExecuteQuery {
            id: Some(id),
            query: query.to_string(),
            variables,
            endpoint,
        };
        let payload = serde_json::to_vec(&request)?;

        tokio::time::timeout(self.timeout, self.round_trip(&payload))
            .await
            .map_err(|_| ClientError::TimedOut(self.timeout.as_secs()))?
    }

    async fn round_trip(&self, payload: &[u8]) -> Result<RelayResponse, ClientError> {
        let mut stream = TcpStream::connect(self.addr.as_str()).await.map_err(|error| {
            if error.kind() == std::io::ErrorKind::ConnectionRefused {
                ClientError::Unavailable(self.addr.clone())
            } else {
                ClientError::Io(error)
            }
        })?;

        stream.write_all(payload).await?;
        stream.shutdown().await?;

        // The reply is one JSON document; read until it parses
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = stream.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if serde_json::from_slice::<serde::de::IgnoredAny>(&buffer).is_ok() {
                break;
            }
        }
        Ok(serde_json::from_slice(&buffer)?)
    }
}
