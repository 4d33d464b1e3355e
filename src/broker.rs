//! Request broker
//!
//! The forwarder daemon's core: two local listeners, one for executor
//! hosts and one for clients. A host that connects becomes the
//! relay's link; the newest host always wins. Clients speak a one-shot
//! protocol: connect, write a single JSON request, read a single JSON
//! reply, disconnect.

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ForwarderConfig;
use crate::relay::{
    ClientRequest, CorrelationId, ErrorInfo, Relay, RelayRequest, RelayResponse,
};
use crate::security::{GuardError, QueryGuard};
use crate::wire::HostLink;

/// Largest accepted client request document
const MAX_CLIENT_REQUEST_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),

    #[error("Query guard setup failed: {0}")]
    Guard(#[from] GuardError),
}

/// Two-port broker between clients and the executor host
pub struct Broker {
    config: ForwarderConfig,
    relay: Arc<Relay>,
    guard: Option<Arc<QueryGuard>>,
    client_listener: TcpListener,
    host_listener: TcpListener,
}

impl Broker {
    /// Binds both listeners and prepares the relay
    pub async fn bind(config: ForwarderConfig) -> Result<Self, BrokerError> {
        let client_listener = TcpListener::bind(config.client_bind.as_str()).await?;
        let host_listener = TcpListener::bind(config.host_bind.as_str()).await?;
        info!("Client port listening on {}", client_listener.local_addr()?);
        info!("Host port listening on {}", host_listener.local_addr()?);

        let guard = if config.validate_queries {
            Some(Arc::new(QueryGuard::new()?))
        } else {
            None
        };

        Ok(Self {
            relay: Arc::new(Relay::with_timeout(config.request_timeout())),
            config,
            guard,
            client_listener,
            host_listener,
        })
    }

    /// Bound client-port address, resolved after an ephemeral bind
    pub fn client_addr(&self) -> std::io::Result<SocketAddr> {
        self.client_listener.local_addr()
    }

    /// Bound host-port address
    pub fn host_addr(&self) -> std::io::Result<SocketAddr> {
        self.host_listener.local_addr()
    }

    pub fn relay(&self) -> Arc<Relay> {
        self.relay.clone()
    }

    /// Serves both ports until the token fires
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), BrokerError> {
        let Broker {
            config,
            relay,
            guard,
            client_listener,
            host_listener,
        } = self;
        let mut current_host: Option<(Arc<HostLink>, u64)> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Broker shutting down");
                    if let Some((host, _)) = current_host.take() {
                        host.shutdown();
                    }
                    break;
                }

                accepted = host_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("Executor host attached from {}", peer);
                        if let Some((previous, displaced)) = current_host.take() {
                            warn!("Replacing previous executor host");
                            previous.shutdown();
                            // Detached inline: the old link's monitor may
                            // only run after the new attach, where its
                            // stale generation no-ops
                            relay.detach_link(displaced, "executor host replaced").await;
                        }

                        let link = Arc::new(HostLink::spawn(stream, relay.pending()));
                        let generation = relay.attach_link(link.clone()).await;

                        // Detach exactly this link when it dies; a
                        // replacement carries a newer generation
                        let lifecycle = link.lifecycle();
                        let relay_for_close = relay.clone();
                        tokio::spawn(async move {
                            lifecycle.cancelled().await;
                            relay_for_close
                                .detach_link(generation, "executor host disconnected")
                                .await;
                        });
                        current_host = Some((link, generation));
                    }
                    Err(error) => warn!("Host accept failed: {}", error),
                },

                accepted = client_listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("Client connected from {}", peer);
                        let relay = relay.clone();
                        let guard = guard.clone();
                        let default_endpoint = config.default_endpoint.clone();
                        tokio::spawn(async move {
                            if let Err(error) =
                                serve_client(stream, relay, guard, default_endpoint).await
                            {
                                debug!("Client {} dropped: {}", peer, error);
                            }
                        });
                    }
                    Err(error) => warn!("Client accept failed: {}", error),
                },
            }
        }
        Ok(())
    }
}

/// Handles one client connection end to end
async fn serve_client(
    mut stream: TcpStream,
    relay: Arc<Relay>,
    guard: Option<Arc<QueryGuard>>,
    default_endpoint: String,
) -> std::io::Result<()> {
    let document = match read_json_document(&mut stream).await? {
        Some(document) => document,
        None => return Ok(()),
    };

    let reply =
        handle_client_document(&document, &relay, guard.as_deref(), &default_endpoint).await;
    let bytes = serde_json::to_vec(&reply).unwrap_or_else(|_| b"{}".to_vec());
    stream.write_all(&bytes).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Reads until the buffer parses as one JSON document
///
/// Clients may write the document in pieces; framing is byte
/// accumulation with a parse attempt per read. `None` means the
/// client went away before completing a document.
async fn read_json_document(stream: &mut TcpStream) -> std::io::Result<Option<Vec<u8>>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(if buffer.is_empty() { None } else { Some(buffer) });
        }
        buffer.extend_from_slice(&chunk[..read]);
        if serde_json::from_slice::<serde::de::IgnoredAny>(&buffer).is_ok() {
            return Ok(Some(buffer));
        }
        // Stop accumulating at the cap; the parser reports the rest
        if buffer.len() > MAX_CLIENT_REQUEST_BYTES {
            return Ok(Some(buffer));
        }
    }
}

async fn handle_client_document(
    document: &[u8],
    relay: &Relay,
    guard: Option<&QueryGuard>,
    default_endpoint: &str,
) -> Value {
    let request: ClientRequest = match serde_json::from_slice(document) {
        Ok(request) => request,
        Err(error) => {
            warn!("Rejecting malformed client request: {}", error);
            return json!({
                "success": false,
                "error": { "message": format!("Invalid request: {}", error) },
            });
        }
    };

    let ClientRequest::ExecuteQuery {
        id,
        query,
        variables,
        endpoint,
    } = request;
    let id = id.unwrap_or_else(CorrelationId::generate);

    if let Some(guard) = guard {
        if let Err(violation) = guard.validate(&query) {
            warn!("Query {} rejected: {}", id, violation);
            return response_value(RelayResponse::failure(
                id,
                ErrorInfo::message(format!("Query rejected: {}", violation)),
            ));
        }
    }

    let request = RelayRequest {
        id: id.clone(),
        query,
        variables,
        endpoint: endpoint.or_else(|| Some(default_endpoint.to_string())),
    };

    match relay.execute(request).await {
        Ok(response) => response_value(response),
        Err(error) => {
            debug!("Query {} failed in the relay: {}", id, error);
            response_value(RelayResponse::failure(id, ErrorInfo::message(error.to_string())))
        }
    }
}

fn response_value(response: RelayResponse) -> Value {
    serde_json::to_value(&response).unwrap_or_else(|_| json!({ "success": false }))
}
