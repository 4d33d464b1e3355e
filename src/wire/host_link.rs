//! Broker-side host link
//!
//! Wraps a framed stream to an executor host in the [`ExecutorLink`]
//! trait. A reader task resolves responses through the pending
//! registry and tracks the host's announced session count; a writer
//! task drains the outbound queue. The lifecycle token is cancelled
//! once either side tears the link down, which is how the broker
//! learns a host went away.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::EnvelopeCodec;
use crate::relay::{Envelope, ExecutorLink, LinkError, PendingRequests, RelayRequest};

/// Outbound frames queued while the writer catches up
const OUTBOUND_QUEUE: usize = 64;

/// Executor link over a framed host connection
pub struct HostLink {
    outbound: mpsc::Sender<Envelope>,
    connected: Arc<AtomicBool>,
    live_sessions: Arc<AtomicUsize>,
    lifecycle: CancellationToken,
}

impl HostLink {
    /// Takes ownership of a connected host stream and starts its
    /// reader and writer tasks
    ///
    /// The link greets the host with a `ready` frame and counts as
    /// attached only once the host has announced itself with at least
    /// one live session.
    pub fn spawn<S>(stream: S, pending: Arc<PendingRequests>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FramedRead::new(read_half, EnvelopeCodec);
        let mut writer = FramedWrite::new(write_half, EnvelopeCodec);

        let (outbound, mut outbound_rx) = mpsc::channel::<Envelope>(OUTBOUND_QUEUE);
        let connected = Arc::new(AtomicBool::new(false));
        let live_sessions = Arc::new(AtomicUsize::new(0));
        let lifecycle = CancellationToken::new();

        // Queued before the link is handed out, so it is the first frame
        let _ = outbound.try_send(Envelope::Ready {
            message: "query forwarder ready".to_string(),
        });

        let writer_token = lifecycle.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_token.cancelled() => break,
                    envelope = outbound_rx.recv() => match envelope {
                        Some(envelope) => {
                            if let Err(error) = writer.send(envelope).await {
                                warn!("Failed to write to host: {}", error);
                                writer_token.cancel();
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        let reader_token = lifecycle.clone();
        let reader_connected = connected.clone();
        let reader_sessions = live_sessions.clone();
        let reply = outbound.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_token.cancelled() => break,
                    frame = reader.next() => match frame {
                        Some(Ok(envelope)) => {
                            handle_frame(
                                envelope,
                                &reader_connected,
                                &reader_sessions,
                                &pending,
                                &reply,
                            )
                            .await;
                        }
                        Some(Err(error)) => {
                            warn!("Host stream error: {}", error);
                            break;
                        }
                        None => {
                            info!("Host closed the connection");
                            break;
                        }
                    },
                }
            }
            reader_token.cancel();
        });

        Self {
            outbound,
            connected,
            live_sessions,
            lifecycle,
        }
    }

    /// Sessions the host last announced
    pub fn live_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::SeqCst)
    }

    /// Token cancelled once the link is dead, whichever side ended it
    pub fn lifecycle(&self) -> CancellationToken {
        self.lifecycle.clone()
    }

    /// Tears the link down
    pub fn shutdown(&self) {
        self.lifecycle.cancel();
    }
}

async fn handle_frame(
    envelope: Envelope,
    connected: &AtomicBool,
    live_sessions: &AtomicUsize,
    pending: &PendingRequests,
    outbound: &mpsc::Sender<Envelope>,
) {
    match envelope {
        Envelope::Connected { sessions } => {
            info!("Host connected with {} live session(s)", sessions);
            live_sessions.store(sessions, Ordering::SeqCst);
            connected.store(true, Ordering::SeqCst);
        }
        Envelope::Status { sessions } => {
            debug!("Host reports {} live session(s)", sessions);
            live_sessions.store(sessions, Ordering::SeqCst);
        }
        Envelope::Response(response) => {
            pending.complete(response).await;
        }
        Envelope::Ping => {
            let _ = outbound.send(Envelope::Pong).await;
        }
        Envelope::Pong => {}
        Envelope::Error { message } => {
            warn!("Host reported an error: {}", message);
        }
        Envelope::Ready { .. } | Envelope::Query(_) => {
            debug!("Ignoring unexpected frame from host");
        }
    }
}

#[async_trait]
impl ExecutorLink for HostLink {
    fn name(&self) -> &'static str {
        "host"
    }

    async fn is_attached(&self) -> bool {
        !self.lifecycle.is_cancelled()
            && self.connected.load(Ordering::SeqCst)
            && self.live_sessions.load(Ordering::SeqCst) > 0
    }

    async fn forward(&self, request: &RelayRequest) -> Result<(), LinkError> {
        self.outbound
            .send(Envelope::Query(request.clone()))
            .await
            .map_err(|_| LinkError::ChannelClosed("host writer is gone".to_string()))
    }
}
