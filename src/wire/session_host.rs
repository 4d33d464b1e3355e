//! Executor-side session host
//!
//! The loop a session-holding process runs against the broker's host
//! port: announce the live session count, execute incoming queries
//! through the registry, and push count changes and keepalives back
//! over the frame.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::{CodecError, EnvelopeCodec};
use crate::executor::SessionRegistry;
use crate::relay::{Envelope, ErrorInfo, RelayResponse};

/// Responses queued while the writer catches up
const RESPONSE_QUEUE: usize = 64;

/// Default keepalive period
const KEEPALIVE_SECS: u64 = 30;

/// Serves this process's sessions to a broker over a framed stream
pub struct SessionHost {
    registry: Arc<SessionRegistry>,
    keepalive: Duration,
}

impl SessionHost {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            keepalive: Duration::from_secs(KEEPALIVE_SECS),
        }
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Runs the host loop until the stream ends or `shutdown` fires
    ///
    /// Announces `connected` with the current session count first,
    /// then serves queries concurrently; each execution runs in its
    /// own task so a slow query never blocks the frame.
    pub async fn run<S>(&self, stream: S, shutdown: CancellationToken) -> Result<(), CodecError>
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FramedRead::new(read_half, EnvelopeCodec);
        let mut writer = FramedWrite::new(write_half, EnvelopeCodec);

        let mut counts = self.registry.watch_count();
        let (responses_tx, mut responses_rx) = mpsc::channel::<Envelope>(RESPONSE_QUEUE);

        let sessions = self.registry.live_count().await;
        info!("Announcing {} live session(s) to the broker", sessions);
        writer.send(Envelope::Connected { sessions }).await?;

        let start = tokio::time::Instant::now() + self.keepalive;
        let mut keepalive = tokio::time::interval_at(start, self.keepalive);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Session host shutting down");
                    break;
                }

                frame = reader.next() => match frame {
                    Some(Ok(Envelope::Query(request))) => {
                        match self.registry.find_for(request.endpoint.as_deref()).await {
                            Some(executor) => {
                                let responses = responses_tx.clone();
                                tokio::spawn(async move {
                                    let response = executor.execute(&request).await;
                                    let _ = responses.send(Envelope::Response(response)).await;
                                });
                            }
                            None => {
                                warn!("Query {} arrived with no live session", request.id);
                                writer
                                    .send(Envelope::Response(RelayResponse::failure(
                                        request.id,
                                        ErrorInfo::message("No live session for this query"),
                                    )))
                                    .await?;
                            }
                        }
                    }
                    Some(Ok(Envelope::Ready { message })) => {
                        debug!("Broker is ready: {}", message);
                    }
                    Some(Ok(Envelope::Ping)) => {
                        writer.send(Envelope::Pong).await?;
                    }
                    Some(Ok(Envelope::Pong)) => {}
                    Some(Ok(other)) => {
                        debug!("Ignoring unexpected frame from broker: {:?}", other);
                    }
                    Some(Err(error)) => {
                        warn!("Broker stream error: {}", error);
                        return Err(error);
                    }
                    None => {
                        info!("Broker closed the connection");
                        break;
                    }
                },

                Some(envelope) = responses_rx.recv() => {
                    writer.send(envelope).await?;
                }

                changed = counts.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let sessions = *counts.borrow_and_update();
                    writer.send(Envelope::Status { sessions }).await?;
                }

                _ = keepalive.tick() => {
                    writer.send(Envelope::Ping).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::relay::RelayRequest;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::io::DuplexStream;

    struct StubExecutor;

    #[async_trait]
    impl Executor for StubExecutor {
        fn endpoint(&self) -> &str {
            "https://canvas.example.edu/api/graphql"
        }

        async fn execute(&self, request: &RelayRequest) -> RelayResponse {
            RelayResponse::success(request.id.clone(), Some(json!({ "echo": request.query })))
        }
    }

    struct BrokerSide {
        reader: FramedRead<tokio::io::ReadHalf<DuplexStream>, EnvelopeCodec>,
        writer: FramedWrite<tokio::io::WriteHalf<DuplexStream>, EnvelopeCodec>,
    }

    impl BrokerSide {
        async fn frame_matching<F>(&mut self, predicate: F) -> Envelope
        where
            F: Fn(&Envelope) -> bool,
        {
            tokio::time::timeout(Duration::from_secs(2), async {
                loop {
                    let frame = self.reader.next().await.unwrap().unwrap();
                    if predicate(&frame) {
                        return frame;
                    }
                }
            })
            .await
            .unwrap()
        }
    }

    fn running_host(
        registry: Arc<SessionRegistry>,
        shutdown: CancellationToken,
    ) -> (BrokerSide, tokio::task::JoinHandle<Result<(), CodecError>>) {
        let (host_stream, broker_stream) = tokio::io::duplex(64 * 1024);
        let handle = tokio::spawn(async move {
            SessionHost::new(registry)
                .run(host_stream, shutdown)
                .await
        });
        let (read_half, write_half) = tokio::io::split(broker_stream);
        (
            BrokerSide {
                reader: FramedRead::new(read_half, EnvelopeCodec),
                writer: FramedWrite::new(write_half, EnvelopeCodec),
            },
            handle,
        )
    }

    #[tokio::test]
    async fn test_announces_connected_with_count() {
        let registry = Arc::new(SessionRegistry::new());
        registry.attach(Arc::new(StubExecutor)).await;

        let (mut broker, _handle) = running_host(registry, CancellationToken::new());
        let frame = broker
            .frame_matching(|f| matches!(f, Envelope::Connected { .. }))
            .await;
        assert_eq!(frame, Envelope::Connected { sessions: 1 });
    }

    #[tokio::test]
    async fn test_query_is_executed_and_answered() {
        let registry = Arc::new(SessionRegistry::new());
        registry.attach(Arc::new(StubExecutor)).await;

        let (mut broker, _handle) = running_host(registry, CancellationToken::new());
        broker
            .writer
            .send(Envelope::Query(
                RelayRequest::new("query { one }").with_id("req-1".into()),
            ))
            .await
            .unwrap();

        let frame = broker
            .frame_matching(|f| matches!(f, Envelope::Response(_)))
            .await;
        match frame {
            Envelope::Response(response) => {
                assert_eq!(response.id, "req-1".into());
                assert!(response.success);
                assert_eq!(response.data, Some(json!({ "echo": "query { one }" })));
            }
            other => panic!("expected response frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_without_sessions_fails_structurally() {
        let registry = Arc::new(SessionRegistry::new());
        let (mut broker, _handle) = running_host(registry, CancellationToken::new());

        broker
            .writer
            .send(Envelope::Query(
                RelayRequest::new("query { one }").with_id("req-2".into()),
            ))
            .await
            .unwrap();

        let frame = broker
            .frame_matching(|f| matches!(f, Envelope::Response(_)))
            .await;
        match frame {
            Envelope::Response(response) => {
                assert_eq!(response.id, "req-2".into());
                assert!(!response.success);
                assert!(response.error.unwrap().message.contains("No live session"));
            }
            other => panic!("expected response frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_changes_announced_as_status() {
        let registry = Arc::new(SessionRegistry::new());
        let (mut broker, _handle) = running_host(registry.clone(), CancellationToken::new());

        broker
            .frame_matching(|f| matches!(f, Envelope::Connected { sessions: 0 }))
            .await;

        registry.attach(Arc::new(StubExecutor)).await;
        let frame = broker
            .frame_matching(|f| matches!(f, Envelope::Status { .. }))
            .await;
        assert_eq!(frame, Envelope::Status { sessions: 1 });
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let registry = Arc::new(SessionRegistry::new());
        let (mut broker, _handle) = running_host(registry, CancellationToken::new());

        broker.writer.send(Envelope::Ping).await.unwrap();
        broker.frame_matching(|f| matches!(f, Envelope::Pong)).await;
    }

    #[tokio::test]
    async fn test_shutdown_token_ends_run() {
        let registry = Arc::new(SessionRegistry::new());
        let shutdown = CancellationToken::new();
        let (_broker, handle) = running_host(registry, shutdown.clone());

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_keepalive_ping_sent() {
        let registry = Arc::new(SessionRegistry::new());
        let shutdown = CancellationToken::new();
        let (host_stream, broker_stream) = tokio::io::duplex(64 * 1024);
        let _handle = tokio::spawn(async move {
            SessionHost::new(registry)
                .with_keepalive(Duration::from_millis(50))
                .run(host_stream, shutdown)
                .await
        });

        let (read_half, write_half) = tokio::io::split(broker_stream);
        let mut broker = BrokerSide {
            reader: FramedRead::new(read_half, EnvelopeCodec),
            writer: FramedWrite::new(write_half, EnvelopeCodec),
        };
        broker.frame_matching(|f| matches!(f, Envelope::Ping)).await;
    }
}
