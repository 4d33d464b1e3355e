//! Relay module - Cross-context request relay
//!
//! Carries a query from the caller to whichever context holds the
//! live session and brings the structured result back:
//! - Correlation-id matched request and response shapes
//! - A concurrent pending-response registry
//! - Executor links, in-process or over a framed socket
//! - The engine tying them together with fail-fast and timeout

mod engine;
mod link;
mod message;
mod pending;

pub use engine::{Relay, RelayError, DEFAULT_TIMEOUT_SECS};
pub use link::{ExecutorLink, LinkError, LocalLink};
pub use message::{ClientRequest, CorrelationId, Envelope, ErrorInfo, RelayRequest, RelayResponse};
pub use pending::{PendingRequests, RelayOutcome, RequestPhase};
