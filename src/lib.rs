//! QForward - Replay authenticated GraphQL queries through a live page session
//!
//! A local forwarder that carries GraphQL queries from any client into
//! the context of a logged-in page and brings the result back, so
//! scripts can use an existing session instead of managing their own
//! credentials.
//!
//! ## Features
//!
//! - CSRF token discovery from the page environment (config object,
//!   meta tag, cookie, inline script) with percent-decoding
//! - Correlation-id matched relay with fail-fast when no session is
//!   live, single dispatch, and per-request timeout
//! - Session executor replaying the page's cookies and headers against
//!   the GraphQL endpoint
//! - Length-prefixed JSON frames between broker and executor host
//! - One-shot JSON client protocol with optional query validation
//!
//! ## Architecture
//!
//! The crate is organized as a pipeline of hops:
//!
//! - **Credential**: ordered probes that recover the CSRF token
//! - **Relay**: pending-response registry, executor links, the engine
//! - **Executor**: session-backed query execution and the registry
//! - **Wire**: the framed transport and both of its endpoints
//! - **Broker**: the two-port daemon core
//! - **Security**: query validation and log sanitization

pub mod broker;
pub mod client;
pub mod config;
pub mod credential;
pub mod executor;
pub mod relay;
pub mod security;
pub mod wire;

pub use broker::{Broker, BrokerError};
pub use client::{ClientError, RelayClient};
pub use config::ForwarderConfig;
pub use relay::{Relay, RelayError, RelayRequest, RelayResponse};
