//! Executor module - Authenticated query execution
//!
//! Runs GraphQL queries through a page session's ambient credentials:
//! - `Executor` trait, the seam between the relay and a session
//! - `SessionExecutor`, reqwest-backed with a cookie jar and fresh
//!   CSRF discovery per request
//! - `SessionRegistry`, the live sessions with endpoint affinity

mod base;
mod registry;
mod session;

pub use base::Executor;
pub use registry::{SessionId, SessionRegistry};
pub use session::{SessionConfig, SessionExecutor};
