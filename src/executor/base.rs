//! Executor trait

use async_trait::async_trait;

use crate::relay::{RelayRequest, RelayResponse};

/// A context able to run queries against an authenticated session
///
/// Execution never fails at the call level: whatever goes wrong, HTTP
/// or otherwise, comes back as a failed response carrying the
/// request's correlation id, so the error can cross hops as data.
#[async_trait]
pub trait Executor: Send + Sync {
    /// GraphQL endpoint this executor's session belongs to
    fn endpoint(&self) -> &str;

    /// Runs one query and reports the outcome
    async fn execute(&self, request: &RelayRequest) -> RelayResponse;
}
