//! Session-backed query execution
//!
//! Replays the ambient credentials of a logged-in page: cookies ride
//! in the client's jar, the CSRF token is discovered fresh from the
//! page environment on every request, and the headers present the
//! query the way the page itself would.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::base::Executor;
use crate::config::ForwarderConfig;
use crate::credential::{discover, PageEnvironment, DEFAULT_MIN_TOKEN_LENGTH};
use crate::relay::{ErrorInfo, RelayRequest, RelayResponse};
use crate::security::Sanitizer;

/// Accept header the endpoint expects from in-page requests
const GRAPHQL_ACCEPT: &str =
    "application/json+canvas-string-ids, application/json, text/plain, */*";

/// Canonical CSRF header name
const CSRF_HEADER: &str = "X-CSRF-Token";

/// Where a session lives and how its requests present themselves
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Default GraphQL endpoint queries go to
    pub endpoint: String,
    /// URL of the page whose context this session replays
    pub page_url: String,
    /// Shortest CSRF token the discovery probes will accept
    pub min_token_length: usize,
    /// Per-request timeout
    pub timeout: Duration,
}

impl SessionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let page_url = origin_of(&endpoint)
            .map(|origin| format!("{}/", origin))
            .unwrap_or_else(|| endpoint.clone());
        Self {
            endpoint,
            page_url,
            min_token_length: DEFAULT_MIN_TOKEN_LENGTH,
            timeout: Duration::from_secs(30),
        }
    }

    /// Derives a session config from the forwarder's settings
    ///
    /// Hosts loading the shared config file run against the same
    /// endpoint, token threshold, and timeout as the daemon.
    pub fn from_forwarder(config: &ForwarderConfig) -> Self {
        Self::new(config.default_endpoint.clone())
            .with_min_token_length(config.min_token_length)
            .with_timeout(config.request_timeout())
    }

    pub fn with_page_url(mut self, page_url: impl Into<String>) -> Self {
        self.page_url = page_url.into();
        self
    }

    pub fn with_min_token_length(mut self, min_token_length: usize) -> Self {
        self.min_token_length = min_token_length;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Executor that replays an authenticated page session over HTTP
pub struct SessionExecutor {
    config: SessionConfig,
    client: reqwest::Client,
    environment: RwLock<Arc<dyn PageEnvironment>>,
}

impl SessionExecutor {
    /// Builds an executor around a page environment
    ///
    /// The client keeps its own cookie jar, so session cookies set by
    /// the endpoint persist across queries.
    pub fn new(
        config: SessionConfig,
        environment: Arc<dyn PageEnvironment>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            config,
            client,
            environment: RwLock::new(environment),
        })
    }

    /// Swaps in a fresh page environment, e.g. after a page reload
    ///
    /// The next query discovers its token from the new environment.
    pub async fn update_environment(&self, environment: Arc<dyn PageEnvironment>) {
        *self.environment.write().await = environment;
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[async_trait]
impl Executor for SessionExecutor {
    fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    async fn execute(&self, request: &RelayRequest) -> RelayResponse {
        let endpoint = request.endpoint.as_deref().unwrap_or(&self.config.endpoint);

        // Tokens rotate with the page, so discovery runs per request
        let environment = self.environment.read().await.clone();
        let token = discover(environment.as_ref(), self.config.min_token_length);
        if token.is_none() {
            warn!(
                "No CSRF token discovered for {}, sending without one",
                Sanitizer::sanitize_url(endpoint)
            );
        }

        let body = serde_json::json!({
            "query": request.query,
            "variables": request.variables,
        });

        let mut builder = self
            .client
            .post(endpoint)
            .header(reqwest::header::ACCEPT, GRAPHQL_ACCEPT)
            .header("X-Requested-With", "XMLHttpRequest")
            .header(reqwest::header::REFERER, &self.config.page_url);
        if let Some(origin) = origin_of(endpoint) {
            builder = builder.header(reqwest::header::ORIGIN, origin);
        }
        if let Some(token) = &token {
            builder = builder.header(CSRF_HEADER, token.value());
        }

        let response = match builder.json(&body).send().await {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    "Query {} failed to reach {}: {}",
                    request.id,
                    Sanitizer::sanitize_url(endpoint),
                    error
                );
                return RelayResponse::failure(
                    request.id.clone(),
                    ErrorInfo::message(format!("Request failed: {}", error)),
                );
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(error) => {
                return RelayResponse::failure(
                    request.id.clone(),
                    ErrorInfo::message(format!("Failed to read response body: {}", error)),
                );
            }
        };

        // Non-JSON bodies survive as raw text
        let payload = match serde_json::from_str::<Value>(&text) {
            Ok(value) => value,
            Err(_) => Value::String(text),
        };

        if !status.is_success() {
            let message = graphql_error_message(&payload)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            warn!(
                "Query {} rejected by {}: {} {}",
                request.id,
                Sanitizer::sanitize_url(endpoint),
                status.as_u16(),
                message
            );
            return RelayResponse::failure(
                request.id.clone(),
                ErrorInfo::http(
                    status.as_u16(),
                    status.canonical_reason().map(str::to_string),
                    message,
                ),
            );
        }

        // 2xx can still carry an errors array; that is an application
        // failure, kept apart from HTTP-level rejections
        if let Some(message) = graphql_error_message(&payload) {
            warn!("Query {} returned GraphQL errors: {}", request.id, message);
            return RelayResponse::failure_with_data(
                request.id.clone(),
                ErrorInfo::message(format!("GraphQL error: {}", message)),
                payload.get("data").cloned(),
            );
        }

        let data = match payload.get("data") {
            Some(data) => data.clone(),
            None => payload,
        };
        debug!(
            "Query {} completed against {}",
            request.id,
            Sanitizer::sanitize_url(endpoint)
        );
        RelayResponse::success(request.id.clone(), Some(data))
    }
}

/// Scheme-host-port origin of a URL, e.g. `https://canvas.example.edu`
pub(crate) fn origin_of(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    Some(parsed.origin().ascii_serialization())
}

/// First message out of a GraphQL `errors` array, if one is present
///
/// Entries arrive either as plain strings or as objects with a
/// `message` member; anything else is surfaced verbatim.
fn graphql_error_message(payload: &Value) -> Option<String> {
    let first = payload.get("errors")?.as_array()?.first()?;
    match first {
        Value::String(message) => Some(message.clone()),
        other => Some(
            other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::PageSnapshot;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, headers, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "wsOtaQBxJYTXbtcAzvhNmitcVlYsJqLw";

    fn authenticated_environment() -> Arc<dyn PageEnvironment> {
        Arc::new(PageSnapshot::new().with_config(json!({ "CSRF_TOKEN": TOKEN })))
    }

    fn executor_for(server: &MockServer) -> SessionExecutor {
        let config = SessionConfig::new(format!("{}/api/graphql", server.uri()))
            .with_timeout(Duration::from_secs(5));
        SessionExecutor::new(config, authenticated_environment()).unwrap()
    }

    #[tokio::test]
    async fn test_success_extracts_data_member() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/graphql"))
            .and(header("X-Requested-With", "XMLHttpRequest"))
            .and(header("X-CSRF-Token", TOKEN))
            // wiremock's header() splits received values on commas, so the
            // multi-value Accept line must be matched with headers()
            .and(headers("Accept", GRAPHQL_ACCEPT.split(',').map(str::trim).collect()))
            .and(body_partial_json(json!({ "query": "query { allCourses { name } }" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "allCourses": [{ "name": "Biology 101" }] }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let request = RelayRequest::new("query { allCourses { name } }");
        let response = executor.execute(&request).await;

        assert!(response.success);
        assert_eq!(response.id, request.id);
        assert_eq!(
            response.data,
            Some(json!({ "allCourses": [{ "name": "Biology 101" }] }))
        );
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_http_error_carries_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/graphql"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "errors": [{ "message": "Invalid authenticity token." }]
            })))
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let response = executor.execute(&RelayRequest::new("query { a }")).await;

        assert!(!response.success);
        let error = response.error.unwrap();
        assert_eq!(error.status, Some(422));
        assert_eq!(error.status_text.as_deref(), Some("Unprocessable Entity"));
        assert_eq!(error.message, "Invalid authenticity token.");
    }

    #[tokio::test]
    async fn test_http_error_with_string_form_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/graphql"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "errors": ["invalid token"]
            })))
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let response = executor.execute(&RelayRequest::new("query { a }")).await;

        assert!(!response.success);
        let error = response.error.unwrap();
        assert_eq!(error.status, Some(422));
        assert_eq!(error.status_text.as_deref(), Some("Unprocessable Entity"));
        // The plain string comes through without JSON quoting
        assert_eq!(error.message, "invalid token");
    }

    #[tokio::test]
    async fn test_graphql_errors_on_2xx_are_application_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{ "message": "Field 'bogus' doesn't exist on type 'Query'" }],
                "data": null
            })))
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let response = executor.execute(&RelayRequest::new("query { bogus }")).await;

        assert!(!response.success);
        let error = response.error.unwrap();
        // No HTTP status: the endpoint answered, the query failed
        assert_eq!(error.status, None);
        assert!(error.message.contains("Field 'bogus' doesn't exist"));
    }

    #[tokio::test]
    async fn test_missing_token_is_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/graphql"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": { "ok": true } })),
            )
            .mount(&server)
            .await;

        let config = SessionConfig::new(format!("{}/api/graphql", server.uri()));
        let executor =
            SessionExecutor::new(config, Arc::new(PageSnapshot::new())).unwrap();
        let response = executor.execute(&RelayRequest::new("query { ok }")).await;

        assert!(response.success);
    }

    #[tokio::test]
    async fn test_non_json_body_preserved_as_raw_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_string("maintenance in progress"))
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        let response = executor.execute(&RelayRequest::new("query { a }")).await;

        assert!(response.success);
        assert_eq!(response.data, Some(json!("maintenance in progress")));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_becomes_structured_failure() {
        // Nothing listens on port 9; the connection attempt fails fast
        let config = SessionConfig::new("http://127.0.0.1:9/api/graphql")
            .with_timeout(Duration::from_secs(2));
        let executor = SessionExecutor::new(config, authenticated_environment()).unwrap();

        let request = RelayRequest::new("query { a }");
        let response = executor.execute(&request).await;

        assert!(!response.success);
        assert_eq!(response.id, request.id);
        let error = response.error.unwrap();
        assert_eq!(error.status, None);
        assert!(error.message.contains("Request failed"));
    }

    #[tokio::test]
    async fn test_request_endpoint_overrides_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sub/api/graphql"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": { "ok": 1 } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        // Default endpoint points somewhere that would refuse the query
        let config = SessionConfig::new("http://127.0.0.1:9/api/graphql");
        let executor = SessionExecutor::new(config, authenticated_environment()).unwrap();

        let request = RelayRequest::new("query { ok }")
            .with_endpoint(format!("{}/sub/api/graphql", server.uri()));
        let response = executor.execute(&request).await;

        assert!(response.success);
    }

    #[tokio::test]
    async fn test_fresh_environment_used_after_update() {
        let rotated = "mRcPqWnXkTbVzGhJdLsYfCaEuIoNtBe";
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/graphql"))
            .and(header("X-CSRF-Token", rotated))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": { "ok": true } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let executor = executor_for(&server);
        executor
            .update_environment(Arc::new(
                PageSnapshot::new().with_config(json!({ "CSRF_TOKEN": rotated })),
            ))
            .await;

        let response = executor.execute(&RelayRequest::new("query { ok }")).await;
        assert!(response.success);
    }

    #[test]
    fn test_session_config_from_forwarder() {
        let forwarder = ForwarderConfig {
            min_token_length: 20,
            request_timeout_secs: 7,
            ..ForwarderConfig::default()
        };

        let config = SessionConfig::from_forwarder(&forwarder);
        assert_eq!(config.endpoint, forwarder.default_endpoint);
        assert_eq!(config.min_token_length, 20);
        assert_eq!(config.timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_origin_of() {
        assert_eq!(
            origin_of("https://canvas.example.edu/api/graphql").as_deref(),
            Some("https://canvas.example.edu")
        );
        assert_eq!(
            origin_of("http://127.0.0.1:8765/api/graphql").as_deref(),
            Some("http://127.0.0.1:8765")
        );
        assert_eq!(origin_of("not a url"), None);
    }
}
