//! Relay message types
//!
//! The shapes that cross every hop: the request/response pair matched
//! by correlation id, the framed envelope set spoken between broker
//! and executor host, and the client-facing request schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Identifier matching an asynchronous response to its request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mints a fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A query on its way to the executor
///
/// Immutable once dispatched; resubmitting means a new request with a
/// new correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRequest {
    /// Correlation id echoed by the response
    pub id: CorrelationId,
    /// GraphQL query text
    pub query: String,
    /// GraphQL variables
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Endpoint override; the executor falls back to its default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl RelayRequest {
    /// Creates a request with a fresh correlation id
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: CorrelationId::generate(),
            query: query.into(),
            variables: Map::new(),
            endpoint: None,
        }
    }

    /// Replaces the correlation id
    pub fn with_id(mut self, id: CorrelationId) -> Self {
        self.id = id;
        self
    }

    /// Sets the variables object
    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Sets the endpoint override
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Error descriptor carried inside a failed response
///
/// Errors cross hops as data, never as exceptions; this is the shape
/// they travel in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Human-readable failure description
    pub message: String,
    /// HTTP status code, when the failure came from the endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// HTTP status text, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
}

impl ErrorInfo {
    /// Failure with no HTTP status (relay or transport level)
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            status_text: None,
        }
    }

    /// Failure backed by an HTTP status
    pub fn http(status: u16, status_text: Option<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
            status_text,
        }
    }
}

/// The executor's answer, matched back by correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayResponse {
    /// Correlation id of the originating request
    pub id: CorrelationId,
    /// Whether the query executed and returned usable data
    pub success: bool,
    /// Payload (the body's `data` member when present)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error descriptor on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl RelayResponse {
    /// Successful response
    pub fn success(id: CorrelationId, data: Option<Value>) -> Self {
        Self {
            id,
            success: true,
            data,
            error: None,
        }
    }

    /// Failed response
    pub fn failure(id: CorrelationId, error: ErrorInfo) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(error),
        }
    }

    /// Failed response that still carries a partial payload
    pub fn failure_with_data(id: CorrelationId, error: ErrorInfo, data: Option<Value>) -> Self {
        Self {
            id,
            success: false,
            data,
            error: Some(error),
        }
    }
}

/// Frames exchanged between broker and executor host
///
/// Internally tagged with `type`, matching the native-messaging
/// protocol the executor side speaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Envelope {
    /// Broker greets a newly attached host
    Ready { message: String },
    /// Host announces itself and its live session count
    Connected { sessions: usize },
    /// Query heading toward the executor
    Query(RelayRequest),
    /// Result heading back to the broker
    Response(RelayResponse),
    /// Keepalive probe
    Ping,
    /// Keepalive answer
    Pong,
    /// Host reports a session count change
    Status { sessions: usize },
    /// Either side reports a protocol-level problem
    Error { message: String },
}

/// Client-facing request schema, tagged by `action`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientRequest {
    /// Execute one query through the relay
    ExecuteQuery {
        /// Caller-minted correlation id; the broker mints one otherwise
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<CorrelationId>,
        /// GraphQL query text
        query: String,
        /// GraphQL variables
        #[serde(default)]
        variables: Map<String, Value>,
        /// Endpoint override
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },
}
