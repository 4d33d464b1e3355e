//! Security module - Query validation and log sanitization
//!
//! This module provides:
//! - Validation of incoming queries against the forwarding policy
//! - Sanitization of tokens and URLs before they reach the logs

mod guard;
mod sanitizer;

pub use guard::{GuardError, QueryGuard, MAX_QUERY_LENGTH};
pub use sanitizer::Sanitizer;
