//! Credential discovery module - CSRF token probing
//!
//! Finds the session CSRF token by probing the page environment in a
//! fixed source order:
//! - Structured page config object
//! - `csrf-token` markup meta tag
//! - `_csrf_token` cookie
//! - Inline script text (last resort, regex scrape)
//!
//! Tokens are discovered fresh per call and never persisted.

mod discovery;
mod environment;

pub use discovery::{discover, CsrfToken, TokenSource, DEFAULT_MIN_TOKEN_LENGTH};
pub use environment::{PageEnvironment, PageSnapshot, CONFIG_TOKEN_KEY};
