//! Query validation before dispatch
//!
//! The relay only forwards plain, single GraphQL queries. Everything
//! else (mutations, batches, anything that smells like an injection
//! attempt) is refused before it ever reaches the executor.

use regex::Regex;
use thiserror::Error;

/// Maximum accepted query length in characters
pub const MAX_QUERY_LENGTH: usize = 10_000;

/// Substrings that disqualify a query outright
const DANGEROUS_KEYWORDS: &[&str] = &[
    "exec",
    "eval",
    "system",
    "import",
    "__import__",
    "os.",
    "subprocess",
    "shell",
    "cmd",
    "command",
];

/// Reasons a query is refused
#[derive(Debug, Error)]
pub enum GuardError {
    /// Query is empty or whitespace only
    #[error("Query cannot be empty")]
    Empty,

    /// Query contains a mutation operation
    #[error("Mutations are not allowed")]
    MutationNotAllowed,

    /// Query contains a subscription operation
    #[error("Subscriptions are not allowed")]
    SubscriptionNotAllowed,

    /// Query contains a comment
    #[error("Comments are not allowed")]
    CommentsNotAllowed,

    /// Query contains more than one operation
    #[error("Only single queries are allowed")]
    MultipleOperations,

    /// Query contains a disallowed keyword
    #[error("Dangerous keyword detected: {0}")]
    DangerousKeyword(String),

    /// Query matches an injection-style pattern
    #[error("Suspicious pattern detected: {0}")]
    SuspiciousPattern(String),

    /// Query exceeds the maximum length
    #[error("Query is too long (max {0} characters)")]
    TooLong(usize),

    /// Query does not start with the `query` keyword
    #[error("Query must start with the 'query' keyword")]
    NotAQuery,

    /// Query has mismatched braces
    #[error("Unbalanced braces in query")]
    UnbalancedBraces,

    /// Query has mismatched parentheses
    #[error("Unbalanced parentheses in query")]
    UnbalancedParens,

    /// A guard pattern failed to compile
    #[error("Invalid guard pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Validates queries against the forwarding policy
///
/// Compiles its patterns once at construction; `validate` is then
/// cheap enough to run on every request.
#[derive(Debug, Clone)]
pub struct QueryGuard {
    max_length: usize,
    mutation: Regex,
    subscription: Regex,
    query_word: Regex,
    leading_query: Regex,
    suspicious: Vec<(&'static str, Regex)>,
}

impl QueryGuard {
    /// Creates a guard with the default maximum query length
    pub fn new() -> Result<Self, GuardError> {
        let suspicious = [
            r"(?i);\s*(drop|delete|insert|update|alter|create|truncate)",
            r"(?i)union\s+.*\s+select",
            r"(?i)exec\s*\(",
            r"(?i)eval\s*\(",
        ]
        .into_iter()
        .map(|pattern| Ok((pattern, Regex::new(pattern)?)))
        .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            max_length: MAX_QUERY_LENGTH,
            mutation: Regex::new(r"(?i)\bmutation\b")?,
            subscription: Regex::new(r"(?i)\bsubscription\b")?,
            query_word: Regex::new(r"(?i)\bquery\b")?,
            leading_query: Regex::new(r"(?i)^\s*query\s+")?,
            suspicious,
        })
    }

    /// Sets a custom maximum query length
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Checks a query against every rule, first violation wins
    pub fn validate(&self, query: &str) -> Result<(), GuardError> {
        if query.trim().is_empty() {
            return Err(GuardError::Empty);
        }

        let query = query.trim();

        if self.mutation.is_match(query) {
            return Err(GuardError::MutationNotAllowed);
        }
        if self.subscription.is_match(query) {
            return Err(GuardError::SubscriptionNotAllowed);
        }
        if query.contains('#') {
            return Err(GuardError::CommentsNotAllowed);
        }
        if self.query_word.find_iter(query).count() > 1 {
            return Err(GuardError::MultipleOperations);
        }

        let query_lower = query.to_lowercase();
        for keyword in DANGEROUS_KEYWORDS {
            if query_lower.contains(keyword) {
                return Err(GuardError::DangerousKeyword(keyword.to_string()));
            }
        }

        for (pattern, regex) in &self.suspicious {
            if regex.is_match(query) {
                return Err(GuardError::SuspiciousPattern(pattern.to_string()));
            }
        }

        if query.len() > self.max_length {
            return Err(GuardError::TooLong(self.max_length));
        }
        if !self.leading_query.is_match(query) {
            return Err(GuardError::NotAQuery);
        }

        let opens = query.matches('{').count();
        let closes = query.matches('}').count();
        if opens != closes {
            return Err(GuardError::UnbalancedBraces);
        }
        let opens = query.matches('(').count();
        let closes = query.matches(')').count();
        if opens != closes {
            return Err(GuardError::UnbalancedParens);
        }

        Ok(())
    }
}
