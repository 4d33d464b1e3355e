//! Page environment abstraction
//!
//! Models the ambient state of the executor context (page config
//! object, markup meta tags, cookies, inline script text) behind a
//! trait, so discovery stays pure and testable against a fake.

use regex::Regex;
use serde_json::{Map, Value};

/// Key of the CSRF entry in the structured page config object
pub const CONFIG_TOKEN_KEY: &str = "CSRF_TOKEN";

/// Read-only view of the page state a credential may hide in
///
/// Every probe is best-effort: a source that is missing or unreadable
/// answers `None`, never an error.
pub trait PageEnvironment: Send + Sync {
    /// CSRF entry of the structured page config object, if present
    fn config_token(&self) -> Option<String>;

    /// Content of the named markup meta tag
    fn meta_content(&self, name: &str) -> Option<String>;

    /// Value of the named cookie
    fn cookie(&self, name: &str) -> Option<String>;

    /// Inline script text for last-resort scraping
    fn inline_script_text(&self) -> Option<&str>;
}

/// A captured page: markup, cookie header, and parsed config object
///
/// The concrete environment used by session executors. Built from
/// whatever the session side managed to capture; empty parts simply
/// make their probes answer `None`.
#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    config: Map<String, Value>,
    html: String,
    cookie_header: String,
}

impl PageSnapshot {
    /// Creates an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the parsed page config object
    ///
    /// Non-object values are treated as an absent config.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config.as_object().cloned().unwrap_or_default();
        self
    }

    /// Sets the captured page markup
    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = html.into();
        self
    }

    /// Sets the raw cookie header string (`name=value; name2=value2`)
    pub fn with_cookies(mut self, cookie_header: impl Into<String>) -> Self {
        self.cookie_header = cookie_header.into();
        self
    }
}

impl PageEnvironment for PageSnapshot {
    fn config_token(&self) -> Option<String> {
        self.config
            .get(CONFIG_TOKEN_KEY)
            .and_then(Value::as_str)
            .map(String::from)
    }

    fn meta_content(&self, name: &str) -> Option<String> {
        if self.html.is_empty() {
            return None;
        }
        let name = regex::escape(name);
        // Attribute order varies between pages; try both forms
        let patterns = [
            format!(
                r#"(?i)<meta[^>]*name=["']{}["'][^>]*content=["']([^"']*)["']"#,
                name
            ),
            format!(
                r#"(?i)<meta[^>]*content=["']([^"']*)["'][^>]*name=["']{}["']"#,
                name
            ),
        ];
        for pattern in &patterns {
            let regex = Regex::new(pattern).ok()?;
            if let Some(content) = regex
                .captures(&self.html)
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_str().to_string())
            {
                return Some(content);
            }
        }
        None
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.cookie_header.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value.to_string())
        })
    }

    fn inline_script_text(&self) -> Option<&str> {
        if self.html.is_empty() {
            None
        } else {
            Some(&self.html)
        }
    }
}
