//! Ordered credential discovery
//!
//! Probes the page environment for a CSRF token source by source,
//! accepts the first candidate that meets the length threshold, and
//! percent-decodes it when needed. Earlier sources are more
//! site-specific and therefore more trustworthy; the inline-script
//! scrape is a last resort.

use regex::Regex;

use super::environment::PageEnvironment;
use crate::security::Sanitizer;

/// Minimum candidate length accepted by default
pub const DEFAULT_MIN_TOKEN_LENGTH: usize = 12;

/// Markup meta tag carrying the token
const META_TAG_NAME: &str = "csrf-token";

/// Cookie carrying the (percent-encoded) token
const COOKIE_NAME: &str = "_csrf_token";

/// Where a token was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// Structured page config object
    PageConfig,
    /// `csrf-token` markup meta tag
    MetaTag,
    /// `_csrf_token` cookie
    Cookie,
    /// Regex match over inline script text
    InlineScript,
}

impl TokenSource {
    /// Short label for diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenSource::PageConfig => "page-config",
            TokenSource::MetaTag => "meta-tag",
            TokenSource::Cookie => "cookie",
            TokenSource::InlineScript => "inline-script",
        }
    }
}

/// A discovered CSRF token
///
/// Discovered fresh per outgoing call and never persisted; the session
/// may rotate it at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken {
    raw: String,
    value: String,
    source: TokenSource,
}

impl CsrfToken {
    /// Builds a token from a raw candidate, decoding if it looks
    /// percent-encoded
    ///
    /// Decode failures fall back to the raw candidate rather than
    /// discarding the token.
    fn from_raw(raw: String, source: TokenSource) -> Self {
        let value = if raw.contains('%') {
            match urlencoding::decode(&raw) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => {
                    tracing::debug!("CSRF token failed to percent-decode, using raw value");
                    raw.clone()
                }
            }
        } else {
            raw.clone()
        };
        Self { raw, value, source }
    }

    /// The usable, decoded token value
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The candidate exactly as it was read from the source
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The source the token was read from
    pub fn source(&self) -> TokenSource {
        self.source
    }

    /// Whether decoding changed the candidate
    pub fn was_encoded(&self) -> bool {
        self.raw != self.value
    }
}

/// Probes the environment for a CSRF token
///
/// Sources are tried in a fixed order: page config object, meta tag,
/// cookie, inline script text. The first candidate at least
/// `min_length` characters long wins; shorter candidates fall through
/// to the next source. Absence is a normal outcome, not an error:
/// callers proceed without the token header.
pub fn discover(env: &dyn PageEnvironment, min_length: usize) -> Option<CsrfToken> {
    let (source, raw) = accept(TokenSource::PageConfig, env.config_token(), min_length)
        .or_else(|| {
            accept(
                TokenSource::MetaTag,
                env.meta_content(META_TAG_NAME),
                min_length,
            )
        })
        .or_else(|| accept(TokenSource::Cookie, env.cookie(COOKIE_NAME), min_length))
        .or_else(|| {
            accept(
                TokenSource::InlineScript,
                scrape_inline_script(env, min_length),
                min_length,
            )
        })?;

    let token = CsrfToken::from_raw(raw, source);
    tracing::debug!(
        "Discovered CSRF token {} from {}",
        Sanitizer::sanitize_token(token.value()),
        source.as_str()
    );
    Some(token)
}

/// Length-checks a candidate from one source
fn accept(
    source: TokenSource,
    candidate: Option<String>,
    min_length: usize,
) -> Option<(TokenSource, String)> {
    let candidate = candidate?;
    if candidate.len() >= min_length {
        Some((source, candidate))
    } else {
        tracing::trace!(
            "Skipping {} candidate below minimum length",
            source.as_str()
        );
        None
    }
}

/// Last-resort scrape over inline script text
///
/// Only accepts identifier-looking matches of at least the minimum
/// length; anything stronger than that is not enforceable here.
fn scrape_inline_script(env: &dyn PageEnvironment, min_length: usize) -> Option<String> {
    let text = env.inline_script_text()?;
    let pattern = format!(
        r#"(?i)csrf[_-]?token["']?\s*[:=]\s*["']([A-Za-z0-9%+/=_-]{{{},}})["']"#,
        min_length
    );
    let regex = Regex::new(&pattern).ok()?;
    regex
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeEnvironment {
        config: Option<String>,
        meta: Option<String>,
        cookie: Option<String>,
        script: Option<String>,
    }

    impl PageEnvironment for FakeEnvironment {
        fn config_token(&self) -> Option<String> {
            self.config.clone()
        }

        fn meta_content(&self, name: &str) -> Option<String> {
            assert_eq!(name, "csrf-token");
            self.meta.clone()
        }

        fn cookie(&self, name: &str) -> Option<String> {
            assert_eq!(name, "_csrf_token");
            self.cookie.clone()
        }

        fn inline_script_text(&self) -> Option<&str> {
            self.script.as_deref()
        }
    }

    #[test]
    fn test_config_object_beats_cookie() {
        let env = FakeEnvironment {
            config: Some("wsOtaQBx%2FJYTXbtcA".to_string()),
            cookie: Some("shouldNotBeUsed".to_string()),
            ..Default::default()
        };

        let token = discover(&env, DEFAULT_MIN_TOKEN_LENGTH).unwrap();
        assert_eq!(token.value(), "wsOtaQBx/JYTXbtcA");
        assert_eq!(token.raw(), "wsOtaQBx%2FJYTXbtcA");
        assert_eq!(token.source(), TokenSource::PageConfig);
        assert!(token.was_encoded());
    }

    #[test]
    fn test_meta_beats_cookie() {
        let env = FakeEnvironment {
            meta: Some("meta-token-value".to_string()),
            cookie: Some("cookie-token-value".to_string()),
            ..Default::default()
        };

        let token = discover(&env, DEFAULT_MIN_TOKEN_LENGTH).unwrap();
        assert_eq!(token.source(), TokenSource::MetaTag);
        assert_eq!(token.value(), "meta-token-value");
    }

    #[test]
    fn test_plain_value_unchanged() {
        let env = FakeEnvironment {
            cookie: Some("alreadyDecodedValue".to_string()),
            ..Default::default()
        };

        let token = discover(&env, DEFAULT_MIN_TOKEN_LENGTH).unwrap();
        assert_eq!(token.value(), token.raw());
        assert!(!token.was_encoded());
        assert_eq!(token.source(), TokenSource::Cookie);
    }

    #[test]
    fn test_short_candidate_falls_through() {
        let env = FakeEnvironment {
            config: Some("tiny".to_string()),
            cookie: Some("longEnoughCookieToken".to_string()),
            ..Default::default()
        };

        let token = discover(&env, DEFAULT_MIN_TOKEN_LENGTH).unwrap();
        assert_eq!(token.source(), TokenSource::Cookie);
    }

    #[test]
    fn test_nothing_found() {
        let env = FakeEnvironment::default();
        assert!(discover(&env, DEFAULT_MIN_TOKEN_LENGTH).is_none());
    }

    #[test]
    fn test_all_sources_too_short() {
        let env = FakeEnvironment {
            config: Some("a".to_string()),
            meta: Some("bb".to_string()),
            cookie: Some("ccc".to_string()),
            ..Default::default()
        };
        assert!(discover(&env, DEFAULT_MIN_TOKEN_LENGTH).is_none());
    }

    #[test]
    fn test_decode_failure_keeps_raw() {
        // %FF decodes to a byte that is not valid UTF-8
        let env = FakeEnvironment {
            config: Some("token%FFtokentoken".to_string()),
            ..Default::default()
        };

        let token = discover(&env, DEFAULT_MIN_TOKEN_LENGTH).unwrap();
        assert_eq!(token.value(), "token%FFtokentoken");
        assert!(!token.was_encoded());
    }

    #[test]
    fn test_inline_script_scrape() {
        let env = FakeEnvironment {
            script: Some(r#"<script>var csrf_token = "abcDEF123456789";</script>"#.to_string()),
            ..Default::default()
        };

        let token = discover(&env, DEFAULT_MIN_TOKEN_LENGTH).unwrap();
        assert_eq!(token.source(), TokenSource::InlineScript);
        assert_eq!(token.value(), "abcDEF123456789");
    }

    #[test]
    fn test_inline_script_json_style() {
        let env = FakeEnvironment {
            script: Some(r#"{"csrfToken":"abcDEF123456789"}"#.to_string()),
            ..Default::default()
        };

        let token = discover(&env, DEFAULT_MIN_TOKEN_LENGTH).unwrap();
        assert_eq!(token.source(), TokenSource::InlineScript);
    }

    #[test]
    fn test_inline_script_ignores_short_match() {
        let env = FakeEnvironment {
            script: Some(r#"var csrf_token = "short";"#.to_string()),
            ..Default::default()
        };
        assert!(discover(&env, DEFAULT_MIN_TOKEN_LENGTH).is_none());
    }
}
