//! Data sanitization for secure logging
//!
//! Provides utilities to sanitize session credentials and URLs before
//! they reach the logs, preventing accidental token leakage.

/// Sanitizer for sensitive data
///
/// Provides static methods to sanitize values before logging or display.
pub struct Sanitizer;

impl Sanitizer {
    /// Sanitizes a token for safe logging
    ///
    /// Shows only the last 4 characters preceded by "***".
    ///
    /// # Examples
    ///
    /// ```
    /// use qforward::security::Sanitizer;
    ///
    /// assert_eq!(Sanitizer::sanitize_token("wsOtaQBxJYTXbtcA"), "***btcA");
    /// assert_eq!(Sanitizer::sanitize_token("abc"), "****");
    /// ```
    pub fn sanitize_token(token: &str) -> String {
        if token.len() > 4 {
            format!("***{}", &token[token.len() - 4..])
        } else {
            "****".to_string()
        }
    }

    /// Sanitizes a URL by removing query parameters and fragments
    ///
    /// Useful for logging endpoints that might carry tokens in query
    /// strings.
    ///
    /// # Examples
    ///
    /// ```
    /// use qforward::security::Sanitizer;
    ///
    /// assert_eq!(
    ///     Sanitizer::sanitize_url("https://school.instructure.com/api/graphql?token=secret"),
    ///     "https://school.instructure.com/api/graphql"
    /// );
    /// ```
    pub fn sanitize_url(url: &str) -> String {
        url.split('?')
            .next()
            .unwrap_or(url)
            .split('#')
            .next()
            .unwrap_or(url)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_token_normal() {
        assert_eq!(Sanitizer::sanitize_token("wsOtaQBxJYTXbtcA"), "***btcA");
    }

    #[test]
    fn test_sanitize_token_short() {
        assert_eq!(Sanitizer::sanitize_token("abc"), "****");
        assert_eq!(Sanitizer::sanitize_token("abcd"), "****");
        assert_eq!(Sanitizer::sanitize_token("abcde"), "***bcde");
    }

    #[test]
    fn test_sanitize_url_with_query() {
        assert_eq!(
            Sanitizer::sanitize_url("https://example.com/api/graphql?access_token=secret"),
            "https://example.com/api/graphql"
        );
    }

    #[test]
    fn test_sanitize_url_with_fragment() {
        assert_eq!(
            Sanitizer::sanitize_url("https://example.com/page#section"),
            "https://example.com/page"
        );
    }

    #[test]
    fn test_sanitize_url_clean() {
        assert_eq!(
            Sanitizer::sanitize_url("https://example.com/api/graphql"),
            "https://example.com/api/graphql"
        );
    }
}
