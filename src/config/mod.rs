//! Engine configuration.
//!
//! All tunables in one value with validated construction. Environment or
//! file loading belongs to the embedding application, not this crate.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use url::form_urlencoded;

/// Default browser-mimicking headers sent with every request.
///
/// The `User-Agent` is not part of this set; it comes from the identity
/// pool per attempt.
pub const DEFAULT_HEADERS: &[(&str, &str)] = &[
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    ),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("Accept-Encoding", "gzip, deflate, br"),
    ("DNT", "1"),
    ("Connection", "keep-alive"),
    ("Upgrade-Insecure-Requests", "1"),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Cache-Control", "max-age=0"),
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("min_delay ({min:?}) must not exceed max_delay ({max:?})")]
    DelayWindow { min: Duration, max: Duration },
    #[error("max_attempts must be at least 1")]
    NoAttempts,
    #[error("posts_per_page must be between 1 and 50")]
    PageSize,
    #[error("request timeout must be non-zero")]
    ZeroTimeout,
    #[error("invalid base url: {0}")]
    BaseUrl(#[from] url::ParseError),
}

/// Central configuration for one scraper instance.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Origin the subject pages live on.
    pub base_url: String,
    /// Hard per-request timeout, independent of retry timing.
    pub request_timeout: Duration,
    /// Transient-failure retry budget per logical fetch.
    pub max_attempts: u32,
    /// Exponent base for transient backoff sleeps (`factor^attempt` seconds).
    pub backoff_factor: f64,
    /// Inter-request pacing window, drawn uniformly per request.
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Identity-rotation retry budget for hard blocks, separate from
    /// `max_attempts`.
    pub hard_block_retries: u32,
    /// Cursor page size.
    pub posts_per_page: u32,
    /// Record cap per subject; 0 means unlimited.
    pub max_posts: u64,
    /// Consecutive zero-new-record pages before pagination stops.
    pub stall_limit: u32,
    /// Proxy endpoints; empty means direct connection.
    pub proxies: Vec<String>,
    /// Cooldown applied to a proxy after a hard block.
    pub proxy_cooldown: Duration,
    /// Consecutive hard blocks within one cooldown cycle before a proxy is
    /// banned for the rest of the run.
    pub proxy_ban_threshold: u32,
    /// Custom user agents; when empty the built-in list rotates.
    pub user_agents: Vec<String>,
    /// Opaque session cookies supplied by the caller, sent verbatim.
    pub session_cookies: HashMap<String, String>,
    /// Query identifier for the cursor endpoint. Upstream rotates these
    /// occasionally, so it stays configurable.
    pub query_hash: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.instagram.com".into(),
            request_timeout: Duration::from_secs(30),
            max_attempts: 5,
            backoff_factor: 2.0,
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
            hard_block_retries: 3,
            posts_per_page: 50,
            max_posts: 0,
            stall_limit: 3,
            proxies: Vec::new(),
            proxy_cooldown: Duration::from_secs(3600),
            proxy_ban_threshold: 3,
            user_agents: Vec::new(),
            session_cookies: HashMap::new(),
            query_hash: "69cba40317214236af40e7efa697781d".into(),
        }
    }
}

impl ScraperConfig {
    /// Check internal consistency. Called by the scraper builder before any
    /// network component is constructed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_delay > self.max_delay {
            return Err(ConfigError::DelayWindow {
                min: self.min_delay,
                max: self.max_delay,
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.posts_per_page == 0 || self.posts_per_page > 50 {
            return Err(ConfigError::PageSize);
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        url::Url::parse(&self.base_url)?;
        Ok(())
    }

    /// URL of the subject's primary page.
    pub fn profile_url(&self, username: &str) -> String {
        format!("{}/api/v1/users/web_profile_info/?username={username}", self.base_url)
    }

    /// URL of the cursor endpoint for one page request.
    pub fn cursor_url(&self, user_id: &str, after: &str) -> String {
        let variables = serde_json::json!({
            "id": user_id,
            "first": self.posts_per_page,
            "after": after,
        });
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("query_hash", &self.query_hash)
            .append_pair("variables", &variables.to_string())
            .finish();
        format!("{}/graphql/query/?{query}", self.base_url)
    }

    /// URL of a single post's detail page.
    pub fn post_url(&self, shortcode: &str) -> String {
        format!("{}/p/{shortcode}/", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ScraperConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_delay_window() {
        let config = ScraperConfig {
            min_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(2),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DelayWindow { .. })
        ));
    }

    #[test]
    fn cursor_url_encodes_variables() {
        let config = ScraperConfig::default();
        let url = config.cursor_url("12345", "QVFD=="); // cursors can carry padding
        assert!(url.starts_with("https://www.instagram.com/graphql/query/?query_hash="));
        assert!(url.contains("%22id%22%3A%2212345%22"));
        assert!(url.contains("%22first%22%3A50"));
        // No raw JSON punctuation survives in the query string.
        let query = url.split_once('?').unwrap().1;
        assert!(!query.contains(['{', '}', '"', ':', ',']));
        let parsed = url::Url::parse(&url).unwrap();
        let variables = parsed
            .query_pairs()
            .find(|(name, _)| name == "variables")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        let round_trip: serde_json::Value = serde_json::from_str(&variables).unwrap();
        assert_eq!(round_trip["after"], "QVFD==");
    }

    #[test]
    fn post_url_is_canonical() {
        let config = ScraperConfig::default();
        assert_eq!(
            config.post_url("CxYz123"),
            "https://www.instagram.com/p/CxYz123/"
        );
    }
}
