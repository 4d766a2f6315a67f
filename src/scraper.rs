//! High level scraper orchestration.
//!
//! Wires the identity pool, request executor, and pagination controller
//! into an ergonomic entry point: configure once, then scrape subjects to
//! completion.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, ScraperConfig};
use crate::http::{HttpTransport, RequestExecutor, ReqwestTransport};
use crate::identity::{IdentityPool, ProxyHealth};
use crate::pagination::{PaginationController, ScrapeError, ScrapeReport};
use crate::records::PostRecord;

/// Fluent builder for [`GramScraper`].
pub struct GramScraperBuilder {
    config: ScraperConfig,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl GramScraperBuilder {
    pub fn new() -> Self {
        Self {
            config: ScraperConfig::default(),
            transport: None,
        }
    }

    pub fn with_config(mut self, config: ScraperConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_proxies<I, S>(mut self, proxies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.proxies = proxies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_user_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.user_agents = agents.into_iter().map(Into::into).collect();
        self
    }

    /// Opaque session cookies, sent verbatim with every request. Their
    /// lifecycle (acquisition, refresh) is the caller's concern.
    pub fn with_session_cookies(mut self, cookies: HashMap<String, String>) -> Self {
        self.config.session_cookies = cookies;
        self
    }

    /// Record cap per subject; 0 means unlimited.
    pub fn with_max_posts(mut self, max_posts: u64) -> Self {
        self.config.max_posts = max_posts;
        self
    }

    /// Swap the HTTP transport; tests inject scripted responses here.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<GramScraper, ConfigError> {
        self.config.validate()?;
        let pool = Arc::new(IdentityPool::new(
            self.config.proxies.clone(),
            self.config.user_agents.clone(),
            self.config.session_cookies.clone(),
            self.config.proxy_cooldown,
            self.config.proxy_ban_threshold,
        ));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));
        let executor = RequestExecutor::new(transport, pool.clone(), self.config.clone());
        info!("scraper initialised (base {})", self.config.base_url);
        Ok(GramScraper {
            config: self.config,
            pool,
            executor,
        })
    }
}

impl Default for GramScraperBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Main scraper facade. One instance can scrape many subjects; the identity
/// pool's proxy health carries across subjects for the lifetime of the run.
pub struct GramScraper {
    config: ScraperConfig,
    pool: Arc<IdentityPool>,
    executor: RequestExecutor,
}

impl GramScraper {
    /// Construct a scraper with default configuration.
    pub fn new() -> Result<Self, ConfigError> {
        GramScraperBuilder::new().build()
    }

    pub fn builder() -> GramScraperBuilder {
        GramScraperBuilder::new()
    }

    /// Scrape one subject to completion (profile summary plus posts),
    /// honouring the configured record cap.
    pub async fn scrape(&self, username: &str) -> Result<ScrapeReport, ScrapeError> {
        self.scrape_with_cancel(username, &CancellationToken::new())
            .await
    }

    /// Like [`scrape`](Self::scrape), but interruptible. A cancellation
    /// raised mid-pagination still returns the records accumulated so far,
    /// inside the error.
    pub async fn scrape_with_cancel(
        &self,
        username: &str,
        cancel: &CancellationToken,
    ) -> Result<ScrapeReport, ScrapeError> {
        let controller = PaginationController::new(&self.executor, &self.config);
        controller
            .run(username, self.config.max_posts, cancel)
            .await
    }

    /// Fetch one post's detail record by shortcode.
    pub async fn post_details(&self, shortcode: &str) -> Result<PostRecord, ScrapeError> {
        self.post_details_with_cancel(shortcode, &CancellationToken::new())
            .await
    }

    /// Like [`post_details`](Self::post_details), but interruptible.
    pub async fn post_details_with_cancel(
        &self,
        shortcode: &str,
        cancel: &CancellationToken,
    ) -> Result<PostRecord, ScrapeError> {
        let controller = PaginationController::new(&self.executor, &self.config);
        controller.fetch_post_detail(shortcode, cancel).await
    }

    /// Snapshot of proxy health, for observability.
    pub fn proxy_health(&self) -> Vec<ProxyHealth> {
        self.pool.health()
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_invalid_config() {
        let config = ScraperConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(GramScraperBuilder::new().with_config(config).build().is_err());
    }

    #[test]
    fn builder_defaults_build() {
        let scraper = GramScraper::new().unwrap();
        assert!(scraper.proxy_health().is_empty());
    }
}
