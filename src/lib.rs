//! # gramscraper-rs
//!
//! A resilient fetch-and-paginate engine for public Instagram profile and
//! post data, built on plain HTTP requests with no browser automation.
//!
//! The crate turns an unreliable, rate-limited, anti-scraping-hardened
//! endpoint into a dependable stream of structured records:
//!
//! - retry with exponential backoff on transient failures
//! - detection of active blocking (rate limits, login redirects, challenge
//!   pages) with identity rotation to route around it
//! - a rotating pool of user agents and health-tracked proxies
//! - cursor-based pagination with deduplication and stall protection
//! - three fallback parsing strategies for the payload shapes the upstream
//!   serves for the same logical data
//!
//! ## Example
//!
//! ```no_run
//! use gramscraper_rs::GramScraper;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scraper = GramScraper::builder()
//!         .with_max_posts(100)
//!         .build()?;
//!     let report = scraper.scrape("instagram").await?;
//!     println!(
//!         "@{}: {} posts ({:?})",
//!         report.profile.username,
//!         report.posts.len(),
//!         report.termination
//!     );
//!     Ok(())
//! }
//! ```

mod scraper;

pub mod classify;
pub mod config;
pub mod extract;
pub mod http;
pub mod identity;
pub mod pagination;
pub mod records;

pub use crate::scraper::{GramScraper, GramScraperBuilder};

pub use crate::classify::{Classification, Outcome};

pub use crate::config::{ConfigError, ScraperConfig};

pub use crate::extract::{
    ExtractionFailure,
    ParseError,
    PostPage,
    ProfileExtraction,
    extract_post_detail,
    extract_post_page,
    extract_profile,
};

pub use crate::http::{
    FetchError,
    HttpTransport,
    RawResponse,
    ReqwestTransport,
    RequestExecutor,
    RequestOutcome,
    RequestSpec,
    TransportError,
};

pub use crate::identity::{
    Identity,
    IdentityPool,
    PoolError,
    ProxyHealth,
    ProxyState,
    ReportSignal,
    UserAgentRotator,
};

pub use crate::pagination::{
    PaginationController,
    ScrapeError,
    ScrapeFailure,
    ScrapeReport,
    Termination,
};

pub use crate::records::{Location, PostKind, PostRecord, ProfileRecord};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
