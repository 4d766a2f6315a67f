//! Pagination controller.
//!
//! Drives one subject's scrape to completion: first the primary page, then
//! the cursor endpoint until the upstream signals the end, the record cap is
//! hit, or the stall guard fires. Records already accumulated are always
//! returned, even when a later page fails or the run is cancelled.

use std::collections::HashSet;
use std::fmt;

use log::{info, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ScraperConfig;
use crate::extract::{ExtractionFailure, extract_post_detail, extract_post_page, extract_profile};
use crate::http::{FetchError, RequestExecutor, RequestOutcome, RequestSpec};
use crate::classify::Outcome;
use crate::records::{PostRecord, ProfileRecord};

/// Why a completed scrape stopped. Distinct from failure: all four are
/// successful terminations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Upstream signalled no next page.
    Exhausted,
    /// The configured record cap was reached.
    Capped,
    /// Three consecutive pages contributed nothing new. Treated as a safe
    /// completion: the cursor protocol may legitimately repeat a boundary
    /// page.
    Stalled,
    /// The subject is private; summary only.
    Private,
}

/// Output of one completed subject scrape.
#[derive(Debug, Clone)]
pub struct ScrapeReport {
    pub profile: ProfileRecord,
    pub posts: Vec<PostRecord>,
    pub termination: Termination,
    pub pages_fetched: u32,
}

/// The specific failure kind, separated from the partial records so callers
/// can match on it.
#[derive(Debug, Error)]
pub enum ScrapeFailure {
    #[error("subject name is not a valid username")]
    InvalidSubject,
    #[error("subject not found")]
    NotFound,
    #[error("hard block after retries: {signal}")]
    Blocked { signal: String },
    #[error("transient failures exhausted after {attempts} attempts: {signal}")]
    Transient { attempts: u32, signal: String },
    #[error(transparent)]
    Extraction(#[from] ExtractionFailure),
    #[error("identity pool exhausted ({banned} proxies banned)")]
    PoolExhausted { banned: usize },
    #[error("scrape cancelled")]
    Cancelled,
}

/// A failed scrape. Records accumulated before the failure are retained;
/// the caller decides whether partial data is acceptable.
#[derive(Debug)]
pub struct ScrapeError {
    pub failure: ScrapeFailure,
    pub profile: Option<ProfileRecord>,
    pub posts: Vec<PostRecord>,
    pub pages_fetched: u32,
}

impl fmt::Display for ScrapeError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.failure)?;
        if !self.posts.is_empty() {
            write!(formatter, " ({} records retained)", self.posts.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for ScrapeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.failure)
    }
}

/// Cursor state for one logical scrape. Owned exclusively by the controller
/// and destroyed when the subject completes.
struct CursorState {
    token: Option<String>,
    page_index: u32,
    fetched_ids: HashSet<String>,
    stalls: u32,
}

/// Drives the executor and extraction engine through one subject's pages.
pub struct PaginationController<'a> {
    executor: &'a RequestExecutor,
    config: &'a ScraperConfig,
}

impl<'a> PaginationController<'a> {
    pub fn new(executor: &'a RequestExecutor, config: &'a ScraperConfig) -> Self {
        Self { executor, config }
    }

    /// Scrape one subject to completion. `max_posts` of 0 means unlimited.
    pub async fn run(
        &self,
        username: &str,
        max_posts: u64,
        cancel: &CancellationToken,
    ) -> Result<ScrapeReport, ScrapeError> {
        let username = sanitize_username(username).ok_or_else(|| ScrapeError {
            failure: ScrapeFailure::InvalidSubject,
            profile: None,
            posts: Vec::new(),
            pages_fetched: 0,
        })?;
        let cap = if max_posts == 0 { u64::MAX } else { max_posts };

        info!("starting scrape for @{username}");

        // First page: the subject's primary URL.
        let spec = RequestSpec::get(self.config.profile_url(&username));
        let outcome = self
            .executor
            .execute(&spec, cancel)
            .await
            .map_err(|error| fetch_error(error, None, Vec::new(), 0))?;

        let body = outcome.text().unwrap_or_default();
        match outcome.outcome {
            Outcome::Success => {}
            Outcome::PrivateAccount => {
                // Summary-only completion: parse what the private payload
                // exposes and stop.
                let extraction = extract_profile(&body).map_err(|failure| ScrapeError {
                    failure: failure.into(),
                    profile: None,
                    posts: Vec::new(),
                    pages_fetched: 1,
                })?;
                info!("@{username} is private; returning summary only");
                return Ok(ScrapeReport {
                    profile: extraction.profile,
                    posts: Vec::new(),
                    termination: Termination::Private,
                    pages_fetched: 1,
                });
            }
            _ => {
                return Err(fetch_outcome_error(&outcome, None, Vec::new(), 1));
            }
        }

        let extraction = extract_profile(&body).map_err(|failure| ScrapeError {
            failure: failure.into(),
            profile: None,
            posts: Vec::new(),
            pages_fetched: 1,
        })?;
        let profile = extraction.profile;
        let user_id = extraction.user_id;

        let mut cursor = CursorState {
            token: None,
            page_index: 0,
            fetched_ids: HashSet::new(),
            stalls: 0,
        };
        let mut posts: Vec<PostRecord> = Vec::new();
        let mut pages_fetched: u32 = 1;

        if let Some(page) = extraction.initial_page {
            let added = accumulate(&mut posts, &mut cursor.fetched_ids, page.posts, cap);
            info!("initial page yielded {added} records for @{username}");
            cursor.token = page.end_cursor;
        }

        if posts.len() as u64 >= cap {
            // Same precedence as the cursor loop: when the page that filled
            // the cap also signalled the end, exhaustion wins.
            let termination = if cursor.token.is_none() {
                Termination::Exhausted
            } else {
                Termination::Capped
            };
            return Ok(ScrapeReport {
                profile,
                posts,
                termination,
                pages_fetched,
            });
        }

        // Subsequent pages via the cursor endpoint. Without an internal id
        // (reduced metadata extraction) pagination cannot continue.
        let termination = if let Some(user_id) = user_id.as_deref() {
            loop {
                let Some(token) = cursor.token.clone() else {
                    break Termination::Exhausted;
                };

                cursor.page_index += 1;
                // The cursor endpoint is an XHR in a browser session; mimic
                // the headers one would carry.
                let spec = RequestSpec::get(self.config.cursor_url(user_id, &token))
                    .with_header("Referer", format!("{}/{username}/", self.config.base_url))
                    .with_header("X-Requested-With", "XMLHttpRequest");
                let outcome = self.executor.execute(&spec, cancel).await.map_err(|error| {
                    fetch_error(error, Some(profile.clone()), posts.clone(), pages_fetched)
                })?;
                pages_fetched += 1;

                if outcome.outcome != Outcome::Success {
                    return Err(fetch_outcome_error(
                        &outcome,
                        Some(profile.clone()),
                        posts.clone(),
                        pages_fetched,
                    ));
                }

                let page_body = outcome.text().unwrap_or_default();
                let page = extract_post_page(&page_body).map_err(|failure| ScrapeError {
                    failure: failure.into(),
                    profile: Some(profile.clone()),
                    posts: posts.clone(),
                    pages_fetched,
                })?;

                let added = accumulate(&mut posts, &mut cursor.fetched_ids, page.posts, cap);
                info!(
                    "page {} yielded {added} new records for @{username} (total {})",
                    cursor.page_index,
                    posts.len()
                );

                // The authoritative end-of-pages signal wins over the stall
                // heuristic: a repeated final boundary page is a legitimate
                // exhaustion, not a protocol bug.
                if !page.has_next_page {
                    break Termination::Exhausted;
                }
                cursor.token = page.end_cursor;

                if posts.len() as u64 >= cap {
                    break Termination::Capped;
                }

                if added == 0 {
                    cursor.stalls += 1;
                    if cursor.stalls >= self.config.stall_limit {
                        warn!(
                            "@{username}: {} consecutive pages with no new records, stopping",
                            cursor.stalls
                        );
                        break Termination::Stalled;
                    }
                } else {
                    cursor.stalls = 0;
                }
            }
        } else if cursor.token.is_some() {
            warn!("@{username}: cursor present but no internal id; cannot paginate");
            Termination::Exhausted
        } else {
            Termination::Exhausted
        };

        info!(
            "scrape of @{username} done: {} records over {pages_fetched} pages ({termination:?})",
            posts.len()
        );
        Ok(ScrapeReport {
            profile,
            posts,
            termination,
            pages_fetched,
        })
    }

    /// Fetch one post's detail record by shortcode, with the same retry and
    /// classification discipline as a page fetch.
    pub async fn fetch_post_detail(
        &self,
        shortcode: &str,
        cancel: &CancellationToken,
    ) -> Result<PostRecord, ScrapeError> {
        let shortcode = sanitize_shortcode(shortcode).ok_or_else(|| ScrapeError {
            failure: ScrapeFailure::InvalidSubject,
            profile: None,
            posts: Vec::new(),
            pages_fetched: 0,
        })?;

        let spec = RequestSpec::get(self.config.post_url(&shortcode));
        let outcome = self
            .executor
            .execute(&spec, cancel)
            .await
            .map_err(|error| fetch_error(error, None, Vec::new(), 0))?;
        if outcome.outcome != Outcome::Success {
            return Err(fetch_outcome_error(&outcome, None, Vec::new(), 1));
        }

        let body = outcome.text().unwrap_or_default();
        extract_post_detail(&body).map_err(|failure| ScrapeError {
            failure: failure.into(),
            profile: None,
            posts: Vec::new(),
            pages_fetched: 1,
        })
    }
}

/// Append records whose ids have not been seen, up to the cap. First
/// occurrence wins; later duplicates are dropped unmerged. Returns how many
/// records were new.
fn accumulate(
    posts: &mut Vec<PostRecord>,
    fetched_ids: &mut HashSet<String>,
    batch: Vec<PostRecord>,
    cap: u64,
) -> usize {
    let mut added = 0;
    for post in batch {
        if posts.len() as u64 >= cap {
            break;
        }
        if fetched_ids.insert(post.id.clone()) {
            posts.push(post);
            added += 1;
        }
    }
    added
}

fn fetch_error(
    error: FetchError,
    profile: Option<ProfileRecord>,
    posts: Vec<PostRecord>,
    pages_fetched: u32,
) -> ScrapeError {
    let failure = match error {
        FetchError::PoolExhausted { banned } => ScrapeFailure::PoolExhausted { banned },
        FetchError::Cancelled => ScrapeFailure::Cancelled,
    };
    ScrapeError {
        failure,
        profile,
        posts,
        pages_fetched,
    }
}

fn fetch_outcome_error(
    outcome: &RequestOutcome,
    profile: Option<ProfileRecord>,
    posts: Vec<PostRecord>,
    pages_fetched: u32,
) -> ScrapeError {
    let failure = match outcome.outcome {
        Outcome::NotFound => ScrapeFailure::NotFound,
        Outcome::HardBlock => ScrapeFailure::Blocked {
            signal: outcome.signal.clone(),
        },
        _ => ScrapeFailure::Transient {
            attempts: outcome.attempts,
            signal: outcome.signal.clone(),
        },
    };
    ScrapeError {
        failure,
        profile,
        posts,
        pages_fetched,
    }
}

/// Validate a post shortcode (the base64url-style alphabet), accepting a
/// value pasted with surrounding slashes.
fn sanitize_shortcode(raw: &str) -> Option<String> {
    let code = raw.trim().trim_matches('/');
    if code.is_empty() {
        return None;
    }
    code.chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        .then(|| code.to_string())
}

/// Strip a leading `@`, lowercase, and validate the username alphabet.
fn sanitize_username(raw: &str) -> Option<String> {
    let name = raw.trim().trim_start_matches('@').to_lowercase();
    if name.is_empty() {
        return None;
    }
    name.chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '.' || ch == '_')
        .then_some(name)
}
