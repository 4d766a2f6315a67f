//! Extraction engine.
//!
//! Turns a successful response body into normalized records by trying an
//! ordered list of pure parsing strategies. Each strategy is a function
//! `&str -> Result<_, ParseError>`; the first one producing a structurally
//! valid result wins, and a failure falls through to the next instead of
//! aborting. No strategy touches the network or the filesystem, so the
//! whole engine unit-tests against captured payloads.

mod posts;
mod profile;

pub use posts::{parse_cursor_page, parse_post_node};
pub use profile::{ProfileExtraction, STRATEGY_LOADER, STRATEGY_METADATA, STRATEGY_SHARED_DATA};

use log::debug;
use thiserror::Error;

use crate::records::PostRecord;

/// Failure of a single parsing strategy.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("marker not present in body")]
    NoMarker,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("required field missing: {0}")]
    MissingField(&'static str),
    #[error("unexpected structure: {0}")]
    Structure(&'static str),
}

/// All strategies failed. Distinct from network errors so callers can log
/// and sample malformed payloads for diagnosis.
#[derive(Debug, Error)]
#[error("all parsing strategies failed: {summary}")]
pub struct ExtractionFailure {
    pub summary: String,
}

impl ExtractionFailure {
    fn from_attempts(attempts: &[(&'static str, ParseError)]) -> Self {
        let summary = attempts
            .iter()
            .map(|(name, error)| format!("{name}: {error}"))
            .collect::<Vec<_>>()
            .join("; ");
        Self { summary }
    }
}

/// One page of posts from the cursor endpoint (or the embedded first page).
#[derive(Debug, Clone)]
pub struct PostPage {
    pub posts: Vec<PostRecord>,
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

/// Extract a subject's summary record, initial post batch, and next-page
/// cursor from the primary page body.
///
/// Strategy order: embedded shared-data assignment, the alternate loader
/// payload, then structured page metadata as a reduced-field last resort.
pub fn extract_profile(body: &str) -> Result<ProfileExtraction, ExtractionFailure> {
    let strategies: [(&'static str, fn(&str) -> Result<ProfileExtraction, ParseError>); 3] = [
        (STRATEGY_SHARED_DATA, profile::strategy_shared_data),
        (STRATEGY_LOADER, profile::strategy_loader),
        (STRATEGY_METADATA, profile::strategy_metadata),
    ];

    let mut attempts = Vec::new();
    for (name, strategy) in strategies {
        match strategy(body) {
            Ok(extraction) => {
                debug!("profile extracted via {name} strategy");
                return Ok(extraction);
            }
            Err(error) => attempts.push((name, error)),
        }
    }
    Err(ExtractionFailure::from_attempts(&attempts))
}

/// Extract a single post's record from its detail-page body.
pub fn extract_post_detail(body: &str) -> Result<PostRecord, ExtractionFailure> {
    let strategies: [(&'static str, fn(&str) -> Result<PostRecord, ParseError>); 2] = [
        ("detail_shared_data", posts::parse_detail_shared_data),
        ("detail_payload", posts::parse_detail_payload),
    ];

    let mut attempts = Vec::new();
    for (name, strategy) in strategies {
        match strategy(body) {
            Ok(post) => {
                debug!("post detail extracted via {name} strategy");
                return Ok(post);
            }
            Err(error) => attempts.push((name, error)),
        }
    }
    Err(ExtractionFailure::from_attempts(&attempts))
}

/// Extract one pagination page from a cursor-endpoint response body.
pub fn extract_post_page(body: &str) -> Result<PostPage, ExtractionFailure> {
    let strategies: [(&'static str, fn(&str) -> Result<PostPage, ParseError>); 2] = [
        ("cursor_payload", posts::parse_cursor_page),
        ("embedded_edges", posts::parse_embedded_page),
    ];

    let mut attempts = Vec::new();
    for (name, strategy) in strategies {
        match strategy(body) {
            Ok(page) => {
                debug!("post page extracted via {name} strategy ({} posts)", page.posts.len());
                return Ok(page);
            }
            Err(error) => attempts.push((name, error)),
        }
    }
    Err(ExtractionFailure::from_attempts(&attempts))
}

/// Coerce a count field: missing becomes 0, negatives clamp to 0.
pub(crate) fn coerce_count(value: Option<&serde_json::Value>) -> u64 {
    match value {
        Some(value) => value
            .as_u64()
            .or_else(|| value.as_i64().map(|signed| signed.max(0) as u64))
            .or_else(|| value.as_f64().map(|float| float.max(0.0) as u64))
            .unwrap_or(0),
        None => 0,
    }
}

/// Coerce whatever epoch representation the source uses to Unix seconds.
pub(crate) fn coerce_timestamp(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|float| float as i64))
        .or_else(|| value.as_str().and_then(|text| text.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_never_go_negative() {
        assert_eq!(coerce_count(Some(&serde_json::json!(-3))), 0);
        assert_eq!(coerce_count(Some(&serde_json::json!(7))), 7);
        assert_eq!(coerce_count(None), 0);
        assert_eq!(coerce_count(Some(&serde_json::json!(null))), 0);
    }

    #[test]
    fn timestamps_coerce_from_all_epoch_shapes() {
        assert_eq!(coerce_timestamp(&serde_json::json!(1_700_000_000)), Some(1_700_000_000));
        assert_eq!(coerce_timestamp(&serde_json::json!(1_700_000_000.9)), Some(1_700_000_000));
        assert_eq!(coerce_timestamp(&serde_json::json!("1700000000")), Some(1_700_000_000));
        assert_eq!(coerce_timestamp(&serde_json::json!("soon")), None);
    }

    #[test]
    fn garbage_body_is_extraction_failure_not_panic() {
        let error = extract_profile("<html><body>nothing here</body></html>").unwrap_err();
        assert!(error.summary.contains("shared_data"));
        assert!(error.summary.contains("page_metadata"));
    }
}
