//! Response classification.
//!
//! Maps a raw HTTP response to one of five outcome classes. Rules run in a
//! fixed order: block indicators must be ruled out before the private-account
//! probe, because a private profile page is also a plain 200.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Outcome class of one request attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    TransientFailure,
    HardBlock,
    NotFound,
    PrivateAccount,
}

/// Classification plus the signal that produced it, for diagnostics and for
/// the hard-block surfacing contract.
#[derive(Debug, Clone)]
pub struct Classification {
    pub outcome: Outcome,
    pub signal: String,
}

impl Classification {
    fn new(outcome: Outcome, signal: impl Into<String>) -> Self {
        Self {
            outcome,
            signal: signal.into(),
        }
    }
}

/// Redirect targets that indicate the session was funnelled into a login or
/// challenge flow.
static BLOCK_REDIRECTS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"/accounts/login/").unwrap(),
        Regex::new(r"/challenge/").unwrap(),
    ]
});

/// Body markers of challenge interstitials served with a 200.
static BLOCK_MARKERS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#""challenge_required""#).unwrap(),
        Regex::new(r"/challenge/\?next=").unwrap(),
        Regex::new(r#"<title>\s*Login\s*[•·]\s*Instagram\s*</title>"#).unwrap(),
        Regex::new(r#"id="slfErrorAlert""#).unwrap(),
    ]
});

/// Classify one raw response.
///
/// `location` is the `Location` header of a redirect, when present; the
/// transport keeps redirects disabled so it stays observable.
pub fn classify(status: u16, location: Option<&str>, body: &str) -> Classification {
    if status == 404 {
        return Classification::new(Outcome::NotFound, "http 404");
    }

    if status == 429 {
        return Classification::new(Outcome::HardBlock, "http 429 rate limit");
    }

    if (300..400).contains(&status) {
        let target = location.unwrap_or("");
        if BLOCK_REDIRECTS.iter().any(|regex| regex.is_match(target)) {
            return Classification::new(
                Outcome::HardBlock,
                format!("redirect to challenge path: {target}"),
            );
        }
        // Redirects with no block target are most plausibly CDN hiccups;
        // retried with backoff rather than burning the proxy.
        return Classification::new(
            Outcome::TransientFailure,
            format!("unexpected redirect {status}"),
        );
    }

    if status >= 500 {
        return Classification::new(Outcome::TransientFailure, format!("http {status}"));
    }

    if status == 200 {
        if body.trim().is_empty() {
            return Classification::new(Outcome::HardBlock, "empty body on 200");
        }
        if let Some(marker) = BLOCK_MARKERS.iter().find(|regex| regex.is_match(body)) {
            return Classification::new(
                Outcome::HardBlock,
                format!("challenge marker: {}", marker.as_str()),
            );
        }
        if let Some(signal) = private_account_signal(body) {
            return Classification::new(Outcome::PrivateAccount, signal);
        }
    }

    Classification::new(Outcome::Success, format!("http {status}"))
}

/// Structural probe for a private account: the payload must both flag the
/// subject private and lack the timeline collection the caller asked for.
/// Textual probing is not enough; a public profile's biography can contain
/// the word "private".
fn private_account_signal(body: &str) -> Option<String> {
    let root: Value = serde_json::from_str(body.trim()).ok()?;
    let user = locate_user(&root)?;

    if user.get("is_private")?.as_bool() != Some(true) {
        return None;
    }

    let timeline_empty = user
        .pointer("/edge_owner_to_timeline_media/edges")
        .and_then(Value::as_array)
        .is_none_or(|edges| edges.is_empty());

    timeline_empty.then(|| "is_private with no accessible timeline".to_string())
}

/// Navigate the known payload shapes down to the user object.
pub(crate) fn locate_user(root: &Value) -> Option<&Value> {
    for path in [
        "/data/user",
        "/entry_data/ProfilePage/0/graphql/user",
        "/graphql/user",
        "/user",
    ] {
        if let Some(user) = root.pointer(path)
            && user.is_object()
        {
            return Some(user);
        }
    }
    None
}
