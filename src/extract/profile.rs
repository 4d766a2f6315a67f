//! Profile parsing strategies.
//!
//! Three shapes the upstream serves for the same logical profile, tried in
//! priority order:
//!
//! 1. the embedded shared-data assignment (also covers the bare web-API
//!    JSON body the primary endpoint returns),
//! 2. the alternate `__additionalDataLoaded` loader payload,
//! 3. a JSON-LD metadata block, yielding a reduced field set.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;

use super::posts::parse_timeline;
use super::{ParseError, PostPage, coerce_count};
use crate::classify::locate_user;
use crate::records::ProfileRecord;

/// Strategy names, surfaced in logs and extraction-failure summaries.
pub const STRATEGY_SHARED_DATA: &str = "shared_data";
pub const STRATEGY_LOADER: &str = "loader_payload";
pub const STRATEGY_METADATA: &str = "page_metadata";

static SHARED_DATA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)window\._sharedData\s*=\s*(\{.+?\});</script>").unwrap()
});

static LOADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)window\.__additionalDataLoaded\([^,]+,\s*(\{.+?\})\);</script>").unwrap()
});

/// Everything the first page of a scrape yields.
#[derive(Debug, Clone)]
pub struct ProfileExtraction {
    pub profile: ProfileRecord,
    /// Internal id needed for cursor queries. Absent when only the reduced
    /// metadata strategy matched, in which case pagination cannot continue.
    pub user_id: Option<String>,
    /// Initial post batch plus cursor, when the payload embedded one.
    pub initial_page: Option<PostPage>,
}

/// Strategy 1: embedded shared-data blob, or the raw API JSON body.
pub(crate) fn strategy_shared_data(body: &str) -> Result<ProfileExtraction, ParseError> {
    let trimmed = body.trim();
    let root: Value = if trimmed.starts_with('{') {
        serde_json::from_str(trimmed)?
    } else {
        let captures = SHARED_DATA_RE.captures(body).ok_or(ParseError::NoMarker)?;
        serde_json::from_str(&captures[1])?
    };
    extraction_from_user_payload(&root)
}

/// Strategy 2: the alternate loader-call payload.
pub(crate) fn strategy_loader(body: &str) -> Result<ProfileExtraction, ParseError> {
    let captures = LOADER_RE.captures(body).ok_or(ParseError::NoMarker)?;
    let root: Value = serde_json::from_str(&captures[1])?;
    extraction_from_user_payload(&root)
}

fn extraction_from_user_payload(root: &Value) -> Result<ProfileExtraction, ParseError> {
    let user = locate_user(root).ok_or(ParseError::Structure("no user object in payload"))?;

    let username = user
        .get("username")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("username"))?
        .to_string();
    let user_id = user.get("id").and_then(Value::as_str).map(str::to_string);

    let profile = ProfileRecord {
        id: user_id.clone().unwrap_or_else(|| username.clone()),
        username,
        full_name: user
            .get("full_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        biography: user
            .get("biography")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        follower_count: coerce_count(user.pointer("/edge_followed_by/count")),
        following_count: coerce_count(user.pointer("/edge_follow/count")),
        post_count: coerce_count(user.pointer("/edge_owner_to_timeline_media/count")),
        profile_pic_url: user
            .get("profile_pic_url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        profile_pic_url_hd: user
            .get("profile_pic_url_hd")
            .and_then(Value::as_str)
            .map(str::to_string),
        is_verified: user
            .get("is_verified")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        is_private: user
            .get("is_private")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        category: user
            .get("category_name")
            .or_else(|| user.get("category_enum"))
            .and_then(Value::as_str)
            .map(str::to_string),
        external_url: user
            .get("external_url")
            .and_then(Value::as_str)
            .map(str::to_string),
        scraped_at: Utc::now(),
    };

    let initial_page = user
        .get("edge_owner_to_timeline_media")
        .filter(|timeline| timeline.get("edges").is_some())
        .map(parse_timeline)
        .transpose()?;

    Ok(ProfileExtraction {
        profile,
        user_id,
        initial_page,
    })
}

/// Strategy 3: JSON-LD metadata, the last resort. Provides a reduced field
/// set with no internal id, no post batch, and no cursor.
pub(crate) fn strategy_metadata(body: &str) -> Result<ProfileExtraction, ParseError> {
    let document = Html::parse_document(body);
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#)
        .map_err(|_| ParseError::Structure("invalid metadata selector"))?;

    for script in document.select(&selector) {
        let raw = script.text().collect::<String>();
        let Ok(data) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        let kind = data.get("@type").and_then(Value::as_str).unwrap_or("");
        if kind != "Person" && kind != "ProfilePage" {
            continue;
        }
        if let Some(extraction) = reduced_profile(&data) {
            return Ok(extraction);
        }
    }

    Err(ParseError::NoMarker)
}

fn reduced_profile(data: &Value) -> Option<ProfileExtraction> {
    let username = data
        .get("alternateName")
        .and_then(Value::as_str)
        .map(|name| name.trim_start_matches('@').to_string())
        .or_else(|| {
            data.pointer("/mainEntityofPage/@id")
                .or_else(|| data.pointer("/mainEntityOfPage/@id"))
                .and_then(Value::as_str)
                .and_then(username_from_profile_url)
        })?;

    let biography = data
        .get("description")
        .and_then(Value::as_str)
        .map(|text| html_escape::decode_html_entities(text).into_owned())
        .unwrap_or_default();

    let profile = ProfileRecord {
        id: data
            .pointer("/identifier/value")
            .and_then(Value::as_str)
            .unwrap_or(&username)
            .to_string(),
        username,
        full_name: data
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        biography,
        follower_count: interaction_count(data, "FollowAction"),
        following_count: 0,
        post_count: 0,
        profile_pic_url: data
            .get("image")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        profile_pic_url_hd: None,
        is_verified: false,
        is_private: false,
        category: None,
        external_url: data.get("url").and_then(Value::as_str).map(str::to_string),
        scraped_at: Utc::now(),
    };

    Some(ProfileExtraction {
        profile,
        user_id: None,
        initial_page: None,
    })
}

fn interaction_count(data: &Value, interaction: &str) -> u64 {
    let Some(stats) = data.get("interactionStatistic") else {
        return 0;
    };
    let entries: Vec<&Value> = match stats {
        Value::Array(list) => list.iter().collect(),
        single => vec![single],
    };
    for entry in entries {
        let matches = entry
            .pointer("/interactionType/@type")
            .or_else(|| entry.get("interactionType"))
            .and_then(Value::as_str)
            .is_some_and(|kind| kind.contains(interaction));
        if matches {
            return coerce_count(entry.get("userInteractionCount"));
        }
    }
    0
}

fn username_from_profile_url(url: &str) -> Option<String> {
    let trimmed = url.trim_end_matches('/');
    let segment = trimmed.rsplit('/').next()?;
    (!segment.is_empty()).then(|| segment.to_string())
}
