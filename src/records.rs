//! Normalized output records handed to downstream formatting.
//!
//! These two shapes are the engine's entire output contract: a summary
//! record per subject and one content record per post. Both are immutable
//! once built; ownership passes to the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Summary record for one scraped profile.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileRecord {
    /// Internal numeric identifier, needed for cursor queries.
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub biography: String,
    pub follower_count: u64,
    pub following_count: u64,
    pub post_count: u64,
    pub profile_pic_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_pic_url_hd: Option<String>,
    pub is_verified: bool,
    pub is_private: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

/// Media kind of a single post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    Image,
    Video,
    Carousel,
}

/// Tagged location attached to a post, when present.
#[derive(Debug, Clone, Serialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

/// One content record per post.
///
/// `caption` stays `None` when no caption node was found, which is distinct
/// from an empty caption. `view_count` and `video_url` stay `None` for
/// non-video posts rather than being coerced to a sentinel.
#[derive(Debug, Clone, Serialize)]
pub struct PostRecord {
    pub id: String,
    pub shortcode: String,
    pub kind: PostKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub like_count: u64,
    pub comment_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    /// Unix seconds.
    pub timestamp: i64,
    pub permalink: String,
    pub media_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessibility_caption: Option<String>,
    pub owner_id: String,
    pub owner_username: String,
}

impl PostRecord {
    /// Canonical permanent URL for a shortcode.
    pub fn permalink_for(shortcode: &str) -> String {
        format!("https://www.instagram.com/p/{shortcode}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permalink_format() {
        assert_eq!(
            PostRecord::permalink_for("CxYz123"),
            "https://www.instagram.com/p/CxYz123/"
        );
    }

    #[test]
    fn absent_optionals_are_skipped_in_json() {
        let post = PostRecord {
            id: "1".into(),
            shortcode: "abc".into(),
            kind: PostKind::Image,
            caption: None,
            like_count: 0,
            comment_count: 0,
            view_count: None,
            timestamp: 1_700_000_000,
            permalink: PostRecord::permalink_for("abc"),
            media_urls: vec!["https://cdn.example/a.jpg".into()],
            video_url: None,
            location: None,
            accessibility_caption: None,
            owner_id: "9".into(),
            owner_username: "someone".into(),
        };
        let json = serde_json::to_string(&post).unwrap();
        assert!(!json.contains("view_count"));
        assert!(!json.contains("video_url"));
        assert!(json.contains("\"kind\":\"image\""));
    }
}
