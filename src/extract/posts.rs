//! Post-payload parsing.
//!
//! Handles both sources of post edges: the timeline collection embedded in
//! the primary page payload and the cursor-endpoint JSON used for
//! subsequent pages.

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{ParseError, PostPage, coerce_count, coerce_timestamp};
use crate::records::{Location, PostKind, PostRecord};

static SHARED_DATA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)window\._sharedData\s*=\s*(\{.+?\});</script>").unwrap()
});

/// Parse one post node from a timeline edge.
///
/// `id`, `shortcode`, and the timestamp are required; a node missing any of
/// them is structurally invalid. Counts coerce to non-negative integers;
/// `view_count` and `video_url` stay absent for non-video posts.
pub fn parse_post_node(node: &Value) -> Result<PostRecord, ParseError> {
    let id = node
        .get("id")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("id"))?
        .to_string();
    let shortcode = node
        .get("shortcode")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("shortcode"))?
        .to_string();
    let timestamp = node
        .get("taken_at_timestamp")
        .and_then(coerce_timestamp)
        .ok_or(ParseError::MissingField("taken_at_timestamp"))?;

    let typename = node.get("__typename").and_then(Value::as_str).unwrap_or("");
    let is_video = node.get("is_video").and_then(Value::as_bool).unwrap_or(false);
    let kind = match typename {
        "GraphSidecar" => PostKind::Carousel,
        "GraphVideo" => PostKind::Video,
        _ if is_video => PostKind::Video,
        _ => PostKind::Image,
    };

    let mut media_urls = Vec::new();
    let mut video_url = None;

    if kind == PostKind::Carousel {
        let children = node
            .pointer("/edge_sidecar_to_children/edges")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for edge in children {
            let child = edge.get("node").cloned().unwrap_or(Value::Null);
            if child.get("is_video").and_then(Value::as_bool).unwrap_or(false) {
                if let Some(url) = child.get("video_url").and_then(Value::as_str) {
                    video_url.get_or_insert_with(|| url.to_string());
                    media_urls.push(url.to_string());
                }
            } else if let Some(url) = child.get("display_url").and_then(Value::as_str) {
                media_urls.push(url.to_string());
            }
        }
    } else {
        if let Some(url) = node.get("display_url").and_then(Value::as_str) {
            media_urls.push(url.to_string());
        }
        if kind == PostKind::Video
            && let Some(url) = node.get("video_url").and_then(Value::as_str)
        {
            if !media_urls.iter().any(|existing| existing == url) {
                media_urls.push(url.to_string());
            }
            video_url = Some(url.to_string());
        }
    }

    // No caption node and an empty caption are different things; only the
    // former maps to None.
    let caption = node
        .pointer("/edge_media_to_caption/edges/0/node/text")
        .and_then(Value::as_str)
        .map(str::to_string);

    let like_count = match node.pointer("/edge_media_preview_like/count") {
        Some(count) => coerce_count(Some(count)),
        None => coerce_count(node.pointer("/edge_liked_by/count")),
    };
    let comment_count = match node.pointer("/edge_media_to_comment/count") {
        Some(count) => coerce_count(Some(count)),
        None => coerce_count(node.pointer("/edge_media_preview_comment/count")),
    };

    // Zero views and "not a video" must stay distinguishable.
    let view_count = match kind {
        PostKind::Video => node.get("video_view_count").and_then(Value::as_u64),
        _ => None,
    };

    let location = node.get("location").filter(|v| v.is_object()).and_then(|loc| {
        Some(Location {
            id: loc.get("id").and_then(Value::as_str).map(str::to_string)?,
            name: loc
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            slug: loc.get("slug").and_then(Value::as_str).map(str::to_string),
        })
    });

    Ok(PostRecord {
        permalink: PostRecord::permalink_for(&shortcode),
        id,
        shortcode,
        kind,
        caption,
        like_count,
        comment_count,
        view_count,
        timestamp,
        media_urls,
        video_url,
        location,
        accessibility_caption: node
            .get("accessibility_caption")
            .and_then(Value::as_str)
            .map(str::to_string),
        owner_id: node
            .pointer("/owner/id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        owner_username: node
            .pointer("/owner/username")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Parse a timeline collection (`edge_owner_to_timeline_media`) into a page.
/// Structurally invalid nodes are skipped with a warning rather than failing
/// the whole page.
pub(crate) fn parse_timeline(timeline: &Value) -> Result<PostPage, ParseError> {
    let edges = timeline
        .get("edges")
        .and_then(Value::as_array)
        .ok_or(ParseError::Structure("timeline has no edges array"))?;

    let mut posts = Vec::with_capacity(edges.len());
    for edge in edges {
        let Some(node) = edge.get("node") else {
            continue;
        };
        match parse_post_node(node) {
            Ok(post) => posts.push(post),
            Err(error) => warn!("skipping malformed post node: {error}"),
        }
    }

    let has_next_page = timeline
        .pointer("/page_info/has_next_page")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let end_cursor = has_next_page
        .then(|| {
            timeline
                .pointer("/page_info/end_cursor")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .flatten();

    Ok(PostPage {
        posts,
        has_next_page,
        end_cursor,
    })
}

/// Strategy for cursor-endpoint responses:
/// `{"data":{"user":{"edge_owner_to_timeline_media":{...}}}}`.
pub fn parse_cursor_page(body: &str) -> Result<PostPage, ParseError> {
    let root: Value = serde_json::from_str(body.trim())?;
    let timeline = root
        .pointer("/data/user/edge_owner_to_timeline_media")
        .ok_or(ParseError::Structure("no timeline in cursor payload"))?;
    parse_timeline(timeline)
}

/// Strategy for a post detail page embedding the record in a shared-data
/// script blob (`entry_data.PostPage[0].graphql.shortcode_media`).
pub(crate) fn parse_detail_shared_data(body: &str) -> Result<PostRecord, ParseError> {
    let captures = SHARED_DATA_RE.captures(body).ok_or(ParseError::NoMarker)?;
    let root: Value = serde_json::from_str(&captures[1])?;
    let media = root
        .pointer("/entry_data/PostPage/0/graphql/shortcode_media")
        .ok_or(ParseError::Structure("no shortcode media in shared data"))?;
    parse_post_node(media)
}

/// Strategy for the bare JSON detail body
/// (`{"graphql":{"shortcode_media":{...}}}`).
pub(crate) fn parse_detail_payload(body: &str) -> Result<PostRecord, ParseError> {
    let root: Value = serde_json::from_str(body.trim())?;
    let media = root
        .pointer("/graphql/shortcode_media")
        .or_else(|| root.pointer("/data/shortcode_media"))
        .ok_or(ParseError::Structure("no shortcode media in payload"))?;
    parse_post_node(media)
}

/// Strategy for pages that embed the timeline in a shared-data script blob.
pub(crate) fn parse_embedded_page(body: &str) -> Result<PostPage, ParseError> {
    let captures = SHARED_DATA_RE.captures(body).ok_or(ParseError::NoMarker)?;
    let root: Value = serde_json::from_str(&captures[1])?;
    let timeline = root
        .pointer("/entry_data/ProfilePage/0/graphql/user/edge_owner_to_timeline_media")
        .ok_or(ParseError::Structure("no timeline in shared data"))?;
    parse_timeline(timeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn image_node(id: &str, shortcode: &str) -> Value {
        json!({
            "id": id,
            "shortcode": shortcode,
            "__typename": "GraphImage",
            "is_video": false,
            "display_url": format!("https://cdn.example/{shortcode}.jpg"),
            "taken_at_timestamp": 1_700_000_000,
            "edge_media_preview_like": {"count": 10},
            "edge_media_to_comment": {"count": 2},
            "owner": {"id": "42", "username": "alpha"},
        })
    }

    #[test]
    fn image_node_has_no_video_fields() {
        let post = parse_post_node(&image_node("1", "aaa")).unwrap();
        assert_eq!(post.kind, PostKind::Image);
        assert!(post.view_count.is_none());
        assert!(post.video_url.is_none());
        assert!(post.caption.is_none());
        assert_eq!(post.like_count, 10);
        assert_eq!(post.permalink, "https://www.instagram.com/p/aaa/");
    }

    #[test]
    fn video_node_keeps_views_and_video_url() {
        let mut node = image_node("2", "bbb");
        node["__typename"] = json!("GraphVideo");
        node["is_video"] = json!(true);
        node["video_url"] = json!("https://cdn.example/bbb.mp4");
        node["video_view_count"] = json!(0);
        let post = parse_post_node(&node).unwrap();
        assert_eq!(post.kind, PostKind::Video);
        // Zero views is still a recorded value, not absence.
        assert_eq!(post.view_count, Some(0));
        assert_eq!(post.video_url.as_deref(), Some("https://cdn.example/bbb.mp4"));
        assert_eq!(post.media_urls.len(), 2);
    }

    #[test]
    fn carousel_flattens_children() {
        let mut node = image_node("3", "ccc");
        node["__typename"] = json!("GraphSidecar");
        node["edge_sidecar_to_children"] = json!({
            "edges": [
                {"node": {"is_video": false, "display_url": "https://cdn.example/c1.jpg"}},
                {"node": {"is_video": true, "video_url": "https://cdn.example/c2.mp4"}},
            ]
        });
        let post = parse_post_node(&node).unwrap();
        assert_eq!(post.kind, PostKind::Carousel);
        assert_eq!(post.media_urls.len(), 2);
        assert_eq!(post.video_url.as_deref(), Some("https://cdn.example/c2.mp4"));
    }

    #[test]
    fn empty_caption_is_not_missing_caption() {
        let mut node = image_node("4", "ddd");
        node["edge_media_to_caption"] = json!({"edges": [{"node": {"text": ""}}]});
        let post = parse_post_node(&node).unwrap();
        assert_eq!(post.caption.as_deref(), Some(""));
    }

    #[test]
    fn node_without_id_is_invalid() {
        let mut node = image_node("5", "eee");
        node.as_object_mut().unwrap().remove("id");
        assert!(matches!(
            parse_post_node(&node),
            Err(ParseError::MissingField("id"))
        ));
    }

    #[test]
    fn malformed_node_is_skipped_not_fatal() {
        let timeline = json!({
            "edges": [
                {"node": image_node("1", "aaa")},
                {"node": {"shortcode": "broken"}},
                {"node": image_node("2", "bbb")},
            ],
            "page_info": {"has_next_page": true, "end_cursor": "CURSOR1"},
        });
        let page = parse_timeline(&timeline).unwrap();
        assert_eq!(page.posts.len(), 2);
        assert!(page.has_next_page);
        assert_eq!(page.end_cursor.as_deref(), Some("CURSOR1"));
    }

    #[test]
    fn last_page_yields_no_cursor_even_if_present() {
        let timeline = json!({
            "edges": [],
            "page_info": {"has_next_page": false, "end_cursor": "STALE"},
        });
        let page = parse_timeline(&timeline).unwrap();
        assert!(!page.has_next_page);
        assert!(page.end_cursor.is_none());
    }

    #[test]
    fn cursor_page_navigates_graphql_shape() {
        let body = json!({
            "data": {"user": {"edge_owner_to_timeline_media": {
                "edges": [{"node": image_node("9", "zzz")}],
                "page_info": {"has_next_page": false, "end_cursor": null},
            }}}
        })
        .to_string();
        let page = parse_cursor_page(&body).unwrap();
        assert_eq!(page.posts.len(), 1);
        assert!(!page.has_next_page);
    }

    #[test]
    fn detail_page_shared_data_parses_single_post() {
        let payload = json!({
            "entry_data": {"PostPage": [{"graphql": {
                "shortcode_media": image_node("7", "ggg"),
            }}]}
        });
        let html = format!(
            "<html><script>window._sharedData = {payload};</script></html>"
        );
        let post = parse_detail_shared_data(&html).unwrap();
        assert_eq!(post.shortcode, "ggg");
        assert_eq!(post.owner_username, "alpha");
    }

    #[test]
    fn detail_payload_parses_bare_json() {
        let body = json!({"graphql": {"shortcode_media": image_node("8", "hhh")}}).to_string();
        let post = parse_detail_payload(&body).unwrap();
        assert_eq!(post.id, "8");
        assert_eq!(post.permalink, "https://www.instagram.com/p/hhh/");
    }

    #[test]
    fn detail_page_without_media_is_invalid() {
        let html = "<html><script>window._sharedData = {\"entry_data\":{}};</script></html>";
        assert!(matches!(
            parse_detail_shared_data(html),
            Err(ParseError::Structure(_))
        ));
    }

    #[test]
    fn location_subrecord_is_optional() {
        let mut node = image_node("6", "fff");
        node["location"] = json!({"id": "77", "name": "Lisbon", "slug": "lisbon"});
        let post = parse_post_node(&node).unwrap();
        let location = post.location.unwrap();
        assert_eq!(location.id, "77");
        assert_eq!(location.slug.as_deref(), Some("lisbon"));
    }
}
