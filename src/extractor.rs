/// Timeline extractor module
///
/// Parses the vendor's nested timeline JSON into a flat, ordered list of
/// normalized posts, resolving media variants and timestamp formats.
/// Order follows the document's instruction list, which is not necessarily
/// chronological.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cursor / filter timestamp format. Fixed-width and zero-padded, so plain
/// string comparison matches chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Format the vendor uses inside `legacy.created_at`,
/// e.g. "Wed Oct 10 20:19:24 +0000 2018".
const VENDOR_TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    AnimatedGif,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub url: String,
}

/// Canonical post representation produced here and consumed by every
/// downstream stage. Created fresh per poll cycle, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedPost {
    pub id: String,
    pub text: String,
    /// Set by the translation enricher before it rewrites `text`.
    pub original_text: Option<String>,
    pub is_quote: bool,
    pub is_retweet: bool,
    /// Normalized UTC timestamp, `YYYY-MM-DD-HH-MM-SS`.
    pub created_at: String,
    pub media: Vec<MediaItem>,
}

/// Format a chrono timestamp into the cursor string format.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse the vendor's verbose timestamp and normalize it to UTC in the
/// fixed cursor format. Returns None on any parse failure.
fn normalize_timestamp(raw: &str) -> Option<String> {
    let parsed = DateTime::parse_from_str(raw, VENDOR_TIMESTAMP_FORMAT).ok()?;
    Some(format_timestamp(parsed.with_timezone(&Utc)))
}

/// Extract all visible posts from a vendor timeline document.
///
/// Walks `result.timeline.instructions`; handles `TimelineAddEntries` and
/// the single `TimelinePinEntry`. Malformed or unknown instructions,
/// entries and card types are skipped silently — partial success is the
/// required behavior.
pub fn extract_posts(document: &Value) -> Vec<NormalizedPost> {
    let mut posts = Vec::new();

    let instructions = document
        .pointer("/result/timeline/instructions")
        .and_then(Value::as_array);

    let Some(instructions) = instructions else {
        log::debug!("timeline document has no instructions list");
        return posts;
    };

    for instruction in instructions {
        match instruction.get("type").and_then(Value::as_str) {
            Some("TimelineAddEntries") => {
                let entries = instruction.get("entries").and_then(Value::as_array);
                for entry in entries.into_iter().flatten() {
                    let entry_id = entry
                        .get("entryId")
                        .and_then(Value::as_str)
                        .unwrap_or_default();

                    // Only genuine post cards; ads, cursors and modules are
                    // keyed differently.
                    if !entry_id.starts_with("tweet-")
                        && !entry_id.starts_with("profile-conversation")
                    {
                        continue;
                    }

                    if let Some(post) = extract_entry_post(entry) {
                        posts.push(post);
                    }
                }
            }
            Some("TimelinePinEntry") => {
                if let Some(entry) = instruction.get("entry") {
                    if let Some(post) = extract_entry_post(entry) {
                        posts.push(post);
                    }
                }
            }
            _ => {}
        }
    }

    posts
}

/// Locate the embedded tweet node inside a timeline entry and normalize it.
fn extract_entry_post(entry: &Value) -> Option<NormalizedPost> {
    let item_content = entry.pointer("/content/itemContent")?;
    if item_content.get("itemType").and_then(Value::as_str) != Some("TimelineTweet") {
        return None;
    }
    let tweet = item_content.pointer("/tweet_results/result")?;
    normalize_tweet(tweet)
}

/// Normalize a single `Tweet` node. Non-Tweet typenames (tombstones, polls
/// without a tweet body, ...) are dropped here.
fn normalize_tweet(tweet: &Value) -> Option<NormalizedPost> {
    if tweet.get("__typename").and_then(Value::as_str) != Some("Tweet") {
        return None;
    }

    let legacy = tweet.get("legacy")?;
    let text = legacy
        .get("full_text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let raw_created_at = legacy.get("created_at").and_then(Value::as_str)?;
    let created_at = normalize_timestamp(raw_created_at)?;

    Some(NormalizedPost {
        id: tweet
            .get("rest_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        is_quote: legacy
            .get("is_quote_status")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        // Prefix heuristic; this endpoint exposes no reliable retweet flag.
        is_retweet: text.starts_with("RT"),
        media: extract_media(legacy),
        created_at,
        original_text: None,
        text,
    })
}

/// Pull the media list out of a tweet's legacy node. `extended_entities`
/// carries the highest-resolution variants, so it wins over `entities`.
fn extract_media(legacy: &Value) -> Vec<MediaItem> {
    let entities = legacy
        .get("extended_entities")
        .or_else(|| legacy.get("entities"));

    let media_items = entities
        .and_then(|e| e.get("media"))
        .and_then(Value::as_array);

    let mut media = Vec::new();
    for item in media_items.into_iter().flatten() {
        let resolved = match item.get("type").and_then(Value::as_str) {
            Some("photo") => item
                .get("media_url_https")
                .and_then(Value::as_str)
                .map(|url| MediaItem {
                    kind: MediaKind::Photo,
                    url: url.to_string(),
                }),
            Some(kind @ ("video" | "animated_gif")) => {
                resolve_video_url(item).map(|url| MediaItem {
                    kind: if kind == "video" {
                        MediaKind::Video
                    } else {
                        MediaKind::AnimatedGif
                    },
                    url,
                })
            }
            _ => None,
        };

        // An item with no resolvable URL is dropped, not the whole post.
        if let Some(resolved) = resolved {
            media.push(resolved);
        }
    }
    media
}

/// Resolve a playable URL for a video or animated gif.
///
/// Order: direct `media_url_https`, then the highest-bitrate variant when
/// its URL is an absolute https link, then a synthesized amplify URL from
/// the media key.
fn resolve_video_url(item: &Value) -> Option<String> {
    let mut url = item
        .get("media_url_https")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let variants = item
        .pointer("/video_info/variants")
        .and_then(Value::as_array);
    if let Some(variants) = variants {
        let best = variants
            .iter()
            .max_by_key(|v| v.get("bitrate").and_then(Value::as_u64).unwrap_or(0));
        if let Some(best) = best {
            let candidate = best.get("url").and_then(Value::as_str).unwrap_or_default();
            if candidate.starts_with("https://") {
                url = candidate.to_string();
            }
        }
    }

    if url.is_empty() {
        let media_key = item
            .get("media_key")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !media_key.is_empty() {
            url = format!(
                "https://video.twimg.com/amplify_video/{}/vid/avc1/1080x1920/video.mp4",
                media_key
            );
        }
    }

    if url.is_empty() {
        None
    } else {
        Some(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tweet_node(id: &str, text: &str, created_at: &str, media: Value) -> Value {
        json!({
            "__typename": "Tweet",
            "rest_id": id,
            "legacy": {
                "full_text": text,
                "is_quote_status": false,
                "created_at": created_at,
                "extended_entities": { "media": media },
            }
        })
    }

    fn timeline_with_entries(entries: Value) -> Value {
        json!({
            "result": { "timeline": { "instructions": [
                { "type": "TimelineAddEntries", "entries": entries }
            ]}}
        })
    }

    fn entry(entry_id: &str, tweet: Value) -> Value {
        json!({
            "entryId": entry_id,
            "content": { "itemContent": {
                "itemType": "TimelineTweet",
                "tweet_results": { "result": tweet }
            }}
        })
    }

    #[test]
    fn extracts_posts_in_document_order() {
        let doc = timeline_with_entries(json!([
            entry("tweet-1", tweet_node("1", "first", "Wed Oct 10 20:19:24 +0000 2018", json!([]))),
            entry("tweet-2", tweet_node("2", "second", "Wed Oct 10 18:00:00 +0000 2018", json!([]))),
        ]));

        let posts = extract_posts(&doc);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].id, "1");
        assert_eq!(posts[1].id, "2");
        assert_eq!(posts[0].created_at, "2018-10-10-20-19-24");
    }

    #[test]
    fn normalizes_timestamps_to_utc() {
        let doc = timeline_with_entries(json!([entry(
            "tweet-1",
            tweet_node("1", "hi", "Wed Oct 10 23:19:24 +0300 2018", json!([])),
        )]));

        let posts = extract_posts(&doc);
        assert_eq!(posts[0].created_at, "2018-10-10-20-19-24");
    }

    #[test]
    fn skips_non_post_entries_and_non_tweet_results() {
        let doc = timeline_with_entries(json!([
            entry("who-to-follow-1", tweet_node("1", "ad", "Wed Oct 10 20:19:24 +0000 2018", json!([]))),
            entry("cursor-bottom-1", json!({})),
            entry("tweet-2", json!({ "__typename": "TweetTombstone" })),
            entry("tweet-3", tweet_node("3", "kept", "Wed Oct 10 20:19:24 +0000 2018", json!([]))),
        ]));

        let posts = extract_posts(&doc);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "3");
    }

    #[test]
    fn includes_pinned_entry() {
        let doc = json!({
            "result": { "timeline": { "instructions": [
                { "type": "TimelinePinEntry", "entry": entry(
                    "tweet-9",
                    tweet_node("9", "pinned", "Wed Oct 10 20:19:24 +0000 2018", json!([])),
                )}
            ]}}
        });

        let posts = extract_posts(&doc);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "9");
    }

    #[test]
    fn empty_or_malformed_document_yields_empty_sequence() {
        assert!(extract_posts(&json!({})).is_empty());
        assert!(extract_posts(&json!({ "result": { "timeline": {} } })).is_empty());
        assert!(extract_posts(&json!({ "result": { "timeline": { "instructions": "oops" } } })).is_empty());
    }

    #[test]
    fn malformed_entry_does_not_abort_the_rest() {
        let doc = timeline_with_entries(json!([
            json!({ "entryId": "tweet-bad" }),
            entry("tweet-1", tweet_node("1", "ok", "garbage timestamp", json!([]))),
            entry("tweet-2", tweet_node("2", "ok", "Wed Oct 10 20:19:24 +0000 2018", json!([]))),
        ]));

        let posts = extract_posts(&doc);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "2");
    }

    #[test]
    fn marks_retweets_by_text_prefix() {
        let doc = timeline_with_entries(json!([
            entry("tweet-1", tweet_node("1", "RT @someone: hello", "Wed Oct 10 20:19:24 +0000 2018", json!([]))),
            entry("tweet-2", tweet_node("2", "plain post", "Wed Oct 10 20:19:24 +0000 2018", json!([]))),
        ]));

        let posts = extract_posts(&doc);
        assert!(posts[0].is_retweet);
        assert!(!posts[1].is_retweet);
    }

    #[test]
    fn photo_urls_are_taken_verbatim() {
        let doc = timeline_with_entries(json!([entry(
            "tweet-1",
            tweet_node("1", "pic", "Wed Oct 10 20:19:24 +0000 2018", json!([
                { "type": "photo", "media_url_https": "https://pbs.twimg.com/media/a.jpg" }
            ])),
        )]));

        let posts = extract_posts(&doc);
        assert_eq!(posts[0].media.len(), 1);
        assert_eq!(posts[0].media[0].kind, MediaKind::Photo);
        assert_eq!(posts[0].media[0].url, "https://pbs.twimg.com/media/a.jpg");
    }

    #[test]
    fn video_prefers_highest_bitrate_https_variant() {
        let doc = timeline_with_entries(json!([entry(
            "tweet-1",
            tweet_node("1", "vid", "Wed Oct 10 20:19:24 +0000 2018", json!([
                {
                    "type": "video",
                    "media_url_https": "https://pbs.twimg.com/thumb.jpg",
                    "video_info": { "variants": [
                        { "bitrate": 256000, "url": "https://video.twimg.com/low.mp4" },
                        { "bitrate": 2176000, "url": "https://video.twimg.com/high.mp4" },
                        { "url": "https://video.twimg.com/playlist.m3u8" }
                    ]}
                }
            ])),
        )]));

        let posts = extract_posts(&doc);
        assert_eq!(posts[0].media[0].url, "https://video.twimg.com/high.mp4");
        assert_eq!(posts[0].media[0].kind, MediaKind::Video);
    }

    #[test]
    fn video_with_relative_variant_falls_back_to_direct_url() {
        let doc = timeline_with_entries(json!([entry(
            "tweet-1",
            tweet_node("1", "vid", "Wed Oct 10 20:19:24 +0000 2018", json!([
                {
                    "type": "video",
                    "media_url_https": "https://pbs.twimg.com/thumb.jpg",
                    "video_info": { "variants": [
                        { "bitrate": 2176000, "url": "/relative/high.mp4" }
                    ]}
                }
            ])),
        )]));

        let posts = extract_posts(&doc);
        assert_eq!(posts[0].media[0].url, "https://pbs.twimg.com/thumb.jpg");
    }

    #[test]
    fn video_without_urls_synthesizes_amplify_url_from_media_key() {
        let doc = timeline_with_entries(json!([entry(
            "tweet-1",
            tweet_node("1", "gif", "Wed Oct 10 20:19:24 +0000 2018", json!([
                { "type": "animated_gif", "media_key": "13_987" }
            ])),
        )]));

        let posts = extract_posts(&doc);
        assert_eq!(
            posts[0].media[0].url,
            "https://video.twimg.com/amplify_video/13_987/vid/avc1/1080x1920/video.mp4"
        );
        assert_eq!(posts[0].media[0].kind, MediaKind::AnimatedGif);
    }

    #[test]
    fn unresolvable_media_is_dropped_but_post_survives() {
        let doc = timeline_with_entries(json!([entry(
            "tweet-1",
            tweet_node("1", "mixed", "Wed Oct 10 20:19:24 +0000 2018", json!([
                { "type": "video" },
                { "type": "photo", "media_url_https": "https://pbs.twimg.com/media/b.jpg" }
            ])),
        )]));

        let posts = extract_posts(&doc);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].media.len(), 1);
        assert_eq!(posts[0].media[0].url, "https://pbs.twimg.com/media/b.jpg");
    }
}
