use chrono::{DateTime, Duration, TimeZone, Utc};
use gramfeed_core::{CanonicalPost, CarouselItem, EngagementPrecedence};
use serde_json::{Map, Value};

/// Unix seconds for 2010-01-01T00:00:00Z, when the platform launched.
/// Timestamps before this are garbage regardless of where they came from.
const PLATFORM_EPOCH_SECS: i64 = 1_262_304_000;

/// Upstream occasionally reports short-form video timestamps absurdly far in
/// the future; accept up to a year of clock skew before falling back.
const MAX_FUTURE_DAYS: i64 = 365;

/// Fallback sources (caption timestamp, post-id derivation) get a tighter
/// bound since they are only trusted when clearly in the past.
const FALLBACK_FUTURE_DAYS: i64 = 1;

/// Classification tag the API uses for short-form video content.
const REEL_PRODUCT_TYPE: &str = "clips";

/// Converts one raw API node into a [`CanonicalPost`].
///
/// Pure: no I/O, never panics. A malformed node yields `None` and is simply
/// skipped by the caller; one bad record must not abort a whole page.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    precedence: EngagementPrecedence,
}

/// The node and its optional nested `media` sub-object, plus the two merged
/// views field resolution works against. Caption and timestamps trust the
/// node first; engagement counters trust whichever side the configured
/// precedence names, because reels endpoints put authoritative play counts
/// in the media object.
struct NodeViews<'a> {
    node: &'a Value,
    media: Option<&'a Value>,
    node_first: Value,
    engagement: Value,
}

impl<'a> NodeViews<'a> {
    fn build(node: &'a Value, precedence: EngagementPrecedence) -> Self {
        let media = node
            .get("media")
            .filter(|m| m.is_object());

        let node_first = merge_objects(media.unwrap_or(&Value::Null), node);
        let engagement = match (media, precedence) {
            (Some(media), EngagementPrecedence::Media) => merge_objects(node, media),
            _ => node_first.clone(),
        };

        Self {
            node,
            media,
            node_first,
            engagement,
        }
    }

    /// node → media → merged, the fixed priority order for most fields.
    fn in_priority_order(&self) -> [&Value; 3] {
        [self.node, self.media.unwrap_or(&Value::Null), &self.node_first]
    }
}

/// Overlay `top` onto `base`; `top` wins on conflicting keys.
fn merge_objects(base: &Value, top: &Value) -> Value {
    let mut merged = Map::new();
    if let Some(map) = base.as_object() {
        merged.extend(map.clone());
    }
    if let Some(map) = top.as_object() {
        merged.extend(map.clone());
    }
    Value::Object(merged)
}

impl Normalizer {
    pub fn new(precedence: EngagementPrecedence) -> Self {
        Self { precedence }
    }

    pub fn normalize(&self, node: &Value) -> Option<CanonicalPost> {
        self.normalize_at(node, Utc::now())
    }

    /// Like [`normalize`](Self::normalize) with an injected clock, so
    /// timestamp plausibility windows are testable.
    pub fn normalize_at(&self, node: &Value, now: DateTime<Utc>) -> Option<CanonicalPost> {
        if !node.is_object() {
            return None;
        }
        let views = NodeViews::build(node, self.precedence);

        let post_id = extract_post_id(&views)?;
        let caption = extract_caption(&views);
        let taken_at = resolve_taken_at(&views, &post_id, now);

        let is_reel = views
            .in_priority_order()
            .iter()
            .any(|v| v.get("product_type").and_then(Value::as_str) == Some(REEL_PRODUCT_TYPE));

        let video_url = first_list_url(&views, "video_versions", None);
        // Searching node → media → merged already picks up the first image
        // candidate, which doubles as the video thumbnail.
        let image_url = first_list_url(&views, "image_versions2", Some("candidates"));

        let like_count = count_field(&views.engagement, "like_count");
        let comment_count = count_field(&views.engagement, "comment_count");
        // Some API variants renamed play_count to view_count.
        let play_count = match views.engagement.get("play_count") {
            Some(v) if !v.is_null() => coerce_count(v),
            _ => count_field(&views.engagement, "view_count"),
        };

        let post_code = views
            .node_first
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let carousel_media_count = count_field(&views.node_first, "carousel_media_count") as u32;
        let is_carousel = carousel_media_count > 1;
        let carousel_items = if is_carousel {
            extract_carousel_items(&views.node_first)
        } else {
            Vec::new()
        };

        Some(CanonicalPost {
            post_id,
            post_code,
            caption,
            taken_at,
            is_video: is_reel || !video_url.is_empty(),
            image_url,
            video_url,
            is_reel,
            is_carousel,
            carousel_media_count,
            like_count,
            comment_count,
            play_count,
            carousel_items,
        })
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(EngagementPrecedence::default())
    }
}

/// `pk` first, then `id`; a node with neither is unparseable.
fn extract_post_id(views: &NodeViews<'_>) -> Option<String> {
    for key in ["pk", "id"] {
        match views.node_first.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Caption arrives as an object with a `text` subfield or as a bare string.
fn extract_caption(views: &NodeViews<'_>) -> String {
    for source in views.in_priority_order() {
        match source.get("caption") {
            Some(Value::Object(obj)) => {
                if let Some(text) = obj.get("text").and_then(Value::as_str) {
                    return text.to_string();
                }
            }
            Some(Value::String(s)) => return s.clone(),
            _ => {}
        }
    }
    String::new()
}

/// Ordered extractor chain for the post timestamp. Upstream timestamps for
/// short-form video are unreliable (absent, zero, or implausibly far in the
/// future), so a resolved-but-implausible primary value falls through the
/// same chain as a missing one:
/// caption `created_at` → snowflake derivation → current time.
fn resolve_taken_at(views: &NodeViews<'_>, post_id: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let media = views.media.unwrap_or(&Value::Null);
    let sources: [(&Value, &str); 6] = [
        (views.node, "taken_at"),
        (media, "taken_at"),
        (&views.node_first, "taken_at"),
        (&views.node_first, "taken_at_timestamp"),
        (views.node, "taken_at_timestamp"),
        (media, "taken_at_timestamp"),
    ];

    let primary = sources
        .iter()
        .find_map(|(source, key)| source.get(*key).filter(|v| !v.is_null()));

    if let Some(raw) = primary {
        if let Some(ts) = parse_timestamp(raw) {
            if plausible(ts, now, MAX_FUTURE_DAYS) {
                return ts;
            }
            tracing::warn!(post_id, %ts, "implausible taken_at, using fallback chain");
        }
    }

    if let Some(ts) = caption_created_at(views) {
        if plausible(ts, now, FALLBACK_FUTURE_DAYS) {
            return ts;
        }
    }

    if let Some(ts) = timestamp_from_post_id(post_id, now) {
        return ts;
    }

    tracing::warn!(post_id, "no usable timestamp, falling back to current time");
    now
}

fn caption_created_at(views: &NodeViews<'_>) -> Option<DateTime<Utc>> {
    let caption = views
        .node
        .get("caption")
        .filter(|c| c.is_object())
        .or_else(|| views.node_first.get("caption").filter(|c| c.is_object()))?;
    parse_timestamp(caption.get("created_at")?)
}

/// Accept a unix-seconds number, a numeric string, or an ISO-8601 string.
fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::Number(n) => {
            let secs = n.as_f64()?;
            if secs == 0.0 {
                return None;
            }
            Utc.timestamp_opt(secs as i64, 0).single()
        }
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            let secs: f64 = s.parse().ok()?;
            if secs == 0.0 {
                return None;
            }
            Utc.timestamp_opt(secs as i64, 0).single()
        }
        _ => None,
    }
}

fn plausible(ts: DateTime<Utc>, now: DateTime<Utc>, max_future_days: i64) -> bool {
    ts >= platform_epoch() && ts <= now + Duration::days(max_future_days)
}

fn platform_epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(PLATFORM_EPOCH_SECS, 0).single().expect("valid epoch")
}

/// Derive a creation time from a snowflake-style post ID: the top 42 bits
/// are milliseconds since the platform epoch, the low 22 bits are machine id
/// and sequence counter.
pub fn timestamp_from_post_id(post_id: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let id: u64 = post_id.parse().ok()?;
    let offset_ms = (id >> 22) as i64;
    let ts = Utc
        .timestamp_millis_opt(offset_ms + PLATFORM_EPOCH_SECS * 1000)
        .single()?;
    if plausible(ts, now, FALLBACK_FUTURE_DAYS) {
        Some(ts)
    } else {
        None
    }
}

/// Walk node → media → merged looking for the first non-empty URL in a
/// media-variant list. `video_versions` is a bare list; `image_versions2`
/// nests the list under `candidates`.
fn first_list_url(views: &NodeViews<'_>, field: &str, nested: Option<&str>) -> String {
    for source in views.in_priority_order() {
        let container = match nested {
            Some(key) => source.get(field).and_then(|v| v.get(key)),
            None => source.get(field),
        };
        if let Some(list) = container.and_then(Value::as_array) {
            for entry in list {
                if let Some(url) = entry.get("url").and_then(Value::as_str) {
                    if !url.is_empty() {
                        return url.to_string();
                    }
                }
            }
        }
    }
    String::new()
}

fn count_field(source: &Value, field: &str) -> u64 {
    source.get(field).map(coerce_count).unwrap_or(0)
}

/// Coerce an engagement counter to a non-negative integer; null, negative
/// and non-numeric values all collapse to 0.
fn coerce_count(value: &Value) -> u64 {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u
            } else if let Some(f) = n.as_f64() {
                if f > 0.0 {
                    f as u64
                } else {
                    0
                }
            } else {
                0
            }
        }
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn extract_carousel_items(merged: &Value) -> Vec<CarouselItem> {
    let Some(list) = merged.get("carousel_media").and_then(Value::as_array) else {
        return Vec::new();
    };

    list.iter()
        .enumerate()
        .map(|(index, item)| {
            let video_url = item
                .get("video_versions")
                .and_then(Value::as_array)
                .and_then(|l| l.first())
                .and_then(|v| v.get("url"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let image_url = item
                .get("image_versions2")
                .and_then(|v| v.get("candidates"))
                .and_then(Value::as_array)
                .and_then(|l| l.first())
                .and_then(|v| v.get("url"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            CarouselItem {
                item_index: index as u32,
                is_video: !video_url.is_empty(),
                image_url,
                video_url,
            }
        })
        .collect()
}
