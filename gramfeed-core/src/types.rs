use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized, API-shape-independent representation of one post.
///
/// Produced by the normalizer from a single raw API node; consumed by the
/// persistence collaborator, which upserts by `(account, post_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPost {
    pub post_id: String,
    pub post_code: String,
    pub caption: String,
    /// Never absent: falls back to snowflake derivation or the current time.
    pub taken_at: DateTime<Utc>,
    pub image_url: String,
    pub video_url: String,
    pub is_video: bool,
    pub is_reel: bool,
    pub is_carousel: bool,
    pub carousel_media_count: u32,
    pub like_count: u64,
    pub comment_count: u64,
    pub play_count: u64,
    /// Non-empty only when `is_carousel` holds.
    pub carousel_items: Vec<CarouselItem>,
}

impl CanonicalPost {
    /// `is_video` must hold whenever the post is a reel or carries a video URL,
    /// and `is_carousel` iff more than one media item is attached.
    pub fn invariants_hold(&self) -> bool {
        self.is_video == (self.is_reel || !self.video_url.is_empty())
            && self.is_carousel == (self.carousel_media_count > 1)
    }
}

/// One media entry inside a carousel post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarouselItem {
    pub item_index: u32,
    pub image_url: String,
    pub video_url: String,
    pub is_video: bool,
}

/// Normalized outcome of a single page fetch.
#[derive(Debug, Clone, Default)]
pub struct PageResult {
    pub posts: Vec<CanonicalPost>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
    pub user_id: Option<String>,
}

/// Final output of keyword extraction, associated with the source post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordResult {
    pub keyword: String,
    /// Cosine similarity between the keyword phrase and the full text, 0.0-1.0.
    pub similarity: f32,
}
