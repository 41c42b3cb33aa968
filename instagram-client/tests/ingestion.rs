use async_trait::async_trait;
use chrono::Utc;
use gramfeed_core::{CollectingSink, CoreError, EngagementPrecedence};
use instagram_client::{
    Endpoint, FetchOptions, FetchOrchestrator, InstagramClient, Normalizer, PageFetcher,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Serves a fixed two-page feed per account, in the GraphQL edge shape for
/// page one and the flat list shape for page two.
struct MixedShapeFetcher {
    now: i64,
}

#[async_trait]
impl PageFetcher for MixedShapeFetcher {
    async fn fetch_page(
        &self,
        _endpoint: Endpoint,
        _username: &str,
        cursor: Option<&str>,
    ) -> Result<Value, CoreError> {
        match cursor {
            None => Ok(json!({
                "result": {
                    "id": "9001",
                    "edges": [
                        {"node": {
                            "pk": "1",
                            "code": "AAA",
                            "caption": {"text": "first post"},
                            "taken_at": self.now - 60,
                            "like_count": 4,
                            "image_versions2": {"candidates": [{"url": "https://cdn/1.jpg"}]}
                        }},
                        {"node": {
                            "pk": "2",
                            "product_type": "clips",
                            "taken_at": self.now - 120,
                            "media": {"play_count": 900}
                        }}
                    ],
                    "page_info": {"has_next_page": true, "end_cursor": "page-2"}
                }
            })),
            Some("page-2") => Ok(json!({
                "result": {
                    "posts": [
                        {
                            "pk": "3",
                            "taken_at": self.now - 180,
                            "carousel_media_count": 2,
                            "carousel_media": [
                                {"image_versions2": {"candidates": [{"url": "https://cdn/3a.jpg"}]}},
                                {"video_versions": [{"url": "https://cdn/3b.mp4"}]}
                            ]
                        }
                    ],
                    "has_more": false
                }
            })),
            Some(other) => panic!("unexpected cursor {other}"),
        }
    }

    fn max_concurrency(&self) -> usize {
        2
    }
}

fn client(now: i64) -> InstagramClient {
    InstagramClient::with_orchestrator(FetchOrchestrator::new(
        Arc::new(MixedShapeFetcher { now }),
        Normalizer::new(EngagementPrecedence::Media),
    ))
}

#[tokio::test]
async fn full_pipeline_normalizes_both_page_shapes() {
    let now = Utc::now().timestamp();
    let sink = CollectingSink::new();

    let posts = client(now)
        .fetch_all_posts("@SomeOne", &FetchOptions::default(), Some(&sink))
        .await
        .unwrap();

    assert_eq!(posts.len(), 3);
    assert_eq!(posts[0].caption, "first post");
    assert_eq!(posts[0].image_url, "https://cdn/1.jpg");

    // The reel carries media-side play counts and is video without a URL.
    assert!(posts[1].is_reel && posts[1].is_video);
    assert_eq!(posts[1].play_count, 900);

    // The carousel exposes its per-item media.
    assert!(posts[2].is_carousel);
    assert_eq!(posts[2].carousel_items.len(), 2);
    assert!(posts[2].carousel_items[1].is_video);

    for post in &posts {
        assert!(post.invariants_hold(), "{post:?}");
    }

    // One checkpoint batch per page.
    let batches = sink.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(batches[1].len(), 1);
}

#[tokio::test]
async fn multi_account_fetch_reports_every_account() {
    let now = Utc::now().timestamp();
    let usernames = vec!["alpha".to_string(), "@Beta ".to_string()];

    let results = client(now)
        .fetch_accounts(Endpoint::Posts, &usernames, &FetchOptions::default(), None)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results["alpha"].posts.len(), 3);
    assert_eq!(results["beta"].posts.len(), 3, "usernames are cleaned first");
    assert!(results.values().all(|r| r.error.is_none()));
}
