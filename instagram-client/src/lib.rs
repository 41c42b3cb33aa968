//! Instagram ingestion client: rate-limited, credential-rotating request
//! execution, response normalization into [`CanonicalPost`], and paginated
//! multi-account fetching.

pub mod credentials;
pub mod executor;
pub mod normalize;
pub mod page;
pub mod paginate;
pub mod rate_limiter;
pub mod retry;

pub use executor::{FetchMethod, FetchRequest, RequestExecutor};
pub use normalize::Normalizer;
pub use paginate::{AccountFetchResult, Endpoint, FetchOptions, FetchOrchestrator, PageFetcher};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use gramfeed_core::{ApiConfig, BatchSink, CanonicalPost, CoreError, NotificationSink};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// High-level entry point tying the executor, normalizer and orchestrator
/// together behind one configuration.
pub struct InstagramClient {
    orchestrator: FetchOrchestrator,
}

impl InstagramClient {
    pub fn new(config: &ApiConfig) -> Result<Self, CoreError> {
        let executor = RequestExecutor::new(config)?;
        let normalizer = Normalizer::new(config.engagement_precedence);
        Ok(Self::with_orchestrator(FetchOrchestrator::new(
            Arc::new(executor),
            normalizer,
        )))
    }

    /// Build a client around a custom page source.
    pub fn with_orchestrator(orchestrator: FetchOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Fetch an account's feed posts, newest first.
    pub async fn fetch_all_posts(
        &self,
        username: &str,
        options: &FetchOptions,
        sink: Option<&dyn BatchSink>,
    ) -> Result<Vec<CanonicalPost>, CoreError> {
        let Some(username) = clean_username(username) else {
            debug!("blank username, nothing to fetch");
            return Ok(Vec::new());
        };
        self.orchestrator
            .fetch_all(Endpoint::Posts, &username, options, sink)
            .await
    }

    /// Fetch an account's reels. Results are always tagged as reels even
    /// when the reels endpoint falls back to the posts endpoint.
    pub async fn fetch_all_reels(
        &self,
        username: &str,
        options: &FetchOptions,
        sink: Option<&dyn BatchSink>,
    ) -> Result<Vec<CanonicalPost>, CoreError> {
        let Some(username) = clean_username(username) else {
            debug!("blank username, nothing to fetch");
            return Ok(Vec::new());
        };
        self.orchestrator
            .fetch_all(Endpoint::Reels, &username, options, sink)
            .await
    }

    /// Fetch an account's posts and hand any that fall inside the recency
    /// window to `notifier`. The notifier decides formatting and delivery.
    pub async fn fetch_posts_notifying(
        &self,
        username: &str,
        options: &FetchOptions,
        sink: Option<&dyn BatchSink>,
        notifier: &dyn NotificationSink,
        window: Duration,
    ) -> Result<Vec<CanonicalPost>, CoreError> {
        let posts = self.fetch_all_posts(username, options, sink).await?;
        // A window beyond chrono's range means "everything is recent".
        let threshold = ChronoDuration::from_std(window)
            .ok()
            .and_then(|w| Utc::now().checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recent: Vec<CanonicalPost> = posts
            .iter()
            .filter(|p| p.taken_at >= threshold)
            .cloned()
            .collect();
        if !recent.is_empty() {
            notifier.notify_new_posts(username, &recent, window).await?;
        }
        Ok(posts)
    }

    /// Fetch several accounts concurrently, contained per account.
    pub async fn fetch_accounts(
        &self,
        endpoint: Endpoint,
        usernames: &[String],
        options: &FetchOptions,
        sink: Option<&dyn BatchSink>,
    ) -> Result<HashMap<String, AccountFetchResult>, CoreError> {
        let cleaned: Vec<String> = usernames
            .iter()
            .filter_map(|u| clean_username(u))
            .collect();
        self.orchestrator
            .fetch_accounts(endpoint, &cleaned, options, sink)
            .await
    }
}

/// Usernames arrive from config and chat commands with stray whitespace,
/// a leading `@`, or mixed case. Returns `None` when nothing is left.
fn clean_username(raw: &str) -> Option<String> {
    let cleaned = raw.trim().trim_start_matches('@').to_lowercase();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    #[test]
    fn username_cleanup() {
        assert_eq!(clean_username("  @SomeOne "), Some("someone".to_string()));
        assert_eq!(clean_username("already_clean"), Some("already_clean".to_string()));
        assert_eq!(clean_username("   "), None);
        assert_eq!(clean_username("@"), None);
    }

    struct OnePageFetcher {
        taken_at: Vec<i64>,
    }

    #[async_trait]
    impl PageFetcher for OnePageFetcher {
        async fn fetch_page(
            &self,
            _endpoint: Endpoint,
            _username: &str,
            _cursor: Option<&str>,
        ) -> Result<Value, CoreError> {
            let edges: Vec<Value> = self
                .taken_at
                .iter()
                .enumerate()
                .map(|(i, ts)| json!({"node": {"pk": (i + 1).to_string(), "taken_at": ts}}))
                .collect();
            Ok(json!({"result": {"edges": edges}}))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notified: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingNotifier {
        async fn notify_new_posts(
            &self,
            _username: &str,
            posts: &[CanonicalPost],
            _window: Duration,
        ) -> Result<(), CoreError> {
            let mut notified = self.notified.lock().unwrap();
            notified.extend(posts.iter().map(|p| p.post_id.clone()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn notifier_sees_only_posts_inside_the_window() {
        let now = Utc::now().timestamp();
        let fetcher = OnePageFetcher {
            // One fresh post, one from three days ago.
            taken_at: vec![now - 60, now - 3 * 24 * 3600],
        };
        let client = InstagramClient::with_orchestrator(FetchOrchestrator::new(
            Arc::new(fetcher),
            Normalizer::default(),
        ));
        let notifier = RecordingNotifier::default();

        let posts = client
            .fetch_posts_notifying(
                "someone",
                &FetchOptions::default(),
                None,
                &notifier,
                Duration::from_secs(24 * 3600),
            )
            .await
            .unwrap();

        assert_eq!(posts.len(), 2, "fetch returns everything");
        let notified = notifier.notified.lock().unwrap();
        assert_eq!(*notified, vec!["1".to_string()], "only the fresh post is notified");
    }

    #[tokio::test]
    async fn oversized_window_notifies_everything_without_panicking() {
        let now = Utc::now().timestamp();
        let client = InstagramClient::with_orchestrator(FetchOrchestrator::new(
            Arc::new(OnePageFetcher {
                taken_at: vec![now - 60, now - 3 * 24 * 3600],
            }),
            Normalizer::default(),
        ));
        let notifier = RecordingNotifier::default();

        // Exceeds chrono's representable duration range.
        let window = Duration::from_secs(u64::MAX);
        let posts = client
            .fetch_posts_notifying("someone", &FetchOptions::default(), None, &notifier, window)
            .await
            .unwrap();

        assert_eq!(posts.len(), 2);
        let notified = notifier.notified.lock().unwrap();
        assert_eq!(*notified, vec!["1".to_string(), "2".to_string()]);
    }

    #[tokio::test]
    async fn blank_username_is_a_no_op() {
        let client = InstagramClient::with_orchestrator(FetchOrchestrator::new(
            Arc::new(OnePageFetcher { taken_at: vec![] }),
            Normalizer::default(),
        ));
        let posts = client
            .fetch_all_posts("  @ ", &FetchOptions::default(), None)
            .await
            .unwrap();
        assert!(posts.is_empty());
    }
}
