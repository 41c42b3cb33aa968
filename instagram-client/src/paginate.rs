use crate::executor::{FetchRequest, RequestExecutor};
use crate::normalize::Normalizer;
use crate::page::{parse_page, RawPage};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt};
use gramfeed_core::{BatchSink, CanonicalPost, CoreError, InstagramApiError, PageResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Posts,
    Reels,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Posts => "/api/instagram/posts",
            Endpoint::Reels => "/api/instagram/user_reels",
        }
    }
}

/// Seam between pagination logic and the network. Implemented by
/// [`RequestExecutor`] in production and by scripted fakes in tests.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(
        &self,
        endpoint: Endpoint,
        username: &str,
        cursor: Option<&str>,
    ) -> Result<Value, CoreError>;

    /// Upper bound for concurrent page fetches, normally the number of
    /// configured credentials so each in-flight fetch can use its own key.
    fn max_concurrency(&self) -> usize {
        1
    }
}

#[async_trait]
impl PageFetcher for RequestExecutor {
    async fn fetch_page(
        &self,
        endpoint: Endpoint,
        username: &str,
        cursor: Option<&str>,
    ) -> Result<Value, CoreError> {
        let payload = json!({
            "username": username,
            "maxId": cursor.unwrap_or(""),
        });

        let result = self
            .execute(&FetchRequest::post(endpoint.path(), payload.clone()))
            .await;

        // The reels endpoint has gone missing before; the posts endpoint
        // returns the same nodes and the normalizer tags reels from there.
        match (endpoint, result) {
            (Endpoint::Reels, Err(CoreError::InstagramApi(e)))
                if !matches!(e, InstagramApiError::Unconfigured) =>
            {
                info!(username, "reels endpoint failed ({e}), trying posts endpoint");
                self.execute(&FetchRequest::post(Endpoint::Posts.path(), payload))
                    .await
            }
            (_, result) => result,
        }
    }

    fn max_concurrency(&self) -> usize {
        self.credential_count().max(1)
    }
}

/// Caller-supplied limits for one account's fetch.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Stop paginating once a post older than this is seen (pages arrive
    /// newest-first).
    pub max_age_hours: Option<u64>,
    /// Hard ceiling on page requests issued.
    pub max_pages: Option<u32>,
    /// Hard ceiling on posts accumulated.
    pub max_posts: Option<usize>,
}

/// Per-fetch bookkeeping, updated atomically as pages complete. The stop
/// flag ceases issuing new page requests; in-flight work drains naturally.
#[derive(Debug, Default)]
struct FetchStats {
    pages_fetched: AtomicUsize,
    posts_accumulated: AtomicUsize,
    stop: AtomicBool,
}

/// Outcome of one account inside a multi-account batch.
#[derive(Debug, Default)]
pub struct AccountFetchResult {
    pub posts: Vec<CanonicalPost>,
    pub error: Option<String>,
}

/// Drives multi-page retrieval per account and fans out across accounts
/// bounded by the fetcher's concurrency budget.
pub struct FetchOrchestrator {
    fetcher: Arc<dyn PageFetcher>,
    normalizer: Normalizer,
}

impl FetchOrchestrator {
    pub fn new(fetcher: Arc<dyn PageFetcher>, normalizer: Normalizer) -> Self {
        Self { fetcher, normalizer }
    }

    /// Normalize one parsed page, skipping malformed records. Posts fetched
    /// through the reels endpoint are always tagged as reels.
    fn normalize_page(&self, raw: RawPage, endpoint: Endpoint, username: &str) -> PageResult {
        let posts = raw
            .nodes
            .iter()
            .filter_map(|node| {
                let Some(mut post) = self.normalizer.normalize(node) else {
                    debug!(username, "skipping malformed record");
                    return None;
                };
                if endpoint == Endpoint::Reels {
                    post.is_reel = true;
                    post.is_video = true;
                }
                Some(post)
            })
            .collect();
        PageResult {
            posts,
            end_cursor: raw.end_cursor,
            has_next_page: raw.has_next_page,
            user_id: raw.user_id,
        }
    }

    /// Fetch every page for one account, invoking `sink` once per processed
    /// page so callers can checkpoint without holding the full result set.
    ///
    /// Stop conditions, checked after every page: page ceiling, post
    /// ceiling, a post older than the age cutoff, or upstream reporting no
    /// further pages. A page that fails terminally is logged and treated as
    /// "no more pages"; posts accumulated so far are still returned. Only
    /// credential misconfiguration aborts with an error.
    pub async fn fetch_all(
        &self,
        endpoint: Endpoint,
        username: &str,
        options: &FetchOptions,
        sink: Option<&dyn BatchSink>,
    ) -> Result<Vec<CanonicalPost>, CoreError> {
        let cutoff = options
            .max_age_hours
            .map(|hours| Utc::now() - Duration::hours(hours as i64));
        if let Some(cutoff) = cutoff {
            info!(username, %cutoff, "fetching posts newer than cutoff");
        } else {
            debug!(username, "fetching all available posts");
        }

        let stats = FetchStats::default();
        let mut all_posts = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            if stats.stop.load(Ordering::Acquire) {
                break;
            }
            let pages_so_far = stats.pages_fetched.load(Ordering::Acquire);
            if let Some(max_pages) = options.max_pages {
                if pages_so_far >= max_pages as usize {
                    break;
                }
            }

            let body = match self
                .fetcher
                .fetch_page(endpoint, username, cursor.as_deref())
                .await
            {
                Ok(body) => body,
                Err(CoreError::InstagramApi(InstagramApiError::Unconfigured)) => {
                    return Err(InstagramApiError::Unconfigured.into());
                }
                Err(e) => {
                    // One failed page halts pagination without corrupting
                    // what was already accumulated.
                    warn!(username, page = pages_so_far + 1, "page fetch failed: {e}");
                    break;
                }
            };
            stats.pages_fetched.fetch_add(1, Ordering::AcqRel);

            let page = match parse_page(&body) {
                Ok(raw) => self.normalize_page(raw, endpoint, username),
                Err(e) => {
                    warn!(username, "unparseable page: {e}");
                    break;
                }
            };

            let mut batch = Vec::new();
            for post in page.posts {
                match cutoff {
                    // Cutoff decisions use only this page's own posts; the
                    // stop flag is what halts further fetches.
                    Some(cutoff) if post.taken_at < cutoff => {
                        info!(username, post_id = %post.post_id, "reached posts older than cutoff");
                        stats.stop.store(true, Ordering::Release);
                    }
                    _ => batch.push(post),
                }
            }

            if let Some(max_posts) = options.max_posts {
                let room = max_posts.saturating_sub(stats.posts_accumulated.load(Ordering::Acquire));
                if batch.len() >= room {
                    batch.truncate(room);
                    stats.stop.store(true, Ordering::Release);
                }
            }
            stats
                .posts_accumulated
                .fetch_add(batch.len(), Ordering::AcqRel);

            if !batch.is_empty() {
                if let Some(sink) = sink {
                    sink.accept(username, &batch).await?;
                }
                all_posts.extend(batch);
            }

            match (page.has_next_page, page.end_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }

        info!(
            username,
            posts = all_posts.len(),
            pages = stats.pages_fetched.load(Ordering::Acquire),
            "fetch complete"
        );
        Ok(all_posts)
    }

    /// Fetch many accounts concurrently, bounded by the fetcher's
    /// concurrency budget. Per-account failures are contained and reported;
    /// only total credential misconfiguration aborts the batch.
    pub async fn fetch_accounts(
        &self,
        endpoint: Endpoint,
        usernames: &[String],
        options: &FetchOptions,
        sink: Option<&dyn BatchSink>,
    ) -> Result<HashMap<String, AccountFetchResult>, CoreError> {
        let workers = self.fetcher.max_concurrency().max(1);
        info!(
            accounts = usernames.len(),
            workers, "fetching accounts concurrently"
        );

        let outcomes: Vec<(String, Result<Vec<CanonicalPost>, CoreError>)> =
            stream::iter(usernames.iter().cloned())
                .map(|username| async move {
                    let result = self.fetch_all(endpoint, &username, options, sink).await;
                    (username, result)
                })
                .buffer_unordered(workers)
                .collect()
                .await;

        let mut results = HashMap::new();
        for (username, outcome) in outcomes {
            match outcome {
                Ok(posts) => {
                    results.insert(
                        username,
                        AccountFetchResult {
                            posts,
                            error: None,
                        },
                    );
                }
                Err(CoreError::InstagramApi(InstagramApiError::Unconfigured)) => {
                    return Err(InstagramApiError::Unconfigured.into());
                }
                Err(e) => {
                    error!(username, "account fetch failed: {e}");
                    results.insert(
                        username,
                        AccountFetchResult {
                            posts: Vec::new(),
                            error: Some(e.to_string()),
                        },
                    );
                }
            }
        }
        Ok(results)
    }
}
