use crate::error::CoreError;
use crate::types::CanonicalPost;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Incremental persistence boundary, invoked once per processed page.
///
/// Implementations are expected to upsert idempotently by
/// `(account, post_id)` and replace child carousel records as needed.
/// Callers use this to checkpoint progress instead of holding the full
/// result set in memory.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn accept(&self, username: &str, batch: &[CanonicalPost]) -> Result<(), CoreError>;
}

/// Notification boundary: given newly created posts and a recency window,
/// the collaborator decides whether and how to notify. This core never
/// formats or sends anything.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_new_posts(
        &self,
        username: &str,
        posts: &[CanonicalPost],
        window: Duration,
    ) -> Result<(), CoreError>;
}

/// Sink that accumulates batches in memory. Useful in tests and for
/// callers that have no persistence layer wired up.
#[derive(Debug, Default)]
pub struct CollectingSink {
    batches: Mutex<Vec<Vec<CanonicalPost>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<CanonicalPost>> {
        self.batches.lock().expect("sink lock poisoned").clone()
    }
}

#[async_trait]
impl BatchSink for CollectingSink {
    async fn accept(&self, _username: &str, batch: &[CanonicalPost]) -> Result<(), CoreError> {
        self.batches
            .lock()
            .expect("sink lock poisoned")
            .push(batch.to_vec());
        Ok(())
    }
}
