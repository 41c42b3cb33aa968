use gramfeed_core::RateLimitConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Extra wait added when sleeping out a full window, so the oldest call has
/// definitely left the window when we re-check.
const WINDOW_EXIT_BUFFER: Duration = Duration::from_millis(100);

/// Sliding-window call ledger for one credential.
///
/// Tracks the instants of recent calls; `acquire` blocks until a slot is
/// available and records the call. The trim-check-append sequence runs as a
/// single critical section so concurrent callers cannot oversubscribe the
/// window.
#[derive(Debug)]
pub struct CredentialLimiter {
    calls: Mutex<VecDeque<Instant>>,
    window: Duration,
    max_calls: usize,
    min_spacing: Duration,
}

impl CredentialLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let min_spacing = if config.calls_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / config.calls_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            calls: Mutex::new(VecDeque::new()),
            window: Duration::from_secs(config.window_secs),
            max_calls: config.max_calls_per_window as usize,
            min_spacing,
        }
    }

    /// Block until a call slot is available, then record the call.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();

                while let Some(oldest) = calls.front() {
                    if now.duration_since(*oldest) >= self.window {
                        calls.pop_front();
                    } else {
                        break;
                    }
                }

                if calls.len() >= self.max_calls {
                    // Sleep until the oldest call exits the window.
                    let oldest = *calls.front().expect("non-empty at capacity");
                    Some(self.window - now.duration_since(oldest) + WINDOW_EXIT_BUFFER)
                } else {
                    // Smooth bursts with a minimum inter-call spacing,
                    // independent of the window check.
                    let since_last = calls.back().map(|last| now.duration_since(*last));
                    match since_last {
                        Some(elapsed) if elapsed < self.min_spacing => {
                            Some(self.min_spacing - elapsed)
                        }
                        _ => {
                            calls.push_back(now);
                            None
                        }
                    }
                }
            };

            match wait {
                None => return,
                Some(delay) => {
                    tracing::debug!(?delay, "rate limit reached, waiting");
                    sleep(delay).await;
                }
            }
        }
    }

    /// Calls currently recorded inside the trailing window.
    pub async fn calls_in_window(&self) -> usize {
        let mut calls = self.calls.lock().await;
        let now = Instant::now();
        while let Some(oldest) = calls.front() {
            if now.duration_since(*oldest) >= self.window {
                calls.pop_front();
            } else {
                break;
            }
        }
        calls.len()
    }
}

/// One ledger per credential, each guarded by its own lock so ledgers for
/// different credentials proceed in parallel. Injected into the request
/// executor rather than reached through globals.
#[derive(Debug)]
pub struct RateLimiterRegistry {
    config: RateLimitConfig,
    limiters: std::sync::Mutex<HashMap<String, Arc<CredentialLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            limiters: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn limiter_for(&self, credential: &str) -> Arc<CredentialLimiter> {
        let mut limiters = self.limiters.lock().expect("limiter registry poisoned");
        limiters
            .entry(credential.to_string())
            .or_insert_with(|| Arc::new(CredentialLimiter::new(&self.config)))
            .clone()
    }

    /// Block until the given credential may make another call.
    pub async fn acquire(&self, credential: &str) {
        self.limiter_for(credential).acquire().await;
    }
}
