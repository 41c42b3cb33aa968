use std::time::Duration;

/// Backoff behavior for transient request failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub base_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds).
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0).
    pub jitter_factor: f64,
    /// Cap on sleeps requested by a 429 Retry-After header (in seconds).
    pub max_rate_limit_wait_secs: u64,
    /// Wait assumed for a 429 response without a Retry-After header.
    pub default_rate_limit_wait_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            max_rate_limit_wait_secs: 120,
            default_rate_limit_wait_secs: 30,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Sleep to honor a server-provided rate-limit hint, capped.
    pub fn rate_limit_wait(&self, retry_after_secs: Option<u64>) -> Duration {
        let secs = retry_after_secs
            .unwrap_or(self.default_rate_limit_wait_secs)
            .min(self.max_rate_limit_wait_secs);
        Duration::from_secs(secs)
    }
}

/// Exponential backoff with jitter to avoid thundering-herd retries.
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let max_delay = Duration::from_millis(config.max_delay_ms);

    let exponential = if attempt == 0 {
        Duration::from_millis(config.base_delay_ms)
    } else {
        let multiplier = config.backoff_multiplier.powi(attempt as i32);
        let delay_ms = (config.base_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay_ms.min(config.max_delay_ms))
    };

    let jitter_range = (exponential.as_millis() as f64 * config.jitter_factor) as u64;
    let jitter = Duration::from_millis(fastrand::u64(0..=jitter_range));

    (exponential + jitter).min(max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let config = RetryConfig {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            ..Default::default()
        };

        assert_eq!(backoff_delay(0, &config), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1, &config), Duration::from_millis(2000));
        assert_eq!(backoff_delay(2, &config), Duration::from_millis(4000));
        assert_eq!(backoff_delay(10, &config), Duration::from_millis(10_000));
    }

    #[test]
    fn jitter_stays_in_range() {
        let config = RetryConfig {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.5,
            ..Default::default()
        };

        for _ in 0..20 {
            let delay = backoff_delay(1, &config);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(3000));
        }
    }

    #[test]
    fn rate_limit_wait_uses_hint_and_cap() {
        let config = RetryConfig::default();
        assert_eq!(config.rate_limit_wait(Some(10)), Duration::from_secs(10));
        assert_eq!(config.rate_limit_wait(None), Duration::from_secs(30));
        assert_eq!(config.rate_limit_wait(Some(900)), Duration::from_secs(120));
    }
}
