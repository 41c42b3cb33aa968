use crate::error::{ConfigError, CoreError};
use serde::Deserialize;
use std::path::PathBuf;

/// Sliding-window admission limits applied per API credential.
///
/// The upstream provider has shifted these over time, so they are
/// configuration rather than constants.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Trailing window the per-credential call ledger covers, in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Maximum calls allowed inside one window.
    #[serde(default = "default_max_calls")]
    pub max_calls_per_window: u32,
    /// Minimum inter-call spacing is `1 / calls_per_second`.
    #[serde(default = "default_calls_per_second")]
    pub calls_per_second: f64,
}

fn default_window_secs() -> u64 {
    60
}
fn default_max_calls() -> u32 {
    120
}
fn default_calls_per_second() -> f64 {
    2.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_calls_per_window: default_max_calls(),
            calls_per_second: default_calls_per_second(),
        }
    }
}

/// Which merged view wins for engagement counters when a node carries a
/// nested `media` object. Reels endpoints put authoritative play counts in
/// the media object, but older response formats did the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngagementPrecedence {
    #[default]
    Media,
    Node,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Hostname of the third-party content API.
    pub host: String,
    /// Credential pool; one is chosen at random per request attempt.
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub engagement_precedence: EngagementPrecedence,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

impl ApiConfig {
    pub fn new(host: impl Into<String>, api_keys: Vec<String>) -> Self {
        Self {
            host: host.into(),
            api_keys,
            request_timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            rate_limit: RateLimitConfig::default(),
            engagement_precedence: EngagementPrecedence::default(),
        }
    }

    /// Read host and keys from `GRAMFEED_API_HOST` / `GRAMFEED_API_KEYS`
    /// (comma-separated), with defaults for everything else.
    pub fn from_env() -> Result<Self, CoreError> {
        let host = std::env::var("GRAMFEED_API_HOST").map_err(|_| {
            ConfigError::MissingEnvironmentVariable {
                var_name: "GRAMFEED_API_HOST".to_string(),
            }
        })?;
        let keys = std::env::var("GRAMFEED_API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Ok(Self::new(host, keys))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(raw).map_err(ConfigError::from)?;
        if config.host.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "host".to_string(),
            }
            .into());
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeywordConfig {
    /// Directory holding `model.onnx` and `tokenizer.json`.
    pub model_dir: PathBuf,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    /// MMR trade-off: 1.0 is pure relevance, 0.0 is pure diversity.
    #[serde(default = "default_diversity_lambda")]
    pub diversity_lambda: f32,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

fn default_top_k() -> usize {
    5
}
fn default_min_similarity() -> f32 {
    0.30
}
fn default_diversity_lambda() -> f32 {
    0.7
}
fn default_max_candidates() -> usize {
    64
}

impl KeywordConfig {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            diversity_lambda: default_diversity_lambda(),
            max_candidates: default_max_candidates(),
        }
    }
}
