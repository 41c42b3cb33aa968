use crate::credentials::CredentialPool;
use crate::rate_limiter::RateLimiterRegistry;
use crate::retry::{backoff_delay, RetryConfig};
use gramfeed_core::{ApiConfig, CoreError, InstagramApiError};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// HTTP method for a fetch request. The content API is POST-with-JSON
/// almost everywhere; GET is kept for endpoint-shape drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    Post,
    Get,
}

/// One outbound API call, constructed per request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub endpoint: String,
    pub payload: Value,
    pub method: FetchMethod,
}

impl FetchRequest {
    pub fn post(endpoint: impl Into<String>, payload: Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            payload,
            method: FetchMethod::Post,
        }
    }
}

/// Issues API calls with credential rotation, per-credential rate limiting,
/// and retry with backoff on transient failures.
#[derive(Debug)]
pub struct RequestExecutor {
    http: Client,
    credentials: CredentialPool,
    limiter: Arc<RateLimiterRegistry>,
    host: String,
    retry: RetryConfig,
}

impl RequestExecutor {
    pub fn new(config: &ApiConfig) -> Result<Self, CoreError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            credentials: CredentialPool::new(config.api_keys.clone()),
            limiter: Arc::new(RateLimiterRegistry::new(config.rate_limit.clone())),
            host: config.host.clone(),
            retry: RetryConfig::with_max_attempts(config.max_retries),
        })
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }

    /// Execute a request, rotating credentials across attempts.
    ///
    /// 404 is terminal (the resource does not exist or the endpoint moved);
    /// 429 honors Retry-After and retries with a possibly different key;
    /// 5xx, timeouts and connection errors back off exponentially. Exhausting
    /// retries surfaces the last failure kind.
    pub async fn execute(&self, request: &FetchRequest) -> Result<Value, CoreError> {
        if self.credentials.is_empty() {
            error!("no API credentials configured, refusing to fetch");
            return Err(InstagramApiError::Unconfigured.into());
        }

        let url = format!("https://{}{}", self.host, request.endpoint);
        let mut last_failure = InstagramApiError::Unavailable { status_code: None };

        for attempt in 0..self.retry.max_attempts {
            // A fresh random key per attempt lets a failing key be swapped
            // silently on retry.
            let credential = self.credentials.pick()?;
            self.limiter.acquire(credential).await;

            if attempt > 0 {
                debug!(attempt, endpoint = %request.endpoint, "retrying request");
            }

            let builder = match request.method {
                FetchMethod::Post => self.http.post(&url).json(&request.payload),
                FetchMethod::Get => {
                    let pairs = request
                        .payload
                        .as_object()
                        .map(|map| {
                            map.iter()
                                .map(|(k, v)| {
                                    let value = match v {
                                        Value::String(s) => s.clone(),
                                        other => other.to_string(),
                                    };
                                    (k.clone(), value)
                                })
                                .collect::<Vec<_>>()
                        })
                        .unwrap_or_default();
                    self.http.get(&url).query(&pairs)
                }
            };

            let response = builder
                .header("x-api-key", credential)
                .header("x-api-host", &self.host)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        let body: Value = resp.json().await.map_err(|e| {
                            InstagramApiError::InvalidResponse {
                                details: format!("body was not JSON: {e}"),
                            }
                        })?;
                        return Ok(body);
                    }

                    if status == StatusCode::NOT_FOUND {
                        // Username gone or the endpoint changed shape; a
                        // retry is unlikely to succeed.
                        error!(endpoint = %request.endpoint, "404 from content API");
                        return Err(InstagramApiError::NotFound {
                            resource: request.endpoint.clone(),
                        }
                        .into());
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let hint = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok());
                        let wait = self.retry.rate_limit_wait(hint);
                        warn!(
                            ?wait,
                            attempt,
                            endpoint = %request.endpoint,
                            "rate limited by upstream"
                        );
                        last_failure = InstagramApiError::RateLimited {
                            retry_after: wait.as_secs(),
                        };
                        // No attempt follows, so there is nothing to wait for.
                        if attempt + 1 < self.retry.max_attempts {
                            sleep(wait).await;
                        }
                        continue;
                    }

                    if status.is_server_error() {
                        let delay = backoff_delay(attempt, &self.retry);
                        warn!(
                            status = status.as_u16(),
                            attempt,
                            ?delay,
                            endpoint = %request.endpoint,
                            "server error, backing off"
                        );
                        last_failure = InstagramApiError::Unavailable {
                            status_code: Some(status.as_u16()),
                        };
                        if attempt + 1 < self.retry.max_attempts {
                            sleep(delay).await;
                        }
                        continue;
                    }

                    // Remaining 4xx responses will not improve on retry.
                    error!(status = status.as_u16(), endpoint = %request.endpoint, "request rejected");
                    return Err(InstagramApiError::InvalidResponse {
                        details: format!("unexpected status {status}"),
                    }
                    .into());
                }
                Err(e) => {
                    let delay = backoff_delay(attempt, &self.retry);
                    warn!(
                        error = %e,
                        attempt,
                        ?delay,
                        endpoint = %request.endpoint,
                        "network error, backing off"
                    );
                    last_failure = if e.is_timeout() {
                        InstagramApiError::RequestTimeout
                    } else {
                        InstagramApiError::Unavailable { status_code: None }
                    };
                    if attempt + 1 < self.retry.max_attempts {
                        sleep(delay).await;
                    }
                }
            }
        }

        info!(
            endpoint = %request.endpoint,
            attempts = self.retry.max_attempts,
            "request failed after exhausting retries"
        );
        Err(last_failure.into())
    }
}
