//! Shared upstream HTTP client with bounded retries.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};

use crate::errors::AppError;

const USER_AGENT: &str = concat!("delta-relay/", env!("CARGO_PKG_VERSION"));

/// Retry budget for one upstream request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Backoff after the first transient failure; doubles each attempt
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Wait used when a 429 response carries no usable `Retry-After`
    pub rate_limit_fallback: Duration,
    /// Upper bound on any single wait, `Retry-After` included
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            rate_limit_fallback: Duration::from_secs(60),
            max_wait: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Shrink the waits so every retry fits inside `deadline`.
    ///
    /// Each of the `max_attempts - 1` waits gets an equal share of the
    /// deadline, leaving the last share for the requests themselves.
    pub fn within(mut self, deadline: Duration) -> Self {
        let share = deadline / self.max_attempts.max(1);
        self.max_wait = self.max_wait.min(share);
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// HTTP client used by every adapter.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(retry: RetryPolicy) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, retry })
    }

    /// Send the request produced by `build`, retrying rate limits and transient
    /// failures until the retry budget runs out.
    ///
    /// `build` is called once per attempt. Only successful responses are returned.
    pub async fn send<F>(&self, build: F) -> Result<Response, AppError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match build(&self.client).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    AppError::RateLimited {
                        retry_after: retry_after(response.headers())
                            .unwrap_or(self.retry.rate_limit_fallback),
                    }
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    AppError::upstream(Some(status), compact_body(&body))
                }
                Err(e) => AppError::from(e),
            };

            if !error.is_transient() || attempt >= self.retry.max_attempts {
                return Err(error);
            }

            let wait = match &error {
                AppError::RateLimited { retry_after } => *retry_after,
                _ => self.retry.backoff(attempt),
            }
            .min(self.retry.max_wait);

            tracing::warn!(
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %error,
                "Upstream request failed, retrying"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Send with retries and decode a JSON body.
    pub async fn get_json<T, F>(&self, build: F) -> Result<T, AppError>
    where
        T: serde::de::DeserializeOwned,
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let response = self.send(build).await?;
        Ok(response.json::<T>().await?)
    }
}

/// `Retry-After` in delta-seconds.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn compact_body(body: &str) -> String {
    body.trim().chars().take(180).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_stub;
    use axum::{http::StatusCode as AxumStatus, response::IntoResponse, routing::get, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            rate_limit_fallback: Duration::from_millis(5),
            max_wait: Duration::from_millis(5),
        }
    }

    /// Stub that fails `failures` times with `status` before answering 200.
    async fn flaky_stub(status: u16, failures: u32, hits: Arc<AtomicU32>) -> String {
        let router = Router::new().route(
            "/",
            get(move || {
                let hits = hits.clone();
                async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst);
                    if n < failures {
                        let mut response = AxumStatus::from_u16(status)
                            .unwrap()
                            .into_response();
                        if status == 429 {
                            response
                                .headers_mut()
                                .insert("retry-after", "0".parse().unwrap());
                        }
                        response
                    } else {
                        (AxumStatus::OK, "{\"ok\":true}").into_response()
                    }
                }
            }),
        );
        spawn_stub(router).await
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_after_delay() {
        let hits = Arc::new(AtomicU32::new(0));
        let base = flaky_stub(429, 2, hits.clone()).await;
        let client = HttpClient::new(fast_policy(4)).unwrap();

        let body: serde_json::Value = client.get_json(|c| c.get(&base)).await.unwrap();

        assert_eq!(body["ok"], true);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_without_retry_after_fits_fetch_deadline() {
        let hits = Arc::new(AtomicU32::new(0));
        let router = Router::new().route(
            "/",
            get({
                let hits = hits.clone();
                move || {
                    let hits = hits.clone();
                    async move {
                        if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                            AxumStatus::TOO_MANY_REQUESTS.into_response()
                        } else {
                            (AxumStatus::OK, "{\"ok\":true}").into_response()
                        }
                    }
                }
            }),
        );
        let base = spawn_stub(router).await;

        // Default ratios: 60s fallback against a 30s fetch timeout, scaled down.
        let deadline = Duration::from_millis(400);
        let policy = RetryPolicy::default().within(deadline);
        assert_eq!(policy.max_wait, Duration::from_millis(100));
        let client = HttpClient::new(policy).unwrap();

        let fetch = client.get_json::<serde_json::Value, _>(|c| c.get(&base));
        let body = tokio::time::timeout(deadline, fetch)
            .await
            .expect("retry finished before the deadline")
            .unwrap();

        assert_eq!(body["ok"], true);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_within_keeps_shorter_waits() {
        let policy = RetryPolicy::default().within(Duration::from_secs(30));
        assert_eq!(policy.max_wait, Duration::from_millis(7500));
        assert_eq!(policy.rate_limit_fallback, Duration::from_secs(60));

        let policy = fast_policy(4).within(Duration::from_secs(30));
        assert_eq!(policy.max_wait, Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_budget() {
        let hits = Arc::new(AtomicU32::new(0));
        let base = flaky_stub(503, 10, hits.clone()).await;
        let client = HttpClient::new(fast_policy(3)).unwrap();

        let result = client.send(|c| c.get(&base)).await;

        assert!(matches!(
            result,
            Err(AppError::Upstream {
                status: Some(503),
                ..
            })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let base = flaky_stub(401, 10, hits.clone()).await;
        let client = HttpClient::new(fast_policy(4)).unwrap();

        let result = client.send(|c| c.get(&base)).await;

        assert!(matches!(
            result,
            Err(AppError::Upstream {
                status: Some(401),
                ..
            })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "17".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(17)));

        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after(&headers), None);
    }
}
