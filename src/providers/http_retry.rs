//! Transport retry for Cloud189 API calls
//!
//! `send_with_retry()` repeats a request on 429, 5xx, connect and timeout
//! failures with jittered exponential backoff, honouring `Retry-After`
//! (seconds). Other 4xx responses are returned as-is.
//!
//! Retries always target the same account; rotation happens in `transfer`.

use reqwest::{Client, Request, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for HTTP retry behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRetryConfig {
    /// Maximum number of retry attempts (default: 3)
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff (default: 1000)
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds (default: 30000)
    pub max_delay_ms: u64,
    /// Backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for HttpRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Transport failures worth repeating; builder and body errors are not.
fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// `Retry-After` in seconds, capped at five minutes.
fn parse_retry_after(response: &Response) -> Option<Duration> {
    let value = response.headers().get("retry-after")?.to_str().ok()?;
    let secs = value.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs.min(300)))
}

fn calculate_delay(attempt: u32, config: &HttpRetryConfig) -> Duration {
    let base = config.base_delay_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_delay_ms as f64);
    // 10-30% jitter
    let jitter = capped * (0.1 + rand::random::<f64>() * 0.2);
    Duration::from_millis((capped + jitter) as u64)
}

/// Send an HTTP request with automatic retry on 429/5xx and transient transport errors.
///
/// The request is cloned before every attempt, so streaming bodies are not
/// supported; every call site here sends form or JSON bodies.
pub async fn send_with_retry(
    client: &Client,
    request: Request,
    config: &HttpRetryConfig,
) -> Result<Response, reqwest::Error> {
    let method = request.method().clone();
    let url = request.url().clone();
    let mut attempt = 0;

    loop {
        let pending = request.try_clone();
        let retries_left = attempt < config.max_retries && pending.is_some();
        let current = match pending {
            Some(req) => req,
            // Unclonable body: single shot
            None => return client.execute(request).await,
        };

        match client.execute(current).await {
            Ok(response) => {
                let status = response.status().as_u16();
                if !is_retryable_status(status) || !retries_left {
                    return Ok(response);
                }
                let delay = parse_retry_after(&response)
                    .unwrap_or_else(|| calculate_delay(attempt, config));
                tracing::debug!(
                    "HTTP {} {} returned {}. Retry {}/{} after {:?}",
                    method, url, status, attempt + 1, config.max_retries, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if !is_retryable_error(&e) || !retries_left {
                    return Err(e);
                }
                let delay = calculate_delay(attempt, config);
                tracing::warn!(
                    "HTTP {} {} failed: {}. Retry {}/{} after {:?}",
                    method, url, e, attempt + 1, config.max_retries, delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_throttling_and_server_errors_retry() {
        for status in [429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status), "{status}");
        }
        for status in [200, 400, 401, 403, 404] {
            assert!(!is_retryable_status(status), "{status}");
        }
    }

    #[test]
    fn test_calculate_delay_grows() {
        let config = HttpRetryConfig {
            base_delay_ms: 100,
            ..HttpRetryConfig::default()
        };
        assert!(calculate_delay(0, &config).as_millis() <= 130);
        assert!(calculate_delay(3, &config).as_millis() >= 800);
        // capped at max_delay_ms plus jitter
        assert!(calculate_delay(20, &config).as_millis() <= 39_000);
    }

    #[test]
    fn test_retry_config_partial_json() {
        let config: HttpRetryConfig = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay_ms, 1000);
    }
}
