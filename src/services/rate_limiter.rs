//! Rate limiting and retry logic for external API calls

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use reqwest::{Client, Response};
use tracing::{debug, warn};

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per second
    pub requests_per_second: u32,
    /// Burst capacity (allows short bursts above the rate)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 2,
            burst_size: 5,
        }
    }
}

/// A rate-limited HTTP client wrapper
pub struct RateLimitedClient {
    client: Client,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    name: String,
}

impl RateLimitedClient {
    pub fn new(name: &str, config: RateLimitConfig) -> Result<Self> {
        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            limiter: Arc::new(RateLimiter::direct(quota)),
            name: name.to_string(),
        })
    }

    /// Client for the TMDB API
    pub fn for_tmdb() -> Result<Self> {
        // TMDB allows ~40 requests per 10 seconds, so ~4/sec with burst of 10
        Self::new(
            "tmdb",
            RateLimitConfig {
                requests_per_second: 4,
                burst_size: 10,
            },
        )
    }

    /// Wait for rate limit and make a GET request with query parameters
    pub async fn get_with_query<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        query: &T,
    ) -> Result<Response> {
        self.wait_for_permit().await;
        debug!(client = %self.name, url = %url, "Making rate-limited GET request");

        self.client
            .get(url)
            .query(query)
            .send()
            .await
            .context("HTTP request failed")
    }

    /// Wait for a rate limit permit
    pub async fn wait_for_permit(&self) {
        self.limiter.until_ready().await;
    }
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        }
    }
}

/// Outcome of one attempt inside [retry_async]
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// Transient failure worth another attempt
    Retry(anyhow::Error),
}

/// Execute an async operation with exponential backoff.
///
/// `Err` from the operation is permanent and returned immediately;
/// [Attempt::Retry] is retried until `max_retries` attempts were made.
pub async fn retry_async<T, Fut, F>(
    operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<Attempt<T>>>,
{
    let mut attempts = 0;
    let mut backoff = config.to_backoff();

    loop {
        attempts += 1;
        let error = match operation().await? {
            Attempt::Done(result) => return Ok(result),
            Attempt::Retry(e) => e,
        };

        if attempts >= config.max_retries {
            warn!(
                operation = %operation_name,
                attempts = attempts,
                error = %error,
                "Operation failed after max retries"
            );
            return Err(error);
        }

        let Some(duration) = backoff.next_backoff() else {
            return Err(error);
        };
        warn!(
            operation = %operation_name,
            attempt = attempts,
            error = %error,
            retry_in_ms = duration.as_millis() as u64,
            "Operation failed, retrying"
        );
        tokio::time::sleep(duration).await;
    }
}

/// Classification of HTTP responses for retry decisions
pub trait ResponseExt {
    fn is_rate_limited(&self) -> bool;

    /// 408, 429 and 5xx responses are worth retrying
    fn is_transient_error(&self) -> bool;
}

impl ResponseExt for Response {
    fn is_rate_limited(&self) -> bool {
        self.status().as_u16() == 429
    }

    fn is_transient_error(&self) -> bool {
        let status = self.status().as_u16();
        status == 429 || status == 408 || (500..600).contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_async(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::Ok(Attempt::Retry(anyhow::anyhow!("503")))
                } else {
                    anyhow::Ok(Attempt::Done(7))
                }
            },
            &fast(),
            "test",
        )
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_async(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<Attempt<()>, _>(anyhow::anyhow!("401"))
            },
            &fast(),
            "test",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_async(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(Attempt::<()>::Retry(anyhow::anyhow!("429")))
            },
            &fast(),
            "test",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
