//! Per-domain request spacing and bounded retry for upstream sources.
//!
//! Public open-data portals publish rate limits in prose, not headers, so
//! every HTTP adapter goes through a [`ThrottledFetcher`] that keeps an
//! explicit gap between requests to the same host. Page fetches are then
//! wrapped in [`fetch_with_retry`], which retries transient failures a fixed
//! number of times.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use wayfinder_core::throttle::{RetryPolicy, ThrottleConfig, ThrottledFetcher, fetch_with_retry};
//! # use wayfinder_core::traits::Fetcher;
//! # #[derive(Clone)] struct Http;
//! # impl Fetcher for Http {
//! #     async fn fetch(&self, _: &str) -> Result<String, wayfinder_core::AppError> { todo!() }
//! # }
//!
//! # async fn run() -> Result<(), wayfinder_core::AppError> {
//! let fetcher = ThrottledFetcher::new(Http, ThrottleConfig::new(Duration::from_millis(500)));
//! let body = fetch_with_retry(&fetcher, "https://data.gov.au/api/3/action/datastore_search", &RetryPolicy::default()).await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use url::Url;

use crate::error::AppError;
use crate::traits::Fetcher;

/// Minimum gap between consecutive requests to one host.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub delay: Duration,
    /// Extra random wait in `[0, jitter)`. Zero disables it.
    pub jitter: Duration,
}

impl ThrottleConfig {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    fn next_gap(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        self.delay + Duration::from_millis(jitter_ms(self.jitter.as_millis() as u64))
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

/// A [`Fetcher`] that spaces out requests per host.
///
/// Clones share the same timing table, so every adapter built from one
/// throttled fetcher respects the same per-host gap.
#[derive(Clone)]
pub struct ThrottledFetcher<F> {
    inner: F,
    config: ThrottleConfig,
    /// Earliest instant the next request to each host may start.
    next_slot: Arc<Mutex<HashMap<String, Instant>>>,
}

impl<F: Fetcher> ThrottledFetcher<F> {
    pub fn new(inner: F, config: ThrottleConfig) -> Self {
        Self {
            inner,
            config,
            next_slot: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// `scheme://host:port`, or `None` for unparseable URLs.
    fn host_key(url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let host = url.host_str()?;
        let port = url
            .port_or_known_default()
            .map(|p| format!(":{p}"))
            .unwrap_or_default();
        Some(format!("{}://{}{}", url.scheme(), host, port))
    }

    /// Reserve the next slot for `host` and sleep until it opens.
    ///
    /// The reservation happens under the lock, the sleep does not, so
    /// concurrent callers for the same host queue up one gap apart while
    /// other hosts are unaffected.
    async fn wait_for_slot(&self, host: &str) {
        let now = Instant::now();
        let start = {
            let mut slots = self.next_slot.lock().await;
            let start = slots.get(host).map_or(now, |&slot| slot.max(now));
            slots.insert(host.to_string(), start + self.config.next_gap());
            start
        };

        if start > now {
            let wait = start - now;
            tracing::debug!(host = %host, wait_ms = %wait.as_millis(), "Throttling request");
            tokio::time::sleep(wait).await;
        }
    }
}

impl<F: Fetcher> Fetcher for ThrottledFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        if let Some(host) = Self::host_key(url) {
            self.wait_for_slot(&host).await;
        }
        self.inner.fetch(url).await
    }
}

/// How often and how patiently to retry a failed page fetch.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Fixed wait between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Fetch `url`, retrying retryable errors according to `policy`.
///
/// Non-retryable errors are returned immediately. After the last attempt
/// the final error is returned.
pub async fn fetch_with_retry<F: Fetcher>(
    fetcher: &F,
    url: &str,
    policy: &RetryPolicy,
) -> Result<String, AppError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match fetcher.fetch(url).await {
            Ok(body) => return Ok(body),
            Err(e) if e.is_retryable() && attempt < attempts => {
                tracing::warn!(
                    %url,
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Fetch failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// xorshift over the clock; jitter only needs to be unpredictable, not random.
fn jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockFetcher;

    #[test]
    fn host_key_includes_default_port() {
        assert_eq!(
            ThrottledFetcher::<MockFetcher>::host_key("https://data.gov.au/api/3/action"),
            Some("https://data.gov.au:443".to_string())
        );
        assert_eq!(
            ThrottledFetcher::<MockFetcher>::host_key("http://localhost:8080/services"),
            Some("http://localhost:8080".to_string())
        );
        assert_eq!(ThrottledFetcher::<MockFetcher>::host_key("not a url"), None);
    }

    #[test]
    fn jittered_gap_is_bounded() {
        let config =
            ThrottleConfig::new(Duration::from_millis(100)).with_jitter(Duration::from_millis(50));
        for _ in 0..50 {
            let gap = config.next_gap();
            assert!(gap >= Duration::from_millis(100));
            assert!(gap < Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn same_host_requests_are_spaced() {
        let fetcher = ThrottledFetcher::new(
            MockFetcher::new("{}"),
            ThrottleConfig::new(Duration::from_millis(100)),
        );

        let start = Instant::now();
        fetcher.fetch("https://data.gov.au/page1").await.unwrap();
        fetcher.fetch("https://data.gov.au/page2").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn different_hosts_are_independent() {
        let fetcher = ThrottledFetcher::new(
            MockFetcher::new("{}"),
            ThrottleConfig::new(Duration::from_millis(300)),
        );

        let start = Instant::now();
        fetcher.fetch("https://data.gov.au/a").await.unwrap();
        fetcher.fetch("https://data.qld.gov.au/a").await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_errors() {
        let fetcher = MockFetcher::with_responses(vec![
            Err(AppError::Timeout(30)),
            Err(AppError::NetworkError("reset".into())),
            Ok("{\"ok\":true}".into()),
        ]);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let body = fetch_with_retry(&fetcher, "https://example.org", &policy)
            .await
            .unwrap();
        assert_eq!(body, "{\"ok\":true}");
        assert_eq!(fetcher.requested().len(), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let fetcher = MockFetcher::with_responses(vec![
            Err(AppError::RateLimitExceeded),
            Err(AppError::RateLimitExceeded),
            Ok("late".into()),
        ]);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let err = fetch_with_retry(&fetcher, "https://example.org", &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimitExceeded));
        assert_eq!(fetcher.requested().len(), 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let fetcher = MockFetcher::with_responses(vec![
            Err(AppError::HttpError("HTTP 404 Not Found".into())),
            Ok("never".into()),
        ]);

        let err = fetch_with_retry(&fetcher, "https://example.org", &RetryPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::HttpError(_)));
        assert_eq!(fetcher.requested().len(), 1);
    }
}
