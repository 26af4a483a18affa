use crate::config::ScraperConfig;
use crate::scraper::PageFetcher;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        source: reqwest::Error,
    },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} timed out after {limit:?}")]
    Timeout { url: String, limit: Duration },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            FetchError::Request { url, .. }
            | FetchError::Status { url, .. }
            | FetchError::Timeout { url, .. } => url,
        }
    }

    /// Worth another attempt: transport errors, timeouts, 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Request { source, .. } => !source.is_builder(),
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Timeout { .. } => true,
        }
    }
}

// ── reqwest fetcher ───────────────────────────────────────────────────────────

pub struct HttpClient {
    inner: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(timeout)
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { inner, timeout })
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        debug!("GET {}", url);

        let to_error = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout { url: url.to_string(), limit: self.timeout }
            } else {
                FetchError::Request { url: url.to_string(), source: e }
            }
        };

        let resp = self.inner.get(url).send().await.map_err(to_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // Decodes using the charset the page declares.
        resp.text().await.map_err(to_error)
    }
}

// ── Timeout layer ─────────────────────────────────────────────────────────────

/// Bounds each call of the wrapped fetcher. Put it inside [`Retrying`] so
/// every attempt gets the full limit.
pub struct Timed<F> {
    inner: F,
    limit: Duration,
}

impl<F> Timed<F> {
    pub fn new(inner: F, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl<F: PageFetcher> PageFetcher for Timed<F> {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        tokio::time::timeout(self.limit, self.inner.fetch(url))
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
                limit: self.limit,
            })?
    }
}

// ── Retry layer ───────────────────────────────────────────────────────────────

/// Retries transient failures of the wrapped fetcher with jittered
/// exponential backoff. Permanent failures (4xx other than 429) return at once.
pub struct Retrying<F> {
    inner: F,
    max_retries: u32,
    base_delay_ms: u64,
}

impl<F> Retrying<F> {
    pub fn new(inner: F, max_retries: u32, base_delay_ms: u64) -> Self {
        Self { inner, max_retries, base_delay_ms }
    }
}

#[async_trait]
impl<F: PageFetcher> PageFetcher for Retrying<F> {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.base_delay_ms / 2)
            .max_delay(Duration::from_secs(60))
            .map(jitter)
            .take(self.max_retries as usize);

        RetryIf::start(
            strategy,
            || self.inner.fetch(url),
            |e: &FetchError| {
                let retry = e.is_transient();
                if retry {
                    warn!("{}, retrying", e);
                }
                retry
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with `status` for the first `failures` calls.
    struct Flaky {
        failures: usize,
        status: u16,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for Flaky {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(FetchError::Status { url: url.to_string(), status: self.status })
            } else {
                Ok("<html></html>".to_string())
            }
        }
    }

    fn flaky(failures: usize, status: u16) -> Flaky {
        Flaky { failures, status, calls: AtomicUsize::new(0) }
    }

    #[test]
    fn test_transient_classification() {
        let status = |status| FetchError::Status { url: "u".into(), status };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(404).is_transient());
        assert!(FetchError::Timeout { url: "u".into(), limit: Duration::from_secs(1) }.is_transient());
        assert_eq!(status(500).url(), "u");
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let fetcher = Retrying::new(flaky(2, 503), 2, 0);
        assert!(fetcher.fetch("https://example.com/").await.is_ok());
        assert_eq!(fetcher.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let fetcher = Retrying::new(flaky(5, 503), 1, 0);
        let err = fetcher.fetch("https://example.com/").await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
        assert_eq!(fetcher.inner.calls.load(Ordering::SeqCst), 2);
    }

    /// First call hangs, later calls answer at once.
    struct HangsOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for HangsOnce {
        async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok("<html></html>".to_string())
        }
    }

    #[tokio::test]
    async fn test_timed_out_attempt_is_retried() {
        let fetcher = Retrying::new(
            Timed::new(HangsOnce { calls: AtomicUsize::new(0) }, Duration::from_millis(100)),
            3,
            0,
        );
        assert!(fetcher.fetch("https://a.test/").await.is_ok());
        assert_eq!(fetcher.inner.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_message_keeps_sub_second_limit() {
        let fetcher = Timed::new(HangsOnce { calls: AtomicUsize::new(0) }, Duration::from_millis(100));
        let err = fetcher.fetch("https://a.test/").await.unwrap_err();
        assert_eq!(err.to_string(), "https://a.test/ timed out after 100ms");
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let fetcher = Retrying::new(flaky(1, 404), 3, 0);
        let err = tokio_test::block_on(fetcher.fetch("https://example.com/missing")).unwrap_err();
        assert_eq!(err.url(), "https://example.com/missing");
        assert_eq!(fetcher.inner.calls.load(Ordering::SeqCst), 1);
    }
}
