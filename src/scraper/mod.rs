pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::{PageLayout, SourceErrorPolicy};
use crate::models::ExtractionMap;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub use self::http_client::FetchError;

// ── Fetch trait ───────────────────────────────────────────────────────────────

/// Swappable page source: given a URL, the raw page or an error.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

// ── Extraction engine ─────────────────────────────────────────────────────────

/// Result of walking every source of a run.
#[derive(Debug, Default)]
pub struct Retrieval {
    pub quotes: ExtractionMap,
    pub sources_ok: usize,
    pub failures: Vec<FetchError>,
}

pub struct QuoteExtractor<F> {
    fetcher: F,
    layout: PageLayout,
    timeout: Option<Duration>,
    request_delay_ms: u64,
    jitter_ms: u64,
}

impl<F: PageFetcher> QuoteExtractor<F> {
    pub fn new(fetcher: F, layout: PageLayout) -> Self {
        Self {
            fetcher,
            layout,
            timeout: None,
            request_delay_ms: 0,
            jitter_ms: 0,
        }
    }

    /// Upper bound for a single source fetch, retries included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Pause between consecutive sources.
    pub fn with_delay(mut self, request_delay_ms: u64, jitter_ms: u64) -> Self {
        self.request_delay_ms = request_delay_ms;
        self.jitter_ms = jitter_ms;
        self
    }

    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.fetcher.fetch(url))
                .await
                .map_err(|_| FetchError::Timeout {
                    url: url.to_string(),
                    limit,
                })?,
            None => self.fetcher.fetch(url).await,
        }
    }

    /// Fetch one source and merge its rows into `quotes`.
    ///
    /// `quotes` is only touched once the page is in hand, so a failed or
    /// cancelled fetch leaves it as it was. Returns the number of symbols
    /// this source added.
    pub async fn retrieve(&self, url: &str, quotes: &mut ExtractionMap) -> Result<usize, FetchError> {
        let html = self.fetch_page(url).await?;

        let before = quotes.len();
        let merged = parsers::extract_document(&html, &self.layout, std::mem::take(quotes));
        *quotes = merged;

        Ok(quotes.len() - before)
    }

    /// Walk `urls` in order, one at a time.
    ///
    /// With [`SourceErrorPolicy::Abort`] the first fetch error ends the walk;
    /// with `Skip` it is logged, kept in [`Retrieval::failures`] and the next
    /// source is tried.
    pub async fn retrieve_all(
        &self,
        urls: &[String],
        policy: SourceErrorPolicy,
    ) -> Result<Retrieval, FetchError> {
        let mut retrieval = Retrieval::default();

        for (i, url) in urls.iter().enumerate() {
            if i > 0 {
                self.polite_delay().await;
            }

            info!("Fetching {}", url);
            match self.retrieve(url, &mut retrieval.quotes).await {
                Ok(added) => {
                    info!("  {}: {} new symbols", url, added);
                    retrieval.sources_ok += 1;
                }
                Err(e) if policy == SourceErrorPolicy::Abort => return Err(e),
                Err(e) => {
                    warn!("Skipping source: {}", e);
                    retrieval.failures.push(e);
                }
            }
        }

        info!(
            "Extracted {} symbols from {} of {} sources",
            retrieval.quotes.len(),
            retrieval.sources_ok,
            urls.len()
        );
        Ok(retrieval)
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter = rand::random_range(0..=self.jitter_ms);
        let total = Duration::from_millis(self.request_delay_ms + jitter);
        if !total.is_zero() {
            debug!("Waiting {:?} before next source", total);
            sleep(total).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::QuoteEntry;
    use std::collections::HashMap;

    /// Serves canned pages; unknown URLs answer 404, "slow" URLs never return.
    #[derive(Default)]
    pub(crate) struct StubFetcher {
        pub pages: HashMap<String, String>,
    }

    impl StubFetcher {
        pub fn with(mut self, url: &str, html: String) -> Self {
            self.pages.insert(url.to_string(), html);
            self
        }
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            if url.contains("slow") {
                sleep(Duration::from_secs(3600)).await;
            }
            self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    pub(crate) fn listing(rows: &[(&str, &str, &str)]) -> String {
        let body: String = rows
            .iter()
            .enumerate()
            .map(|(i, (symbol, name, change))| {
                format!(
                    r#"<tr id="r_{i}"><td id="f10">{name}</td><td id="f13"><a>{symbol}</a></td>
                       <td id="f13"><span id="aq_{lower}_m1"><span id="c1">{change}</span></span></td></tr>"#,
                    lower = symbol.to_lowercase(),
                )
            })
            .collect();
        format!(r#"<html><body><table class="fth1"><tbody>{}</tbody></table></body></html>"#, body)
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_first_source_wins() {
        let fetcher = StubFetcher::default()
            .with("https://a.test/", listing(&[("ABC", "Able Corp", "+2.50%")]))
            .with(
                "https://b.test/",
                listing(&[("ABC", "Able Holdings", "-1.00%"), ("XYZ", "Xylo SA", "0.00%")]),
            );
        let engine = QuoteExtractor::new(fetcher, PageLayout::default());

        let retrieval = engine
            .retrieve_all(&urls(&["https://a.test/", "https://b.test/"]), SourceErrorPolicy::Abort)
            .await
            .unwrap();

        assert_eq!(retrieval.sources_ok, 2);
        assert_eq!(
            retrieval.quotes["ABC"],
            QuoteEntry { name: "Able Corp".into(), change: Some("+2.50%".into()) }
        );
        assert_eq!(retrieval.quotes["XYZ"].change.as_deref(), Some("0.00%"));
    }

    #[tokio::test]
    async fn test_skip_policy_continues() {
        let fetcher = StubFetcher::default()
            .with("https://b.test/", listing(&[("XYZ", "Xylo SA", "-0.40%")]));
        let engine = QuoteExtractor::new(fetcher, PageLayout::default());

        let retrieval = engine
            .retrieve_all(&urls(&["https://gone.test/", "https://b.test/"]), SourceErrorPolicy::Skip)
            .await
            .unwrap();

        assert_eq!(retrieval.sources_ok, 1);
        assert_eq!(retrieval.failures.len(), 1);
        assert_eq!(retrieval.failures[0].url(), "https://gone.test/");
        assert_eq!(retrieval.quotes.len(), 1);
    }

    #[tokio::test]
    async fn test_abort_policy_returns_first_error() {
        let fetcher = StubFetcher::default()
            .with("https://b.test/", listing(&[("XYZ", "Xylo SA", "-0.40%")]));
        let engine = QuoteExtractor::new(fetcher, PageLayout::default());

        let err = engine
            .retrieve_all(&urls(&["https://gone.test/", "https://b.test/"]), SourceErrorPolicy::Abort)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_timeout_leaves_accumulator_intact() {
        let fetcher = StubFetcher::default()
            .with("https://a.test/", listing(&[("ABC", "Able Corp", "+2.50%")]));
        let engine = QuoteExtractor::new(fetcher, PageLayout::default())
            .with_timeout(Duration::from_millis(50));

        let mut quotes = ExtractionMap::new();
        assert_eq!(engine.retrieve("https://a.test/", &mut quotes).await.unwrap(), 1);

        let err = engine.retrieve("https://slow.test/", &mut quotes).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes["ABC"].name, "Able Corp");
    }

    #[tokio::test]
    async fn test_page_without_table_adds_nothing() {
        let fetcher = StubFetcher::default()
            .with("https://a.test/", "<html><body><p>maintenance</p></body></html>".into());
        let engine = QuoteExtractor::new(fetcher, PageLayout::default());

        let mut quotes = ExtractionMap::new();
        assert_eq!(engine.retrieve("https://a.test/", &mut quotes).await.unwrap(), 0);
        assert!(quotes.is_empty());
    }
}
