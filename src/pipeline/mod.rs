//! Pipeline orchestrator: ties scraper → classifier → storage together.
//!
//! One run:
//!   1. Fetch every configured listing page in order, folding the rows into a
//!      single symbol map (first source wins).
//!   2. Classify each symbol's change text into up / down / flat.
//!   3. Insert one record per symbol, all stamped with the run's timestamp.
//!   Idempotent: re-inserting an identical record is a no-op.

use crate::config::AppConfig;
use crate::export;
use crate::models::{ExtractionMap, StockChangeRecord};
use crate::scraper::cleaner::classify_change;
use crate::scraper::http_client::{HttpClient, Retrying, Timed};
use crate::scraper::{PageFetcher, QuoteExtractor, Retrieval};
use crate::storage::RecordStore;
use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    fn extractor(&self) -> Result<QuoteExtractor<Retrying<Timed<HttpClient>>>> {
        let scraper = &self.config.scraper;
        let client = HttpClient::new(scraper).context("Failed to build HTTP client")?;
        // Each attempt gets its own timeout; the retry layer sits outside it.
        let timed = Timed::new(client, Duration::from_secs(scraper.timeout_secs));
        let fetcher = Retrying::new(timed, scraper.max_retries, scraper.request_delay_ms);

        Ok(QuoteExtractor::new(fetcher, self.config.layout.clone())
            .with_delay(scraper.request_delay_ms, scraper.jitter_ms))
    }

    /// Fetch, classify and store against the configured database.
    pub async fn run(&self) -> Result<PipelineStats> {
        self.config.validate_sources()?;
        let extractor = self.extractor()?;

        let store = RecordStore::open(&self.config.storage.db_path)
            .context("Failed to open record store")?;

        let stats = self.run_with(&extractor, &store, Local::now().naive_local()).await?;

        store.close()?;
        Ok(stats)
    }

    /// Fetch and extract only; nothing is stored.
    pub async fn extract_only(&self) -> Result<ExtractionMap> {
        self.config.validate_sources()?;
        let retrieval = self.retrieve(&self.extractor()?).await?;
        Ok(retrieval.quotes)
    }

    async fn retrieve<F: PageFetcher>(&self, extractor: &QuoteExtractor<F>) -> Result<Retrieval> {
        let sources = &self.config.scraper.sources;
        let retrieval = extractor
            .retrieve_all(sources, self.config.pipeline.on_source_error)
            .await?;

        if retrieval.quotes.is_empty() && !retrieval.failures.is_empty() {
            let failed: Vec<String> = retrieval.failures.iter().map(|e| e.to_string()).collect();
            bail!(
                "0 records extracted: {} of {} sources failed ({})",
                failed.len(),
                sources.len(),
                failed.join("; ")
            );
        }

        Ok(retrieval)
    }

    /// The whole run against a given fetcher and store; `now` stamps every record.
    pub async fn run_with<F: PageFetcher>(
        &self,
        extractor: &QuoteExtractor<F>,
        store: &RecordStore,
        now: NaiveDateTime,
    ) -> Result<PipelineStats> {
        info!("=== Step 1: Extracting quotes ===");
        let retrieval = self.retrieve(extractor).await?;

        let mut stats = PipelineStats {
            sources_ok: retrieval.sources_ok,
            sources_failed: retrieval.failures.len(),
            symbols_extracted: retrieval.quotes.len(),
            ..Default::default()
        };

        info!("=== Step 2: Storing {} symbols ===", retrieval.quotes.len());
        let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();

        for (symbol, entry) in &retrieval.quotes {
            let Some(change) = entry.change.as_deref() else {
                debug!("{} ({}): no change value, skipped", symbol, entry.name);
                stats.missing_change += 1;
                continue;
            };

            let classified = match classify_change(change) {
                Ok(c) => c,
                Err(e) => {
                    warn!("{}: {}, skipped", symbol, e);
                    stats.classify_errors += 1;
                    continue;
                }
            };

            debug!("{} {} {} ({})", symbol, entry.name, change, classified.direction);

            let record = StockChangeRecord {
                date: timestamp.clone(),
                symbol: symbol.clone(),
                direction: classified.direction,
                change: change.to_string(),
            };

            if store.insert(&record)? {
                stats.records_inserted += 1;
            } else {
                stats.duplicates += 1;
            }
        }

        if let Some(path) = &self.config.pipeline.history_path {
            let date = now.format("%Y-%m-%d").to_string();
            export::update_history_file(path, &retrieval.quotes, &date)?;
        }

        info!(
            "=== Done: {} symbols | {} inserted | {} duplicates | {} without change | {} unparseable ===",
            stats.symbols_extracted,
            stats.records_inserted,
            stats.duplicates,
            stats.missing_change,
            stats.classify_errors,
        );

        Ok(stats)
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct PipelineStats {
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub symbols_extracted: usize,
    pub records_inserted: usize,
    pub duplicates: usize,
    pub missing_change: usize,
    pub classify_errors: usize,
}
