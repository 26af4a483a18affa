use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub layout: PageLayout,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    /// Listing pages, processed in this order.
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Extra attempts per source; 0 disables retrying.
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

/// What a run does when one source cannot be fetched.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceErrorPolicy {
    #[default]
    Skip,
    Abort,
}

/// Pipeline configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub on_source_error: SourceErrorPolicy,

    /// JSON file collecting `[date, change]` pairs per stock name.
    #[serde(default)]
    pub history_path: Option<PathBuf>,
}

/// Structural markers of the quote listing page.
///
/// Defaults describe the stooq listing layout. `change_container_id` is a
/// template: `{symbol}` is replaced with the lower-cased symbol.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PageLayout {
    #[serde(default = "default_table_class")]
    pub table_class: String,

    #[serde(default = "default_row_id_prefix")]
    pub row_id_prefix: String,

    #[serde(default = "default_symbol_block_id")]
    pub symbol_block_id: String,

    #[serde(default = "default_name_block_id")]
    pub name_block_id: String,

    #[serde(default = "default_change_container_id")]
    pub change_container_id: String,

    /// Searched in order; a later match overwrites an earlier one.
    #[serde(default = "default_change_cell_ids")]
    pub change_cell_ids: Vec<String>,
}

impl PageLayout {
    pub fn row_id(&self, index: usize) -> String {
        format!("{}{}", self.row_id_prefix, index)
    }

    pub fn change_container_for(&self, symbol: &str) -> String {
        self.change_container_id
            .replace("{symbol}", &symbol.to_lowercase())
    }
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_sources() -> Vec<String> {
    vec!["https://stooq.pl/t/?i=582".to_string()]
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    1500
}
fn default_jitter_ms() -> u64 {
    500
}
fn default_user_agent() -> String {
    "quote-changes/0.1 (daily change snapshot)".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/stock_changes.duckdb")
}
fn default_table_class() -> String {
    "fth1".to_string()
}
fn default_row_id_prefix() -> String {
    "r_".to_string()
}
fn default_symbol_block_id() -> String {
    "f13".to_string()
}
fn default_name_block_id() -> String {
    "f10".to_string()
}
fn default_change_container_id() -> String {
    "aq_{symbol}_m1".to_string()
}
fn default_change_cell_ids() -> Vec<String> {
    vec!["c1".into(), "c2".into(), "c3".into()]
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_retries: 0,
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            table_class: default_table_class(),
            row_id_prefix: default_row_id_prefix(),
            symbol_block_id: default_symbol_block_id(),
            name_block_id: default_name_block_id(),
            change_container_id: default_change_container_id(),
            change_cell_ids: default_change_cell_ids(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig::default(),
            storage: StorageConfig::default(),
            pipeline: PipelineConfig::default(),
            layout: PageLayout::default(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("QUOTES")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("scraper.sources"),
            )
            .build()?;

        Self::from_layers(cfg)
    }

    /// Deserialize merged layers; a bad value is an error, never a silent default.
    fn from_layers(cfg: config::Config) -> Result<Self> {
        cfg.try_deserialize().context("Invalid configuration")
    }

    /// Every source must be an absolute http(s) URL.
    pub fn validate_sources(&self) -> Result<()> {
        for source in &self.scraper.sources {
            let url = Url::parse(source)
                .with_context(|| format!("Invalid source URL {:?}", source))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                anyhow::bail!("Unsupported scheme in source URL {:?}", source);
            }
        }
        Ok(())
    }
}
