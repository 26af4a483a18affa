mod config;
mod export;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::storage::RecordStore;

#[derive(Parser)]
#[command(name = "quote-changes", about = "Daily stock change snapshots from quote listings", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Database file (overrides storage.db_path)
    #[arg(long, global = true, env = "QUOTES_DB")]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch listing pages and store today's changes
    Run {
        /// Listing page URL; repeat for several (overrides scraper.sources)
        #[arg(short, long = "source")]
        sources: Vec<String>,

        /// Also append the changes to this JSON history file
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Fetch and print the extracted quotes without storing anything
    Extract {
        #[arg(short, long = "source")]
        sources: Vec<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create the StockChanges table if it is missing
    Init,

    /// Show database statistics
    Stats,

    /// List all stored symbols
    Symbols,

    /// Write every stored record to a CSV file
    Export {
        #[arg(short, long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "quote_changes=info,warn",
        1 => "quote_changes=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }

    match cli.command {
        Command::Run { sources, history } => {
            let _t = utils::Timer::start("Quote run");
            if !sources.is_empty() {
                config.scraper.sources = sources;
            }
            if history.is_some() {
                config.pipeline.history_path = history;
            }

            let stats = Pipeline::new(config).run().await?;
            info!(
                "Done: {} symbols, {} records inserted, {} skipped",
                stats.symbols_extracted,
                stats.records_inserted,
                stats.missing_change + stats.classify_errors
            );
        }

        Command::Extract { sources, json } => {
            if !sources.is_empty() {
                config.scraper.sources = sources;
            }
            let quotes = Pipeline::new(config).extract_only().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&quotes)?);
            } else {
                for (symbol, entry) in &quotes {
                    println!(
                        "  {:<10} {:>9}  {}",
                        symbol,
                        entry.change.as_deref().unwrap_or("—"),
                        entry.name
                    );
                }
                println!("{} symbols", quotes.len());
            }
        }

        Command::Init => {
            RecordStore::open(&config.storage.db_path)?.close()?;
            println!("Schema ready at {:?}.", config.storage.db_path);
        }

        Command::Stats => {
            let store = RecordStore::open(&config.storage.db_path)?;
            let records = store.count()?;
            let symbols = store.symbols()?.len() as i64;
            let (min, max) = store.date_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  Stock changes — Database Stats");
            println!("─────────────────────────────────");
            println!("  Symbols  : {}", utils::fmt_count(symbols));
            println!("  Records  : {}", utils::fmt_count(records));
            println!("  From     : {}", min.unwrap_or("—".into()));
            println!("  To       : {}", max.unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }

        Command::Symbols => {
            let store = RecordStore::open(&config.storage.db_path)?;
            let syms = store.symbols()?;
            if syms.is_empty() {
                println!("No symbols — run `quote-changes run` first.");
            } else {
                println!("{} symbols:", syms.len());
                for s in &syms {
                    println!("  {}", s);
                }
            }
        }

        Command::Export { out } => {
            let store = RecordStore::open(&config.storage.db_path)?;
            let n = export::write_csv(&store.records()?, &out)?;
            println!("{} records written to {:?}.", n, out);
        }
    }

    Ok(())
}
