use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;
use tag_tally::buffer::{BufferKind, FlushOrdering};
use tag_tally::config::{CliArgs, Config, StoreBackend};

#[derive(Parser)]
#[command(name = "tag-tally")]
#[command(about = "Aggregate tag counts in memory and flush them to a counter store")]
struct Cli {
    #[arg(short, long, help = "Increase verbosity")]
    verbose: bool,

    #[arg(short, long, help = "Path to a TOML or JSON config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Buffer strategy: naive, deep_copy or swap")]
    buffer: Option<BufferKind>,

    #[arg(long, help = "Swap buffer flush ordering: token_first or lock_first")]
    flush_ordering: Option<FlushOrdering>,

    #[arg(long, help = "Flush after this many events")]
    flush_threshold: Option<u64>,

    #[arg(short, long, help = "Number of ingestion workers")]
    workers: Option<usize>,

    #[arg(short, long, help = "Number of events to generate")]
    events: Option<u64>,

    #[arg(long, help = "Counter store backend: memory or http")]
    store: Option<StoreBackend>,

    #[arg(long, env = "TAG_TALLY_STORE_URL", help = "Base URL of the HTTP counter store")]
    store_url: Option<String>,

    #[arg(long, help = "Simulated latency per memory store call, in milliseconds")]
    store_latency_ms: Option<u64>,
}

impl From<&Cli> for CliArgs {
    fn from(cli: &Cli) -> Self {
        Self {
            config_file: cli.config.clone(),
            buffer_kind: cli.buffer,
            flush_ordering: cli.flush_ordering,
            flush_threshold: cli.flush_threshold,
            workers: cli.workers,
            events: cli.events,
            store_backend: cli.store,
            store_url: cli.store_url.clone(),
            store_latency_ms: cli.store_latency_ms,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config =
        Config::load_with_cli(&CliArgs::from(&cli)).context("Failed to load configuration")?;

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::from_str(&config.logging.level).unwrap_or(tracing::Level::INFO)
    };
    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();

    tracing::subscriber::set_global_default(subscriber)?;

    tag_tally::run(config).await?;
    Ok(())
}
