//! bucketsync -- mirror an S3 bucket's object metadata into a SQL table.
//!
//! One invocation is one run: list everything, upsert everything, exit.
//! Re-running converges the table onto the bucket again.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bucketsync::config::{self, Config, ErrorPolicy, PaginationMode};
use bucketsync::listing::s3::S3Lister;
use bucketsync::mirror::{Mirror, MirrorOptions};

/// Command-line arguments. Flags override the file and the environment.
#[derive(Parser, Debug)]
#[command(
    name = "bucketsync",
    version,
    about = "Mirror S3 object metadata into a SQL table"
)]
struct Cli {
    /// Path to a YAML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    /// Bucket to list.
    #[arg(short, long)]
    bucket: Option<String>,

    /// Only mirror keys under this prefix.
    #[arg(long)]
    prefix: Option<String>,

    /// Number of concurrent workers.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Objects requested per listing page (1-1000).
    #[arg(long)]
    page_size: Option<u32>,

    /// Destination database URL (overrides DATABASE_URL).
    #[arg(long)]
    database_url: Option<String>,

    /// Failure handling for pages and objects.
    #[arg(long, value_enum)]
    on_error: Option<ErrorPolicy>,

    /// How truncated listings continue.
    #[arg(long, value_enum)]
    pagination: Option<PaginationMode>,

    /// Log level when RUST_LOG is unset.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(bucket) = self.bucket {
            config.source.bucket = bucket;
        }
        if let Some(prefix) = self.prefix {
            config.source.prefix = prefix;
        }
        if let Some(workers) = self.workers {
            config.mirror.workers = workers;
        }
        if let Some(page_size) = self.page_size {
            config.mirror.page_size = page_size;
        }
        if let Some(url) = self.database_url {
            config.database.url = url;
        }
        if let Some(policy) = self.on_error {
            config.mirror.on_error = policy;
        }
        if let Some(mode) = self.pagination {
            config.mirror.pagination = mode;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut cli = Cli::parse();

    let mut config = match cli.config.take() {
        Some(path) => config::load_config(&path)
            .with_context(|| format!("failed to load configuration from {path}"))?,
        None => Config::default(),
    };
    config.apply_env(|name| std::env::var(name).ok());
    cli.apply(&mut config);

    init_tracing(&config.logging);
    config.validate()?;

    let metrics_textfile = config.observability.metrics_textfile.clone();
    if metrics_textfile.is_some() {
        bucketsync::metrics::init_metrics();
        bucketsync::metrics::describe_metrics();
    }

    let store = bucketsync::metadata::open_store(&config.database.url, config.pool_size()).await?;
    let lister = Arc::new(S3Lister::new(&config.source, config.mirror.page_size)?);
    info!(
        bucket = %config.source.bucket,
        prefix = %config.source.prefix,
        "mirroring bucket listing"
    );

    let mirror = Mirror::new(lister, store.clone(), MirrorOptions::from(&config.mirror));
    let result = mirror.run().await;

    if let Some(path) = &metrics_textfile {
        if let Err(e) = bucketsync::metrics::write_textfile(path) {
            error!(path = %path, error = %e, "failed to write metrics textfile");
        }
    }

    let report = result.context("mirror aborted")?;
    let rows = store.count_objects().await?;
    info!(
        pages = report.pages_fetched,
        listed = report.objects_listed,
        inserted = report.inserted,
        updated = report.updated,
        skipped = report.skipped,
        list_tasks = report.list_tasks,
        upsert_tasks = report.upsert_tasks,
        rows,
        "mirror complete"
    );
    Ok(())
}
