use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use feedscout::aggregator::{Aggregator, AggregatorSettings};
use feedscout::config::{Backend, Config, Overrides};
use feedscout::control::RunControl;
use feedscout::feed::{publish_to_file, DiscoveryOptions, DomainThrottle, HttpClients};
use feedscout::storage::{
    file::read_input_lines, EntryStore, FileStore, SourceRegistry, SqliteStore, StateBackend,
    Table,
};

#[derive(Parser, Debug)]
#[command(
    name = "feedscout",
    version,
    about = "Keyword-filtered RSS aggregator that discovers new feeds from linked pages"
)]
struct Args {
    /// Config file (TOML). Missing file means defaults.
    #[arg(long, value_name = "FILE", default_value = "feedscout.toml")]
    config: PathBuf,

    /// Substring entries must contain in title or description
    #[arg(long)]
    keyword: Option<String>,

    /// Discovery hops followed from an entry link
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,

    /// Entries accepted per source
    #[arg(long, value_name = "N")]
    per_source_cap: Option<usize>,

    /// Entries older than this many days end their source
    #[arg(long, value_name = "DAYS")]
    recency_days: Option<u32>,

    /// Items in the published feed
    #[arg(long, value_name = "N")]
    output_cap: Option<usize>,

    /// Output RSS file
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Sources polled at once
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Stop starting new work after this many seconds
    #[arg(long, value_name = "SECS")]
    deadline_secs: Option<u64>,

    /// State storage
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            keyword: self.keyword.clone(),
            max_depth: self.max_depth,
            per_source_cap: self.per_source_cap,
            recency_days: self.recency_days,
            output_cap: self.output_cap,
            output_path: self.output.clone(),
            concurrency: self.concurrency,
            deadline_secs: self.deadline_secs,
            backend: self.backend,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;
    config.apply(args.overrides());
    config.validate()?;
    // Reported before any network activity
    config.check_inputs()?;

    match config.backend {
        Backend::File => {
            let backend = FileStore::new(config.state_paths());
            execute(&config, backend).await
        }
        Backend::Sqlite => {
            let path = config
                .database_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
            let backend = SqliteStore::open(path)
                .await
                .with_context(|| format!("Failed to open state database '{path}'"))?;
            seed_from_inputs(&config, &backend).await?;
            execute(&config, backend).await
        }
    }
}

/// Copies the input files into the database. Existing rows are kept, so
/// sources discovered in earlier runs survive.
async fn seed_from_inputs(config: &Config, backend: &SqliteStore) -> Result<()> {
    for (table, path) in [
        (Table::Sources, &config.sources_path),
        (Table::Blacklist, &config.blacklist_path),
    ] {
        let lines = read_input_lines(path).await?;
        for line in &lines {
            backend.append_line(table, line).await?;
        }
        tracing::debug!(table = %table, lines = lines.len(), "Seeded state database");
    }
    Ok(())
}

async fn execute<B: StateBackend>(config: &Config, backend: B) -> Result<()> {
    let registry = SourceRegistry::load(backend.clone())
        .await
        .context("Failed to load source registry")?;
    let store = EntryStore::load(backend)
        .await
        .context("Failed to load entry store")?;

    if registry.is_empty() {
        tracing::warn!(path = %config.sources_path.display(), "No sources registered");
    }

    let clients = HttpClients::new(config.request_timeout(), &config.user_agent)
        .context("Failed to build HTTP client")?;
    let throttle = Arc::new(DomainThrottle::new(config.throttle_interval()));
    let control = RunControl::new(config.deadline());

    let ctrl_c = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing with what has been collected");
            ctrl_c.cancel();
        }
    });

    let discovery = DiscoveryOptions {
        max_depth: config.max_depth,
        timeout: config.request_timeout(),
        allow_private: config.allow_private_hosts,
    };

    let aggregator = Aggregator::new(
        AggregatorSettings::from_config(config),
        clients,
        throttle,
        discovery,
        registry,
        store,
        control,
    );

    let outcome = aggregator.run(Utc::now()).await.context("Run aborted")?;

    let built_at = Utc::now().with_timezone(&config.utc_offset()?);
    publish_to_file(&config.channel, &outcome.entries, built_at, &config.output_path)?;

    println!(
        "Published {} entries to {} ({} sources polled, {} failed, {} new sources)",
        outcome.summary.entries_published,
        config.output_path.display(),
        outcome.summary.sources_polled,
        outcome.summary.sources_failed,
        outcome.summary.sources_discovered,
    );
    Ok(())
}
