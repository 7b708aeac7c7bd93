//! Run configuration: an optional `feedscout.toml` plus command-line overrides.
//!
//! The config file is optional. A missing or empty file yields
//! `Config::default()`, which reproduces the stock behaviour (keyword 起業,
//! depth 3, 300 entries per source, 90-day window, 100 output items).
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::ChannelInfo;
use crate::storage::StatePaths;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Required input file not found: {}", .0.display())]
    MissingInput(PathBuf),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Where cross-run state is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Line-delimited text files
    #[default]
    File,
    /// A single SQLite database, seeded from the input files
    Sqlite,
}

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed URLs to poll, one per line.
    pub sources_path: PathBuf,
    /// URLs never polled or crawled, one per line.
    pub blacklist_path: PathBuf,
    pub processed_path: PathBuf,
    pub indexed_path: PathBuf,
    pub output_path: PathBuf,

    pub backend: Backend,
    /// SQLite database file, used with `backend = "sqlite"`.
    pub database_path: PathBuf,

    /// Substring an entry's title or description must contain.
    pub keyword: String,
    /// Discovery hops followed from an entry link.
    pub max_depth: usize,
    /// Entries accepted per source before moving on.
    pub per_source_cap: usize,
    /// Entries older than this stop processing of their source.
    pub recency_days: u32,
    /// Items in the published feed.
    pub output_cap: usize,

    pub request_timeout_secs: u64,
    /// Minimum spacing between requests to one origin.
    pub throttle_interval_ms: u64,
    pub user_agent: String,
    /// Sources polled at once.
    pub concurrency: usize,
    /// Stop starting new work after this many seconds. `None` = no limit.
    pub deadline_secs: Option<u64>,
    /// Save the entry store after every N sources. 0 = only at the end.
    pub checkpoint_interval: usize,
    /// Let discovery follow links to localhost and private networks.
    pub allow_private_hosts: bool,

    /// Offset used for lastBuildDate and item pubDate.
    pub utc_offset_hours: i32,
    pub channel: ChannelInfo,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources_path: PathBuf::from("feed_urls.txt"),
            blacklist_path: PathBuf::from("blacklist.txt"),
            processed_path: PathBuf::from("processed_entries.txt"),
            indexed_path: PathBuf::from("indexed_entries.txt"),
            output_path: PathBuf::from("feed/index.xml"),
            backend: Backend::File,
            database_path: PathBuf::from("feedscout.db"),
            keyword: "起業".to_string(),
            max_depth: 3,
            per_source_cap: 300,
            recency_days: 90,
            output_cap: 100,
            request_timeout_secs: 10,
            throttle_interval_ms: 1000,
            user_agent: concat!("feedscout/", env!("CARGO_PKG_VERSION")).to_string(),
            concurrency: 1,
            deadline_secs: None,
            checkpoint_interval: 0,
            allow_private_hosts: false,
            utc_offset_hours: 9,
            channel: ChannelInfo::default(),
        }
    }
}

/// Values given on the command line. `None` leaves the file value alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub keyword: Option<String>,
    pub max_depth: Option<usize>,
    pub per_source_cap: Option<usize>,
    pub recency_days: Option<u32>,
    pub output_cap: Option<usize>,
    pub output_path: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub deadline_secs: Option<u64>,
    pub backend: Option<Backend>,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 21] = [
        "sources_path",
        "blacklist_path",
        "processed_path",
        "indexed_path",
        "output_path",
        "backend",
        "database_path",
        "keyword",
        "max_depth",
        "per_source_cap",
        "recency_days",
        "output_cap",
        "request_timeout_secs",
        "throttle_interval_ms",
        "user_agent",
        "concurrency",
        "deadline_secs",
        "checkpoint_interval",
        "allow_private_hosts",
        "utc_offset_hours",
        "channel",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), keyword = %config.keyword, "Loaded configuration");
        Ok(config)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(keyword) = overrides.keyword {
            self.keyword = keyword;
        }
        if let Some(max_depth) = overrides.max_depth {
            self.max_depth = max_depth;
        }
        if let Some(cap) = overrides.per_source_cap {
            self.per_source_cap = cap;
        }
        if let Some(days) = overrides.recency_days {
            self.recency_days = days;
        }
        if let Some(cap) = overrides.output_cap {
            self.output_cap = cap;
        }
        if let Some(path) = overrides.output_path {
            self.output_path = path;
        }
        if let Some(concurrency) = overrides.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(secs) = overrides.deadline_secs {
            self.deadline_secs = Some(secs);
        }
        if let Some(backend) = overrides.backend {
            self.backend = backend;
        }
    }

    /// Rejects settings that would make a run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keyword.trim().is_empty() {
            return Err(ConfigError::Invalid("keyword must not be empty".into()));
        }
        let positive = [
            ("per_source_cap", self.per_source_cap as u64),
            ("output_cap", self.output_cap as u64),
            ("request_timeout_secs", self.request_timeout_secs),
            ("concurrency", self.concurrency as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }
        if self.deadline_secs == Some(0) {
            return Err(ConfigError::Invalid("deadline_secs must be greater than 0".into()));
        }
        self.utc_offset()?;
        Ok(())
    }

    /// Both input files must exist before any network activity.
    pub fn check_inputs(&self) -> Result<(), ConfigError> {
        for path in [&self.sources_path, &self.blacklist_path] {
            if !path.is_file() {
                return Err(ConfigError::MissingInput(path.clone()));
            }
        }
        Ok(())
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        if !(-23..=23).contains(&self.utc_offset_hours) {
            return Err(ConfigError::Invalid(format!(
                "utc_offset_hours {} is out of range",
                self.utc_offset_hours
            )));
        }
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "utc_offset_hours {} is out of range",
                self.utc_offset_hours
            ))
        })
    }

    pub fn state_paths(&self) -> StatePaths {
        StatePaths {
            sources: self.sources_path.clone(),
            blacklist: self.blacklist_path.clone(),
            processed: self.processed_path.clone(),
            indexed: self.indexed_path.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================
