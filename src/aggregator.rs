//! The run driver: poll every source, filter and dedup entries, grow the
//! registry through discovery, then rank and cap the result.

use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::control::RunControl;
use crate::feed::{fetch_feed, DiscoveryOptions, Discoverer, DomainThrottle, Entry, HttpClients};
use crate::storage::{EntryStore, SourceRegistry, StateBackend, StorageError};

// ============================================================================
// Settings and results
// ============================================================================

/// Filtering and scheduling knobs for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorSettings {
    pub keyword: String,
    pub per_source_cap: usize,
    pub recency_days: u32,
    pub output_cap: usize,
    /// Sources polled at once.
    pub concurrency: usize,
    /// Save the entry store every N completed sources; 0 disables.
    pub checkpoint_interval: usize,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl AggregatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            keyword: config.keyword.clone(),
            per_source_cap: config.per_source_cap,
            recency_days: config.recency_days,
            output_cap: config.output_cap,
            concurrency: config.concurrency.max(1),
            checkpoint_interval: config.checkpoint_interval,
        }
    }
}

/// Counters logged at the end of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub sources_polled: usize,
    pub sources_failed: usize,
    pub entries_seen: usize,
    pub entries_accepted: usize,
    pub entries_published: usize,
    pub sources_discovered: usize,
    /// The run hit its deadline or was cancelled.
    pub stopped_early: bool,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Newest first, at most `output_cap` long.
    pub entries: Vec<Entry>,
    pub summary: RunSummary,
}

/// What one source contributed.
#[derive(Debug, Default)]
struct SourceReport {
    accepted: Vec<Entry>,
    seen: usize,
    discovered: usize,
    failed: bool,
    interrupted: bool,
}

// ============================================================================
// Aggregator
// ============================================================================

/// Owns everything a run mutates.
///
/// The registry and entry store sit behind async mutexes so concurrent
/// sources serialize their writes. The blacklist is snapshotted at
/// construction; it never changes during a run.
pub struct Aggregator<B: StateBackend> {
    settings: AggregatorSettings,
    clients: HttpClients,
    throttle: Arc<DomainThrottle>,
    discoverer: Discoverer,
    registry: tokio::sync::Mutex<SourceRegistry<B>>,
    store: tokio::sync::Mutex<EntryStore<B>>,
    blacklist: HashSet<String>,
    control: RunControl,
    /// Normalized links accepted so far in this run.
    seen: Mutex<HashSet<String>>,
}

impl<B: StateBackend> Aggregator<B> {
    pub fn new(
        settings: AggregatorSettings,
        clients: HttpClients,
        throttle: Arc<DomainThrottle>,
        discovery: DiscoveryOptions,
        registry: SourceRegistry<B>,
        store: EntryStore<B>,
        control: RunControl,
    ) -> Self {
        let discoverer = Discoverer::new(
            clients.clone(),
            Arc::clone(&throttle),
            discovery,
            control.clone(),
        );
        let blacklist = registry.blacklist().clone();

        Self {
            settings,
            clients,
            throttle,
            discoverer,
            registry: tokio::sync::Mutex::new(registry),
            store: tokio::sync::Mutex::new(store),
            blacklist,
            control,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Runs one aggregation pass against the non-blacklisted sources
    /// registered at call time.
    ///
    /// `now` anchors the recency window and stands in for missing
    /// timestamps. Source failures are logged and skipped; only storage
    /// failures abort the run. On early stop the accumulated state is still
    /// saved and returned.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunOutcome, StorageError> {
        let sources: Vec<String> = self
            .registry
            .lock()
            .await
            .sources()
            .iter()
            .filter(|source| {
                let banned = self.blacklist.contains(*source);
                if banned {
                    tracing::debug!(source = %source, "Skipping blacklisted source");
                }
                !banned
            })
            .cloned()
            .collect();
        tracing::info!(sources = sources.len(), keyword = %self.settings.keyword, "Starting run");

        let mut summary = RunSummary::default();
        let mut results = Vec::new();
        let mut completed = 0usize;

        let mut reports = stream::iter(sources)
            .map(|source| async move {
                let report = self.process_source(&source, now).await;
                (source, report)
            })
            .buffered(self.settings.concurrency.max(1));

        while let Some((source, report)) = reports.next().await {
            let report = report?;
            completed += 1;

            if report.interrupted {
                summary.stopped_early = true;
            } else if report.failed {
                summary.sources_failed += 1;
            } else {
                summary.sources_polled += 1;
            }
            summary.entries_seen += report.seen;
            summary.entries_accepted += report.accepted.len();
            summary.sources_discovered += report.discovered;

            tracing::debug!(
                source = %source,
                seen = report.seen,
                accepted = report.accepted.len(),
                discovered = report.discovered,
                "Source done"
            );
            results.extend(report.accepted);

            let interval = self.settings.checkpoint_interval;
            if interval > 0 && completed % interval == 0 {
                self.store.lock().await.save().await?;
                tracing::debug!(completed, "Checkpointed entry store");
            }
        }

        if self.control.is_stopped() {
            summary.stopped_early = true;
        }

        // Stable: equal timestamps keep registry and document order
        results.sort_by(|a, b| b.published_or(now).cmp(&a.published_or(now)));
        results.truncate(self.settings.output_cap);
        summary.entries_published = results.len();

        self.store.lock().await.save().await?;

        tracing::info!(
            sources_polled = summary.sources_polled,
            sources_failed = summary.sources_failed,
            entries_seen = summary.entries_seen,
            entries_accepted = summary.entries_accepted,
            entries_published = summary.entries_published,
            sources_discovered = summary.sources_discovered,
            stopped_early = summary.stopped_early,
            "Run complete"
        );

        Ok(RunOutcome {
            entries: results,
            summary,
        })
    }

    /// Polls one source and walks its entries in document order.
    async fn process_source(
        &self,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<SourceReport, StorageError> {
        let mut report = SourceReport::default();
        if self.control.is_stopped() {
            report.interrupted = true;
            return Ok(report);
        }

        let parsed = match fetch_feed(
            &self.clients.verified,
            &self.throttle,
            source,
            self.clients.timeout,
        )
        .await
        {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(source = %source, error = %e, "Failed to poll source");
                report.failed = true;
                return Ok(report);
            }
        };

        let cutoff = recency_cutoff(now, self.settings.recency_days);

        for entry in parsed.entries {
            if self.control.is_stopped() {
                report.interrupted = true;
                break;
            }
            report.seen += 1;
            self.store.lock().await.mark_processed(&entry.normalized_link);

            // Feeds are newest-first, so the first stale entry ends the source
            if cutoff.is_some_and(|cutoff| entry.published_or(now) < cutoff) {
                tracing::debug!(source = %source, link = %entry.link, "Reached stale entry");
                break;
            }

            let matched = entry.matches_keyword(&self.settings.keyword);
            let link = entry.link.clone();
            if matched && self.mark_seen(&entry.normalized_link) {
                self.store.lock().await.mark_indexed(&entry.normalized_link);
                report.accepted.push(entry);
            }

            let found = self.discoverer.discover(&link, &self.blacklist).await;
            if matched {
                report.discovered += self.register(found).await?;
            }

            if report.accepted.len() >= self.settings.per_source_cap {
                tracing::debug!(source = %source, cap = self.settings.per_source_cap, "Per-source cap reached");
                break;
            }
        }

        Ok(report)
    }

    /// Returns false if the identifier was already accepted this run.
    fn mark_seen(&self, normalized: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.insert(normalized.to_owned())
    }

    /// Adds discovered feeds that are neither known nor blacklisted.
    async fn register(&self, found: BTreeSet<String>) -> Result<usize, StorageError> {
        let mut added = 0;
        let mut registry = self.registry.lock().await;
        for url in found {
            if registry.is_blacklisted(&url) || registry.contains(&url) {
                continue;
            }
            if registry.add(&url).await? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Hands the registry and store back, e.g. for inspection after a run.
    pub fn into_state(self) -> (SourceRegistry<B>, EntryStore<B>) {
        (self.registry.into_inner(), self.store.into_inner())
    }
}

/// Oldest publication time still inside the recency window. `None` when the
/// window reaches past the earliest representable time, so nothing is stale.
fn recency_cutoff(now: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(i64::from(days)).and_then(|window| now.checked_sub_signed(window))
}
