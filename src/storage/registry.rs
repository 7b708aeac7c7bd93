use std::collections::HashSet;

use super::backend::StateBackend;
use super::types::{StorageError, Table};

/// Feed URLs to poll plus the URLs that must never be polled or crawled.
///
/// Membership is exact string match. New sources are persisted the moment
/// they are added, so a crash mid-run keeps what discovery already found.
#[derive(Debug, Clone)]
pub struct SourceRegistry<B> {
    backend: B,
    sources: Vec<String>,
    known: HashSet<String>,
    blacklist: HashSet<String>,
}

impl<B: StateBackend> SourceRegistry<B> {
    pub async fn load(backend: B) -> Result<Self, StorageError> {
        let mut sources = Vec::new();
        let mut known = HashSet::new();
        for url in backend.load_lines(Table::Sources).await? {
            if known.insert(url.clone()) {
                sources.push(url);
            }
        }
        let blacklist: HashSet<String> = backend
            .load_lines(Table::Blacklist)
            .await?
            .into_iter()
            .collect();

        tracing::debug!(
            sources = sources.len(),
            blacklisted = blacklist.len(),
            "Loaded source registry"
        );

        Ok(Self {
            backend,
            sources,
            known,
            blacklist,
        })
    }

    /// Sources in registry order.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.known.contains(url)
    }

    pub fn is_blacklisted(&self, url: &str) -> bool {
        self.blacklist.contains(url)
    }

    pub fn blacklist(&self) -> &HashSet<String> {
        &self.blacklist
    }

    /// Adds `url` and persists it. Returns `false` without touching storage
    /// when the URL is already registered.
    pub async fn add(&mut self, url: &str) -> Result<bool, StorageError> {
        if self.known.contains(url) {
            return Ok(false);
        }
        self.backend.append_line(Table::Sources, url).await?;
        self.known.insert(url.to_owned());
        self.sources.push(url.to_owned());
        tracing::info!(source = %url, total = self.sources.len(), "Registered new source");
        Ok(true)
    }
}
