use std::collections::HashSet;

use super::backend::StateBackend;
use super::types::{StorageError, Table};

/// Normalized links seen (processed) and published (indexed) across runs.
///
/// Loaded once, mutated in memory, written back in full by [`save`].
///
/// [`save`]: EntryStore::save
#[derive(Debug, Clone)]
pub struct EntryStore<B> {
    backend: B,
    processed: HashSet<String>,
    indexed: HashSet<String>,
}

impl<B: StateBackend> EntryStore<B> {
    pub async fn load(backend: B) -> Result<Self, StorageError> {
        let processed: HashSet<String> = backend
            .load_lines(Table::Processed)
            .await?
            .into_iter()
            .collect();
        let indexed: HashSet<String> = backend
            .load_lines(Table::Indexed)
            .await?
            .into_iter()
            .collect();

        tracing::debug!(
            processed = processed.len(),
            indexed = indexed.len(),
            "Loaded entry store"
        );

        Ok(Self {
            backend,
            processed,
            indexed,
        })
    }

    /// Returns `true` if the identifier was not processed before.
    pub fn mark_processed(&mut self, id: &str) -> bool {
        self.processed.insert(id.to_owned())
    }

    /// Returns `true` if the identifier was not indexed before.
    pub fn mark_indexed(&mut self, id: &str) -> bool {
        self.indexed.insert(id.to_owned())
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.processed.contains(id)
    }

    pub fn is_indexed(&self, id: &str) -> bool {
        self.indexed.contains(id)
    }

    pub fn processed(&self) -> &HashSet<String> {
        &self.processed
    }

    pub fn indexed(&self) -> &HashSet<String> {
        &self.indexed
    }

    /// Overwrites both persisted sets with the in-memory contents.
    ///
    /// Lines are sorted so consecutive saves of the same set are identical.
    pub async fn save(&self) -> Result<(), StorageError> {
        self.backend
            .replace_lines(Table::Processed, &sorted(&self.processed))
            .await?;
        self.backend
            .replace_lines(Table::Indexed, &sorted(&self.indexed))
            .await?;
        tracing::debug!(
            processed = self.processed.len(),
            indexed = self.indexed.len(),
            "Saved entry store"
        );
        Ok(())
    }
}

fn sorted(set: &HashSet<String>) -> Vec<String> {
    let mut lines: Vec<String> = set.iter().cloned().collect();
    lines.sort();
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::{FileStore, StatePaths};
    use crate::storage::sqlite::SqliteStore;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_missing_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EntryStore::load(FileStore::new(StatePaths::in_dir(dir.path())))
            .await
            .unwrap();
        assert!(store.processed().is_empty());
        assert!(store.indexed().is_empty());
    }

    #[tokio::test]
    async fn test_mark_reports_novelty() {
        let backend = SqliteStore::open(":memory:").await.unwrap();
        let mut store = EntryStore::load(backend).await.unwrap();

        assert!(store.mark_processed("https://a.example/1"));
        assert!(!store.mark_processed("https://a.example/1"));
        assert!(store.mark_indexed("https://a.example/1"));
        assert!(store.is_processed("https://a.example/1"));
        assert!(store.is_indexed("https://a.example/1"));
        assert!(!store.is_indexed("https://a.example/2"));
    }

    #[tokio::test]
    async fn test_save_writes_sorted_lines() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StatePaths::in_dir(dir.path());
        std::fs::write(&paths.processed, "https://a.example/old\n").unwrap();

        let mut store = EntryStore::load(FileStore::new(paths.clone())).await.unwrap();
        store.mark_processed("https://c.example/x");
        store.mark_processed("https://b.example/y");
        store.mark_indexed("https://b.example/y");
        store.save().await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&paths.processed).unwrap(),
            "https://a.example/old\nhttps://b.example/y\nhttps://c.example/x\n"
        );
        assert_eq!(
            std::fs::read_to_string(&paths.indexed).unwrap(),
            "https://b.example/y\n"
        );
    }

    #[tokio::test]
    async fn test_save_then_reload() {
        let backend = SqliteStore::open(":memory:").await.unwrap();
        let mut store = EntryStore::load(backend.clone()).await.unwrap();
        store.mark_processed("https://a.example/1");
        store.mark_indexed("https://a.example/1");
        store.save().await.unwrap();

        let reloaded = EntryStore::load(backend).await.unwrap();
        assert_eq!(reloaded.processed(), store.processed());
        assert_eq!(reloaded.indexed(), store.indexed());
    }
}
