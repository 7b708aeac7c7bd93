use super::types::{StorageError, Table};

/// Durable storage for the line collections in [`Table`].
///
/// The registry and the entry store only ever talk to this trait, so the
/// flat-file layout and the SQLite database are interchangeable.
#[allow(async_fn_in_trait)]
pub trait StateBackend: Clone {
    /// All lines of `table` in insertion order. A table that was never
    /// written is empty, not an error.
    async fn load_lines(&self, table: Table) -> Result<Vec<String>, StorageError>;

    /// Appends one line and makes it durable before returning.
    async fn append_line(&self, table: Table, line: &str) -> Result<(), StorageError>;

    /// Replaces the whole table with `lines`.
    async fn replace_lines(&self, table: Table, lines: &[String]) -> Result<(), StorageError>;
}
