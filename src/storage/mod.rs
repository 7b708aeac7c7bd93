//! Cross-run state: the source registry and the processed/indexed entry sets.
//!
//! Both sit on a [`StateBackend`], either line-delimited files or SQLite.

mod backend;
mod entries;
pub mod file;
mod registry;
pub mod sqlite;
mod types;

pub use backend::StateBackend;
pub use entries::EntryStore;
pub use file::{FileStore, StatePaths};
pub use registry::SourceRegistry;
pub use sqlite::SqliteStore;
pub use types::{StorageError, Table};
