use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Persistence failures. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Write {
            path: path.into(),
            source,
        }
    }
}

// ============================================================================
// Tables
// ============================================================================

/// The four line collections that survive between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Feed URLs to poll, in registry order
    Sources,
    /// URLs excluded from polling and discovery
    Blacklist,
    /// Normalized links of every entry ever seen
    Processed,
    /// Normalized links of every entry ever accepted for output
    Indexed,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Sources,
        Table::Blacklist,
        Table::Processed,
        Table::Indexed,
    ];

    /// Operator-maintained inputs, where blank lines and `#` comments are
    /// allowed. The entry sets hold identifiers verbatim.
    pub fn is_hand_edited(self) -> bool {
        matches!(self, Table::Sources | Table::Blacklist)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Table::Sources => "sources",
            Table::Blacklist => "blacklist",
            Table::Processed => "processed",
            Table::Indexed => "indexed",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
