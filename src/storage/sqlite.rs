use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::backend::StateBackend;
use super::types::{StorageError, Table};

// ============================================================================
// SQLite State Store
// ============================================================================

/// All four tables in one SQLite database.
///
/// Rows are keyed by `(kind, value)`, so appending a line that is already
/// present is a no-op and insertion order is kept by the rowid.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the database at `path` (or `:memory:`) and run migrations.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path)
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
            {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::write(parent, e))?;
            }
        }

        // busy_timeout: wait for another process holding the lock instead of failing
        let options = SqliteConnectOptions::from_str(&url)?.pragma("busy_timeout", "5000");
        // One connection: the run is a single writer and `:memory:` is per-connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS state_lines (
                id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                value TEXT NOT NULL,
                UNIQUE(kind, value)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_state_lines_kind ON state_lines(kind, id)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Number of rows stored for `table`.
    pub async fn count(&self, table: Table) -> Result<i64, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM state_lines WHERE kind = ?")
            .bind(table.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

impl StateBackend for SqliteStore {
    async fn load_lines(&self, table: Table) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT value FROM state_lines WHERE kind = ? ORDER BY id")
                .bind(table.as_str())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(value,)| value).collect())
    }

    async fn append_line(&self, table: Table, line: &str) -> Result<(), StorageError> {
        sqlx::query("INSERT OR IGNORE INTO state_lines (kind, value) VALUES (?, ?)")
            .bind(table.as_str())
            .bind(line)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_lines(&self, table: Table, lines: &[String]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM state_lines WHERE kind = ?")
            .bind(table.as_str())
            .execute(&mut *tx)
            .await?;

        for line in lines {
            sqlx::query("INSERT OR IGNORE INTO state_lines (kind, value) VALUES (?, ?)")
                .bind(table.as_str())
                .bind(line)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
