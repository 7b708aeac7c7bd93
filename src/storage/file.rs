use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::backend::StateBackend;
use super::types::{StorageError, Table};

/// Where each table lives on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct StatePaths {
    pub sources: PathBuf,
    pub blacklist: PathBuf,
    pub processed: PathBuf,
    pub indexed: PathBuf,
}

impl StatePaths {
    /// The conventional file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            sources: dir.join("feed_urls.txt"),
            blacklist: dir.join("blacklist.txt"),
            processed: dir.join("processed_entries.txt"),
            indexed: dir.join("indexed_entries.txt"),
        }
    }
}

/// Line-delimited text files, one per table.
///
/// Blank lines and lines starting with `#` are ignored when reading, so the
/// hand-edited input files can carry comments.
#[derive(Debug, Clone)]
pub struct FileStore {
    paths: StatePaths,
}

impl FileStore {
    pub fn new(paths: StatePaths) -> Self {
        Self { paths }
    }

    pub fn path(&self, table: Table) -> &Path {
        match table {
            Table::Sources => &self.paths.sources,
            Table::Blacklist => &self.paths.blacklist,
            Table::Processed => &self.paths.processed,
            Table::Indexed => &self.paths.indexed,
        }
    }
}

/// Splits file content into trimmed lines, dropping blanks and comments.
pub fn parse_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

/// Splits file content into records exactly as written, dropping only empty
/// lines.
pub fn parse_records(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Reads a line file that must exist.
pub async fn read_input_lines(path: &Path) -> Result<Vec<String>, StorageError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| StorageError::read(path, e))?;
    Ok(parse_lines(&content))
}

impl StateBackend for FileStore {
    async fn load_lines(&self, table: Table) -> Result<Vec<String>, StorageError> {
        let path = self.path(table);
        match tokio::fs::read_to_string(path).await {
            Ok(content) if table.is_hand_edited() => Ok(parse_lines(&content)),
            Ok(content) => Ok(parse_records(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), table = %table, "State file missing, starting empty");
                Ok(Vec::new())
            }
            Err(e) => Err(StorageError::read(path, e)),
        }
    }

    async fn append_line(&self, table: Table, line: &str) -> Result<(), StorageError> {
        let path = self.path(table);
        ensure_parent_dir(path).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| StorageError::write(path, e))?;

        // A hand-edited file may lack a trailing newline
        let len = file
            .metadata()
            .await
            .map_err(|e| StorageError::read(path, e))?
            .len();
        let mut record = String::with_capacity(line.len() + 2);
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1))
                .await
                .map_err(|e| StorageError::read(path, e))?;
            file.read_exact(&mut last)
                .await
                .map_err(|e| StorageError::read(path, e))?;
            if last[0] != b'\n' {
                record.push('\n');
            }
        }
        record.push_str(line);
        record.push('\n');

        file.write_all(record.as_bytes())
            .await
            .map_err(|e| StorageError::write(path, e))?;
        file.sync_data()
            .await
            .map_err(|e| StorageError::write(path, e))?;
        Ok(())
    }

    async fn replace_lines(&self, table: Table, lines: &[String]) -> Result<(), StorageError> {
        let path = self.path(table);
        ensure_parent_dir(path).await?;

        let mut content = String::new();
        for line in lines {
            content.push_str(line);
            content.push('\n');
        }

        // Write-then-rename so a crash never leaves a truncated set behind
        let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));
        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| StorageError::write(&temp_path, e))?;
        if let Err(e) = file.write_all(content.as_bytes()).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StorageError::write(&temp_path, e));
        }
        if let Err(e) = file.sync_all().await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StorageError::write(&temp_path, e));
        }
        drop(file);

        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StorageError::write(path, e));
        }
        Ok(())
    }
}

async fn ensure_parent_dir(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::write(parent, e))?;
    }
    Ok(())
}
