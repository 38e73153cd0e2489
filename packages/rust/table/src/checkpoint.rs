//! Incremental output writes after each completed batch.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use table_enrich_shared::{EnrichError, Result, Table};

use crate::{write_atomic, write_rows};

/// How the output file is updated after a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    /// Rewrite the whole completed prefix through a temp file + rename.
    #[default]
    Replace,
    /// Truncate on the first batch, then append each later batch's rows.
    Append,
}

impl std::str::FromStr for CheckpointMode {
    type Err = EnrichError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            other => Err(EnrichError::validation(format!(
                "unknown checkpoint mode `{other}` (expected `replace` or `append`)"
            ))),
        }
    }
}

/// Tracks what has been persisted to the output file so far.
///
/// Only the orchestrator owns a `Checkpoint`; row tasks never write.
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    mode: CheckpointMode,
    rows_written: usize,
    commits: usize,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>, mode: CheckpointMode) -> Self {
        Self {
            path: path.into(),
            mode,
            rows_written: 0,
            commits: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of rows currently on disk.
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Number of successful commits.
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Persist `table.rows()[..upto]`, the prefix of fully processed rows.
    ///
    /// `upto` must never move backwards between commits.
    pub fn commit(&mut self, table: &Table, upto: usize) -> Result<()> {
        if upto < self.rows_written || upto > table.len() {
            return Err(EnrichError::validation(format!(
                "checkpoint range 0..{upto} is invalid (written {}, table has {} rows)",
                self.rows_written,
                table.len()
            )));
        }

        match self.mode {
            CheckpointMode::Replace => write_atomic(&self.path, table, &table.rows()[..upto])?,
            CheckpointMode::Append => self.append(table, upto)?,
        }

        debug!(
            path = %self.path.display(),
            rows = upto,
            new_rows = upto - self.rows_written,
            mode = ?self.mode,
            "checkpoint committed"
        );

        self.rows_written = upto;
        self.commits += 1;
        Ok(())
    }

    fn append(&self, table: &Table, upto: usize) -> Result<()> {
        let first = self.commits == 0;
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| EnrichError::io(dir, e))?;
        }

        let mut options = OpenOptions::new();
        if first {
            options.write(true).create(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options
            .open(&self.path)
            .map_err(|e| EnrichError::io(&self.path, e))?;

        // The writer and file are dropped (closed) on every return path.
        let file = write_rows(file, table, &table.rows()[self.rows_written..upto], first)?;
        file.sync_all().map_err(|e| EnrichError::io(&self.path, e))
    }
}
