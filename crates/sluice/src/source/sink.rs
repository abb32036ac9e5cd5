//! CSV dump of extracted chunks.
//!
//! Files are a side effect only: nothing reads them back, and the source
//! cache does not dedupe them if extraction runs again.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::Table;
use crate::error::Result;

/// Writes chunks as `slice_<NNNNN>_<run-id>.csv` / `slice_FULL_<run-id>.csv`.
#[derive(Debug, Clone)]
pub struct ChunkSink {
    dir: PathBuf,
    run_id: String,
    written: Vec<PathBuf>,
}

impl ChunkSink {
    pub fn new(dir: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            run_id: run_id.into(),
            written: Vec::new(),
        }
    }

    /// Sink writing into the process working directory.
    pub fn in_working_dir(run_id: impl Into<String>) -> Self {
        Self::new(".", run_id)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write chunk number `index` (1-based) of an iterative or chunked extraction.
    pub fn write_slice(&mut self, index: usize, table: &Table) -> Result<PathBuf> {
        let name = format!("slice_{:05}_{}.csv", index, self.run_id);
        self.write(name, table)
    }

    /// Write the single result of a full extraction.
    pub fn write_full(&mut self, table: &Table) -> Result<PathBuf> {
        let name = format!("slice_FULL_{}.csv", self.run_id);
        self.write(name, table)
    }

    /// Every path written so far, in write order.
    pub fn written_files(&self) -> &[PathBuf] {
        &self.written
    }

    fn write(&mut self, name: String, table: &Table) -> Result<PathBuf> {
        let path = self.dir.join(name);
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(&table.columns)?;
        for row in &table.rows {
            writer.write_record(row.iter().map(|v| v.to_text()))?;
        }
        writer.flush()?;

        debug!("Wrote {} rows to {}", table.len(), path.display());
        self.written.push(path.clone());
        Ok(path)
    }
}
