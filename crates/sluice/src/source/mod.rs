//! Pipeline sources.
//!
//! A source extracts one or many chunks on first access to its data and keeps
//! them for the rest of the run:
//!
//! - [`DatabaseSource`]: iterative, chunked or full extraction through a [`Backend`](crate::core::Backend)
//! - [`ApiSource`]: one HTTP request decoded into a single table

mod api;
mod database;
pub mod query;
mod sink;

pub use api::ApiSource;
pub use database::{DatabaseSource, Strategy};
pub use query::{QueryEntry, QuerySet};
pub use sink::ChunkSink;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::{ChunkStream, Table};
use crate::error::{Result, SluiceError};

/// What a source currently holds.
#[derive(Debug, Default)]
pub enum SourceData {
    /// Nothing extracted yet.
    #[default]
    Empty,
    /// Full extraction or API response.
    Single(Table),
    /// One chunk per iteration row, in iteration order.
    Sequence(Vec<Table>),
    /// Open cursor; chunks are pulled by the consumer.
    Stream(ChunkStream),
}

impl SourceData {
    /// Whether the accessor should (re-)extract.
    ///
    /// A stream that has already been drained cannot be served again and is
    /// reported as an invalid state.
    pub fn is_empty(&self) -> Result<bool> {
        match self {
            SourceData::Empty => Ok(true),
            SourceData::Single(table) => Ok(table.is_empty()),
            SourceData::Sequence(chunks) => Ok(chunks.is_empty()),
            SourceData::Stream(stream) if stream.is_exhausted() => Err(SluiceError::InvalidState(
                "chunk stream was already consumed".into(),
            )),
            SourceData::Stream(_) => Ok(false),
        }
    }

    /// Row count of materialized data; `None` for streams.
    pub fn materialized_rows(&self) -> Option<usize> {
        match self {
            SourceData::Empty => Some(0),
            SourceData::Single(table) => Some(table.len()),
            SourceData::Sequence(chunks) => Some(chunks.iter().map(Table::len).sum()),
            SourceData::Stream(_) => None,
        }
    }
}

/// Row counters of a source.
#[derive(Debug, Default)]
pub struct SourceMetrics {
    /// Rows produced by extraction.
    total_rows: AtomicU64,
    /// Rows handed to the load stage.
    processed_rows: AtomicU64,
}

/// Point-in-time copy of [`SourceMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceMetricsSnapshot {
    pub total_rows: u64,
    pub processed_rows: u64,
}

impl SourceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_total(&self, rows: usize) {
        self.total_rows.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn add_processed(&self, rows: usize) {
        self.processed_rows.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn total_rows(&self) -> u64 {
        self.total_rows.load(Ordering::Relaxed)
    }

    pub fn processed_rows(&self) -> u64 {
        self.processed_rows.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SourceMetricsSnapshot {
        SourceMetricsSnapshot {
            total_rows: self.total_rows(),
            processed_rows: self.processed_rows(),
        }
    }
}

/// A source of tabular data with a lazily populated cache.
#[async_trait]
pub trait PipelineSource: Send + Sync + fmt::Display {
    /// Run the extraction strategy and store its result in the cache.
    async fn extract(&mut self) -> Result<()>;

    /// The cache, as it stands.
    fn cached(&self) -> &SourceData;

    fn cached_mut(&mut self) -> &mut SourceData;

    /// Shared row counters.
    fn metrics(&self) -> Arc<SourceMetrics>;

    /// Chunk files written so far.
    fn chunk_files(&self) -> Vec<PathBuf>;

    /// Check the source is reachable.
    async fn ping(&self) -> Result<()>;

    /// Release connections.
    async fn close(&self) {}

    /// The source's data, extracted on first use.
    ///
    /// Non-empty data is returned as is. Empty data triggers exactly one
    /// extraction whose result is stored even when it is empty, so a source
    /// whose query legitimately returns nothing extracts again on every call.
    async fn data(&mut self) -> Result<&mut SourceData> {
        if !self.cached().is_empty()? {
            return Ok(self.cached_mut());
        }
        self.extract().await?;
        Ok(self.cached_mut())
    }
}
