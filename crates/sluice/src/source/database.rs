//! Database source: iterative, chunked and full extraction.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info, Instrument, Span};

use super::query::{self, QuerySet};
use super::sink::ChunkSink;
use super::{PipelineSource, SourceData, SourceMetrics};
use crate::config::SourceConfig;
use crate::core::{Backend, BackendRegistry, Table};
use crate::error::{Result, SluiceError};

/// Extraction strategy, picked from the configuration shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// An `iterate` role is configured: one templated `extract` per iteration row.
    Iterative,
    /// Positive `chunk_size` and no `iterate` role: a streaming cursor.
    Chunked(usize),
    /// Everything else: one query, one table.
    Full,
}

/// A source reading from a SQL backend.
pub struct DatabaseSource {
    config: SourceConfig,
    backend: Option<Arc<dyn Backend>>,
    data: SourceData,
    metrics: Arc<SourceMetrics>,
    sink: Option<Arc<Mutex<ChunkSink>>>,
    span: Span,
}

impl DatabaseSource {
    /// Create an unconfigured source. Call [`configure`](Self::configure)
    /// before reading data.
    pub fn new(config: SourceConfig, run_id: &str, span: Span) -> Self {
        let sink = config
            .dump_data_csv
            .then(|| Arc::new(Mutex::new(ChunkSink::in_working_dir(run_id))));
        Self {
            config,
            backend: None,
            data: SourceData::Empty,
            metrics: Arc::new(SourceMetrics::new()),
            sink,
            span,
        }
    }

    /// Write chunk files into `dir` instead of the working directory.
    ///
    /// Only has an effect when `dump_data_csv` is enabled.
    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>, run_id: &str) -> Self {
        if self.sink.is_some() {
            self.sink = Some(Arc::new(Mutex::new(ChunkSink::new(dir, run_id))));
        }
        self
    }

    /// Use an already-connected backend.
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Connect to the configured backend.
    pub async fn configure(&mut self, registry: &BackendRegistry) -> Result<()> {
        let backend = registry
            .connect(&self.config.connection)
            .instrument(self.span.clone())
            .await?;
        self.backend = Some(backend);
        Ok(())
    }

    pub fn queries(&self) -> &QuerySet {
        &self.config.queries
    }

    /// The strategy [`extract`](PipelineSource::extract) will use.
    pub fn strategy(&self) -> Strategy {
        if self.config.queries.contains("iterate") {
            Strategy::Iterative
        } else if let Some(size) = self.config.chunking() {
            Strategy::Chunked(size)
        } else {
            Strategy::Full
        }
    }

    fn backend(&self) -> Result<Arc<dyn Backend>> {
        self.backend
            .clone()
            .ok_or_else(|| SluiceError::InvalidState("source is not configured".into()))
    }

    async fn extract_by_iteration(&mut self) -> Result<()> {
        let backend = self.backend()?;
        let iterate_sql = self.config.queries.get_query("iterate")?;
        let template = self.config.queries.sql("extract")?.to_string();

        let iterations = backend.query(&iterate_sql).await?;
        info!("Extract by iteration: {} iteration rows", iterations.len());

        let mut chunks = Vec::with_capacity(iterations.len());
        let outcome = self
            .collect_iterations(backend.as_ref(), &iterations, &template, &mut chunks)
            .await;
        // Chunks collected before a failing iteration stay cached.
        self.data = SourceData::Sequence(chunks);
        outcome
    }

    async fn collect_iterations(
        &self,
        backend: &dyn Backend,
        iterations: &Table,
        template: &str,
        chunks: &mut Vec<Table>,
    ) -> Result<()> {
        let static_params = self.config.queries.params("extract").unwrap_or_default();

        for i in 0..iterations.len() {
            let mut params = static_params.clone();
            params.extend(iterations.row_as_params(i).unwrap_or_default());

            let sql = query::render("extract", template, &params)?;
            debug!("Iteration {}: {}", i + 1, sql);

            let chunk = backend.query(&sql).await?;
            self.metrics.add_total(chunk.len());
            if let Some(sink) = &self.sink {
                lock_sink(sink)?.write_slice(i + 1, &chunk)?;
            }
            chunks.push(chunk);
        }
        Ok(())
    }

    async fn extract_chunked(&mut self, chunk_size: usize) -> Result<()> {
        let backend = self.backend()?;
        let sql = self.config.queries.get_query("extract")?;
        info!("Extract in chunks of {} rows", chunk_size);

        let metrics = self.metrics.clone();
        let sink = self.sink.clone();
        let mut index = 0usize;
        let stream = backend
            .query_chunked(&sql, chunk_size)
            .await?
            .inspect(move |chunk| {
                index += 1;
                metrics.add_total(chunk.len());
                debug!("Pulled chunk {} ({} rows)", index, chunk.len());
                if let Some(sink) = &sink {
                    lock_sink(sink)?.write_slice(index, chunk)?;
                }
                Ok(())
            });

        self.data = SourceData::Stream(stream);
        Ok(())
    }

    async fn extract_full(&mut self) -> Result<()> {
        let backend = self.backend()?;
        let sql = self.config.queries.get_query("extract")?;

        let table = backend.query(&sql).await?;
        info!("Full extract: {} rows", table.len());
        self.metrics.add_total(table.len());
        if let Some(sink) = &self.sink {
            lock_sink(sink)?.write_full(&table)?;
        }

        self.data = SourceData::Single(table);
        Ok(())
    }
}

fn lock_sink(sink: &Mutex<ChunkSink>) -> Result<std::sync::MutexGuard<'_, ChunkSink>> {
    sink.lock()
        .map_err(|_| SluiceError::InvalidState("chunk sink lock poisoned".into()))
}

#[async_trait]
impl PipelineSource for DatabaseSource {
    async fn extract(&mut self) -> Result<()> {
        let span = self.span.clone();
        async move {
            match self.strategy() {
                Strategy::Iterative => self.extract_by_iteration().await,
                Strategy::Chunked(size) => self.extract_chunked(size).await,
                Strategy::Full => self.extract_full().await,
            }
        }
        .instrument(span)
        .await
    }

    fn cached(&self) -> &SourceData {
        &self.data
    }

    fn cached_mut(&mut self) -> &mut SourceData {
        &mut self.data
    }

    fn metrics(&self) -> Arc<SourceMetrics> {
        self.metrics.clone()
    }

    fn chunk_files(&self) -> Vec<PathBuf> {
        self.sink
            .as_ref()
            .and_then(|sink| sink.lock().ok().map(|s| s.written_files().to_vec()))
            .unwrap_or_default()
    }

    async fn ping(&self) -> Result<()> {
        self.backend()?.ping().await
    }

    async fn close(&self) {
        if let Some(backend) = &self.backend {
            backend.close().await;
        }
    }
}

impl fmt::Display for DatabaseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conn = &self.config.connection;
        write!(
            f,
            "{}://{}@{}:{}/{} (password: [REDACTED], queries: {})",
            conn.r#type,
            conn.username,
            conn.host,
            conn.port.map(|p| p.to_string()).unwrap_or_else(|| "default".into()),
            conn.database,
            self.config.queries.roles().collect::<Vec<_>>().join(", ")
        )
    }
}
