//! Pipeline runner: one source, one target, strictly sequential.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span};

use crate::config::{Config, SourceKind};
use crate::core::{Backend, BackendRegistry, Table};
use crate::error::Result;
use crate::load::{ExecutionMetrics, MergeLoader};
use crate::source::{ApiSource, DatabaseSource, PipelineSource, SourceData, SourceMetrics};

/// Result of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Run identifier, also used in chunk file names.
    pub run_id: String,

    /// Fingerprint of the configuration that produced this run.
    pub config_hash: String,

    pub started_at: DateTime<Utc>,

    pub duration_seconds: f64,

    /// Chunks handed to the loader.
    pub chunks: usize,

    /// Rows produced by extraction.
    pub rows_extracted: u64,

    /// Rows handed to the loader.
    pub rows_processed: u64,

    pub inserted_rows: u64,

    pub updated_rows: u64,

    /// CSV files written while extracting.
    pub chunk_files: Vec<PathBuf>,
}

impl PipelineResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Connectivity report for source and target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
}

/// Extracts from the configured source and merges every chunk into the target.
pub struct Pipeline {
    config: Config,
    run_id: String,
    source: Box<dyn PipelineSource>,
    target: Arc<dyn Backend>,
    loader: MergeLoader,
}

impl Pipeline {
    /// Connect source and target through `registry`.
    pub async fn new(config: Config, registry: &BackendRegistry, run_id: impl Into<String>) -> Result<Self> {
        let run_id = run_id.into();
        let source_span = info_span!("source", run_id = %run_id, kind = %config.source.connection.r#type);

        let source: Box<dyn PipelineSource> = match config.source.kind()? {
            SourceKind::Api => Box::new(ApiSource::new(&config.source, &run_id, source_span)?),
            SourceKind::Database(_) => {
                let mut source = DatabaseSource::new(config.source.clone(), &run_id, source_span);
                source.configure(registry).await?;
                Box::new(source)
            }
        };
        let target = registry.connect(&config.target.connection).await?;

        Self::from_parts(config, run_id, source, target)
    }

    /// Assemble a pipeline from an already-built source and target session.
    pub fn from_parts(
        config: Config,
        run_id: impl Into<String>,
        source: Box<dyn PipelineSource>,
        target: Arc<dyn Backend>,
    ) -> Result<Self> {
        let run_id = run_id.into();
        let load_span = info_span!("load", run_id = %run_id, target = %config.target.full_name());
        let loader = MergeLoader::new(
            target.clone(),
            &config.target,
            &config.load,
            Arc::new(ExecutionMetrics::new()),
            load_span,
        )?;

        Ok(Self {
            config,
            run_id,
            source,
            target,
            loader,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn source(&self) -> &dyn PipelineSource {
        self.source.as_ref()
    }

    /// Extract and load every chunk.
    ///
    /// A failure stops the run. Batches merged before the failure stay in the
    /// target.
    pub async fn run(&mut self) -> Result<PipelineResult> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let config_hash = self.config.hash();
        info!(
            "Starting run {}: {} -> {} (config {})",
            self.run_id,
            self.source,
            self.config.target.full_name(),
            &config_hash[..12]
        );

        let source_metrics = self.source.metrics();
        let loader = &self.loader;
        let mut chunks = 0usize;

        match self.source.data().await? {
            SourceData::Empty => {}
            SourceData::Single(table) => {
                load_chunk(loader, table, &source_metrics).await?;
                chunks += 1;
            }
            SourceData::Sequence(tables) => {
                for table in tables.iter() {
                    load_chunk(loader, table, &source_metrics).await?;
                    chunks += 1;
                }
            }
            SourceData::Stream(stream) => {
                while let Some(table) = stream.next().await {
                    load_chunk(loader, &table?, &source_metrics).await?;
                    chunks += 1;
                }
            }
        }

        let totals = loader.metrics().snapshot();
        let result = PipelineResult {
            run_id: self.run_id.clone(),
            config_hash,
            started_at,
            duration_seconds: timer.elapsed().as_secs_f64(),
            chunks,
            rows_extracted: source_metrics.total_rows(),
            rows_processed: source_metrics.processed_rows(),
            inserted_rows: totals.inserted_rows,
            updated_rows: totals.updated_rows,
            chunk_files: self.source.chunk_files(),
        };
        info!(
            "Run {} finished in {:.2}s: {} rows in {} chunks ({} inserted, {} updated)",
            result.run_id,
            result.duration_seconds,
            result.rows_processed,
            result.chunks,
            result.inserted_rows,
            result.updated_rows
        );
        Ok(result)
    }

    /// Ping source and target. Failures are reported, not returned.
    pub async fn health_check(&self) -> HealthCheckResult {
        let timer = Instant::now();
        let source = self.source.ping().await;
        let source_latency_ms = timer.elapsed().as_millis() as u64;

        let timer = Instant::now();
        let target = self.target.ping().await;
        let target_latency_ms = timer.elapsed().as_millis() as u64;

        HealthCheckResult {
            healthy: source.is_ok() && target.is_ok(),
            source_connected: source.is_ok(),
            source_latency_ms,
            source_error: source.err().map(|e| e.to_string()),
            target_connected: target.is_ok(),
            target_latency_ms,
            target_error: target.err().map(|e| e.to_string()),
        }
    }

    /// Release source and target connections.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }
}

async fn load_chunk(loader: &MergeLoader, table: &Table, metrics: &SourceMetrics) -> Result<()> {
    loader.load(table).await?;
    metrics.add_processed(table.len());
    Ok(())
}
