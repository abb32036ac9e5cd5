//! # sluice
//!
//! Configuration-driven extract/load pipelines into a data warehouse.
//!
//! A pipeline reads rows from one source and merges them into one target
//! table:
//!
//! - **Database sources** extracted iteratively, in cursor chunks, or in full
//! - **API sources** with OAuth2 client-credentials or API-key auth
//! - **Merge loading** with insert-or-ignore / insert-or-update semantics
//! - **Backends** for PostgreSQL, Redshift and (feature `db2`) IBM DB2
//!
//! ## Example
//!
//! ```rust,no_run
//! use sluice::{BackendRegistry, Config, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> sluice::Result<()> {
//!     let config = Config::load("pipeline.yaml")?;
//!     let registry = BackendRegistry::with_builtins();
//!     let mut pipeline = Pipeline::new(config, &registry, "run-1").await?;
//!     let result = pipeline.run().await?;
//!     println!("Loaded {} rows", result.rows_processed);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod load;
pub mod pipeline;
pub mod source;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use crate::config::{Config, LoadConfig, SourceConfig, TargetConfig};
pub use crate::core::{Backend, BackendKind, BackendRegistry, Dialect, SqlValue, Table};
pub use error::{Result, SluiceError};
pub use load::{ConflictAction, IfExists, MergeLoader};
pub use pipeline::{HealthCheckResult, Pipeline, PipelineResult};
pub use source::{ApiSource, DatabaseSource, PipelineSource, SourceData};
