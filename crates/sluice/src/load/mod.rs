//! Load stage: merge chunks into a target table.

mod conflict;
mod loader;
mod metrics;

pub use conflict::{ConflictAction, ConflictSpec, IfExists};
pub use loader::{LoadOutcome, MergeLoader, TableLocks};
pub use metrics::{ExecutionMetrics, ExecutionMetricsSnapshot};
