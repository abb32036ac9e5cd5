//! Run-wide load counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Inserted/updated counts, cumulative across every load call of a run.
///
/// Shared by `Arc` between loaders; increments are atomic.
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    inserted_rows: AtomicU64,
    updated_rows: AtomicU64,
}

/// Point-in-time copy of [`ExecutionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionMetricsSnapshot {
    pub inserted_rows: u64,
    pub updated_rows: u64,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile one load call and add it to the totals.
    ///
    /// Inserted rows are the growth of the target (`after - before`). When the
    /// table did not grow but statements affected rows, all of them count as
    /// updates. A call that inserts and updates in the same batch is reported
    /// as inserts only. Returns the `(inserted, updated)` pair of this call.
    pub fn record(&self, before: i64, after: i64, affected: u64) -> (u64, u64) {
        let inserted = after.saturating_sub(before).max(0) as u64;
        let updated = if inserted == 0 { affected } else { 0 };

        self.inserted_rows.fetch_add(inserted, Ordering::Relaxed);
        self.updated_rows.fetch_add(updated, Ordering::Relaxed);
        (inserted, updated)
    }

    pub fn inserted_rows(&self) -> u64 {
        self.inserted_rows.load(Ordering::Relaxed)
    }

    pub fn updated_rows(&self) -> u64 {
        self.updated_rows.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        ExecutionMetricsSnapshot {
            inserted_rows: self.inserted_rows(),
            updated_rows: self.updated_rows(),
        }
    }
}
