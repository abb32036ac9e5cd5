//! Batched merge of in-memory tables into a target.
//!
//! Each call runs: fill missing values, count, one merge plan per batch,
//! commit, count again. The two counts bracket the writes, so the target is
//! locked for the whole call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, Instrument, Span};

use super::conflict::{ConflictSpec, IfExists};
use super::metrics::ExecutionMetrics;
use crate::config::{LoadConfig, TargetConfig};
use crate::core::{Backend, MergeRequest, Table};
use crate::error::{Result, SluiceError};

/// Per-target state guarded by the target's lock.
#[derive(Debug, Default)]
struct TargetState {
    /// `if_exists` was applied for this run.
    prepared: bool,
}

/// Write locks keyed by qualified target name.
#[derive(Debug, Default)]
pub struct TableLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<TargetState>>>>,
}

impl TableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, table: &str) -> Arc<tokio::sync::Mutex<TargetState>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(table.to_string()).or_default().clone()
    }
}

/// Result of one load call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub batches: usize,
    pub inserted: u64,
    pub updated: u64,
}

/// Merges tables into one target table.
pub struct MergeLoader {
    backend: Arc<dyn Backend>,
    schema: String,
    table: String,
    conflict: ConflictSpec,
    if_exists: IfExists,
    batch_size: usize,
    metrics: Arc<ExecutionMetrics>,
    locks: Arc<TableLocks>,
    span: Span,
}

impl MergeLoader {
    /// Create a loader. Fails when `update` is configured without a key.
    pub fn new(
        backend: Arc<dyn Backend>,
        target: &TargetConfig,
        load: &LoadConfig,
        metrics: Arc<ExecutionMetrics>,
        span: Span,
    ) -> Result<Self> {
        let conflict = load.conflict_spec();
        conflict.check_action(&target.full_name())?;

        Ok(Self {
            backend,
            schema: target.schema.clone(),
            table: target.table.clone(),
            conflict,
            if_exists: load.if_exists,
            batch_size: load.batch_size.max(1),
            metrics,
            locks: Arc::new(TableLocks::new()),
            span,
        })
    }

    /// Share write locks with other loaders of the same run.
    pub fn with_locks(mut self, locks: Arc<TableLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    pub fn metrics(&self) -> &Arc<ExecutionMetrics> {
        &self.metrics
    }

    /// Merge `data` into the target.
    ///
    /// Batches already executed stay applied when a later batch fails; the
    /// error carries the failing batch index.
    pub async fn load(&self, data: &Table) -> Result<LoadOutcome> {
        self.load_inner(data).instrument(self.span.clone()).await
    }

    async fn load_inner(&self, data: &Table) -> Result<LoadOutcome> {
        let name = self.full_name();
        self.conflict.check_action(&name)?;
        if data.is_empty() {
            debug!("Nothing to load into {}", name);
            return Ok(LoadOutcome::default());
        }
        self.conflict.validate(&name, &data.columns)?;

        let lock = self.locks.get(&name);
        let mut state = lock.lock().await;
        if !state.prepared {
            self.prepare_target(&name).await?;
            state.prepared = true;
        }

        let mut table = data.clone();
        let filled = table.fill_missing();
        if filled > 0 {
            debug!("Replaced {} missing values before loading {}", filled, name);
        }

        let before = self.backend.count_rows(&self.schema, &self.table).await?;
        let dialect = self.backend.dialect();

        let mut affected = 0u64;
        let mut batches = 0usize;
        for (index, rows) in table.batches(self.batch_size).enumerate() {
            let request = MergeRequest {
                schema: &self.schema,
                table: &self.table,
                columns: &table.columns,
                rows,
                conflict: &self.conflict,
            };
            let plan = dialect.build_merge(&request);
            affected += self
                .execute_plan(&plan.setup, &plan.merge, &plan.teardown)
                .await
                .map_err(|e| SluiceError::batch(&name, index, e))?;
            batches += 1;
            debug!("Batch {} of {}: {} rows", index, name, rows.len());
        }

        self.backend.commit().await?;
        let after = self.backend.count_rows(&self.schema, &self.table).await?;
        let (inserted, updated) = self.metrics.record(before, after, affected);

        info!(
            "Loaded {} rows into {} in {} batches ({} inserted, {} updated)",
            table.len(),
            name,
            batches,
            inserted,
            updated
        );
        Ok(LoadOutcome {
            batches,
            inserted,
            updated,
        })
    }

    async fn execute_plan(&self, setup: &[String], merge: &str, teardown: &[String]) -> Result<u64> {
        for sql in setup {
            self.backend.execute(sql).await?;
        }
        let affected = self.backend.execute(merge).await?;
        for sql in teardown {
            self.backend.execute(sql).await?;
        }
        Ok(affected)
    }

    async fn prepare_target(&self, name: &str) -> Result<()> {
        if !self.backend.table_exists(&self.schema, &self.table).await? {
            return Err(SluiceError::TargetMissing(name.to_string()));
        }

        match self.if_exists {
            IfExists::Append => {}
            IfExists::Fail => {
                let rows = self.backend.count_rows(&self.schema, &self.table).await?;
                if rows > 0 {
                    return Err(SluiceError::TargetNotEmpty {
                        table: name.to_string(),
                        rows,
                    });
                }
            }
            IfExists::Replace => {
                let dialect = self.backend.dialect();
                let sql = format!("DELETE FROM {}", dialect.qualify(&self.schema, &self.table));
                let removed = self.backend.execute(&sql).await?;
                info!("Removed {} existing rows from {}", removed, name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BackendKind, SqlNullType, SqlValue};
    use crate::load::ConflictAction;
    use crate::testing::MockBackend;

    fn target() -> TargetConfig {
        serde_yaml::from_str("type: postgres\nhost: dw\nusername: etl\ndatabase: dw\nschema: sales\ntable: orders\n")
            .unwrap()
    }

    fn load_config(key: &[&str], action: ConflictAction, batch_size: usize) -> LoadConfig {
        LoadConfig {
            conflict_key: key.iter().map(|k| k.to_string()).collect(),
            conflict_action: action,
            batch_size,
            ..Default::default()
        }
    }

    fn orders(n: i64) -> Table {
        Table::from_rows(
            vec!["id".into(), "status".into()],
            (0..n).map(|i| vec![SqlValue::I64(i), "open".into()]).collect(),
        )
        .unwrap()
    }

    fn loader(backend: Arc<MockBackend>, load: &LoadConfig) -> MergeLoader {
        MergeLoader::new(backend, &target(), load, Arc::new(ExecutionMetrics::new()), Span::none())
            .unwrap()
    }

    #[tokio::test]
    async fn test_batches_cover_every_row_once() {
        let backend = Arc::new(MockBackend::new(BackendKind::Postgres).with_counts([0, 25]));
        let loader = loader(backend.clone(), &load_config(&["id"], ConflictAction::Ignore, 10));

        let outcome = loader.load(&orders(25)).await.unwrap();
        assert_eq!(outcome.batches, 3);

        let statements = backend.statements();
        assert_eq!(statements.len(), 3);
        let mut seen = Vec::new();
        for sql in &statements {
            for i in 0..25 {
                if sql.contains(&format!("({}, 'open')", i)) {
                    seen.push(i);
                }
            }
        }
        assert_eq!(seen, (0..25).collect::<Vec<_>>());
        assert_eq!(backend.commits(), 1);
    }

    #[tokio::test]
    async fn test_all_matching_rows_count_as_updates() {
        let backend = Arc::new(
            MockBackend::new(BackendKind::Postgres)
                .with_counts([100, 100])
                .with_affected(10),
        );
        let loader = loader(backend, &load_config(&["id"], ConflictAction::Update, 1000));

        let outcome = loader.load(&orders(10)).await.unwrap();
        assert_eq!((outcome.inserted, outcome.updated), (0, 10));
        assert_eq!(loader.metrics().updated_rows(), 10);
    }

    #[tokio::test]
    async fn test_growth_counts_as_inserts() {
        let backend = Arc::new(
            MockBackend::new(BackendKind::Postgres)
                .with_counts([100, 105])
                .with_affected(5),
        );
        let loader = loader(backend, &load_config(&["id"], ConflictAction::Ignore, 1000));

        let outcome = loader.load(&orders(5)).await.unwrap();
        assert_eq!((outcome.inserted, outcome.updated), (5, 0));
    }

    #[tokio::test]
    async fn test_metrics_accumulate_across_calls() {
        let backend = Arc::new(
            MockBackend::new(BackendKind::Postgres)
                .with_counts([0, 3, 3, 6])
                .with_affected(3),
        );
        let loader = loader(backend, &load_config(&["id"], ConflictAction::Ignore, 1000));
        loader.load(&orders(3)).await.unwrap();
        loader.load(&orders(3)).await.unwrap();
        assert_eq!(loader.metrics().inserted_rows(), 6);
    }

    #[test]
    fn test_update_without_key_rejected_at_construction() {
        let backend = Arc::new(MockBackend::new(BackendKind::Postgres));
        let result = MergeLoader::new(
            backend.clone(),
            &target(),
            &load_config(&[], ConflictAction::Update, 1000),
            Arc::new(ExecutionMetrics::new()),
            Span::none(),
        );
        assert!(matches!(
            result.err().unwrap(),
            SluiceError::ConflictKeyRequired { .. }
        ));
        assert!(backend.statements().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_column_fails_before_write() {
        let backend = Arc::new(MockBackend::new(BackendKind::Postgres));
        let loader = loader(backend.clone(), &load_config(&["order_id"], ConflictAction::Update, 1000));
        assert!(matches!(
            loader.load(&orders(2)).await,
            Err(SluiceError::Config(_))
        ));
        assert!(backend.statements().is_empty());
    }

    #[tokio::test]
    async fn test_batch_failure_reports_index_and_keeps_earlier_batches() {
        let backend = Arc::new(
            MockBackend::new(BackendKind::Postgres)
                .with_counts([0])
                .failing_execute_at(1),
        );
        let loader = loader(backend.clone(), &load_config(&["id"], ConflictAction::Ignore, 2));

        let err = loader.load(&orders(5)).await.unwrap_err();
        match err {
            SluiceError::Batch {
                table, batch_index, ..
            } => {
                assert_eq!(table, "sales.orders");
                assert_eq!(batch_index, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        // The first batch ran, the third never did, nothing was committed.
        assert_eq!(backend.statements().len(), 2);
        assert_eq!(backend.commits(), 0);
    }

    #[tokio::test]
    async fn test_missing_values_are_filled() {
        let backend = Arc::new(MockBackend::new(BackendKind::Postgres));
        let loader = loader(backend.clone(), &load_config(&[], ConflictAction::Ignore, 1000));
        let table = Table::from_rows(
            vec!["id".into(), "status".into()],
            vec![vec![SqlValue::I64(1), SqlValue::Null(SqlNullType::String)]],
        )
        .unwrap();

        loader.load(&table).await.unwrap();
        let sql = &backend.statements()[0];
        assert!(sql.starts_with("INSERT INTO \"sales\".\"orders\""));
        assert!(sql.contains("(1, '0')"));
    }

    #[tokio::test]
    async fn test_missing_target() {
        let backend = Arc::new(MockBackend::new(BackendKind::Postgres).without_tables());
        let loader = loader(backend, &load_config(&["id"], ConflictAction::Ignore, 1000));
        assert!(matches!(
            loader.load(&orders(1)).await,
            Err(SluiceError::TargetMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_replace_deletes_once_per_run() {
        let backend = Arc::new(MockBackend::new(BackendKind::Postgres));
        let mut load = load_config(&["id"], ConflictAction::Ignore, 1000);
        load.if_exists = IfExists::Replace;
        let loader = loader(backend.clone(), &load);

        loader.load(&orders(1)).await.unwrap();
        loader.load(&orders(1)).await.unwrap();
        let deletes = backend
            .statements()
            .iter()
            .filter(|s| s.starts_with("DELETE FROM \"sales\".\"orders\""))
            .count();
        assert_eq!(deletes, 1);
    }

    #[tokio::test]
    async fn test_fail_mode_rejects_non_empty_target() {
        let backend = Arc::new(MockBackend::new(BackendKind::Postgres).with_counts([7]));
        let mut load = load_config(&[], ConflictAction::Ignore, 1000);
        load.if_exists = IfExists::Fail;
        let loader = loader(backend.clone(), &load);

        assert!(matches!(
            loader.load(&orders(1)).await,
            Err(SluiceError::TargetNotEmpty { rows: 7, .. })
        ));
        assert!(backend.statements().is_empty());
    }

    #[tokio::test]
    async fn test_empty_table_is_noop() {
        let backend = Arc::new(MockBackend::new(BackendKind::Postgres));
        let loader = loader(backend.clone(), &load_config(&["id"], ConflictAction::Update, 1000));
        assert_eq!(loader.load(&Table::default()).await.unwrap(), LoadOutcome::default());
        assert_eq!(backend.commits(), 0);
    }
}
