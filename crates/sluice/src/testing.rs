//! In-memory backend for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::{Backend, BackendKind, ChunkStream, ColumnInfo, Dialect, Table};
use crate::error::{Result, SluiceError};

pub struct MockDialect;

impl Dialect for MockDialect {
    fn name(&self) -> &str {
        "mock"
    }
}

#[derive(Default)]
struct Recorded {
    queries: Vec<String>,
    statements: Vec<String>,
    commits: usize,
}

/// Backend answering scripted queries and recording everything it is sent.
pub struct MockBackend {
    kind: BackendKind,
    dialect: MockDialect,
    tables: HashMap<String, Table>,
    counts: Mutex<VecDeque<i64>>,
    affected: u64,
    fail_execute_at: Option<usize>,
    columns: Vec<ColumnInfo>,
    recorded: Mutex<Recorded>,
}

impl MockBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            dialect: MockDialect,
            tables: HashMap::new(),
            counts: Mutex::new(VecDeque::new()),
            affected: 0,
            fail_execute_at: None,
            columns: vec![ColumnInfo {
                name: "id".into(),
                data_type: "int8".into(),
                is_nullable: false,
                ordinal: 1,
            }],
            recorded: Mutex::new(Recorded::default()),
        }
    }

    /// Result returned for exactly this SQL text.
    pub fn with_table(mut self, sql: &str, table: Table) -> Self {
        self.tables.insert(sql.to_string(), table);
        self
    }

    /// Values returned by successive `count_rows` calls; the last one repeats.
    pub fn with_counts(self, counts: impl IntoIterator<Item = i64>) -> Self {
        *self.counts.lock().unwrap() = counts.into_iter().collect();
        self
    }

    /// Affected-row count reported by every `execute`.
    pub fn with_affected(mut self, affected: u64) -> Self {
        self.affected = affected;
        self
    }

    /// Fail the `n`th executed statement (0-based).
    pub fn failing_execute_at(mut self, n: usize) -> Self {
        self.fail_execute_at = Some(n);
        self
    }

    /// Report every table as absent.
    pub fn without_tables(mut self) -> Self {
        self.columns.clear();
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.recorded.lock().unwrap().queries.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.recorded.lock().unwrap().statements.clone()
    }

    pub fn commits(&self) -> usize {
        self.recorded.lock().unwrap().commits
    }

    fn scripted(&self, sql: &str) -> Result<Table> {
        self.recorded.lock().unwrap().queries.push(sql.to_string());
        self.tables
            .get(sql)
            .cloned()
            .ok_or_else(|| SluiceError::query(self.kind.as_str(), format!("no result for {sql}")))
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn query(&self, sql: &str) -> Result<Table> {
        self.scripted(sql)
    }

    async fn query_chunked(&self, sql: &str, chunk_size: usize) -> Result<ChunkStream> {
        let table = self.scripted(sql)?;
        let chunks = table
            .batches(chunk_size)
            .map(|rows| Table::from_rows(table.columns.clone(), rows.to_vec()))
            .collect::<Result<Vec<_>>>()?;
        Ok(ChunkStream::from_tables(chunks))
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut recorded = self.recorded.lock().unwrap();
        let index = recorded.statements.len();
        recorded.statements.push(sql.to_string());
        if self.fail_execute_at == Some(index) {
            return Err(SluiceError::query(self.kind.as_str(), "scripted failure"));
        }
        Ok(self.affected)
    }

    async fn commit(&self) -> Result<()> {
        self.recorded.lock().unwrap().commits += 1;
        Ok(())
    }

    async fn introspect_table(&self, _schema: &str, _table: &str) -> Result<Vec<ColumnInfo>> {
        Ok(self.columns.clone())
    }

    async fn count_rows(&self, _schema: &str, _table: &str) -> Result<i64> {
        let mut counts = self.counts.lock().unwrap();
        let count = if counts.len() > 1 {
            counts.pop_front()
        } else {
            counts.front().copied()
        };
        Ok(count.unwrap_or(0))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}
