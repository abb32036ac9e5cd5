//! Core traits for backend-agnostic extraction and loading.
//!
//! - [`Backend`]: a live session to one warehouse (query, execute, introspect, count)
//! - [`Dialect`]: SQL syntax strategy (quoting, literals, merge statements)

use async_trait::async_trait;

use crate::error::Result;

use super::merge::{merge_statement, MergePlan, MergeRequest};
use super::registry::BackendKind;
use super::table::{ChunkStream, Table};
use super::value::SqlValue;

/// Column metadata reported by [`Backend::introspect_table`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Backend type name, lowercased.
    pub data_type: String,
    pub is_nullable: bool,
    /// 1-based position.
    pub ordinal: i32,
}

/// A live session to one SQL backend.
///
/// One source or target owns exactly one backend for the whole run; every
/// extraction query and every merge batch goes through it.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The kind tag this backend was constructed for.
    fn kind(&self) -> BackendKind;

    /// SQL syntax used to build statements for this backend.
    fn dialect(&self) -> &dyn Dialect;

    /// Run a query and materialize the whole result.
    async fn query(&self, sql: &str) -> Result<Table>;

    /// Run a query as a streaming cursor yielding chunks of `chunk_size` rows.
    ///
    /// The reader runs in a spawned task and reads at most one chunk ahead.
    async fn query_chunked(&self, sql: &str, chunk_size: usize) -> Result<ChunkStream>;

    /// Execute a statement, returning the affected row count.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Commit pending work. A no-op for autocommit backends.
    async fn commit(&self) -> Result<()>;

    /// Column list of a table, in ordinal order. Empty when the table is absent.
    async fn introspect_table(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Check if a table exists.
    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        Ok(!self.introspect_table(schema, table).await?.is_empty())
    }

    /// Exact row count of a table.
    async fn count_rows(&self, schema: &str, table: &str) -> Result<i64>;

    /// Round-trip a trivial statement.
    async fn ping(&self) -> Result<()>;

    /// Release the connection.
    async fn close(&self);
}

/// SQL syntax strategy for different backends.
///
/// Only true dialect divergence lives here; everything else builds on the
/// generic statements in [`super::merge`].
pub trait Dialect: Send + Sync {
    /// Dialect identifier (e.g., "postgres", "db2").
    fn name(&self) -> &str;

    /// Quote an identifier (table name, column name, etc.).
    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// `schema.table`, quoted.
    fn qualify(&self, schema: &str, table: &str) -> String {
        format!("{}.{}", self.quote_ident(schema), self.quote_ident(table))
    }

    /// Render a value as an inline SQL literal.
    fn render_literal(&self, value: &SqlValue) -> String {
        standard_literal(value)
    }

    /// Build the statements that merge one batch into the target.
    ///
    /// The default is a single multi-row `MERGE ... USING (VALUES ...)`.
    fn build_merge(&self, req: &MergeRequest<'_>) -> MergePlan {
        MergePlan::single(merge_statement(self, req))
    }
}

/// ANSI literal for a value; dialects fall back to this for types they do
/// not special-case.
pub fn standard_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null(_) => "NULL".to_string(),
        SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        SqlValue::I64(i) => i.to_string(),
        SqlValue::F64(f) if f.is_finite() => format!("{:?}", f),
        SqlValue::F64(_) => "NULL".to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::Bytes(b) => format!("X'{}'", hex::encode(b)),
        SqlValue::Date(_) => format!("DATE {}", quote_string(&value.to_text())),
        SqlValue::Time(_) => format!("TIME {}", quote_string(&value.to_text())),
        SqlValue::DateTime(_) => format!("TIMESTAMP {}", quote_string(&value.to_text())),
        SqlValue::DateTimeOffset(_) => {
            format!("TIMESTAMP WITH TIME ZONE {}", quote_string(&value.to_text()))
        }
        SqlValue::Text(_) | SqlValue::Uuid(_) => quote_string(&value.to_text()),
    }
}

/// Quote a string literal, doubling embedded quotes.
pub fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
