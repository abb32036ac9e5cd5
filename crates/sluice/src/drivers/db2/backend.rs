//! DB2 session over ODBC.

use std::str::FromStr;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use odbc_api::buffers::TextRowSet;
use odbc_api::{Connection, ConnectionOptions, Cursor, DataType, Environment, ResultSetMetadata};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::dialect::Db2Dialect;
use crate::config::ConnectionConfig;
use crate::core::traits::quote_string;
use crate::core::{
    Backend, BackendKind, ChunkStream, ColumnInfo, Dialect, SqlNullType, SqlValue, Table,
};
use crate::error::{Result, SluiceError};

/// Rows fetched per round trip by [`Backend::query`].
const FETCH_ROWS: usize = 1000;
/// Upper bound for one text cell.
const MAX_TEXT_LEN: usize = 4096;

static ENVIRONMENT: OnceLock<Environment> = OnceLock::new();

fn environment() -> Result<&'static Environment> {
    if let Some(env) = ENVIRONMENT.get() {
        return Ok(env);
    }
    let env = Environment::new().map_err(|e| {
        SluiceError::connection(
            BackendKind::IbmDb2.as_str(),
            format!("failed to create ODBC environment: {}. Is the IBM ODBC driver installed?", e),
        )
    })?;
    Ok(ENVIRONMENT.get_or_init(|| env))
}

fn odbc_error(e: odbc_api::Error) -> SluiceError {
    SluiceError::query(BackendKind::IbmDb2.as_str(), e)
}

/// One DB2 connection, serialized by a mutex. Autocommit is off.
pub struct Db2Backend {
    conn: Mutex<Connection<'static>>,
    connection_string: String,
    dialect: Db2Dialect,
}

impl Db2Backend {
    pub async fn connect(conn: &ConnectionConfig) -> Result<Self> {
        let port = conn.port_or_default(BackendKind::IbmDb2);
        let mut connection_string = format!(
            "DRIVER={{IBM DB2 ODBC DRIVER}};DATABASE={};HOSTNAME={};PORT={};PROTOCOL=TCPIP;UID={};PWD={};",
            conn.database, conn.host, port, conn.username, conn.password
        );
        if !conn.ssl_mode.eq_ignore_ascii_case("disable") {
            connection_string.push_str("SECURITY=SSL;");
        }

        let connection = open(&connection_string)?;
        connection.set_autocommit(false).map_err(odbc_error)?;

        info!("Connected to ibmdb2: {}:{}/{}", conn.host, port, conn.database);
        let backend = Self {
            conn: Mutex::new(connection),
            connection_string,
            dialect: Db2Dialect::new(),
        };
        backend.ping().await?;
        Ok(backend)
    }

    async fn scalar_i64(&self, sql: &str) -> Result<i64> {
        let table = self.query(sql).await?;
        match table.rows.first().and_then(|row| row.first()) {
            Some(SqlValue::I64(v)) => Ok(*v),
            Some(SqlValue::Decimal(d)) => d
                .to_string()
                .parse()
                .map_err(|_| SluiceError::query("ibmdb2", format!("not an integer: {}", d))),
            other => Err(SluiceError::query(
                "ibmdb2",
                format!("unexpected scalar {:?} for {}", other, sql),
            )),
        }
    }
}

fn open(connection_string: &str) -> Result<Connection<'static>> {
    environment()?
        .connect_with_connection_string(connection_string, ConnectionOptions::default())
        .map_err(|e| SluiceError::connection(BackendKind::IbmDb2.as_str(), e))
}

#[async_trait]
impl Backend for Db2Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::IbmDb2
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn query(&self, sql: &str) -> Result<Table> {
        let conn = self.conn.lock().await;
        let mut result: Option<Table> = None;
        if let Some(cursor) = conn.execute(sql, ()).map_err(odbc_error)? {
            read_cursor(cursor, FETCH_ROWS, |chunk| {
                match result.as_mut() {
                    Some(table) => table.rows.extend(chunk.rows),
                    None => result = Some(chunk),
                }
                Ok(true)
            })?;
        }
        Ok(result.unwrap_or_default())
    }

    /// Streams on a second connection so the main session stays free.
    async fn query_chunked(&self, sql: &str, chunk_size: usize) -> Result<ChunkStream> {
        let (tx, stream) = ChunkStream::channel(1);
        let connection_string = self.connection_string.clone();
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || {
            let outcome = open(&connection_string).and_then(|conn| {
                if let Some(cursor) = conn.execute(&sql, ()).map_err(odbc_error)? {
                    read_cursor(cursor, chunk_size, |chunk| Ok(tx.blocking_send(Ok(chunk)).is_ok()))?;
                }
                Ok(())
            });
            if let Err(e) = outcome {
                let _ = tx.blocking_send(Err(e));
            }
        });
        Ok(stream)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let conn = self.conn.lock().await;
        let mut statement = conn.preallocate().map_err(odbc_error)?;
        statement.execute(sql, ()).map_err(odbc_error)?;
        let affected = statement.row_count().map_err(odbc_error)?.unwrap_or(0);
        debug!("DB2 statement affected {} rows", affected);
        Ok(affected as u64)
    }

    async fn commit(&self) -> Result<()> {
        self.conn.lock().await.commit().map_err(odbc_error)
    }

    async fn introspect_table(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let sql = format!(
            "SELECT COLNAME, TYPENAME, NULLS, COLNO FROM SYSCAT.COLUMNS \
             WHERE TABSCHEMA = {} AND TABNAME = {} ORDER BY COLNO",
            quote_string(schema),
            quote_string(table)
        );
        let result = self.query(&sql).await?;
        Ok(result
            .rows
            .iter()
            .map(|row| ColumnInfo {
                name: row[0].to_text().trim_end().to_string(),
                data_type: row[1].to_text().trim_end().to_lowercase(),
                is_nullable: row[2].to_text() == "Y",
                ordinal: match &row[3] {
                    SqlValue::I64(n) => *n as i32 + 1,
                    _ => 0,
                },
            })
            .collect())
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT_BIG(*) FROM {}", self.dialect.qualify(schema, table));
        self.scalar_i64(&sql).await
    }

    async fn ping(&self) -> Result<()> {
        self.scalar_i64("SELECT 1 FROM SYSIBM.SYSDUMMY1").await.map(|_| ())
    }

    async fn close(&self) {
        let conn = self.conn.lock().await;
        if let Err(e) = conn.rollback() {
            debug!("DB2 rollback on close failed: {}", e);
        }
    }
}

/// Fetch a cursor in batches of `batch_rows`, handing each batch to `on_chunk`.
/// Stops early when `on_chunk` returns `false`.
fn read_cursor<C, F>(mut cursor: C, batch_rows: usize, mut on_chunk: F) -> Result<()>
where
    C: Cursor,
    F: FnMut(Table) -> Result<bool>,
{
    let num_cols = cursor.num_result_cols().map_err(odbc_error)? as u16;
    let mut names = Vec::with_capacity(num_cols as usize);
    let mut types = Vec::with_capacity(num_cols as usize);
    for col in 1..=num_cols {
        names.push(cursor.col_name(col).map_err(odbc_error)?);
        types.push(cursor.col_data_type(col).map_err(odbc_error)?);
    }

    let mut buffers = TextRowSet::for_cursor(batch_rows.max(1), &mut cursor, Some(MAX_TEXT_LEN))
        .map_err(odbc_error)?;
    let mut rows = cursor.bind_buffer(&mut buffers).map_err(odbc_error)?;

    while let Some(batch) = rows.fetch().map_err(odbc_error)? {
        let mut chunk = Table::new(names.clone());
        for row in 0..batch.num_rows() {
            let values = types
                .iter()
                .enumerate()
                .map(|(col, ty)| decode_text(batch.at(col, row), *ty))
                .collect();
            chunk.push_row(values)?;
        }
        if !on_chunk(chunk)? {
            break;
        }
    }
    Ok(())
}

/// Turn a text cell into a typed value. Text that does not parse as the
/// reported type is kept as text.
fn decode_text(bytes: Option<&[u8]>, ty: DataType) -> SqlValue {
    let null = match ty {
        DataType::SmallInt | DataType::Integer | DataType::BigInt | DataType::TinyInt => SqlNullType::I64,
        DataType::Real | DataType::Float { .. } | DataType::Double => SqlNullType::F64,
        DataType::Decimal { .. } | DataType::Numeric { .. } => SqlNullType::Decimal,
        DataType::Date => SqlNullType::Date,
        DataType::Time { .. } => SqlNullType::Time,
        DataType::Timestamp { .. } => SqlNullType::DateTime,
        DataType::Bit => SqlNullType::Bool,
        _ => SqlNullType::String,
    };
    let Some(bytes) = bytes else {
        return SqlValue::Null(null);
    };
    let text = String::from_utf8_lossy(bytes).trim_end().to_string();

    let parsed = match null {
        SqlNullType::I64 => text.parse().ok().map(SqlValue::I64),
        SqlNullType::F64 => text.parse().ok().map(SqlValue::F64),
        SqlNullType::Decimal => Decimal::from_str(&text).ok().map(SqlValue::Decimal),
        SqlNullType::Date => NaiveDate::parse_from_str(&text, "%Y-%m-%d").ok().map(SqlValue::Date),
        SqlNullType::Time => NaiveTime::parse_from_str(&text, "%H:%M:%S%.f")
            .ok()
            .map(SqlValue::Time),
        // DB2 renders timestamps as either `2024-01-01 10:00:00.000000` or `2024-01-01-10.00.00.000000`.
        SqlNullType::DateTime => NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(&text, "%Y-%m-%d-%H.%M.%S%.f"))
            .ok()
            .map(SqlValue::DateTime),
        SqlNullType::Bool => Some(SqlValue::Bool(text == "1" || text.eq_ignore_ascii_case("true"))),
        _ => None,
    };
    parsed.unwrap_or(SqlValue::Text(text))
}
