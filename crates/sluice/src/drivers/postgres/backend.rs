//! PostgreSQL-protocol backend (PostgreSQL and Redshift).
//!
//! Reads go through a small deadpool pool. Writes go through one pinned
//! session so session-scoped staging tables survive from one statement of a
//! merge plan to the next. Every statement runs in autocommit.

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio::sync::Mutex;
use tokio_postgres::{Config as PgConfig, Row};
use tracing::{debug, info, warn};

use super::dialect::PostgresDialect;
use crate::config::ConnectionConfig;
use crate::core::{
    Backend, BackendKind, ChunkStream, ColumnInfo, Dialect, SqlNullType, SqlValue, Table,
};
use crate::drivers::common::TlsBuilder;
use crate::drivers::redshift::RedshiftDialect;
use crate::error::{Result, SluiceError};

/// Connections per backend: one pinned writer, one reader, one streaming cursor.
///
/// A backend is therefore up to three server sessions, not one. Reads may land
/// on different sessions; they run in autocommit, so none of them depends on
/// session state. Only writes are pinned to a single session.
const POOL_SIZE: usize = 3;

/// A session to a PostgreSQL or Redshift database.
pub struct PostgresBackend {
    kind: BackendKind,
    pool: Pool,
    writer: Mutex<Option<Object>>,
    dialect: Box<dyn Dialect>,
}

impl PostgresBackend {
    /// Build the pool and check the server answers.
    pub async fn connect(kind: BackendKind, conn: &ConnectionConfig) -> Result<Self> {
        let port = conn.port_or_default(kind);
        let mut pg_config = PgConfig::new();
        pg_config
            .host(&conn.host)
            .port(port)
            .dbname(&conn.database)
            .user(&conn.username)
            .password(&conn.password)
            .application_name("sluice");

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let manager = match TlsBuilder::parse(&conn.ssl_mode)?.build()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!("{} TLS is disabled. Credentials will be transmitted in plaintext.", kind);
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };
        let pool = Pool::builder(manager)
            .max_size(POOL_SIZE)
            .build()
            .map_err(|e| SluiceError::connection(kind.as_str(), e))?;

        let backend = Self {
            kind,
            pool,
            writer: Mutex::new(None),
            dialect: match kind {
                BackendKind::Redshift => Box::new(RedshiftDialect::new()),
                _ => Box::new(PostgresDialect::new()),
            },
        };
        backend.ping().await?;

        info!(
            "Connected to {}: {}:{}/{}",
            kind, conn.host, port, conn.database
        );
        Ok(backend)
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| SluiceError::connection(self.kind.as_str(), e))
    }

    fn query_error(&self, sql: &str, e: tokio_postgres::Error) -> SluiceError {
        SluiceError::query(self.kind.as_str(), format!("{} - SQL: {}", e, sql))
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    async fn query(&self, sql: &str) -> Result<Table> {
        let client = self.client().await?;
        let statement = client
            .prepare(sql)
            .await
            .map_err(|e| self.query_error(sql, e))?;
        let rows = client
            .query(&statement, &[])
            .await
            .map_err(|e| self.query_error(sql, e))?;

        let layout = ColumnLayout::from_columns(statement.columns());
        layout.table(&rows)
    }

    async fn query_chunked(&self, sql: &str, chunk_size: usize) -> Result<ChunkStream> {
        let (tx, stream) = ChunkStream::channel(1);
        let pool = self.pool.clone();
        let sql = sql.to_string();
        let kind = self.kind;

        tokio::spawn(async move {
            if let Err(e) = stream_chunks(pool, kind, &sql, chunk_size, &tx).await {
                let _ = tx.send(Err(e)).await;
            }
        });
        Ok(stream)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            *writer = Some(self.client().await?);
        }
        let client = writer
            .as_ref()
            .ok_or_else(|| SluiceError::InvalidState("writer session unavailable".into()))?;

        match client.execute(sql, &[]).await {
            Ok(affected) => Ok(affected),
            Err(e) => {
                // A broken session would poison every later write.
                if client.is_closed() {
                    *writer = None;
                }
                Err(self.query_error(sql, e))
            }
        }
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn introspect_table(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let client = self.client().await?;
        let sql = r#"
            SELECT column_name::text,
                   udt_name::text,
                   is_nullable = 'YES',
                   ordinal_position::int4
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
        "#;
        let rows = client.query(sql, &[&schema, &table]).await?;

        let columns: Vec<ColumnInfo> = rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get(0),
                data_type: row.get::<_, String>(1).to_lowercase(),
                is_nullable: row.get(2),
                ordinal: row.get(3),
            })
            .collect();
        debug!("Introspected {} columns for {}.{}", columns.len(), schema, table);
        Ok(columns)
    }

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let client = self.client().await?;
        let sql = r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )
        "#;
        let row = client.query_one(sql, &[&schema, &table]).await?;
        Ok(row.get::<_, bool>(0))
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<i64> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT COUNT(*)::int8 FROM {}",
            self.dialect.qualify(schema, table)
        );
        let row = client
            .query_one(&sql, &[])
            .await
            .map_err(|e| self.query_error(&sql, e))?;
        Ok(row.get::<_, i64>(0))
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| SluiceError::connection(self.kind.as_str(), e))?;
        Ok(())
    }

    async fn close(&self) {
        self.writer.lock().await.take();
        self.pool.close();
    }
}

/// Read `sql` through a portal, `chunk_size` rows at a time.
async fn stream_chunks(
    pool: Pool,
    kind: BackendKind,
    sql: &str,
    chunk_size: usize,
    tx: &tokio::sync::mpsc::Sender<Result<Table>>,
) -> Result<()> {
    let mut client = pool
        .get()
        .await
        .map_err(|e| SluiceError::connection(kind.as_str(), e))?;
    // Portals only live inside a transaction.
    let transaction = client.transaction().await?;
    let statement = transaction.prepare(sql).await?;
    let portal = transaction.bind(&statement, &[]).await?;
    let layout = ColumnLayout::from_columns(statement.columns());
    let max_rows = i32::try_from(chunk_size).unwrap_or(i32::MAX);

    let mut chunks = 0usize;
    loop {
        let rows = transaction.query_portal(&portal, max_rows).await?;
        if rows.is_empty() {
            break;
        }
        let last = rows.len() < chunk_size;
        chunks += 1;
        if tx.send(layout.table(&rows)).await.is_err() {
            debug!("Chunk consumer dropped after {} chunks", chunks);
            break;
        }
        if last {
            break;
        }
    }
    transaction.commit().await?;
    debug!("Cursor finished after {} chunks", chunks);
    Ok(())
}

/// Column names and type names of a result set.
struct ColumnLayout {
    names: Vec<String>,
    types: Vec<String>,
}

impl ColumnLayout {
    fn from_columns(columns: &[tokio_postgres::Column]) -> Self {
        Self {
            names: columns.iter().map(|c| c.name().to_string()).collect(),
            types: columns.iter().map(|c| c.type_().name().to_string()).collect(),
        }
    }

    fn table(&self, rows: &[Row]) -> Result<Table> {
        let rows = rows
            .iter()
            .map(|row| {
                self.types
                    .iter()
                    .enumerate()
                    .map(|(idx, ty)| convert_row_value(row, idx, &self.names[idx], ty))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Table::from_rows(self.names.clone(), rows)
    }
}

/// Decode one cell by its PostgreSQL type name.
///
/// Types without a mapping are read as text where the driver allows it. A
/// cell that cannot be decoded is an error rather than a NULL.
fn convert_row_value(row: &Row, idx: usize, column: &str, type_name: &str) -> Result<SqlValue> {
    fn get<'a, T, F>(
        row: &'a Row,
        idx: usize,
        column: &str,
        type_name: &str,
        null: SqlNullType,
        wrap: F,
    ) -> Result<SqlValue>
    where
        T: tokio_postgres::types::FromSql<'a>,
        F: FnOnce(T) -> SqlValue,
    {
        decode_cell(row.try_get::<_, Option<T>>(idx), column, type_name, null, wrap)
    }

    match type_name {
        "bool" => get(row, idx, column, type_name, SqlNullType::Bool, SqlValue::Bool),
        "int2" => get(row, idx, column, type_name, SqlNullType::I64, |v: i16| SqlValue::I64(v.into())),
        "int4" => get(row, idx, column, type_name, SqlNullType::I64, |v: i32| SqlValue::I64(v.into())),
        "int8" => get(row, idx, column, type_name, SqlNullType::I64, SqlValue::I64),
        "float4" => get(row, idx, column, type_name, SqlNullType::F64, |v: f32| SqlValue::F64(v.into())),
        "float8" => get(row, idx, column, type_name, SqlNullType::F64, SqlValue::F64),
        "numeric" => get(row, idx, column, type_name, SqlNullType::Decimal, SqlValue::Decimal),
        "uuid" => get(row, idx, column, type_name, SqlNullType::Uuid, SqlValue::Uuid),
        "date" => get(row, idx, column, type_name, SqlNullType::Date, SqlValue::Date),
        "time" => get(row, idx, column, type_name, SqlNullType::Time, SqlValue::Time),
        "timestamp" => get(row, idx, column, type_name, SqlNullType::DateTime, SqlValue::DateTime),
        "timestamptz" => get(
            row,
            idx,
            column,
            type_name,
            SqlNullType::DateTimeOffset,
            |v: chrono::DateTime<chrono::Utc>| SqlValue::DateTimeOffset(v.fixed_offset()),
        ),
        "bytea" => get(row, idx, column, type_name, SqlNullType::Bytes, SqlValue::Bytes),
        "json" | "jsonb" => get(row, idx, column, type_name, SqlNullType::String, |v: serde_json::Value| {
            SqlValue::Text(v.to_string())
        }),
        _ => get(row, idx, column, type_name, SqlNullType::String, SqlValue::Text),
    }
}

/// Turn a driver decode result into a cell value. SQL NULL stays a typed NULL.
fn decode_cell<T, E, F>(
    decoded: std::result::Result<Option<T>, E>,
    column: &str,
    type_name: &str,
    null: SqlNullType,
    wrap: F,
) -> Result<SqlValue>
where
    E: std::fmt::Display,
    F: FnOnce(T) -> SqlValue,
{
    match decoded {
        Ok(Some(v)) => Ok(wrap(v)),
        Ok(None) => Ok(SqlValue::Null(null)),
        Err(e) => Err(SluiceError::query(
            "postgres",
            format!(
                "cannot decode column '{}' of type {}: {} (cast it to text in the query)",
                column, type_name, e
            ),
        )),
    }
}
