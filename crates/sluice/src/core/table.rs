//! In-memory tabular chunks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use super::value::{SqlNullType, SqlValue};
use crate::error::{Result, SluiceError};

/// An ordered set of named columns with positional rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl Table {
    /// Create an empty table with the given columns.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Create a table, checking every row against the column count.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Result<Self> {
        let mut table = Self::new(columns);
        table.rows.reserve(rows.len());
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Append a row.
    pub fn push_row(&mut self, row: Vec<SqlValue>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(SluiceError::Decode(format!(
                "row has {} values but table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Replace every NULL with the zero sentinel of its type.
    ///
    /// Returns the number of cells replaced.
    pub fn fill_missing(&mut self) -> usize {
        let mut replaced = 0;
        for cell in self.rows.iter_mut().flatten() {
            if let SqlValue::Null(t) = cell {
                *cell = SqlValue::zero_of(*t);
                replaced += 1;
            }
        }
        replaced
    }

    /// Contiguous, non-overlapping slices of at most `max` rows.
    ///
    /// An empty table yields no batches.
    pub fn batches(&self, max: usize) -> std::slice::Chunks<'_, Vec<SqlValue>> {
        self.rows.chunks(max.max(1))
    }

    /// Row `i` as a `column -> text` parameter map.
    pub fn row_as_params(&self, i: usize) -> Option<BTreeMap<String, String>> {
        let row = self.rows.get(i)?;
        Some(
            self.columns
                .iter()
                .cloned()
                .zip(row.iter().map(SqlValue::to_text))
                .collect(),
        )
    }

    /// Decode a JSON payload.
    pub fn from_json(payload: &JsonValue, options: &DecodeOptions) -> Result<Self> {
        let payload = match options.record_path.as_deref() {
            None | Some("") => payload,
            Some(pointer) => payload.pointer(pointer).ok_or_else(|| {
                SluiceError::Decode(format!("record_path '{}' not found in payload", pointer))
            })?,
        };

        match options.orient {
            JsonOrient::Records => decode_records(payload),
            JsonOrient::Split => decode_split(payload),
            JsonOrient::Values => decode_values(payload, &options.columns),
        }
    }
}

/// How a JSON payload maps onto rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonOrient {
    /// `[{"col": v, ...}, ...]` (a single object is one row).
    #[default]
    Records,
    /// `{"columns": [...], "data": [[...], ...]}`.
    Split,
    /// `[[...], ...]` with column names from `columns`.
    Values,
}

/// Options for turning an API response into a table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecodeOptions {
    #[serde(default)]
    pub orient: JsonOrient,

    /// JSON pointer (RFC 6901) to the record list, e.g. `/data/items`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_path: Option<String>,

    /// Column names for `values` orientation; positional names otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
}

fn decode_records(payload: &JsonValue) -> Result<Table> {
    let records: Vec<&serde_json::Map<String, JsonValue>> = match payload {
        JsonValue::Array(items) => items
            .iter()
            .map(|item| {
                item.as_object()
                    .ok_or_else(|| SluiceError::Decode("records must be JSON objects".into()))
            })
            .collect::<Result<_>>()?,
        JsonValue::Object(obj) => vec![obj],
        JsonValue::Null => Vec::new(),
        other => {
            return Err(SluiceError::Decode(format!(
                "expected an array of records, got {}",
                json_kind(other)
            )))
        }
    };

    // Union of keys, in first-seen order.
    let mut columns: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut table = Table::new(columns);
    for record in records {
        let row = table
            .columns
            .iter()
            .map(|c| record.get(c).map(json_to_value).unwrap_or(SqlValue::Null(SqlNullType::String)))
            .collect();
        table.rows.push(row);
    }
    Ok(table)
}

fn decode_split(payload: &JsonValue) -> Result<Table> {
    let columns = payload
        .get("columns")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| SluiceError::Decode("split payload needs a 'columns' array".into()))?
        .iter()
        .map(|c| match c {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    let data = payload.get("data").cloned().unwrap_or(JsonValue::Array(Vec::new()));
    decode_rows(&data, columns)
}

fn decode_values(payload: &JsonValue, names: &[String]) -> Result<Table> {
    let width = payload
        .as_array()
        .and_then(|rows| rows.first())
        .and_then(JsonValue::as_array)
        .map(Vec::len)
        .unwrap_or(names.len());
    let columns = if names.is_empty() {
        (0..width).map(|i| i.to_string()).collect()
    } else {
        names.to_vec()
    };
    decode_rows(payload, columns)
}

fn decode_rows(data: &JsonValue, columns: Vec<String>) -> Result<Table> {
    let rows = data
        .as_array()
        .ok_or_else(|| SluiceError::Decode("expected an array of rows".into()))?;
    let mut table = Table::new(columns);
    for row in rows {
        let cells = row
            .as_array()
            .ok_or_else(|| SluiceError::Decode("rows must be JSON arrays".into()))?;
        table.push_row(cells.iter().map(json_to_value).collect())?;
    }
    Ok(table)
}

fn json_to_value(v: &JsonValue) -> SqlValue {
    match v {
        JsonValue::Null => SqlValue::Null(SqlNullType::String),
        JsonValue::Bool(b) => SqlValue::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::I64(i),
            None => SqlValue::F64(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => SqlValue::Text(s.clone()),
        nested => SqlValue::Text(nested.to_string()),
    }
}

fn json_kind(v: &JsonValue) -> &'static str {
    match v {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// A stream of chunks fed by a background reader.
///
/// The reader task owns the sending half; the stream ends when it is dropped.
pub struct ChunkStream {
    rx: mpsc::Receiver<Result<Table>>,
    observer: Option<ChunkObserver>,
    exhausted: bool,
}

/// Callback run on every chunk as it is pulled.
pub type ChunkObserver = Box<dyn FnMut(&Table) -> Result<()> + Send + Sync>;

impl ChunkStream {
    /// Create a bounded channel; `capacity` is the read-ahead in chunks.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Result<Table>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                rx,
                observer: None,
                exhausted: false,
            },
        )
    }

    /// A stream over chunks that are already in memory.
    pub fn from_tables(tables: Vec<Table>) -> Self {
        let (tx, stream) = Self::channel(tables.len().max(1));
        for table in tables {
            // Capacity covers every chunk, so this cannot fail.
            let _ = tx.try_send(Ok(table));
        }
        stream
    }

    /// Run `observer` on every chunk as it is pulled, before it is returned.
    ///
    /// An observer error is returned in place of the chunk.
    pub fn inspect<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&Table) -> Result<()> + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Pull the next chunk.
    pub async fn next(&mut self) -> Option<Result<Table>> {
        if self.exhausted {
            return None;
        }
        let item = match self.rx.recv().await {
            Some(item) => item,
            None => {
                self.exhausted = true;
                return None;
            }
        };
        Some(item.and_then(|table| {
            if let Some(observer) = self.observer.as_mut() {
                observer(&table)?;
            }
            Ok(table)
        }))
    }

    /// True once the reader has finished and every chunk was pulled.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl std::fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream")
            .field("observed", &self.observer.is_some())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn numbered(n: i64) -> Table {
        Table::from_rows(
            vec!["id".into()],
            (0..n).map(|i| vec![SqlValue::I64(i)]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_batches_cover_every_row_once() {
        let table = numbered(2_500);
        let batches: Vec<_> = table.batches(1_000).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len(), 500);

        let flat: Vec<_> = batches.concat();
        assert_eq!(flat, table.rows);
    }

    #[test]
    fn test_small_table_is_single_batch() {
        assert_eq!(numbered(10).batches(1_000).count(), 1);
        assert_eq!(numbered(0).batches(1_000).count(), 0);
    }

    #[test]
    fn test_fill_missing() {
        let mut table = Table::from_rows(
            vec!["id".into(), "name".into()],
            vec![
                vec![SqlValue::Null(SqlNullType::I64), "a".into()],
                vec![SqlValue::I64(2), SqlValue::Null(SqlNullType::String)],
            ],
        )
        .unwrap();
        assert_eq!(table.fill_missing(), 2);
        assert_eq!(table.rows[0][0], SqlValue::I64(0));
        assert_eq!(table.rows[1][1], SqlValue::Text("0".into()));
    }

    #[test]
    fn test_row_as_params() {
        let table = Table::from_rows(
            vec!["id".into(), "day".into(), "weight".into()],
            vec![vec![SqlValue::I64(7), "2024-01-01".into(), SqlValue::F64(2.0)]],
        )
        .unwrap();
        let params = table.row_as_params(0).unwrap();
        assert_eq!(params["id"], "7");
        assert_eq!(params["day"], "2024-01-01");
        assert_eq!(params["weight"], "2.0");
        assert!(table.row_as_params(1).is_none());
    }

    #[test]
    fn test_push_row_arity() {
        let mut table = Table::new(vec!["a".into(), "b".into()]);
        assert!(table.push_row(vec![SqlValue::I64(1)]).is_err());
    }

    #[test]
    fn test_from_json_records_with_path() {
        let payload = json!({
            "meta": {"page": 1},
            "data": {"items": [
                {"id": 1, "name": "alpha"},
                {"id": 2, "score": 1.5}
            ]}
        });
        let options = DecodeOptions {
            record_path: Some("/data/items".into()),
            ..Default::default()
        };
        let table = Table::from_json(&payload, &options).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.columns.len(), 3);

        let name = table.column_index("name").unwrap();
        assert!(table.rows[1][name].is_null());
        let score = table.column_index("score").unwrap();
        assert_eq!(table.rows[1][score], SqlValue::F64(1.5));
    }

    #[test]
    fn test_from_json_split_and_values() {
        let split = json!({"columns": ["a", "b"], "data": [[1, "x"], [2, "y"]]});
        let options = DecodeOptions {
            orient: JsonOrient::Split,
            ..Default::default()
        };
        let table = Table::from_json(&split, &options).unwrap();
        assert_eq!(table.columns, vec!["a", "b"]);
        assert_eq!(table.rows[1][1], SqlValue::Text("y".into()));

        let values = json!([[1, true], [2, false]]);
        let options = DecodeOptions {
            orient: JsonOrient::Values,
            ..Default::default()
        };
        let table = Table::from_json(&values, &options).unwrap();
        assert_eq!(table.columns, vec!["0", "1"]);
        assert_eq!(table.rows[0][1], SqlValue::Bool(true));
    }

    #[test]
    fn test_from_json_errors() {
        let options = DecodeOptions {
            record_path: Some("/missing".into()),
            ..Default::default()
        };
        assert!(Table::from_json(&json!({}), &options).is_err());
        assert!(Table::from_json(&json!("text"), &DecodeOptions::default()).is_err());
    }

    #[tokio::test]
    async fn test_chunk_stream_from_tables() {
        let mut stream = ChunkStream::from_tables(vec![numbered(2), numbered(3)]);
        assert_eq!(stream.next().await.unwrap().unwrap().len(), 2);
        assert_eq!(stream.next().await.unwrap().unwrap().len(), 3);
        assert!(stream.next().await.is_none());
        assert!(stream.is_exhausted());
    }

    #[tokio::test]
    async fn test_chunk_stream_inspect() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let mut stream = ChunkStream::from_tables(vec![numbered(4), numbered(1)]).inspect(
            move |chunk| {
                counter.fetch_add(chunk.len(), Ordering::Relaxed);
                Ok(())
            },
        );
        while let Some(chunk) = stream.next().await {
            chunk.unwrap();
        }
        assert_eq!(seen.load(Ordering::Relaxed), 5);
    }
}
