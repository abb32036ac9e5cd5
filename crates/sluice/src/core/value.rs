//! SQL value types shared by every backend.
//!
//! Values are owned: chunks cross a channel from the reader task and are
//! kept in the source cache for the whole run.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Type hint for NULL values.
///
/// Lets the fill-missing pass pick a sentinel of the right shape for the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    Bool,
    I64,
    F64,
    Decimal,
    String,
    Bytes,
    Uuid,
    DateTime,
    DateTimeOffset,
    Date,
    Time,
}

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL with type hint.
    Null(SqlNullType),

    Bool(bool),

    /// Every integer width is widened to 64 bits.
    I64(i64),

    F64(f64),

    /// Fixed-point numeric.
    Decimal(Decimal),

    Text(String),

    Bytes(Vec<u8>),

    Uuid(Uuid),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Timestamp with timezone offset.
    DateTimeOffset(DateTime<FixedOffset>),

    Date(NaiveDate),

    Time(NaiveTime),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Get the SqlNullType for this value.
    #[must_use]
    pub fn null_type(&self) -> SqlNullType {
        match self {
            SqlValue::Null(t) => *t,
            SqlValue::Bool(_) => SqlNullType::Bool,
            SqlValue::I64(_) => SqlNullType::I64,
            SqlValue::F64(_) => SqlNullType::F64,
            SqlValue::Decimal(_) => SqlNullType::Decimal,
            SqlValue::Text(_) => SqlNullType::String,
            SqlValue::Bytes(_) => SqlNullType::Bytes,
            SqlValue::Uuid(_) => SqlNullType::Uuid,
            SqlValue::DateTime(_) => SqlNullType::DateTime,
            SqlValue::DateTimeOffset(_) => SqlNullType::DateTimeOffset,
            SqlValue::Date(_) => SqlNullType::Date,
            SqlValue::Time(_) => SqlNullType::Time,
        }
    }

    /// The zero-equivalent sentinel used to replace a NULL of type `t`.
    ///
    /// This is a lossy normalization: a replaced cell is indistinguishable
    /// from a real zero once written.
    #[must_use]
    pub fn zero_of(t: SqlNullType) -> SqlValue {
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        match t {
            SqlNullType::Bool => SqlValue::Bool(false),
            SqlNullType::I64 => SqlValue::I64(0),
            SqlNullType::F64 => SqlValue::F64(0.0),
            SqlNullType::Decimal => SqlValue::Decimal(Decimal::ZERO),
            SqlNullType::String => SqlValue::Text("0".to_string()),
            SqlNullType::Bytes => SqlValue::Bytes(Vec::new()),
            SqlNullType::Uuid => SqlValue::Uuid(Uuid::nil()),
            SqlNullType::DateTime => SqlValue::DateTime(epoch.naive_utc()),
            SqlNullType::DateTimeOffset => SqlValue::DateTimeOffset(epoch.fixed_offset()),
            SqlNullType::Date => SqlValue::Date(epoch.date_naive()),
            SqlNullType::Time => SqlValue::Time(NaiveTime::MIN),
        }
    }

    /// Plain text rendering.
    ///
    /// Used to coerce iteration rows into template parameters and to write
    /// CSV cells. NULL renders as the empty string; bytes as lowercase hex;
    /// floats always keep a fractional part (`1.0`, not `1`).
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            SqlValue::Null(_) => String::new(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::I64(i) => i.to_string(),
            SqlValue::F64(f) => format!("{:?}", f),
            SqlValue::Decimal(d) => d.to_string(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Bytes(b) => hex::encode(b),
            SqlValue::Uuid(u) => u.to_string(),
            SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            SqlValue::DateTimeOffset(dto) => dto.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string(),
            SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
        }
    }
}

// From implementations for common types
impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I64(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null(SqlNullType::String))
    }
}
