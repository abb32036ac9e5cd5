//! DB2 dialect.

use crate::core::traits::{quote_string, standard_literal};
use crate::core::{Dialect, SqlValue};

/// DB2 SQL syntax. Merges use the generic `MERGE ... USING (VALUES ...)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Db2Dialect;

impl Db2Dialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for Db2Dialect {
    fn name(&self) -> &str {
        "db2"
    }

    fn render_literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Bytes(b) => format!("BX'{}'", hex::encode(b)),
            SqlValue::Date(_) => format!("DATE({})", quote_string(&value.to_text())),
            SqlValue::Time(_) => format!("TIME({})", quote_string(&value.to_text())),
            SqlValue::DateTime(_) => format!("TIMESTAMP({})", quote_string(&value.to_text())),
            // DB2 timestamps carry no zone; store the UTC instant.
            SqlValue::DateTimeOffset(dt) => {
                let utc = SqlValue::DateTime(dt.naive_utc());
                format!("TIMESTAMP({})", quote_string(&utc.to_text()))
            }
            other => standard_literal(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_temporal_literals() {
        let d = Db2Dialect::new();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(d.render_literal(&SqlValue::Date(date)), "DATE('2024-03-01')");
        let ts = date.and_hms_opt(8, 30, 0).unwrap();
        assert!(d
            .render_literal(&SqlValue::DateTime(ts))
            .starts_with("TIMESTAMP('2024-03-01 08:30:00"));
    }

    #[test]
    fn test_binary_literal() {
        assert_eq!(Db2Dialect.render_literal(&SqlValue::Bytes(vec![0xab])), "BX'ab'");
    }
}
