//! PostgreSQL dialect.

use crate::core::merge::{column_list, insert_statement};
use crate::core::traits::standard_literal;
use crate::core::{Dialect, MergePlan, MergeRequest, SqlValue};

/// PostgreSQL SQL syntax.
///
/// Merges use `INSERT ... ON CONFLICT`, which needs a unique constraint or
/// index on the conflict key columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn render_literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Bytes(b) => format!("'\\x{}'::bytea", hex::encode(b)),
            SqlValue::Uuid(u) => format!("'{}'::uuid", u),
            SqlValue::DateTimeOffset(_) => format!("'{}'::timestamptz", value.to_text()),
            other => standard_literal(other),
        }
    }

    fn build_merge(&self, req: &MergeRequest<'_>) -> MergePlan {
        let key = req.conflict.key();
        let mut sql = insert_statement(self, req);
        if key.is_empty() {
            return MergePlan::single(sql);
        }

        sql.push_str(&format!(" ON CONFLICT ({}) DO ", column_list(self, key)));
        if req.updates_matches() {
            let set = req
                .non_key_columns()
                .map(|c| {
                    let c = self.quote_ident(c);
                    format!("{c} = EXCLUDED.{c}")
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!("UPDATE SET {}", set));
        } else {
            sql.push_str("NOTHING");
        }
        MergePlan::single(sql)
    }
}
