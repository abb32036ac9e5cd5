//! Generic merge/insert statement builders.
//!
//! Values are embedded positionally as literal tuples in column order. A
//! dialect overrides [`Dialect::build_merge`](super::traits::Dialect::build_merge)
//! only where its syntax diverges.

use super::traits::Dialect;
use super::value::SqlValue;
use crate::load::{ConflictAction, ConflictSpec};

/// One batch to merge into a target table.
#[derive(Debug, Clone, Copy)]
pub struct MergeRequest<'a> {
    pub schema: &'a str,
    pub table: &'a str,
    pub columns: &'a [String],
    pub rows: &'a [Vec<SqlValue>],
    pub conflict: &'a ConflictSpec,
}

impl<'a> MergeRequest<'a> {
    /// Columns that are not part of the conflict key.
    pub fn non_key_columns(&self) -> impl Iterator<Item = &'a String> + 'a {
        let key = self.conflict.key();
        self.columns.iter().filter(move |c| !key.contains(c))
    }

    /// Whether matched rows get their non-key columns overwritten.
    pub fn updates_matches(&self) -> bool {
        self.conflict.action() == ConflictAction::Update && self.non_key_columns().next().is_some()
    }
}

/// Statements for one batch.
///
/// Only `merge` contributes to the affected-row count; `setup` and `teardown`
/// are bookkeeping (staging tables and the like).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePlan {
    pub setup: Vec<String>,
    pub merge: String,
    pub teardown: Vec<String>,
}

impl MergePlan {
    /// A plan consisting of one statement.
    pub fn single(merge: String) -> Self {
        Self {
            merge,
            ..Default::default()
        }
    }
}

/// `(v1, v2), (v3, v4)` for the given rows.
pub fn value_tuples<D: Dialect + ?Sized>(dialect: &D, rows: &[Vec<SqlValue>]) -> String {
    rows.iter()
        .map(|row| {
            let values = row
                .iter()
                .map(|v| dialect.render_literal(v))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", values)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Quoted, comma-separated column list.
pub fn column_list<D: Dialect + ?Sized>(dialect: &D, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| dialect.quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Plain multi-row `INSERT`.
pub fn insert_statement<D: Dialect + ?Sized>(dialect: &D, req: &MergeRequest<'_>) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        dialect.qualify(req.schema, req.table),
        column_list(dialect, req.columns),
        value_tuples(dialect, req.rows)
    )
}

/// `tgt.k1 = src.k1 AND tgt.k2 = src.k2`.
pub fn key_match<D: Dialect + ?Sized>(dialect: &D, key: &[String], tgt: &str, src: &str) -> String {
    key.iter()
        .map(|k| {
            let k = dialect.quote_ident(k);
            format!("{tgt}.{k} = {src}.{k}")
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// The `WHEN ... THEN` clauses shared by every `MERGE` variant.
pub fn merge_actions<D: Dialect + ?Sized>(dialect: &D, req: &MergeRequest<'_>) -> String {
    let mut sql = String::new();
    if req.updates_matches() {
        let set = req
            .non_key_columns()
            .map(|c| {
                let c = dialect.quote_ident(c);
                format!("{c} = src.{c}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!("WHEN MATCHED THEN UPDATE SET {} ", set));
    }
    let src_cols = req
        .columns
        .iter()
        .map(|c| format!("src.{}", dialect.quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    sql.push_str(&format!(
        "WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
        column_list(dialect, req.columns),
        src_cols
    ));
    sql
}

/// Generic multi-row `MERGE ... USING (VALUES ...)`.
///
/// An empty conflict key degrades to a plain `INSERT`.
pub fn merge_statement<D: Dialect + ?Sized>(dialect: &D, req: &MergeRequest<'_>) -> String {
    if req.conflict.key().is_empty() {
        return insert_statement(dialect, req);
    }
    format!(
        "MERGE INTO {} AS tgt USING (VALUES {}) AS src ({}) ON {} {}",
        dialect.qualify(req.schema, req.table),
        value_tuples(dialect, req.rows),
        column_list(dialect, req.columns),
        key_match(dialect, req.conflict.key(), "tgt", "src"),
        merge_actions(dialect, req)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Generic;

    impl Dialect for Generic {
        fn name(&self) -> &str {
            "generic"
        }
    }

    fn columns() -> Vec<String> {
        vec!["id".into(), "name".into()]
    }

    fn rows() -> Vec<Vec<SqlValue>> {
        vec![
            vec![SqlValue::I64(1), "a".into()],
            vec![SqlValue::I64(2), "b".into()],
        ]
    }

    #[test]
    fn test_merge_update() {
        let (cols, rows) = (columns(), rows());
        let conflict = ConflictSpec::new(vec!["id".into()], ConflictAction::Update);
        let req = MergeRequest {
            schema: "dw",
            table: "t",
            columns: &cols,
            rows: &rows,
            conflict: &conflict,
        };
        assert_eq!(
            Generic.build_merge(&req).merge,
            "MERGE INTO \"dw\".\"t\" AS tgt USING (VALUES (1, 'a'), (2, 'b')) AS src (\"id\", \"name\") \
             ON tgt.\"id\" = src.\"id\" WHEN MATCHED THEN UPDATE SET \"name\" = src.\"name\" \
             WHEN NOT MATCHED THEN INSERT (\"id\", \"name\") VALUES (src.\"id\", src.\"name\")"
        );
    }

    #[test]
    fn test_merge_ignore_has_no_update_clause() {
        let (cols, rows) = (columns(), rows());
        let conflict = ConflictSpec::new(vec!["id".into()], ConflictAction::Ignore);
        let req = MergeRequest {
            schema: "dw",
            table: "t",
            columns: &cols,
            rows: &rows,
            conflict: &conflict,
        };
        let sql = Generic.build_merge(&req).merge;
        assert!(sql.starts_with("MERGE INTO"));
        assert!(!sql.contains("WHEN MATCHED"));
        assert!(sql.contains("WHEN NOT MATCHED"));
    }

    #[test]
    fn test_ignore_without_key_is_plain_insert() {
        let (cols, rows) = (columns(), rows());
        let conflict = ConflictSpec::new(Vec::new(), ConflictAction::Ignore);
        let req = MergeRequest {
            schema: "dw",
            table: "t",
            columns: &cols,
            rows: &rows,
            conflict: &conflict,
        };
        assert_eq!(
            Generic.build_merge(&req).merge,
            "INSERT INTO \"dw\".\"t\" (\"id\", \"name\") VALUES (1, 'a'), (2, 'b')"
        );
    }

    #[test]
    fn test_update_with_only_key_columns() {
        let cols = vec!["id".to_string()];
        let rows = vec![vec![SqlValue::I64(1)]];
        let conflict = ConflictSpec::new(vec!["id".into()], ConflictAction::Update);
        let req = MergeRequest {
            schema: "dw",
            table: "t",
            columns: &cols,
            rows: &rows,
            conflict: &conflict,
        };
        assert!(!req.updates_matches());
        assert!(!Generic.build_merge(&req).merge.contains("UPDATE SET"));
    }
}
