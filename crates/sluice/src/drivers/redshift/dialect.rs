//! Redshift dialect.

use crate::core::merge::{column_list, insert_statement, key_match, merge_actions, value_tuples};
use crate::core::traits::standard_literal;
use crate::core::{Dialect, MergePlan, MergeRequest, SqlValue};

/// Redshift SQL syntax.
///
/// Redshift's `MERGE` only accepts a table as its source, so a batch is first
/// inserted into a session temp table shaped like the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedshiftDialect;

impl RedshiftDialect {
    pub fn new() -> Self {
        Self
    }

    fn stage_name(&self, table: &str) -> String {
        self.quote_ident(&format!("{}_sluice_stage", table))
    }
}

impl Dialect for RedshiftDialect {
    fn name(&self) -> &str {
        "redshift"
    }

    fn render_literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Bytes(b) => format!("FROM_HEX('{}')", hex::encode(b)),
            SqlValue::DateTimeOffset(_) => format!("'{}'::timestamptz", value.to_text()),
            other => standard_literal(other),
        }
    }

    fn build_merge(&self, req: &MergeRequest<'_>) -> MergePlan {
        let key = req.conflict.key();
        if key.is_empty() {
            return MergePlan::single(insert_statement(self, req));
        }

        let target = self.qualify(req.schema, req.table);
        let stage = self.stage_name(req.table);
        let columns = column_list(self, req.columns);

        let setup = vec![
            format!("DROP TABLE IF EXISTS {}", stage),
            format!("CREATE TEMP TABLE {} (LIKE {})", stage, target),
            format!(
                "INSERT INTO {} ({}) VALUES {}",
                stage,
                columns,
                value_tuples(self, req.rows)
            ),
        ];

        // MERGE needs both WHEN clauses; ignore becomes an anti-join insert.
        let merge = if req.updates_matches() {
            format!(
                "MERGE INTO {} USING {} AS src ON {} {}",
                target,
                stage,
                key_match(self, key, &target, "src"),
                merge_actions(self, req)
            )
        } else {
            let src_columns = req
                .columns
                .iter()
                .map(|c| format!("src.{}", self.quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "INSERT INTO {} ({}) SELECT {} FROM {} AS src LEFT JOIN {} AS tgt ON {} WHERE tgt.{} IS NULL",
                target,
                columns,
                src_columns,
                stage,
                target,
                key_match(self, key, "tgt", "src"),
                self.quote_ident(&key[0])
            )
        };

        MergePlan {
            setup,
            merge,
            teardown: vec![format!("DROP TABLE {}", stage)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::{ConflictAction, ConflictSpec};

    fn plan(key: &[&str], action: ConflictAction) -> MergePlan {
        let columns = vec!["id".to_string(), "name".to_string()];
        let rows = vec![vec![SqlValue::I64(1), SqlValue::Text("a".into())]];
        let conflict = ConflictSpec::new(key.iter().map(|k| k.to_string()).collect(), action);
        let req = MergeRequest {
            schema: "dw",
            table: "users",
            columns: &columns,
            rows: &rows,
            conflict: &conflict,
        };
        RedshiftDialect.build_merge(&req)
    }

    #[test]
    fn test_update_merges_from_stage() {
        let plan = plan(&["id"], ConflictAction::Update);
        assert_eq!(
            plan.setup,
            vec![
                "DROP TABLE IF EXISTS \"users_sluice_stage\"".to_string(),
                "CREATE TEMP TABLE \"users_sluice_stage\" (LIKE \"dw\".\"users\")".to_string(),
                "INSERT INTO \"users_sluice_stage\" (\"id\", \"name\") VALUES (1, 'a')".to_string(),
            ]
        );
        assert_eq!(
            plan.merge,
            "MERGE INTO \"dw\".\"users\" USING \"users_sluice_stage\" AS src \
             ON \"dw\".\"users\".\"id\" = src.\"id\" \
             WHEN MATCHED THEN UPDATE SET \"name\" = src.\"name\" \
             WHEN NOT MATCHED THEN INSERT (\"id\", \"name\") VALUES (src.\"id\", src.\"name\")"
        );
        assert_eq!(plan.teardown, vec!["DROP TABLE \"users_sluice_stage\"".to_string()]);
    }

    #[test]
    fn test_ignore_is_anti_join_insert() {
        let plan = plan(&["id"], ConflictAction::Ignore);
        assert!(plan.merge.starts_with("INSERT INTO \"dw\".\"users\""));
        assert!(plan.merge.contains("LEFT JOIN \"dw\".\"users\" AS tgt ON tgt.\"id\" = src.\"id\""));
        assert!(plan.merge.ends_with("WHERE tgt.\"id\" IS NULL"));
    }

    #[test]
    fn test_no_key_skips_staging() {
        let plan = plan(&[], ConflictAction::Ignore);
        assert!(plan.setup.is_empty());
        assert!(plan.teardown.is_empty());
        assert!(plan.merge.starts_with("INSERT INTO \"dw\".\"users\" (\"id\", \"name\") VALUES"));
    }

    #[test]
    fn test_bytes_literal() {
        assert_eq!(
            RedshiftDialect.render_literal(&SqlValue::Bytes(vec![1, 255])),
            "FROM_HEX('01ff')"
        );
    }
}
