//! Conflict and existence handling for merge loads.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SluiceError};

/// What happens to an incoming row whose key already exists in the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictAction {
    /// Keep the existing row.
    #[default]
    Ignore,
    /// Overwrite every non-key column from the incoming row.
    Update,
}

/// How the loader treats a target table that already holds rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
    /// Refuse to load into a non-empty table.
    Fail,
    /// Delete existing rows before the first write of the run.
    Replace,
    /// Merge into whatever is there.
    #[default]
    Append,
}

/// Conflict key columns plus the action on match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictSpec {
    key: Vec<String>,
    action: ConflictAction,
}

impl ConflictSpec {
    pub fn new(key: Vec<String>, action: ConflictAction) -> Self {
        Self { key, action }
    }

    pub fn key(&self) -> &[String] {
        &self.key
    }

    pub fn action(&self) -> ConflictAction {
        self.action
    }

    /// `update` without a key cannot match anything.
    pub fn check_action(&self, table: &str) -> Result<()> {
        if self.action == ConflictAction::Update && self.key.is_empty() {
            return Err(SluiceError::ConflictKeyRequired {
                table: table.to_string(),
            });
        }
        Ok(())
    }

    /// Check conflict settings against a target and the incoming columns.
    ///
    /// `update` needs a key, and every key column must be present in the data.
    pub fn validate(&self, table: &str, columns: &[String]) -> Result<()> {
        self.check_action(table)?;
        if let Some(missing) = self.key.iter().find(|k| !columns.contains(k)) {
            return Err(SluiceError::Config(format!(
                "conflict_key column '{}' is not present in the data loaded into {}",
                missing, table
            )));
        }
        Ok(())
    }
}
