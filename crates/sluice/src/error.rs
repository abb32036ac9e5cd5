//! Error types for the extract/load core.

use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum SluiceError {
    /// Configuration error (invalid YAML, missing fields, bad option values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A query role was requested that the source does not define.
    #[error("Query not found: '{0}'")]
    QueryNotFound(String),

    /// A query template referenced a placeholder the parameters do not supply.
    #[error("Missing placeholder '{{{placeholder}}}' while templating query '{query}'")]
    MissingPlaceholder { placeholder: String, query: String },

    /// `conflict_action: update` was requested without a conflict key.
    #[error("conflict_key must be specified when using 'update' conflict action (target {table})")]
    ConflictKeyRequired { table: String },

    /// The backend kind tag is not registered.
    #[error("Unknown backend type: '{0}'")]
    UnknownBackend(String),

    /// Failed to connect to a backend.
    #[error("Connection to {backend} failed: {message}")]
    Connection { backend: String, message: String },

    /// A statement failed on a backend.
    #[error("Query on {backend} failed: {message}")]
    Query { backend: String, message: String },

    /// PostgreSQL/Redshift protocol error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// HTTP transport error (or non-2xx when raise_for_status is set).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// OAuth2 token exchange failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Response payload could not be turned into a table.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The cached source data is in a state the accessor cannot serve.
    #[error("Invalid data in source: {0}")]
    InvalidState(String),

    /// A merge batch failed; earlier batches of the same call stay applied.
    #[error("Write to {table} failed at batch {batch_index}: {source}")]
    Batch {
        table: String,
        batch_index: usize,
        #[source]
        source: Box<SluiceError>,
    },

    /// The target table does not exist.
    #[error("Target table {0} does not exist")]
    TargetMissing(String),

    /// `if_exists: fail` and the target already holds rows.
    #[error("Target table {table} already contains {rows} rows (if_exists=fail)")]
    TargetNotEmpty { table: String, rows: i64 },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV chunk file error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl SluiceError {
    /// Create a Connection error for a backend.
    pub fn connection(backend: impl Into<String>, message: impl ToString) -> Self {
        SluiceError::Connection {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    /// Create a Query error for a backend.
    pub fn query(backend: impl Into<String>, message: impl ToString) -> Self {
        SluiceError::Query {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    /// Wrap an error raised while writing batch `batch_index` of `table`.
    pub fn batch(table: impl Into<String>, batch_index: usize, source: SluiceError) -> Self {
        SluiceError::Batch {
            table: table.into(),
            batch_index,
            source: Box::new(source),
        }
    }

    /// True for errors detectable from the configuration alone.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            SluiceError::Config(_)
                | SluiceError::QueryNotFound(_)
                | SluiceError::MissingPlaceholder { .. }
                | SluiceError::ConflictKeyRequired { .. }
                | SluiceError::UnknownBackend(_)
                | SluiceError::Yaml(_)
        )
    }

    /// Process exit code: 2 for configuration errors, 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        if self.is_config() {
            2
        } else {
            1
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, SluiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(SluiceError::QueryNotFound("extract".into()).exit_code(), 2);
        assert_eq!(
            SluiceError::ConflictKeyRequired {
                table: "public.t".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(SluiceError::query("postgres", "boom").exit_code(), 1);
        assert_eq!(SluiceError::InvalidState("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_missing_placeholder_message() {
        let err = SluiceError::MissingPlaceholder {
            placeholder: "id".into(),
            query: "extract".into(),
        };
        assert_eq!(
            err.to_string(),
            "Missing placeholder '{id}' while templating query 'extract'"
        );
    }

    #[test]
    fn test_batch_error_chain() {
        let err = SluiceError::batch("dw.orders", 3, SluiceError::query("postgres", "deadlock"));
        let detailed = err.format_detailed();
        assert!(detailed.contains("dw.orders"));
        assert!(detailed.contains("batch 3"));
        assert!(detailed.contains("Caused by"));
        assert!(detailed.contains("deadlock"));
    }
}
