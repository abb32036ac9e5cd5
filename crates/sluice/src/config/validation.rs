//! Configuration validation.
//!
//! Everything here is detectable before any I/O; the rest of the taxonomy
//! (missing placeholders, unreachable hosts) surfaces at first use.

use super::{AuthKind, Config, ConnectionConfig, SourceKind};
use crate::error::{Result, SluiceError};
use crate::load::ConflictAction;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    match config.source.kind()? {
        SourceKind::Database(_) => {
            validate_connection("source", &config.source.connection)?;
            if !config.source.queries.contains("extract") {
                return Err(SluiceError::QueryNotFound("extract".into()));
            }
        }
        SourceKind::Api => {
            let api = config.source.api.as_ref().ok_or_else(|| {
                SluiceError::Config("source.api is required for type 'api'".into())
            })?;
            if api.request.url.is_empty() {
                return Err(SluiceError::Config("source.api.request.url is required".into()));
            }
            if api.auth.kind()? == AuthKind::OAuth2 {
                if api.auth.access_token_url.as_deref().unwrap_or("").is_empty() {
                    return Err(SluiceError::Config(
                        "source.api.auth.access_token_url is required for oauth2".into(),
                    ));
                }
                if api.auth.client_id.is_none() || api.auth.client_secret.is_none() {
                    return Err(SluiceError::Config(
                        "source.api.auth.client_id and client_secret are required for oauth2"
                            .into(),
                    ));
                }
            }
        }
    }

    // Target validation
    crate::core::registry::BackendKind::parse(&config.target.connection.r#type)?;
    validate_connection("target", &config.target.connection)?;
    if config.target.table.is_empty() {
        return Err(SluiceError::Config("target.table is required".into()));
    }

    // Load validation
    if config.load.conflict_action == ConflictAction::Update && config.load.conflict_key.is_empty()
    {
        return Err(SluiceError::ConflictKeyRequired {
            table: config.target.full_name(),
        });
    }
    if config.load.batch_size == 0 {
        return Err(SluiceError::Config("load.batch_size must be at least 1".into()));
    }

    Ok(())
}

fn validate_connection(side: &str, conn: &ConnectionConfig) -> Result<()> {
    if conn.host.is_empty() {
        return Err(SluiceError::Config(format!("{}.host is required", side)));
    }
    if conn.database.is_empty() {
        return Err(SluiceError::Config(format!("{}.database is required", side)));
    }
    if conn.username.is_empty() {
        return Err(SluiceError::Config(format!("{}.username is required", side)));
    }
    Ok(())
}
