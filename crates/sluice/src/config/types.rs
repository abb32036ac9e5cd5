//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::registry::BackendKind;
use crate::core::table::DecodeOptions;
use crate::error::{Result, SluiceError};
use crate::load::{ConflictAction, ConflictSpec, IfExists};
use crate::source::query::QuerySet;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where rows come from.
    pub source: SourceConfig,

    /// Warehouse table rows are merged into.
    pub target: TargetConfig,

    /// Conflict handling and batching for the load stage.
    #[serde(default)]
    pub load: LoadConfig,
}

/// Connection fields shared by sources and targets.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Backend type tag (`postgres`, `redshift`, `ibmdb2`, or `api` for sources).
    pub r#type: String,

    #[serde(default)]
    pub host: String,

    /// Port; defaults per backend kind when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, alias = "user")]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub database: String,

    /// TLS mode for wire-protocol backends (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,
}

impl ConnectionConfig {
    /// The configured port, or the default port of `kind`.
    pub fn port_or_default(&self, kind: BackendKind) -> u16 {
        self.port.unwrap_or_else(|| kind.default_port())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// What a source's `type` tag resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Database(BackendKind),
    Api,
}

/// Source configuration. Never mutated after the pipeline is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(flatten)]
    pub connection: ConnectionConfig,

    /// Query role name -> SQL text, plus optional `<role>_params` mappings.
    #[serde(default)]
    pub queries: QuerySet,

    /// Rows per chunk for the chunked strategy; non-positive disables chunking.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,

    /// Write each extracted chunk to a CSV file in the working directory.
    #[serde(default)]
    pub dump_data_csv: bool,

    /// Fail the run when an API response is not 2xx.
    #[serde(default)]
    pub raise_for_status: bool,

    /// HTTP source definition (only for `type: api`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiConfig>,
}

impl SourceConfig {
    /// Resolve the `type` tag.
    pub fn kind(&self) -> Result<SourceKind> {
        if self.connection.r#type.eq_ignore_ascii_case("api") {
            return Ok(SourceKind::Api);
        }
        BackendKind::parse(&self.connection.r#type).map(SourceKind::Database)
    }

    /// The chunk size when chunking is enabled.
    pub fn chunking(&self) -> Option<usize> {
        (self.chunk_size > 0).then_some(self.chunk_size as usize)
    }
}

/// Target table configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(flatten)]
    pub connection: ConnectionConfig,

    /// Target schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// Target table name.
    pub table: String,
}

impl TargetConfig {
    /// `schema.table`, unquoted, for logs and error messages.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// Load-stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Column(s) matching incoming rows to existing rows.
    #[serde(default, with = "one_or_many")]
    pub conflict_key: Vec<String>,

    /// What to do with matching rows (default: ignore).
    #[serde(default)]
    pub conflict_action: ConflictAction,

    /// Existence handling for the target (default: append).
    #[serde(default)]
    pub if_exists: IfExists,

    /// Maximum rows per merge statement.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            conflict_key: Vec::new(),
            conflict_action: ConflictAction::default(),
            if_exists: IfExists::default(),
            batch_size: default_batch_size(),
        }
    }
}

impl LoadConfig {
    /// Conflict settings for the merge engine.
    pub fn conflict_spec(&self) -> ConflictSpec {
        ConflictSpec::new(self.conflict_key.clone(), self.conflict_action)
    }
}

/// HTTP API source definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub auth: AuthConfig,

    pub request: RequestConfig,
}

/// Authentication kinds an API source understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    None,
    ApiKey,
    OAuth2,
}

/// API authentication settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// `oauth2`, `apikey`, or absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Token endpoint for the client-credentials grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_url: Option<String>,

    /// Scheme label placed before the token (default: "Bearer").
    #[serde(default = "default_bearer")]
    pub bearer: String,

    /// Static headers sent with every request.
    #[serde(default, alias = "auth_headers_extra")]
    pub extra_headers: BTreeMap<String, String>,

    /// API key shorthand; sent in `api_key_header`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            r#type: None,
            client_id: None,
            client_secret: None,
            access_token_url: None,
            bearer: default_bearer(),
            extra_headers: BTreeMap::new(),
            api_key: None,
            api_key_header: default_api_key_header(),
        }
    }
}

impl AuthConfig {
    /// Resolve the auth `type` tag (case-insensitive).
    pub fn kind(&self) -> Result<AuthKind> {
        match self.r#type.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("") | Some("none") => Ok(AuthKind::None),
            Some("apikey") | Some("api_key") => Ok(AuthKind::ApiKey),
            Some("oauth2") => Ok(AuthKind::OAuth2),
            Some(other) => Err(SluiceError::Config(format!(
                "Unknown api.auth.type '{}'. Supported types: oauth2, apikey",
                other
            ))),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("type", &self.r#type)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("access_token_url", &self.access_token_url)
            .field("bearer", &self.bearer)
            .field("extra_headers", &self.extra_headers.keys().collect::<Vec<_>>())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_key_header", &self.api_key_header)
            .finish()
    }
}

/// The request an API source issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request body: strings are sent verbatim, anything else as JSON.
    #[serde(default, alias = "data", skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    /// How the JSON payload maps onto a table.
    #[serde(default, alias = "read_json_params")]
    pub decode: DecodeOptions,
}

/// Accepts either a single string or a list of strings.
mod one_or_many {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(match Option::<OneOrMany>::deserialize(d)? {
            None => Vec::new(),
            Some(OneOrMany::One(s)) => vec![s],
            Some(OneOrMany::Many(v)) => v,
        })
    }

    pub fn serialize<S: Serializer>(v: &[String], s: S) -> Result<S::Ok, S::Error> {
        v.serialize(s)
    }
}

// Default value functions for serde
fn default_disable() -> String {
    "disable".to_string()
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_chunk_size() -> i64 {
    -1
}

fn default_batch_size() -> usize {
    1_000
}

fn default_bearer() -> String {
    "Bearer".to_string()
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}
