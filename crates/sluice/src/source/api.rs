//! HTTP API source.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn, Instrument, Span};

use super::sink::ChunkSink;
use super::{PipelineSource, SourceData, SourceMetrics};
use crate::config::{ApiConfig, AuthKind, SourceConfig};
use crate::core::Table;
use crate::error::{Result, SluiceError};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// A source issuing one HTTP request and decoding the JSON response.
pub struct ApiSource {
    api: ApiConfig,
    raise_for_status: bool,
    client: Client,
    token: OnceCell<String>,
    data: SourceData,
    metrics: Arc<SourceMetrics>,
    sink: Option<Mutex<ChunkSink>>,
    span: Span,
}

impl ApiSource {
    pub fn new(config: &SourceConfig, run_id: &str, span: Span) -> Result<Self> {
        let api = config
            .api
            .clone()
            .ok_or_else(|| SluiceError::Config("source.api is required for type 'api'".into()))?;
        // Fail on unknown auth types before any request goes out.
        api.auth.kind()?;

        Ok(Self {
            api,
            raise_for_status: config.raise_for_status,
            client: Client::new(),
            token: OnceCell::new(),
            data: SourceData::Empty,
            metrics: Arc::new(SourceMetrics::new()),
            sink: config
                .dump_data_csv
                .then(|| Mutex::new(ChunkSink::in_working_dir(run_id))),
            span,
        })
    }

    /// Write the response dump into `dir` instead of the working directory.
    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>, run_id: &str) -> Self {
        if self.sink.is_some() {
            self.sink = Some(Mutex::new(ChunkSink::new(dir, run_id)));
        }
        self
    }

    /// The OAuth2 access token, fetched on first use and cached afterwards.
    pub async fn access_token(&self) -> Result<&str> {
        self.token
            .get_or_try_init(|| self.fetch_token())
            .await
            .map(String::as_str)
    }

    async fn fetch_token(&self) -> Result<String> {
        let auth = &self.api.auth;
        let url = auth
            .access_token_url
            .as_deref()
            .ok_or_else(|| SluiceError::Auth("access_token_url is not configured".into()))?;

        let mut form = vec![("grant_type", "client_credentials")];
        if let Some(id) = auth.client_id.as_deref() {
            form.push(("client_id", id));
        }
        if let Some(secret) = auth.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        debug!("Requesting access token from {}", url);
        let response = self
            .client
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|e| SluiceError::Auth(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SluiceError::Auth(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SluiceError::Auth(format!("invalid token response: {}", e)))?;
        Ok(token.access_token)
    }

    /// Headers for the data request.
    ///
    /// The `api_key` shorthand goes first, then extra auth headers, then
    /// request headers; later entries win. For OAuth2 an `Authorization`
    /// header is added unless one is already set.
    pub async fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth_kind = self.api.auth.kind()?;
        if let (AuthKind::ApiKey, Some(key)) = (auth_kind, self.api.auth.api_key.as_deref()) {
            let name = &self.api.auth.api_key_header;
            headers.insert(header_name(name)?, header_value(name, key)?);
        }

        let configured = self
            .api
            .auth
            .extra_headers
            .iter()
            .chain(self.api.request.headers.iter());
        for (name, value) in configured {
            headers.insert(header_name(name)?, header_value(name, value)?);
        }

        if auth_kind == AuthKind::OAuth2 && !headers.contains_key(AUTHORIZATION) {
            let token = self.access_token().await?;
            let value = format!("{} {}", self.api.auth.bearer, token);
            headers.insert(AUTHORIZATION, header_value("Authorization", &value)?);
        }
        Ok(headers)
    }

    async fn request(&self) -> Result<Table> {
        let request = &self.api.request;
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| SluiceError::Config(format!("Invalid HTTP method '{}'", request.method)))?;

        let mut builder = self
            .client
            .request(method.clone(), &request.url)
            .headers(self.headers().await?);
        builder = match &request.body {
            Some(serde_json::Value::String(raw)) => builder.body(raw.clone()),
            Some(body) => builder.json(body),
            None => builder,
        };

        info!("{} {}", method, request.url);
        let response = builder.send().await?;
        let status = response.status();
        if let Err(e) = response.error_for_status_ref() {
            if self.raise_for_status {
                return Err(e.into());
            }
            warn!("API responded with {}, decoding the body anyway", status);
        }

        let payload: serde_json::Value = response.json().await?;
        Table::from_json(&payload, &request.decode)
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| SluiceError::Config(format!("Invalid header name '{}'", name)))
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| SluiceError::Config(format!("Invalid value for header '{}'", name)))
}

#[async_trait]
impl PipelineSource for ApiSource {
    async fn extract(&mut self) -> Result<()> {
        let table = self.request().instrument(self.span.clone()).await?;
        debug!("API response decoded into {} rows", table.len());
        self.metrics.add_total(table.len());

        if let Some(sink) = &self.sink {
            sink.lock()
                .map_err(|_| SluiceError::InvalidState("chunk sink lock poisoned".into()))?
                .write_full(&table)?;
        }
        self.data = SourceData::Single(table);
        Ok(())
    }

    fn cached(&self) -> &SourceData {
        &self.data
    }

    fn cached_mut(&mut self) -> &mut SourceData {
        &mut self.data
    }

    fn metrics(&self) -> Arc<SourceMetrics> {
        self.metrics.clone()
    }

    fn chunk_files(&self) -> Vec<PathBuf> {
        self.sink
            .as_ref()
            .and_then(|sink| sink.lock().ok().map(|s| s.written_files().to_vec()))
            .unwrap_or_default()
    }

    /// Only the token exchange is checked; the data endpoint is not called.
    async fn ping(&self) -> Result<()> {
        if self.api.auth.kind()? == AuthKind::OAuth2 {
            self.access_token().await?;
        }
        Ok(())
    }
}

impl fmt::Display for ApiSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "api {} {}", self.api.request.method, self.api.request.url)
    }
}
