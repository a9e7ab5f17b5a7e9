//! REST client for the appliance API
//!
//! Wraps `reqwest` with the connection settings the audit needs and retries
//! idempotent reads with exponential backoff on transient failures.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::api::StorageApi;
use crate::error::{ApiError, DecodeError, Result};
use crate::metrics::{self, RequestTimer};
use crate::types::{
    self, Association, Extent, ResourceClass, SessionRecord, Target, TargetId,
};

/// Initial backoff delay in milliseconds
const INITIAL_BACKOFF_MS: u64 = 100;
/// Maximum backoff delay in milliseconds
const MAX_BACKOFF_MS: u64 = 5000;
/// Backoff multiplier (exponential factor)
const BACKOFF_MULTIPLIER: u64 = 2;
/// Error bodies are cut to this many characters
const MAX_ERROR_BODY: usize = 512;

/// Connection settings for the appliance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// `http` or `https`
    pub scheme: String,
    pub api_key: String,
    /// Accept self-signed certificates
    pub allow_insecure: bool,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries for transient read failures (0 disables retrying)
    pub max_retries: u32,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 443,
            scheme: "https".to_string(),
            api_key: api_key.into(),
            allow_insecure: false,
            timeout: Duration::from_secs(60),
            max_retries: 3,
        }
    }

    /// Base URL of the v2.0 REST API, without trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}/api/v2.0", self.scheme, self.host, self.port)
    }

    fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ApiError::InvalidConfig("host cannot be empty".into()));
        }
        if self.host.contains('/') {
            return Err(ApiError::InvalidConfig(format!(
                "host '{}' must not contain a path",
                self.host
            )));
        }
        if self.api_key.is_empty() {
            return Err(ApiError::InvalidConfig("API key cannot be empty".into()));
        }
        if self.scheme != "http" && self.scheme != "https" {
            return Err(ApiError::InvalidConfig(format!(
                "unknown scheme '{}': expected http or https",
                self.scheme
            )));
        }
        Ok(())
    }
}

/// Execute a read with exponential backoff retry.
///
/// Retries up to `max_retries` times while the error is retryable.
async fn with_retry<T, F, Fut>(operation_name: &str, max_retries: u32, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempt += 1;

                if !err.is_retryable() || attempt > max_retries {
                    if attempt > 1 {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %err,
                            "Request failed after retries"
                        );
                    }
                    return Err(err);
                }

                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    max_retries = max_retries,
                    error = %err,
                    backoff_ms = backoff_ms,
                    "Retryable error, backing off"
                );

                metrics::record_retry(operation_name);

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;

                backoff_ms = (backoff_ms * BACKOFF_MULTIPLIER).min(MAX_BACKOFF_MS);
            }
        }
    }
}

fn transport_error(endpoint: &str, source: reqwest::Error) -> ApiError {
    if source.is_timeout() {
        ApiError::Timeout {
            endpoint: endpoint.to_string(),
        }
    } else {
        ApiError::Transport {
            endpoint: endpoint.to_string(),
            source,
        }
    }
}

/// Client for the appliance REST API.
#[derive(Debug, Clone)]
pub struct TrueNasClient {
    http: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl TrueNasClient {
    /// Build a client. No request is made until the first call.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| ApiError::InvalidConfig("API key contains invalid characters".into()))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .danger_accept_invalid_certs(config.allow_insecure)
            .build()
            .map_err(|e| ApiError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            max_retries: config.max_retries,
        })
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, endpoint))
    }

    /// Send a request once and parse the JSON body.
    async fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|&i| body.is_char_boundary(i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(ApiError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| transport_error(endpoint, e))
    }

    /// GET with retry, timed under `operation`.
    async fn get(
        &self,
        operation: &'static str,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<Value> {
        debug!(operation, endpoint, "GET");
        let timer = RequestTimer::new(operation);

        let result = with_retry(operation, self.max_retries, || {
            self.send(endpoint, self.request(Method::GET, endpoint).query(query))
        })
        .await;

        match &result {
            Ok(_) => timer.success(),
            Err(e) => timer.failure(e.code()),
        }
        result
    }

    /// Raw session records exactly as the appliance reports them.
    ///
    /// Diagnostic only; the audit uses the typed [`StorageApi::list_sessions`].
    pub async fn raw_sessions(&self) -> Result<Vec<Value>> {
        match self.get("raw_sessions", "iscsi/global/sessions", &[]).await? {
            Value::Array(items) => Ok(items),
            _ => Err(DecodeError::NotAList {
                resource: "session",
            }
            .into()),
        }
    }
}

impl StorageApi for TrueNasClient {
    #[instrument(skip(self))]
    async fn list_targets(&self) -> Result<Vec<Target>> {
        let value = self.get("list_targets", "iscsi/target", &[]).await?;
        Ok(types::decode_targets(&value)?)
    }

    #[instrument(skip(self))]
    async fn list_extents(&self) -> Result<Vec<Extent>> {
        let value = self.get("list_extents", "iscsi/extent", &[]).await?;
        Ok(types::decode_extents(&value)?)
    }

    #[instrument(skip(self))]
    async fn list_associations(&self) -> Result<Vec<Association>> {
        let value = self
            .get("list_associations", "iscsi/targetextent", &[])
            .await?;
        Ok(types::decode_associations(&value)?)
    }

    #[instrument(skip(self))]
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let value = self
            .get("list_sessions", "iscsi/global/sessions", &[])
            .await?;
        Ok(types::decode_sessions(&value)?)
    }

    #[instrument(skip(self))]
    async fn exists_by_path(&self, class: ResourceClass, path: &str) -> Result<bool> {
        // Datasets and zvols share the dataset namespace
        let value = self
            .get("exists_by_path", "pool/dataset", &[("id", path)])
            .await?;
        let items = value.as_array().ok_or(DecodeError::NotAList {
            resource: "dataset",
        })?;

        // Only an exact id match counts, whatever filtering the server applied
        Ok(items
            .iter()
            .any(|item| item.get("id").and_then(Value::as_str) == Some(path)))
    }

    #[instrument(skip(self))]
    async fn delete_target(&self, id: TargetId, force: bool) -> Result<()> {
        let endpoint = format!("iscsi/target/id/{}", id);
        let timer = RequestTimer::new("delete_target");

        // Not retried: a timed-out delete may still have been applied
        let result = self
            .send(
                &endpoint,
                self.request(Method::DELETE, &endpoint).json(&force),
            )
            .await;

        match result {
            Ok(_) => {
                timer.success();
                Ok(())
            }
            Err(e) => {
                timer.failure(e.code());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_base_url() {
        let mut config = ClientConfig::new("nas.example.org", "key");
        assert_eq!(config.base_url(), "https://nas.example.org:443/api/v2.0");

        config.scheme = "http".into();
        config.port = 8080;
        assert_eq!(config.base_url(), "http://nas.example.org:8080/api/v2.0");
    }

    #[test]
    fn test_config_validation() {
        assert!(ClientConfig::new("nas", "key").validate().is_ok());
        assert!(ClientConfig::new("", "key").validate().is_err());
        assert!(ClientConfig::new("nas", "").validate().is_err());
        assert!(ClientConfig::new("nas/api", "key").validate().is_err());

        let mut config = ClientConfig::new("nas", "key");
        config.scheme = "ftp".into();
        assert!(matches!(config.validate(), Err(ApiError::InvalidConfig(_))));
    }

    #[test]
    fn test_new_rejects_header_breaking_key() {
        let config = ClientConfig::new("nas", "bad\nkey");
        assert!(matches!(
            TrueNasClient::new(&config),
            Err(ApiError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_error() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ApiError::Timeout {
                        endpoint: "iscsi/target".into(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("op", 2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ApiError::Status {
                    endpoint: "iscsi/target".into(),
                    status: 502,
                    body: String::new(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_skips_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("op", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::Decode(DecodeError::NotAList { resource: "target" })) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
