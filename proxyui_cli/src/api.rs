//! Request/response client for the proxy control API
//!
//! Non-streaming calls (configuration, storage lookups) go through
//! [`ApiClient`]; [`websocket_url`] derives the event stream address from the
//! same base URL.

use proxyui_common::constants;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Control API errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed: secret is wrong or missing")]
    Unauthorized,

    #[error("Request failed: {status} {reason}")]
    Status { status: u16, reason: String },

    #[error("Server error {code}: {message}")]
    Backend { code: i64, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid API address: {0}")]
    InvalidUrl(String),

    #[error("Secret contains characters not allowed in a header")]
    InvalidSecret,
}

/// Build a WebSocket URL for `endpoint` on the server behind `base_url`.
///
/// `https` maps to `wss`, anything else to `ws`. Any path on the base URL is
/// kept as a prefix. The token parameter is always present, empty when no
/// secret is configured.
pub fn websocket_url(base_url: &str, endpoint: &str, secret: Option<&str>) -> Result<Url, ApiError> {
    let invalid = || ApiError::InvalidUrl(base_url.to_string());

    let mut url = Url::parse(base_url).map_err(|_| invalid())?;
    if url.host_str().is_none() {
        return Err(invalid());
    }

    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme).map_err(|_| invalid())?;

    let path = format!("{}{}", url.path().trim_end_matches('/'), endpoint);
    url.set_path(&path);
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair(constants::TOKEN_PARAM, secret.unwrap_or(""));

    Ok(url)
}

/// Generic response envelope used by the storage endpoints
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

/// Presigned download for a stored exchange body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadInfo {
    pub download_url: String,
    /// RFC 3339
    pub expires_at: String,
    pub filename: String,
    pub size: i64,
}

/// Client for the control API
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    secret: Option<String>,
    client: Client,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str, secret: Option<&str>) -> Result<Self, ApiError> {
        Url::parse(base_url).map_err(|_| ApiError::InvalidUrl(base_url.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.filter(|s| !s.is_empty()).map(str::to_string),
            client: Client::builder().timeout(Duration::from_secs(10)).build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    /// Event stream address for this server
    pub fn stream_url(&self) -> Result<Url, ApiError> {
        websocket_url(&self.base_url, constants::STREAM_PATH, self.secret())
    }

    /// Headers attached to every request
    pub fn headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(secret) = &self.secret {
            let value = HeaderValue::from_str(&format!("Bearer {}", secret))
                .map_err(|_| ApiError::InvalidSecret)?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }

    fn endpoint_url(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Url, ApiError> {
        let raw = format!("{}{}", self.base_url, endpoint);
        let url = if params.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, params)
        };
        url.map_err(|_| ApiError::InvalidUrl(raw))
    }

    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Value, ApiError> {
        let mut request = self.client.request(method, url).headers(self.headers()?);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        Ok(response.json().await?)
    }

    /// Issue a request and return the parsed JSON body
    pub async fn fetch_json(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = self.endpoint_url(endpoint, &[])?;
        tracing::debug!("{} {}", method, url);
        self.send(method, url, body).await
    }

    /// Fetch the proxy configuration
    pub async fn fetch_configs(&self) -> Result<Value, ApiError> {
        self.fetch_json(Method::GET, constants::CONFIGS_ENDPOINT, None)
            .await
    }

    /// Resolve a stored exchange body (e.g. `mitm-data/2026-02-04/10086/req`) to a download link
    pub async fn storage_download(&self, key: &str) -> Result<DownloadInfo, ApiError> {
        let url = self.endpoint_url(constants::STORAGE_DOWNLOAD_ENDPOINT, &[("key", key)])?;
        tracing::debug!("GET {}", url);

        let body = self.send(Method::GET, url, None).await?;
        let envelope: ApiResponse<DownloadInfo> = serde_json::from_value(body)
            .map_err(|e| ApiError::Backend {
                code: -1,
                message: format!("Unexpected response: {}", e),
            })?;

        match envelope {
            ApiResponse {
                code: 0,
                data: Some(info),
                ..
            } => Ok(info),
            ApiResponse { code, message, .. } => Err(ApiError::Backend { code, message }),
        }
    }
}
