//! HTTP client for the measurement collector API.
//!
//! The collector exposes a health probe, a push endpoint taking the
//! measurement as query parameters, and two read endpoints used when the
//! scale itself is out of reach.
//!
//! # Example
//!
//! ```no_run
//! use heightscale_core::collector::CollectorClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = CollectorClient::new("http://localhost:8000")?;
//!
//! if client.is_reachable().await {
//!     if let Some(latest) = client.latest().await? {
//!         println!("{} kg", latest.weight);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use heightscale_types::Measurement;

use crate::sync::{Collector, SyncError};

/// Default collector address, matching the collector server's default port.
pub const DEFAULT_COLLECTOR_URL: &str = "http://localhost:8000";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the collector API.
#[derive(Debug, Clone)]
pub struct CollectorClient {
    client: Client,
    base_url: String,
}

/// Error type for collector client operations.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// The collector is not reachable.
    #[error("Collector not reachable at {url}: {source}")]
    NotReachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// API returned an error response.
    #[error("API error: {message}")]
    ApiError { status: u16, message: String },
}

impl From<CollectorError> for SyncError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::NotReachable { url, source } => {
                SyncError::Unreachable(format!("{url}: {source}"))
            }
            CollectorError::Request(e) => SyncError::Unreachable(e.to_string()),
            CollectorError::InvalidUrl(msg) => SyncError::InvalidEndpoint(msg),
            CollectorError::ApiError { status, message } => {
                SyncError::Rejected { status, message }
            }
        }
    }
}

/// Result type for collector client operations.
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Health probe response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Server-local time; the collector does not send an offset.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// A measurement as stored by the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMeasurement {
    pub weight: f64,
    pub impedance: u16,
    pub height: f64,
    /// Server-local time; the collector does not send an offset.
    pub timestamp: String,
}

impl CollectorClient {
    /// Create a client for the collector at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(CollectorError::Request)?;
        Self::with_client(base_url, client)
    }

    /// Create a client with a custom reqwest Client.
    pub fn with_client(base_url: &str, client: Client) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(CollectorError::InvalidUrl(format!(
                "URL must start with http:// or https://, got: {}",
                base_url
            )));
        }
        let parsed = reqwest::Url::parse(&base_url)
            .map_err(|e| CollectorError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(CollectorError::InvalidUrl(format!(
                "URL has no host: {}",
                base_url
            )));
        }

        Ok(Self { client, base_url })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Any success response to the health probe counts as reachable.
    pub async fn is_reachable(&self) -> bool {
        let url = format!("{}/api/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Get collector health.
    pub async fn health(&self) -> Result<HealthResponse> {
        let url = format!("{}/api/health", self.base_url);
        let response = self.send(self.client.get(&url), &url).await?;
        response.json().await.map_err(CollectorError::Request)
    }

    /// Push one measurement. Any 2xx status is success; the body is ignored.
    pub async fn push(&self, measurement: &Measurement) -> Result<()> {
        let url = format!("{}/api/measurement", self.base_url);
        let request = self.client.post(&url).query(&[
            ("weight", measurement.weight().to_string()),
            ("impedance", measurement.impedance().to_string()),
            ("height", measurement.height().to_string()),
        ]);
        self.send(request, &url).await?;
        Ok(())
    }

    /// The most recent measurement the collector holds.
    pub async fn latest(&self) -> Result<Option<RemoteMeasurement>> {
        let url = format!("{}/api/measurement/latest", self.base_url);
        let response = self.send(self.client.get(&url), &url).await?;
        response.json().await.map_err(CollectorError::Request)
    }

    /// Every measurement the collector holds, oldest first.
    pub async fn measurements(&self) -> Result<Vec<RemoteMeasurement>> {
        let url = format!("{}/api/measurements", self.base_url);
        let response = self.send(self.client.get(&url), &url).await?;
        response.json().await.map_err(CollectorError::Request)
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| CollectorError::NotReachable {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| error_message(&v))
            .unwrap_or_else(|| status.to_string());

        Err(CollectorError::ApiError {
            status: status.as_u16(),
            message,
        })
    }
}

/// Extract the error text from an error body (`error` or FastAPI's `detail`).
fn error_message(body: &serde_json::Value) -> Option<String> {
    ["error", "detail"]
        .iter()
        .find_map(|key| body.get(key).and_then(|e| e.as_str()).map(String::from))
}

#[async_trait]
impl Collector for CollectorClient {
    async fn is_reachable(&self) -> bool {
        CollectorClient::is_reachable(self).await
    }

    async fn push(&self, measurement: &Measurement) -> std::result::Result<(), SyncError> {
        CollectorClient::push(self, measurement)
            .await
            .map_err(SyncError::from)
    }
}
