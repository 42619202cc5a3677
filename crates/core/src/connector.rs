//! System connector: moves record batches in and out of external systems.
//!
//! Every external system exposes the same small HTTP contract:
//!
//! - `GET {endpoint}/data` returns a JSON object or array of objects
//! - `POST {endpoint}/data` accepts the same shape
//! - `GET {endpoint}/health` answers with a status code
//!
//! All calls carry `Authorization: Bearer {api_key}`. The connector never
//! retries; retry policy belongs to the task runner.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::ConnectorConfig;
use crate::errors::ConnectorError;
use crate::models::{Batch, ExternalSystem};

/// Longest response body excerpt kept in a status error.
const MAX_ERROR_BODY: usize = 512;

/// Result of probing a system's `/health` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub status_code: u16,
    #[serde(rename = "response_time")]
    pub response_time_secs: f64,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Transport used by the sync engine to reach external systems.
#[async_trait]
pub trait SystemConnector: Send + Sync {
    /// Read the current batch of records from a system.
    async fn fetch(&self, system: &ExternalSystem) -> Result<Batch, ConnectorError>;

    /// Write a batch into a system. Returns the number of records written.
    async fn push(&self, system: &ExternalSystem, batch: &Batch) -> Result<usize, ConnectorError>;

    /// Query the system's health endpoint.
    async fn health_check(&self, system: &ExternalSystem) -> Result<HealthReport, ConnectorError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// [`SystemConnector`] over HTTP with per-call timeouts.
#[derive(Clone)]
pub struct HttpConnector {
    http: reqwest::Client,
    request_timeout: Duration,
    health_timeout: Duration,
}

impl HttpConnector {
    pub fn new(config: &ConnectorConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("integrasync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        info!(
            request_timeout_secs = config.request_timeout_secs,
            health_timeout_secs = config.health_timeout_secs,
            "created HttpConnector"
        );
        Ok(Self {
            http,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            health_timeout: Duration::from_secs(config.health_timeout_secs),
        })
    }

    async fn check_status(
        system: &ExternalSystem,
        endpoint: &str,
        resp: reqwest::Response,
    ) -> Result<reqwest::Response, ConnectorError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let mut body = resp.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(ConnectorError::Status {
            system: system.name.clone(),
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SystemConnector for HttpConnector {
    #[instrument(skip(self, system), fields(system = %system.name))]
    async fn fetch(&self, system: &ExternalSystem) -> Result<Batch, ConnectorError> {
        let url = system.endpoint_url("data");
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&system.api_key)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| ConnectorError::from_reqwest(&system.name, &url, e))?;
        let resp = Self::check_status(system, &url, resp).await?;

        let text = resp
            .text()
            .await
            .map_err(|e| ConnectorError::from_reqwest(&system.name, &url, e))?;
        let batch: Batch =
            serde_json::from_str(&text).map_err(|e| ConnectorError::InvalidPayload {
                system: system.name.clone(),
                endpoint: url.clone(),
                detail: e.to_string(),
            })?;

        debug!(records = batch.len(), "fetched batch");
        Ok(batch)
    }

    #[instrument(skip(self, system, batch), fields(system = %system.name, records = batch.len()))]
    async fn push(&self, system: &ExternalSystem, batch: &Batch) -> Result<usize, ConnectorError> {
        let url = system.endpoint_url("data");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&system.api_key)
            .timeout(self.request_timeout)
            .json(batch)
            .send()
            .await
            .map_err(|e| ConnectorError::from_reqwest(&system.name, &url, e))?;
        Self::check_status(system, &url, resp).await?;

        debug!("pushed batch");
        Ok(batch.len())
    }

    #[instrument(skip(self, system), fields(system = %system.name))]
    async fn health_check(&self, system: &ExternalSystem) -> Result<HealthReport, ConnectorError> {
        let url = system.endpoint_url("health");
        let started = Instant::now();
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&system.api_key)
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(|e| ConnectorError::from_reqwest(&system.name, &url, e))?;

        let report = HealthReport {
            status_code: resp.status().as_u16(),
            response_time_secs: started.elapsed().as_secs_f64(),
        };
        debug!(status = report.status_code, "health check answered");
        Ok(report)
    }
}
