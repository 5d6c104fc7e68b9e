//! HTTP health endpoint backed by reqwest.

use crate::core::{Error, Result};
use crate::services::health::{HealthEndpoint, HealthResponse};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Probes `GET <base_url>/health`.
#[derive(Clone, Debug)]
pub struct HttpHealthEndpoint {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpHealthEndpoint {
    /// Create an endpoint for a service base URL.
    ///
    /// `timeout` bounds each request independently of the caller's deadline.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: Self::health_url(base_url),
            timeout,
        })
    }

    /// Full health URL for a base URL, adding a scheme when missing.
    pub fn health_url(base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{}/health", base)
        } else {
            format!("https://{}/health", base)
        }
    }

    /// URL being probed.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout(self.timeout.as_millis() as u64)
        } else {
            err.into()
        }
    }
}

#[async_trait]
impl HealthEndpoint for HttpHealthEndpoint {
    async fn check(&self) -> Result<HealthResponse> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::HealthCheck(format!("{} returned {}", self.url, status)));
        }
        response
            .json::<HealthResponse>()
            .await
            .map_err(|e| self.request_error(e))
    }
}
