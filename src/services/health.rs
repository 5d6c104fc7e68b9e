//! Regional health endpoint contract.

use crate::core::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Body of a `GET /health` response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Reported status, `healthy` when serving
    pub status: String,
    /// Region that answered
    pub region: String,
    /// Server-side timestamp as sent
    pub timestamp: String,
}

impl HealthResponse {
    /// Check if the endpoint reports itself healthy.
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }
}

/// A region's service health endpoint.
#[async_trait]
pub trait HealthEndpoint: Send + Sync {
    /// Perform one health request.
    ///
    /// Any non-200 answer is an error.
    async fn check(&self) -> Result<HealthResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_parse() {
        let body = r#"{"status":"healthy","region":"ap-south-1","timestamp":"2024-01-01T00:00:00"}"#;
        let response: HealthResponse = serde_json::from_str(body).unwrap();
        assert!(response.is_healthy());
        assert_eq!(response.region, "ap-south-1");
    }

    #[test]
    fn test_unhealthy_status() {
        let response = HealthResponse {
            status: "degraded".into(),
            region: "ap-south-1".into(),
            timestamp: String::new(),
        };
        assert!(!response.is_healthy());
    }
}
