//! In-memory traffic control plane.
//!
//! Holds per-region health observations and the current routing table,
//! and records every redirect it is asked to perform.

use crate::core::{Error, RedirectError, Result};
use crate::services::traffic::TrafficControlPlane;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};

#[derive(Debug, Default)]
struct ControlState {
    healthy: HashMap<String, bool>,
    routes: HashMap<String, String>,
    redirects: Vec<(String, String)>,
    health_queries: Vec<String>,
    redirect_failure: Option<RedirectError>,
    verify_failure: Option<String>,
}

/// Traffic control plane backed by in-memory state.
#[derive(Debug, Default)]
pub struct InMemoryTrafficControl {
    state: RwLock<ControlState>,
}

impl InMemoryTrafficControl {
    /// Create a control plane where no region has been observed yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the health checker observation for a region.
    pub fn set_healthy(&self, region: &str, healthy: bool) -> Result<()> {
        self.state()?.healthy.insert(region.to_string(), healthy);
        Ok(())
    }

    /// Make subsequent redirects fail with `error`.
    pub fn fail_redirects(&self, error: RedirectError) -> Result<()> {
        self.state()?.redirect_failure = Some(error);
        Ok(())
    }

    /// Make subsequent health queries fail with a transport error.
    pub fn fail_health_queries(&self, message: &str) -> Result<()> {
        self.state()?.verify_failure = Some(message.to_string());
        Ok(())
    }

    /// Redirects performed so far, as (source, target).
    pub fn redirects(&self) -> Vec<(String, String)> {
        self.state
            .read()
            .map(|state| state.redirects.clone())
            .unwrap_or_default()
    }

    /// Number of health queries made so far.
    pub fn health_queries(&self) -> usize {
        self.state
            .read()
            .map(|state| state.health_queries.len())
            .unwrap_or_default()
    }

    /// Region currently serving traffic addressed to `region`.
    pub fn route_for(&self, region: &str) -> Option<String> {
        self.state
            .read()
            .ok()
            .map(|state| state.routes.get(region).cloned().unwrap_or_else(|| region.to_string()))
    }

    fn state(&self) -> Result<RwLockWriteGuard<'_, ControlState>> {
        self.state
            .write()
            .map_err(|_| Error::Internal("traffic control lock poisoned".to_string()))
    }
}

#[async_trait]
impl TrafficControlPlane for InMemoryTrafficControl {
    async fn verify_healthy(&self, region: &str) -> Result<bool> {
        let mut state = self.state()?;
        state.health_queries.push(region.to_string());
        if let Some(message) = &state.verify_failure {
            return Err(Error::Transport(message.clone()));
        }
        Ok(state.healthy.get(region).copied().unwrap_or(false))
    }

    async fn redirect(&self, source: &str, target: &str) -> std::result::Result<(), RedirectError> {
        let mut state = self
            .state()
            .map_err(|e| RedirectError::Transport(e.to_string()))?;
        if let Some(err) = &state.redirect_failure {
            return Err(err.clone());
        }
        state.redirects.push((source.to_string(), target.to_string()));
        state.routes.insert(source.to_string(), target.to_string());
        Ok(())
    }
}
