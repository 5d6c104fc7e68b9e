//! Scripted collaborators for tests.

use crate::core::{now, Error, Result};
use crate::services::health::{HealthEndpoint, HealthResponse};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Clone, Debug)]
enum Mode {
    Healthy,
    Hang,
    Status(String),
}

/// Health endpoint whose answers are set by the test.
#[derive(Debug)]
pub struct ScriptedEndpoint {
    region: String,
    mode: Mutex<Mode>,
    failures: AtomicU32,
    calls: AtomicU32,
}

impl ScriptedEndpoint {
    /// Endpoint answering `healthy` for `region`.
    pub fn healthy(region: &str) -> Self {
        Self {
            region: region.to_string(),
            mode: Mutex::new(Mode::Healthy),
            failures: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    /// Never answer.
    pub fn hang(&self) {
        self.set(Mode::Hang);
    }

    /// Answer `healthy` again.
    pub fn recover(&self) {
        self.set(Mode::Healthy);
    }

    /// Answer 200 with another status.
    pub fn respond_status(&self, status: &str) {
        self.set(Mode::Status(status.to_string()));
    }

    /// Fail the next `n` requests with a transport error.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Requests received so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn set(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    fn response(&self, status: &str) -> HealthResponse {
        HealthResponse {
            status: status.to_string(),
            region: self.region.clone(),
            timestamp: now().to_rfc3339(),
        }
    }
}

#[async_trait]
impl HealthEndpoint for ScriptedEndpoint {
    async fn check(&self) -> Result<HealthResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Transport("connection reset by peer".to_string()));
        }

        let mode = self.mode.lock().unwrap().clone();
        match mode {
            Mode::Healthy => Ok(self.response("healthy")),
            Mode::Status(status) => Ok(self.response(&status)),
            Mode::Hang => std::future::pending().await,
        }
    }
}
