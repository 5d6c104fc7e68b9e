//! Error types for regionguard.

use thiserror::Error;

/// Result type alias for regionguard operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of the traffic control plane's mutating redirect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RedirectError {
    #[error("redirect transport failure: {0}")]
    Transport(String),

    #[error("redirect not authorized: {0}")]
    Unauthorized(String),
}

/// Errors that can occur in regionguard operations.
#[derive(Error, Debug)]
pub enum Error {
    // Replicated store errors
    #[error("Store unavailable in region {0}")]
    StoreUnavailable(String),

    #[error("Concurrent update of {0} kept winning")]
    Conflict(String),

    #[error("Pair lease {0} is held by another failover")]
    LeaseLost(String),

    // Transient transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Invocation deadline exceeded")]
    DeadlineExceeded,

    // Probe errors
    #[error("Health check failed: {0}")]
    HealthCheck(String),

    // Failover errors
    #[error(transparent)]
    Redirect(#[from] RedirectError),

    #[error("Target region {0} is not healthy")]
    TargetUnhealthy(String),

    #[error("Failover {event_id} from {source_region} to {target_region} failed: {reason}")]
    FailoverFailed {
        event_id: String,
        source_region: String,
        target_region: String,
        reason: String,
    },

    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    // Input errors
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error is worth retrying inside a probe.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Throttled(_) | Error::Timeout(_) | Error::StoreUnavailable(_)
        )
    }

    /// Whether the error came from the deadline or a bounded timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::DeadlineExceeded)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_status() {
            Error::HealthCheck(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Transport("reset".into()).is_transient());
        assert!(Error::Throttled("slow down".into()).is_transient());
        assert!(Error::Timeout(500).is_transient());
        assert!(!Error::DeadlineExceeded.is_transient());
        assert!(!Error::InvalidEvent("bad".into()).is_transient());
        assert!(!Error::Redirect(RedirectError::Unauthorized("denied".into())).is_transient());
        assert!(!Error::Conflict("dr/region-state/ap-south-1".into()).is_transient());
        assert!(!Error::LeaseLost("dr/failover/pair/ap-south-1/ap-southeast-1".into()).is_transient());
    }

    #[test]
    fn test_redirect_error_conversion() {
        let err: Error = RedirectError::Transport("connection refused".into()).into();
        assert!(matches!(err, Error::Redirect(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_failover_failed_display() {
        let err = Error::FailoverFailed {
            event_id: "evt-1".into(),
            source_region: "ap-south-1".into(),
            target_region: "ap-southeast-1".into(),
            reason: "boom".into(),
        };
        let text = err.to_string();
        assert!(text.contains("evt-1"));
        assert!(text.contains("ap-south-1"));
        assert!(text.contains("boom"));
    }
}
