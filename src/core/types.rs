//! Common types used across regionguard modules.

use serde::{Deserialize, Serialize};

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Milliseconds elapsed between two timestamps, clamped at zero.
pub fn millis_between(earlier: Timestamp, later: Timestamp) -> u64 {
    (later - earlier).num_milliseconds().max(0) as u64
}

/// Read consistency requested from the replicated store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadConsistency {
    /// May return stale data
    Eventual,
    /// Reflects every write acknowledged in the region
    Strong,
}

/// The two regions of a deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionPair {
    /// Primary region ID
    pub primary: String,
    /// Secondary region ID
    pub secondary: String,
}

impl RegionPair {
    /// Create a new pair.
    pub fn new(primary: &str, secondary: &str) -> Self {
        Self {
            primary: primary.to_string(),
            secondary: secondary.to_string(),
        }
    }

    /// Whether the region belongs to this pair.
    pub fn contains(&self, region: &str) -> bool {
        self.primary == region || self.secondary == region
    }

    /// The other region of the pair.
    pub fn peer_of(&self, region: &str) -> Option<&str> {
        if region == self.primary {
            Some(&self.secondary)
        } else if region == self.secondary {
            Some(&self.primary)
        } else {
            None
        }
    }

    /// Both regions, primary first.
    pub fn regions(&self) -> [&str; 2] {
        [&self.primary, &self.secondary]
    }
}

impl Default for RegionPair {
    fn default() -> Self {
        Self::new("ap-south-1", "ap-southeast-1")
    }
}

impl std::fmt::Display for RegionPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <-> {}", self.primary, self.secondary)
    }
}
