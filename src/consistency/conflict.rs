//! Write-conflict classification.
//!
//! Report-only: a scan never rewrites data.

use crate::core::Timestamp;
use crate::services::store::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of a key seen from both regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    /// Both regions hold the same value
    Converged,
    /// Both regions hold the key with different values
    Diverged,
    /// At least one region does not hold the key
    Unresolved,
}

/// A key's value as one region reports it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionValue {
    pub region: String,
    pub value: Option<Value>,
    pub written_at: Option<Timestamp>,
}

impl RegionValue {
    /// Build from a region's read.
    pub fn from_read(region: &str, record: Option<&Record>) -> Self {
        Self {
            region: region.to_string(),
            value: record.map(|r| r.value.clone()),
            written_at: record.map(|r| r.written_at),
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

/// Result of scanning one key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub key: String,
    pub region_a: RegionValue,
    pub region_b: RegionValue,
    pub resolution: Resolution,
    /// Last writer by timestamp, ties broken by region ID. Informational.
    pub last_writer: Option<String>,
}

impl ConflictRecord {
    /// Classify a key from its two regional reads.
    pub fn classify(key: &str, region_a: RegionValue, region_b: RegionValue) -> Self {
        let resolution = match (&region_a.value, &region_b.value) {
            (Some(a), Some(b)) if a == b => Resolution::Converged,
            (Some(_), Some(_)) => Resolution::Diverged,
            _ => Resolution::Unresolved,
        };
        let last_writer = last_writer(&region_a, &region_b);
        Self {
            key: key.to_string(),
            region_a,
            region_b,
            resolution,
            last_writer,
        }
    }

    pub fn is_diverged(&self) -> bool {
        self.resolution == Resolution::Diverged
    }
}

fn last_writer(a: &RegionValue, b: &RegionValue) -> Option<String> {
    let (ta, tb) = (a.written_at?, b.written_at?);
    if !a.is_present() || !b.is_present() {
        return None;
    }
    let winner = match ta.cmp(&tb) {
        std::cmp::Ordering::Greater => a,
        std::cmp::Ordering::Less => b,
        std::cmp::Ordering::Equal => std::cmp::max_by(a, b, |x, y| x.region.cmp(&y.region)),
    };
    Some(winner.region.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::now;
    use chrono::Duration;
    use proptest::prelude::*;
    use serde_json::json;

    fn read(region: &str, value: Option<Value>, offset_ms: i64) -> RegionValue {
        let at = now();
        let record = value.map(|v| Record::new(v, at + Duration::milliseconds(offset_ms), region));
        RegionValue::from_read(region, record.as_ref())
    }

    #[test]
    fn test_classification() {
        let same = ConflictRecord::classify(
            "k",
            read("ap-south-1", Some(json!(1)), 0),
            read("ap-southeast-1", Some(json!(1)), 0),
        );
        assert_eq!(same.resolution, Resolution::Converged);

        let diff = ConflictRecord::classify(
            "k",
            read("ap-south-1", Some(json!({"value": 100})), 0),
            read("ap-southeast-1", Some(json!({"value": 200})), 5),
        );
        assert!(diff.is_diverged());
        assert_eq!(diff.last_writer.as_deref(), Some("ap-southeast-1"));

        let missing = ConflictRecord::classify(
            "k",
            read("ap-south-1", Some(json!(1)), 0),
            read("ap-southeast-1", None, 0),
        );
        assert_eq!(missing.resolution, Resolution::Unresolved);
        assert!(missing.last_writer.is_none());
    }

    fn value_strategy() -> impl Strategy<Value = Option<(i32, i64)>> {
        proptest::option::of((0i32..3, 0i64..3))
    }

    proptest! {
        #[test]
        fn prop_scan_is_symmetric(a in value_strategy(), b in value_strategy()) {
            let base = now();
            let mk = |region: &str, v: Option<(i32, i64)>| {
                let record = v.map(|(value, offset)| Record::new(json!(value), base + Duration::milliseconds(offset), region));
                RegionValue::from_read(region, record.as_ref())
            };

            let ab = ConflictRecord::classify("k", mk("ap-south-1", a), mk("ap-southeast-1", b));
            let ba = ConflictRecord::classify("k", mk("ap-southeast-1", b), mk("ap-south-1", a));

            prop_assert_eq!(ab.resolution, ba.resolution);
            prop_assert_eq!(ab.last_writer, ba.last_writer);
        }
    }
}
