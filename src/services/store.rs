//! ReplicatedStore trait definition.
//!
//! One handle talks to one region's replica of the shared data store.

use crate::core::{Error, ReadConsistency, Result, Timestamp};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A stored item with its write metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Item payload
    pub value: serde_json::Value,
    /// Wall-clock write time
    pub written_at: Timestamp,
    /// Region that accepted the write
    pub origin_region: String,
}

impl Record {
    /// Create a record from a raw JSON value.
    pub fn new(value: serde_json::Value, written_at: Timestamp, origin_region: &str) -> Self {
        Self {
            value,
            written_at,
            origin_region: origin_region.to_string(),
        }
    }

    /// Create a record from any serializable payload.
    pub fn encode<T: Serialize>(payload: &T, written_at: Timestamp, origin_region: &str) -> Result<Self> {
        Ok(Self::new(serde_json::to_value(payload)?, written_at, origin_region))
    }

    /// Decode the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| Error::Serialization(format!("cannot decode record: {}", e)))
    }
}

/// Core trait for a regional replica of the replicated store.
///
/// Writes replicate to the other region eventually; the store may accept
/// writes in both regions concurrently.
#[async_trait]
pub trait ReplicatedStore: Send + Sync {
    /// Region this handle reads from and writes to.
    fn region(&self) -> &str;

    /// Read an item.
    ///
    /// Returns None if the key is absent (or deleted) in this region.
    async fn get(&self, key: &str, consistency: ReadConsistency) -> Result<Option<Record>>;

    /// Write an item, replacing any previous value.
    async fn put(&self, key: &str, record: Record) -> Result<()>;

    /// Delete an item. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Create an item only if the key does not exist.
    ///
    /// Returns false, leaving the stored item untouched, when the key exists.
    async fn conditional_create(&self, key: &str, record: Record) -> Result<bool>;

    /// Replace an item only if its current payload equals `expected`.
    ///
    /// Returns false, leaving the store untouched, when the key is absent or
    /// holds another payload.
    async fn compare_and_swap(&self, key: &str, expected: &serde_json::Value, record: Record) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::now;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Marker {
        probe_id: String,
        seq: u32,
    }

    #[test]
    fn test_record_encode_decode() {
        let marker = Marker {
            probe_id: "p-1".into(),
            seq: 7,
        };
        let record = Record::encode(&marker, now(), "ap-south-1").unwrap();
        assert_eq!(record.origin_region, "ap-south-1");
        assert_eq!(record.decode::<Marker>().unwrap(), marker);
    }

    #[test]
    fn test_record_decode_mismatch() {
        let record = Record::new(serde_json::json!("plain"), now(), "ap-south-1");
        assert!(matches!(record.decode::<Marker>(), Err(Error::Serialization(_))));
    }
}
