//! In-memory replicated store.
//!
//! Models a multi-writer store whose writes become visible in the other
//! region after a fixed replication delay. Concurrent writes converge on
//! the latest write (highest sequence number) once both have replicated.

use crate::core::{Error, ReadConsistency, RegionPair, Result};
use crate::services::store::{Record, ReplicatedStore};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

/// One write (or tombstone) of a key.
#[derive(Clone, Debug)]
struct Version {
    seq: u64,
    record: Option<Record>,
    visible_at: HashMap<String, Instant>,
}

impl Version {
    fn is_visible_in(&self, region: &str, at: Instant) -> bool {
        self.visible_at.get(region).map(|t| *t <= at).unwrap_or(false)
    }
}

/// State shared by every regional handle of one store.
#[derive(Debug, Default)]
struct Cluster {
    regions: Vec<String>,
    replication_delay: Duration,
    next_seq: u64,
    items: HashMap<String, Vec<Version>>,
    unavailable: HashSet<String>,
    latency: HashMap<String, Duration>,
}

impl Cluster {
    fn write(&mut self, origin: &str, key: &str, record: Option<Record>) {
        self.next_seq += 1;
        let now = Instant::now();
        let visible_at = self
            .regions
            .iter()
            .map(|region| {
                let at = if region == origin { now } else { now + self.replication_delay };
                (region.clone(), at)
            })
            .collect();

        let versions = self.items.entry(key.to_string()).or_default();
        versions.push(Version {
            seq: self.next_seq,
            record,
            visible_at,
        });

        // Versions older than the newest fully replicated one can never be read again
        let regions = &self.regions;
        if let Some(settled) = versions
            .iter()
            .filter(|v| regions.iter().all(|r| v.is_visible_in(r, now)))
            .map(|v| v.seq)
            .max()
        {
            versions.retain(|v| v.seq >= settled);
        }
    }

    fn read(&self, region: &str, key: &str) -> Option<Record> {
        let now = Instant::now();
        self.items
            .get(key)?
            .iter()
            .filter(|v| v.is_visible_in(region, now))
            .max_by_key(|v| v.seq)
            .and_then(|v| v.record.clone())
    }

    fn latest(&self, key: &str) -> Option<&Record> {
        self.items
            .get(key)?
            .iter()
            .max_by_key(|v| v.seq)
            .and_then(|v| v.record.as_ref())
    }
}

/// Regional handle to an in-memory replicated store.
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    region: String,
    cluster: Arc<RwLock<Cluster>>,
}

impl InMemoryStore {
    /// Create a standalone single-region store.
    pub fn new(region: &str) -> Self {
        let cluster = Cluster {
            regions: vec![region.to_string()],
            ..Default::default()
        };
        Self {
            region: region.to_string(),
            cluster: Arc::new(RwLock::new(cluster)),
        }
    }

    /// Create handles for both regions of a pair sharing one replicated store.
    ///
    /// ```
    /// use regionguard::core::{now, ReadConsistency, RegionPair};
    /// use regionguard::services::backends::InMemoryStore;
    /// use regionguard::services::{Record, ReplicatedStore};
    /// use std::time::Duration;
    ///
    /// # tokio_test::block_on(async {
    /// let pair = RegionPair::default();
    /// let (primary, _secondary) = InMemoryStore::replicated_pair(&pair, Duration::from_millis(500));
    /// let record = Record::new(serde_json::json!({"id": 1}), now(), &pair.primary);
    /// assert!(primary.conditional_create("orders/1", record.clone()).await.unwrap());
    /// assert!(!primary.conditional_create("orders/1", record).await.unwrap());
    /// assert!(primary.get("orders/1", ReadConsistency::Strong).await.unwrap().is_some());
    /// # });
    /// ```
    pub fn replicated_pair(pair: &RegionPair, replication_delay: Duration) -> (Self, Self) {
        let cluster = Arc::new(RwLock::new(Cluster {
            regions: vec![pair.primary.clone(), pair.secondary.clone()],
            replication_delay,
            ..Default::default()
        }));
        let primary = Self {
            region: pair.primary.clone(),
            cluster: cluster.clone(),
        };
        let secondary = Self {
            region: pair.secondary.clone(),
            cluster,
        };
        (primary, secondary)
    }

    /// Mark this region's replica reachable or unreachable.
    pub fn set_available(&self, available: bool) -> Result<()> {
        let mut cluster = self.cluster()?;
        if available {
            cluster.unavailable.remove(&self.region);
        } else {
            cluster.unavailable.insert(self.region.clone());
        }
        Ok(())
    }

    /// Add a fixed latency to every operation in this region.
    pub fn set_latency(&self, latency: Duration) -> Result<()> {
        self.cluster()?.latency.insert(self.region.clone(), latency);
        Ok(())
    }

    /// Keys currently readable in this region.
    pub fn visible_keys(&self) -> Result<Vec<String>> {
        let cluster = self.cluster()?;
        let mut keys: Vec<String> = cluster
            .items
            .keys()
            .filter(|key| cluster.read(&self.region, key).is_some())
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn cluster(&self) -> Result<RwLockWriteGuard<'_, Cluster>> {
        self.cluster
            .write()
            .map_err(|_| Error::Internal("in-memory store lock poisoned".to_string()))
    }

    async fn enter(&self) -> Result<()> {
        let latency = {
            let cluster = self.cluster()?;
            if cluster.unavailable.contains(&self.region) {
                return Err(Error::StoreUnavailable(self.region.clone()));
            }
            cluster.latency.get(&self.region).copied()
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ReplicatedStore for InMemoryStore {
    fn region(&self) -> &str {
        &self.region
    }

    async fn get(&self, key: &str, _consistency: ReadConsistency) -> Result<Option<Record>> {
        // Reads in a region always see that region's acknowledged writes,
        // so strong and eventual reads behave the same here.
        self.enter().await?;
        Ok(self.cluster()?.read(&self.region, key))
    }

    async fn put(&self, key: &str, record: Record) -> Result<()> {
        self.enter().await?;
        self.cluster()?.write(&self.region, key, Some(record));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.enter().await?;
        self.cluster()?.write(&self.region, key, None);
        Ok(())
    }

    async fn conditional_create(&self, key: &str, record: Record) -> Result<bool> {
        self.enter().await?;
        let mut cluster = self.cluster()?;
        if cluster.latest(key).is_some() {
            return Ok(false);
        }
        cluster.write(&self.region, key, Some(record));
        Ok(true)
    }

    async fn compare_and_swap(&self, key: &str, expected: &serde_json::Value, record: Record) -> Result<bool> {
        self.enter().await?;
        let mut cluster = self.cluster()?;
        if cluster.latest(key).map(|current| &current.value) != Some(expected) {
            return Ok(false);
        }
        cluster.write(&self.region, key, Some(record));
        Ok(true)
    }
}
