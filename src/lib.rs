//! # regionguard - Two-region disaster recovery engine
//!
//! Failure detection, consistency validation and failover coordination for a
//! service deployed in two regions over a replicated data store:
//! - **HealthMonitor**: bounded probes and FAILED/HEALTHY hysteresis per region
//! - **ConsistencyValidator**: replication-lag probes and report-only conflict scans
//! - **FailoverCoordinator**: idempotent failover with RTO measurement
//!
//! Every component is driven by short-lived invocations from an external
//! scheduler. State lives in the shared replicated store, never in memory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use regionguard::config::DrConfig;
//! use regionguard::factory::{build_system, DrServices, RegionServices};
//! use regionguard::services::backends::{InMemoryStore, InMemoryTrafficControl};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> regionguard::Result<()> {
//!     let config = DrConfig::from_env()?;
//!     regionguard::logging::init_logging(&config.logging);
//!
//!     let (primary, secondary) = InMemoryStore::replicated_pair(&config.regions, Duration::from_millis(500));
//!     let (primary, secondary) = (Arc::new(primary), Arc::new(secondary));
//!     let services = DrServices::new(
//!         RegionServices::http("api.ap-south-1.example.com", primary, &config.health)?,
//!         RegionServices::http("api.ap-southeast-1.example.com", secondary.clone(), &config.health)?,
//!         secondary,
//!         Arc::new(InMemoryTrafficControl::new()),
//!     );
//!     let system = build_system(&config, services)?;
//!
//!     let deadline = system.deadline();
//!     for observation in system.monitor.observe_all(&deadline).await? {
//!         if let Some(alarm) = observation.alarm {
//!             system.coordinator.handle_signal(&alarm, &deadline).await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod consistency;
pub mod core;
pub mod factory;
pub mod failover;
pub mod logging;
pub mod region;
pub mod services;

#[cfg(test)]
mod testing;

pub use core::error::{Error, Result};
