//! Statter Uptime Monitor Library
//!
//! This library provides components for probing HTTP services on independent
//! per-service schedules, persisting every outcome, and querying service health.

pub mod config;
pub mod errors;
pub mod events;
pub mod journal;
pub mod probe;
pub mod query;
pub mod records;
pub mod scheduler;
pub mod store;

pub use config::{Config, OverlapPolicy, ServiceDefinition, StorageBackend};
pub use errors::{MonitorError, Result};
pub use events::{DispatchEvent, EventSink, MetricsSink};
pub use journal::JournalStore;
pub use probe::{HttpProbeExecutor, ProbeExecutor};
pub use query::QueryService;
pub use records::{Outcome, ResponseRecord, ServiceSummary};
pub use scheduler::{ProbeScheduler, SchedulerHandle, ShutdownReport};
pub use store::{MemoryStore, ResultStore};

use std::sync::Arc;

/// Open the result store selected by the configuration
pub async fn open_store(config: &Config) -> Result<Arc<dyn ResultStore>> {
    match config.storage {
        StorageBackend::Journal => {
            Ok(Arc::new(JournalStore::open(&config.database_file).await?))
        }
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Open the configured result store for queries only; nothing is ever written
pub async fn open_store_read_only(config: &Config) -> Result<Arc<dyn ResultStore>> {
    match config.storage {
        StorageBackend::Journal => Ok(Arc::new(
            JournalStore::open_read_only(&config.database_file).await?,
        )),
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
