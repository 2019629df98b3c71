//! Result store contract and the in-memory backend

use crate::errors::Result;
use crate::records::{NewRecord, RecordFilter, RecordId, ResponseRecord, ServiceStats};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

/// Append-only persistence of probe results.
///
/// Implementations serialize writes internally: concurrent `append` calls
/// never share an id and a reader never observes a partially written record.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist a record and return its newly assigned id
    async fn append(&self, record: NewRecord) -> Result<RecordId>;

    /// Records matching the filter, most recent first
    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<ResponseRecord>>;

    /// Aggregate statistics over every record of one service
    async fn summarize(&self, service: &str) -> Result<ServiceStats>;
}

#[derive(Debug, Default)]
struct Log {
    records: Vec<ResponseRecord>,
    last_id: RecordId,
}

/// Thread-safe in-memory store; records are kept in id order
#[derive(Debug, Default)]
pub struct MemoryStore {
    log: RwLock<Log>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from previously persisted records
    pub(crate) fn from_records(mut records: Vec<ResponseRecord>) -> Self {
        records.sort_by_key(|r| r.id);
        let last_id = records.last().map(|r| r.id).unwrap_or(0);

        Self {
            log: RwLock::new(Log { records, last_id }),
        }
    }

    /// Id the next append will receive
    pub async fn next_id(&self) -> RecordId {
        self.log.read().await.last_id + 1
    }

    /// Insert a record whose id was already assigned by the caller
    pub(crate) async fn insert(&self, record: ResponseRecord) {
        let mut log = self.log.write().await;
        log.last_id = log.last_id.max(record.id);
        log.records.push(record);
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn append(&self, record: NewRecord) -> Result<RecordId> {
        let mut log = self.log.write().await;
        let id = log.last_id + 1;
        log.last_id = id;
        log.records.push(record.with_id(id));

        debug!("Appended record {}, current size: {}", id, log.records.len());
        Ok(id)
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<ResponseRecord>> {
        let log = self.log.read().await;

        Ok(log
            .records
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .take(filter.limit)
            .cloned()
            .collect())
    }

    async fn summarize(&self, service: &str) -> Result<ServiceStats> {
        let log = self.log.read().await;

        let mut stats = ServiceStats::default();
        for record in log.records.iter().filter(|r| r.name == service) {
            stats.observe(record);
        }

        Ok(stats)
    }
}
