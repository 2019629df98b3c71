//! Probe outcome and response record data structures

use crate::config::ServiceDefinition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned, strictly increasing record identifier
pub type RecordId = u64;

/// Default number of records returned by history queries
pub const DEFAULT_LIMIT: usize = 100;

/// Result of a single probe attempt
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// The service answered with an HTTP status
    Response { status_code: u16 },
    /// The request never completed (DNS, refused connection, timeout...)
    TransportFailure { error: String },
}

impl Outcome {
    pub fn response(status_code: u16) -> Self {
        Outcome::Response { status_code }
    }

    pub fn transport_failure(error: impl Into<String>) -> Self {
        Outcome::TransportFailure {
            error: error.into(),
        }
    }

    /// Numeric status, 0 when the request never completed
    pub fn status_code(&self) -> u16 {
        match self {
            Outcome::Response { status_code } => *status_code,
            Outcome::TransportFailure { .. } => 0,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Response { .. } => None,
            Outcome::TransportFailure { error } => Some(error),
        }
    }

    /// Anything outside 2xx counts as a failed probe
    pub fn is_failure(&self) -> bool {
        !(200..300).contains(&self.status_code())
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Response { status_code } => write!(f, "{}", status_code),
            Outcome::TransportFailure { error } => write!(f, "transport failure: {}", error),
        }
    }
}

/// Outcome of one probe as produced by the executor
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeOutcome {
    pub service: String,
    pub url: String,
    pub outcome: Outcome,
    pub completed_at: DateTime<Utc>,
    pub latency_ms: u64,
}

impl ProbeOutcome {
    pub fn new(service: &ServiceDefinition, outcome: Outcome, latency_ms: u64) -> Self {
        Self {
            service: service.name.clone(),
            url: service.url.clone(),
            outcome,
            completed_at: Utc::now(),
            latency_ms,
        }
    }

    /// Translate into the row handed to the result store
    pub fn into_record(self) -> NewRecord {
        NewRecord {
            name: self.service,
            url: self.url,
            outcome: self.outcome,
            created: self.completed_at,
        }
    }
}

/// A record that has not been assigned an id yet
#[derive(Clone, Debug, PartialEq)]
pub struct NewRecord {
    pub name: String,
    pub url: String,
    pub outcome: Outcome,
    pub created: DateTime<Utc>,
}

impl NewRecord {
    pub fn new(name: impl Into<String>, url: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            outcome,
            created: Utc::now(),
        }
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    pub fn with_id(self, id: RecordId) -> ResponseRecord {
        ResponseRecord {
            id,
            name: self.name,
            url: self.url,
            outcome: self.outcome,
            created: self.created,
        }
    }
}

/// Persisted, immutable result of one probe
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResponseRecord {
    pub id: RecordId,
    pub name: String,
    pub url: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub created: DateTime<Utc>,
}

/// Filter for history queries
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordFilter {
    pub service: Option<String>,
    pub limit: usize,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self {
            service: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_service(name: impl Into<String>) -> Self {
        Self {
            service: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, record: &ResponseRecord) -> bool {
        self.service.as_deref().is_none_or(|name| record.name == name)
    }
}

/// Aggregated statistics for one service
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceStats {
    pub total: u64,
    pub total_failed: u64,
    pub last_failed_at: Option<DateTime<Utc>>,
    /// Outcome of the record with the highest id
    pub latest: Option<Outcome>,
}

impl ServiceStats {
    /// Fold a record into the statistics; records must arrive in id order
    pub fn observe(&mut self, record: &ResponseRecord) {
        self.total += 1;
        if record.outcome.is_failure() {
            self.total_failed += 1;
            self.last_failed_at = Some(record.created);
        }
        self.latest = Some(record.outcome.clone());
    }

    pub fn uptime_percentage(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let succeeded = self.total - self.total_failed;
        Some(succeeded as f64 / self.total as f64 * 100.0)
    }
}

/// Health summary of a configured service, computed per query
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServiceSummary {
    pub name: String,
    pub label: String,
    pub description: String,
    /// Status of the most recent probe, absent before the first one
    pub status_code: Option<u16>,
    pub total: u64,
    pub total_failed: u64,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub uptime_percentage: Option<f64>,
}

impl ServiceSummary {
    pub fn new(definition: &ServiceDefinition, stats: &ServiceStats) -> Self {
        Self {
            name: definition.name.clone(),
            label: definition.label.clone(),
            description: definition.description.clone(),
            status_code: stats.latest.as_ref().map(Outcome::status_code),
            total: stats.total,
            total_failed: stats.total_failed,
            last_failed_at: stats.last_failed_at,
            uptime_percentage: stats.uptime_percentage(),
        }
    }
}
