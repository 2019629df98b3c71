//! Per-dispatch events and the sinks that consume them

use crate::records::{Outcome, RecordId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// What happened to one scheduled dispatch
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// The probe finished and its record was stored
    Recorded {
        service: String,
        method: String,
        url: String,
        record_id: RecordId,
        outcome: Outcome,
        latency_ms: u64,
    },
    /// The probe finished but the store rejected the record
    PersistenceFailed {
        service: String,
        outcome: Outcome,
        error: String,
    },
    /// The tick was skipped because a probe for the service was still running
    TickSkipped { service: String, in_flight: usize },
    /// The dispatch task panicked or was aborted at the shutdown deadline
    DispatchAborted { service: String, reason: String },
}

impl DispatchEvent {
    pub fn service(&self) -> &str {
        match self {
            DispatchEvent::Recorded { service, .. }
            | DispatchEvent::PersistenceFailed { service, .. }
            | DispatchEvent::TickSkipped { service, .. }
            | DispatchEvent::DispatchAborted { service, .. } => service,
        }
    }
}

/// Pluggable consumer of dispatch events.
///
/// `emit` is called from the dispatch task itself and must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DispatchEvent);
}

/// Logs every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &DispatchEvent) {
        match event {
            DispatchEvent::Recorded {
                service,
                method,
                url,
                outcome: Outcome::Response { status_code },
                latency_ms,
                ..
            } => {
                if (200..300).contains(status_code) {
                    info!(service = %service, latency_ms, "{} {}: {}", method, url, status_code);
                } else {
                    warn!(service = %service, latency_ms, "{} {}: {}", method, url, status_code);
                }
            }
            DispatchEvent::Recorded {
                service,
                method,
                url,
                outcome: Outcome::TransportFailure { error },
                ..
            } => {
                warn!(service = %service, "{} {} failed: {}", method, url, error);
            }
            DispatchEvent::PersistenceFailed {
                service, error, ..
            } => {
                error!(service = %service, "Failed to store probe result: {}", error);
            }
            DispatchEvent::TickSkipped { service, in_flight } => {
                warn!(
                    service = %service,
                    "Skipping tick, {} probe(s) still in flight", in_flight
                );
            }
            DispatchEvent::DispatchAborted { service, reason } => {
                error!(service = %service, "Probe dispatch aborted: {}", reason);
            }
        }
    }
}

/// Forwards events to several sinks
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &DispatchEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

/// Publishes events on an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<DispatchEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &DispatchEvent) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.sender.send(event.clone());
    }
}

#[derive(Debug, Default, Clone)]
struct ServiceCounters {
    recorded: u64,
    succeeded: u64,
    failed: u64,
    persistence_failures: u64,
    skipped: u64,
    aborted: u64,
    total_latency_ms: u64,
}

/// Per-service dispatch counters
#[derive(Debug, Default)]
pub struct MetricsSink {
    counters: Mutex<HashMap<String, ServiceCounters>>,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for every service that emitted at least one event, sorted by name
    pub fn snapshot(&self) -> Vec<ServiceMetricsSnapshot> {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);

        let mut snapshots: Vec<ServiceMetricsSnapshot> = counters
            .iter()
            .map(|(service, c)| {
                let completed = c.recorded + c.persistence_failures;
                ServiceMetricsSnapshot {
                    service: service.clone(),
                    completed,
                    succeeded: c.succeeded,
                    failed: c.failed,
                    persistence_failures: c.persistence_failures,
                    skipped: c.skipped,
                    aborted: c.aborted,
                    success_rate: if completed > 0 {
                        (c.succeeded as f64 / completed as f64) * 100.0
                    } else {
                        0.0
                    },
                    avg_latency_ms: if c.recorded > 0 {
                        c.total_latency_ms / c.recorded
                    } else {
                        0
                    },
                }
            })
            .collect();

        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }

    pub fn service(&self, name: &str) -> Option<ServiceMetricsSnapshot> {
        self.snapshot().into_iter().find(|s| s.service == name)
    }
}

impl EventSink for MetricsSink {
    fn emit(&self, event: &DispatchEvent) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = counters.entry(event.service().to_string()).or_default();

        match event {
            DispatchEvent::Recorded {
                outcome, latency_ms, ..
            } => {
                entry.recorded += 1;
                entry.total_latency_ms += latency_ms;
                if outcome.is_failure() {
                    entry.failed += 1;
                } else {
                    entry.succeeded += 1;
                }
            }
            DispatchEvent::PersistenceFailed { outcome, .. } => {
                entry.persistence_failures += 1;
                if outcome.is_failure() {
                    entry.failed += 1;
                } else {
                    entry.succeeded += 1;
                }
            }
            DispatchEvent::TickSkipped { .. } => entry.skipped += 1,
            DispatchEvent::DispatchAborted { .. } => entry.aborted += 1,
        }
    }
}

/// Snapshot of one service's dispatch counters
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceMetricsSnapshot {
    pub service: String,
    /// Probes that finished, whether or not their record was stored
    pub completed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub persistence_failures: u64,
    pub skipped: u64,
    pub aborted: u64,
    pub success_rate: f64,
    pub avg_latency_ms: u64,
}
