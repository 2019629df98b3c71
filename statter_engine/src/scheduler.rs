//! Per-service probe scheduling

use crate::config::{Config, OverlapPolicy, ServiceDefinition};
use crate::errors::{MonitorError, Result};
use crate::events::{DispatchEvent, EventSink, FanoutSink, MetricsSink, TracingSink};
use crate::probe::{HttpProbeExecutor, ProbeExecutor};
use crate::store::ResultStore;

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval, interval_at, timeout_at};
use tracing::{Instrument, debug, error, info, info_span, instrument};
use uuid::Uuid;

const METRICS_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Lifecycle signal shared by every timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    Stopping { deadline: Option<Instant> },
}

/// Starts one independent timer per configured service
pub struct ProbeScheduler {
    config: Arc<Config>,
    executor: Arc<dyn ProbeExecutor>,
    store: Arc<dyn ResultStore>,
    sink: FanoutSink,
    metrics: Arc<MetricsSink>,
    run_id: String,
}

impl ProbeScheduler {
    /// Create a scheduler that logs dispatch events through `tracing`
    pub fn new(
        config: Arc<Config>,
        executor: Arc<dyn ProbeExecutor>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        let metrics = Arc::new(MetricsSink::new());
        let sink = FanoutSink::new(vec![Arc::new(TracingSink), metrics.clone()]);

        Self {
            config,
            executor,
            store,
            sink,
            metrics,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create a scheduler probing over HTTP with the configured timeout
    pub fn from_config(config: Arc<Config>, store: Arc<dyn ResultStore>) -> Result<Self> {
        config.validate()?;
        let executor = HttpProbeExecutor::new(config.probe_timeout())?;
        Ok(Self::new(config, Arc::new(executor), store))
    }

    /// Also deliver dispatch events to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink.push(sink);
        self
    }

    pub fn metrics(&self) -> Arc<MetricsSink> {
        Arc::clone(&self.metrics)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Arm every service timer and return the handle that stops them
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub fn start(&self) -> SchedulerHandle {
        let (state_tx, state_rx) = watch::channel(RunState::Running);
        let sink: Arc<dyn EventSink> = Arc::new(self.sink.clone());

        let timers = self
            .config
            .services
            .iter()
            .map(|service| {
                let period = self.config.interval_for(service);
                info!(
                    "Arming timer for {} every {}s ({})",
                    service.name,
                    period.as_secs_f64(),
                    service.url
                );

                let timer = ServiceTimer {
                    dispatcher: Arc::new(Dispatcher {
                        service: service.clone(),
                        executor: Arc::clone(&self.executor),
                        store: Arc::clone(&self.store),
                        sink: Arc::clone(&sink),
                    }),
                    period,
                    overlap: self.config.overlap,
                };

                let span = info_span!("service_timer", service = %service.name);
                tokio::spawn(timer.run(state_rx.clone()).instrument(span))
            })
            .collect();

        let reporter = tokio::spawn(report_metrics(Arc::clone(&self.metrics), state_rx));

        SchedulerHandle {
            state: state_tx,
            timers,
            reporter,
            metrics: Arc::clone(&self.metrics),
            default_drain_timeout: self.config.drain_timeout(),
        }
    }

    /// Run until Ctrl-C, then stop and drain
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn run_until_shutdown(&self) -> Result<ShutdownReport> {
        let handle = self.start();

        tokio::signal::ctrl_c().await.map_err(|e| {
            MonitorError::Other(format!("Failed to wait for shutdown signal: {}", e))
        })?;

        info!("Shutting down probe scheduler");
        let drain_timeout = handle.default_drain_timeout;
        Ok(handle.stop(drain_timeout).await)
    }
}

/// Outcome of stopping the scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Probes still in flight at stop time that completed
    pub drained: usize,
    /// Probes cut off by the drain deadline
    pub aborted: usize,
}

impl std::ops::AddAssign for ShutdownReport {
    fn add_assign(&mut self, other: Self) {
        self.drained += other.drained;
        self.aborted += other.aborted;
    }
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    state: watch::Sender<RunState>,
    timers: Vec<JoinHandle<ShutdownReport>>,
    reporter: JoinHandle<()>,
    metrics: Arc<MetricsSink>,
    default_drain_timeout: Option<Duration>,
}

impl SchedulerHandle {
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    pub fn metrics(&self) -> Arc<MetricsSink> {
        Arc::clone(&self.metrics)
    }

    /// Drain timeout taken from the configuration
    pub fn default_drain_timeout(&self) -> Option<Duration> {
        self.default_drain_timeout
    }

    /// Stop every timer, then wait for in-flight probes.
    ///
    /// With a `drain_timeout`, probes still running when it expires are aborted.
    pub async fn stop(self, drain_timeout: Option<Duration>) -> ShutdownReport {
        let deadline = drain_timeout.map(|d| Instant::now() + d);
        self.state.send_replace(RunState::Stopping { deadline });

        let mut report = ShutdownReport::default();
        for result in join_all(self.timers).await {
            match result {
                Ok(timer_report) => report += timer_report,
                Err(e) => error!("Service timer task failed: {}", e),
            }
        }

        if let Err(e) = self.reporter.await {
            error!("Metrics reporter task failed: {}", e);
        }

        log_metrics(&self.metrics, "Final");
        info!(
            "Probe scheduler stopped: {} probe(s) drained, {} aborted",
            report.drained, report.aborted
        );

        report
    }
}

/// Everything a dispatch task needs for one service
struct Dispatcher {
    service: ServiceDefinition,
    executor: Arc<dyn ProbeExecutor>,
    store: Arc<dyn ResultStore>,
    sink: Arc<dyn EventSink>,
}

impl Dispatcher {
    /// Probe once and store the result
    async fn probe_and_record(self: Arc<Self>) {
        let probe = self.executor.execute(&self.service).await;
        let outcome = probe.outcome.clone();
        let latency_ms = probe.latency_ms;

        let event = match self.store.append(probe.into_record()).await {
            Ok(record_id) => DispatchEvent::Recorded {
                service: self.service.name.clone(),
                method: self.service.effective_method(),
                url: self.service.url.clone(),
                record_id,
                outcome,
                latency_ms,
            },
            Err(e) => DispatchEvent::PersistenceFailed {
                service: self.service.name.clone(),
                outcome,
                error: e.to_string(),
            },
        };

        self.sink.emit(&event);
    }

    /// Report a dispatch task that did not run to completion
    fn reap(&self, joined: std::result::Result<(), JoinError>) -> bool {
        match joined {
            Ok(()) => true,
            Err(e) => {
                let reason = if e.is_panic() {
                    "probe task panicked".to_string()
                } else {
                    "aborted at shutdown deadline".to_string()
                };
                self.sink.emit(&DispatchEvent::DispatchAborted {
                    service: self.service.name.clone(),
                    reason,
                });
                false
            }
        }
    }
}

struct ServiceTimer {
    dispatcher: Arc<Dispatcher>,
    period: Duration,
    overlap: OverlapPolicy,
}

impl ServiceTimer {
    async fn run(self, mut state: watch::Receiver<RunState>) -> ShutdownReport {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            if matches!(*state.borrow(), RunState::Stopping { .. }) {
                break;
            }

            tokio::select! {
                biased;

                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.dispatcher.reap(joined);
                }
                _ = ticker.tick() => {
                    self.dispatch(&mut in_flight);
                }
            }
        }

        let deadline = match *state.borrow() {
            RunState::Stopping { deadline } => deadline,
            RunState::Running => None,
        };

        debug!(
            "Timer for {} stopped with {} probe(s) in flight",
            self.dispatcher.service.name,
            in_flight.len()
        );
        self.drain(in_flight, deadline).await
    }

    fn dispatch(&self, in_flight: &mut JoinSet<()>) {
        if self.overlap == OverlapPolicy::Skip {
            while let Some(joined) = in_flight.try_join_next() {
                self.dispatcher.reap(joined);
            }

            if !in_flight.is_empty() {
                self.dispatcher.sink.emit(&DispatchEvent::TickSkipped {
                    service: self.dispatcher.service.name.clone(),
                    in_flight: in_flight.len(),
                });
                return;
            }
        }

        in_flight.spawn(
            Arc::clone(&self.dispatcher)
                .probe_and_record()
                .in_current_span(),
        );
    }

    async fn drain(&self, mut in_flight: JoinSet<()>, deadline: Option<Instant>) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        loop {
            let next = match deadline {
                Some(deadline) => match timeout_at(deadline, in_flight.join_next()).await {
                    Ok(next) => next,
                    Err(_) => break,
                },
                None => in_flight.join_next().await,
            };

            match next {
                Some(joined) => {
                    if self.dispatcher.reap(joined) {
                        report.drained += 1;
                    }
                }
                None => return report,
            }
        }

        in_flight.abort_all();
        while let Some(joined) = in_flight.join_next().await {
            if self.dispatcher.reap(joined) {
                report.drained += 1;
            } else {
                report.aborted += 1;
            }
        }

        report
    }
}

/// Periodically log dispatch counters until the scheduler stops
async fn report_metrics(metrics: Arc<MetricsSink>, mut state: watch::Receiver<RunState>) {
    let mut report_interval = interval(METRICS_REPORT_INTERVAL);
    report_interval.tick().await;

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() || matches!(*state.borrow(), RunState::Stopping { .. }) {
                    return;
                }
            }
            _ = report_interval.tick() => log_metrics(&metrics, "Periodic"),
        }
    }
}

fn log_metrics(metrics: &MetricsSink, label: &str) {
    for snapshot in metrics.snapshot() {
        info!(
            "{} probe metrics - {}: {} completed ({:.1}% success), {} persistence failures, {} skipped, {} aborted, avg {}ms",
            label,
            snapshot.service,
            snapshot.completed,
            snapshot.success_rate,
            snapshot.persistence_failures,
            snapshot.skipped,
            snapshot.aborted,
            snapshot.avg_latency_ms
        );
    }
}
