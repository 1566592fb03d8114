//! Periodic health aggregation.
//!
//! Every round fans out one task per probe, each bounded by the probe
//! timeout, and merges the results into a single [`HealthReport`]. A probe
//! that errors, panics or times out becomes an `Unhealthy` entry for its own
//! service; the round itself always completes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::models::{HealthCheckResult, HealthConfig, HealthReport, HealthStatus};
use crate::domain::ports::HealthProbe;

pub struct HealthAggregator {
    probes: Vec<Arc<dyn HealthProbe>>,
    probe_timeout: Duration,
    interval: Duration,
    latest: watch::Sender<Option<HealthReport>>,
}

impl HealthAggregator {
    pub fn new(config: &HealthConfig) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            probes: Vec::new(),
            probe_timeout: config.probe_timeout(),
            interval: config.interval(),
            latest,
        }
    }

    /// Add a probe. A probe whose name is already registered replaces the
    /// earlier one, since a report holds one result per service.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        let name = probe.name();
        match self.probes.iter().position(|existing| existing.name() == name) {
            Some(index) => {
                warn!(service = %name, "Health probe registered twice; replacing earlier probe");
                self.probes[index] = probe;
            }
            None => self.probes.push(probe),
        }
        self
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// Run one round now and publish it as the latest snapshot.
    pub async fn check_now(&self) -> HealthReport {
        let rounds = self
            .probes
            .iter()
            .map(|probe| run_probe(probe.clone(), self.probe_timeout));
        let results = futures::future::join_all(rounds).await;

        let report = HealthReport::from_results(results);
        if report.status != HealthStatus::Healthy {
            warn!(status = %report.status, "Health degraded");
        } else {
            debug!(status = %report.status, "Health round complete");
        }
        self.latest.send_replace(Some(report.clone()));
        report
    }

    /// Latest snapshot, if a round has completed.
    pub fn latest(&self) -> Option<HealthReport> {
        self.latest.borrow().clone()
    }

    /// Latest snapshot, running a round first when none exists yet.
    pub async fn get_status(&self) -> HealthReport {
        match self.latest() {
            Some(report) => report,
            None => self.check_now().await,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<HealthReport>> {
        self.latest.subscribe()
    }

    /// Run a round every interval until `shutdown_rx` turns `true`. The first
    /// round runs immediately.
    pub fn start(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let aggregator = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(aggregator.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(
                probes = aggregator.probes.len(),
                interval_secs = aggregator.interval.as_secs(),
                "Health monitoring started"
            );

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = interval.tick() => {
                        aggregator.check_now().await;
                    }
                    _ = shutdown_rx.changed() => {}
                }
            }

            info!("Health monitoring stopped");
        })
    }
}

async fn run_probe(probe: Arc<dyn HealthProbe>, timeout: Duration) -> HealthCheckResult {
    let name = probe.name();
    let started = Instant::now();
    let mut task = tokio::spawn(async move { probe.check().await });

    let result = match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(mut result))) => {
            result.service = name;
            if result.response_time_ms == 0 {
                result = result.with_response_time(started.elapsed());
            }
            return result;
        }
        Ok(Ok(Err(e))) => HealthCheckResult::unhealthy(name, e.to_string()),
        Ok(Err(_)) => HealthCheckResult::unhealthy(name, "probe panicked"),
        Err(_) => {
            task.abort();
            HealthCheckResult::unhealthy(
                name,
                format!("probe timed out after {}ms", timeout.as_millis()),
            )
        }
    };

    warn!(
        service = %name,
        error = result.error.as_deref().unwrap_or_default(),
        "Health probe failed"
    );
    result.with_response_time(started.elapsed())
}
