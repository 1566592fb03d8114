//! Built-in health probes.
//!
//! The aggregator only knows the `HealthProbe` trait; these are the bodies
//! wired by the runtime. `FnProbe` covers collaborators that live outside
//! this crate, such as the document store behind the `database` probe.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::circuit_breaker::CircuitBreakerRegistry;
use super::consumer_group::ConsumerGroup;
use crate::domain::models::{HealthCheckResult, HealthStatus, ProbeName};
use crate::domain::ports::{Broker, DedupCache, HealthProbe, ProbeError};

/// CPU or memory usage, in percent, above which the host is degraded.
pub const RESOURCE_DEGRADED_PERCENT: f32 = 90.0;

/// Write, read back and delete a marker in the dedup cache.
pub struct CacheProbe {
    cache: Arc<dyn DedupCache>,
    slow_response: Duration,
}

impl CacheProbe {
    pub fn new(cache: Arc<dyn DedupCache>, slow_response: Duration) -> Self {
        Self {
            cache,
            slow_response,
        }
    }
}

#[async_trait]
impl HealthProbe for CacheProbe {
    fn name(&self) -> ProbeName {
        ProbeName::Cache
    }

    async fn check(&self) -> Result<HealthCheckResult, ProbeError> {
        let started = Instant::now();
        let key = format!("health:probe:{}", uuid::Uuid::new_v4());

        let stored = self
            .cache
            .set_if_absent(&key, "ok", Duration::from_secs(60))
            .await
            .map_err(|e| ProbeError::Failed(format!("write failed: {e}")))?;
        let read = self
            .cache
            .get(&key)
            .await
            .map_err(|e| ProbeError::Failed(format!("read failed: {e}")))?;
        self.cache
            .delete(&key)
            .await
            .map_err(|e| ProbeError::Failed(format!("delete failed: {e}")))?;

        if !stored || read.as_deref() != Some("ok") {
            return Err(ProbeError::Failed("read-back mismatch".to_string()));
        }

        let elapsed = started.elapsed();
        let result = if elapsed > self.slow_response {
            HealthCheckResult::degraded(ProbeName::Cache, "slow cache response")
        } else {
            HealthCheckResult::healthy(ProbeName::Cache)
        };
        Ok(result.with_response_time(elapsed))
    }
}

/// Process-level view: uptime, broker reachability, consumer state and
/// open circuit breakers.
pub struct ApplicationProbe {
    started_at: Instant,
    broker: Arc<dyn Broker>,
    consumer: Arc<ConsumerGroup>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl ApplicationProbe {
    pub fn new(
        broker: Arc<dyn Broker>,
        consumer: Arc<ConsumerGroup>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            broker,
            consumer,
            breakers,
        }
    }
}

#[async_trait]
impl HealthProbe for ApplicationProbe {
    fn name(&self) -> ProbeName {
        ProbeName::Application
    }

    async fn check(&self) -> Result<HealthCheckResult, ProbeError> {
        self.broker
            .ping()
            .await
            .map_err(|e| ProbeError::Failed(format!("broker unreachable: {e}")))?;

        let open = self.breakers.open_breakers();
        let stats = self.consumer.stats();
        let result = if open.is_empty() {
            HealthCheckResult::healthy(ProbeName::Application)
        } else {
            HealthCheckResult::degraded(
                ProbeName::Application,
                format!("open circuit breakers: {}", open.join(", ")),
            )
        };

        Ok(result
            .with_detail("uptime_secs", self.started_at.elapsed().as_secs())
            .with_detail("consumer_running", self.consumer.is_running())
            .with_detail("events_processed", stats.processed)
            .with_detail("duplicates_skipped", stats.duplicates_skipped)
            .with_detail("open_breakers", open))
    }
}

/// Host CPU and memory usage.
pub struct SystemResourcesProbe {
    system: Mutex<System>,
}

impl SystemResourcesProbe {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::new()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());
        Self {
            system: Mutex::new(System::new_with_specifics(refresh_kind)),
        }
    }
}

impl Default for SystemResourcesProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Status for the given usage percentages.
pub fn resource_status(cpu_percent: f32, memory_percent: f32) -> HealthStatus {
    if cpu_percent > RESOURCE_DEGRADED_PERCENT || memory_percent > RESOURCE_DEGRADED_PERCENT {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

#[async_trait]
impl HealthProbe for SystemResourcesProbe {
    fn name(&self) -> ProbeName {
        ProbeName::SystemResources
    }

    async fn check(&self) -> Result<HealthCheckResult, ProbeError> {
        let mut sys = self.system.lock().await;
        sys.refresh_cpu_all();
        sys.refresh_memory();

        let cpu_percent = sys.global_cpu_usage();
        let total = sys.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (sys.used_memory() as f64 / total as f64 * 100.0) as f32
        };

        let mut result = HealthCheckResult::new(
            ProbeName::SystemResources,
            resource_status(cpu_percent, memory_percent),
        );
        if result.status == HealthStatus::Degraded {
            result.error = Some("high resource usage".to_string());
        }
        Ok(result
            .with_detail("cpu_percent", f64::from(cpu_percent))
            .with_detail("memory_percent", f64::from(memory_percent))
            .with_detail("memory_used_mb", sys.used_memory() / 1024 / 1024))
    }
}

/// GET every configured external service URL.
pub struct HttpProbe {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl HttpProbe {
    pub fn new(urls: Vec<String>, request_timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProbeError::Failed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, urls })
    }

    async fn check_url(&self, url: &str) -> Result<u16, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(format!("HTTP {}", status.as_u16()))
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    fn name(&self) -> ProbeName {
        ProbeName::ExternalServices
    }

    async fn check(&self) -> Result<HealthCheckResult, ProbeError> {
        let checks = self.urls.iter().map(|url| self.check_url(url));
        let outcomes = futures::future::join_all(checks).await;

        let mut failed = Vec::new();
        let mut services = serde_json::Map::new();
        for (url, outcome) in self.urls.iter().zip(outcomes) {
            let value = match outcome {
                Ok(code) => serde_json::json!({ "status": "ok", "http_status": code }),
                Err(e) => {
                    failed.push(url.clone());
                    serde_json::json!({ "status": "failed", "error": e })
                }
            };
            services.insert(url.clone(), value);
        }

        let result = if failed.is_empty() {
            HealthCheckResult::healthy(ProbeName::ExternalServices)
        } else {
            HealthCheckResult::degraded(
                ProbeName::ExternalServices,
                format!("unreachable: {}", failed.join(", ")),
            )
        };
        Ok(result
            .with_detail("configured", self.urls.len())
            .with_detail("services", serde_json::Value::Object(services)))
    }
}

/// Probe backed by an async closure.
pub struct FnProbe<F> {
    name: ProbeName,
    f: F,
}

impl<F, Fut> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HealthCheckResult, ProbeError>> + Send + 'static,
{
    pub fn new(name: ProbeName, f: F) -> Self {
        Self { name, f }
    }
}

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HealthCheckResult, ProbeError>> + Send + 'static,
{
    fn name(&self) -> ProbeName {
        self.name
    }

    async fn check(&self) -> Result<HealthCheckResult, ProbeError> {
        (self.f)().await
    }
}
