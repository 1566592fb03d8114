//! Runtime wiring for the event layer.
//!
//! `EventRuntime` owns one explicitly constructed instance of every service
//! and drives their lifecycle: `initialize` verifies the broker and cache are
//! reachable, `start` launches the consumer group and the health loop, and
//! `shutdown` runs the coordinated stop. Nothing is global; callers hold the
//! runtime and pass its services to whatever needs them.

use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use crate::adapters::memory::{InMemoryBroker, InMemoryDedupCache};
use crate::domain::errors::{RuntimeError, RuntimeResult};
use crate::domain::models::{Config, Topic};
use crate::domain::ports::{Broker, BrokerError, CacheError, DedupCache, HealthProbe};
use crate::services::{
    ApplicationProbe, CacheProbe, CircuitBreakerRegistry, ConsumerGroup, HandlerRegistry,
    HealthAggregator, HttpProbe, Publisher, RetryPolicy, ShutdownCoordinator, ShutdownReport,
    SystemResourcesProbe,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimePhase {
    Created,
    Initialized,
    Started,
    Stopped,
}

/// Builder for [`EventRuntime`]. Broker and cache default to the in-process
/// adapters.
pub struct EventRuntimeBuilder {
    config: Config,
    broker: Option<Arc<dyn Broker>>,
    cache: Option<Arc<dyn DedupCache>>,
    probes: Vec<Arc<dyn HealthProbe>>,
}

impl EventRuntimeBuilder {
    #[must_use]
    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn DedupCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Add a probe owned by the caller, e.g. the `database` probe.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn build(self) -> RuntimeResult<EventRuntime> {
        let config = self.config;
        let broker = self
            .broker
            .unwrap_or_else(|| Arc::new(InMemoryBroker::new(config.broker.partitions_per_topic)));
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryDedupCache::new()));

        let publisher = Arc::new(Publisher::new(broker.clone(), cache.clone(), &config.publisher));
        let registry = Arc::new(HandlerRegistry::new(
            publisher.clone(),
            config.consumer.handler_timeout(),
        ));
        let consumer = Arc::new(ConsumerGroup::new(
            broker.clone(),
            cache.clone(),
            registry.clone(),
            config.consumer.clone(),
        ));
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));

        let http_probe = HttpProbe::new(
            config.health.external_services.clone(),
            config.health.probe_timeout(),
        )
        .map_err(|e| RuntimeError::InvalidConfig(e.to_string()))?;

        let mut health = HealthAggregator::new(&config.health)
            .with_probe(Arc::new(CacheProbe::new(
                cache.clone(),
                config.health.slow_response(),
            )))
            .with_probe(Arc::new(http_probe))
            .with_probe(Arc::new(SystemResourcesProbe::new()))
            .with_probe(Arc::new(ApplicationProbe::new(
                broker.clone(),
                consumer.clone(),
                breakers.clone(),
            )));
        for probe in self.probes {
            health = health.with_probe(probe);
        }

        Ok(EventRuntime {
            retry: RetryPolicy::from(&config.retry),
            shutdown: Arc::new(ShutdownCoordinator::new(config.shutdown.timeout())),
            health: Arc::new(health),
            config,
            broker,
            cache,
            publisher,
            registry,
            consumer,
            breakers,
            phase: Mutex::new(RuntimePhase::Created),
        })
    }
}

pub struct EventRuntime {
    config: Config,
    broker: Arc<dyn Broker>,
    cache: Arc<dyn DedupCache>,
    publisher: Arc<Publisher>,
    registry: Arc<HandlerRegistry>,
    consumer: Arc<ConsumerGroup>,
    breakers: Arc<CircuitBreakerRegistry>,
    health: Arc<HealthAggregator>,
    shutdown: Arc<ShutdownCoordinator>,
    retry: RetryPolicy,
    phase: Mutex<RuntimePhase>,
}

impl EventRuntime {
    pub fn builder(config: Config) -> EventRuntimeBuilder {
        EventRuntimeBuilder {
            config,
            broker: None,
            cache: None,
            probes: Vec::new(),
        }
    }

    /// Verify the broker and the cache answer within the connect timeout.
    ///
    /// # Errors
    /// Returns the first unreachable dependency; the runtime stays in
    /// `Created` and cannot be started.
    pub async fn initialize(&self) -> RuntimeResult<()> {
        let timeout = self.config.broker.connect_timeout();

        match tokio::time::timeout(timeout, self.broker.ping()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(RuntimeError::BrokerUnreachable(e)),
            Err(_) => return Err(RuntimeError::BrokerUnreachable(BrokerError::Timeout(timeout))),
        }
        match tokio::time::timeout(timeout, self.cache.ping()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(RuntimeError::CacheUnreachable(e)),
            Err(_) => return Err(RuntimeError::CacheUnreachable(CacheError::Timeout(timeout))),
        }

        let mut phase = self.lock_phase();
        if *phase == RuntimePhase::Created {
            *phase = RuntimePhase::Initialized;
            info!("Event runtime initialized");
        }
        Ok(())
    }

    /// Start the consumer group on the configured topics and the health loop.
    pub async fn start(&self) -> RuntimeResult<()> {
        let topics = self
            .config
            .consumer
            .topics
            .iter()
            .map(|name| Topic::new(name.as_str()))
            .collect();
        self.start_with_topics(topics).await
    }

    pub async fn start_with_topics(&self, topics: Vec<Topic>) -> RuntimeResult<()> {
        {
            let mut phase = self.lock_phase();
            match *phase {
                RuntimePhase::Created => return Err(RuntimeError::NotInitialized),
                RuntimePhase::Started | RuntimePhase::Stopped => {
                    return Err(RuntimeError::AlreadyStarted)
                }
                RuntimePhase::Initialized => *phase = RuntimePhase::Started,
            }
        }

        self.consumer
            .start(topics, self.config.consumer.group_id.clone())
            .await?;

        let consumer = self.consumer.clone();
        self.shutdown.register("consumer_group", move || async move {
            consumer.stop().await;
            Ok(())
        });

        let health_loop = self.health.start(self.shutdown.subscribe());
        self.shutdown.register("health_monitor", move || async move {
            health_loop.await?;
            Ok(())
        });

        info!(group_id = %self.config.consumer.group_id, "Event runtime started");
        Ok(())
    }

    /// Run the coordinated shutdown. Safe to call more than once.
    pub async fn shutdown(&self) -> ShutdownReport {
        let report = self.shutdown.shutdown().await;
        *self.lock_phase() = RuntimePhase::Stopped;
        if !report.is_clean() {
            warn!(
                failed = report.failed.len(),
                timed_out = report.timed_out.len(),
                "Shutdown finished with problems"
            );
        }
        report
    }

    /// Block until SIGINT/SIGTERM, then shut down.
    pub async fn run_until_signal(&self) -> anyhow::Result<ShutdownReport> {
        self.shutdown.wait_for_signal().await?;
        Ok(self.shutdown().await)
    }

    pub fn phase(&self) -> RuntimePhase {
        *self.lock_phase()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn publisher(&self) -> Arc<Publisher> {
        self.publisher.clone()
    }

    pub fn registry(&self) -> Arc<HandlerRegistry> {
        self.registry.clone()
    }

    pub fn consumer(&self) -> Arc<ConsumerGroup> {
        self.consumer.clone()
    }

    pub fn breakers(&self) -> Arc<CircuitBreakerRegistry> {
        self.breakers.clone()
    }

    pub fn health(&self) -> Arc<HealthAggregator> {
        self.health.clone()
    }

    pub fn shutdown_coordinator(&self) -> Arc<ShutdownCoordinator> {
        self.shutdown.clone()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn lock_phase(&self) -> std::sync::MutexGuard<'_, RuntimePhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
