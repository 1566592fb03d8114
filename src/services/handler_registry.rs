//! Handler registry and dispatch.
//!
//! Handlers are registered per event type and invoked in registration order.
//! Each invocation runs in its own task joined with a timeout, so an error,
//! a panic or a hang in one handler is recorded and the next handler still
//! runs. After the handlers, the fixed cascade for the event type is
//! published; cascade outcomes never affect the triggering event.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::cascade::follow_ups;
use super::publisher::Publisher;
use crate::domain::models::event::{CAUSATION_HEADER, CORRELATION_HEADER};
use crate::domain::models::{EventEnvelope, Headers};

/// Failure of a single handler invocation.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("handler timed out after {0:?}")]
    Timeout(Duration),

    #[error("handler panicked")]
    Panicked,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Side effect triggered by an event type.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError>;
}

/// Handler built from an async closure.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
        (self.f)(event.clone()).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

/// A handler that did not complete successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: String,
    pub error: String,
}

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub failures: Vec<HandlerFailure>,
    pub cascades_published: usize,
    pub cascades_failed: usize,
}

impl DispatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    publisher: Arc<Publisher>,
    handler_timeout: Duration,
}

impl HandlerRegistry {
    pub fn new(publisher: Arc<Publisher>, handler_timeout: Duration) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            publisher,
            handler_timeout,
        }
    }

    /// Append a handler for `event_type`.
    pub async fn register(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        debug!(event_type = %event_type, handler = handler.name(), "Registering handler");
        let mut handlers = self.handlers.write().await;
        handlers.entry(event_type).or_default().push(handler);
    }

    pub async fn handler_count(&self, event_type: &str) -> usize {
        let handlers = self.handlers.read().await;
        handlers.get(event_type).map_or(0, Vec::len)
    }

    /// Event types with at least one handler.
    pub async fn event_types(&self) -> Vec<String> {
        let handlers = self.handlers.read().await;
        let mut types: Vec<_> = handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Run every handler for the event's type, then publish its cascade.
    pub async fn dispatch(&self, event: &EventEnvelope) -> DispatchReport {
        let snapshot: Vec<Arc<dyn EventHandler>> = {
            let handlers = self.handlers.read().await;
            handlers.get(event.event_type()).cloned().unwrap_or_default()
        };

        let mut report = DispatchReport::default();
        let shared = Arc::new(event.clone());

        for handler in snapshot {
            report.attempted += 1;
            if let Err(e) = self.invoke(handler.clone(), shared.clone()).await {
                warn!(
                    event_id = %event.event_id(),
                    event_type = event.event_type(),
                    handler = handler.name(),
                    error = %e,
                    "Handler failed"
                );
                report.failures.push(HandlerFailure {
                    handler: handler.name().to_string(),
                    error: e.to_string(),
                });
            }
        }

        self.publish_cascade(event, &mut report).await;
        report
    }

    async fn invoke(
        &self,
        handler: Arc<dyn EventHandler>,
        event: Arc<EventEnvelope>,
    ) -> Result<(), HandlerError> {
        let mut task = AbortOnDrop(tokio::spawn(async move { handler.handle(&event).await }));
        match tokio::time::timeout(self.handler_timeout, &mut task.0).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HandlerError::Panicked),
            Err(_) => Err(HandlerError::Timeout(self.handler_timeout)),
        }
    }

    async fn publish_cascade(&self, event: &EventEnvelope, report: &mut DispatchReport) {
        let correlation = event
            .header(CORRELATION_HEADER)
            .unwrap_or(event.event_id().as_str())
            .to_string();

        for step in follow_ups(event.payload()) {
            let mut headers = Headers::new();
            headers.insert(CAUSATION_HEADER.to_string(), event.event_id().to_string());
            headers.insert(CORRELATION_HEADER.to_string(), correlation.clone());

            let event_type = step.payload.event_type().to_string();
            if self
                .publisher
                .publish(step.topic.clone(), step.payload, None, Some(headers))
                .await
            {
                report.cascades_published += 1;
            } else {
                report.cascades_failed += 1;
                warn!(
                    event_id = %event.event_id(),
                    cascade = %event_type,
                    topic = %step.topic,
                    "Cascade publish failed"
                );
            }
        }
    }
}

/// Aborts the handler task when dropped, so a timed-out handler or a
/// cancelled dispatch never leaves it running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryBroker, InMemoryDedupCache};
    use crate::domain::models::{CourseProgress, EventPayload, PublisherConfig};
    use std::sync::Mutex;

    fn registry_with(broker: Arc<InMemoryBroker>, timeout: Duration) -> HandlerRegistry {
        let cache = Arc::new(InMemoryDedupCache::new());
        let publisher = Arc::new(Publisher::new(broker, cache, &PublisherConfig::default()));
        HandlerRegistry::new(publisher, timeout)
    }

    fn course_completed() -> EventEnvelope {
        EventEnvelope::new(EventPayload::CourseCompleted(CourseProgress {
            user_id: "u1".to_string(),
            course_id: "c1".to_string(),
        }))
    }

    fn recording(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn EventHandler> {
        handler_fn(name, move |_event| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(name);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let registry = registry_with(Arc::new(InMemoryBroker::new(1)), Duration::from_secs(1));
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.register("course_completed", recording("first", log.clone())).await;
        registry.register("course_completed", recording("second", log.clone())).await;
        registry.register("course_completed", recording("third", log.clone())).await;

        let report = registry.dispatch(&course_completed()).await;

        assert_eq!(report.attempted, 3);
        assert!(report.all_succeeded());
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let registry = registry_with(Arc::new(InMemoryBroker::new(1)), Duration::from_secs(1));
        let log = Arc::new(Mutex::new(Vec::new()));

        registry
            .register(
                "course_completed",
                handler_fn("broken", |_event| async {
                    Err::<(), _>(HandlerError::Failed("certificate service down".to_string()))
                }),
            )
            .await;
        registry
            .register(
                "course_completed",
                handler_fn("panics", |_event| async {
                    let explode = true;
                    if explode {
                        panic!("boom");
                    }
                    Ok(())
                }),
            )
            .await;
        registry.register("course_completed", recording("after", log.clone())).await;

        let report = registry.dispatch(&course_completed()).await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].handler, "broken");
        assert_eq!(report.failures[1].handler, "panics");
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_handler_times_out() {
        let registry = registry_with(Arc::new(InMemoryBroker::new(1)), Duration::from_millis(100));
        registry
            .register(
                "course_completed",
                handler_fn("hangs", |_event| async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }),
            )
            .await;

        let report = registry.dispatch(&course_completed()).await;

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_dispatch_stops_running_handler() {
        let registry = Arc::new(registry_with(
            Arc::new(InMemoryBroker::new(1)),
            Duration::from_secs(5),
        ));
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler_log = log.clone();
        registry
            .register(
                "course_completed",
                handler_fn("slow", move |_event| {
                    let log = handler_log.clone();
                    async move {
                        log.lock().unwrap().push("started");
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        log.lock().unwrap().push("finished");
                        Ok(())
                    }
                }),
            )
            .await;

        let dispatching = registry.clone();
        let dispatch = tokio::spawn(async move {
            dispatching.dispatch(&course_completed()).await;
        });
        for _ in 0..100 {
            if !log.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        dispatch.abort();
        assert!(dispatch.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*log.lock().unwrap(), vec!["started"]);
    }

    #[tokio::test]
    async fn test_cascade_published_with_causation_headers() {
        let broker = Arc::new(InMemoryBroker::new(1));
        let registry = registry_with(broker.clone(), Duration::from_secs(1));
        let event = course_completed();

        let report = registry.dispatch(&event).await;
        assert_eq!(report.cascades_published, 3);

        let certificates = broker.topic_records("certificates");
        assert_eq!(certificates.len(), 1);
        assert_eq!(
            certificates[0].headers.get(CAUSATION_HEADER),
            Some(&event.event_id().to_string())
        );
        assert_eq!(
            certificates[0].headers.get(CORRELATION_HEADER),
            Some(&event.event_id().to_string())
        );
    }

    #[tokio::test]
    async fn test_cascade_failure_is_contained() {
        let broker = Arc::new(InMemoryBroker::new(1));
        let registry = registry_with(broker.clone(), Duration::from_secs(1));
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register("course_completed", recording("handler", log.clone())).await;

        broker.set_available(false);
        let report = registry.dispatch(&course_completed()).await;

        assert!(report.all_succeeded());
        assert_eq!(report.cascades_failed, 3);
        assert_eq!(*log.lock().unwrap(), vec!["handler"]);
    }

    #[tokio::test]
    async fn test_registry_introspection() {
        let registry = registry_with(Arc::new(InMemoryBroker::new(1)), Duration::from_secs(1));
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register("user_registered", recording("a", log.clone())).await;
        registry.register("course_completed", recording("b", log.clone())).await;
        registry.register("course_completed", recording("c", log)).await;

        assert_eq!(registry.handler_count("course_completed").await, 2);
        assert_eq!(registry.handler_count("unknown").await, 0);
        assert_eq!(
            registry.event_types().await,
            vec!["course_completed".to_string(), "user_registered".to_string()]
        );
    }
}
