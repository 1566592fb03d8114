//! Common test utilities for integration tests
//!
//! Provides shared fixtures and helpers used across multiple integration
//! test files.

use std::sync::Arc;
use std::time::Duration;

use campus_events::adapters::memory::InMemoryBroker;
use campus_events::domain::models::{
    Config, CourseProgress, EventEnvelope, EventPayload, Registration, Submission,
};
use campus_events::services::{handler_fn, EventHandler, HandlerError};
use campus_events::EventRuntime;
use tokio::sync::Mutex;

/// Setup test logging
///
/// Call this at the beginning of tests that need logging.
#[allow(dead_code)]
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Defaults tightened for tests: short polls and a short shutdown budget.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.broker.partitions_per_topic = 4;
    config.consumer.poll_timeout_ms = 20;
    config.consumer.handler_timeout_ms = 2_000;
    config.consumer.shutdown_grace_ms = 1_000;
    config.shutdown.timeout_secs = 5;
    config
}

/// A started runtime over a broker the test can inspect.
#[allow(dead_code)]
pub async fn started_runtime(config: Config) -> (EventRuntime, Arc<InMemoryBroker>) {
    let broker = Arc::new(InMemoryBroker::new(config.broker.partitions_per_topic));
    let runtime = EventRuntime::builder(config)
        .broker(broker.clone())
        .build()
        .expect("runtime should build");
    (runtime, broker)
}

/// Poll `predicate` every 10ms until it holds or `timeout_ms` elapses.
#[allow(dead_code)]
pub async fn wait_for<F>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

/// Handler that records every envelope it sees.
#[allow(dead_code)]
pub fn recording_handler(name: &str) -> (Arc<dyn EventHandler>, Arc<Mutex<Vec<EventEnvelope>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = handler_fn(name, move |event: EventEnvelope| {
        let sink = sink.clone();
        async move {
            sink.lock().await.push(event);
            Ok::<(), HandlerError>(())
        }
    });
    (handler, seen)
}

#[allow(dead_code)]
pub fn user_registered(user_id: &str) -> EventPayload {
    EventPayload::UserRegistered(Registration {
        user_id: user_id.to_string(),
        email: Some(format!("{user_id}@campus.test")),
        full_name: None,
    })
}

#[allow(dead_code)]
pub fn course_completed(user_id: &str, course_id: &str) -> EventPayload {
    EventPayload::CourseCompleted(CourseProgress {
        user_id: user_id.to_string(),
        course_id: course_id.to_string(),
    })
}

#[allow(dead_code)]
pub fn assignment_submitted(user_id: &str, assignment_id: &str) -> EventPayload {
    EventPayload::AssignmentSubmitted(Submission {
        user_id: user_id.to_string(),
        assignment_id: assignment_id.to_string(),
        submission_id: None,
        course_id: None,
    })
}
