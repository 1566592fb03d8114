//! campus-events - event-driven messaging runtime for the campus platform
//!
//! Services publish typed domain events (user registrations, course
//! completions, assignment submissions) to a partitioned broker. A consumer
//! group dispatches them to registered handlers, deduplicating by event id,
//! and publishes the fixed follow-up cascade for each trigger event. Circuit
//! breakers, retry with exponential backoff, health aggregation, and
//! coordinated shutdown round out the runtime.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Event model, configuration, and port traits
//! - **Adapters** (`adapters`): In-process broker and dedup cache
//! - **Service Layer** (`services`): Publisher, consumer group, resilience, health
//! - **Application Layer** (`application`): Runtime wiring and lifecycle
//! - **Infrastructure Layer** (`infrastructure`): Config loading and logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use campus_events::application::EventRuntime;
//! use campus_events::domain::models::{Config, CourseProgress, EventPayload};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = EventRuntime::builder(Config::default()).build()?;
//!     runtime.initialize().await?;
//!     runtime.start().await?;
//!
//!     let payload = EventPayload::CourseCompleted(CourseProgress {
//!         user_id: "u1".into(),
//!         course_id: "c1".into(),
//!     });
//!     runtime.publisher().publish("course_events", payload, None, None).await;
//!
//!     runtime.run_until_signal().await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{EventRuntime, EventRuntimeBuilder, RuntimePhase};
pub use domain::errors::{RuntimeError, RuntimeResult};
pub use domain::models::{
    Config, EventEnvelope, EventId, EventPayload, HealthReport, HealthStatus, Topic,
};
pub use domain::ports::{Broker, DedupCache, HealthProbe};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    CircuitBreaker, ConsumerGroup, EventHandler, HandlerRegistry, HealthAggregator, Publisher,
    RetryPolicy, ShutdownCoordinator,
};
