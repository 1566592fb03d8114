pub mod config;
pub mod event;
pub mod health;
pub mod topic;

pub use config::{
    BrokerConfig, CircuitBreakerConfig, Config, ConsumerConfig, HealthConfig, LoggingConfig,
    PublisherConfig, RetryConfig, ShutdownConfig,
};
pub use event::{
    CourseProgress, EventCodecError, EventEnvelope, EventId, EventPayload, Headers, Registration,
    Submission, UserRef,
};
pub use health::{HealthCheckResult, HealthReport, HealthStatus, ProbeName};
pub use topic::{Topic, TopicPartition};
