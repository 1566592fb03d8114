pub mod cascade;
pub mod circuit_breaker;
pub mod consumer_group;
pub mod handler_registry;
pub mod health_aggregator;
pub mod probes;
pub mod publisher;
pub mod retry;
pub mod shutdown;

pub use cascade::{follow_ups, CascadeStep};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerRegistry, CircuitResult, CircuitState, CircuitStats,
};
pub use consumer_group::{ConsumerGroup, ConsumerStats};
pub use handler_registry::{
    handler_fn, DispatchReport, EventHandler, FnHandler, HandlerError, HandlerFailure,
    HandlerRegistry,
};
pub use health_aggregator::HealthAggregator;
pub use probes::{ApplicationProbe, CacheProbe, FnProbe, HttpProbe, SystemResourcesProbe};
pub use publisher::Publisher;
pub use retry::RetryPolicy;
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
