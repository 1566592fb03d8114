use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the event layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Broker connection and partitioning
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Publisher behaviour
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Consumer group behaviour
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Circuit breaker defaults for protected dependencies
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry policy defaults
    #[serde(default)]
    pub retry: RetryConfig,

    /// Health aggregation
    #[serde(default)]
    pub health: HealthConfig,

    /// Coordinated shutdown
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BrokerConfig {
    /// Partitions created per topic by the in-process broker
    #[serde(default = "default_partitions")]
    pub partitions_per_topic: u32,

    /// Timeout for connectivity checks during initialization
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

const fn default_partitions() -> u32 {
    3
}

const fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            partitions_per_topic: default_partitions(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl BrokerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PublisherConfig {
    /// Maximum wait for a durable broker ack
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// TTL of the `event:<id>` dedup record
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
}

const fn default_ack_timeout_ms() -> u64 {
    10_000
}

const fn default_dedup_ttl_secs() -> u64 {
    3_600
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout_ms(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
        }
    }
}

impl PublisherConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }
}

/// Consumer group configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConsumerConfig {
    /// Consumer group id
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Topics the group subscribes to
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,

    /// Maximum records fetched per partition in one poll
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,

    /// Maximum time a poll may block
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Maximum time one handler may run for one event
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,

    /// TTL of the `processed:<id>` dedup record
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,

    /// Time `stop()` waits for the in-flight batch
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_group_id() -> String {
    "campus-events".to_string()
}

fn default_topics() -> Vec<String> {
    vec![
        "user_events".to_string(),
        "course_events".to_string(),
        "assignment_events".to_string(),
    ]
}

const fn default_max_poll_records() -> usize {
    100
}

const fn default_poll_timeout_ms() -> u64 {
    1_000
}

const fn default_handler_timeout_ms() -> u64 {
    15_000
}

const fn default_shutdown_grace_ms() -> u64 {
    10_000
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
            topics: default_topics(),
            max_poll_records: default_max_poll_records(),
            poll_timeout_ms: default_poll_timeout_ms(),
            handler_timeout_ms: default_handler_timeout_ms(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl ConsumerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time the circuit stays open before a trial call
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_recovery_timeout_ms() -> u64 {
    60_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay, doubled per attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound of a single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1_000
}

const fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Health aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthConfig {
    /// Interval between probe rounds
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,

    /// Timeout applied to each probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Probe latency above which a service is reported degraded
    #[serde(default = "default_slow_response_ms")]
    pub slow_response_ms: u64,

    /// External service URLs checked by the `external_services` probe
    #[serde(default)]
    pub external_services: Vec<String>,
}

const fn default_health_interval_secs() -> u64 {
    30
}

const fn default_probe_timeout_ms() -> u64 {
    5_000
}

const fn default_slow_response_ms() -> u64 {
    1_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            slow_response_ms: default_slow_response_ms(),
            external_services: Vec::new(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn slow_response(&self) -> Duration {
        Duration::from_millis(self.slow_response_ms)
    }
}

/// Shutdown configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ShutdownConfig {
    /// Shared deadline for all shutdown handlers
    #[serde(default = "default_shutdown_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation of log files (daily, hourly, never)
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
