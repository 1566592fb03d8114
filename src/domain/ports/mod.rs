//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the async interfaces that adapters must implement:
//! - Broker: ordered, partitioned, at-least-once log
//! - DedupCache: TTL key-value store with atomic set-if-absent
//! - HealthProbe: one named health check
//!
//! Services depend only on these traits, never on concrete adapters.

pub mod broker;
pub mod dedup_cache;
pub mod health_probe;

pub use broker::{Broker, BrokerError, BrokerRecord, CommitOffset, RecordPosition};
pub use dedup_cache::{processed_key, published_key, CacheError, DedupCache};
pub use health_probe::{HealthProbe, ProbeError};
