use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::{Headers, Topic, TopicPartition};

/// Broker failure kinds. All of them are transient from the caller's view.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("offset commit rejected: {0}")]
    CommitRejected(String),
}

/// Position assigned to an appended record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPosition {
    pub partition: u32,
    pub offset: u64,
}

/// A record delivered by `poll`.
#[derive(Debug, Clone)]
pub struct BrokerRecord {
    pub topic: Topic,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    pub value: Vec<u8>,
    pub headers: Headers,
}

impl BrokerRecord {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// Offset to commit: the next offset the group should read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOffset {
    pub topic_partition: TopicPartition,
    pub next_offset: u64,
}

/// Ordered, partitioned, at-least-once log.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a record and wait for the durable ack.
    async fn append(
        &self,
        topic: &Topic,
        key: Option<&str>,
        value: Vec<u8>,
        headers: &Headers,
    ) -> Result<RecordPosition, BrokerError>;

    /// Fetch up to `max_records` per partition, blocking at most `timeout`.
    ///
    /// Records of one partition are returned in offset order.
    async fn poll(
        &self,
        topics: &[Topic],
        group_id: &str,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<BrokerRecord>, BrokerError>;

    /// Commit offsets for the group.
    async fn commit(&self, group_id: &str, offsets: &[CommitOffset]) -> Result<(), BrokerError>;

    /// Release the group's fetch state. Uncommitted records are redelivered
    /// when the group polls again.
    async fn leave(&self, group_id: &str) -> Result<(), BrokerError>;

    /// Connectivity check.
    async fn ping(&self) -> Result<(), BrokerError>;
}
