//! In-process partitioned log implementing the `Broker` port.
//!
//! Mirrors the semantics of a log-style broker closely enough for local runs
//! and tests: keyed records hash to a fixed partition, each consumer group
//! has its own fetch positions and committed offsets, and a group that
//! leaves resumes from its last commit.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::domain::models::{Headers, Topic, TopicPartition};
use crate::domain::ports::{Broker, BrokerError, BrokerRecord, CommitOffset, RecordPosition};

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<String>,
    value: Vec<u8>,
    headers: Headers,
}

#[derive(Debug, Default)]
struct GroupState {
    positions: HashMap<TopicPartition, u64>,
    committed: HashMap<TopicPartition, u64>,
}

#[derive(Debug, Default)]
struct LogState {
    topics: HashMap<Topic, Vec<Vec<StoredRecord>>>,
    groups: HashMap<String, GroupState>,
}

/// In-memory broker. Cheap to construct, safe to share behind an `Arc`.
pub struct InMemoryBroker {
    state: Mutex<LogState>,
    partitions: u32,
    next_partition: AtomicU32,
    appended: watch::Sender<u64>,
    available: AtomicBool,
    ack_delay: Mutex<Option<Duration>>,
}

impl InMemoryBroker {
    pub fn new(partitions_per_topic: u32) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            state: Mutex::new(LogState::default()),
            partitions: partitions_per_topic.max(1),
            next_partition: AtomicU32::new(0),
            appended,
            available: AtomicBool::new(true),
            ack_delay: Mutex::new(None),
        }
    }

    /// Make every operation fail with `BrokerError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every ack, to exercise publish timeouts.
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        *self.lock_delay() = delay;
    }

    pub fn partitions_per_topic(&self) -> u32 {
        self.partitions
    }

    /// Partition a key is routed to.
    pub fn partition_for_key(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        u32::try_from(hasher.finish() % u64::from(self.partitions)).unwrap_or(0)
    }

    /// Every record of a topic, ordered by partition then offset.
    pub fn topic_records(&self, topic: &str) -> Vec<BrokerRecord> {
        let state = self.lock_state();
        let topic = Topic::from(topic);
        let records = state
            .topics
            .get(&topic)
            .map(|partitions| {
                partitions
                    .iter()
                    .enumerate()
                    .flat_map(|(partition, log)| {
                        log.iter().enumerate().map({
                            let topic = topic.clone();
                            move |(offset, record)| {
                                to_broker_record(
                                    &topic,
                                    partition_index(partition),
                                    offset as u64,
                                    record,
                                )
                            }
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        records
    }

    /// Last committed offset of a group on one partition.
    pub fn committed_offset(&self, group_id: &str, tp: &TopicPartition) -> Option<u64> {
        let state = self.lock_state();
        state
            .groups
            .get(group_id)
            .and_then(|g| g.committed.get(tp).copied())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LogState> {
        // A panic while holding the lock cannot leave the log half-written:
        // every mutation is a single push or insert.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_delay(&self) -> std::sync::MutexGuard<'_, Option<Duration>> {
        self.ack_delay
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<(), BrokerError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("in-memory broker disabled".to_string()))
        }
    }

    fn fetch(&self, topics: &[Topic], group_id: &str, max_records: usize) -> Vec<BrokerRecord> {
        let mut state = self.lock_state();
        let LogState { topics: logs, groups } = &mut *state;
        let group = groups.entry(group_id.to_string()).or_default();
        let mut batch = Vec::new();

        for topic in topics {
            let Some(partitions) = logs.get(topic) else {
                continue;
            };
            for (index, log) in partitions.iter().enumerate() {
                let tp = TopicPartition::new(topic.clone(), partition_index(index));
                let committed = group.committed.get(&tp).copied().unwrap_or(0);
                let position = group.positions.entry(tp).or_insert(committed);
                let start = usize::try_from(*position).unwrap_or(usize::MAX).min(log.len());
                let end = start.saturating_add(max_records).min(log.len());
                for (offset, record) in log[start..end].iter().enumerate() {
                    let offset = (start + offset) as u64;
                    batch.push(to_broker_record(topic, partition_index(index), offset, record));
                }
                *position = end as u64;
            }
        }
        batch
    }
}

fn partition_index(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

fn to_broker_record(
    topic: &Topic,
    partition: u32,
    offset: u64,
    record: &StoredRecord,
) -> BrokerRecord {
    BrokerRecord {
        topic: topic.clone(),
        partition,
        offset,
        key: record.key.clone(),
        value: record.value.clone(),
        headers: record.headers.clone(),
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn append(
        &self,
        topic: &Topic,
        key: Option<&str>,
        value: Vec<u8>,
        headers: &Headers,
    ) -> Result<RecordPosition, BrokerError> {
        self.ensure_available()?;

        let delay = *self.lock_delay();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let partition = match key {
            Some(k) => self.partition_for_key(k),
            None => self.next_partition.fetch_add(1, Ordering::Relaxed) % self.partitions,
        };

        let offset = {
            let mut state = self.lock_state();
            let partitions = state
                .topics
                .entry(topic.clone())
                .or_insert_with(|| vec![Vec::new(); self.partitions as usize]);
            let log = &mut partitions[partition as usize];
            log.push(StoredRecord {
                key: key.map(str::to_string),
                value,
                headers: headers.clone(),
            });
            (log.len() - 1) as u64
        };

        self.appended.send_modify(|count| *count += 1);
        Ok(RecordPosition { partition, offset })
    }

    async fn poll(
        &self,
        topics: &[Topic],
        group_id: &str,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<BrokerRecord>, BrokerError> {
        let deadline = Instant::now() + timeout;
        // Subscribe before the first fetch so an append racing with it still
        // wakes this poll.
        let mut appended = self.appended.subscribe();

        loop {
            self.ensure_available()?;
            let batch = self.fetch(topics, group_id, max_records);
            if !batch.is_empty() {
                return Ok(batch);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(batch);
            }
            match tokio::time::timeout(remaining, appended.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => return Ok(Vec::new()),
            }
        }
    }

    async fn commit(&self, group_id: &str, offsets: &[CommitOffset]) -> Result<(), BrokerError> {
        self.ensure_available()?;
        let mut state = self.lock_state();
        let group = state.groups.entry(group_id.to_string()).or_default();
        for offset in offsets {
            group
                .committed
                .insert(offset.topic_partition.clone(), offset.next_offset);
        }
        Ok(())
    }

    async fn leave(&self, group_id: &str) -> Result<(), BrokerError> {
        let mut state = self.lock_state();
        if let Some(group) = state.groups.get_mut(group_id) {
            group.positions.clear();
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        self.ensure_available()
    }
}
