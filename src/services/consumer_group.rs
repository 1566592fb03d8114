//! Consumer group: poll, deduplicate, dispatch, commit.
//!
//! Delivery is at-least-once. Each record is claimed through an atomic
//! `processed:<event_id>` set-if-absent before dispatch, so a redelivered or
//! republished event reaches the handlers at most once per dedup window.
//! Offsets are committed only after every record of the batch was attempted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::handler_registry::HandlerRegistry;
use crate::domain::errors::{RuntimeError, RuntimeResult};
use crate::domain::models::{ConsumerConfig, EventEnvelope, Topic, TopicPartition};
use crate::domain::ports::{processed_key, Broker, BrokerRecord, CommitOffset, DedupCache};

/// Point-in-time copy of the group's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub processed: u64,
    pub duplicates_skipped: u64,
    pub decode_failures: u64,
    pub handler_failures: u64,
    pub batches_committed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    duplicates_skipped: AtomicU64,
    decode_failures: AtomicU64,
    handler_failures: AtomicU64,
    batches_committed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            processed: self.processed.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the group handle and its poll task.
struct Worker {
    broker: Arc<dyn Broker>,
    cache: Arc<dyn DedupCache>,
    registry: Arc<HandlerRegistry>,
    config: ConsumerConfig,
    counters: Counters,
    running: AtomicBool,
}

struct ActiveLoop {
    group_id: String,
    handle: JoinHandle<()>,
}

pub struct ConsumerGroup {
    worker: Arc<Worker>,
    stop_tx: watch::Sender<bool>,
    active: Mutex<Option<ActiveLoop>>,
}

impl ConsumerGroup {
    pub fn new(
        broker: Arc<dyn Broker>,
        cache: Arc<dyn DedupCache>,
        registry: Arc<HandlerRegistry>,
        config: ConsumerConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            worker: Arc::new(Worker {
                broker,
                cache,
                registry,
                config,
                counters: Counters::default(),
                running: AtomicBool::new(false),
            }),
            stop_tx,
            active: Mutex::new(None),
        }
    }

    /// Spawn the poll loop for `topics` under `group_id`.
    pub async fn start(&self, topics: Vec<Topic>, group_id: impl Into<String>) -> RuntimeResult<()> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(RuntimeError::AlreadyStarted);
        }

        let group_id = group_id.into();
        self.stop_tx.send_replace(false);
        self.worker.running.store(true, Ordering::SeqCst);

        info!(
            group_id = %group_id,
            topics = ?topics.iter().map(Topic::as_str).collect::<Vec<_>>(),
            "Consumer group starting"
        );

        let worker = self.worker.clone();
        let stop_rx = self.stop_tx.subscribe();
        let loop_group = group_id.clone();
        let handle = tokio::spawn(async move {
            worker.run(topics, loop_group, stop_rx).await;
        });

        *active = Some(ActiveLoop { group_id, handle });
        Ok(())
    }

    /// Stop polling, let the in-flight batch finish within the grace period,
    /// then release the group's broker state.
    pub async fn stop(&self) {
        let Some(ActiveLoop { group_id, mut handle }) = self.active.lock().await.take() else {
            return;
        };

        self.stop_tx.send_replace(true);
        let grace = self.worker.config.shutdown_grace();
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => debug!(group_id = %group_id, "Consumer loop exited"),
            Ok(Err(e)) => error!(group_id = %group_id, error = %e, "Consumer loop panicked"),
            Err(_) => {
                warn!(
                    group_id = %group_id,
                    grace_ms = grace.as_millis() as u64,
                    "In-flight batch did not finish within grace period; aborting"
                );
                handle.abort();
            }
        }
        self.worker.running.store(false, Ordering::SeqCst);

        if let Err(e) = self.worker.broker.leave(&group_id).await {
            warn!(group_id = %group_id, error = %e, "Failed to leave consumer group");
        }
        info!(group_id = %group_id, "Consumer group stopped");
    }

    pub fn is_running(&self) -> bool {
        self.worker.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ConsumerStats {
        self.worker.counters.snapshot()
    }
}

impl Worker {
    async fn run(&self, topics: Vec<Topic>, group_id: String, mut stop_rx: watch::Receiver<bool>) {
        let poll_timeout = self.config.poll_timeout();

        loop {
            if *stop_rx.borrow() {
                break;
            }

            // Only the poll is raced against stop; a fetched batch always runs
            // to completion and gets committed.
            let polled = tokio::select! {
                _ = stop_rx.changed() => break,
                polled = self.broker.poll(&topics, &group_id, self.config.max_poll_records, poll_timeout) => polled,
            };

            match polled {
                Ok(records) if records.is_empty() => {}
                Ok(records) => self.process_batch(&group_id, records).await,
                Err(e) => {
                    warn!(group_id = %group_id, error = %e, "Poll failed; backing off");
                    tokio::select! {
                        _ = stop_rx.changed() => break,
                        _ = tokio::time::sleep(poll_timeout) => {}
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    async fn process_batch(&self, group_id: &str, records: Vec<BrokerRecord>) {
        let mut next_offsets: HashMap<TopicPartition, u64> = HashMap::new();
        let size = records.len();

        for record in records {
            let tp = record.topic_partition();
            let next = record.offset + 1;
            self.process_record(record).await;
            let entry = next_offsets.entry(tp).or_insert(next);
            *entry = (*entry).max(next);
        }

        let offsets: Vec<CommitOffset> = next_offsets
            .into_iter()
            .map(|(topic_partition, next_offset)| CommitOffset {
                topic_partition,
                next_offset,
            })
            .collect();

        match self.broker.commit(group_id, &offsets).await {
            Ok(()) => {
                self.counters.batches_committed.fetch_add(1, Ordering::Relaxed);
                debug!(group_id = %group_id, records = size, "Batch committed");
            }
            Err(e) => {
                // Records will be redelivered; the processed markers keep the
                // second delivery from reaching the handlers.
                warn!(group_id = %group_id, error = %e, "Offset commit failed");
            }
        }
    }

    async fn process_record(&self, record: BrokerRecord) {
        let envelope = match EventEnvelope::decode(&record.value, record.key, record.headers) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Skipping undecodable record"
                );
                return;
            }
        };

        if !self.claim(&envelope).await {
            self.counters.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
            debug!(
                event_id = %envelope.event_id(),
                event_type = envelope.event_type(),
                "Duplicate event skipped"
            );
            return;
        }

        let report = self.registry.dispatch(&envelope).await;
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .handler_failures
            .fetch_add(report.failures.len() as u64, Ordering::Relaxed);
    }

    /// Atomically mark the event as processed. A cache outage lets the event
    /// through.
    async fn claim(&self, envelope: &EventEnvelope) -> bool {
        let key = processed_key(envelope.event_id().as_str());
        let marker = chrono::Utc::now().to_rfc3339();
        match self
            .cache
            .set_if_absent(&key, &marker, self.config.dedup_ttl())
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(
                    event_id = %envelope.event_id(),
                    error = %e,
                    "Dedup check failed; processing anyway"
                );
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryBroker, InMemoryDedupCache};
    use crate::domain::models::{EventPayload, PublisherConfig, Registration};
    use crate::services::handler_registry::{handler_fn, HandlerError};
    use crate::services::publisher::Publisher;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct Fixture {
        broker: Arc<InMemoryBroker>,
        publisher: Arc<Publisher>,
        registry: Arc<HandlerRegistry>,
        group: ConsumerGroup,
    }

    fn fixture(partitions: u32) -> Fixture {
        fixture_with_grace(partitions, 1_000)
    }

    fn fixture_with_grace(partitions: u32, shutdown_grace_ms: u64) -> Fixture {
        let broker = Arc::new(InMemoryBroker::new(partitions));
        let cache = Arc::new(InMemoryDedupCache::new());
        let publisher = Arc::new(Publisher::new(
            broker.clone(),
            cache.clone(),
            &PublisherConfig::default(),
        ));
        let registry = Arc::new(HandlerRegistry::new(publisher.clone(), Duration::from_secs(1)));
        let config = ConsumerConfig {
            poll_timeout_ms: 20,
            shutdown_grace_ms,
            ..ConsumerConfig::default()
        };
        let group = ConsumerGroup::new(broker.clone(), cache, registry.clone(), config);
        Fixture {
            broker,
            publisher,
            registry,
            group,
        }
    }

    fn registered(user_id: &str) -> EventPayload {
        EventPayload::UserRegistered(Registration {
            user_id: user_id.to_string(),
            email: None,
            full_name: None,
        })
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    fn user_ids(log: &StdMutex<Vec<String>>) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    async fn record_users(registry: &HandlerRegistry, log: Arc<StdMutex<Vec<String>>>) {
        registry
            .register(
                "user_registered",
                handler_fn("record", move |event| {
                    let log = log.clone();
                    async move {
                        let user = event.payload().user_id().unwrap_or_default().to_string();
                        log.lock().unwrap().push(user);
                        Ok(())
                    }
                }),
            )
            .await;
    }

    #[tokio::test]
    async fn test_same_event_id_dispatched_once() {
        let f = fixture(1);
        let log = Arc::new(StdMutex::new(Vec::new()));
        record_users(&f.registry, log.clone()).await;

        let envelope = EventEnvelope::new(registered("u1")).with_event_id("user_registered_1");
        assert!(f.publisher.publish_envelope("user_events", &envelope).await);
        assert!(f.publisher.publish_envelope("user_events", &envelope).await);

        f.group
            .start(vec![Topic::from("user_events")], "test-group")
            .await
            .unwrap();
        wait_until(|| f.group.stats().duplicates_skipped == 1).await;
        f.group.stop().await;

        assert_eq!(user_ids(&log), vec!["u1".to_string()]);
        assert_eq!(f.group.stats().processed, 1);
    }

    #[tokio::test]
    async fn test_partition_order_preserved() {
        let f = fixture(1);
        let log = Arc::new(StdMutex::new(Vec::new()));
        record_users(&f.registry, log.clone()).await;

        for i in 0..10 {
            let user = format!("u{i}");
            assert!(
                f.publisher
                    .publish("user_events", registered(&user), Some("same".to_string()), None)
                    .await
            );
        }

        f.group
            .start(vec![Topic::from("user_events")], "test-group")
            .await
            .unwrap();
        wait_until(|| f.group.stats().processed == 10).await;
        f.group.stop().await;

        let expected: Vec<String> = (0..10).map(|i| format!("u{i}")).collect();
        assert_eq!(user_ids(&log), expected);
    }

    #[tokio::test]
    async fn test_handler_failure_does_not_abort_batch() {
        let f = fixture(1);
        let log = Arc::new(StdMutex::new(Vec::new()));
        f.registry
            .register(
                "user_registered",
                handler_fn("fails-for-u1", |event| async move {
                    if event.payload().user_id() == Some("u1") {
                        return Err(HandlerError::Failed("rejected".to_string()));
                    }
                    Ok(())
                }),
            )
            .await;
        record_users(&f.registry, log.clone()).await;

        for user in ["u1", "u2"] {
            f.publisher
                .publish("user_events", registered(user), Some("k".to_string()), None)
                .await;
        }

        f.group
            .start(vec![Topic::from("user_events")], "test-group")
            .await
            .unwrap();
        wait_until(|| f.group.stats().processed == 2).await;
        f.group.stop().await;

        assert_eq!(user_ids(&log), vec!["u1".to_string(), "u2".to_string()]);
        assert_eq!(f.group.stats().handler_failures, 1);
    }

    #[tokio::test]
    async fn test_offsets_committed_after_batch() {
        let f = fixture(1);
        for user in ["u1", "u2", "u3"] {
            f.publisher
                .publish("user_events", registered(user), Some("k".to_string()), None)
                .await;
        }

        f.group
            .start(vec![Topic::from("user_events")], "test-group")
            .await
            .unwrap();
        wait_until(|| f.group.stats().batches_committed >= 1).await;
        f.group.stop().await;

        let tp = TopicPartition::new("user_events", 0);
        assert_eq!(f.broker.committed_offset("test-group", &tp), Some(3));
    }

    #[tokio::test]
    async fn test_undecodable_record_is_skipped_and_committed() {
        let f = fixture(1);
        f.broker
            .append(
                &Topic::from("user_events"),
                Some("k"),
                b"not json".to_vec(),
                &Default::default(),
            )
            .await
            .unwrap();
        f.publisher
            .publish("user_events", registered("u1"), Some("k".to_string()), None)
            .await;

        f.group
            .start(vec![Topic::from("user_events")], "test-group")
            .await
            .unwrap();
        wait_until(|| f.group.stats().processed == 1).await;
        f.group.stop().await;

        assert_eq!(f.group.stats().decode_failures, 1);
        let tp = TopicPartition::new("user_events", 0);
        assert_eq!(f.broker.committed_offset("test-group", &tp), Some(2));
    }

    /// Handler that flags when it starts, sleeps `delay`, then counts a
    /// completion.
    async fn register_slow(
        registry: &HandlerRegistry,
        delay: Duration,
    ) -> (Arc<AtomicBool>, Arc<AtomicU64>) {
        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicU64::new(0));
        let (s, c) = (started.clone(), finished.clone());
        registry
            .register(
                "user_registered",
                handler_fn("slow", move |_event| {
                    let (s, c) = (s.clone(), c.clone());
                    async move {
                        s.store(true, Ordering::SeqCst);
                        tokio::time::sleep(delay).await;
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .await;
        (started, finished)
    }

    #[tokio::test]
    async fn test_stop_lets_in_flight_batch_finish_and_commit() {
        let f = fixture_with_grace(1, 3_000);
        let (started, finished) = register_slow(&f.registry, Duration::from_millis(200)).await;
        for user in ["u1", "u2", "u3"] {
            f.publisher
                .publish("user_events", registered(user), Some("k".to_string()), None)
                .await;
        }

        f.group
            .start(vec![Topic::from("user_events")], "test-group")
            .await
            .unwrap();
        wait_until(|| started.load(Ordering::SeqCst)).await;
        f.group.stop().await;

        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(f.group.stats().processed, 3);
        assert_eq!(f.group.stats().batches_committed, 1);
        let tp = TopicPartition::new("user_events", 0);
        assert_eq!(f.broker.committed_offset("test-group", &tp), Some(3));
    }

    #[tokio::test]
    async fn test_stop_past_grace_aborts_batch_without_commit() {
        let f = fixture_with_grace(1, 50);
        let (started, finished) = register_slow(&f.registry, Duration::from_millis(400)).await;
        f.publisher
            .publish("user_events", registered("u1"), Some("k".to_string()), None)
            .await;

        f.group
            .start(vec![Topic::from("user_events")], "test-group")
            .await
            .unwrap();
        wait_until(|| started.load(Ordering::SeqCst)).await;
        f.group.stop().await;
        assert!(!f.group.is_running());

        // The aborted handler must not complete after stop returns.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(f.group.stats().batches_committed, 0);
        let tp = TopicPartition::new("user_events", 0);
        assert_eq!(f.broker.committed_offset("test-group", &tp), None);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected_and_stop_is_idempotent() {
        let f = fixture(1);
        let topics = vec![Topic::from("user_events")];

        f.group.start(topics.clone(), "g").await.unwrap();
        assert!(f.group.is_running());
        assert!(matches!(
            f.group.start(topics, "g").await,
            Err(RuntimeError::AlreadyStarted)
        ));

        f.group.stop().await;
        assert!(!f.group.is_running());
        f.group.stop().await;
    }
}
