//! Publisher: builds envelopes, appends them to the broker and records the
//! `event:<id>` dedup marker.
//!
//! Infrastructure failures never escape as errors. A publish either reaches
//! the broker within the ack timeout and returns `true`, or it is logged and
//! returns `false`. There is no internal retry; wrap calls in a
//! [`RetryPolicy`](super::retry::RetryPolicy) when needed.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::domain::models::{EventEnvelope, EventId, EventPayload, Headers, PublisherConfig, Topic};
use crate::domain::ports::{published_key, Broker, DedupCache};

pub struct Publisher {
    broker: Arc<dyn Broker>,
    cache: Arc<dyn DedupCache>,
    ack_timeout: Duration,
    dedup_ttl: Duration,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>, cache: Arc<dyn DedupCache>, config: &PublisherConfig) -> Self {
        Self {
            broker,
            cache,
            ack_timeout: config.ack_timeout(),
            dedup_ttl: config.dedup_ttl(),
        }
    }

    /// Build an envelope for `payload` and publish it to `topic`.
    pub async fn publish(
        &self,
        topic: impl Into<Topic>,
        payload: EventPayload,
        key: Option<String>,
        headers: Option<Headers>,
    ) -> bool {
        let envelope = EventEnvelope::new(payload)
            .with_key(key)
            .with_headers(headers.unwrap_or_default());
        self.publish_envelope(topic, &envelope).await
    }

    /// Publish a pre-built envelope. Performs at most one broker append.
    pub async fn publish_envelope(&self, topic: impl Into<Topic>, envelope: &EventEnvelope) -> bool {
        let topic = topic.into();
        let event_id = envelope.event_id();

        let value = match envelope.encode() {
            Ok(value) => value,
            Err(e) => {
                error!(
                    topic = %topic,
                    event_id = %event_id,
                    error = %e,
                    "Failed to encode event"
                );
                return false;
            }
        };

        let append = self
            .broker
            .append(&topic, envelope.key(), value, envelope.headers());

        match tokio::time::timeout(self.ack_timeout, append).await {
            Ok(Ok(position)) => {
                debug!(
                    topic = %topic,
                    event_id = %event_id,
                    event_type = envelope.event_type(),
                    partition = position.partition,
                    offset = position.offset,
                    "Event published"
                );
            }
            Ok(Err(e)) => {
                error!(
                    topic = %topic,
                    event_id = %event_id,
                    error = %e,
                    "Failed to publish event"
                );
                return false;
            }
            Err(_) => {
                error!(
                    topic = %topic,
                    event_id = %event_id,
                    timeout_ms = self.ack_timeout.as_millis() as u64,
                    "Timed out waiting for broker ack"
                );
                return false;
            }
        }

        self.record_published(event_id).await;
        true
    }

    /// Whether an `event:<id>` marker is present. Cache errors read as `false`.
    pub async fn was_published(&self, event_id: &EventId) -> bool {
        match self.cache.get(&published_key(event_id.as_str())).await {
            Ok(marker) => marker.is_some(),
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "Dedup lookup failed");
                false
            }
        }
    }

    async fn record_published(&self, event_id: &EventId) {
        let key = published_key(event_id.as_str());
        let marker = chrono::Utc::now().to_rfc3339();
        if let Err(e) = self.cache.set_if_absent(&key, &marker, self.dedup_ttl).await {
            warn!(event_id = %event_id, error = %e, "Failed to record dedup marker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryBroker, InMemoryDedupCache};
    use crate::domain::models::CourseProgress;

    fn payload() -> EventPayload {
        EventPayload::CourseCompleted(CourseProgress {
            user_id: "u1".to_string(),
            course_id: "c1".to_string(),
        })
    }

    fn setup() -> (Arc<InMemoryBroker>, Arc<InMemoryDedupCache>, Publisher) {
        let broker = Arc::new(InMemoryBroker::new(2));
        let cache = Arc::new(InMemoryDedupCache::new());
        let publisher = Publisher::new(broker.clone(), cache.clone(), &PublisherConfig::default());
        (broker, cache, publisher)
    }

    #[tokio::test]
    async fn test_publish_appends_and_records_marker() {
        let (broker, cache, publisher) = setup();
        let envelope = EventEnvelope::new(payload());

        assert!(publisher.publish_envelope("course_events", &envelope).await);

        let records = broker.topic_records("course_events");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key.as_deref(), Some("u1"));
        let key = published_key(envelope.event_id().as_str());
        assert!(cache.get(&key).await.unwrap().is_some());
        assert!(publisher.was_published(envelope.event_id()).await);
    }

    #[tokio::test]
    async fn test_explicit_key_and_headers_are_forwarded() {
        let (broker, _cache, publisher) = setup();
        let mut headers = Headers::new();
        headers.insert("source".to_string(), "api".to_string());

        assert!(
            publisher
                .publish("course_events", payload(), Some("c1".to_string()), Some(headers))
                .await
        );

        let records = broker.topic_records("course_events");
        assert_eq!(records[0].key.as_deref(), Some("c1"));
        assert_eq!(records[0].headers.get("source").map(String::as_str), Some("api"));
    }

    #[tokio::test]
    async fn test_broker_failure_returns_false() {
        let (broker, _cache, publisher) = setup();
        broker.set_available(false);

        assert!(!publisher.publish("course_events", payload(), None, None).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_timeout_returns_false_without_append() {
        let (broker, _cache, publisher) = setup();
        broker.set_ack_delay(Some(Duration::from_secs(60)));

        assert!(!publisher.publish("course_events", payload(), None, None).await);
        assert!(broker.topic_records("course_events").is_empty());
    }

    #[tokio::test]
    async fn test_cache_failure_does_not_fail_publish() {
        let (broker, cache, publisher) = setup();
        cache.set_available(false);

        assert!(publisher.publish("course_events", payload(), None, None).await);
        assert_eq!(broker.topic_records("course_events").len(), 1);
    }
}
