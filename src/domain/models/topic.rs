use serde::{Deserialize, Serialize};

/// Logical broker channel. Many event types may share one topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub const USER_EVENTS: &'static str = "user_events";
    pub const COURSE_EVENTS: &'static str = "course_events";
    pub const ASSIGNMENT_EVENTS: &'static str = "assignment_events";
    pub const NOTIFICATIONS: &'static str = "notifications";
    pub const ONBOARDING: &'static str = "onboarding";
    pub const CERTIFICATES: &'static str = "certificates";
    pub const ANALYTICS: &'static str = "analytics";
    pub const GRADING: &'static str = "grading";
    pub const PLAGIARISM: &'static str = "plagiarism";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Topic {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single ordered partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: Topic,
    pub partition: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<Topic>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}
