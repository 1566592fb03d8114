//! Event envelope and typed payloads.
//!
//! An [`EventEnvelope`] is the unit exchanged with the broker. The payload is
//! a tagged union keyed by `event_type`; event types this crate does not know
//! about travel as [`EventPayload::Custom`] so any producer can still publish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

/// Current schema version stamped on every envelope.
pub const SCHEMA_VERSION: &str = "1.0";

/// Header carrying the id of the event that caused this one.
pub const CAUSATION_HEADER: &str = "causation_id";

/// Header carrying the id of the first event in a cascade.
pub const CORRELATION_HEADER: &str = "correlation_id";

/// Broker record headers.
pub type Headers = BTreeMap<String, String>;

/// Identifier of an event, unique within the dedup window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

static LAST_ID_MILLIS: AtomicI64 = AtomicI64::new(0);

impl EventId {
    /// Derive an id from the event type and a process-wide monotonic
    /// millisecond clock.
    pub fn generate(event_type: &str) -> Self {
        let now = Utc::now().timestamp_millis();
        let mut last = LAST_ID_MILLIS.load(Ordering::Relaxed);
        let millis = loop {
            let next = now.max(last + 1);
            match LAST_ID_MILLIS.compare_exchange_weak(
                last,
                next,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => break next,
                Err(actual) => last = actual,
            }
        };
        Self(format!("{event_type}_{millis}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A newly registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

/// Reference to a single user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub user_id: String,
}

/// A user's relation to a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseProgress {
    pub user_id: String,
    pub course_id: String,
}

/// A submitted assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub user_id: String,
    pub assignment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
}

/// Typed event payload, keyed by event type.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    UserRegistered(Registration),
    WelcomeNotification(Registration),
    StartOnboarding(UserRef),
    CourseCompleted(CourseProgress),
    GenerateCertificate(CourseProgress),
    CourseCompletionNotification(CourseProgress),
    UpdateUserProgress(CourseProgress),
    AssignmentSubmitted(Submission),
    GradeSubmission(Submission),
    CheckPlagiarism(Submission),
    /// Any event type without a dedicated variant.
    Custom {
        event_type: String,
        data: Map<String, Value>,
    },
}

/// Errors raised while converting between wire values and typed payloads.
#[derive(Debug, Error)]
pub enum EventCodecError {
    #[error("invalid payload for event type '{event_type}': {source}")]
    InvalidPayload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("payload for event type '{0}' is not a JSON object")]
    NotAnObject(String),

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

fn typed<T: serde::de::DeserializeOwned>(
    event_type: &str,
    data: Map<String, Value>,
) -> Result<T, EventCodecError> {
    serde_json::from_value(Value::Object(data)).map_err(|source| EventCodecError::InvalidPayload {
        event_type: event_type.to_string(),
        source,
    })
}

impl EventPayload {
    /// Build a payload from its event type and raw data.
    pub fn from_parts(event_type: &str, data: Map<String, Value>) -> Result<Self, EventCodecError> {
        let payload = match event_type {
            "user_registered" => Self::UserRegistered(typed(event_type, data)?),
            "welcome_notification" => Self::WelcomeNotification(typed(event_type, data)?),
            "start_onboarding" => Self::StartOnboarding(typed(event_type, data)?),
            "course_completed" => Self::CourseCompleted(typed(event_type, data)?),
            "generate_certificate" => Self::GenerateCertificate(typed(event_type, data)?),
            "course_completion_notification" => {
                Self::CourseCompletionNotification(typed(event_type, data)?)
            }
            "update_user_progress" => Self::UpdateUserProgress(typed(event_type, data)?),
            "assignment_submitted" => Self::AssignmentSubmitted(typed(event_type, data)?),
            "grade_submission" => Self::GradeSubmission(typed(event_type, data)?),
            "check_plagiarism" => Self::CheckPlagiarism(typed(event_type, data)?),
            other => Self::Custom {
                event_type: other.to_string(),
                data,
            },
        };
        Ok(payload)
    }

    /// Build a payload from an arbitrary JSON value.
    pub fn from_value(event_type: &str, data: Value) -> Result<Self, EventCodecError> {
        match data {
            Value::Object(map) => Self::from_parts(event_type, map),
            _ => Err(EventCodecError::NotAnObject(event_type.to_string())),
        }
    }

    /// Wire name of the event type.
    pub fn event_type(&self) -> &str {
        match self {
            Self::UserRegistered(_) => "user_registered",
            Self::WelcomeNotification(_) => "welcome_notification",
            Self::StartOnboarding(_) => "start_onboarding",
            Self::CourseCompleted(_) => "course_completed",
            Self::GenerateCertificate(_) => "generate_certificate",
            Self::CourseCompletionNotification(_) => "course_completion_notification",
            Self::UpdateUserProgress(_) => "update_user_progress",
            Self::AssignmentSubmitted(_) => "assignment_submitted",
            Self::GradeSubmission(_) => "grade_submission",
            Self::CheckPlagiarism(_) => "check_plagiarism",
            Self::Custom { event_type, .. } => event_type,
        }
    }

    /// The user the event is about, used as the default partition key.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::UserRegistered(r) | Self::WelcomeNotification(r) => Some(&r.user_id),
            Self::StartOnboarding(u) => Some(&u.user_id),
            Self::CourseCompleted(c)
            | Self::GenerateCertificate(c)
            | Self::CourseCompletionNotification(c)
            | Self::UpdateUserProgress(c) => Some(&c.user_id),
            Self::AssignmentSubmitted(s) | Self::GradeSubmission(s) | Self::CheckPlagiarism(s) => {
                Some(&s.user_id)
            }
            Self::Custom { data, .. } => data.get("user_id").and_then(Value::as_str),
        }
    }

    /// Payload fields as a JSON object.
    pub fn to_data(&self) -> Map<String, Value> {
        let value = match self {
            Self::UserRegistered(r) | Self::WelcomeNotification(r) => serde_json::to_value(r),
            Self::StartOnboarding(u) => serde_json::to_value(u),
            Self::CourseCompleted(c)
            | Self::GenerateCertificate(c)
            | Self::CourseCompletionNotification(c)
            | Self::UpdateUserProgress(c) => serde_json::to_value(c),
            Self::AssignmentSubmitted(s) | Self::GradeSubmission(s) | Self::CheckPlagiarism(s) => {
                serde_json::to_value(s)
            }
            Self::Custom { data, .. } => return data.clone(),
        };
        // Plain structs of strings always serialize to objects.
        match value {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Immutable unit exchanged with the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    event_id: EventId,
    timestamp: DateTime<Utc>,
    payload: EventPayload,
    schema_version: String,
    key: Option<String>,
    headers: Headers,
}

/// JSON shape of the envelope stored in a broker record value.
#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    event_id: EventId,
    event_type: String,
    timestamp: DateTime<Utc>,
    data: Map<String, Value>,
    version: String,
}

impl EventEnvelope {
    /// Create an envelope with a freshly generated id.
    ///
    /// The partition key defaults to the payload's `user_id`.
    pub fn new(payload: EventPayload) -> Self {
        let event_id = EventId::generate(payload.event_type());
        let key = payload.user_id().map(str::to_string);
        Self {
            event_id,
            timestamp: Utc::now(),
            payload,
            schema_version: SCHEMA_VERSION.to_string(),
            key,
            headers: Headers::new(),
        }
    }

    /// Replace the generated id, e.g. when a producer republishes an event.
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<EventId>) -> Self {
        self.event_id = event_id.into();
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: Option<String>) -> Self {
        if key.is_some() {
            self.key = key;
        }
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers.extend(headers);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn event_type(&self) -> &str {
        self.payload.event_type()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Serialize the record value. Key and headers travel beside it.
    pub fn encode(&self) -> Result<Vec<u8>, EventCodecError> {
        let wire = WireEnvelope {
            event_id: self.event_id.clone(),
            event_type: self.event_type().to_string(),
            timestamp: self.timestamp,
            data: self.payload.to_data(),
            version: self.schema_version.clone(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Rebuild an envelope from a broker record.
    pub fn decode(
        value: &[u8],
        key: Option<String>,
        headers: Headers,
    ) -> Result<Self, EventCodecError> {
        let wire: WireEnvelope = serde_json::from_slice(value)?;
        let payload = EventPayload::from_parts(&wire.event_type, wire.data)?;
        Ok(Self {
            event_id: wire.event_id,
            timestamp: wire.timestamp,
            payload,
            schema_version: wire.version,
            key,
            headers,
        })
    }
}
