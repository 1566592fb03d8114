//! Fixed follow-up events published in reaction to an event type.
//!
//! Cascades are not configurable: each trigger maps to a fixed list of
//! `(topic, payload)` pairs built from the trigger's own fields.

use crate::domain::models::{EventPayload, Topic, UserRef};

/// One follow-up publish.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeStep {
    pub topic: Topic,
    pub payload: EventPayload,
}

impl CascadeStep {
    fn new(topic: &str, payload: EventPayload) -> Self {
        Self {
            topic: Topic::from(topic),
            payload,
        }
    }
}

/// Follow-up events for `payload`, empty when the type has no cascade.
pub fn follow_ups(payload: &EventPayload) -> Vec<CascadeStep> {
    match payload {
        EventPayload::UserRegistered(registration) => vec![
            CascadeStep::new(
                Topic::NOTIFICATIONS,
                EventPayload::WelcomeNotification(registration.clone()),
            ),
            CascadeStep::new(
                Topic::ONBOARDING,
                EventPayload::StartOnboarding(UserRef {
                    user_id: registration.user_id.clone(),
                }),
            ),
        ],
        EventPayload::CourseCompleted(progress) => vec![
            CascadeStep::new(
                Topic::CERTIFICATES,
                EventPayload::GenerateCertificate(progress.clone()),
            ),
            CascadeStep::new(
                Topic::NOTIFICATIONS,
                EventPayload::CourseCompletionNotification(progress.clone()),
            ),
            CascadeStep::new(
                Topic::ANALYTICS,
                EventPayload::UpdateUserProgress(progress.clone()),
            ),
        ],
        EventPayload::AssignmentSubmitted(submission) => vec![
            CascadeStep::new(
                Topic::GRADING,
                EventPayload::GradeSubmission(submission.clone()),
            ),
            CascadeStep::new(
                Topic::PLAGIARISM,
                EventPayload::CheckPlagiarism(submission.clone()),
            ),
        ],
        _ => Vec::new(),
    }
}
