//! Health check results and the aggregated report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Status of a single service or of the whole system.
///
/// Variants are ordered from best to worst so the overall status is the max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// HTTP status a health endpoint should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Healthy | Self::Degraded => 200,
            Self::Unhealthy => 503,
        }
    }

    /// Worst of all statuses; healthy when there are none.
    pub fn worst<I: IntoIterator<Item = Self>>(statuses: I) -> Self {
        statuses.into_iter().max().unwrap_or(Self::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names of the fixed probe set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeName {
    Database,
    Cache,
    ExternalServices,
    SystemResources,
    Application,
}

impl ProbeName {
    pub const ALL: [Self; 5] = [
        Self::Database,
        Self::Cache,
        Self::ExternalServices,
        Self::SystemResources,
        Self::Application,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Cache => "cache",
            Self::ExternalServices => "external_services",
            Self::SystemResources => "system_resources",
            Self::Application => "application",
        }
    }
}

impl std::fmt::Display for ProbeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one probe run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub service: ProbeName,
    pub status: HealthStatus,
    /// Probe latency in milliseconds.
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthCheckResult {
    pub fn new(service: ProbeName, status: HealthStatus) -> Self {
        Self {
            service,
            status,
            response_time_ms: 0,
            timestamp: Utc::now(),
            details: Map::new(),
            error: None,
        }
    }

    pub fn healthy(service: ProbeName) -> Self {
        Self::new(service, HealthStatus::Healthy)
    }

    pub fn degraded(service: ProbeName, reason: impl Into<String>) -> Self {
        let mut result = Self::new(service, HealthStatus::Degraded);
        result.error = Some(reason.into());
        result
    }

    pub fn unhealthy(service: ProbeName, error: impl Into<String>) -> Self {
        let mut result = Self::new(service, HealthStatus::Unhealthy);
        result.error = Some(error.into());
        result
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_response_time(mut self, elapsed: Duration) -> Self {
        self.response_time_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Merged snapshot of every probe, replaced wholesale each interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub services: BTreeMap<ProbeName, HealthCheckResult>,
}

impl HealthReport {
    pub fn from_results(results: Vec<HealthCheckResult>) -> Self {
        let services: BTreeMap<_, _> = results.into_iter().map(|r| (r.service, r)).collect();
        Self {
            status: HealthStatus::worst(services.values().map(|r| r.status)),
            timestamp: Utc::now(),
            services,
        }
    }

    pub fn service(&self, name: ProbeName) -> Option<&HealthCheckResult> {
        self.services.get(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_status_is_worst() {
        let report = HealthReport::from_results(vec![
            HealthCheckResult::healthy(ProbeName::Cache),
            HealthCheckResult::degraded(ProbeName::ExternalServices, "slow"),
            HealthCheckResult::healthy(ProbeName::Application),
        ]);
        assert_eq!(report.status, HealthStatus::Degraded);

        let report = HealthReport::from_results(vec![
            HealthCheckResult::degraded(ProbeName::Cache, "slow"),
            HealthCheckResult::unhealthy(ProbeName::Database, "down"),
        ]);
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_http_mapping() {
        assert_eq!(HealthStatus::Healthy.http_status(), 200);
        assert_eq!(HealthStatus::Degraded.http_status(), 200);
        assert_eq!(HealthStatus::Unhealthy.http_status(), 503);
    }

    #[test]
    fn test_report_serializes_service_names() {
        let report = HealthReport::from_results(vec![HealthCheckResult::healthy(
            ProbeName::SystemResources,
        )]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["services"]["system_resources"]["status"], "healthy");
    }
}
