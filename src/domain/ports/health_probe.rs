use async_trait::async_trait;
use thiserror::Error;

use crate::domain::models::{HealthCheckResult, ProbeName};

/// Failure raised by a probe body. The aggregator maps it to `Unhealthy`.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Independent health check against one subsystem.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> ProbeName;

    async fn check(&self) -> Result<HealthCheckResult, ProbeError>;
}
