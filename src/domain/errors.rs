//! Domain errors for the campus event layer.

use thiserror::Error;

use super::ports::{BrokerError, CacheError};

/// Fatal errors surfaced to the caller of `EventRuntime::initialize`.
///
/// Everything else (publish failures, handler errors, probe failures) is
/// contained and logged inside the component that observed it.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("broker unreachable at startup: {0}")]
    BrokerUnreachable(#[source] BrokerError),

    #[error("dedup cache unreachable at startup: {0}")]
    CacheUnreachable(#[source] CacheError),

    #[error("runtime not initialized; call initialize() first")]
    NotInitialized,

    #[error("runtime already started")]
    AlreadyStarted,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
