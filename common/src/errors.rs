// Error handling framework: one enum per subsystem, thiserror throughout

use crate::role::Capability;
use thiserror::Error;

/// Capability enforcement errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoleError {
    #[error("capability '{capability}' denied for role '{role}'")]
    CapabilityDenied { role: String, capability: Capability },
}

/// Notification channel errors
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to publish to channel '{channel}': {reason}")]
    PublishFailed { channel: String, reason: String },

    #[error("delivery to subscriber '{endpoint}' failed: {reason}")]
    DeliveryFailed { endpoint: String, reason: String },

    #[error("invalid subscriber endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Artifact store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conditional update conflict for key '{key}': expected revision {expected:?}, found {found:?}")]
    Conflict {
        key: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("invalid record payload: {0}")]
    InvalidRecord(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Compute function errors
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("listing source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("invalid check configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Role(#[from] RoleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

/// Dispatch-layer errors reported per invocation attempt
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("handler invocation failed: {0}")]
    HandlerFailed(String),

    #[error("invocation timed out after {0} seconds")]
    Timeout(u64),

    #[error("event expired: age {age_seconds}s exceeds max event age {max_age_seconds}s")]
    EventExpired {
        age_seconds: i64,
        max_age_seconds: u64,
    },

    #[error("retry budget exhausted after {0} attempts")]
    RetriesExhausted(u32),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::InvalidRecord(err.to_string())
    }
}
