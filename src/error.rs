use thiserror::Error;

use crate::protocol::ProtocolKind;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("download of {url} failed after {attempts} attempt(s): {reason}")]
    Download {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("archive extraction failed: {0}")]
    Extraction(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("certificate operation failed for {domain}: {reason}")]
    Certificate { domain: String, reason: String },

    #[error("service unit '{unit}' failed: {reason}")]
    Unit { unit: String, reason: String },

    #[error("missing dependency: {0}")]
    Dependency(String),

    #[error("system account operation failed: {0}")]
    Account(String),

    /// The previous state could not be restored; manual intervention is required.
    #[error("ROLLBACK FAILED for {kind}: {reason}; manual intervention required")]
    Rollback { kind: ProtocolKind, reason: String },

    #[error("{0} is not installed")]
    NotInstalled(ProtocolKind),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("{kind} is locked by another lifecycle operation")]
    Locked { kind: ProtocolKind },

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ManagerError {
    pub fn unit(unit: &str, reason: impl Into<String>) -> Self {
        Self::Unit {
            unit: unit.to_string(),
            reason: reason.into(),
        }
    }

    pub fn certificate(domain: &str, reason: impl Into<String>) -> Self {
        Self::Certificate {
            domain: domain.to_string(),
            reason: reason.into(),
        }
    }

    /// Rollback failures must always reach the operator.
    pub fn is_rollback(&self) -> bool {
        matches!(self, Self::Rollback { .. })
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;
