//! Error types for the trust registry.

use crate::admin::AdminSource;
use crate::preflight::PreflightReport;

/// Trust registry errors.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// Malformed hash, timestamp, row count or registry entry.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Signer block cannot be verified by this server.
    #[error("unverifiable signer block: {reason}")]
    Unverifiable { reason: String },

    /// No asymmetric signing key is configured.
    #[error("signing unavailable: no signing key configured")]
    SigningUnavailable,

    /// Identity lacks admin rights.
    #[error("forbidden: admin access required (resolved via {admin_source})")]
    Forbidden { admin_source: AdminSource },

    /// The proposed rotation would leave a window without trusted signers.
    #[error("rotation preflight failed: {}", .report.errors.join(", "))]
    RotationPreflightFailed { report: PreflightReport },

    /// Rollback target does not exist.
    #[error("snapshot not found: {snapshot_id}")]
    SnapshotNotFound { snapshot_id: String },

    /// Refused to remove the last durable admin.
    #[error("cannot revoke {actor_id}: last profile-claim admin")]
    LastAdminStanding { actor_id: String },

    /// Durable I/O failed.
    #[error("storage failure: {message}")]
    Storage { message: String },

    /// Startup configuration is invalid.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl TrustError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub(crate) fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Caller input / setup
            Self::InvalidInput { .. } => 1,
            Self::Unverifiable { .. } => 1,
            Self::Config { .. } => 1,

            // Authorization
            Self::Forbidden { .. } => 2,

            // State conflicts
            Self::SnapshotNotFound { .. } => 3,
            Self::LastAdminStanding { .. } => 3,

            // Trust gap
            Self::RotationPreflightFailed { .. } => 4,

            // Durable I/O
            Self::Storage { .. } => 5,

            Self::SigningUnavailable => 6,
        }
    }

    /// Whether the error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

impl From<std::io::Error> for TrustError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }
}

/// Result type for trust registry operations.
pub type TrustResult<T> = Result<T, TrustError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_stable() {
        assert_eq!(TrustError::invalid("bad hash").exit_code(), 1);
        assert_eq!(
            TrustError::Forbidden {
                admin_source: AdminSource::None
            }
            .exit_code(),
            2
        );
        assert_eq!(
            TrustError::SnapshotNotFound {
                snapshot_id: "x".into()
            }
            .exit_code(),
            3
        );
        assert_eq!(TrustError::storage("disk").exit_code(), 5);
        assert_eq!(TrustError::SigningUnavailable.exit_code(), 6);
    }

    #[test]
    fn test_only_storage_is_retryable() {
        assert!(TrustError::storage("disk full").is_retryable());
        assert!(!TrustError::invalid("rowCount").is_retryable());
        assert!(!TrustError::SigningUnavailable.is_retryable());
    }

    #[test]
    fn test_forbidden_carries_source() {
        let err = TrustError::Forbidden {
            admin_source: AdminSource::EnvAllowlist,
        };
        assert!(err.to_string().contains("env_allowlist"));
    }
}
