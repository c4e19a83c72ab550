//! Error types for the entitlement engine

use thiserror::Error;

use crate::model::IdentityError;
use crate::store::RepositoryError;

/// Access and entitlement errors surfaced to callers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// No resolvable identity
    #[error("unauthenticated")]
    Unauthenticated,

    /// Caller lacks tenant or role rights for the operation
    #[error("access denied: {reason}")]
    AccessDenied { reason: String },

    /// Tier cap reached
    #[error("quota exceeded: {reason}")]
    QuotaExceeded { reason: String },

    /// Promo code is inactive, already used, or unknown
    #[error("invalid promo code")]
    InvalidPromoCode,

    /// Persistence failed; safe to retry
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl AccessError {
    /// Shorthand for [`AccessError::AccessDenied`]
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied { reason: reason.into() }
    }

    /// Shorthand for [`AccessError::QuotaExceeded`]
    pub fn quota(reason: impl Into<String>) -> Self {
        Self::QuotaExceeded { reason: reason.into() }
    }

    /// Whether the caller may retry the same operation unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

impl From<RepositoryError> for AccessError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => Self::denied(format!("{what} not found")),
            RepositoryError::Conflict(what) => Self::denied(what),
            RepositoryError::StorageError(msg) => Self::StorageUnavailable(msg),
        }
    }
}

impl From<IdentityError> for AccessError {
    fn from(err: IdentityError) -> Self {
        Self::denied(err.to_string())
    }
}

/// Result type for access decisions
pub type AccessResult<T> = Result<T, AccessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_are_retryable() {
        let err: AccessError = RepositoryError::StorageError("connection reset".into()).into();
        assert!(err.is_retryable());
        assert_eq!(err, AccessError::StorageUnavailable("connection reset".into()));
    }

    #[test]
    fn test_not_found_maps_to_denied() {
        let err: AccessError = RepositoryError::NotFound("tenant 42".into()).into();
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "access denied: tenant 42 not found");
    }
}
