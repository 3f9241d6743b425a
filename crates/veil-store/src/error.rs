//! Errors from store operations.
//!
//! The critical contract: a backend-connectivity failure is never
//! reported as "not found". Callers translate `ConnectionFailed` /
//! `OperationFailed` into `veil_core::Error::BackendUnavailable`, while
//! an absent entry is simply `Ok(None)` at the trait level.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors from store operations.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Validation failed before the backend was touched.
    #[error("validation failed: {field}, reason: {reason}")]
    Validation { field: String, reason: String },

    /// A per-scope or per-store limit would be exceeded.
    #[error("limit exceeded: {resource}, limit: {limit}")]
    LimitExceeded { resource: &'static str, limit: usize },

    /// Could not reach the backend at all.
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// The backend was reachable but the operation failed.
    #[error("operation failed: {operation}, reason: {reason}")]
    OperationFailed { operation: String, reason: String },

    /// Stored bytes could not be decoded.
    #[error("serialization failed: {reason}")]
    SerializationFailed { reason: String },
}

impl StoreError {
    pub fn operation(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::OperationFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call could succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            StoreError::ConnectionFailed { .. } | StoreError::OperationFailed { .. }
        )
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_io_error() || err.is_timeout() {
            StoreError::ConnectionFailed {
                reason: err.to_string(),
            }
        } else {
            StoreError::OperationFailed {
                operation: "redis".to_string(),
                reason: err.to_string(),
            }
        }
    }
}

impl From<StoreError> for veil_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation { field, reason } => {
                veil_core::Error::Validation { field, reason }
            }
            StoreError::LimitExceeded { resource, limit } => veil_core::Error::Validation {
                field: resource.to_string(),
                reason: format!("limit of {} reached", limit),
            },
            StoreError::ConnectionFailed { reason } => veil_core::Error::BackendUnavailable {
                operation: "store".to_string(),
                reason,
            },
            StoreError::OperationFailed { operation, reason } => {
                veil_core::Error::BackendUnavailable { operation, reason }
            }
            StoreError::SerializationFailed { reason } => {
                veil_core::Error::Internal { message: reason }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_maps_to_backend_unavailable_not_absent() {
        let err = StoreError::ConnectionFailed {
            reason: "refused".to_string(),
        };
        assert!(err.is_retriable());

        let core: veil_core::Error = err.into();
        assert!(matches!(core, veil_core::Error::BackendUnavailable { .. }));
    }

    #[test]
    fn limit_maps_to_validation() {
        let core: veil_core::Error = StoreError::LimitExceeded {
            resource: "timers per scope",
            limit: 5,
        }
        .into();
        assert!(matches!(core, veil_core::Error::Validation { .. }));
    }
}
