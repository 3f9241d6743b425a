//! Error taxonomy for Veil.
//!
//! Explicit error types with context, using thiserror.
//!
//! Two distinctions matter and are load-bearing:
//!
//! - `NotFoundOrExpired` is deliberately one variant: an expired session is
//!   indistinguishable from one that never existed, so nothing leaks
//!   existence information.
//! - `BackendUnavailable` is never collapsed into `NotFoundOrExpired`: a
//!   transient infra failure must not read as "your disclosure window
//!   passed".

use thiserror::Error;

/// Result type alias for Veil operations
pub type Result<T> = std::result::Result<T, Error>;

/// Veil error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // User-facing rejections
    // =========================================================================
    /// Bad user input. Always reported to the actor with an actionable
    /// message, never a stack trace.
    #[error("validation failed: {field}, reason: {reason}")]
    Validation { field: String, reason: String },

    /// Wrong actor or scope for a claim or cancel. Reported as a generic
    /// "not permitted" without revealing whether the target exists.
    #[error("not permitted")]
    NotPermitted,

    /// A claim or get found nothing. Indistinguishable from "never
    /// existed" by design.
    #[error("not found or expired")]
    NotFoundOrExpired,

    // =========================================================================
    // Infrastructure
    // =========================================================================
    /// Transient backend failure. Distinct wording from
    /// `NotFoundOrExpired`; retried at the call site only where idempotent.
    #[error("backend unavailable: {operation}, reason: {reason}")]
    BackendUnavailable { operation: String, reason: String },

    /// The platform already gave up on this request before a reply could
    /// be sent. Logged and swallowed, never retried.
    #[error("stale request: {context}")]
    StaleRequest { context: String },

    // =========================================================================
    // Configuration
    // =========================================================================
    #[error("invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Catch-all
    // =========================================================================
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Shorthand for a validation failure.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a backend failure on a named operation.
    pub fn backend(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::BackendUnavailable {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call could succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::BackendUnavailable { .. })
    }

    /// Whether this error must be swallowed rather than propagated.
    pub fn is_stale(&self) -> bool {
        matches!(self, Error::StaleRequest { .. })
    }

    /// The message shown to the acting user. Infrastructure detail never
    /// reaches the actor; wording keeps expiry and outage distinct.
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation { reason, .. } => reason.clone(),
            Error::NotPermitted => "You are not permitted to do that.".to_string(),
            Error::NotFoundOrExpired => {
                "Nothing to act on. It may have expired or already been used.".to_string()
            }
            Error::BackendUnavailable { .. } => {
                "A temporary storage problem occurred. Please try again shortly.".to_string()
            }
            Error::StaleRequest { .. }
            | Error::InvalidConfiguration { .. }
            | Error::Internal { .. } => "Something went wrong. Please try again.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_failure_is_retriable_and_worded_apart_from_expiry() {
        let backend = Error::backend("session.get", "connection refused");
        let expired = Error::NotFoundOrExpired;

        assert!(backend.is_retriable());
        assert!(!expired.is_retriable());
        assert_ne!(backend.user_message(), expired.user_message());
    }

    #[test]
    fn stale_requests_are_flagged_for_swallowing() {
        let err = Error::StaleRequest {
            context: "followup after ack deadline".to_string(),
        };
        assert!(err.is_stale());
        assert!(!err.is_retriable());
    }
}
