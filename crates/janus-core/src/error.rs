//! Error taxonomy for the isolation core.
//!
//! Validators return structured [`crate::AccessDecision`]s for expected denials;
//! only the middleware's execution boundary converts a denial into a
//! [`JanusError`]. Unexpected internal failures surface as the opaque
//! `Internal` variant so no storage or verifier detail leaks to the caller.

use chrono::{DateTime, Utc};

use crate::domain::{KbType, Operation};

/// Result type for isolation-core operations.
pub type JanusResult<T> = Result<T, JanusError>;

/// Errors that can cross the middleware boundary.
#[derive(Debug, thiserror::Error)]
pub enum JanusError {
    /// Expected permission or isolation failure. Recoverable after remediation
    /// (grant the capability, switch mode, lift the suspension).
    #[error("access denied for '{entity}': {operation} on {kb}: {reason}")]
    AccessDenied {
        entity: String,
        operation: Operation,
        kb: KbType,
        reason: String,
    },

    /// Logged security event (cross-domain attempt, stale-mode caller). May
    /// trigger auto-suspension; not retryable until resolved.
    #[error("isolation violation: {0}")]
    IsolationViolation(String),

    /// Failed credential check. Retryable up to the configured attempt limit.
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    /// Mode switch refused before any state changed (same-mode request,
    /// transition already in flight).
    #[error("mode switch rejected: {0}")]
    SwitchRejected(String),

    /// Too many consecutive authentication failures. Not retryable before `until`.
    #[error("locked out until {until}")]
    Lockout { until: DateTime<Utc> },

    /// Hourly quota exhausted for this operation. Retryable after `reset_at`.
    #[error("rate limited: {operation} quota exhausted, resets at {reset_at}")]
    RateLimited {
        operation: Operation,
        reset_at: DateTime<Utc>,
    },

    /// Malformed registration request or invalid startup configuration. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Durable-store failure (sled open/read/write).
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Unexpected internal failure. Details are logged, never surfaced.
    #[error("internal error")]
    Internal,
}

impl JanusError {
    /// True when the caller may retry after waiting (lockout expiry or
    /// rate-limit window rollover).
    pub fn is_retryable_later(&self) -> bool {
        matches!(self, Self::Lockout { .. } | Self::RateLimited { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_display_names_the_tuple() {
        let err = JanusError::AccessDenied {
            entity: "scout".to_string(),
            operation: Operation::Write,
            kb: KbType::PersonalCore,
            reason: "capability missing".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("scout"));
        assert!(msg.contains("write"));
        assert!(msg.contains("capability missing"));
    }

    #[test]
    fn retryable_classification() {
        assert!(JanusError::Lockout { until: Utc::now() }.is_retryable_later());
        assert!(JanusError::RateLimited {
            operation: Operation::Read,
            reset_at: Utc::now(),
        }
        .is_retryable_later());
        assert!(!JanusError::Internal.is_retryable_later());
    }
}
