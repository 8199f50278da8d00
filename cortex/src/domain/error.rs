// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Error taxonomy for the memory tiers
//!
//! | Error | Retried | Caller sees |
//! |-------|---------|-------------|
//! | `BackendError::ConnectionLost` / `SessionExpired` / `Timeout` | yes, within the retry budget | `MemoryError::RetryExhausted` once the budget is spent |
//! | `BackendError::Rejected` / `Serialization` | no | `MemoryError::Backend` |
//! | circuit open | no | `MemoryError::CircuitOpen`, or an empty read |
//! | malformed record or concept | no, never sent | `MemoryError::Validation` |

use std::time::Duration;

use super::memory::Tier;

/// Failure reported by a persistence engine adapter
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    /// Connection-class failures are worth another attempt on a fresh handle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::ConnectionLost(_) | BackendError::SessionExpired(_) | BackendError::Timeout(_)
        )
    }

    /// Classify a driver error message that carries no structured kind
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("session expired") || lower.contains("sessionexpired") {
            BackendError::SessionExpired(message)
        } else if lower.contains("connection")
            || lower.contains("unavailable")
            || lower.contains("broken pipe")
            || lower.contains("transport")
            || lower.contains("reset by peer")
            || lower.contains("io error")
        {
            BackendError::ConnectionLost(message)
        } else {
            BackendError::Rejected(message)
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Serialization(err.to_string())
    }
}

/// Errors surfaced by the memory tiers to their callers
#[derive(Debug, Clone, thiserror::Error)]
pub enum MemoryError {
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("circuit open for {tier} tier")]
    CircuitOpen { tier: Tier },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("operation cancelled during shutdown")]
    Cancelled,
}

impl MemoryError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, MemoryError::CircuitOpen { .. })
    }

    /// Whether this failure should count against a tier's circuit breaker
    pub fn counts_as_backend_failure(&self) -> bool {
        matches!(self, MemoryError::RetryExhausted { .. } | MemoryError::Backend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(BackendError::ConnectionLost("reset".into()).is_retryable());
        assert!(BackendError::SessionExpired("token".into()).is_retryable());
        assert!(BackendError::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(!BackendError::Rejected("bad cypher".into()).is_retryable());
        assert!(!BackendError::Serialization("eof".into()).is_retryable());
    }

    #[test]
    fn test_classify_driver_messages() {
        assert!(matches!(
            BackendError::classify("status: Unavailable, message: \"error trying to connect\""),
            BackendError::ConnectionLost(_)
        ));
        assert!(matches!(
            BackendError::classify("Neo.ClientError.Security.SessionExpired"),
            BackendError::SessionExpired(_)
        ));
        assert!(matches!(
            BackendError::classify("Invalid input 'MATCHH'"),
            BackendError::Rejected(_)
        ));
    }

    #[test]
    fn test_retry_exhausted_message_names_cause_and_attempts() {
        let err = MemoryError::RetryExhausted {
            operation: "upsert_concept".to_string(),
            attempts: 4,
            last_error: "connection lost: reset".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("upsert_concept"));
        assert!(message.contains("4 attempts"));
        assert!(message.contains("connection lost"));
    }
}
