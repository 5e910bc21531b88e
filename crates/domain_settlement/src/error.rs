//! Settlement domain errors
//!
//! Every rejected operation surfaces a machine-readable kind plus a human
//! message; transaction failures roll back cleanly, so `Transient` errors
//! are always safe to retry.

use core_kernel::{MoneyError, PortError};
use thiserror::Error;

/// Errors that can occur in the settlement domain
#[derive(Debug, Error)]
pub enum SettlementError {
    /// Malformed or missing input, including amount-exceeds-remaining
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The operation contradicts current state (e.g. invoice already paid)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transient store failure (timeout, lost connection, serialization
    /// conflict) - safe to retry, no partial state is observable
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Unexpected store or adapter failure
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SettlementError {
    pub fn validation(message: impl Into<String>) -> Self {
        SettlementError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        SettlementError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        SettlementError::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        SettlementError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            SettlementError::Validation(_) => "validation",
            SettlementError::NotFound { .. } => "not_found",
            SettlementError::Conflict(_) => "conflict",
            SettlementError::Transient(_) => "transient",
            SettlementError::Internal { .. } => "internal",
        }
    }

    /// HTTP status code the interface layer surfaces for this error
    pub fn status_code(&self) -> u16 {
        match self {
            SettlementError::Validation(_) => 400,
            SettlementError::NotFound { .. } => 404,
            SettlementError::Conflict(_) => 409,
            SettlementError::Transient(_) | SettlementError::Internal { .. } => 500,
        }
    }

    /// True if the caller may safely retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, SettlementError::Transient(_))
    }
}

impl From<PortError> for SettlementError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound { entity_type, id } => SettlementError::Internal {
                // A port-level NotFound that the domain did not anticipate is
                // a programming error; anticipated lookups go through Option.
                message: format!("unexpected missing {entity_type}: {id}"),
                source: None,
            },
            PortError::Validation { message, .. } => SettlementError::Validation(message),
            PortError::Conflict { message } => SettlementError::Conflict(message),
            PortError::Connection { message, .. } => SettlementError::Transient(message),
            PortError::Timeout {
                operation,
                duration_ms,
            } => SettlementError::Transient(format!("{operation} timed out after {duration_ms}ms")),
            PortError::ServiceUnavailable { service } => {
                SettlementError::Transient(format!("{service} unavailable"))
            }
            PortError::Internal { message, source } => {
                SettlementError::Internal { message, source }
            }
        }
    }
}

impl From<MoneyError> for SettlementError {
    fn from(err: MoneyError) -> Self {
        SettlementError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(SettlementError::validation("bad").status_code(), 400);
        assert_eq!(SettlementError::not_found("Invoice", "x").status_code(), 404);
        assert_eq!(SettlementError::conflict("paid").status_code(), 409);
        assert_eq!(SettlementError::Transient("timeout".into()).status_code(), 500);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(SettlementError::conflict("already paid").kind(), "conflict");
        assert_eq!(SettlementError::validation("x").kind(), "validation");
    }

    #[test]
    fn test_transient_port_errors_are_retryable() {
        let err: SettlementError = PortError::connection("connection reset").into();
        assert!(err.is_retryable());

        let err: SettlementError = PortError::validation("bad input").into();
        assert!(!err.is_retryable());
    }
}
