//! Error types for tether-agent

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operations::OperationKind;

/// Result type alias using tether-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single attempt of an externally-implemented operation.
///
/// These are transient by definition: the gateway retries them until the
/// retry policy is exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// The attempt did not finish within the configured timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The collaborator could not be reached
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The collaborator reported a failure
    #[error("{0}")]
    Failed(String),
}

impl OperationError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Logical failure raised by a capability.
///
/// Never escapes the gateway: it is converted into an error payload that the
/// next observe step sees.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// No capability with that name exists in the catalog
    #[error("Capability with name {0} not found.")]
    NotFound(String),

    /// The input did not match the capability's input schema
    #[error("Invalid input for capability {name}: {reason}")]
    InvalidInput { name: String, reason: String },

    /// The capability raised while running
    #[error("Error invoking capability {name}: {message}")]
    Failed { name: String, message: String },
}

impl CapabilityError {
    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// The three failure classes a conversation can run into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An operation timed out or was unavailable on every attempt
    TransientInfra,
    /// A capability was missing or failed; recovered locally
    CapabilityLogical,
    /// A think result carried neither or both of answer/action
    ContractViolation,
}

/// Errors that can occur while running a conversation
#[derive(Error, Debug)]
pub enum Error {
    /// An operation exhausted its retry policy
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    OperationFailed {
        operation: OperationKind,
        attempts: u32,
        #[source]
        source: OperationError,
    },

    /// An operation returned a result that breaks its contract
    #[error("{operation} violated its contract: {reason}")]
    ContractViolation {
        operation: OperationKind,
        reason: String,
    },

    /// A snapshot could not be stored or restored
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// The conversation behind an inbox has stopped
    #[error("Inbox closed")]
    Closed,

    /// A conversation with this id is already running in this process
    #[error("Conversation already running: {0}")]
    AlreadyRunning(String),

    /// The runtime was shut down and accepts no new conversations
    #[error("Runtime is shut down")]
    ShutDown,

    /// The task driving a conversation panicked or was aborted
    #[error("Conversation task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Classify this error for reporting
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::ContractViolation { .. } => FailureKind::ContractViolation,
            _ => FailureKind::TransientInfra,
        }
    }

    /// The operation this error originated from, if any
    pub fn operation(&self) -> Option<OperationKind> {
        match self {
            Error::OperationFailed { operation, .. } | Error::ContractViolation { operation, .. } => {
                Some(*operation)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_violation_kind() {
        let e = Error::ContractViolation {
            operation: OperationKind::Think,
            reason: "neither answer nor action".into(),
        };
        assert_eq!(e.kind(), FailureKind::ContractViolation);
        assert_eq!(e.operation(), Some(OperationKind::Think));
    }

    #[test]
    fn test_operation_failed_kind_and_message() {
        let e = Error::OperationFailed {
            operation: OperationKind::Observe,
            attempts: 5,
            source: OperationError::Timeout(Duration::from_secs(60)),
        };
        assert_eq!(e.kind(), FailureKind::TransientInfra);
        let msg = e.to_string();
        assert!(msg.contains("observe"), "got: {}", msg);
        assert!(msg.contains("5 attempt"), "got: {}", msg);
    }

    #[test]
    fn test_capability_not_found_message() {
        let e = CapabilityError::NotFound("nope".into());
        assert_eq!(e.to_string(), "Capability with name nope not found.");
    }

    #[test]
    fn test_failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::CapabilityLogical).unwrap();
        assert_eq!(json, "\"capability_logical\"");
    }
}
