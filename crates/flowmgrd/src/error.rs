//! Flow operation errors.

use flow_orch_common::PoolError;
use flow_types::{SwitchId, TypeError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error classification carried in failure replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidArgument,
    FlowAlreadyExists,
    FlowNotFound,
    IncompletePair,
    DuplicateDirection,
    PathComputationFailure,
    TransactionFailure,
    TransactionTimeout,
    SerializationError,
    ResourceExhausted,
    InternalError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::FlowAlreadyExists => "FLOW_ALREADY_EXISTS",
            ErrorKind::FlowNotFound => "FLOW_NOT_FOUND",
            ErrorKind::IncompletePair => "INCOMPLETE_PAIR",
            ErrorKind::DuplicateDirection => "DUPLICATE_DIRECTION",
            ErrorKind::PathComputationFailure => "PATH_COMPUTATION_FAILURE",
            ErrorKind::TransactionFailure => "TRANSACTION_FAILURE",
            ErrorKind::TransactionTimeout => "TRANSACTION_TIMEOUT",
            ErrorKind::SerializationError => "SERIALIZATION_ERROR",
            ErrorKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Error type for flow operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        flow_id: Option<String>,
        message: String,
    },

    #[error("Flow {flow_id} already exists")]
    AlreadyExists { flow_id: String },

    #[error("Flow {flow_id} not found")]
    NotFound { flow_id: String },

    #[error("{0}")]
    Pairing(TypeError),

    #[error("Path computation failed for flow {flow_id}: {message}")]
    PathComputation { flow_id: String, message: String },

    #[error("Transaction failed for flow {flow_id} on {}: {cause}", join_switches(.switches))]
    TransactionFailed {
        flow_id: String,
        switches: Vec<SwitchId>,
        cause: String,
    },

    #[error("Transaction timed out for flow {flow_id}, no reply from {}", join_switches(.switches))]
    TransactionTimeout {
        flow_id: String,
        switches: Vec<SwitchId>,
    },

    #[error("Malformed message: {0}")]
    Serialization(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for flow operations.
pub type FlowResult<T> = std::result::Result<T, FlowError>;

fn join_switches(switches: &[SwitchId]) -> String {
    switches
        .iter()
        .map(SwitchId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl FlowError {
    pub fn invalid_argument(flow_id: impl Into<String>, message: impl Into<String>) -> Self {
        FlowError::InvalidArgument {
            flow_id: Some(flow_id.into()),
            message: message.into(),
        }
    }

    pub fn not_found(flow_id: impl Into<String>) -> Self {
        FlowError::NotFound {
            flow_id: flow_id.into(),
        }
    }

    pub fn already_exists(flow_id: impl Into<String>) -> Self {
        FlowError::AlreadyExists {
            flow_id: flow_id.into(),
        }
    }

    pub fn path_computation(flow_id: impl Into<String>, message: impl Into<String>) -> Self {
        FlowError::PathComputation {
            flow_id: flow_id.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        FlowError::Internal(message.into())
    }

    /// Attaches a flow id to a validation error that lacks one.
    pub fn for_flow(self, flow_id: &str) -> Self {
        match self {
            FlowError::InvalidArgument {
                flow_id: None,
                message,
            } => FlowError::InvalidArgument {
                flow_id: Some(flow_id.to_string()),
                message,
            },
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            FlowError::AlreadyExists { .. } => ErrorKind::FlowAlreadyExists,
            FlowError::NotFound { .. } => ErrorKind::FlowNotFound,
            FlowError::Pairing(TypeError::DuplicateDirection { .. }) => {
                ErrorKind::DuplicateDirection
            }
            FlowError::Pairing(_) => ErrorKind::IncompletePair,
            FlowError::PathComputation { .. } => ErrorKind::PathComputationFailure,
            FlowError::TransactionFailed { .. } => ErrorKind::TransactionFailure,
            FlowError::TransactionTimeout { .. } => ErrorKind::TransactionTimeout,
            FlowError::Serialization(_) => ErrorKind::SerializationError,
            FlowError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            FlowError::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn flow_id(&self) -> Option<&str> {
        match self {
            FlowError::InvalidArgument { flow_id, .. } => flow_id.as_deref(),
            FlowError::AlreadyExists { flow_id }
            | FlowError::NotFound { flow_id }
            | FlowError::PathComputation { flow_id, .. }
            | FlowError::TransactionFailed { flow_id, .. }
            | FlowError::TransactionTimeout { flow_id, .. } => Some(flow_id),
            FlowError::Pairing(TypeError::DuplicateDirection { flow_id, .. })
            | FlowError::Pairing(TypeError::IncompletePair { flow_id, .. }) => Some(flow_id),
            _ => None,
        }
    }

    /// Switches that caused the failure.
    pub fn switch_ids(&self) -> &[SwitchId] {
        match self {
            FlowError::TransactionFailed { switches, .. }
            | FlowError::TransactionTimeout { switches, .. } => switches,
            _ => &[],
        }
    }
}

impl From<TypeError> for FlowError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::DuplicateDirection { .. } | TypeError::IncompletePair { .. } => {
                FlowError::Pairing(err)
            }
            other => FlowError::InvalidArgument {
                flow_id: None,
                message: other.to_string(),
            },
        }
    }
}

impl From<PoolError> for FlowError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { .. } => FlowError::ResourceExhausted(err.to_string()),
            other => FlowError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Serialization(err.to_string())
    }
}
