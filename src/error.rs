use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordError {
    #[error("Transport error talking to {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("Unexpected response {status} from {endpoint} for document '{document}'")]
    UnexpectedStatus {
        endpoint: String,
        document: String,
        status: u16,
    },

    #[error("Invalid document '{document}': {source}")]
    InvalidDocument {
        document: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Coordination timeout during {phase}: document '{document}' (timeout={timeout:?})")]
    CoordinationTimeout {
        document: String,
        timeout: Duration,
        phase: String,
    },

    #[error("Workload '{workload}' execution failed (exit code {exit_code:?}): {message}")]
    WorkloadFailed {
        workload: String,
        exit_code: Option<i32>,
        message: String,
    },

    #[error("Unknown workload: {0}")]
    UnknownWorkload(String),

    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl CoordError {
    pub fn transport(endpoint: impl Into<String>, err: impl std::fmt::Display) -> Self {
        CoordError::Transport {
            endpoint: endpoint.into(),
            message: err.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoordError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CoordError::CoordinationTimeout { .. })
    }

    /// Whether the whole-phase retry may run the sequence again after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoordError::Transport { .. }
            | CoordError::UnexpectedStatus { .. }
            | CoordError::InvalidDocument { .. }
            | CoordError::WorkloadFailed { .. } => true,
            CoordError::CoordinationTimeout { .. }
            | CoordError::UnknownWorkload(_)
            | CoordError::Topology(_)
            | CoordError::Config(_)
            | CoordError::Cancelled => false,
        }
    }

    /// Re-label a coordination timeout with the role/phase that was waiting on it.
    pub fn during(self, phase: impl std::fmt::Display) -> Self {
        match self {
            CoordError::CoordinationTimeout {
                document, timeout, ..
            } => CoordError::CoordinationTimeout {
                document,
                timeout,
                phase: phase.to_string(),
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordError>;
