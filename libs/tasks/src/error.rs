//! Backend error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A per-item failure reported by the backend alongside an accepted request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiFailure {
    /// Resource the failure refers to, if the backend named one.
    pub arn: Option<String>,

    /// Short reason, e.g. `MISSING` or `RESOURCE:MEMORY`.
    pub reason: String,

    #[serde(default)]
    pub detail: Option<String>,
}

impl std::fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.arn {
            Some(arn) => write!(f, "{arn}: {}", self.reason)?,
            None => write!(f, "{}", self.reason)?,
        }
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// Errors returned by a [`crate::TaskFacade`].
///
/// Cloneable so a single failure can be both cached for observers and
/// returned to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Transport, authentication or throttling failure.
    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    /// The backend accepted the request but reported per-item failures.
    #[error("API call failed: {}", format_failures(.failures))]
    ApiCallFailure { failures: Vec<ApiFailure> },
}

impl TaskError {
    pub fn backend(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            message: message.into(),
        }
    }

    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            TaskError::Backend { .. } => "backend_call_failed",
            TaskError::ApiCallFailure { .. } => "api_call_failure",
        }
    }

    /// Per-item failures, empty for transport errors.
    pub fn failures(&self) -> &[ApiFailure] {
        match self {
            TaskError::ApiCallFailure { failures } => failures,
            TaskError::Backend { .. } => &[],
        }
    }
}

fn format_failures(failures: &[ApiFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
