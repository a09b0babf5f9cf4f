//! Error types surfaced to the orchestration layer.

use thiserror::Error;

/// Errors that can occur while converging a resource.
///
/// Absence of a resource is never an error: reads yield `Ok(None)` and the
/// caller clears its tracked identifier.
#[derive(Debug, Error)]
pub enum ArmError {
    /// Identifier string failed structural parsing. Fatal, never retried.
    #[error("unable to parse id {id:?}: {reason}")]
    MalformedId { id: String, reason: String },

    /// Import-protection violation: the object already exists remotely and
    /// must be imported instead of created.
    #[error("resource already exists and must be imported: {id}")]
    AlreadyExists { id: String },

    /// Network or service failure during a synchronous call. Retry policy is
    /// owned by the caller; nothing is retried at this layer.
    #[error("{operation} {id}: {message}")]
    Transient {
        operation: &'static str,
        id: String,
        message: String,
    },

    /// A long-running operation reported a terminal failure.
    #[error("operation on {id} finished with status {status}: {message}")]
    Operation {
        id: String,
        status: String,
        message: String,
    },

    /// The service accepted a write but the follow-up read carried no
    /// identifier. Retrying the same create risks duplicate side effects, so
    /// this is reported distinctly from `Transient`.
    #[error("created {id} but the follow-up read returned no identifier")]
    PostCreateRead { id: String },

    /// Deadline exceeded while waiting on an operation.
    #[error("{operation} {id}: deadline exceeded")]
    Timeout { operation: &'static str, id: String },
}

impl ArmError {
    pub fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        ArmError::MalformedId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn transient(
        operation: &'static str,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ArmError::Transient {
            operation,
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Result type for convergence operations.
pub type Result<T> = std::result::Result<T, ArmError>;
