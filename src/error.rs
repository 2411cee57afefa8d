//! Run-level error type.

use crate::state::Phase;

/// Errors that end a run.
///
/// [`AdapterError::kind`] is stable and is what clients see as the `code` of
/// a `RUN_ERROR` event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdapterError {
    /// The workflow engine reported a failure or panicked.
    #[error("Workflow failed: {0}")]
    WorkflowFailure(String),

    /// A resume arrived for a thread with no suspended run.
    #[error("No suspended run for thread `{0}`")]
    UnknownThread(String),

    /// A suspended run is already registered for this thread.
    #[error("Thread `{0}` already has a suspended run")]
    DuplicateThread(String),

    /// The feedback payload could not be understood.
    #[error("Malformed feedback: {0}")]
    MalformedResume(String),

    /// The run attempted a phase change outside the allowed edges.
    #[error("Illegal transition {from} -> {to}")]
    IllegalTransition { from: Phase, to: Phase },

    /// An event was emitted after the run closed.
    #[error("Stream already closed")]
    StreamClosed,

    /// The client disconnected.
    #[error("Run cancelled")]
    Cancelled,
}

impl AdapterError {
    /// Stable error code.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WorkflowFailure(_) => "WorkflowFailure",
            Self::UnknownThread(_) => "UnknownThread",
            Self::DuplicateThread(_) => "DuplicateThread",
            Self::MalformedResume(_) => "MalformedResume",
            Self::IllegalTransition { .. } => "IllegalTransition",
            Self::StreamClosed => "StreamClosed",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(e: serde_json::Error) -> Self {
        Self::WorkflowFailure(format!("state serialization: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        assert_eq!(
            AdapterError::UnknownThread("t1".into()).kind(),
            "UnknownThread"
        );
        let err = AdapterError::IllegalTransition {
            from: Phase::Idle,
            to: Phase::Completed,
        };
        assert_eq!(err.kind(), "IllegalTransition");
        assert_eq!(err.to_string(), "Illegal transition idle -> completed");
    }
}
