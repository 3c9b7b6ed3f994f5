//! Error types returned by every public [`crate::Engine`] operation.
//!
//! The engine never panics on caller input; invariant violations the
//! matcher itself would have to produce (a negative balance surviving
//! `advance`, fanout exceeded after a pass) are a distinct [`SchedulerError::Internal`]
//! category and indicate a bug in the engine, not a bad caller.

use thiserror::Error;

use crate::matcher::Action;

/// Result type returned by all [`crate::Engine`] operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Error kinds produced by the scheduler core.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("account not found: {id}")]
    AccountNotFound { id: String },

    #[error("task not found: {id}")]
    TaskNotFound { id: String },

    #[error("worker not found: {id}")]
    WorkerNotFound { id: String },

    #[error("account already exists: {id}")]
    AccountAlreadyExists { id: String },

    #[error("task already queued or running: {id}")]
    TaskAlreadyExists { id: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("precondition failed: {message}")]
    PreconditionFailed { message: String },

    /// `run_once` was cancelled partway through. Carries every action
    /// decided before the cancellation was observed, per §5/§7: the
    /// engine returns the partial action list rather than discarding it.
    #[error("run_once was cancelled after {} action(s)", actions.len())]
    Cancelled { actions: Vec<Action> },

    #[error("internal invariant violated: {message}")]
    Internal { message: String },
}

impl SchedulerError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
