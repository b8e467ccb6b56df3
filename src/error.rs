//! Error types for lamad-progress

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProgressError {
    /// No attempt exists yet for the tuple. Recoverable: callers branch on
    /// this as control flow (first contact with an element is the common
    /// case), never log it as a system error.
    #[error("Attempt not found: deployment {deployment_id}, element {element_id}, student {student_id}")]
    AttemptNotFound {
        deployment_id: String,
        element_id: String,
        student_id: String,
    },

    #[error("Attempt not found by id: {0}")]
    AttemptNotFoundById(String),

    /// No progress exists yet for the tuple. Recoverable, same as above.
    #[error("Progress not found: deployment {deployment_id}, element {element_id}, student {student_id}")]
    ProgressNotFound {
        deployment_id: String,
        element_id: String,
        student_id: String,
    },

    /// Required context is missing or inconsistent (e.g. an empty ancestry
    /// list on a propagation event). Fatal for the current event; surfaces to
    /// the dispatcher, which owns retry/dead-letter policy.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Caller supplied an invalid required argument. Rejected before any I/O.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A store collaborator failed.
    #[error("Store error: {0}")]
    Store(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ProgressError {
    /// NotFound-class errors are expected control-flow signals, not faults.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProgressError::AttemptNotFound { .. }
                | ProgressError::AttemptNotFoundById(_)
                | ProgressError::ProgressNotFound { .. }
        )
    }
}
