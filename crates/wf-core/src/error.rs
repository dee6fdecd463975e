use thiserror::Error;

/// C11 error taxonomy (kinds, not type names — spec.md §4.9). Each variant
/// maps to one of the four policy buckets: transient, authoritative, fatal,
/// cancellation.
#[derive(Error, Debug, Clone)]
pub enum WorkflowError {
    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("transient failure exhausted retries: {0}")]
    TransientExhausted(String),

    #[error("authoritative failure: {0}")]
    Authoritative(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("empty agent sequence")]
    EmptySequence,

    #[error("duplicate agent in sequence: {0}")]
    DuplicateAgent(String),

    #[error("planner could not resolve any known agent")]
    AllAgentsUnknown,

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("execution lock already held for plan {0}")]
    LockAlreadyHeld(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("workflow cancelled: {0}")]
    Cancelled(String),

    #[error("workflow timed out: {0}")]
    TimedOut(String),

    #[error("plan not found: {0}")]
    NotFound(String),
}

/// Which policy bucket an error falls into (spec.md §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Authoritative,
    Fatal,
    Cancellation,
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Transient(_) | WorkflowError::TransientExhausted(_) => {
                ErrorKind::Transient
            }
            WorkflowError::Authoritative(_) | WorkflowError::InvalidMessage(_) => {
                ErrorKind::Authoritative
            }
            WorkflowError::UnknownAgent(_)
            | WorkflowError::EmptySequence
            | WorkflowError::DuplicateAgent(_)
            | WorkflowError::AllAgentsUnknown
            | WorkflowError::InvalidTransition { .. }
            | WorkflowError::LockAlreadyHeld(_)
            | WorkflowError::NotFound(_) => ErrorKind::Fatal,
            WorkflowError::Cancelled(_) | WorkflowError::TimedOut(_) => ErrorKind::Cancellation,
        }
    }
}

impl serde::Serialize for WorkflowError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
