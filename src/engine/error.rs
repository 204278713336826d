use thiserror::Error;
use ulid::Ulid;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Ulid },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A write collided with committed state. The run was discarded.
    #[error("conflict: {0}")]
    Conflict(#[source] StoreError),
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => EngineError::NotFound { kind, id },
            StoreError::Invalid(msg) => EngineError::InvalidInput(msg),
            StoreError::AllocationConflict { .. }
            | StoreError::AlreadyResolved(_)
            | StoreError::AlreadyExists { .. } => EngineError::Conflict(e),
            StoreError::LimitExceeded(_) | StoreError::Wal(_) => EngineError::Store(e),
        }
    }
}

impl EngineError {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        EngineError::Invariant(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}
