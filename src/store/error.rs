use thiserror::Error;
use ulid::Ulid;

use crate::model::Day;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Ulid },
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: Ulid },
    #[error("resource {resource_id} already allocated on {date} (allocation {existing})")]
    AllocationConflict {
        resource_id: Ulid,
        date: Day,
        existing: Ulid,
    },
    #[error("request {0} is already resolved")]
    AlreadyResolved(Ulid),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
}

impl StoreError {
    pub(crate) fn not_found(kind: &'static str, id: Ulid) -> Self {
        StoreError::NotFound { kind, id }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        StoreError::Invalid(msg.into())
    }
}
