use resources::validation::ErrorList;
use thiserror::Error;

use super::context::Interrupted;
use crate::storage::StorageError;

pub const OPTIMISTIC_LOCK_ERROR_MSG: &str =
    "the object has been modified; please apply your changes to the latest version and try again";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid name {name:?}: {}", .reasons.join(", "))]
    InvalidName { name: String, reasons: Vec<String> },
    #[error("{resource} {name:?} not found")]
    NotFound { resource: String, name: String },
    #[error("{resource} {name:?} already exists")]
    AlreadyExists { resource: String, name: String },
    #[error("operation cannot be fulfilled on {resource} {name:?}: {detail}")]
    Conflict {
        resource: String,
        name: String,
        detail: String,
    },
    #[error("{kind} {name:?} is invalid: {errors}")]
    Invalid {
        kind: String,
        name: String,
        errors: ErrorList,
    },
    #[error("bad request: {0}")]
    BadRequest(String),
    /// The requested resource version is older than the store history.
    #[error("too old resource version: {0}")]
    Expired(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("failed to decode object at {key}: {cause}")]
    Codec { key: String, cause: String },
    #[error("request cancelled")]
    Cancelled,
    #[error("request deadline exceeded")]
    Timeout,
}

impl StoreError {
    /// Attaches the resource and object name to a backend error.
    pub fn from_storage(err: StorageError, resource: &str, name: &str) -> Self {
        match err {
            StorageError::NotFound(_) => StoreError::NotFound {
                resource: resource.to_owned(),
                name: name.to_owned(),
            },
            StorageError::AlreadyExists(_) => StoreError::AlreadyExists {
                resource: resource.to_owned(),
                name: name.to_owned(),
            },
            StorageError::Conflict { .. } => StoreError::Conflict {
                resource: resource.to_owned(),
                name: name.to_owned(),
                detail: OPTIMISTIC_LOCK_ERROR_MSG.to_string(),
            },
            StorageError::Compacted(revision) => StoreError::Expired(revision.to_string()),
            StorageError::FutureRevision { requested, .. } => {
                StoreError::BadRequest(format!("too large resource version: {}", requested))
            },
            StorageError::Unavailable(cause) => StoreError::BackendUnavailable(cause),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<Interrupted> for StoreError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => StoreError::Cancelled,
            Interrupted::DeadlineExceeded => StoreError::Timeout,
        }
    }
}
