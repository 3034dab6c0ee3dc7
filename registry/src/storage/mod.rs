//! Contract between the generic store and the versioned key-value backend.
//!
//! Values are opaque bytes stored at hierarchical keys. Every write bumps a
//! global revision. Updates are guarded by the revision the caller last read.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub mod etcd;
pub mod memory;

pub use self::{etcd::EtcdStorage, memory::MemoryStorage};

pub type Revision = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    pub key: String,
    pub value: Vec<u8>,
    /// Revision of the last modification of this key.
    pub revision: Revision,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEventType {
    Put,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub event_type: RawEventType,
    pub key: String,
    /// New value, `None` for deletes.
    pub value: Option<Vec<u8>>,
    /// Value before this change, if the key existed.
    pub prev_value: Option<Vec<u8>>,
    pub revision: Revision,
}

pub type RawEventStream = BoxStream<'static, Result<RawEvent, StorageError>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("key {0} not found")]
    NotFound(String),
    #[error("key {0} already exists")]
    AlreadyExists(String),
    #[error("key {key} has been modified, expected revision {expected}, found {actual}")]
    Conflict {
        key: String,
        expected: Revision,
        actual: Revision,
    },
    /// The resume revision is no longer available.
    #[error("revision {0} has been compacted")]
    Compacted(Revision),
    #[error("revision {requested} is newer than the current revision {current}")]
    FutureRevision {
        requested: Revision,
        current: Revision,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Creates `key`, failing if it is already present.
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<Revision, StorageError>;

    async fn get(&self, key: &str) -> Result<RawObject, StorageError>;

    /// Returns every object whose key starts with `prefix`,
    /// together with the store revision the read happened at.
    async fn list(&self, prefix: &str) -> Result<(Vec<RawObject>, Revision), StorageError>;

    /// Replaces `key` if its current revision equals `expected`.
    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Revision,
    ) -> Result<Revision, StorageError>;

    /// Removes `key` and returns its last state.
    /// When `expected` is set the delete only happens at that revision.
    async fn delete(&self, key: &str, expected: Option<Revision>)
        -> Result<RawObject, StorageError>;

    /// Streams changes under `prefix` that happened after revision `since`.
    /// `since == 0` starts from the current revision; a `since` newer than
    /// the current revision is rejected.
    async fn watch(&self, prefix: &str, since: Revision) -> Result<RawEventStream, StorageError>;
}
