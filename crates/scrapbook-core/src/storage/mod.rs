//! Contracts for the shared document store and the blob store.
//!
//! The engine consumes these; it does not own the backing services.

mod file;
mod memory;
mod relay;

pub use file::FileBlobStore;
pub use memory::{MemoryBlobStore, MemoryStore};
pub use relay::RelayStore;

use crate::error::EngineError;
use crate::presence::PresenceRecord;
use crate::scrapbook::{Collaborator, Scrapbook, ScrapbookPatch};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Timed out after {0} ms")]
    Timeout(u64),
    #[error("Document already exists: {0}")]
    Conflict(String),
    #[error("Access denied to {0}")]
    Denied(String),
    #[error("Storage error: {0}")]
    Other(String),
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => EngineError::NotFound(id),
            StorageError::Denied(id) => EngineError::NoAccess(id),
            other => EngineError::PersistenceFailure(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed future returned by store operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Push subscription to a document or collection.
///
/// Yields the current value first (when there is one), then every change.
/// Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    initial: Option<T>,
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    pub fn new(rx: broadcast::Receiver<T>, initial: Option<T>) -> Self {
        Self { initial, rx }
    }

    /// Wait for the next value. Returns `None` once the source is gone.
    ///
    /// If the subscriber falls behind, skipped values are dropped; only the
    /// newest state matters.
    pub async fn next(&mut self) -> Option<T> {
        if let Some(value) = self.initial.take() {
            return Some(value);
        }
        loop {
            match self.rx.recv().await {
                Ok(value) => return Some(value),
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("Subscription lagged, skipped {} updates", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next value if one is ready.
    pub fn try_next(&mut self) -> Option<T> {
        if let Some(value) = self.initial.take() {
            return Some(value);
        }
        loop {
            match self.rx.try_recv() {
                Ok(value) => return Some(value),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain everything ready and keep only the newest value.
    pub fn latest(&mut self) -> Option<T> {
        let mut latest = None;
        while let Some(value) = self.try_next() {
            latest = Some(value);
        }
        latest
    }
}

/// Reference to an uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobRef {
    pub path: String,
}

/// Shared document store holding scrapbooks and their presence records.
///
/// Writes to one document are totally ordered by the store. `elements` is
/// always written as a whole array.
pub trait DocumentStore: Send + Sync {
    /// Fetch a scrapbook, or `None` if it does not exist.
    fn get(&self, id: &str) -> BoxFuture<'_, StorageResult<Option<Scrapbook>>>;

    /// Create a scrapbook. Fails with `Conflict` if the id is taken.
    fn create(&self, doc: Scrapbook) -> BoxFuture<'_, StorageResult<()>>;

    /// Subscribe to every change of a scrapbook.
    fn subscribe(&self, id: &str) -> StorageResult<Subscription<Scrapbook>>;

    /// Apply a partial update. Fails with `NotFound` for missing documents.
    fn update(&self, id: &str, patch: ScrapbookPatch) -> BoxFuture<'_, StorageResult<()>>;

    /// Add a collaborator unless an equal entry is already present.
    fn add_collaborator(&self, id: &str, collaborator: Collaborator) -> BoxFuture<'_, StorageResult<()>>;

    /// Remove every entry equal to `collaborator`.
    fn remove_collaborator(&self, id: &str, collaborator: Collaborator) -> BoxFuture<'_, StorageResult<()>>;

    /// Create or refresh the presence record keyed by `(id, user_id)`.
    /// The store stamps its own `timestamp`.
    fn upsert_presence(
        &self,
        id: &str,
        user_id: &str,
        last_active: DateTime<Utc>,
    ) -> BoxFuture<'_, StorageResult<()>>;

    /// Subscribe to all presence records of a scrapbook.
    fn subscribe_presence(&self, id: &str) -> StorageResult<Subscription<Vec<PresenceRecord>>>;
}

/// Blob storage for images and thumbnails.
pub trait BlobStore: Send + Sync {
    fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> BoxFuture<'_, StorageResult<BlobRef>>;

    fn public_url(&self, blob: &BlobRef) -> BoxFuture<'_, StorageResult<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_yields_initial_then_updates() {
        let (tx, rx) = broadcast::channel(4);
        let mut sub = Subscription::new(rx, Some(0));
        tx.send(1).unwrap();
        assert_eq!(sub.next().await, Some(0));
        assert_eq!(sub.next().await, Some(1));
        drop(tx);
        assert_eq!(sub.next().await, None);
    }

    #[test]
    fn test_latest_skips_lagged() {
        let (tx, rx) = broadcast::channel(2);
        let mut sub = Subscription::new(rx, None);
        for i in 0..5 {
            tx.send(i).unwrap();
        }
        assert_eq!(sub.latest(), Some(4));
        assert_eq!(sub.try_next(), None);
    }

    #[test]
    fn test_storage_error_maps_to_engine_error() {
        assert_eq!(
            EngineError::from(StorageError::NotFound("sb".into())),
            EngineError::NotFound("sb".into())
        );
        assert_eq!(
            EngineError::from(StorageError::Denied("sb".into())),
            EngineError::NoAccess("sb".into())
        );
        assert!(matches!(
            EngineError::from(StorageError::Timeout(10)),
            EngineError::PersistenceFailure(_)
        ));
    }
}
