//! In-memory store implementations.

use super::{BlobRef, BlobStore, BoxFuture, DocumentStore, StorageError, StorageResult, Subscription};
use crate::presence::PresenceRecord;
use crate::scrapbook::{Collaborator, Scrapbook, ScrapbookPatch};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

struct Entry {
    doc: Option<Scrapbook>,
    tx: broadcast::Sender<Scrapbook>,
    presence: BTreeMap<String, PresenceRecord>,
    presence_tx: broadcast::Sender<Vec<PresenceRecord>>,
}

impl Entry {
    fn new(doc: Option<Scrapbook>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (presence_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            doc,
            tx,
            presence: BTreeMap::new(),
            presence_tx,
        }
    }

    fn publish(&self) {
        if let Some(doc) = &self.doc {
            // No receivers is fine.
            let _ = self.tx.send(doc.clone());
        }
    }

    fn presence_snapshot(&self) -> Vec<PresenceRecord> {
        self.presence.values().cloned().collect()
    }
}

/// In-memory document store for tests and single-process use.
///
/// Writes can be delayed or made to fail to exercise timeout and failure
/// handling.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a scrapbook and notify subscribers.
    pub fn insert(&self, doc: Scrapbook) -> StorageResult<()> {
        let mut entries = self.write_lock()?;
        let entry = entries
            .entry(doc.id.clone())
            .or_insert_with(|| Entry::new(None));
        entry.doc = Some(doc);
        entry.publish();
        Ok(())
    }

    /// Make every subsequent write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every subsequent write.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn write_lock(&self) -> StorageResult<std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .write()
            .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))
    }

    async fn before_write(&self) -> StorageResult<()> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Other("Write rejected".to_string()));
        }
        Ok(())
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut Scrapbook)) -> StorageResult<()> {
        let mut entries = self.write_lock()?;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        let doc = entry
            .doc
            .as_mut()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        f(doc);
        entry.publish();
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, id: &str) -> BoxFuture<'_, StorageResult<Option<Scrapbook>>> {
        let id = id.to_string();
        Box::pin(async move {
            let entries = self
                .entries
                .read()
                .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?;
            Ok(entries.get(&id).and_then(|entry| entry.doc.clone()))
        })
    }

    fn create(&self, doc: Scrapbook) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            self.before_write().await?;
            let mut entries = self.write_lock()?;
            let entry = entries
                .entry(doc.id.clone())
                .or_insert_with(|| Entry::new(None));
            if entry.doc.is_some() {
                return Err(StorageError::Conflict(doc.id));
            }
            entry.doc = Some(doc);
            entry.publish();
            Ok(())
        })
    }

    fn subscribe(&self, id: &str) -> StorageResult<Subscription<Scrapbook>> {
        let mut entries = self.write_lock()?;
        let entry = entries
            .entry(id.to_string())
            .or_insert_with(|| Entry::new(None));
        Ok(Subscription::new(entry.tx.subscribe(), entry.doc.clone()))
    }

    fn update(&self, id: &str, patch: ScrapbookPatch) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            self.before_write().await?;
            self.modify(&id, |doc| patch.apply_to(doc))
        })
    }

    fn add_collaborator(&self, id: &str, collaborator: Collaborator) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            self.before_write().await?;
            self.modify(&id, |doc| {
                if !doc.collaborators.contains(&collaborator) {
                    doc.collaborators.push(collaborator);
                }
            })
        })
    }

    fn remove_collaborator(&self, id: &str, collaborator: Collaborator) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            self.before_write().await?;
            self.modify(&id, |doc| doc.collaborators.retain(|c| c != &collaborator))
        })
    }

    fn upsert_presence(
        &self,
        id: &str,
        user_id: &str,
        last_active: DateTime<Utc>,
    ) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        let user_id = user_id.to_string();
        Box::pin(async move {
            self.before_write().await?;
            let mut entries = self.write_lock()?;
            let entry = entries.entry(id).or_insert_with(|| Entry::new(None));
            entry.presence.insert(
                user_id.clone(),
                PresenceRecord {
                    user_id,
                    last_active,
                    timestamp: Some(Utc::now()),
                },
            );
            let _ = entry.presence_tx.send(entry.presence_snapshot());
            Ok(())
        })
    }

    fn subscribe_presence(&self, id: &str) -> StorageResult<Subscription<Vec<PresenceRecord>>> {
        let mut entries = self.write_lock()?;
        let entry = entries
            .entry(id.to_string())
            .or_insert_with(|| Entry::new(None));
        Ok(Subscription::new(
            entry.presence_tx.subscribe(),
            Some(entry.presence_snapshot()),
        ))
    }
}

/// In-memory blob store. URLs use the `memory://` scheme.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, (String, Vec<u8>)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored bytes and content type for `path`.
    pub fn get(&self, path: &str) -> Option<(String, Vec<u8>)> {
        self.blobs.read().ok()?.get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> BoxFuture<'_, StorageResult<BlobRef>> {
        let path = path.to_string();
        let content_type = content_type.to_string();
        Box::pin(async move {
            let mut blobs = self
                .blobs
                .write()
                .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?;
            blobs.insert(path.clone(), (content_type, bytes));
            Ok(BlobRef { path })
        })
    }

    fn public_url(&self, blob: &BlobRef) -> BoxFuture<'_, StorageResult<String>> {
        let path = blob.path.clone();
        Box::pin(async move {
            let blobs = self
                .blobs
                .read()
                .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?;
            if blobs.contains_key(&path) {
                Ok(format!("memory://{}", path))
            } else {
                Err(StorageError::NotFound(path))
            }
        })
    }
}
