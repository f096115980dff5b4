//! Document synchronization.
//!
//! [`DocumentSync`] is the only path by which the engine reads or writes the
//! shared document. [`LastWriteWins`] implements it on top of any
//! [`DocumentStore`]: every write replaces the whole element array and the
//! store's write order decides which concurrent write survives. A merging
//! backend can replace it without touching the editor.
//!
//! This module also defines the JSON messages spoken with the relay server;
//! [`RelayStore`](crate::storage::RelayStore) is the client side.

use crate::elements::Element;
use crate::error::{EngineError, EngineResult};
use crate::presence::PresenceRecord;
use crate::scrapbook::{Collaborator, Scrapbook, ScrapbookPatch};
use crate::storage::{BoxFuture, DocumentStore, Subscription};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Engine-facing synchronization interface.
pub trait DocumentSync: Send + Sync {
    /// Load a scrapbook. Missing documents are `NotFound`.
    fn load(&self, id: &str) -> BoxFuture<'_, EngineResult<Scrapbook>>;

    /// Stream of authoritative document states.
    fn watch(&self, id: &str) -> EngineResult<Subscription<Scrapbook>>;

    /// Persist the full element list along with its author and time.
    fn push_elements(
        &self,
        id: &str,
        elements: Vec<Element>,
        modified_by: &str,
    ) -> BoxFuture<'_, EngineResult<()>>;

    /// Persist non-element fields (title, visibility, thumbnail).
    fn update_metadata(&self, id: &str, patch: ScrapbookPatch) -> BoxFuture<'_, EngineResult<()>>;

    /// Refresh this user's presence record.
    fn touch_presence(
        &self,
        id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, EngineResult<()>>;

    /// Stream of presence record sets.
    fn watch_presence(&self, id: &str) -> EngineResult<Subscription<Vec<PresenceRecord>>>;
}

/// Whole-document last-write-wins synchronization.
pub struct LastWriteWins<S: ?Sized> {
    store: Arc<S>,
}

impl<S: DocumentStore + ?Sized> LastWriteWins<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S: DocumentStore + ?Sized> DocumentSync for LastWriteWins<S> {
    fn load(&self, id: &str) -> BoxFuture<'_, EngineResult<Scrapbook>> {
        let id = id.to_string();
        Box::pin(async move {
            self.store
                .get(&id)
                .await?
                .ok_or(EngineError::NotFound(id))
        })
    }

    fn watch(&self, id: &str) -> EngineResult<Subscription<Scrapbook>> {
        Ok(self.store.subscribe(id)?)
    }

    fn push_elements(
        &self,
        id: &str,
        elements: Vec<Element>,
        modified_by: &str,
    ) -> BoxFuture<'_, EngineResult<()>> {
        let id = id.to_string();
        let patch = ScrapbookPatch::elements(elements, modified_by, Utc::now());
        Box::pin(async move { Ok(self.store.update(&id, patch).await?) })
    }

    fn update_metadata(&self, id: &str, patch: ScrapbookPatch) -> BoxFuture<'_, EngineResult<()>> {
        let id = id.to_string();
        Box::pin(async move { Ok(self.store.update(&id, patch).await?) })
    }

    fn touch_presence(
        &self,
        id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, EngineResult<()>> {
        let id = id.to_string();
        let user_id = user_id.to_string();
        Box::pin(async move { Ok(self.store.upsert_presence(&id, &user_id, at).await?) })
    }

    fn watch_presence(&self, id: &str) -> EngineResult<Subscription<Vec<PresenceRecord>>> {
        Ok(self.store.subscribe_presence(id)?)
    }
}

/// Messages sent to the relay server.
///
/// Every message except `join` gets exactly one direct reply, `ack` or
/// `error`, in the order the messages were sent. `join` is answered by
/// `joined` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a scrapbook's room. If the server has no scrapbook with this id,
    /// `seed` creates it, provided the joining user is its owner.
    Join {
        scrapbook_id: String,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<Scrapbook>,
    },
    /// Leave the current room.
    Leave,
    /// Replace the element array.
    Update { elements: Vec<Element> },
    /// Update title, visibility or thumbnail.
    Metadata { patch: ScrapbookPatch },
    /// Grant access. Owner only.
    AddCollaborator { collaborator: Collaborator },
    /// Withdraw access. Owner only.
    RemoveCollaborator { collaborator: Collaborator },
    /// Presence heartbeat.
    Presence { last_active: DateTime<Utc> },
}

/// Why the relay refused a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    NoAccess,
    PermissionDenied,
    Invalid,
    #[default]
    Other,
}

impl From<&EngineError> for ErrorKind {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::NoAccess(_) => ErrorKind::NoAccess,
            EngineError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            EngineError::ValidationFailure(_) => ErrorKind::Invalid,
            EngineError::PersistenceFailure(_) | EngineError::AssetLoadFailure { .. } => ErrorKind::Other,
        }
    }
}

/// Messages received from the relay server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join confirmed with the room's current state.
    Joined {
        scrapbook_id: String,
        peer_count: usize,
        revision: u64,
        scrapbook: Scrapbook,
        #[serde(default)]
        presence: Vec<PresenceRecord>,
    },
    /// A message was accepted. Writes carry the revision they produced.
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<u64>,
    },
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    /// Authoritative document after an accepted write. `revision` increases
    /// with every write to the room.
    Snapshot {
        from: String,
        revision: u64,
        scrapbook: Scrapbook,
    },
    /// All presence records of the room.
    Presence { records: Vec<PresenceRecord> },
    /// `peer_id` no longer has access and was removed from the room.
    Revoked { scrapbook_id: String, peer_id: String },
    Error {
        message: String,
        #[serde(default)]
        kind: ErrorKind,
    },
}

impl ServerMessage {
    pub fn error(err: &EngineError) -> Self {
        ServerMessage::Error {
            message: err.to_string(),
            kind: ErrorKind::from(err),
        }
    }
}
