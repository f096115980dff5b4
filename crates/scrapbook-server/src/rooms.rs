//! Per-scrapbook rooms.
//!
//! A room holds the latest snapshot of one scrapbook while anyone is
//! connected to it. Documents are loaded from the server's own store; a
//! client may only create one it owns. Every accepted write replaces the
//! snapshot, bumps the room's revision, is queued for the store and is
//! broadcast to every member, the writer included, so all clients converge on
//! the same last write. After each write every member's role is resolved
//! again and members left without access are dropped from the room.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use scrapbook_core::elements::validate_elements;
use scrapbook_core::{
    Collaborator, DocumentStore, Element, EngineError, EngineResult, Identity, PresenceRecord, Role,
    Scrapbook, ScrapbookPatch, ServerMessage, StorageError, resolve_role,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const CHANNEL_CAPACITY: usize = 256;

/// Messages fanned out to a room, tagged with the sending peer.
pub type RoomEvent = (String, ServerMessage);

/// A change queued for the backing store.
#[derive(Debug, Clone)]
enum StoreWrite {
    Patch(ScrapbookPatch),
    AddCollaborator(Collaborator),
    RemoveCollaborator(Collaborator),
}

impl StoreWrite {
    fn apply_to(&self, doc: &mut Scrapbook) {
        match self {
            StoreWrite::Patch(patch) => patch.apply_to(doc),
            StoreWrite::AddCollaborator(collaborator) => {
                if !doc.collaborators.contains(collaborator) {
                    doc.collaborators.push(collaborator.clone());
                }
            }
            StoreWrite::RemoveCollaborator(collaborator) => doc.collaborators.retain(|c| c != collaborator),
        }
    }
}

/// Write queued changes to the store in the order they were accepted.
fn spawn_persistence(
    store: Arc<dyn DocumentStore>,
    scrapbook_id: String,
) -> (mpsc::UnboundedSender<StoreWrite>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<StoreWrite>();
    let handle = tokio::spawn(async move {
        while let Some(write) = rx.recv().await {
            let result = match write {
                StoreWrite::Patch(patch) => store.update(&scrapbook_id, patch).await,
                StoreWrite::AddCollaborator(c) => store.add_collaborator(&scrapbook_id, c).await,
                StoreWrite::RemoveCollaborator(c) => store.remove_collaborator(&scrapbook_id, c).await,
            };
            if let Err(e) = result {
                warn!("Failed to persist scrapbook {}: {}", scrapbook_id, e);
            }
        }
        debug!("Persistence for {} finished", scrapbook_id);
    });
    (tx, handle)
}

struct Room {
    id: String,
    tx: broadcast::Sender<RoomEvent>,
    /// Peer id to user id.
    peers: HashMap<String, String>,
    scrapbook: Scrapbook,
    revision: u64,
    presence: BTreeMap<String, PresenceRecord>,
    writes: mpsc::UnboundedSender<StoreWrite>,
    writer: JoinHandle<()>,
}

impl Room {
    fn open(scrapbook: Scrapbook, store: Arc<dyn DocumentStore>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (writes, writer) = spawn_persistence(store, scrapbook.id.clone());
        Self {
            id: scrapbook.id.clone(),
            tx,
            peers: HashMap::new(),
            scrapbook,
            revision: 0,
            presence: BTreeMap::new(),
            writes,
            writer,
        }
    }

    fn role_of(&self, user_id: &str) -> Role {
        resolve_role(&Identity::user(user_id), &self.scrapbook)
    }

    fn presence_records(&self) -> Vec<PresenceRecord> {
        self.presence.values().cloned().collect()
    }

    fn touch(&mut self, user_id: &str, last_active: DateTime<Utc>) {
        self.presence.insert(
            user_id.to_string(),
            PresenceRecord {
                user_id: user_id.to_string(),
                last_active,
                timestamp: Some(Utc::now()),
            },
        );
    }

    fn require_editor(&self, user_id: &str, action: &'static str) -> EngineResult<()> {
        if self.role_of(user_id).can_edit() {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied { action })
        }
    }

    /// Apply an accepted write, queue it for the store and broadcast the new
    /// snapshot.
    fn commit(&mut self, from: &str, write: StoreWrite) {
        write.apply_to(&mut self.scrapbook);
        self.revision += 1;
        if self.writes.send(write).is_err() {
            warn!("Persistence for room {} has stopped", self.id);
        }
        self.revoke_lost_access(from);
        let _ = self.tx.send((
            from.to_string(),
            ServerMessage::Snapshot {
                from: from.to_string(),
                revision: self.revision,
                scrapbook: self.scrapbook.clone(),
            },
        ));
    }

    /// Drop members the current document no longer admits. They are told
    /// before the snapshot goes out, so they never receive it.
    fn revoke_lost_access(&mut self, from: &str) {
        let revoked: Vec<(String, String)> = self
            .peers
            .iter()
            .filter(|(_, user_id)| !self.role_of(user_id).can_view())
            .map(|(peer_id, user_id)| (peer_id.clone(), user_id.clone()))
            .collect();

        for (peer_id, user_id) in revoked {
            self.peers.remove(&peer_id);
            if !self.peers.values().any(|u| *u == user_id) {
                self.presence.remove(&user_id);
            }
            info!("Peer {} ({}) lost access to room {}", peer_id, user_id, self.id);
            let _ = self.tx.send((
                from.to_string(),
                ServerMessage::Revoked {
                    scrapbook_id: self.id.clone(),
                    peer_id: peer_id.clone(),
                },
            ));
            let _ = self.tx.send((from.to_string(), ServerMessage::PeerLeft { peer_id }));
        }
    }
}

/// What a peer receives on joining.
pub struct JoinTicket {
    pub rx: broadcast::Receiver<RoomEvent>,
    pub joined: ServerMessage,
}

/// Shared application state
pub struct AppState {
    rooms: DashMap<String, Room>,
    store: Arc<dyn DocumentStore>,
    /// Persistence of rooms that emptied out, still draining.
    closing: DashMap<String, JoinHandle<()>>,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            rooms: DashMap::new(),
            store,
            closing: DashMap::new(),
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Add a peer to a room, opening the room from the store if needed.
    ///
    /// `seed` is only used when the store has no scrapbook with this id, and
    /// only if the joining user owns it. Users the document does not grant at
    /// least viewer access are refused.
    pub async fn join(
        &self,
        room_id: &str,
        peer_id: &str,
        user_id: &str,
        seed: Option<Scrapbook>,
    ) -> EngineResult<JoinTicket> {
        if let Some((_, closing)) = self.closing.remove(room_id) {
            if let Err(e) = closing.await {
                warn!("Persistence for {} ended abnormally: {}", room_id, e);
            }
        }

        let open = self.rooms.get(room_id).map(|room| room.scrapbook.clone());
        let doc = match open {
            Some(doc) => doc,
            None => self.load_or_create(room_id, user_id, seed).await?,
        };
        if !resolve_role(&Identity::user(user_id), &doc).can_view() {
            return Err(EngineError::NoAccess(room_id.to_string()));
        }

        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::open(doc, self.store.clone()));
        // The room may have been opened or changed by someone else meanwhile.
        if !room.role_of(user_id).can_view() {
            let empty = room.peers.is_empty();
            drop(room);
            if empty {
                self.close(room_id);
            }
            return Err(EngineError::NoAccess(room_id.to_string()));
        }

        room.peers.insert(peer_id.to_string(), user_id.to_string());
        room.touch(user_id, Utc::now());
        let rx = room.tx.subscribe();
        let presence = room.presence_records();
        let _ = room.tx.send((
            peer_id.to_string(),
            ServerMessage::PeerJoined {
                peer_id: peer_id.to_string(),
            },
        ));
        let _ = room.tx.send((
            peer_id.to_string(),
            ServerMessage::Presence {
                records: presence.clone(),
            },
        ));

        info!("Peer {} ({}) joined room {}", peer_id, user_id, room_id);
        Ok(JoinTicket {
            rx,
            joined: ServerMessage::Joined {
                scrapbook_id: room_id.to_string(),
                peer_count: room.peers.len(),
                revision: room.revision,
                scrapbook: room.scrapbook.clone(),
                presence,
            },
        })
    }

    async fn load_or_create(&self, room_id: &str, user_id: &str, seed: Option<Scrapbook>) -> EngineResult<Scrapbook> {
        if let Some(doc) = self.store.get(room_id).await? {
            return Ok(doc);
        }
        let Some(seed) = seed else {
            return Err(EngineError::NotFound(room_id.to_string()));
        };
        if seed.id != room_id {
            return Err(EngineError::ValidationFailure(format!(
                "seed id {} does not match {}",
                seed.id, room_id
            )));
        }
        if seed.owner_id != user_id {
            return Err(EngineError::PermissionDenied {
                action: "create a scrapbook for another owner",
            });
        }
        validate_elements(&seed.elements)?;

        match self.store.create(seed.clone()).await {
            Ok(()) => {
                info!("Created scrapbook {} for {}", room_id, user_id);
                Ok(seed)
            }
            // Created concurrently by another connection.
            Err(StorageError::Conflict(_)) => self
                .store
                .get(room_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(room_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a peer; empty rooms are closed. Unknown peers are ignored.
    pub fn leave(&self, room_id: &str, peer_id: &str) {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return;
        };
        if room.peers.remove(peer_id).is_none() {
            return;
        }
        if room.peers.is_empty() {
            drop(room);
            self.close(room_id);
            return;
        }
        let _ = room.tx.send((
            peer_id.to_string(),
            ServerMessage::PeerLeft {
                peer_id: peer_id.to_string(),
            },
        ));
    }

    fn close(&self, room_id: &str) {
        if let Some((_, room)) = self.rooms.remove(room_id) {
            let Room { writes, writer, .. } = room;
            drop(writes);
            self.closing.insert(room_id.to_string(), writer);
            debug!("Room {} closed", room_id);
        }
    }

    /// Replace the element array. Returns the new revision.
    pub fn update(
        &self,
        room_id: &str,
        peer_id: &str,
        user_id: &str,
        elements: Vec<Element>,
    ) -> EngineResult<u64> {
        validate_elements(&elements)?;
        let mut room = self.member(room_id, peer_id)?;
        room.require_editor(user_id, "update elements")?;
        let patch = ScrapbookPatch::elements(elements, user_id, Utc::now());
        room.commit(peer_id, StoreWrite::Patch(patch));
        Ok(room.revision)
    }

    /// Apply a metadata patch. Element arrays must go through [`AppState::update`].
    pub fn metadata(
        &self,
        room_id: &str,
        peer_id: &str,
        user_id: &str,
        mut patch: ScrapbookPatch,
    ) -> EngineResult<u64> {
        if patch.elements.is_some() {
            return Err(EngineError::ValidationFailure(
                "elements cannot be changed through metadata".to_string(),
            ));
        }
        let mut room = self.member(room_id, peer_id)?;
        room.require_editor(user_id, "change settings")?;
        patch.last_modified = Some(Utc::now());
        patch.last_modified_by = Some(user_id.to_string());
        room.commit(peer_id, StoreWrite::Patch(patch));
        Ok(room.revision)
    }

    /// Grant or withdraw access. Only the owner may do either.
    pub fn collaborator(
        &self,
        room_id: &str,
        peer_id: &str,
        user_id: &str,
        collaborator: Collaborator,
        grant: bool,
    ) -> EngineResult<u64> {
        let mut room = self.member(room_id, peer_id)?;
        if room.role_of(user_id) != Role::Owner {
            return Err(EngineError::PermissionDenied {
                action: "manage collaborators",
            });
        }
        let write = if grant {
            StoreWrite::AddCollaborator(collaborator)
        } else {
            StoreWrite::RemoveCollaborator(collaborator)
        };
        room.commit(peer_id, write);
        Ok(room.revision)
    }

    /// Record a heartbeat and fan out the room's presence.
    pub fn presence(&self, room_id: &str, peer_id: &str, user_id: &str, last_active: DateTime<Utc>) -> EngineResult<()> {
        let mut room = self.member(room_id, peer_id)?;
        room.touch(user_id, last_active);
        let records = room.presence_records();
        let _ = room
            .tx
            .send((peer_id.to_string(), ServerMessage::Presence { records }));
        Ok(())
    }

    /// The room, provided `peer_id` is still one of its members.
    fn member(&self, room_id: &str, peer_id: &str) -> EngineResult<dashmap::mapref::one::RefMut<'_, String, Room>> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| EngineError::NotFound(room_id.to_string()))?;
        if room.peers.contains_key(peer_id) {
            Ok(room)
        } else {
            Err(EngineError::NoAccess(room_id.to_string()))
        }
    }
}
