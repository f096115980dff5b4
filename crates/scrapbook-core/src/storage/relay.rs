//! Document store backed by the relay server.
//!
//! Each scrapbook gets its own WebSocket connection, opened by the first
//! async call that needs it. A background task owns the socket: it keeps the
//! latest snapshot and presence records, fans them out to subscribers and
//! hands replies back to callers. The server answers requests in order, so
//! replies are matched first-in first-out.

use super::{BoxFuture, DocumentStore, StorageError, StorageResult, Subscription};
use crate::elements::Element;
use crate::presence::PresenceRecord;
use crate::scrapbook::{Collaborator, Scrapbook, ScrapbookPatch, Visibility};
use crate::sync::{ClientMessage, ErrorKind, ServerMessage};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const CHANNEL_CAPACITY: usize = 64;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = oneshot::Sender<StorageResult<Option<u64>>>;

struct Request {
    message: ClientMessage,
    reply: Reply,
}

/// Shared state of one scrapbook, kept across reconnects.
struct Room {
    docs: broadcast::Sender<Scrapbook>,
    presence: broadcast::Sender<Vec<PresenceRecord>>,
    latest: watch::Sender<Option<Scrapbook>>,
    latest_presence: watch::Sender<Vec<PresenceRecord>>,
    requests: tokio::sync::Mutex<Option<mpsc::UnboundedSender<Request>>>,
}

impl Room {
    fn new() -> Self {
        let (docs, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (presence, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (latest, _) = watch::channel(None);
        let (latest_presence, _) = watch::channel(Vec::new());
        Self {
            docs,
            presence,
            latest,
            latest_presence,
            requests: tokio::sync::Mutex::new(None),
        }
    }

    fn latest(&self) -> Option<Scrapbook> {
        self.latest.borrow().clone()
    }

    fn publish(&self, doc: Scrapbook) {
        self.latest.send_replace(Some(doc.clone()));
        let _ = self.docs.send(doc);
    }

    fn publish_presence(&self, records: Vec<PresenceRecord>) {
        self.latest_presence.send_replace(records.clone());
        let _ = self.presence.send(records);
    }
}

/// [`DocumentStore`] speaking the relay protocol.
///
/// All traffic is sent as `user_id`. Subscriptions start delivering once a
/// connection is open; [`DocumentStore::get`] opens it.
pub struct RelayStore {
    url: String,
    user_id: String,
    rooms: Mutex<HashMap<String, Arc<Room>>>,
}

impl RelayStore {
    /// `url` is the relay's WebSocket endpoint, e.g. `ws://localhost:3030/ws`.
    pub fn new(url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_id: user_id.into(),
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn room(&self, id: &str) -> StorageResult<Arc<Room>> {
        let mut rooms = self
            .rooms
            .lock()
            .map_err(|e| StorageError::Other(format!("Lock error: {}", e)))?;
        Ok(rooms
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Room::new()))
            .clone())
    }

    /// Open the connection for `id` unless one is already running.
    async fn connect(
        &self,
        id: &str,
        seed: Option<Scrapbook>,
    ) -> StorageResult<(Arc<Room>, mpsc::UnboundedSender<Request>)> {
        let room = self.room(id)?;
        let mut requests = room.requests.lock().await;
        if let Some(tx) = requests.as_ref().filter(|tx| !tx.is_closed()) {
            return Ok((room.clone(), tx.clone()));
        }

        let (mut socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| StorageError::Io(format!("Failed to connect to {}: {}", self.url, e)))?;
        let join = ClientMessage::Join {
            scrapbook_id: id.to_string(),
            user_id: self.user_id.clone(),
            seed,
        };
        socket
            .send(encode(&join)?)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;

        let (scrapbook, presence) = loop {
            match read_message(&mut socket).await? {
                ServerMessage::Joined {
                    scrapbook, presence, ..
                } => break (scrapbook, presence),
                ServerMessage::Error { message, kind } => return Err(join_error(id, kind, message)),
                other => log::debug!("Ignoring {:?} before join", other),
            }
        };
        room.publish(scrapbook);
        room.publish_presence(presence);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(socket, rx, room.clone(), id.to_string()));
        *requests = Some(tx.clone());
        log::info!("Joined {} on {} as {}", id, self.url, self.user_id);
        Ok((room.clone(), tx))
    }

    async fn request(&self, id: &str, message: ClientMessage) -> StorageResult<Option<u64>> {
        let (_, tx) = self.connect(id, None).await?;
        let (reply, rx) = oneshot::channel();
        tx.send(Request { message, reply }).map_err(|_| closed(id))?;
        rx.await.map_err(|_| closed(id))?
    }
}

impl DocumentStore for RelayStore {
    fn get(&self, id: &str) -> BoxFuture<'_, StorageResult<Option<Scrapbook>>> {
        let id = id.to_string();
        Box::pin(async move {
            match self.connect(&id, None).await {
                Ok((room, _)) => Ok(room.latest()),
                Err(StorageError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    /// The relay creates a scrapbook when its owner joins with it as seed.
    /// Joining an existing scrapbook instead yields a different document,
    /// reported as `Conflict`.
    fn create(&self, doc: Scrapbook) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let id = doc.id.clone();
            let (room, _) = self.connect(&id, Some(doc.clone())).await?;
            if room.latest().as_ref() == Some(&doc) {
                Ok(())
            } else {
                Err(StorageError::Conflict(id))
            }
        })
    }

    fn subscribe(&self, id: &str) -> StorageResult<Subscription<Scrapbook>> {
        let room = self.room(id)?;
        let rx = room.docs.subscribe();
        Ok(Subscription::new(rx, room.latest()))
    }

    /// Elements and metadata travel as separate messages; the relay stamps
    /// `lastModified` itself.
    fn update(&self, id: &str, patch: ScrapbookPatch) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            let (elements, metadata) = split_patch(patch);
            if let Some(elements) = elements {
                self.request(&id, ClientMessage::Update { elements }).await?;
            }
            if let Some(patch) = metadata {
                self.request(&id, ClientMessage::Metadata { patch }).await?;
            }
            Ok(())
        })
    }

    fn add_collaborator(&self, id: &str, collaborator: Collaborator) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            self.request(&id, ClientMessage::AddCollaborator { collaborator })
                .await
                .map(drop)
        })
    }

    fn remove_collaborator(&self, id: &str, collaborator: Collaborator) -> BoxFuture<'_, StorageResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            self.request(&id, ClientMessage::RemoveCollaborator { collaborator })
                .await
                .map(drop)
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
            if user_id != self.user_id {
                return Err(StorageError::Other(format!(
                    "Relay connection belongs to {}, not {}",
                    self.user_id, user_id
                )));
            }
            self.request(&id, ClientMessage::Presence { last_active })
                .await
                .map(drop)
        })
    }

    fn subscribe_presence(&self, id: &str) -> StorageResult<Subscription<Vec<PresenceRecord>>> {
        let room = self.room(id)?;
        let rx = room.presence.subscribe();
        let initial = room.latest_presence.borrow().clone();
        Ok(Subscription::new(rx, Some(initial)))
    }
}

/// Drive one connection until it closes or every store handle is gone.
async fn run(socket: Socket, mut requests: mpsc::UnboundedReceiver<Request>, room: Arc<Room>, id: String) {
    let (mut sink, mut stream) = socket.split();
    let mut pending: VecDeque<Reply> = VecDeque::new();

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(Request { message, reply }) = request else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let frame = match encode(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        continue;
                    }
                };
                if let Err(e) = sink.send(frame).await {
                    let _ = reply.send(Err(StorageError::Io(e.to_string())));
                    break;
                }
                pending.push_back(reply);
            }

            frame = stream.next() => {
                let msg = match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(msg) => msg,
                        Err(e) => {
                            log::warn!("Ignoring malformed relay message: {}", e);
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        log::warn!("Relay connection for {} failed: {}", id, e);
                        break;
                    }
                };
                match msg {
                    ServerMessage::Snapshot { scrapbook, revision, .. } => {
                        log::debug!("Snapshot {} of {}", revision, id);
                        room.publish(scrapbook);
                    }
                    ServerMessage::Presence { records } => room.publish_presence(records),
                    ServerMessage::Ack { revision } => answer(&mut pending, Ok(revision)),
                    ServerMessage::Error { message, .. } => answer(&mut pending, Err(StorageError::Other(message))),
                    ServerMessage::Revoked { .. } => {
                        log::info!("Access to {} was revoked", id);
                        if let Some(doc) = room.latest() {
                            room.publish(revoked_copy(&doc));
                        }
                        break;
                    }
                    ServerMessage::Joined { .. } | ServerMessage::PeerJoined { .. } | ServerMessage::PeerLeft { .. } => {}
                }
            }
        }
    }

    for reply in pending {
        let _ = reply.send(Err(closed(&id)));
    }
    log::debug!("Relay connection for {} closed", id);
}

fn answer(pending: &mut VecDeque<Reply>, result: StorageResult<Option<u64>>) {
    match pending.pop_front() {
        Some(reply) => {
            let _ = reply.send(result);
        }
        None => log::warn!("Relay reply without a pending request: {:?}", result),
    }
}

fn encode(msg: &ClientMessage) -> StorageResult<Message> {
    serde_json::to_string(msg)
        .map(|json| Message::Text(json.into()))
        .map_err(|e| StorageError::Serialization(e.to_string()))
}

async fn read_message(socket: &mut Socket) -> StorageResult<ServerMessage> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str())
                    .map_err(|e| StorageError::Serialization(e.to_string()));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(StorageError::Io("Relay closed the connection".to_string()));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(StorageError::Io(e.to_string())),
        }
    }
}

fn join_error(id: &str, kind: ErrorKind, message: String) -> StorageError {
    match kind {
        ErrorKind::NotFound => StorageError::NotFound(id.to_string()),
        ErrorKind::NoAccess | ErrorKind::PermissionDenied => StorageError::Denied(id.to_string()),
        ErrorKind::Invalid | ErrorKind::Other => StorageError::Other(message),
    }
}

fn closed(id: &str) -> StorageError {
    StorageError::Io(format!("Relay connection for {} closed", id))
}

/// Split a patch into the element array and the remaining metadata, if any.
fn split_patch(mut patch: ScrapbookPatch) -> (Option<Vec<Element>>, Option<ScrapbookPatch>) {
    let elements = patch.elements.take();
    patch.last_modified = None;
    patch.last_modified_by = None;
    let metadata = (patch != ScrapbookPatch::default()).then_some(patch);
    (elements, metadata)
}

/// What a peer that lost access is left with: nothing it could not see
/// anyway, and an access list that no longer admits it.
fn revoked_copy(doc: &Scrapbook) -> Scrapbook {
    let mut stripped = Scrapbook::new(doc.id.clone(), "", doc.owner_id.clone());
    stripped.visibility = Visibility::Private;
    stripped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{ElementId, PathElement};
    use crate::permissions::{Identity, Role, resolve_role};
    use crate::scrapbook::CollaboratorRole;
    use kurbo::Point;

    #[test]
    fn test_split_patch() {
        let stroke = Element::Path(PathElement {
            id: ElementId::from("s"),
            points: vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)],
            color: "#000000".into(),
            width: 2.0,
        });
        let (elements, metadata) = split_patch(ScrapbookPatch::elements(vec![stroke], "alice", Utc::now()));
        assert_eq!(elements.map(|e| e.len()), Some(1));
        assert_eq!(metadata, None);

        let (elements, metadata) = split_patch(ScrapbookPatch::thumbnail("memory://t.png", Utc::now()));
        assert!(elements.is_none());
        let metadata = metadata.unwrap();
        assert_eq!(metadata.thumbnail.as_deref(), Some("memory://t.png"));
        assert!(metadata.last_thumbnail_update.is_some());
        assert!(metadata.last_modified.is_none());
    }

    #[test]
    fn test_revoked_copy_denies_former_members() {
        let mut doc = Scrapbook::new("sb", "Trip", "alice");
        doc.visibility = Visibility::Public;
        doc.collaborators
            .push(Collaborator::new("carol", "carol@example.com", CollaboratorRole::Viewer));

        let stripped = revoked_copy(&doc);
        assert_eq!(resolve_role(&Identity::user("carol"), &stripped), Role::NoAccess);
        assert_eq!(resolve_role(&Identity::user("wendy"), &stripped), Role::NoAccess);
        assert!(stripped.elements.is_empty());
        assert!(stripped.title.is_empty());
    }

    #[test]
    fn test_join_errors_map_to_storage_errors() {
        assert_eq!(
            join_error("sb", ErrorKind::NotFound, "x".into()),
            StorageError::NotFound("sb".into())
        );
        assert_eq!(
            join_error("sb", ErrorKind::NoAccess, "x".into()),
            StorageError::Denied("sb".into())
        );
        assert_eq!(
            join_error("sb", ErrorKind::Invalid, "bad seed".into()),
            StorageError::Other("bad seed".into())
        );
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_io_error() {
        let store = RelayStore::new("ws://127.0.0.1:1/ws", "alice");
        assert!(matches!(store.get("sb").await, Err(StorageError::Io(_))));
        assert!(matches!(
            store.update("sb", ScrapbookPatch::title("x")).await,
            Err(StorageError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_subscriptions_before_connect() {
        let store = RelayStore::new("ws://127.0.0.1:1/ws", "alice");
        let mut docs = store.subscribe("sb").unwrap();
        assert!(docs.try_next().is_none());
        let mut presence = store.subscribe_presence("sb").unwrap();
        assert_eq!(presence.try_next(), Some(Vec::new()));
    }
}
