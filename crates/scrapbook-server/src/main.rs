//! Scrapbook WebSocket Relay Server
//!
//! Keeps the latest snapshot of each open scrapbook and relays writes between
//! the clients editing it. Writes are whole element arrays; the last one the
//! server accepts wins and every member is sent the result. Scrapbooks live in
//! the server's own store and access is checked against it on every join and
//! after every write.
//!
//! ## Protocol
//!
//! Messages are JSON tagged by `type`:
//! ```json
//! { "type": "join", "scrapbook_id": "abc", "user_id": "u1" }
//! { "type": "update", "elements": [ ... ] }
//! { "type": "metadata", "patch": { "title": "Summer" } }
//! { "type": "add_collaborator", "collaborator": { "id": "u2", "role": "editor" } }
//! { "type": "presence", "last_active": "2024-05-01T12:00:00Z" }
//! ```
//! `join` is answered with `joined` or `error`; everything else with `ack` or
//! `error`, in order. Room traffic arrives as `snapshot`, `presence`,
//! `peer_joined`, `peer_left` and `revoked`.

mod rooms;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use rooms::{AppState, RoomEvent};
use scrapbook_core::storage::MemoryStore;
use scrapbook_core::{ClientMessage, EngineError, Identity, ServerMessage, resolve_role};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 3030);

fn bind_addr() -> SocketAddr {
    match std::env::var("SCRAPBOOK_ADDR") {
        Ok(value) => value.parse().unwrap_or_else(|e| {
            warn!("Ignoring invalid SCRAPBOOK_ADDR {:?}: {}", value, e);
            SocketAddr::from(DEFAULT_ADDR)
        }),
        Err(_) => SocketAddr::from(DEFAULT_ADDR),
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scrapbook_server=info,tower_http=info".into()),
        )
        .init();

    // Scrapbooks are kept for the life of the process.
    let state = Arc::new(AppState::new(Arc::new(MemoryStore::new())));

    let addr = bind_addr();
    info!("Scrapbook relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "Scrapbook Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(msg: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!("Failed to encode {:?}: {}", msg, e);
            None
        }
    }
}

/// Whether a room event should be forwarded to `peer_id`.
///
/// Snapshots go to everyone so the writer learns the accepted revision;
/// other events are not echoed back to their sender.
fn should_forward(peer_id: &str, from: &str, msg: &ServerMessage) -> bool {
    from != peer_id || matches!(msg, ServerMessage::Snapshot { .. })
}

/// What to do with a room event for one connection.
#[derive(Debug, PartialEq, Eq)]
enum Delivery {
    Forward,
    Skip,
    /// The peer lost access; tell it and stop relaying.
    Revoke,
}

fn route(peer_id: &str, user_id: &str, from: &str, msg: &ServerMessage) -> Delivery {
    match msg {
        ServerMessage::Revoked { peer_id: target, .. } if target == peer_id => Delivery::Revoke,
        ServerMessage::Revoked { .. } => Delivery::Skip,
        // Covers revocations missed while lagging.
        ServerMessage::Snapshot { scrapbook, .. }
            if !resolve_role(&Identity::user(user_id), scrapbook).can_view() =>
        {
            Delivery::Revoke
        }
        _ if should_forward(peer_id, from, msg) => Delivery::Forward,
        _ => Delivery::Skip,
    }
}

/// Membership of one connection.
struct Membership {
    room: String,
    user_id: String,
    rx: broadcast::Receiver<RoomEvent>,
}

fn ack(revision: Option<u64>) -> Option<ServerMessage> {
    Some(ServerMessage::Ack { revision })
}

/// Apply one client message and return the direct reply.
async fn handle_message(
    state: &AppState,
    peer_id: &str,
    membership: &mut Option<Membership>,
    msg: ClientMessage,
) -> Option<ServerMessage> {
    let result = match msg {
        ClientMessage::Join {
            scrapbook_id,
            user_id,
            seed,
        } => {
            if let Some(old) = membership.take() {
                state.leave(&old.room, peer_id);
            }
            state
                .join(&scrapbook_id, peer_id, &user_id, seed)
                .await
                .map(|ticket| {
                    *membership = Some(Membership {
                        room: scrapbook_id,
                        user_id,
                        rx: ticket.rx,
                    });
                    Some(ticket.joined)
                })
        }
        ClientMessage::Leave => {
            if let Some(old) = membership.take() {
                state.leave(&old.room, peer_id);
                info!("Peer {} left room {}", peer_id, old.room);
            }
            Ok(ack(None))
        }
        ClientMessage::Update { elements } => match membership.as_ref() {
            Some(m) => state
                .update(&m.room, peer_id, &m.user_id, elements)
                .map(|revision| ack(Some(revision))),
            None => Err(not_joined()),
        },
        ClientMessage::Metadata { patch } => match membership.as_ref() {
            Some(m) => state
                .metadata(&m.room, peer_id, &m.user_id, patch)
                .map(|revision| ack(Some(revision))),
            None => Err(not_joined()),
        },
        ClientMessage::AddCollaborator { collaborator } => match membership.as_ref() {
            Some(m) => state
                .collaborator(&m.room, peer_id, &m.user_id, collaborator, true)
                .map(|revision| ack(Some(revision))),
            None => Err(not_joined()),
        },
        ClientMessage::RemoveCollaborator { collaborator } => match membership.as_ref() {
            Some(m) => state
                .collaborator(&m.room, peer_id, &m.user_id, collaborator, false)
                .map(|revision| ack(Some(revision))),
            None => Err(not_joined()),
        },
        ClientMessage::Presence { last_active } => match membership.as_ref() {
            Some(m) => state
                .presence(&m.room, peer_id, &m.user_id, last_active)
                .map(|()| ack(None)),
            None => Err(not_joined()),
        },
    };

    result.unwrap_or_else(|e| {
        warn!("Rejected message from {}: {}", peer_id, e);
        Some(ServerMessage::error(&e))
    })
}

fn not_joined() -> EngineError {
    EngineError::NotFound("no joined scrapbook".to_string())
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let peer_id = Uuid::new_v4().to_string();
    info!("New connection: {}", peer_id);

    let (mut sender, mut receiver) = socket.split();
    let mut membership: Option<Membership> = None;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let reply = match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(client_msg) => handle_message(&state, &peer_id, &mut membership, client_msg).await,
                        Err(e) => {
                            warn!("Invalid message from {}: {}", peer_id, e);
                            Some(ServerMessage::error(&EngineError::ValidationFailure(format!(
                                "Invalid message: {}",
                                e
                            ))))
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => None,
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", peer_id, e);
                        break;
                    }
                };
                if let Some(out) = reply.as_ref().and_then(encode) {
                    if sender.send(out).await.is_err() {
                        break;
                    }
                }
            }

            event = async {
                match membership.as_mut() {
                    Some(m) => loop {
                        match m.rx.recv().await {
                            Ok(event) => return Some(event),
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!("Peer {} lagged by {} events", peer_id, skipped);
                            }
                            Err(broadcast::error::RecvError::Closed) => return None,
                        }
                    },
                    None => std::future::pending::<Option<RoomEvent>>().await,
                }
            } => {
                let Some((from, server_msg)) = event else {
                    membership = None;
                    continue;
                };
                let Some(m) = membership.as_ref() else {
                    continue;
                };
                let out = match route(&peer_id, &m.user_id, &from, &server_msg) {
                    Delivery::Skip => continue,
                    Delivery::Forward => encode(&server_msg),
                    Delivery::Revoke => {
                        info!("Peer {} lost access to {}", peer_id, m.room);
                        state.leave(&m.room, &peer_id);
                        let revoked = ServerMessage::Revoked {
                            scrapbook_id: m.room.clone(),
                            peer_id: peer_id.clone(),
                        };
                        membership = None;
                        encode(&revoked)
                    }
                };
                if let Some(out) = out {
                    if sender.send(out).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    if let Some(m) = membership {
        state.leave(&m.room, &peer_id);
    }
    info!("Connection closed: {}", peer_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapbook_core::storage::DocumentStore;
    use scrapbook_core::{
        CanvasSession, Collaborator, CollaboratorRole, DocumentSync, EditorEvent, EngineConfig, EngineResult, ErrorKind,
        LastWriteWins, PointerEvent, PointerPhase, RelayStore, Role, Scrapbook, ScrapbookPatch, SessionNotice,
        StorageError, ToolKind, Visibility,
    };
    use std::time::Duration;

    fn seeded_state() -> AppState {
        let store = Arc::new(MemoryStore::new());
        store.insert(Scrapbook::new("sb", "Trip", "alice")).unwrap();
        AppState::new(store)
    }

    /// Serve a fresh relay on a local port and return its WebSocket URL.
    async fn spawn_relay() -> String {
        let state = Arc::new(AppState::new(Arc::new(MemoryStore::new())));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(state)).await });
        format!("ws://{}/ws", addr)
    }

    async fn open_session(url: &str, user: &str) -> EngineResult<CanvasSession> {
        let store = Arc::new(RelayStore::new(url, user));
        let sync: Arc<dyn DocumentSync> = Arc::new(LastWriteWins::new(store));
        CanvasSession::open(sync, "sb", Identity::user(user), EngineConfig::default()).await
    }

    async fn wait_for(session: &mut CanvasSession, done: impl Fn(&CanvasSession) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done(session) {
                if session.next_update().await.is_none() {
                    break;
                }
            }
        })
        .await
        .unwrap();
    }

    fn draw(session: &mut CanvasSession, from: (f64, f64), to: (f64, f64)) {
        session.dispatch(EditorEvent::SetTool(ToolKind::Draw)).unwrap();
        for (phase, (x, y)) in [(PointerPhase::Down, from), (PointerPhase::Move, to), (PointerPhase::Up, to)] {
            session
                .dispatch(EditorEvent::Pointer(PointerEvent::mouse(phase, x, y)))
                .unwrap();
        }
    }

    #[test]
    fn test_snapshots_echo_to_writer() {
        let snapshot = ServerMessage::Snapshot {
            from: "p1".into(),
            revision: 1,
            scrapbook: Scrapbook::new("sb", "Trip", "alice"),
        };
        assert!(should_forward("p1", "p1", &snapshot));
        let joined = ServerMessage::PeerJoined { peer_id: "p1".into() };
        assert!(!should_forward("p1", "p1", &joined));
        assert!(should_forward("p2", "p1", &joined));
    }

    #[test]
    fn test_route_stops_at_lost_access() {
        let private = ServerMessage::Snapshot {
            from: "p1".into(),
            revision: 2,
            scrapbook: Scrapbook::new("sb", "Trip", "alice"),
        };
        assert_eq!(route("p2", "wendy", "p1", &private), Delivery::Revoke);
        assert_eq!(route("p1", "alice", "p1", &private), Delivery::Forward);

        let revoked = ServerMessage::Revoked {
            scrapbook_id: "sb".into(),
            peer_id: "p2".into(),
        };
        assert_eq!(route("p2", "wendy", "p1", &revoked), Delivery::Revoke);
        assert_eq!(route("p3", "carol", "p1", &revoked), Delivery::Skip);
    }

    #[tokio::test]
    async fn test_messages_before_join_are_errors() {
        let state = seeded_state();
        let mut membership = None;
        let reply = handle_message(
            &state,
            "p1",
            &mut membership,
            ClientMessage::Metadata {
                patch: ScrapbookPatch::title("x"),
            },
        )
        .await;
        assert!(matches!(reply, Some(ServerMessage::Error { .. })));
    }

    #[tokio::test]
    async fn test_join_then_update() {
        let state = seeded_state();
        let mut membership = None;
        let join = ClientMessage::Join {
            scrapbook_id: "sb".into(),
            user_id: "alice".into(),
            seed: None,
        };
        let reply = handle_message(&state, "p1", &mut membership, join).await;
        assert!(matches!(reply, Some(ServerMessage::Joined { .. })));
        assert!(membership.is_some());

        let reply = handle_message(&state, "p1", &mut membership, ClientMessage::Update { elements: vec![] }).await;
        assert_eq!(reply, Some(ServerMessage::Ack { revision: Some(1) }));

        let mut rx = membership.as_mut().unwrap().rx.resubscribe();
        let reply = handle_message(&state, "p1", &mut membership, ClientMessage::Leave).await;
        assert_eq!(reply, Some(ServerMessage::Ack { revision: None }));
        assert!(membership.is_none());
        assert_eq!(state.room_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejected_join_reports_error() {
        let state = seeded_state();
        let mut membership = None;
        let join = ClientMessage::Join {
            scrapbook_id: "sb".into(),
            user_id: "mallory".into(),
            seed: Some(Scrapbook::new("sb", "Mine", "mallory")),
        };
        let reply = handle_message(&state, "p1", &mut membership, join).await;
        assert!(matches!(
            reply,
            Some(ServerMessage::Error {
                kind: ErrorKind::NoAccess,
                ..
            })
        ));
        assert!(membership.is_none());
    }

    #[test]
    fn test_client_message_wire_format() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"join","scrapbook_id":"sb","user_id":"u1"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Join { seed: None, .. }));
    }

    #[tokio::test]
    async fn test_relay_store_round_trip() {
        let url = spawn_relay().await;
        let alice_store = RelayStore::new(url.as_str(), "alice");
        let bob_store = RelayStore::new(url.as_str(), "bob");

        alice_store.create(Scrapbook::new("sb", "Trip", "alice")).await.unwrap();
        assert_eq!(
            alice_store.create(Scrapbook::new("sb", "Again", "alice")).await,
            Err(StorageError::Conflict("sb".into()))
        );
        assert_eq!(bob_store.get("missing").await, Ok(None));
        assert_eq!(bob_store.get("sb").await, Err(StorageError::Denied("sb".into())));

        let bob = Collaborator::new("bob", "bob@example.com", CollaboratorRole::Editor);
        alice_store.add_collaborator("sb", bob).await.unwrap();
        assert_eq!(bob_store.get("sb").await.unwrap().unwrap().title, "Trip");

        // Bob is not the owner.
        let carol = Collaborator::new("carol", "carol@example.com", CollaboratorRole::Viewer);
        assert!(matches!(
            bob_store.add_collaborator("sb", carol).await,
            Err(StorageError::Other(_))
        ));
        assert!(bob_store.upsert_presence("sb", "alice", chrono::Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_sessions_converge_through_relay() {
        let url = spawn_relay().await;
        let owner = RelayStore::new(url.as_str(), "alice");
        let mut doc = Scrapbook::new("sb", "Trip", "alice");
        doc.collaborators
            .push(Collaborator::new("bob", "bob@example.com", CollaboratorRole::Editor));
        owner.create(doc).await.unwrap();

        let mut alice = open_session(&url, "alice").await.unwrap();
        let mut bob = open_session(&url, "bob").await.unwrap();
        assert_eq!(bob.role(), Role::Editor);

        draw(&mut alice, (0.0, 0.0), (100.0, 0.0));
        alice.flush().await;
        assert!(alice.try_notice().is_none());

        wait_for(&mut bob, |s| s.elements().len() == 1).await;
        assert_eq!(bob.document().last_modified_by.as_deref(), Some("alice"));

        draw(&mut bob, (0.0, 50.0), (100.0, 50.0));
        bob.flush().await;
        wait_for(&mut alice, |s| s.elements().len() == 2).await;
        wait_for(&mut alice, |s| {
            s.active_users(chrono::Utc::now())
                .iter()
                .any(|record| record.user_id == "bob")
        })
        .await;
    }

    #[tokio::test]
    async fn test_relay_revokes_viewer_on_private_switch() {
        let url = spawn_relay().await;
        let owner = RelayStore::new(url.as_str(), "alice");
        let mut doc = Scrapbook::new("sb", "Trip", "alice");
        doc.visibility = Visibility::Public;
        owner.create(doc).await.unwrap();

        let mut wendy = open_session(&url, "wendy").await.unwrap();
        assert_eq!(wendy.role(), Role::Viewer);
        let mut alice = open_session(&url, "alice").await.unwrap();

        alice.set_visibility(Visibility::Private).await.unwrap();
        draw(&mut alice, (0.0, 0.0), (100.0, 0.0));
        alice.flush().await;

        wait_for(&mut wendy, |s| s.role() == Role::NoAccess).await;
        assert!(matches!(wendy.try_notice(), Some(SessionNotice::AccessRevoked)));
        assert!(wendy.elements().is_empty());
        assert_ne!(wendy.document().visibility, Visibility::Public);
        assert!(wendy.document().title.is_empty());

        assert!(matches!(
            open_session(&url, "wendy").await,
            Err(EngineError::NoAccess(_))
        ));
    }
}
