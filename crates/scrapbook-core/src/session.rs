//! Canvas session: one client's live connection to a scrapbook.
//!
//! The session wraps an [`EditorState`] and carries out its effects. Element
//! writes go to a background writer task in order, each bounded by the
//! configured timeout; failures come back as [`SessionNotice`]s while the
//! optimistic local state stays as it is. Remote snapshots and presence
//! updates arrive through subscriptions that live as long as the session.

use crate::canvas::{EditorEvent, EditorState, Effect};
use crate::config::EngineConfig;
use crate::elements::{Element, ElementId, ImageElement};
use crate::error::{EngineError, EngineResult};
use crate::permissions::{Identity, Role, ensure_can_edit, resolve_role};
use crate::presence::{PresenceRecord, PresenceTracker};
use crate::scrapbook::{Scrapbook, ScrapbookPatch, Visibility};
use crate::storage::{BlobStore, BoxFuture, Subscription};
use crate::sync::DocumentSync;
use chrono::{DateTime, Utc};
use kurbo::Point;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Renders and publishes a thumbnail, returning its public URL.
pub trait ThumbnailPublisher: Send + Sync {
    fn publish<'a>(
        &'a self,
        scrapbook_id: &'a str,
        elements: &'a [Element],
    ) -> BoxFuture<'a, EngineResult<String>>;
}

/// Asynchronous conditions reported to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    /// A write failed or timed out. Local state was kept.
    PersistFailed(EngineError),
    /// The user lost access; the UI should navigate away.
    AccessRevoked,
}

/// What changed after waiting on the session's subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionUpdate {
    Document,
    Presence,
}

/// An image picked by the user, already decoded far enough to know its size.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub natural_width: f64,
    pub natural_height: f64,
}

enum WriteRequest {
    Persist(Vec<Element>),
    Flush(oneshot::Sender<()>),
}

/// A client's editing session on one scrapbook.
pub struct CanvasSession {
    identity: Identity,
    document: Scrapbook,
    editor: EditorState,
    sync: Arc<dyn DocumentSync>,
    blobs: Option<Arc<dyn BlobStore>>,
    doc_updates: Subscription<Scrapbook>,
    presence_updates: Subscription<Vec<PresenceRecord>>,
    presence: PresenceTracker,
    writes: mpsc::UnboundedSender<WriteRequest>,
    writer: JoinHandle<()>,
    notices: mpsc::UnboundedReceiver<SessionNotice>,
    notice_tx: mpsc::UnboundedSender<SessionNotice>,
}

impl CanvasSession {
    /// Load the scrapbook, resolve the caller's role, subscribe to document
    /// and presence updates and announce presence.
    ///
    /// Fails with `NotFound` for missing scrapbooks and `NoAccess` when the
    /// caller may not see it. Must be called within a tokio runtime.
    pub async fn open(
        sync: Arc<dyn DocumentSync>,
        scrapbook_id: &str,
        identity: Identity,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let document = sync.load(scrapbook_id).await?;
        let role = resolve_role(&identity, &document);
        if !role.can_view() {
            return Err(EngineError::NoAccess(scrapbook_id.to_string()));
        }

        let doc_updates = sync.watch(scrapbook_id)?;
        let presence_updates = sync.watch_presence(scrapbook_id)?;

        let timeout = config.persist_timeout();
        let touched = with_timeout(
            timeout,
            sync.touch_presence(scrapbook_id, &identity.user_id, Utc::now()),
        )
        .await;
        if let Err(e) = touched {
            log::warn!("Failed to record presence on {}: {}", scrapbook_id, e);
        }

        let (notice_tx, notices) = mpsc::unbounded_channel();
        let (writes, writer) = spawn_writer(
            sync.clone(),
            scrapbook_id.to_string(),
            identity.user_id.clone(),
            timeout,
            notice_tx.clone(),
        );

        log::info!(
            "Opened scrapbook {} as {} ({:?})",
            scrapbook_id,
            identity.user_id,
            role
        );

        Ok(Self {
            presence: PresenceTracker::new(config.presence_ttl()),
            editor: EditorState::new(document.elements.clone(), role, config),
            identity,
            document,
            sync,
            blobs: None,
            doc_updates,
            presence_updates,
            writes,
            writer,
            notices,
            notice_tx,
        })
    }

    /// Blob store used for image uploads.
    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn scrapbook_id(&self) -> &str {
        &self.document.id
    }

    /// Latest known document metadata. Its `elements` may lag behind
    /// [`CanvasSession::editor`].
    pub fn document(&self) -> &Scrapbook {
        &self.document
    }

    pub fn editor(&self) -> &EditorState {
        &self.editor
    }

    pub fn elements(&self) -> &[Element] {
        self.editor.elements()
    }

    pub fn role(&self) -> Role {
        self.editor.role()
    }

    /// Feed an event to the editor and start any writes it produced.
    /// Returns the effects the UI must handle itself.
    pub fn dispatch(&mut self, event: EditorEvent) -> EngineResult<Vec<Effect>> {
        let effects = self.editor.handle(event)?;
        let mut remaining = Vec::with_capacity(effects.len());
        for effect in effects {
            match effect {
                Effect::Persist(elements) => self.persist(elements),
                other => remaining.push(other),
            }
        }
        Ok(remaining)
    }

    pub fn undo(&mut self) -> EngineResult<()> {
        self.dispatch(EditorEvent::Undo).map(drop)
    }

    pub fn redo(&mut self) -> EngineResult<()> {
        self.dispatch(EditorEvent::Redo).map(drop)
    }

    /// Wait until every write queued so far has completed or failed.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.writes.send(WriteRequest::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Apply everything the store has pushed so far without waiting.
    /// Returns whether anything changed.
    pub fn pump(&mut self) -> bool {
        let mut changed = false;
        if let Some(doc) = self.doc_updates.latest() {
            self.apply_document(doc);
            changed = true;
        }
        if let Some(records) = self.presence_updates.latest() {
            self.presence.replace(records);
            changed = true;
        }
        changed
    }

    /// Wait for the next push from the store and apply it.
    /// Returns `None` once the store has closed the subscriptions.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        tokio::select! {
            doc = self.doc_updates.next() => {
                let doc = doc?;
                self.apply_document(doc);
                Some(SessionUpdate::Document)
            }
            records = self.presence_updates.next() => {
                let records = records?;
                self.presence.replace(records);
                Some(SessionUpdate::Presence)
            }
        }
    }

    /// Next notice if one is pending.
    pub fn try_notice(&mut self) -> Option<SessionNotice> {
        self.notices.try_recv().ok()
    }

    pub async fn next_notice(&mut self) -> Option<SessionNotice> {
        self.notices.recv().await
    }

    /// Rename the scrapbook.
    pub async fn set_title(&mut self, title: &str) -> EngineResult<()> {
        ensure_can_edit(self.role(), "edit title")?;
        self.update_metadata(ScrapbookPatch::title(title)).await?;
        self.document.title = title.to_string();
        Ok(())
    }

    /// Change who can see the scrapbook.
    pub async fn set_visibility(&mut self, visibility: Visibility) -> EngineResult<()> {
        ensure_can_edit(self.role(), "change settings")?;
        self.update_metadata(ScrapbookPatch::visibility(visibility)).await?;
        self.document.visibility = visibility;
        Ok(())
    }

    /// Upload an image and place it on the canvas.
    pub async fn insert_image(&mut self, upload: ImageUpload) -> EngineResult<ElementId> {
        ensure_can_edit(self.role(), "insert image")?;
        let config = self.editor.config().clone();
        if !upload.content_type.starts_with("image/") {
            return Err(EngineError::ValidationFailure(format!(
                "{} is not an image",
                upload.content_type
            )));
        }
        if upload.bytes.len() > config.max_image_bytes {
            return Err(EngineError::ValidationFailure(format!(
                "Image is {} bytes, limit is {}",
                upload.bytes.len(),
                config.max_image_bytes
            )));
        }
        let blobs = self.blobs.clone().ok_or_else(|| {
            EngineError::PersistenceFailure("No blob store configured".to_string())
        })?;

        let path = format!("scrapbooks/{}/images/{}", self.document.id, Uuid::new_v4());
        let timeout = config.persist_timeout();
        let uploading = blobs.upload(&path, upload.bytes, &upload.content_type);
        let blob = with_timeout(timeout, async move { Ok(uploading.await?) }).await?;
        let resolving = blobs.public_url(&blob);
        let url = with_timeout(timeout, async move { Ok(resolving.await?) }).await?;

        let (x, y) = config.image_insert_position;
        let id = ElementId::generate();
        let image = ImageElement::placed(
            id.clone(),
            url,
            Point::new(x, y),
            config.image_display_width,
            upload.natural_width,
            upload.natural_height,
        );
        self.dispatch(EditorEvent::InsertImage(image))?;
        Ok(id)
    }

    /// Refresh this user's presence record.
    pub async fn heartbeat(&self) -> EngineResult<()> {
        with_timeout(
            self.editor.config().persist_timeout(),
            self.sync
                .touch_presence(&self.document.id, &self.identity.user_id, Utc::now()),
        )
        .await
    }

    /// Collaborators seen within the presence TTL.
    pub fn active_users(&self, now: DateTime<Utc>) -> Vec<&PresenceRecord> {
        self.presence.active(now)
    }

    /// Close the session.
    ///
    /// Pending writes are flushed, then editors publish a fresh thumbnail and
    /// record its URL on the document. A thumbnail failure is logged and
    /// does not prevent leaving. Returns the thumbnail URL if one was
    /// published.
    pub async fn leave(self, publisher: Option<&dyn ThumbnailPublisher>) -> Option<String> {
        let timeout = self.editor.config().persist_timeout();
        let CanvasSession {
            document,
            editor,
            sync,
            writes,
            writer,
            ..
        } = self;

        // Closing the queue lets the writer drain and exit.
        drop(writes);
        if tokio::time::timeout(timeout, writer).await.is_err() {
            log::warn!("Pending writes for {} did not finish before leaving", document.id);
        }

        let publisher = publisher?;
        if !editor.role().can_edit() {
            return None;
        }

        let url = match publisher.publish(&document.id, editor.elements()).await {
            Ok(url) => url,
            Err(e) => {
                log::warn!("Thumbnail for {} failed: {}", document.id, e);
                return None;
            }
        };
        let patch = ScrapbookPatch::thumbnail(url.clone(), Utc::now());
        match with_timeout(timeout, sync.update_metadata(&document.id, patch)).await {
            Ok(()) => Some(url),
            Err(e) => {
                log::warn!("Failed to record thumbnail for {}: {}", document.id, e);
                None
            }
        }
    }

    fn persist(&self, elements: Vec<Element>) {
        if self.writes.send(WriteRequest::Persist(elements)).is_err() {
            let _ = self.notice_tx.send(SessionNotice::PersistFailed(
                EngineError::PersistenceFailure("Writer stopped".to_string()),
            ));
        }
    }

    async fn update_metadata(&self, patch: ScrapbookPatch) -> EngineResult<()> {
        with_timeout(
            self.editor.config().persist_timeout(),
            self.sync.update_metadata(&self.document.id, patch),
        )
        .await
    }

    fn apply_document(&mut self, doc: Scrapbook) {
        let role = resolve_role(&self.identity, &doc);
        if role != self.editor.role() {
            log::info!("Role on {} changed to {:?}", doc.id, role);
            // Role changes never fail.
            let _ = self.editor.handle(EditorEvent::SetRole(role));
            if !role.can_view() {
                let _ = self.notice_tx.send(SessionNotice::AccessRevoked);
            }
        }
        self.editor.apply_remote(doc.elements.clone());
        self.document = doc;
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = EngineResult<T>>,
) -> EngineResult<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::PersistenceFailure(format!(
            "Timed out after {} ms",
            timeout.as_millis()
        ))),
    }
}

fn spawn_writer(
    sync: Arc<dyn DocumentSync>,
    scrapbook_id: String,
    user_id: String,
    timeout: Duration,
    notices: mpsc::UnboundedSender<SessionNotice>,
) -> (mpsc::UnboundedSender<WriteRequest>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriteRequest>();
    let handle = tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let mut elements = match request {
                WriteRequest::Persist(elements) => elements,
                WriteRequest::Flush(done) => {
                    let _ = done.send(());
                    continue;
                }
            };

            // Only the newest queued state needs writing.
            let mut flushed = None;
            while let Ok(next) = rx.try_recv() {
                match next {
                    WriteRequest::Persist(newer) => elements = newer,
                    WriteRequest::Flush(done) => {
                        flushed = Some(done);
                        break;
                    }
                }
            }

            let write = sync.push_elements(&scrapbook_id, elements, &user_id);
            if let Err(e) = with_timeout(timeout, write).await {
                log::warn!("Failed to persist scrapbook {}: {}", scrapbook_id, e);
                let _ = notices.send(SessionNotice::PersistFailed(e));
            }
            if let Some(done) = flushed {
                let _ = done.send(());
            }
        }
    });
    (tx, handle)
}
