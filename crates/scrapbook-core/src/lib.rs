//! Scrapbook Core Library
//!
//! Element model, editing tools, permissions and synchronization for the
//! collaborative scrapbook canvas. Nothing here draws pixels; see
//! `scrapbook-render` for thumbnails.

pub mod camera;
pub mod canvas;
pub mod config;
pub mod elements;
pub mod eraser;
pub mod error;
pub mod geometry;
pub mod history;
pub mod input;
pub mod permissions;
pub mod presence;
pub mod scrapbook;
pub mod session;
pub mod storage;
pub mod sync;
pub mod tools;

pub use camera::Camera;
pub use canvas::{EditorEvent, EditorState, Effect};
pub use config::{CANVAS_SIZE, EngineConfig};
pub use elements::{Element, ElementId, ImageElement, PathElement, Rgba, TextElement};
pub use eraser::{EraseOutcome, erase};
pub use error::{EngineError, EngineResult};
pub use history::History;
pub use input::{PointerEvent, PointerPhase, PointerSource};
pub use permissions::{Identity, Role, resolve_role};
pub use presence::{PresenceRecord, PresenceTracker};
pub use scrapbook::{Collaborator, CollaboratorRole, Scrapbook, ScrapbookPatch, Visibility};
pub use session::{CanvasSession, ImageUpload, SessionNotice, SessionUpdate, ThumbnailPublisher};
pub use storage::{BlobStore, BoxFuture, DocumentStore, RelayStore, StorageError};
pub use sync::{ClientMessage, DocumentSync, ErrorKind, LastWriteWins, ServerMessage};
pub use tools::{ToolKind, ToolManager};
