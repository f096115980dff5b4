//! Error taxonomy for the canvas engine.

use thiserror::Error;

/// Errors surfaced by the canvas engine.
///
/// Permission and validation errors are returned synchronously from the
/// editor before any state changes. Persistence and asset errors are reported
/// asynchronously and never tear down the editing session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A mutating action was attempted without editor or owner role.
    #[error("Permission denied: {action} requires editor or owner role")]
    PermissionDenied { action: &'static str },
    /// The caller has no access to the scrapbook and must be redirected.
    #[error("No access to scrapbook {0}")]
    NoAccess(String),
    /// A write to the shared store failed or timed out.
    #[error("Persistence failed: {0}")]
    PersistenceFailure(String),
    /// The scrapbook does not exist.
    #[error("Scrapbook not found: {0}")]
    NotFound(String),
    /// An image could not be loaded while rendering.
    #[error("Failed to load asset {src}: {reason}")]
    AssetLoadFailure { src: String, reason: String },
    /// A malformed payload was rejected.
    #[error("Validation failed: {0}")]
    ValidationFailure(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
