//! Render errors.

use scrapbook_core::EngineError;
use thiserror::Error;

/// Errors from producing or publishing a thumbnail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("Thumbnail target has no pixels: {0}x{1}")]
    EmptyTarget(u32, u32),
    #[error("PNG encoding failed: {0}")]
    Encode(String),
    #[error("Font error: {0}")]
    Font(String),
    #[error("Upload failed: {0}")]
    Upload(String),
}

/// Result type for render operations.
pub type RenderResult<T> = Result<T, RenderError>;

impl From<RenderError> for EngineError {
    fn from(err: RenderError) -> Self {
        EngineError::PersistenceFailure(err.to_string())
    }
}
