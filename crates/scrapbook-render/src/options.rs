//! Thumbnail settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How thumbnails are laid out and drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailOptions {
    pub width: u32,
    pub height: u32,
    /// Added around the content bounds before fitting.
    pub padding: f64,
    /// Total space left free along each axis when fitting.
    pub margin: f64,
    pub min_scale: f64,
    /// Scale used when the content has no extent.
    pub empty_scale: f64,
    pub stroke_multiplier: f64,
    pub font_multiplier: f64,
    pub background: String,
    pub image_timeout_ms: u64,
    /// Content bounds are clamped to `0..canvas_size`.
    pub canvas_size: f64,
    /// TrueType/OpenType font for text. Without one, text is drawn as a
    /// placeholder bar.
    pub font_path: Option<PathBuf>,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            width: 300,
            height: 200,
            padding: 20.0,
            margin: 40.0,
            min_scale: 0.1,
            empty_scale: 0.5,
            stroke_multiplier: 2.0,
            font_multiplier: 1.5,
            background: "#ffffff".to_string(),
            image_timeout_ms: 5000,
            canvas_size: scrapbook_core::CANVAS_SIZE,
            font_path: None,
        }
    }
}

impl ThumbnailOptions {
    pub fn image_timeout(&self) -> Duration {
        Duration::from_millis(self.image_timeout_ms)
    }
}
