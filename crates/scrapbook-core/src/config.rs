//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Logical edge length of the square drawing surface.
pub const CANVAS_SIZE: f64 = 4096.0;

/// Stroke defaults for newly drawn paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrokeDefaults {
    pub color: String,
    pub width: f64,
}

impl Default for StrokeDefaults {
    fn default() -> Self {
        Self {
            color: "#000000".to_string(),
            width: 2.0,
        }
    }
}

/// Style applied to text inserted with the text tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextDefaults {
    pub font_size: f64,
    pub font_family: String,
    pub color: String,
}

impl Default for TextDefaults {
    fn default() -> Self {
        Self {
            font_size: 16.0,
            font_family: "Arial".to_string(),
            color: "#000000".to_string(),
        }
    }
}

/// Tunables for the editor, the mutation pipeline and presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Logical canvas extent; touch input is scaled onto it.
    pub canvas_size: f64,
    /// Max distance from a path segment that still counts as a hit.
    pub hit_tolerance: f64,
    /// Radius of the eraser cursor.
    pub eraser_radius: f64,
    /// Timeout for a single persistence write.
    pub persist_timeout_ms: u64,
    /// Presence records older than this are not considered active.
    pub presence_ttl_secs: u64,
    /// Max undo snapshots kept. Each snapshot is a full copy of the element
    /// list, so memory grows with `history_limit * elements`. `None` keeps
    /// everything.
    pub history_limit: Option<usize>,
    pub stroke: StrokeDefaults,
    pub text: TextDefaults,
    /// Display width for inserted images; height follows the aspect ratio.
    pub image_display_width: f64,
    /// Top-left corner for inserted images.
    pub image_insert_position: (f64, f64),
    /// Upper bound for uploaded image payloads.
    pub max_image_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            canvas_size: CANVAS_SIZE,
            hit_tolerance: 5.0,
            eraser_radius: 10.0,
            persist_timeout_ms: 10_000,
            presence_ttl_secs: 5 * 60,
            history_limit: Some(100),
            stroke: StrokeDefaults::default(),
            text: TextDefaults::default(),
            image_display_width: 200.0,
            image_insert_position: (100.0, 100.0),
            max_image_bytes: 5 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(std::io::Error::other)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }

    pub fn presence_ttl(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::seconds(self.presence_ttl_secs as i64)
    }
}
