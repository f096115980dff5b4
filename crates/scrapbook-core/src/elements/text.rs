//! Text label element.

use super::{ElementId, default_color};
use kurbo::{Point, Rect, Vec2};
use serde::{Deserialize, Serialize};

/// Estimated horizontal advance per character, in ems.
pub const TEXT_ADVANCE_EM: f64 = 0.6;

fn default_font_size() -> f64 {
    16.0
}

fn default_font_family() -> String {
    "Arial".to_string()
}

/// A single line of text anchored at its baseline origin `(x, y)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextElement {
    pub id: ElementId,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Always serialized, possibly empty.
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_font_size")]
    pub font_size: f64,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_color")]
    pub color: String,
}

impl TextElement {
    /// Approximate layout width without access to font metrics.
    pub fn estimated_width(&self) -> f64 {
        self.text.chars().count() as f64 * self.font_size * TEXT_ADVANCE_EM
    }

    /// Box spanning one em above the baseline.
    pub fn bounds(&self) -> Rect {
        Rect::new(
            self.x,
            self.y - self.font_size,
            self.x + self.estimated_width(),
            self.y,
        )
    }

    pub fn hit_test(&self, point: Point) -> bool {
        let b = self.bounds();
        point.x >= b.x0 && point.x <= b.x1 && point.y >= b.y0 && point.y <= b.y1
    }

    pub fn translate(&mut self, delta: Vec2) {
        self.x += delta.x;
        self.y += delta.y;
    }
}
