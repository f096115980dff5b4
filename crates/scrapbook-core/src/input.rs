//! Pointer input for mouse and touch.

use kurbo::{Point, Size};
use serde::{Deserialize, Serialize};

/// Phase of a pointer gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
}

/// Device that produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PointerSource {
    #[default]
    Mouse,
    Touch,
}

/// A pointer event relative to the top-left of the rendered canvas surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    pub phase: PointerPhase,
    pub position: Point,
    pub source: PointerSource,
}

impl PointerEvent {
    pub fn mouse(phase: PointerPhase, x: f64, y: f64) -> Self {
        Self {
            phase,
            position: Point::new(x, y),
            source: PointerSource::Mouse,
        }
    }

    pub fn touch(phase: PointerPhase, x: f64, y: f64) -> Self {
        Self {
            phase,
            position: Point::new(x, y),
            source: PointerSource::Touch,
        }
    }
}

/// Maps surface positions onto the logical canvas.
///
/// The canvas may be displayed at a different size than its logical extent.
/// Touch positions are scaled by `canvas_size / displayed_size` per axis;
/// mouse positions are taken as canvas coordinates directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceMapping {
    pub canvas_size: f64,
    /// Displayed size of the canvas, if known.
    pub displayed: Option<Size>,
}

impl SurfaceMapping {
    pub fn new(canvas_size: f64) -> Self {
        Self {
            canvas_size,
            displayed: None,
        }
    }

    pub fn to_canvas(&self, event: &PointerEvent) -> Point {
        match (event.source, self.displayed) {
            (PointerSource::Touch, Some(size)) if size.width > 0.0 && size.height > 0.0 => Point::new(
                event.position.x * self.canvas_size / size.width,
                event.position.y * self.canvas_size / size.height,
            ),
            _ => event.position,
        }
    }
}
