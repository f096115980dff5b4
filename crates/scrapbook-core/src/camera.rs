//! View offset for panning.

use kurbo::{Affine, Point, Vec2};
use serde::{Deserialize, Serialize};

/// Translation applied to the canvas when displayed. Panning never touches
/// the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub offset: Vec2,
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transform from canvas to screen coordinates.
    pub fn transform(&self) -> Affine {
        Affine::translate(self.offset)
    }

    pub fn screen_to_world(&self, screen_point: Point) -> Point {
        screen_point - self.offset
    }

    pub fn world_to_screen(&self, world_point: Point) -> Point {
        world_point + self.offset
    }

    /// Pan by a delta in screen coordinates.
    pub fn pan(&mut self, delta: Vec2) {
        self.offset += delta;
    }

    pub fn reset(&mut self) {
        self.offset = Vec2::ZERO;
    }
}
