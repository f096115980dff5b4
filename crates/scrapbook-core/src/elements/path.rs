//! Freehand stroke element.

use super::{ElementId, default_color};
use crate::geometry::{point_to_polyline_dist, points_bounds};
use kurbo::{Point, Rect, Vec2};
use serde::{Deserialize, Serialize};

fn default_width() -> f64 {
    2.0
}

/// A polyline stroke. Needs at least two points to be drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathElement {
    pub id: ElementId,
    /// Ordered points; always serialized, possibly empty.
    #[serde(default)]
    pub points: Vec<Point>,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_width")]
    pub width: f64,
}

impl PathElement {
    /// Start a stroke with a single point.
    pub fn start(id: ElementId, at: Point, color: impl Into<String>, width: f64) -> Self {
        Self {
            id,
            points: vec![at],
            color: color.into(),
            width,
        }
    }

    /// A sibling stroke carrying the same style.
    pub fn with_points(&self, id: ElementId, points: Vec<Point>) -> Self {
        Self {
            id,
            points,
            color: self.color.clone(),
            width: self.width,
        }
    }

    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    /// Whether the stroke has enough points to be kept.
    pub fn is_valid(&self) -> bool {
        self.points.len() >= 2
    }

    pub fn bounds(&self) -> Option<Rect> {
        points_bounds(&self.points)
    }

    pub fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        point_to_polyline_dist(point, &self.points) <= tolerance
    }

    pub fn translate(&mut self, delta: Vec2) {
        for p in &mut self.points {
            *p += delta;
        }
    }
}
