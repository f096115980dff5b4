//! Placed image element.

use super::ElementId;
use kurbo::{Point, Rect, Vec2};
use serde::{Deserialize, Serialize};

/// An image placed on the canvas, referenced by URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageElement {
    pub id: ElementId,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub src: String,
    /// Natural pixel size of the source, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_height: Option<f64>,
}

impl ImageElement {
    /// Place an image at `origin`, `display_width` wide, keeping the natural
    /// aspect ratio.
    pub fn placed(
        id: ElementId,
        src: impl Into<String>,
        origin: Point,
        display_width: f64,
        natural_width: f64,
        natural_height: f64,
    ) -> Self {
        let height = if natural_width > 0.0 {
            display_width * natural_height / natural_width
        } else {
            display_width
        };
        Self {
            id,
            x: origin.x,
            y: origin.y,
            width: display_width,
            height,
            src: src.into(),
            original_width: Some(natural_width),
            original_height: Some(natural_height),
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, self.x + self.width, self.y + self.height)
    }

    pub fn hit_test(&self, point: Point) -> bool {
        self.bounds().contains(point)
    }

    pub fn translate(&mut self, delta: Vec2) {
        self.x += delta.x;
        self.y += delta.y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placed_keeps_aspect_ratio() {
        let img = ImageElement::placed(
            ElementId::from("i"),
            "https://example.com/a.png",
            Point::new(100.0, 100.0),
            200.0,
            800.0,
            600.0,
        );
        assert_eq!(img.width, 200.0);
        assert_eq!(img.height, 150.0);
        assert_eq!(img.original_width, Some(800.0));
        assert!(img.hit_test(Point::new(150.0, 200.0)));
        assert!(!img.hit_test(Point::new(99.0, 200.0)));
    }
}
