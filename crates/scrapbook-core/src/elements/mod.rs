//! Element definitions for the canvas.
//!
//! Elements are a closed set of variants discriminated on the wire by a
//! `type` field. Paint order is list order: later elements draw on top.

mod color;
mod image;
mod path;
mod text;

pub use color::Rgba;
pub use image::ImageElement;
pub use path::PathElement;
pub use text::{TEXT_ADVANCE_EM, TextElement};

use crate::error::{EngineError, EngineResult};
use kurbo::{Point, Rect, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

pub(crate) fn default_color() -> String {
    "#000000".to_string()
}

/// Identifier of an element, unique within a scrapbook.
///
/// Older documents use numeric timestamp ids; those keep their numeric
/// representation on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementId {
    Number(u64),
    Text(String),
}

impl ElementId {
    /// A fresh random id.
    pub fn generate() -> Self {
        ElementId::Text(Uuid::new_v4().to_string())
    }

    /// Id for the `index`-th piece of a split element, unique among `taken`.
    pub fn derive(&self, index: usize, taken: &HashSet<ElementId>) -> Self {
        let candidate = ElementId::Text(format!("{}-{}", self, index));
        if taken.contains(&candidate) {
            Self::generate()
        } else {
            candidate
        }
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementId::Number(n) => write!(f, "{}", n),
            ElementId::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        ElementId::Text(value.to_string())
    }
}

impl From<String> for ElementId {
    fn from(value: String) -> Self {
        ElementId::Text(value)
    }
}

impl From<u64> for ElementId {
    fn from(value: u64) -> Self {
        ElementId::Number(value)
    }
}

/// One drawable unit on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    Path(PathElement),
    Image(ImageElement),
    Text(TextElement),
}

impl Element {
    pub fn id(&self) -> &ElementId {
        match self {
            Element::Path(p) => &p.id,
            Element::Image(i) => &i.id,
            Element::Text(t) => &t.id,
        }
    }

    /// Axis-aligned bounds. Empty paths have none.
    pub fn bounds(&self) -> Option<Rect> {
        match self {
            Element::Path(p) => p.bounds(),
            Element::Image(i) => Some(i.bounds()),
            Element::Text(t) => Some(t.bounds()),
        }
    }

    /// Paths hit within `tolerance` of a segment; images and text by box containment.
    pub fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        match self {
            Element::Path(p) => p.hit_test(point, tolerance),
            Element::Image(i) => i.hit_test(point),
            Element::Text(t) => t.hit_test(point),
        }
    }

    pub fn translate(&mut self, delta: Vec2) {
        match self {
            Element::Path(p) => p.translate(delta),
            Element::Image(i) => i.translate(delta),
            Element::Text(t) => t.translate(delta),
        }
    }

    /// Whether the element is worth keeping in the document.
    pub fn is_valid(&self) -> bool {
        match self {
            Element::Path(p) => p.is_valid(),
            Element::Image(_) | Element::Text(_) => true,
        }
    }

    fn coordinates_finite(&self) -> bool {
        match self {
            Element::Path(p) => p
                .points
                .iter()
                .all(|pt| pt.x.is_finite() && pt.y.is_finite())
                && p.width.is_finite(),
            Element::Image(i) => [i.x, i.y, i.width, i.height].iter().all(|v| v.is_finite()),
            Element::Text(t) => [t.x, t.y, t.font_size].iter().all(|v| v.is_finite()),
        }
    }
}

/// Index of the topmost element under `point`.
pub fn hit_test_topmost(elements: &[Element], point: Point, tolerance: f64) -> Option<usize> {
    elements.iter().rposition(|el| el.hit_test(point, tolerance))
}

/// Drop paths with fewer than two points.
pub fn prune_elements(mut elements: Vec<Element>) -> Vec<Element> {
    elements.retain(Element::is_valid);
    elements
}

/// Decode an untrusted `elements` payload.
pub fn parse_elements(value: &serde_json::Value) -> EngineResult<Vec<Element>> {
    if !value.is_array() {
        return Err(EngineError::ValidationFailure(
            "elements must be an array".to_string(),
        ));
    }
    let elements: Vec<Element> = serde_json::from_value(value.clone())
        .map_err(|e| EngineError::ValidationFailure(format!("Malformed element: {}", e)))?;
    validate_elements(&elements)?;
    Ok(elements)
}

/// Reject duplicate ids and non-finite geometry.
pub fn validate_elements(elements: &[Element]) -> EngineResult<()> {
    let mut seen = HashSet::with_capacity(elements.len());
    for el in elements {
        if !seen.insert(el.id()) {
            return Err(EngineError::ValidationFailure(format!(
                "Duplicate element id {}",
                el.id()
            )));
        }
        if !el.coordinates_finite() {
            return Err(EngineError::ValidationFailure(format!(
                "Element {} has non-finite coordinates",
                el.id()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Vec<Element> {
        vec![
            Element::Path(PathElement {
                id: ElementId::Number(1_700_000_000_000),
                points: vec![Point::new(1.5, 2.0), Point::new(3.0, 4.25)],
                color: "#ff0000".into(),
                width: 3.0,
            }),
            Element::Path(PathElement {
                id: ElementId::from("empty"),
                points: vec![],
                color: "#000000".into(),
                width: 2.0,
            }),
            Element::Image(ImageElement {
                id: ElementId::from("img"),
                x: 10.0,
                y: 20.0,
                width: 200.0,
                height: 100.0,
                src: "https://example.com/a.png".into(),
                original_width: Some(400.0),
                original_height: None,
            }),
            Element::Text(TextElement {
                id: ElementId::from("txt"),
                x: 5.0,
                y: 6.0,
                text: String::new(),
                font_size: 16.0,
                font_family: "Arial".into(),
                color: "#000000".into(),
            }),
        ]
    }

    #[test]
    fn test_roundtrip_every_variant() {
        let elements = sample();
        let json = serde_json::to_string(&elements).unwrap();
        let back: Vec<Element> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, elements);
        // Re-serializing is stable.
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }

    #[test]
    fn test_wire_shape() {
        let value = serde_json::to_value(&sample()).unwrap();
        assert_eq!(value[0]["type"], "path");
        assert_eq!(value[0]["id"], 1_700_000_000_000u64);
        assert_eq!(value[1]["points"], json!([]));
        assert_eq!(value[1]["color"], "#000000");
        assert_eq!(value[1]["width"], 2.0);
        assert_eq!(value[2]["originalWidth"], 400.0);
        assert!(value[2].get("originalHeight").is_none());
        assert_eq!(value[3]["text"], "");
        assert_eq!(value[3]["fontFamily"], "Arial");
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let value = json!([
            {"id": "a", "type": "path"},
            {"id": "b", "type": "text", "x": 1, "y": 2},
            {"id": "c", "type": "image", "src": "x.png", "isLoading": true}
        ]);
        let elements = parse_elements(&value).unwrap();
        match &elements[0] {
            Element::Path(p) => {
                assert!(p.points.is_empty());
                assert_eq!(p.color, "#000000");
                assert_eq!(p.width, 2.0);
            }
            other => panic!("expected path, got {:?}", other),
        }
        match &elements[1] {
            Element::Text(t) => {
                assert_eq!(t.text, "");
                assert_eq!(t.font_size, 16.0);
            }
            other => panic!("expected text, got {:?}", other),
        }
        assert!(matches!(&elements[2], Element::Image(i) if i.width == 0.0));
    }

    #[test]
    fn test_non_array_rejected() {
        let err = parse_elements(&json!({"id": "a"})).unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailure(_)));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = parse_elements(&json!([{"id": "a", "type": "sticker"}])).unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailure(_)));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let value = json!([
            {"id": "a", "type": "text"},
            {"id": "a", "type": "text"}
        ]);
        assert!(matches!(
            parse_elements(&value),
            Err(EngineError::ValidationFailure(_))
        ));
    }

    #[test]
    fn test_prune_drops_short_paths() {
        let pruned = prune_elements(sample());
        assert_eq!(pruned.len(), 3);
        assert!(pruned.iter().all(|el| el.id() != &ElementId::from("empty")));
    }

    #[test]
    fn test_topmost_hit_wins() {
        let mut elements = sample();
        elements.push(Element::Image(ImageElement {
            id: ElementId::from("top"),
            x: 0.0,
            y: 0.0,
            width: 500.0,
            height: 500.0,
            src: String::new(),
            original_width: None,
            original_height: None,
        }));
        let idx = hit_test_topmost(&elements, Point::new(50.0, 50.0), 5.0).unwrap();
        assert_eq!(elements[idx].id(), &ElementId::from("top"));
        assert_eq!(hit_test_topmost(&elements, Point::new(900.0, 900.0), 5.0), None);
    }

    #[test]
    fn test_derived_id_avoids_collisions() {
        let original = ElementId::from("a");
        let mut taken = HashSet::new();
        assert_eq!(original.derive(0, &taken), ElementId::from("a-0"));
        taken.insert(ElementId::from("a-0"));
        let fresh = original.derive(0, &taken);
        assert_ne!(fresh, ElementId::from("a-0"));
    }
}
