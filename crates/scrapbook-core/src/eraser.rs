//! Eraser: cuts stroke geometry under a circular cursor.
//!
//! Segments that come closer than the radius to the cursor are clipped at the
//! circle boundary. The surviving runs become separate strokes; runs with fewer
//! than two points are dropped.

use crate::elements::{Element, ElementId};
use crate::geometry::{lerp, point_to_segment_dist, segment_circle_interval};
use kurbo::Point;
use std::collections::HashSet;

/// Clipped pieces shorter than this (in segment parameter space) are ignored.
const CLIP_EPSILON: f64 = 1e-9;

/// Segments reaching less than this far inside the circle are left alone.
/// Endpoints produced by an earlier cut sit on the boundary, give or take
/// rounding.
const GRAZE_EPSILON: f64 = 1e-6;

/// Result of one eraser application.
#[derive(Debug, Clone, PartialEq)]
pub struct EraseOutcome {
    pub elements: Vec<Element>,
    /// Whether any stroke was cut or removed.
    pub changed: bool,
}

/// Apply the eraser at `center` to every stroke in `elements`.
///
/// Untouched elements are returned unchanged and keep their ids. A stroke cut
/// into several pieces is replaced in place by those pieces, each with an id
/// derived from the original.
pub fn erase(elements: &[Element], center: Point, radius: f64) -> EraseOutcome {
    let mut taken: HashSet<ElementId> = elements.iter().map(|el| el.id().clone()).collect();
    let mut out = Vec::with_capacity(elements.len());
    let mut changed = false;

    for element in elements {
        let Element::Path(path) = element else {
            out.push(element.clone());
            continue;
        };
        let Some(mut pieces) = split_points(&path.points, center, radius) else {
            out.push(element.clone());
            continue;
        };

        changed = true;
        if pieces.len() == 1 {
            if let Some(points) = pieces.pop() {
                out.push(Element::Path(path.with_points(path.id.clone(), points)));
            }
            continue;
        }
        for (index, points) in pieces.into_iter().enumerate() {
            let id = path.id.derive(index, &taken);
            taken.insert(id.clone());
            out.push(Element::Path(path.with_points(id, points)));
        }
    }

    EraseOutcome { elements: out, changed }
}

/// Split a polyline around the eraser circle.
///
/// Returns `None` when no segment touches the circle, otherwise the surviving
/// runs (possibly none).
fn split_points(points: &[Point], center: Point, radius: f64) -> Option<Vec<Vec<Point>>> {
    if points.len() < 2 {
        return None;
    }

    let mut touched = false;
    let mut pieces = Vec::new();
    let mut current: Vec<Point> = Vec::new();

    for w in points.windows(2) {
        let (a, b) = (w[0], w[1]);
        let grazing = point_to_segment_dist(center, a, b) >= radius - GRAZE_EPSILON;
        let cut = if grazing {
            None
        } else {
            segment_circle_interval(a, b, center, radius)
        };
        match cut {
            None => {
                if current.is_empty() {
                    current.push(a);
                }
                current.push(b);
            }
            Some((t0, t1)) => {
                touched = true;
                if t0 > CLIP_EPSILON {
                    if current.is_empty() {
                        current.push(a);
                    }
                    current.push(lerp(a, b, t0));
                }
                flush(&mut current, &mut pieces);
                if t1 < 1.0 - CLIP_EPSILON {
                    current.push(lerp(a, b, t1));
                    current.push(b);
                }
            }
        }
    }
    flush(&mut current, &mut pieces);

    if !touched || (pieces.len() == 1 && pieces[0] == points) {
        return None;
    }
    Some(pieces)
}

fn flush(current: &mut Vec<Point>, pieces: &mut Vec<Vec<Point>>) {
    if current.len() >= 2 {
        pieces.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{PathElement, TextElement};

    fn path(id: &str, points: &[(f64, f64)]) -> PathElement {
        PathElement {
            id: ElementId::from(id),
            points: points.iter().map(|&(x, y)| Point::new(x, y)).collect(),
            color: "#336699".into(),
            width: 4.0,
        }
    }

    fn erase_path(path: &PathElement, center: Point, radius: f64) -> Vec<PathElement> {
        erase(&[Element::Path(path.clone())], center, radius)
            .elements
            .into_iter()
            .filter_map(|el| match el {
                Element::Path(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_path_inside_radius_is_removed() {
        let elements = vec![Element::Path(path("p", &[(0.0, 0.0), (3.0, 0.0), (3.0, 3.0)]))];
        let outcome = erase(&elements, Point::new(1.0, 1.0), 10.0);
        assert!(outcome.changed);
        assert!(outcome.elements.is_empty());
    }

    #[test]
    fn test_middle_of_straight_path_splits_in_two() {
        let center = Point::new(50.0, 0.0);
        let radius = 10.0;
        let pieces = erase_path(&path("p", &[(0.0, 0.0), (50.0, 0.0), (100.0, 0.0)]), center, radius);

        assert_eq!(pieces.len(), 2);
        for piece in &pieces {
            assert!(piece.points.len() >= 2);
            assert_eq!(piece.color, "#336699");
            assert_eq!(piece.width, 4.0);
            for p in &piece.points {
                assert!((*p - center).hypot() >= radius - 1e-9);
            }
        }
        assert_eq!(pieces[0].id, ElementId::from("p-0"));
        assert_eq!(pieces[1].id, ElementId::from("p-1"));
        assert!((pieces[0].points[1].x - 40.0).abs() < 1e-9);
        assert!((pieces[1].points[0].x - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_untouched_elements_are_kept() {
        let text = Element::Text(TextElement {
            id: ElementId::from("t"),
            x: 50.0,
            y: 0.0,
            text: "under the eraser".into(),
            font_size: 16.0,
            font_family: "Arial".into(),
            color: "#000000".into(),
        });
        let far = Element::Path(path("far", &[(0.0, 100.0), (100.0, 100.0)]));
        let elements = vec![far.clone(), text.clone()];

        let outcome = erase(&elements, Point::new(50.0, 0.0), 10.0);
        assert!(!outcome.changed);
        assert_eq!(outcome.elements, elements);
    }

    #[test]
    fn test_clipped_end_keeps_id() {
        let pieces = erase_path(&path("p", &[(0.0, 0.0), (100.0, 0.0)]), Point::new(0.0, 0.0), 10.0);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].id, ElementId::from("p"));
        assert!((pieces[0].points[0].x - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_paint_order_preserved() {
        let elements = vec![
            Element::Path(path("a", &[(0.0, 0.0), (100.0, 0.0)])),
            Element::Path(path("b", &[(0.0, 50.0), (100.0, 50.0)])),
        ];
        let outcome = erase(&elements, Point::new(50.0, 0.0), 5.0);
        let ids: Vec<String> = outcome.elements.iter().map(|el| el.id().to_string()).collect();
        assert_eq!(ids, vec!["a-0", "a-1", "b"]);
    }

    #[test]
    fn test_repeated_splits_stay_unique() {
        let first = erase(
            &[Element::Path(path("p", &[(0.0, 0.0), (300.0, 0.0)]))],
            Point::new(100.0, 0.0),
            5.0,
        );
        let second = erase(&first.elements, Point::new(200.0, 0.0), 5.0);
        let ids: HashSet<String> = second.elements.iter().map(|el| el.id().to_string()).collect();
        assert_eq!(ids.len(), second.elements.len());
        assert_eq!(second.elements.len(), 3);
    }

    #[test]
    fn test_erasing_same_spot_twice_is_a_no_op() {
        let center = Point::new(50.0, 3.0);
        let first = erase(&[Element::Path(path("p", &[(0.0, 0.0), (100.0, 0.0)]))], center, 7.0);
        assert!(first.changed);
        assert_eq!(first.elements.len(), 2);

        let second = erase(&first.elements, center, 7.0);
        assert!(!second.changed);
        assert_eq!(second.elements, first.elements);

        let third = erase(&second.elements, center, 7.0);
        assert!(!third.changed);
    }

    #[test]
    fn test_dot_inside_radius_is_removed() {
        let elements = vec![Element::Path(path("dot", &[(5.0, 5.0), (5.0, 5.0)]))];
        let outcome = erase(&elements, Point::new(6.0, 5.0), 10.0);
        assert!(outcome.changed);
        assert!(outcome.elements.is_empty());
    }

    #[test]
    fn test_single_point_path_is_ignored() {
        assert_eq!(split_points(&[Point::ZERO], Point::ZERO, 10.0), None);
    }
}
