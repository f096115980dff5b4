//! Geometry helpers shared by hit-testing, the eraser and the thumbnail renderer.

use kurbo::{Point, Rect, Vec2};

/// Distance from a point to a line segment.
pub fn point_to_segment_dist(point: Point, a: Point, b: Point) -> f64 {
    let seg = b - a;
    let pv = point - a;
    let len_sq = seg.hypot2();
    if len_sq < f64::EPSILON {
        return pv.hypot();
    }
    let t = (pv.dot(seg) / len_sq).clamp(0.0, 1.0);
    let proj = a + seg * t;
    (point - proj).hypot()
}

/// Minimum distance from a point to a polyline (sequence of connected segments).
pub fn point_to_polyline_dist(point: Point, points: &[Point]) -> f64 {
    points
        .windows(2)
        .map(|w| point_to_segment_dist(point, w[0], w[1]))
        .fold(f64::INFINITY, f64::min)
}

/// Parameter interval `[t0, t1]` (clamped to `[0, 1]`) of the segment `a..b`
/// that lies strictly inside the circle, or `None` if the segment stays
/// outside it.
pub fn segment_circle_interval(a: Point, b: Point, center: Point, radius: f64) -> Option<(f64, f64)> {
    if point_to_segment_dist(center, a, b) >= radius {
        return None;
    }

    let d: Vec2 = b - a;
    let f: Vec2 = a - center;
    let qa = d.hypot2();
    if qa < f64::EPSILON {
        // Degenerate segment already known to be inside.
        return Some((0.0, 1.0));
    }
    let qb = 2.0 * f.dot(d);
    let qc = f.hypot2() - radius * radius;
    let disc = (qb * qb - 4.0 * qa * qc).max(0.0).sqrt();

    let t0 = ((-qb - disc) / (2.0 * qa)).clamp(0.0, 1.0);
    let t1 = ((-qb + disc) / (2.0 * qa)).clamp(0.0, 1.0);
    Some((t0, t1))
}

/// Point at parameter `t` along `a..b`.
pub fn lerp(a: Point, b: Point, t: f64) -> Point {
    a + (b - a) * t
}

/// Bounding box of a point list, or `None` when empty.
pub fn points_bounds(points: &[Point]) -> Option<Rect> {
    let (first, rest) = points.split_first()?;
    Some(
        rest.iter()
            .fold(Rect::from_points(*first, *first), |r, p| r.union_pt(*p)),
    )
}

/// Union of rectangles, or `None` when there are none.
pub fn union_bounds(rects: impl IntoIterator<Item = Rect>) -> Option<Rect> {
    rects.into_iter().reduce(|acc, r| acc.union(r))
}
