//! Fitting scrapbook content into the thumbnail target.

use crate::options::ThumbnailOptions;
use kurbo::{Affine, Point, Rect, Vec2};
use scrapbook_core::Element;
use scrapbook_core::geometry::union_bounds;

/// Placement of canvas content inside the thumbnail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThumbnailLayout {
    /// Padded and clamped content bounds in canvas units, if there is content.
    pub bounds: Option<Rect>,
    pub scale: f64,
    /// Target-pixel offset applied after scaling.
    pub offset: Vec2,
}

impl ThumbnailLayout {
    /// Canvas units to target pixels.
    pub fn transform(&self) -> Affine {
        Affine::translate(self.offset) * Affine::scale(self.scale)
    }

    pub fn to_target(&self, point: Point) -> Point {
        self.transform() * point
    }
}

/// Compute scale and centering for `elements`.
///
/// The union of element bounds is padded, clamped to the canvas, then fit
/// into the target minus its margin. Content with no area falls back to the
/// empty-content scale. The scale never drops below the configured floor.
pub fn compute_layout(elements: &[Element], options: &ThumbnailOptions) -> ThumbnailLayout {
    let target_w = f64::from(options.width);
    let target_h = f64::from(options.height);

    let Some(content) = union_bounds(elements.iter().filter_map(Element::bounds)) else {
        return ThumbnailLayout {
            bounds: None,
            scale: options.empty_scale.max(options.min_scale),
            offset: Vec2::ZERO,
        };
    };

    let pad = options.padding;
    let bounds = Rect::new(
        (content.x0 - pad).max(0.0),
        (content.y0 - pad).max(0.0),
        (content.x1 + pad).min(options.canvas_size),
        (content.y1 + pad).min(options.canvas_size),
    );
    let (w, h) = (bounds.width(), bounds.height());

    let scale = if w <= 0.0 || h <= 0.0 {
        options.empty_scale
    } else {
        ((target_w - options.margin) / w).min((target_h - options.margin) / h)
    }
    .max(options.min_scale);

    let offset = Vec2::new(
        (target_w - w * scale) / 2.0 - bounds.x0 * scale,
        (target_h - h * scale) / 2.0 - bounds.y0 * scale,
    );

    ThumbnailLayout {
        bounds: Some(bounds),
        scale,
        offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapbook_core::{ElementId, ImageElement, PathElement};

    fn line(points: &[(f64, f64)]) -> Element {
        Element::Path(PathElement {
            id: ElementId::from("p"),
            points: points.iter().map(|&(x, y)| Point::new(x, y)).collect(),
            color: "#000000".into(),
            width: 2.0,
        })
    }

    #[test]
    fn test_wide_content_is_fit_and_centered() {
        // 1000x500 of content before padding.
        let elements = vec![line(&[(100.0, 100.0), (1100.0, 600.0)])];
        let opts = ThumbnailOptions::default();
        let layout = compute_layout(&elements, &opts);

        assert!(layout.scale <= 0.26);
        assert!((layout.scale - 0.25).abs() < 1e-9);

        let bounds = layout.bounds.unwrap();
        let mid = layout.to_target(bounds.center());
        assert!((mid.x - 150.0).abs() < 1e-9);
        assert!((mid.y - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_padding_is_clamped_to_canvas() {
        let elements = vec![line(&[(5.0, 5.0), (50.0, 50.0)])];
        let layout = compute_layout(&elements, &ThumbnailOptions::default());
        let bounds = layout.bounds.unwrap();
        assert_eq!(bounds.x0, 0.0);
        assert_eq!(bounds.y0, 0.0);
        assert_eq!(bounds.x1, 70.0);
    }

    #[test]
    fn test_empty_content_uses_default_scale() {
        let layout = compute_layout(&[], &ThumbnailOptions::default());
        assert_eq!(layout.scale, 0.5);
        assert!(layout.bounds.is_none());
    }

    #[test]
    fn test_huge_content_hits_scale_floor() {
        let image = ImageElement::placed(
            ElementId::from("i"),
            "memory://x",
            Point::new(0.0, 0.0),
            4096.0,
            4096.0,
            4096.0,
        );
        let layout = compute_layout(&[Element::Image(image)], &ThumbnailOptions::default());
        assert_eq!(layout.scale, 0.1);
    }
}
