//! CPU rasterization of scrapbook elements with tiny-skia.

use crate::assets::ImageCache;
use crate::error::{RenderError, RenderResult};
use crate::layout::ThumbnailLayout;
use crate::options::ThumbnailOptions;
use ab_glyph::{Font, FontArc, ScaleFont, point};
use kurbo::Point;
use scrapbook_core::elements::TEXT_ADVANCE_EM;
use scrapbook_core::{Element, ImageElement, PathElement, Rgba, TextElement};
use std::path::Path;
use tiny_skia::{
    FilterQuality, LineCap, LineJoin, Mask, Paint, PathBuilder, Pixmap, PixmapPaint,
    Rect as SkiaRect, Stroke, Transform,
};

/// Load a TrueType/OpenType font for thumbnail text.
pub fn load_font(path: impl AsRef<Path>) -> RenderResult<FontArc> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|e| RenderError::Font(format!("{}: {}", path.display(), e)))?;
    FontArc::try_from_vec(bytes).map_err(|e| RenderError::Font(format!("{}: {}", path.display(), e)))
}

/// Draw `elements` in document order onto a fresh target.
///
/// Images missing from `images` are skipped. Without a font, text is drawn
/// as a translucent bar covering its estimated extent.
pub fn rasterize(
    elements: &[Element],
    layout: &ThumbnailLayout,
    options: &ThumbnailOptions,
    images: &ImageCache,
    font: Option<&FontArc>,
) -> RenderResult<Pixmap> {
    let mut pixmap = Pixmap::new(options.width, options.height)
        .ok_or(RenderError::EmptyTarget(options.width, options.height))?;

    let bg = Rgba::parse(&options.background).unwrap_or(Rgba::white());
    pixmap.fill(tiny_skia::Color::from_rgba8(bg.r, bg.g, bg.b, bg.a));

    let s = layout.scale as f32;
    let transform = Transform::from_row(s, 0.0, 0.0, s, layout.offset.x as f32, layout.offset.y as f32);

    for element in elements {
        match element {
            Element::Path(path) => draw_path(&mut pixmap, path, transform, options),
            Element::Image(image) => draw_image(&mut pixmap, image, images, transform),
            Element::Text(text) => draw_text(&mut pixmap, text, layout, options, font),
        }
    }
    Ok(pixmap)
}

fn paint_for(color: &str) -> Paint<'static> {
    let c = Rgba::parse_or_black(color);
    let mut paint = Paint::default();
    paint.set_color_rgba8(c.r, c.g, c.b, c.a);
    paint.anti_alias = true;
    paint
}

fn draw_path(pixmap: &mut Pixmap, path: &PathElement, transform: Transform, options: &ThumbnailOptions) {
    let Some((first, rest)) = path.points.split_first() else {
        return;
    };
    if rest.is_empty() {
        return;
    }

    let mut pb = PathBuilder::new();
    pb.move_to(first.x as f32, first.y as f32);
    for p in rest {
        pb.line_to(p.x as f32, p.y as f32);
    }
    let Some(skia_path) = pb.finish() else {
        return;
    };

    let stroke = Stroke {
        width: (path.width * options.stroke_multiplier) as f32,
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..Default::default()
    };
    pixmap.stroke_path(&skia_path, &paint_for(&path.color), &stroke, transform, None);
}

fn draw_image(pixmap: &mut Pixmap, image: &ImageElement, images: &ImageCache, transform: Transform) {
    let Some(bitmap) = images.get(&image.src) else {
        return;
    };
    let natural_w = f64::from(bitmap.width());
    let natural_h = f64::from(bitmap.height());
    let w = if image.width > 0.0 { image.width } else { natural_w };
    let h = if image.height > 0.0 { image.height } else { natural_h };

    let placed = transform
        .pre_translate(image.x as f32, image.y as f32)
        .pre_scale((w / natural_w) as f32, (h / natural_h) as f32);
    let paint = PixmapPaint {
        quality: FilterQuality::Bilinear,
        ..Default::default()
    };
    pixmap.draw_pixmap(0, 0, bitmap.as_ref(), &paint, placed, None);
}

fn draw_text(
    pixmap: &mut Pixmap,
    text: &TextElement,
    layout: &ThumbnailLayout,
    options: &ThumbnailOptions,
    font: Option<&FontArc>,
) {
    if text.text.is_empty() {
        return;
    }
    // Glyphs are rasterized directly at target resolution.
    let px_size = (text.font_size * options.font_multiplier * layout.scale) as f32;
    let origin = layout.to_target(Point::new(text.x, text.y));
    let paint = paint_for(&text.color);

    match font {
        Some(font) => {
            let Some(mask) = glyph_mask(pixmap.width(), pixmap.height(), font, &text.text, px_size, origin)
            else {
                return;
            };
            if let Some(full) = SkiaRect::from_xywh(0.0, 0.0, pixmap.width() as f32, pixmap.height() as f32) {
                pixmap.fill_rect(full, &paint, Transform::identity(), Some(&mask));
            }
        }
        None => {
            let width = text.text.chars().count() as f32 * TEXT_ADVANCE_EM as f32 * px_size;
            let bar = SkiaRect::from_xywh(
                origin.x as f32,
                origin.y as f32 - px_size * 0.7,
                width.max(1.0),
                px_size * 0.5,
            );
            if let Some(bar) = bar {
                let c = Rgba::parse_or_black(&text.color);
                let mut faded = paint;
                faded.set_color_rgba8(c.r, c.g, c.b, c.a / 3);
                pixmap.fill_rect(bar, &faded, Transform::identity(), None);
            }
        }
    }
}

fn glyph_mask(
    width: u32,
    height: u32,
    font: &FontArc,
    text: &str,
    px_size: f32,
    origin: Point,
) -> Option<Mask> {
    let mut mask = Mask::new(width, height)?;
    let data = mask.data_mut();
    let scaled = font.as_scaled(px_size);

    let mut caret = origin.x as f32;
    let baseline = origin.y as f32;
    let mut prev = None;
    for ch in text.chars() {
        let id = scaled.glyph_id(ch);
        if let Some(prev) = prev {
            caret += scaled.kern(prev, id);
        }
        let glyph = id.with_scale_and_position(px_size, point(caret, baseline));
        caret += scaled.h_advance(id);
        prev = Some(id);

        let Some(outlined) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        outlined.draw(|gx, gy, coverage| {
            let x = bounds.min.x as i64 + i64::from(gx);
            let y = bounds.min.y as i64 + i64::from(gy);
            if x < 0 || y < 0 || x >= i64::from(width) || y >= i64::from(height) {
                return;
            }
            let idx = (y * i64::from(width) + x) as usize;
            let value = (coverage.clamp(0.0, 1.0) * 255.0).round() as u8;
            data[idx] = data[idx].max(value);
        });
    }
    Some(mask)
}
