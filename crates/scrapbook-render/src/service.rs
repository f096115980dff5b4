//! Thumbnail rendering and publishing.

use crate::assets::{AssetLoader, load_images};
use crate::encode::encode_png;
use crate::error::{RenderError, RenderResult};
use crate::layout::compute_layout;
use crate::options::ThumbnailOptions;
use crate::raster::{load_font, rasterize};
use ab_glyph::FontArc;
use chrono::Utc;
use scrapbook_core::storage::{BlobStore, BoxFuture};
use scrapbook_core::{Element, EngineResult, ThumbnailPublisher};
use std::sync::Arc;

/// Renders scrapbook thumbnails and uploads them to blob storage.
pub struct ThumbnailService {
    blobs: Arc<dyn BlobStore>,
    assets: Arc<dyn AssetLoader>,
    options: ThumbnailOptions,
    font: Option<FontArc>,
}

impl ThumbnailService {
    /// Fails only if a configured font cannot be loaded.
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        assets: Arc<dyn AssetLoader>,
        options: ThumbnailOptions,
    ) -> RenderResult<Self> {
        let font = options.font_path.as_ref().map(load_font).transpose()?;
        Ok(Self {
            blobs,
            assets,
            options,
            font,
        })
    }

    pub fn options(&self) -> &ThumbnailOptions {
        &self.options
    }

    /// Render `elements` to PNG bytes, waiting for images up to the
    /// configured timeout.
    pub async fn render(&self, elements: &[Element]) -> RenderResult<Vec<u8>> {
        let images = load_images(self.assets.as_ref(), elements, self.options.image_timeout()).await;
        let layout = compute_layout(elements, &self.options);
        log::debug!(
            "Rendering thumbnail: {} elements, {} images, scale {:.3}",
            elements.len(),
            images.len(),
            layout.scale
        );
        let pixmap = rasterize(elements, &layout, &self.options, &images, self.font.as_ref())?;
        encode_png(&pixmap)
    }

    async fn upload(&self, scrapbook_id: &str, png: Vec<u8>) -> RenderResult<String> {
        let path = format!(
            "scrapbooks/{}/thumbnail_{}.png",
            scrapbook_id,
            Utc::now().timestamp_millis()
        );
        let blob = self
            .blobs
            .upload(&path, png, "image/png")
            .await
            .map_err(|e| RenderError::Upload(e.to_string()))?;
        self.blobs
            .public_url(&blob)
            .await
            .map_err(|e| RenderError::Upload(e.to_string()))
    }
}

impl ThumbnailPublisher for ThumbnailService {
    fn publish<'a>(
        &'a self,
        scrapbook_id: &'a str,
        elements: &'a [Element],
    ) -> BoxFuture<'a, EngineResult<String>> {
        Box::pin(async move {
            let png = self.render(elements).await?;
            let url = self.upload(scrapbook_id, png).await?;
            log::info!("Published thumbnail for {}: {}", scrapbook_id, url);
            Ok(url)
        })
    }
}
