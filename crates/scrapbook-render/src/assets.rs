//! Fetching and decoding image assets for thumbnails.
//!
//! Every image is loaded concurrently and bounded by a timeout. Anything that
//! fails to arrive or decode is logged and left out of the thumbnail.

use base64::Engine as _;
use futures_util::future::join_all;
use scrapbook_core::storage::BoxFuture;
use scrapbook_core::{Element, EngineError, EngineResult};
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tiny_skia::{ColorU8, Pixmap};

/// Decoded images keyed by element `src`.
pub type ImageCache = HashMap<String, Pixmap>;

/// Source of raw image bytes.
pub trait AssetLoader: Send + Sync {
    fn fetch<'a>(&'a self, src: &'a str) -> BoxFuture<'a, EngineResult<Vec<u8>>>;
}

fn asset_error(src: &str, reason: impl Display) -> EngineError {
    EngineError::AssetLoadFailure {
        src: src.to_string(),
        reason: reason.to_string(),
    }
}

/// Loads `http(s)://` and `data:` URLs.
///
/// `file://` URLs are refused unless a file root is set, and then only
/// resolve to files under that root. Element sources are written by any
/// collaborator, so the root should be the blob directory and nothing wider.
#[derive(Debug, Clone, Default)]
pub struct HttpAssetLoader {
    client: reqwest::Client,
    file_root: Option<PathBuf>,
}

impl HttpAssetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            file_root: None,
        }
    }

    /// Allow `file://` sources under `root`, typically
    /// [`FileBlobStore::base_path`](scrapbook_core::storage::FileBlobStore::base_path).
    pub fn with_file_root(mut self, root: impl AsRef<Path>) -> std::io::Result<Self> {
        self.file_root = Some(std::fs::canonicalize(root)?);
        Ok(self)
    }

    async fn fetch_file(&self, src: &str, path: &str) -> EngineResult<Vec<u8>> {
        let Some(root) = self.file_root.clone() else {
            return Err(asset_error(src, "file URLs are not allowed"));
        };
        let path = PathBuf::from(path);
        tokio::task::spawn_blocking(move || {
            let resolved = std::fs::canonicalize(&path).map_err(|e| e.to_string())?;
            if !resolved.starts_with(&root) {
                return Err(format!("{} is outside {}", resolved.display(), root.display()));
            }
            std::fs::read(&resolved).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| asset_error(src, e))?
        .map_err(|e| asset_error(src, e))
    }

    async fn fetch_http(&self, src: &str) -> EngineResult<Vec<u8>> {
        let response = self
            .client
            .get(src)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| asset_error(src, e))?;
        let bytes = response.bytes().await.map_err(|e| asset_error(src, e))?;
        Ok(bytes.to_vec())
    }
}

impl AssetLoader for HttpAssetLoader {
    fn fetch<'a>(&'a self, src: &'a str) -> BoxFuture<'a, EngineResult<Vec<u8>>> {
        Box::pin(async move {
            if let Some(rest) = src.strip_prefix("data:") {
                return decode_data_url(src, rest);
            }
            if let Some(path) = src.strip_prefix("file://") {
                return self.fetch_file(src, path).await;
            }
            self.fetch_http(src).await
        })
    }
}

/// Decode the part of a `data:` URL after the scheme.
fn decode_data_url(src: &str, rest: &str) -> EngineResult<Vec<u8>> {
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| asset_error(src, "malformed data URL"))?;
    if meta.ends_with(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| asset_error(src, e))
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}

/// In-memory assets, keyed by `src`.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssetLoader {
    assets: HashMap<String, Vec<u8>>,
}

impl MemoryAssetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, src: impl Into<String>, bytes: Vec<u8>) {
        self.assets.insert(src.into(), bytes);
    }
}

impl AssetLoader for MemoryAssetLoader {
    fn fetch<'a>(&'a self, src: &'a str) -> BoxFuture<'a, EngineResult<Vec<u8>>> {
        Box::pin(async move {
            self.assets
                .get(src)
                .cloned()
                .ok_or_else(|| asset_error(src, "not found"))
        })
    }
}

/// Decode encoded image bytes into a premultiplied pixmap.
pub fn decode_image(src: &str, bytes: &[u8]) -> EngineResult<Pixmap> {
    let decoded = image::load_from_memory(bytes).map_err(|e| asset_error(src, e))?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height).ok_or_else(|| asset_error(src, "image has no pixels"))?;
    for (dst, px) in pixmap.pixels_mut().iter_mut().zip(rgba.pixels()) {
        *dst = ColorU8::from_rgba(px[0], px[1], px[2], px[3]).premultiply();
    }
    Ok(pixmap)
}

/// Fetch and decode every distinct image source in `elements`.
pub async fn load_images(loader: &dyn AssetLoader, elements: &[Element], timeout: Duration) -> ImageCache {
    let mut sources: Vec<&str> = elements
        .iter()
        .filter_map(|el| match el {
            Element::Image(image) => Some(image.src.as_str()),
            Element::Path(_) | Element::Text(_) => None,
        })
        .collect();
    sources.sort_unstable();
    sources.dedup();

    let loads = sources.into_iter().map(|src| async move {
        let result = match tokio::time::timeout(timeout, loader.fetch(src)).await {
            Ok(Ok(bytes)) => decode_image(src, &bytes),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(asset_error(
                src,
                format!("timed out after {} ms", timeout.as_millis()),
            )),
        };
        (src, result)
    });

    let mut cache = ImageCache::new();
    for (src, result) in join_all(loads).await {
        match result {
            Ok(pixmap) => {
                cache.insert(src.to_string(), pixmap);
            }
            Err(e) => log::warn!("Skipping image in thumbnail: {}", e),
        }
    }
    cache
}
