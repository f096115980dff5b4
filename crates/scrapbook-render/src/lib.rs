//! Scrapbook Render Library
//!
//! Off-screen thumbnail rendering for scrapbooks. Content is fit into a fixed
//! target, rasterized on the CPU with tiny-skia, encoded as PNG and uploaded
//! through a [`scrapbook_core::storage::BlobStore`].

mod assets;
mod encode;
mod error;
mod layout;
mod options;
mod raster;
mod service;

pub use assets::{AssetLoader, HttpAssetLoader, ImageCache, MemoryAssetLoader, decode_image, load_images};
pub use encode::encode_png;
pub use error::{RenderError, RenderResult};
pub use layout::{ThumbnailLayout, compute_layout};
pub use options::ThumbnailOptions;
pub use raster::{load_font, rasterize};
pub use service::ThumbnailService;
