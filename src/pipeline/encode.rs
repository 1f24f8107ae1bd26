//! Image encoding: rendered page → base64 PNG wrapped in `ImageData`.
//!
//! PNG is lossless, which keeps glyph edges crisp for the recognition model.
//! `detail: "high"` asks GPT-class models for the full tile budget so small
//! print survives.

use crate::pipeline::render::RasterImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as a base64 PNG ready for the recognition request.
pub fn encode_page(img: &RasterImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page image {}x{} → {} bytes base64", img.width(), img.height(), b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
