//! Image encoding: `DynamicImage` → base64 PNG payloads.
//!
//! Vision APIs (OpenAI, Anthropic, Gemini) accept images as base64 data
//! embedded in the JSON request body; stored figure crops reuse the same
//! encoding as a displayable data URI so records are self-contained. PNG is
//! chosen over JPEG because it is lossless — tissue texture and printed
//! caption crispness matter far more than file size here.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as a base64 PNG ready for the vision API.
///
/// `detail: "high"` instructs GPT-4-class models to use the full image tile
/// budget; without it fine print and small figure captions are lost.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let b64 = png_base64(img)?;
    debug!("Encoded page → {} bytes base64", b64.len());
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Encode a figure crop as a displayable `data:image/png;base64,…` URI for
/// storage inside a case record.
pub fn to_data_uri(img: &DynamicImage) -> Result<String, image::ImageError> {
    let b64 = png_base64(img)?;
    Ok(format!("data:image/png;base64,{}", b64))
}

fn png_base64(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(STANDARD.encode(&buf))
}
