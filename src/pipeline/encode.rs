//! Image encoding: raw upload bytes → base64 for the OCR request body and
//! a `data:` URI the presentation layer can display without touching disk.
//!
//! The image format is sniffed from magic bytes only. Nothing is decoded;
//! format validation is left to the OCR engine.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use tracing::debug;

/// Base64-encode image bytes for the `{ "image": ... }` request body.
pub fn encode_image(bytes: &[u8]) -> String {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded image {} bytes → {} bytes base64", bytes.len(), b64.len());
    b64
}

/// Length of the base64 encoding of `len` bytes, without encoding.
pub fn encoded_len(len: usize) -> usize {
    len.div_ceil(3) * 4
}

/// Best-effort MIME type from the leading bytes.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(format) => mime_for(format),
        Err(_) => "application/octet-stream",
    }
}

fn mime_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// `data:<mime>;base64,<payload>` reference for local display.
pub fn data_url(bytes: &[u8]) -> String {
    format!("data:{};base64,{}", sniff_mime(bytes), STANDARD.encode(bytes))
}
