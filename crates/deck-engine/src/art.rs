//! Cover art encoding for kitty-protocol terminals.
//!
//! The image is center-cropped to a square, converted to RGBA, and wrapped
//! in transmit-and-display APC escape sequences with the base64 payload
//! split into 4096-byte chunks.

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use deck_types::ArtworkImage;
use image::DynamicImage;

/// Base64 payload bytes per escape chunk.
const CHUNK_BYTES: usize = 4096;

/// Encode raw cover bytes into a printable kitty escape stream.
///
/// Empty input is not an error: it yields an empty [`ArtworkImage`] so tag
/// data can be passed through unconditionally.
pub fn encode_artwork(data: &[u8]) -> Result<ArtworkImage> {
    if data.is_empty() {
        return Ok(ArtworkImage::default());
    }

    let img = image::load_from_memory(data).context("decode cover art")?;
    let square = crop_to_square(img);
    let rgba = square.to_rgba8();
    let (width, height) = rgba.dimensions();
    let data = kitty_encode(rgba.as_raw(), width, height);

    Ok(ArtworkImage {
        width,
        height,
        data,
    })
}

/// Center-crop to the largest square that fits.
fn crop_to_square(img: DynamicImage) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    let size = w.min(h);
    img.crop_imm((w - size) / 2, (h - size) / 2, size, size)
}

/// Wrap raw RGBA pixels in kitty graphics escapes.
///
/// The first chunk carries the control keys (f=32 RGBA, s/v dimensions,
/// a=T transmit and display, t=d direct payload); every chunk but the last
/// sets m=1.
fn kitty_encode(rgba: &[u8], width: u32, height: u32) -> String {
    let payload = STANDARD.encode(rgba);
    let bytes = payload.as_bytes();
    let total = bytes.len().div_ceil(CHUNK_BYTES).max(1);

    let mut out = String::with_capacity(payload.len() + total * 16 + 64);
    for (i, chunk) in bytes.chunks(CHUNK_BYTES).enumerate() {
        let last = i + 1 == total;
        out.push_str("\x1b_G");
        if i == 0 {
            out.push_str(&format!("f=32,s={width},v={height},a=T,t=d,"));
        }
        out.push_str(if last { "m=0" } else { "m=1" });
        out.push(';');
        // base64 output is pure ASCII, so byte chunks are valid UTF-8
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\x1b\\");
    }
    out
}
