//! Derivative generation: thumbnail + perceptual placeholder.
//!
//! From one decoded raster this produces (a) a bounded-size thumbnail
//! re-encoded to AVIF (rav1e, speed 6 — the throughput/quality middle
//! ground) and (b) a ThumbHash placeholder string. Both are deterministic
//! for identical input bytes; manifest diffing depends on that.

use super::calculations::fit_within;
use super::decoder::{DecodeError, RawPixels};
use super::thumbhash;
use image::imageops::FilterType;
use std::time::Instant;
use tracing::debug;

/// Derivative settings resolved from builder options.
#[derive(Debug, Clone)]
pub struct DerivativeOptions {
    /// Longer-edge bound for the thumbnail.
    pub max_dim: u32,
    /// AVIF encode quality (1-100).
    pub quality: u8,
}

/// Generated derivatives for one photo.
#[derive(Debug, Clone)]
pub struct Derivatives {
    pub thumbnail_avif: Vec<u8>,
    pub thumb_width: u32,
    pub thumb_height: u32,
    /// Base64 ThumbHash; `None` only when hashing was impossible.
    pub thumb_hash: Option<String>,
}

/// Produce thumbnail + placeholder from a decoded raster.
pub fn generate(
    key: &str,
    pixels: &RawPixels,
    opts: &DerivativeOptions,
) -> Result<Derivatives, DecodeError> {
    let img = pixels.to_dynamic_image()?;

    let started = Instant::now();
    let (tw, th) = fit_within((pixels.width, pixels.height), opts.max_dim);
    let thumb = img.resize_exact(tw, th, FilterType::Lanczos3);
    let thumbnail_avif = encode_avif(&thumb, opts.quality)?;
    debug!(
        target: "thumbnail",
        key,
        width = tw,
        height = th,
        bytes = thumbnail_avif.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "thumbnail encoded"
    );

    let started = Instant::now();
    let (hw, hh) = fit_within((tw, th), thumbhash::MAX_HASH_DIM);
    let hash_raster = thumb.resize_exact(hw, hh, FilterType::Triangle).into_rgba8();
    let thumb_hash = thumbhash::encode_base64(hw, hh, hash_raster.as_raw());
    debug!(
        target: "thumbhash",
        key,
        elapsed_ms = started.elapsed().as_millis() as u64,
        present = thumb_hash.is_some(),
        "placeholder computed"
    );

    Ok(Derivatives {
        thumbnail_avif,
        thumb_width: tw,
        thumb_height: th,
        thumb_hash,
    })
}

/// Encode as AVIF in memory (rav1e, speed 6).
fn encode_avif(img: &image::DynamicImage, quality: u8) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    let encoder = image::codecs::avif::AvifEncoder::new_with_speed_quality(
        std::io::Cursor::new(&mut out),
        6,
        quality,
    );
    img.write_with_encoder(encoder)
        .map_err(|e| DecodeError::Decode(format!("AVIF encode failed: {e}")))?;
    if out.is_empty() {
        return Err(DecodeError::Decode("AVIF encoder produced no bytes".into()));
    }
    Ok(out)
}
