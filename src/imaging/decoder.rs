//! Format decoding to a canonical raw pixel buffer.
//!
//! Every supported input normalizes to [`RawPixels`] — 8-bit interleaved
//! samples plus explicit dimensions and channel count.
//!
//! ## Crate mapping
//!
//! | Format | Path |
//! |---|---|
//! | JPEG, PNG, TIFF, WebP, BMP | `image` crate (pure Rust decoders) |
//! | AVIF | `avif-parse` (container) + `rav1d` (AV1 decode) + YUV→RGB |
//! | HEIC/HEIF | external converter command → intermediate PNG → `image` |
//!
//! The `image` crate's `"avif"` feature only provides the encoder (rav1e).
//! Decoding requires `"avif-native"` which depends on the C library dav1d;
//! instead `rav1d` (pure Rust port of dav1d) is driven directly and reports
//! the channel count from the pixel layout — no byte-length inference on
//! this path. The clamped [`infer_channels`](super::calculations::infer_channels)
//! heuristic only applies to foreign raw buffers entering through
//! [`RawPixels::from_raw_buffer`].
//!
//! Decodes are logged with byte size and elapsed time under the `decode`
//! target; that stream is how worker counts get tuned. Failures are
//! per-object by contract — callers record them and move on.

use super::calculations::infer_channels;
use image::DynamicImage;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Extension outside the allow-list was explicitly decoded.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Decoder produced empty or structurally invalid output.
    #[error("decode failed: {0}")]
    Decode(String),
    /// External HEIC converter missing or unsuccessful.
    #[error("converter failed: {0}")]
    Converter(String),
}

/// Canonical decoded raster: 8-bit interleaved samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPixels {
    pub width: u32,
    pub height: u32,
    /// 1 (luma), 3 (RGB), or 4 (RGBA).
    pub channels: u8,
    pub data: Vec<u8>,
    /// Source carried more than 8 bits per channel.
    pub hdr: bool,
}

impl RawPixels {
    /// Bridge a foreign raw buffer whose channel count is unknown.
    ///
    /// The count is inferred from `len / (width × height)`, clamped to
    /// [1, 4]. Errors on an empty buffer or zero pixel count.
    pub fn from_raw_buffer(data: Vec<u8>, width: u32, height: u32) -> Result<Self, DecodeError> {
        let channels = infer_channels(data.len(), width, height)
            .ok_or_else(|| DecodeError::Decode("empty or zero-sized raw buffer".into()))?;
        Ok(Self {
            width,
            height,
            channels,
            data,
            hdr: false,
        })
    }

    /// View as a `DynamicImage` for resizing and encoding.
    pub fn to_dynamic_image(&self) -> Result<DynamicImage, DecodeError> {
        let (w, h) = (self.width, self.height);
        let make_err = || DecodeError::Decode("raster buffer shorter than dimensions imply".into());
        match self.channels {
            1 => image::GrayImage::from_raw(w, h, self.data.clone())
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(make_err),
            3 => image::RgbImage::from_raw(w, h, self.data.clone())
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(make_err),
            4 => image::RgbaImage::from_raw(w, h, self.data.clone())
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(make_err),
            other => Err(DecodeError::Decode(format!(
                "unsupported channel count {other}"
            ))),
        }
    }
}

/// Decoder settings derived from builder options.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// External command converting HEIC/HEIF to PNG.
    pub heic_converter: String,
}

/// Decode any supported input format. Dispatches on the key's extension.
pub fn decode(key: &str, bytes: &[u8], opts: &DecodeOptions) -> Result<RawPixels, DecodeError> {
    let started = Instant::now();
    let ext = crate::storage::key_extension(key)
        .ok_or_else(|| DecodeError::UnsupportedFormat(key.to_string()))?;

    let pixels = match ext.as_str() {
        "avif" => decode_avif(bytes),
        "heic" | "heif" => decode_heic(bytes, opts),
        "jpg" | "jpeg" | "png" | "webp" | "tif" | "tiff" | "bmp" => decode_standard(bytes),
        other => Err(DecodeError::UnsupportedFormat(other.to_string())),
    }?;

    debug!(
        target: "decode",
        key,
        bytes = bytes.len(),
        width = pixels.width,
        height = pixels.height,
        channels = pixels.channels,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "decoded"
    );
    Ok(pixels)
}

/// Standard raster formats through the `image` crate.
fn decode_standard(bytes: &[u8]) -> Result<RawPixels, DecodeError> {
    let img =
        image::load_from_memory(bytes).map_err(|e| DecodeError::Decode(format!("{e}")))?;
    Ok(dynamic_to_raw(img, false))
}

/// Canonicalize a `DynamicImage`: alpha keeps 4 channels, otherwise 3.
fn dynamic_to_raw(img: DynamicImage, hdr: bool) -> RawPixels {
    let (width, height) = (img.width(), img.height());
    if img.color().has_alpha() {
        let rgba = img.into_rgba8();
        RawPixels {
            width,
            height,
            channels: 4,
            data: rgba.into_raw(),
            hdr,
        }
    } else {
        let rgb = img.into_rgb8();
        RawPixels {
            width,
            height,
            channels: 3,
            data: rgb.into_raw(),
            hdr,
        }
    }
}

// =============================================================================
// AVIF: avif-parse + rav1d
// =============================================================================

/// Decode an AVIF file using avif-parse (container) + rav1d (AV1 decode).
fn decode_avif(bytes: &[u8]) -> Result<RawPixels, DecodeError> {
    use rav1d::include::dav1d::data::Dav1dData;
    use rav1d::include::dav1d::dav1d::Dav1dSettings;
    use rav1d::include::dav1d::headers::{
        DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422,
        DAV1D_PIXEL_LAYOUT_I444,
    };
    use rav1d::include::dav1d::picture::Dav1dPicture;
    use std::ptr::NonNull;

    let avif = avif_parse::read_avif(&mut std::io::Cursor::new(bytes))
        .map_err(|e| DecodeError::Decode(format!("AVIF container parse failed: {e:?}")))?;
    let av1_bytes: &[u8] = &avif.primary_item;
    if av1_bytes.is_empty() {
        return Err(DecodeError::Decode("AVIF primary item is empty".into()));
    }

    // Initialize rav1d decoder
    let mut settings = std::mem::MaybeUninit::<Dav1dSettings>::uninit();
    unsafe {
        rav1d::src::lib::dav1d_default_settings(NonNull::new(settings.as_mut_ptr()).unwrap())
    };
    let mut settings = unsafe { settings.assume_init() };
    settings.n_threads = 1;
    settings.max_frame_delay = 1;

    let mut ctx = None;
    let rc =
        unsafe { rav1d::src::lib::dav1d_open(NonNull::new(&mut ctx), NonNull::new(&mut settings)) };
    if rc.0 != 0 {
        return Err(DecodeError::Decode(format!("rav1d open failed ({})", rc.0)));
    }

    // Create data buffer and copy AV1 bytes
    let mut data = Dav1dData::default();
    let buf_ptr =
        unsafe { rav1d::src::lib::dav1d_data_create(NonNull::new(&mut data), av1_bytes.len()) };
    if buf_ptr.is_null() {
        unsafe { rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx)) };
        return Err(DecodeError::Decode("rav1d data_create failed".into()));
    }
    unsafe { std::ptr::copy_nonoverlapping(av1_bytes.as_ptr(), buf_ptr, av1_bytes.len()) };

    // Feed data to decoder
    let rc = unsafe { rav1d::src::lib::dav1d_send_data(ctx, NonNull::new(&mut data)) };
    if rc.0 != 0 {
        unsafe {
            rav1d::src::lib::dav1d_data_unref(NonNull::new(&mut data));
            rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx));
        }
        return Err(DecodeError::Decode(format!(
            "rav1d send_data failed ({})",
            rc.0
        )));
    }

    // Get decoded picture
    let mut pic: Dav1dPicture = unsafe { std::mem::zeroed() };
    let rc = unsafe { rav1d::src::lib::dav1d_get_picture(ctx, NonNull::new(&mut pic)) };
    if rc.0 != 0 {
        unsafe { rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx)) };
        return Err(DecodeError::Decode(format!(
            "rav1d get_picture failed ({})",
            rc.0
        )));
    }

    // Extract dimensions and pixel layout
    let w = pic.p.w as u32;
    let h = pic.p.h as u32;
    let bpc = pic.p.bpc as u32;
    let layout = pic.p.layout;
    let y_stride = pic.stride[0];
    let uv_stride = pic.stride[1];
    let y_ptr = pic.data[0].unwrap().as_ptr() as *const u8;

    // Convert YUV planes to interleaved RGB8. The channel count is reported
    // from the layout — monochrome still expands to RGB so downstream only
    // sees 3- or 4-channel buffers from this path.
    let rgb = if layout == DAV1D_PIXEL_LAYOUT_I400 {
        YuvPlanes {
            y_ptr,
            u_ptr: y_ptr,
            v_ptr: y_ptr,
            y_stride,
            uv_stride: 0,
            width: w,
            height: h,
            bpc,
            ss_x: false,
            ss_y: false,
            monochrome: true,
        }
        .to_rgb()
    } else {
        let u_ptr = pic.data[1].unwrap().as_ptr() as *const u8;
        let v_ptr = pic.data[2].unwrap().as_ptr() as *const u8;
        let (ss_x, ss_y) = match layout {
            DAV1D_PIXEL_LAYOUT_I420 => (true, true),
            DAV1D_PIXEL_LAYOUT_I422 => (true, false),
            DAV1D_PIXEL_LAYOUT_I444 => (false, false),
            _ => {
                unsafe {
                    rav1d::src::lib::dav1d_picture_unref(NonNull::new(&mut pic));
                    rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx));
                }
                return Err(DecodeError::Decode(format!(
                    "unsupported AVIF pixel layout: {layout}"
                )));
            }
        };
        YuvPlanes {
            y_ptr,
            u_ptr,
            v_ptr,
            y_stride,
            uv_stride,
            width: w,
            height: h,
            bpc,
            ss_x,
            ss_y,
            monochrome: false,
        }
        .to_rgb()
    };

    unsafe {
        rav1d::src::lib::dav1d_picture_unref(NonNull::new(&mut pic));
        rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx));
    }

    if rgb.is_empty() {
        return Err(DecodeError::Decode("AVIF decode produced no pixels".into()));
    }
    Ok(RawPixels {
        width: w,
        height: h,
        channels: 3,
        data: rgb,
        hdr: bpc > 8,
    })
}

/// Decoded YUV plane data from rav1d, ready for RGB conversion.
struct YuvPlanes {
    y_ptr: *const u8,
    u_ptr: *const u8,
    v_ptr: *const u8,
    y_stride: isize,
    uv_stride: isize,
    width: u32,
    height: u32,
    bpc: u32,
    /// Chroma subsampling: horizontal, vertical (e.g. I420 = true, true)
    ss_x: bool,
    ss_y: bool,
    monochrome: bool,
}

impl YuvPlanes {
    /// Convert YUV planes to interleaved RGB8 using BT.601 coefficients.
    fn to_rgb(&self) -> Vec<u8> {
        let max_val = ((1u32 << self.bpc) - 1) as f32;
        let center = (1u32 << (self.bpc - 1)) as f32;
        let scale = 255.0 / max_val;

        let mut rgb = vec![0u8; (self.width * self.height * 3) as usize];

        for row in 0..self.height {
            for col in 0..self.width {
                let y_val = read_pixel(self.y_ptr, self.y_stride, col, row, self.bpc);

                let (r, g, b) = if self.monochrome {
                    let v = (y_val * scale).clamp(0.0, 255.0);
                    (v, v, v)
                } else {
                    let u_col = if self.ss_x { col / 2 } else { col };
                    let u_row = if self.ss_y { row / 2 } else { row };
                    let cb = read_pixel(self.u_ptr, self.uv_stride, u_col, u_row, self.bpc);
                    let cr = read_pixel(self.v_ptr, self.uv_stride, u_col, u_row, self.bpc);

                    // BT.601 YCbCr -> RGB, then scale to 8-bit
                    let cb_f = cb - center;
                    let cr_f = cr - center;

                    (
                        ((y_val + 1.402 * cr_f) * scale).clamp(0.0, 255.0),
                        ((y_val - 0.344136 * cb_f - 0.714136 * cr_f) * scale).clamp(0.0, 255.0),
                        ((y_val + 1.772 * cb_f) * scale).clamp(0.0, 255.0),
                    )
                };

                let idx = ((row * self.width + col) * 3) as usize;
                rgb[idx] = r as u8;
                rgb[idx + 1] = g as u8;
                rgb[idx + 2] = b as u8;
            }
        }

        rgb
    }
}

/// Read a single pixel value from a YUV plane, handling both 8-bit and 16-bit storage.
#[inline]
fn read_pixel(ptr: *const u8, stride: isize, x: u32, y: u32, bpc: u32) -> f32 {
    if bpc <= 8 {
        (unsafe { *ptr.offset(y as isize * stride + x as isize) }) as f32
    } else {
        // 10-bit and 12-bit are stored as u16
        let byte_offset = y as isize * stride + x as isize * 2;
        (unsafe { *(ptr.offset(byte_offset) as *const u16) }) as f32
    }
}

// =============================================================================
// HEIC: delegated external conversion
// =============================================================================

/// Convert HEIC bytes to PNG through the configured external command, then
/// decode the intermediate through the shared raster path.
fn decode_heic(bytes: &[u8], opts: &DecodeOptions) -> Result<RawPixels, DecodeError> {
    let (input, output) = temp_pair(bytes);
    std::fs::write(&input, bytes)?;

    let result = std::process::Command::new(&opts.heic_converter)
        .arg(&input)
        .arg(&output)
        .output();

    let converted = match result {
        Ok(out) if out.status.success() => std::fs::read(&output).map_err(|e| {
            DecodeError::Converter(format!("converter wrote no output: {e}"))
        }),
        Ok(out) => Err(DecodeError::Converter(format!(
            "{} exited with {}: {}",
            opts.heic_converter,
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        ))),
        Err(e) => Err(DecodeError::Converter(format!(
            "{} could not be spawned: {e}",
            opts.heic_converter
        ))),
    };

    // Intermediates are best-effort cleanup; a leak is not a decode failure.
    let _ = std::fs::remove_file(&input);
    let _ = std::fs::remove_file(&output);

    decode_standard(&converted?)
}

/// Collision-safe temp file pair for one conversion.
fn temp_pair(bytes: &[u8]) -> (PathBuf, PathBuf) {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    let tag = format!("gallery-builder-{}-{:x}", std::process::id(), digest);
    let dir = std::env::temp_dir();
    (
        dir.join(format!("{}.heic", &tag[..48.min(tag.len())])),
        dir.join(format!("{}.png", &tag[..48.min(tag.len())])),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::{ImageEncoder, RgbImage};

    fn test_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Vec::new();
        JpegEncoder::new(&mut out)
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    fn opts() -> DecodeOptions {
        DecodeOptions {
            heic_converter: "heif-convert".to_string(),
        }
    }

    #[test]
    fn decode_jpeg_reports_explicit_channels() {
        let bytes = test_jpeg(64, 48);
        let pixels = decode("a/photo.jpg", &bytes, &opts()).unwrap();
        assert_eq!(pixels.width, 64);
        assert_eq!(pixels.height, 48);
        assert_eq!(pixels.channels, 3);
        assert_eq!(pixels.data.len(), 64 * 48 * 3);
        assert!(!pixels.hdr);
    }

    #[test]
    fn decode_png_with_alpha_keeps_four_channels() {
        let img = image::RgbaImage::from_pixel(10, 10, image::Rgba([1, 2, 3, 200]));
        let mut bytes = Vec::new();
        image::codecs::png::PngEncoder::new(&mut bytes)
            .write_image(img.as_raw(), 10, 10, image::ExtendedColorType::Rgba8)
            .unwrap();
        let pixels = decode("a.png", &bytes, &opts()).unwrap();
        assert_eq!(pixels.channels, 4);
    }

    #[test]
    fn decode_disallowed_extension_is_unsupported() {
        let err = decode("movie.mov", b"whatever", &opts()).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(_)));
    }

    #[test]
    fn decode_corrupt_jpeg_is_decode_error() {
        let err = decode("x.jpg", b"not a jpeg", &opts()).unwrap_err();
        assert!(matches!(err, DecodeError::Decode(_)));
    }

    #[test]
    fn decode_avif_rejects_garbage_container() {
        let err = decode("x.avif", b"not an avif", &opts()).unwrap_err();
        assert!(matches!(err, DecodeError::Decode(_)));
    }

    #[test]
    fn heic_with_missing_converter_is_converter_error() {
        let bad = DecodeOptions {
            heic_converter: "definitely-not-a-real-command-xyz".to_string(),
        };
        let err = decode("x.heic", b"fake heic", &bad).unwrap_err();
        assert!(matches!(err, DecodeError::Converter(_)));
    }

    #[test]
    fn avif_roundtrip_through_encoder() {
        // Encode via the image crate's rav1e path, decode via our rav1d path.
        let img = RgbImage::from_fn(32, 24, |x, y| {
            image::Rgb([(x * 8) as u8, (y * 10) as u8, 128])
        });
        let mut bytes = Vec::new();
        let encoder = image::codecs::avif::AvifEncoder::new_with_speed_quality(
            std::io::Cursor::new(&mut bytes),
            8,
            85,
        );
        DynamicImage::ImageRgb8(img)
            .write_with_encoder(encoder)
            .unwrap();

        let pixels = decode("roundtrip.avif", &bytes, &opts()).unwrap();
        assert_eq!(pixels.width, 32);
        assert_eq!(pixels.height, 24);
        assert_eq!(pixels.channels, 3);
    }

    #[test]
    fn from_raw_buffer_bridges_with_inferred_channels() {
        let raw = RawPixels::from_raw_buffer(vec![0u8; 10 * 10 * 3], 10, 10).unwrap();
        assert_eq!(raw.channels, 3);

        let err = RawPixels::from_raw_buffer(Vec::new(), 10, 10).unwrap_err();
        assert!(matches!(err, DecodeError::Decode(_)));
    }

    #[test]
    fn to_dynamic_image_rejects_short_buffer() {
        let raw = RawPixels {
            width: 100,
            height: 100,
            channels: 3,
            data: vec![0u8; 30],
            hdr: false,
        };
        assert!(raw.to_dynamic_image().is_err());
    }
}
