//! Per-object processing: decode → metadata → derivatives.
//!
//! [`PhotoProcessor`] is the seam between orchestration and pixel work. The
//! production implementation is [`RasterProcessor`]; tests inject recording
//! or failing processors to exercise worker behavior without touching
//! codecs. Everything here is CPU-bound and synchronous — the orchestrator
//! runs it on the blocking pool.

use super::decoder::{self, DecodeError, DecodeOptions};
use super::derivative::{self, DerivativeOptions, Derivatives};
use super::tone::{self, ToneAnalysis};
use crate::config::OptionsConfig;
use crate::exif::{self, PickedExif};

/// Everything the pipeline learns from one photo's bytes.
#[derive(Debug, Clone)]
pub struct ProcessedPhoto {
    pub width: u32,
    pub height: u32,
    pub exif: Option<PickedExif>,
    pub tone: Option<ToneAnalysis>,
    pub derivatives: Derivatives,
    pub hdr: bool,
}

/// CPU-side processing seam.
pub trait PhotoProcessor: Send + Sync {
    fn process(&self, key: &str, bytes: &[u8]) -> Result<ProcessedPhoto, DecodeError>;
}

/// Production processor over the real decode and derivative paths.
pub struct RasterProcessor {
    decode_opts: DecodeOptions,
    derivative_opts: DerivativeOptions,
}

impl RasterProcessor {
    pub fn from_options(options: &OptionsConfig) -> Self {
        Self {
            decode_opts: DecodeOptions {
                heic_converter: options.heic_converter.clone(),
            },
            derivative_opts: DerivativeOptions {
                max_dim: options.thumbnail_max_dim,
                quality: options.thumbnail_quality,
            },
        }
    }
}

impl PhotoProcessor for RasterProcessor {
    fn process(&self, key: &str, bytes: &[u8]) -> Result<ProcessedPhoto, DecodeError> {
        let pixels = decoder::decode(key, bytes, &self.decode_opts)?;
        // EXIF comes from the original bytes, tone from the decoded raster.
        let exif = exif::extract(bytes);
        let tone = Some(tone::analyze(&pixels));
        let derivatives = derivative::generate(key, &pixels, &self.derivative_opts)?;

        Ok(ProcessedPhoto {
            width: pixels.width,
            height: pixels.height,
            exif,
            tone,
            hdr: pixels.hdr,
            derivatives,
        })
    }
}
