//! Image processing — pure Rust, zero external dependencies except the
//! optional HEIC converter command.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode (JPEG, PNG, TIFF, WebP, BMP)** | `image` crate (pure Rust decoders) |
//! | **Decode (AVIF)** | `avif-parse` (container) + `rav1d` (AV1 decode) + custom YUV→RGB |
//! | **Decode (HEIC)** | delegated external converter → PNG intermediate |
//! | **Thumbnail** | Lanczos3 resize + AVIF encode (rav1e, speed 6) |
//! | **Placeholder** | custom ThumbHash encoder |
//! | **Tone analysis** | luminance histogram classification |
//!
//! The module is split into:
//! - **Calculations**: pure functions for dimension math (unit testable)
//! - **Decoder**: format dispatch into the canonical [`RawPixels`] buffer
//! - **Derivative**: thumbnail + placeholder generation
//! - **Tone**: histogram classification
//! - **Processor**: the [`PhotoProcessor`] seam the orchestrator drives

pub mod calculations;
pub mod decoder;
pub mod derivative;
pub mod processor;
pub mod thumbhash;
pub mod tone;

pub use calculations::{aspect_ratio, fit_within, infer_channels};
pub use decoder::{decode, DecodeError, DecodeOptions, RawPixels};
pub use derivative::{Derivatives, DerivativeOptions};
pub use processor::{PhotoProcessor, ProcessedPhoto, RasterProcessor};
pub use tone::{ToneAnalysis, ToneType};
