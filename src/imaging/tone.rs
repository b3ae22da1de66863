//! Tone analysis from decoded pixels.
//!
//! Classifies the brightness distribution of a photo from its luminance
//! histogram — independent of EXIF, purely pixel-derived, deterministic.
//!
//! Thresholds are a tuning choice but the mapping is monotonic: more shadow
//! mass can only push toward `LowKey`, more highlight mass toward `HighKey`,
//! a wider spread toward `HighContrast`.

use super::decoder::RawPixels;
use serde::{Deserialize, Serialize};

/// Luminance below this bin counts as shadow mass.
const SHADOW_CUTOFF: u32 = 48;
/// Luminance at or above this bin counts as highlight mass.
const HIGHLIGHT_CUTOFF: u32 = 208;

/// Cap on sampled pixels; bigger rasters are stride-sampled.
const MAX_SAMPLES: usize = 500_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToneType {
    LowKey,
    HighKey,
    Normal,
    HighContrast,
}

/// Histogram classification attached to each manifest item.
///
/// `brightness`/`contrast` are 0–100; the ratios are each in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToneAnalysis {
    pub tone_type: ToneType,
    pub brightness: u8,
    pub contrast: u8,
    pub shadow_ratio: f64,
    pub highlight_ratio: f64,
}

/// Analyze a decoded raster.
pub fn analyze(pixels: &RawPixels) -> ToneAnalysis {
    let histogram = luminance_histogram(pixels);
    classify(&histogram)
}

/// 256-bin luminance histogram, BT.601-weighted for color buffers.
fn luminance_histogram(pixels: &RawPixels) -> [u64; 256] {
    let mut histogram = [0u64; 256];
    let channels = pixels.channels.max(1) as usize;
    let pixel_count = pixels.data.len() / channels;
    if pixel_count == 0 {
        return histogram;
    }

    let step = (pixel_count / MAX_SAMPLES).max(1);
    let mut i = 0;
    while i < pixel_count {
        let base = i * channels;
        let luma = match channels {
            // 2 = luma + alpha; luminance is the first sample either way
            1 | 2 => pixels.data[base] as f64,
            _ => {
                let r = pixels.data[base] as f64;
                let g = pixels.data[base + 1] as f64;
                let b = pixels.data[base + 2] as f64;
                0.299 * r + 0.587 * g + 0.114 * b
            }
        };
        histogram[(luma as usize).min(255)] += 1;
        i += step;
    }
    histogram
}

fn classify(histogram: &[u64; 256]) -> ToneAnalysis {
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return ToneAnalysis {
            tone_type: ToneType::Normal,
            brightness: 0,
            contrast: 0,
            shadow_ratio: 0.0,
            highlight_ratio: 0.0,
        };
    }

    let totalf = total as f64;
    let mean: f64 = histogram
        .iter()
        .enumerate()
        .map(|(v, &n)| v as f64 * n as f64)
        .sum::<f64>()
        / totalf;
    let variance: f64 = histogram
        .iter()
        .enumerate()
        .map(|(v, &n)| {
            let d = v as f64 - mean;
            d * d * n as f64
        })
        .sum::<f64>()
        / totalf;
    let stddev = variance.sqrt();

    let shadow: u64 = histogram[..SHADOW_CUTOFF as usize].iter().sum();
    let highlight: u64 = histogram[HIGHLIGHT_CUTOFF as usize..].iter().sum();
    let shadow_ratio = shadow as f64 / totalf;
    let highlight_ratio = highlight as f64 / totalf;

    let brightness = ((mean / 255.0) * 100.0).round().clamp(0.0, 100.0) as u8;
    // Max luminance stddev is 127.5 (half the pixels at 0, half at 255).
    let contrast = ((stddev / 127.5) * 100.0).round().clamp(0.0, 100.0) as u8;

    let tone_type = if shadow_ratio > 0.5 && highlight_ratio < 0.1 {
        ToneType::LowKey
    } else if highlight_ratio > 0.5 && shadow_ratio < 0.1 {
        ToneType::HighKey
    } else if shadow_ratio + highlight_ratio > 0.55
        && shadow_ratio > 0.15
        && highlight_ratio > 0.15
    {
        ToneType::HighContrast
    } else if contrast >= 70 {
        ToneType::HighContrast
    } else {
        ToneType::Normal
    };

    ToneAnalysis {
        tone_type,
        brightness,
        contrast,
        shadow_ratio,
        highlight_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(value: u8, w: u32, h: u32) -> RawPixels {
        RawPixels {
            width: w,
            height: h,
            channels: 3,
            data: vec![value; (w * h * 3) as usize],
            hdr: false,
        }
    }

    #[test]
    fn dark_image_is_low_key() {
        let tone = analyze(&solid(10, 64, 64));
        assert_eq!(tone.tone_type, ToneType::LowKey);
        assert_eq!(tone.shadow_ratio, 1.0);
        assert_eq!(tone.highlight_ratio, 0.0);
        assert!(tone.brightness < 10);
    }

    #[test]
    fn bright_image_is_high_key() {
        let tone = analyze(&solid(245, 64, 64));
        assert_eq!(tone.tone_type, ToneType::HighKey);
        assert_eq!(tone.highlight_ratio, 1.0);
        assert!(tone.brightness > 90);
    }

    #[test]
    fn midtone_image_is_normal() {
        let tone = analyze(&solid(128, 64, 64));
        assert_eq!(tone.tone_type, ToneType::Normal);
        assert_eq!(tone.shadow_ratio, 0.0);
        assert_eq!(tone.highlight_ratio, 0.0);
        assert!(tone.contrast < 5);
    }

    #[test]
    fn bimodal_image_is_high_contrast() {
        // Half black, half white
        let w = 64u32;
        let h = 64u32;
        let mut data = vec![0u8; (w * h * 3) as usize];
        for px in (w * h / 2)..(w * h) {
            let base = (px * 3) as usize;
            data[base] = 255;
            data[base + 1] = 255;
            data[base + 2] = 255;
        }
        let tone = analyze(&RawPixels {
            width: w,
            height: h,
            channels: 3,
            data,
            hdr: false,
        });
        assert_eq!(tone.tone_type, ToneType::HighContrast);
        assert!(tone.contrast > 90);
    }

    #[test]
    fn ratios_stay_within_unit_interval() {
        for value in [0u8, 47, 48, 128, 207, 208, 255] {
            let tone = analyze(&solid(value, 8, 8));
            assert!((0.0..=1.0).contains(&tone.shadow_ratio));
            assert!((0.0..=1.0).contains(&tone.highlight_ratio));
            assert!(tone.shadow_ratio + tone.highlight_ratio <= 1.0);
        }
    }

    #[test]
    fn grayscale_buffer_uses_single_channel() {
        let tone = analyze(&RawPixels {
            width: 8,
            height: 8,
            channels: 1,
            data: vec![20; 64],
            hdr: false,
        });
        assert_eq!(tone.tone_type, ToneType::LowKey);
    }

    #[test]
    fn empty_raster_is_normal_zeroes() {
        let tone = analyze(&RawPixels {
            width: 0,
            height: 0,
            channels: 3,
            data: Vec::new(),
            hdr: false,
        });
        assert_eq!(tone.tone_type, ToneType::Normal);
        assert_eq!(tone.brightness, 0);
    }

    #[test]
    fn serializes_kebab_case_tone_type() {
        let tone = analyze(&solid(10, 8, 8));
        let json = serde_json::to_string(&tone).unwrap();
        assert!(json.contains("\"toneType\":\"low-key\""));
        assert!(json.contains("\"shadowRatio\":1.0") || json.contains("\"shadowRatio\":1"));
    }
}
