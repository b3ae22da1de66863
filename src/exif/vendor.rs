//! Vendor recipe parsing from maker notes.
//!
//! Both parsers are opportunistic: a missing note, an unknown header
//! revision, or an absent tag degrades to `None` fields, never an error.
//! Only the handful of tags that describe the in-camera look (the
//! "recipe") are projected; everything else in the notes is ignored.
//!
//! Offset conventions differ per vendor and are the whole reason the raw
//! TIFF block is threaded through:
//! - **Fuji**: `FUJIFILM` header + IFD whose value offsets are relative to
//!   the note itself, always little-endian.
//! - **Sony**: `SONY DSC`-style header + IFD whose value offsets are
//!   relative to the enclosing TIFF block, in the block's byte order.

use super::ifd::{parse_vendor_ifd, ExifValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Fuji maker note tags
const FUJI_SHARPNESS: u16 = 0x1001;
const FUJI_WHITE_BALANCE: u16 = 0x1002;
const FUJI_COLOR: u16 = 0x1003;
const FUJI_WB_FINE_TUNE: u16 = 0x100A;
const FUJI_HIGHLIGHT_TONE: u16 = 0x1040;
const FUJI_SHADOW_TONE: u16 = 0x1041;
const FUJI_GRAIN_ROUGHNESS: u16 = 0x1047;
const FUJI_COLOR_CHROME: u16 = 0x1048;
const FUJI_COLOR_CHROME_BLUE: u16 = 0x104E;
const FUJI_FILM_MODE: u16 = 0x1401;
const FUJI_DYNAMIC_RANGE: u16 = 0x1402;

// Sony maker note tags
const SONY_CREATIVE_STYLE: u16 = 0xB020;
const SONY_DRO: u16 = 0xB025;

/// Fuji film-simulation recipe.
///
/// Tone values are the camera's raw units (16 per stop); WB shifts are in
/// UI steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FujiRecipe {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub film_simulation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_range: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grain_effect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_chrome_effect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_chrome_fx_blue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub white_balance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wb_shift_red: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wb_shift_blue: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight_tone: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow_tone: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharpness: Option<i32>,
}

/// Sony creative-style recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SonyRecipe {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creative_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_range_optimizer: Option<String>,
}

const FUJI_HEADER: &[u8] = b"FUJIFILM";

/// Parse a Fuji maker note. `None` unless the header matches.
pub fn parse_fuji(note: &[u8], _tiff_le: bool) -> Option<FujiRecipe> {
    if !note.starts_with(FUJI_HEADER) || note.len() < 12 {
        return None;
    }
    // IFD offset relative to the note, always little-endian.
    let ifd_offset = u32::from_le_bytes([note[8], note[9], note[10], note[11]]) as usize;
    let tags = parse_vendor_ifd(note, ifd_offset, true);
    if tags.is_empty() {
        return None;
    }

    let (wb_shift_red, wb_shift_blue) = wb_fine_tune(&tags);
    Some(FujiRecipe {
        film_simulation: tag_u16(&tags, FUJI_FILM_MODE).map(film_simulation_name),
        dynamic_range: tag_u16(&tags, FUJI_DYNAMIC_RANGE).map(|v| v as u32),
        grain_effect: tag_u16(&tags, FUJI_GRAIN_ROUGHNESS).map(effect_strength),
        color_chrome_effect: tag_u16(&tags, FUJI_COLOR_CHROME).map(effect_strength),
        color_chrome_fx_blue: tag_u16(&tags, FUJI_COLOR_CHROME_BLUE).map(effect_strength),
        white_balance: tag_u16(&tags, FUJI_WHITE_BALANCE).map(fuji_white_balance_name),
        wb_shift_red,
        wb_shift_blue,
        highlight_tone: tag_i32(&tags, FUJI_HIGHLIGHT_TONE),
        shadow_tone: tag_i32(&tags, FUJI_SHADOW_TONE),
        color: tag_i32(&tags, FUJI_COLOR),
        sharpness: tag_i32(&tags, FUJI_SHARPNESS),
    })
}

const SONY_HEADERS: &[&[u8]] = &[b"SONY DSC ", b"SONY CAM ", b"SONY MOBILE"];

/// Parse a Sony maker note located at `note_start` inside `tiff`.
pub fn parse_sony(tiff: &[u8], note_start: usize, le: bool) -> Option<SonyRecipe> {
    let note = tiff.get(note_start..)?;
    if !SONY_HEADERS.iter().any(|h| note.starts_with(h)) {
        return None;
    }
    // 12-byte header, then an IFD with offsets relative to the TIFF block.
    let tags = parse_vendor_ifd(tiff, note_start + 12, le);
    if tags.is_empty() {
        return None;
    }

    Some(SonyRecipe {
        creative_style: tags
            .get(&SONY_CREATIVE_STYLE)
            .and_then(ExifValue::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from),
        dynamic_range_optimizer: tags
            .get(&SONY_DRO)
            .and_then(ExifValue::first_u32)
            .map(dro_name),
    })
}

fn tag_u16(tags: &HashMap<u16, ExifValue>, tag: u16) -> Option<u16> {
    tags.get(&tag).and_then(ExifValue::first_u32).map(|v| v as u16)
}

fn tag_i32(tags: &HashMap<u16, ExifValue>, tag: u16) -> Option<i32> {
    tags.get(&tag).and_then(ExifValue::first_u32).map(|v| v as i32)
}

/// WhiteBalanceFineTune: two signed values in camera units of 20 per UI step.
fn wb_fine_tune(tags: &HashMap<u16, ExifValue>) -> (Option<i32>, Option<i32>) {
    match tags.get(&FUJI_WB_FINE_TUNE) {
        Some(ExifValue::U32s(v)) if v.len() >= 2 => {
            (Some(v[0] as i32 / 20), Some(v[1] as i32 / 20))
        }
        Some(ExifValue::SRationals(v)) if v.len() >= 2 => {
            (Some(v[0].0 / 20), Some(v[1].0 / 20))
        }
        _ => (None, None),
    }
}

fn film_simulation_name(code: u16) -> String {
    match code {
        0x000 => "Provia/Standard".to_string(),
        0x100 => "Studio Portrait".to_string(),
        0x110 => "Studio Portrait Enhanced Saturation".to_string(),
        0x120 => "Astia/Smooth".to_string(),
        0x130 => "Studio Portrait Increased Sharpness".to_string(),
        0x200 | 0x400 => "Velvia/Vivid".to_string(),
        0x500 => "Pro Neg. Std".to_string(),
        0x501 => "Pro Neg. Hi".to_string(),
        0x600 => "Classic Chrome".to_string(),
        0x700 => "Eterna/Cinema".to_string(),
        0x800 => "Classic Negative".to_string(),
        0x900 => "Bleach Bypass".to_string(),
        0xA00 => "Nostalgic Neg".to_string(),
        0xB00 => "Reala ACE".to_string(),
        other => format!("Unknown (0x{other:x})"),
    }
}

fn fuji_white_balance_name(code: u16) -> String {
    match code {
        0 => "Auto".to_string(),
        256 => "Daylight".to_string(),
        512 => "Cloudy".to_string(),
        768 => "Daylight Fluorescent".to_string(),
        769 => "Day White Fluorescent".to_string(),
        770 => "White Fluorescent".to_string(),
        1024 => "Incandescent".to_string(),
        1536 => "Underwater".to_string(),
        3840..=3847 => "Custom".to_string(),
        4080 => "Kelvin".to_string(),
        other => format!("Unknown ({other})"),
    }
}

/// Shared 0/16/32 strength scale used by grain and color-chrome tags.
fn effect_strength(code: u16) -> String {
    match code {
        0 => "Off".to_string(),
        16 => "Weak".to_string(),
        32 => "Strong".to_string(),
        other => format!("Unknown ({other})"),
    }
}

fn dro_name(code: u32) -> String {
    match code {
        0 => "Off".to_string(),
        1 => "Standard".to_string(),
        2 => "Advanced Auto".to_string(),
        3 => "Auto".to_string(),
        8 => "Advanced Level 1".to_string(),
        9 => "Advanced Level 2".to_string(),
        10 => "Advanced Level 3".to_string(),
        11 => "Advanced Level 4".to_string(),
        12 => "Advanced Level 5".to_string(),
        other => format!("Unknown ({other})"),
    }
}
