//! The `PickedExif` projection.
//!
//! Raw EXIF is a grab-bag of several hundred tags; the manifest carries a
//! reduced, strongly-typed subset. Fields that the source metadata encodes
//! as loosely-typed numeric codes (metering mode, flash, white balance)
//! become tagged unions so consumers can pattern-match exhaustively instead
//! of duck-typing: `Known(enum)` for codes we understand, `Raw(code)` for
//! ones we don't, `Missing` when the tag is absent.
//!
//! Normalization rules:
//! - Shutter speed: `exposure_time` is a fraction string (`"1/250"`, `"2s"`),
//!   `exposure_seconds` the decimal value. Both derive from the same
//!   rational; output representation is consistent per field.
//! - GPS: degree-minute-second triples convert to decimal degrees
//!   (`dd = d + m/60 + s/3600`), negated for S/W refs, rounded to six
//!   decimal places (~0.11 m).
//! - Timestamps: `date_taken` is RFC 3339 when an `OffsetTime*` tag supplies
//!   a zone, naive ISO-8601 otherwise; `tz_source` records which.

use super::ifd::{ExifValue, RawExif};
use super::vendor::{FujiRecipe, SonyRecipe};
use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// IFD0
const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
const TAG_MAKE: u16 = 0x010F;
const TAG_MODEL: u16 = 0x0110;
const TAG_ORIENTATION: u16 = 0x0112;
// Exif IFD
const TAG_EXPOSURE_TIME: u16 = 0x829A;
const TAG_F_NUMBER: u16 = 0x829D;
const TAG_ISO: u16 = 0x8827;
const TAG_DATE_TIME_ORIGINAL: u16 = 0x9003;
const TAG_OFFSET_TIME: u16 = 0x9010;
const TAG_OFFSET_TIME_ORIGINAL: u16 = 0x9011;
const TAG_EXPOSURE_COMPENSATION: u16 = 0x9204;
const TAG_METERING_MODE: u16 = 0x9207;
const TAG_FLASH: u16 = 0x9209;
const TAG_FOCAL_LENGTH: u16 = 0x920A;
const TAG_WHITE_BALANCE: u16 = 0xA403;
const TAG_FOCAL_LENGTH_35MM: u16 = 0xA405;
const TAG_LENS_MAKE: u16 = 0xA433;
const TAG_LENS_MODEL: u16 = 0xA434;
// GPS IFD
const TAG_GPS_LAT_REF: u16 = 0x0001;
const TAG_GPS_LAT: u16 = 0x0002;
const TAG_GPS_LON_REF: u16 = 0x0003;
const TAG_GPS_LON: u16 = 0x0004;
const TAG_GPS_ALT_REF: u16 = 0x0005;
const TAG_GPS_ALT: u16 = 0x0006;

/// Value of a coded EXIF field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum TagValue<T> {
    Known(T),
    /// Present but outside the known code table.
    Raw(u16),
    #[default]
    Missing,
}

impl<T> TagValue<T> {
    fn from_code(code: Option<u32>, decode: impl Fn(u16) -> Option<T>) -> Self {
        match code {
            None => TagValue::Missing,
            Some(c) => {
                let c = c as u16;
                match decode(c) {
                    Some(known) => TagValue::Known(known),
                    None => TagValue::Raw(c),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MeteringMode {
    Average,
    CenterWeighted,
    Spot,
    MultiSpot,
    Pattern,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlashMode {
    Fired,
    NotFired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WhiteBalanceMode {
    Auto,
    Manual,
}

/// Where the resolved time zone came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TzSource {
    OffsetTimeOriginal,
    OffsetTime,
    #[default]
    None,
}

/// Reduced, strongly-typed projection of EXIF + maker notes.
///
/// Immutable once attached to a manifest item; derived purely from the
/// source file bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PickedExif {
    /// Free-text caption from IFD0 ImageDescription.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lens_make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lens_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<u16>,

    /// Normalized fraction string: `"1/250"`, or `"2.5s"` for long exposures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f_number: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_length_mm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_length_35mm: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_compensation: Option<f64>,

    #[serde(default)]
    pub metering_mode: TagValue<MeteringMode>,
    #[serde(default)]
    pub flash: TagValue<FlashMode>,
    #[serde(default)]
    pub white_balance: TagValue<WhiteBalanceMode>,

    /// RFC 3339 when a zone is known, naive ISO-8601 otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_taken: Option<String>,
    /// UTC offset like `"+02:00"`, when resolvable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default)]
    pub tz_source: TzSource,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuji_recipe: Option<FujiRecipe>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sony_recipe: Option<SonyRecipe>,
}

impl PickedExif {
    /// Project parsed tag maps into the manifest shape.
    pub fn from_raw(raw: &RawExif) -> Self {
        let ifd0 = &raw.ifd0;
        let exif = &raw.exif;
        let gps = &raw.gps;

        let exposure = exif
            .get(&TAG_EXPOSURE_TIME)
            .and_then(ExifValue::first_rational);
        let (exposure_time, exposure_seconds) = match exposure {
            Some(r) => (format_shutter(r), shutter_seconds(r)),
            None => (None, None),
        };

        let (zone, tz_source) = resolve_zone(exif);
        let date_taken = exif
            .get(&TAG_DATE_TIME_ORIGINAL)
            .and_then(ExifValue::as_str)
            .and_then(|s| format_date_taken(s, zone.as_deref()));

        let (latitude, longitude) = gps_coordinates(gps);

        let mut picked = Self {
            image_description: tag_string(ifd0, TAG_IMAGE_DESCRIPTION),
            make: tag_string(ifd0, TAG_MAKE),
            model: tag_string(ifd0, TAG_MODEL),
            lens_make: tag_string(exif, TAG_LENS_MAKE),
            lens_model: tag_string(exif, TAG_LENS_MODEL),
            orientation: ifd0
                .get(&TAG_ORIENTATION)
                .and_then(ExifValue::first_u32)
                .map(|v| v as u16),
            exposure_time,
            exposure_seconds,
            f_number: exif.get(&TAG_F_NUMBER).and_then(ExifValue::first_f64),
            iso: exif.get(&TAG_ISO).and_then(ExifValue::first_u32),
            focal_length_mm: exif.get(&TAG_FOCAL_LENGTH).and_then(ExifValue::first_f64),
            focal_length_35mm: exif
                .get(&TAG_FOCAL_LENGTH_35MM)
                .and_then(ExifValue::first_u32),
            exposure_compensation: exif
                .get(&TAG_EXPOSURE_COMPENSATION)
                .and_then(ExifValue::first_srational)
                .and_then(|(n, d)| {
                    if d == 0 {
                        None
                    } else {
                        Some(n as f64 / d as f64)
                    }
                }),
            metering_mode: TagValue::from_code(
                exif.get(&TAG_METERING_MODE).and_then(ExifValue::first_u32),
                decode_metering,
            ),
            flash: TagValue::from_code(
                exif.get(&TAG_FLASH).and_then(ExifValue::first_u32),
                decode_flash,
            ),
            white_balance: TagValue::from_code(
                exif.get(&TAG_WHITE_BALANCE).and_then(ExifValue::first_u32),
                decode_white_balance,
            ),
            date_taken,
            zone,
            tz_source,
            latitude,
            longitude,
            altitude_m: gps_altitude(gps),
            fuji_recipe: None,
            sony_recipe: None,
        };

        // Vendor recipes, opportunistically. Absence is never an error.
        if let Some((start, end)) = raw.maker_note {
            let note = &raw.tiff[start..end];
            let make = picked.make.as_deref().unwrap_or("");
            if make.to_ascii_uppercase().contains("FUJI") {
                picked.fuji_recipe = super::vendor::parse_fuji(note, raw.le);
            } else if make.to_ascii_uppercase().contains("SONY") {
                picked.sony_recipe = super::vendor::parse_sony(&raw.tiff, start, raw.le);
            }
        }

        picked
    }
}

fn tag_string(map: &HashMap<u16, ExifValue>, tag: u16) -> Option<String> {
    map.get(&tag)
        .and_then(ExifValue::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn decode_metering(code: u16) -> Option<MeteringMode> {
    match code {
        1 => Some(MeteringMode::Average),
        2 => Some(MeteringMode::CenterWeighted),
        3 => Some(MeteringMode::Spot),
        4 => Some(MeteringMode::MultiSpot),
        5 => Some(MeteringMode::Pattern),
        6 => Some(MeteringMode::Partial),
        _ => None,
    }
}

fn decode_flash(code: u16) -> Option<FlashMode> {
    // Bit 0 of the flash tag is "fired".
    Some(if code & 1 == 1 {
        FlashMode::Fired
    } else {
        FlashMode::NotFired
    })
}

fn decode_white_balance(code: u16) -> Option<WhiteBalanceMode> {
    match code {
        0 => Some(WhiteBalanceMode::Auto),
        1 => Some(WhiteBalanceMode::Manual),
        _ => None,
    }
}

// =============================================================================
// Shutter speed
// =============================================================================

fn shutter_seconds((num, den): (u32, u32)) -> Option<f64> {
    if num == 0 || den == 0 {
        return None;
    }
    Some(num as f64 / den as f64)
}

/// Normalize a shutter rational to a display string.
///
/// Sub-second exposures render as `1/N`; one second and longer as decimal
/// seconds with an `s` suffix.
fn format_shutter(r: (u32, u32)) -> Option<String> {
    let seconds = shutter_seconds(r)?;
    if seconds < 1.0 {
        Some(format!("1/{}", (1.0 / seconds).round() as u64))
    } else if (seconds - seconds.round()).abs() < 1e-9 {
        Some(format!("{}s", seconds.round() as u64))
    } else {
        Some(format!("{seconds}s"))
    }
}

// =============================================================================
// Time zone
// =============================================================================

/// Pick a zone from the OffsetTime tags, preferring the capture-time one.
fn resolve_zone(exif: &HashMap<u16, ExifValue>) -> (Option<String>, TzSource) {
    let original = tag_string(exif, TAG_OFFSET_TIME_ORIGINAL).filter(|s| parse_offset(s).is_some());
    if let Some(zone) = original {
        return (Some(zone), TzSource::OffsetTimeOriginal);
    }
    let fallback = tag_string(exif, TAG_OFFSET_TIME).filter(|s| parse_offset(s).is_some());
    if let Some(zone) = fallback {
        return (Some(zone), TzSource::OffsetTime);
    }
    (None, TzSource::None)
}

/// Parse `"+HH:MM"` / `"-HH:MM"` into a chrono offset.
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let bytes = s.as_bytes();
    if bytes.len() != 6 || bytes[3] != b':' {
        return None;
    }
    let sign = match bytes[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let hours: i32 = s.get(1..3)?.parse().ok()?;
    let minutes: i32 = s.get(4..6)?.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// `"2024:06:01 12:30:00"` (+ optional zone) → ISO-8601 string.
fn format_date_taken(exif_date: &str, zone: Option<&str>) -> Option<String> {
    let naive = NaiveDateTime::parse_from_str(exif_date.trim(), "%Y:%m:%d %H:%M:%S").ok()?;
    match zone.and_then(parse_offset) {
        Some(offset) => offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.to_rfc3339()),
        None => Some(naive.format("%Y-%m-%dT%H:%M:%S").to_string()),
    }
}

// =============================================================================
// GPS
// =============================================================================

/// Convert a DMS triple to decimal degrees.
///
/// `dd = degrees + minutes/60 + seconds/3600`, negated when the reference is
/// S or W, rounded to 6 decimal places (~0.11 m precision).
pub fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64, negate: bool) -> f64 {
    let dd = degrees + minutes / 60.0 + seconds / 3600.0;
    let signed = if negate { -dd } else { dd };
    (signed * 1_000_000.0).round() / 1_000_000.0
}

fn rational_f64((n, d): (u32, u32)) -> Option<f64> {
    if d == 0 {
        None
    } else {
        Some(n as f64 / d as f64)
    }
}

/// Coordinate from a GPS value: a DMS triple, or a single decimal rational.
fn coordinate(value: &ExifValue, reference: Option<&str>) -> Option<f64> {
    let negate = matches!(reference, Some("S") | Some("W"));
    match value {
        ExifValue::Rationals(v) if v.len() >= 3 => {
            let d = rational_f64(v[0])?;
            let m = rational_f64(v[1])?;
            let s = rational_f64(v[2])?;
            Some(dms_to_decimal(d, m, s, negate))
        }
        ExifValue::Rationals(v) if v.len() == 1 => {
            let dd = rational_f64(v[0])?;
            Some(dms_to_decimal(dd, 0.0, 0.0, negate))
        }
        _ => None,
    }
}

fn gps_coordinates(gps: &HashMap<u16, ExifValue>) -> (Option<f64>, Option<f64>) {
    let lat_ref = gps.get(&TAG_GPS_LAT_REF).and_then(ExifValue::as_str);
    let lon_ref = gps.get(&TAG_GPS_LON_REF).and_then(ExifValue::as_str);
    let lat = gps
        .get(&TAG_GPS_LAT)
        .and_then(|v| coordinate(v, lat_ref));
    let lon = gps
        .get(&TAG_GPS_LON)
        .and_then(|v| coordinate(v, lon_ref));
    (lat, lon)
}

fn gps_altitude(gps: &HashMap<u16, ExifValue>) -> Option<f64> {
    let alt = gps
        .get(&TAG_GPS_ALT)
        .and_then(ExifValue::first_rational)
        .and_then(rational_f64)?;
    // AltitudeRef 1 = below sea level
    let below = gps
        .get(&TAG_GPS_ALT_REF)
        .and_then(ExifValue::first_u32)
        .map(|v| v == 1)
        .unwrap_or(false);
    Some(if below { -alt } else { alt })
}
