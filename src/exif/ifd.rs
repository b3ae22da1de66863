//! Minimal TIFF/EXIF IFD parser.
//!
//! Walks IFD0 → Exif IFD → GPS IFD and collects tags into maps keyed by tag
//! id. Handles both byte orders, inline and offset-stored values, and keeps
//! the maker-note byte range for vendor-specific parsing.
//!
//! Input discovery:
//! - JPEG: APP1 segment carrying `Exif\0\0` + TIFF block
//! - TIFF: the file is the TIFF block
//! - HEIC/AVIF: best-effort byte-scan for an embedded `Exif\0\0` + TIFF
//!   header (the metadata box layout varies; the scan finds the block
//!   without a full ISOBMFF walk)
//!
//! Any structural problem degrades to "no metadata": like the IPTC path,
//! a corrupt or truncated block must never fail the object, let alone the
//! batch.

use std::collections::HashMap;

/// A decoded tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum ExifValue {
    Ascii(String),
    U8s(Vec<u8>),
    U16s(Vec<u16>),
    U32s(Vec<u32>),
    /// Unsigned rationals as (numerator, denominator) pairs.
    Rationals(Vec<(u32, u32)>),
    /// Signed rationals as (numerator, denominator) pairs.
    SRationals(Vec<(i32, i32)>),
    Undefined(Vec<u8>),
}

impl ExifValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExifValue::Ascii(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn first_u32(&self) -> Option<u32> {
        match self {
            ExifValue::U16s(v) => v.first().map(|&x| x as u32),
            ExifValue::U32s(v) => v.first().copied(),
            ExifValue::U8s(v) => v.first().map(|&x| x as u32),
            _ => None,
        }
    }

    pub fn first_rational(&self) -> Option<(u32, u32)> {
        match self {
            ExifValue::Rationals(v) => v.first().copied(),
            _ => None,
        }
    }

    pub fn first_srational(&self) -> Option<(i32, i32)> {
        match self {
            ExifValue::SRationals(v) => v.first().copied(),
            _ => None,
        }
    }

    /// First value as f64, for rational-or-integer tags.
    pub fn first_f64(&self) -> Option<f64> {
        match self {
            ExifValue::Rationals(v) => v.first().map(|&(n, d)| {
                if d == 0 {
                    0.0
                } else {
                    n as f64 / d as f64
                }
            }),
            ExifValue::SRationals(v) => v.first().map(|&(n, d)| {
                if d == 0 {
                    0.0
                } else {
                    n as f64 / d as f64
                }
            }),
            _ => self.first_u32().map(|x| x as f64),
        }
    }
}

/// Tag maps per IFD, plus the raw TIFF block for maker-note parsing.
#[derive(Debug, Clone, Default)]
pub struct RawExif {
    pub ifd0: HashMap<u16, ExifValue>,
    pub exif: HashMap<u16, ExifValue>,
    pub gps: HashMap<u16, ExifValue>,
    /// The full TIFF block (vendor notes carry offsets relative to it).
    pub tiff: Vec<u8>,
    /// Byte range of the maker note within `tiff`.
    pub maker_note: Option<(usize, usize)>,
    /// Little-endian byte order; vendor IFDs reuse it.
    pub le: bool,
}

// IFD0 pointer tags
const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_GPS_IFD: u16 = 0x8825;
/// Maker note tag, inside the Exif IFD.
pub const TAG_MAKER_NOTE: u16 = 0x927C;

/// Parse EXIF metadata out of a file's bytes. `None` when absent or corrupt.
pub fn read_exif(bytes: &[u8]) -> Option<RawExif> {
    let tiff = find_tiff_block(bytes)?;
    parse_tiff(tiff)
}

/// Locate the TIFF block inside the container.
fn find_tiff_block(bytes: &[u8]) -> Option<&[u8]> {
    if is_tiff_header(bytes) {
        return Some(bytes);
    }
    if bytes.starts_with(&[0xFF, 0xD8]) {
        return find_jpeg_app1_exif(bytes);
    }
    // HEIC/AVIF best effort: scan for the Exif marker anywhere in the file.
    scan_for_exif_marker(bytes)
}

fn is_tiff_header(data: &[u8]) -> bool {
    data.len() >= 8 && (data.starts_with(b"II\x2A\x00") || data.starts_with(b"MM\x00\x2A"))
}

const EXIF_MARKER: &[u8] = b"Exif\x00\x00";

/// Find the TIFF block inside a JPEG's APP1 segment.
fn find_jpeg_app1_exif(data: &[u8]) -> Option<&[u8]> {
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = data[pos + 1];
        // SOS means compressed data starts — stop scanning
        if marker == 0xDA {
            break;
        }
        if marker == 0xD8 || marker == 0xD9 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }
        if pos + 4 > data.len() {
            break;
        }
        let seg_len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let seg_start = pos + 4;
        let seg_end = (pos + 2 + seg_len).min(data.len());
        if marker == 0xE1 && seg_end > seg_start {
            let segment = &data[seg_start..seg_end];
            if let Some(tiff) = segment.strip_prefix(EXIF_MARKER) {
                if is_tiff_header(tiff) {
                    return Some(tiff);
                }
            }
        }
        pos += 2 + seg_len.max(2);
    }
    None
}

/// Byte-scan for `Exif\0\0` followed by a TIFF header.
fn scan_for_exif_marker(data: &[u8]) -> Option<&[u8]> {
    let mut pos = 0;
    while pos + EXIF_MARKER.len() + 8 <= data.len() {
        if &data[pos..pos + EXIF_MARKER.len()] == EXIF_MARKER {
            let candidate = &data[pos + EXIF_MARKER.len()..];
            if is_tiff_header(candidate) {
                return Some(candidate);
            }
        }
        pos += 1;
    }
    None
}

/// Byte-order-aware primitive reads, all bounds-checked.
struct Reader<'a> {
    data: &'a [u8],
    le: bool,
}

impl<'a> Reader<'a> {
    fn u16_at(&self, pos: usize) -> Option<u16> {
        let b = self.data.get(pos..pos + 2)?;
        Some(if self.le {
            u16::from_le_bytes([b[0], b[1]])
        } else {
            u16::from_be_bytes([b[0], b[1]])
        })
    }

    fn u32_at(&self, pos: usize) -> Option<u32> {
        let b = self.data.get(pos..pos + 4)?;
        Some(if self.le {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        })
    }

    fn i32_at(&self, pos: usize) -> Option<i32> {
        self.u32_at(pos).map(|v| v as i32)
    }
}

/// Byte size of one element of a TIFF field type.
fn type_size(field_type: u16) -> Option<usize> {
    match field_type {
        1 | 2 | 7 => Some(1), // BYTE, ASCII, UNDEFINED
        3 => Some(2),         // SHORT
        4 | 9 => Some(4),     // LONG, SLONG
        5 | 10 => Some(8),    // RATIONAL, SRATIONAL
        _ => None,
    }
}

/// Hard cap on element counts; a corrupt count field must not OOM us.
const MAX_ELEMENTS: usize = 64 * 1024;

fn parse_tiff(tiff: &[u8]) -> Option<RawExif> {
    let le = tiff.starts_with(b"II");
    let r = Reader { data: tiff, le };
    if r.u16_at(2)? != 42 {
        return None;
    }
    let ifd0_offset = r.u32_at(4)? as usize;

    let mut out = RawExif {
        tiff: tiff.to_vec(),
        le,
        ..RawExif::default()
    };

    parse_ifd(&r, ifd0_offset, &mut out.ifd0);

    if let Some(exif_offset) = out.ifd0.get(&TAG_EXIF_IFD).and_then(|v| v.first_u32()) {
        parse_ifd(&r, exif_offset as usize, &mut out.exif);
    }
    if let Some(gps_offset) = out.ifd0.get(&TAG_GPS_IFD).and_then(|v| v.first_u32()) {
        parse_ifd(&r, gps_offset as usize, &mut out.gps);
    }

    out.maker_note = maker_note_range(&r, &out.exif);

    if out.ifd0.is_empty() && out.exif.is_empty() && out.gps.is_empty() {
        return None;
    }
    Some(out)
}

/// Recover the maker note's byte range inside the TIFF block.
///
/// The parsed value already holds the bytes, but vendor IFDs reference
/// offsets relative to the TIFF block (Sony) or the note itself (Fuji), so
/// the position matters as much as the content.
fn maker_note_range(r: &Reader<'_>, exif: &HashMap<u16, ExifValue>) -> Option<(usize, usize)> {
    let note = match exif.get(&TAG_MAKER_NOTE) {
        Some(ExifValue::Undefined(bytes)) => bytes,
        _ => return None,
    };
    if note.len() <= 4 {
        return None;
    }
    // Find the note bytes within the block. The parse recorded content, not
    // position; a subslice search recovers it unambiguously for real-world
    // note sizes.
    let start = find_subslice(r.data, note)?;
    Some((start, start + note.len()))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parse one IFD's entries into `into`. Unknown/corrupt entries are skipped.
fn parse_ifd(r: &Reader<'_>, offset: usize, into: &mut HashMap<u16, ExifValue>) {
    let count = match r.u16_at(offset) {
        Some(c) => c as usize,
        None => return,
    };
    for i in 0..count {
        let entry = offset + 2 + i * 12;
        let (tag, value) = match parse_entry(r, entry) {
            Some(parsed) => parsed,
            None => continue,
        };
        into.insert(tag, value);
    }
}

fn parse_entry(r: &Reader<'_>, entry: usize) -> Option<(u16, ExifValue)> {
    let tag = r.u16_at(entry)?;
    let field_type = r.u16_at(entry + 2)?;
    let count = r.u32_at(entry + 4)? as usize;
    let elem_size = type_size(field_type)?;
    if count == 0 || count > MAX_ELEMENTS {
        return None;
    }

    let byte_len = elem_size.checked_mul(count)?;
    let data_pos = if byte_len <= 4 {
        entry + 8
    } else {
        r.u32_at(entry + 8)? as usize
    };
    if data_pos.checked_add(byte_len)? > r.data.len() {
        return None;
    }

    let value = match field_type {
        1 => ExifValue::U8s(r.data[data_pos..data_pos + count].to_vec()),
        2 => {
            let raw = &r.data[data_pos..data_pos + count];
            let text = raw.split(|&b| b == 0).next().unwrap_or(raw);
            ExifValue::Ascii(String::from_utf8_lossy(text).trim().to_string())
        }
        3 => {
            let mut v = Vec::with_capacity(count);
            for j in 0..count {
                v.push(r.u16_at(data_pos + j * 2)?);
            }
            ExifValue::U16s(v)
        }
        4 => {
            let mut v = Vec::with_capacity(count);
            for j in 0..count {
                v.push(r.u32_at(data_pos + j * 4)?);
            }
            ExifValue::U32s(v)
        }
        9 => {
            let mut v = Vec::with_capacity(count);
            for j in 0..count {
                v.push(r.i32_at(data_pos + j * 4)? as u32);
            }
            ExifValue::U32s(v)
        }
        5 => {
            let mut v = Vec::with_capacity(count);
            for j in 0..count {
                let n = r.u32_at(data_pos + j * 8)?;
                let d = r.u32_at(data_pos + j * 8 + 4)?;
                v.push((n, d));
            }
            ExifValue::Rationals(v)
        }
        10 => {
            let mut v = Vec::with_capacity(count);
            for j in 0..count {
                let n = r.i32_at(data_pos + j * 8)?;
                let d = r.i32_at(data_pos + j * 8 + 4)?;
                v.push((n, d));
            }
            ExifValue::SRationals(v)
        }
        7 => ExifValue::Undefined(r.data[data_pos..data_pos + count].to_vec()),
        _ => return None,
    };
    Some((tag, value))
}

/// Parse a vendor sub-IFD at `offset` with value offsets relative to `base`.
///
/// Fuji maker notes use offsets relative to the note itself; Sony uses
/// offsets relative to the TIFF block. The caller picks the base slice.
pub fn parse_vendor_ifd(
    base: &[u8],
    offset: usize,
    le: bool,
) -> HashMap<u16, ExifValue> {
    let r = Reader { data: base, le };
    let mut out = HashMap::new();
    parse_ifd(&r, offset, &mut out);
    out
}
