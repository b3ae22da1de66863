//! Shared test utilities for the gallery-builder test suite.
//!
//! Provides storage-object fixtures and a byte-level TIFF builder used by
//! the EXIF parser tests — building real binary metadata is the only way to
//! exercise the IFD walker without shipping fixture photos.

use crate::storage::StorageObject;
use chrono::{TimeZone, Utc};

/// A listing entry with fixed metadata, keyed only by name.
pub fn object(key: &str) -> StorageObject {
    StorageObject {
        key: key.to_string(),
        size: 1024,
        last_modified: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        etag: format!("etag-{key}"),
    }
}

/// Same entry shape with explicit fingerprint parts.
pub fn object_with(key: &str, size: u64, modified_secs: i64, etag: &str) -> StorageObject {
    StorageObject {
        key: key.to_string(),
        size,
        last_modified: Utc.timestamp_opt(modified_secs, 0).unwrap(),
        etag: etag.to_string(),
    }
}

/// Builder producing valid TIFF blocks (and JPEG APP1 wrappers) for tests.
pub mod exif_builder {
    struct RawEntry {
        tag: u16,
        ftype: u16,
        count: u32,
        data: Vec<u8>,
    }

    /// Builds a TIFF block with IFD0, Exif IFD, and GPS IFD entries.
    ///
    /// Pointer tags (0x8769, 0x8825) are synthesized automatically when the
    /// corresponding sub-IFD has entries.
    pub struct TiffBuilder {
        le: bool,
        ifd0: Vec<RawEntry>,
        exif: Vec<RawEntry>,
        gps: Vec<RawEntry>,
    }

    impl TiffBuilder {
        pub fn new(little_endian: bool) -> Self {
            Self {
                le: little_endian,
                ifd0: Vec::new(),
                exif: Vec::new(),
                gps: Vec::new(),
            }
        }

        fn u16_bytes(&self, v: u16) -> [u8; 2] {
            if self.le {
                v.to_le_bytes()
            } else {
                v.to_be_bytes()
            }
        }

        fn u32_bytes(&self, v: u32) -> [u8; 4] {
            if self.le {
                v.to_le_bytes()
            } else {
                v.to_be_bytes()
            }
        }

        fn ascii_entry(&self, tag: u16, text: &str) -> RawEntry {
            let mut data = text.as_bytes().to_vec();
            data.push(0);
            RawEntry {
                tag,
                ftype: 2,
                count: data.len() as u32,
                data,
            }
        }

        fn u16_entry(&self, tag: u16, values: &[u16]) -> RawEntry {
            let mut data = Vec::new();
            for &v in values {
                data.extend_from_slice(&self.u16_bytes(v));
            }
            RawEntry {
                tag,
                ftype: 3,
                count: values.len() as u32,
                data,
            }
        }

        fn rational_entry(&self, tag: u16, values: &[(u32, u32)], signed: bool) -> RawEntry {
            let mut data = Vec::new();
            for &(n, d) in values {
                data.extend_from_slice(&self.u32_bytes(n));
                data.extend_from_slice(&self.u32_bytes(d));
            }
            RawEntry {
                tag,
                ftype: if signed { 10 } else { 5 },
                count: values.len() as u32,
                data,
            }
        }

        pub fn ifd0_ascii(&mut self, tag: u16, text: &str) {
            let e = self.ascii_entry(tag, text);
            self.ifd0.push(e);
        }

        pub fn exif_ascii(&mut self, tag: u16, text: &str) {
            let e = self.ascii_entry(tag, text);
            self.exif.push(e);
        }

        pub fn exif_u16(&mut self, tag: u16, value: u16) {
            let e = self.u16_entry(tag, &[value]);
            self.exif.push(e);
        }

        pub fn exif_rational(&mut self, tag: u16, num: u32, den: u32) {
            let e = self.rational_entry(tag, &[(num, den)], false);
            self.exif.push(e);
        }

        pub fn exif_srational(&mut self, tag: u16, num: i32, den: i32) {
            let e = self.rational_entry(tag, &[(num as u32, den as u32)], true);
            self.exif.push(e);
        }

        pub fn exif_undefined(&mut self, tag: u16, bytes: &[u8]) {
            self.exif.push(RawEntry {
                tag,
                ftype: 7,
                count: bytes.len() as u32,
                data: bytes.to_vec(),
            });
        }

        pub fn gps_ascii(&mut self, tag: u16, text: &str) {
            let e = self.ascii_entry(tag, text);
            self.gps.push(e);
        }

        pub fn gps_rational(&mut self, tag: u16, num: u32, den: u32) {
            let e = self.rational_entry(tag, &[(num, den)], false);
            self.gps.push(e);
        }

        pub fn gps_rationals(&mut self, tag: u16, values: &[(u32, u32)]) {
            let e = self.rational_entry(tag, values, false);
            self.gps.push(e);
        }

        pub fn gps_u8s(&mut self, tag: u16, bytes: &[u8]) {
            self.gps.push(RawEntry {
                tag,
                ftype: 1,
                count: bytes.len() as u32,
                data: bytes.to_vec(),
            });
        }

        /// Assemble the TIFF block.
        pub fn build(&self) -> Vec<u8> {
            let ifd_size = |n: usize| 2 + 12 * n + 4;

            let mut ifd0_count = self.ifd0.len();
            if !self.exif.is_empty() {
                ifd0_count += 1;
            }
            if !self.gps.is_empty() {
                ifd0_count += 1;
            }

            let ifd0_offset = 8usize;
            let exif_offset = ifd0_offset + ifd_size(ifd0_count);
            let gps_offset = exif_offset
                + if self.exif.is_empty() {
                    0
                } else {
                    ifd_size(self.exif.len())
                };
            let data_offset = gps_offset
                + if self.gps.is_empty() {
                    0
                } else {
                    ifd_size(self.gps.len())
                };

            let mut out = Vec::new();
            out.extend_from_slice(if self.le { b"II" } else { b"MM" });
            out.extend_from_slice(&self.u16_bytes(42));
            out.extend_from_slice(&self.u32_bytes(ifd0_offset as u32));

            let mut data_area: Vec<u8> = Vec::new();

            // IFD0 with synthesized pointer entries, sorted by tag.
            let mut ifd0_entries: Vec<(u16, u16, u32, Vec<u8>)> = self
                .ifd0
                .iter()
                .map(|e| (e.tag, e.ftype, e.count, e.data.clone()))
                .collect();
            if !self.exif.is_empty() {
                ifd0_entries.push((
                    0x8769,
                    4,
                    1,
                    self.u32_bytes(exif_offset as u32).to_vec(),
                ));
            }
            if !self.gps.is_empty() {
                ifd0_entries.push((0x8825, 4, 1, self.u32_bytes(gps_offset as u32).to_vec()));
            }
            ifd0_entries.sort_by_key(|e| e.0);

            self.write_ifd(&mut out, &ifd0_entries, data_offset, &mut data_area);
            if !self.exif.is_empty() {
                let entries: Vec<_> = self
                    .exif
                    .iter()
                    .map(|e| (e.tag, e.ftype, e.count, e.data.clone()))
                    .collect();
                self.write_ifd(&mut out, &entries, data_offset, &mut data_area);
            }
            if !self.gps.is_empty() {
                let entries: Vec<_> = self
                    .gps
                    .iter()
                    .map(|e| (e.tag, e.ftype, e.count, e.data.clone()))
                    .collect();
                self.write_ifd(&mut out, &entries, data_offset, &mut data_area);
            }

            out.extend_from_slice(&data_area);
            out
        }

        fn write_ifd(
            &self,
            out: &mut Vec<u8>,
            entries: &[(u16, u16, u32, Vec<u8>)],
            data_offset: usize,
            data_area: &mut Vec<u8>,
        ) {
            out.extend_from_slice(&self.u16_bytes(entries.len() as u16));
            for (tag, ftype, count, data) in entries {
                out.extend_from_slice(&self.u16_bytes(*tag));
                out.extend_from_slice(&self.u16_bytes(*ftype));
                out.extend_from_slice(&self.u32_bytes(*count));
                if data.len() <= 4 {
                    let mut inline = data.clone();
                    inline.resize(4, 0);
                    out.extend_from_slice(&inline);
                } else {
                    let offset = data_offset + data_area.len();
                    out.extend_from_slice(&self.u32_bytes(offset as u32));
                    data_area.extend_from_slice(data);
                }
            }
            out.extend_from_slice(&self.u32_bytes(0)); // next IFD
        }

        /// Wrap the TIFF block in a minimal JPEG with an APP1 Exif segment.
        pub fn build_jpeg(&self) -> Vec<u8> {
            let tiff = self.build();
            let payload_len = 2 + 6 + tiff.len(); // length field + "Exif\0\0" + tiff
            let mut out = vec![0xFF, 0xD8];
            out.extend_from_slice(&[0xFF, 0xE1]);
            out.extend_from_slice(&(payload_len as u16).to_be_bytes());
            out.extend_from_slice(b"Exif\x00\x00");
            out.extend_from_slice(&tiff);
            out.extend_from_slice(&[0xFF, 0xD9]);
            out
        }
    }
}
