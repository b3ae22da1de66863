//! EXIF metadata extraction — pure Rust, zero external dependencies.
//!
//! | Stage | Module |
//! |---|---|
//! | Container + IFD walking | [`ifd`] (JPEG APP1, bare TIFF, HEIC/AVIF scan) |
//! | Typed projection | [`picked`] (`PickedExif`, GPS, time zones) |
//! | Vendor recipes | [`vendor`] (Fuji film simulation, Sony creative style) |
//!
//! The module is read-only with respect to the pipeline: it turns source
//! bytes into an immutable `PickedExif`, and every parse failure degrades
//! to absent metadata rather than a per-object error — a photo without
//! readable EXIF is still a photo.

pub mod ifd;
pub mod picked;
pub mod vendor;

pub use ifd::{read_exif, RawExif};
pub use picked::{
    FlashMode, MeteringMode, PickedExif, TagValue, TzSource, WhiteBalanceMode,
};
pub use vendor::{FujiRecipe, SonyRecipe};

/// Extract the manifest's EXIF projection from source file bytes.
///
/// `None` when the file carries no parseable EXIF block.
pub fn extract(bytes: &[u8]) -> Option<PickedExif> {
    read_exif(bytes).map(|raw| PickedExif::from_raw(&raw))
}
