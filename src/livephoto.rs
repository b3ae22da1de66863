//! Live Photo pairing.
//!
//! A Live Photo is a still image plus a short video companion sharing a
//! filename stem (`IMG_0001.heic` + `IMG_0001.mov`), presented downstream as
//! one animated unit. Pairing works on the full storage listing: companions
//! are not image-eligible keys, so they only show up in `list_all_files`.
//!
//! When several video candidates share a stem, the lexicographically
//! smallest key wins. That case is real (e.g. `.mov` exported twice as
//! `.mp4`), so the tie-break has to be deterministic rather than
//! listing-order dependent.

use crate::storage::{key_extension, key_stem, StorageObject};
use std::collections::HashMap;

/// Video container extensions recognized as Live Photo companions.
const VIDEO_EXTENSIONS: &[&str] = &["mov", "mp4"];

/// True when a key looks like a Live Photo video companion.
pub fn is_video_companion(key: &str) -> bool {
    match key_extension(key) {
        Some(ext) => VIDEO_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

/// Scan the full listing and map each stem to its video companion.
///
/// Returns `stem → companion object`. At most one companion per stem; ties
/// resolve to the lexicographically smallest key.
pub fn detect_pairs(all_files: &[StorageObject]) -> HashMap<String, StorageObject> {
    let mut pairs: HashMap<String, StorageObject> = HashMap::new();
    for obj in all_files {
        if !is_video_companion(&obj.key) {
            continue;
        }
        let stem = key_stem(&obj.key).to_string();
        let wins = match pairs.get(&stem) {
            Some(existing) => obj.key < existing.key,
            None => true,
        };
        if wins {
            pairs.insert(stem, obj.clone());
        }
    }
    pairs
}

/// Look up the companion for an image key, if any.
pub fn companion_for<'a>(
    image_key: &str,
    pairs: &'a HashMap<String, StorageObject>,
) -> Option<&'a StorageObject> {
    pairs.get(key_stem(image_key))
}
