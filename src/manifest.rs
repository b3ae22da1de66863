//! Manifest model and reconciliation.
//!
//! The manifest is the pipeline's terminal artifact: the durable list of
//! every processed photo, serialized as camelCase JSON and served verbatim
//! to downstream consumers (public endpoint, feed generator, dashboard).
//! It is owned exclusively by the reconciler during a build and read-only
//! to everyone else.
//!
//! ## Reconciliation
//!
//! A build diffs the current storage listing against the previous manifest
//! and classifies every object:
//!
//! - **new**: key absent from the previous manifest → full processing
//! - **unchanged**: key present, fingerprint (etag, size, lastModified)
//!   matches, no force mode → previous item carried forward verbatim
//! - **changed**: key present, fingerprint differs → reprocessed, item
//!   replaced while the id stays stable (unless digest suffixing moves it)
//! - **deleted**: key present previously, absent now → dropped from the
//!   output; its stored derivatives are cleaned up best-effort
//!
//! The previous-manifest map is built once, O(n), before any per-object
//! decision, and is read-only during the concurrent phase. Output ordering
//! follows the listing (key-sorted), never worker completion order.
//!
//! ## Versioning and robustness
//!
//! Like any cache-shaped artifact, loads are tolerant: a missing, corrupt,
//! or version-mismatched manifest loads as empty and the next build
//! regenerates everything. Bump [`MANIFEST_VERSION`] to invalidate old
//! manifests when the format changes.

use crate::exif::PickedExif;
use crate::imaging::ToneAnalysis;
use crate::storage::StorageObject;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Storage key under which the manifest artifact is persisted.
pub const MANIFEST_KEY: &str = "manifest.json";

/// Version of the manifest format. Bump to invalidate existing manifests
/// when the shape or id computation changes.
pub const MANIFEST_VERSION: u32 = 2;

/// One processed photo's durable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoManifestItem {
    /// Stable across rebuilds for the same storage key, unless digest
    /// suffixing is enabled and the content changed.
    pub id: String,
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_taken: Option<String>,

    pub width: u32,
    pub height: u32,
    pub aspect_ratio: f64,

    pub original_url: String,
    pub thumbnail_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_photo_video_url: Option<String>,
    pub thumb_hash: Option<String>,

    /// Provenance: the normalized storage key plus its fingerprint parts.
    pub s3_key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    pub etag: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exif: Option<PickedExif>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone_analysis: Option<ToneAnalysis>,

    #[serde(default)]
    pub is_live_photo: bool,
    #[serde(default)]
    pub is_hdr: bool,
}

/// Counts per worker result type, carried as build metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildCounts {
    pub new: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub deleted: usize,
}

/// The aggregate artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub counts: BuildCounts,
    pub data: Vec<PhotoManifestItem>,
}

impl Manifest {
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION,
            generated_at: DateTime::<Utc>::UNIX_EPOCH,
            counts: BuildCounts::default(),
            data: Vec::new(),
        }
    }

    /// Parse a stored manifest. Missing, corrupt, or version-mismatched
    /// input loads as empty — the next build regenerates from scratch.
    pub fn from_json(bytes: Option<&[u8]>) -> Self {
        let bytes = match bytes {
            Some(b) => b,
            None => return Self::empty(),
        };
        let manifest: Self = match serde_json::from_slice(bytes) {
            Ok(m) => m,
            Err(_) => return Self::empty(),
        };
        if manifest.version != MANIFEST_VERSION {
            return Self::empty();
        }
        manifest
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Key → item lookup map. Built once before the concurrent phase and
    /// read-only while workers run.
    pub fn index(&self) -> HashMap<&str, &PhotoManifestItem> {
        self.data
            .iter()
            .map(|item| (item.s3_key.as_str(), item))
            .collect()
    }
}

// =============================================================================
// Fingerprints and ids
// =============================================================================

/// The change-detection tuple: (etag, size, lastModified).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

impl From<&StorageObject> for Fingerprint {
    fn from(obj: &StorageObject) -> Self {
        Self {
            etag: obj.etag.clone(),
            size: obj.size,
            last_modified: obj.last_modified,
        }
    }
}

impl From<&PhotoManifestItem> for Fingerprint {
    fn from(item: &PhotoManifestItem) -> Self {
        Self {
            etag: item.etag.clone(),
            size: item.size,
            last_modified: item.last_modified,
        }
    }
}

/// Derive an item id from a normalized storage key.
///
/// The key's extension is dropped, separators become dashes, and anything
/// non-URL-safe is dashed out, so ids are safe in URLs and filenames alike.
/// With digest suffixing enabled, the first `suffix_len` hex chars of the
/// content's SHA-256 disambiguate same-key-different-content cases.
pub fn item_id(key: &str, content: Option<&[u8]>, suffix_len: usize) -> String {
    let stem = crate::storage::key_stem(key);
    let mut id = String::with_capacity(stem.len());
    let mut prev_dash = false;
    for c in stem.chars() {
        let mapped = if c.is_ascii_alphanumeric() { c } else { '-' };
        if mapped == '-' {
            if !prev_dash && !id.is_empty() {
                id.push('-');
            }
            prev_dash = true;
        } else {
            id.push(mapped);
            prev_dash = false;
        }
    }
    let id = id.trim_end_matches('-').to_string();

    match content {
        Some(bytes) if suffix_len > 0 => {
            let digest = Sha256::digest(bytes);
            let hex = format!("{digest:x}");
            format!("{id}-{}", &hex[..suffix_len.min(hex.len())])
        }
        _ => id,
    }
}

// =============================================================================
// Reconciliation plan
// =============================================================================

/// Which parts of an item a work unit refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshScope {
    /// Decode, metadata, and derivatives.
    Full,
    /// Metadata only; stored derivatives are reused.
    ManifestOnly,
    /// Derivatives only; metadata is carried from the previous item.
    ThumbnailsOnly,
}

/// Force-mode policy toggles. Same algorithm, different skip decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceModes {
    /// Reprocess everything, ignoring fingerprints.
    pub force: bool,
    /// Re-extract metadata for unchanged items.
    pub force_manifest: bool,
    /// Regenerate thumbnails for unchanged items.
    pub force_thumbnails: bool,
}

impl ForceModes {
    fn overrides_unchanged(&self) -> bool {
        self.force || self.force_manifest || self.force_thumbnails
    }

    fn scope_for_unchanged(&self) -> RefreshScope {
        if self.force {
            RefreshScope::Full
        } else if self.force_manifest {
            RefreshScope::ManifestOnly
        } else {
            RefreshScope::ThumbnailsOnly
        }
    }
}

/// One object the workers must touch, pinned to its listing index so the
/// final assembly is independent of completion order.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub index: usize,
    pub object: StorageObject,
    pub previous: Option<PhotoManifestItem>,
    pub scope: RefreshScope,
}

impl WorkItem {
    /// True when the key was absent from the previous manifest.
    pub fn is_new(&self) -> bool {
        self.previous.is_none()
    }
}

/// Output of the diff pass.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    /// Objects needing work, in listing order.
    pub to_process: Vec<WorkItem>,
    /// Unchanged items carried forward verbatim, with their listing index.
    pub carried: Vec<(usize, PhotoManifestItem)>,
    /// Previous items whose keys vanished from the listing.
    pub deleted: Vec<PhotoManifestItem>,
}

/// Diff the current listing against the previous manifest.
pub fn plan(previous: &Manifest, listing: &[StorageObject], force: ForceModes) -> ReconcilePlan {
    let index = previous.index();
    let mut out = ReconcilePlan::default();

    for (i, obj) in listing.iter().enumerate() {
        match index.get(obj.key.as_str()) {
            None => out.to_process.push(WorkItem {
                index: i,
                object: obj.clone(),
                previous: None,
                scope: RefreshScope::Full,
            }),
            Some(&prev) => {
                let unchanged = Fingerprint::from(obj) == Fingerprint::from(prev);
                if unchanged && !force.overrides_unchanged() {
                    out.carried.push((i, prev.clone()));
                } else {
                    let scope = if unchanged {
                        force.scope_for_unchanged()
                    } else {
                        RefreshScope::Full
                    };
                    out.to_process.push(WorkItem {
                        index: i,
                        object: obj.clone(),
                        previous: Some(prev.clone()),
                        scope,
                    });
                }
            }
        }
    }

    let live_keys: HashSet<&str> = listing.iter().map(|o| o.key.as_str()).collect();
    out.deleted = previous
        .data
        .iter()
        .filter(|item| !live_keys.contains(item.s3_key.as_str()))
        .cloned()
        .collect();

    out
}

/// Merge carried and freshly processed items into the final manifest.
///
/// `processed` pairs each item with its listing index; workers may have
/// completed in any order. Failed slots simply contribute nothing here —
/// the caller decides whether a previous item stands in.
pub fn assemble(
    carried: Vec<(usize, PhotoManifestItem)>,
    processed: Vec<(usize, PhotoManifestItem)>,
    counts: BuildCounts,
    generated_at: DateTime<Utc>,
) -> Manifest {
    let mut slots: Vec<(usize, PhotoManifestItem)> = carried;
    slots.extend(processed);
    slots.sort_by_key(|(index, _)| *index);

    Manifest {
        version: MANIFEST_VERSION,
        generated_at,
        counts,
        data: slots.into_iter().map(|(_, item)| item).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{object, object_with};

    fn item_for(obj: &StorageObject) -> PhotoManifestItem {
        PhotoManifestItem {
            id: item_id(&obj.key, None, 0),
            title: Some("t".into()),
            description: None,
            tags: Vec::new(),
            date_taken: None,
            width: 100,
            height: 50,
            aspect_ratio: 2.0,
            original_url: format!("https://x/{}", obj.key),
            thumbnail_url: format!("https://x/thumbnails/{}.avif", obj.key),
            live_photo_video_url: None,
            thumb_hash: None,
            s3_key: obj.key.clone(),
            last_modified: obj.last_modified,
            size: obj.size,
            etag: obj.etag.clone(),
            exif: None,
            tone_analysis: None,
            is_live_photo: false,
            is_hdr: false,
        }
    }

    fn manifest_of(objects: &[StorageObject]) -> Manifest {
        Manifest {
            version: MANIFEST_VERSION,
            generated_at: DateTime::<Utc>::UNIX_EPOCH,
            counts: BuildCounts::default(),
            data: objects.iter().map(item_for).collect(),
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    #[test]
    fn absent_key_is_new() {
        let previous = Manifest::empty();
        let listing = vec![object("a.jpg")];
        let plan = plan(&previous, &listing, ForceModes::default());

        assert_eq!(plan.to_process.len(), 1);
        assert!(plan.to_process[0].is_new());
        assert_eq!(plan.to_process[0].scope, RefreshScope::Full);
        assert!(plan.carried.is_empty());
        assert!(plan.deleted.is_empty());
    }

    #[test]
    fn matching_fingerprint_is_unchanged() {
        let listing = vec![object("a.jpg")];
        let previous = manifest_of(&listing);
        let plan = plan(&previous, &listing, ForceModes::default());

        assert!(plan.to_process.is_empty());
        assert_eq!(plan.carried.len(), 1);
        assert_eq!(plan.carried[0].1.s3_key, "a.jpg");
    }

    #[test]
    fn each_fingerprint_part_triggers_changed() {
        let base = object_with("a.jpg", 100, 1000, "e1");
        let previous = manifest_of(&[base.clone()]);

        for changed in [
            object_with("a.jpg", 100, 1000, "e2"),
            object_with("a.jpg", 999, 1000, "e1"),
            object_with("a.jpg", 100, 2000, "e1"),
        ] {
            let listing = vec![changed];
            let plan = plan(&previous, &listing, ForceModes::default());
            assert_eq!(plan.to_process.len(), 1, "fingerprint change missed");
            assert!(!plan.to_process[0].is_new());
            assert_eq!(plan.to_process[0].scope, RefreshScope::Full);
        }
    }

    #[test]
    fn only_the_changed_object_is_reprocessed() {
        let a = object_with("a.jpg", 1, 1, "ea");
        let b = object_with("b.jpg", 2, 2, "eb");
        let c = object_with("c.jpg", 3, 3, "ec");
        let previous = manifest_of(&[a.clone(), b.clone(), c.clone()]);

        let listing = vec![a, object_with("b.jpg", 2, 2, "eb-changed"), c];
        let plan = plan(&previous, &listing, ForceModes::default());

        assert_eq!(plan.to_process.len(), 1);
        assert_eq!(plan.to_process[0].object.key, "b.jpg");
        assert_eq!(plan.carried.len(), 2);
    }

    #[test]
    fn vanished_key_is_deleted() {
        let a = object("a.jpg");
        let b = object("b.jpg");
        let previous = manifest_of(&[a.clone(), b]);

        let plan = plan(&previous, &[a], ForceModes::default());
        assert_eq!(plan.deleted.len(), 1);
        assert_eq!(plan.deleted[0].s3_key, "b.jpg");
        assert_eq!(plan.carried.len(), 1);
        assert!(plan.to_process.is_empty());
    }

    // =========================================================================
    // Force modes
    // =========================================================================

    #[test]
    fn force_mode_reprocesses_unchanged_items() {
        let listing = vec![object("a.jpg"), object("b.jpg")];
        let previous = manifest_of(&listing);
        let plan = plan(
            &previous,
            &listing,
            ForceModes {
                force: true,
                ..Default::default()
            },
        );

        assert_eq!(plan.to_process.len(), 2);
        assert!(plan.carried.is_empty());
        assert!(plan
            .to_process
            .iter()
            .all(|w| w.scope == RefreshScope::Full));
    }

    #[test]
    fn force_manifest_touches_metadata_only() {
        let listing = vec![object("a.jpg")];
        let previous = manifest_of(&listing);
        let plan = plan(
            &previous,
            &listing,
            ForceModes {
                force_manifest: true,
                ..Default::default()
            },
        );
        assert_eq!(plan.to_process.len(), 1);
        assert_eq!(plan.to_process[0].scope, RefreshScope::ManifestOnly);
    }

    #[test]
    fn force_thumbnails_regenerates_derivatives_only() {
        let listing = vec![object("a.jpg")];
        let previous = manifest_of(&listing);
        let plan = plan(
            &previous,
            &listing,
            ForceModes {
                force_thumbnails: true,
                ..Default::default()
            },
        );
        assert_eq!(plan.to_process[0].scope, RefreshScope::ThumbnailsOnly);
    }

    #[test]
    fn genuinely_changed_item_gets_full_scope_despite_partial_force() {
        let base = object_with("a.jpg", 100, 1000, "e1");
        let previous = manifest_of(&[base]);
        let listing = vec![object_with("a.jpg", 100, 1000, "e2")];
        let plan = plan(
            &previous,
            &listing,
            ForceModes {
                force_thumbnails: true,
                ..Default::default()
            },
        );
        assert_eq!(plan.to_process[0].scope, RefreshScope::Full);
    }

    // =========================================================================
    // Assembly
    // =========================================================================

    #[test]
    fn assembly_is_independent_of_completion_order() {
        let a = item_for(&object("a.jpg"));
        let b = item_for(&object("b.jpg"));
        let c = item_for(&object("c.jpg"));

        // Workers finished out of order: index 2 first
        let m1 = assemble(
            vec![(1, b.clone())],
            vec![(2, c.clone()), (0, a.clone())],
            BuildCounts::default(),
            DateTime::<Utc>::UNIX_EPOCH,
        );
        let m2 = assemble(
            vec![(1, b)],
            vec![(0, a), (2, c)],
            BuildCounts::default(),
            DateTime::<Utc>::UNIX_EPOCH,
        );

        let keys1: Vec<&str> = m1.data.iter().map(|i| i.s3_key.as_str()).collect();
        let keys2: Vec<&str> = m2.data.iter().map(|i| i.s3_key.as_str()).collect();
        assert_eq!(keys1, vec!["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(keys1, keys2);
        assert_eq!(
            serde_json::to_string(&m1).unwrap(),
            serde_json::to_string(&m2).unwrap()
        );
    }

    #[test]
    fn failed_slots_contribute_nothing() {
        let a = item_for(&object("a.jpg"));
        let manifest = assemble(
            vec![(0, a)],
            Vec::new(), // index 1 failed
            BuildCounts {
                failed: 1,
                ..Default::default()
            },
            DateTime::<Utc>::UNIX_EPOCH,
        );
        assert_eq!(manifest.data.len(), 1);
        assert_eq!(manifest.counts.failed, 1);
    }

    // =========================================================================
    // Load / save robustness
    // =========================================================================

    #[test]
    fn from_json_none_is_empty() {
        let m = Manifest::from_json(None);
        assert!(m.data.is_empty());
        assert_eq!(m.version, MANIFEST_VERSION);
    }

    #[test]
    fn from_json_corrupt_is_empty() {
        assert!(Manifest::from_json(Some(b"not json")).data.is_empty());
    }

    #[test]
    fn from_json_wrong_version_is_empty() {
        let mut m = manifest_of(&[object("a.jpg")]);
        m.version = MANIFEST_VERSION + 1;
        let json = serde_json::to_vec(&m).unwrap();
        assert!(Manifest::from_json(Some(&json)).data.is_empty());
    }

    #[test]
    fn roundtrip_preserves_items() {
        let m = manifest_of(&[object("a.jpg"), object("b/c.jpg")]);
        let json = m.to_json_pretty().unwrap();
        let loaded = Manifest::from_json(Some(json.as_bytes()));
        assert_eq!(loaded.data, m.data);
    }

    #[test]
    fn serializes_camel_case() {
        let m = manifest_of(&[object("a.jpg")]);
        let json = m.to_json_pretty().unwrap();
        assert!(json.contains("\"s3Key\""));
        assert!(json.contains("\"aspectRatio\""));
        assert!(json.contains("\"generatedAt\""));
        assert!(json.contains("\"isLivePhoto\""));
    }

    // =========================================================================
    // item_id
    // =========================================================================

    #[test]
    fn id_from_key_is_stable_and_sanitized() {
        assert_eq!(item_id("2024/IMG 0001.jpg", None, 0), "2024-IMG-0001");
        assert_eq!(item_id("a.jpg", None, 0), "a");
        assert_eq!(
            item_id("2024/IMG 0001.jpg", None, 0),
            item_id("2024/IMG 0001.jpg", None, 0)
        );
    }

    #[test]
    fn id_digest_suffix_tracks_content() {
        let id1 = item_id("a.jpg", Some(b"one"), 8);
        let id2 = item_id("a.jpg", Some(b"two"), 8);
        assert_ne!(id1, id2);
        assert!(id1.starts_with("a-"));
        assert_eq!(id1.len(), "a-".len() + 8);
    }

    #[test]
    fn id_suffix_disabled_ignores_content() {
        assert_eq!(item_id("a.jpg", Some(b"one"), 0), "a");
    }
}
