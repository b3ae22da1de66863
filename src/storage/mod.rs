//! Storage abstraction over the photo object store.
//!
//! The pipeline is polymorphic over backends through [`StorageProvider`]:
//!
//! | Backend | Module | Backing |
//! |---|---|---|
//! | S3 | [`s3`] | aws-sdk-s3 against AWS or any S3-compatible endpoint |
//! | Git | [`git`] | a local working tree (photos committed to a repo) |
//! | Memory | [`memory`] | in-process map, for tests and debugging |
//!
//! No provider method mutates shared builder state: every operation returns
//! its result explicitly so the orchestrator can reason about ordering.
//!
//! ## Key normalization
//!
//! Keys are normalized at the provider boundary — configured prefix stripped,
//! path separators unified to `/`, no leading or trailing slashes, case
//! preserved. Every consumer (reconciliation, live-photo pairing) compares
//! normalized keys; two spellings of the same object must never diverge.
//!
//! ## Listing determinism
//!
//! `list_images` and `list_all_files` return objects sorted by key. S3 pages
//! arrive lexicographically already; the git and memory providers sort
//! explicitly. Manifest ordering builds on this invariant.

pub mod git;
pub mod memory;
pub mod s3;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub use git::GitProvider;
pub use memory::MemoryProvider;
pub use s3::S3Provider;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Authentication/authorization failure. Never retried; fatal for the run.
    #[error("storage auth failure: {0}")]
    Auth(String),
    /// Timeouts, 5xx, connection resets. The S3 SDK retries these per the
    /// configured policy; this surfaces only once attempts are exhausted.
    #[error("transient storage failure: {0}")]
    Transient(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One entry listed from the backing store.
///
/// Produced fresh on every listing call, never mutated, superseded by the
/// next listing. `key` is unique within a single listing snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    /// Opaque content fingerprint (S3 ETag, or a content hash for git).
    pub etag: String,
}

/// Uniform interface over storage backends.
///
/// `get_file` returns `None` (not an error) for an absent key — callers
/// treat that as "skip this object, do not fail the run". `delete_file`
/// is tolerant of already-missing keys. `generate_public_url` is pure and
/// synchronous, derived from config alone.
#[async_trait::async_trait]
pub trait StorageProvider: Send + Sync {
    /// List image-eligible objects (format allow-list applied), sorted by key.
    async fn list_images(&self) -> Result<Vec<StorageObject>, StorageError>;

    /// Unfiltered listing, used for live-photo companions and orphan cleanup.
    async fn list_all_files(&self) -> Result<Vec<StorageObject>, StorageError>;

    /// Fetch raw content. `None` when the key is absent.
    async fn get_file(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Idempotent overwrite. Returns refreshed metadata for the stored object.
    async fn upload_file(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StorageObject, StorageError>;

    /// Delete a key. A missing key is not an error.
    async fn delete_file(&self, key: &str) -> Result<(), StorageError>;

    /// Public URL for a key. Pure, no network.
    fn generate_public_url(&self, key: &str) -> String;

    /// Map of image basename stem → video companion object.
    async fn detect_live_photos(
        &self,
    ) -> Result<HashMap<String, StorageObject>, StorageError> {
        let all = self.list_all_files().await?;
        Ok(crate::livephoto::detect_pairs(&all))
    }
}

/// Normalize a raw storage key.
///
/// Strips the configured prefix, unifies `\` to `/`, collapses duplicate
/// slashes, and trims leading/trailing slashes. Case-sensitive.
pub fn normalize_key(raw: &str, prefix: &str) -> String {
    let unified = raw.replace('\\', "/");
    let trimmed = unified.trim_matches('/');
    let prefix_unified = prefix.replace('\\', "/");
    let prefix_trimmed = prefix_unified.trim_matches('/');

    // Strip the prefix only on a path-component boundary: "photos" must not
    // eat the front of "photoshoot/a.jpg".
    let stripped = if prefix_trimmed.is_empty() {
        trimmed
    } else if let Some(rest) = trimmed.strip_prefix(&format!("{prefix_trimmed}/")) {
        rest
    } else if trimmed == prefix_trimmed {
        ""
    } else {
        trimmed
    };

    let mut out = String::with_capacity(stripped.len());
    let mut prev_slash = false;
    for c in stripped.chars() {
        if c == '/' {
            if !prev_slash && !out.is_empty() {
                out.push('/');
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    out.trim_end_matches('/').to_string()
}

/// Lowercased extension of a key, without the dot.
pub fn key_extension(key: &str) -> Option<String> {
    let name = key.rsplit('/').next().unwrap_or(key);
    let dot = name.rfind('.')?;
    if dot == 0 || dot + 1 == name.len() {
        return None;
    }
    Some(name[dot + 1..].to_ascii_lowercase())
}

/// Key with its extension removed (`photos/IMG_0001.heic` → `photos/IMG_0001`).
///
/// Directory components are kept: companions must live next to their image.
pub fn key_stem(key: &str) -> &str {
    let name = key.rsplit('/').next().unwrap_or(key);
    match name.rfind('.') {
        Some(dot) if dot > 0 => &key[..key.len() - (name.len() - dot)],
        _ => key,
    }
}

/// True when the key's extension is in the allow-list (case-insensitive).
pub fn matches_formats(key: &str, formats: &[String]) -> bool {
    match key_extension(key) {
        Some(ext) => formats.iter().any(|f| f.eq_ignore_ascii_case(&ext)),
        None => false,
    }
}
