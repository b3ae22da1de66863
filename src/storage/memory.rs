//! In-memory storage provider for tests and debugging.
//!
//! Objects live in a `BTreeMap` so listings come back key-sorted like the
//! real backends. Timestamps are deterministic: a monotonic counter from the
//! epoch rather than wall-clock time, so fingerprint-sensitive tests don't
//! race the clock. ETags are content hashes, matching the git provider.

use super::{matches_formats, StorageError, StorageObject, StorageProvider};
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Mutex;

struct Stored {
    bytes: Vec<u8>,
    last_modified: DateTime<Utc>,
    etag: String,
}

/// Debug/test backend holding objects in process memory.
pub struct MemoryProvider {
    objects: Mutex<BTreeMap<String, Stored>>,
    formats: Vec<String>,
    public_base_url: String,
    clock: Mutex<i64>,
}

impl MemoryProvider {
    pub fn new(formats: Vec<String>) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            formats,
            public_base_url: "memory://".to_string(),
            clock: Mutex::new(0),
        }
    }

    fn tick(&self) -> DateTime<Utc> {
        let mut clock = self.clock.lock().unwrap();
        *clock += 1;
        Utc.timestamp_opt(*clock, 0).unwrap()
    }

    /// Seed an object; last-modified advances the deterministic clock.
    pub fn insert(&self, key: &str, bytes: Vec<u8>) {
        let ts = self.tick();
        let etag = content_etag(&bytes);
        self.objects.lock().unwrap().insert(
            key.to_string(),
            Stored {
                bytes,
                last_modified: ts,
                etag,
            },
        );
    }

    /// Seed an object with explicit metadata (for fingerprint tests).
    pub fn insert_with_meta(
        &self,
        key: &str,
        bytes: Vec<u8>,
        last_modified: DateTime<Utc>,
        etag: &str,
    ) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            Stored {
                bytes,
                last_modified,
                etag: etag.to_string(),
            },
        );
    }

    /// Overwrite only the last-modified timestamp of an existing object.
    pub fn touch(&self, key: &str) {
        let ts = self.tick();
        if let Some(stored) = self.objects.lock().unwrap().get_mut(key) {
            stored.last_modified = ts;
        }
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    fn snapshot(&self) -> Vec<StorageObject> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .map(|(key, stored)| StorageObject {
                key: key.clone(),
                size: stored.bytes.len() as u64,
                last_modified: stored.last_modified,
                etag: stored.etag.clone(),
            })
            .collect()
    }
}

fn content_etag(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")[..32].to_string()
}

#[async_trait::async_trait]
impl StorageProvider for MemoryProvider {
    async fn list_images(&self) -> Result<Vec<StorageObject>, StorageError> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|o| matches_formats(&o.key, &self.formats))
            .collect())
    }

    async fn list_all_files(&self) -> Result<Vec<StorageObject>, StorageError> {
        Ok(self.snapshot())
    }

    async fn get_file(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .map(|s| s.bytes.clone()))
    }

    async fn upload_file(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<StorageObject, StorageError> {
        let ts = self.tick();
        let etag = content_etag(&bytes);
        let size = bytes.len() as u64;
        self.objects.lock().unwrap().insert(
            key.to_string(),
            Stored {
                bytes,
                last_modified: ts,
                etag: etag.clone(),
            },
        );
        Ok(StorageObject {
            key: key.to_string(),
            size,
            last_modified: ts,
            etag,
        })
    }

    async fn delete_file(&self, key: &str) -> Result<(), StorageError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn generate_public_url(&self, key: &str) -> String {
        format!("{}{}", self.public_base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> MemoryProvider {
        MemoryProvider::new(vec!["jpg".into(), "heic".into()])
    }

    #[tokio::test]
    async fn list_images_applies_format_filter() {
        let p = provider();
        p.insert("a.jpg", vec![1]);
        p.insert("b.mov", vec![2]);
        p.insert("c.heic", vec![3]);

        let images = p.list_images().await.unwrap();
        let keys: Vec<&str> = images.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a.jpg", "c.heic"]);

        let all = p.list_all_files().await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn listings_are_key_sorted() {
        let p = provider();
        p.insert("z.jpg", vec![1]);
        p.insert("a.jpg", vec![2]);
        let keys: Vec<String> = p
            .list_images()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["a.jpg", "z.jpg"]);
    }

    #[tokio::test]
    async fn get_file_absent_key_is_none() {
        let p = provider();
        assert_eq!(p.get_file("missing.jpg").await.unwrap(), None);
    }

    #[tokio::test]
    async fn upload_refreshes_metadata() {
        let p = provider();
        p.insert("a.jpg", vec![1]);
        let before = p.list_all_files().await.unwrap()[0].clone();

        let after = p.upload_file("a.jpg", vec![1, 2, 3], "image/jpeg").await.unwrap();
        assert_eq!(after.size, 3);
        assert_ne!(after.etag, before.etag);
        assert!(after.last_modified > before.last_modified);
    }

    #[tokio::test]
    async fn delete_missing_key_is_ok() {
        let p = provider();
        p.delete_file("never-existed.jpg").await.unwrap();
    }

    #[tokio::test]
    async fn etag_is_content_addressed() {
        let p = provider();
        p.insert("a.jpg", vec![9, 9]);
        p.insert("b.jpg", vec![9, 9]);
        let all = p.list_all_files().await.unwrap();
        assert_eq!(all[0].etag, all[1].etag);
    }

    #[test]
    fn public_url_is_pure() {
        let p = provider();
        assert_eq!(p.generate_public_url("a/b.jpg"), "memory://a/b.jpg");
    }
}
