//! Git-backed storage provider.
//!
//! Photos live in a local working tree (typically a checked-out git repo);
//! keys are paths relative to the configured root. Fingerprints are
//! content-based rather than mtime-based because `git checkout` resets
//! modification times — the etag is a SHA-256 prefix of the file contents,
//! so a rebuild after re-cloning the repo still classifies untouched photos
//! as unchanged.
//!
//! Filesystem I/O runs through `spawn_blocking`: listing a large tree hashes
//! every file and must not stall the async orchestration loop.

use super::{matches_formats, StorageError, StorageObject, StorageProvider};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Storage provider over a local working tree.
pub struct GitProvider {
    root: PathBuf,
    formats: Vec<String>,
    public_base_url: String,
}

impl GitProvider {
    pub fn new(root: impl Into<PathBuf>, formats: Vec<String>, public_base_url: String) -> Self {
        Self {
            root: root.into(),
            formats,
            public_base_url,
        }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn walk(&self) -> Result<Vec<StorageObject>, StorageError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || walk_tree(&root))
            .await
            .map_err(|e| StorageError::Backend(format!("listing task panicked: {e}")))?
    }
}

/// Walk the tree, skipping VCS metadata and hidden files.
fn walk_tree(root: &Path) -> Result<Vec<StorageObject>, StorageError> {
    let mut objects = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        // depth 0 is the root itself; its name (e.g. a dot-prefixed temp
        // dir) must not hide the whole tree
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name().to_str()))
    {
        let entry = entry.map_err(|e| StorageError::Backend(format!("walk failed: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| StorageError::Backend(format!("path outside root: {e}")))?;
        let key = super::normalize_key(&rel.to_string_lossy(), "");

        let meta = entry
            .metadata()
            .map_err(|e| StorageError::Backend(format!("stat {key}: {e}")))?;
        let bytes = std::fs::read(entry.path())?;
        let last_modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        objects.push(StorageObject {
            key,
            size: meta.len(),
            last_modified,
            etag: content_etag(&bytes),
        });
    }
    objects.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(objects)
}

fn is_hidden(name: Option<&str>) -> bool {
    name.map(|n| n.starts_with('.')).unwrap_or(false)
}

/// SHA-256 prefix of file contents, the content-addressed fingerprint.
fn content_etag(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")[..32].to_string()
}

#[async_trait::async_trait]
impl StorageProvider for GitProvider {
    async fn list_images(&self) -> Result<Vec<StorageObject>, StorageError> {
        let formats = self.formats.clone();
        Ok(self
            .walk()
            .await?
            .into_iter()
            .filter(|o| matches_formats(&o.key, &formats))
            .collect())
    }

    async fn list_all_files(&self) -> Result<Vec<StorageObject>, StorageError> {
        self.walk().await
    }

    async fn get_file(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.resolve(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn upload_file(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<StorageObject, StorageError> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        let meta = tokio::fs::metadata(&path).await?;
        Ok(StorageObject {
            key: key.to_string(),
            size: meta.len(),
            last_modified: meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
            etag: content_etag(&bytes),
        })
    }

    async fn delete_file(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.resolve(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn generate_public_url(&self, key: &str) -> String {
        format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn provider(tmp: &TempDir) -> GitProvider {
        GitProvider::new(
            tmp.path(),
            vec!["jpg".into(), "heic".into()],
            "https://photos.example.com".into(),
        )
    }

    #[tokio::test]
    async fn lists_files_relative_to_root_sorted() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("2024")).unwrap();
        fs::write(tmp.path().join("2024/b.jpg"), b"b").unwrap();
        fs::write(tmp.path().join("a.jpg"), b"a").unwrap();

        let p = provider(&tmp);
        let keys: Vec<String> = p
            .list_all_files()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["2024/b.jpg", "a.jpg"]);
    }

    #[tokio::test]
    async fn skips_git_metadata_and_hidden_files() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(".git/objects")).unwrap();
        fs::write(tmp.path().join(".git/objects/blob"), b"x").unwrap();
        fs::write(tmp.path().join(".hidden.jpg"), b"x").unwrap();
        fs::write(tmp.path().join("a.jpg"), b"a").unwrap();

        let p = provider(&tmp);
        let keys: Vec<String> = p
            .list_all_files()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["a.jpg"]);
    }

    #[tokio::test]
    async fn list_images_filters_by_format() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.jpg"), b"a").unwrap();
        fs::write(tmp.path().join("a.mov"), b"v").unwrap();

        let p = provider(&tmp);
        let images = p.list_images().await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].key, "a.jpg");
    }

    #[tokio::test]
    async fn etag_tracks_content_not_mtime() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.jpg"), b"same").unwrap();
        let p = provider(&tmp);
        let first = p.list_all_files().await.unwrap()[0].etag.clone();

        // Rewrite identical content (mtime changes, content doesn't)
        fs::write(tmp.path().join("a.jpg"), b"same").unwrap();
        let second = p.list_all_files().await.unwrap()[0].etag.clone();
        assert_eq!(first, second);

        fs::write(tmp.path().join("a.jpg"), b"different").unwrap();
        let third = p.list_all_files().await.unwrap()[0].etag.clone();
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn get_file_absent_is_none() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp);
        assert_eq!(p.get_file("nope.jpg").await.unwrap(), None);
    }

    #[tokio::test]
    async fn upload_creates_parents_and_roundtrips() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp);
        let obj = p
            .upload_file("thumbs/a.avif", vec![1, 2, 3], "image/avif")
            .await
            .unwrap();
        assert_eq!(obj.size, 3);
        assert_eq!(p.get_file("thumbs/a.avif").await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn delete_tolerates_missing() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp);
        p.delete_file("gone.jpg").await.unwrap();
    }

    #[test]
    fn public_url_from_base() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp);
        assert_eq!(
            p.generate_public_url("2024/a.jpg"),
            "https://photos.example.com/2024/a.jpg"
        );
    }
}
