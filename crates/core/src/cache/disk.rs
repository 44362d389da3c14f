//! File-based blob tier.
//!
//! One file per entry, named `<key>.<ext>`, in a directory that carries no
//! durability guarantee. Writes land in a `.tmp` sibling first and are then
//! renamed into place, so a torn write never looks like a blob.
//!
//! Only files named like blobs or their temp siblings belong to the tier.
//! Anything else in the directory, such as a metadata database placed
//! alongside, is never counted, purged or cleared.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;

use super::hash::is_valid_key;
use super::integrity::BlobNamespace;
use super::types::BlobFormat;
use crate::Error;

const TMP_SUFFIX: &str = "tmp";

/// A file found while scanning the blob directory.
#[derive(Debug)]
struct BlobFile {
    path: PathBuf,
    key: Option<String>,
    size: u64,
    modified: SystemTime,
}

/// Persistent blob storage keyed by content address.
#[derive(Debug, Clone)]
pub struct DiskTier {
    dir: PathBuf,
}

impl DiskTier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Ensure the blob directory exists.
    pub async fn init(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.dir).await?;
        tracing::info!(cache_dir = ?self.dir, "blob directory ready");
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str, format: BlobFormat) -> PathBuf {
        self.dir.join(format!("{key}.{}", format.extension()))
    }

    fn check_key(key: &str) -> Result<(), Error> {
        if is_valid_key(key) { Ok(()) } else { Err(Error::InvalidKey) }
    }

    /// Find which format, if any, a blob for `key` is stored in.
    pub async fn locate(&self, key: &str) -> Option<BlobFormat> {
        if !is_valid_key(key) {
            return None;
        }
        for format in BlobFormat::ALL {
            if fs::try_exists(self.path_for(key, format)).await.unwrap_or(false) {
                return Some(format);
            }
        }
        None
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.locate(key).await.is_some()
    }

    /// Read a blob. A missing file is `Ok(None)`.
    pub async fn read(&self, key: &str, format: BlobFormat) -> Result<Option<Bytes>, Error> {
        Self::check_key(key)?;
        match fs::read(self.path_for(key, format)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a blob and return its size.
    ///
    /// A blob for the same key in the other format is removed afterwards so
    /// `locate` stays unambiguous.
    pub async fn write(&self, key: &str, blob: &[u8], format: BlobFormat) -> Result<u64, Error> {
        Self::check_key(key)?;
        let path = self.path_for(key, format);
        let tmp = path.with_extension(format!("{}.{TMP_SUFFIX}", format.extension()));

        if let Err(e) = fs::write(&tmp, blob).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::Persist(format!("write {}: {e}", tmp.display())));
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::Persist(format!("rename {}: {e}", path.display())));
        }

        for other in BlobFormat::ALL.into_iter().filter(|f| *f != format) {
            remove_if_present(&self.path_for(key, other)).await?;
        }

        Ok(blob.len() as u64)
    }

    /// Delete every blob stored for `key`. Returns whether anything was removed.
    pub async fn delete(&self, key: &str) -> Result<bool, Error> {
        Self::check_key(key)?;
        let mut removed = false;
        for format in BlobFormat::ALL {
            removed |= remove_if_present(&self.path_for(key, format)).await?;
        }
        Ok(removed)
    }

    async fn scan(&self) -> Result<Vec<BlobFile>, Error> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                // Removed concurrently.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let path = entry.path();
            let key = blob_key(&path);
            if key.is_none() && !is_temp_file(&path) {
                continue;
            }
            files.push(BlobFile {
                key,
                size: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                path,
            });
        }
        Ok(files)
    }

    /// Bytes used by blob files, including stray temp files.
    pub async fn total_size(&self) -> Result<u64, Error> {
        Ok(self.scan().await?.iter().map(|f| f.size).sum())
    }

    /// Number of well-formed blob files.
    pub async fn file_count(&self) -> Result<usize, Error> {
        Ok(self.scan().await?.iter().filter(|f| f.key.is_some()).count())
    }

    /// Remove files oldest-first until the directory is at or below `target_size`.
    ///
    /// Returns the keys whose blobs were removed so the caller can drop their
    /// metadata and memory entries.
    pub async fn purge_oldest(&self, target_size: u64) -> Result<Vec<String>, Error> {
        let mut files = self.scan().await?;
        let mut total: u64 = files.iter().map(|f| f.size).sum();
        if total <= target_size {
            return Ok(Vec::new());
        }

        files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

        let mut removed = Vec::new();
        for file in files {
            if total <= target_size {
                break;
            }
            if remove_if_present(&file.path).await? {
                tracing::debug!(path = ?file.path, size = file.size, "purged blob");
                if let Some(key) = file.key {
                    removed.push(key);
                }
            }
            total = total.saturating_sub(file.size);
        }

        tracing::info!(removed = removed.len(), total, target_size, "disk purge complete");
        Ok(removed)
    }

    /// Delete every blob and temp file without reading their contents.
    pub async fn clear(&self) -> Result<u64, Error> {
        if !fs::try_exists(&self.dir).await.unwrap_or(false) {
            fs::create_dir_all(&self.dir).await?;
            return Ok(0);
        }

        let mut count = 0u64;
        for file in self.scan().await? {
            if remove_if_present(&file.path).await? {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl BlobNamespace for DiskTier {
    async fn clear_blobs(&self) -> Result<u64, Error> {
        self.clear().await
    }
}

async fn remove_if_present(path: &Path) -> Result<bool, Error> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Parse `<key>.<ext>` back into a key. Temp and foreign files yield `None`.
fn blob_key(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let (stem, ext) = name.split_once('.')?;
    if is_valid_key(stem) && BlobFormat::from_extension(ext).is_some() { Some(stem.to_string()) } else { None }
}

/// `<key>.<ext>.tmp` left behind by an interrupted write.
fn is_temp_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    match name.split_once('.') {
        Some((stem, rest)) => is_valid_key(stem) && rest.ends_with(TMP_SUFFIX),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hash::derive_key;
    use std::time::Duration;
    use tempfile::tempdir;

    fn set_age(tier: &DiskTier, key: &str, format: BlobFormat, secs_ago: u64) {
        let file = std::fs::File::options().write(true).open(tier.path_for(key, format)).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago)).unwrap();
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::new(dir.path());
        tier.init().await.unwrap();
        let key = derive_key("https://cdn.example.com/a.png");

        assert!(!tier.exists(&key).await);
        let size = tier.write(&key, b"png-bytes", BlobFormat::Lossless).await.unwrap();
        assert_eq!(size, 9);
        assert_eq!(tier.locate(&key).await, Some(BlobFormat::Lossless));
        assert!(dir.path().join(format!("{key}.png")).exists());

        let data = tier.read(&key, BlobFormat::Lossless).await.unwrap().unwrap();
        assert_eq!(&data[..], b"png-bytes");
        assert!(tier.read(&key, BlobFormat::Lossy).await.unwrap().is_none());

        assert!(tier.delete(&key).await.unwrap());
        assert!(!tier.exists(&key).await);
        assert!(!tier.delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_rewrite_in_other_format_replaces_file() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::new(dir.path());
        tier.init().await.unwrap();
        let key = derive_key("slot");

        tier.write(&key, b"old", BlobFormat::Lossless).await.unwrap();
        tier.write(&key, b"newer", BlobFormat::Lossy).await.unwrap();

        assert_eq!(tier.locate(&key).await, Some(BlobFormat::Lossy));
        assert_eq!(tier.file_count().await.unwrap(), 1);
        assert_eq!(tier.total_size().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_rejects_malformed_key() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::new(dir.path());
        tier.init().await.unwrap();

        let result = tier.write("../escape", b"x", BlobFormat::Lossy).await;
        assert!(matches!(result, Err(Error::InvalidKey)));
        assert!(tier.locate("../escape").await.is_none());
    }

    #[tokio::test]
    async fn test_write_failure_is_an_error_not_a_panic() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::new(dir.path().join("missing"));
        let key = derive_key("x");

        let result = tier.write(&key, b"x", BlobFormat::Lossy).await;
        assert!(matches!(result, Err(Error::Persist(_))));
    }

    #[tokio::test]
    async fn test_purge_oldest_until_target() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::new(dir.path());
        tier.init().await.unwrap();

        let keys: Vec<String> = (0..4).map(|i| derive_key(&format!("img-{i}"))).collect();
        for (i, key) in keys.iter().enumerate() {
            tier.write(key, &[0u8; 100], BlobFormat::Lossy).await.unwrap();
            set_age(&tier, key, BlobFormat::Lossy, 100 - i as u64 * 10);
        }
        assert_eq!(tier.total_size().await.unwrap(), 400);

        let removed = tier.purge_oldest(250).await.unwrap();
        assert_eq!(removed, vec![keys[0].clone(), keys[1].clone()]);
        assert_eq!(tier.total_size().await.unwrap(), 200);
        assert!(tier.exists(&keys[3]).await);

        assert!(tier.purge_oldest(250).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_blobs_and_temp_files_only() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::new(dir.path());
        tier.init().await.unwrap();
        let key = derive_key("a");

        tier.write(&key, b"aaaa", BlobFormat::Lossy).await.unwrap();
        std::fs::write(dir.path().join(format!("{key}.png.tmp")), b"torn").unwrap();
        std::fs::write(dir.path().join("metadata.sqlite"), b"not ours").unwrap();
        std::fs::write(dir.path().join("metadata.sqlite-wal"), b"not ours").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        assert_eq!(tier.clear().await.unwrap(), 2);
        assert_eq!(tier.total_size().await.unwrap(), 0);
        assert_eq!(tier.file_count().await.unwrap(), 0);
        assert!(dir.path().join("metadata.sqlite").exists());
        assert!(dir.path().join("metadata.sqlite-wal").exists());
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn test_foreign_files_are_not_counted_or_purged() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::new(dir.path());
        tier.init().await.unwrap();
        let key = derive_key("b");

        std::fs::write(dir.path().join("metadata.sqlite"), vec![0u8; 500]).unwrap();
        tier.write(&key, &[1u8; 100], BlobFormat::Lossy).await.unwrap();
        assert_eq!(tier.total_size().await.unwrap(), 100);

        assert_eq!(tier.purge_oldest(0).await.unwrap(), vec![key]);
        assert!(dir.path().join("metadata.sqlite").exists());
    }

    #[tokio::test]
    async fn test_missing_directory_reads_as_empty() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::new(dir.path().join("never-created"));

        assert_eq!(tier.total_size().await.unwrap(), 0);
        assert!(tier.purge_oldest(0).await.unwrap().is_empty());
        assert_eq!(tier.clear().await.unwrap(), 0);
    }

    #[test]
    fn test_blob_key_parsing() {
        let key = derive_key("a");
        assert_eq!(blob_key(Path::new(&format!("/c/{key}.jpg"))), Some(key.clone()));
        assert_eq!(blob_key(Path::new(&format!("/c/{key}.jpg.tmp"))), None);
        assert_eq!(blob_key(Path::new("/c/notes.txt")), None);

        assert!(is_temp_file(Path::new(&format!("/c/{key}.jpg.tmp"))));
        assert!(!is_temp_file(Path::new(&format!("/c/{key}.jpg"))));
        assert!(!is_temp_file(Path::new("/c/metadata.sqlite-wal")));
        assert!(!is_temp_file(Path::new("/c/scratch.tmp")));
    }
}
