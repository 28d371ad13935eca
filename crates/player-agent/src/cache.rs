//! Content-hash addressed video cache
//!
//! Files are stored under their catalog hash, so a re-uploaded video with new
//! bytes gets a new cache entry and stale copies are just unreferenced files.
//! Downloads land in a partial file, are verified against the expected
//! SHA-256, and only then renamed into place; an interrupted or corrupted
//! download never becomes visible.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use signage_gateway_core::models::VideoDescriptor;
use signage_gateway_core::{retry_with_backoff, Result, RetryPolicy, SignageError};

use crate::client::CoordinatorClient;
use crate::identity::DeviceIdentity;

pub struct VideoCache {
    dir: PathBuf,
}

impl VideoCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SignageError::Storage(format!("creating cache dir: {}", e)))?;
        Ok(())
    }

    /// Final on-disk path for a cached video
    pub fn path_for(&self, descriptor: &VideoDescriptor) -> PathBuf {
        let extension = Path::new(&descriptor.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        self.dir
            .join(format!("{}.{}", descriptor.content_hash, extension))
    }

    pub async fn contains(&self, descriptor: &VideoDescriptor) -> bool {
        tokio::fs::try_exists(self.path_for(descriptor))
            .await
            .unwrap_or(false)
    }

    /// Make sure the video is cached, downloading and verifying if needed.
    /// Transient failures and corrupt downloads are retried with backoff.
    pub async fn ensure(
        &self,
        client: &CoordinatorClient,
        identity: &DeviceIdentity,
        descriptor: &VideoDescriptor,
    ) -> Result<PathBuf> {
        let dest = self.path_for(descriptor);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            debug!(hash = %descriptor.content_hash, "cache hit");
            return Ok(dest);
        }

        retry_with_backoff(
            || self.fetch_verified(client, identity, descriptor, &dest),
            RetryPolicy::download(),
            |err: &SignageError| {
                err.is_transient() || matches!(err, SignageError::ChecksumMismatch { .. })
            },
        )
        .await?;

        info!(
            hash = %descriptor.content_hash,
            file = %descriptor.file_name,
            "video cached"
        );
        Ok(dest)
    }

    async fn fetch_verified(
        &self,
        client: &CoordinatorClient,
        identity: &DeviceIdentity,
        descriptor: &VideoDescriptor,
        dest: &Path,
    ) -> Result<()> {
        let partial = self.dir.join(format!("{}.partial", descriptor.content_hash));
        client
            .download_to(identity, &descriptor.download_path, &partial)
            .await?;

        let actual = sha256_file(&partial).await?;
        if actual != descriptor.content_hash {
            warn!(
                expected = %descriptor.content_hash,
                actual = %actual,
                "downloaded video failed verification"
            );
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(SignageError::ChecksumMismatch {
                expected: descriptor.content_hash.clone(),
                actual,
            });
        }

        tokio::fs::rename(&partial, dest)
            .await
            .map_err(|e| SignageError::Storage(format!("publishing cache entry: {}", e)))?;
        Ok(())
    }

    /// Delete cached files whose hash is not in the referenced set. Partial
    /// files are always removed.
    pub async fn cleanup(&self, referenced: &HashSet<String>) -> Result<usize> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| SignageError::Storage(format!("reading cache dir: {}", e)))?;
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SignageError::Storage(format!("reading cache dir: {}", e)))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let hash = name.split('.').next().unwrap_or(name);
            let is_partial = name.ends_with(".partial");
            if is_partial || !referenced.contains(hash) {
                if tokio::fs::remove_file(entry.path()).await.is_ok() {
                    debug!(file = %name, "evicted from cache");
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

/// SHA-256 of a file's contents, hex encoded
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| SignageError::Storage(format!("opening {}: {}", path.display(), e)))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|e| SignageError::Storage(format!("reading {}: {}", path.display(), e)))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(hash: &str, file_name: &str) -> VideoDescriptor {
        VideoDescriptor {
            video_id: uuid::Uuid::new_v4(),
            file_name: file_name.to_string(),
            content_hash: hash.to_string(),
            download_path: format!("/api/videos/{}/download", hash),
        }
    }

    #[tokio::test]
    async fn sha256_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let digest = sha256_file(&path).await.unwrap();
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn path_is_keyed_by_hash_not_name() {
        let cache = VideoCache::new(PathBuf::from("/var/cache/signage"));
        let a = cache.path_for(&descriptor("abc123", "welcome.mp4"));
        let b = cache.path_for(&descriptor("abc123", "renamed.mp4"));
        assert_eq!(a, b);
        assert!(a.to_str().unwrap().ends_with("abc123.mp4"));
    }

    #[tokio::test]
    async fn cached_file_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VideoCache::new(dir.path().to_path_buf());
        cache.init().await.unwrap();

        let d = descriptor("deadbeef", "clip.mp4");
        assert!(!cache.contains(&d).await);

        tokio::fs::write(cache.path_for(&d), b"bytes").await.unwrap();
        assert!(cache.contains(&d).await);
    }

    #[tokio::test]
    async fn cleanup_keeps_referenced_and_drops_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VideoCache::new(dir.path().to_path_buf());
        cache.init().await.unwrap();

        let keep = descriptor("keep00", "keep.mp4");
        let drop = descriptor("drop00", "drop.mp4");
        tokio::fs::write(cache.path_for(&keep), b"keep").await.unwrap();
        tokio::fs::write(cache.path_for(&drop), b"drop").await.unwrap();
        tokio::fs::write(dir.path().join("stale.partial"), b"part")
            .await
            .unwrap();

        let referenced: HashSet<String> = [keep.content_hash.clone()].into_iter().collect();
        let removed = cache.cleanup(&referenced).await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.contains(&keep).await);
        assert!(!cache.contains(&drop).await);
    }
}
