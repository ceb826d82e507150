//! Persisting downloaded originals on disk.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use super::{FetchError, Fetcher, FilesystemFetcher, is_remote};

/// A [`Fetcher`] that keeps a copy of every downloaded resource in a local directory.
///
/// Local resources are passed through to the wrapped fetcher unchanged. Remote resources are
/// served from disk once they have been downloaded. Without a cache directory, this does not
/// persist anything.
pub struct DownloadCache {
    inner: Arc<dyn Fetcher>,
    cache_dir: Option<PathBuf>,
}

impl DownloadCache {
    pub fn new(inner: Arc<dyn Fetcher>, cache_dir: Option<PathBuf>) -> Self {
        Self { inner, cache_dir }
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Where a remote resource is persisted, relative to the cache directory.
    ///
    /// The relative path is a sha-256 hash hex-formatted like so: `aa/bbccdd/eeff...`
    pub fn cache_path(source: &str) -> PathBuf {
        let hash = hex::encode(Sha256::digest(source.as_bytes()));
        [&hash[..2], &hash[2..8], &hash[8..]].iter().collect()
    }

    /// The local file holding `source`, if there is one.
    pub fn local_path(&self, source: &str) -> Option<PathBuf> {
        let path = if is_remote(source) {
            self.cache_dir.as_ref()?.join(Self::cache_path(source))
        } else {
            FilesystemFetcher::path(source).to_owned()
        };
        path.is_file().then_some(path)
    }

    /// Whether `source` is available locally without downloading it.
    pub fn has_download(&self, source: &str) -> bool {
        self.local_path(source).is_some()
    }

    /// Makes sure that `source` is available locally, downloading it if needed.
    ///
    /// Returns the local path, or `None` if there is no cache directory to persist remote
    /// resources in.
    pub fn download(&self, source: &str) -> Result<Option<PathBuf>, FetchError> {
        if let Some(path) = self.local_path(source) {
            return Ok(Some(path));
        }
        if !is_remote(source) {
            return Err(FetchError::NotFound);
        }
        let Some(cache_dir) = &self.cache_dir else {
            return Ok(None);
        };

        let contents = self.inner.fetch(source)?;
        let path = cache_dir.join(Self::cache_path(source));
        persist_tempfile(&contents, &path)?;
        Ok(Some(path))
    }
}

impl Fetcher for DownloadCache {
    fn fetch(&self, source: &str) -> Result<Bytes, FetchError> {
        if !is_remote(source) {
            return self.inner.fetch(source);
        }
        let Some(cache_dir) = &self.cache_dir else {
            return self.inner.fetch(source);
        };

        let path = cache_dir.join(Self::cache_path(source));
        match fs::read(&path) {
            Ok(contents) => {
                tracing::trace!("Serving `{}` from {}", source, path.display());
                return Ok(Bytes::from(contents));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to read downloaded file: {}", e),
        }

        let contents = self.inner.fetch(source)?;
        // A failure to persist only costs us a download later on.
        if let Err(e) = persist_tempfile(&contents, &path) {
            tracing::warn!("Failed to persist downloaded file: {}", e);
        }
        Ok(contents)
    }
}

impl std::fmt::Debug for DownloadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCache")
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

/// Writes `contents` into a temporary file next to `cache_path` and atomically moves it there.
fn persist_tempfile(contents: &[u8], cache_path: &Path) -> io::Result<()> {
    let parent = cache_path
        .parent()
        .ok_or_else(|| io::Error::other("no parent directory to persist item"))?;
    fs::create_dir_all(parent)?;

    let mut temp_file = NamedTempFile::new_in(parent)?;
    temp_file.write_all(contents)?;
    temp_file.persist(cache_path).map_err(|e| e.error)?;
    Ok(())
}
