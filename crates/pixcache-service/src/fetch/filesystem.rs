//! Support to fetch from the local filesystem.

use std::fs;
use std::io;
use std::path::Path;

use bytes::Bytes;

use super::{FetchError, Fetcher};

/// Fetcher implementation that reads plain paths and `file://` URLs.
#[derive(Debug, Default)]
pub struct FilesystemFetcher {}

impl FilesystemFetcher {
    pub fn new() -> Self {
        Self {}
    }

    /// Resolves `source` to a local path.
    pub fn path(source: &str) -> &Path {
        Path::new(source.strip_prefix("file://").unwrap_or(source))
    }
}

impl Fetcher for FilesystemFetcher {
    fn fetch(&self, source: &str) -> Result<Bytes, FetchError> {
        let path = Self::path(source);
        tracing::debug!("Fetching image from {:?}", path);

        let contents = fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FetchError::NotFound,
            _ => e.into(),
        })?;
        Ok(Bytes::from(contents))
    }
}
