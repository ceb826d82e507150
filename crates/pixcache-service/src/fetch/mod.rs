//! Fetching the raw bytes of a resource.
//!
//! Resources are identified by a plain string: `http://` and `https://` URLs are downloaded,
//! everything else is treated as a path on the local filesystem.

use std::fmt;
use std::io;
use std::time::Instant;

use bytes::Bytes;

mod disk_cache;
mod filesystem;
mod http;

pub use disk_cache::DownloadCache;
pub use filesystem::FilesystemFetcher;
pub use http::HttpFetcher;

use crate::config::DownloadConfig;

/// An error fetching a resource.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The resource does not exist.
    #[error("resource not found")]
    NotFound,
    /// The server responded with an unexpected status.
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("failed to read resource")]
    Io(#[from] io::Error),
    #[error("failed to download resource")]
    Http(#[from] reqwest::Error),
}

/// Produces the raw bytes of a resource.
///
/// Fetchers are only ever invoked from background workers and may block.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, source: &str) -> Result<Bytes, FetchError>;
}

/// Whether `source` refers to a resource that needs to be downloaded.
pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// A [`Fetcher`] that picks the transport by the scheme of the resource.
pub struct SourceFetcher {
    http: HttpFetcher,
    filesystem: FilesystemFetcher,
}

impl SourceFetcher {
    pub fn new(config: &DownloadConfig) -> Result<Self, FetchError> {
        Ok(Self {
            http: HttpFetcher::new(config)?,
            filesystem: FilesystemFetcher::new(),
        })
    }
}

impl Fetcher for SourceFetcher {
    fn fetch(&self, source: &str) -> Result<Bytes, FetchError> {
        let start = Instant::now();
        let (scheme, result) = if is_remote(source) {
            ("http", self.http.fetch(source))
        } else {
            ("file", self.filesystem.fetch(source))
        };
        let status = match &result {
            Ok(_) => "ok",
            Err(FetchError::NotFound) => "notfound",
            Err(_) => "error",
        };
        metric!(timer("fetch.duration") = start.elapsed(), "scheme" => scheme, "status" => status);
        result
    }
}

impl fmt::Debug for SourceFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFetcher").finish_non_exhaustive()
    }
}
