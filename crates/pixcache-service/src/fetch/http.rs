//! Support to download from HTTP sources.

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::blocking::Client;

use super::{FetchError, Fetcher};
use crate::config::DownloadConfig;

/// Fetcher implementation that downloads over HTTP.
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .gzip(true)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, source: &str) -> Result<Bytes, FetchError> {
        tracing::debug!("Fetching image from `{}`", source);

        let response = self.client.get(source).send()?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if status != StatusCode::OK {
            tracing::debug!(%status, "Unexpected status code from `{}`", source);
            return Err(FetchError::Status(status.as_u16()));
        }

        Ok(response.bytes()?)
    }
}
