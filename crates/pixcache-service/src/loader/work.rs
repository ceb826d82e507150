use std::sync::Arc;

use super::LoadError;
use crate::decode::{Decoder, ImageKind};
use crate::executor::CancelToken;
use crate::fetch::Fetcher;
use crate::image::Image;
use crate::types::TargetSize;

/// Everything a background worker needs to produce one image.
pub(super) struct LoadWork {
    pub fetcher: Arc<dyn Fetcher>,
    pub decoder: Arc<dyn Decoder>,
    pub url: String,
    pub kind: ImageKind,
    pub target: TargetSize,
}

impl LoadWork {
    /// Fetches, decodes and post-processes the image.
    pub fn run(self, cancel: &CancelToken) -> Result<Arc<Image>, LoadError> {
        let result = self.load(cancel);
        match &result {
            Ok(image) => tracing::trace!(
                url = %self.url,
                width = image.width(),
                height = image.height(),
                "Loaded image"
            ),
            Err(LoadError::Cancelled) => tracing::trace!(url = %self.url, "Load cancelled"),
            Err(err) => tracing::debug!(
                url = %self.url,
                error = err as &dyn std::error::Error,
                "Failed to load image"
            ),
        }
        result
    }

    fn load(&self, cancel: &CancelToken) -> Result<Arc<Image>, LoadError> {
        let data = self.fetcher.fetch(&self.url)?;
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        let image = self.kind.decode(&*self.decoder, &data, self.target)?;
        Ok(Arc::new(image))
    }
}
