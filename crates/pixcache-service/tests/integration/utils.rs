use std::sync::Arc;
use std::time::Duration;

use pixcache_service::config::Config;
use pixcache_service::decode::ImageDecoder;
use pixcache_service::loader::Loader;
use pixcache_test as helpers;

pub use helpers::{MockFetcher, RecordingListener, RecordingSlot};

/// How long to wait for background loads before giving up.
pub const IDLE: Duration = Duration::from_secs(10);

/// Setup tests and create a loader backed by a fresh [`MockFetcher`].
///
/// The `update_config` closure can modify any default configuration if needed before the loader
/// is created.
pub fn setup_loader(update_config: impl FnOnce(&mut Config)) -> (Loader, Arc<MockFetcher>) {
    helpers::setup();

    let mut config = Config::default();
    update_config(&mut config);

    let fetcher = MockFetcher::new();
    let loader = Loader::with_parts(&config, fetcher.clone(), Arc::new(ImageDecoder)).unwrap();
    (loader, fetcher)
}
