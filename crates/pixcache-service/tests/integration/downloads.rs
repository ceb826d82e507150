use std::fs;
use std::sync::Arc;

use pixcache_service::config::Config;
use pixcache_service::decode::ImageDecoder;
use pixcache_service::fetch::DownloadCache;
use pixcache_service::loader::{LoadRequest, LoadStatus, Loader};
use pixcache_service::types::{ScopeKey, TargetSize};
use pixcache_test as helpers;

use crate::{IDLE, MockFetcher, RecordingSlot, setup_loader};

const URL: &str = "http://example.com/photo.png";

#[test]
fn test_downloads_are_persisted() {
    let cache_dir = helpers::tempdir();
    let (mut loader, fetcher) = setup_loader(|config| {
        config.downloads.cache_dir = Some(cache_dir.path().to_owned());
    });
    let scope = ScopeKey::new("Feed");

    assert!(!loader.has_download(URL));
    loader.load(LoadRequest::new(&scope, URL), &RecordingSlot::new());
    assert!(loader.run_until_idle(IDLE));

    assert!(loader.has_download(URL));
    assert!(cache_dir.path().join(DownloadCache::cache_path(URL)).is_file());

    let image = loader
        .load_local(URL, TargetSize::default())
        .unwrap()
        .unwrap();
    let (width, height) = MockFetcher::SIZE;
    assert_eq!((image.width(), image.height()), (width, height));
    assert_eq!(fetcher.calls(URL), 1);

    // a fresh loader with an empty memory cache reads from disk
    let mut config = Config::default();
    config.downloads.cache_dir = Some(cache_dir.path().to_owned());
    let other_fetcher = MockFetcher::new();
    let mut other =
        Loader::with_parts(&config, other_fetcher.clone(), Arc::new(ImageDecoder)).unwrap();

    let slot = RecordingSlot::new();
    assert_eq!(
        other.load(LoadRequest::new(&scope, URL), &slot),
        LoadStatus::Pending
    );
    assert!(other.run_until_idle(IDLE));
    assert_eq!(slot.results().len(), 1);
    assert_eq!(other_fetcher.total_calls(), 0);
}

#[test]
fn test_download_without_decoding() {
    let cache_dir = helpers::tempdir();
    let (loader, fetcher) = setup_loader(|config| {
        config.downloads.cache_dir = Some(cache_dir.path().to_owned());
    });

    let path = loader.download(URL).unwrap().unwrap();
    assert!(path.starts_with(cache_dir.path()));
    assert_eq!(fs::read(&path).unwrap(), helpers::png_bytes(8, 4).to_vec());

    assert_eq!(loader.download(URL).unwrap(), Some(path));
    assert_eq!(fetcher.calls(URL), 1);
    assert_eq!(loader.cache_stats().puts, 0);
}

#[test]
fn test_no_download_dir() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let scope = ScopeKey::new("Feed");

    assert_eq!(loader.download(URL).unwrap(), None);
    assert_eq!(fetcher.calls(URL), 0);

    loader.load(LoadRequest::new(&scope, URL), &RecordingSlot::new());
    assert!(loader.run_until_idle(IDLE));
    assert!(!loader.has_download(URL));
    assert!(
        loader
            .load_local(URL, TargetSize::default())
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_local_files() {
    helpers::setup();
    let dir = helpers::tempdir();
    let path = dir.path().join("local.png");
    fs::write(&path, helpers::png_bytes(6, 6)).unwrap();
    let source = format!("file://{}", path.display());

    let mut loader = Loader::new(&Config::default()).unwrap();
    let scope = ScopeKey::new("Files");
    assert!(loader.has_download(&source));

    let slot = RecordingSlot::new();
    loader.load(LoadRequest::new(&scope, &source), &slot);
    assert!(loader.run_until_idle(IDLE));
    let result = &slot.results()[0];
    assert_eq!((result.width(), result.height()), (6, 6));

    let image = loader
        .load_local(&source, TargetSize::new(3, 3))
        .unwrap()
        .unwrap();
    assert_eq!((image.width(), image.height()), (3, 3));

    let slot = RecordingSlot::new();
    let missing = dir.path().join("missing.png");
    loader.load(LoadRequest::new(&scope, missing.to_string_lossy()), &slot);
    assert!(loader.run_until_idle(IDLE));
    assert!(slot.results().is_empty());
    assert!(
        loader
            .load_local(&missing.to_string_lossy(), TargetSize::default())
            .unwrap()
            .is_none()
    );
}
