use std::sync::Arc;

use pixcache_service::config::Config;
use pixcache_service::decode::ImageDecoder;
use pixcache_service::executor::ExecutorError;
use pixcache_service::loader::{LoadRequest, LoadStatus, Loader};
use pixcache_service::types::ScopeKey;

use crate::{IDLE, MockFetcher, RecordingListener, RecordingSlot, setup_loader};

#[test]
fn test_overflow_discards_oldest_queued() {
    let (mut loader, fetcher) = setup_loader(|config| {
        config.executor.core_threads = 16;
        config.executor.max_threads = 16;
        config.executor.queue_capacity = 15;
    });
    let scope = ScopeKey::new("Feed");
    let listener = RecordingListener::new();
    let urls: Vec<_> = (0..36)
        .map(|n| format!("http://example.com/{n}.png"))
        .collect();

    fetcher.hold();
    let slots: Vec<_> = urls.iter().map(|_| RecordingSlot::new()).collect();
    for (url, slot) in urls.iter().zip(&slots) {
        let request = LoadRequest::new(&scope, url).listener(listener.clone());
        assert_eq!(loader.load(request, slot), LoadStatus::Pending);
    }

    let stats = loader.executor_stats();
    assert_eq!(stats.workers, 16);
    assert_eq!(stats.queued, 15);

    loader.dispatch_pending();
    assert_eq!(loader.in_flight(), 31);
    for (n, slot) in slots.iter().enumerate() {
        let discarded = (16..21).contains(&n);
        assert_eq!(loader.bound_task(slot).is_none(), discarded, "slot {n}");
    }

    fetcher.release();
    assert!(loader.run_until_idle(IDLE));

    for (n, (url, slot)) in urls.iter().zip(&slots).enumerate() {
        let discarded = (16..21).contains(&n);
        assert_eq!(fetcher.calls(url), usize::from(!discarded), "{url}");
        assert_eq!(slot.results().len(), usize::from(!discarded), "{url}");
    }
    assert_eq!(listener.successes(), 31);
    assert_eq!(listener.failures(), 0);
}

#[test]
fn test_discarded_url_can_be_requested_again() {
    let (mut loader, fetcher) = setup_loader(|config| {
        config.executor.core_threads = 1;
        config.executor.max_threads = 1;
        config.executor.queue_capacity = 1;
    });
    let scope = ScopeKey::new("Feed");
    let url = |n: usize| format!("http://example.com/{n}.png");

    fetcher.hold();
    let slots: Vec<_> = (0..3).map(|_| RecordingSlot::new()).collect();
    for (n, slot) in slots.iter().enumerate() {
        loader.load(LoadRequest::new(&scope, url(n)), slot);
    }

    // the discard of the second load was not dispatched yet, asking again starts a fresh load
    let again = RecordingSlot::new();
    loader.load(LoadRequest::new(&scope, url(1)), &again);
    assert_ne!(loader.bound_task(&again), loader.bound_task(&slots[1]));

    fetcher.release();
    assert!(loader.run_until_idle(IDLE));

    assert!(slots[1].results().is_empty());
    assert_eq!(again.results().len(), 1);
    assert_eq!(fetcher.calls(&url(1)), 1);
}

#[test]
fn test_pool_that_cannot_run_is_rejected() {
    let mut config = Config::default();
    config.executor.core_threads = 0;

    let result = Loader::with_parts(&config, MockFetcher::new(), Arc::new(ImageDecoder));
    assert!(matches!(result, Err(ExecutorError::InvalidConfig(_))));

    config.executor.core_threads = 4;
    config.executor.max_threads = 2;
    let result = Loader::with_parts(&config, MockFetcher::new(), Arc::new(ImageDecoder));
    assert!(matches!(result, Err(ExecutorError::InvalidConfig(_))));
}
