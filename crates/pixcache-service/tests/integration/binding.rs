use std::sync::Arc;
use std::time::Duration;

use pixcache_service::caching::Artifact;
use pixcache_service::loader::{LoadRequest, LoadStatus};
use pixcache_service::types::ScopeKey;
use pixcache_test::{SlotEvent, image};

use crate::{IDLE, MockFetcher, RecordingListener, RecordingSlot, setup_loader};

const FIRST: &str = "http://example.com/first.png";
const SECOND: &str = "http://example.com/second.png";

#[test]
fn test_rebinding_drops_stale_result() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let scope = ScopeKey::new("Feed");
    let slot = RecordingSlot::new();
    let (first_listener, second_listener) = (RecordingListener::new(), RecordingListener::new());

    fetcher.hold();
    let request = LoadRequest::new(&scope, FIRST).listener(first_listener.clone());
    loader.load(request, &slot);
    let first_task = loader.bound_task(&slot);

    let request = LoadRequest::new(&scope, SECOND).listener(second_listener.clone());
    loader.load(request, &slot);
    assert_ne!(loader.bound_task(&slot), first_task);
    // nobody else waits for the first image
    assert_eq!(loader.in_flight(), 1);

    fetcher.release();
    assert!(loader.run_until_idle(IDLE));

    assert_eq!(first_listener.notifications().len(), 0);
    assert_eq!(second_listener.successes(), 1);
    assert_eq!(slot.results().len(), 1);
    // the cancelled result was discarded instead of cached
    assert_eq!(loader.cache_stats().puts, 1);
}

#[test]
fn test_rebinding_keeps_shared_load() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let scope = ScopeKey::new("Feed");
    let (moving, staying) = (RecordingSlot::new(), RecordingSlot::new());
    let (moving_listener, staying_listener) = (RecordingListener::new(), RecordingListener::new());

    fetcher.hold();
    loader.load(
        LoadRequest::new(&scope, FIRST).listener(moving_listener.clone()),
        &moving,
    );
    loader.load(
        LoadRequest::new(&scope, FIRST).listener(staying_listener.clone()),
        &staying,
    );
    loader.load(LoadRequest::new(&scope, SECOND), &moving);
    assert_eq!(loader.in_flight(), 2);

    fetcher.release();
    assert!(loader.run_until_idle(IDLE));

    assert_eq!(fetcher.calls(FIRST), 1);
    assert_eq!(fetcher.calls(SECOND), 1);
    assert_eq!(staying_listener.successes(), 1);
    assert_eq!(moving_listener.notifications().len(), 0);
    assert_eq!(staying.results().len(), 1);
    assert_eq!(moving.results().len(), 1);
}

#[test]
fn test_rebinding_back_delivers_once() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let scope = ScopeKey::new("Feed");
    let (slot, other) = (RecordingSlot::new(), RecordingSlot::new());
    let listener = RecordingListener::new();

    fetcher.hold();
    loader.load(LoadRequest::new(&scope, FIRST), &other);
    loader.load(
        LoadRequest::new(&scope, FIRST).listener(listener.clone()),
        &slot,
    );
    loader.load(LoadRequest::new(&scope, SECOND), &slot);
    loader.load(
        LoadRequest::new(&scope, FIRST).listener(listener.clone()),
        &slot,
    );

    fetcher.release();
    assert!(loader.run_until_idle(IDLE));

    assert_eq!(fetcher.calls(FIRST), 1);
    assert_eq!(listener.successes(), 1);
    assert_eq!(slot.results().len(), 1);
}

#[test]
fn test_dropped_slot_is_skipped() {
    let (mut loader, _fetcher) = setup_loader(|_| {});
    let scope = ScopeKey::new("Feed");
    let listener = RecordingListener::new();

    let slot = RecordingSlot::new();
    loader.load(
        LoadRequest::new(&scope, FIRST).listener(listener.clone()),
        &slot,
    );
    drop(slot);

    assert!(loader.run_until_idle(IDLE));
    assert_eq!(listener.notifications().len(), 0);
    // the image is still cached for the next one asking for it
    assert_eq!(loader.cache_stats().puts, 1);
}

#[test]
fn test_failures_are_not_cached() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let scope = ScopeKey::new("Feed");
    let placeholder = image(1, 1);
    let slot = RecordingSlot::new();
    let listener = RecordingListener::new();
    fetcher.fail(FIRST);

    let request = LoadRequest::new(&scope, FIRST)
        .placeholder(Arc::clone(&placeholder))
        .listener(listener.clone());
    assert_eq!(loader.load(request, &slot), LoadStatus::Pending);
    assert!(loader.run_until_idle(IDLE));

    let notifications = listener.notifications();
    assert_eq!(notifications.len(), 1);
    assert!(!notifications[0].success);
    assert!(notifications[0].image.is_none());

    assert!(slot.shows_placeholder());
    assert!(slot.results().is_empty());
    match &slot.events()[..] {
        [SlotEvent::Placeholder(Some(shown))] => assert!(Arc::ptr_eq(shown, &placeholder)),
        events => panic!("unexpected slot events: {events:?}"),
    }

    // a later attempt fetches again
    let request = LoadRequest::new(&scope, FIRST).listener(listener.clone());
    assert_eq!(loader.load(request, &slot), LoadStatus::Pending);
    assert!(loader.run_until_idle(IDLE));
    assert_eq!(fetcher.calls(FIRST), 2);
    assert_eq!(listener.failures(), 2);
    assert_eq!(loader.cache_stats().puts, 0);
}

#[test]
fn test_rounded_corners_keep_size() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let scope = ScopeKey::new("Feed");
    let slot = RecordingSlot::new();
    let listener = RecordingListener::new();

    let request = LoadRequest::new(&scope, FIRST)
        .kind("round:2".parse().unwrap())
        .listener(listener.clone());
    loader.load(request, &slot);
    assert!(loader.run_until_idle(IDLE));

    assert_eq!(fetcher.calls(FIRST), 1);
    assert_eq!(listener.successes(), 1);
    let (width, height) = MockFetcher::SIZE;
    let result = &slot.results()[0];
    assert_eq!((result.width(), result.height()), (width, height));
    assert!(!result.is_released());
}

#[test]
fn test_empty_url() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let scope = ScopeKey::new("Feed");
    let placeholder = image(2, 2);
    let slot = RecordingSlot::new();

    fetcher.hold();
    loader.load(LoadRequest::new(&scope, FIRST), &slot);
    assert_eq!(loader.in_flight(), 1);

    let request = LoadRequest::new(&scope, "  ").placeholder(Arc::clone(&placeholder));
    assert_eq!(loader.load(request, &slot), LoadStatus::NotLoaded);
    assert_eq!(loader.in_flight(), 0);
    assert_eq!(loader.bound_task(&slot), None);

    fetcher.release();
    assert!(loader.run_until_idle(IDLE));
    assert!(slot.shows_placeholder());
    assert!(slot.results().is_empty());
}

#[test]
fn test_explicit_size() {
    let (mut loader, _fetcher) = setup_loader(|_| {});
    let scope = ScopeKey::new("Feed");
    let slot = RecordingSlot::with_size(2, 1);

    loader.load(LoadRequest::new(&scope, FIRST), &slot);
    assert!(loader.run_until_idle(IDLE));

    // 8x4 subsampled into a box of 2 pixels
    let result = &slot.results()[0];
    assert_eq!((result.width(), result.height()), (2, 1));
}

#[test]
fn test_dispatch_on_demand() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let slot = RecordingSlot::new();

    fetcher.hold();
    loader.load(LoadRequest::new(&ScopeKey::new("Feed"), FIRST), &slot);
    assert_eq!(loader.dispatch_timeout(Duration::from_millis(20)), 0);
    assert_eq!(loader.dispatch_pending(), 0);
    assert!(slot.shows_placeholder());

    fetcher.release();
    assert_eq!(loader.dispatch_timeout(IDLE), 1);
    assert_eq!(slot.results().len(), 1);
    assert_eq!(loader.in_flight(), 0);
}
