use std::sync::Arc;

use pixcache_service::loader::{LoadRequest, LoadStatus};
use pixcache_service::types::ScopeKey;

use crate::{IDLE, RecordingListener, RecordingSlot, setup_loader};

const URL: &str = "http://example.com/a.png";

#[test]
fn test_coalesces_same_url() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let scope = ScopeKey::new("Gallery1a2b");

    let (first, second) = (RecordingSlot::new(), RecordingSlot::new());
    let (first_listener, second_listener) = (RecordingListener::new(), RecordingListener::new());

    let request = LoadRequest::new(&scope, URL).listener(first_listener.clone());
    assert_eq!(loader.load(request, &first), LoadStatus::Pending);
    let request = LoadRequest::new(&scope, URL).listener(second_listener.clone());
    assert_eq!(loader.load(request, &second), LoadStatus::Pending);
    assert_eq!(loader.in_flight(), 1);
    assert_eq!(loader.bound_task(&first), loader.bound_task(&second));

    assert!(loader.run_until_idle(IDLE));

    assert_eq!(fetcher.calls(URL), 1);
    assert_eq!(first_listener.successes(), 1);
    assert_eq!(second_listener.successes(), 1);

    let (first_results, second_results) = (first.results(), second.results());
    assert_eq!(first_results.len(), 1);
    assert_eq!(second_results.len(), 1);
    assert!(Arc::ptr_eq(&first_results[0], &second_results[0]));
}

#[test]
fn test_many_slots_share_one_load() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let scope = ScopeKey::new("Feed");
    let listener = RecordingListener::new();

    let slots: Vec<_> = (0..10).map(|_| RecordingSlot::new()).collect();
    for slot in &slots {
        let request = LoadRequest::new(&scope, URL).listener(listener.clone());
        loader.load(request, slot);
        assert_eq!(loader.in_flight(), 1);
    }

    assert!(loader.run_until_idle(IDLE));
    assert_eq!(fetcher.total_calls(), 1);
    assert_eq!(listener.successes(), 10);
    assert!(slots.iter().all(|slot| slot.results().len() == 1));
}

#[test]
fn test_same_slot_same_url_is_idempotent() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let scope = ScopeKey::new("Feed");
    let slot = RecordingSlot::new();
    let listener = RecordingListener::new();

    let request = LoadRequest::new(&scope, URL).listener(listener.clone());
    assert_eq!(loader.load(request, &slot), LoadStatus::Pending);
    let task = loader.bound_task(&slot);

    let request = LoadRequest::new(&scope, URL).listener(listener.clone());
    assert_eq!(loader.load(request, &slot), LoadStatus::Pending);
    assert_eq!(loader.bound_task(&slot), task);
    assert_eq!(slot.events().len(), 1);

    assert!(loader.run_until_idle(IDLE));
    assert_eq!(fetcher.calls(URL), 1);
    assert_eq!(listener.successes(), 1);
    assert_eq!(slot.results().len(), 1);
    assert_eq!(loader.bound_task(&slot), None);
}

#[test]
fn test_cache_hit_is_synchronous() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let scope = ScopeKey::new("Feed");

    loader.load(LoadRequest::new(&scope, URL), &RecordingSlot::new());
    assert!(loader.run_until_idle(IDLE));

    let slot = RecordingSlot::new();
    let listener = RecordingListener::new();
    let request = LoadRequest::new(&scope, URL).listener(listener.clone());
    assert_eq!(loader.load(request, &slot), LoadStatus::Loaded);

    // delivered without dispatching anything
    assert_eq!(slot.results().len(), 1);
    assert_eq!(listener.successes(), 1);
    assert_eq!(loader.in_flight(), 0);
    assert_eq!(fetcher.calls(URL), 1);

    let stats = loader.cache_stats();
    assert_eq!((stats.hits, stats.misses, stats.puts), (1, 1, 1));
}

#[test]
fn test_scopes_do_not_share_loads() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let feed = ScopeKey::new("Feed");
    let detail = ScopeKey::new("Detail");

    loader.load(LoadRequest::new(&feed, URL), &RecordingSlot::new());
    loader.load(LoadRequest::new(&detail, URL), &RecordingSlot::new());
    assert_eq!(loader.in_flight(), 2);

    assert!(loader.run_until_idle(IDLE));
    assert_eq!(fetcher.calls(URL), 2);
}

#[test]
fn test_spaces_are_ignored() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let scope = ScopeKey::new("Feed");

    loader.load(
        LoadRequest::new(&scope, "http://example.com/a b.png"),
        &RecordingSlot::new(),
    );
    loader.load(
        LoadRequest::new(&scope, " http://example.com/ab.png"),
        &RecordingSlot::new(),
    );
    assert_eq!(loader.in_flight(), 1);

    assert!(loader.run_until_idle(IDLE));
    assert_eq!(fetcher.calls("http://example.com/ab.png"), 1);
    assert_eq!(fetcher.total_calls(), 1);
}
