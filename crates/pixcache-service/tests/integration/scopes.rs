use pixcache_service::caching::Artifact;
use pixcache_service::loader::{LoadRequest, LoadStatus};
use pixcache_service::types::ScopeKey;

use crate::{IDLE, RecordingListener, RecordingSlot, setup_loader};

fn url(n: usize) -> String {
    format!("http://example.com/{n}.png")
}

#[test]
fn test_release_scope() {
    let (mut loader, _fetcher) = setup_loader(|_| {});
    let feed = ScopeKey::new("Feed");
    let detail = ScopeKey::new("Detail");

    let feed_slots: Vec<_> = (0..3).map(|_| RecordingSlot::new()).collect();
    for (n, slot) in feed_slots.iter().enumerate() {
        loader.load(LoadRequest::new(&feed, url(n)), slot);
    }
    let detail_slot = RecordingSlot::new();
    loader.load(LoadRequest::new(&detail, url(0)), &detail_slot);
    assert!(loader.run_until_idle(IDLE));
    assert_eq!(loader.cache_stats().strong_entries, 4);

    assert_eq!(loader.release_scope(&feed), 0);

    for slot in &feed_slots {
        assert!(slot.results()[0].is_released());
    }
    assert!(!detail_slot.results()[0].is_released());

    let stats = loader.cache_stats();
    assert_eq!(stats.strong_entries, 1);
    assert_eq!(stats.evictions, 3);

    let slot = RecordingSlot::new();
    assert_eq!(
        loader.load(LoadRequest::new(&feed, url(0)), &slot),
        LoadStatus::Pending
    );
    assert_eq!(
        loader.load(LoadRequest::new(&detail, url(0)), &slot),
        LoadStatus::Loaded
    );
    assert!(loader.run_until_idle(IDLE));
}

#[test]
fn test_release_scope_cancels_loads() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let feed = ScopeKey::new("Feed");
    let detail = ScopeKey::new("Detail");
    let listener = RecordingListener::new();

    fetcher.hold();
    let feed_slots: Vec<_> = (0..3).map(|_| RecordingSlot::new()).collect();
    for (n, slot) in feed_slots.iter().enumerate() {
        let request = LoadRequest::new(&feed, url(n)).listener(listener.clone());
        loader.load(request, slot);
    }
    let detail_slot = RecordingSlot::new();
    loader.load(LoadRequest::new(&detail, url(0)), &detail_slot);
    assert_eq!(loader.in_flight(), 4);

    assert_eq!(loader.release_scope(&feed), 3);
    assert_eq!(loader.in_flight(), 1);
    assert!(feed_slots.iter().all(|slot| loader.bound_task(slot).is_none()));

    fetcher.release();
    assert!(loader.run_until_idle(IDLE));

    assert_eq!(listener.notifications().len(), 0);
    assert!(feed_slots.iter().all(|slot| slot.results().is_empty()));
    assert_eq!(detail_slot.results().len(), 1);
    assert_eq!(loader.cache_stats().puts, 1);
}

#[test]
fn test_release_sub_bucket() {
    let (mut loader, _fetcher) = setup_loader(|_| {});
    let feed = ScopeKey::new("Feed");
    let (top, bottom) = (RecordingSlot::new(), RecordingSlot::new());

    loader.load(LoadRequest::new(&feed, url(0)).suffix("#top"), &top);
    loader.load(LoadRequest::new(&feed, url(0)).suffix("#bottom"), &bottom);
    assert_eq!(loader.in_flight(), 2);
    assert!(loader.run_until_idle(IDLE));

    loader.release_scope_with(&feed, "#top");
    assert!(top.results()[0].is_released());
    assert!(!bottom.results()[0].is_released());

    // releasing the whole scope includes its sub-buckets
    loader.release_scope(&feed);
    assert!(bottom.results()[0].is_released());
    assert_eq!(loader.cache_stats().strong_entries, 0);
}

#[test]
fn test_cancel_scope_keeps_cache() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let feed = ScopeKey::new("Feed");

    let done = RecordingSlot::new();
    loader.load(LoadRequest::new(&feed, url(0)), &done);
    assert!(loader.run_until_idle(IDLE));

    fetcher.hold();
    let pending = RecordingSlot::new();
    loader.load(LoadRequest::new(&feed, url(1)), &pending);
    assert_eq!(loader.cancel_scope(&feed), 1);
    assert_eq!(loader.in_flight(), 0);

    fetcher.release();
    assert!(loader.run_until_idle(IDLE));

    assert!(!done.results()[0].is_released());
    assert!(pending.results().is_empty());
    assert_eq!(
        loader.load(LoadRequest::new(&feed, url(0)), &pending),
        LoadStatus::Loaded
    );
}

#[test]
fn test_release_all() {
    let (mut loader, fetcher) = setup_loader(|_| {});
    let (idle, feed, detail) = (
        ScopeKey::new("Idle"),
        ScopeKey::new("Feed"),
        ScopeKey::new("Detail"),
    );

    let (idle_slot, feed_slot) = (RecordingSlot::new(), RecordingSlot::new());
    loader.load(LoadRequest::new(&idle, url(0)), &idle_slot);
    loader.load(LoadRequest::new(&feed, url(0)), &feed_slot);
    assert!(loader.run_until_idle(IDLE));

    fetcher.hold();
    let slots: Vec<_> = (0..3).map(|_| RecordingSlot::new()).collect();
    loader.load(LoadRequest::new(&feed, url(1)), &slots[0]);
    loader.load(LoadRequest::new(&feed, url(2)), &slots[1]);
    loader.load(LoadRequest::new(&detail, url(1)), &slots[2]);
    assert_eq!(loader.in_flight(), 3);

    assert_eq!(loader.release_all(), 3);
    assert_eq!(loader.in_flight(), 0);

    fetcher.release();
    assert!(loader.run_until_idle(IDLE));

    // only scopes with loads in flight are released
    assert!(feed_slot.results()[0].is_released());
    assert!(!idle_slot.results()[0].is_released());
    assert!(slots.iter().all(|slot| slot.results().is_empty()));
}
