//! Helpers for testing the loader and its collaborators.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. To avoid dropping it too early, assign it to a variable in the
//!    test function (e.g. `let cache_dir = test::tempdir()`).
//!
//!  - When holding a [`MockFetcher`], release it before the end of the test. Otherwise the
//!    background workers stay blocked until the test process exits.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use parking_lot::{Condvar, Mutex};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use pixcache_service::fetch::{FetchError, Fetcher};
use pixcache_service::image::Image;
use pixcache_service::loader::{ConsumerSlot, LoadListener};
use pixcache_service::types::TargetSize;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `pixcache` crates and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("pixcache_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped. Use it as a guard to
/// automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Encodes a solid PNG image of the given size.
pub fn png_bytes(width: u32, height: u32) -> Bytes {
    let pixels = RgbaImage::from_pixel(width, height, Rgba([40, 80, 160, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(pixels)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    Bytes::from(out.into_inner())
}

/// A decoded image of the given size, for use as a placeholder.
pub fn image(width: u32, height: u32) -> Arc<Image> {
    Arc::new(Image::new(RgbaImage::new(width, height)))
}

#[derive(Debug, Default)]
struct MockState {
    calls: BTreeMap<String, usize>,
    failing: BTreeSet<String>,
    held: bool,
}

/// A [`Fetcher`] serving a small PNG for every resource.
///
/// It counts how often each resource was fetched, can be told to fail for certain resources,
/// and can be held to keep background workers busy.
#[derive(Debug, Default)]
pub struct MockFetcher {
    state: Mutex<MockState>,
    released: Condvar,
}

impl MockFetcher {
    /// The size of the images served by this fetcher.
    pub const SIZE: (u32, u32) = (8, 4);

    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Blocks all fetches from now on until [`release`](Self::release) is called.
    pub fn hold(&self) {
        self.state.lock().held = true;
    }

    pub fn release(&self) {
        self.state.lock().held = false;
        self.released.notify_all();
    }

    /// Makes fetches of `source` fail with [`FetchError::NotFound`].
    pub fn fail(&self, source: &str) {
        self.state.lock().failing.insert(source.to_owned());
    }

    /// How often `source` was fetched.
    pub fn calls(&self, source: &str) -> usize {
        self.state.lock().calls.get(source).copied().unwrap_or(0)
    }

    /// How many fetches there were in total.
    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, source: &str) -> Result<Bytes, FetchError> {
        let mut state = self.state.lock();
        *state.calls.entry(source.to_owned()).or_default() += 1;
        while state.held {
            self.released.wait(&mut state);
        }
        if state.failing.contains(source) {
            return Err(FetchError::NotFound);
        }
        drop(state);

        let (width, height) = Self::SIZE;
        Ok(png_bytes(width, height))
    }
}

/// Something a [`RecordingSlot`] was asked to show.
#[derive(Debug, Clone)]
pub enum SlotEvent {
    Placeholder(Option<Arc<Image>>),
    Result(Arc<Image>),
}

/// A [`ConsumerSlot`] that records everything bound to it.
#[derive(Debug, Default)]
pub struct RecordingSlot {
    size: Option<TargetSize>,
    events: RefCell<Vec<SlotEvent>>,
}

impl RecordingSlot {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn with_size(width: u32, height: u32) -> Rc<Self> {
        Rc::new(Self {
            size: Some(TargetSize::new(width, height)),
            events: Default::default(),
        })
    }

    pub fn events(&self) -> Vec<SlotEvent> {
        self.events.borrow().clone()
    }

    /// All images bound as results, in order.
    pub fn results(&self) -> Vec<Arc<Image>> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                SlotEvent::Result(image) => Some(Arc::clone(image)),
                SlotEvent::Placeholder(_) => None,
            })
            .collect()
    }

    /// Whether the last thing bound to this slot was a placeholder.
    pub fn shows_placeholder(&self) -> bool {
        matches!(self.events.borrow().last(), Some(SlotEvent::Placeholder(_)))
    }
}

impl ConsumerSlot for RecordingSlot {
    fn bind_placeholder(&self, placeholder: Option<&Arc<Image>>) {
        self.events
            .borrow_mut()
            .push(SlotEvent::Placeholder(placeholder.cloned()));
    }

    fn bind_result(&self, image: &Arc<Image>) {
        self.events
            .borrow_mut()
            .push(SlotEvent::Result(Arc::clone(image)));
    }

    fn size_hint(&self) -> Option<TargetSize> {
        self.size
    }
}

/// A single notification received by a [`RecordingListener`].
#[derive(Debug, Clone)]
pub struct Notification {
    pub image: Option<Arc<Image>>,
    pub success: bool,
}

/// A [`LoadListener`] that records all notifications. Clones share their records.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    notifications: Rc<RefCell<Vec<Notification>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.borrow().clone()
    }

    pub fn successes(&self) -> usize {
        self.notifications.borrow().iter().filter(|n| n.success).count()
    }

    pub fn failures(&self) -> usize {
        self.notifications.borrow().iter().filter(|n| !n.success).count()
    }
}

impl LoadListener for RecordingListener {
    fn on_loaded(&self, image: Option<&Arc<Image>>, _slot: &dyn ConsumerSlot, success: bool) {
        self.notifications.borrow_mut().push(Notification {
            image: image.cloned(),
            success,
        });
    }
}
