//! Loading images into consumer slots.
//!
//! The [`Loader`] is the entry point of the consumer thread. It answers from the cache when it
//! can, and otherwise runs at most one background load per cache key, routing the result to all
//! slots that asked for it in the meantime and are still bound to it.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use crate::caching::{CacheStats, TieredCache};
use crate::config::Config;
use crate::decode::{DecodeError, Decoder, ImageDecoder, ImageKind};
use crate::executor::{Dispatcher, ExecutorError, ExecutorStats, Task, TaskId};
use crate::fetch::{DownloadCache, FetchError, Fetcher, SourceFetcher};
use crate::image::Image;
use crate::types::{CacheKey, ScopeKey, TargetSize, normalize_url};

mod slot;
mod state;
mod work;

pub use slot::{ConsumerSlot, LoadListener, SlotId};

use state::{InFlight, LoaderState};
use work::LoadWork;

/// An error producing an image in the background.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to fetch image")]
    Fetch(#[from] FetchError),
    #[error("failed to decode image")]
    Decode(#[from] DecodeError),
    #[error("load was cancelled")]
    Cancelled,
}

/// An error creating a [`Loader`].
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to create the fetcher")]
    Fetch(#[from] FetchError),
    #[error("failed to create the executor")]
    Executor(#[from] ExecutorError),
}

pub(crate) type LoadResult = Result<Arc<Image>, LoadError>;

/// What [`Loader::load`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// The image was in the cache and has been bound to the slot.
    Loaded,
    /// The image is being loaded, the slot shows the placeholder until then.
    Pending,
    /// There is nothing to load, the slot shows the placeholder.
    NotLoaded,
}

/// A request to load an image into a slot.
pub struct LoadRequest {
    scope: ScopeKey,
    url: String,
    suffix: Option<String>,
    kind: ImageKind,
    placeholder: Option<Arc<Image>>,
    listener: Option<Rc<dyn LoadListener>>,
    size: Option<TargetSize>,
}

impl LoadRequest {
    pub fn new(scope: &ScopeKey, url: impl Into<String>) -> Self {
        Self {
            scope: scope.clone(),
            url: url.into(),
            suffix: None,
            kind: ImageKind::default(),
            placeholder: None,
            listener: None,
            size: None,
        }
    }

    /// Puts the image into a sub-bucket of the scope, which can be released on its own.
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn kind(mut self, kind: ImageKind) -> Self {
        self.kind = kind;
        self
    }

    /// The image to show while loading, or if loading fails.
    pub fn placeholder(mut self, placeholder: Arc<Image>) -> Self {
        self.placeholder = Some(placeholder);
        self
    }

    pub fn listener(mut self, listener: impl LoadListener + 'static) -> Self {
        self.listener = Some(Rc::new(listener));
        self
    }

    /// The size to decode into, instead of the size of the slot.
    pub fn size(mut self, size: TargetSize) -> Self {
        self.size = Some(size);
        self
    }

    fn scope_key(&self) -> ScopeKey {
        match &self.suffix {
            Some(suffix) => self.scope.with_suffix(suffix),
            None => self.scope.clone(),
        }
    }
}

impl fmt::Debug for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadRequest")
            .field("scope", &self.scope)
            .field("url", &self.url)
            .field("suffix", &self.suffix)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Loads images into [`ConsumerSlot`]s, caching and coalescing along the way.
///
/// A loader belongs to a single consumer thread. Results of background loads are only applied
/// when that thread calls one of the dispatch methods.
pub struct Loader {
    dispatcher: Dispatcher<LoadResult>,
    state: LoaderState,
    downloads: Arc<DownloadCache>,
    decoder: Arc<dyn Decoder>,
    display: TargetSize,
}

impl Loader {
    /// Creates a loader fetching from HTTP and the local filesystem.
    pub fn new(config: &Config) -> Result<Self, InitError> {
        let fetcher = SourceFetcher::new(&config.downloads)?;
        let loader = Self::with_parts(config, Arc::new(fetcher), Arc::new(ImageDecoder))?;
        Ok(loader)
    }

    /// Creates a loader with custom collaborators.
    ///
    /// Remote resources fetched by `fetcher` are still persisted into the configured download
    /// directory. Fails if the executor configuration cannot run any work.
    pub fn with_parts(
        config: &Config,
        fetcher: Arc<dyn Fetcher>,
        decoder: Arc<dyn Decoder>,
    ) -> Result<Self, ExecutorError> {
        let dispatcher = Dispatcher::new(config.executor.clone())?;
        let cache = Arc::new(TieredCache::new(config.cache.clone()));
        let downloads = DownloadCache::new(fetcher, config.downloads.cache_dir.clone());
        Ok(Self {
            dispatcher,
            state: LoaderState::new(cache),
            downloads: Arc::new(downloads),
            decoder,
            display: TargetSize::new(config.display.width, config.display.height),
        })
    }

    /// Loads the requested image into `slot`.
    ///
    /// Cache hits are bound right away. Otherwise the slot shows the placeholder, and gets the
    /// image once it has been loaded, unless the slot is rebound before that. Any load the slot
    /// was bound to before is detached from it, and cancelled if no other slot waits for it.
    pub fn load<S>(&mut self, request: LoadRequest, slot: &Rc<S>) -> LoadStatus
    where
        S: ConsumerSlot + 'static,
    {
        let slot_id = SlotId::of(slot);
        let url = normalize_url(&request.url);
        if url.is_empty() {
            self.unbind(slot_id);
            slot.bind_placeholder(request.placeholder.as_ref());
            return LoadStatus::NotLoaded;
        }

        let scope = request.scope_key();
        let key = CacheKey::new(&scope, &url);

        if let Some(image) = self.state.cache.get(key.as_str()) {
            self.unbind(slot_id);
            slot.bind_result(&image);
            if let Some(listener) = &request.listener {
                listener.on_loaded(Some(&image), &**slot, true);
            }
            return LoadStatus::Loaded;
        }

        // The slot is already waiting for this very image.
        if let Some(binding) = self.state.bindings.get(&slot_id)
            && binding.key == key
            && self.is_active(binding.task)
        {
            return LoadStatus::Pending;
        }
        self.unbind(slot_id);

        let weak_slot = Rc::downgrade(slot) as Weak<dyn ConsumerSlot>;

        if let Some(&task) = self.state.index.get(&key) {
            if self.is_active(task) {
                tracing::trace!(%url, %task, "Coalescing with in-flight load");
                metric!(counter("loader.coalesced") += 1);
                slot.bind_placeholder(request.placeholder.as_ref());
                self.state.bind(task, weak_slot, slot_id, request.listener);
                return LoadStatus::Pending;
            }
            // discarded from the queue, but its cancellation was not dispatched yet
            self.state.forget(task);
        }

        let target = request
            .size
            .or_else(|| slot.size_hint())
            .unwrap_or_default()
            .or(self.display);
        let work = LoadWork {
            fetcher: Arc::clone(&self.downloads) as Arc<dyn Fetcher>,
            decoder: Arc::clone(&self.decoder),
            url: url.clone(),
            kind: request.kind,
            target,
        };

        let task = Task::new();
        let id = task.id();
        self.state.running.insert(
            id,
            InFlight {
                task: task.clone(),
                url: url.clone(),
                key: key.clone(),
                scope,
                targets: Vec::new(),
            },
        );
        self.state.index.insert(key, id);
        slot.bind_placeholder(request.placeholder.as_ref());
        self.state.bind(id, weak_slot, slot_id, request.listener);

        match task.execute(&mut self.dispatcher, &mut self.state, move |cancel| {
            work.run(cancel)
        }) {
            Ok(()) => {
                tracing::trace!(%url, task = %id, "Submitted image load");
                LoadStatus::Pending
            }
            Err(err) => {
                tracing::error!(error = &err as &dyn std::error::Error, "Failed to submit image load");
                self.state.forget(id);
                LoadStatus::NotLoaded
            }
        }
    }

    fn is_active(&self, task: TaskId) -> bool {
        self.state
            .running
            .get(&task)
            .is_some_and(|in_flight| !in_flight.task.is_cancelled())
    }

    /// Detaches `slot_id` from its current load, cancelling that load if nobody else waits for it.
    fn unbind(&mut self, slot_id: SlotId) {
        let Some(binding) = self.state.bindings.remove(&slot_id) else {
            return;
        };
        let Some(in_flight) = self.state.running.get_mut(&binding.task) else {
            return;
        };
        in_flight
            .targets
            .retain(|target| target.slot_id != slot_id || target.generation != binding.generation);
        if !in_flight.has_live_targets() {
            self.cancel_task(binding.task);
        }
    }

    fn cancel_task(&mut self, task: TaskId) -> bool {
        let Some(in_flight) = self.state.forget(task) else {
            return false;
        };
        tracing::debug!(url = %in_flight.url, task = %task, "Cancelling image load");
        in_flight.task.cancel(&mut self.dispatcher, &mut self.state);
        true
    }

    fn cancel_matching(&mut self, prefix: &str) -> usize {
        let tasks: Vec<_> = self
            .state
            .running
            .iter()
            .filter(|(_, in_flight)| in_flight.scope.as_ref().starts_with(prefix))
            .map(|(task, _)| *task)
            .collect();
        tasks
            .into_iter()
            .filter(|task| self.cancel_task(*task))
            .count()
    }

    /// Tears down a scope: cancels its loads and releases all of its cached images.
    ///
    /// This includes all sub-buckets of the scope. Returns the number of cancelled loads.
    pub fn release_scope(&mut self, scope: &ScopeKey) -> usize {
        let cancelled = self.cancel_matching(scope.as_ref());
        self.state.cache.invalidate(scope.as_ref());
        cancelled
    }

    /// Tears down a single sub-bucket of a scope, see [`release_scope`](Self::release_scope).
    pub fn release_scope_with(&mut self, scope: &ScopeKey, suffix: &str) -> usize {
        self.release_scope(&scope.with_suffix(suffix))
    }

    /// Cancels the loads of a scope, but keeps its cached images.
    pub fn cancel_scope(&mut self, scope: &ScopeKey) -> usize {
        self.cancel_matching(scope.as_ref())
    }

    /// Cancels all loads and releases the cached images of every scope that had loads in flight.
    pub fn release_all(&mut self) -> usize {
        let mut scopes: Vec<_> = self
            .state
            .running
            .values()
            .map(|in_flight| in_flight.scope.clone())
            .collect();
        scopes.sort();
        scopes.dedup();

        let drained = self.dispatcher.drain(&mut self.state);
        let tasks: Vec<_> = self.state.running.keys().copied().collect();
        let cancelled = tasks
            .into_iter()
            .filter(|task| self.cancel_task(*task))
            .count();

        for scope in &scopes {
            self.state.cache.invalidate(scope.as_ref());
        }
        self.state.cache.purge_reclaimed();
        drained + cancelled
    }

    /// The load `slot` is currently waiting for.
    pub fn bound_task<S: ?Sized>(&self, slot: &Rc<S>) -> Option<TaskId> {
        self.state
            .bindings
            .get(&SlotId::of(slot))
            .map(|binding| binding.task)
    }

    /// The number of loads in flight.
    pub fn in_flight(&self) -> usize {
        self.state.running.len()
    }

    /// Applies the results of all loads that finished so far, without blocking.
    pub fn dispatch_pending(&mut self) -> usize {
        self.dispatcher.dispatch_pending(&mut self.state)
    }

    /// Waits up to `timeout` for a load to finish, then applies all finished loads.
    pub fn dispatch_timeout(&mut self, timeout: Duration) -> usize {
        self.dispatcher.dispatch_timeout(&mut self.state, timeout)
    }

    /// Applies results until no load is in flight anymore.
    ///
    /// Returns `false` if no load finished within `timeout`.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        self.dispatcher.run_until_idle(&mut self.state, timeout)
    }

    pub fn cache(&self) -> &TieredCache<Image> {
        &self.state.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.state.cache.stats()
    }

    pub fn executor_stats(&self) -> ExecutorStats {
        self.dispatcher.stats()
    }

    /// Whether `url` is available locally without downloading it.
    pub fn has_download(&self, url: &str) -> bool {
        self.downloads.has_download(&normalize_url(url))
    }

    /// Downloads `url` into the download directory, without decoding it.
    ///
    /// This blocks the calling thread.
    pub fn download(&self, url: &str) -> Result<Option<PathBuf>, FetchError> {
        self.downloads.download(&normalize_url(url))
    }

    /// Decodes a previously downloaded image on the calling thread.
    ///
    /// Returns `None` if `url` has not been downloaded. The image is not cached.
    pub fn load_local(&self, url: &str, size: TargetSize) -> Result<Option<Image>, LoadError> {
        let Some(path) = self.downloads.local_path(&normalize_url(url)) else {
            return Ok(None);
        };
        let data = fs::read(path).map_err(FetchError::from)?;
        let image = self.decoder.decode(&data, size.or(self.display))?;
        Ok(Some(image))
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("dispatcher", &self.dispatcher)
            .field("cache", &self.state.cache)
            .field("in_flight", &self.state.running.len())
            .field("display", &self.display)
            .finish_non_exhaustive()
    }
}
