use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use super::slot::{ConsumerSlot, LoadListener, SlotId};
use super::LoadResult;
use crate::caching::TieredCache;
use crate::executor::{Task, TaskHandler, TaskId};
use crate::image::Image;
use crate::types::{CacheKey, ScopeKey};

/// A slot waiting for the result of an in-flight load.
pub(super) struct Target {
    pub slot: Weak<dyn ConsumerSlot>,
    pub slot_id: SlotId,
    pub listener: Option<Rc<dyn LoadListener>>,
    /// The generation of the binding this target was created with.
    pub generation: u64,
}

/// A load that was submitted and did not complete yet.
pub(super) struct InFlight {
    pub task: Task,
    pub url: String,
    pub key: CacheKey,
    pub scope: ScopeKey,
    pub targets: Vec<Target>,
}

impl InFlight {
    /// Whether any slot that was ever bound to this load is still around.
    pub fn has_live_targets(&self) -> bool {
        self.targets.iter().any(|target| target.slot.strong_count() > 0)
    }
}

/// The load a slot is currently bound to.
pub(super) struct Binding {
    pub task: TaskId,
    pub key: CacheKey,
    pub generation: u64,
}

/// The consumer-thread state of the loader.
///
/// This is also the [`TaskHandler`] of all loads, which makes completion handling the only
/// place where results are routed to slots.
pub(super) struct LoaderState {
    pub cache: Arc<TieredCache<Image>>,
    /// All in-flight loads.
    pub running: HashMap<TaskId, InFlight>,
    /// The single in-flight load per cache key.
    pub index: HashMap<CacheKey, TaskId>,
    pub bindings: HashMap<SlotId, Binding>,
    generation: u64,
}

impl LoaderState {
    pub fn new(cache: Arc<TieredCache<Image>>) -> Self {
        Self {
            cache,
            running: HashMap::new(),
            index: HashMap::new(),
            bindings: HashMap::new(),
            generation: 0,
        }
    }

    /// Binds `slot` to the in-flight load `task`, which must be running.
    pub fn bind(
        &mut self,
        task: TaskId,
        slot: Weak<dyn ConsumerSlot>,
        slot_id: SlotId,
        listener: Option<Rc<dyn LoadListener>>,
    ) {
        let Some(in_flight) = self.running.get_mut(&task) else {
            return;
        };
        self.generation += 1;
        in_flight.targets.push(Target {
            slot,
            slot_id,
            listener,
            generation: self.generation,
        });
        self.bindings.insert(
            slot_id,
            Binding {
                task,
                key: in_flight.key.clone(),
                generation: self.generation,
            },
        );
    }

    /// Drops all bookkeeping of the given load, returning it if it was in flight.
    pub fn forget(&mut self, task: TaskId) -> Option<InFlight> {
        let in_flight = self.running.remove(&task)?;
        if self.index.get(&in_flight.key) == Some(&task) {
            self.index.remove(&in_flight.key);
        }
        self.bindings.retain(|_, binding| binding.task != task);
        Some(in_flight)
    }

    /// Whether `target` is still the current binding of its slot.
    fn is_bound(&self, task: TaskId, target: &Target) -> bool {
        self.bindings.get(&target.slot_id).is_some_and(|binding| {
            binding.task == task && binding.generation == target.generation
        })
    }

    fn complete(&mut self, task: TaskId, result: LoadResult) {
        let Some(in_flight) = self.running.remove(&task) else {
            return;
        };
        if self.index.get(&in_flight.key) == Some(&task) {
            self.index.remove(&in_flight.key);
        }

        let targets: Vec<_> = in_flight
            .targets
            .iter()
            .filter(|target| self.is_bound(task, target))
            .filter_map(|target| Some((target.slot.upgrade()?, target.listener.clone())))
            .collect();
        self.bindings.retain(|_, binding| binding.task != task);

        match result {
            Ok(image) => {
                metric!(counter("loader.completed") += 1, "status" => "ok");
                self.cache.put(in_flight.key, Arc::clone(&image));
                for (slot, listener) in targets {
                    slot.bind_result(&image);
                    if let Some(listener) = listener {
                        listener.on_loaded(Some(&image), &*slot, true);
                    }
                }
            }
            Err(err) => {
                metric!(counter("loader.completed") += 1, "status" => "error");
                tracing::debug!(
                    url = %in_flight.url,
                    error = &err as &dyn std::error::Error,
                    "Image could not be loaded"
                );
                for (slot, listener) in targets {
                    if let Some(listener) = listener {
                        listener.on_loaded(None, &*slot, false);
                    }
                }
            }
        }
    }
}

impl TaskHandler<LoadResult> for LoaderState {
    fn on_post_execute(&mut self, task: &Task, result: Option<LoadResult>) {
        match result {
            Some(result) => self.complete(task.id(), result),
            None => {
                self.forget(task.id());
            }
        }
    }

    fn on_cancelled(&mut self, task: &Task) {
        if let Some(in_flight) = self.forget(task.id()) {
            metric!(counter("loader.completed") += 1, "status" => "cancelled");
            tracing::debug!(url = %in_flight.url, "Image load was cancelled");
        }
    }
}
