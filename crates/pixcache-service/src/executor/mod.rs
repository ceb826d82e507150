//! A bounded pool of background workers, and the bridge that brings their results back.
//!
//! Work is submitted through a [`Task`] on the consumer thread. The [`Executor`] runs it on one
//! of its worker threads and posts a [`Completion`] into a channel, which the consumer thread
//! drains through its [`Dispatcher`]. All lifecycle callbacks of a task thus run on the
//! consumer thread.
//!
//! Admission follows the classic thread pool rules:
//!
//! - While fewer than `core_threads` workers exist, every submission starts a new worker.
//! - Otherwise the job is put into a FIFO queue of `queue_capacity` entries.
//! - If the queue is full, additional workers are started up to `max_threads`.
//! - If that ceiling is reached as well, the oldest queued job is discarded and reported as
//!   cancelled, and the new job takes its place at the back of the queue.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::ExecutorConfig;

mod dispatch;
mod task;

pub use dispatch::Dispatcher;
pub use task::{CancelToken, Task, TaskError, TaskHandler, TaskId, TaskStatus};

/// An error creating the [`Executor`], or submitting work to it.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The pool sizing cannot run any work.
    #[error("invalid executor configuration: {0}")]
    InvalidConfig(String),
    /// The executor no longer accepts work.
    #[error("the executor has been shut down")]
    Shutdown,
    /// The operating system refused to start another worker.
    #[error("failed to spawn a worker thread")]
    Spawn(#[source] std::io::Error),
}

pub(crate) type Work<T> = Box<dyn FnOnce(&CancelToken) -> T + Send + 'static>;

/// A unit of work that was handed to the executor but has not finished yet.
pub(crate) struct Job<T> {
    id: TaskId,
    cancel: CancelToken,
    work: Work<T>,
}

impl<T> Job<T> {
    pub(crate) fn new(id: TaskId, cancel: CancelToken, work: Work<T>) -> Self {
        Self { id, cancel, work }
    }
}

/// How a job ended.
pub enum Outcome<T> {
    /// The work function returned a value, and was not cancelled while running.
    Completed(T),
    /// The work function returned, but its task was cancelled in the meantime.
    Cancelled,
    /// The job was pushed out of a full queue before it ever started.
    Discarded,
    /// The work function panicked.
    Panicked(Box<dyn Any + Send + 'static>),
}

impl<T> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(_) => f.write_str("Completed"),
            Self::Cancelled => f.write_str("Cancelled"),
            Self::Discarded => f.write_str("Discarded"),
            Self::Panicked(_) => f.write_str("Panicked"),
        }
    }
}

/// The message posted to the consumer thread once a job ended.
#[derive(Debug)]
pub struct Completion<T> {
    pub id: TaskId,
    pub outcome: Outcome<T>,
}

/// A snapshot of the pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Live worker threads.
    pub workers: usize,
    /// Workers that are waiting for a job.
    pub idle: usize,
    /// Jobs waiting in the admission queue.
    pub queued: usize,
}

struct PoolState<T> {
    queue: VecDeque<Job<T>>,
    workers: usize,
    idle: usize,
    shutdown: bool,
}

struct Shared<T> {
    config: ExecutorConfig,
    state: Mutex<PoolState<T>>,
    available: Condvar,
    completions: Sender<Completion<T>>,
    thread_counter: AtomicUsize,
}

/// The worker pool.
///
/// Dropping the executor shuts it down: queued jobs are dropped without notification and
/// workers exit once their current job is done.
pub struct Executor<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Executor<T> {
    pub fn new(
        config: ExecutorConfig,
        completions: Sender<Completion<T>>,
    ) -> Result<Self, ExecutorError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    workers: 0,
                    idle: 0,
                    shutdown: false,
                }),
                available: Condvar::new(),
                completions,
                thread_counter: AtomicUsize::new(0),
            }),
        })
    }

    pub(crate) fn submit(&self, job: Job<T>) -> Result<(), ExecutorError> {
        let config = &self.shared.config;
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(ExecutorError::Shutdown);
        }
        metric!(counter("executor.submitted") += 1);

        if state.workers < config.core_threads {
            return self.spawn_worker(&mut state, job);
        }
        if state.queue.len() < config.queue_capacity {
            state.queue.push_back(job);
            metric!(gauge("executor.queue") = state.queue.len() as u64);
            self.shared.available.notify_one();
            return Ok(());
        }
        if state.workers < config.max_threads {
            return self.spawn_worker(&mut state, job);
        }

        let discarded = state.queue.pop_front();
        state.queue.push_back(job);
        self.shared.available.notify_one();
        drop(state);

        if let Some(discarded) = discarded {
            discarded.cancel.cancel();
            tracing::debug!(task = %discarded.id, "Queue full, discarding oldest queued task");
            metric!(counter("executor.discarded") += 1);
            self.shared.post(discarded.id, Outcome::Discarded);
        }
        Ok(())
    }

    fn spawn_worker(
        &self,
        state: &mut MutexGuard<'_, PoolState<T>>,
        job: Job<T>,
    ) -> Result<(), ExecutorError> {
        let shared = Arc::clone(&self.shared);
        let n = self.shared.thread_counter.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(format!("pixcache-worker-{n}"))
            .spawn(move || shared.run_worker(job))
            .map_err(ExecutorError::Spawn)?;
        state.workers += 1;
        tracing::trace!(workers = state.workers, "Started worker thread");
        Ok(())
    }

    /// Takes the job of the given task out of the queue, if it has not started yet.
    pub(crate) fn remove(&self, id: TaskId) -> bool {
        let mut state = self.shared.state.lock();
        match state.queue.iter().position(|job| job.id == id) {
            Some(index) => {
                state.queue.remove(index);
                true
            }
            None => false,
        }
    }

    /// Empties the admission queue, returning the tasks of all jobs that never started.
    pub(crate) fn drain(&self) -> Vec<TaskId> {
        let mut state = self.shared.state.lock();
        state
            .queue
            .drain(..)
            .map(|job| {
                job.cancel.cancel();
                job.id
            })
            .collect()
    }
}

impl<T> Executor<T> {
    pub fn stats(&self) -> ExecutorStats {
        let state = self.shared.state.lock();
        ExecutorStats {
            workers: state.workers,
            idle: state.idle,
            queued: state.queue.len(),
        }
    }

    /// Stops accepting work and drops all queued jobs.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        state.queue.clear();
        self.shared.available.notify_all();
    }
}

impl<T> Drop for Executor<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T> fmt::Debug for Executor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Executor")
            .field("config", &self.shared.config)
            .field("workers", &state.workers)
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl<T: Send + 'static> Shared<T> {
    fn run_worker(&self, first: Job<T>) {
        let mut job = first;
        loop {
            self.run(job);
            match self.next_job() {
                Some(next) => job = next,
                None => break,
            }
        }
    }

    fn run(&self, job: Job<T>) {
        let Job { id, cancel, work } = job;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| work(&cancel))) {
            Ok(_) if cancel.is_cancelled() => Outcome::Cancelled,
            Ok(value) => Outcome::Completed(value),
            Err(payload) => Outcome::Panicked(payload),
        };
        self.post(id, outcome);
    }

    /// Blocks until a job is available, or returns `None` if this worker should exit.
    fn next_job(&self) -> Option<Job<T>> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                state.workers -= 1;
                return None;
            }
            if let Some(job) = state.queue.pop_front() {
                return Some(job);
            }

            state.idle += 1;
            let timed_out = if state.workers > self.config.core_threads {
                self.available
                    .wait_for(&mut state, self.config.keep_alive)
                    .timed_out()
            } else {
                self.available.wait(&mut state);
                false
            };
            state.idle -= 1;

            if timed_out && state.queue.is_empty() && state.workers > self.config.core_threads {
                state.workers -= 1;
                tracing::trace!(workers = state.workers, "Idle worker thread exiting");
                return None;
            }
        }
    }

    fn post(&self, id: TaskId, outcome: Outcome<T>) {
        // the consumer is gone, nobody is interested in the result anymore
        if self.completions.send(Completion { id, outcome }).is_err() {
            tracing::trace!(task = %id, "Dropping completion, the dispatcher is gone");
        }
    }
}
