use std::collections::HashMap;
use std::fmt;
use std::panic;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::{
    Completion, Executor, ExecutorError, ExecutorStats, Job, Outcome, Task, TaskHandler, TaskId,
    Work,
};
use crate::config::ExecutorConfig;

/// The consumer-thread end of an [`Executor`].
///
/// The dispatcher owns the executor and the receiving end of its completion channel, and keeps
/// every task alive from its submission until its completion has been dispatched. Completions
/// are only ever handled when the consumer thread asks for them, through
/// [`dispatch_pending`](Self::dispatch_pending), [`dispatch_timeout`](Self::dispatch_timeout)
/// or [`run_until_idle`](Self::run_until_idle).
pub struct Dispatcher<T> {
    executor: Executor<T>,
    completions: Receiver<Completion<T>>,
    live: HashMap<TaskId, Task>,
}

impl<T: Send + 'static> Dispatcher<T> {
    /// Creates a dispatcher with its own executor.
    ///
    /// Fails if `config` describes a pool that could never run anything.
    pub fn new(config: ExecutorConfig) -> Result<Self, ExecutorError> {
        let (sender, completions) = crossbeam_channel::unbounded();
        Ok(Self {
            executor: Executor::new(config, sender)?,
            completions,
            live: HashMap::new(),
        })
    }

    pub(crate) fn submit(&mut self, task: &Task, work: Work<T>) -> Result<(), ExecutorError> {
        let job = Job::new(task.id(), task.token().clone(), work);
        self.executor.submit(job)?;
        self.live.insert(task.id(), task.clone());
        Ok(())
    }

    /// Takes a queued task out of the executor. Returns `false` if it has started already.
    pub(crate) fn remove(&mut self, id: TaskId) -> bool {
        if self.executor.remove(id) {
            self.live.remove(&id);
            true
        } else {
            false
        }
    }

    /// Whether the task was submitted and its completion was not dispatched yet.
    pub fn is_live(&self, id: TaskId) -> bool {
        self.live.contains_key(&id)
    }

    /// The number of submitted tasks whose completion was not dispatched yet.
    pub fn in_flight(&self) -> usize {
        self.live.len()
    }

    pub fn stats(&self) -> ExecutorStats {
        self.executor.stats()
    }

    /// Cancels every task that is still waiting in the admission queue.
    ///
    /// Returns the number of cancelled tasks.
    pub fn drain<H>(&mut self, handler: &mut H) -> usize
    where
        H: TaskHandler<T> + ?Sized,
    {
        let drained = self.executor.drain();
        for id in &drained {
            if let Some(task) = self.live.remove(id) {
                handler.on_cancelled(&task);
                task.finish();
            }
        }
        drained.len()
    }

    /// Handles all completions that have arrived so far, without blocking.
    pub fn dispatch_pending<H>(&mut self, handler: &mut H) -> usize
    where
        H: TaskHandler<T> + ?Sized,
    {
        let mut dispatched = 0;
        while let Ok(completion) = self.completions.try_recv() {
            self.deliver(completion, handler);
            dispatched += 1;
        }
        dispatched
    }

    /// Waits up to `timeout` for the next completion, then handles everything that arrived.
    pub fn dispatch_timeout<H>(&mut self, handler: &mut H, timeout: Duration) -> usize
    where
        H: TaskHandler<T> + ?Sized,
    {
        match self.completions.recv_timeout(timeout) {
            Ok(completion) => {
                self.deliver(completion, handler);
                1 + self.dispatch_pending(handler)
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Dispatches completions until no task is in flight anymore.
    ///
    /// Gives up and returns `false` if nothing completes for `timeout`.
    pub fn run_until_idle<H>(&mut self, handler: &mut H, timeout: Duration) -> bool
    where
        H: TaskHandler<T> + ?Sized,
    {
        self.dispatch_pending(handler);
        let mut last_progress = Instant::now();
        while self.in_flight() > 0 {
            let remaining = timeout.saturating_sub(last_progress.elapsed());
            if remaining.is_zero() {
                return false;
            }
            if self.dispatch_timeout(handler, remaining) > 0 {
                last_progress = Instant::now();
            }
        }
        true
    }

    fn deliver<H>(&mut self, completion: Completion<T>, handler: &mut H)
    where
        H: TaskHandler<T> + ?Sized,
    {
        let Completion { id, outcome } = completion;
        let Some(task) = self.live.remove(&id) else {
            tracing::trace!(task = %id, "Ignoring completion of a task that is not in flight");
            return;
        };

        match outcome {
            Outcome::Completed(value) => {
                let value = (!task.is_cancelled()).then_some(value);
                handler.on_post_execute(&task, value);
            }
            Outcome::Cancelled | Outcome::Discarded => {
                task.token().cancel();
                handler.on_cancelled(&task);
            }
            Outcome::Panicked(payload) => {
                task.finish();
                tracing::error!(task = %id, "Background work panicked");
                panic::resume_unwind(payload);
            }
        }
        task.finish();
    }
}

impl<T> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("executor", &self.executor)
            .field("in_flight", &self.live.len())
            .finish()
    }
}
