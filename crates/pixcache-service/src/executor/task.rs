use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::{Dispatcher, ExecutorError};

/// The identity of a [`Task`], unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// A cooperative cancellation flag, shared between a task and its background work.
///
/// Background work may poll [`is_cancelled`](Self::is_cancelled) to bail out early. Work that
/// does not poll still runs to completion, but its result is discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The lifecycle of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The task was not executed yet.
    Pending,
    /// The task was handed to the executor, and its completion was not dispatched yet.
    Running,
    /// The completion (or cancellation) callback of the task has run.
    Finished,
}

/// Misuse of a [`Task`], or a failure to hand it to the executor.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("cannot execute {0}: it is already running")]
    AlreadyRunning(TaskId),
    #[error("cannot execute {0}: it has already been executed")]
    AlreadyFinished(TaskId),
    #[error("the executor rejected the task")]
    Rejected(#[from] ExecutorError),
}

/// Callbacks of a task, all invoked on the consumer thread.
pub trait TaskHandler<T> {
    /// Called by [`Task::execute`] right before the work is submitted.
    fn on_pre_execute(&mut self, task: &Task) {
        let _ = task;
    }

    /// Called once the background work returned.
    ///
    /// `result` is `None` if the task was cancelled after its work had already returned.
    fn on_post_execute(&mut self, task: &Task, result: Option<T>);

    /// Called instead of [`on_post_execute`](Self::on_post_execute) for tasks that were
    /// cancelled before their work returned, including tasks discarded from a full queue.
    fn on_cancelled(&mut self, task: &Task) {
        let _ = task;
    }
}

struct TaskInner {
    id: TaskId,
    status: Cell<TaskStatus>,
    cancel: CancelToken,
}

/// A single-use, cancellable unit of background work.
///
/// This is a cheap handle that lives on the consumer thread. Clones refer to the same task.
#[derive(Clone)]
pub struct Task {
    inner: Rc<TaskInner>,
}

impl Task {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(TaskInner {
                id: TaskId::next(),
                status: Cell::new(TaskStatus::Pending),
                cancel: CancelToken::new(),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.status.get()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancelToken {
        &self.inner.cancel
    }

    pub(crate) fn finish(&self) {
        self.inner.status.set(TaskStatus::Finished);
    }

    /// Runs `work` on the executor of `dispatcher`.
    ///
    /// A task can only be executed once. `handler` receives the pre-execute callback right away;
    /// the remaining callbacks are delivered through [`Dispatcher::dispatch_pending`] and friends.
    pub fn execute<T, H, F>(
        &self,
        dispatcher: &mut Dispatcher<T>,
        handler: &mut H,
        work: F,
    ) -> Result<(), TaskError>
    where
        T: Send + 'static,
        H: TaskHandler<T> + ?Sized,
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        match self.status() {
            TaskStatus::Pending => {}
            TaskStatus::Running => return Err(TaskError::AlreadyRunning(self.id())),
            TaskStatus::Finished => return Err(TaskError::AlreadyFinished(self.id())),
        }

        self.inner.status.set(TaskStatus::Running);
        handler.on_pre_execute(self);
        if let Err(err) = dispatcher.submit(self, Box::new(work)) {
            self.finish();
            return Err(err.into());
        }
        Ok(())
    }

    /// Requests cancellation of this task.
    ///
    /// If the work is still queued, it is taken out of the queue and
    /// [`on_cancelled`](TaskHandler::on_cancelled) fires right away. If it is already running,
    /// the cancellation flag is raised and the result will be discarded once it arrives. A task
    /// that was never executed just becomes finished.
    ///
    /// Returns `false` if the task had already finished.
    pub fn cancel<T, H>(&self, dispatcher: &mut Dispatcher<T>, handler: &mut H) -> bool
    where
        T: Send + 'static,
        H: TaskHandler<T> + ?Sized,
    {
        match self.status() {
            TaskStatus::Finished => false,
            TaskStatus::Pending => {
                self.inner.cancel.cancel();
                self.finish();
                true
            }
            TaskStatus::Running => {
                self.inner.cancel.cancel();
                if dispatcher.remove(self.id()) {
                    handler.on_cancelled(self);
                    self.finish();
                    true
                } else {
                    dispatcher.is_live(self.id())
                }
            }
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Task {}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
