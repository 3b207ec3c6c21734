use super::queue::TaskQueue;
use crate::utils::error::{ArcflowError, Result};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Cross-thread "run my handler soon" primitive of the consumer's event
/// loop. `wake` must be callable from any thread and cheap to call
/// repeatedly; duplicate wakes are harmless because the queue coalesces
/// them.
pub trait Wakeup: Send + Sync {
    fn wake(&self);
}

/// Condvar-backed [`Wakeup`] for consumers that drive workers from a plain
/// polling loop (and for tests). `wait` parks until a wake arrives or the
/// timeout lapses, consuming the signal.
pub struct LoopSignal {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl LoopSignal {
    pub fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Returns true when woken by a signal, false on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = match self.signaled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (mut guard, result) = match self.cond.wait_timeout_while(guard, timeout, |s| !*s) {
            Ok(pair) => pair,
            Err(poisoned) => {
                let pair = poisoned.into_inner();
                (pair.0, pair.1)
            }
        };
        let signaled = *guard;
        *guard = false;
        signaled || !result.timed_out()
    }
}

impl Default for LoopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl Wakeup for LoopSignal {
    fn wake(&self) {
        let mut guard = match self.signaled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = true;
        self.cond.notify_one();
    }
}

/// Handed to [`Task::run`] on the background thread; the only legal way to
/// stream intermediate items back to the consumer.
pub struct TaskContext<I> {
    queue: Arc<TaskQueue<I>>,
    waker: Arc<dyn Wakeup>,
}

impl<I> TaskContext<I> {
    pub fn notify(&self, item: I) {
        if self.queue.push(item) {
            self.waker.wake();
        }
    }
}

/// A blocking background computation. Runs entirely off the consumer
/// thread; failures are returned, never unwound across the thread boundary.
pub trait Task: Send {
    type Item: Send + 'static;
    type Output: Send + 'static;

    fn run(&mut self, ctx: &TaskContext<Self::Item>) -> Result<Self::Output>;
}

/// Consumer-side callbacks. `process` sees every notified item, batched in
/// FIFO order, possibly across several calls; `done` fires exactly once,
/// strictly after the last batch that was queued before the task returned.
pub trait TaskObserver<I, O> {
    fn process(&mut self, items: Vec<I>);
    fn done(&mut self, result: Result<O>);
}

/// Marks the queue inactive when the background thread leaves `run`, even
/// through a panic, so the consumer always observes the terminal state.
struct FinishGuard<I> {
    queue: Arc<TaskQueue<I>>,
    waker: Arc<dyn Wakeup>,
}

impl<I> Drop for FinishGuard<I> {
    fn drop(&mut self) {
        if self.queue.finish() {
            self.waker.wake();
        }
    }
}

/// Consumer-thread handle to one in-flight background task. One dedicated
/// thread per worker; a worker is single-use.
pub struct Worker<I, O> {
    queue: Arc<TaskQueue<I>>,
    join: Option<JoinHandle<Result<O>>>,
    completed: bool,
}

impl<I, O> Worker<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Launches the background computation. The waker is invoked (from the
    /// background thread) whenever a drain is due; the consumer answers each
    /// wake with one `pump` call.
    pub fn spawn<T>(mut task: T, waker: Arc<dyn Wakeup>) -> Self
    where
        T: Task<Item = I, Output = O> + 'static,
    {
        let queue = Arc::new(TaskQueue::new());
        let ctx = TaskContext {
            queue: Arc::clone(&queue),
            waker: Arc::clone(&waker),
        };
        let join = std::thread::spawn(move || {
            let _finish = FinishGuard {
                queue: Arc::clone(&ctx.queue),
                waker: Arc::clone(&ctx.waker),
            };
            task.run(&ctx)
        });
        Self {
            queue,
            join: Some(join),
            completed: false,
        }
    }

    /// The wakeup handler. Drains the queue and delivers the batch; once the
    /// queue reports inactive, joins the background thread (already finished
    /// at that point, so non-blocking in practice) and delivers the terminal
    /// result exactly once.
    pub fn pump<Ob>(&mut self, observer: &mut Ob)
    where
        Ob: TaskObserver<I, O>,
    {
        if self.completed {
            return;
        }

        let mut items = Vec::new();
        let active = self.queue.drain_into(&mut items);
        if !items.is_empty() {
            observer.process(items);
        }
        if !active {
            self.completed = true;
            let result = match self.join.take() {
                Some(handle) => match handle.join() {
                    Ok(result) => result,
                    Err(_) => Err(ArcflowError::WorkerPanicked),
                },
                None => Err(ArcflowError::WorkerPanicked),
            };
            observer.done(result);
        }
    }

    /// True once the terminal `done` callback has been delivered.
    pub fn is_complete(&self) -> bool {
        self.completed
    }
}
