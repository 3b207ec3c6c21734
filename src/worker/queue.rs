use std::collections::VecDeque;
use std::sync::Mutex;

struct Inner<T> {
    items: VecDeque<T>,
    /// Advisory: false once the producing side has finished. Only the drain
    /// path interprets it; late pushes still append.
    active: bool,
    /// True while a wakeup has been scheduled and not yet consumed by a
    /// drain. Kept under the same lock as the items so a producer finishing
    /// between a drain and the flag reset cannot lose its wakeup.
    pending: bool,
}

/// Unbounded FIFO mailbox between one background producer and one
/// event-loop consumer. Pure mailbox semantics: nothing here blocks beyond
/// lock acquisition; the cross-thread wakeup is signaled by the caller
/// whenever `push`/`finish` report that one is due.
pub struct TaskQueue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                active: true,
                pending: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("task queue mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Appends an item. Returns true when the caller must schedule a wakeup
    /// (none is pending yet); repeated pushes coalesce into one.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.lock();
        inner.items.push_back(item);
        if inner.pending {
            false
        } else {
            inner.pending = true;
            true
        }
    }

    /// Atomically moves all queued items into `out`, consumes the pending
    /// wakeup, and reports whether the queue is still active. An empty drain
    /// with `false` returned is the terminal condition.
    pub fn drain_into(&self, out: &mut Vec<T>) -> bool {
        let mut inner = self.lock();
        out.extend(inner.items.drain(..));
        inner.pending = false;
        inner.active
    }

    /// Marks the queue inactive. Returns true when the caller must schedule
    /// the final wakeup (coalesced with any pending one).
    pub fn finish(&self) -> bool {
        let mut inner = self.lock();
        inner.active = false;
        if inner.pending {
            false
        } else {
            inner.pending = true;
            true
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
