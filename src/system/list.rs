use super::codec::{Archive, ArchiveListener};
use crate::models::entry::{ArchiveEntry, ArchiveSummary};
use crate::utils::error::Result;
use crate::worker::{Task, TaskContext, TaskObserver, Wakeup, Worker};
use std::sync::Arc;

/// Background-side listener that forwards every member through the worker
/// queue. Completion travels as the task result, not through `on_done`;
/// the consumer-side bridge reconstructs the terminal callback.
pub(crate) struct NotifyListener<'a> {
    ctx: &'a TaskContext<Arc<ArchiveEntry>>,
}

impl<'a> NotifyListener<'a> {
    pub(crate) fn new(ctx: &'a TaskContext<Arc<ArchiveEntry>>) -> Self {
        Self { ctx }
    }
}

impl ArchiveListener for NotifyListener<'_> {
    fn on_entry(&mut self, entry: &Arc<ArchiveEntry>) {
        self.ctx.notify(Arc::clone(entry));
    }

    fn on_done(&mut self, _summary: &ArchiveSummary, _error: Option<&str>) {}
}

/// Background task driving a listen-only pass over one archive.
pub struct ListTask {
    archive: Archive,
}

impl ListTask {
    pub fn new(archive: Archive) -> Self {
        Self { archive }
    }
}

impl Task for ListTask {
    type Item = Arc<ArchiveEntry>;
    type Output = ArchiveSummary;

    fn run(&mut self, ctx: &TaskContext<Arc<ArchiveEntry>>) -> Result<ArchiveSummary> {
        let mut listener = NotifyListener::new(ctx);
        self.archive.list(&mut listener)
    }
}

/// Consumer-side bridge from the generic worker callbacks back onto a
/// domain [`ArchiveListener`]: entries are forwarded in arrival order, and
/// `on_done` is always delivered exactly once, with the error message set
/// when the background pass failed. On failure the summary reports the
/// entries actually delivered up to that point.
pub struct ListenerBridge<L: ArchiveListener> {
    listener: L,
    delivered: u64,
}

impl<L: ArchiveListener> ListenerBridge<L> {
    pub fn new(listener: L) -> Self {
        Self {
            listener,
            delivered: 0,
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn into_listener(self) -> L {
        self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }
}

impl<L: ArchiveListener> TaskObserver<Arc<ArchiveEntry>, ArchiveSummary> for ListenerBridge<L> {
    fn process(&mut self, items: Vec<Arc<ArchiveEntry>>) {
        for entry in items {
            self.delivered += 1;
            self.listener.on_entry(&entry);
        }
    }

    fn done(&mut self, result: Result<ArchiveSummary>) {
        match result {
            Ok(summary) => self.listener.on_done(&summary, None),
            Err(error) => {
                let summary = ArchiveSummary::new(self.delivered);
                self.listener.on_done(&summary, Some(&error.to_string()));
            }
        }
    }
}

/// Spawns a listing worker over `archive`. The returned worker is pumped
/// from the consumer's event loop; entries and the terminal callback land
/// on whatever observer is passed to `pump`.
pub fn spawn_list(
    archive: Archive,
    waker: Arc<dyn Wakeup>,
) -> Worker<Arc<ArchiveEntry>, ArchiveSummary> {
    Worker::spawn(ListTask::new(archive), waker)
}
