// Background Worker Layer
pub mod queue;
pub mod thread_worker;

pub use queue::TaskQueue;
pub use thread_worker::{LoopSignal, Task, TaskContext, TaskObserver, Wakeup, Worker};
