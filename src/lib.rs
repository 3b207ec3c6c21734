//! Streaming archive engine with background workers for file-manager
//! frontends.
//!
//! Two coupled subsystems make up the crate: a pull-based archive codec
//! ([`Archive`]) that reads, writes and sniffs filtered tar archives over a
//! virtual file abstraction, and a generic background-worker framework
//! ([`worker::Worker`]) that streams per-entry results from a dedicated
//! thread to a single-threaded event-loop consumer with FIFO ordering and
//! exactly-once completion. Archive listing and extraction are packaged as
//! ready-made worker tasks.

pub mod config;
pub mod models;
pub mod system;
pub mod utils;
pub mod vfs;
pub mod worker;

pub use config::EngineConfig;
pub use models::{ArchiveEntry, ArchiveSummary, EntryKind, LinkKind};
pub use system::{
    detect_write_spec, spawn_list, AcceptAll, Archive, ArchiveFormat, ArchiveListener,
    CompressionFilter, ContentSink, DirTreeProvider, EntryProvider, ExtractSink, ExtractTask,
    FileFilter, ListTask, ListenerBridge, SkipContent,
};
pub use utils::error::{ArcflowError, Result};
pub use vfs::{ByteSink, ByteSource, FileStore, LocalStore};
pub use worker::{LoopSignal, Task, TaskContext, TaskObserver, TaskQueue, Wakeup, Worker};
