// Archive Engine Layer
pub mod codec;
pub mod extract;
pub mod format;
pub mod list;
pub mod provider;

pub use codec::{Archive, ArchiveListener, ContentSink, SkipContent};
pub use extract::{ExtractSink, ExtractTask};
pub use format::{detect_write_spec, ArchiveFormat, CompressionFilter};
pub use list::{spawn_list, ListTask, ListenerBridge};
pub use provider::{AcceptAll, DirTreeProvider, EntryProvider, FileFilter};
