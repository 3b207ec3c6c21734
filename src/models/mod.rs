// Data Models
pub mod entry;

pub use entry::{ArchiveEntry, ArchiveSummary, EntryKind, LinkKind};
