use super::codec::{Archive, ContentSink};
use super::list::NotifyListener;
use crate::config::EngineConfig;
use crate::models::entry::{
    normalize_entry_path, ArchiveEntry, ArchiveSummary, EntryKind, LinkKind,
};
use crate::utils::error::{ArcflowError, Result};
use crate::vfs::{ByteSink, FileStore};
use crate::worker::{Task, TaskContext};
use std::collections::HashSet;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Content disposition that restores members under a target directory.
///
/// Selective extraction works in a single pass: every header is still
/// reported to the listener, but content is materialized only for members
/// of the requested set (an empty set means everything). Unsafe member
/// paths are logged and left unmaterialized rather than aborting the pass.
pub struct ExtractSink {
    store: Arc<dyn FileStore>,
    dest: PathBuf,
    requested: HashSet<String>,
    buffer_size: usize,
    preserve_permissions: bool,
}

impl ExtractSink {
    pub fn new(
        store: Arc<dyn FileStore>,
        dest: impl Into<PathBuf>,
        requested: impl IntoIterator<Item = String>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            dest: dest.into(),
            requested: requested
                .into_iter()
                .map(|p| normalize_entry_path(&p))
                .collect(),
            buffer_size: config.buffer_size.max(512),
            preserve_permissions: config.preserve_permissions,
        }
    }

    /// The restore destination for one member, or `None` when only its
    /// metadata should be reported.
    fn target_for(&self, entry: &ArchiveEntry) -> Option<&Path> {
        if self.requested.is_empty() || self.requested.contains(&entry.path) {
            Some(&self.dest)
        } else {
            None
        }
    }

    fn extract_failed(&self, path: &Path, reason: String) -> ArcflowError {
        ArcflowError::ArchiveExtractFailed {
            path: path.to_path_buf(),
            reason,
        }
    }

    fn restore_dir(&self, dest_path: &Path) -> Result<()> {
        self.store
            .create_dir_all(dest_path)
            .map_err(|e| self.extract_failed(dest_path, e.to_string()))
    }

    /// Idempotent: an already-present link is left untouched, so a retried
    /// extraction does not fail on its own leftovers.
    fn restore_symlink(&self, dest_path: &Path, entry: &ArchiveEntry) -> Result<()> {
        if let Some(parent) = dest_path.parent() {
            self.store
                .create_dir_all(parent)
                .map_err(|e| self.extract_failed(dest_path, e.to_string()))?;
        }
        if self.store.exists(dest_path) {
            return Ok(());
        }
        self.store
            .symlink(Path::new(&entry.link), dest_path)
            .map_err(|e| self.extract_failed(dest_path, e.to_string()))
    }

    fn restore_file(
        &self,
        dest_path: &Path,
        entry: &ArchiveEntry,
        content: &mut dyn Read,
    ) -> Result<()> {
        if let Some(parent) = dest_path.parent() {
            self.store
                .create_dir_all(parent)
                .map_err(|e| self.extract_failed(dest_path, e.to_string()))?;
        }
        let mut sink = self
            .store
            .open_write(dest_path)
            .map_err(|e| self.extract_failed(dest_path, e.to_string()))?;

        if let Err(reason) = self.copy_blocks(sink.as_mut(), entry, content) {
            drop(sink);
            // Never leave a truncated artifact behind.
            if let Err(e) = self.store.remove_file(dest_path) {
                log::warn!(
                    "could not remove partial file {}: {}",
                    dest_path.display(),
                    e
                );
            }
            return Err(self.extract_failed(dest_path, reason));
        }
        drop(sink);

        if self.preserve_permissions && entry.permission != 0 {
            if let Err(e) = self.store.set_permissions(dest_path, entry.permission) {
                log::warn!(
                    "could not restore permissions on {}: {}",
                    dest_path.display(),
                    e
                );
            }
        }
        Ok(())
    }

    /// Streams content in codec-sized blocks, positioning the sink at each
    /// block's offset before writing. End of the content stream is success;
    /// delivering fewer bytes than the header promised is not.
    fn copy_blocks(
        &self,
        sink: &mut dyn ByteSink,
        entry: &ArchiveEntry,
        content: &mut dyn Read,
    ) -> std::result::Result<(), String> {
        let mut buf = vec![0u8; self.buffer_size];
        let mut offset = 0u64;
        loop {
            let n = content.read(&mut buf).map_err(|e| e.to_string())?;
            if n == 0 {
                break;
            }
            sink.seek_to(offset).map_err(|e| e.to_string())?;
            sink.write_all(&buf[..n]).map_err(|e| e.to_string())?;
            offset += n as u64;
        }
        if entry.size >= 0 && offset != entry.size as u64 {
            return Err(format!(
                "size mismatch: wrote {} of {} bytes",
                offset, entry.size
            ));
        }
        sink.flush().map_err(|e| e.to_string())
    }
}

impl ContentSink for ExtractSink {
    fn consume(&mut self, entry: &Arc<ArchiveEntry>, content: &mut dyn Read) -> Result<()> {
        let Some(dest_root) = self.target_for(entry) else {
            return Ok(());
        };
        let Some(dest_path) = sanitize_extract_path(dest_root, Path::new(&entry.path)) else {
            log::warn!("blocked unsafe member path: {}", entry.path);
            return Ok(());
        };

        match entry.kind {
            EntryKind::Directory => self.restore_dir(&dest_path),
            EntryKind::Symlink => self.restore_symlink(&dest_path, entry),
            EntryKind::Regular if entry.link_kind == LinkKind::Hard => {
                log::warn!("hard link not restored: {}", entry.path);
                Ok(())
            }
            EntryKind::Regular => self.restore_file(&dest_path, entry, content),
            _ => {
                log::debug!("not restoring {}: unsupported member kind", entry.path);
                Ok(())
            }
        }
    }
}

/// Rejects member paths that would escape the destination directory.
fn sanitize_extract_path(dest_root: &Path, raw_path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for comp in raw_path.components() {
        match comp {
            Component::Normal(v) => clean.push(v),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    let out = dest_root.join(clean);
    if out.starts_with(dest_root) {
        Some(out)
    } else {
        None
    }
}

/// Background task driving one full read pass with extraction content
/// handling. Every header is streamed to the consumer; the summary is the
/// terminal result.
pub struct ExtractTask {
    archive: Archive,
    sink: ExtractSink,
}

impl ExtractTask {
    pub fn new(
        archive: Archive,
        dest: impl Into<PathBuf>,
        requested: impl IntoIterator<Item = String>,
        config: &EngineConfig,
    ) -> Self {
        let store = archive.store_handle();
        let sink = ExtractSink::new(store, dest, requested, config);
        Self { archive, sink }
    }
}

impl Task for ExtractTask {
    type Item = Arc<ArchiveEntry>;
    type Output = ArchiveSummary;

    fn run(&mut self, ctx: &TaskContext<Arc<ArchiveEntry>>) -> Result<ArchiveSummary> {
        let mut listener = NotifyListener::new(ctx);
        self.archive.read(&mut listener, &mut self.sink)
    }
}
