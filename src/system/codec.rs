use super::format::{self, ArchiveFormat, CompressionFilter};
use super::provider::EntryProvider;
use crate::models::entry::{ArchiveEntry, ArchiveSummary, EntryKind, LinkKind};
use crate::utils::error::{ArcflowError, Result};
use crate::vfs::{FileStore, SinkWriter, SourceReader};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

/// Read-pass observer. `on_entry` fires once per member from whichever
/// thread drives the read; `on_done` fires exactly once per pass, after the
/// codec session has been closed, with `error` set on failure. The contract
/// is total: on a hard failure `on_done` is still delivered, and the error
/// returned from [`Archive::read`] is a secondary, redundant signal.
pub trait ArchiveListener {
    fn on_entry(&mut self, entry: &Arc<ArchiveEntry>);
    fn on_done(&mut self, summary: &ArchiveSummary, error: Option<&str>);
}

/// Per-entry content disposition, selected by the caller of the read loop
/// so the loop never knows which variant it is driving. The default
/// behavior is to leave the content block unread (the codec skips it when
/// the next header is requested); extraction materializes it instead.
pub trait ContentSink {
    fn consume(&mut self, entry: &Arc<ArchiveEntry>, content: &mut dyn Read) -> Result<()>;
}

/// Listing-only disposition: every content block is skipped.
pub struct SkipContent;

impl ContentSink for SkipContent {
    fn consume(&mut self, _entry: &Arc<ArchiveEntry>, _content: &mut dyn Read) -> Result<()> {
        Ok(())
    }
}

/// One archive file plus one codec session at a time.
///
/// `read`, `write` and `can_read` each open and fully close one session.
/// Not reentrant: one `Archive` belongs to exactly one worker for the
/// lifetime of one operation.
pub struct Archive {
    path: PathBuf,
    store: Arc<dyn FileStore>,
    write_spec: Option<(ArchiveFormat, Vec<CompressionFilter>)>,
    read_formats: Vec<String>,
}

impl Archive {
    pub fn new(store: Arc<dyn FileStore>, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            store,
            write_spec: None,
            read_formats: Vec::new(),
        }
    }

    /// Convenience constructor over the local filesystem.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(crate::vfs::LocalStore), path)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub(crate) fn store_handle(&self) -> Arc<dyn FileStore> {
        Arc::clone(&self.store)
    }

    /// Configures the write session. Filter order matters: filters wrap the
    /// sink before the base format writes into them.
    pub fn set_write_spec(&mut self, spec_format: ArchiveFormat, filters: Vec<CompressionFilter>) {
        self.write_spec = Some((spec_format, filters));
    }

    /// Derives the write configuration from the archive's file name.
    pub fn prepare_write_from_name(&mut self) -> Result<()> {
        match format::detect_write_spec(&self.path) {
            Some((spec_format, filters)) => {
                self.set_write_spec(spec_format, filters);
                Ok(())
            }
            None => Err(ArcflowError::UnsupportedFormat {
                path: self.path.clone(),
            }),
        }
    }

    /// Detected filter and format names of the last successful read, filter
    /// names in application order followed by the base format name once.
    /// Empty until a read succeeds.
    pub fn read_formats(&self) -> &[String] {
        &self.read_formats
    }

    /// Iterates the archive, reporting each member to `listener` and handing
    /// its content block to `content`. Returns the codec's own header count;
    /// callers tracking delivered entries themselves can compare the two.
    pub fn read(
        &mut self,
        listener: &mut dyn ArchiveListener,
        content: &mut dyn ContentSink,
    ) -> Result<ArchiveSummary> {
        match self.read_session(listener, content) {
            Ok((summary, names)) => {
                self.read_formats = names;
                listener.on_done(&summary, None);
                Ok(summary)
            }
            Err((summary, reason)) => {
                listener.on_done(&summary, Some(&reason));
                Err(ArcflowError::ArchiveReadFailed {
                    path: self.path.clone(),
                    reason,
                })
            }
        }
    }

    /// Listen-only read.
    pub fn list(&mut self, listener: &mut dyn ArchiveListener) -> Result<ArchiveSummary> {
        self.read(listener, &mut SkipContent)
    }

    /// Format sniff: true as soon as one header parses. Streams no content
    /// and never surfaces an error; an unreadable, corrupt or zero-entry
    /// file is simply not a readable archive.
    pub fn can_read(&self) -> bool {
        let Ok(source) = self.store.open_read(&self.path) else {
            return false;
        };
        let Ok((_, decoded)) = format::open_decoded(Box::new(SourceReader::new(source))) else {
            return false;
        };
        let mut archive = tar::Archive::new(decoded);
        match archive.entries() {
            Ok(mut entries) => matches!(entries.next(), Some(Ok(_))),
            Err(_) => false,
        }
    }

    /// Pulls entries and content from `provider` until it is exhausted and
    /// streams them into a fresh archive. The stream is closed before any
    /// failure is raised; there is no terminal listener on the write path.
    pub fn write(&mut self, provider: &mut dyn EntryProvider) -> Result<()> {
        let Some((spec_format, filters)) = self.write_spec.clone() else {
            return Err(ArcflowError::UnsupportedFormat {
                path: self.path.clone(),
            });
        };
        match spec_format {
            ArchiveFormat::Tar => self.write_tar(&filters, provider),
        }
    }

    fn write_tar(
        &mut self,
        filters: &[CompressionFilter],
        provider: &mut dyn EntryProvider,
    ) -> Result<()> {
        let write_failed = |reason: String| ArcflowError::ArchiveWriteFailed {
            path: self.path.clone(),
            reason,
        };

        let sink = self
            .store
            .open_write(&self.path)
            .map_err(|e| write_failed(e.to_string()))?;
        let writer = format::open_encoded(SinkWriter::new(sink), filters)
            .map_err(|e| write_failed(e.to_string()))?;
        let mut builder = tar::Builder::new(writer);

        let mut failure: Option<String> = None;
        loop {
            let entry = match provider.next_entry() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    failure = Some(e.to_string());
                    break;
                }
            };
            let appended = match entry.kind {
                EntryKind::Directory => append_dir(&mut builder, &entry),
                EntryKind::Regular => match provider.content() {
                    Ok(mut content) => append_file(&mut builder, &entry, &mut content),
                    Err(e) => Err(io::Error::other(e.to_string())),
                },
                _ => {
                    log::debug!("not archiving {}: unsupported member kind", entry.path);
                    Ok(())
                }
            };
            if let Err(e) = appended {
                failure = Some(codec_message(&e));
                break;
            }
        }

        // Close and flush the stream before surfacing any failure.
        let closed = builder.into_inner().and_then(|writer| writer.finish());
        if let Some(reason) = failure {
            return Err(write_failed(reason));
        }
        closed.map_err(|e| write_failed(codec_message(&e)))?;
        Ok(())
    }

    fn read_session(
        &mut self,
        listener: &mut dyn ArchiveListener,
        content: &mut dyn ContentSink,
    ) -> std::result::Result<(ArchiveSummary, Vec<String>), (ArchiveSummary, String)> {
        let mut count = 0u64;
        let fail = |count: u64, reason: String| (ArchiveSummary::new(count), reason);

        let source = self
            .store
            .open_read(&self.path)
            .map_err(|e| fail(0, e.to_string()))?;
        let (filters, decoded) = format::open_decoded(Box::new(SourceReader::new(source)))
            .map_err(|e| fail(0, codec_message(&e)))?;
        let mut archive = tar::Archive::new(decoded);
        let entries = archive
            .entries()
            .map_err(|e| fail(0, codec_message(&e)))?;

        for next in entries {
            let mut entry = match next {
                Ok(entry) => entry,
                Err(e) => return Err(fail(count, codec_message(&e))),
            };
            count += 1;
            let snapshot = Arc::new(snapshot_entry(&entry));
            listener.on_entry(&snapshot);
            if let Err(e) = content.consume(&snapshot, &mut entry) {
                return Err(fail(count, e.to_string()));
            }
        }

        let mut names: Vec<String> = filters.iter().map(|f| f.name().to_string()).collect();
        names.push(ArchiveFormat::Tar.name().to_string());
        Ok((ArchiveSummary::new(count), names))
    }
}

/// Copies one header out of the codec's transient state into an owned
/// snapshot. Must happen before the iterator advances.
fn snapshot_entry<R: Read>(entry: &tar::Entry<R>) -> ArchiveEntry {
    let header = entry.header();
    let tar_kind = header.entry_type();
    let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();

    let mut snapshot = ArchiveEntry::new(path, EntryKind::from_tar(tar_kind));
    snapshot.permission = header.mode().unwrap_or(0) & 0o7777;
    snapshot.size = entry.size() as i64;
    snapshot.user = header
        .username()
        .ok()
        .flatten()
        .unwrap_or_default()
        .to_string();
    snapshot.group = header
        .groupname()
        .ok()
        .flatten()
        .unwrap_or_default()
        .to_string();
    snapshot.modified = header.mtime().unwrap_or(0) as i64;

    if matches!(tar_kind, tar::EntryType::Symlink | tar::EntryType::Link) {
        if let Ok(Some(link)) = entry.link_name() {
            snapshot.link = link.to_string_lossy().into_owned();
        }
        snapshot.link_kind = if tar_kind == tar::EntryType::Link {
            LinkKind::Hard
        } else {
            LinkKind::Symbolic
        };
    }
    snapshot
}

fn append_dir<W: io::Write>(builder: &mut tar::Builder<W>, entry: &ArchiveEntry) -> io::Result<()> {
    let mut header = tar::Header::new_ustar();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_mode(entry.permission);
    header.set_size(0);
    header.set_mtime(entry.modified.max(0) as u64);
    builder.append_data(&mut header, format!("{}/", entry.path), io::empty())
}

fn append_file<W: io::Write>(
    builder: &mut tar::Builder<W>,
    entry: &ArchiveEntry,
    content: &mut dyn Read,
) -> io::Result<()> {
    let mut header = tar::Header::new_ustar();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(entry.permission);
    header.set_size(entry.size.max(0) as u64);
    header.set_mtime(entry.modified.max(0) as u64);
    builder.append_data(&mut header, &entry.path, content)
}

/// The codec's error string, with a generic fallback when it has none.
fn codec_message(error: &io::Error) -> String {
    let message = error.to_string();
    if message.is_empty() {
        format!("archive error {:?}", error.kind())
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::LocalStore;
    use std::fs;
    use tempfile::tempdir;

    /// Provider over an in-memory entry list, content served from slices.
    pub(crate) struct VecProvider {
        entries: Vec<(ArchiveEntry, Vec<u8>)>,
        next: usize,
    }

    impl VecProvider {
        pub(crate) fn new(entries: Vec<(ArchiveEntry, Vec<u8>)>) -> Self {
            Self { entries, next: 0 }
        }
    }

    impl EntryProvider for VecProvider {
        fn next_entry(&mut self) -> Result<Option<ArchiveEntry>> {
            let Some((entry, _)) = self.entries.get(self.next) else {
                return Ok(None);
            };
            self.next += 1;
            Ok(Some(entry.clone()))
        }

        fn content(&mut self) -> Result<Box<dyn Read + Send + '_>> {
            let (_, data) = &self.entries[self.next - 1];
            Ok(Box::new(io::Cursor::new(data.clone())))
        }
    }

    #[derive(Default)]
    struct CollectingListener {
        entries: Vec<Arc<ArchiveEntry>>,
        done: Vec<(ArchiveSummary, Option<String>)>,
    }

    impl ArchiveListener for CollectingListener {
        fn on_entry(&mut self, entry: &Arc<ArchiveEntry>) {
            self.entries.push(Arc::clone(entry));
        }

        fn on_done(&mut self, summary: &ArchiveSummary, error: Option<&str>) {
            self.done.push((*summary, error.map(str::to_string)));
        }
    }

    fn file_entry(path: &str, data: &[u8], mode: u32) -> (ArchiveEntry, Vec<u8>) {
        let mut entry = ArchiveEntry::new(path, EntryKind::Regular);
        entry.size = data.len() as i64;
        entry.permission = mode;
        entry.modified = 1_700_000_000;
        (entry, data.to_vec())
    }

    fn dir_entry(path: &str) -> (ArchiveEntry, Vec<u8>) {
        let mut entry = ArchiveEntry::new(path, EntryKind::Directory);
        entry.permission = 0o755;
        (entry, Vec::new())
    }

    #[test]
    fn test_write_then_read_reports_entries_and_formats() {
        let temp = tempdir().expect("create tempdir");
        let path = temp.path().join("sample.tar.gz");

        let mut archive = Archive::new(Arc::new(LocalStore), &path);
        archive.prepare_write_from_name().expect("derive write spec");
        let mut provider = VecProvider::new(vec![
            file_entry("a.txt", b"0123456789", 0o644),
            dir_entry("sub"),
            file_entry("sub/b.txt", b"", 0o600),
        ]);
        archive.write(&mut provider).expect("write archive");

        let mut listener = CollectingListener::default();
        let summary = archive.list(&mut listener).expect("read archive");

        assert_eq!(summary.entries, 3);
        assert_eq!(listener.entries.len(), 3);
        assert_eq!(listener.entries[0].path, "a.txt");
        assert_eq!(listener.entries[0].size, 10);
        assert_eq!(listener.entries[0].permission, 0o644);
        assert_eq!(listener.entries[1].path, "sub");
        assert!(listener.entries[1].is_dir());
        assert_eq!(listener.entries[2].path, "sub/b.txt");
        assert_eq!(listener.entries[2].size, 0);
        assert_eq!(listener.done.len(), 1);
        assert!(listener.done[0].1.is_none());
        assert_eq!(archive.read_formats(), ["gzip", "tar"]);
    }

    #[test]
    fn test_bare_tar_reports_format_without_filter() {
        let temp = tempdir().expect("create tempdir");
        let path = temp.path().join("plain.tar");

        let mut archive = Archive::new(Arc::new(LocalStore), &path);
        archive.prepare_write_from_name().expect("derive write spec");
        let mut provider = VecProvider::new(vec![file_entry("only.txt", b"x", 0o644)]);
        archive.write(&mut provider).expect("write archive");

        let mut listener = CollectingListener::default();
        archive.list(&mut listener).expect("read archive");
        assert_eq!(archive.read_formats(), ["tar"]);
    }

    #[test]
    fn test_can_read_accepts_nested_formats() {
        let temp = tempdir().expect("create tempdir");
        for name in ["a.tar", "a.tar.gz", "a.tar.bz2", "a.tar.zst"] {
            let path = temp.path().join(name);
            let mut archive = Archive::new(Arc::new(LocalStore), &path);
            archive.prepare_write_from_name().expect("derive write spec");
            let mut provider = VecProvider::new(vec![file_entry("f", b"data", 0o644)]);
            archive.write(&mut provider).expect("write archive");

            assert!(archive.can_read(), "expected can_read for {}", name);
        }
    }

    #[test]
    fn test_can_read_rejects_garbage_missing_and_empty() {
        let temp = tempdir().expect("create tempdir");

        let garbage = temp.path().join("garbage.tar");
        fs::write(&garbage, b"this is not an archive at all, not even close")
            .expect("write garbage");
        assert!(!Archive::new(Arc::new(LocalStore), &garbage).can_read());

        let missing = temp.path().join("missing.tar");
        assert!(!Archive::new(Arc::new(LocalStore), &missing).can_read());

        // A zero-entry archive sniffs as unreadable: no header ever parses.
        let empty = temp.path().join("empty.tar.gz");
        let mut archive = Archive::new(Arc::new(LocalStore), &empty);
        archive.prepare_write_from_name().expect("derive write spec");
        let mut provider = VecProvider::new(Vec::new());
        archive.write(&mut provider).expect("write empty archive");
        assert!(!archive.can_read());
    }

    #[test]
    fn test_read_failure_still_delivers_done() {
        let temp = tempdir().expect("create tempdir");
        let path = temp.path().join("broken.tar.gz");
        // A gzip header with a truncated deflate stream behind it.
        fs::write(&path, [0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00])
            .expect("write broken file");

        let mut archive = Archive::new(Arc::new(LocalStore), &path);
        let mut listener = CollectingListener::default();
        let result = archive.list(&mut listener);

        assert!(matches!(
            result,
            Err(ArcflowError::ArchiveReadFailed { .. })
        ));
        assert_eq!(listener.done.len(), 1);
        assert!(listener.done[0].1.is_some());
        assert!(archive.read_formats().is_empty());
    }

    #[test]
    fn test_write_without_spec_is_rejected() {
        let temp = tempdir().expect("create tempdir");
        let mut archive = Archive::new(Arc::new(LocalStore), temp.path().join("out.tar"));
        let mut provider = VecProvider::new(Vec::new());
        let result = archive.write(&mut provider);
        assert!(matches!(
            result,
            Err(ArcflowError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_symlink_sources_are_skipped_by_write_crawler() {
        let temp = tempdir().expect("create tempdir");
        let src = temp.path().join("tree");
        fs::create_dir_all(&src).expect("create tree");
        fs::write(src.join("target.txt"), b"content").expect("write target");
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink("target.txt", src.join("alias")).expect("create symlink");

            let path = temp.path().join("links.tar");
            let mut archive = Archive::new(Arc::new(LocalStore), &path);
            archive.prepare_write_from_name().expect("derive write spec");
            let mut provider = crate::system::provider::DirTreeProvider::new(
                &src,
                crate::config::EngineConfig::default(),
            );
            archive.write(&mut provider).expect("write archive");

            let mut listener = CollectingListener::default();
            archive.list(&mut listener).expect("read archive");
            // Symlinks are skipped by the write crawler; only the regular
            // file is archived.
            assert_eq!(listener.entries.len(), 1);
            assert_eq!(listener.entries[0].path, "target.txt");
        }
    }
}
