use crate::config::EngineConfig;
use crate::models::entry::{ArchiveEntry, EntryKind};
use crate::utils::error::{ArcflowError, Result};
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Pull-side source of a write pass: the codec asks for entries one at a
/// time and, for regular files, for the matching content stream. An entry
/// must not be held across the next `next_entry` call.
pub trait EntryProvider {
    fn next_entry(&mut self) -> Result<Option<ArchiveEntry>>;
    /// Content stream for the most recently returned regular entry.
    fn content(&mut self) -> Result<Box<dyn Read + Send + '_>>;
}

/// File-level inclusion predicate of the write crawl. Directories are
/// traversed regardless; filtering applies to regular files only.
pub trait FileFilter: Send {
    fn accept(&self, path: &Path) -> bool;
}

/// Default filter: every regular file qualifies.
pub struct AcceptAll;

impl FileFilter for AcceptAll {
    fn accept(&self, _path: &Path) -> bool {
        true
    }
}

/// Permission recorded for directory entries surfaced by the crawl.
const DIR_PERMISSION: u32 = 0o755;

/// One frame of the explicit descent stack. The enumeration handle is
/// opened on first use so permission errors surface at crawl time, not at
/// construction.
struct DirWalker {
    dir: PathBuf,
    rel: PathBuf,
    iter: Option<fs::ReadDir>,
}

impl DirWalker {
    fn new(dir: PathBuf, rel: PathBuf) -> Self {
        Self {
            dir,
            rel,
            iter: None,
        }
    }

    fn next_child(&mut self) -> io::Result<Option<fs::DirEntry>> {
        if self.iter.is_none() {
            self.iter = Some(fs::read_dir(&self.dir)?);
        }
        let Some(iter) = self.iter.as_mut() else {
            return Ok(None);
        };
        match iter.next() {
            Some(Ok(child)) => Ok(Some(child)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// Depth-first crawler over a source directory, feeding the write path.
///
/// The stack's back element is always the innermost directory currently
/// being walked; an exhausted walker pops itself. Owned exclusively by the
/// write pass and only ever touched from the background thread.
pub struct DirTreeProvider {
    root: PathBuf,
    stack: Vec<DirWalker>,
    recursive: bool,
    tolerate_walk_errors: bool,
    emit_directories: bool,
    filter: Box<dyn FileFilter>,
    current_source: Option<PathBuf>,
}

impl DirTreeProvider {
    pub fn new(root: &Path, config: EngineConfig) -> Self {
        Self::with_filter(root, config, Box::new(AcceptAll))
    }

    pub fn with_filter(root: &Path, config: EngineConfig, filter: Box<dyn FileFilter>) -> Self {
        Self {
            root: root.to_path_buf(),
            stack: vec![DirWalker::new(root.to_path_buf(), PathBuf::new())],
            recursive: config.recursive,
            tolerate_walk_errors: config.tolerate_walk_errors,
            emit_directories: config.emit_directories,
            filter,
            current_source: None,
        }
    }

    fn walk_failed(&self, path: PathBuf, error: &io::Error) -> ArcflowError {
        ArcflowError::ArchiveWalkFailed {
            path,
            reason: error.to_string(),
        }
    }
}

impl EntryProvider for DirTreeProvider {
    fn next_entry(&mut self) -> Result<Option<ArchiveEntry>> {
        self.current_source = None;
        loop {
            let Some(walker) = self.stack.last_mut() else {
                return Ok(None);
            };

            let child = match walker.next_child() {
                Ok(Some(child)) => child,
                Ok(None) => {
                    self.stack.pop();
                    continue;
                }
                Err(e) => {
                    let dir = walker.dir.clone();
                    self.stack.pop();
                    if self.tolerate_walk_errors {
                        log::warn!("skipping unreadable directory {}: {}", dir.display(), e);
                        continue;
                    }
                    return Err(self.walk_failed(dir, &e));
                }
            };

            let child_path = child.path();
            let meta = match fs::symlink_metadata(&child_path) {
                Ok(meta) => meta,
                Err(e) => {
                    if self.tolerate_walk_errors {
                        log::warn!("skipping unreadable {}: {}", child_path.display(), e);
                        continue;
                    }
                    return Err(self.walk_failed(child_path, &e));
                }
            };
            let rel = walker.rel.join(child.file_name());

            if meta.is_dir() {
                if self.recursive {
                    self.stack
                        .push(DirWalker::new(child_path, rel.clone()));
                }
                if self.emit_directories {
                    let mut entry =
                        ArchiveEntry::new(relative_name(&rel), EntryKind::Directory);
                    entry.permission = DIR_PERMISSION;
                    entry.modified = modified_secs(&meta);
                    return Ok(Some(entry));
                }
                continue;
            }

            if meta.is_file() {
                if !self.filter.accept(&child_path) {
                    continue;
                }
                let mut entry = ArchiveEntry::new(relative_name(&rel), EntryKind::Regular);
                entry.size = meta.len() as i64;
                entry.permission = permission_bits(&meta);
                entry.modified = modified_secs(&meta);
                self.current_source = Some(child_path);
                return Ok(Some(entry));
            }

            // Symlinks and special files are not archived by the crawler.
            log::debug!("not archiving {}: not a regular file", child_path.display());
        }
    }

    fn content(&mut self) -> Result<Box<dyn Read + Send + '_>> {
        let Some(source) = &self.current_source else {
            return Err(ArcflowError::ArchiveWalkFailed {
                path: self.root.clone(),
                reason: "no pending file entry".to_string(),
            });
        };
        let file = fs::File::open(source)?;
        Ok(Box::new(file))
    }
}

/// Slash-joined relative member name; strips any non-normal components.
fn relative_name(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(v) => Some(v.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(_meta: &fs::Metadata) -> u32 {
    0o644
}

fn modified_secs(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn collect(provider: &mut DirTreeProvider) -> BTreeMap<String, EntryKind> {
        let mut out = BTreeMap::new();
        while let Some(entry) = provider.next_entry().expect("next entry") {
            out.insert(entry.path.clone(), entry.kind);
        }
        out
    }

    fn sample_tree(base: &Path) {
        fs::create_dir_all(base.join("sub/inner")).expect("create dirs");
        fs::write(base.join("a.txt"), b"0123456789").expect("write a.txt");
        fs::write(base.join("sub/b.txt"), b"").expect("write b.txt");
        fs::write(base.join("sub/inner/c.log"), b"log").expect("write c.log");
    }

    #[test]
    fn test_recursive_walk_yields_files_and_directories() {
        let temp = tempdir().expect("create tempdir");
        sample_tree(temp.path());

        let mut provider = DirTreeProvider::new(temp.path(), EngineConfig::default());
        let entries = collect(&mut provider);

        assert_eq!(entries.get("a.txt"), Some(&EntryKind::Regular));
        assert_eq!(entries.get("sub"), Some(&EntryKind::Directory));
        assert_eq!(entries.get("sub/b.txt"), Some(&EntryKind::Regular));
        assert_eq!(entries.get("sub/inner"), Some(&EntryKind::Directory));
        assert_eq!(entries.get("sub/inner/c.log"), Some(&EntryKind::Regular));
        assert_eq!(entries.len(), 5);
    }

    #[test]
    fn test_non_recursive_walk_stays_at_top_level() {
        let temp = tempdir().expect("create tempdir");
        sample_tree(temp.path());

        let mut config = EngineConfig::default();
        config.recursive = false;
        let mut provider = DirTreeProvider::new(temp.path(), config);
        let entries = collect(&mut provider);

        assert_eq!(entries.get("a.txt"), Some(&EntryKind::Regular));
        assert_eq!(entries.get("sub"), Some(&EntryKind::Directory));
        assert_eq!(entries.len(), 2);
    }

    struct TxtOnly;

    impl FileFilter for TxtOnly {
        fn accept(&self, path: &Path) -> bool {
            path.extension().is_some_and(|ext| ext == "txt")
        }
    }

    #[test]
    fn test_filter_applies_to_files_but_directories_are_still_emitted() {
        let temp = tempdir().expect("create tempdir");
        sample_tree(temp.path());

        let mut provider = DirTreeProvider::with_filter(
            temp.path(),
            EngineConfig::default(),
            Box::new(TxtOnly),
        );
        let entries = collect(&mut provider);

        assert!(entries.contains_key("a.txt"));
        assert!(entries.contains_key("sub/b.txt"));
        assert!(!entries.contains_key("sub/inner/c.log"));
        // The directory left empty by filtering is still surfaced.
        assert_eq!(entries.get("sub/inner"), Some(&EntryKind::Directory));
    }

    #[test]
    fn test_content_streams_the_last_returned_file() {
        let temp = tempdir().expect("create tempdir");
        fs::write(temp.path().join("only.bin"), b"payload").expect("write file");

        let mut provider = DirTreeProvider::new(temp.path(), EngineConfig::default());
        let entry = provider
            .next_entry()
            .expect("next entry")
            .expect("one entry");
        assert_eq!(entry.path, "only.bin");
        assert_eq!(entry.size, 7);

        let mut data = Vec::new();
        provider
            .content()
            .expect("open content")
            .read_to_end(&mut data)
            .expect("read content");
        assert_eq!(data, b"payload");
    }

    #[test]
    fn test_content_without_pending_entry_is_an_error() {
        let temp = tempdir().expect("create tempdir");
        let mut provider = DirTreeProvider::new(temp.path(), EngineConfig::default());
        assert!(provider.next_entry().expect("walk empty dir").is_none());
        assert!(provider.content().is_err());
    }

    #[test]
    fn test_missing_root_fails_at_crawl_time() {
        let temp = tempdir().expect("create tempdir");
        let mut provider =
            DirTreeProvider::new(&temp.path().join("absent"), EngineConfig::default());
        let result = provider.next_entry();
        assert!(matches!(
            result,
            Err(ArcflowError::ArchiveWalkFailed { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_tolerate_policy_logs_and_skips_unreadable_directories() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().expect("create tempdir");
        sample_tree(temp.path());
        let locked = temp.path().join("locked");
        fs::create_dir(&locked).expect("create locked dir");
        fs::write(locked.join("hidden.txt"), b"x").expect("write hidden file");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))
            .expect("lock directory");
        if fs::read_dir(&locked).is_ok() {
            // Privileged user; the directory is not actually unreadable.
            return;
        }

        let mut config = EngineConfig::default();
        config.tolerate_walk_errors = true;
        let mut provider = DirTreeProvider::new(temp.path(), config);
        let entries = collect(&mut provider);

        // The locked directory itself is surfaced; its children are not.
        assert!(entries.contains_key("locked"));
        assert!(!entries.contains_key("locked/hidden.txt"));
        assert!(entries.contains_key("a.txt"));

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))
            .expect("unlock directory");
    }

    #[cfg(unix)]
    #[test]
    fn test_strict_policy_aborts_on_unreadable_directory() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().expect("create tempdir");
        let locked = temp.path().join("locked");
        fs::create_dir(&locked).expect("create locked dir");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000))
            .expect("lock directory");
        if fs::read_dir(&locked).is_ok() {
            // Privileged user; the directory is not actually unreadable.
            return;
        }

        let mut provider = DirTreeProvider::new(temp.path(), EngineConfig::default());
        let mut failed = false;
        loop {
            match provider.next_entry() {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(ArcflowError::ArchiveWalkFailed { path, .. }) => {
                    assert_eq!(path, locked);
                    failed = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(failed);

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755))
            .expect("unlock directory");
    }
}
