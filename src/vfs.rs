use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Read side of the virtual byte-stream file abstraction the codec is bound
/// to. `skip` is a forward-only seek by byte count.
pub trait ByteSource: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn skip(&mut self, count: u64) -> io::Result<u64>;
}

/// Write side. `seek_to` positions the stream for block+offset writes during
/// extraction; content blocks are not guaranteed sequential by every format.
pub trait ByteSink: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    fn seek_to(&mut self, offset: u64) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

/// Storage backend the engine operates against. The codec layer never
/// touches `std::fs` directly; everything goes through one of these, so
/// frontends can mount archives over any byte store.
pub trait FileStore: Send + Sync {
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn ByteSource>>;
    /// Replace-if-exists, create-if-absent.
    fn open_write(&self, path: &Path) -> io::Result<Box<dyn ByteSink>>;
    fn exists(&self, path: &Path) -> bool;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;
    /// No-op on targets without POSIX permissions.
    fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// Local-filesystem implementation of [`FileStore`].
pub struct LocalStore;

struct LocalSource(File);

impl ByteSource for LocalSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn skip(&mut self, count: u64) -> io::Result<u64> {
        self.0.seek(SeekFrom::Current(count as i64))?;
        Ok(count)
    }
}

struct LocalSink(File);

impl ByteSink for LocalSink {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf)
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.0.seek(SeekFrom::Start(offset)).map(|_| ())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl FileStore for LocalStore {
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn ByteSource>> {
        Ok(Box::new(LocalSource(File::open(path)?)))
    }

    fn open_write(&self, path: &Path) -> io::Result<Box<dyn ByteSink>> {
        Ok(Box::new(LocalSink(File::create(path)?)))
    }

    fn exists(&self, path: &Path) -> bool {
        // symlink_metadata so dangling links still count as present.
        fs::symlink_metadata(path).is_ok()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    #[cfg(unix)]
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, link)
    }

    #[cfg(not(unix))]
    fn symlink(&self, _target: &Path, _link: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "symbolic links are not supported on this platform",
        ))
    }

    #[cfg(unix)]
    fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    fn set_permissions(&self, _path: &Path, _mode: u32) -> io::Result<()> {
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// Bridges a [`ByteSource`] onto `std::io::Read` so the decoder stack
/// (gzip/bzip2/zstd/tar) can consume it. I/O failures at this boundary ride
/// the decoder stack as `io::Error`, the codec's native error channel, so a
/// single downstream handler suffices.
pub struct SourceReader {
    source: Box<dyn ByteSource>,
}

impl SourceReader {
    pub fn new(source: Box<dyn ByteSource>) -> Self {
        Self { source }
    }
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.source.read(buf)
    }
}

/// Bridges a [`ByteSink`] onto `std::io::Write` for the encoder stack.
pub struct SinkWriter {
    sink: Box<dyn ByteSink>,
}

impl SinkWriter {
    pub fn new(sink: Box<dyn ByteSink>) -> Self {
        Self { sink }
    }
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_local_store_write_then_read() {
        let temp = tempdir().expect("create tempdir");
        let path = temp.path().join("blob.bin");

        let store = LocalStore;
        let mut sink = store.open_write(&path).expect("open write");
        sink.write_all(b"hello arcflow").expect("write");
        sink.flush().expect("flush");
        drop(sink);

        let mut source = store.open_read(&path).expect("open read");
        let mut buf = [0u8; 32];
        let n = source.read(&mut buf).expect("read");
        assert_eq!(&buf[..n], b"hello arcflow");
    }

    #[test]
    fn test_skip_advances_read_position() {
        let temp = tempdir().expect("create tempdir");
        let path = temp.path().join("blob.bin");
        fs::write(&path, b"0123456789").expect("write sample");

        let store = LocalStore;
        let mut source = store.open_read(&path).expect("open read");
        source.skip(4).expect("skip");
        let mut buf = [0u8; 3];
        source.read(&mut buf).expect("read");
        assert_eq!(&buf, b"456");
    }

    #[test]
    fn test_seek_to_supports_out_of_order_blocks() {
        let temp = tempdir().expect("create tempdir");
        let path = temp.path().join("blob.bin");

        let store = LocalStore;
        let mut sink = store.open_write(&path).expect("open write");
        sink.seek_to(4).expect("seek");
        sink.write_all(b"tail").expect("write tail");
        sink.seek_to(0).expect("seek back");
        sink.write_all(b"head").expect("write head");
        sink.flush().expect("flush");
        drop(sink);

        assert_eq!(fs::read(&path).expect("read back"), b"headtail");
    }

    #[test]
    fn test_open_write_replaces_existing_content() {
        let temp = tempdir().expect("create tempdir");
        let path = temp.path().join("blob.bin");
        fs::write(&path, b"something much longer than the replacement").expect("seed");

        let store = LocalStore;
        let mut sink = store.open_write(&path).expect("open write");
        sink.write_all(b"short").expect("write");
        drop(sink);

        assert_eq!(fs::read(&path).expect("read back"), b"short");
    }

    #[test]
    fn test_exists_sees_dangling_symlink() {
        #[cfg(unix)]
        {
            let temp = tempdir().expect("create tempdir");
            let link = temp.path().join("dangling");
            let store = LocalStore;
            store
                .symlink(Path::new("no-such-target"), &link)
                .expect("create symlink");
            assert!(store.exists(&link));
        }
    }
}
