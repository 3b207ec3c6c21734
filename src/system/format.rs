use crate::vfs::SinkWriter;
use std::ffi::OsStr;
use std::io::{self, Read, Write};
use std::path::Path;

/// Base container format. Filters stack on top of it, which is why format
/// identification must sniff content rather than trust extensions: a
/// `.tar.gz` is a gzip-filtered tar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
}

impl ArchiveFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar",
        }
    }
}

/// Stream compression filter applied around the base format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFilter {
    Gzip,
    Bzip2,
    Zstd,
}

impl CompressionFilter {
    pub fn name(&self) -> &'static str {
        match self {
            CompressionFilter::Gzip => "gzip",
            CompressionFilter::Bzip2 => "bzip2",
            CompressionFilter::Zstd => "zstd",
        }
    }

    fn matches_magic(magic: &[u8]) -> Option<CompressionFilter> {
        if magic.starts_with(&[0x1f, 0x8b]) {
            Some(CompressionFilter::Gzip)
        } else if magic.len() >= 4
            && magic.starts_with(b"BZh")
            && magic[3].is_ascii_digit()
        {
            Some(CompressionFilter::Bzip2)
        } else if magic.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Some(CompressionFilter::Zstd)
        } else {
            None
        }
    }
}

/// Picks format and filter chain for a new archive from its file name,
/// mirroring how frontends name their outputs. Read-side identification
/// never uses this.
pub fn detect_write_spec(path: &Path) -> Option<(ArchiveFormat, Vec<CompressionFilter>)> {
    let name = path.file_name()?.to_string_lossy().to_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        return Some((ArchiveFormat::Tar, vec![CompressionFilter::Gzip]));
    }
    if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
        return Some((ArchiveFormat::Tar, vec![CompressionFilter::Bzip2]));
    }
    if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
        return Some((ArchiveFormat::Tar, vec![CompressionFilter::Zstd]));
    }
    match path.extension().and_then(OsStr::to_str)?.to_lowercase().as_str() {
        "tar" => Some((ArchiveFormat::Tar, Vec::new())),
        _ => None,
    }
}

const MAGIC_LEN: usize = 4;
// Depth guard against pathological filter-on-filter nesting.
const MAX_FILTER_DEPTH: usize = 4;

/// Reads up to `MAGIC_LEN` bytes ahead, handing back the peeked prefix and a
/// reader that still yields the full stream.
fn peek_magic(
    mut reader: Box<dyn Read + Send>,
) -> io::Result<(Vec<u8>, Box<dyn Read + Send>)> {
    let mut magic = vec![0u8; MAGIC_LEN];
    let mut filled = 0;
    while filled < MAGIC_LEN {
        let n = reader.read(&mut magic[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    magic.truncate(filled);
    let restored: Box<dyn Read + Send> =
        Box::new(io::Cursor::new(magic.clone()).chain(reader));
    Ok((magic, restored))
}

/// Peels compression filters off a raw byte stream by magic sniffing,
/// outermost first, and returns the filters in application order together
/// with the fully decoded stream. A bare tar produces an empty filter list.
pub(crate) fn open_decoded(
    source: Box<dyn Read + Send>,
) -> io::Result<(Vec<CompressionFilter>, Box<dyn Read + Send>)> {
    let mut peeled: Vec<CompressionFilter> = Vec::new();
    let mut stream = source;
    while peeled.len() < MAX_FILTER_DEPTH {
        let (magic, restored) = peek_magic(stream)?;
        let Some(filter) = CompressionFilter::matches_magic(&magic) else {
            stream = restored;
            break;
        };
        log::debug!("detected {} filter layer", filter.name());
        peeled.push(filter);
        stream = match filter {
            CompressionFilter::Gzip => Box::new(flate2::read::GzDecoder::new(restored)),
            CompressionFilter::Bzip2 => Box::new(bzip2::read::BzDecoder::new(restored)),
            CompressionFilter::Zstd => Box::new(zstd::stream::read::Decoder::new(restored)?),
        };
    }
    // Filters were peeled outermost-in; application order is the reverse.
    peeled.reverse();
    Ok((peeled, stream))
}

/// Write-side encoder stack member. `finish` flushes this layer and
/// everything beneath it; every layer must be finished or the trailing
/// codec frames never hit the sink.
pub(crate) trait CodecWrite: Write + Send {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

impl CodecWrite for SinkWriter {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.flush()
    }
}

impl CodecWrite for flate2::write::GzEncoder<Box<dyn CodecWrite>> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        (*self).finish()?.finish()
    }
}

impl CodecWrite for bzip2::write::BzEncoder<Box<dyn CodecWrite>> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        (*self).finish()?.finish()
    }
}

impl CodecWrite for zstd::stream::write::Encoder<'static, Box<dyn CodecWrite>> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        (*self).finish()?.finish()
    }
}

/// Stacks the requested filters over the sink, innermost-last, so the base
/// format writes into `filters[0]` and `filters[N-1]` writes into the sink.
/// Filter order therefore matters to callers, matching the codec's
/// requirement that filters are configured before the base format.
pub(crate) fn open_encoded(
    sink: SinkWriter,
    filters: &[CompressionFilter],
) -> io::Result<Box<dyn CodecWrite>> {
    let mut writer: Box<dyn CodecWrite> = Box::new(sink);
    for filter in filters.iter().rev() {
        writer = match filter {
            CompressionFilter::Gzip => Box::new(flate2::write::GzEncoder::new(
                writer,
                flate2::Compression::default(),
            )),
            CompressionFilter::Bzip2 => Box::new(bzip2::write::BzEncoder::new(
                writer,
                bzip2::Compression::default(),
            )),
            CompressionFilter::Zstd => {
                Box::new(zstd::stream::write::Encoder::new(writer, 3)?)
            }
        };
    }
    Ok(writer)
}
