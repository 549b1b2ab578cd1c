//! Byte-stream providers.
//!
//! [`ByteStream`] gives the block reader one read interface over every
//! place a document can come from: a plain file (buffered or memory-mapped),
//! a gzip file, an in-memory buffer (plain or gzip) and an undo
//! [`MemFile`]. Decoder state lives inside the stream and is released when
//! it is dropped.

mod compression;
mod memfile;

pub use compression::is_gzip;
pub use memfile::{MemFile, MemFileChunk};

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
#[cfg(feature = "mmap")]
use memmap2::Mmap;

use crate::util::{Error, Result};
use memfile::MemFileReader;

/// Kind of source behind a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    File,
    Mmap,
    GzipFile,
    Memory,
    GzipMemory,
    MemFile,
}

impl StreamKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Mmap => "mmap",
            Self::GzipFile => "gzip file",
            Self::Memory => "memory",
            Self::GzipMemory => "gzip memory",
            Self::MemFile => "memfile",
        }
    }
}

enum StreamInner {
    /// Buffered file access
    File(BufReader<File>),
    /// Memory-mapped file
    #[cfg(feature = "mmap")]
    Mmap(Mmap),
    /// Gzip-compressed file
    GzipFile(Box<GzDecoder<BufReader<File>>>),
    /// Plain in-memory buffer
    Memory(Arc<[u8]>),
    /// Gzip-compressed in-memory buffer
    GzipMemory(Box<GzDecoder<Cursor<Arc<[u8]>>>>),
    /// Undo snapshot chunks
    MemFile(MemFileReader),
}

/// Sequential reader over a document source.
pub struct ByteStream {
    inner: StreamInner,
    pos: u64,
    eof: bool,
}

impl ByteStream {
    /// Open a file, memory-mapping it when the `mmap` feature is enabled.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_opts(path, true)
    }

    /// Open a file with optional memory mapping. Gzip files are always
    /// decoded through a stream.
    pub fn open_opts(path: impl AsRef<Path>, use_mmap: bool) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::FileNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;
        if !metadata.is_file() {
            return Err(Error::NotAFile(path.to_path_buf()));
        }

        let mut file = File::open(path)?;
        let mut magic = [0u8; 2];
        let n = read_up_to(&mut file, &mut magic)?;
        file.seek(SeekFrom::Start(0))?;

        if n == 2 && is_gzip(&magic) {
            tracing::debug!("{}: gzip stream", path.display());
            let dec = compression::decoder(BufReader::new(file));
            return Ok(Self::with(StreamInner::GzipFile(Box::new(dec))));
        }

        #[cfg(feature = "mmap")]
        if use_mmap && metadata.len() > 0 {
            // Safety: file is opened read-only and the map is never written.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MmapFailed(e.to_string()))?;
            return Ok(Self::with(StreamInner::Mmap(mmap)));
        }
        #[cfg(not(feature = "mmap"))]
        let _ = use_mmap;

        Ok(Self::with(StreamInner::File(BufReader::new(file))))
    }

    /// Read from an in-memory buffer, plain or gzip.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes: Arc<[u8]> = bytes.into();
        if is_gzip(&bytes) {
            let dec = compression::decoder(Cursor::new(bytes));
            Self::with(StreamInner::GzipMemory(Box::new(dec)))
        } else {
            Self::with(StreamInner::Memory(bytes))
        }
    }

    /// Read from an undo snapshot.
    pub fn from_memfile(memfile: MemFile) -> Self {
        Self::with(StreamInner::MemFile(MemFileReader::new(memfile)))
    }

    fn with(inner: StreamInner) -> Self {
        Self { inner, pos: 0, eof: false }
    }

    pub fn kind(&self) -> StreamKind {
        match &self.inner {
            StreamInner::File(_) => StreamKind::File,
            #[cfg(feature = "mmap")]
            StreamInner::Mmap(_) => StreamKind::Mmap,
            StreamInner::GzipFile(_) => StreamKind::GzipFile,
            StreamInner::Memory(_) => StreamKind::Memory,
            StreamInner::GzipMemory(_) => StreamKind::GzipMemory,
            StreamInner::MemFile(_) => StreamKind::MemFile,
        }
    }

    /// Logical read position.
    #[inline]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Set once a read came back short.
    #[inline]
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Fill `buf` as far as the source allows. A count below `buf.len()`
    /// means end of stream, not an error.
    pub fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.read_some(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        if total < buf.len() {
            self.eof = true;
        }
        Ok(total)
    }

    /// Read at most `len` bytes into a new buffer, growing it as data arrives.
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len.min(1 << 20));
        let mut chunk = [0u8; 8192];
        while out.len() < len {
            let want = (len - out.len()).min(chunk.len());
            let n = self.read_full(&mut chunk[..want])?;
            out.extend_from_slice(&chunk[..n]);
            if n < want {
                break;
            }
        }
        Ok(out)
    }

    /// Move to an absolute position. Compressed streams only move forward.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if matches!(self.inner, StreamInner::GzipFile(_) | StreamInner::GzipMemory(_)) {
            if pos < self.pos {
                return Err(Error::other("compressed stream cannot seek backwards"));
            }
            let skip = pos - self.pos;
            let got = self.read_vec(skip as usize)?.len() as u64;
            if got < skip {
                return Err(Error::UnexpectedEof(self.pos));
            }
            return Ok(());
        }
        if let StreamInner::File(f) = &mut self.inner {
            f.seek(SeekFrom::Start(pos))?;
        }
        self.pos = pos;
        self.eof = false;
        Ok(())
    }

    fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match &mut self.inner {
            StreamInner::File(f) => f.read(buf)?,
            #[cfg(feature = "mmap")]
            StreamInner::Mmap(m) => copy_from(m, self.pos, buf),
            StreamInner::GzipFile(d) => d.read(buf).map_err(compression::map_error)?,
            StreamInner::Memory(m) => copy_from(m, self.pos, buf),
            StreamInner::GzipMemory(d) => d.read(buf).map_err(compression::map_error)?,
            StreamInner::MemFile(r) => r.read_at(self.pos, buf),
        };
        self.pos += n as u64;
        Ok(n)
    }
}

impl Read for ByteStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_some(buf).map_err(|e| match e {
            Error::Io(io) => io,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        })
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("kind", &self.kind())
            .field("pos", &self.pos)
            .field("eof", &self.eof)
            .finish()
    }
}

fn copy_from(src: &[u8], pos: u64, buf: &mut [u8]) -> usize {
    let start = (pos as usize).min(src.len());
    let n = buf.len().min(src.len() - start);
    buf[..n].copy_from_slice(&src[start..start + n]);
    n
}

fn read_up_to(r: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match r.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_memory_short_read_is_eof() {
        let mut s = ByteStream::from_bytes(b"hello".to_vec());
        assert_eq!(s.kind(), StreamKind::Memory);
        let mut buf = [0u8; 3];
        assert_eq!(s.read_full(&mut buf).unwrap(), 3);
        assert!(!s.is_eof());
        assert_eq!(s.read_full(&mut buf).unwrap(), 2);
        assert!(s.is_eof());
        assert_eq!(s.position(), 5);
    }

    #[test]
    fn test_gzip_memory() {
        let mut s = ByteStream::from_bytes(gzip(b"BLENDER-v279"));
        assert_eq!(s.kind(), StreamKind::GzipMemory);
        let v = s.read_vec(64).unwrap();
        assert_eq!(v, b"BLENDER-v279");
    }

    #[test]
    fn test_memfile_seek() {
        let mut s = ByteStream::from_memfile(MemFile::from_bytes(b"0123456789", 3));
        s.seek(7).unwrap();
        assert_eq!(s.read_vec(10).unwrap(), b"789");
        s.seek(2).unwrap();
        assert_eq!(s.read_vec(3).unwrap(), b"234");
    }

    #[test]
    fn test_open_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.blend");
        assert!(matches!(ByteStream::open(&missing), Err(Error::FileNotFound(_))));
        assert!(matches!(ByteStream::open(dir.path()), Err(Error::NotAFile(_))));
    }

    #[test]
    fn test_open_file_modes() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("a.blend");
        std::fs::write(&plain, b"BLENDER-v279").unwrap();
        let packed = dir.path().join("b.blend");
        std::fs::write(&packed, gzip(b"BLENDER-v279")).unwrap();

        let mut s = ByteStream::open_opts(&plain, false).unwrap();
        assert_eq!(s.kind(), StreamKind::File);
        assert_eq!(s.read_vec(12).unwrap(), b"BLENDER-v279");

        let mut s = ByteStream::open(&packed).unwrap();
        assert_eq!(s.kind(), StreamKind::GzipFile);
        assert_eq!(s.read_vec(12).unwrap(), b"BLENDER-v279");
    }
}
