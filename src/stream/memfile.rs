//! Undo snapshots as lists of chunks.
//!
//! A [`MemFile`] holds a serialized document split into chunks. Unchanged
//! chunks are shared with the previous snapshot (`is_identical`), so the
//! logical stream is a concatenation of buffers that do not sit next to each
//! other in memory.

use std::sync::Arc;

/// One chunk of a snapshot.
#[derive(Clone, Debug)]
pub struct MemFileChunk {
    data: Arc<[u8]>,
    /// Chunk is shared with the previous snapshot.
    pub is_identical: bool,
}

impl MemFileChunk {
    pub fn new(data: impl Into<Arc<[u8]>>, is_identical: bool) -> Self {
        Self { data: data.into(), is_identical }
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Chunked in-memory document.
#[derive(Clone, Debug, Default)]
pub struct MemFile {
    chunks: Vec<MemFileChunk>,
    size: u64,
}

impl MemFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a flat buffer into chunks of at most `chunk_size` bytes.
    pub fn from_bytes(bytes: &[u8], chunk_size: usize) -> Self {
        let mut file = Self::new();
        for chunk in bytes.chunks(chunk_size.max(1)) {
            file.push(chunk.to_vec(), false);
        }
        file
    }

    pub fn push(&mut self, data: impl Into<Arc<[u8]>>, is_identical: bool) {
        let chunk = MemFileChunk::new(data, is_identical);
        self.size += chunk.len() as u64;
        self.chunks.push(chunk);
    }

    pub fn chunks(&self) -> &[MemFileChunk] {
        &self.chunks
    }

    /// Total logical size in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Read cursor over a [`MemFile`].
///
/// Tracks the active chunk so sequential reads do not rescan the list. A read
/// at any other offset locates its chunk from the start.
#[derive(Debug)]
pub(crate) struct MemFileReader {
    file: MemFile,
    chunk: usize,
    chunk_start: u64,
    cursor: u64,
}

impl MemFileReader {
    pub(crate) fn new(file: MemFile) -> Self {
        Self { file, chunk: 0, chunk_start: 0, cursor: 0 }
    }

    fn locate(&mut self, pos: u64) {
        self.chunk = 0;
        self.chunk_start = 0;
        while let Some(c) = self.file.chunks.get(self.chunk) {
            if self.chunk_start + c.len() as u64 > pos {
                break;
            }
            self.chunk_start += c.len() as u64;
            self.chunk += 1;
        }
        self.cursor = pos;
    }

    /// Copy bytes starting at logical offset `pos`. Returns the count copied,
    /// short only at the end of the snapshot.
    pub(crate) fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> usize {
        if pos != self.cursor {
            self.locate(pos);
        }

        let mut total = 0;
        while total < buf.len() {
            let Some(c) = self.file.chunks.get(self.chunk) else {
                break;
            };
            let offset = (self.cursor - self.chunk_start) as usize;
            if offset >= c.len() {
                self.chunk_start += c.len() as u64;
                self.chunk += 1;
                continue;
            }
            let n = (c.len() - offset).min(buf.len() - total);
            buf[total..total + n].copy_from_slice(&c.data()[offset..offset + n]);
            total += n;
            self.cursor += n as u64;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemFile {
        let mut f = MemFile::new();
        f.push(b"abc".to_vec(), false);
        f.push(Vec::new(), true);
        f.push(b"defg".to_vec(), true);
        f.push(b"h".to_vec(), false);
        f
    }

    #[test]
    fn test_sequential_reads_span_chunks() {
        let mut r = MemFileReader::new(sample());
        let mut buf = [0u8; 5];
        assert_eq!(r.read_at(0, &mut buf), 5);
        assert_eq!(&buf, b"abcde");
        let mut buf = [0u8; 5];
        assert_eq!(r.read_at(5, &mut buf), 3);
        assert_eq!(&buf[..3], b"fgh");
    }

    #[test]
    fn test_random_seek() {
        let mut r = MemFileReader::new(sample());
        let mut buf = [0u8; 2];
        assert_eq!(r.read_at(6, &mut buf), 2);
        assert_eq!(&buf, b"gh");
        assert_eq!(r.read_at(1, &mut buf), 2);
        assert_eq!(&buf, b"bc");
        assert_eq!(r.read_at(100, &mut buf), 0);
    }

    #[test]
    fn test_from_bytes() {
        let f = MemFile::from_bytes(b"0123456789", 4);
        assert_eq!(f.chunks().len(), 3);
        assert_eq!(f.size(), 10);
    }
}
