//! Block iteration and per-document block storage.
//!
//! A document body is a run of blocks:
//!
//! ```text
//! [code: 4][len: i32][old address: 4 | 8][sdna index: i32][count: i32] body[len]
//! ```
//!
//! [`BlockReader`] walks them straight off a [`ByteStream`]. [`FileData`]
//! reads a whole document once, keeps every body and indexes the blocks by
//! old address and by record name, since linking revisits bodies in an
//! order unrelated to their stream position.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::format::{self, code_str, normalize_code, BlockCode, Endian, FileHeader, IdCode};
use crate::graph::FileVersion;
use crate::sdna::{self, c_string, CompareFlag, Schema, StructValue};
use crate::stream::{ByteStream, StreamKind};
use crate::util::{Error, Result};

/// Decoded block header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub code: BlockCode,
    /// Body length in bytes.
    pub len: usize,
    /// Address the block had when written.
    pub old: u64,
    pub sdna_index: usize,
    /// Number of consecutive structs in the body.
    pub count: usize,
}

impl BlockHeader {
    /// Record type of an `XX\0\0` block.
    #[inline]
    pub fn id_code(&self) -> Option<IdCode> {
        IdCode::from_block_code(&self.code)
    }

    #[inline]
    pub fn is(&self, code: BlockCode) -> bool {
        self.code == code
    }
}

/// One block with its body.
#[derive(Clone, Debug)]
pub struct Block {
    pub header: BlockHeader,
    pub body: Vec<u8>,
}

/// Sequential block reader.
pub struct BlockReader {
    stream: ByteStream,
    header: FileHeader,
    done: bool,
}

impl BlockReader {
    /// Read and validate the file header.
    pub fn open(mut stream: ByteStream) -> Result<Self> {
        let mut buf = [0u8; format::HEADER_SIZE];
        let n = stream.read_full(&mut buf)?;
        if n < format::HEADER_SIZE {
            return Err(Error::BadMagic);
        }
        let header = FileHeader::parse(&buf)?;
        tracing::debug!(
            "header: {}-byte pointers, {:?}, version {}, {}",
            header.pointer_size,
            header.endian,
            header.version,
            stream.kind().name()
        );
        Ok(Self { stream, header, done: false })
    }

    #[inline]
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn stream_kind(&self) -> StreamKind {
        self.stream.kind()
    }

    /// Next block, `None` after the terminator or at end of stream.
    ///
    /// A truncated `ENDB` header still terminates cleanly.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        if self.done {
            return Ok(None);
        }
        let size = self.header.block_header_size();
        let mut buf = [0u8; 24];
        let at = self.stream.position();
        let n = self.stream.read_full(&mut buf[..size])?;

        if n < size {
            self.done = true;
            if n >= 4 && buf[..4] == format::ENDB {
                return Ok(Some(Block { header: endb(), body: Vec::new() }));
            }
            if n == 0 {
                return Ok(None);
            }
            return Err(Error::corrupt(format!("truncated block header at byte {}", at)));
        }

        let header = match self.header.endian {
            Endian::Little => parse_header::<LittleEndian>(&buf[..size], self.header.pointer_size),
            Endian::Big => parse_header::<BigEndian>(&buf[..size], self.header.pointer_size),
        };
        let (mut code, len, old, sdna, count) = header;
        if self.header.needs_swap() {
            code = normalize_code(code);
        }
        if code == format::ENDB {
            self.done = true;
            return Ok(Some(Block { header: endb(), body: Vec::new() }));
        }

        let (Ok(len), Ok(sdna_index), Ok(count)) =
            (usize::try_from(len), usize::try_from(sdna), usize::try_from(count))
        else {
            self.done = true;
            return Err(Error::corrupt(format!(
                "block '{}' at byte {} has negative length ({}) or index",
                code_str(&code),
                at,
                len
            )));
        };

        let body = self.stream.read_vec(len)?;
        if body.len() < len {
            self.done = true;
            return Err(Error::corrupt(format!(
                "block '{}' at byte {} is short: {} of {} bytes",
                code_str(&code),
                at,
                body.len(),
                len
            )));
        }

        Ok(Some(Block {
            header: BlockHeader { code, len, old, sdna_index, count },
            body,
        }))
    }
}

fn endb() -> BlockHeader {
    BlockHeader { code: format::ENDB, len: 0, old: 0, sdna_index: 0, count: 0 }
}

fn parse_header<B: ByteOrder>(buf: &[u8], pointer_size: usize) -> (BlockCode, i32, u64, i32, i32) {
    let code = [buf[0], buf[1], buf[2], buf[3]];
    let len = B::read_i32(&buf[4..8]);
    let (old, rest) = if pointer_size == 8 {
        (B::read_u64(&buf[8..16]), 16)
    } else {
        (B::read_u32(&buf[8..12]) as u64, 12)
    };
    let sdna = B::read_i32(&buf[rest..rest + 4]);
    let count = B::read_i32(&buf[rest + 4..rest + 8]);
    (code, len, old, sdna, count)
}

/// A fully read document: header, blocks, schema and lookup indices.
pub struct FileData {
    header: FileHeader,
    kind: StreamKind,
    relabase: PathBuf,
    blocks: Vec<Block>,
    schema: Schema,
    current: Arc<Schema>,
    flags: Vec<CompareFlag>,
    /// (old address, block index), sorted by address.
    by_old: Vec<(u64, usize)>,
    by_name: HashMap<(IdCode, String), usize>,
    /// Byte range of `ID.name` within a record body.
    id_name: Option<(usize, usize)>,
    corruption: Option<String>,
}

impl FileData {
    /// Read every block of a document.
    ///
    /// Bad magic and a missing or unreadable schema are fatal. A corrupt
    /// block ends the stream early; the blocks before it are kept and the
    /// problem is available from [`take_corruption`](Self::take_corruption).
    pub fn open(stream: ByteStream, relabase: impl Into<PathBuf>, current: Arc<Schema>) -> Result<Self> {
        let mut reader = BlockReader::open(stream)?;
        let header = *reader.header();
        let kind = reader.stream_kind();

        let mut blocks = Vec::new();
        let mut corruption = None;
        loop {
            match reader.next_block() {
                Ok(Some(b)) if b.header.is(format::ENDB) => break,
                Ok(Some(b)) => blocks.push(b),
                Ok(None) => break,
                Err(e) => {
                    corruption = Some(e.to_string());
                    break;
                }
            }
        }

        let dna = blocks
            .iter()
            .find(|b| b.header.is(format::DNA1))
            .ok_or(Error::MissingSchemaBlock)?;
        let schema = Schema::parse(&dna.body, header.endian, header.pointer_size)?;
        let flags = sdna::compare(&schema, &current);

        let id_name = schema
            .struct_index("ID")
            .and_then(|si| schema.find_field(si, "name"))
            .map(|f| (f.offset, f.size()));

        let mut by_old: Vec<(u64, usize)> = blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.header.old != 0)
            .map(|(i, b)| (b.header.old, i))
            .collect();
        // Stable sort keeps the first block for a duplicated address.
        by_old.sort_by_key(|(old, _)| *old);
        by_old.dedup_by_key(|(old, _)| *old);

        let mut data = Self {
            header,
            kind,
            relabase: relabase.into(),
            blocks,
            schema,
            current,
            flags,
            by_old,
            by_name: HashMap::new(),
            id_name,
            corruption,
        };
        data.index_names();

        tracing::debug!(
            "read {} blocks, {} file structs ({} stream)",
            data.blocks.len(),
            data.schema.struct_count(),
            kind.name()
        );
        Ok(data)
    }

    /// Open a document on disk. `relabase` is the file itself.
    pub fn open_path(path: &Path, use_mmap: bool, current: Arc<Schema>) -> Result<Self> {
        let stream = ByteStream::open_opts(path, use_mmap)?;
        Self::open(stream, path, current)
    }

    fn index_names(&mut self) {
        for (i, b) in self.blocks.iter().enumerate() {
            let Some(code) = b.header.id_code() else { continue };
            if let Some(name) = self.block_id_name(i) {
                let key = (code, name.get(2..).unwrap_or("").to_string());
                self.by_name.entry(key).or_insert(i);
            }
        }
    }

    #[inline]
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn stream_kind(&self) -> StreamKind {
        self.kind
    }

    /// Path relative library paths in this document are resolved against.
    pub fn relabase(&self) -> &Path {
        &self.relabase
    }

    /// Parsed `DNA1` schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn current(&self) -> &Arc<Schema> {
        &self.current
    }

    pub fn flags(&self) -> &[CompareFlag] {
        &self.flags
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    #[inline]
    pub fn block(&self, index: usize) -> &Block {
        &self.blocks[index]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Message describing where the stream broke, once.
    pub fn take_corruption(&mut self) -> Option<String> {
        self.corruption.take()
    }

    /// Block written at `old`.
    pub fn find_block(&self, old: u64) -> Option<usize> {
        if old == 0 {
            return None;
        }
        self.by_old
            .binary_search_by_key(&old, |(o, _)| *o)
            .ok()
            .map(|i| self.by_old[i].1)
    }

    /// Record block of type `code` named `name` (no code prefix).
    pub fn find_block_by_name(&self, code: IdCode, name: &str) -> Option<usize> {
        self.by_name.get(&(code, name.to_string())).copied()
    }

    /// Stored record name including the two-character prefix.
    pub fn block_id_name(&self, index: usize) -> Option<String> {
        let (offset, len) = self.id_name?;
        let body = &self.blocks.get(index)?.body;
        let end = (offset + len).min(body.len());
        if offset >= end {
            return None;
        }
        Some(c_string(&body[offset..end]))
    }

    /// Closest `LI` block before `index`.
    pub fn find_previous_lib(&self, index: usize) -> Option<usize> {
        (0..index.min(self.blocks.len()))
            .rev()
            .find(|&i| self.blocks[i].header.id_code() == Some(IdCode::LI))
    }

    /// Indices of the `DATA` blocks directly following `index`.
    pub fn data_blocks_after(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        ((index + 1)..self.blocks.len()).take_while(move |&i| self.blocks[i].header.is(format::DATA))
    }

    /// Whether a block body is untyped bytes rather than structs.
    #[inline]
    pub fn is_raw(&self, index: usize) -> bool {
        self.blocks[index].header.sdna_index == 0
    }

    /// Name of the file struct a block was written as.
    pub fn struct_name(&self, index: usize) -> Option<&str> {
        let si = self.blocks.get(index)?.header.sdna_index;
        (si < self.schema.struct_count()).then(|| self.schema.struct_name(si))
    }

    /// Decode a block into current-layout structs.
    ///
    /// `None` when the struct was removed from the current layout or the
    /// index is out of range.
    pub fn read_struct(&self, index: usize) -> Option<(usize, Vec<StructValue>)> {
        let block = self.blocks.get(index)?;
        let si = block.header.sdna_index;
        if si >= self.schema.struct_count() {
            return None;
        }
        let count = block.header.count;
        let (ci, bytes) = if self.header.needs_swap() {
            let mut body = block.body.clone();
            sdna::switch_endian(&self.schema, si, count, &mut body);
            sdna::reconstruct(&self.current, &self.schema, &self.flags, si, count, &body)?
        } else {
            sdna::reconstruct(&self.current, &self.schema, &self.flags, si, count, &block.body)?
        };
        let size = self.current.struct_size(ci);
        let n = if size == 0 { 0 } else { bytes.len() / size };
        Some((ci, sdna::decode_many(&self.current, ci, n, &bytes)))
    }

    /// Version as (header digits, `GLOB` subversion).
    pub fn read_file_version(&self) -> FileVersion {
        let sub = self
            .blocks
            .iter()
            .position(|b| b.header.is(format::GLOB))
            .and_then(|i| self.read_struct(i))
            .and_then(|(_, v)| v.into_iter().next())
            .and_then(|g| g.int("subversion"))
            .unwrap_or(0);
        FileVersion::new(self.header.version, sub.clamp(0, u16::MAX as i64) as u16)
    }
}

impl std::fmt::Debug for FileData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileData")
            .field("relabase", &self.relabase)
            .field("version", &self.header.version)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{DocWriter, Layout};

    fn reader(bytes: Vec<u8>) -> BlockReader {
        BlockReader::open(ByteStream::from_bytes(bytes)).unwrap()
    }

    #[test]
    fn test_bad_magic() {
        let r = BlockReader::open(ByteStream::from_bytes(b"NOTBLEND-v279".to_vec()));
        assert!(matches!(r, Err(Error::BadMagic)));
        let r = BlockReader::open(ByteStream::from_bytes(b"BLEN".to_vec()));
        assert!(matches!(r, Err(Error::BadMagic)));
    }

    #[test]
    fn test_iterate_both_layouts() {
        for layout in [Layout::new(8, Endian::Little), Layout::new(4, Endian::Big)] {
            let mut w = DocWriter::current(layout);
            w.raw_block(*b"REND", 0, 0, 1, &[1, 2, 3, 4]);
            w.raw_block(format::DATA, 0x1234, 0, 1, &[9; 10]);
            let mut r = reader(w.finish());
            assert_eq!(r.header().pointer_size, layout.pointer_size);

            let b = r.next_block().unwrap().unwrap();
            assert_eq!(b.header.code, *b"REND");
            assert_eq!(b.body, vec![1, 2, 3, 4]);
            let b = r.next_block().unwrap().unwrap();
            assert_eq!(b.header.old, 0x1234);
            assert_eq!(b.header.len, 10);
            let b = r.next_block().unwrap().unwrap();
            assert!(b.header.is(format::DNA1));
            let b = r.next_block().unwrap().unwrap();
            assert!(b.header.is(format::ENDB));
            assert!(r.next_block().unwrap().is_none());
        }
    }

    #[test]
    fn test_negative_length() {
        let mut w = DocWriter::current(Layout::native());
        w.raw_header(*b"DATA", -5, 0x10, 0, 1);
        let mut r = reader(w.finish_without_schema());
        assert!(matches!(r.next_block(), Err(Error::CorruptStream(_))));
        assert!(r.next_block().unwrap().is_none());
    }

    #[test]
    fn test_partial_endb() {
        let mut bytes = DocWriter::current(Layout::native()).finish_without_schema();
        // Replace the full terminator with just its code.
        let full = Layout::native().block_header_size();
        bytes.truncate(bytes.len() - full + 4);
        let mut r = reader(bytes);
        assert!(r.next_block().unwrap().unwrap().header.is(format::ENDB));
    }

    #[test]
    fn test_swapped_code_normalized() {
        let layout = Layout::new(8, Endian::Big);
        let mut w = DocWriter::current(layout);
        w.raw_block(*b"\0\0SC", 0x40, 0, 1, &[]);
        let mut r = reader(w.finish());
        let b = r.next_block().unwrap().unwrap();
        if Endian::native() == Endian::Big {
            assert_eq!(b.header.code, *b"\0\0SC");
        } else {
            assert_eq!(b.header.code, *b"SC\0\0");
        }
    }

    #[test]
    fn test_file_data_indices() {
        let mut w = DocWriter::current(Layout::native());
        w.glob(7);
        let li = w.library(0x100, "lib", "//lib.blend");
        let cam = w.camera(0x200, "Cam", 35.0);
        let data = FileData::open(ByteStream::from_bytes(w.finish()), "/tmp/main.blend", Schema::current().unwrap()).unwrap();

        let li_index = data.find_block(li).unwrap();
        let cam_index = data.find_block(cam).unwrap();
        assert_eq!(data.find_block_by_name(IdCode::CA, "Cam"), Some(cam_index));
        assert_eq!(data.block_id_name(cam_index).as_deref(), Some("CACam"));
        assert_eq!(data.find_previous_lib(cam_index), Some(li_index));
        assert_eq!(data.find_block(0xdead), None);
        assert_eq!(data.read_file_version(), FileVersion::new(279, 7));

        let (ci, values) = data.read_struct(cam_index).unwrap();
        assert_eq!(data.current().struct_name(ci), "Camera");
        assert_eq!(values[0].float("lens"), Some(35.0));
    }

    #[test]
    fn test_missing_schema() {
        let w = DocWriter::current(Layout::native());
        let r = FileData::open(
            ByteStream::from_bytes(w.finish_without_schema()),
            "x.blend",
            Schema::current().unwrap(),
        );
        assert!(matches!(r, Err(Error::MissingSchemaBlock)));
    }
}
