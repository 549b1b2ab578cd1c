//! Fast thumbnail extraction.
//!
//! Only the blocks before the first record are looked at, so extracting a
//! preview never reads the whole document.

use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;

use crate::block::BlockReader;
use crate::format::{self, Endian};
use crate::options::LoadOptions;
use crate::stream::ByteStream;
use crate::util::{Error, Result};

/// RGBA8 preview image, rows bottom to top.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    #[serde(skip)]
    pub pixels: Vec<u8>,
}

impl std::fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thumbnail")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Thumbnail of the document at `path`, if it has one.
pub fn extract_thumbnail(path: impl AsRef<Path>) -> Result<Option<Thumbnail>> {
    let options = LoadOptions::default();
    let stream = ByteStream::open_opts(path, options.use_mmap)?;
    extract_thumbnail_from(stream, options.max_thumbnail_pixels)
}

/// Thumbnail from an already open stream.
///
/// Render info blocks are skipped; any block other than the thumbnail ends
/// the search. A truncated stream is treated as having no thumbnail.
pub fn extract_thumbnail_from(stream: ByteStream, max_pixels: usize) -> Result<Option<Thumbnail>> {
    let mut reader = BlockReader::open(stream)?;
    let endian = reader.header().endian;
    loop {
        let block = match reader.next_block() {
            Ok(Some(b)) => b,
            Ok(None) | Err(Error::CorruptStream(_)) | Err(Error::UnexpectedEof(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if block.header.is(format::REND) {
            continue;
        }
        if block.header.is(format::TEST) {
            return Ok(parse(&block.body, endian, max_pixels));
        }
        return Ok(None);
    }
}

fn parse(body: &[u8], endian: Endian, max_pixels: usize) -> Option<Thumbnail> {
    if body.len() < 8 {
        return None;
    }
    let (w, h) = match endian {
        Endian::Little => (LittleEndian::read_i32(&body[0..4]), LittleEndian::read_i32(&body[4..8])),
        Endian::Big => (BigEndian::read_i32(&body[0..4]), BigEndian::read_i32(&body[4..8])),
    };
    if w <= 0 || h <= 0 {
        return None;
    }
    let pixels = (w as usize).checked_mul(h as usize)?;
    if pixels > max_pixels {
        tracing::debug!("thumbnail {}x{} over the size limit", w, h);
        return None;
    }
    let len = pixels * 4;
    if body.len() < 8 + len {
        return None;
    }
    Some(Thumbnail { width: w as u32, height: h as u32, pixels: body[8..8 + len].to_vec() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{DocWriter, Layout};

    fn thumb_body(w: i32, h: i32, pixels: usize) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&w.to_ne_bytes());
        body.extend_from_slice(&h.to_ne_bytes());
        body.extend((0..pixels * 4).map(|i| i as u8));
        body
    }

    #[test]
    fn test_thumbnail_after_render_info() {
        let mut w = DocWriter::current(Layout::native());
        w.raw_block(format::REND, 0, 0, 1, &[0u8; 16]);
        w.raw_block(format::TEST, 0, 0, 1, &thumb_body(2, 2, 4));
        w.glob(0);
        let bytes = w.finish();
        let t = extract_thumbnail_from(ByteStream::from_bytes(bytes), 1 << 20).unwrap().unwrap();
        assert_eq!((t.width, t.height), (2, 2));
        assert_eq!(t.pixels.len(), 16);
        assert_eq!(t.pixels[5], 5);
    }

    #[test]
    fn test_no_thumbnail() {
        let mut w = DocWriter::current(Layout::native());
        w.glob(0);
        w.raw_block(format::TEST, 0, 0, 1, &thumb_body(2, 2, 4));
        let bytes = w.finish();
        assert_eq!(extract_thumbnail_from(ByteStream::from_bytes(bytes), 1 << 20).unwrap(), None);
    }

    #[test]
    fn test_rejects_bad_sizes() {
        for body in [vec![0u8; 4], thumb_body(0, 4, 0), thumb_body(4, 4, 3), thumb_body(64, 64, 64 * 64)] {
            let mut w = DocWriter::current(Layout::native());
            w.raw_block(format::TEST, 0, 0, 1, &body);
            let bytes = w.finish();
            assert_eq!(extract_thumbnail_from(ByteStream::from_bytes(bytes), 1024).unwrap(), None);
        }
    }

    #[test]
    fn test_not_a_document() {
        let e = extract_thumbnail_from(ByteStream::from_bytes(&b"nothing here"[..]), 16).unwrap_err();
        assert!(e.is_not_a_document());
    }
}
