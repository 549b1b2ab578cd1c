//! Gzip support for compressed documents.
//!
//! Documents may be stored gzip-compressed as a whole. Compression is
//! detected from the first two bytes and handled by a streaming decoder, so
//! the block reader never sees the difference.

use std::io::{self, Read};

use flate2::read::GzDecoder;

use crate::format::GZIP_MAGIC;
use crate::util::Error;

/// Check whether a buffer starts with the gzip magic.
#[inline]
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[..2] == GZIP_MAGIC
}

/// Streaming gzip decoder over any reader.
pub(crate) fn decoder<R: Read>(inner: R) -> GzDecoder<R> {
    GzDecoder::new(inner)
}

/// Map a decoder I/O error to a load error.
pub(crate) fn map_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => Error::Decompress(e.to_string()),
        _ => Error::Io(e),
    }
}
