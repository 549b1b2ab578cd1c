//! Container format constants and structures.
//!
//! A document starts with a 12-byte header:
//!
//! ```text
//! "BLENDER" <ptr: '_' | '-'> <endian: 'v' | 'V'> <3 ASCII digits>
//! ```
//!
//! followed by blocks until the `ENDB` terminator.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::util::{Error, Result};

/// Magic bytes at the start of a document.
pub const MAGIC: &[u8; 7] = b"BLENDER";

/// Size of the file header in bytes.
pub const HEADER_SIZE: usize = 12;

/// Pointer code for 4-byte pointers.
pub const POINTER_CODE_4: u8 = b'_';

/// Pointer code for 8-byte pointers.
pub const POINTER_CODE_8: u8 = b'-';

/// Endian code for little endian.
pub const ENDIAN_CODE_LITTLE: u8 = b'v';

/// Endian code for big endian.
pub const ENDIAN_CODE_BIG: u8 = b'V';

/// First bytes of a gzip stream.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Four-character block code.
pub type BlockCode = [u8; 4];

/// Owned sub-block of the preceding record.
pub const DATA: BlockCode = *b"DATA";
/// Embedded struct schema.
pub const DNA1: BlockCode = *b"DNA1";
/// Terminal block.
pub const ENDB: BlockCode = *b"ENDB";
/// File globals.
pub const GLOB: BlockCode = *b"GLOB";
/// User preferences.
pub const USER: BlockCode = *b"USER";
/// Render info, precedes the thumbnail.
pub const REND: BlockCode = *b"REND";
/// Preview thumbnail.
pub const TEST: BlockCode = *b"TEST";

/// Size of a thumbnail header: width and height as i32.
pub const THUMB_HEADER_SIZE: usize = 8;

/// Render a block code for messages (`"SC"`, `"DATA"`).
pub fn code_str(code: &BlockCode) -> String {
    code.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
        .collect()
}

/// Byte order of a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Byte order of the running program.
    #[inline]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    #[inline]
    pub fn is_native(self) -> bool {
        self == Self::native()
    }
}

/// Parsed 12-byte file header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FileHeader {
    /// Pointer width in bytes (4 or 8).
    pub pointer_size: usize,
    pub endian: Endian,
    /// Three-digit version, e.g. 279.
    pub version: u16,
}

impl FileHeader {
    /// Parse and validate a header.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE || &data[0..7] != MAGIC {
            return Err(Error::BadMagic);
        }

        let pointer_size = match data[7] {
            POINTER_CODE_4 => 4,
            POINTER_CODE_8 => 8,
            _ => return Err(Error::BadMagic),
        };
        let endian = match data[8] {
            ENDIAN_CODE_LITTLE => Endian::Little,
            ENDIAN_CODE_BIG => Endian::Big,
            _ => return Err(Error::BadMagic),
        };

        let digits = &data[9..12];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(Error::BadMagic);
        }
        let version = digits.iter().fold(0u16, |acc, d| acc * 10 + (d - b'0') as u16);

        Ok(Self { pointer_size, endian, version })
    }

    /// Size of one block header in this document.
    #[inline]
    pub const fn block_header_size(&self) -> usize {
        16 + self.pointer_size
    }

    /// Whether block bodies need an endian switch before use.
    #[inline]
    pub fn needs_swap(&self) -> bool {
        !self.endian.is_native()
    }
}

/// Two-character record type code (`SC`, `OB`, ...).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdCode(pub [u8; 2]);

impl IdCode {
    pub const LI: IdCode = IdCode(*b"LI");
    pub const SC: IdCode = IdCode(*b"SC");
    pub const OB: IdCode = IdCode(*b"OB");
    pub const CA: IdCode = IdCode(*b"CA");
    pub const LA: IdCode = IdCode(*b"LA");
    pub const ME: IdCode = IdCode(*b"ME");
    pub const MA: IdCode = IdCode(*b"MA");
    pub const WO: IdCode = IdCode(*b"WO");
    pub const IM: IdCode = IdCode(*b"IM");
    pub const GR: IdCode = IdCode(*b"GR");
    /// Reference stub for a record living in a library.
    pub const ID: IdCode = IdCode(*b"ID");

    /// Recognize a record block code (`XX\0\0`).
    pub fn from_block_code(code: &BlockCode) -> Option<Self> {
        if code[2] == 0 && code[3] == 0 && code[0].is_ascii_uppercase() && code[1].is_ascii_uppercase() {
            Some(IdCode([code[0], code[1]]))
        } else {
            None
        }
    }

    /// Code prefix of a stored record name (`"CACam"` -> `CA`).
    pub fn from_id_name(name: &[u8]) -> Option<Self> {
        if name.len() >= 2 && name[0].is_ascii_uppercase() && name[1].is_ascii_uppercase() {
            Some(IdCode([name[0], name[1]]))
        } else {
            None
        }
    }

    #[inline]
    pub const fn block_code(self) -> BlockCode {
        [self.0[0], self.0[1], 0, 0]
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("??")
    }
}

impl fmt::Display for IdCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for IdCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdCode({})", self.as_str())
    }
}

impl FromStr for IdCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let b = s.as_bytes();
        if b.len() == 2 && b[0].is_ascii_uppercase() && b[1].is_ascii_uppercase() {
            Ok(IdCode([b[0], b[1]]))
        } else {
            Err(Error::other(format!("invalid id code '{}'", s)))
        }
    }
}

impl Serialize for IdCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Undo byte-swapped two-character codes written by old big-endian writers
/// (`\0\0SC` -> `SC\0\0`).
#[inline]
pub fn normalize_code(code: BlockCode) -> BlockCode {
    if code[0] == 0 && code[1] == 0 && code[2] != 0 {
        [code[2], code[3], 0, 0]
    } else {
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parse() {
        let h = FileHeader::parse(b"BLENDER-v279").unwrap();
        assert_eq!(h.pointer_size, 8);
        assert_eq!(h.endian, Endian::Little);
        assert_eq!(h.version, 279);
        assert_eq!(h.block_header_size(), 24);

        let h = FileHeader::parse(b"BLENDER_V250").unwrap();
        assert_eq!(h.pointer_size, 4);
        assert_eq!(h.endian, Endian::Big);
        assert_eq!(h.block_header_size(), 20);
    }

    #[test]
    fn test_header_rejects() {
        assert!(matches!(FileHeader::parse(b"BLENDER"), Err(Error::BadMagic)));
        assert!(matches!(FileHeader::parse(b"BLENDEX-v279"), Err(Error::BadMagic)));
        assert!(matches!(FileHeader::parse(b"BLENDER*v279"), Err(Error::BadMagic)));
        assert!(matches!(FileHeader::parse(b"BLENDER-v2a9"), Err(Error::BadMagic)));
    }

    #[test]
    fn test_id_codes() {
        assert_eq!(IdCode::from_block_code(b"SC\0\0"), Some(IdCode::SC));
        assert_eq!(IdCode::from_block_code(&DATA), None);
        assert_eq!(IdCode::SC.block_code(), *b"SC\0\0");
        assert_eq!(IdCode::from_id_name(b"CACam"), Some(IdCode::CA));
        assert_eq!("OB".parse::<IdCode>().unwrap(), IdCode::OB);
        assert!("ob".parse::<IdCode>().is_err());
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(*b"\0\0SC"), *b"SC\0\0");
        assert_eq!(normalize_code(DNA1), DNA1);
        assert_eq!(code_str(b"SC\0\0"), "SC");
    }
}
