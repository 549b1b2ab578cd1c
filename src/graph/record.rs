//! Records and owned data blocks.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use serde::Serialize;

use super::RecordId;
use crate::format::{Endian, IdCode};
use crate::sdna::{Ptr, StructValue};

/// Load-state bits of a record.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Tags(u32);

impl Tags {
    pub const LOCAL: Tags = Tags(0);
    /// Linked directly by the user.
    pub const EXTERN: Tags = Tags(1 << 0);
    /// Pulled in because something else needed it.
    pub const INDIRECT: Tags = Tags(1 << 1);
    /// References still have to be expanded.
    pub const NEED_EXPAND: Tags = Tags(1 << 3);
    /// Reference stub, replaced during expansion.
    pub const STUB: Tags = Tags(1 << 4);
    /// Cross references not yet resolved.
    pub const NEED_LINK: Tags = Tags(1 << 5);
    /// Stand-in for a record that could not be found.
    pub const MISSING: Tags = Tags(1 << 6);
    /// Read during the current load.
    pub const NEW: Tags = Tags(1 << 8);

    const NAMES: [(Tags, &'static str); 7] = [
        (Tags::EXTERN, "EXTERN"),
        (Tags::INDIRECT, "INDIRECT"),
        (Tags::NEED_EXPAND, "NEED_EXPAND"),
        (Tags::STUB, "STUB"),
        (Tags::NEED_LINK, "NEED_LINK"),
        (Tags::MISSING, "MISSING"),
        (Tags::NEW, "NEW"),
    ];

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Tags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Tags) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: Tags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Tags) {
        self.0 &= !other.0;
    }

    fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES.into_iter().filter(move |(t, _)| self.contains(*t)).map(|(_, n)| n)
    }
}

impl BitOr for Tags {
    type Output = Tags;

    fn bitor(self, rhs: Tags) -> Tags {
        Tags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Tags {
    fn bitor_assign(&mut self, rhs: Tags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("LOCAL");
        }
        let names: Vec<_> = self.names().collect();
        f.write_str(&names.join("|"))
    }
}

impl Serialize for Tags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

/// Common header of every record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IdHeader {
    pub code: IdCode,
    /// Name without the two-character code prefix.
    pub name: String,
    /// Owning library record, `None` for the primary document.
    #[serde(skip)]
    pub lib: Option<RecordId>,
    pub tag: Tags,
    pub users: i32,
    pub flag: i32,
}

impl IdHeader {
    /// Kept alive regardless of users.
    pub const FLAG_FAKEUSER: i32 = 1 << 9;

    pub fn new(code: IdCode, name: impl Into<String>) -> Self {
        Self { code, name: name.into(), lib: None, tag: Tags::LOCAL, users: 0, flag: 0 }
    }

    /// Stored form, code prefix included (`"CACam"`).
    pub fn full_name(&self) -> String {
        format!("{}{}", self.code, self.name)
    }
}

/// A top-level record.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub id: IdHeader,
    /// Type-specific fields (the ID header is split out into `id`).
    pub data: StructValue,
    /// Address the record had in its document.
    pub old: u64,
}

impl Record {
    pub fn new(code: IdCode, name: impl Into<String>, data: StructValue) -> Self {
        Self { id: IdHeader::new(code, name), data, old: 0 }
    }

    #[inline]
    pub fn code(&self) -> IdCode {
        self.id.code
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.id.name
    }

    #[inline]
    pub fn tag(&self) -> Tags {
        self.id.tag
    }

    #[inline]
    pub fn is_missing(&self) -> bool {
        self.id.tag.contains(Tags::MISSING)
    }
}

/// Body of an owned data block.
#[derive(Clone, Debug, PartialEq)]
pub enum DataPayload {
    /// Decoded current-layout structs.
    Structs(Vec<StructValue>),
    /// Untyped bytes, as written.
    Raw(RawData),
    /// An array of references, decoded from raw bytes.
    Pointers(Vec<Ptr>),
}

/// Untyped block body plus what is needed to interpret pointers in it.
#[derive(Clone, Debug, PartialEq)]
pub struct RawData {
    pub bytes: Arc<[u8]>,
    pub pointer_size: usize,
    pub endian: Endian,
}

impl RawData {
    /// Interpret the body as an array of document pointers.
    pub fn pointers(&self) -> Vec<u64> {
        use byteorder::{BigEndian, ByteOrder, LittleEndian};

        self.bytes
            .chunks_exact(self.pointer_size)
            .map(|c| match (self.pointer_size, self.endian) {
                (8, Endian::Little) => LittleEndian::read_u64(c),
                (8, Endian::Big) => BigEndian::read_u64(c),
                (_, Endian::Little) => LittleEndian::read_u32(c) as u64,
                (_, Endian::Big) => BigEndian::read_u32(c) as u64,
            })
            .collect()
    }
}

/// A block owned by exactly one record.
#[derive(Clone, Debug, PartialEq)]
pub struct DataBlock {
    pub old: u64,
    /// File struct name, empty for raw data.
    pub struct_name: String,
    pub payload: DataPayload,
}

impl DataBlock {
    pub fn structs(&self) -> Option<&[StructValue]> {
        match &self.payload {
            DataPayload::Structs(v) => Some(v),
            _ => None,
        }
    }

    pub fn structs_mut(&mut self) -> Option<&mut Vec<StructValue>> {
        match &mut self.payload {
            DataPayload::Structs(v) => Some(v),
            _ => None,
        }
    }

    pub fn raw(&self) -> Option<&RawData> {
        match &self.payload {
            DataPayload::Raw(r) => Some(r),
            _ => None,
        }
    }

    pub fn pointers(&self) -> Option<&[Ptr]> {
        match &self.payload {
            DataPayload::Pointers(p) => Some(p),
            _ => None,
        }
    }

    pub fn pointers_mut(&mut self) -> Option<&mut Vec<Ptr>> {
        match &mut self.payload {
            DataPayload::Pointers(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        let mut t = Tags::NEED_LINK | Tags::NEW;
        assert!(t.contains(Tags::NEW));
        assert!(!t.contains(Tags::NEW | Tags::MISSING));
        assert!(t.intersects(Tags::NEW | Tags::MISSING));
        t.remove(Tags::NEW);
        assert_eq!(format!("{:?}", t), "NEED_LINK");
        assert_eq!(format!("{:?}", Tags::LOCAL), "LOCAL");
        assert_eq!(serde_json::to_string(&(Tags::EXTERN | Tags::MISSING)).unwrap(), r#"["EXTERN","MISSING"]"#);
    }

    #[test]
    fn test_raw_pointers() {
        let raw = RawData {
            bytes: Arc::from(&[0x10, 0, 0, 0, 0, 0, 0, 0x20][..]),
            pointer_size: 4,
            endian: Endian::Big,
        };
        assert_eq!(raw.pointers(), vec![0x1000_0000, 0x20]);
    }

    #[test]
    fn test_full_name() {
        let id = IdHeader::new(IdCode::CA, "Cam");
        assert_eq!(id.full_name(), "CACam");
    }
}
