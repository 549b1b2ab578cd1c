//! Per-document record collections.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::RecordId;
use crate::format::IdCode;

/// (major, minor) version a document was written with.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FileVersion {
    pub major: u16,
    pub minor: u16,
}

impl FileVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl fmt::Debug for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl fmt::Display for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Document a relocation entry or record came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    Primary,
    Library(RecordId),
}

impl Source {
    pub fn from_lib(lib: Option<RecordId>) -> Self {
        lib.map_or(Source::Primary, Source::Library)
    }

    pub fn lib(self) -> Option<RecordId> {
        match self {
            Source::Primary => None,
            Source::Library(l) => Some(l),
        }
    }
}

/// Records of one source document, grouped by type.
///
/// A namespace is created as soon as its document is referenced, before the
/// document is opened. Until then its version is provisional: that of the
/// referencing document. Opening the document settles the version, once;
/// it does not change after that.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Namespace {
    /// Library record this namespace was read from, `None` for the primary.
    pub library: Option<RecordId>,
    version: FileVersion,
    settled: bool,
    lists: BTreeMap<IdCode, Vec<RecordId>>,
}

impl Namespace {
    /// Empty namespace with a provisional version.
    pub fn new(library: Option<RecordId>, version: FileVersion) -> Self {
        Self { library, version, settled: false, lists: BTreeMap::new() }
    }

    /// Version of the document the records were read from.
    #[inline]
    pub fn version(&self) -> FileVersion {
        self.version
    }

    /// Has the version been read from the namespace's own document?
    #[inline]
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Fix the version to that of the namespace's own document. Only the
    /// first call has an effect; returns whether this one did.
    pub fn settle_version(&mut self, version: FileVersion) -> bool {
        if self.settled {
            if version != self.version {
                tracing::debug!("namespace version already {}, ignoring {}", self.version, version);
            }
            return false;
        }
        self.version = version;
        self.settled = true;
        true
    }

    #[inline]
    pub fn is_primary(&self) -> bool {
        self.library.is_none()
    }

    #[inline]
    pub fn source(&self) -> Source {
        Source::from_lib(self.library)
    }

    pub fn push(&mut self, code: IdCode, id: RecordId) {
        self.lists.entry(code).or_default().push(id);
    }

    /// Remove a record, keeping the order of the rest.
    pub fn remove(&mut self, code: IdCode, id: RecordId) -> bool {
        let Some(list) = self.lists.get_mut(&code) else { return false };
        let Some(pos) = list.iter().position(|&r| r == id) else { return false };
        list.remove(pos);
        if list.is_empty() {
            self.lists.remove(&code);
        }
        true
    }

    /// Swap one handle for another in place.
    pub fn replace(&mut self, code: IdCode, from: RecordId, to: RecordId) -> bool {
        match self.lists.get_mut(&code).and_then(|l| l.iter_mut().find(|r| **r == from)) {
            Some(slot) => {
                *slot = to;
                true
            }
            None => false,
        }
    }

    pub fn list(&self, code: IdCode) -> &[RecordId] {
        self.lists.get(&code).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Type codes present, in code order.
    pub fn codes(&self) -> impl Iterator<Item = IdCode> + '_ {
        self.lists.keys().copied()
    }

    /// Every record, type by type.
    pub fn iter(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.lists.values().flatten().copied()
    }

    pub fn len(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Move every record of `other` to the end of the matching list.
    pub fn append(&mut self, other: &mut Namespace) {
        for (code, mut list) in std::mem::take(&mut other.lists) {
            self.lists.entry(code).or_default().append(&mut list);
        }
    }

    pub(crate) fn take_lists(&mut self) -> BTreeMap<IdCode, Vec<RecordId>> {
        std::mem::take(&mut self.lists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Record;
    use crate::sdna::StructValue;
    use crate::util::Arena;

    #[test]
    fn test_version_order() {
        assert!(FileVersion::new(279, 0) > FileVersion::new(278, 9));
        assert!(FileVersion::new(279, 2) > FileVersion::new(279, 1));
        assert_eq!(FileVersion::new(260, 3).to_string(), "260.3");
    }

    #[test]
    fn test_version_settles_once() {
        let mut ns = Namespace::new(None, FileVersion::new(279, 1));
        assert!(!ns.is_settled());
        assert_eq!(ns.version(), FileVersion::new(279, 1));

        assert!(ns.settle_version(FileVersion::new(270, 2)));
        assert!(ns.is_settled());
        assert!(!ns.settle_version(FileVersion::new(280, 0)));
        assert!(!ns.settle_version(FileVersion::new(260, 0)));
        assert_eq!(ns.version(), FileVersion::new(270, 2));
    }

    #[test]
    fn test_lists() {
        let mut arena = Arena::new();
        let a = arena.insert(Record::new(IdCode::OB, "a", StructValue::new("Object")));
        let b = arena.insert(Record::new(IdCode::OB, "b", StructValue::new("Object")));
        let c = arena.insert(Record::new(IdCode::CA, "c", StructValue::new("Camera")));

        let mut ns = Namespace::new(None, FileVersion::new(279, 0));
        ns.push(IdCode::OB, a);
        ns.push(IdCode::OB, b);
        ns.push(IdCode::CA, c);
        assert_eq!(ns.len(), 3);
        assert_eq!(ns.list(IdCode::OB), &[a, b]);
        assert_eq!(ns.codes().collect::<Vec<_>>(), vec![IdCode::CA, IdCode::OB]);

        let mut other = Namespace::new(None, FileVersion::default());
        other.push(IdCode::OB, c);
        ns.append(&mut other);
        assert!(other.is_empty());
        assert_eq!(ns.list(IdCode::OB), &[a, b, c]);

        assert!(ns.remove(IdCode::OB, a));
        assert!(!ns.remove(IdCode::OB, a));
        assert!(ns.replace(IdCode::OB, b, a));
        assert_eq!(ns.list(IdCode::OB), &[a, c]);
    }
}
