//! Old-address relocation maps.
//!
//! Every pointer in a document is the address the writer had in memory.
//! While reading, each block that becomes a record or a data block is
//! entered here under that address; linking then swaps addresses for
//! arena handles.
//!
//! One type serves three roles:
//!
//! - data map: per record, owned sub-blocks, hit sequentially
//! - library map: whole session, records keyed by address and source file
//! - packed map: undo restore, packed payloads of the previous graph
//!
//! Misses are not errors. A reference that cannot be resolved stays null.

use crate::graph::Source;

#[derive(Clone, Debug)]
struct Entry<H> {
    old: u64,
    source: Source,
    new: H,
    users: u32,
}

/// Map from old addresses to new handles.
#[derive(Clone, Debug)]
pub struct RelocationMap<H> {
    entries: Vec<Entry<H>>,
    last_hit: usize,
    sorted: bool,
}

impl<H> Default for RelocationMap<H> {
    fn default() -> Self {
        Self { entries: Vec::new(), last_hit: 0, sorted: false }
    }
}

impl<H: Copy + PartialEq> RelocationMap<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert for the primary source. No-op for a null address or handle.
    pub fn insert(&mut self, old: u64, new: Option<H>) {
        self.insert_from(old, Source::Primary, new);
    }

    /// Insert an address as seen from `source`.
    ///
    /// An address already present for the same source keeps its first
    /// handle.
    pub fn insert_from(&mut self, old: u64, source: Source, new: Option<H>) {
        let Some(new) = new else { return };
        if old == 0 {
            return;
        }
        if self.position(old, Some(source)).is_some() {
            return;
        }
        self.entries.push(Entry { old, source, new, users: 0 });
        self.sorted = false;
    }

    /// Sequential lookup, optionally counting a use.
    ///
    /// Tries the neighbours of the previous hit first, since owned blocks
    /// are usually referenced in the order they were written.
    pub fn lookup_data(&mut self, old: u64, increment: bool) -> Option<H> {
        if old == 0 || self.entries.is_empty() {
            return None;
        }
        let last = self.last_hit.min(self.entries.len() - 1);
        let near = [last + 1, last, last.wrapping_sub(1)];
        let index = near
            .into_iter()
            .find(|&i| self.entries.get(i).is_some_and(|e| e.old == old))
            .or_else(|| self.entries.iter().position(|e| e.old == old))?;

        self.last_hit = index;
        let entry = &mut self.entries[index];
        if increment {
            entry.users += 1;
        }
        Some(entry.new)
    }

    /// Lookup constrained to one source, or any source when `None`.
    ///
    /// Binary search once [`sort`](Self::sort) has run, linear scan after
    /// later inserts.
    pub fn lookup_library(&self, old: u64, source: Option<Source>) -> Option<H> {
        if old == 0 {
            return None;
        }
        self.position(old, source).map(|i| self.entries[i].new)
    }

    /// Sort by address for library lookups.
    pub fn sort(&mut self) {
        self.entries.sort_by_key(|e| e.old);
        self.last_hit = 0;
        self.sorted = true;
    }

    #[inline]
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    fn position(&self, old: u64, source: Option<Source>) -> Option<usize> {
        let matches = |e: &Entry<H>| e.old == old && source.map_or(true, |s| e.source == s);
        if !self.sorted {
            return self.entries.iter().position(matches);
        }
        let start = self.entries.partition_point(|e| e.old < old);
        self.entries[start..]
            .iter()
            .take_while(|e| e.old == old)
            .position(matches)
            .map(|i| start + i)
    }

    /// Point every entry resolving to `from` at `to`.
    pub fn redirect(&mut self, from: H, to: H) {
        for e in &mut self.entries {
            if e.new == from {
                e.new = to;
            }
        }
    }

    /// Drop every entry resolving to `handle`.
    pub fn forget(&mut self, handle: H) {
        self.entries.retain(|e| e.new != handle);
        self.last_hit = 0;
    }

    /// Use count of an address, for tests and diagnostics.
    pub fn users(&self, old: u64) -> Option<u32> {
        self.entries.iter().find(|e| e.old == old).map(|e| e.users)
    }

    /// Drop entries that were never looked up with `increment` and return
    /// their handles so the caller can free them.
    pub fn prune_unused(&mut self) -> Vec<H> {
        let mut unused = Vec::new();
        self.entries.retain(|e| {
            if e.users == 0 {
                unused.push(e.new);
                false
            } else {
                true
            }
        });
        self.last_hit = 0;
        unused
    }

    /// Empty the map, keeping its allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_hit = 0;
        self.sorted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::IdCode;
    use crate::graph::Record;
    use crate::sdna::StructValue;
    use crate::util::Arena;

    #[test]
    fn test_null_insert_ignored() {
        let mut map: RelocationMap<u32> = RelocationMap::new();
        map.insert(0, Some(1));
        map.insert(0x10, None);
        assert!(map.is_empty());
        assert_eq!(map.lookup_data(0, true), None);
    }

    #[test]
    fn test_lookup_data_counts_uses() {
        let mut map = RelocationMap::new();
        for i in 1..=5u64 {
            map.insert(i * 0x10, Some(i as u32));
        }
        assert_eq!(map.lookup_data(0x30, true), Some(3));
        assert_eq!(map.lookup_data(0x30, true), Some(3));
        assert_eq!(map.lookup_data(0x30, false), Some(3));
        assert_eq!(map.users(0x30), Some(2));
        // Neighbour of the last hit, then a far jump.
        assert_eq!(map.lookup_data(0x40, true), Some(4));
        assert_eq!(map.lookup_data(0x10, true), Some(1));
        assert_eq!(map.lookup_data(0x99, true), None);
    }

    #[test]
    fn test_prune_and_clear() {
        let mut map = RelocationMap::new();
        map.insert(0x10, Some(1u32));
        map.insert(0x20, Some(2u32));
        map.lookup_data(0x20, true);
        assert_eq!(map.prune_unused(), vec![1]);
        assert_eq!(map.len(), 1);
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn test_library_lookup_by_source() {
        let mut records: Arena<Record> = Arena::new();
        let lib = records.insert(Record::new(IdCode::LI, "lib", StructValue::new("Library")));
        let a = records.insert(Record::new(IdCode::CA, "a", StructValue::new("Camera")));
        let b = records.insert(Record::new(IdCode::CA, "b", StructValue::new("Camera")));

        let mut map = RelocationMap::new();
        map.insert_from(0x100, Source::Primary, Some(a));
        map.insert_from(0x100, Source::Library(lib), Some(b));
        map.insert_from(0x50, Source::Primary, Some(lib));

        for _ in 0..2 {
            assert_eq!(map.lookup_library(0x100, Some(Source::Primary)), Some(a));
            assert_eq!(map.lookup_library(0x100, Some(Source::Library(lib))), Some(b));
            assert_eq!(map.lookup_library(0x100, None), Some(a));
            assert_eq!(map.lookup_library(0x200, None), None);
            map.sort();
        }

        // Inserts after sorting fall back to a linear scan.
        map.insert_from(0x10, Source::Primary, Some(b));
        assert!(!map.is_sorted());
        assert_eq!(map.lookup_library(0x10, None), Some(b));

        map.redirect(a, b);
        assert_eq!(map.lookup_library(0x100, Some(Source::Primary)), Some(b));
    }
}
