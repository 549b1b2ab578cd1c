//! The loaded object graph.
//!
//! Records and their owned data blocks live in generational arenas; every
//! reference between them is a [`Ptr`] holding a handle. Records are
//! grouped into [`Namespace`]s, one per source document. While loading the
//! graph is split (primary first, then one namespace per library in
//! discovery order). [`Graph::join`] merges everything into the primary
//! namespace and [`Graph::split`] partitions it again by owning library.

mod namespace;
mod record;

pub use namespace::{FileVersion, Namespace, Source};
pub use record::{DataBlock, DataPayload, IdHeader, RawData, Record, Tags};

use std::collections::HashMap;

use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;

use crate::format::IdCode;
use crate::sdna::{Ptr, Value};
use crate::util::{Arena, Handle};

/// Handle of a top-level record.
pub type RecordId = Handle<Record>;
/// Handle of an owned data block.
pub type DataId = Handle<DataBlock>;

/// Records, data blocks and namespaces of one load.
#[derive(Clone, Debug)]
pub struct Graph {
    records: Arena<Record>,
    data: Arena<DataBlock>,
    namespaces: Vec<Namespace>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new(FileVersion::default())
    }
}

impl Graph {
    /// Empty graph with a primary namespace.
    pub fn new(version: FileVersion) -> Self {
        Self {
            records: Arena::new(),
            data: Arena::new(),
            namespaces: vec![Namespace::new(None, version)],
        }
    }

    // ------------------------------------------------------------------
    // Records and data
    // ------------------------------------------------------------------

    pub fn record(&self, id: RecordId) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn record_mut(&mut self, id: RecordId) -> Option<&mut Record> {
        self.records.get_mut(id)
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn data_block(&self, id: DataId) -> Option<&DataBlock> {
        self.data.get(id)
    }

    pub fn data_block_mut(&mut self, id: DataId) -> Option<&mut DataBlock> {
        self.data.get_mut(id)
    }

    pub fn data_count(&self) -> usize {
        self.data.len()
    }

    pub fn insert_data(&mut self, block: DataBlock) -> DataId {
        self.data.insert(block)
    }

    pub fn remove_data(&mut self, id: DataId) -> Option<DataBlock> {
        self.data.remove(id)
    }

    /// Split borrow for linkers that walk a record and its data together.
    pub(crate) fn parts_mut(&mut self, id: RecordId) -> Option<(&mut Record, &mut Arena<DataBlock>)> {
        let record = self.records.get_mut(id)?;
        Some((record, &mut self.data))
    }

    /// Add a record to a namespace; its owning library becomes the
    /// namespace's library.
    pub fn add_record(&mut self, ns: usize, mut record: Record) -> RecordId {
        record.id.lib = self.namespaces[ns].library;
        let code = record.id.code;
        let id = self.records.insert(record);
        self.namespaces[ns].push(code, id);
        id
    }

    /// Remove a record from its namespace and free it with the data
    /// blocks it owns.
    pub fn remove_record(&mut self, id: RecordId) -> Option<Record> {
        let code = self.records.get(id)?.id.code;
        for ns in &mut self.namespaces {
            if ns.remove(code, id) {
                break;
            }
        }
        for d in self.owned_data(id) {
            self.data.remove(d);
        }
        self.records.remove(id)
    }

    /// Data blocks reachable from a record through owned references.
    pub fn owned_data(&self, id: RecordId) -> Vec<DataId> {
        let Some(record) = self.records.get(id) else { return Vec::new() };
        let mut out = Vec::new();
        let mut stack = Vec::new();
        record.data.fields().for_each(|(_, v)| collect_data(v, &mut stack));
        while let Some(d) = stack.pop() {
            if out.contains(&d) {
                continue;
            }
            let Some(block) = self.data.get(d) else { continue };
            out.push(d);
            match &block.payload {
                DataPayload::Structs(items) => {
                    for s in items {
                        s.fields().for_each(|(_, v)| collect_data(v, &mut stack));
                    }
                }
                DataPayload::Pointers(ptrs) => stack.extend(ptrs.iter().filter_map(Ptr::data)),
                DataPayload::Raw(_) => {}
            }
        }
        out
    }

    /// All records in namespace order, type by type.
    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &Record)> + '_ {
        self.namespaces
            .iter()
            .flat_map(|ns| ns.iter())
            .filter_map(|id| self.records.get(id).map(|r| (id, r)))
    }

    /// Records of one type across all namespaces.
    pub fn by_code(&self, code: IdCode) -> Vec<RecordId> {
        self.namespaces.iter().flat_map(|ns| ns.list(code).iter().copied()).collect()
    }

    /// Find a record by type, name and owning library.
    pub fn find(&self, code: IdCode, name: &str, lib: Option<RecordId>) -> Option<RecordId> {
        self.by_code(code).into_iter().find(|&id| {
            self.records
                .get(id)
                .is_some_and(|r| r.id.lib == lib && r.id.name == name)
        })
    }

    /// Find a record by type and name within one namespace.
    pub fn find_in(&self, ns: usize, code: IdCode, name: &str) -> Option<RecordId> {
        self.namespaces[ns]
            .list(code)
            .iter()
            .copied()
            .find(|&id| self.records.get(id).is_some_and(|r| r.id.name == name))
    }

    /// Records tagged missing.
    pub fn missing(&self) -> Vec<RecordId> {
        self.iter().filter(|(_, r)| r.is_missing()).map(|(id, _)| id).collect()
    }

    // ------------------------------------------------------------------
    // Libraries and namespaces
    // ------------------------------------------------------------------

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    pub fn namespace(&self, index: usize) -> &Namespace {
        &self.namespaces[index]
    }

    pub fn namespace_mut(&mut self, index: usize) -> &mut Namespace {
        &mut self.namespaces[index]
    }

    pub fn primary(&self) -> &Namespace {
        &self.namespaces[0]
    }

    /// Append a namespace for a library, returning its index.
    pub fn add_namespace(&mut self, library: RecordId, version: FileVersion) -> usize {
        self.namespaces.push(Namespace::new(Some(library), version));
        self.namespaces.len() - 1
    }

    /// Index of the namespace read from `library`.
    pub fn namespace_index(&self, library: Option<RecordId>) -> Option<usize> {
        self.namespaces.iter().position(|ns| ns.library == library)
    }

    #[inline]
    pub fn is_split(&self) -> bool {
        self.namespaces.len() > 1
    }

    /// Library records, in declaration order.
    pub fn libraries(&self) -> Vec<RecordId> {
        self.by_code(IdCode::LI)
    }

    /// Library record whose resolved path is `filepath`.
    pub fn find_library(&self, filepath: &str) -> Option<RecordId> {
        self.libraries().into_iter().find(|&id| {
            self.records
                .get(id)
                .and_then(|r| r.data.string("filepath"))
                .is_some_and(|p| p == filepath)
        })
    }

    /// Version recorded on a library, or the primary version for `None`.
    pub fn version_of(&self, lib: Option<RecordId>) -> FileVersion {
        if let Some(ns) = self.namespace_index(lib) {
            return self.namespaces[ns].version();
        }
        lib.and_then(|l| self.records.get(l))
            .map(|r| {
                let major = r.data.int("versionfile").unwrap_or(0);
                let minor = r.data.int("subversionfile").unwrap_or(0);
                FileVersion::new(major.clamp(0, u16::MAX as i64) as u16, minor.clamp(0, u16::MAX as i64) as u16)
            })
            .unwrap_or(self.namespaces[0].version())
    }

    fn store_library_version(&mut self, lib: RecordId, version: FileVersion) {
        if let Some(r) = self.records.get_mut(lib) {
            r.data.set_int("versionfile", version.major as i64);
            r.data.set_int("subversionfile", version.minor as i64);
        }
    }

    /// Merge every namespace into the primary one.
    ///
    /// Lists are concatenated in namespace order; each library's version is
    /// kept on its library record.
    pub fn join(&mut self) {
        if self.namespaces.len() <= 1 {
            return;
        }
        let rest: Vec<Namespace> = self.namespaces.drain(1..).collect();
        for mut ns in rest {
            if let Some(lib) = ns.library {
                self.store_library_version(lib, ns.version());
            }
            self.namespaces[0].append(&mut ns);
        }
    }

    /// Partition records by owning library: the primary namespace first,
    /// then one per library record in declaration order.
    pub fn split(&mut self) {
        self.join();
        let libs = self.libraries();
        let mut lists = self.namespaces[0].take_lists();
        let mut index: HashMap<RecordId, usize> = HashMap::with_capacity(libs.len());
        for lib in libs {
            let version = self.version_of(Some(lib));
            let ns = self.add_namespace(lib, version);
            // Opened before: the stored version came from its document.
            if self.records.get(lib).is_some_and(|r| !r.is_missing() && version != FileVersion::default()) {
                self.namespaces[ns].settle_version(version);
            }
            index.insert(lib, ns);
        }

        // Library records themselves always stay in the primary namespace.
        if let Some(libs) = lists.remove(&IdCode::LI) {
            for id in libs {
                self.namespaces[0].push(IdCode::LI, id);
            }
        }
        for (code, ids) in lists {
            for id in ids {
                let ns = self
                    .records
                    .get(id)
                    .and_then(|r| r.id.lib)
                    .and_then(|l| index.get(&l).copied())
                    .unwrap_or(0);
                self.namespaces[ns].push(code, id);
            }
        }
    }
}

fn collect_data(v: &Value, out: &mut Vec<DataId>) {
    match v {
        Value::Pointer(Ptr::Data(d)) => out.push(*d),
        Value::Struct(s) => s.fields().for_each(|(_, v)| collect_data(v, out)),
        Value::Array(items) => items.iter().for_each(|i| collect_data(i, out)),
        _ => {}
    }
}

struct RecordView<'a> {
    graph: &'a Graph,
    record: &'a Record,
}

impl Serialize for RecordView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let lib = self
            .record
            .id
            .lib
            .and_then(|l| self.graph.record(l))
            .map(|r| r.id.name.clone());
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("id", &self.record.id)?;
        map.serialize_entry("library", &lib)?;
        map.serialize_entry("data", &self.record.data)?;
        map.end()
    }
}

struct NamespaceView<'a> {
    graph: &'a Graph,
    ns: &'a Namespace,
}

impl Serialize for NamespaceView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let library = self
            .ns
            .library
            .and_then(|l| self.graph.record(l))
            .map(|r| r.id.name.clone());
        let records: Vec<RecordView<'_>> = self
            .ns
            .iter()
            .filter_map(|id| self.graph.record(id))
            .map(|record| RecordView { graph: self.graph, record })
            .collect();
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("library", &library)?;
        map.serialize_entry("version", &self.ns.version())?;
        map.serialize_entry("records", &records)?;
        map.end()
    }
}

impl Serialize for Graph {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.namespaces.len()))?;
        for ns in &self.namespaces {
            seq.serialize_element(&NamespaceView { graph: self, ns })?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdna::{Schema, StructValue};

    fn library(graph: &mut Graph, name: &str) -> RecordId {
        let schema = Schema::current().unwrap();
        let data = StructValue::zeroed(&schema, schema.struct_index("Library").unwrap());
        graph.add_record(0, Record::new(IdCode::LI, name, data))
    }

    fn snapshot(graph: &Graph) -> Vec<(RecordId, Option<RecordId>)> {
        graph.iter().map(|(id, r)| (id, r.id.lib)).collect()
    }

    #[test]
    fn test_add_find_remove() {
        let mut g = Graph::new(FileVersion::new(279, 0));
        let cam = g.add_record(0, Record::new(IdCode::CA, "Cam", StructValue::new("Camera")));
        assert_eq!(g.find(IdCode::CA, "Cam", None), Some(cam));
        assert_eq!(g.find_in(0, IdCode::CA, "Cam"), Some(cam));
        assert_eq!(g.find(IdCode::CA, "Other", None), None);
        assert!(g.remove_record(cam).is_some());
        assert!(g.record(cam).is_none());
        assert!(g.primary().is_empty());
    }

    #[test]
    fn test_split_join_round_trip() {
        let mut g = Graph::new(FileVersion::new(279, 0));
        let lib_a = library(&mut g, "a.blend");
        let lib_b = library(&mut g, "b.blend");
        let ns_a = g.add_namespace(lib_a, FileVersion::new(270, 1));
        let ns_b = g.add_namespace(lib_b, FileVersion::new(278, 4));

        g.add_record(0, Record::new(IdCode::SC, "Main", StructValue::new("Scene")));
        g.add_record(ns_a, Record::new(IdCode::CA, "CamA", StructValue::new("Camera")));
        g.add_record(0, Record::new(IdCode::CA, "Local", StructValue::new("Camera")));
        g.add_record(ns_b, Record::new(IdCode::CA, "CamB", StructValue::new("Camera")));
        g.add_record(ns_a, Record::new(IdCode::OB, "Ob", StructValue::new("Object")));

        g.join();
        assert!(!g.is_split());
        let joined = snapshot(&g);
        let cams: Vec<_> = g.by_code(IdCode::CA).iter().map(|&id| g.record(id).unwrap().id.name.clone()).collect();
        assert_eq!(cams, vec!["Local", "CamA", "CamB"]);

        g.split();
        assert_eq!(g.namespaces().len(), 3);
        assert_eq!(g.namespace(1).library, Some(lib_a));
        assert_eq!(g.namespace(1).version(), FileVersion::new(270, 1));
        assert_eq!(g.namespace(2).version(), FileVersion::new(278, 4));
        assert_eq!(g.namespace(1).len(), 2);

        g.join();
        assert_eq!(snapshot(&g), joined);
    }
}
