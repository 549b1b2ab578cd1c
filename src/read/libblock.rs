//! Reading one record block and the data blocks it owns.

use std::path::Path;
use std::sync::Arc;

use super::paths::absolute_path;
use super::Session;
use crate::block::FileData;
use crate::format::IdCode;
use crate::graph::{DataBlock, DataPayload, FileVersion, IdHeader, RawData, Record, RecordId, Source, Tags};
use crate::sdna::{Ptr, StructValue, Value};
use crate::types::DirectLinker;

impl Session {
    /// Read the record at block `index` of `fd` into namespace `ns`.
    ///
    /// Reference stubs (`ID` blocks) keep only their header. Other records
    /// take the data blocks following them, which are direct linked and
    /// then dropped if nothing referenced them.
    pub(super) fn read_libblock(
        &mut self,
        fd: &FileData,
        src: Source,
        index: usize,
        ns: usize,
        tag: Tags,
    ) -> Option<RecordId> {
        let header = fd.block(index).header;
        let is_stub = header.id_code() == Some(IdCode::ID);

        let Some((ci, values)) = fd.read_struct(index) else {
            tracing::debug!(
                "{}: '{}' has no current layout, dropped",
                fd.struct_name(index).unwrap_or("?"),
                fd.block_id_name(index).unwrap_or_default()
            );
            return None;
        };
        let mut data = values.into_iter().next()?;
        let id = if self.current.struct_name(ci) == "ID" {
            std::mem::replace(&mut data, StructValue::new("ID"))
        } else {
            match data.remove("id") {
                Some(Value::Struct(s)) => s,
                _ => {
                    tracing::debug!("{} block without an ID header", self.current.struct_name(ci));
                    return None;
                }
            }
        };

        let full_name = id.string("name").unwrap_or_default();
        let code = if is_stub {
            IdCode::from_id_name(full_name.as_bytes())?
        } else {
            header.id_code()?
        };
        let flag = id.int("flag").unwrap_or(0) as i32;
        let record = Record {
            id: IdHeader {
                code,
                name: full_name.get(2..).unwrap_or("").to_string(),
                lib: None,
                tag: tag | Tags::NEED_LINK | Tags::NEW,
                users: i32::from(flag & IdHeader::FLAG_FAKEUSER != 0),
                flag,
            },
            data,
            old: header.old,
        };
        let rid = self.graph.add_record(ns, record);
        self.libmap.insert_from(header.old, src, Some(rid));
        self.resolved.insert((src, header.old));
        tracing::trace!("read {}{} ({:?}) into namespace {}", code, full_name.get(2..).unwrap_or(""), tag, ns);

        if is_stub {
            return Some(rid);
        }

        for j in fd.data_blocks_after(index) {
            self.read_data_block(fd, j);
        }
        if let Some(&t) = self.registry.get(code) {
            if let Some((rec, data)) = self.graph.parts_mut(rid) {
                let mut linker = DirectLinker::new(&mut self.datamap, data, self.packedmap.as_mut());
                (t.direct_link)(rec, &mut linker);
            }
        }
        for unused in self.datamap.prune_unused() {
            self.graph.remove_data(unused);
        }
        self.datamap.clear();
        Some(rid)
    }

    fn read_data_block(&mut self, fd: &FileData, index: usize) {
        let block = fd.block(index);
        let old = block.header.old;
        let payload = if fd.is_raw(index) {
            DataPayload::Raw(RawData {
                bytes: Arc::from(block.body.as_slice()),
                pointer_size: fd.header().pointer_size,
                endian: fd.header().endian,
            })
        } else {
            match fd.read_struct(index) {
                Some((ci, values)) => {
                    let name = self.current.struct_name(ci).to_string();
                    let id = self.graph.insert_data(DataBlock { old, struct_name: name, payload: DataPayload::Structs(values) });
                    self.datamap.insert(old, Some(id));
                    return;
                }
                None => {
                    tracing::trace!("data block of removed struct {} dropped", fd.struct_name(index).unwrap_or("?"));
                    return;
                }
            }
        };
        let id = self.graph.insert_data(DataBlock { old, struct_name: String::new(), payload });
        self.datamap.insert(old, Some(id));
    }

    /// Read a library record from the primary document and open its
    /// namespace. Returns the namespace index.
    ///
    /// A second library with the same resolved path is merged into the
    /// first one.
    pub(super) fn direct_link_library(&mut self, fd: &FileData, index: usize) -> Option<usize> {
        let rid = self.read_libblock(fd, Source::Primary, index, 0, Tags::LOCAL)?;
        let name = self.graph.record(rid)?.data.string("name").unwrap_or_default();
        let filepath = self.resolver.resolve(&name, fd.relabase());

        let existing = self.graph.libraries().into_iter().find(|&other| {
            other != rid
                && self
                    .graph
                    .record(other)
                    .and_then(|r| r.data.string("filepath"))
                    .is_some_and(|p| p == filepath)
        });
        if let Some(other) = existing {
            self.reports.warning(format!(
                "Library '{}', '{}' had multiple instances, save and reload!",
                name, filepath
            ));
            self.libmap.redirect(rid, other);
            self.graph.remove_record(rid);
            return self.graph.namespace_index(Some(other));
        }

        let rec = self.graph.record_mut(rid)?;
        rec.data.set_string("filepath", &filepath);
        rec.data.set_ptr("parent", Ptr::Null);
        let version = self.graph.primary().version();
        Some(self.graph.add_namespace(rid, version))
    }

    /// Library namespace for `lib_path` as referenced from `relabase`,
    /// creating it when needed. A path naming the primary document itself
    /// returns [`Source::Primary`].
    pub(super) fn find_main(&mut self, lib_path: &str, relabase: &Path, version: FileVersion) -> Source {
        let filepath = self.resolver.resolve(lib_path, relabase);
        if let Some(base) = &self.basepath {
            if absolute_path(&base.to_string_lossy(), Path::new("")) == filepath {
                return Source::Primary;
            }
        }
        if let Some(lib) = self.graph.find_library(&filepath) {
            return Source::Library(lib);
        }

        let mut data = match self.current.struct_index("Library") {
            Some(si) => StructValue::zeroed(&self.current, si),
            None => StructValue::new("Library"),
        };
        data.remove("id");
        data.set_string("name", lib_path);
        data.set_string("filepath", &filepath);
        let label = Path::new(&filepath)
            .file_name()
            .map_or_else(|| "lib".to_string(), |n| n.to_string_lossy().into_owned());
        let mut record = Record::new(IdCode::LI, label, data);
        record.id.tag = Tags::INDIRECT;
        let lib = self.graph.add_record(0, record);
        self.graph.add_namespace(lib, version);
        tracing::debug!("added new library {}", filepath);
        Source::Library(lib)
    }

    /// Stand-in for a record that could not be found.
    pub(super) fn create_placeholder(&mut self, ns: usize, code: IdCode, name: &str, tag: Tags) -> RecordId {
        let data = self
            .registry
            .get(code)
            .and_then(|t| self.current.struct_index(t.struct_name))
            .map(|si| {
                let mut s = StructValue::zeroed(&self.current, si);
                s.remove("id");
                s
            })
            .unwrap_or_else(|| StructValue::new("ID"));
        let mut record = Record::new(code, name, data);
        record.id.tag = tag | Tags::MISSING;
        self.graph.add_record(ns, record)
    }

    /// Bytes of a library packed into the primary document.
    pub(super) fn packed_library(&self, lib: RecordId) -> Option<Arc<[u8]>> {
        let pf = self.graph.record(lib)?.data.ptr("packedfile")?.data()?;
        let payload = self.graph.data_block(pf)?.structs()?.first()?.ptr("data")?.data()?;
        Some(self.graph.data_block(payload)?.raw()?.bytes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::testutil::{DocWriter, Layout};

    #[test]
    fn test_duplicate_library_is_merged() {
        let mut w = DocWriter::current(Layout::native());
        w.glob(0);
        w.library(0x100, "a", "//lib.blend");
        w.id_stub(0x200, "CACam");
        w.library(0x300, "b", "//./lib.blend");
        w.id_stub(0x400, "CALens");
        let bytes = w.finish();

        let r = load_from_bytes(bytes, &LoadOptions::default()).unwrap();
        assert_eq!(r.graph.libraries().len(), 1);
        assert!(r
            .reports
            .iter()
            .any(|rep| rep.message.contains("had multiple instances")));
        // Both stubs were queued in the single namespace; the library is absent.
        assert!(r.reports.iter().any(|rep| rep.message.contains("Cannot find lib")));
        let lib = r.graph.libraries()[0];
        assert!(r.graph.find(IdCode::CA, "Cam", Some(lib)).unwrap() != r.graph.find(IdCode::CA, "Lens", Some(lib)).unwrap());
    }

    #[test]
    fn test_unreferenced_data_is_freed() {
        let mut w = DocWriter::current(Layout::native());
        w.glob(0);
        w.camera(0x1000, "Cam", 35.0);
        w.raw_block(crate::format::DATA, 0x1100, 0, 4, &[1, 2, 3, 4]);
        let bytes = w.finish();
        let r = load_from_bytes(bytes, &LoadOptions::default()).unwrap();
        assert_eq!(r.graph.record_count(), 1);
        assert_eq!(r.graph.data_count(), 0);
    }
}
