//! Library reading and reference expansion.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use super::Session;
use crate::block::FileData;
use crate::format::IdCode;
use crate::graph::{RecordId, Source, Tags};
use crate::sdna::Ptr;
use crate::stream::ByteStream;
use crate::versioning::{self, Phase};

impl Session {
    /// Read every record reachable from the expand-tagged records of a
    /// namespace, breadth first.
    pub(super) fn expand_namespace(&mut self, lib: Option<RecordId>) {
        let Some(ns) = self.graph.namespace_index(lib) else { return };
        let mut queue: VecDeque<RecordId> = self
            .graph
            .namespace(ns)
            .iter()
            .filter(|&id| self.graph.record(id).is_some_and(|r| r.tag().contains(Tags::NEED_EXPAND)))
            .collect();

        let mut expanded = 0usize;
        while let Some(id) = queue.pop_front() {
            let Some(src) = self.graph.record(id).map(|r| Source::from_lib(r.id.lib)) else { continue };
            let refs = self.collect_refs(id);
            let Some(fd) = self.files.get(&src).cloned() else { continue };
            for old in refs {
                if let Some(next) = self.expand_doit(&fd, src, lib, old) {
                    queue.push_back(next);
                }
            }
            expanded += 1;
        }
        tracing::debug!("expanded {} records in namespace {}", expanded, ns);
    }

    /// Old addresses referenced by a record. Clears its expand tag.
    fn collect_refs(&mut self, id: RecordId) -> Vec<u64> {
        let Some((rec, data)) = self.graph.parts_mut(id) else { return Vec::new() };
        rec.id.tag.remove(Tags::NEED_EXPAND);
        let Some(t) = self.registry.get(rec.id.code) else { return Vec::new() };
        let mut out = Vec::new();
        (t.foreach_ref)(rec, data, &mut |p, _| {
            if let Some(old) = p.old() {
                out.push(old);
            }
        });
        out
    }

    /// Read the block a reference points at, if not read yet.
    ///
    /// A reference to a stub pulls the stub into the namespace of the
    /// library it names; that namespace is then handled by the next round
    /// of [`read_libraries`](Self::read_libraries). Returns a newly read
    /// record that needs expanding itself.
    fn expand_doit(&mut self, fd: &Arc<FileData>, src: Source, lib: Option<RecordId>, old: u64) -> Option<RecordId> {
        let index = fd.find_block(old)?;
        let code = fd.block(index).header.id_code()?;

        if code == IdCode::ID {
            let li = fd.find_previous_lib(index)?;
            let lib_path = fd.read_struct(li)?.1.into_iter().next()?.string("name")?;
            match self.find_main(&lib_path, fd.relabase(), fd.read_file_version()) {
                Source::Primary => {
                    self.reports.warning(format!(
                        "LIB: Data refers to main .blend file: '{}' from {}",
                        lib_path,
                        fd.relabase().display()
                    ));
                }
                Source::Library(target) => {
                    if !self.resolved.contains(&(src, old)) {
                        let ns = self.graph.namespace_index(Some(target))?;
                        self.read_libblock(fd, src, index, ns, Tags::STUB | Tags::INDIRECT);
                        if let Some(parent) = lib.filter(|&l| l != target) {
                            if let Some(t) = self.graph.record_mut(target) {
                                if t.data.ptr("parent").is_some_and(|p| p.is_null()) {
                                    t.data.set_ptr("parent", Ptr::Id(parent));
                                }
                            }
                        }
                    }
                }
            }
            return None;
        }

        if self.registry.get(code).is_none() || self.resolved.contains(&(src, old)) {
            return None;
        }
        let ns = self.graph.namespace_index(lib)?;
        self.read_libblock(fd, src, index, ns, Tags::NEED_EXPAND | Tags::INDIRECT)
    }

    /// Resolve stubs until no library namespace has any left.
    ///
    /// Libraries that cannot be opened get their stubs replaced by
    /// placeholders. Pre-link version rules run on each library namespace
    /// at the end.
    pub(super) fn read_libraries(&mut self) {
        let mut round = 0;
        loop {
            let pending: Vec<(RecordId, Vec<RecordId>)> = self
                .graph
                .namespaces()
                .iter()
                .skip(1)
                .filter_map(|ns| {
                    let lib = ns.library?;
                    let stubs: Vec<RecordId> = ns
                        .iter()
                        .filter(|&id| self.graph.record(id).is_some_and(|r| r.tag().contains(Tags::STUB)))
                        .collect();
                    (!stubs.is_empty()).then_some((lib, stubs))
                })
                .collect();
            if pending.is_empty() {
                break;
            }
            round += 1;
            tracing::debug!("library round {}: {} libraries with stubs", round, pending.len());
            for (lib, stubs) in pending {
                self.read_library(lib, stubs);
            }
        }

        if self.options.run_versioning {
            for ns in 1..self.graph.namespaces().len() {
                versioning::upgrade_namespace(&mut self.graph, &self.registry, ns, Phase::PreLink);
            }
        }
    }

    fn read_library(&mut self, lib: RecordId, stubs: Vec<RecordId>) {
        let _span = tracing::debug_span!("library", name = %self.library_path(lib)).entered();
        let src = Source::Library(lib);
        let fd = match self.files.get(&src) {
            Some(fd) => Some(fd.clone()),
            None if self.failed.contains(&lib) => None,
            None => self.open_library(lib),
        };
        let Some(ns) = self.graph.namespace_index(Some(lib)) else { return };
        let parent = self.parent_name(lib);
        let lib_path = self.library_path(lib);

        for stub in stubs {
            let Some((code, name, tag)) = self.graph.record(stub).map(|r| (r.id.code, r.id.name.clone(), r.id.tag)) else {
                continue;
            };
            let type_name = self.registry.type_name(code);
            let linkable = self.registry.get(code).map_or(true, |t| t.linkable);
            let valid = linkable || !tag.contains(Tags::EXTERN);
            if !valid {
                self.reports.error(format!(
                    "LIB: {}: '{}' is directly linked from '{}' (parent '{}'), but is a non-linkable data type",
                    type_name, name, lib_path, parent
                ));
            }

            let mut tag = tag;
            tag.remove(Tags::STUB | Tags::NEED_LINK | Tags::NEW);
            let found = fd.as_ref().and_then(|fd| fd.find_block_by_name(code, &name).map(|i| (fd.clone(), i)));
            let real = match found {
                Some((fd, index)) => {
                    let old = fd.block(index).header.old;
                    if self.resolved.contains(&(src, old)) {
                        self.libmap.lookup_library(old, Some(src))
                    } else {
                        self.read_libblock(&fd, src, index, ns, tag | Tags::NEED_EXPAND)
                    }
                }
                None => {
                    self.reports.warning(format!(
                        "LIB: {}: '{}' missing from '{}', parent '{}'",
                        type_name, name, lib_path, parent
                    ));
                    (valid && self.options.use_placeholders)
                        .then(|| self.create_placeholder(ns, code, &name, tag | Tags::NEED_LINK | Tags::NEW))
                }
            };
            match real {
                Some(real) => self.libmap.redirect(stub, real),
                None => self.libmap.forget(stub),
            }
            self.graph.remove_record(stub);
        }

        self.expand_namespace(Some(lib));
    }

    /// Open a library's document, from its packed copy when present.
    fn open_library(&mut self, lib: RecordId) -> Option<Arc<FileData>> {
        let filepath = self.library_path(lib);
        let name = self.graph.record(lib).and_then(|r| r.data.string("name")).unwrap_or_default();
        let parent = self.parent_name(lib);

        let stream = match self.packed_library(lib) {
            Some(bytes) => {
                self.reports.info(format!("Read packed library:  '{}', parent '{}'", name, parent));
                Ok(ByteStream::from_bytes(bytes))
            }
            None => {
                self.reports.info(format!("Read library:  '{}', '{}', parent '{}'", filepath, name, parent));
                self.resolver.open(Path::new(&filepath), &self.options)
            }
        };

        let ns = self.graph.namespace_index(Some(lib));
        match stream.and_then(|s| FileData::open(s, filepath.as_str(), self.current.clone())) {
            Ok(mut fd) => {
                if let Some(msg) = fd.take_corruption() {
                    self.reports.error(format!("{}: {}", filepath, msg));
                }
                if let Some(ns) = ns {
                    self.graph.namespace_mut(ns).settle_version(fd.read_file_version());
                }
                let fd = Arc::new(fd);
                self.files.insert(Source::Library(lib), fd.clone());
                Some(fd)
            }
            Err(e) => {
                tracing::debug!("{}: {}", filepath, e);
                self.reports.warning(format!("Cannot find lib '{}'", filepath));
                if let Some(r) = self.graph.record_mut(lib) {
                    r.id.tag.insert(Tags::MISSING);
                }
                self.failed.insert(lib);
                None
            }
        }
    }

    fn library_path(&self, lib: RecordId) -> String {
        self.graph
            .record(lib)
            .and_then(|r| r.data.string("filepath"))
            .unwrap_or_default()
    }

    /// Path of the library that first referenced `lib`, or `<direct>`.
    fn parent_name(&self, lib: RecordId) -> String {
        self.graph
            .record(lib)
            .and_then(|r| r.data.ptr("parent"))
            .and_then(|p| p.id())
            .map_or_else(|| "<direct>".to_string(), |p| self.library_path(p))
    }
}
