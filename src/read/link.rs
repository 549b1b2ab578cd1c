//! Cross linking and on-demand library linking.

use std::path::Path;
use std::sync::Arc;

use super::paths::{explode_library_path, relative_path};
use super::{LoadResult, Session};
use crate::block::FileData;
use crate::format::IdCode;
use crate::graph::{Graph, RecordId, Source, Tags};
use crate::options::{LinkFlags, LoadOptions};
use crate::sdna::Ptr;
use crate::types::{Registry, Usage};
use crate::util::{Error, Result};

impl Session {
    /// Swap old addresses in every link-tagged record for record handles
    /// and count users.
    ///
    /// Lookups are scoped to the document the record came from. Addresses
    /// with no record become null.
    pub(super) fn link_all(&mut self) {
        let ids: Vec<RecordId> = self
            .graph
            .iter()
            .filter(|(_, r)| r.tag().contains(Tags::NEED_LINK))
            .map(|(id, _)| id)
            .collect();

        let mut uses: Vec<(RecordId, Usage)> = Vec::new();
        let mut unresolved = 0usize;
        for id in ids {
            let Some((rec, data)) = self.graph.parts_mut(id) else { continue };
            rec.id.tag.remove(Tags::NEED_LINK);
            let Some(t) = self.registry.get(rec.id.code) else { continue };
            let src = Source::from_lib(rec.id.lib);
            let libmap = &self.libmap;
            (t.foreach_ref)(rec, data, &mut |p, usage| {
                if let Ptr::Old(old) = *p {
                    *p = match libmap.lookup_library(old, Some(src)) {
                        Some(target) => {
                            uses.push((target, usage));
                            Ptr::Id(target)
                        }
                        None => {
                            unresolved += 1;
                            Ptr::Null
                        }
                    };
                }
            });
        }

        for (target, usage) in uses {
            let Some(r) = self.graph.record_mut(target) else { continue };
            match usage {
                Usage::User => r.id.users += 1,
                Usage::RealUser => r.id.users = r.id.users.max(1),
                Usage::NoUser => {}
            }
        }
        if unresolved > 0 {
            tracing::debug!("{} references left unresolved", unresolved);
        }
    }

    /// Re-express `//` library names relative to the primary document.
    pub(super) fn fix_relpaths(&mut self) {
        let Some(base) = self.basepath.clone() else { return };
        if base.as_os_str().is_empty() {
            return;
        }
        for lib in self.graph.libraries() {
            let Some(r) = self.graph.record_mut(lib) else { continue };
            let name = r.data.string("name").unwrap_or_default();
            if !name.starts_with(super::RELATIVE_PREFIX) {
                continue;
            }
            let filepath = r.data.string("filepath").unwrap_or_default();
            let rel = relative_path(&filepath, &base);
            r.data.set_string("name", &rel);
        }
    }

    /// Register library records already in the graph so linking reuses
    /// them instead of reading them again.
    fn seed_existing(&mut self) {
        for ns in self.graph.namespaces().iter().skip(1) {
            let src = ns.source();
            for id in ns.iter() {
                let Some(r) = self.graph.record(id) else { continue };
                if r.old != 0 {
                    self.libmap.insert_from(r.old, src, Some(id));
                    self.resolved.insert((src, r.old));
                }
            }
        }
    }

    pub(super) fn link_globals(&mut self) {
        let libmap = &self.libmap;
        if let Some(g) = self.globals.as_mut() {
            g.curscene = libmap.lookup_library(g.curscene_old, Some(Source::Primary));
        }
    }
}

/// An open library linking operation into an existing graph.
///
/// Named records are read with [`link_named_part`](Self::link_named_part);
/// [`end`](Self::end) expands and cross links everything they reference.
#[derive(Debug)]
pub struct LibraryLink {
    session: Session,
    lib: RecordId,
    fd: Arc<FileData>,
}

impl LibraryLink {
    /// Open `path` for linking into `graph`.
    pub fn begin(graph: Graph, path: impl AsRef<Path>, options: LoadOptions) -> Result<Self> {
        let path = path.as_ref();
        let mut session = Session::new(options)?;
        session.graph = graph;
        session.graph.split();
        session.seed_existing();

        let stored = path.to_string_lossy().into_owned();
        let version = session.graph.primary().version();
        let Source::Library(lib) = session.find_main(&stored, Path::new(""), version) else {
            return Err(Error::other(format!("cannot link from the primary document: {}", path.display())));
        };

        let filepath = session
            .graph
            .record(lib)
            .and_then(|r| r.data.string("filepath"))
            .unwrap_or(stored);
        let stream = session.resolver.open(Path::new(&filepath), &session.options)?;
        let mut fd = FileData::open(stream, filepath.as_str(), session.current.clone())?;
        if let Some(msg) = fd.take_corruption() {
            session.reports.error(format!("{}: {}", filepath, msg));
        }
        if let Some(ns) = session.graph.namespace_index(Some(lib)) {
            session.graph.namespace_mut(ns).settle_version(fd.read_file_version());
        }
        if let Some(r) = session.graph.record_mut(lib) {
            r.id.tag.remove(Tags::MISSING);
        }
        let fd = Arc::new(fd);
        session.files.insert(Source::Library(lib), fd.clone());
        tracing::info!("linking from {}", filepath);
        Ok(Self { session, lib, fd })
    }

    /// Library record being linked from.
    pub fn library(&self) -> RecordId {
        self.lib
    }

    /// Read one record by type and name.
    ///
    /// A record already read is returned as is; unless `force_indirect` is
    /// set it becomes a direct link. Returns `None` when the record is
    /// missing and placeholders are off, or its type cannot be linked.
    pub fn link_named_part(&mut self, code: IdCode, name: &str, flags: LinkFlags) -> Option<RecordId> {
        let s = &mut self.session;
        let Some(&t) = s.registry.get(code) else {
            s.reports.warning(format!("LIB: {}: '{}' is not a known data type", code, name));
            return None;
        };
        if !t.linkable {
            s.reports.error(format!(
                "LIB: {}: '{}' is directly linked from '{}' (parent '<direct>'), but is a non-linkable data type",
                t.name,
                name,
                self.fd.relabase().display()
            ));
            return None;
        }
        let src = Source::Library(self.lib);
        let ns = s.graph.namespace_index(Some(self.lib))?;
        let tag = if flags.force_indirect { Tags::INDIRECT } else { Tags::EXTERN };

        match self.fd.find_block_by_name(code, name) {
            Some(index) => {
                let old = self.fd.block(index).header.old;
                if s.resolved.contains(&(src, old)) {
                    let id = s.libmap.lookup_library(old, Some(src))?;
                    if !flags.force_indirect {
                        if let Some(r) = s.graph.record_mut(id) {
                            if r.id.tag.contains(Tags::INDIRECT) {
                                r.id.tag.remove(Tags::INDIRECT);
                                r.id.tag.insert(Tags::EXTERN);
                            }
                        }
                    }
                    Some(id)
                } else {
                    let fd = self.fd.clone();
                    s.read_libblock(&fd, src, index, ns, tag | Tags::NEED_EXPAND)
                }
            }
            None => {
                s.reports.warning(format!(
                    "LIB: {}: '{}' missing from '{}', parent '<direct>'",
                    t.name,
                    name,
                    self.fd.relabase().display()
                ));
                flags
                    .use_placeholders
                    .then(|| s.create_placeholder(ns, code, name, tag | Tags::NEED_LINK | Tags::NEW))
            }
        }
    }

    /// Read every object and group of the library as indirect records, the
    /// way a copy buffer is pasted. Returns the records read.
    pub fn link_copy_buffer(&mut self) -> Vec<RecordId> {
        let s = &mut self.session;
        let src = Source::Library(self.lib);
        let Some(ns) = s.graph.namespace_index(Some(self.lib)) else { return Vec::new() };

        let mut out = Vec::new();
        for index in 0..self.fd.len() {
            let header = &self.fd.block(index).header;
            if !matches!(header.id_code(), Some(IdCode::OB) | Some(IdCode::GR)) {
                continue;
            }
            if s.resolved.contains(&(src, header.old)) {
                continue;
            }
            let fd = self.fd.clone();
            out.extend(s.read_libblock(&fd, src, index, ns, Tags::INDIRECT | Tags::NEED_EXPAND));
        }
        tracing::debug!("copy buffer: {} records", out.len());
        out
    }

    /// Expand, read the libraries the linked records need, then cross link.
    pub fn end(mut self) -> LoadResult {
        self.session.expand_namespace(Some(self.lib));
        self.session.read_libraries();
        self.session.link_and_split();
        self.session.into_result()
    }
}

/// Result of [`load_library_named_part`].
#[derive(Debug)]
pub struct NamedPart {
    /// The requested record, if it could be read.
    pub record: Option<RecordId>,
    pub result: LoadResult,
}

/// Read a single named record, and whatever it references, from a library
/// without loading a primary document.
pub fn load_library_named_part(path: impl AsRef<Path>, code: IdCode, name: &str) -> Result<NamedPart> {
    let mut link = LibraryLink::begin(Graph::default(), path, LoadOptions::default())?;
    let record = link.link_named_part(code, name, LinkFlags::default());
    Ok(NamedPart { record, result: link.end() })
}

/// [`load_library_named_part`] for a path into a library, such as
/// `assets/props.blend/Object/Chair`.
pub fn load_library_path(path: impl AsRef<Path>) -> Result<NamedPart> {
    let path = path.as_ref();
    let parts = explode_library_path(path)
        .ok_or_else(|| Error::other(format!("not a path into a library: {}", path.display())))?;
    let (Some(group), Some(name)) = (parts.group.as_deref(), parts.name.as_deref()) else {
        return Err(Error::other(format!("no group and name in {}", path.display())));
    };
    let code = Registry::builtin()
        .find_group(group)
        .map(|t| t.code)
        .ok_or_else(|| Error::other(format!("unknown group '{}' in {}", group, path.display())))?;
    load_library_named_part(&parts.library, code, name)
}
