//! Load sessions.
//!
//! A [`Session`] owns everything one load needs: the registry, the
//! relocation maps, the open documents and the graph being built. The
//! pipeline is the same for every entry point:
//!
//! 1. read the primary document into namespace 0, with library records
//!    opening one namespace each and reference stubs queued there
//! 2. pre-link version rules on the primary namespace
//! 3. open libraries until no namespace has stubs left, expanding each
//! 4. join, cross link, post-link version rules, split
//!
//! Only failures to read the primary stream are errors. Everything else is
//! collected in [`Reports`].

mod expand;
mod libblock;
mod link;
mod memfile;
mod paths;
mod thumbnail;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::block::FileData;
use crate::format::{self, IdCode};
use crate::graph::{DataId, FileVersion, Graph, RecordId, Source, Tags};
use crate::options::LoadOptions;
use crate::relocate::RelocationMap;
use crate::sdna::Schema;
use crate::stream::ByteStream;
use crate::types::Registry;
use crate::util::{Reports, Result};
use crate::versioning::{self, Phase};

pub use link::{load_library_named_part, load_library_path, LibraryLink, NamedPart};
pub use memfile::load_memfile;
pub use paths::{
    absolute_path, explode_library_path, has_document_extension, relative_path, DefaultResolver, LibraryPath,
    PathResolver, RELATIVE_PREFIX,
};
pub use thumbnail::{extract_thumbnail, extract_thumbnail_from, Thumbnail};

/// Document-wide settings from the `GLOB` block.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FileGlobals {
    pub version: FileVersion,
    pub minversion: u16,
    pub minsubversion: u16,
    pub fileflags: i32,
    pub globalf: i32,
    /// Path the document was saved as.
    pub filename: String,
    /// Active scene, once linked.
    #[serde(skip)]
    pub curscene: Option<RecordId>,
    #[serde(skip)]
    curscene_old: u64,
}

/// Everything a load produces.
#[derive(Debug)]
pub struct LoadResult {
    /// Split graph: the primary namespace, then one per library.
    pub graph: Graph,
    pub reports: Reports,
    pub globals: Option<FileGlobals>,
    /// Raw preferences block, unless skipped.
    pub user_prefs: Option<Vec<u8>>,
}

impl LoadResult {
    /// Whether any record could not be found and was stood in for.
    pub fn has_placeholders(&self) -> bool {
        self.graph
            .missing()
            .into_iter()
            .any(|id| self.graph.record(id).is_some_and(|r| r.code() != IdCode::LI))
    }
}

/// Load a document from disk with default options.
pub fn load_primary(path: impl AsRef<Path>) -> Result<LoadResult> {
    load_primary_with(path, &LoadOptions::default())
}

pub fn load_primary_with(path: impl AsRef<Path>, options: &LoadOptions) -> Result<LoadResult> {
    Session::new(options.clone())?.load_path(path)
}

/// Load a document held in memory. Relative library paths resolve against
/// the working directory.
pub fn load_from_bytes(bytes: impl Into<Arc<[u8]>>, options: &LoadOptions) -> Result<LoadResult> {
    Session::new(options.clone())?.load_stream(ByteStream::from_bytes(bytes), None)
}

/// State of one load.
pub struct Session {
    options: LoadOptions,
    registry: Registry,
    resolver: Box<dyn PathResolver>,
    current: Arc<Schema>,
    graph: Graph,
    reports: Reports,
    /// Open documents by source.
    files: HashMap<Source, Arc<FileData>>,
    /// Libraries that failed to open.
    failed: HashSet<RecordId>,
    /// Records by (old address, source document).
    libmap: RelocationMap<RecordId>,
    /// Owned blocks of the record being read.
    datamap: RelocationMap<DataId>,
    /// Packed payloads carried over from the previous graph on undo.
    packedmap: Option<RelocationMap<DataId>>,
    /// Addresses already read, per source.
    resolved: HashSet<(Source, u64)>,
    basepath: Option<PathBuf>,
    globals: Option<FileGlobals>,
    user_prefs: Option<Vec<u8>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("options", &self.options)
            .field("basepath", &self.basepath)
            .field("files", &self.files.len())
            .field("records", &self.graph.record_count())
            .finish()
    }
}

impl Session {
    pub fn new(options: LoadOptions) -> Result<Self> {
        Ok(Self {
            options,
            registry: Registry::builtin(),
            resolver: Box::new(DefaultResolver),
            current: Schema::current()?,
            graph: Graph::default(),
            reports: Reports::new(),
            files: HashMap::new(),
            failed: HashSet::new(),
            libmap: RelocationMap::new(),
            datamap: RelocationMap::new(),
            packedmap: None,
            resolved: HashSet::new(),
            basepath: None,
            globals: None,
            user_prefs: None,
        })
    }

    /// Use a custom type table.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Use a custom library resolver.
    pub fn with_resolver(mut self, resolver: impl PathResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    pub fn load_path(self, path: impl AsRef<Path>) -> Result<LoadResult> {
        let path = path.as_ref();
        let stream = self.resolver.open(path, &self.options)?;
        self.load_stream(stream, Some(path.to_path_buf()))
    }

    /// Load from an open stream. `basepath` is the document's own path, used
    /// for `//`-relative libraries.
    pub fn load_stream(mut self, stream: ByteStream, basepath: Option<PathBuf>) -> Result<LoadResult> {
        let _span = tracing::info_span!("load", path = ?basepath).entered();
        let fd = FileData::open(stream, basepath.clone().unwrap_or_default(), self.current.clone())?;
        self.basepath = basepath;
        self.read_primary(fd);
        Ok(self.finish())
    }

    fn source_name(&self) -> String {
        self.basepath
            .as_ref()
            .map_or_else(|| "<memory>".to_string(), |p| p.display().to_string())
    }

    /// Read every top-level block of the primary document.
    fn read_primary(&mut self, mut fd: FileData) {
        if let Some(msg) = fd.take_corruption() {
            self.reports.error(format!("{}: {}", self.source_name(), msg));
        }
        let fd = Arc::new(fd);
        self.graph.namespace_mut(0).settle_version(fd.read_file_version());
        self.files.insert(Source::Primary, fd.clone());

        // Stubs belong to the most recent library block.
        let mut lib_ns = None;
        for i in 0..fd.len() {
            let header = fd.block(i).header;
            match header.code {
                format::GLOB => self.globals = read_globals(&fd, i),
                format::USER => {
                    if !self.options.skip_userdef {
                        self.user_prefs = Some(fd.block(i).body.clone());
                    }
                }
                format::DATA | format::DNA1 | format::REND | format::TEST => {}
                _ if self.options.skip_data => {}
                _ => match header.id_code() {
                    Some(IdCode::LI) => lib_ns = self.direct_link_library(&fd, i),
                    Some(IdCode::ID) => match lib_ns {
                        Some(ns) => {
                            self.read_libblock(&fd, Source::Primary, i, ns, Tags::STUB | Tags::EXTERN);
                        }
                        None => self.reports.warning(format!(
                            "{}: reference '{}' precedes any library",
                            self.source_name(),
                            fd.block_id_name(i).unwrap_or_default()
                        )),
                    },
                    Some(code) if self.registry.get(code).is_some() => {
                        self.read_libblock(&fd, Source::Primary, i, 0, Tags::LOCAL);
                    }
                    Some(code) => tracing::debug!("skipping unregistered record type {}", code),
                    None => tracing::trace!("skipping block {}", format::code_str(&header.code)),
                },
            }
        }
        tracing::debug!(
            "primary: {} records, {} libraries",
            self.graph.primary().len(),
            self.graph.libraries().len()
        );
    }

    fn finish(mut self) -> LoadResult {
        if self.options.run_versioning {
            versioning::upgrade_namespace(&mut self.graph, &self.registry, 0, Phase::PreLink);
        }
        self.read_libraries();
        self.link_and_split();
        self.into_result()
    }

    /// Join, resolve cross references, run post-link rules and split again.
    fn link_and_split(&mut self) {
        self.graph.join();
        self.libmap.sort();
        self.link_all();
        if self.options.run_versioning {
            versioning::upgrade_all(&mut self.graph, &self.registry, Phase::PostLink);
        }
        self.clear_new_tags();
        self.graph.split();
        self.fix_relpaths();
        self.link_globals();
    }

    fn clear_new_tags(&mut self) {
        let ids: Vec<RecordId> = self.graph.iter().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(r) = self.graph.record_mut(id) {
                r.id.tag.remove(Tags::NEW);
            }
        }
    }

    fn into_result(self) -> LoadResult {
        tracing::info!(
            "loaded {} records in {} namespaces, {} reports",
            self.graph.record_count(),
            self.graph.namespaces().len(),
            self.reports.len()
        );
        LoadResult {
            graph: self.graph,
            reports: self.reports,
            globals: self.globals,
            user_prefs: self.user_prefs,
        }
    }
}

fn read_globals(fd: &FileData, index: usize) -> Option<FileGlobals> {
    let (_, values) = fd.read_struct(index)?;
    let g = values.into_iter().next()?;
    let short = |name: &str| g.int(name).unwrap_or(0).clamp(0, u16::MAX as i64) as u16;
    Some(FileGlobals {
        version: FileVersion::new(fd.header().version, short("subversion")),
        minversion: short("minversion"),
        minsubversion: short("minsubversion"),
        fileflags: g.int("fileflags").unwrap_or(0) as i32,
        globalf: g.int("globalf").unwrap_or(0) as i32,
        filename: g.string("filename").unwrap_or_default(),
        curscene: None,
        curscene_old: g.ptr("curscene").and_then(|p| p.old()).unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{DocWriter, Layout};
    use crate::util::Severity;

    fn load(bytes: Vec<u8>) -> LoadResult {
        load_from_bytes(bytes, &LoadOptions::default()).unwrap()
    }

    #[test]
    fn test_local_records() {
        let mut w = DocWriter::current(Layout::native());
        w.glob(2);
        let cam = w.camera(0x1000, "Cam", 50.0);
        w.object(0x2000, "Ob", cam);
        let bytes = w.finish();

        let r = load(bytes);
        assert!(r.reports.is_empty(), "{:?}", r.reports);
        assert!(!r.graph.is_split());
        let cam = r.graph.find(IdCode::CA, "Cam", None).unwrap();
        let ob = r.graph.find(IdCode::OB, "Ob", None).unwrap();
        assert_eq!(r.graph.record(ob).unwrap().data.ptr("data"), Some(crate::sdna::Ptr::Id(cam)));
        assert_eq!(r.graph.record(cam).unwrap().id.users, 1);
        assert_eq!(r.globals.unwrap().version, FileVersion::new(279, 2));
        for (_, rec) in r.graph.iter() {
            assert!(!rec.tag().intersects(Tags::NEW | Tags::NEED_LINK | Tags::NEED_EXPAND));
        }
    }

    #[test]
    fn test_curscene_and_userdef() {
        let mut w = DocWriter::current(Layout::native());
        w.glob_with_scene(0, 0x3000);
        w.raw_block(format::USER, 0, 0, 1, &[7u8; 12]);
        w.scene(0x3000, "Scene", &[]);
        let bytes = w.finish();

        let r = load(bytes.clone());
        let sc = r.graph.find(IdCode::SC, "Scene", None);
        assert!(sc.is_some());
        assert_eq!(r.globals.as_ref().unwrap().curscene, sc);
        assert_eq!(r.user_prefs.as_deref(), Some(&[7u8; 12][..]));

        let r = load_from_bytes(bytes, &LoadOptions::new().with_skip_userdef(true).with_skip_data(true)).unwrap();
        assert!(r.user_prefs.is_none());
        assert_eq!(r.graph.record_count(), 0);
        assert!(r.globals.is_some());
    }

    #[test]
    fn test_truncated_stream_keeps_prefix() {
        let mut w = DocWriter::current(Layout::native());
        w.glob(0);
        w.camera(0x1000, "Cam", 35.0);
        w.raw_header(format::DATA, 4096, 0x5000, 0, 1);
        let bytes = w.finish_without_schema();
        // No schema block at all: fatal.
        assert!(load_from_bytes(bytes, &LoadOptions::default()).is_err());

        let mut w = DocWriter::current(Layout::native());
        w.glob(0);
        w.schema_block();
        w.camera(0x1000, "Cam", 35.0);
        w.raw_header(format::DATA, 4096, 0x5000, 0, 1);
        let bytes = w.into_bytes();
        let r = load(bytes);
        assert!(r.graph.find(IdCode::CA, "Cam", None).is_some());
        assert_eq!(r.reports.count(Severity::Error), 1);
    }

    #[test]
    fn test_unregistered_types_are_skipped() {
        let mut w = DocWriter::current(Layout::native());
        w.glob(0);
        w.camera(0x1000, "Cam", 35.0);
        let reg = {
            let mut r = Registry::empty();
            r.register(*Registry::builtin().get(IdCode::OB).unwrap());
            r
        };
        let bytes = w.finish();
        let r = Session::new(LoadOptions::default())
            .unwrap()
            .with_registry(reg)
            .load_stream(ByteStream::from_bytes(bytes), None)
            .unwrap();
        assert_eq!(r.graph.record_count(), 0);
    }
}
