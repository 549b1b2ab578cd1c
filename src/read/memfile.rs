//! Undo restore from an in-memory snapshot.
//!
//! A snapshot is read like any primary document with versioning off.
//! Packed payloads are not re-read from it: those of the previous graph are
//! copied over and matched by old address, and copies nothing claimed are
//! freed afterwards.

use super::{LoadResult, Session};
use crate::block::FileData;
use crate::graph::{DataId, Graph};
use crate::options::LoadOptions;
use crate::relocate::RelocationMap;
use crate::sdna::Ptr;
use crate::stream::{ByteStream, MemFile};
use crate::util::Result;

impl Session {
    /// Restore `memfile`, reusing packed payloads from `previous`.
    pub fn load_memfile(mut self, memfile: &MemFile, previous: Option<&Graph>) -> Result<LoadResult> {
        let _span = tracing::info_span!("undo", bytes = memfile.size()).entered();
        self.options.run_versioning = false;
        if let Some(prev) = previous {
            self.carry_packed(prev);
        }
        let fd = FileData::open(
            ByteStream::from_memfile(memfile.clone()),
            self.basepath.clone().unwrap_or_default(),
            self.current.clone(),
        )?;
        self.read_primary(fd);
        self.release_packed();
        Ok(self.finish())
    }

    /// Copy the packed file blocks (and payloads) of `prev` into the new
    /// graph, keyed by their old addresses.
    fn carry_packed(&mut self, prev: &Graph) {
        let mut map = RelocationMap::new();
        for (_, rec) in prev.iter() {
            let Some(pf) = rec.data.ptr("packedfile").and_then(|p| p.data()) else { continue };
            let Some(block) = prev.data_block(pf) else { continue };
            let mut copy = block.clone();
            let payload = block.structs().and_then(|s| s.first()).and_then(|s| s.ptr("data")).and_then(|p| p.data());
            if let Some(raw) = payload.and_then(|d| prev.data_block(d)) {
                let new_raw = self.graph.insert_data(raw.clone());
                if let Some(s) = copy.structs_mut().and_then(|s| s.first_mut()) {
                    s.set_ptr("data", Ptr::Data(new_raw));
                }
            }
            let new = self.graph.insert_data(copy);
            map.insert(block.old, Some(new));
        }
        tracing::debug!("carried {} packed files over", map.len());
        self.packedmap = Some(map);
    }

    fn release_packed(&mut self) {
        let Some(mut map) = self.packedmap.take() else { return };
        let unused = map.prune_unused();
        for id in &unused {
            self.free_packed(*id);
        }
        if !unused.is_empty() {
            tracing::debug!("freed {} unclaimed packed files", unused.len());
        }
    }

    fn free_packed(&mut self, id: DataId) {
        let payload = self
            .graph
            .data_block(id)
            .and_then(|b| b.structs())
            .and_then(|s| s.first())
            .and_then(|s| s.ptr("data"))
            .and_then(|p| p.data());
        if let Some(d) = payload {
            self.graph.remove_data(d);
        }
        self.graph.remove_data(id);
    }
}

/// Restore an undo snapshot.
pub fn load_memfile(memfile: &MemFile, previous: Option<&Graph>, options: &LoadOptions) -> Result<LoadResult> {
    Session::new(options.clone())?.load_memfile(memfile, previous)
}
