//! Per-type capability records.
//!
//! Each record type registers one [`IdType`] row: how its owned blocks are
//! relocated right after reading (direct link), which of its fields
//! reference other records (walked for expansion and cross linking) and
//! its version rules. Every pass consumes the same [`Registry`].

mod camera;
mod library;
mod mesh;
mod object;
mod scene;

use std::fmt;

use crate::format::IdCode;
use crate::graph::{DataBlock, DataId, DataPayload, Record};
use crate::relocate::RelocationMap;
use crate::sdna::{Ptr, StructValue};
use crate::util::Arena;
use crate::versioning::VersionRule;

/// How a cross reference counts towards the target's users.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Usage {
    /// Increments the user count.
    User,
    /// Guarantees at least one real user.
    RealUser,
    /// Does not count.
    NoUser,
}

/// Walks every reference from a record (and its owned data) to other records.
pub type RefWalker = fn(&mut Record, &mut Arena<DataBlock>, &mut dyn FnMut(&mut Ptr, Usage));

/// Relocates the owned blocks of a freshly read record.
pub type DirectLink = fn(&mut Record, &mut DirectLinker<'_>);

/// Capability row of one record type.
#[derive(Clone, Copy)]
pub struct IdType {
    pub code: IdCode,
    /// Human-readable type name used in reports.
    pub name: &'static str,
    /// Current-layout struct the record decodes to.
    pub struct_name: &'static str,
    /// Can be linked from another document.
    pub linkable: bool,
    pub direct_link: DirectLink,
    pub foreach_ref: RefWalker,
    pub rules: &'static [VersionRule],
}

impl fmt::Debug for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdType")
            .field("code", &self.code)
            .field("name", &self.name)
            .field("struct_name", &self.struct_name)
            .field("linkable", &self.linkable)
            .field("rules", &self.rules.len())
            .finish()
    }
}

/// Table of known record types.
#[derive(Clone, Debug)]
pub struct Registry {
    types: Vec<IdType>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self { types: Vec::new() }
    }

    /// Every type this crate knows how to link.
    pub fn builtin() -> Self {
        let mut r = Self::empty();
        for t in [
            library::LIBRARY,
            scene::SCENE,
            object::OBJECT,
            object::GROUP,
            camera::CAMERA,
            camera::LAMP,
            camera::WORLD,
            mesh::MESH,
            mesh::MATERIAL,
            library::IMAGE,
        ] {
            r.register(t);
        }
        r
    }

    /// Add a type, replacing any row with the same code.
    pub fn register(&mut self, t: IdType) {
        match self.types.iter_mut().find(|x| x.code == t.code) {
            Some(slot) => *slot = t,
            None => self.types.push(t),
        }
    }

    pub fn get(&self, code: IdCode) -> Option<&IdType> {
        self.types.iter().find(|t| t.code == code)
    }

    /// Report name of a type, falling back to the code.
    pub fn type_name(&self, code: IdCode) -> String {
        self.get(code).map_or_else(|| code.to_string(), |t| t.name.to_string())
    }

    /// Type for a library path group: the type name (`Object`) or its code
    /// (`OB`).
    pub fn find_group(&self, group: &str) -> Option<&IdType> {
        self.types.iter().find(|t| t.name == group || t.code.as_str() == group)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IdType> {
        self.types.iter()
    }
}

/// Resolves old addresses of owned blocks for one record.
pub struct DirectLinker<'a> {
    map: &'a mut RelocationMap<DataId>,
    data: &'a mut Arena<DataBlock>,
    packed: Option<&'a mut RelocationMap<DataId>>,
}

impl<'a> DirectLinker<'a> {
    pub fn new(
        map: &'a mut RelocationMap<DataId>,
        data: &'a mut Arena<DataBlock>,
        packed: Option<&'a mut RelocationMap<DataId>>,
    ) -> Self {
        Self { map, data, packed }
    }

    fn resolve(&mut self, p: Ptr) -> Ptr {
        match p {
            Ptr::Old(a) => self.map.lookup_data(a, true).map_or(Ptr::Null, Ptr::Data),
            other => other,
        }
    }

    /// Relocate one pointer to an owned block. Unknown addresses become null.
    pub fn relink(&mut self, p: &mut Ptr) -> Option<DataId> {
        *p = self.resolve(*p);
        p.data()
    }

    /// Relocate a pointer field of `s`.
    pub fn relink_field(&mut self, s: &mut StructValue, field: &str) -> Option<DataId> {
        let p = s.ptr_mut(field)?;
        let new = self.resolve(*p);
        *p = new;
        new.data()
    }

    pub fn block_mut(&mut self, id: DataId) -> Option<&mut DataBlock> {
        self.data.get_mut(id)
    }

    /// Relocate a pointer to an array of pointers (`Material **mat`) and
    /// decode the array. Entries keep their old addresses for cross linking.
    pub fn link_pointer_array(&mut self, s: &mut StructValue, field: &str) -> Option<DataId> {
        let id = self.relink_field(s, field)?;
        let block = self.data.get_mut(id)?;
        if let DataPayload::Raw(raw) = &block.payload {
            let ptrs = raw.pointers().into_iter().map(Ptr::from_old).collect();
            block.payload = DataPayload::Pointers(ptrs);
        }
        Some(id)
    }

    /// Relocate a `ListBase` field: `first`, `last` and every element's
    /// `next`/`prev`.
    pub fn link_list(&mut self, s: &mut StructValue, field: &str) {
        let Some(list) = s.struct_mut(field) else { return };
        let first = self.relink_field(list, "first");
        self.relink_field(list, "last");

        let mut cur = first;
        let mut guard = self.map.len() + 1;
        while let Some(d) = cur {
            if guard == 0 {
                break;
            }
            guard -= 1;
            let Some((next, prev)) = self.first_struct(d).map(|it| (it.ptr("next"), it.ptr("prev"))) else {
                break;
            };
            let next = next.map(|p| self.resolve(p));
            let prev = prev.map(|p| self.resolve(p));
            if let Some(item) = self.first_struct(d) {
                if let Some(n) = next {
                    item.set_ptr("next", n);
                }
                if let Some(p) = prev {
                    item.set_ptr("prev", p);
                }
            }
            cur = next.and_then(|p| p.data());
        }
    }

    fn first_struct(&mut self, id: DataId) -> Option<&mut StructValue> {
        self.data.get_mut(id)?.structs_mut()?.first_mut()
    }

    /// Relocate a `PackedFile *` field and its payload. During undo restore
    /// payloads of the previous graph are preferred over the stream.
    pub fn relink_packed(&mut self, s: &mut StructValue, field: &str) -> Option<DataId> {
        let p = s.ptr_mut(field)?;
        if let (Ptr::Old(a), Some(packed)) = (*p, self.packed.as_deref_mut()) {
            if let Some(d) = packed.lookup_data(a, true) {
                *p = Ptr::Data(d);
                return Some(d);
            }
        }
        let id = self.relink(p)?;
        let data_old = self.first_struct(id).and_then(|pf| pf.ptr("data"));
        if let Some(old) = data_old {
            let new = self.resolve(old);
            if let Some(pf) = self.first_struct(id) {
                pf.set_ptr("data", new);
            }
        }
        Some(id)
    }
}

/// Visit a pointer field with a usage, if present.
pub(crate) fn visit(s: &mut StructValue, field: &str, usage: Usage, f: &mut dyn FnMut(&mut Ptr, Usage)) {
    if let Some(p) = s.ptr_mut(field) {
        f(p, usage);
    }
}

/// Visit every element of an owned linked list.
pub(crate) fn walk_list(data: &mut Arena<DataBlock>, first: Ptr, f: &mut dyn FnMut(&mut StructValue)) {
    let mut cur = first.data();
    let mut guard = data.len();
    while let Some(d) = cur {
        if guard == 0 {
            break;
        }
        guard -= 1;
        let Some(items) = data.get_mut(d).and_then(DataBlock::structs_mut) else { break };
        let mut next = None;
        for item in items.iter_mut() {
            f(item);
            next = item.ptr("next");
        }
        cur = next.and_then(|p| p.data());
    }
}

/// Visit every entry of an owned pointer array.
pub(crate) fn walk_pointer_array(
    data: &mut Arena<DataBlock>,
    array: Option<Ptr>,
    usage: Usage,
    f: &mut dyn FnMut(&mut Ptr, Usage),
) {
    let block = array.and_then(|p| p.data()).and_then(|d| data.get_mut(d));
    if let Some(ptrs) = block.and_then(DataBlock::pointers_mut) {
        for p in ptrs {
            f(p, usage);
        }
    }
}

fn no_direct_link(_: &mut Record, _: &mut DirectLinker<'_>) {}

fn no_refs(_: &mut Record, _: &mut Arena<DataBlock>, _: &mut dyn FnMut(&mut Ptr, Usage)) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Endian;
    use crate::graph::RawData;
    use crate::sdna::Schema;
    use std::sync::Arc;

    fn zeroed(name: &str) -> StructValue {
        let schema = Schema::current().unwrap();
        StructValue::zeroed(&schema, schema.struct_index(name).unwrap())
    }

    #[test]
    fn test_builtin_registry() {
        let r = Registry::builtin();
        for code in [IdCode::LI, IdCode::SC, IdCode::OB, IdCode::CA, IdCode::LA, IdCode::ME, IdCode::MA, IdCode::WO, IdCode::IM, IdCode::GR] {
            let t = r.get(code).unwrap();
            assert!(Schema::current().unwrap().struct_index(t.struct_name).is_some(), "{}", t.name);
        }
        assert!(!r.get(IdCode::LI).unwrap().linkable);
        assert!(r.get(IdCode::ID).is_none());
        assert_eq!(r.type_name(IdCode::CA), "Camera");
        assert_eq!(r.type_name(IdCode(*b"XX")), "XX");
    }

    #[test]
    fn test_link_list_and_pointer_array() {
        let mut data = Arena::new();
        let mut map = RelocationMap::new();

        let base = |next: u64, prev: u64, object: u64| {
            let mut b = zeroed("Base");
            b.set_ptr("next", Ptr::from_old(next));
            b.set_ptr("prev", Ptr::from_old(prev));
            b.set_ptr("object", Ptr::from_old(object));
            b
        };
        let b1 = base(0x20, 0, 0x900);
        let b2 = base(0, 0x10, 0x901);
        for (old, s) in [(0x10, b1), (0x20, b2)] {
            let id = data.insert(DataBlock { old, struct_name: "Base".into(), payload: DataPayload::Structs(vec![s]) });
            map.insert(old, Some(id));
        }
        let mats = data.insert(DataBlock {
            old: 0x30,
            struct_name: String::new(),
            payload: DataPayload::Raw(RawData {
                bytes: Arc::from(&0x700u64.to_ne_bytes()[..]),
                pointer_size: 8,
                endian: Endian::native(),
            }),
        });
        map.insert(0x30, Some(mats));

        let mut scene = zeroed("Scene");
        let list = scene.struct_mut("base").unwrap();
        list.set_ptr("first", Ptr::Old(0x10));
        list.set_ptr("last", Ptr::Old(0x20));
        let mut ob = zeroed("Object");
        ob.set_ptr("mat", Ptr::Old(0x30));

        let mut dl = DirectLinker::new(&mut map, &mut data, None);
        dl.link_list(&mut scene, "base");
        dl.link_pointer_array(&mut ob, "mat");

        let mut objects = Vec::new();
        let first = scene.struct_("base").and_then(|l| l.ptr("first")).unwrap();
        walk_list(&mut data, first, &mut |b| objects.push(b.ptr("object").unwrap()));
        assert_eq!(objects, vec![Ptr::Old(0x900), Ptr::Old(0x901)]);

        let mut entries = Vec::new();
        walk_pointer_array(&mut data, ob.ptr("mat"), Usage::User, &mut |p, u| entries.push((*p, u)));
        assert_eq!(entries, vec![(Ptr::Old(0x700), Usage::User)]);
        assert_eq!(map.prune_unused(), Vec::new());
    }

    #[test]
    fn test_unknown_address_becomes_null() {
        let mut data = Arena::new();
        let mut map = RelocationMap::new();
        let mut ob = zeroed("Object");
        ob.set_ptr("mat", Ptr::Old(0x1234));
        let mut dl = DirectLinker::new(&mut map, &mut data, None);
        assert_eq!(dl.link_pointer_array(&mut ob, "mat"), None);
        assert_eq!(ob.ptr("mat"), Some(Ptr::Null));
    }
}
