//! Scene records.

use super::{visit, walk_list, DirectLinker, IdType, Usage};
use crate::format::IdCode;
use crate::graph::{DataBlock, FileVersion, Record, RecordId};
use crate::sdna::Ptr;
use crate::util::Arena;
use crate::versioning::{Phase, VersionRule};

pub(super) const SCENE: IdType = IdType {
    code: IdCode::SC,
    name: "Scene",
    struct_name: "Scene",
    linkable: true,
    direct_link: scene_direct_link,
    foreach_ref: scene_refs,
    rules: &[VersionRule {
        description: "break background set cycle",
        phase: Phase::PostLink,
        before: FileVersion::new(300, 0),
        apply: scene_self_set,
    }],
};

fn scene_direct_link(rec: &mut Record, dl: &mut DirectLinker<'_>) {
    dl.link_list(&mut rec.data, "base");
}

fn scene_refs(rec: &mut Record, data: &mut Arena<DataBlock>, f: &mut dyn FnMut(&mut Ptr, Usage)) {
    visit(&mut rec.data, "camera", Usage::NoUser, f);
    visit(&mut rec.data, "world", Usage::User, f);
    visit(&mut rec.data, "set", Usage::NoUser, f);
    let first = rec.data.struct_("base").and_then(|l| l.ptr("first")).unwrap_or_default();
    walk_list(data, first, &mut |base| visit(base, "object", Usage::User, f));
}

/// A scene used as its own background set.
fn scene_self_set(id: RecordId, rec: &mut Record) {
    if rec.data.ptr("set") == Some(Ptr::Id(id)) {
        rec.data.set_ptr("set", Ptr::Null);
    }
}
