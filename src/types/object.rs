//! Object and group records.

use super::{visit, walk_list, walk_pointer_array, DirectLinker, IdType, Usage};
use crate::format::IdCode;
use crate::graph::{DataBlock, FileVersion, Record, RecordId};
use crate::sdna::Ptr;
use crate::util::Arena;
use crate::versioning::{Phase, VersionRule};

pub(super) const OBJECT: IdType = IdType {
    code: IdCode::OB,
    name: "Object",
    struct_name: "Object",
    linkable: true,
    direct_link: object_direct_link,
    foreach_ref: object_refs,
    rules: &[VersionRule {
        description: "default empty draw size",
        phase: Phase::PreLink,
        before: FileVersion::new(250, 0),
        apply: object_drawsize,
    }],
};

pub(super) const GROUP: IdType = IdType {
    code: IdCode::GR,
    name: "Group",
    struct_name: "Group",
    linkable: true,
    direct_link: group_direct_link,
    foreach_ref: group_refs,
    rules: &[],
};

fn object_direct_link(rec: &mut Record, dl: &mut DirectLinker<'_>) {
    dl.link_pointer_array(&mut rec.data, "mat");
}

fn object_refs(rec: &mut Record, data: &mut Arena<DataBlock>, f: &mut dyn FnMut(&mut Ptr, Usage)) {
    visit(&mut rec.data, "data", Usage::User, f);
    walk_pointer_array(data, rec.data.ptr("mat"), Usage::User, f);
    visit(&mut rec.data, "parent", Usage::NoUser, f);
    visit(&mut rec.data, "dup_group", Usage::User, f);
}

fn object_drawsize(_: RecordId, rec: &mut Record) {
    if rec.data.float("empty_drawsize") == Some(0.0) {
        rec.data.set_float("empty_drawsize", 1.0);
    }
}

fn group_direct_link(rec: &mut Record, dl: &mut DirectLinker<'_>) {
    dl.link_list(&mut rec.data, "gobject");
}

fn group_refs(rec: &mut Record, data: &mut Arena<DataBlock>, f: &mut dyn FnMut(&mut Ptr, Usage)) {
    let first = rec.data.struct_("gobject").and_then(|l| l.ptr("first")).unwrap_or_default();
    walk_list(data, first, &mut |go| visit(go, "ob", Usage::User, f));
}
