//! Mesh and material records.

use super::{visit, walk_pointer_array, DirectLinker, IdType, Usage};
use crate::format::IdCode;
use crate::graph::{DataBlock, FileVersion, Record, RecordId};
use crate::sdna::Ptr;
use crate::util::Arena;
use crate::versioning::{Phase, VersionRule};

pub(super) const MESH: IdType = IdType {
    code: IdCode::ME,
    name: "Mesh",
    struct_name: "Mesh",
    linkable: true,
    direct_link: mesh_direct_link,
    foreach_ref: mesh_refs,
    rules: &[VersionRule {
        description: "clamp material count",
        phase: Phase::PreLink,
        before: FileVersion::new(270, 0),
        apply: mesh_totcol,
    }],
};

pub(super) const MATERIAL: IdType = IdType {
    code: IdCode::MA,
    name: "Material",
    struct_name: "Material",
    linkable: true,
    direct_link: super::no_direct_link,
    foreach_ref: material_refs,
    rules: &[],
};

fn mesh_direct_link(rec: &mut Record, dl: &mut DirectLinker<'_>) {
    dl.link_pointer_array(&mut rec.data, "mat");
    for field in ["mvert", "mpoly", "mloop"] {
        dl.relink_field(&mut rec.data, field);
    }
}

fn mesh_refs(rec: &mut Record, data: &mut Arena<DataBlock>, f: &mut dyn FnMut(&mut Ptr, Usage)) {
    walk_pointer_array(data, rec.data.ptr("mat"), Usage::User, f);
}

fn mesh_totcol(_: RecordId, rec: &mut Record) {
    if rec.data.int("totcol").is_some_and(|n| n < 0) {
        rec.data.set_int("totcol", 0);
    }
}

fn material_refs(rec: &mut Record, _: &mut Arena<DataBlock>, f: &mut dyn FnMut(&mut Ptr, Usage)) {
    visit(&mut rec.data, "image", Usage::RealUser, f);
}
