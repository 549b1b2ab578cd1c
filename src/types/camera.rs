//! Camera, lamp and world records.

use super::{no_direct_link, no_refs, visit, IdType, Usage};
use crate::format::IdCode;
use crate::graph::{DataBlock, FileVersion, Record, RecordId};
use crate::sdna::Ptr;
use crate::util::Arena;
use crate::versioning::{Phase, VersionRule};

pub(super) const CAMERA: IdType = IdType {
    code: IdCode::CA,
    name: "Camera",
    struct_name: "Camera",
    linkable: true,
    direct_link: no_direct_link,
    foreach_ref: camera_refs,
    rules: &[VersionRule {
        description: "default sensor size",
        phase: Phase::PreLink,
        before: FileVersion::new(261, 0),
        apply: camera_sensor,
    }],
};

pub(super) const LAMP: IdType = IdType {
    code: IdCode::LA,
    name: "Lamp",
    struct_name: "Lamp",
    linkable: true,
    direct_link: no_direct_link,
    foreach_ref: no_refs,
    rules: &[VersionRule {
        description: "default lamp energy",
        phase: Phase::PreLink,
        before: FileVersion::new(250, 0),
        apply: lamp_energy,
    }],
};

pub(super) const WORLD: IdType = IdType {
    code: IdCode::WO,
    name: "World",
    struct_name: "World",
    linkable: true,
    direct_link: no_direct_link,
    foreach_ref: no_refs,
    rules: &[],
};

fn camera_refs(rec: &mut Record, _: &mut Arena<DataBlock>, f: &mut dyn FnMut(&mut Ptr, Usage)) {
    visit(&mut rec.data, "dof_ob", Usage::NoUser, f);
}

fn camera_sensor(_: RecordId, rec: &mut Record) {
    if rec.data.float("sensor_x") == Some(0.0) {
        rec.data.set_float("sensor_x", 36.0);
    }
    if rec.data.float("sensor_y") == Some(0.0) {
        rec.data.set_float("sensor_y", 24.0);
    }
}

fn lamp_energy(_: RecordId, rec: &mut Record) {
    if rec.data.float("energy") == Some(0.0) {
        rec.data.set_float("energy", 1.0);
    }
}
