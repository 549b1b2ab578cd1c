//! Library and image records. Both may carry a packed payload.

use super::{no_refs, DirectLinker, IdType};
use crate::format::IdCode;
use crate::graph::Record;

pub(super) const LIBRARY: IdType = IdType {
    code: IdCode::LI,
    name: "Library",
    struct_name: "Library",
    linkable: false,
    direct_link: packed_direct_link,
    foreach_ref: no_refs,
    rules: &[],
};

pub(super) const IMAGE: IdType = IdType {
    code: IdCode::IM,
    name: "Image",
    struct_name: "Image",
    linkable: true,
    direct_link: packed_direct_link,
    foreach_ref: no_refs,
    rules: &[],
};

fn packed_direct_link(rec: &mut Record, dl: &mut DirectLinker<'_>) {
    dl.relink_packed(&mut rec.data, "packedfile");
}
