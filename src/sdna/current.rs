//! In-memory layout of the structs this crate works with.
//!
//! Pointers are 8 bytes and values are native-endian. Structs are packed
//! with no padding. Reconstruction turns file bodies into this layout
//! before [`decode`](super::decode) reads them.

use std::sync::{Arc, OnceLock};

use super::Schema;
use crate::util::{Error, Result};

/// Pointer width of the current layout.
pub const POINTER_SIZE: usize = 8;

/// Primitive types and their sizes.
pub const PRIMITIVE_TYPES: &[(&str, usize)] = &[
    ("char", 1),
    ("uchar", 1),
    ("short", 2),
    ("ushort", 2),
    ("int", 4),
    ("long", 4),
    ("ulong", 4),
    ("float", 4),
    ("double", 8),
    ("int64_t", 8),
    ("uint64_t", 8),
    ("void", 0),
];

/// Struct table. Index 0 (`Link`) doubles as the marker for untyped data.
#[rustfmt::skip]
pub const CURRENT_STRUCTS: &[(&str, &[(&str, &str)])] = &[
    ("Link", &[("Link", "*next"), ("Link", "*prev")]),
    ("ListBase", &[("void", "*first"), ("void", "*last")]),
    ("ID", &[
        ("void", "*next"), ("void", "*prev"), ("Library", "*lib"),
        ("char", "name[66]"), ("short", "flag"), ("int", "tag"), ("int", "us"),
    ]),
    ("PackedFile", &[("int", "size"), ("int", "seek"), ("void", "*data")]),
    ("Library", &[
        ("ID", "id"), ("char", "name[1024]"), ("char", "filepath[1024]"),
        ("Library", "*parent"), ("PackedFile", "*packedfile"),
        ("short", "versionfile"), ("short", "subversionfile"),
    ]),
    ("FileGlobal", &[
        ("char", "subvstr[4]"), ("short", "subversion"), ("short", "minversion"),
        ("short", "minsubversion"), ("short", "pad"), ("Scene", "*curscene"),
        ("int", "fileflags"), ("int", "globalf"), ("char", "filename[1024]"),
    ]),
    ("Base", &[
        ("Base", "*next"), ("Base", "*prev"), ("Object", "*object"),
        ("int", "lay"), ("short", "flag"), ("short", "pad"),
    ]),
    ("Scene", &[
        ("ID", "id"), ("Camera", "*camera"), ("World", "*world"), ("Scene", "*set"),
        ("ListBase", "base"), ("int", "lay"), ("int", "sfra"), ("int", "efra"),
    ]),
    ("Object", &[
        ("ID", "id"), ("void", "*data"), ("Material", "**mat"),
        ("short", "totcol"), ("short", "type"),
        ("float", "loc[3]"), ("float", "rot[3]"), ("float", "size[3]"),
        ("float", "empty_drawsize"), ("Object", "*parent"), ("Group", "*dup_group"),
    ]),
    ("Camera", &[
        ("ID", "id"), ("char", "type"), ("char", "dtx"), ("short", "flag"),
        ("float", "lens"), ("float", "clipsta"), ("float", "clipend"),
        ("float", "sensor_x"), ("float", "sensor_y"), ("float", "ortho_scale"),
        ("Object", "*dof_ob"),
    ]),
    ("Lamp", &[
        ("ID", "id"), ("short", "type"), ("short", "flag"),
        ("float", "r"), ("float", "g"), ("float", "b"), ("float", "energy"), ("float", "dist"),
    ]),
    ("World", &[
        ("ID", "id"), ("float", "horr"), ("float", "horg"), ("float", "horb"), ("float", "exposure"),
    ]),
    ("MVert", &[("float", "co[3]"), ("short", "no[3]"), ("char", "flag"), ("char", "bweight")]),
    ("MPoly", &[
        ("int", "loopstart"), ("int", "totloop"), ("short", "mat_nr"), ("char", "flag"), ("char", "pad"),
    ]),
    ("MLoop", &[("int", "v"), ("int", "e")]),
    ("Mesh", &[
        ("ID", "id"), ("Material", "**mat"), ("MVert", "*mvert"), ("MPoly", "*mpoly"),
        ("MLoop", "*mloop"), ("int", "totvert"), ("int", "totpoly"), ("int", "totloop"),
        ("short", "totcol"), ("short", "pad"),
    ]),
    ("Material", &[
        ("ID", "id"), ("float", "r"), ("float", "g"), ("float", "b"), ("float", "alpha"),
        ("Image", "*image"),
    ]),
    ("Image", &[
        ("ID", "id"), ("char", "name[1024]"), ("PackedFile", "*packedfile"),
        ("short", "source"), ("short", "type"),
    ]),
    ("GroupObject", &[("GroupObject", "*next"), ("GroupObject", "*prev"), ("Object", "*ob")]),
    ("Group", &[("ID", "id"), ("ListBase", "gobject")]),
];

static CURRENT: OnceLock<std::result::Result<Arc<Schema>, String>> = OnceLock::new();

impl Schema {
    /// The program's own schema, built once.
    pub fn current() -> Result<Arc<Schema>> {
        CURRENT
            .get_or_init(|| {
                Schema::from_tables(POINTER_SIZE, PRIMITIVE_TYPES, CURRENT_STRUCTS)
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            })
            .clone()
            .map_err(Error::MalformedSchema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_builds() {
        let s = Schema::current().unwrap();
        assert_eq!(s.pointer_size(), 8);
        assert_eq!(s.struct_name(0), "Link");
        assert_eq!(s.struct_size(s.struct_index("ID").unwrap()), 8 * 3 + 66 + 2 + 4 + 4);
        assert_eq!(s.field_offset("ID", "name"), Some(24));
        assert!(s.struct_index("Scene").is_some());
    }

    #[test]
    fn test_every_pointer_target_is_known() {
        let s = Schema::current().unwrap();
        for si in 0..s.struct_count() {
            for f in s.fields(si) {
                let t = s.field_type(f);
                assert!(
                    s.struct_index(t).is_some() || PRIMITIVE_TYPES.iter().any(|(p, _)| *p == t),
                    "{}.{}",
                    s.struct_name(si),
                    s.field_name(f).full
                );
            }
        }
    }
}
