//! File schema vs. current schema comparison.

use serde::Serialize;

use super::schema::{FieldKind, Schema};

/// How a file struct relates to the current layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum CompareFlag {
    /// No current struct of that name; data is dropped.
    Removed,
    /// Same fields, same order, same widths; bytes copy as-is.
    Identical,
    /// Layout differs; fields are copied one by one.
    NeedsReconstruction,
}

/// One flag per file struct.
pub fn compare(file: &Schema, current: &Schema) -> Vec<CompareFlag> {
    let mut flags: Vec<Option<CompareFlag>> = vec![None; file.struct_count()];
    for si in 0..file.struct_count() {
        compare_struct(file, current, si, &mut flags, 0);
    }
    flags.into_iter().map(|f| f.unwrap_or(CompareFlag::NeedsReconstruction)).collect()
}

fn compare_struct(
    file: &Schema,
    current: &Schema,
    si: usize,
    flags: &mut [Option<CompareFlag>],
    depth: usize,
) -> CompareFlag {
    if let Some(f) = flags[si] {
        return f;
    }
    let flag = compute(file, current, si, flags, depth);
    flags[si] = Some(flag);
    flag
}

fn compute(
    file: &Schema,
    current: &Schema,
    si: usize,
    flags: &mut [Option<CompareFlag>],
    depth: usize,
) -> CompareFlag {
    let Some(ci) = current.struct_index(file.struct_name(si)) else {
        return CompareFlag::Removed;
    };
    // Malformed schemas may nest structs by value in a loop.
    if depth > 64 {
        return CompareFlag::NeedsReconstruction;
    }

    let ff = file.fields(si);
    let cf = current.fields(ci);
    if ff.len() != cf.len() || file.struct_size(si) != current.struct_size(ci) {
        return CompareFlag::NeedsReconstruction;
    }

    for (a, b) in ff.iter().zip(cf) {
        if file.field_name(a).full != current.field_name(b).full
            || file.field_type(a) != current.field_type(b)
            || a.elem_size != b.elem_size
            || a.count != b.count
        {
            return CompareFlag::NeedsReconstruction;
        }
        if let FieldKind::Struct(nested) = a.kind {
            if compare_struct(file, current, nested, flags, depth + 1) != CompareFlag::Identical {
                return CompareFlag::NeedsReconstruction;
            }
        }
    }
    CompareFlag::Identical
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMS: &[(&str, usize)] = &[("char", 1), ("short", 2), ("int", 4), ("float", 4)];

    #[test]
    fn test_flags() {
        let file = Schema::from_tables(
            4,
            PRIMS,
            &[
                ("Same", &[("int", "a"), ("float", "b")]),
                ("Drift", &[("int", "a"), ("float", "b")]),
                ("Gone", &[("int", "x")]),
                ("Ptr", &[("Same", "*p")]),
                ("Outer", &[("Drift", "inner")]),
            ],
        )
        .unwrap();
        let current = Schema::from_tables(
            8,
            PRIMS,
            &[
                ("Same", &[("int", "a"), ("float", "b")]),
                ("Drift", &[("float", "b"), ("int", "a"), ("int", "c")]),
                ("Ptr", &[("Same", "*p")]),
                ("Outer", &[("Drift", "inner")]),
            ],
        )
        .unwrap();

        let flags = compare(&file, &current);
        let flag = |n: &str| flags[file.struct_index(n).unwrap()];
        assert_eq!(flag("Same"), CompareFlag::Identical);
        assert_eq!(flag("Drift"), CompareFlag::NeedsReconstruction);
        assert_eq!(flag("Gone"), CompareFlag::Removed);
        // Pointer width differs.
        assert_eq!(flag("Ptr"), CompareFlag::NeedsReconstruction);
        // Nested drift propagates.
        assert_eq!(flag("Outer"), CompareFlag::NeedsReconstruction);
    }
}
