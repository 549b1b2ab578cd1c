//! Conversion of file struct bodies into the current layout.
//!
//! Two steps, in this order:
//!
//! 1. [`switch_endian`] swaps every multi-byte value in place when the
//!    document was written with the other byte order.
//! 2. [`reconstruct`] produces a current-layout buffer: a straight copy for
//!    identical structs, a field-by-field copy otherwise. Fields are matched
//!    by bare name and pointer-ness. Numbers are converted element-wise,
//!    pointers are widened or narrowed, nested structs recurse and fields
//!    missing from the file stay zero.

use super::compare::CompareFlag;
use super::schema::{FieldKind, FieldLayout, Primitive, Schema};

/// Swap byte order of `count` consecutive structs in place.
pub fn switch_endian(schema: &Schema, struct_index: usize, count: usize, data: &mut [u8]) {
    let size = schema.struct_size(struct_index);
    if size == 0 {
        return;
    }
    for chunk in data.chunks_mut(size).take(count) {
        swap_struct(schema, struct_index, chunk);
    }
}

fn swap_struct(schema: &Schema, si: usize, data: &mut [u8]) {
    for f in schema.fields(si) {
        let width = match f.kind {
            FieldKind::Pointer => schema.pointer_size(),
            FieldKind::Primitive(p) => p.size(),
            FieldKind::Struct(nested) => {
                for i in 0..f.count {
                    let start = f.offset + i * f.elem_size;
                    if let Some(sub) = data.get_mut(start..start + f.elem_size) {
                        swap_struct(schema, nested, sub);
                    }
                }
                continue;
            }
            FieldKind::Opaque => continue,
        };
        if width < 2 {
            continue;
        }
        for i in 0..f.count {
            let start = f.offset + i * width;
            if let Some(elem) = data.get_mut(start..start + width) {
                elem.reverse();
            }
        }
    }
}

/// Rebuild `count` file structs as current structs.
///
/// Returns the current struct index and the new bytes, or `None` when the
/// struct no longer exists.
pub fn reconstruct(
    current: &Schema,
    file: &Schema,
    flags: &[CompareFlag],
    file_struct: usize,
    count: usize,
    body: &[u8],
) -> Option<(usize, Vec<u8>)> {
    let flag = flags.get(file_struct).copied()?;
    if flag == CompareFlag::Removed {
        return None;
    }
    let ci = current.struct_index(file.struct_name(file_struct))?;
    let csize = current.struct_size(ci);
    let fsize = file.struct_size(file_struct);
    let count = if fsize == 0 { 0 } else { count.min(body.len() / fsize) };

    let mut out = vec![0u8; csize * count];
    if flag == CompareFlag::Identical && csize == fsize {
        out.copy_from_slice(&body[..csize * count]);
        return Some((ci, out));
    }

    for i in 0..count {
        reconstruct_struct(
            current,
            file,
            flags,
            ci,
            &mut out[i * csize..(i + 1) * csize],
            file_struct,
            &body[i * fsize..(i + 1) * fsize],
        );
    }
    Some((ci, out))
}

fn reconstruct_struct(
    current: &Schema,
    file: &Schema,
    flags: &[CompareFlag],
    ci: usize,
    out: &mut [u8],
    fi: usize,
    inp: &[u8],
) {
    for cf in current.fields(ci) {
        let cname = current.field_name(cf);
        let Some(ff) = file.fields(fi).iter().find(|f| {
            let n = file.field_name(f);
            n.base == cname.base && n.is_pointer() == cname.is_pointer()
        }) else {
            continue;
        };

        let n = cf.count.min(ff.count);
        match (cf.kind, ff.kind) {
            (FieldKind::Pointer, FieldKind::Pointer) => {
                for i in 0..n {
                    if let Some(src) = elem(inp, ff, i) {
                        let v = read_ptr(src);
                        write_ptr(elem_mut(out, cf, i), v);
                    }
                }
            }
            (FieldKind::Primitive(cp), FieldKind::Primitive(fp)) => {
                for i in 0..n {
                    if let Some(src) = elem(inp, ff, i) {
                        write_num(elem_mut(out, cf, i), cp, read_num(src, fp));
                    }
                }
                if cf.is_char_array() && ff.count > cf.count {
                    out[cf.offset + cf.size() - 1] = 0;
                }
            }
            (FieldKind::Struct(cs), FieldKind::Struct(fs)) => {
                if current.struct_name(cs) != file.struct_name(fs) {
                    continue;
                }
                let same = flags.get(fs) == Some(&CompareFlag::Identical) && cf.elem_size == ff.elem_size;
                for i in 0..n {
                    let Some(src) = elem(inp, ff, i) else {
                        continue;
                    };
                    let dst = elem_mut(out, cf, i);
                    if same {
                        dst.copy_from_slice(src);
                    } else {
                        reconstruct_struct(current, file, flags, cs, dst, fs, src);
                    }
                }
            }
            (FieldKind::Opaque, FieldKind::Opaque) => {
                if cf.elem_size != ff.elem_size || current.field_type(cf) != file.field_type(ff) {
                    continue;
                }
                for i in 0..n {
                    if let Some(src) = elem(inp, ff, i) {
                        elem_mut(out, cf, i).copy_from_slice(src);
                    }
                }
            }
            _ => {}
        }
    }
}

#[inline]
fn elem<'a>(data: &'a [u8], f: &FieldLayout, i: usize) -> Option<&'a [u8]> {
    let start = f.offset + i * f.elem_size;
    data.get(start..start + f.elem_size)
}

#[inline]
fn elem_mut<'a>(data: &'a mut [u8], f: &FieldLayout, i: usize) -> &'a mut [u8] {
    let start = f.offset + i * f.elem_size;
    &mut data[start..start + f.elem_size]
}

/// Native-endian pointer of 4 or 8 bytes.
pub(crate) fn read_ptr(src: &[u8]) -> u64 {
    match src.len() {
        4 => u32::from_ne_bytes([src[0], src[1], src[2], src[3]]) as u64,
        8 => u64::from_ne_bytes([src[0], src[1], src[2], src[3], src[4], src[5], src[6], src[7]]),
        _ => 0,
    }
}

fn write_ptr(dst: &mut [u8], v: u64) {
    match dst.len() {
        4 => dst.copy_from_slice(&(v as u32).to_ne_bytes()),
        8 => dst.copy_from_slice(&v.to_ne_bytes()),
        _ => {}
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

pub(crate) fn read_num(src: &[u8], p: Primitive) -> Num {
    let b = |n: usize| -> [u8; 8] {
        let mut a = [0u8; 8];
        a[..n].copy_from_slice(&src[..n]);
        a
    };
    match p {
        Primitive::I8 => Num::Int(src[0] as i8 as i64),
        Primitive::U8 => Num::Int(src[0] as i64),
        Primitive::I16 => Num::Int(i16::from_ne_bytes([src[0], src[1]]) as i64),
        Primitive::U16 => Num::Int(u16::from_ne_bytes([src[0], src[1]]) as i64),
        Primitive::I32 => Num::Int(i32::from_ne_bytes([src[0], src[1], src[2], src[3]]) as i64),
        Primitive::U32 => Num::Int(u32::from_ne_bytes([src[0], src[1], src[2], src[3]]) as i64),
        Primitive::I64 => Num::Int(i64::from_ne_bytes(b(8))),
        Primitive::U64 => Num::Int(u64::from_ne_bytes(b(8)) as i64),
        Primitive::F32 => Num::Float(f32::from_ne_bytes([src[0], src[1], src[2], src[3]]) as f64),
        Primitive::F64 => Num::Float(f64::from_ne_bytes(b(8))),
    }
}

pub(crate) fn write_num(dst: &mut [u8], p: Primitive, v: Num) {
    let (i, f) = match v {
        Num::Int(i) => (i, i as f64),
        Num::Float(f) => (f as i64, f),
    };
    match p {
        Primitive::I8 | Primitive::U8 => dst[0] = i as u8,
        Primitive::I16 | Primitive::U16 => dst.copy_from_slice(&(i as u16).to_ne_bytes()),
        Primitive::I32 | Primitive::U32 => dst.copy_from_slice(&(i as u32).to_ne_bytes()),
        Primitive::I64 | Primitive::U64 => dst.copy_from_slice(&i.to_ne_bytes()),
        Primitive::F32 => dst.copy_from_slice(&(f as f32).to_ne_bytes()),
        Primitive::F64 => dst.copy_from_slice(&f.to_ne_bytes()),
    }
}
