//! Struct schema tables.
//!
//! Every document embeds the layout of every struct it contains (`DNA1`
//! block). The program carries its own table for the layouts it works with
//! (see [`current`](super::current)). Both are represented by [`Schema`].
//!
//! Block layout:
//!
//! ```text
//! "SDNA"
//! "NAME" i32 count, count NUL-terminated names      (align 4)
//! "TYPE" i32 count, count NUL-terminated type names (align 4)
//! "TLEN" i16 size per type                          (align 4)
//! "STRC" i32 count, per struct:
//!        i16 type, i16 field count, (i16 type, i16 name) per field
//! ```

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use smallvec::SmallVec;

use super::name::FieldName;
use crate::format::Endian;
use crate::util::{Error, Result};

/// Upper bound on the element count of one array field.
const MAX_ARRAY_LEN: usize = 1 << 16;

/// Numeric element type of a primitive field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Primitive {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl Primitive {
    /// Map a schema type name and its stored size to a primitive.
    pub fn from_type(name: &str, size: usize) -> Option<Self> {
        let p = match (name, size) {
            ("char", 1) | ("int8_t", 1) => Self::I8,
            ("uchar", 1) | ("uint8_t", 1) => Self::U8,
            ("short", 2) | ("int16_t", 2) => Self::I16,
            ("ushort", 2) | ("uint16_t", 2) => Self::U16,
            ("int", 4) | ("long", 4) | ("int32_t", 4) => Self::I32,
            ("uint", 4) | ("ulong", 4) | ("uint32_t", 4) => Self::U32,
            ("long", 8) | ("int64_t", 8) => Self::I64,
            ("ulong", 8) | ("uint64_t", 8) => Self::U64,
            ("float", 4) => Self::F32,
            ("double", 8) => Self::F64,
            _ => return None,
        };
        Some(p)
    }

    pub const fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    #[inline]
    pub const fn is_char(self) -> bool {
        matches!(self, Self::I8 | Self::U8)
    }
}

/// What a field holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Pointer,
    Primitive(Primitive),
    /// Nested struct, by struct index.
    Struct(usize),
    /// Anything else, copied as bytes.
    Opaque,
}

/// One `(type, name)` pair of a struct definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub type_index: usize,
    pub name_index: usize,
}

/// A struct definition.
#[derive(Clone, Debug)]
pub struct StructDef {
    pub type_index: usize,
    pub fields: SmallVec<[FieldDef; 8]>,
}

/// Resolved placement of one field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldLayout {
    pub name_index: usize,
    pub type_index: usize,
    pub offset: usize,
    pub elem_size: usize,
    pub count: usize,
    pub kind: FieldKind,
}

impl FieldLayout {
    #[inline]
    pub fn size(&self) -> usize {
        self.elem_size * self.count
    }

    /// `char name[N]` style text buffer.
    #[inline]
    pub fn is_char_array(&self) -> bool {
        matches!(self.kind, FieldKind::Primitive(p) if p.is_char()) && self.count > 1
    }
}

/// A parsed struct schema.
#[derive(Clone, Debug)]
pub struct Schema {
    pointer_size: usize,
    names: Vec<FieldName>,
    types: Vec<String>,
    type_sizes: Vec<usize>,
    structs: Vec<StructDef>,
    layouts: Vec<Vec<FieldLayout>>,
    by_name: HashMap<String, usize>,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endian,
}

impl<'a> Cursor<'a> {
    fn need(&self, n: usize) -> Result<()> {
        if self.pos + n > self.data.len() {
            return Err(Error::malformed(format!("truncated at byte {}", self.pos)));
        }
        Ok(())
    }

    fn tag(&mut self, expect: &[u8; 4]) -> Result<()> {
        self.need(4)?;
        if &self.data[self.pos..self.pos + 4] != expect {
            return Err(Error::malformed(format!(
                "expected '{}' at byte {}",
                String::from_utf8_lossy(expect),
                self.pos
            )));
        }
        self.pos += 4;
        Ok(())
    }

    fn i32(&mut self) -> Result<i32> {
        self.need(4)?;
        let b = &self.data[self.pos..self.pos + 4];
        self.pos += 4;
        Ok(match self.endian {
            Endian::Little => LittleEndian::read_i32(b),
            Endian::Big => BigEndian::read_i32(b),
        })
    }

    fn i16(&mut self) -> Result<i16> {
        self.need(2)?;
        let b = &self.data[self.pos..self.pos + 2];
        self.pos += 2;
        Ok(match self.endian {
            Endian::Little => LittleEndian::read_i16(b),
            Endian::Big => BigEndian::read_i16(b),
        })
    }

    fn count(&mut self) -> Result<usize> {
        let n = self.i32()?;
        usize::try_from(n).map_err(|_| Error::malformed(format!("negative count {}", n)))
    }

    fn index(&mut self, limit: usize, what: &str) -> Result<usize> {
        let v = self.i16()?;
        match usize::try_from(v) {
            Ok(i) if i < limit => Ok(i),
            _ => Err(Error::malformed(format!("{} index {} out of range", what, v))),
        }
    }

    fn cstr(&mut self) -> Result<String> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::malformed("unterminated string"))?;
        let s = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Ok(s)
    }

    fn align4(&mut self) {
        self.pos = (self.pos + 3) & !3;
    }
}

impl Schema {
    /// Parse the body of a `DNA1` block.
    pub fn parse(data: &[u8], endian: Endian, pointer_size: usize) -> Result<Self> {
        let mut c = Cursor { data, pos: 0, endian };

        c.tag(b"SDNA")?;

        c.tag(b"NAME")?;
        let n = c.count()?;
        let mut names = Vec::with_capacity(n.min(1 << 16));
        for _ in 0..n {
            names.push(FieldName::parse(&c.cstr()?));
        }
        c.align4();

        c.tag(b"TYPE")?;
        let n = c.count()?;
        let mut types = Vec::with_capacity(n.min(1 << 16));
        for _ in 0..n {
            types.push(c.cstr()?);
        }
        c.align4();

        c.tag(b"TLEN")?;
        let mut type_sizes = Vec::with_capacity(types.len());
        for _ in 0..types.len() {
            type_sizes.push(c.i16()? as u16 as usize);
        }
        c.align4();

        c.tag(b"STRC")?;
        let n = c.count()?;
        let mut structs = Vec::with_capacity(n.min(1 << 16));
        for _ in 0..n {
            let type_index = c.index(types.len(), "struct type")?;
            let nfields = c.i16()?;
            let mut fields = SmallVec::new();
            for _ in 0..nfields.max(0) {
                let type_index = c.index(types.len(), "field type")?;
                let name_index = c.index(names.len(), "field name")?;
                fields.push(FieldDef { type_index, name_index });
            }
            structs.push(StructDef { type_index, fields });
        }

        let schema = Self::build(pointer_size, names, types, type_sizes, structs)?;
        tracing::debug!(
            "schema: {} names, {} types, {} structs",
            schema.names.len(),
            schema.types.len(),
            schema.structs.len()
        );
        Ok(schema)
    }

    /// Build a schema from declarative tables.
    ///
    /// `structs` lists `(struct name, [(field type, field name)])`. Struct
    /// sizes are the sum of their field sizes.
    pub fn from_tables(
        pointer_size: usize,
        primitives: &[(&str, usize)],
        structs: &[(&str, &[(&str, &str)])],
    ) -> Result<Self> {
        let mut types: Vec<String> = Vec::new();
        let mut type_lookup: HashMap<&str, usize> = HashMap::new();
        let mut type_sizes = Vec::new();
        for &(name, size) in primitives {
            type_lookup.insert(name, types.len());
            types.push(name.to_string());
            type_sizes.push(size);
        }
        for &(name, _) in structs {
            if type_lookup.contains_key(name) {
                return Err(Error::malformed(format!("duplicate type '{}'", name)));
            }
            type_lookup.insert(name, types.len());
            types.push(name.to_string());
            type_sizes.push(0);
        }

        let mut names: Vec<FieldName> = Vec::new();
        let mut name_lookup: HashMap<&str, usize> = HashMap::new();
        let mut defs = Vec::with_capacity(structs.len());
        for &(sname, fields) in structs {
            let mut out = SmallVec::new();
            for &(ftype, fname) in fields {
                let type_index = *type_lookup
                    .get(ftype)
                    .ok_or_else(|| Error::malformed(format!("{}.{}: unknown type '{}'", sname, fname, ftype)))?;
                let name_index = *name_lookup.entry(fname).or_insert_with(|| {
                    names.push(FieldName::parse(fname));
                    names.len() - 1
                });
                out.push(FieldDef { type_index, name_index });
            }
            defs.push(StructDef { type_index: type_lookup[sname], fields: out });
        }

        // Struct sizes, nested structs first.
        let by_type = struct_by_type(types.len(), &defs);
        let mut state = vec![0u8; defs.len()];
        for i in 0..defs.len() {
            sum_struct_size(i, &defs, &names, &by_type, pointer_size, &mut type_sizes, &mut state)?;
        }

        Self::build(pointer_size, names, types, type_sizes, defs)
    }

    fn build(
        pointer_size: usize,
        names: Vec<FieldName>,
        types: Vec<String>,
        type_sizes: Vec<usize>,
        structs: Vec<StructDef>,
    ) -> Result<Self> {
        let by_type = struct_by_type(types.len(), &structs);
        let mut by_name = HashMap::with_capacity(structs.len());
        let mut layouts = Vec::with_capacity(structs.len());

        for (si, def) in structs.iter().enumerate() {
            by_name.insert(types[def.type_index].clone(), si);

            let mut offset = 0;
            let mut fields = Vec::with_capacity(def.fields.len());
            for f in &def.fields {
                let name = &names[f.name_index];
                let (kind, elem_size) = if name.is_pointer() {
                    (FieldKind::Pointer, pointer_size)
                } else if let Some(nested) = by_type[f.type_index] {
                    (FieldKind::Struct(nested), type_sizes[f.type_index])
                } else {
                    let size = type_sizes[f.type_index];
                    match Primitive::from_type(&types[f.type_index], size) {
                        Some(p) => (FieldKind::Primitive(p), size),
                        None => (FieldKind::Opaque, size),
                    }
                };
                if matches!(kind, FieldKind::Struct(_)) && elem_size == 0 {
                    return Err(Error::malformed(format!(
                        "{}.{}: nested struct '{}' has zero size",
                        types[def.type_index], name.full, types[f.type_index]
                    )));
                }
                if name.array_len > MAX_ARRAY_LEN {
                    return Err(Error::malformed(format!(
                        "{}.{}: array of {} elements",
                        types[def.type_index], name.full, name.array_len
                    )));
                }
                let layout = FieldLayout {
                    name_index: f.name_index,
                    type_index: f.type_index,
                    offset,
                    elem_size,
                    count: name.array_len,
                    kind,
                };
                offset = elem_size
                    .checked_mul(layout.count)
                    .and_then(|size| offset.checked_add(size))
                    .ok_or_else(|| {
                        Error::malformed(format!("{}.{}: field size overflows", types[def.type_index], name.full))
                    })?;
                fields.push(layout);
            }

            if offset > type_sizes[def.type_index] {
                return Err(Error::malformed(format!(
                    "struct '{}' fields span {} bytes, declared size {}",
                    types[def.type_index], offset, type_sizes[def.type_index]
                )));
            }
            layouts.push(fields);
        }

        let mut state = vec![0u8; structs.len()];
        for si in 0..structs.len() {
            check_nesting(si, &layouts, &mut state)?;
        }

        Ok(Self { pointer_size, names, types, type_sizes, structs, layouts, by_name })
    }

    #[inline]
    pub fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    #[inline]
    pub fn struct_count(&self) -> usize {
        self.structs.len()
    }

    pub fn struct_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn struct_name(&self, index: usize) -> &str {
        &self.types[self.structs[index].type_index]
    }

    /// Stride of one struct in bytes.
    pub fn struct_size(&self, index: usize) -> usize {
        self.type_sizes[self.structs[index].type_index]
    }

    pub fn fields(&self, index: usize) -> &[FieldLayout] {
        &self.layouts[index]
    }

    pub fn field_name(&self, field: &FieldLayout) -> &FieldName {
        &self.names[field.name_index]
    }

    pub fn field_type(&self, field: &FieldLayout) -> &str {
        &self.types[field.type_index]
    }

    /// Find a field by bare name.
    pub fn find_field(&self, index: usize, base: &str) -> Option<&FieldLayout> {
        self.layouts[index].iter().find(|f| self.names[f.name_index].base == base)
    }

    /// Byte offset of `struct_name.field` (bare field name).
    pub fn field_offset(&self, struct_name: &str, field: &str) -> Option<usize> {
        let si = self.struct_index(struct_name)?;
        self.find_field(si, field).map(|f| f.offset)
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn type_name(&self, index: usize) -> &str {
        &self.types[index]
    }

    pub fn type_size(&self, index: usize) -> usize {
        self.type_sizes[index]
    }
}

fn struct_by_type(type_count: usize, structs: &[StructDef]) -> Vec<Option<usize>> {
    let mut by_type = vec![None; type_count];
    for (si, def) in structs.iter().enumerate() {
        by_type[def.type_index] = Some(si);
    }
    by_type
}

/// Fails when a struct contains itself by value, directly or through
/// nested structs.
fn check_nesting(si: usize, layouts: &[Vec<FieldLayout>], state: &mut [u8]) -> Result<()> {
    match state[si] {
        2 => return Ok(()),
        1 => return Err(Error::malformed("struct contains itself by value")),
        _ => {}
    }
    state[si] = 1;
    for f in &layouts[si] {
        if let FieldKind::Struct(nested) = f.kind {
            check_nesting(nested, layouts, state)?;
        }
    }
    state[si] = 2;
    Ok(())
}

fn sum_struct_size(
    si: usize,
    defs: &[StructDef],
    names: &[FieldName],
    by_type: &[Option<usize>],
    pointer_size: usize,
    type_sizes: &mut [usize],
    state: &mut [u8],
) -> Result<usize> {
    let ti = defs[si].type_index;
    match state[si] {
        2 => return Ok(type_sizes[ti]),
        1 => return Err(Error::malformed("struct contains itself by value")),
        _ => {}
    }
    state[si] = 1;

    let mut size: usize = 0;
    for f in &defs[si].fields {
        let name = &names[f.name_index];
        let elem = if name.is_pointer() {
            pointer_size
        } else if let Some(nested) = by_type[f.type_index] {
            sum_struct_size(nested, defs, names, by_type, pointer_size, type_sizes, state)?
        } else {
            type_sizes[f.type_index]
        };
        size = elem
            .checked_mul(name.array_len)
            .and_then(|n| size.checked_add(n))
            .ok_or_else(|| Error::malformed(format!("field '{}' size overflows", name.full)))?;
    }

    type_sizes[ti] = size;
    state[si] = 2;
    Ok(size)
}
