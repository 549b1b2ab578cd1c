//! Document writer for tests.
//!
//! Builds small `.blend` documents in memory with any pointer size, byte
//! order and struct layout. Helpers panic on unknown struct or field names;
//! this module only backs the test suites.

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};

use crate::format::{self, BlockCode, Endian, IdCode};
use crate::sdna::current::{CURRENT_STRUCTS, PRIMITIVE_TYPES};
use crate::sdna::{FieldKind, Primitive, Schema};

/// Pointer size and byte order of a written document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub pointer_size: usize,
    pub endian: Endian,
}

impl Layout {
    pub fn new(pointer_size: usize, endian: Endian) -> Self {
        Self { pointer_size, endian }
    }

    pub fn native() -> Self {
        Self::new(8, Endian::native())
    }

    pub fn block_header_size(&self) -> usize {
        16 + self.pointer_size
    }
}

/// Value written into a struct field.
#[derive(Clone, Copy, Debug)]
pub enum FieldValue<'a> {
    Int(i64),
    Float(f64),
    Floats(&'a [f64]),
    /// Old address.
    Ptr(u64),
    Str(&'a str),
}

use FieldValue::{Float, Floats, Int, Ptr, Str};

type Tables = Vec<(String, Vec<(String, String)>)>;

/// Sequential document writer.
pub struct DocWriter {
    layout: Layout,
    tables: Tables,
    schema: Schema,
    buf: Vec<u8>,
    schema_written: bool,
}

impl DocWriter {
    /// Document at version 279 with the program's own struct layout.
    pub fn current(layout: Layout) -> Self {
        Self::with_structs(layout, 279, CURRENT_STRUCTS)
    }

    /// Document with a custom struct layout.
    pub fn with_structs(layout: Layout, version: u16, structs: &[(&str, &[(&str, &str)])]) -> Self {
        let schema = Schema::from_tables(layout.pointer_size, PRIMITIVE_TYPES, structs)
            .unwrap_or_else(|e| panic!("bad test schema: {}", e));
        let tables = structs
            .iter()
            .map(|(n, f)| (n.to_string(), f.iter().map(|(t, n)| (t.to_string(), n.to_string())).collect()))
            .collect();
        let mut buf = Vec::new();
        buf.extend_from_slice(format::MAGIC);
        buf.push(if layout.pointer_size == 8 { format::POINTER_CODE_8 } else { format::POINTER_CODE_4 });
        buf.push(match layout.endian {
            Endian::Little => format::ENDIAN_CODE_LITTLE,
            Endian::Big => format::ENDIAN_CODE_BIG,
        });
        buf.extend_from_slice(format!("{:03}", version).as_bytes());
        Self { layout, tables, schema, buf, schema_written: false }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn put_i32(&mut self, v: i32) {
        let _ = match self.layout.endian {
            Endian::Little => self.buf.write_i32::<LittleEndian>(v),
            Endian::Big => self.buf.write_i32::<BigEndian>(v),
        };
    }

    fn put_i16(&mut self, v: i16) {
        let _ = match self.layout.endian {
            Endian::Little => self.buf.write_i16::<LittleEndian>(v),
            Endian::Big => self.buf.write_i16::<BigEndian>(v),
        };
    }

    fn put_ptr(&mut self, v: u64) {
        let _ = match (self.layout.pointer_size, self.layout.endian) {
            (8, Endian::Little) => self.buf.write_u64::<LittleEndian>(v),
            (8, Endian::Big) => self.buf.write_u64::<BigEndian>(v),
            (_, Endian::Little) => self.buf.write_u32::<LittleEndian>(v as u32),
            (_, Endian::Big) => self.buf.write_u32::<BigEndian>(v as u32),
        };
    }

    /// Block header only; `len` may lie about the body.
    pub fn raw_header(&mut self, code: BlockCode, len: i32, old: u64, sdna: usize, count: usize) {
        self.buf.extend_from_slice(&code);
        self.put_i32(len);
        self.put_ptr(old);
        self.put_i32(sdna as i32);
        self.put_i32(count as i32);
    }

    pub fn raw_block(&mut self, code: BlockCode, old: u64, sdna: usize, count: usize, body: &[u8]) {
        self.raw_header(code, body.len() as i32, old, sdna, count);
        self.buf.extend_from_slice(body);
    }

    /// Encode one struct in this document's layout.
    pub fn encode(&self, struct_name: &str, fields: &[(&str, FieldValue<'_>)]) -> Vec<u8> {
        let si = self
            .schema
            .struct_index(struct_name)
            .unwrap_or_else(|| panic!("no struct {}", struct_name));
        let mut body = vec![0u8; self.schema.struct_size(si)];
        for (path, value) in fields {
            self.write_field(&mut body, si, path, *value);
        }
        body
    }

    fn write_field(&self, body: &mut [u8], si: usize, path: &str, value: FieldValue<'_>) {
        let mut si = si;
        let mut base = 0;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            let f = *self
                .schema
                .find_field(si, part)
                .unwrap_or_else(|| panic!("no field {}.{}", self.schema.struct_name(si), part));
            if parts.peek().is_some() {
                match f.kind {
                    FieldKind::Struct(nested) => {
                        si = nested;
                        base += f.offset;
                        continue;
                    }
                    _ => panic!("{} is not a struct", part),
                }
            }
            let at = base + f.offset;
            let out = &mut body[at..at + f.size()];
            match (f.kind, value) {
                (FieldKind::Pointer, Ptr(v)) => self.encode_ptr(out, v),
                (FieldKind::Primitive(p), Str(s)) if p.is_char() => {
                    let n = s.len().min(out.len().saturating_sub(1));
                    out[..n].copy_from_slice(&s.as_bytes()[..n]);
                }
                (FieldKind::Primitive(p), Int(v)) => self.encode_num(out, p, v as f64, v),
                (FieldKind::Primitive(p), Float(v)) => self.encode_num(out, p, v, v as i64),
                (FieldKind::Primitive(p), Floats(vs)) => {
                    for (chunk, v) in out.chunks_mut(p.size()).zip(vs.iter()) {
                        self.encode_num(chunk, p, *v, *v as i64);
                    }
                }
                (kind, v) => panic!("cannot write {:?} into {} ({:?})", v, path, kind),
            }
            return;
        }
    }

    fn encode_ptr(&self, out: &mut [u8], v: u64) {
        match (self.layout.pointer_size, self.layout.endian) {
            (8, Endian::Little) => LittleEndian::write_u64(out, v),
            (8, Endian::Big) => BigEndian::write_u64(out, v),
            (_, Endian::Little) => LittleEndian::write_u32(out, v as u32),
            (_, Endian::Big) => BigEndian::write_u32(out, v as u32),
        }
    }

    fn encode_num(&self, out: &mut [u8], p: Primitive, f: f64, i: i64) {
        match self.layout.endian {
            Endian::Little => write_num::<LittleEndian>(out, p, f, i),
            Endian::Big => write_num::<BigEndian>(out, p, f, i),
        }
    }

    /// Block holding one struct.
    pub fn struct_block(&mut self, code: BlockCode, old: u64, struct_name: &str, fields: &[(&str, FieldValue<'_>)]) -> u64 {
        let body = self.encode(struct_name, fields);
        let si = self.schema.struct_index(struct_name).unwrap_or(0);
        self.raw_block(code, old, si, 1, &body);
        old
    }

    /// Block holding consecutive structs.
    pub fn struct_array(&mut self, old: u64, struct_name: &str, items: &[Vec<(&str, FieldValue<'_>)>]) -> u64 {
        let mut body = Vec::new();
        for item in items {
            body.extend(self.encode(struct_name, item));
        }
        let si = self.schema.struct_index(struct_name).unwrap_or(0);
        self.raw_block(format::DATA, old, si, items.len(), &body);
        old
    }

    /// Untyped array of old addresses.
    pub fn pointer_array(&mut self, old: u64, ptrs: &[u64]) -> u64 {
        let mut body = vec![0u8; ptrs.len() * self.layout.pointer_size];
        for (chunk, p) in body.chunks_mut(self.layout.pointer_size).zip(ptrs) {
            self.encode_ptr(chunk, *p);
        }
        self.raw_block(format::DATA, old, 0, ptrs.len(), &body);
        old
    }

    /// Record block: `fields` plus the prefixed name.
    pub fn record(&mut self, code: IdCode, old: u64, struct_name: &str, name: &str, fields: &[(&str, FieldValue<'_>)]) -> u64 {
        let full = format!("{}{}", code, name);
        let mut all = vec![("id.name", Str(&full))];
        all.extend_from_slice(fields);
        self.struct_block(code.block_code(), old, struct_name, &all)
    }

    // ------------------------------------------------------------------
    // Common blocks
    // ------------------------------------------------------------------

    pub fn glob(&mut self, subversion: i64) {
        self.glob_with_scene(subversion, 0);
    }

    pub fn glob_with_scene(&mut self, subversion: i64, curscene: u64) {
        self.struct_block(
            format::GLOB,
            0,
            "FileGlobal",
            &[("subversion", Int(subversion)), ("curscene", Ptr(curscene)), ("filename", Str("test.blend"))],
        );
    }

    pub fn library(&mut self, old: u64, name: &str, path: &str) -> u64 {
        self.record(IdCode::LI, old, "Library", name, &[("name", Str(path))])
    }

    /// Library whose document is packed inside this one.
    pub fn packed_library(&mut self, old: u64, name: &str, path: &str, bytes: &[u8]) -> u64 {
        let (pf, data) = (old + 0x10, old + 0x20);
        self.record(IdCode::LI, old, "Library", name, &[("name", Str(path)), ("packedfile", Ptr(pf))]);
        self.packed_payload(pf, data, bytes);
        old
    }

    fn packed_payload(&mut self, pf: u64, data: u64, bytes: &[u8]) {
        self.struct_block(format::DATA, pf, "PackedFile", &[("size", Int(bytes.len() as i64)), ("data", Ptr(data))]);
        self.raw_block(format::DATA, data, 0, 1, bytes);
    }

    /// Reference stub; `full_name` carries the type prefix.
    pub fn id_stub(&mut self, old: u64, full_name: &str) -> u64 {
        self.struct_block(IdCode::ID.block_code(), old, "ID", &[("name", Str(full_name))])
    }

    pub fn camera(&mut self, old: u64, name: &str, lens: f64) -> u64 {
        self.record(IdCode::CA, old, "Camera", name, &[("lens", Float(lens))])
    }

    pub fn lamp(&mut self, old: u64, name: &str, energy: f64) -> u64 {
        self.record(IdCode::LA, old, "Lamp", name, &[("energy", Float(energy))])
    }

    pub fn world(&mut self, old: u64, name: &str) -> u64 {
        self.record(IdCode::WO, old, "World", name, &[])
    }

    pub fn object(&mut self, old: u64, name: &str, data: u64) -> u64 {
        self.record(IdCode::OB, old, "Object", name, &[("data", Ptr(data)), ("size", Floats(&[1.0, 1.0, 1.0]))])
    }

    /// Object with material slots; the slot array is written after it.
    pub fn object_with_materials(&mut self, old: u64, name: &str, data: u64, mats: &[u64]) -> u64 {
        let array = old + 0x10;
        self.record(
            IdCode::OB,
            old,
            "Object",
            name,
            &[("data", Ptr(data)), ("mat", Ptr(array)), ("totcol", Int(mats.len() as i64))],
        );
        self.pointer_array(array, mats);
        old
    }

    /// Scene with one base per object; bases follow the scene.
    pub fn scene(&mut self, old: u64, name: &str, objects: &[u64]) -> u64 {
        self.scene_with(old, name, objects, &[])
    }

    pub fn scene_with(&mut self, old: u64, name: &str, objects: &[u64], fields: &[(&str, FieldValue<'_>)]) -> u64 {
        let base_old = |i: usize| old + 0x100 + 0x10 * i as u64;
        let (first, last) = match objects.len() {
            0 => (0, 0),
            n => (base_old(0), base_old(n - 1)),
        };
        let mut all = vec![("base.first", Ptr(first)), ("base.last", Ptr(last))];
        all.extend_from_slice(fields);
        self.record(IdCode::SC, old, "Scene", name, &all);
        for (i, ob) in objects.iter().enumerate() {
            let next = if i + 1 < objects.len() { base_old(i + 1) } else { 0 };
            let prev = if i > 0 { base_old(i - 1) } else { 0 };
            self.struct_block(
                format::DATA,
                base_old(i),
                "Base",
                &[("next", Ptr(next)), ("prev", Ptr(prev)), ("object", Ptr(*ob))],
            );
        }
        old
    }

    pub fn group(&mut self, old: u64, name: &str, objects: &[u64]) -> u64 {
        let item_old = |i: usize| old + 0x100 + 0x10 * i as u64;
        let (first, last) = match objects.len() {
            0 => (0, 0),
            n => (item_old(0), item_old(n - 1)),
        };
        self.record(IdCode::GR, old, "Group", name, &[("gobject.first", Ptr(first)), ("gobject.last", Ptr(last))]);
        for (i, ob) in objects.iter().enumerate() {
            let next = if i + 1 < objects.len() { item_old(i + 1) } else { 0 };
            let prev = if i > 0 { item_old(i - 1) } else { 0 };
            self.struct_block(
                format::DATA,
                item_old(i),
                "GroupObject",
                &[("next", Ptr(next)), ("prev", Ptr(prev)), ("ob", Ptr(*ob))],
            );
        }
        old
    }

    /// Mesh with material slots and a vertex array.
    pub fn mesh(&mut self, old: u64, name: &str, mats: &[u64], verts: &[[f64; 3]]) -> u64 {
        let (array, mvert) = (old + 0x10, old + 0x20);
        self.record(
            IdCode::ME,
            old,
            "Mesh",
            name,
            &[
                ("mat", Ptr(if mats.is_empty() { 0 } else { array })),
                ("mvert", Ptr(if verts.is_empty() { 0 } else { mvert })),
                ("totvert", Int(verts.len() as i64)),
                ("totcol", Int(mats.len() as i64)),
            ],
        );
        if !mats.is_empty() {
            self.pointer_array(array, mats);
        }
        if !verts.is_empty() {
            let items: Vec<Vec<(&str, FieldValue<'_>)>> = verts.iter().map(|co| vec![("co", Floats(co))]).collect();
            self.struct_array(mvert, "MVert", &items);
        }
        old
    }

    pub fn material(&mut self, old: u64, name: &str, image: u64) -> u64 {
        self.record(IdCode::MA, old, "Material", name, &[("image", Ptr(image)), ("alpha", Float(1.0))])
    }

    /// Image, optionally packed as `(packedfile old, payload old, bytes)`.
    pub fn image(&mut self, old: u64, name: &str, packed: Option<(u64, u64, &[u8])>) -> u64 {
        match packed {
            Some((pf, data, bytes)) => {
                self.record(IdCode::IM, old, "Image", name, &[("packedfile", Ptr(pf))]);
                self.packed_payload(pf, data, bytes);
            }
            None => {
                self.record(IdCode::IM, old, "Image", name, &[]);
            }
        }
        old
    }

    // ------------------------------------------------------------------
    // Schema and terminator
    // ------------------------------------------------------------------

    /// Write the `DNA1` block now.
    pub fn schema_block(&mut self) {
        let body = self.encode_schema();
        self.raw_block(format::DNA1, 0, 0, 1, &body);
        self.schema_written = true;
    }

    fn encode_schema(&self) -> Vec<u8> {
        let mut types: Vec<String> = PRIMITIVE_TYPES.iter().map(|(n, _)| n.to_string()).collect();
        types.extend(self.tables.iter().map(|(n, _)| n.clone()));
        let mut names: Vec<String> = Vec::new();
        let mut structs: Vec<(usize, Vec<(usize, usize)>)> = Vec::new();
        for (sname, fields) in &self.tables {
            let mut out = Vec::new();
            for (ftype, fname) in fields {
                let ti = types.iter().position(|t| t == ftype).unwrap_or(0);
                let ni = match names.iter().position(|n| n == fname) {
                    Some(i) => i,
                    None => {
                        names.push(fname.clone());
                        names.len() - 1
                    }
                };
                out.push((ti, ni));
            }
            let ti = types.iter().position(|t| t == sname).unwrap_or(0);
            structs.push((ti, out));
        }

        let mut w = DocWriter { buf: Vec::new(), ..self.shallow() };
        w.buf.extend_from_slice(b"SDNA");
        w.buf.extend_from_slice(b"NAME");
        w.put_i32(names.len() as i32);
        for n in &names {
            w.buf.extend_from_slice(n.as_bytes());
            w.buf.push(0);
        }
        w.align4();
        w.buf.extend_from_slice(b"TYPE");
        w.put_i32(types.len() as i32);
        for t in &types {
            w.buf.extend_from_slice(t.as_bytes());
            w.buf.push(0);
        }
        w.align4();
        w.buf.extend_from_slice(b"TLEN");
        for i in 0..types.len() {
            w.put_i16(self.schema.type_size(i) as i16);
        }
        w.align4();
        w.buf.extend_from_slice(b"STRC");
        w.put_i32(structs.len() as i32);
        for (ti, fields) in &structs {
            w.put_i16(*ti as i16);
            w.put_i16(fields.len() as i16);
            for (ft, fn_) in fields {
                w.put_i16(*ft as i16);
                w.put_i16(*fn_ as i16);
            }
        }
        w.buf
    }

    fn shallow(&self) -> DocWriter {
        DocWriter {
            layout: self.layout,
            tables: Vec::new(),
            schema: self.schema.clone(),
            buf: Vec::new(),
            schema_written: true,
        }
    }

    fn align4(&mut self) {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
    }

    fn endb(&mut self) {
        self.raw_header(format::ENDB, 0, 0, 0, 0);
    }

    /// Schema (unless already written) and terminator.
    pub fn finish(mut self) -> Vec<u8> {
        if !self.schema_written {
            self.schema_block();
        }
        self.endb();
        self.buf
    }

    /// Terminator only.
    pub fn finish_without_schema(mut self) -> Vec<u8> {
        self.endb();
        self.buf
    }

    /// Bytes written so far, without a terminator.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

fn write_num<B: ByteOrder>(out: &mut [u8], p: Primitive, f: f64, i: i64) {
    match p {
        Primitive::I8 | Primitive::U8 => out[0] = i as u8,
        Primitive::I16 | Primitive::U16 => B::write_i16(out, i as i16),
        Primitive::I32 | Primitive::U32 => B::write_i32(out, i as i32),
        Primitive::I64 | Primitive::U64 => B::write_i64(out, i),
        Primitive::F32 => B::write_f32(out, f as f32),
        Primitive::F64 => B::write_f64(out, f),
    }
}
