//! Decoded struct values.
//!
//! Current-layout bytes are decoded into a small value tree so that linking
//! code works with named fields and typed references instead of byte
//! offsets. Pointers start out as [`Ptr::Old`] addresses and are replaced
//! by handles as relocation proceeds.

use std::fmt;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use super::reconstruct::{read_num, read_ptr, Num};
use super::schema::{FieldKind, Schema};
use crate::graph::{DataId, RecordId};

/// A reference field.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Ptr {
    #[default]
    Null,
    /// Address as written in the document, not yet relocated.
    Old(u64),
    /// Owned data block.
    Data(DataId),
    /// Top-level record.
    Id(RecordId),
}

impl Ptr {
    #[inline]
    pub fn from_old(addr: u64) -> Self {
        if addr == 0 {
            Ptr::Null
        } else {
            Ptr::Old(addr)
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Ptr::Null)
    }

    #[inline]
    pub fn old(&self) -> Option<u64> {
        match self {
            Ptr::Old(a) => Some(*a),
            _ => None,
        }
    }

    #[inline]
    pub fn data(&self) -> Option<DataId> {
        match self {
            Ptr::Data(d) => Some(*d),
            _ => None,
        }
    }

    #[inline]
    pub fn id(&self) -> Option<RecordId> {
        match self {
            Ptr::Id(r) => Some(*r),
            _ => None,
        }
    }
}

impl fmt::Debug for Ptr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ptr::Null => f.write_str("null"),
            Ptr::Old(a) => write!(f, "old:{:#x}", a),
            Ptr::Data(d) => write!(f, "data{:?}", d),
            Ptr::Id(r) => write!(f, "id{:?}", r),
        }
    }
}

impl Serialize for Ptr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Ptr::Null => serializer.serialize_none(),
            other => serializer.serialize_str(&format!("{:?}", other)),
        }
    }
}

/// One decoded field value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Pointer(Ptr),
    Struct(StructValue),
    Array(Vec<Value>),
    /// Text buffers and opaque bytes.
    Bytes(Vec<u8>),
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Pointer(p) => p.serialize(serializer),
            Value::Struct(s) => s.serialize(serializer),
            Value::Array(items) => items.serialize(serializer),
            Value::Bytes(b) => serializer.serialize_str(&c_string(b)),
        }
    }
}

/// A decoded struct: type name plus fields in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct StructValue {
    type_name: String,
    fields: Vec<(String, Value)>,
}

impl StructValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self { type_name: type_name.into(), fields: Vec::new() }
    }

    /// All-zero instance of a current struct.
    pub fn zeroed(schema: &Schema, struct_index: usize) -> Self {
        let bytes = vec![0u8; schema.struct_size(struct_index)];
        decode(schema, struct_index, &bytes)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.iter_mut().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Take a field out of the struct.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let pos = self.fields.iter().position(|(k, _)| k == name)?;
        Some(self.fields.remove(pos).1)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float field; integer fields convert.
    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Float array field (`co[3]`).
    pub fn floats(&self, name: &str) -> Option<Vec<f64>> {
        match self.get(name)? {
            Value::Array(items) => items
                .iter()
                .map(|v| match v {
                    Value::Float(f) => Some(*f),
                    Value::Int(i) => Some(*i as f64),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    pub fn ptr(&self, name: &str) -> Option<Ptr> {
        match self.get(name)? {
            Value::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    pub fn ptr_mut(&mut self, name: &str) -> Option<&mut Ptr> {
        match self.get_mut(name)? {
            Value::Pointer(p) => Some(p),
            _ => None,
        }
    }

    /// Text up to the first NUL.
    pub fn string(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            Value::Bytes(b) => Some(c_string(b)),
            _ => None,
        }
    }

    pub fn struct_(&self, name: &str) -> Option<&StructValue> {
        match self.get(name)? {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn struct_mut(&mut self, name: &str) -> Option<&mut StructValue> {
        match self.get_mut(name)? {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Overwrite an integer field. Returns false when absent.
    pub fn set_int(&mut self, name: &str, v: i64) -> bool {
        match self.get_mut(name) {
            Some(Value::Int(slot)) => {
                *slot = v;
                true
            }
            _ => false,
        }
    }

    pub fn set_float(&mut self, name: &str, v: f64) -> bool {
        match self.get_mut(name) {
            Some(Value::Float(slot)) => {
                *slot = v;
                true
            }
            _ => false,
        }
    }

    pub fn set_ptr(&mut self, name: &str, p: Ptr) -> bool {
        match self.ptr_mut(name) {
            Some(slot) => {
                *slot = p;
                true
            }
            None => false,
        }
    }

    /// Write text into a fixed buffer, truncated to keep a trailing NUL.
    pub fn set_string(&mut self, name: &str, s: &str) -> bool {
        match self.get_mut(name) {
            Some(Value::Bytes(buf)) if !buf.is_empty() => {
                buf.iter_mut().for_each(|b| *b = 0);
                let n = s.len().min(buf.len() - 1);
                buf[..n].copy_from_slice(&s.as_bytes()[..n]);
                true
            }
            _ => false,
        }
    }

    /// Visit every pointer, nested structs and arrays included.
    pub fn for_each_ptr_mut(&mut self, f: &mut dyn FnMut(&mut Ptr)) {
        for (_, v) in &mut self.fields {
            visit_ptrs(v, f);
        }
    }
}

fn visit_ptrs(v: &mut Value, f: &mut dyn FnMut(&mut Ptr)) {
    match v {
        Value::Pointer(p) => f(p),
        Value::Struct(s) => s.for_each_ptr_mut(f),
        Value::Array(items) => items.iter_mut().for_each(|i| visit_ptrs(i, f)),
        _ => {}
    }
}

impl Serialize for StructValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Text of a NUL-terminated buffer.
pub fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Decode one current-layout struct.
pub fn decode(schema: &Schema, struct_index: usize, bytes: &[u8]) -> StructValue {
    let mut out = StructValue::new(schema.struct_name(struct_index));
    for f in schema.fields(struct_index) {
        let name = schema.field_name(f).base.clone();
        let elem = |i: usize| -> &[u8] {
            let start = f.offset + i * f.elem_size;
            bytes.get(start..start + f.elem_size).unwrap_or(&[])
        };
        let one = |i: usize| -> Value {
            let b = elem(i);
            match f.kind {
                FieldKind::Pointer => Value::Pointer(Ptr::from_old(read_ptr(b))),
                FieldKind::Primitive(p) if b.len() == p.size() => match read_num(b, p) {
                    Num::Int(v) => Value::Int(v),
                    Num::Float(v) => Value::Float(v),
                },
                FieldKind::Primitive(p) if p.is_float() => Value::Float(0.0),
                FieldKind::Primitive(_) => Value::Int(0),
                FieldKind::Struct(nested) => Value::Struct(decode(schema, nested, b)),
                FieldKind::Opaque => Value::Bytes(b.to_vec()),
            }
        };

        let value = if f.is_char_array() {
            let start = f.offset.min(bytes.len());
            let end = (f.offset + f.size()).min(bytes.len());
            let mut buf = bytes[start..end].to_vec();
            buf.resize(f.size(), 0);
            Value::Bytes(buf)
        } else if f.count == 1 {
            one(0)
        } else {
            Value::Array((0..f.count).map(one).collect())
        };
        out.fields.push((name, value));
    }
    out
}

/// Decode `count` consecutive structs.
pub fn decode_many(schema: &Schema, struct_index: usize, count: usize, bytes: &[u8]) -> Vec<StructValue> {
    let size = schema.struct_size(struct_index);
    (0..count)
        .map(|i| {
            let start = (i * size).min(bytes.len());
            let end = ((i + 1) * size).min(bytes.len());
            decode(schema, struct_index, &bytes[start..end])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::from_tables(
            8,
            &[("char", 1), ("short", 2), ("int", 4), ("float", 4)],
            &[
                ("Inner", &[("int", "x")]),
                (
                    "Outer",
                    &[
                        ("Inner", "*next"),
                        ("char", "name[8]"),
                        ("float", "co[3]"),
                        ("Inner", "inner"),
                        ("short", "flag"),
                    ],
                ),
            ],
        )
        .unwrap()
    }

    fn bytes() -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&0xbeefu64.to_ne_bytes());
        b.extend_from_slice(b"cube\0\0\0\0");
        for v in [1.0f32, 2.0, 3.0] {
            b.extend_from_slice(&v.to_ne_bytes());
        }
        b.extend_from_slice(&42i32.to_ne_bytes());
        b.extend_from_slice(&5i16.to_ne_bytes());
        b
    }

    #[test]
    fn test_decode_fields() {
        let s = schema();
        let v = decode(&s, s.struct_index("Outer").unwrap(), &bytes());
        assert_eq!(v.type_name(), "Outer");
        assert_eq!(v.ptr("next"), Some(Ptr::Old(0xbeef)));
        assert_eq!(v.string("name").as_deref(), Some("cube"));
        assert_eq!(v.floats("co"), Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(v.struct_("inner").and_then(|i| i.int("x")), Some(42));
        assert_eq!(v.int("flag"), Some(5));
    }

    #[test]
    fn test_setters() {
        let s = schema();
        let mut v = StructValue::zeroed(&s, s.struct_index("Outer").unwrap());
        assert_eq!(v.ptr("next"), Some(Ptr::Null));
        assert!(v.set_string("name", "a-very-long-name"));
        assert_eq!(v.string("name").as_deref(), Some("a-very-"));
        assert!(v.set_int("flag", 9));
        assert!(!v.set_int("missing", 1));

        let mut seen = 0;
        v.for_each_ptr_mut(&mut |_| seen += 1);
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_serialize() {
        let s = schema();
        let v = decode(&s, s.struct_index("Outer").unwrap(), &bytes());
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["name"], "cube");
        assert_eq!(json["inner"]["x"], 42);
        assert_eq!(json["next"], "old:0xbeef");
    }
}
