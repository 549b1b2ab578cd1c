//! Struct schema tables and layout reconstruction.
//!
//! Every document embeds the layout of each struct it wrote (the `DNA1`
//! block). This module parses that table, compares it to the program's
//! [`current`] layout and rewrites block bodies from one to the other.
//!
//! - [`Schema`] - parsed or built-in struct table with computed offsets
//! - [`compare`] - per-struct [`CompareFlag`]
//! - [`reconstruct`] - field-by-field layout conversion
//! - [`StructValue`] - decoded current-layout struct

pub mod current;
mod compare;
mod name;
mod reconstruct;
mod schema;
mod value;

pub use compare::{compare, CompareFlag};
pub use name::FieldName;
pub use reconstruct::{reconstruct, switch_endian};
pub use schema::{FieldDef, FieldKind, FieldLayout, Primitive, Schema, StructDef};
pub use value::{c_string, decode, decode_many, Ptr, StructValue, Value};

pub(crate) use reconstruct::read_ptr;
