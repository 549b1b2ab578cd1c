//! # blendlink
//!
//! Loader for `.blend` scene documents and the libraries they link to.
//!
//! A document is a header followed by tagged blocks. Each block carries the
//! memory address it had when written, and the `DNA1` block describes the
//! layout of every struct in the file. Loading reads the blocks, rewrites
//! them into the program's own struct layout, swaps stored addresses for
//! handles, pulls linked records out of external library documents and
//! upgrades data written by older versions.
//!
//! ## Modules
//!
//! - [`util`] - errors, reports, arenas
//! - [`format`] - file header, block codes, record type codes
//! - [`stream`] - plain, compressed, memory-mapped and undo byte streams
//! - [`block`] - block iteration and per-document indices
//! - [`sdna`] - struct schemas, layout reconstruction, decoded values
//! - [`relocate`] - old-address relocation maps
//! - [`graph`] - records, data blocks, namespaces
//! - [`types`] - per-type linking capabilities
//! - [`versioning`] - version upgrade rules
//! - [`read`] - load sessions, library linking, thumbnails
//!
//! ## Example
//!
//! ```ignore
//! use blendlink::prelude::*;
//!
//! let result = load_primary("scene.blend")?;
//! for report in &result.reports {
//!     eprintln!("{}", report);
//! }
//! for (_, record) in result.graph.iter() {
//!     println!("{}{}", record.code(), record.name());
//! }
//! ```

pub mod util;
pub mod format;
pub mod stream;
pub mod block;
pub mod sdna;
pub mod relocate;
pub mod graph;
pub mod types;
pub mod versioning;
pub mod options;
pub mod read;

#[cfg(any(test, feature = "testutil"))]
#[doc(hidden)]
pub mod testutil;

// Re-export commonly used types
pub use util::{Error, Result, Reports, Severity};
pub use graph::{Graph, Record, RecordId, Tags};
pub use options::{LinkFlags, LoadOptions};
pub use read::{load_from_bytes, load_primary, load_primary_with, LoadResult};

/// Build date stamped by the build script.
pub const BUILD_DATE: &str = env!("BLENDLINK_BUILD_DATE");
/// Build time stamped by the build script.
pub const BUILD_TIME: &str = env!("BLENDLINK_BUILD_TIME");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{Error, Result, Reports, Severity};
    pub use crate::format::IdCode;
    pub use crate::graph::{DataBlock, FileVersion, Graph, Record, RecordId, Source, Tags};
    pub use crate::options::{LinkFlags, LoadOptions};
    pub use crate::read::{
        extract_thumbnail, load_from_bytes, load_library_named_part, load_library_path, load_memfile,
        load_primary, load_primary_with, LibraryLink, LoadResult, Session, Thumbnail,
    };
    pub use crate::sdna::{Ptr, StructValue, Value};
    pub use crate::stream::{ByteStream, MemFile};
    pub use crate::types::Registry;
}
