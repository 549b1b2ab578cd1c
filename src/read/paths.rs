//! Library path handling.
//!
//! Documents store library paths either absolute or `//`-relative to the
//! document itself. Paths are normalised lexically; only
//! [`PathResolver::open`] and [`explode_library_path`] touch the filesystem.
//!
//! A path may also point inside a library: `dir/lib.blend/Object/Cube`
//! names the library, the type group and the record.

use std::path::{Component, Path, PathBuf};

use crate::options::LoadOptions;
use crate::stream::ByteStream;
use crate::util::Result;

/// Prefix marking a path relative to the referencing document.
pub const RELATIVE_PREFIX: &str = "//";

/// Turns stored library paths into streams.
pub trait PathResolver {
    /// Absolute form of `stored`, as referenced from the document at
    /// `relabase`.
    fn resolve(&self, stored: &str, relabase: &Path) -> String {
        absolute_path(stored, relabase)
    }

    /// Open a resolved library path.
    fn open(&self, path: &Path, options: &LoadOptions) -> Result<ByteStream> {
        ByteStream::open_opts(path, options.use_mmap)
    }
}

/// Filesystem resolver.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultResolver;

impl PathResolver for DefaultResolver {}

/// File name endings of documents.
pub const DOCUMENT_EXTENSIONS: &[&str] = &[".blend", ".ble", ".blend.gz"];

/// Does `path` end with a document extension (case-insensitive)?
pub fn has_document_extension(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    DOCUMENT_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// A path split into its library components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibraryPath {
    /// The document itself.
    pub library: PathBuf,
    /// Type group right below the document, e.g. `Object`.
    pub group: Option<String>,
    /// Record name. May itself contain slashes.
    pub name: Option<String>,
}

/// Split `path` into library document, group and record name.
///
/// The document is the longest prefix before a `/` that ends with a
/// document extension and is an existing file. Returns `None` for
/// directories and for paths with no such prefix.
pub fn explode_library_path(path: impl AsRef<Path>) -> Option<LibraryPath> {
    let path = path.as_ref();
    if path.is_dir() {
        return None;
    }
    let full = path.to_string_lossy();
    let is_library = |p: &str| has_document_extension(p) && Path::new(p).is_file();

    let mut end = full.len();
    while let Some(slash) = full[..end].rfind('/') {
        let dir = &full[..slash];
        if is_library(dir) {
            let rest = &full[slash + 1..];
            let (group, name) = match rest.split_once('/') {
                Some((g, n)) => (g, n),
                None => (rest, ""),
            };
            return Some(LibraryPath {
                library: PathBuf::from(dir),
                group: (!group.is_empty()).then(|| group.to_string()),
                name: (!name.is_empty()).then(|| name.to_string()),
            });
        }
        end = slash;
    }
    None
}

/// Resolve `//` against the directory of `relabase` and drop `.`/`..`.
pub fn absolute_path(stored: &str, relabase: &Path) -> String {
    let path = match stored.strip_prefix(RELATIVE_PREFIX) {
        Some(rest) => relabase.parent().unwrap_or_else(|| Path::new("")).join(rest),
        None => PathBuf::from(stored),
    };
    normalize(&path).to_string_lossy().into_owned()
}

/// `//`-relative form of `path` as seen from the document at `basepath`.
pub fn relative_path(path: &str, basepath: &Path) -> String {
    let target = normalize(Path::new(path));
    let base = normalize(basepath.parent().unwrap_or_else(|| Path::new("")));

    let t: Vec<Component<'_>> = target.components().collect();
    let b: Vec<Component<'_>> = base.components().collect();
    let common = t.iter().zip(&b).take_while(|(x, y)| x == y).count();

    let mut parts: Vec<String> = vec!["..".to_string(); b.len() - common];
    parts.extend(t[common..].iter().map(|c| c.as_os_str().to_string_lossy().into_owned()));
    format!("{}{}", RELATIVE_PREFIX, parts.join("/"))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(c),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}
