//! Load configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::util::{Error, Result};

/// Options for a load session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    // Streams
    /// Memory-map plain files (needs the `mmap` feature).
    pub use_mmap: bool,

    // Content
    /// Do not keep the user preferences block.
    pub skip_userdef: bool,
    /// Read only globals and preferences, no records.
    pub skip_data: bool,

    // Linking
    /// Create missing-tagged stand-ins for records that cannot be found.
    pub use_placeholders: bool,
    /// Run version upgrade rules.
    pub run_versioning: bool,

    // Thumbnails
    /// Largest accepted thumbnail, in pixels.
    pub max_thumbnail_pixels: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            use_mmap: true,
            skip_userdef: false,
            skip_data: false,
            use_placeholders: true,
            run_versioning: true,
            max_thumbnail_pixels: 1 << 20,
        }
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mmap(mut self, on: bool) -> Self {
        self.use_mmap = on;
        self
    }

    pub fn with_skip_userdef(mut self, on: bool) -> Self {
        self.skip_userdef = on;
        self
    }

    pub fn with_skip_data(mut self, on: bool) -> Self {
        self.skip_data = on;
        self
    }

    pub fn with_placeholders(mut self, on: bool) -> Self {
        self.use_placeholders = on;
        self
    }

    pub fn with_versioning(mut self, on: bool) -> Self {
        self.run_versioning = on;
        self
    }

    pub fn with_max_thumbnail_pixels(mut self, n: usize) -> Self {
        self.max_thumbnail_pixels = n;
        self
    }

    /// Parse options from JSON; absent keys keep their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::other(format!("invalid load options: {}", e)))
    }

    /// Read options from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Flags for linking named records from a library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkFlags {
    /// Create a missing-tagged stand-in when the record is absent.
    pub use_placeholders: bool,
    /// Tag linked records indirect instead of extern.
    pub force_indirect: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json() {
        let o = LoadOptions::from_json_str(r#"{ "skip_userdef": true, "max_thumbnail_pixels": 64 }"#).unwrap();
        assert!(o.skip_userdef);
        assert_eq!(o.max_thumbnail_pixels, 64);
        assert!(o.use_placeholders);
        assert!(o.run_versioning);
    }

    #[test]
    fn test_bad_json() {
        assert!(LoadOptions::from_json_str("{ nope").is_err());
    }

    #[test]
    fn test_builder() {
        let o = LoadOptions::new().with_mmap(false).with_versioning(false);
        assert!(!o.use_mmap);
        assert!(!o.run_versioning);
        assert_eq!(LinkFlags::default(), LinkFlags { use_placeholders: false, force_indirect: false });
    }
}
