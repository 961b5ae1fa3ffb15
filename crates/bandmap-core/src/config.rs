//! Session configuration

use std::path::Path;

/// Teardown retries after the first failed pass
pub const DEFAULT_TEARDOWN_RETRIES: u32 = 2;

/// Immutable settings for one mapping session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Name of the mapped device
    pub device_name: String,
    /// Unique id registered with the mapped device
    pub unique_id: String,
    /// Attach bands and publish the mapping read-only
    pub read_only: bool,
    /// Failed teardown passes tolerated before giving up
    pub teardown_retries: u32,
}

impl SessionConfig {
    pub fn new(device_name: impl Into<String>, unique_id: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            unique_id: unique_id.into(),
            read_only: true,
            teardown_retries: DEFAULT_TEARDOWN_RETRIES,
        }
    }

    pub fn with_teardown_retries(mut self, retries: u32) -> Self {
        self.teardown_retries = retries;
        self
    }
}

/// Device name for a bundle: the lower-cased file stem, with every
/// non-letter replaced by `_`
///
/// `/Volumes/Backup/My Disk 2.sparsebundle` becomes `my_disk__`.
pub fn derive_device_name(bundle: &Path) -> String {
    let stem = bundle
        .file_stem()
        .map(|stem| stem.to_string_lossy())
        .unwrap_or_default();

    let mut name = String::with_capacity(stem.len());
    for c in stem.chars() {
        if c.is_alphabetic() {
            name.extend(c.to_lowercase());
        } else {
            name.push('_');
        }
    }

    if name.is_empty() {
        name.push_str("sparsebundle");
    }
    name
}
