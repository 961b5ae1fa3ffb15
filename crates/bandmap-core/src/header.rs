//! Bundle header (`Info.plist`)
//!
//! Decodes the property list at the root of a sparse bundle into the two
//! numbers the core needs: the band size and the logical image size.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Header document name, relative to the bundle root
pub const HEADER_FILE: &str = "Info.plist";

/// Errors that can occur while decoding the bundle header
#[derive(Debug, Error)]
pub enum HeaderError {
    /// Failed to read the header document
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document is not a valid property list of the expected shape
    #[error("Failed to decode bundle header: {0}")]
    Decode(#[from] plist::Error),

    /// `band-size` is missing or zero
    #[error("Invalid band size in bundle header: {0:?}")]
    InvalidBandSize(Option<u64>),

    /// A required key is absent
    #[error("Missing key in bundle header: {0}")]
    MissingKey(&'static str),
}

/// Raw header dictionary
///
/// Versioning keys are read for diagnostics only, so their value types are
/// left open.
#[derive(Debug, Deserialize)]
struct InfoDictionary {
    #[serde(rename = "CFBundleInfoDictionaryVersion", default)]
    info_version: Option<plist::Value>,

    #[serde(rename = "CFBundleVersion", default)]
    version: Option<plist::Value>,

    #[serde(rename = "CFBundleDisplayVersion", default)]
    display_version: Option<plist::Value>,

    #[serde(rename = "band-size", default)]
    band_size: Option<u64>,

    #[serde(rename = "bundle-backingstore-version", default)]
    backingstore_version: Option<plist::Value>,

    #[serde(rename = "diskimage-bundle-type", default)]
    bundle_type: Option<plist::Value>,

    #[serde(rename = "size", default)]
    size: Option<u64>,
}

/// Decoded bundle header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleHeader {
    /// Size of every band except possibly the last one, in bytes (> 0)
    pub band_size: u64,
    /// Logical size of the image, in bytes
    pub total_size: u64,
}

impl BundleHeader {
    pub fn new(band_size: u64, total_size: u64) -> Result<Self, HeaderError> {
        if band_size == 0 {
            return Err(HeaderError::InvalidBandSize(Some(0)));
        }
        Ok(Self {
            band_size,
            total_size,
        })
    }

    /// Decode a header document (XML or binary property list)
    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderError> {
        let info: InfoDictionary = plist::from_bytes(bytes)?;

        debug!(
            info_version = ?info.info_version,
            version = ?info.version,
            display_version = ?info.display_version,
            backingstore_version = ?info.backingstore_version,
            bundle_type = ?info.bundle_type,
            "decoded bundle header"
        );

        let band_size = match info.band_size {
            Some(size) if size > 0 => size,
            other => return Err(HeaderError::InvalidBandSize(other)),
        };
        let total_size = info.size.ok_or(HeaderError::MissingKey("size"))?;

        Ok(Self {
            band_size,
            total_size,
        })
    }

    /// Read and decode `<bundle>/Info.plist`
    pub fn load(bundle_root: &Path) -> Result<Self, HeaderError> {
        let path = bundle_root.join(HEADER_FILE);
        let bytes = fs::read(&path).map_err(|source| HeaderError::Io {
            path: path.clone(),
            source,
        })?;
        Self::decode(&bytes)
    }

    /// Number of bands a fully populated bundle would hold
    pub fn band_count(&self) -> u64 {
        self.total_size.div_ceil(self.band_size)
    }
}
