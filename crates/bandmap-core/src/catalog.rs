//! Band discovery
//!
//! Band files live under `<bundle>/bands/`, each named by its ordinal in
//! hexadecimal (`0`, `1`, ..., `1f`, ...). A band's logical offset is
//! `ordinal * band_size`. Some band stores shard files into
//! subdirectories; the walk descends into them and skips the directory
//! entries themselves.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::header::BundleHeader;

/// Band storage directory, relative to the bundle root
pub const BANDS_DIR: &str = "bands";

/// Errors that can occur during band discovery
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Failed to walk the band directory
    #[error("Failed to read band directory: {0}")]
    Walk(#[from] walkdir::Error),

    /// A band file name is not a hexadecimal ordinal
    #[error("Invalid band file name: {0}")]
    InvalidBandName(PathBuf),

    /// Two files resolve to the same ordinal
    #[error("Duplicate band {id:x}: {first} and {second}")]
    DuplicateBand {
        id: u64,
        first: PathBuf,
        second: PathBuf,
    },

    /// A band file is larger than the declared band size
    #[error("Band {id:x} is {size} bytes, larger than the band size of {band_size}")]
    OversizedBand { id: u64, size: u64, band_size: u64 },

    /// `ordinal * band_size` does not fit in 64 bits
    #[error("Band {id:x} offset overflows")]
    OffsetOverflow { id: u64 },
}

/// One band file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Band {
    /// Ordinal, parsed from the file name
    pub id: u64,
    /// Location of the band file
    pub path: PathBuf,
    /// On-disk size of the band file, in bytes
    pub size: u64,
}

impl Band {
    /// Logical offset of this band within the image
    pub fn offset(&self, band_size: u64) -> u64 {
        self.id * band_size
    }

    /// Logical offset one past the last byte of this band
    pub fn end(&self, band_size: u64) -> u64 {
        self.offset(band_size) + self.size
    }
}

/// All bands of a bundle, in ascending offset order
#[derive(Debug, Clone)]
pub struct BandCatalog {
    band_size: u64,
    bands: Vec<Band>,
}

impl BandCatalog {
    /// Discover the bands of the bundle at `bundle_root`
    pub fn discover(bundle_root: &Path, header: &BundleHeader) -> Result<Self, CatalogError> {
        let dir = bundle_root.join(BANDS_DIR);
        let mut bands = Vec::new();

        for entry in WalkDir::new(&dir).min_depth(1) {
            let entry = entry?;
            if entry.file_type().is_dir() {
                continue;
            }

            let id = parse_band_name(entry.path())?;
            let size = entry.metadata()?.len();
            bands.push(Band {
                id,
                path: entry.into_path(),
                size,
            });
        }

        debug!("discovered {} band files under {}", bands.len(), dir.display());
        Self::from_bands(header.band_size, bands)
    }

    /// Build a catalog from already-discovered bands, in any order
    pub fn from_bands(band_size: u64, mut bands: Vec<Band>) -> Result<Self, CatalogError> {
        for band in &bands {
            if band.id.checked_mul(band_size).is_none() {
                return Err(CatalogError::OffsetOverflow { id: band.id });
            }
            if band.size > band_size {
                return Err(CatalogError::OversizedBand {
                    id: band.id,
                    size: band.size,
                    band_size,
                });
            }
        }

        // The ordinal maps to the offset one-to-one, so sorting by id sorts by offset.
        bands.sort_by_key(|band| band.id);

        if let Some(pair) = bands.windows(2).find(|pair| pair[0].id == pair[1].id) {
            return Err(CatalogError::DuplicateBand {
                id: pair[0].id,
                first: pair[0].path.clone(),
                second: pair[1].path.clone(),
            });
        }

        Ok(Self { band_size, bands })
    }

    pub fn band_size(&self) -> u64 {
        self.band_size
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Logical offset of the band at `index`
    pub fn offset_of(&self, index: usize) -> u64 {
        self.bands[index].offset(self.band_size)
    }

    pub fn into_bands(self) -> Vec<Band> {
        self.bands
    }
}

fn parse_band_name(path: &Path) -> Result<u64, CatalogError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.starts_with('+'))
        .and_then(|name| u64::from_str_radix(name, 16).ok())
        .ok_or_else(|| CatalogError::InvalidBandName(path.to_path_buf()))
}
