//! Extent table construction
//!
//! Turns the ordered band list into a gapless list of extents covering
//! `[0, total_size)`: a linear extent over each successfully bound band and
//! a zero extent over every hole in between. Bands that fail to bind are
//! left to the surrounding zero fill, so the table always covers the whole
//! image.

use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::{BackingProvider, ResourceHandle};
use crate::binder::{BindError, ResourceBinder};
use crate::catalog::BandCatalog;
use crate::progress::Progress;
use crate::signal::Termination;

/// Structural problems in the band layout or a finished table
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    /// A band starts before the previous one ends
    #[error("Band {id:x} at offset {offset} overlaps data ending at {cursor}")]
    Overlap { id: u64, offset: u64, cursor: u64 },

    /// A band ends past the logical image size
    #[error("Band {id:x} ends at {end}, past the image size of {total}")]
    BeyondImage { id: u64, end: u64, total: u64 },

    /// A table does not tile `[0, total)` exactly
    #[error("Extent {index} starts at {start}, expected {expected}")]
    Discontiguous {
        index: usize,
        start: u64,
        expected: u64,
    },

    /// A table ends short of or past the image size
    #[error("Extent table ends at {end}, expected {total}")]
    WrongLength { end: u64, total: u64 },

    /// A zero-length extent
    #[error("Extent {index} is empty")]
    EmptyExtent { index: usize },
}

/// A contiguous logical byte range of the mapped device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extent {
    /// Reads as zeroes
    Zero { start: u64, length: u64 },
    /// Backed by a block device, from its first byte
    Linear {
        start: u64,
        length: u64,
        backend: String,
    },
}

impl Extent {
    pub fn start(&self) -> u64 {
        match self {
            Extent::Zero { start, .. } | Extent::Linear { start, .. } => *start,
        }
    }

    pub fn length(&self) -> u64 {
        match self {
            Extent::Zero { length, .. } | Extent::Linear { length, .. } => *length,
        }
    }

    pub fn end(&self) -> u64 {
        self.start() + self.length()
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Extent::Zero { .. })
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extent::Zero { start, length } => write!(f, "{} +{} zero", start, length),
            Extent::Linear {
                start,
                length,
                backend,
            } => write!(f, "{} +{} linear {}", start, length, backend),
        }
    }
}

/// Ordered, contiguous extents covering a whole image
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtentTable {
    total_size: u64,
    extents: Vec<Extent>,
}

impl ExtentTable {
    /// Wrap `extents`, checking that they tile `[0, total_size)`
    pub fn new(total_size: u64, extents: Vec<Extent>) -> Result<Self, TableError> {
        let table = Self {
            total_size,
            extents,
        };
        table.validate()?;
        Ok(table)
    }

    /// Check ordering, contiguity and coverage
    pub fn validate(&self) -> Result<(), TableError> {
        let mut expected = 0u64;
        for (index, extent) in self.extents.iter().enumerate() {
            if extent.start() != expected {
                return Err(TableError::Discontiguous {
                    index,
                    start: extent.start(),
                    expected,
                });
            }
            if extent.length() == 0 {
                return Err(TableError::EmptyExtent { index });
            }
            expected = extent
                .start()
                .checked_add(extent.length())
                .ok_or(TableError::WrongLength {
                    end: u64::MAX,
                    total: self.total_size,
                })?;
        }
        if expected != self.total_size {
            return Err(TableError::WrongLength {
                end: expected,
                total: self.total_size,
            });
        }
        Ok(())
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Extent> {
        self.extents.iter()
    }

    /// Number of extents backed by a device
    pub fn linear_count(&self) -> usize {
        self.extents.iter().filter(|e| !e.is_zero()).count()
    }
}

impl<'a> IntoIterator for &'a ExtentTable {
    type Item = &'a Extent;
    type IntoIter = std::slice::Iter<'a, Extent>;

    fn into_iter(self) -> Self::IntoIter {
        self.extents.iter()
    }
}

/// Result of a build pass
#[derive(Debug)]
pub struct BuildOutcome {
    /// The finished table; empty when the build was cancelled
    pub table: ExtentTable,
    /// Bands that could not be bound and are zero-filled instead
    pub bind_failures: Vec<BindError>,
    /// A termination request arrived before every band was bound
    pub cancelled: bool,
}

/// Builds an [`ExtentTable`] while binding each band's backing resource
#[derive(Debug, Clone, Copy)]
pub struct TableBuilder {
    band_size: u64,
    total_size: u64,
}

impl TableBuilder {
    /// Check the band layout against the image size
    ///
    /// Runs before any resource is acquired, so a malformed bundle is
    /// rejected without side effects.
    pub fn new(catalog: &BandCatalog, total_size: u64) -> Result<Self, TableError> {
        let band_size = catalog.band_size();
        let mut cursor = 0u64;
        for band in catalog.bands() {
            let offset = band.offset(band_size);
            if offset < cursor {
                return Err(TableError::Overlap {
                    id: band.id,
                    offset,
                    cursor,
                });
            }
            let end = offset.checked_add(band.size).ok_or(TableError::BeyondImage {
                id: band.id,
                end: u64::MAX,
                total: total_size,
            })?;
            if end > total_size {
                return Err(TableError::BeyondImage {
                    id: band.id,
                    end,
                    total: total_size,
                });
            }
            cursor = end;
        }
        Ok(Self {
            band_size,
            total_size,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bind every band in order and emit the extent table
    ///
    /// `termination` is polled before each bind; a pending request stops the
    /// pass and leaves already-bound bands in `binder` for teardown.
    pub fn build<P, T>(
        &self,
        binder: &mut ResourceBinder<P>,
        termination: &mut T,
        progress: &mut dyn Progress,
    ) -> Result<BuildOutcome, TableError>
    where
        P: BackingProvider,
        T: Termination + ?Sized,
    {
        let mut extents = Vec::with_capacity(binder.len() * 2 + 1);
        let mut bind_failures = Vec::new();
        let mut cursor = 0u64;

        for index in 0..binder.len() {
            if termination.poll() {
                debug!("build interrupted after {} of {} bands", index, binder.len());
                return Ok(BuildOutcome {
                    table: ExtentTable::default(),
                    bind_failures,
                    cancelled: true,
                });
            }
            progress.advance(1);

            let band = binder.band(index);
            let (id, offset, size) = (band.id, band.offset(self.band_size), band.size);
            if size == 0 {
                debug!("band {:x} is empty, leaving it to zero fill", id);
                continue;
            }

            let backend = match binder.bind(index) {
                Ok(handle) => handle.locator().to_string(),
                Err(err) => {
                    warn!("{}; zero-filling {} bytes at {}", err, size, offset);
                    bind_failures.push(err);
                    continue;
                }
            };

            let hole = offset.checked_sub(cursor).ok_or(TableError::Overlap {
                id,
                offset,
                cursor,
            })?;
            if hole > 0 {
                extents.push(Extent::Zero {
                    start: cursor,
                    length: hole,
                });
            }
            extents.push(Extent::Linear {
                start: offset,
                length: size,
                backend,
            });
            cursor = offset + size;
        }

        if cursor < self.total_size {
            extents.push(Extent::Zero {
                start: cursor,
                length: self.total_size - cursor,
            });
        }

        Ok(BuildOutcome {
            table: ExtentTable::new(self.total_size, extents)?,
            bind_failures,
            cancelled: false,
        })
    }
}
