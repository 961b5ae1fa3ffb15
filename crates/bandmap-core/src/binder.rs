//! Per-band backing resources
//!
//! The binder owns an index-addressed table of band records. Each record
//! holds the handle of its attached backing resource, if any; a record with
//! a handle is "bound". Releasing an unbound record is a no-op, and a failed
//! release leaves the handle in place so the next pass retries exactly the
//! bands that are still bound.

use std::path::PathBuf;
use thiserror::Error;
use tracing::{trace, warn};

use crate::backend::{BackendError, BackingProvider, ResourceHandle};
use crate::catalog::{Band, BandCatalog};
use crate::progress::Progress;

/// A band's backing resource could not be attached
#[derive(Debug, Error)]
#[error("Failed to attach band {id:x} ({path}): {source}")]
pub struct BindError {
    pub id: u64,
    pub path: PathBuf,
    #[source]
    pub source: BackendError,
}

/// A band's backing resource could not be detached
#[derive(Debug, Error)]
#[error("Failed to detach band {id:x} ({path}) from {locator}: {source}")]
pub struct ReleaseError {
    pub id: u64,
    pub path: PathBuf,
    pub locator: String,
    #[source]
    pub source: BackendError,
}

/// Result of releasing every bound band
#[derive(Debug, Default)]
pub struct ReleaseReport {
    /// Bands detached in this pass
    pub released: usize,
    /// Bands that are still bound
    pub failures: Vec<ReleaseError>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct BandRecord<H> {
    band: Band,
    handle: Option<H>,
}

/// Acquires and releases one backing resource per band
pub struct ResourceBinder<P: BackingProvider> {
    provider: P,
    band_size: u64,
    read_only: bool,
    records: Vec<BandRecord<P::Handle>>,
}

impl<P: BackingProvider> ResourceBinder<P> {
    pub fn new(provider: P, catalog: BandCatalog, read_only: bool) -> Self {
        let band_size = catalog.band_size();
        let records = catalog
            .into_bands()
            .into_iter()
            .map(|band| BandRecord { band, handle: None })
            .collect();
        Self {
            provider,
            band_size,
            read_only,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn band_size(&self) -> u64 {
        self.band_size
    }

    pub fn band(&self, index: usize) -> &Band {
        &self.records[index].band
    }

    pub fn is_bound(&self, index: usize) -> bool {
        self.records[index].handle.is_some()
    }

    pub fn handle(&self, index: usize) -> Option<&P::Handle> {
        self.records[index].handle.as_ref()
    }

    /// Number of bands currently holding a backing resource
    pub fn bound_count(&self) -> usize {
        self.records.iter().filter(|r| r.handle.is_some()).count()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Attach the band at `index`, or return its existing handle
    pub fn bind(&mut self, index: usize) -> Result<&P::Handle, BindError> {
        let record = &mut self.records[index];
        match record.handle {
            Some(ref handle) => Ok(handle),
            None => {
                let handle = self
                    .provider
                    .attach(&record.band.path, self.read_only)
                    .map_err(|source| BindError {
                        id: record.band.id,
                        path: record.band.path.clone(),
                        source,
                    })?;
                trace!(
                    "attached {} as {}",
                    record.band.path.display(),
                    handle.locator()
                );
                Ok(record.handle.insert(handle))
            }
        }
    }

    /// Detach the band at `index`
    ///
    /// Returns `Ok(false)` without touching the provider if the band is not
    /// bound. On failure the band stays bound.
    pub fn release(&mut self, index: usize) -> Result<bool, ReleaseError> {
        let record = &mut self.records[index];
        let Some(handle) = &record.handle else {
            return Ok(false);
        };

        if let Err(source) = self.provider.detach(handle) {
            return Err(ReleaseError {
                id: record.band.id,
                path: record.band.path.clone(),
                locator: handle.locator().to_string(),
                source,
            });
        }

        trace!(
            "detached {} from {}",
            record.band.path.display(),
            handle.locator()
        );
        record.handle = None;
        Ok(true)
    }

    /// Detach every bound band, continuing past failures
    pub fn release_all(&mut self, progress: &mut dyn Progress) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        for index in 0..self.records.len() {
            progress.advance(1);
            match self.release(index) {
                Ok(true) => report.released += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!("{}", err);
                    report.failures.push(err);
                }
            }
        }
        report
    }
}
