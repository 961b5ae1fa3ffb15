//! Mapping session lifecycle
//!
//! ```text
//!   Building ──► Published ──► TearingDown ──► Done
//!      │   (publish failed)        ▲   │
//!      ├───────────────────────────┤   │ pass failed, retries left:
//!      └── cancelled ──────────────┘   └─ wait for the next request, retry
//! ```
//!
//! Building binds every band and builds the extent table. A termination
//! request during the bind loop skips publishing and tears down whatever is
//! already bound. Once the mapped device is live the session blocks until
//! the operator asks it to stop. Each teardown pass first removes the mapped
//! device and then releases every band that is still bound; a failed pass is
//! retried on the next request, up to the configured number of retries.

use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, BackingProvider, MapFlags, MappingPublisher, ResourceHandle};
use crate::binder::{BindError, ResourceBinder};
use crate::catalog::BandCatalog;
use crate::config::SessionConfig;
use crate::error::StructuralError;
use crate::header::BundleHeader;
use crate::progress::Progress;
use crate::signal::Termination;
use crate::table::{ExtentTable, TableBuilder};

/// The mapped device could not be created
#[derive(Debug, Error)]
#[error("Failed to create mapped device `{name}': {source}")]
pub struct PublishError {
    pub name: String,
    #[source]
    pub source: BackendError,
}

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Building,
    Published,
    TearingDown,
    Done,
}

/// How the session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Mapping removed and every band released
    Clean,
    /// Teardown kept failing; resources were left for manual cleanup
    Abandoned,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Clean => 0,
            Outcome::Abandoned => 1,
        }
    }
}

/// Summary of a finished session
#[derive(Debug)]
pub struct SessionReport {
    pub outcome: Outcome,
    /// Entries in the published table (0 if nothing was published)
    pub extents: usize,
    /// Bands that were zero-filled because they could not be bound
    pub bind_failures: Vec<BindError>,
    /// Set when the mapped device could not be created
    pub publish_error: Option<PublishError>,
    /// A termination request interrupted the bind loop
    pub cancelled: bool,
    /// Teardown passes run, including the successful one
    pub teardown_passes: u32,
    /// Bands still bound when the session ended
    pub still_bound: usize,
    /// The mapped device still exists
    pub mapping_left: bool,
}

/// Owns every piece of mutable state for one bundle mapping
pub struct MappingSession<P: BackingProvider, M: MappingPublisher> {
    config: SessionConfig,
    builder: TableBuilder,
    binder: ResourceBinder<P>,
    publisher: M,
    table: ExtentTable,
    state: SessionState,
    mapping_published: bool,
    teardown_failures: u32,
}

impl<P: BackingProvider, M: MappingPublisher> MappingSession<P, M> {
    /// Prepare a session over an already-discovered catalog
    ///
    /// Fails on a band layout that cannot tile the image; no resource has
    /// been acquired at that point.
    pub fn new(
        config: SessionConfig,
        header: &BundleHeader,
        catalog: BandCatalog,
        provider: P,
        publisher: M,
    ) -> Result<Self, StructuralError> {
        let builder = TableBuilder::new(&catalog, header.total_size)?;
        let binder = ResourceBinder::new(provider, catalog, config.read_only);
        Ok(Self {
            config,
            builder,
            binder,
            publisher,
            table: ExtentTable::default(),
            state: SessionState::Building,
            mapping_published: false,
            teardown_failures: 0,
        })
    }

    /// Read the header and discover the bands of the bundle at `bundle_root`
    pub fn open(
        config: SessionConfig,
        bundle_root: &Path,
        provider: P,
        publisher: M,
    ) -> Result<Self, StructuralError> {
        let header = BundleHeader::load(bundle_root)?;
        let catalog = BandCatalog::discover(bundle_root, &header)?;
        info!(
            "bundle {}: {} bytes in {} of {} bands of {} bytes",
            bundle_root.display(),
            header.total_size,
            catalog.len(),
            header.band_count(),
            header.band_size
        );
        Self::new(config, &header, catalog, provider, publisher)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn table(&self) -> &ExtentTable {
        &self.table
    }

    pub fn binder(&self) -> &ResourceBinder<P> {
        &self.binder
    }

    pub fn publisher(&self) -> &M {
        &self.publisher
    }

    pub fn is_published(&self) -> bool {
        self.mapping_published
    }

    pub fn teardown_failures(&self) -> u32 {
        self.teardown_failures
    }

    /// Drive the session from Building to Done
    pub fn run<T>(
        &mut self,
        termination: &mut T,
        progress: &mut dyn Progress,
    ) -> Result<SessionReport, StructuralError>
    where
        T: Termination + ?Sized,
    {
        self.state = SessionState::Building;
        debug!(
            "preparing backing devices for mapped device `{}'",
            self.config.device_name
        );
        progress.describe("attaching");
        progress.reset();

        let built = match self.builder.build(&mut self.binder, termination, progress) {
            Ok(built) => built,
            Err(err) => {
                self.teardown(termination, progress);
                return Err(err.into());
            }
        };

        let mut publish_error = None;
        if built.cancelled {
            info!("interrupted; releasing {} bound bands", self.binder.bound_count());
        } else {
            self.table = built.table;
            match self.publish() {
                Ok(()) => {
                    self.state = SessionState::Published;
                    info!(
                        "`{}' ready ({} entries). ^C to shut down.",
                        self.config.device_name,
                        self.table.len()
                    );
                    termination.wait();
                }
                Err(err) => {
                    error!("{}", err);
                    publish_error = Some(err);
                }
            }
        }

        let (outcome, teardown_passes) = self.teardown(termination, progress);
        Ok(SessionReport {
            outcome,
            extents: if publish_error.is_none() && !built.cancelled {
                self.table.len()
            } else {
                0
            },
            bind_failures: built.bind_failures,
            publish_error,
            cancelled: built.cancelled,
            teardown_passes,
            still_bound: self.binder.bound_count(),
            mapping_left: self.mapping_published,
        })
    }

    fn publish(&mut self) -> Result<(), PublishError> {
        let flags = if self.config.read_only {
            MapFlags::READ_ONLY
        } else {
            MapFlags::default()
        };
        debug!(
            "creating mapped device `{}' with a {}-entry table",
            self.config.device_name,
            self.table.len()
        );
        self.publisher
            .create(
                &self.config.device_name,
                &self.config.unique_id,
                flags,
                &self.table,
            )
            .map_err(|source| PublishError {
                name: self.config.device_name.clone(),
                source,
            })?;
        self.mapping_published = true;
        Ok(())
    }

    /// Run teardown passes until one succeeds or the retries are used up
    fn teardown<T>(&mut self, termination: &mut T, progress: &mut dyn Progress) -> (Outcome, u32)
    where
        T: Termination + ?Sized,
    {
        let mut passes = 0;
        let outcome = loop {
            self.state = SessionState::TearingDown;
            passes += 1;

            if self.teardown_pass(progress) {
                self.teardown_failures = 0;
                break Outcome::Clean;
            }

            self.teardown_failures += 1;
            let retries_left = (self.config.teardown_retries + 1).saturating_sub(self.teardown_failures);
            if retries_left == 0 {
                error!("giving up; manual cleanup will be required");
                self.log_leftovers();
                break Outcome::Abandoned;
            }

            if retries_left == 1 {
                warn!("teardown failed again; ^C to try one last time");
            } else {
                warn!("teardown failed; ^C to try again");
            }
            // A request queued while the pass ran does not count as the answer.
            termination.poll();
            termination.wait();
        };
        self.state = SessionState::Done;
        (outcome, passes)
    }

    /// Retract the mapping, then release every band still bound
    ///
    /// Bands are not released while the mapping is live, since it still
    /// holds them open.
    fn teardown_pass(&mut self, progress: &mut dyn Progress) -> bool {
        if self.mapping_published {
            debug!("unmapping `{}'", self.config.device_name);
            if let Err(err) = self.publisher.remove(&self.config.device_name) {
                error!("failed to remove mapped device `{}': {}", self.config.device_name, err);
                return false;
            }
            self.mapping_published = false;
        }

        progress.describe("detaching");
        progress.reset();
        let report = self.binder.release_all(progress);
        debug!("released {} bands", report.released);
        if !report.is_clean() {
            warn!("{} bands could not be released", report.failures.len());
            return false;
        }
        true
    }

    fn log_leftovers(&self) {
        if self.mapping_published {
            error!("mapped device `{}' still exists", self.config.device_name);
        }
        for index in 0..self.binder.len() {
            if let Some(handle) = self.binder.handle(index) {
                let band = self.binder.band(index);
                error!(
                    "band {:x} ({}) still attached at {}",
                    band.id,
                    band.path.display(),
                    handle.locator()
                );
            }
        }
    }
}
