//! Bandmap core library
//!
//! Exposes a sparse disk-image bundle (a directory of fixed-size band files
//! plus an `Info.plist` header) as a single read-only mapped block device.
//!
//! This crate provides:
//! - Header decoding (`Info.plist`)
//! - Band discovery and ordering (`bands/`)
//! - Extent table construction (linear and zero-fill extents)
//! - Per-band backing resource binding and idempotent release
//! - The attach/publish/await/retract/release session lifecycle
//!
//! Kernel-facing collaborators are described by the traits in [`backend`];
//! Linux implementations live in the `bandmap-sys` crate.

pub mod backend;
pub mod binder;
pub mod catalog;
pub mod config;
pub mod error;
pub mod header;
pub mod progress;
pub mod session;
pub mod signal;
pub mod sim;
pub mod table;

pub use backend::{BackendError, BackingProvider, MapFlags, MappingPublisher, ResourceHandle};
pub use binder::{BindError, ReleaseError, ReleaseReport, ResourceBinder};
pub use catalog::{Band, BandCatalog, CatalogError, BANDS_DIR};
pub use config::{derive_device_name, SessionConfig, DEFAULT_TEARDOWN_RETRIES};
pub use error::StructuralError;
pub use header::{BundleHeader, HeaderError, HEADER_FILE};
pub use progress::{NoProgress, Progress};
pub use session::{MappingSession, Outcome, PublishError, SessionReport, SessionState};
pub use signal::{signal_channel, SignalReceiver, SignalSender, Termination};
pub use sim::{SimulatedHandle, SimulatedProvider, SimulatedPublisher};
pub use table::{BuildOutcome, Extent, ExtentTable, TableBuilder, TableError};
