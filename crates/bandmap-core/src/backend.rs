//! Kernel-facing collaborator interfaces
//!
//! The core never talks to the kernel directly. Backing resources (loop
//! devices) come from a [`BackingProvider`], and the composite device is
//! created and removed by a [`MappingPublisher`]. Both are driven from a
//! single control loop, so neither trait requires `Send` or `Sync`.

use std::io;
use std::path::Path;
use thiserror::Error;

use crate::table::ExtentTable;

/// Failure reported by a backing provider or mapping publisher
#[derive(Debug, Error)]
pub enum BackendError {
    /// A system call failed
    #[error("{op} {target}: {source}")]
    Io {
        /// Operation that failed (e.g. "attach", "LOOP_SET_FD")
        op: &'static str,
        /// File, device or mapping the operation targeted
        target: String,
        #[source]
        source: io::Error,
    },

    /// The collaborator refused the request without an OS error
    #[error("{op} {target}: {reason}")]
    Rejected {
        op: &'static str,
        target: String,
        reason: String,
    },
}

impl BackendError {
    pub fn io(op: &'static str, target: impl Into<String>, source: io::Error) -> Self {
        BackendError::Io {
            op,
            target: target.into(),
            source,
        }
    }

    pub fn rejected(
        op: &'static str,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        BackendError::Rejected {
            op,
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Operation label, for log lines
    pub fn op(&self) -> &'static str {
        match self {
            BackendError::Io { op, .. } | BackendError::Rejected { op, .. } => *op,
        }
    }
}

/// An attached backing resource
///
/// The locator is what gets embedded into a linear extent, e.g. `/dev/loop7`.
pub trait ResourceHandle {
    fn locator(&self) -> &str;
}

/// Attaches band files to kernel-visible block objects
pub trait BackingProvider {
    type Handle: ResourceHandle;

    /// Attach `path`, returning a handle whose locator addresses the file as a block device
    fn attach(&mut self, path: &Path, read_only: bool) -> Result<Self::Handle, BackendError>;

    /// Detach a previously attached handle
    ///
    /// On failure the handle is still considered attached.
    fn detach(&mut self, handle: &Self::Handle) -> Result<(), BackendError>;
}

/// Flags passed when creating the mapped device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapFlags {
    pub read_only: bool,
}

impl MapFlags {
    pub const READ_ONLY: MapFlags = MapFlags { read_only: true };
}

/// Composes an extent table into one named block device
pub trait MappingPublisher {
    /// Create device `name`, load `table` into it and make it live
    fn create(
        &mut self,
        name: &str,
        unique_id: &str,
        flags: MapFlags,
        table: &ExtentTable,
    ) -> Result<(), BackendError>;

    /// Remove device `name`
    fn remove(&mut self, name: &str) -> Result<(), BackendError>;
}

impl<P: BackingProvider + ?Sized> BackingProvider for &mut P {
    type Handle = P::Handle;

    fn attach(&mut self, path: &Path, read_only: bool) -> Result<Self::Handle, BackendError> {
        (**self).attach(path, read_only)
    }

    fn detach(&mut self, handle: &Self::Handle) -> Result<(), BackendError> {
        (**self).detach(handle)
    }
}

impl<M: MappingPublisher + ?Sized> MappingPublisher for &mut M {
    fn create(
        &mut self,
        name: &str,
        unique_id: &str,
        flags: MapFlags,
        table: &ExtentTable,
    ) -> Result<(), BackendError> {
        (**self).create(name, unique_id, flags, table)
    }

    fn remove(&mut self, name: &str) -> Result<(), BackendError> {
        (**self).remove(name)
    }
}
