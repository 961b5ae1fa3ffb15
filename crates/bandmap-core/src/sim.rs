//! Dry-run collaborators
//!
//! Stand-ins for the loop-device provider and the device-mapper publisher
//! that never touch the kernel. Each call sleeps a fixed delay so a dry run
//! paces roughly like a real one.

use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::backend::{BackendError, BackingProvider, MapFlags, MappingPublisher, ResourceHandle};
use crate::table::ExtentTable;

/// Delay applied to every simulated attach/detach
pub const SIMULATED_DELAY: Duration = Duration::from_millis(1);

/// Handle returned by [`SimulatedProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedHandle {
    locator: String,
}

impl ResourceHandle for SimulatedHandle {
    fn locator(&self) -> &str {
        &self.locator
    }
}

/// Pretends to attach band files
#[derive(Debug)]
pub struct SimulatedProvider {
    delay: Duration,
    next: u64,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::with_delay(SIMULATED_DELAY)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay, next: 0 }
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingProvider for SimulatedProvider {
    type Handle = SimulatedHandle;

    fn attach(&mut self, path: &Path, _read_only: bool) -> Result<SimulatedHandle, BackendError> {
        thread::sleep(self.delay);
        let locator = format!("sim-loop{}", self.next);
        self.next += 1;
        trace!("[dry-run] attached {} as {}", path.display(), locator);
        Ok(SimulatedHandle { locator })
    }

    fn detach(&mut self, handle: &SimulatedHandle) -> Result<(), BackendError> {
        thread::sleep(self.delay);
        trace!("[dry-run] detached {}", handle.locator);
        Ok(())
    }
}

/// Pretends to create and remove the mapped device
#[derive(Debug, Default)]
pub struct SimulatedPublisher {
    live: Option<String>,
}

impl SimulatedPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the device that would currently exist
    pub fn live(&self) -> Option<&str> {
        self.live.as_deref()
    }
}

impl MappingPublisher for SimulatedPublisher {
    fn create(
        &mut self,
        name: &str,
        unique_id: &str,
        flags: MapFlags,
        table: &ExtentTable,
    ) -> Result<(), BackendError> {
        info!(
            "[dry-run] would create `{}' ({}, read-only: {}) with {} entries",
            name,
            unique_id,
            flags.read_only,
            table.len()
        );
        for extent in table {
            debug!("[dry-run]   {}", extent);
        }
        self.live = Some(name.to_string());
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), BackendError> {
        info!("[dry-run] would remove `{}'", name);
        self.live = None;
        Ok(())
    }
}
