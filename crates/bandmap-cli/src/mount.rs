//! The mount command: wire a bundle, the kernel (or the simulation) and the
//! signal handler into one mapping session.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use bandmap::{
    derive_device_name, signal_channel, BackingProvider, MappingPublisher, MappingSession,
    Outcome, SessionConfig, SessionReport, SignalReceiver, SimulatedProvider, SimulatedPublisher,
};

use crate::output::StderrProgress;

/// Options collected from the command line
#[derive(Debug, Clone)]
pub struct MountOptions {
    pub bundle: PathBuf,
    pub name: Option<String>,
    pub verbose: u8,
    pub dry_run: bool,
}

impl MountOptions {
    /// Build the immutable session configuration.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let device_name = match &self.name {
            Some(name) => name.clone(),
            None => {
                // "." and ".." have no usable file stem.
                let resolved = self.bundle.canonicalize().with_context(|| {
                    format!("cannot resolve bundle path {}", self.bundle.display())
                })?;
                derive_device_name(&resolved)
            }
        };
        Ok(SessionConfig::new(device_name, Uuid::new_v4().to_string()))
    }
}

/// Run one mapping session; returns the process exit code.
pub fn execute(options: MountOptions) -> Result<i32> {
    let config = options.session_config()?;
    debug!(
        "mapped device `{}' (uuid {}) from {}",
        config.device_name,
        config.unique_id,
        options.bundle.display()
    );

    let (sender, mut receiver) = signal_channel();
    ctrlc::set_handler(move || {
        sender.notify();
    })
    .context("failed to install the interrupt handler")?;

    let show_progress = options.verbose < 2;
    if options.dry_run {
        return drive(
            config,
            &options.bundle,
            SimulatedProvider::new(),
            SimulatedPublisher::new(),
            &mut receiver,
            show_progress,
        );
    }
    kernel(config, &options.bundle, &mut receiver, show_progress)
}

#[cfg(target_os = "linux")]
fn kernel(
    config: SessionConfig,
    bundle: &Path,
    receiver: &mut SignalReceiver,
    show_progress: bool,
) -> Result<i32> {
    drive(
        config,
        bundle,
        bandmap_sys::LoopProvider::new(),
        bandmap_sys::DeviceMapper::new(),
        receiver,
        show_progress,
    )
}

#[cfg(not(target_os = "linux"))]
fn kernel(
    _config: SessionConfig,
    _bundle: &Path,
    _receiver: &mut SignalReceiver,
    _show_progress: bool,
) -> Result<i32> {
    anyhow::bail!("loop devices and device-mapper need Linux; use --dry-run")
}

fn drive<P, M>(
    config: SessionConfig,
    bundle: &Path,
    provider: P,
    publisher: M,
    receiver: &mut SignalReceiver,
    show_progress: bool,
) -> Result<i32>
where
    P: BackingProvider,
    M: MappingPublisher,
{
    let mut session = MappingSession::open(config, bundle, provider, publisher)
        .with_context(|| format!("cannot map {}", bundle.display()))?;

    let mut progress = StderrProgress::new(session.binder().len() as u64, show_progress);
    let report = session
        .run(receiver, &mut progress)
        .with_context(|| format!("cannot map {}", bundle.display()))?;
    drop(progress);

    summarize(&report);
    Ok(report.outcome.exit_code())
}

fn summarize(report: &SessionReport) {
    if !report.bind_failures.is_empty() {
        warn!(
            "{} band(s) were zero-filled because they could not be attached",
            report.bind_failures.len()
        );
    }
    if let Some(err) = &report.publish_error {
        warn!("the device was never published: {}", err);
    }
    match report.outcome {
        Outcome::Clean => debug!(
            "released everything after {} teardown pass(es)",
            report.teardown_passes
        ),
        Outcome::Abandoned => error!(
            "{} band(s) still attached{}",
            report.still_bound,
            if report.mapping_left {
                ", mapped device still present"
            } else {
                ""
            }
        ),
    }
    if report.cancelled {
        info!("interrupted before the device was published");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(bundle: impl Into<PathBuf>, name: Option<&str>) -> MountOptions {
        MountOptions {
            bundle: bundle.into(),
            name: name.map(str::to_string),
            verbose: 0,
            dry_run: true,
        }
    }

    #[test]
    fn test_explicit_name_wins() {
        let config = options("/nowhere/Disk.sparsebundle", Some("custom"))
            .session_config()
            .unwrap();
        assert_eq!(config.device_name, "custom");
        assert!(config.read_only);
    }

    #[test]
    fn test_name_derived_from_resolved_path() {
        let dir = tempfile::Builder::new()
            .prefix("Backup")
            .suffix(".sparsebundle")
            .tempdir()
            .unwrap();
        let config = options(dir.path(), None).session_config().unwrap();
        assert!(config.device_name.starts_with("backup"));
        assert!(config
            .device_name
            .chars()
            .all(|c| c.is_lowercase() || c == '_'));
    }

    #[test]
    fn test_missing_bundle_cannot_derive_name() {
        assert!(options("/nonexistent/x.sparsebundle", None)
            .session_config()
            .is_err());
    }

    #[test]
    fn test_unique_id_is_fresh_uuid() {
        let a = options("/x", Some("a")).session_config().unwrap();
        let b = options("/x", Some("a")).session_config().unwrap();
        assert_ne!(a.unique_id, b.unique_id);
        assert!(Uuid::parse_str(&a.unique_id).is_ok());
    }
}
