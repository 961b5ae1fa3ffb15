//! Device-mapper publisher
//!
//! Creating a device is three ioctls on `/dev/mapper/control`:
//! `DM_DEV_CREATE` registers the name, `DM_TABLE_LOAD` stages the table and
//! `DM_DEV_SUSPEND` without the suspend flag resumes the device, which
//! swaps the staged table in. Every request is a `struct dm_ioctl` header
//! followed by request-specific data, here a run of `struct dm_target_spec`
//! records each followed by its NUL-terminated parameter string padded to
//! 8 bytes.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use tracing::{debug, warn};

use bandmap::{BackendError, Extent, ExtentTable, MapFlags, MappingPublisher};

use crate::ioctl;

/// Device-mapper addresses devices in 512-byte sectors
pub const SECTOR_SIZE: u64 = 512;

const DM_VERSION: [u32; 3] = [4, 0, 0];
const DM_NAME_LEN: usize = 128;
const DM_UUID_LEN: usize = 129;
const DM_MAX_TYPE_NAME: usize = 16;

const DM_READONLY_FLAG: u32 = 1 << 0;

const DM_IOCTL_TYPE: u32 = 0xfd;
const DM_DEV_CREATE_CMD: u32 = 3;
const DM_DEV_REMOVE_CMD: u32 = 4;
const DM_DEV_SUSPEND_CMD: u32 = 6;
const DM_TABLE_LOAD_CMD: u32 = 9;

/// `sizeof(struct dm_ioctl)`
const DM_IOCTL_SIZE: usize = 312;
/// `sizeof(struct dm_target_spec)`
const DM_TARGET_SPEC_SIZE: usize = 40;

/// `_IOWR(DM_IOCTL, nr, struct dm_ioctl)`
const fn dm_request(nr: u32) -> libc::c_ulong {
    ((3u32 << 30) | ((DM_IOCTL_SIZE as u32) << 16) | (DM_IOCTL_TYPE << 8) | nr) as libc::c_ulong
}

/// One device-mapper target line, in sectors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub start_sector: u64,
    pub sectors: u64,
    pub kind: &'static str,
    pub params: String,
}

/// Convert a byte-addressed extent table into device-mapper targets
///
/// Boundaries are rounded down to whole sectors, so neighbouring targets
/// stay contiguous; a tail shorter than one sector is dropped, as are
/// extents that collapse to zero sectors.
pub fn sector_targets(table: &ExtentTable) -> Vec<Target> {
    let mut targets = Vec::with_capacity(table.len());
    for extent in table {
        let start_sector = extent.start() / SECTOR_SIZE;
        let end_sector = extent.end() / SECTOR_SIZE;
        if end_sector == start_sector {
            continue;
        }
        let (kind, params) = match extent {
            Extent::Zero { .. } => ("zero", String::new()),
            Extent::Linear { backend, .. } => ("linear", format!("{} 0", backend)),
        };
        targets.push(Target {
            start_sector,
            sectors: end_sector - start_sector,
            kind,
            params,
        });
    }
    targets
}

/// Encode a `struct dm_ioctl` header for a request carrying `data_size - 312` bytes of data
fn encode_header(
    name: &str,
    uuid: &str,
    flags: u32,
    target_count: u32,
    data_size: usize,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data_size);
    for part in DM_VERSION {
        buf.extend_from_slice(&part.to_ne_bytes());
    }
    buf.extend_from_slice(&(data_size as u32).to_ne_bytes()); // data_size
    buf.extend_from_slice(&(DM_IOCTL_SIZE as u32).to_ne_bytes()); // data_start
    buf.extend_from_slice(&target_count.to_ne_bytes());
    buf.extend_from_slice(&0i32.to_ne_bytes()); // open_count
    buf.extend_from_slice(&flags.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes()); // event_nr
    buf.extend_from_slice(&0u32.to_ne_bytes()); // padding
    buf.extend_from_slice(&0u64.to_ne_bytes()); // dev
    push_padded(&mut buf, name.as_bytes(), DM_NAME_LEN);
    push_padded(&mut buf, uuid.as_bytes(), DM_UUID_LEN);
    buf.extend_from_slice(&[0u8; 7]); // data[7]
    debug_assert_eq!(buf.len(), DM_IOCTL_SIZE);
    buf
}

/// Encode the target specs for `DM_TABLE_LOAD`
fn encode_targets(targets: &[Target]) -> Vec<u8> {
    let mut buf = Vec::new();
    for target in targets {
        let params_len = (target.params.len() + 1).next_multiple_of(8);
        let next = (DM_TARGET_SPEC_SIZE + params_len) as u32;

        buf.extend_from_slice(&target.start_sector.to_ne_bytes());
        buf.extend_from_slice(&target.sectors.to_ne_bytes());
        buf.extend_from_slice(&0i32.to_ne_bytes()); // status
        buf.extend_from_slice(&next.to_ne_bytes());
        push_padded(&mut buf, target.kind.as_bytes(), DM_MAX_TYPE_NAME);
        push_padded(&mut buf, target.params.as_bytes(), params_len);
    }
    buf
}

fn push_padded(buf: &mut Vec<u8>, bytes: &[u8], width: usize) {
    buf.extend_from_slice(bytes);
    buf.resize(buf.len() + (width - bytes.len()), 0);
}

/// An 8-byte aligned copy of an encoded request
struct Request {
    words: Vec<u64>,
}

impl Request {
    fn new(bytes: &[u8]) -> Self {
        let mut words = vec![0u64; bytes.len().div_ceil(8)];
        // SAFETY: `words` holds at least `bytes.len()` bytes and the regions are distinct.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                words.as_mut_ptr() as *mut u8,
                bytes.len(),
            );
        }
        Self { words }
    }

    fn as_mut_ptr(&mut self) -> *mut u64 {
        self.words.as_mut_ptr()
    }
}

/// Publishes extent tables through the kernel device-mapper
#[derive(Debug, Clone)]
pub struct DeviceMapper {
    control_path: PathBuf,
}

impl DeviceMapper {
    pub fn new() -> Self {
        Self::with_control_path("/dev/mapper/control")
    }

    pub fn with_control_path(control_path: impl Into<PathBuf>) -> Self {
        Self {
            control_path: control_path.into(),
        }
    }

    fn open_control(&self) -> Result<File, BackendError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.control_path)
            .map_err(|e| BackendError::io("open", self.control_path.display().to_string(), e))
    }

    fn issue(
        control: &File,
        op: &'static str,
        cmd: u32,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), BackendError> {
        let mut request = Request::new(bytes);
        // SAFETY: the request starts with a complete `struct dm_ioctl` whose
        // `data_size` matches the buffer length.
        unsafe { ioctl::with_ptr(control, dm_request(cmd), request.as_mut_ptr()) }
            .map_err(|e| BackendError::io(op, name, e))?;
        Ok(())
    }

    fn remove_with(control: &File, name: &str) -> Result<(), BackendError> {
        let header = encode_header(name, "", 0, 0, DM_IOCTL_SIZE);
        Self::issue(control, "DM_DEV_REMOVE", DM_DEV_REMOVE_CMD, name, &header)
    }

    fn load_and_resume(
        control: &File,
        name: &str,
        flags: u32,
        targets: &[Target],
    ) -> Result<(), BackendError> {
        let specs = encode_targets(targets);
        let mut load = encode_header(
            name,
            "",
            flags,
            targets.len() as u32,
            DM_IOCTL_SIZE + specs.len(),
        );
        load.extend_from_slice(&specs);
        Self::issue(control, "DM_TABLE_LOAD", DM_TABLE_LOAD_CMD, name, &load)?;

        let resume = encode_header(name, "", 0, 0, DM_IOCTL_SIZE);
        Self::issue(control, "DM_DEV_SUSPEND", DM_DEV_SUSPEND_CMD, name, &resume)
    }
}

impl Default for DeviceMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingPublisher for DeviceMapper {
    fn create(
        &mut self,
        name: &str,
        unique_id: &str,
        flags: MapFlags,
        table: &ExtentTable,
    ) -> Result<(), BackendError> {
        if name.is_empty() || name.len() >= DM_NAME_LEN {
            return Err(BackendError::rejected(
                "create",
                name,
                format!("device name must be 1 to {} bytes", DM_NAME_LEN - 1),
            ));
        }
        if unique_id.len() >= DM_UUID_LEN {
            return Err(BackendError::rejected("create", name, "unique id too long"));
        }

        let targets = sector_targets(table);
        if targets.is_empty() {
            return Err(BackendError::rejected("create", name, "empty table"));
        }

        let dm_flags = if flags.read_only { DM_READONLY_FLAG } else { 0 };
        let control = self.open_control()?;

        let header = encode_header(name, unique_id, dm_flags, 0, DM_IOCTL_SIZE);
        Self::issue(&control, "DM_DEV_CREATE", DM_DEV_CREATE_CMD, name, &header)?;
        debug!("created `{}' ({} targets)", name, targets.len());

        if let Err(err) = Self::load_and_resume(&control, name, dm_flags, &targets) {
            if let Err(cleanup) = Self::remove_with(&control, name) {
                warn!("failed to remove half-created `{}': {}", name, cleanup);
            }
            return Err(err);
        }
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), BackendError> {
        let control = self.open_control()?;
        Self::remove_with(&control, name)
    }
}
