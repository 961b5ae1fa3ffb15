//! Loop devices
//!
//! Attaching asks `/dev/loop-control` for a free device number and binds the
//! band file to `/dev/loopN` with `LOOP_SET_FD`. The kernel makes the loop
//! device read-only when the backing file descriptor was opened without
//! write access; `LO_FLAGS_READ_ONLY` cannot be set through
//! `LOOP_SET_STATUS64`, which only records the backing file name here.
//! Another process can grab the same free device between the two steps, in
//! which case `LOOP_SET_FD` fails with `EBUSY` and the sequence is retried.

use std::fs::{File, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use bandmap::{BackendError, BackingProvider, ResourceHandle};

use crate::ioctl;

const LOOP_SET_FD: libc::c_ulong = 0x4C00;
const LOOP_CLR_FD: libc::c_ulong = 0x4C01;
const LOOP_SET_STATUS64: libc::c_ulong = 0x4C04;
const LOOP_CTL_GET_FREE: libc::c_ulong = 0x4C82;

const LO_FLAGS_READ_ONLY: u32 = 1;
const LO_NAME_SIZE: usize = 64;
const LO_KEY_SIZE: usize = 32;

const SET_FD_ATTEMPTS: usize = 8;

/// `struct loop_info64` from `<linux/loop.h>`
#[repr(C)]
#[allow(dead_code)]
struct LoopInfo64 {
    lo_device: u64,
    lo_inode: u64,
    lo_rdevice: u64,
    lo_offset: u64,
    lo_sizelimit: u64,
    lo_number: u32,
    lo_encrypt_type: u32,
    lo_encrypt_key_size: u32,
    lo_flags: u32,
    lo_file_name: [u8; LO_NAME_SIZE],
    lo_crypt_name: [u8; LO_NAME_SIZE],
    lo_encrypt_key: [u8; LO_KEY_SIZE],
    lo_init: [u64; 2],
}

impl LoopInfo64 {
    /// The kernel ignores `lo_flags` read-only here; it reports what the
    /// backing descriptor already enforces.
    fn for_backing_file(path: &Path, read_only: bool) -> Self {
        let mut info = LoopInfo64 {
            lo_device: 0,
            lo_inode: 0,
            lo_rdevice: 0,
            lo_offset: 0,
            lo_sizelimit: 0,
            lo_number: 0,
            lo_encrypt_type: 0,
            lo_encrypt_key_size: 0,
            lo_flags: if read_only { LO_FLAGS_READ_ONLY } else { 0 },
            lo_file_name: [0; LO_NAME_SIZE],
            lo_crypt_name: [0; LO_NAME_SIZE],
            lo_encrypt_key: [0; LO_KEY_SIZE],
            lo_init: [0; 2],
        };
        // Informational only; keep the trailing NUL.
        let name = path.as_os_str().as_bytes();
        let len = name.len().min(LO_NAME_SIZE - 1);
        info.lo_file_name[..len].copy_from_slice(&name[..len]);
        info
    }
}

/// An attached loop device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDevice {
    number: u32,
    path: PathBuf,
    locator: String,
}

impl LoopDevice {
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResourceHandle for LoopDevice {
    fn locator(&self) -> &str {
        &self.locator
    }
}

/// Attaches band files to kernel loop devices
#[derive(Debug, Clone)]
pub struct LoopProvider {
    dev_dir: PathBuf,
}

impl LoopProvider {
    pub fn new() -> Self {
        Self::with_dev_dir("/dev")
    }

    /// Use a device directory other than `/dev`
    pub fn with_dev_dir(dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            dev_dir: dev_dir.into(),
        }
    }

    fn control_path(&self) -> PathBuf {
        self.dev_dir.join("loop-control")
    }

    fn device_path(&self, number: u32) -> PathBuf {
        self.dev_dir.join(format!("loop{}", number))
    }

    fn next_free(&self) -> Result<u32, BackendError> {
        let control_path = self.control_path();
        let control = File::open(&control_path)
            .map_err(|e| BackendError::io("open", control_path.display().to_string(), e))?;
        let number = ioctl::with_arg(&control, LOOP_CTL_GET_FREE, 0).map_err(|e| {
            BackendError::io("LOOP_CTL_GET_FREE", control_path.display().to_string(), e)
        })?;
        Ok(number as u32)
    }

    /// Open a band file; without write access the loop device is read-only
    fn open_backing(path: &Path, read_only: bool) -> Result<File, BackendError> {
        OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)
            .map_err(|e| BackendError::io("open", path.display().to_string(), e))
    }

    fn open_device(path: &Path, read_only: bool) -> Result<File, BackendError> {
        OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)
            .map_err(|e| BackendError::io("open", path.display().to_string(), e))
    }
}

impl Default for LoopProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingProvider for LoopProvider {
    type Handle = LoopDevice;

    fn attach(&mut self, path: &Path, read_only: bool) -> Result<LoopDevice, BackendError> {
        let backing = Self::open_backing(path, read_only)?;

        for attempt in 1..=SET_FD_ATTEMPTS {
            let number = self.next_free()?;
            let dev_path = self.device_path(number);
            let device = Self::open_device(&dev_path, read_only)?;
            let locator = dev_path.display().to_string();

            match ioctl::with_arg(&device, LOOP_SET_FD, backing.as_raw_fd() as libc::c_ulong) {
                Ok(_) => {}
                Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {
                    debug!("{} was taken (attempt {}), retrying", locator, attempt);
                    continue;
                }
                Err(e) => return Err(BackendError::io("LOOP_SET_FD", locator, e)),
            }

            let mut info = LoopInfo64::for_backing_file(path, read_only);
            // SAFETY: `info` is a live `struct loop_info64` for the duration of the call.
            let status = unsafe { ioctl::with_ptr(&device, LOOP_SET_STATUS64, &mut info as *mut LoopInfo64) };
            if let Err(e) = status {
                if let Err(clear) = ioctl::with_arg(&device, LOOP_CLR_FD, 0) {
                    warn!("failed to release {} after a failed setup: {}", locator, clear);
                }
                return Err(BackendError::io("LOOP_SET_STATUS64", locator, e));
            }

            return Ok(LoopDevice {
                number,
                path: dev_path,
                locator,
            });
        }

        Err(BackendError::rejected(
            "LOOP_SET_FD",
            path.display().to_string(),
            format!("no free loop device after {} attempts", SET_FD_ATTEMPTS),
        ))
    }

    fn detach(&mut self, handle: &LoopDevice) -> Result<(), BackendError> {
        let device = Self::open_device(&handle.path, true)?;
        ioctl::with_arg(&device, LOOP_CLR_FD, 0)
            .map_err(|e| BackendError::io("LOOP_CLR_FD", handle.locator.clone(), e))?;
        Ok(())
    }
}
