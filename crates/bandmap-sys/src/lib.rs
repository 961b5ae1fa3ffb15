//! Linux backends for bandmap
//!
//! - [`LoopProvider`]: attaches band files to loop devices
//!   (`/dev/loop-control`, `LOOP_SET_FD`, `LOOP_CLR_FD`)
//! - [`DeviceMapper`]: publishes an extent table as a device-mapper device
//!   (`/dev/mapper/control`, `linear` and `zero` targets)
//!
//! Both talk to the kernel through raw `ioctl(2)` calls and need root.

#![cfg(target_os = "linux")]

mod dm;
mod ioctl;
mod loopdev;

pub use dm::{sector_targets, DeviceMapper, Target, SECTOR_SIZE};
pub use loopdev::{LoopDevice, LoopProvider};
