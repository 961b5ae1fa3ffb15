//! Thin `ioctl(2)` wrappers

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

/// Issue `request` with an integer argument
pub(crate) fn with_arg(file: &File, request: libc::c_ulong, arg: libc::c_ulong) -> io::Result<i32> {
    // SAFETY: the requests used with this helper take a plain integer argument.
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), request as _, arg) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret)
}

/// Issue `request` with a pointer to a caller-owned buffer
///
/// # Safety
/// `buf` must point to memory laid out as the kernel expects for `request`,
/// valid for reads and writes for the whole size the kernel will access.
pub(crate) unsafe fn with_ptr<T>(file: &File, request: libc::c_ulong, buf: *mut T) -> io::Result<i32> {
    let ret = libc::ioctl(file.as_raw_fd(), request as _, buf);
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret)
}
