//! Kernel interaction shim for testability
//!
//! - `KernelShim`: trait for the two syscalls the control channel needs
//! - `RealKernelShim`: production implementation using `open(2)` and `ioctl(2)`
//! - `crate::sim::SimKernel`: in-memory implementation for tests and dry runs

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use nix::libc;

use super::sys::StarsIoctlCmdArgs;

/// Syscalls used by [`super::KernelChannel`].
pub trait KernelShim: Send + Sync {
    /// Open the control node read/write.
    fn open_node(&self, path: &str) -> io::Result<OwnedFd>;

    /// Issue one envelope ioctl, returning the non-negative return value.
    fn ioctl(&self, fd: &OwnedFd, request: u32, args: &mut StarsIoctlCmdArgs) -> io::Result<i32>;
}

/// Production implementation using actual kernel syscalls.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealKernelShim;

impl RealKernelShim {
    /// Shim with no descriptors open.
    pub fn new() -> Self {
        Self
    }
}

impl KernelShim for RealKernelShim {
    fn open_node(&self, path: &str) -> io::Result<OwnedFd> {
        let c_path = CString::new(path)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "node path contains NUL"))?;
        // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd was just returned by open(2) and is owned by nobody else.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn ioctl(&self, fd: &OwnedFd, request: u32, args: &mut StarsIoctlCmdArgs) -> io::Result<i32> {
        // SAFETY: args points to a live envelope whose input/output pointers
        // were set by the caller to buffers of the stated lengths.
        let ret = unsafe {
            libc::ioctl(
                fd.as_raw_fd(),
                request as _,
                std::ptr::from_mut(args).cast::<libc::c_void>(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret)
    }
}
