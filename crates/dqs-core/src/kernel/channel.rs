//! Lazily opened request/response channel to the STARS control node.

use std::mem::size_of;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::shim::KernelShim;
use super::sys::{StarsCmd, StarsIoctlCmdArgs, WireStruct};
use crate::error::{DqsError, Result};

/// Single process-wide handle to the control node.
///
/// The node is opened on first use. Opening and every command are
/// serialized by one mutex, so the channel may be shared freely.
pub struct KernelChannel {
    shim: Arc<dyn KernelShim>,
    node: String,
    fd: Mutex<Option<OwnedFd>>,
}

impl std::fmt::Debug for KernelChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelChannel")
            .field("node", &self.node)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl KernelChannel {
    /// Channel to `node`; the node is opened by the first [`issue`](Self::issue).
    pub fn new(shim: Arc<dyn KernelShim>, node: impl Into<String>) -> Self {
        Self {
            shim,
            node: node.into(),
            fd: Mutex::new(None),
        }
    }

    /// Path of the control node.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Whether the node is currently open.
    pub fn is_open(&self) -> bool {
        self.fd.lock().is_some()
    }

    /// Send `input` and receive `output` for `cmd`.
    ///
    /// The kernel reads exactly `size_of::<I>()` bytes and writes at most
    /// `size_of::<O>()` bytes. Returns the ioctl return value.
    pub fn issue<I: WireStruct, O: WireStruct>(
        &self,
        cmd: StarsCmd,
        input: &I,
        output: &mut O,
    ) -> Result<i32> {
        let mut guard = self.fd.lock();
        let fd = match guard.take() {
            Some(fd) => fd,
            None => {
                let fd = self.shim.open_node(&self.node).map_err(|source| {
                    warn!(node = %self.node, error = %source, "failed to open control node");
                    DqsError::DeviceOpen {
                        path: self.node.clone(),
                        source,
                    }
                })?;
                debug!(node = %self.node, "control node opened");
                fd
            }
        };

        let mut args = StarsIoctlCmdArgs {
            input_ptr: std::ptr::from_ref(input) as u64,
            input_len: wire_len::<I>(),
            output_ptr: std::ptr::from_mut(output) as u64,
            output_len: wire_len::<O>(),
            ..Default::default()
        };
        let result = self.shim.ioctl(&fd, cmd.request(), &mut args);
        *guard = Some(fd);

        match result {
            Ok(ret) => {
                debug!(cmd = cmd.name(), ret, "control command done");
                Ok(ret)
            }
            Err(source) => {
                warn!(cmd = cmd.name(), error = %source, "control command failed");
                Err(DqsError::Command {
                    cmd: cmd.name(),
                    source,
                })
            }
        }
    }

    /// Drop the node handle. The next command reopens it.
    pub fn close(&self) {
        if self.fd.lock().take().is_some() {
            debug!(node = %self.node, "control node closed");
        }
    }
}

fn wire_len<T>() -> u32 {
    // Wire structs are a few KiB at most.
    u32::try_from(size_of::<T>()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::sys::{CtrlSpaceParam, CtrlSpaceResult, StreamRef, InterChipQueryResult};
    use crate::sim::SimKernel;

    fn channel() -> (Arc<SimKernel>, KernelChannel) {
        let sim = Arc::new(SimKernel::new());
        let channel = KernelChannel::new(sim.clone(), "/dev/stars_dqs");
        (sim, channel)
    }

    #[test]
    fn test_lazy_open() {
        let (sim, channel) = channel();
        assert!(!channel.is_open());
        let mut out = CtrlSpaceResult::default();
        channel
            .issue(StarsCmd::CtrlSpace, &CtrlSpaceParam::default(), &mut out)
            .unwrap();
        assert!(channel.is_open());
        assert_eq!(sim.open_count(), 1);

        let mut out = InterChipQueryResult::default();
        channel
            .issue(StarsCmd::InterChipSpaceQuery, &StreamRef::default(), &mut out)
            .unwrap();
        assert_eq!(sim.open_count(), 1, "node opened once");
    }

    #[test]
    fn test_open_failure_is_driver_io() {
        let (sim, channel) = channel();
        sim.set_fail_open(true);
        let err = channel
            .issue(StarsCmd::CtrlSpace, &CtrlSpaceParam::default(), &mut CtrlSpaceResult::default())
            .unwrap_err();
        assert!(matches!(err, DqsError::DeviceOpen { .. }));
        assert_eq!(err.kind(), crate::ErrorKind::DriverIo);
        assert!(!channel.is_open());
    }

    #[test]
    fn test_command_failure_keeps_handle() {
        let (sim, channel) = channel();
        sim.fail_command(StarsCmd::CtrlSpace, nix::libc::EBUSY);
        let err = channel
            .issue(StarsCmd::CtrlSpace, &CtrlSpaceParam::default(), &mut CtrlSpaceResult::default())
            .unwrap_err();
        assert_eq!(err.to_errno(), -nix::libc::EBUSY);
        assert!(channel.is_open());
    }

    #[test]
    fn test_close_then_reopen() {
        let (sim, channel) = channel();
        let mut out = InterChipQueryResult::default();
        channel
            .issue(StarsCmd::InterChipSpaceQuery, &StreamRef::default(), &mut out)
            .unwrap();
        channel.close();
        assert!(!channel.is_open());
        channel
            .issue(StarsCmd::InterChipSpaceQuery, &StreamRef::default(), &mut out)
            .unwrap();
        assert_eq!(sim.open_count(), 2);
    }

    #[test]
    fn test_concurrent_issue() {
        let (sim, channel) = channel();
        let channel = Arc::new(channel);
        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let channel = Arc::clone(&channel);
                std::thread::spawn(move || {
                    let mut out = InterChipQueryResult::default();
                    channel
                        .issue(
                            StarsCmd::InterChipSpaceQuery,
                            &StreamRef { stream_id: i, ts_id: 0 },
                            &mut out,
                        )
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sim.open_count(), 1);
        assert_eq!(sim.commands().len(), 8);
    }
}
