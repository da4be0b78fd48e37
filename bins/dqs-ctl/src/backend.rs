//! Context the kernel-facing commands run against.
//!
//! The control tool only issues control-node commands. Memory, copies and
//! notifies belong to the device runtime, so the host driver refuses them.

use std::sync::Arc;

use dqs_core::driver::{DeviceDriver, DqsPoolInfo, DqsQueueInfo, MemcpyKind, NotifyKind};
use dqs_core::kernel::RealKernelShim;
use dqs_core::sim::SimPlatform;
use dqs_core::{DqsContext, DqsError, RuntimeConfig};
use nix::libc;

/// Driver stand-in for a process that owns no device context.
#[derive(Debug)]
struct HostDriver {
    device_id: u32,
    ts_id: u32,
}

fn unsupported<T>(op: &'static str) -> dqs_core::Result<T> {
    Err(DqsError::Driver {
        op,
        code: -libc::ENOSYS,
    })
}

impl DeviceDriver for HostDriver {
    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn ts_id(&self) -> u32 {
        self.ts_id
    }

    fn mem_alloc(&self, _size: u64) -> dqs_core::Result<u64> {
        unsupported("mem_alloc")
    }

    fn mem_free(&self, _addr: u64) -> dqs_core::Result<()> {
        unsupported("mem_free")
    }

    fn copy_to_device(&self, _dst: u64, _src: &[u8], _kind: MemcpyKind) -> dqs_core::Result<()> {
        unsupported("memcpy")
    }

    fn copy_from_device(&self, _dst: &mut [u8], _src: u64) -> dqs_core::Result<()> {
        unsupported("memcpy")
    }

    fn queue_info(&self, _queue_id: u32) -> dqs_core::Result<DqsQueueInfo> {
        unsupported("queue_info")
    }

    fn mbuf_pool_info(&self, _pool_id: u32) -> dqs_core::Result<DqsPoolInfo> {
        unsupported("mbuf_pool_info")
    }

    fn chip_id(&self) -> dqs_core::Result<u32> {
        unsupported("chip_id")
    }

    fn notify_create(&self, _kind: NotifyKind) -> dqs_core::Result<u32> {
        unsupported("notify_create")
    }

    fn notify_destroy(&self, _kind: NotifyKind, _id: u32) -> dqs_core::Result<()> {
        unsupported("notify_destroy")
    }
}

/// Context over the real control node, or over the simulator when `simulated`.
pub fn open(config: &RuntimeConfig, simulated: bool) -> Arc<DqsContext> {
    if simulated {
        return SimPlatform::with_config(config.clone()).context;
    }
    let driver = Arc::new(HostDriver {
        device_id: config.device.device_id,
        ts_id: config.device.ts_id,
    });
    Arc::new(DqsContext::new(Arc::new(RealKernelShim::new()), driver, config.clone()))
}
