//! Notify and count-notify objects backing input-queue waits.

use serde::Serialize;
use tracing::{debug, warn};

use crate::driver::{DeviceDriver, NotifyKind};
use crate::error::{DqsError, Result};
use crate::stream::StreamRing;

/// Hardware wait condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WaitMode {
    /// Fire once when the notify is recorded.
    Event,
    /// Fire while the counter is bigger than `value`.
    Bigger,
}

/// Wait registration handed to the stream ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyWaitRequest {
    /// Which object to wait on.
    pub kind: NotifyKind,
    /// Driver id of the object.
    pub notify_id: u32,
    /// Firing condition.
    pub mode: WaitMode,
    /// Threshold for [`WaitMode::Bigger`].
    pub value: u32,
    /// Wait timeout; `u32::MAX` waits forever.
    pub timeout: u32,
}

impl NotifyWaitRequest {
    /// Unbounded wait on `notify_id`.
    pub fn unbounded(kind: NotifyKind, notify_id: u32) -> Self {
        let mode = match kind {
            NotifyKind::Notify => WaitMode::Event,
            NotifyKind::CountNotify => WaitMode::Bigger,
        };
        Self {
            kind,
            notify_id,
            mode,
            value: 0,
            timeout: u32::MAX,
        }
    }
}

/// Notify objects owned by one stream; each is created at most once.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NotifyState {
    notify: Option<u32>,
    count_notify: Option<u32>,
}

impl NotifyState {
    /// Id of the `kind` object, if created.
    pub fn get(&self, kind: NotifyKind) -> Option<u32> {
        match kind {
            NotifyKind::Notify => self.notify,
            NotifyKind::CountNotify => self.count_notify,
        }
    }

    fn slot(&mut self, kind: NotifyKind) -> &mut Option<u32> {
        match kind {
            NotifyKind::Notify => &mut self.notify,
            NotifyKind::CountNotify => &mut self.count_notify,
        }
    }

    /// True when no notify object exists.
    pub fn is_empty(&self) -> bool {
        self.notify.is_none() && self.count_notify.is_none()
    }
}

/// Result of [`NotifyCoordinator::ensure_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitHandle {
    /// Kind of the armed object.
    pub kind: NotifyKind,
    /// Driver id of the object.
    pub notify_id: u32,
    /// The object already existed; hardware subscription is in place.
    pub reused: bool,
}

/// Creates notify objects lazily and arms their waits on the stream ring.
pub struct NotifyCoordinator<'a> {
    driver: &'a dyn DeviceDriver,
    ring: &'a dyn StreamRing,
}

impl<'a> NotifyCoordinator<'a> {
    /// Coordinator creating objects through `driver` and arming waits on `ring`.
    pub fn new(driver: &'a dyn DeviceDriver, ring: &'a dyn StreamRing) -> Self {
        Self { driver, ring }
    }

    /// Make sure a wait exists for `queue_count` subscribed input queues.
    ///
    /// More than one queue needs a counting notify. A new object that
    /// cannot be armed is destroyed again and not recorded.
    pub fn ensure_wait(&self, state: &mut NotifyState, queue_count: u8) -> Result<WaitHandle> {
        let kind = if queue_count > 1 {
            NotifyKind::CountNotify
        } else {
            NotifyKind::Notify
        };
        if let Some(notify_id) = state.get(kind) {
            return Ok(WaitHandle {
                kind,
                notify_id,
                reused: true,
            });
        }

        let notify_id = self.driver.notify_create(kind).map_err(|e| {
            DqsError::Sync(format!("{kind:?} create failed on stream {}: {e}", self.ring.stream_id()))
        })?;
        if let Err(e) = self.ring.arm_notify_wait(&NotifyWaitRequest::unbounded(kind, notify_id)) {
            self.destroy(kind, notify_id);
            return Err(DqsError::Sync(format!("{kind:?} {notify_id} wait failed: {e}")));
        }
        *state.slot(kind) = Some(notify_id);
        debug!(stream_id = self.ring.stream_id(), ?kind, notify_id, queue_count, "notify wait armed");
        Ok(WaitHandle {
            kind,
            notify_id,
            reused: false,
        })
    }

    /// Destroy whatever objects `state` holds.
    pub fn teardown(&self, state: &mut NotifyState) {
        for kind in [NotifyKind::Notify, NotifyKind::CountNotify] {
            if let Some(id) = state.slot(kind).take() {
                self.destroy(kind, id);
            }
        }
    }

    /// Destroy the object of one kind, e.g. after its subscription failed.
    pub fn discard(&self, state: &mut NotifyState, kind: NotifyKind) {
        if let Some(id) = state.slot(kind).take() {
            self.destroy(kind, id);
        }
    }

    fn destroy(&self, kind: NotifyKind, id: u32) {
        if let Err(e) = self.driver.notify_destroy(kind, id) {
            warn!(stream_id = self.ring.stream_id(), ?kind, notify_id = id, error = %e, "notify destroy failed");
        }
    }
}

const P_NOTIFY_BASE: u64 = 0x5_8000_0000;
const F_NOTIFY_BASE: u64 = 0x208_8000_0000;
const CHIP_ADDR_STRIDE: u64 = 0x400_0000_0000;
const NOTIFY_DIE_OFFSET: u64 = 0x2000_0000;
const P_THRESHOLD: u32 = 4;
const F_THRESHOLD: u32 = 2;
const SLICE_STRIDE: u64 = 0x1_0000;
const GROUP_STRIDE: u64 = 0x1000;
const NOTIFY_STRIDE: u64 = 0x80;
const NOTIFY_PER_GROUP: u32 = 16;
const CNT_REG_BASE: u64 = 0x1000_0000;
const CNT_READ_OFFSET: u64 = 0x200_0000;
const CNT_CLEAR_OFFSET: u64 = 0x200_0060;

/// Physical registers of one count notify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountNotifyRegs {
    /// Counter read register.
    pub read: u64,
    /// Counter clear register.
    pub clear: u64,
}

impl CountNotifyRegs {
    /// Register pair of `notify_id` on `chip_id`; `ts_id` 0 uses the P layout.
    pub fn compute(ts_id: u32, chip_id: u32, notify_id: u32) -> Self {
        let (base, threshold) = if ts_id == 0 {
            (P_NOTIFY_BASE, P_THRESHOLD)
        } else {
            (F_NOTIFY_BASE, F_THRESHOLD)
        };
        let base = base + u64::from(chip_id) * CHIP_ADDR_STRIDE + NOTIFY_DIE_OFFSET;
        let per_slice = threshold * 4;
        let slice = u64::from(notify_id / per_slice);
        let in_slice = notify_id % per_slice;
        let group = u64::from(in_slice / NOTIFY_PER_GROUP);
        let goff = u64::from(in_slice % NOTIFY_PER_GROUP);
        let addr = base + slice * SLICE_STRIDE + group * GROUP_STRIDE + goff * NOTIFY_STRIDE;
        Self {
            read: addr + CNT_REG_BASE + CNT_READ_OFFSET,
            clear: addr + CNT_REG_BASE + CNT_CLEAR_OFFSET,
        }
    }

    /// Resolve through the driver's chip id.
    pub fn resolve(driver: &dyn DeviceDriver, notify_id: u32) -> Result<Self> {
        let chip_id = driver
            .chip_id()
            .map_err(|e| DqsError::Sync(format!("chip id lookup failed: {e}")))?;
        Ok(Self::compute(driver.ts_id(), chip_id, notify_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDevice, SimRing};

    #[test]
    fn test_single_queue_uses_plain_notify() {
        let dev = SimDevice::new();
        let ring = SimRing::new(1, 1);
        let coord = NotifyCoordinator::new(&dev, &ring);
        let mut state = NotifyState::default();
        let handle = coord.ensure_wait(&mut state, 1).unwrap();
        assert_eq!(handle.kind, NotifyKind::Notify);
        assert!(!handle.reused);
        assert_eq!(state.get(NotifyKind::Notify), Some(handle.notify_id));
        let waits = ring.waits();
        assert_eq!(waits.len(), 1);
        assert_eq!(waits[0].mode, WaitMode::Event);
        assert_eq!(waits[0].timeout, u32::MAX);
    }

    #[test]
    fn test_count_notify_reused() {
        let dev = SimDevice::new();
        let ring = SimRing::new(1, 1);
        let coord = NotifyCoordinator::new(&dev, &ring);
        let mut state = NotifyState::default();
        let first = coord.ensure_wait(&mut state, 2).unwrap();
        assert_eq!(first.kind, NotifyKind::CountNotify);
        assert_eq!(ring.waits()[0].mode, WaitMode::Bigger);
        let second = coord.ensure_wait(&mut state, 2).unwrap();
        assert!(second.reused);
        assert_eq!(second.notify_id, first.notify_id);
        assert_eq!(ring.waits().len(), 1);
        assert_eq!(dev.live_notifies(), 1);
    }

    #[test]
    fn test_failed_wait_destroys_new_object() {
        let dev = SimDevice::new();
        let ring = SimRing::new(1, 1);
        ring.set_fail_wait(true);
        let coord = NotifyCoordinator::new(&dev, &ring);
        let mut state = NotifyState::default();
        let err = coord.ensure_wait(&mut state, 3).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::SyncFailure);
        assert!(state.is_empty());
        assert_eq!(dev.live_notifies(), 0);
    }

    #[test]
    fn test_create_failure_is_sync_error() {
        let dev = SimDevice::new();
        dev.set_fail_notify_create(true);
        let ring = SimRing::new(1, 1);
        let coord = NotifyCoordinator::new(&dev, &ring);
        let err = coord.ensure_wait(&mut NotifyState::default(), 1).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::SyncFailure);
    }

    #[test]
    fn test_teardown_destroys_both() {
        let dev = SimDevice::new();
        let ring = SimRing::new(1, 1);
        let coord = NotifyCoordinator::new(&dev, &ring);
        let mut state = NotifyState::default();
        coord.ensure_wait(&mut state, 1).unwrap();
        coord.ensure_wait(&mut state, 4).unwrap();
        assert_eq!(dev.live_notifies(), 2);
        coord.teardown(&mut state);
        assert!(state.is_empty());
        assert_eq!(dev.live_notifies(), 0);
    }

    #[test]
    fn test_count_notify_regs_p_layout() {
        let regs = CountNotifyRegs::compute(0, 0, 0);
        assert_eq!(regs.read, 0x5_8000_0000 + 0x2000_0000 + 0x1000_0000 + 0x200_0000);
        assert_eq!(regs.clear - regs.read, 0x60);

        // 16 per slice: id 17 is slice 1, group 0, offset 1.
        let regs = CountNotifyRegs::compute(0, 1, 17);
        let base = 0x5_8000_0000 + 0x400_0000_0000 + 0x2000_0000;
        assert_eq!(regs.read, base + 0x1_0000 + 0x80 + 0x1200_0000);
    }

    #[test]
    fn test_count_notify_regs_f_layout() {
        // 8 per slice: id 9 is slice 1, group 0, offset 1.
        let regs = CountNotifyRegs::compute(1, 0, 9);
        let base = 0x208_8000_0000 + 0x2000_0000;
        assert_eq!(regs.read, base + 0x1_0000 + 0x80 + 0x1200_0000);
    }

    #[test]
    fn test_resolve_chip_failure() {
        let dev = SimDevice::new();
        dev.set_fail_chip_id(true);
        let err = CountNotifyRegs::resolve(&dev, 3).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::SyncFailure);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_count_notify_regs_stay_in_chip_window(
                ts in 0u32..2,
                chip in 0u32..4,
                id in 0u32..1024,
            ) {
                let regs = CountNotifyRegs::compute(ts, chip, id);
                let chip_base = u64::from(chip) * CHIP_ADDR_STRIDE;
                prop_assert!(regs.read > chip_base);
                prop_assert!(regs.read < chip_base + CHIP_ADDR_STRIDE);
                prop_assert_eq!(regs.clear - regs.read, 0x60);
                prop_assert_eq!((regs.read - CNT_REG_BASE - CNT_READ_OFFSET) % NOTIFY_STRIDE, 0);
            }

            #[test]
            fn prop_distinct_ids_distinct_regs(ts in 0u32..2, a in 0u32..512, b in 0u32..512) {
                prop_assume!(a != b);
                prop_assert_ne!(
                    CountNotifyRegs::compute(ts, 0, a).read,
                    CountNotifyRegs::compute(ts, 0, b).read
                );
            }
        }
    }
}
