//! Slot allocation, init, submission and rollback of single tasks.

use tracing::{debug, error, warn};

use super::kinds::strategy;
use super::{Task, TaskKind, TaskPayload, TaskStatus};
use crate::ctrl_space::ControlSpaceView;
use crate::driver::{DeviceDriver, MemcpyKind};
use crate::error::{DqsError, Result};
use crate::func_call::FunctionCallBuilder;
use crate::inter_chip::InterChipSpaceView;
use crate::sqe::SqeContext;
use crate::stream::{DqsContext, DqsState, StreamRing};

/// Everything a kind strategy may look at while building its task.
pub(crate) struct TaskEnv<'a> {
    pub ctx: &'a DqsContext,
    pub ring: &'a dyn StreamRing,
    pub state: &'a DqsState,
}

impl<'a> TaskEnv<'a> {
    pub fn driver(&self) -> &'a dyn DeviceDriver {
        self.ctx.driver.as_ref()
    }

    pub fn func_calls(&self) -> FunctionCallBuilder<'a> {
        self.ctx.func_calls()
    }

    pub fn ctrl_space(&self) -> Result<&'a ControlSpaceView> {
        self.state.ctrl_space.as_ref().ok_or(DqsError::MissingState {
            what: "control space",
            stream_id: self.ring.stream_id(),
        })
    }

    pub fn inter_chip(&self) -> Result<&'a InterChipSpaceView> {
        self.state.inter_chip.as_ref().ok_or(DqsError::MissingState {
            what: "inter-chip space",
            stream_id: self.ring.stream_id(),
        })
    }

    pub fn sqe_context(&self, task: &Task) -> SqeContext {
        SqeContext {
            wr_cqe: self.ring.wr_cqe(),
            stream_id: task.stream_id,
            task_id: task.slot,
        }
    }

    /// Build and load the program of a blob-carrying task.
    pub fn build_blob(
        &self,
        task: &mut Task,
        kind: MemcpyKind,
        assemble: impl Fn(u64) -> Result<Vec<u32>>,
    ) -> Result<()> {
        let name = task.payload.kind();
        let mem = task
            .payload
            .blob_mut()
            .ok_or_else(|| DqsError::invalid(format!("{name} carries no program")))?;
        self.func_calls().build(mem, kind, assemble)
    }

    /// Zero-filled device table of `count` 64-bit entries.
    pub fn alloc_table(&self, count: usize) -> Result<u64> {
        let size = count as u64 * 8;
        let device_id = self.driver().device_id();
        let addr = self
            .driver()
            .mem_alloc(size)
            .map_err(|_| DqsError::OutOfDeviceMemory { size, device_id })?;
        if let Err(e) = self
            .driver()
            .copy_to_device(addr, &vec![0u8; size as usize], MemcpyKind::HostToDevice)
        {
            if let Err(free_err) = self.driver().mem_free(addr) {
                warn!(addr = format_args!("{addr:#x}"), error = %free_err, "zero-copy table free failed");
            }
            return Err(e);
        }
        Ok(addr)
    }
}

/// Launch one task: reserve a slot, build it and put it on the ring.
///
/// On failure everything the task acquired is released and the slot is
/// handed back; the ring is left as it was.
pub(crate) fn launch(
    ctx: &DqsContext,
    ring: &dyn StreamRing,
    state: &mut DqsState,
    payload: TaskPayload,
) -> Result<u32> {
    let kind = payload.kind();
    ring.check_can_send()?;
    let slot = ring.alloc_slot()?;
    let mut task = Task {
        slot,
        stream_id: ring.stream_id(),
        sq_id: ring.sq_id(),
        payload,
    };
    let strategy = strategy(kind);
    let env = TaskEnv {
        ctx,
        ring,
        state: &*state,
    };

    let submitted = (strategy.init)(&env, &mut task)
        .and_then(|()| (strategy.build_entry)(&env, &task))
        .and_then(|sqe| ring.submit(slot, &sqe));

    match submitted {
        Ok(()) => {
            debug!(%kind, stream_id = task.stream_id, slot, "task submitted");
            state.in_flight.insert(slot, task);
            Ok(slot)
        }
        Err(e) => {
            (strategy.uninit)(&env, &mut task);
            ring.rollback_slot(slot);
            error!(
                %kind,
                stream_id = task.stream_id,
                device_id = ctx.driver.device_id(),
                slot,
                error = %e,
                "task launch failed"
            );
            Err(e)
        }
    }
}

/// Retire the task in `slot`, dumping diagnostics when it failed.
pub(crate) fn complete(
    ctx: &DqsContext,
    ring: &dyn StreamRing,
    state: &mut DqsState,
    slot: u32,
    status: TaskStatus,
) -> Result<TaskKind> {
    let mut task = state.in_flight.remove(&slot).ok_or_else(|| {
        DqsError::invalid(format!("no task in flight at slot {slot} of stream {}", ring.stream_id()))
    })?;
    let kind = task.payload.kind();
    let strategy = strategy(kind);
    let env = TaskEnv {
        ctx,
        ring,
        state: &*state,
    };
    if status == TaskStatus::Failed {
        (strategy.dump_error)(&env, &task);
    }
    (strategy.uninit)(&env, &mut task);
    debug!(%kind, stream_id = task.stream_id, slot, ?status, "task completed");
    Ok(kind)
}

/// Release every task still on the ring; used at stream teardown.
pub(crate) fn release_all(ctx: &DqsContext, ring: &dyn StreamRing, state: &mut DqsState) -> usize {
    let mut tasks: Vec<Task> = state.in_flight.drain().map(|(_, task)| task).collect();
    tasks.sort_by_key(|t| t.slot);
    let env = TaskEnv {
        ctx,
        ring,
        state: &*state,
    };
    for task in &mut tasks {
        (strategy(task.payload.kind()).uninit)(&env, task);
    }
    tasks.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPlatform;
    use crate::task::BlobTask;

    #[test]
    fn test_missing_ctrl_space_rolls_back() {
        let platform = SimPlatform::new();
        let ring = crate::sim::SimRing::new(4, 4);
        let mut state = DqsState::default();
        let err = launch(
            &platform.context,
            &ring,
            &mut state,
            TaskPayload::Dequeue(BlobTask::default()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::StateInconsistent);
        assert_eq!(ring.rollbacks(), vec![0]);
        assert_eq!(ring.outstanding(), 0);
        assert!(state.in_flight.is_empty());
        assert_eq!(platform.device.live_allocations(), 0);
    }

    #[test]
    fn test_sched_end_needs_no_state() {
        let platform = SimPlatform::new();
        let ring = crate::sim::SimRing::new(4, 9);
        let mut state = DqsState::default();
        let slot = launch(&platform.context, &ring, &mut state, TaskPayload::SchedEnd).unwrap();
        assert_eq!(state.in_flight.len(), 1);
        let (pos, sqe) = ring.submitted()[0];
        assert_eq!(pos, slot);
        assert_eq!(sqe.header.task_id, slot as u16);
        assert_eq!(
            complete(&platform.context, &ring, &mut state, slot, TaskStatus::Success).unwrap(),
            TaskKind::SchedEnd
        );
        assert!(complete(&platform.context, &ring, &mut state, slot, TaskStatus::Success).is_err());
    }

    #[test]
    fn test_submit_failure_returns_slot() {
        let platform = SimPlatform::new();
        let ring = crate::sim::SimRing::new(4, 4);
        ring.set_fail_submit(true);
        let mut state = DqsState::default();
        let err = launch(&platform.context, &ring, &mut state, TaskPayload::SchedEnd).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DriverIo);
        assert_eq!(ring.rollbacks(), vec![0]);
        assert!(ring.submitted().is_empty());
    }

    #[test]
    fn test_inter_chip_copy_without_space() {
        let platform = SimPlatform::new();
        let ring = crate::sim::SimRing::new(4, 4);
        let mut state = DqsState::default();
        let err = launch(
            &platform.context,
            &ring,
            &mut state,
            TaskPayload::InterChipMemcpy(crate::task::InterChipMemcpyTask {
                group_idx: 0,
                part: crate::inter_chip::MemcpyPart::Head,
                descriptor_addr: 0,
            }),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::StateInconsistent);
        assert_eq!(ring.rollbacks().len(), 1);
    }

    #[test]
    fn test_ring_full_allocates_nothing() {
        let platform = SimPlatform::new();
        let ring = crate::sim::SimRing::with_depth(4, 4, 1);
        let mut state = DqsState::default();
        launch(&platform.context, &ring, &mut state, TaskPayload::SchedEnd).unwrap();
        let err = launch(&platform.context, &ring, &mut state, TaskPayload::SchedEnd).unwrap_err();
        assert!(err.is_resource_error());
        assert!(ring.rollbacks().is_empty());
        assert_eq!(release_all(&platform.context, &ring, &mut state), 1);
        assert!(state.in_flight.is_empty());
    }
}
