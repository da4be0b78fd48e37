//! DQS extension of a stream and the launch entry points.
//!
//! [`StreamWithDqs`] owns the per-stream DQS state (Control Space,
//! Inter-Chip Space, notify objects, queue subscriptions and in-flight
//! tasks) behind one lock. The ring itself is reached through
//! [`StreamRing`], which the host stream implementation provides.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::ctrl_space::{ControlSpaceManager, ControlSpaceView};
use crate::driver::{DeviceDriver, NotifyKind};
use crate::error::{DqsError, Result};
use crate::func_call::FunctionCallBuilder;
use crate::inter_chip::{InterChipSpaceManager, InterChipSpaceView, MemcpyPart};
use crate::kernel::sys::{AccSubscribeParam, StreamRef};
use crate::kernel::{KernelChannel, KernelShim, DQS_INTER_CHIP_GROUP_MAX, DQS_MAX_QUEUE_NUM};
use crate::notify::{NotifyCoordinator, NotifyState, NotifyWaitRequest, WaitHandle};
use crate::queue::QueueBindingService;
use crate::sqe::Sqe;
use crate::task::dispatcher;
use crate::task::{
    AdspcTask, BlobTask, ConditionCopyTask, DqsTaskRequest, InterChipMemcpyTask, InterChipTask,
    SchedConfig, Task, TaskKind, TaskPayload, TaskStatus, ZeroCopyTask,
};

/// Ring operations the DQS layer needs from its host stream.
pub trait StreamRing: Send + Sync {
    /// Id of the host stream.
    fn stream_id(&self) -> u32;

    /// Hardware SQ backing the stream.
    fn sq_id(&self) -> u16;

    /// Whether entries should raise a completion.
    fn wr_cqe(&self) -> bool;

    /// Device address of the stream's execution counter.
    fn exec_times_addr(&self) -> u64;

    /// Fail if the stream cannot take new work at all.
    fn check_can_send(&self) -> Result<()>;

    /// Reserve the next ring position.
    fn alloc_slot(&self) -> Result<u32>;

    /// Release a position reserved by [`Self::alloc_slot`] that was never submitted.
    fn rollback_slot(&self, slot: u32);

    /// Write `sqe` at `slot` and make it visible to hardware.
    fn submit(&self, slot: u32, sqe: &Sqe) -> Result<()>;

    /// Register a wait on a notify object.
    fn arm_notify_wait(&self, request: &NotifyWaitRequest) -> Result<()>;
}

/// Process-wide pieces shared by every DQS stream of one device.
pub struct DqsContext {
    /// Shared control-node channel.
    pub channel: KernelChannel,
    /// Device access.
    pub driver: Arc<dyn DeviceDriver>,
    /// Runtime settings.
    pub config: RuntimeConfig,
}

impl DqsContext {
    /// Context over `shim` and `driver`; the control node is not opened yet.
    pub fn new(shim: Arc<dyn KernelShim>, driver: Arc<dyn DeviceDriver>, config: RuntimeConfig) -> Self {
        let channel = KernelChannel::new(shim, config.device.node.clone());
        Self {
            channel,
            driver,
            config,
        }
    }

    /// Queue binding commands on this context's channel.
    pub fn queues(&self) -> QueueBindingService<'_> {
        QueueBindingService::new(&self.channel, self.driver.as_ref())
    }

    /// Program builder sized by the configured function-call limits.
    pub fn func_calls(&self) -> FunctionCallBuilder<'_> {
        FunctionCallBuilder::new(self.driver.as_ref(), &self.config.func_call)
    }

    fn stream_ref(&self, stream_id: u32) -> StreamRef {
        StreamRef {
            stream_id,
            ts_id: self.driver.ts_id(),
        }
    }
}

/// Mutable DQS state of one stream.
#[derive(Debug, Default)]
pub struct DqsState {
    /// Mapped Control Space, once configured.
    pub ctrl_space: Option<ControlSpaceView>,
    /// Mapped Inter-Chip Space, once initialized.
    pub inter_chip: Option<InterChipSpaceView>,
    /// Notify objects created for the stream.
    pub notify: NotifyState,
    /// Accelerator subscriptions to cancel at teardown.
    pub subscriptions: Vec<AccSubscribeParam>,
    /// Launched tasks not yet completed, by slot.
    pub in_flight: FxHashMap<u32, Task>,
}

/// What a successful launch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Host-side configuration only; nothing was put on the ring.
    Configured,
    /// A notify wait is armed (or already was).
    Waiting(WaitHandle),
    /// Ring slots of the submitted tasks, in order.
    Submitted(Vec<u32>),
}

/// A stream that can run DQS tasks.
pub struct StreamWithDqs {
    context: Arc<DqsContext>,
    ring: Arc<dyn StreamRing>,
    state: Mutex<DqsState>,
}

impl std::fmt::Debug for StreamWithDqs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWithDqs")
            .field("stream_id", &self.ring.stream_id())
            .finish_non_exhaustive()
    }
}

impl StreamWithDqs {
    /// Attach DQS state to the stream behind `ring`.
    pub fn new(context: Arc<DqsContext>, ring: Arc<dyn StreamRing>) -> Self {
        Self {
            context,
            ring,
            state: Mutex::new(DqsState::default()),
        }
    }

    /// Id of the underlying stream.
    pub fn stream_id(&self) -> u32 {
        self.ring.stream_id()
    }

    fn stream_ref(&self) -> StreamRef {
        self.context.stream_ref(self.stream_id())
    }

    /// Validate `request` and carry it out.
    pub fn launch(&self, request: DqsTaskRequest) -> Result<LaunchOutcome> {
        let name = request.name();
        let result = request
            .validate(&self.context.config)
            .and_then(|()| self.dispatch(request));
        if let Err(e) = &result {
            error!(
                request = name,
                stream_id = self.stream_id(),
                device_id = self.context.driver.device_id(),
                error = %e,
                "DQS launch failed"
            );
        }
        result
    }

    fn dispatch(&self, request: DqsTaskRequest) -> Result<LaunchOutcome> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let submit = |state: &mut DqsState, payload| {
            dispatcher::launch(&self.context, self.ring.as_ref(), state, payload).map(|slot| vec![slot])
        };
        let slots = match request {
            DqsTaskRequest::SchedConfig(config) => {
                self.configure(state, &config)?;
                return Ok(LaunchOutcome::Configured);
            }
            DqsTaskRequest::NotifyWait => return self.notify_wait(state).map(LaunchOutcome::Waiting),
            DqsTaskRequest::Dequeue => {
                let batch = state
                    .ctrl_space
                    .as_ref()
                    .is_some_and(|view| view.input_queue_num() > 1);
                let payload = if batch {
                    TaskPayload::BatchDequeue(BlobTask::default())
                } else {
                    TaskPayload::Dequeue(BlobTask::default())
                };
                submit(state, payload)?
            }
            DqsTaskRequest::Enqueue => submit(state, TaskPayload::Enqueue(BlobTask::default()))?,
            DqsTaskRequest::MbufFree => submit(state, TaskPayload::MbufFree(BlobTask::default()))?,
            DqsTaskRequest::Prepare => submit(state, TaskPayload::Prepare(BlobTask::default()))?,
            DqsTaskRequest::FrameAlign => submit(state, TaskPayload::FrameAlign(BlobTask::default()))?,
            DqsTaskRequest::SchedEnd => submit(state, TaskPayload::SchedEnd)?,
            DqsTaskRequest::ZeroCopy(config) => submit(
                state,
                TaskPayload::ZeroCopy(ZeroCopyTask {
                    config,
                    mem: Default::default(),
                    dest_buf: 0,
                    offset_buf: 0,
                }),
            )?,
            DqsTaskRequest::ConditionCopy(config) => submit(
                state,
                TaskPayload::ConditionCopy(ConditionCopyTask {
                    config,
                    mem: Default::default(),
                }),
            )?,
            DqsTaskRequest::Adspc(config) => submit(
                state,
                TaskPayload::Adspc(AdspcTask {
                    config,
                    mem: Default::default(),
                }),
            )?,
            DqsTaskRequest::InterChipInit => self.inter_chip_init(state)?,
        };
        Ok(LaunchOutcome::Submitted(slots))
    }

    /// Create the Control Space on first use and (re)write its queue lists.
    fn configure(&self, state: &mut DqsState, config: &SchedConfig) -> Result<()> {
        let sched_type = config.validate()?;
        let mgr = ControlSpaceManager::new(&self.context.channel);
        let stream = self.stream_ref();
        if state.ctrl_space.is_none() {
            state.ctrl_space = Some(mgr.create(stream)?);
        }
        let queues = self.context.queues();
        let Some(view) = state.ctrl_space.as_mut() else {
            return Err(DqsError::MissingState {
                what: "control space",
                stream_id: stream.stream_id,
            });
        };
        mgr.populate(view, stream, config, sched_type, &queues)?;
        info!(
            stream_id = stream.stream_id,
            ?sched_type,
            inputs = config.input_queue_ids.len(),
            outputs = config.output_queue_ids.len(),
            "DQS stream configured"
        );
        Ok(())
    }

    /// Arm the input wait; the first wait of a kind also subscribes the queues.
    fn notify_wait(&self, state: &mut DqsState) -> Result<WaitHandle> {
        let stream = self.stream_ref();
        let view = state.ctrl_space.as_ref().ok_or(DqsError::MissingState {
            what: "control space",
            stream_id: stream.stream_id,
        })?;
        let queue_ids = view.input_queue_ids().to_vec();
        if queue_ids.is_empty() || queue_ids.len() > DQS_MAX_QUEUE_NUM {
            return Err(DqsError::invalid(format!(
                "input queue num {} not in 1..={DQS_MAX_QUEUE_NUM}",
                queue_ids.len()
            )));
        }

        let coord = NotifyCoordinator::new(self.context.driver.as_ref(), self.ring.as_ref());
        let handle = coord.ensure_wait(&mut state.notify, queue_ids.len() as u8)?;
        if handle.reused {
            return Ok(handle);
        }
        let use_count = handle.kind == NotifyKind::CountNotify;
        match self
            .context
            .queues()
            .subscribe_acc(stream, handle.notify_id, &queue_ids, use_count)
        {
            Ok(subscription) => {
                state.subscriptions.push(subscription);
                Ok(handle)
            }
            Err(e) => {
                coord.discard(&mut state.notify, handle.kind);
                Err(e)
            }
        }
    }

    /// Launch pre-proc, head copy, data copy and post-proc for each group.
    fn inter_chip_init(&self, state: &mut DqsState) -> Result<Vec<u32>> {
        if state.inter_chip.is_none() {
            state.inter_chip = Some(InterChipSpaceManager::new(&self.context.channel).create(self.stream_ref())?);
        }
        let mut slots = Vec::with_capacity(DQS_INTER_CHIP_GROUP_MAX * 4);
        for group_idx in 0..DQS_INTER_CHIP_GROUP_MAX {
            let payloads = [
                TaskPayload::InterChipPreProc(InterChipTask {
                    group_idx,
                    ..Default::default()
                }),
                TaskPayload::InterChipMemcpy(InterChipMemcpyTask {
                    group_idx,
                    part: MemcpyPart::Head,
                    descriptor_addr: 0,
                }),
                TaskPayload::InterChipMemcpy(InterChipMemcpyTask {
                    group_idx,
                    part: MemcpyPart::Data,
                    descriptor_addr: 0,
                }),
                TaskPayload::InterChipPostProc(InterChipTask {
                    group_idx,
                    ..Default::default()
                }),
            ];
            for payload in payloads {
                let slot = dispatcher::launch(&self.context, self.ring.as_ref(), state, payload)
                    .inspect_err(|_| {
                        error!(stream_id = self.stream_id(), group_idx, "inter-chip group launch failed");
                    })?;
                slots.push(slot);
            }
        }
        Ok(slots)
    }

    /// Report the hardware outcome of the task in `slot` and release it.
    pub fn complete_task(&self, slot: u32, status: TaskStatus) -> Result<TaskKind> {
        let mut state = self.state.lock();
        dispatcher::complete(&self.context, self.ring.as_ref(), &mut state, slot, status)
    }

    /// Release everything the stream holds. Every step runs; the first
    /// error is returned.
    pub fn teardown(&self) -> Result<()> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let stream = self.stream_ref();
        let mut first_err = None;

        let released = dispatcher::release_all(&self.context, self.ring.as_ref(), state);
        if released > 0 {
            warn!(stream_id = stream.stream_id, released, "in-flight DQS tasks released at teardown");
        }

        let queues = self.context.queues();
        for subscription in state.subscriptions.drain(..) {
            if let Err(e) = queues.unsubscribe_acc(&subscription) {
                warn!(stream_id = stream.stream_id, error = %e, "queue unsubscribe failed");
                first_err.get_or_insert(e);
            }
        }

        if let Err(e) = ControlSpaceManager::new(&self.context.channel).destroy(stream, &mut state.ctrl_space) {
            warn!(stream_id = stream.stream_id, error = %e, "control space destroy failed");
            first_err.get_or_insert(e);
            state.ctrl_space = None;
        }

        NotifyCoordinator::new(self.context.driver.as_ref(), self.ring.as_ref()).teardown(&mut state.notify);
        state.inter_chip = None;
        debug!(stream_id = stream.stream_id, "DQS stream torn down");

        first_err.map_or(Ok(()), Err)
    }

    /// Whether a Control Space is mapped.
    pub fn has_control_space(&self) -> bool {
        self.state.lock().ctrl_space.is_some()
    }

    /// Run `f` against the Control Space, if any.
    pub fn with_control_space<R>(&self, f: impl FnOnce(&ControlSpaceView) -> R) -> Option<R> {
        self.state.lock().ctrl_space.as_ref().map(f)
    }

    /// Whether an Inter-Chip Space is mapped.
    pub fn has_inter_chip_space(&self) -> bool {
        self.state.lock().inter_chip.is_some()
    }

    /// Tasks launched and not yet completed.
    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Driver id of the `kind` notify, if created.
    pub fn notify_id(&self, kind: NotifyKind) -> Option<u32> {
        self.state.lock().notify.get(kind)
    }

    /// Live accelerator subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }
}

/// A host stream that may or may not carry the DQS extension.
pub trait Stream {
    /// Id of the host stream.
    fn stream_id(&self) -> u32;

    /// The DQS extension, when the stream has one.
    fn as_dqs_capable(&self) -> Option<&StreamWithDqs>;
}

impl Stream for StreamWithDqs {
    fn stream_id(&self) -> u32 {
        self.ring.stream_id()
    }

    fn as_dqs_capable(&self) -> Option<&StreamWithDqs> {
        Some(self)
    }
}

/// Launch `request` on `stream`, which must be DQS capable.
pub fn launch_task(stream: &dyn Stream, request: DqsTaskRequest) -> Result<LaunchOutcome> {
    let dqs = stream.as_dqs_capable().ok_or_else(|| {
        error!(stream_id = stream.stream_id(), request = request.name(), "stream is not DQS capable");
        DqsError::NotDqsCapable {
            stream_id: stream.stream_id(),
        }
    })?;
    dqs.launch(request)
}

/// Tear down the DQS state of `stream`; plain streams have none.
pub fn teardown_stream(stream: &dyn Stream) -> Result<()> {
    stream.as_dqs_capable().map_or(Ok(()), StreamWithDqs::teardown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::StarsCmd;
    use crate::sim::SimPlatform;
    use crate::task::SchedType;
    use crate::ErrorKind;

    struct PlainStream(u32);

    impl Stream for PlainStream {
        fn stream_id(&self) -> u32 {
            self.0
        }

        fn as_dqs_capable(&self) -> Option<&StreamWithDqs> {
            None
        }
    }

    fn sched(inputs: &[u16], outputs: &[u16]) -> DqsTaskRequest {
        DqsTaskRequest::SchedConfig(SchedConfig {
            sched_type: SchedType::Nn as u32,
            input_queue_ids: inputs.to_vec(),
            output_queue_ids: outputs.to_vec(),
            frame_align: None,
        })
    }

    fn waiting(outcome: LaunchOutcome) -> WaitHandle {
        match outcome {
            LaunchOutcome::Waiting(handle) => handle,
            other => unreachable!("expected a wait, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_stream_rejected() {
        let err = launch_task(&PlainStream(3), DqsTaskRequest::SchedEnd).unwrap_err();
        assert!(matches!(err, DqsError::NotDqsCapable { stream_id: 3 }));
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        assert!(teardown_stream(&PlainStream(3)).is_ok());
    }

    #[test]
    fn test_sched_config_creates_space_once() {
        let platform = SimPlatform::new();
        platform.add_input_queue(513);
        platform.add_output_queue(0, 3);
        let (stream, _ring) = platform.stream(1);
        assert_eq!(stream.launch(sched(&[513], &[0])).unwrap(), LaunchOutcome::Configured);
        assert_eq!(stream.launch(sched(&[513], &[0])).unwrap(), LaunchOutcome::Configured);
        assert_eq!(platform.kernel.count_of(StarsCmd::CtrlSpace), 1);
        assert!(stream.has_control_space());
    }

    #[test]
    fn test_notify_wait_requires_space() {
        let platform = SimPlatform::new();
        let (stream, _ring) = platform.stream(1);
        let err = stream.launch(DqsTaskRequest::NotifyWait).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateInconsistent);
    }

    #[test]
    fn test_notify_wait_subscribes_once() {
        let platform = SimPlatform::new();
        platform.add_input_queue(513);
        platform.add_input_queue(514);
        let (stream, ring) = platform.stream(1);
        stream
            .launch(DqsTaskRequest::SchedConfig(SchedConfig {
                sched_type: SchedType::Dss as u32,
                input_queue_ids: vec![513, 514],
                output_queue_ids: vec![],
                frame_align: None,
            }))
            .unwrap();
        let first = waiting(stream.launch(DqsTaskRequest::NotifyWait).unwrap());
        assert_eq!(first.kind, NotifyKind::CountNotify);
        let second = waiting(stream.launch(DqsTaskRequest::NotifyWait).unwrap());
        assert!(second.reused);
        assert_eq!(stream.subscription_count(), 1);
        assert_eq!(platform.kernel.last_subscription().unwrap().count, 2);
        assert_eq!(ring.waits().len(), 1);
    }

    #[test]
    fn test_failed_subscribe_discards_notify() {
        let platform = SimPlatform::new();
        platform.add_input_queue(513);
        platform.kernel.fail_command(StarsCmd::AccSubscribe, nix::libc::EINVAL);
        let (stream, _ring) = platform.stream(1);
        stream
            .launch(DqsTaskRequest::SchedConfig(SchedConfig {
                sched_type: SchedType::Dss as u32,
                input_queue_ids: vec![513],
                output_queue_ids: vec![],
                frame_align: None,
            }))
            .unwrap();
        assert!(stream.launch(DqsTaskRequest::NotifyWait).is_err());
        assert_eq!(stream.notify_id(NotifyKind::Notify), None);
        assert_eq!(platform.device.live_notifies(), 0);
    }

    #[test]
    fn test_teardown_releases_everything() {
        let platform = SimPlatform::new();
        platform.add_input_queue(513);
        platform.add_output_queue(0, 3);
        let (stream, _ring) = platform.stream(1);
        stream.launch(sched(&[513], &[0])).unwrap();
        stream.launch(DqsTaskRequest::NotifyWait).unwrap();
        stream.launch(DqsTaskRequest::Dequeue).unwrap();
        assert_eq!(stream.in_flight_count(), 1);

        teardown_stream(&stream).unwrap();
        assert_eq!(stream.in_flight_count(), 0);
        assert!(!stream.has_control_space());
        assert_eq!(platform.kernel.live_ctrl_spaces(), 0);
        assert_eq!(platform.device.live_notifies(), 0);
        assert_eq!(platform.device.live_allocations(), 0);
        assert_eq!(stream.subscription_count(), 0);
    }
}
