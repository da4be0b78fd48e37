//! DQS task kinds, requests and the launch state machine.
//!
//! A [`DqsTaskRequest`] is validated before the stream is locked. Requests
//! that produce ring entries are turned into one or more [`TaskPayload`]s
//! and handed to the dispatcher, which walks each through
//! slot allocation, init, entry construction and submission, rolling back
//! on any failure.

mod config;
pub(crate) mod dispatcher;
mod kinds;

use serde::Serialize;

pub use config::{
    AddrOrder, AdspcConfig, ConditionCopyConfig, FrameAlignConfig, SchedConfig, SchedType,
    ZeroCopyConfig, ZeroCopyType,
};

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::func_call::FuncCallMem;
use crate::inter_chip::MemcpyPart;
use crate::sqe::DqsSubType;

/// Every kind of task that occupies a ring slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskKind {
    /// Push results to the output queues.
    Enqueue,
    /// Pop the single input queue.
    Dequeue,
    /// Pop several input queues at once.
    BatchDequeue,
    /// Patch caller slots with mbuf addresses.
    ZeroCopy,
    /// Guarded device-side copy.
    ConditionCopy,
    /// Return input mbufs to their pools.
    MbufFree,
    /// Close a scheduling round.
    SchedEnd,
    /// Allocate and seed output mbufs.
    Prepare,
    /// Check frame alignment across inputs.
    FrameAlign,
    /// Drain an accelerator completion queue.
    Adspc,
    /// Allocate the remote mbuf of a group.
    InterChipPreProc,
    /// Head or data copy of a group.
    InterChipMemcpy,
    /// Publish the remote mbuf of a group.
    InterChipPostProc,
}

impl TaskKind {
    /// All kinds, in strategy-table order.
    pub const ALL: [Self; 13] = [
        Self::Enqueue,
        Self::Dequeue,
        Self::BatchDequeue,
        Self::ZeroCopy,
        Self::ConditionCopy,
        Self::MbufFree,
        Self::SchedEnd,
        Self::Prepare,
        Self::FrameAlign,
        Self::Adspc,
        Self::InterChipPreProc,
        Self::InterChipMemcpy,
        Self::InterChipPostProc,
    ];

    /// Entry sub-type of kinds that call a function-call program.
    pub const fn sub_type(self) -> Option<DqsSubType> {
        Some(match self {
            Self::Enqueue => DqsSubType::Enqueue,
            Self::Dequeue => DqsSubType::Dequeue,
            Self::BatchDequeue => DqsSubType::BatchDequeue,
            Self::ZeroCopy => DqsSubType::ZeroCopy,
            Self::ConditionCopy => DqsSubType::ConditionCopy,
            Self::MbufFree => DqsSubType::MbufFree,
            Self::Prepare => DqsSubType::Prepare,
            Self::FrameAlign => DqsSubType::FrameAlign,
            Self::Adspc => DqsSubType::Adspc,
            Self::InterChipPreProc => DqsSubType::InterChipPreProc,
            Self::InterChipPostProc => DqsSubType::InterChipPostProc,
            Self::SchedEnd | Self::InterChipMemcpy => return None,
        })
    }

    /// Name used in logs.
    pub fn name(self) -> &'static str {
        kinds::strategy(self).name
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Task whose only resource is its program blob.
#[derive(Debug, Default)]
pub struct BlobTask {
    /// Loaded program.
    pub mem: FuncCallMem,
}

/// Zero-copy task and the device tables it owns.
#[derive(Debug)]
pub struct ZeroCopyTask {
    /// Validated request.
    pub config: ZeroCopyConfig,
    /// Loaded program.
    pub mem: FuncCallMem,
    /// Device copy of the destination table; 0 until allocated.
    pub dest_buf: u64,
    /// Device copy of the offset table; 0 until allocated.
    pub offset_buf: u64,
}

/// Guarded copy task.
#[derive(Debug)]
pub struct ConditionCopyTask {
    /// Validated request.
    pub config: ConditionCopyConfig,
    /// Loaded program.
    pub mem: FuncCallMem,
}

/// Accelerator drain task.
#[derive(Debug)]
pub struct AdspcTask {
    /// Validated request.
    pub config: AdspcConfig,
    /// Loaded program.
    pub mem: FuncCallMem,
}

/// Pre- or post-processing of one inter-chip group.
#[derive(Debug, Default)]
pub struct InterChipTask {
    /// Index into the Inter-Chip Space.
    pub group_idx: usize,
    /// Loaded program.
    pub mem: FuncCallMem,
}

/// One of the two copy tasks of an inter-chip group.
#[derive(Debug)]
pub struct InterChipMemcpyTask {
    /// Index into the Inter-Chip Space.
    pub group_idx: usize,
    /// Head or data copy.
    pub part: MemcpyPart,
    /// Resolved at init.
    pub descriptor_addr: u64,
}

/// Kind-specific state of a task; the variant is the kind.
#[derive(Debug)]
pub enum TaskPayload {
    /// State of a [`TaskKind::Enqueue`] task.
    Enqueue(BlobTask),
    /// State of a [`TaskKind::Dequeue`] task.
    Dequeue(BlobTask),
    /// State of a [`TaskKind::BatchDequeue`] task.
    BatchDequeue(BlobTask),
    /// State of a [`TaskKind::ZeroCopy`] task.
    ZeroCopy(ZeroCopyTask),
    /// State of a [`TaskKind::ConditionCopy`] task.
    ConditionCopy(ConditionCopyTask),
    /// State of a [`TaskKind::MbufFree`] task.
    MbufFree(BlobTask),
    /// State of a [`TaskKind::SchedEnd`] task.
    SchedEnd,
    /// State of a [`TaskKind::Prepare`] task.
    Prepare(BlobTask),
    /// State of a [`TaskKind::FrameAlign`] task.
    FrameAlign(BlobTask),
    /// State of a [`TaskKind::Adspc`] task.
    Adspc(AdspcTask),
    /// State of a [`TaskKind::InterChipPreProc`] task.
    InterChipPreProc(InterChipTask),
    /// State of a [`TaskKind::InterChipMemcpy`] task.
    InterChipMemcpy(InterChipMemcpyTask),
    /// State of a [`TaskKind::InterChipPostProc`] task.
    InterChipPostProc(InterChipTask),
}

impl TaskPayload {
    /// Kind matching the variant.
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Enqueue(_) => TaskKind::Enqueue,
            Self::Dequeue(_) => TaskKind::Dequeue,
            Self::BatchDequeue(_) => TaskKind::BatchDequeue,
            Self::ZeroCopy(_) => TaskKind::ZeroCopy,
            Self::ConditionCopy(_) => TaskKind::ConditionCopy,
            Self::MbufFree(_) => TaskKind::MbufFree,
            Self::SchedEnd => TaskKind::SchedEnd,
            Self::Prepare(_) => TaskKind::Prepare,
            Self::FrameAlign(_) => TaskKind::FrameAlign,
            Self::Adspc(_) => TaskKind::Adspc,
            Self::InterChipPreProc(_) => TaskKind::InterChipPreProc,
            Self::InterChipMemcpy(_) => TaskKind::InterChipMemcpy,
            Self::InterChipPostProc(_) => TaskKind::InterChipPostProc,
        }
    }

    /// Program blob, for kinds that have one.
    pub fn blob(&self) -> Option<&FuncCallMem> {
        match self {
            Self::Enqueue(t)
            | Self::Dequeue(t)
            | Self::BatchDequeue(t)
            | Self::MbufFree(t)
            | Self::Prepare(t)
            | Self::FrameAlign(t) => Some(&t.mem),
            Self::ZeroCopy(t) => Some(&t.mem),
            Self::ConditionCopy(t) => Some(&t.mem),
            Self::Adspc(t) => Some(&t.mem),
            Self::InterChipPreProc(t) | Self::InterChipPostProc(t) => Some(&t.mem),
            Self::SchedEnd | Self::InterChipMemcpy(_) => None,
        }
    }

    /// Mutable program blob, for kinds that have one.
    pub fn blob_mut(&mut self) -> Option<&mut FuncCallMem> {
        match self {
            Self::Enqueue(t)
            | Self::Dequeue(t)
            | Self::BatchDequeue(t)
            | Self::MbufFree(t)
            | Self::Prepare(t)
            | Self::FrameAlign(t) => Some(&mut t.mem),
            Self::ZeroCopy(t) => Some(&mut t.mem),
            Self::ConditionCopy(t) => Some(&mut t.mem),
            Self::Adspc(t) => Some(&mut t.mem),
            Self::InterChipPreProc(t) | Self::InterChipPostProc(t) => Some(&mut t.mem),
            Self::SchedEnd | Self::InterChipMemcpy(_) => None,
        }
    }
}

/// One launched task.
#[derive(Debug)]
pub struct Task {
    /// Ring position; also the entry's task id.
    pub slot: u32,
    /// Owning stream.
    pub stream_id: u32,
    /// SQ backing the stream.
    pub sq_id: u16,
    /// Kind-specific state.
    pub payload: TaskPayload,
}

/// Hardware outcome reported by the completion path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Completed normally.
    Success,
    /// Completed with an error; diagnostics are dumped.
    Failed,
}

/// What a caller asks a DQS stream to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DqsTaskRequest {
    /// Bind the stream's input and output queues.
    SchedConfig(SchedConfig),
    /// Arm the stream's input wait, subscribing queues on first use.
    NotifyWait,
    /// Pop from the input queues; batch form for more than one.
    Dequeue,
    /// Push the current outputs.
    Enqueue,
    /// Free the current inputs.
    MbufFree,
    /// Allocate the outputs of the next round.
    Prepare,
    /// Check input frame alignment.
    FrameAlign,
    /// End the scheduling round.
    SchedEnd,
    /// Patch caller slots with mbuf addresses.
    ZeroCopy(ZeroCopyConfig),
    /// Copy guarded by a device-side flag.
    ConditionCopy(ConditionCopyConfig),
    /// Drain an accelerator completion queue.
    Adspc(AdspcConfig),
    /// Pre-proc, head copy, data copy and post-proc for every inter-chip group.
    InterChipInit,
}

impl DqsTaskRequest {
    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SchedConfig(_) => "SchedConfig",
            Self::NotifyWait => "NotifyWait",
            Self::Dequeue => "Dequeue",
            Self::Enqueue => "Enqueue",
            Self::MbufFree => "MbufFree",
            Self::Prepare => "Prepare",
            Self::FrameAlign => "FrameAlign",
            Self::SchedEnd => "SchedEnd",
            Self::ZeroCopy(_) => "ZeroCopy",
            Self::ConditionCopy(_) => "ConditionCopy",
            Self::Adspc(_) => "Adspc",
            Self::InterChipInit => "InterChipInit",
        }
    }

    /// Checks that need no stream state; run before anything is allocated.
    pub fn validate(&self, config: &RuntimeConfig) -> Result<()> {
        match self {
            Self::SchedConfig(c) => c.validate().map(drop),
            Self::ZeroCopy(c) => c.validate().map(drop),
            Self::ConditionCopy(c) => c.validate(config),
            Self::Adspc(c) => c.validate(config),
            Self::NotifyWait
            | Self::InterChipInit
            | Self::Dequeue
            | Self::Enqueue
            | Self::MbufFree
            | Self::Prepare
            | Self::FrameAlign
            | Self::SchedEnd => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_unique() {
        let mut names: Vec<_> = TaskKind::ALL.iter().map(|k| k.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), TaskKind::ALL.len());
    }

    #[test]
    fn test_payload_kind_matches_table() {
        assert_eq!(TaskPayload::SchedEnd.kind(), TaskKind::SchedEnd);
        assert_eq!(TaskPayload::Dequeue(BlobTask::default()).kind().name(), "Dequeue");
        assert_eq!(
            TaskPayload::InterChipPostProc(InterChipTask::default()).kind().name(),
            "InterChipPostProc"
        );
    }

    #[test]
    fn test_sub_types() {
        assert_eq!(TaskKind::SchedEnd.sub_type(), None);
        assert_eq!(TaskKind::InterChipMemcpy.sub_type(), None);
        assert_eq!(TaskKind::Prepare.sub_type(), Some(DqsSubType::Prepare));
    }

    #[test]
    fn test_blob_presence() {
        assert!(TaskPayload::SchedEnd.blob().is_none());
        let mut p = TaskPayload::Enqueue(BlobTask::default());
        assert!(p.blob_mut().is_some());
        assert!(!p.blob().unwrap().is_allocated());
    }

    #[test]
    fn test_request_validation() {
        let config = RuntimeConfig::default();
        assert!(DqsTaskRequest::Dequeue.validate(&config).is_ok());
        assert!(DqsTaskRequest::InterChipInit.validate(&config).is_ok());
        let zc = ZeroCopyConfig {
            copy_type: 5,
            ..Default::default()
        };
        assert_eq!(
            DqsTaskRequest::ZeroCopy(zc).validate(&config).unwrap_err().kind(),
            crate::ErrorKind::InvalidValue
        );
    }
}
