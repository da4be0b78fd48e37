//! Caller-supplied task configurations and their validation.
//!
//! Enumerations arrive as raw integers so unsupported values can be
//! rejected as `InvalidValue` before anything is allocated.

use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::error::{DqsError, Result};
use crate::kernel::DQS_MAX_QUEUE_NUM;

/// Scheduler type of a stream.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedType {
    /// Input-only scheduling; no output queues.
    Dss = 0,
    /// Neural-network fan-in to output queues.
    Nn = 1,
    /// Video processing pipeline.
    Vpc = 2,
}

impl SchedType {
    /// Decode a raw value; `None` when unsupported.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Dss),
            1 => Some(Self::Nn),
            2 => Some(Self::Vpc),
            _ => None,
        }
    }
}

/// Frame-alignment policy for fan-in streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameAlignConfig {
    /// Alignment mode passed through to the kernel.
    pub mode: u8,
    /// How a frame timeout is handled.
    pub timeout_mode: u8,
    /// Frame timeout threshold.
    pub timeout_threshold: u32,
    /// Substitute input address per queue when a frame times out.
    pub default_input_addrs: Vec<u64>,
}

/// Binds a stream's logical input and output queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedConfig {
    /// Raw [`SchedType`].
    pub sched_type: u32,
    /// Input queues, at most [`DQS_MAX_QUEUE_NUM`].
    pub input_queue_ids: Vec<u16>,
    /// Output queues; empty exactly for [`SchedType::Dss`].
    pub output_queue_ids: Vec<u16>,
    /// Optional frame alignment across the inputs.
    #[serde(default)]
    pub frame_align: Option<FrameAlignConfig>,
}

impl SchedConfig {
    /// Check queue counts against the scheduling type.
    ///
    /// Returns the decoded [`SchedType`].
    pub fn validate(&self) -> Result<SchedType> {
        let sched_type = SchedType::from_raw(self.sched_type)
            .ok_or_else(|| DqsError::invalid(format!("unsupported sched type {}", self.sched_type)))?;
        let inputs = self.input_queue_ids.len();
        if inputs == 0 || inputs > DQS_MAX_QUEUE_NUM {
            return Err(DqsError::invalid(format!(
                "input queue num {inputs} not in 1..={DQS_MAX_QUEUE_NUM}"
            )));
        }
        let outputs = self.output_queue_ids.len();
        match sched_type {
            SchedType::Dss if outputs != 0 => {
                return Err(DqsError::invalid(format!("DSS stream cannot have {outputs} output queues")));
            }
            SchedType::Nn | SchedType::Vpc if outputs == 0 || outputs > DQS_MAX_QUEUE_NUM => {
                return Err(DqsError::invalid(format!(
                    "output queue num {outputs} not in 1..={DQS_MAX_QUEUE_NUM}"
                )));
            }
            _ => {}
        }
        if let Some(fa) = &self.frame_align {
            if fa.default_input_addrs.len() > inputs {
                return Err(DqsError::invalid(format!(
                    "{} frame-align default addresses for {inputs} input queues",
                    fa.default_input_addrs.len()
                )));
            }
        }
        Ok(sched_type)
    }
}

/// Side of the Control Space a zero-copy task patches from.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroCopyType {
    /// Patch from the input side.
    Input = 0,
    /// Patch from the output side.
    Output = 1,
}

/// Word order used when writing a 64-bit address into a caller slot.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrOrder {
    /// Low word at the lower address.
    Low32First = 0,
    /// High word at the lower address.
    High32First = 1,
}

/// Patch caller pointer slots with addresses inside the current mbuf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZeroCopyConfig {
    /// Raw [`ZeroCopyType`].
    pub copy_type: u32,
    /// Raw [`AddrOrder`].
    pub addr_order: u32,
    /// Logical queue whose current mbuf is patched.
    pub queue_id: u16,
    /// Number of slots to patch.
    pub count: u32,
    /// Device addresses of the slots to patch.
    pub dest: Option<Vec<u64>>,
    /// Byte offsets into the mbuf data, one per slot.
    pub offset: Option<Vec<u64>>,
}

impl ZeroCopyConfig {
    /// Decode the enums and check both tables cover `count` slots.
    pub fn validate(&self) -> Result<(ZeroCopyType, AddrOrder)> {
        let copy_type = match self.copy_type {
            0 => ZeroCopyType::Input,
            1 => ZeroCopyType::Output,
            other => return Err(DqsError::invalid(format!("unsupported zero-copy type {other}"))),
        };
        let order = match self.addr_order {
            0 => AddrOrder::Low32First,
            1 => AddrOrder::High32First,
            other => return Err(DqsError::invalid(format!("unsupported address order {other}"))),
        };
        if self.count == 0 {
            return Err(DqsError::invalid("zero-copy count is zero"));
        }
        let count = self.count as usize;
        for (name, table) in [("dest", &self.dest), ("offset", &self.offset)] {
            match table {
                None => return Err(DqsError::invalid(format!("zero-copy {name} table missing"))),
                Some(t) if t.len() < count => {
                    return Err(DqsError::invalid(format!(
                        "zero-copy {name} table has {} entries, need {count}",
                        t.len()
                    )));
                }
                Some(_) => {}
            }
        }
        Ok((copy_type, order))
    }
}

/// Copy `count_bytes` from `src_addr` to `dst_addr` when the condition cell is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionCopyConfig {
    /// Device flag cell.
    pub condition_addr: u64,
    /// Copy destination, 8-byte aligned.
    pub dst_addr: u64,
    /// Capacity of the destination in bytes.
    pub dst_max: u64,
    /// Copy source, 8-byte aligned.
    pub src_addr: u64,
    /// Bytes to copy; a multiple of 8.
    pub count_bytes: u64,
}

impl ConditionCopyConfig {
    /// Reject null or unaligned addresses and oversized copies.
    pub fn validate(&self, config: &RuntimeConfig) -> Result<()> {
        if self.condition_addr == 0 || self.dst_addr == 0 || self.src_addr == 0 {
            return Err(DqsError::invalid("condition copy address is null"));
        }
        if self.count_bytes == 0 {
            return Err(DqsError::invalid("condition copy count is zero"));
        }
        if self.dst_addr % 8 != 0 || self.src_addr % 8 != 0 || self.count_bytes % 8 != 0 {
            return Err(DqsError::invalid(format!(
                "condition copy dst {:#x} src {:#x} count {} must be 8-byte aligned",
                self.dst_addr, self.src_addr, self.count_bytes
            )));
        }
        let limit = self.dst_max.min(config.condition_copy.max_bytes);
        if self.count_bytes > limit {
            return Err(DqsError::invalid(format!(
                "condition copy of {} bytes exceeds limit {limit}",
                self.count_bytes
            )));
        }
        Ok(())
    }
}

/// Drain completion entries of an accelerator CQ into an output queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdspcConfig {
    /// Output queue receiving `mbuf_handle`.
    pub queue_id: u32,
    /// Mbuf enqueued after the drain.
    pub mbuf_handle: u32,
    /// Bytes per completion entry; must match the runtime setting.
    pub cqe_size: u32,
    /// Entries in the CQ; must match the runtime setting.
    pub cq_depth: u32,
    /// First completion entry.
    pub cqe_base_addr: u64,
    /// Where the drained entry is copied.
    pub cqe_copy_addr: u64,
    /// CQ head register.
    pub cq_head_reg_addr: u64,
    /// CQ tail register.
    pub cq_tail_reg_addr: u64,
}

impl AdspcConfig {
    /// Check the CQ geometry against `config`.
    pub fn validate(&self, config: &RuntimeConfig) -> Result<()> {
        if self.cqe_size != config.adspc.cqe_size {
            return Err(DqsError::invalid(format!(
                "cqe size {} unsupported, expected {}",
                self.cqe_size, config.adspc.cqe_size
            )));
        }
        if self.cq_depth != config.adspc.cq_depth {
            return Err(DqsError::invalid(format!(
                "cq depth {} unsupported, expected {}",
                self.cq_depth, config.adspc.cq_depth
            )));
        }
        if self.cqe_base_addr == 0
            || self.cqe_copy_addr == 0
            || self.cq_head_reg_addr == 0
            || self.cq_tail_reg_addr == 0
        {
            return Err(DqsError::invalid("adspc cq address is null"));
        }
        Ok(())
    }
}
