//! Per-stream Control Space: creation, typed access and population.

use std::mem::{offset_of, size_of};
use std::ptr::NonNull;

use tracing::{debug, info, warn};

use crate::driver::{DqsQueueInfo, QueueEntityType};
use crate::error::{DqsError, Result};
use crate::kernel::layout::{InputMbufCache, StarsDqsCtrlSpace};
use crate::kernel::sys::{
    CtrlSpaceParam, CtrlSpaceResult, MbufPoolBindItem, StreamRef, CTRL_SPACE_OP_DESTROY,
};
use crate::kernel::{KernelChannel, StarsCmd, DQS_MAX_QUEUE_NUM};
use crate::queue::QueueBindingService;
use crate::task::{SchedConfig, SchedType};

/// Typed window onto a kernel-mapped Control Space.
///
/// Host-side mutation only happens under the owning stream's lock. The
/// scheduler writes `align_res` and the mbuf caches concurrently, so those
/// are read volatile.
#[derive(Debug)]
pub struct ControlSpaceView {
    ptr: NonNull<StarsDqsCtrlSpace>,
}

// SAFETY: the mapping is process-wide and the view is only used under the
// owning stream's mutex.
unsafe impl Send for ControlSpaceView {}

macro_rules! field_addr {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            #[doc = concat!("Device address of `", stringify!($field), "`.")]
            pub fn $name(&self) -> u64 {
                self.base() + offset_of!(StarsDqsCtrlSpace, $field) as u64
            }
        )*
    };
}

impl ControlSpaceView {
    /// Wrap the address returned by the kernel.
    ///
    /// # Safety
    ///
    /// `va` must point to a live, writable, 64-byte aligned
    /// `StarsDqsCtrlSpace` that outlives the view and is not aliased by
    /// another host-side view.
    pub unsafe fn from_va(va: u64) -> Option<Self> {
        NonNull::new(va as *mut StarsDqsCtrlSpace).map(|ptr| Self { ptr })
    }

    /// Host address of the mapped space.
    pub fn base(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    fn space(&self) -> &StarsDqsCtrlSpace {
        // SAFETY: guaranteed live by `from_va`.
        unsafe { self.ptr.as_ref() }
    }

    fn space_mut(&mut self) -> &mut StarsDqsCtrlSpace {
        // SAFETY: guaranteed live and unaliased by `from_va`.
        unsafe { self.ptr.as_mut() }
    }

    /// Copy of the whole space.
    pub fn snapshot(&self) -> StarsDqsCtrlSpace {
        *self.space()
    }

    /// Raw bytes, for comparisons and dumps.
    pub fn to_bytes(&self) -> Vec<u8> {
        // SAFETY: the space is plain data of exactly this size.
        unsafe {
            std::slice::from_raw_parts(self.ptr.as_ptr().cast::<u8>(), size_of::<StarsDqsCtrlSpace>())
        }
        .to_vec()
    }

    /// Number of bound input queues.
    pub fn input_queue_num(&self) -> u8 {
        self.space().input_queue_num
    }

    /// Number of bound output queues.
    pub fn output_queue_num(&self) -> u8 {
        self.space().output_queue_num
    }

    /// Raw scheduling type, 0 when unconfigured.
    pub fn sched_type(&self) -> u8 {
        self.space().sched_type
    }

    /// Input queue ids, in binding order.
    pub fn input_queue_ids(&self) -> &[u16] {
        let n = usize::from(self.input_queue_num()).min(DQS_MAX_QUEUE_NUM);
        &self.space().input_queue_ids[..n]
    }

    /// Output queue ids, in binding order.
    pub fn output_queue_ids(&self) -> &[u16] {
        let n = usize::from(self.output_queue_num()).min(DQS_MAX_QUEUE_NUM);
        &self.space().output_queue_ids[..n]
    }

    /// GQM dequeue register of input `idx`.
    pub fn input_gqm_addr(&self, idx: usize) -> Option<u64> {
        self.space().input_queue_gqm_base_addrs.get(idx).copied()
    }

    /// Mbuf pool bound to output `idx`.
    pub fn output_mbuf_pool_id(&self, idx: usize) -> Option<u32> {
        self.space().output_mbuf_pool_ids.get(idx).copied()
    }

    /// Enqueue register of output `idx`.
    pub fn output_enqueue_addr(&self, idx: usize) -> Option<u64> {
        self.space().output_qmngr_enqueue_addrs.get(idx).copied()
    }

    /// Frame-alignment verdict written by hardware.
    pub fn align_res(&self) -> bool {
        // SAFETY: in-bounds field of a live space.
        let v = unsafe { std::ptr::addr_of!((*self.ptr.as_ptr()).align_res).read_volatile() };
        v & 1 != 0
    }

    /// Cache ring of input queue `idx`.
    pub fn input_mbuf_cache(&self, idx: usize) -> Option<InputMbufCache> {
        if idx >= DQS_MAX_QUEUE_NUM {
            return None;
        }
        // SAFETY: idx checked above; the scheduler may update the record.
        Some(unsafe {
            std::ptr::addr_of!((*self.ptr.as_ptr()).input_mbuf_cache_list[idx]).read_volatile()
        })
    }

    field_addr! {
        align_res_addr => align_res,
        input_gqm_addrs_addr => input_queue_gqm_base_addrs,
        input_mbuf_list_addr => input_mbuf_list,
        input_mbuf_free_addrs_addr => input_mbuf_free_addrs,
        input_head_pool_base_addrs_addr => input_head_pool_base_addrs,
        input_head_pool_block_sizes_addr => input_head_pool_block_size_list,
        input_data_pool_block_sizes_addr => input_data_pool_block_size_list,
        input_data_pool_base_addrs_addr => input_data_pool_base_addrs,
        input_mbuf_cache_list_addr => input_mbuf_cache_list,
        output_head_pool_block_sizes_addr => output_head_pool_block_size_list,
        output_data_pool_block_sizes_addr => output_data_pool_block_size_list,
        output_mbuf_list_addr => output_mbuf_list,
        output_qmngr_enqueue_addrs_addr => output_qmngr_enqueue_addrs,
        output_qmngr_ow_addrs_addr => output_qmngr_ow_addrs,
        output_mbuf_alloc_addrs_addr => output_mbuf_alloc_addrs,
        output_mbuf_free_addrs_addr => output_mbuf_free_addrs,
        output_head_pool_base_addrs_addr => output_head_pool_base_addrs,
        output_data_pool_base_addrs_addr => output_data_pool_base_addrs,
    }

    fn write_inputs(&mut self, sched_type: SchedType, ids: &[u16], gqm_addrs: &[u64]) {
        let space = self.space_mut();
        space.sched_type = sched_type as u8;
        space.input_queue_num = ids.len() as u8;
        space.input_queue_ids = [0; DQS_MAX_QUEUE_NUM];
        space.input_queue_ids[..ids.len()].copy_from_slice(ids);
        space.input_queue_gqm_base_addrs = [0; DQS_MAX_QUEUE_NUM];
        space.input_queue_gqm_base_addrs[..gqm_addrs.len()].copy_from_slice(gqm_addrs);
    }

    fn write_frame_align(&mut self, config: &SchedConfig) {
        let space = self.space_mut();
        space.input_default_addrs = [0; DQS_MAX_QUEUE_NUM];
        match &config.frame_align {
            Some(fa) => {
                space.frame_align_mode = fa.mode;
                space.frame_align_timeout_mode = fa.timeout_mode;
                space.frame_align_timeout_threshold = fa.timeout_threshold;
                let n = fa.default_input_addrs.len().min(DQS_MAX_QUEUE_NUM);
                space.input_default_addrs[..n].copy_from_slice(&fa.default_input_addrs[..n]);
            }
            None => {
                space.frame_align_mode = 0;
                space.frame_align_timeout_mode = 0;
                space.frame_align_timeout_threshold = 0;
            }
        }
    }

    fn clear_outputs(&mut self) {
        let space = self.space_mut();
        space.output_queue_num = 0;
        space.output_queue_ids = [0; DQS_MAX_QUEUE_NUM];
        space.output_mbuf_pool_ids = [0; DQS_MAX_QUEUE_NUM];
        space.output_head_pool_block_size_list = [0; DQS_MAX_QUEUE_NUM];
        space.output_data_pool_block_size_list = [0; DQS_MAX_QUEUE_NUM];
        space.output_qmngr_enqueue_addrs = [0; DQS_MAX_QUEUE_NUM];
        space.output_qmngr_ow_addrs = [0; DQS_MAX_QUEUE_NUM];
        space.output_mbuf_alloc_addrs = [0; DQS_MAX_QUEUE_NUM];
        space.output_mbuf_free_addrs = [0; DQS_MAX_QUEUE_NUM];
        space.output_head_pool_base_addrs = [0; DQS_MAX_QUEUE_NUM];
        space.output_data_pool_base_addrs = [0; DQS_MAX_QUEUE_NUM];
    }

    fn write_outputs(&mut self, outputs: &ResolvedOutputs) {
        self.clear_outputs();
        let space = self.space_mut();
        let n = outputs.ids.len();
        space.output_queue_num = n as u8;
        space.output_queue_ids[..n].copy_from_slice(&outputs.ids);
        for (idx, (pool, info)) in outputs.pools.iter().zip(&outputs.queues).enumerate() {
            space.output_mbuf_pool_ids[idx] = pool.pool_id;
            space.output_head_pool_block_size_list[idx] = pool.head_block_size;
            space.output_data_pool_block_size_list[idx] = pool.data_block_size;
            space.output_qmngr_enqueue_addrs[idx] = info.enqueue_op_addr;
            space.output_qmngr_ow_addrs[idx] = info.prodq_ow_addr;
            space.output_mbuf_alloc_addrs[idx] = pool.alloc_addr;
            space.output_mbuf_free_addrs[idx] = pool.free_addr;
            space.output_head_pool_base_addrs[idx] = pool.head_base_addr + u64::from(pool.head_offset);
            space.output_data_pool_base_addrs[idx] = pool.data_base_addr + u64::from(pool.data_offset);
        }
    }

    #[cfg(test)]
    pub(crate) fn set_input_queue_num(&mut self, n: u8) {
        self.space_mut().input_queue_num = n;
    }
}

/// Create, destroy and populate Control Spaces.
pub struct ControlSpaceManager<'a> {
    channel: &'a KernelChannel,
}

impl<'a> ControlSpaceManager<'a> {
    /// Manager issuing its commands on `channel`.
    pub fn new(channel: &'a KernelChannel) -> Self {
        Self { channel }
    }

    /// Ask the kernel for the space of `stream` and map it.
    ///
    /// A bad status or address is reported as a malformed response.
    pub fn create(&self, stream: StreamRef) -> Result<ControlSpaceView> {
        let param = CtrlSpaceParam {
            stream_id: stream.stream_id,
            ts_id: stream.ts_id,
            ..Default::default()
        };
        let mut result = CtrlSpaceResult::default();
        self.channel.issue(StarsCmd::CtrlSpace, &param, &mut result)?;
        if result.status != 0 {
            return Err(DqsError::MalformedResponse {
                cmd: StarsCmd::CtrlSpace.name(),
                detail: format!("create status {}", result.status),
            });
        }
        if result.ctrl_space_va % 64 != 0 {
            return Err(DqsError::MalformedResponse {
                cmd: StarsCmd::CtrlSpace.name(),
                detail: format!("unaligned control space {:#x}", result.ctrl_space_va),
            });
        }
        // SAFETY: the kernel maps a Control Space at this address for the
        // life of the stream; non-null and alignment are checked here.
        let view = unsafe { ControlSpaceView::from_va(result.ctrl_space_va) }.ok_or_else(|| {
            DqsError::MalformedResponse {
                cmd: StarsCmd::CtrlSpace.name(),
                detail: "null control space".to_string(),
            }
        })?;
        info!(stream_id = stream.stream_id, ts_id = stream.ts_id, va = format_args!("{:#x}", view.base()), "control space created");
        Ok(view)
    }

    /// Destroy the space held in `slot`; an empty slot is a no-op.
    pub fn destroy(&self, stream: StreamRef, slot: &mut Option<ControlSpaceView>) -> Result<()> {
        if slot.is_none() {
            return Ok(());
        }
        self.destroy_detached(stream)?;
        *slot = None;
        Ok(())
    }

    /// Destroy the space of `stream` without holding its view, as an
    /// operator tool does.
    pub fn destroy_detached(&self, stream: StreamRef) -> Result<()> {
        let param = CtrlSpaceParam {
            stream_id: stream.stream_id,
            ts_id: stream.ts_id,
            op_type: CTRL_SPACE_OP_DESTROY,
            rsv: 0,
        };
        let mut result = CtrlSpaceResult::default();
        self.channel.issue(StarsCmd::CtrlSpace, &param, &mut result)?;
        if result.status != 0 {
            warn!(stream_id = stream.stream_id, status = result.status, "control space destroy reported non-zero status");
        }
        debug!(stream_id = stream.stream_id, "control space destroyed");
        Ok(())
    }

    /// Record the input queues and their GQM dequeue registers.
    ///
    /// Every queue is resolved before the space is touched.
    pub fn populate_input(
        &self,
        view: &mut ControlSpaceView,
        stream: StreamRef,
        config: &SchedConfig,
        sched_type: SchedType,
        queues: &QueueBindingService<'_>,
    ) -> Result<()> {
        let gqm_addrs = resolve_inputs(config, queues)?;
        view.write_inputs(sched_type, &config.input_queue_ids, &gqm_addrs);
        view.write_frame_align(config);
        self.finish_inputs(stream, config, queues)
    }

    /// Record the output queues, their pools and QMNGR registers.
    ///
    /// Every queue is resolved before the space is touched.
    pub fn populate_output(
        &self,
        view: &mut ControlSpaceView,
        config: &SchedConfig,
        sched_type: SchedType,
        queues: &QueueBindingService<'_>,
    ) -> Result<()> {
        let outputs = resolve_outputs(config, sched_type, queues)?;
        view.write_outputs(&outputs);
        debug!(output_queue_num = outputs.ids.len(), "control space outputs populated");
        Ok(())
    }

    /// Populate both sides. A failed lookup on either side leaves the
    /// space exactly as it was.
    pub fn populate(
        &self,
        view: &mut ControlSpaceView,
        stream: StreamRef,
        config: &SchedConfig,
        sched_type: SchedType,
        queues: &QueueBindingService<'_>,
    ) -> Result<()> {
        let gqm_addrs = resolve_inputs(config, queues)?;
        let outputs = resolve_outputs(config, sched_type, queues)?;
        view.write_inputs(sched_type, &config.input_queue_ids, &gqm_addrs);
        view.write_frame_align(config);
        view.write_outputs(&outputs);
        debug!(output_queue_num = outputs.ids.len(), "control space outputs populated");
        self.finish_inputs(stream, config, queues)
    }

    /// Tell the kernel the input list changed, once it is in the space.
    fn finish_inputs(&self, stream: StreamRef, config: &SchedConfig, queues: &QueueBindingService<'_>) -> Result<()> {
        let n = config.input_queue_ids.len();
        queues.update_frame_align_info(stream, n as u8)?;
        debug!(stream_id = stream.stream_id, input_queue_num = n, "control space inputs populated");
        Ok(())
    }
}

/// Output-side lookups of one configuration; empty for DSS.
#[derive(Debug, Default)]
struct ResolvedOutputs {
    ids: Vec<u16>,
    pools: Vec<MbufPoolBindItem>,
    queues: Vec<DqsQueueInfo>,
}

fn check_queue_count(side: &str, n: usize) -> Result<()> {
    if n > DQS_MAX_QUEUE_NUM {
        return Err(DqsError::invalid(format!("{side} queue num {n} exceeds {DQS_MAX_QUEUE_NUM}")));
    }
    Ok(())
}

fn resolve_inputs(config: &SchedConfig, queues: &QueueBindingService<'_>) -> Result<Vec<u64>> {
    check_queue_count("input", config.input_queue_ids.len())?;
    config
        .input_queue_ids
        .iter()
        .map(|&qid| {
            queues
                .lookup_queue_info(u32::from(qid), QueueEntityType::Gqm)
                .map(|info| info.dequeue_op_addr)
        })
        .collect()
}

fn resolve_outputs(
    config: &SchedConfig,
    sched_type: SchedType,
    queues: &QueueBindingService<'_>,
) -> Result<ResolvedOutputs> {
    if sched_type == SchedType::Dss {
        return Ok(ResolvedOutputs::default());
    }
    check_queue_count("output", config.output_queue_ids.len())?;
    let qids: Vec<u32> = config.output_queue_ids.iter().map(|&q| u32::from(q)).collect();
    let pools = queues.lookup_mbuf_pool_info(&qids)?;
    let infos = qids
        .iter()
        .map(|&qid| queues.lookup_queue_info(qid, QueueEntityType::Qmngr))
        .collect::<Result<Vec<_>>>()?;
    Ok(ResolvedOutputs {
        ids: config.output_queue_ids.clone(),
        pools,
        queues: infos,
    })
}
