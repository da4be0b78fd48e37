//! Per-kind strategy records: init, entry construction, uninit, error dump.

use std::mem::{offset_of, size_of};

use tracing::{error, warn};

use super::dispatcher::TaskEnv;
use super::{Task, TaskKind, TaskPayload, ZeroCopyType};
use crate::driver::{read_words, write_u64s, MemcpyKind, NotifyKind, QueueEntityType};
use crate::error::{DqsError, Result};
use crate::fc::{
    self, AdspcParams, BatchDequeueParams, ConditionCopyParams, DequeueParams, EnqueueParams,
    FrameAlignParams, InterChipPostProcParams, InterChipPreProcParams, MbufFreeParams,
    PrepareParams, ZeroCopyParams,
};
use crate::inter_chip::MemcpyPart;
use crate::kernel::{InputMbufCache, DQS_POOL_ID_MASK};
use crate::notify::CountNotifyRegs;
use crate::sqe::Sqe;
use crate::task::AddrOrder;

/// Largest CQ index mask an ANDI immediate can carry.
const MAX_CQE_MASK: u32 = 0xFFF;

type InitFn = fn(&TaskEnv<'_>, &mut Task) -> Result<()>;
type EntryFn = fn(&TaskEnv<'_>, &Task) -> Result<Sqe>;
type UninitFn = fn(&TaskEnv<'_>, &mut Task);
type DumpFn = fn(&TaskEnv<'_>, &Task);

pub(crate) struct KindStrategy {
    pub name: &'static str,
    pub init: InitFn,
    pub build_entry: EntryFn,
    pub uninit: UninitFn,
    pub dump_error: DumpFn,
}

const fn blob_kind(name: &'static str, init: InitFn, dump_error: DumpFn) -> KindStrategy {
    KindStrategy {
        name,
        init,
        build_entry: blob_entry,
        uninit: release_blob,
        dump_error,
    }
}

/// Indexed by `TaskKind as usize`.
static STRATEGIES: [KindStrategy; 13] = [
    blob_kind("Enqueue", init_enqueue, dump_presence),
    blob_kind("Dequeue", init_dequeue, dump_dequeue),
    blob_kind("BatchDequeue", init_batch_dequeue, dump_dequeue),
    KindStrategy {
        name: "ZeroCopy",
        init: init_zero_copy,
        build_entry: blob_entry,
        uninit: release_zero_copy,
        dump_error: dump_presence,
    },
    blob_kind("ConditionCopy", init_condition_copy, dump_presence),
    blob_kind("MbufFree", init_mbuf_free, dump_presence),
    KindStrategy {
        name: "SchedEnd",
        init: init_nothing,
        build_entry: sched_end_entry,
        uninit: release_nothing,
        dump_error: dump_presence,
    },
    blob_kind("Prepare", init_prepare, dump_prepare),
    KindStrategy {
        name: "FrameAlign",
        init: init_frame_align,
        build_entry: frame_align_entry,
        uninit: release_blob,
        dump_error: dump_presence,
    },
    blob_kind("Adspc", init_adspc, dump_adspc),
    blob_kind("InterChipPreProc", init_inter_chip_pre_proc, dump_presence),
    KindStrategy {
        name: "InterChipMemcpy",
        init: init_inter_chip_memcpy,
        build_entry: memcpy_entry,
        uninit: release_nothing,
        dump_error: dump_presence,
    },
    blob_kind("InterChipPostProc", init_inter_chip_post_proc, dump_presence),
];

pub(crate) fn strategy(kind: TaskKind) -> &'static KindStrategy {
    &STRATEGIES[kind as usize]
}

fn payload_mismatch(task: &Task) -> DqsError {
    DqsError::invalid(format!("payload {} routed to the wrong strategy", task.payload.kind()))
}

// ============================================================================
// Init
// ============================================================================

fn init_nothing(_env: &TaskEnv<'_>, _task: &mut Task) -> Result<()> {
    Ok(())
}

fn init_enqueue(env: &TaskEnv<'_>, task: &mut Task) -> Result<()> {
    let view = env.ctrl_space()?;
    let params = EnqueueParams {
        ow_addrs: view.output_qmngr_ow_addrs_addr(),
        handles: view.output_mbuf_list_addr(),
        enqueue_addrs: view.output_qmngr_enqueue_addrs_addr(),
        free_addrs: view.output_mbuf_free_addrs_addr(),
        pool_index_max: u32::from(view.output_queue_num()),
        exec_times_addr: env.ring.exec_times_addr(),
        sq_id: task.sq_id,
    };
    env.build_blob(task, MemcpyKind::HostToDevice, |_| fc::enqueue(&params))
}

fn init_dequeue(env: &TaskEnv<'_>, task: &mut Task) -> Result<()> {
    let view = env.ctrl_space()?;
    let params = DequeueParams {
        gqm_addrs: view.input_gqm_addrs_addr(),
        handles: view.input_mbuf_list_addr(),
        exec_times_addr: env.ring.exec_times_addr(),
        sq_id: task.sq_id,
        dfx_addr: 0,
    };
    env.build_blob(task, MemcpyKind::DeviceToDevice, |dfx| {
        fc::dequeue(&DequeueParams { dfx_addr: dfx, ..params })
    })
}

fn init_batch_dequeue(env: &TaskEnv<'_>, task: &mut Task) -> Result<()> {
    let view = env.ctrl_space()?;
    let notify_id = env.state.notify.get(NotifyKind::CountNotify).ok_or_else(|| {
        DqsError::Sync(format!("count notify not created on stream {}", task.stream_id))
    })?;
    let regs = CountNotifyRegs::resolve(env.ctx.driver.as_ref(), notify_id)?;
    let params = BatchDequeueParams {
        gqm_addrs: view.input_gqm_addrs_addr(),
        handles: view.input_mbuf_list_addr(),
        free_addrs: view.input_mbuf_free_addrs_addr(),
        cache_list: view.input_mbuf_cache_list_addr(),
        cnt_offset: offset_of!(InputMbufCache, cnt) as u32,
        cache_record_size: size_of::<InputMbufCache>() as u32,
        cnt_read_addr: regs.read,
        cnt_clear_addr: regs.clear,
        pool_index_max: u32::from(view.input_queue_num()),
        exec_times_addr: env.ring.exec_times_addr(),
        sq_id: task.sq_id,
        dfx_addr: 0,
    };
    env.build_blob(task, MemcpyKind::DeviceToDevice, |dfx| {
        fc::batch_dequeue(&BatchDequeueParams { dfx_addr: dfx, ..params })
    })
}

/// Input pool ids are only known once handles have been dequeued, so the
/// free list is taken from whatever the Control Space holds now.
fn init_mbuf_free(env: &TaskEnv<'_>, task: &mut Task) -> Result<()> {
    let view = env.ctrl_space()?;
    let params = MbufFreeParams {
        free_addrs: view.input_mbuf_free_addrs_addr(),
        handles: view.input_mbuf_list_addr(),
        pool_index_max: u32::from(view.input_queue_num()),
    };
    env.build_blob(task, MemcpyKind::DeviceToDevice, |_| fc::mbuf_free(&params))
}

fn init_prepare(env: &TaskEnv<'_>, task: &mut Task) -> Result<()> {
    let view = env.ctrl_space()?;
    let params = PrepareParams {
        input_handles: view.input_mbuf_list_addr(),
        input_head_bases: view.input_head_pool_base_addrs_addr(),
        input_head_block_sizes: view.input_head_pool_block_sizes_addr(),
        output_alloc_addrs: view.output_mbuf_alloc_addrs_addr(),
        output_handles: view.output_mbuf_list_addr(),
        output_head_bases: view.output_head_pool_base_addrs_addr(),
        output_head_block_sizes: view.output_head_pool_block_sizes_addr(),
        output_queue_num: u32::from(view.output_queue_num()),
        dfx_pool_idx_addr: 0,
        dfx_alloc_result_addr: 0,
        sq_id: task.sq_id,
    };
    env.build_blob(task, MemcpyKind::DeviceToDevice, |dfx| {
        fc::prepare(&PrepareParams {
            dfx_pool_idx_addr: dfx,
            dfx_alloc_result_addr: dfx + 4,
            ..params
        })
    })
}

fn init_frame_align(env: &TaskEnv<'_>, task: &mut Task) -> Result<()> {
    let params = FrameAlignParams {
        align_res_addr: env.ctrl_space()?.align_res_addr(),
        sq_id: task.sq_id,
    };
    env.build_blob(task, MemcpyKind::DeviceToDevice, |_| fc::frame_align(&params))
}

fn init_zero_copy(env: &TaskEnv<'_>, task: &mut Task) -> Result<()> {
    let TaskPayload::ZeroCopy(zc) = &mut task.payload else {
        return Err(payload_mismatch(task));
    };
    let (copy_type, order) = zc.config.validate()?;
    let view = env.ctrl_space()?;
    let (ids, handles, data_bases, block_sizes) = match copy_type {
        ZeroCopyType::Input => (
            view.input_queue_ids(),
            view.input_mbuf_list_addr(),
            view.input_data_pool_base_addrs_addr(),
            view.input_data_pool_block_sizes_addr(),
        ),
        ZeroCopyType::Output => (
            view.output_queue_ids(),
            view.output_mbuf_list_addr(),
            view.output_data_pool_base_addrs_addr(),
            view.output_data_pool_block_sizes_addr(),
        ),
    };
    let qid = zc.config.queue_id;
    let idx = ids.iter().position(|&q| q == qid).ok_or_else(|| {
        DqsError::invalid(format!("queue {qid} not bound as {copy_type:?} on stream {}", task.stream_id))
    })? as u64;

    let count = zc.config.count as usize;
    let dest = zc.config.dest.as_deref().unwrap_or_default();
    let offset = zc.config.offset.as_deref().unwrap_or_default();
    zc.dest_buf = env.alloc_table(count)?;
    write_u64s(env.driver(), zc.dest_buf, &dest[..count], MemcpyKind::HostToDevice)?;
    zc.offset_buf = env.alloc_table(count)?;
    write_u64s(env.driver(), zc.offset_buf, &offset[..count], MemcpyKind::HostToDevice)?;

    let params = ZeroCopyParams {
        handle_addr: handles + idx * 4,
        data_base_addr: data_bases + idx * 8,
        block_size_addr: block_sizes + idx * 4,
        dest_table: zc.dest_buf,
        offset_table: zc.offset_buf,
        count: zc.config.count,
        low32_first: order == AddrOrder::Low32First,
    };
    env.func_calls().build(&mut zc.mem, MemcpyKind::DeviceToDevice, |_| fc::zero_copy(&params))
}

fn init_condition_copy(env: &TaskEnv<'_>, task: &mut Task) -> Result<()> {
    let TaskPayload::ConditionCopy(cc) = &task.payload else {
        return Err(payload_mismatch(task));
    };
    let config = cc.config;
    config.validate(&env.ctx.config)?;
    let count = u32::try_from(config.count_bytes / 8)
        .map_err(|_| DqsError::invalid(format!("condition copy count {} too large", config.count_bytes)))?;
    let params = ConditionCopyParams {
        condition_addr: config.condition_addr,
        dst_addr: config.dst_addr,
        src_addr: config.src_addr,
        count,
    };
    env.build_blob(task, MemcpyKind::DeviceToDevice, |_| fc::condition_copy(&params))
}

fn init_adspc(env: &TaskEnv<'_>, task: &mut Task) -> Result<()> {
    let TaskPayload::Adspc(adspc) = &task.payload else {
        return Err(payload_mismatch(task));
    };
    let config = adspc.config;
    if !config.cq_depth.is_power_of_two() {
        return Err(DqsError::invalid(format!("cq depth {} is not a power of two", config.cq_depth)));
    }
    let mask = config.cq_depth - 1;
    if mask > MAX_CQE_MASK {
        return Err(DqsError::invalid(format!("cq depth {} too large", config.cq_depth)));
    }
    let queue = env
        .ctx
        .queues()
        .lookup_queue_info(config.queue_id, QueueEntityType::Qmngr)?;
    let pool = env.driver().mbuf_pool_info(config.mbuf_handle & DQS_POOL_ID_MASK)?;
    let params = AdspcParams {
        enqueue_reg: queue.enqueue_op_addr,
        ow_reg: queue.prodq_ow_addr,
        free_reg: pool.free_op_addr,
        mbuf_handle: config.mbuf_handle,
        cqe_head_tail_mask: mask,
        cqe_size: config.cqe_size,
        cqe_base_addr: config.cqe_base_addr,
        cqe_copy_addr: config.cqe_copy_addr,
        cq_head_reg: config.cq_head_reg_addr,
        cq_tail_reg: config.cq_tail_reg_addr,
        dfx_addr: 0,
    };
    env.build_blob(task, MemcpyKind::HostToDevice, |dfx| {
        fc::adspc(&AdspcParams { dfx_addr: dfx, ..params })
    })
}

fn group_of(task: &Task) -> Result<usize> {
    match &task.payload {
        TaskPayload::InterChipPreProc(t) | TaskPayload::InterChipPostProc(t) => Ok(t.group_idx),
        TaskPayload::InterChipMemcpy(t) => Ok(t.group_idx),
        _ => Err(payload_mismatch(task)),
    }
}

fn init_inter_chip_pre_proc(env: &TaskEnv<'_>, task: &mut Task) -> Result<()> {
    let group = env.inter_chip()?.group(group_of(task)?)?;
    let params = InterChipPreProcParams {
        dst_mbuf_handle: group.dst_mbuf_handle(),
        dst_mbuf_alloc_addr: group.dst_mbuf_alloc_addr(),
        dst_head_block_size: group.dst_head_block_size(),
        dst_data_block_size: group.dst_data_block_size(),
        dst_head_base_addr: group.dst_head_base_addr(),
        dst_data_base_addr: group.dst_data_base_addr(),
        head_sqe_dst_addr: group.descriptor_dst(MemcpyPart::Head),
        data_sqe_dst_addr: group.descriptor_dst(MemcpyPart::Data),
        sq_id: task.sq_id,
    };
    env.build_blob(task, MemcpyKind::DeviceToDevice, |_| fc::inter_chip_pre_proc(&params))
}

fn init_inter_chip_memcpy(env: &TaskEnv<'_>, task: &mut Task) -> Result<()> {
    let group = env.inter_chip()?.group(group_of(task)?)?;
    let TaskPayload::InterChipMemcpy(copy) = &mut task.payload else {
        return Err(payload_mismatch(task));
    };
    copy.descriptor_addr = group.descriptor(copy.part);
    Ok(())
}

fn init_inter_chip_post_proc(env: &TaskEnv<'_>, task: &mut Task) -> Result<()> {
    let group = env.inter_chip()?.group(group_of(task)?)?;
    let params = InterChipPostProcParams {
        src_mbuf_handle: group.src_mbuf_handle(),
        dst_mbuf_handle: group.dst_mbuf_handle(),
        src_mbuf_free_addr: group.src_mbuf_free_addr(),
        dst_mbuf_free_addr: group.dst_mbuf_free_addr(),
        dst_qmngr_enqueue_addr: group.dst_qmngr_enqueue_addr(),
        dst_qmngr_ow_addr: group.dst_qmngr_ow_addr(),
    };
    env.build_blob(task, MemcpyKind::HostToDevice, |_| fc::inter_chip_post_proc(&params))
}

// ============================================================================
// Entries
// ============================================================================

fn blob_entry(env: &TaskEnv<'_>, task: &Task) -> Result<Sqe> {
    let kind = task.payload.kind();
    let sub_type = kind
        .sub_type()
        .ok_or_else(|| DqsError::invalid(format!("{kind} has no function-call entry")))?;
    let mem = task
        .payload
        .blob()
        .filter(|m| m.is_allocated())
        .ok_or_else(|| DqsError::invalid(format!("{kind} program was not built")))?;
    Ok(Sqe::function_call(&env.sqe_context(task), sub_type, mem.usable(), mem.size()))
}

fn frame_align_entry(env: &TaskEnv<'_>, task: &Task) -> Result<Sqe> {
    let mut sqe = blob_entry(env, task)?;
    sqe.set_pre_p();
    Ok(sqe)
}

fn sched_end_entry(env: &TaskEnv<'_>, task: &Task) -> Result<Sqe> {
    Ok(Sqe::sched_end(&env.sqe_context(task), task.sq_id))
}

fn memcpy_entry(env: &TaskEnv<'_>, task: &Task) -> Result<Sqe> {
    match &task.payload {
        TaskPayload::InterChipMemcpy(copy) if copy.descriptor_addr != 0 => {
            Ok(Sqe::memcpy_ptr(&env.sqe_context(task), copy.descriptor_addr))
        }
        _ => Err(DqsError::invalid("inter-chip copy descriptor not resolved")),
    }
}

// ============================================================================
// Uninit
// ============================================================================

fn release_nothing(_env: &TaskEnv<'_>, _task: &mut Task) {}

fn release_blob(env: &TaskEnv<'_>, task: &mut Task) {
    if let Some(mem) = task.payload.blob_mut() {
        env.func_calls().free(mem);
    }
}

fn release_zero_copy(env: &TaskEnv<'_>, task: &mut Task) {
    release_blob(env, task);
    if let TaskPayload::ZeroCopy(zc) = &mut task.payload {
        for buf in [&mut zc.dest_buf, &mut zc.offset_buf] {
            if *buf != 0 {
                if let Err(e) = env.driver().mem_free(*buf) {
                    warn!(addr = format_args!("{:#x}", *buf), error = %e, "zero-copy table free failed");
                }
                *buf = 0;
            }
        }
    }
}

// ============================================================================
// Error dumps
// ============================================================================

fn read_dfx(env: &TaskEnv<'_>, task: &Task, words: usize) -> Option<Vec<u32>> {
    let mem = task.payload.blob().filter(|m| m.is_allocated())?;
    match read_words(env.driver(), mem.dfx(), words) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!(kind = %task.payload.kind(), stream_id = task.stream_id, error = %e, "DFX read-back failed");
            None
        }
    }
}

fn dump_presence(env: &TaskEnv<'_>, task: &Task) {
    error!(
        kind = %task.payload.kind(),
        stream_id = task.stream_id,
        device_id = env.driver().device_id(),
        slot = task.slot,
        blob = ?task.payload.blob().map(|m| format!("{:#x}", m.usable())),
        ctrl_space = env.state.ctrl_space.is_some(),
        inter_chip_space = env.state.inter_chip.is_some(),
        "DQS task failed"
    );
}

fn dump_dequeue(env: &TaskEnv<'_>, task: &Task) {
    dump_presence(env, task);
    if let Some(dfx) = read_dfx(env, task, 2) {
        error!(
            stream_id = task.stream_id,
            pop_result = format_args!("{:#x}", dfx[0]),
            mbuf_handle = format_args!("{:#x}", dfx[1]),
            "dequeue DFX"
        );
    }
}

fn dump_prepare(env: &TaskEnv<'_>, task: &Task) {
    dump_presence(env, task);
    let Some(dfx) = read_dfx(env, task, 2) else {
        return;
    };
    let (pool_idx, alloc_result) = (dfx[0], dfx[1]);
    let pool_id = env.state.ctrl_space.as_ref().and_then(|view| {
        let idx = pool_idx as usize;
        (idx < usize::from(view.output_queue_num()))
            .then(|| view.output_mbuf_pool_id(idx))
            .flatten()
    });
    error!(
        stream_id = task.stream_id,
        pool_idx,
        alloc_result = format_args!("{alloc_result:#x}"),
        pool_id = ?pool_id,
        "prepare DFX"
    );
}

fn dump_adspc(env: &TaskEnv<'_>, task: &Task) {
    dump_presence(env, task);
    if let Some(dfx) = read_dfx(env, task, 3) {
        error!(
            stream_id = task.stream_id,
            cq_head = dfx[0],
            cq_tail = dfx[1],
            ow_reg = format_args!("{:#x}", dfx[2]),
            "adspc DFX"
        );
    }
}
