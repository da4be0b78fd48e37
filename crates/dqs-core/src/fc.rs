//! Function-call programs executed by the on-device micro-scheduler.
//!
//! Each builder takes absolute device addresses (already resolved against
//! the Control Space or Inter-Chip Space) and returns the program words.
//! Register accesses run with physical addressing; data accesses stay
//! virtual. `R14` and `R15` are reserved as scratch for the PA window and
//! for branch sequences.

use crate::error::Result;
use crate::isa::{BranchFunc, GqmOp, Program, Reg, GQM_CMD_POP};
use crate::kernel::MBUF_CACHE_DEPTH;

use crate::isa::Reg::{R0, R1, R10, R11, R12, R13, R2, R3, R4, R5, R6, R7, R8, R9};

const PA: Reg = Reg::R14;
const JMP: Reg = Reg::R15;

/// Bits of an mbuf handle below the block id.
pub const MBUF_BLK_ID_SHIFT: u32 = 10;

/// Bytes of mbuf head metadata copied by the prepare program.
pub const MBUF_HEAD_COPY_BYTES: u32 = 64;

/// Status bits in the upper word of an overwrite register.
const OW_QUEUE_NOT_ENABLE: u32 = 1 << 0;
const OW_NOT_ENABLE: u32 = 1 << 1;
const OW_HAPPENED: u32 = 1 << 2;

/// Error codes written to `CSQ_STATUS`; bits [31:16] carry the SQ id.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcErrorCode {
    /// Target queue is disabled.
    QueueNotEnable = 0x01,
    /// Overwrite tracking is disabled.
    OwNotEnable = 0x02,
    /// GQM pop returned nothing.
    GqmPopFail = 0x03,
    /// Output mbuf allocation failed.
    MbufAllocFail = 0x04,
    /// Inputs did not carry the same frame.
    FrameNotAligned = 0x05,
    /// Remote mbuf allocation failed.
    InterChipAllocFail = 0x06,
}

impl FcErrorCode {
    /// Status value for SQ `sq_id`.
    pub const fn with_sq(self, sq_id: u16) -> u32 {
        ((sq_id as u32) << 16) | self as u32
    }
}

fn pop_op() -> u64 {
    GqmOp {
        command: GQM_CMD_POP,
        wake_up: true,
    }
    .value()
}

/// `mem32[addr_reg] = val_reg` under physical addressing.
fn reg_write32(p: &mut Program, addr: Reg, val: Reg) {
    p.enter_pa(PA).sw(addr, val, 0).leave_pa(PA);
}

/// `dst = mem64[addr_reg]` under physical addressing.
fn reg_read64(p: &mut Program, dst: Reg, addr: Reg) {
    p.enter_pa(PA).ldr(dst, addr, 0).leave_pa(PA);
}

/// `rd = low 32 bits of rs`
fn low32(p: &mut Program, rd: Reg, rs: Reg) {
    p.slli(rd, rs, 32).srli(rd, rd, 32);
}

fn bump_exec_times(p: &mut Program, exec_times_addr: u64) {
    p.load_imm(R13, exec_times_addr)
        .lw(R12, R13, 0)
        .addi(R12, R12, 1)
        .sw(R13, R12, 0);
}

/// Free every handle of the input side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MbufFreeParams {
    /// `input_mbuf_free_addrs` in the Control Space.
    pub free_addrs: u64,
    /// `input_mbuf_list` in the Control Space.
    pub handles: u64,
    /// Number of input queues.
    pub pool_index_max: u32,
}

/// Assemble the [`MbufFreeParams`] program.
pub fn mbuf_free(params: &MbufFreeParams) -> Result<Vec<u32>> {
    let mut p = Program::new();
    let top = p.new_label();
    let end = p.new_label();

    p.addi(R6, R0, 0)
        .load_imm(R1, params.free_addrs)
        .load_imm(R2, params.handles)
        .load_imm(R3, u64::from(params.pool_index_max));
    p.branch_to(BranchFunc::Bge, R6, R3, end, JMP);
    p.bind(top);
    p.lw(R4, R2, 0).ldr(R5, R1, 0);
    reg_write32(&mut p, R5, R4);
    p.addi(R2, R2, 4).addi(R1, R1, 8).addi(R6, R6, 1);
    p.branch_to(BranchFunc::Blt, R6, R3, top, JMP);
    p.bind(end);
    p.nop();
    p.finish()
}

/// Push every output handle to its queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueParams {
    /// `output_prodq_ow_addr` in the Control Space.
    pub ow_addrs: u64,
    /// `output_mbuf_list` in the Control Space.
    pub handles: u64,
    /// `output_enqueue_addr` in the Control Space.
    pub enqueue_addrs: u64,
    /// `output_mbuf_free_addrs` in the Control Space.
    pub free_addrs: u64,
    /// Number of output queues.
    pub pool_index_max: u32,
    /// Round counter bumped on success.
    pub exec_times_addr: u64,
    /// SQ id stamped into error status.
    pub sq_id: u16,
}

/// Assemble the [`EnqueueParams`] program.
///
/// A queue whose overwrite register reports it disabled fails the task;
/// an overwritten slot frees the displaced handle first.
pub fn enqueue(params: &EnqueueParams) -> Result<Vec<u32>> {
    let mut p = Program::new();
    let top = p.new_label();
    let push = p.new_label();
    let queue_off = p.new_label();
    let ow_off = p.new_label();
    let done = p.new_label();

    p.load_imm(R1, params.ow_addrs)
        .load_imm(R2, params.handles)
        .load_imm(R3, params.enqueue_addrs)
        .load_imm(R8, params.free_addrs)
        .addi(R10, R0, 0)
        .load_imm(R11, u64::from(params.pool_index_max));

    p.bind(top);
    p.ldr(R4, R1, 0);
    reg_read64(&mut p, R5, R4);
    p.srli(R6, R5, 32);
    p.andi(R7, R6, OW_QUEUE_NOT_ENABLE);
    p.branch_to(BranchFunc::Bne, R7, R0, queue_off, JMP);
    p.andi(R7, R6, OW_NOT_ENABLE);
    p.branch_to(BranchFunc::Bne, R7, R0, ow_off, JMP);
    p.andi(R7, R6, OW_HAPPENED);
    p.branch_to(BranchFunc::Beq, R7, R0, push, JMP);
    // Overwritten handle goes back to its pool.
    low32(&mut p, R7, R5);
    p.ldr(R9, R8, 0);
    reg_write32(&mut p, R9, R7);

    p.bind(push);
    p.lw(R7, R2, 0).ldr(R9, R3, 0);
    reg_write32(&mut p, R9, R7);
    p.addi(R1, R1, 8)
        .addi(R2, R2, 4)
        .addi(R3, R3, 8)
        .addi(R8, R8, 8)
        .addi(R10, R10, 1);
    p.branch_to(BranchFunc::Blt, R10, R11, top, JMP);
    p.jump(done, JMP);

    p.bind(queue_off);
    p.raise(R9, FcErrorCode::QueueNotEnable.with_sq(params.sq_id));
    p.bind(ow_off);
    p.raise(R9, FcErrorCode::OwNotEnable.with_sq(params.sq_id));

    p.bind(done);
    bump_exec_times(&mut p, params.exec_times_addr);
    p.nop();
    p.finish()
}

/// Pop one handle from the single input queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DequeueParams {
    /// `input_gqm_addr` in the Control Space.
    pub gqm_addrs: u64,
    /// `input_mbuf_list` in the Control Space.
    pub handles: u64,
    /// Round counter bumped on success.
    pub exec_times_addr: u64,
    /// SQ id stamped into error status.
    pub sq_id: u16,
    /// DFX cells: pop result, handle.
    pub dfx_addr: u64,
}

/// Assemble the [`DequeueParams`] program.
pub fn dequeue(params: &DequeueParams) -> Result<Vec<u32>> {
    let mut p = Program::new();
    let fail = p.new_label();
    let end = p.new_label();

    p.load_imm(R1, pop_op())
        .load_imm(R2, params.gqm_addrs)
        .load_imm(R8, params.handles)
        .load_imm(R10, params.dfx_addr)
        .ldr(R3, R2, 0);
    p.enter_pa(PA).gqm(R6, R1, R3).leave_pa(PA);
    p.sw(R10, R6, 0).slli(R7, R6, 56);
    p.branch_to(BranchFunc::Bne, R7, R0, fail, JMP);
    p.srli(R7, R6, 32).sw(R10, R7, 4).sw(R8, R7, 0);
    bump_exec_times(&mut p, params.exec_times_addr);
    p.jump(end, JMP);
    p.bind(fail);
    p.raise(R9, FcErrorCode::GqmPopFail.with_sq(params.sq_id));
    p.bind(end);
    p.nop();
    p.finish()
}

/// Pop one handle from each of several input queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchDequeueParams {
    /// `input_gqm_addr` in the Control Space.
    pub gqm_addrs: u64,
    /// `input_mbuf_list` in the Control Space.
    pub handles: u64,
    /// `input_mbuf_free_addrs` in the Control Space.
    pub free_addrs: u64,
    /// `input_mbuf_cache_list` in the Control Space.
    pub cache_list: u64,
    /// Offset of `cnt` in one cache record.
    pub cnt_offset: u32,
    /// Size of one cache record.
    pub cache_record_size: u32,
    /// Count notify read register.
    pub cnt_read_addr: u64,
    /// Count notify clear register.
    pub cnt_clear_addr: u64,
    /// Number of input queues.
    pub pool_index_max: u32,
    /// Round counter bumped on success.
    pub exec_times_addr: u64,
    /// SQ id stamped into error status.
    pub sq_id: u16,
    /// DFX cells: pop result, handle.
    pub dfx_addr: u64,
}

/// Assemble the [`BatchDequeueParams`] program.
///
/// A zero count is a spurious wake and runs nothing. Every popped handle
/// is also appended to its queue's cache ring; a failed pop returns the
/// handles taken before it.
pub fn batch_dequeue(params: &BatchDequeueParams) -> Result<Vec<u32>> {
    let mut p = Program::new();
    let top = p.new_label();
    let keep = p.new_label();
    let fail = p.new_label();
    let free_top = p.new_label();
    let raise = p.new_label();
    let done = p.new_label();
    let end = p.new_label();

    // Nothing counted yet: spurious wake.
    p.load_imm(R5, params.cnt_read_addr);
    reg_read64(&mut p, R5, R5);
    p.branch_to(BranchFunc::Beq, R5, R0, end, JMP);

    p.load_imm(R1, pop_op())
        .load_imm(R2, params.gqm_addrs)
        .load_imm(R3, params.cache_list)
        .load_imm(R4, params.handles)
        .load_imm(R10, params.dfx_addr)
        .load_imm(R11, u64::from(params.pool_index_max))
        .addi(R12, R0, 0);

    p.bind(top);
    p.ldr(R6, R2, 0);
    p.enter_pa(PA).gqm(R7, R1, R6).leave_pa(PA);
    p.sw(R10, R7, 0).slli(R8, R7, 56);
    p.branch_to(BranchFunc::Bne, R8, R0, fail, JMP);
    p.srli(R8, R7, 32).sw(R10, R8, 4).sw(R4, R8, 0);
    // Append to this queue's handle cache ring.
    p.lw(R13, R3, params.cnt_offset)
        .slli(R9, R13, 2)
        .add(R9, R9, R3)
        .sw(R9, R8, 0)
        .addi(R13, R13, 1)
        .addi(R9, R0, MBUF_CACHE_DEPTH as u32);
    p.branch_to(BranchFunc::Blt, R13, R9, keep, JMP);
    p.addi(R13, R0, 0);
    p.bind(keep);
    p.sw(R3, R13, params.cnt_offset)
        .addi(R2, R2, 8)
        .addi(R3, R3, params.cache_record_size)
        .addi(R4, R4, 4)
        .addi(R12, R12, 1);
    p.branch_to(BranchFunc::Blt, R12, R11, top, JMP);
    p.load_imm(R6, params.cnt_clear_addr);
    reg_write32(&mut p, R6, R5);
    p.jump(done, JMP);

    // Return the handles popped before the failing queue.
    p.bind(fail);
    p.branch_to(BranchFunc::Beq, R12, R0, raise, JMP);
    p.load_imm(R4, params.handles)
        .load_imm(R6, params.free_addrs)
        .addi(R13, R0, 0);
    p.bind(free_top);
    p.lw(R7, R4, 0).ldr(R8, R6, 0);
    reg_write32(&mut p, R8, R7);
    p.addi(R4, R4, 4).addi(R6, R6, 8).addi(R13, R13, 1);
    p.branch_to(BranchFunc::Blt, R13, R12, free_top, JMP);
    p.bind(raise);
    p.raise(R9, FcErrorCode::GqmPopFail.with_sq(params.sq_id));

    p.bind(done);
    bump_exec_times(&mut p, params.exec_times_addr);
    p.bind(end);
    p.nop();
    p.finish()
}

/// Patch caller-provided pointer slots with addresses inside the current mbuf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZeroCopyParams {
    /// Handle cell of the selected queue.
    pub handle_addr: u64,
    /// Data pool base cell of the selected queue.
    pub data_base_addr: u64,
    /// Data block size cell of the selected queue.
    pub block_size_addr: u64,
    /// Device table of destination slot addresses.
    pub dest_table: u64,
    /// Device table of byte offsets into the mbuf data.
    pub offset_table: u64,
    /// Entries in each table.
    pub count: u32,
    /// Word order of the patched 64-bit slots.
    pub low32_first: bool,
}

/// Assemble the [`ZeroCopyParams`] program.
pub fn zero_copy(params: &ZeroCopyParams) -> Result<Vec<u32>> {
    let mut p = Program::new();
    let top = p.new_label();

    p.load_imm(R1, params.handle_addr)
        .lw(R2, R1, 0)
        .srli(R3, R2, MBUF_BLK_ID_SHIFT)
        .load_imm(R1, params.block_size_addr)
        .lw(R5, R1, 0)
        .mul(R3, R3, R5)
        .load_imm(R1, params.data_base_addr)
        .ldr(R4, R1, 0)
        .add(R4, R4, R3)
        .load_imm(R6, params.dest_table)
        .load_imm(R7, params.offset_table)
        .load_imm(R8, u64::from(params.count))
        .addi(R9, R0, 0);

    p.bind(top);
    p.ldr(R10, R6, 0).ldr(R11, R7, 0).add(R11, R11, R4).srli(R12, R11, 32);
    if params.low32_first {
        p.sw(R10, R11, 0).sw(R10, R12, 4);
    } else {
        p.sw(R10, R12, 4).sw(R10, R11, 0);
    }
    p.addi(R6, R6, 8).addi(R7, R7, 8).addi(R9, R9, 1);
    p.branch_to(BranchFunc::Blt, R9, R8, top, JMP);
    p.nop();
    p.finish()
}

/// Copy `count` 64-bit words when the condition cell is non-zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConditionCopyParams {
    /// Flag cell; zero skips the copy.
    pub condition_addr: u64,
    /// Copy destination.
    pub dst_addr: u64,
    /// Copy source.
    pub src_addr: u64,
    /// Number of 64-bit words.
    pub count: u32,
}

/// Assemble the [`ConditionCopyParams`] program.
pub fn condition_copy(params: &ConditionCopyParams) -> Result<Vec<u32>> {
    let mut p = Program::new();
    let top = p.new_label();
    let end = p.new_label();

    p.load_imm(R1, params.condition_addr).ldr(R2, R1, 0);
    p.branch_to(BranchFunc::Beq, R2, R0, end, JMP);
    p.load_imm(R3, params.dst_addr)
        .load_imm(R4, params.src_addr)
        .load_imm(R5, u64::from(params.count))
        .addi(R6, R0, 0);
    p.bind(top);
    p.ldr(R7, R4, 0).sd(R3, R7, 0).addi(R3, R3, 8).addi(R4, R4, 8).addi(R6, R6, 1);
    p.branch_to(BranchFunc::Blt, R6, R5, top, JMP);
    p.bind(end);
    p.nop();
    p.finish()
}

/// Allocate output mbufs and seed their heads from the first input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareParams {
    /// `input_mbuf_list` in the Control Space.
    pub input_handles: u64,
    /// `input_head_pool_base_addr` in the Control Space.
    pub input_head_bases: u64,
    /// `input_head_pool_block_size` in the Control Space.
    pub input_head_block_sizes: u64,
    /// `output_mbuf_alloc_addrs` in the Control Space.
    pub output_alloc_addrs: u64,
    /// `output_mbuf_list` in the Control Space.
    pub output_handles: u64,
    /// `output_head_pool_base_addr` in the Control Space.
    pub output_head_bases: u64,
    /// `output_head_pool_block_size` in the Control Space.
    pub output_head_block_sizes: u64,
    /// Number of output queues.
    pub output_queue_num: u32,
    /// DFX cell receiving the failing output index.
    pub dfx_pool_idx_addr: u64,
    /// DFX cell receiving the raw alloc result.
    pub dfx_alloc_result_addr: u64,
    /// SQ id stamped into error status.
    pub sq_id: u16,
}

/// Assemble the [`PrepareParams`] program.
pub fn prepare(params: &PrepareParams) -> Result<Vec<u32>> {
    let mut p = Program::new();
    let top = p.new_label();
    let fail = p.new_label();
    let end = p.new_label();

    // Head of input 0.
    p.load_imm(R1, params.input_handles)
        .lw(R7, R1, 0)
        .srli(R7, R7, MBUF_BLK_ID_SHIFT)
        .load_imm(R1, params.input_head_block_sizes)
        .lw(R9, R1, 0)
        .mul(R7, R7, R9)
        .load_imm(R1, params.input_head_bases)
        .ldr(R11, R1, 0)
        .add(R11, R11, R7);

    p.load_imm(R1, params.output_alloc_addrs)
        .load_imm(R2, params.output_handles)
        .load_imm(R3, params.output_head_bases)
        .load_imm(R4, params.output_head_block_sizes)
        .load_imm(R5, u64::from(params.output_queue_num))
        .addi(R6, R0, 0);

    p.bind(top);
    p.ldr(R9, R1, 0);
    reg_read64(&mut p, R7, R9);
    p.slli(R8, R7, 56);
    p.branch_to(BranchFunc::Bne, R8, R0, fail, JMP);
    p.srli(R8, R7, 32).sw(R2, R8, 0);
    p.srli(R8, R8, MBUF_BLK_ID_SHIFT)
        .lw(R9, R4, 0)
        .mul(R8, R8, R9)
        .ldr(R12, R3, 0)
        .add(R12, R12, R8);
    for off in (0..MBUF_HEAD_COPY_BYTES).step_by(8) {
        p.ldr(R9, R11, off).sd(R12, R9, off);
    }
    p.addi(R1, R1, 8)
        .addi(R2, R2, 4)
        .addi(R3, R3, 8)
        .addi(R4, R4, 4)
        .addi(R6, R6, 1);
    p.branch_to(BranchFunc::Blt, R6, R5, top, JMP);
    p.jump(end, JMP);

    p.bind(fail);
    p.load_imm(R10, params.dfx_pool_idx_addr)
        .sw(R10, R6, 0)
        .load_imm(R10, params.dfx_alloc_result_addr)
        .sw(R10, R7, 0);
    p.raise(R9, FcErrorCode::MbufAllocFail.with_sq(params.sq_id));
    p.bind(end);
    p.nop();
    p.finish()
}

/// Check the frame-alignment verdict written by hardware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameAlignParams {
    /// Address of the `align_res` byte.
    pub align_res_addr: u64,
    /// SQ id stamped into error status.
    pub sq_id: u16,
}

/// Assemble the [`FrameAlignParams`] program.
pub fn frame_align(params: &FrameAlignParams) -> Result<Vec<u32>> {
    let mut p = Program::new();
    let end = p.new_label();

    let word_addr = params.align_res_addr & !3;
    // Byte lane of align_res inside its word.
    let shift = ((params.align_res_addr & 3) * 8) as u32;
    p.load_imm(R1, word_addr)
        .lw(R2, R1, 0)
        .srli(R2, R2, shift)
        .andi(R2, R2, 1);
    p.branch_to(BranchFunc::Bne, R2, R0, end, JMP);
    p.raise(R9, FcErrorCode::FrameNotAligned.with_sq(params.sq_id));
    p.bind(end);
    p.nop();
    p.finish()
}

/// Drain one completion-queue entry and enqueue the caller's mbuf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdspcParams {
    /// Enqueue register of the target queue.
    pub enqueue_reg: u64,
    /// Overwrite register of the target queue.
    pub ow_reg: u64,
    /// Free register of the mbuf pool.
    pub free_reg: u64,
    /// Mbuf to enqueue.
    pub mbuf_handle: u32,
    /// Wrap mask for head and tail indices.
    pub cqe_head_tail_mask: u32,
    /// Bytes per completion entry.
    pub cqe_size: u32,
    /// First completion entry.
    pub cqe_base_addr: u64,
    /// Where the drained entry is copied.
    pub cqe_copy_addr: u64,
    /// CQ head register.
    pub cq_head_reg: u64,
    /// CQ tail register.
    pub cq_tail_reg: u64,
    /// DFX cells: cq head, cq tail, overwrite register.
    pub dfx_addr: u64,
}

/// Assemble the [`AdspcParams`] program.
pub fn adspc(params: &AdspcParams) -> Result<Vec<u32>> {
    let mut p = Program::new();
    let push = p.new_label();
    let end = p.new_label();

    p.load_imm(R1, params.cq_head_reg)
        .load_imm(R2, params.cq_tail_reg)
        .load_imm(R10, params.dfx_addr);
    p.enter_pa(PA).ldr(R3, R1, 0).ldr(R4, R2, 0).leave_pa(PA);
    p.sw(R10, R3, 0).sw(R10, R4, 4);
    p.branch_to(BranchFunc::Beq, R3, R4, end, JMP);

    p.andi(R6, R3, params.cqe_head_tail_mask)
        .load_imm(R9, u64::from(params.cqe_size))
        .mul(R6, R6, R9)
        .load_imm(R5, params.cqe_base_addr)
        .add(R7, R5, R6)
        .load_imm(R8, params.cqe_copy_addr);
    for off in (0..params.cqe_size).step_by(8) {
        p.ldr(R9, R7, off).sd(R8, R9, off);
    }

    p.load_imm(R13, params.ow_reg);
    reg_read64(&mut p, R9, R13);
    p.sw(R10, R9, 8).srli(R6, R9, 32).andi(R6, R6, OW_HAPPENED);
    p.branch_to(BranchFunc::Beq, R6, R0, push, JMP);
    low32(&mut p, R6, R9);
    p.load_imm(R13, params.free_reg);
    reg_write32(&mut p, R13, R6);

    p.bind(push);
    p.load_imm(R11, u64::from(params.mbuf_handle))
        .load_imm(R12, params.enqueue_reg);
    reg_write32(&mut p, R12, R11);
    p.addi(R3, R3, 1);
    p.enter_pa(PA).sd(R1, R3, 0).leave_pa(PA);
    p.bind(end);
    p.nop();
    p.finish()
}

/// Allocate the remote mbuf and aim both copy descriptors at it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterChipPreProcParams {
    /// Group cell receiving the remote handle.
    pub dst_mbuf_handle: u64,
    /// Alloc register of the remote pool.
    pub dst_mbuf_alloc_addr: u64,
    /// Group cell holding the remote head block size.
    pub dst_head_block_size: u64,
    /// Group cell holding the remote data block size.
    pub dst_data_block_size: u64,
    /// Group cell holding the remote head pool base.
    pub dst_head_base_addr: u64,
    /// Group cell holding the remote data pool base.
    pub dst_data_base_addr: u64,
    /// `dst_addr` field of the head copy descriptor.
    pub head_sqe_dst_addr: u64,
    /// `dst_addr` field of the data copy descriptor.
    pub data_sqe_dst_addr: u64,
    /// SQ id stamped into error status.
    pub sq_id: u16,
}

/// Assemble the [`InterChipPreProcParams`] program.
pub fn inter_chip_pre_proc(params: &InterChipPreProcParams) -> Result<Vec<u32>> {
    let mut p = Program::new();
    let fail = p.new_label();
    let end = p.new_label();

    p.load_imm(R1, params.dst_mbuf_alloc_addr).ldr(R1, R1, 0);
    reg_read64(&mut p, R2, R1);
    p.slli(R3, R2, 56);
    p.branch_to(BranchFunc::Bne, R3, R0, fail, JMP);
    p.srli(R2, R2, 32)
        .load_imm(R4, params.dst_mbuf_handle)
        .sw(R4, R2, 0)
        .srli(R5, R2, MBUF_BLK_ID_SHIFT);
    for (size_cell, base_cell, sqe_dst) in [
        (params.dst_head_block_size, params.dst_head_base_addr, params.head_sqe_dst_addr),
        (params.dst_data_block_size, params.dst_data_base_addr, params.data_sqe_dst_addr),
    ] {
        p.load_imm(R6, size_cell)
            .lw(R7, R6, 0)
            .mul(R7, R7, R5)
            .load_imm(R6, base_cell)
            .ldr(R8, R6, 0)
            .add(R8, R8, R7)
            .load_imm(R6, sqe_dst)
            .sd(R6, R8, 0);
    }
    p.jump(end, JMP);
    p.bind(fail);
    p.raise(R9, FcErrorCode::InterChipAllocFail.with_sq(params.sq_id));
    p.bind(end);
    p.nop();
    p.finish()
}

/// Release the local mbuf and publish the remote one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterChipPostProcParams {
    /// Group cell holding the local handle.
    pub src_mbuf_handle: u64,
    /// Group cell holding the remote handle.
    pub dst_mbuf_handle: u64,
    /// Free register of the local pool.
    pub src_mbuf_free_addr: u64,
    /// Free register of the remote pool.
    pub dst_mbuf_free_addr: u64,
    /// Enqueue register of the remote queue.
    pub dst_qmngr_enqueue_addr: u64,
    /// Overwrite register of the remote queue.
    pub dst_qmngr_ow_addr: u64,
}

/// Assemble the [`InterChipPostProcParams`] program.
pub fn inter_chip_post_proc(params: &InterChipPostProcParams) -> Result<Vec<u32>> {
    let mut p = Program::new();
    let push = p.new_label();

    p.load_imm(R1, params.src_mbuf_handle)
        .lw(R2, R1, 0)
        .load_imm(R1, params.src_mbuf_free_addr)
        .ldr(R1, R1, 0);
    reg_write32(&mut p, R1, R2);

    p.load_imm(R3, params.dst_qmngr_ow_addr).ldr(R3, R3, 0);
    reg_read64(&mut p, R4, R3);
    p.srli(R5, R4, 32).andi(R5, R5, OW_HAPPENED);
    p.branch_to(BranchFunc::Beq, R5, R0, push, JMP);
    low32(&mut p, R5, R4);
    p.load_imm(R6, params.dst_mbuf_free_addr).ldr(R6, R6, 0);
    reg_write32(&mut p, R6, R5);

    p.bind(push);
    p.load_imm(R7, params.dst_mbuf_handle)
        .lw(R7, R7, 0)
        .load_imm(R8, params.dst_qmngr_enqueue_addr)
        .ldr(R8, R8, 0);
    reg_write32(&mut p, R8, R7);
    p.nop();
    p.finish()
}
