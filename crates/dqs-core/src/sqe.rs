//! Submission-queue entries for DQS tasks.

use std::mem::size_of;

use serde::Serialize;

use crate::isa::{self, Reg};

/// Instruction words carried in one entry.
pub const SQE_INSTR_WORDS: usize = 14;

/// Size of one entry in the ring.
pub const SQE_SIZE: usize = 64;

const FLAG_WR_CQE: u8 = 1 << 0;
const FLAG_PRE_P: u8 = 1 << 1;

/// Major entry type.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SqeType {
    /// Micro-scheduler instructions in the entry body.
    Cond = 0x0C,
    /// SDMA transfer described by a descriptor in device memory.
    SdmaPtr = 0x0E,
}

/// DQS sub-type of a [`SqeType::Cond`] entry.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DqsSubType {
    /// Return consumed mbufs to their pools.
    MbufFree = 0x20,
    /// Push results to the output queues.
    Enqueue = 0x21,
    /// Pop one input queue.
    Dequeue = 0x22,
    /// Pop every input queue in one pass.
    BatchDequeue = 0x23,
    /// Align frames across input queues.
    FrameAlign = 0x24,
    /// Fill destination tables from mbuf handles.
    ZeroCopy = 0x25,
    /// Copy guarded by a device-side flag.
    ConditionCopy = 0x26,
    /// End of a scheduling round.
    SchedEnd = 0x27,
    /// Stage an inter-chip group.
    InterChipPreProc = 0x28,
    /// Finish an inter-chip group.
    InterChipPostProc = 0x29,
    /// Accelerator completion-queue copy.
    Adspc = 0x2A,
    /// Reset per-round output state.
    Prepare = 0x2B,
}

/// Entry header (8 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SqeHeader {
    /// Raw [`SqeType`].
    pub sqe_type: u8,
    /// Entry flags.
    pub flags: u8,
    /// Raw [`DqsSubType`], 0 for non-DQS entries.
    pub sub_type: u8,
    /// Reserved.
    pub rsv: u8,
    /// Owning stream, truncated to 16 bits.
    pub stream_id: u16,
    /// Ring slot of the task.
    pub task_id: u16,
}

/// One 64-byte submission-queue entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sqe {
    /// Entry header.
    pub header: SqeHeader,
    /// Packed instructions, zero-padded.
    pub body: [u32; SQE_INSTR_WORDS],
}

/// Identity stamped into every entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqeContext {
    /// Raise a completion when done.
    pub wr_cqe: bool,
    /// Owning stream.
    pub stream_id: u32,
    /// Ring slot; truncated to 16 bits in the header.
    pub task_id: u32,
}

impl Sqe {
    fn with_header(ctx: &SqeContext, sqe_type: SqeType, sub_type: u8) -> Self {
        let mut sqe = Self {
            header: SqeHeader {
                sqe_type: sqe_type as u8,
                flags: 0,
                sub_type,
                rsv: 0,
                stream_id: (ctx.stream_id & 0xFFFF) as u16,
                task_id: (ctx.task_id & 0xFFFF) as u16,
            },
            body: [isa::nop(); SQE_INSTR_WORDS],
        };
        if ctx.wr_cqe {
            sqe.header.flags |= FLAG_WR_CQE;
        }
        sqe
    }

    /// Entry calling the program at `func_addr`, `size_bytes` long.
    ///
    /// The call length operand is in 4-byte words.
    pub fn function_call(ctx: &SqeContext, sub_type: DqsSubType, func_addr: u64, size_bytes: u64) -> Self {
        let mut sqe = Self::with_header(ctx, SqeType::Cond, sub_type as u8);
        let mut body = Vec::with_capacity(SQE_INSTR_WORDS);
        body.push(isa::lhwi(Reg::R1, func_addr));
        body.extend(isa::llwi(Reg::R1, func_addr));
        let words = size_bytes / 4;
        body.push(isa::lhwi(Reg::R2, words));
        body.extend(isa::llwi(Reg::R2, words));
        body.push(isa::func_call(Reg::R1, Reg::R2));
        sqe.body[..body.len()].copy_from_slice(&body);
        sqe
    }

    /// Entry ending scheduling of SQ `sq_id`.
    pub fn sched_end(ctx: &SqeContext, sq_id: u16) -> Self {
        let mut sqe = Self::with_header(ctx, SqeType::Cond, DqsSubType::SchedEnd as u8);
        let [hi, lo] = isa::llwi(Reg::R1, u64::from(sq_id));
        sqe.body[0] = hi;
        sqe.body[1] = lo;
        sqe.body[2] = isa::sched_end(Reg::R1);
        sqe
    }

    /// SDMA entry whose transfer is described at `descriptor_addr`.
    pub fn memcpy_ptr(ctx: &SqeContext, descriptor_addr: u64) -> Self {
        let mut sqe = Self::with_header(ctx, SqeType::SdmaPtr, 0);
        sqe.body = [0; SQE_INSTR_WORDS];
        sqe.body[0] = descriptor_addr as u32;
        sqe.body[1] = (descriptor_addr >> 32) as u32;
        sqe
    }

    /// Execute before the preceding entry completes.
    pub fn set_pre_p(&mut self) {
        self.header.flags |= FLAG_PRE_P;
    }

    /// Whether the entry raises a completion.
    pub fn wr_cqe(&self) -> bool {
        self.header.flags & FLAG_WR_CQE != 0
    }

    /// Whether [`set_pre_p`](Self::set_pre_p) was applied.
    pub fn pre_p(&self) -> bool {
        self.header.flags & FLAG_PRE_P != 0
    }

    /// Descriptor address of an SDMA_PTR entry.
    pub fn descriptor_addr(&self) -> Option<u64> {
        (self.header.sqe_type == SqeType::SdmaPtr as u8)
            .then(|| u64::from(self.body[0]) | (u64::from(self.body[1]) << 32))
    }

    /// Little-endian wire image.
    pub fn to_bytes(&self) -> [u8; SQE_SIZE] {
        let mut out = [0u8; SQE_SIZE];
        let h = &self.header;
        out[0] = h.sqe_type;
        out[1] = h.flags;
        out[2] = h.sub_type;
        out[3] = h.rsv;
        out[4..6].copy_from_slice(&h.stream_id.to_le_bytes());
        out[6..8].copy_from_slice(&h.task_id.to_le_bytes());
        for (chunk, word) in out[size_of::<SqeHeader>()..].chunks_exact_mut(4).zip(self.body) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{disassemble, Opcode};

    fn ctx() -> SqeContext {
        SqeContext {
            wr_cqe: true,
            stream_id: 5,
            task_id: 42,
        }
    }

    #[test]
    fn test_sqe_layout() {
        assert_eq!(size_of::<SqeHeader>(), 8);
        assert_eq!(size_of::<Sqe>(), SQE_SIZE);
        assert_eq!(std::mem::offset_of!(Sqe, body), 8);
    }

    #[test]
    fn test_function_call_entry() {
        let sqe = Sqe::function_call(&ctx(), DqsSubType::Enqueue, 0x12_3456_7800, 0x400);
        assert_eq!(sqe.header.sqe_type, SqeType::Cond as u8);
        assert_eq!(sqe.header.sub_type, DqsSubType::Enqueue as u8);
        assert_eq!(sqe.header.stream_id, 5);
        assert_eq!(sqe.header.task_id, 42);
        assert!(sqe.wr_cqe());
        assert!(!sqe.pre_p());

        let d = disassemble(&sqe.body);
        assert_eq!(d[1].imm, 0x12_3456_7800);
        assert_eq!(d[3].imm, 0x100, "size passed in words");
        assert_eq!(d[4].opcode, Some(Opcode::FuncCall));
        assert!(d[5..].iter().all(|d| d.opcode == Some(Opcode::Nop)));
    }

    #[test]
    fn test_sched_end_entry() {
        let sqe = Sqe::sched_end(&ctx(), 17);
        assert_eq!(sqe.header.sub_type, DqsSubType::SchedEnd as u8);
        let d = disassemble(&sqe.body);
        assert_eq!(d[0].imm, 17);
        assert_eq!(d[1].opcode, Some(Opcode::Stream));
    }

    #[test]
    fn test_memcpy_ptr_entry() {
        let sqe = Sqe::memcpy_ptr(&ctx(), 0xABCD_0000_1080);
        assert_eq!(sqe.header.sqe_type, SqeType::SdmaPtr as u8);
        assert_eq!(sqe.descriptor_addr(), Some(0xABCD_0000_1080));
        let fc = Sqe::function_call(&ctx(), DqsSubType::Dequeue, 0, 0);
        assert_eq!(fc.descriptor_addr(), None);
    }

    #[test]
    fn test_pre_p_flag() {
        let mut sqe = Sqe::function_call(&ctx(), DqsSubType::FrameAlign, 0x100, 64);
        sqe.set_pre_p();
        assert!(sqe.pre_p());
        assert!(sqe.wr_cqe());
    }

    #[test]
    fn test_to_bytes() {
        let sqe = Sqe::sched_end(&ctx(), 3);
        let bytes = sqe.to_bytes();
        assert_eq!(bytes[0], SqeType::Cond as u8);
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 5);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 42);
        assert_eq!(
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            sqe.body[0]
        );
    }
}
