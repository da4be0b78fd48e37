//! STARS function-call instruction encoding
//!
//! 32-bit RISC-V-like words:
//!
//! ```text
//!  31      25 24  20 19  15 14 12 11   7 6      0
//! [  func7  ][ rs2 ][ rs1 ][ f3 ][  rd ][ opcode ]
//! ```
//!
//! Branch offsets only carry 4 bits, so a taken branch lands on
//! `JUMP_PC << 4 | offset`. [`Program`] hides that: every branch to a
//! label is preceded by a write of the label's high bits to `JUMP_PC`.

use crate::error::{DqsError, Result};

/// Major opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    /// LW and LDR.
    Load = 0b000_0011,
    /// NOP and ERROR.
    Nop = 0b000_1011,
    /// Register-immediate ALU ops.
    OpImm = 0b001_0011,
    /// LHWI and LLWI immediate loads.
    Lwi = 0b001_1011,
    /// SW and SD.
    Store = 0b010_0011,
    /// Global queue manager access.
    Gqm = 0b010_1011,
    /// Register-register ALU ops.
    Op = 0b011_0011,
    /// Call into another program.
    FuncCall = 0b101_1011,
    /// Conditional branches.
    Branch = 0b110_0011,
    /// CSR access.
    System = 0b111_0011,
    /// Stream control such as SCHED_END.
    Stream = 0b111_1011,
}

impl Opcode {
    const ALL: [Self; 11] = [
        Self::Load,
        Self::Nop,
        Self::OpImm,
        Self::Lwi,
        Self::Store,
        Self::Gqm,
        Self::Op,
        Self::FuncCall,
        Self::Branch,
        Self::System,
        Self::Stream,
    ];

    fn from_word(word: u32) -> Option<Self> {
        let op = word & 0x7F;
        Self::ALL.into_iter().find(|o| *o as u32 == op)
    }
}

/// General purpose registers. `R0` reads as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Reg {
    /// Always reads zero.
    R0 = 0,
    /// General purpose.
    R1,
    /// General purpose.
    R2,
    /// General purpose.
    R3,
    /// General purpose.
    R4,
    /// General purpose.
    R5,
    /// General purpose.
    R6,
    /// General purpose.
    R7,
    /// General purpose.
    R8,
    /// General purpose.
    R9,
    /// General purpose.
    R10,
    /// General purpose.
    R11,
    /// General purpose.
    R12,
    /// General purpose.
    R13,
    /// General purpose.
    R14,
    /// General purpose.
    R15,
}

/// `func3` of [`Opcode::Load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LoadFunc {
    /// Load 32 bits.
    Lw = 2,
    /// Load 64 bits.
    Ldr = 3,
}

/// `func3` of [`Opcode::OpImm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum OpImmFunc {
    /// Add immediate.
    Addi = 0,
    /// Logical shift left.
    Slli = 1,
    /// Logical shift right.
    Srli = 5,
    /// Bitwise and.
    Andi = 7,
}

/// Register-register operations of [`Opcode::Op`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpFunc {
    /// Addition.
    Add,
    /// Multiplication.
    Mul,
    /// Bitwise and.
    And,
}

impl OpFunc {
    const fn fields(self) -> (u32, u32) {
        match self {
            Self::Add => (0, 0),
            Self::Mul => (0, 1),
            Self::And => (7, 0),
        }
    }
}

/// `func3` of [`Opcode::Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StoreFunc {
    /// Store 32 bits.
    Sw = 2,
    /// Store 64 bits.
    Sd = 3,
}

/// `func3` of [`Opcode::Branch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BranchFunc {
    /// Equal.
    Beq = 0,
    /// Not equal.
    Bne = 1,
    /// Signed less-than.
    Blt = 4,
    /// Signed greater-or-equal.
    Bge = 5,
    /// Unsigned greater-or-equal.
    Bgeu = 7,
}

/// `func3` of [`Opcode::System`] CSR accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CsrFunc {
    /// Swap.
    Csrrw = 1,
    /// Set bits.
    Csrrs = 2,
    /// Clear bits.
    Csrrc = 3,
}

/// Control and status registers reachable from programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Csr {
    /// High bits of the next taken branch target.
    JumpPc = 0x7C0,
    /// AXI user bits; bit 0 and bit 32 select virtual addressing.
    AxiUser = 0x7C1,
    /// Error code reported with the completion.
    CsqStatus = 0x7C2,
}

const LWI_LLWI: u32 = 0;
const LWI_LHWI: u32 = 1;
const STREAM_SCHED_END: u32 = 3;

/// AXI_USER bits cleared to switch register stores to physical addressing.
pub const AXI_USER_VA_CFG_MASK: u64 = 0x1_0000_0001;

/// GQM pop command code.
pub const GQM_CMD_POP: u32 = 0x02;

/// Operand of a GQM instruction, loaded into a register beforehand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GqmOp {
    /// 6-bit command code.
    pub command: u32,
    /// Wake the consumer after the operation.
    pub wake_up: bool,
}

impl GqmOp {
    /// Packed register value.
    pub const fn value(self) -> u64 {
        ((self.wake_up as u64) << 6) | (self.command & 0x3F) as u64
    }
}

// ============================================================================
// Raw encoders
// ============================================================================

const fn r_type(op: Opcode, rd: Reg, f3: u32, rs1: Reg, rs2: Reg, f7: u32) -> u32 {
    (op as u32)
        | ((rd as u32) << 7)
        | ((f3 & 0x7) << 12)
        | ((rs1 as u32) << 15)
        | ((rs2 as u32) << 20)
        | ((f7 & 0x7F) << 25)
}

const fn i_type(op: Opcode, rd: Reg, f3: u32, rs1: Reg, imm: u32) -> u32 {
    (op as u32) | ((rd as u32) << 7) | ((f3 & 0x7) << 12) | ((rs1 as u32) << 15) | ((imm & 0xFFF) << 20)
}

/// `nop`
pub const fn nop() -> u32 {
    Opcode::Nop as u32
}

/// Trap; the completion carries the value of `CSQ_STATUS`.
pub const fn error() -> u32 {
    0
}

/// `rd = mem[rs1 + imm]`
pub const fn load(f: LoadFunc, rd: Reg, rs1: Reg, imm: u32) -> u32 {
    i_type(Opcode::Load, rd, f as u32, rs1, imm)
}

/// Register-immediate arithmetic; the immediate is truncated to 12 bits.
pub const fn op_imm(f: OpImmFunc, rd: Reg, rs1: Reg, imm: u32) -> u32 {
    match f {
        OpImmFunc::Slli | OpImmFunc::Srli => {
            (Opcode::OpImm as u32)
                | ((rd as u32) << 7)
                | ((f as u32) << 12)
                | ((rs1 as u32) << 15)
                | ((imm & 0x3F) << 20)
        }
        OpImmFunc::Addi | OpImmFunc::Andi => i_type(Opcode::OpImm, rd, f as u32, rs1, imm),
    }
}

/// Register-register arithmetic.
pub const fn op(f: OpFunc, rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    let (f3, f7) = f.fields();
    r_type(Opcode::Op, rd, f3, rs1, rs2, f7)
}

/// Load bits [63:49] of `imm` into `rd`.
pub const fn lhwi(rd: Reg, imm: u64) -> u32 {
    (Opcode::Lwi as u32)
        | ((rd as u32) << 7)
        | (LWI_LHWI << 12)
        | ((((imm >> 49) & 0x7FFF) as u32) << 17)
}

/// Load bits [48:0] of `imm` into `rd`. Two words.
pub const fn llwi(rd: Reg, imm: u64) -> [u32; 2] {
    [
        (Opcode::Lwi as u32)
            | ((rd as u32) << 7)
            | (LWI_LLWI << 12)
            | ((((imm >> 32) & 0x1_FFFF) as u32) << 15),
        imm as u32,
    ]
}

/// `mem[rs1 + imm] = rs2`
pub const fn store(f: StoreFunc, rs1: Reg, rs2: Reg, imm: u32) -> u32 {
    (Opcode::Store as u32)
        | ((imm & 0x1F) << 7)
        | ((f as u32) << 12)
        | ((rs1 as u32) << 15)
        | ((rs2 as u32) << 20)
        | (((imm & 0xFE0) >> 5) << 25)
}

/// Conditional branch to `JUMP_PC << 4 | offset`.
pub const fn branch(f: BranchFunc, rs1: Reg, rs2: Reg, offset: u32) -> u32 {
    (Opcode::Branch as u32)
        | ((offset & 0xF) << 8)
        | ((f as u32) << 12)
        | ((rs1 as u32) << 15)
        | ((rs2 as u32) << 20)
}

/// CSR read-modify-write.
pub const fn system_csr(f: CsrFunc, rd: Reg, rs1: Reg, csr: Csr) -> u32 {
    i_type(Opcode::System, rd, f as u32, rs1, csr as u32)
}

/// `rd = gqm(op = rs1, addr = rs2)`
pub const fn gqm(rd: Reg, rs1: Reg, rs2: Reg) -> u32 {
    r_type(Opcode::Gqm, rd, 0, rs1, rs2, 0)
}

/// Call the program at address `rs1`, `rs2` words long.
pub const fn func_call(rs1: Reg, rs2: Reg) -> u32 {
    r_type(Opcode::FuncCall, Reg::R0, 0, rs1, rs2, 0)
}

/// End scheduling of the SQ whose id is in `rs1`.
pub const fn sched_end(rs1: Reg) -> u32 {
    r_type(Opcode::Stream, Reg::R0, STREAM_SCHED_END, rs1, Reg::R0, 0)
}

// ============================================================================
// Assembler
// ============================================================================

/// Forward-referenceable position in a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug)]
struct Fixup {
    at: usize,
    scratch: Reg,
    label: Label,
}

/// Words emitted by [`Program::branch_to`].
pub const BRANCH_SEQ_WORDS: usize = 5;

/// Instruction stream with label resolution.
#[derive(Debug, Default)]
pub struct Program {
    words: Vec<u32>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl Program {
    /// Empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Words emitted so far.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether nothing was emitted yet.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Fresh unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the next emitted word.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.words.len());
    }

    /// Append a raw word.
    pub fn emit(&mut self, word: u32) -> &mut Self {
        self.words.push(word);
        self
    }

    /// No operation.
    pub fn nop(&mut self) -> &mut Self {
        self.emit(nop())
    }

    /// Trap; the completion reports `CSQ_STATUS`.
    pub fn error(&mut self) -> &mut Self {
        self.emit(error())
    }

    /// `rd = mem64[rs1 + imm]`
    pub fn ldr(&mut self, rd: Reg, rs1: Reg, imm: u32) -> &mut Self {
        self.emit(load(LoadFunc::Ldr, rd, rs1, imm))
    }

    /// `rd = mem32[rs1 + imm]`
    pub fn lw(&mut self, rd: Reg, rs1: Reg, imm: u32) -> &mut Self {
        self.emit(load(LoadFunc::Lw, rd, rs1, imm))
    }

    /// `rd = rs1 + imm`
    pub fn addi(&mut self, rd: Reg, rs1: Reg, imm: u32) -> &mut Self {
        self.emit(op_imm(OpImmFunc::Addi, rd, rs1, imm))
    }

    /// `rd = rs1 & imm`
    pub fn andi(&mut self, rd: Reg, rs1: Reg, imm: u32) -> &mut Self {
        self.emit(op_imm(OpImmFunc::Andi, rd, rs1, imm))
    }

    /// `rd = rs1 << shamt`
    pub fn slli(&mut self, rd: Reg, rs1: Reg, shamt: u32) -> &mut Self {
        self.emit(op_imm(OpImmFunc::Slli, rd, rs1, shamt))
    }

    /// `rd = rs1 >> shamt`
    pub fn srli(&mut self, rd: Reg, rs1: Reg, shamt: u32) -> &mut Self {
        self.emit(op_imm(OpImmFunc::Srli, rd, rs1, shamt))
    }

    /// `rd = rs1 + rs2`
    pub fn add(&mut self, rd: Reg, rs1: Reg, rs2: Reg) -> &mut Self {
        self.emit(op(OpFunc::Add, rd, rs1, rs2))
    }

    /// `rd = rs1 & rs2`
    pub fn and(&mut self, rd: Reg, rs1: Reg, rs2: Reg) -> &mut Self {
        self.emit(op(OpFunc::And, rd, rs1, rs2))
    }

    /// `rd = rs1 * rs2`
    pub fn mul(&mut self, rd: Reg, rs1: Reg, rs2: Reg) -> &mut Self {
        self.emit(op(OpFunc::Mul, rd, rs1, rs2))
    }

    /// Full 64-bit immediate load (LHWI + LLWI, 3 words).
    pub fn load_imm(&mut self, rd: Reg, imm: u64) -> &mut Self {
        self.emit(lhwi(rd, imm));
        let [hi, lo] = llwi(rd, imm);
        self.emit(hi).emit(lo)
    }

    /// `mem32[rs1 + imm] = rs2`
    pub fn sw(&mut self, rs1: Reg, rs2: Reg, imm: u32) -> &mut Self {
        self.emit(store(StoreFunc::Sw, rs1, rs2, imm))
    }

    /// `mem64[rs1 + imm] = rs2`
    pub fn sd(&mut self, rs1: Reg, rs2: Reg, imm: u32) -> &mut Self {
        self.emit(store(StoreFunc::Sd, rs1, rs2, imm))
    }

    /// CSR access of kind `f`; the old value lands in `rd`.
    pub fn csr(&mut self, f: CsrFunc, rd: Reg, rs1: Reg, csr: Csr) -> &mut Self {
        self.emit(system_csr(f, rd, rs1, csr))
    }

    /// GQM operation `rs1` on the queue register in `rs2`.
    pub fn gqm(&mut self, rd: Reg, rs1: Reg, rs2: Reg) -> &mut Self {
        self.emit(gqm(rd, rs1, rs2))
    }

    /// Switch register stores to physical addressing.
    pub fn enter_pa(&mut self, scratch: Reg) -> &mut Self {
        self.load_imm(scratch, AXI_USER_VA_CFG_MASK)
            .csr(CsrFunc::Csrrc, Reg::R0, scratch, Csr::AxiUser)
    }

    /// Restore virtual addressing.
    pub fn leave_pa(&mut self, scratch: Reg) -> &mut Self {
        self.load_imm(scratch, AXI_USER_VA_CFG_MASK)
            .csr(CsrFunc::Csrrs, Reg::R0, scratch, Csr::AxiUser)
    }

    /// Report `code` through `CSQ_STATUS` and trap.
    pub fn raise(&mut self, scratch: Reg, code: u32) -> &mut Self {
        self.load_imm(scratch, u64::from(code))
            .csr(CsrFunc::Csrrw, Reg::R0, scratch, Csr::CsqStatus)
            .error()
    }

    /// Branch to `label` when `rs1 <f> rs2`; clobbers `scratch`.
    pub fn branch_to(&mut self, f: BranchFunc, rs1: Reg, rs2: Reg, label: Label, scratch: Reg) -> &mut Self {
        let at = self.words.len();
        self.fixups.push(Fixup { at, scratch, label });
        // Placeholders, patched in finish().
        self.emit(lhwi(scratch, 0));
        let [hi, lo] = llwi(scratch, 0);
        self.emit(hi)
            .emit(lo)
            .csr(CsrFunc::Csrrw, Reg::R0, scratch, Csr::JumpPc)
            .emit(branch(f, rs1, rs2, 0))
    }

    /// Unconditional jump; clobbers `scratch`.
    pub fn jump(&mut self, label: Label, scratch: Reg) -> &mut Self {
        self.branch_to(BranchFunc::Beq, Reg::R0, Reg::R0, label, scratch)
    }

    /// Resolve labels and return the words.
    pub fn finish(mut self) -> Result<Vec<u32>> {
        for fixup in &self.fixups {
            let target = self
                .labels
                .get(fixup.label.0)
                .copied()
                .flatten()
                .ok_or_else(|| DqsError::invalid(format!("unbound label {}", fixup.label.0)))?;
            let high = (target >> 4) as u64;
            self.words[fixup.at] = lhwi(fixup.scratch, high);
            let [hi, lo] = llwi(fixup.scratch, high);
            self.words[fixup.at + 1] = hi;
            self.words[fixup.at + 2] = lo;
            let br = &mut self.words[fixup.at + 4];
            *br = (*br & !(0xF << 8)) | (((target & 0xF) as u32) << 8);
        }
        Ok(self.words)
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    /// Word index of the instruction.
    pub index: usize,
    /// `None` for the ERROR word and unknown opcodes.
    pub opcode: Option<Opcode>,
    /// Function bits [14:12].
    pub func3: u32,
    /// Destination register.
    pub rd: u32,
    /// First source register.
    pub rs1: u32,
    /// Second source register.
    pub rs2: u32,
    /// LLWI: the full 49-bit immediate. Branch: the 4-bit offset.
    /// Store: the 12-bit offset. Others: bits [31:20].
    pub imm: u64,
}

/// Decode a program, folding two-word LLWI into one entry.
pub fn disassemble(words: &[u32]) -> Vec<Decoded> {
    let mut out = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        let w = words[i];
        let opcode = Opcode::from_word(w);
        let func3 = (w >> 12) & 0x7;
        let mut d = Decoded {
            index: i,
            opcode,
            func3,
            rd: (w >> 7) & 0x1F,
            rs1: (w >> 15) & 0x1F,
            rs2: (w >> 20) & 0x1F,
            imm: u64::from(w >> 20),
        };
        match opcode {
            Some(Opcode::Lwi) if func3 == LWI_LLWI => {
                let low = words.get(i + 1).copied().unwrap_or(0);
                d.imm = (u64::from(w >> 15) << 32) | u64::from(low);
                i += 1;
            }
            Some(Opcode::Lwi) => d.imm = u64::from(w >> 17) << 49,
            Some(Opcode::Branch) => d.imm = u64::from((w >> 8) & 0xF),
            Some(Opcode::Store) => d.imm = u64::from(((w >> 25) << 5) | ((w >> 7) & 0x1F)),
            _ => {}
        }
        out.push(d);
        i += 1;
    }
    out
}

/// Follow a `branch_to` sequence starting at `index` and return its target.
pub fn branch_target(words: &[u32], index: usize) -> Option<usize> {
    let seq = words.get(index..index + BRANCH_SEQ_WORDS)?;
    let high = (u64::from(seq[1] >> 15) << 32) | u64::from(seq[2]);
    let offset = (seq[4] >> 8) & 0xF;
    usize::try_from(high).ok().map(|h| (h << 4) | offset as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nop_and_error() {
        assert_eq!(nop() & 0x7F, Opcode::Nop as u32);
        assert_eq!((nop() >> 12) & 0x7, 0);
        assert_eq!(error(), 0);
    }

    #[test]
    fn test_r_type_fields() {
        let w = op(OpFunc::Mul, Reg::R3, Reg::R4, Reg::R5);
        assert_eq!(w & 0x7F, Opcode::Op as u32);
        assert_eq!((w >> 7) & 0x1F, 3);
        assert_eq!((w >> 15) & 0x1F, 4);
        assert_eq!((w >> 20) & 0x1F, 5);
        assert_eq!(w >> 25, 1);
    }

    #[test]
    fn test_op_imm_truncates() {
        let w = op_imm(OpImmFunc::Addi, Reg::R1, Reg::R1, 0x1008);
        assert_eq!(w >> 20, 0x008);
        let w = op_imm(OpImmFunc::Slli, Reg::R2, Reg::R2, 56);
        assert_eq!((w >> 20) & 0x3F, 56);
        assert_eq!((w >> 12) & 0x7, OpImmFunc::Slli as u32);
    }

    #[test]
    fn test_llwi_split() {
        let [hi, lo] = llwi(Reg::R1, 0x0001_2345_DEAD_BEEF);
        assert_eq!(lo, 0xDEAD_BEEF);
        assert_eq!(hi >> 15, 0x1_2345 & 0x1_FFFF);
        assert_eq!((hi >> 12) & 0x7, LWI_LLWI);
    }

    #[test]
    fn test_lhwi_takes_top_bits() {
        let w = lhwi(Reg::R1, 0xFFFE_0000_0000_0000);
        assert_eq!(w >> 17, 0x7FFF);
        assert_eq!(lhwi(Reg::R1, 0x0001_FFFF_FFFF_FFFF) >> 17, 0);
    }

    #[test]
    fn test_store_immediate_split() {
        let w = store(StoreFunc::Sw, Reg::R5, Reg::R4, 0x7E5);
        assert_eq!((w >> 7) & 0x1F, 0x05);
        assert_eq!(w >> 25, 0x7E5 >> 5);
        assert_eq!((w >> 15) & 0x1F, 5, "address register in rs1");
        assert_eq!((w >> 20) & 0x1F, 4, "value register in rs2");
        let d = disassemble(&[w]);
        assert_eq!(d[0].imm, 0x7E5);
    }

    #[test]
    fn test_csr_encoding() {
        let w = system_csr(CsrFunc::Csrrc, Reg::R0, Reg::R7, Csr::AxiUser);
        assert_eq!(w & 0x7F, Opcode::System as u32);
        assert_eq!(w >> 20, Csr::AxiUser as u32);
        assert_eq!((w >> 12) & 0x7, CsrFunc::Csrrc as u32);
    }

    #[test]
    fn test_gqm_op_value() {
        let op = GqmOp {
            command: GQM_CMD_POP,
            wake_up: true,
        };
        assert_eq!(op.value(), 0x42);
    }

    #[test]
    fn test_forward_label_resolution() {
        let mut p = Program::new();
        let end = p.new_label();
        p.jump(end, Reg::R9);
        for _ in 0..20 {
            p.nop();
        }
        p.bind(end);
        p.nop();
        let words = p.finish().unwrap();
        assert_eq!(words.len(), BRANCH_SEQ_WORDS + 21);
        assert_eq!(branch_target(&words, 0), Some(BRANCH_SEQ_WORDS + 20));
    }

    #[test]
    fn test_backward_label_resolution() {
        let mut p = Program::new();
        p.nop();
        let top = p.new_label();
        p.bind(top);
        p.nop().nop();
        let at = p.len();
        p.branch_to(BranchFunc::Blt, Reg::R6, Reg::R3, top, Reg::R9);
        let words = p.finish().unwrap();
        assert_eq!(branch_target(&words, at), Some(1));
        let d = disassemble(&words);
        let br = d.iter().find(|d| d.opcode == Some(Opcode::Branch)).unwrap();
        assert_eq!(br.func3, BranchFunc::Blt as u32);
        assert_eq!(br.rs1, 6);
        assert_eq!(br.rs2, 3);
    }

    #[test]
    fn test_unbound_label_is_error() {
        let mut p = Program::new();
        let l = p.new_label();
        p.jump(l, Reg::R9);
        assert!(p.finish().is_err());
    }

    #[test]
    fn test_disassemble_folds_llwi() {
        let mut p = Program::new();
        p.load_imm(Reg::R1, 0x5_8000_0000).nop();
        let words = p.finish().unwrap();
        assert_eq!(words.len(), 4);
        let d = disassemble(&words);
        assert_eq!(d.len(), 3);
        assert_eq!(d[1].imm, 0x5_8000_0000);
        assert_eq!(d[2].opcode, Some(Opcode::Nop));
    }

    #[test]
    fn test_raise_sequence() {
        let mut p = Program::new();
        p.raise(Reg::R9, 0x5);
        let words = p.finish().unwrap();
        let d = disassemble(&words);
        assert_eq!(d.last().unwrap().opcode, None, "ends with ERROR");
        assert!(d.iter().any(|d| d.opcode == Some(Opcode::System) && d.imm == Csr::CsqStatus as u64));
    }
}
