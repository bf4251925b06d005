//! Instruction decoding: translating a guest executable segment's raw bytes into an array of
//! [`DecodedInstruction`] slots, one per instruction address, ahead of execution.
//!
//! The dispatch loop (`crate::dispatch`) never re-examines raw instruction bits at run time; it
//! walks this decoded array instead. This mirrors the original interpreter's "instruction cache"
//! design, traded here for an explicit, strongly typed slot rather than a packed bitfield.

pub mod compressed;
pub mod encoding;
pub mod rewriter;

use crate::error::Error;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive as _;

/// Identifies one [`DecodedSegment`] within a [`crate::Memory`]'s segment registry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SegmentId(pub(crate) u32);

/// The set of operations a [`DecodedInstruction`] can name. Grouped roughly the way spec.md
/// §4.2 groups them: ALU immediate/register, loads/stores, branches and jumps (with fused
/// fast-path variants produced by [`rewriter`]), system, and the F/D float extension.
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum Bytecode {
    /// No-op; the zero value so an all-zero slot is never mistaken for a live instruction.
    Invalid = 0,

    // --- ALU, immediate ---
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
    Slli,
    Srli,
    Srai,
    Addiw,
    Slliw,
    Srliw,
    Sraiw,
    Lui,
    Auipc,
    /// `addi rd, x0, imm` rewritten as an immediate load (spec.md §4.5 fusion).
    LoadImmediate,

    // --- ALU, register ---
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
    Addw,
    Subw,
    Sllw,
    Srlw,
    Sraw,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
    Mulw,
    Divw,
    Divuw,
    Remw,
    Remuw,

    // --- Loads / stores ---
    Lb,
    Lh,
    Lw,
    Ld,
    Lbu,
    Lhu,
    Lwu,
    Sb,
    Sh,
    Sw,
    Sd,

    // --- Branches ---
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
    /// `beq`/`bne` against `x0`, specialized (spec.md §4.5 fusion).
    BeqZero,
    BneZero,

    // --- Jumps ---
    Jal,
    Jalr,
    /// An unconditional, in-range `jal` rewritten to skip the branch-taken bookkeeping.
    FastJump,
    /// A `jal`/`jalr` that also sets a link register, rewritten to fuse the link write-back.
    FastCall,

    // --- System ---
    Ecall,
    Ebreak,
    Fence,
    FenceI,
    Csrrw,
    Csrrs,
    Csrrc,
    Csrrwi,
    Csrrsi,
    Csrrci,
    /// The decoder's own sentinel for "stop the simulation", written into the return address
    /// used by `vmcall` (spec.md §6).
    Stop,

    // --- Float (F/D) ---
    Flw,
    Fld,
    Fsw,
    Fsd,
    FaddS,
    FsubS,
    FmulS,
    FdivS,
    FsqrtS,
    FminS,
    FmaxS,
    FmaddS,
    FmsubS,
    FnmaddS,
    FnmsubS,
    FaddD,
    FsubD,
    FmulD,
    FdivD,
    FsqrtD,
    FminD,
    FmaxD,
    FmaddD,
    FmsubD,
    FnmaddD,
    FnmsubD,
    FcvtSD,
    FcvtDS,
    FcvtWS,
    FcvtWuS,
    FcvtSW,
    FcvtSWu,
    FcvtWD,
    FcvtWuD,
    FcvtDW,
    FcvtDWu,
    FcvtLS,
    FcvtLuS,
    FcvtSL,
    FcvtSLu,
    FcvtLD,
    FcvtLuD,
    FcvtDL,
    FcvtDLu,
    FmvXW,
    FmvWX,
    FmvXD,
    FmvDX,
    FeqS,
    FltS,
    FleS,
    FeqD,
    FltD,
    FleD,
    FsgnjS,
    FsgnjnS,
    FsgnjxS,
    FsgnjD,
    FsgnjnD,
    FsgnjxD,
    FclassS,
    FclassD,
}

/// The decoded operand fields for one [`DecodedInstruction`], named after the instruction
/// format that produced them rather than any particular bytecode.
#[derive(Clone, Copy, Debug)]
pub enum Operands {
    /// No operands (e.g. `Ecall`, `Ebreak`, `Fence`).
    None,
    /// `rd = rs1 op rs2`.
    RType { rd: u8, rs1: u8, rs2: u8 },
    /// `rd = rs1 op imm`.
    IType { rd: u8, rs1: u8, imm: i32 },
    /// A store: `mem[rs1 + imm] = rs2`.
    SType { rs1: u8, rs2: u8, imm: i32 },
    /// A branch: `if rs1 op rs2 then pc += imm`.
    BType { rs1: u8, rs2: u8, imm: i32 },
    /// `rd = imm` (already shifted, for `lui`/`auipc`).
    UType { rd: u8, imm: i32 },
    /// `rd = pc + length; pc += imm` (`jal`).
    JType { rd: u8, imm: i32 },
    /// `rd = rs1 << shamt` and friends.
    Shift { rd: u8, rs1: u8, shamt: u8 },
    /// A CSR instruction: either `rs1` or `zimm` supplies the write operand, per opcode.
    Csr { rd: u8, rs1: u8, csr: u16 },
    /// A fused multiply-add float operation, or any float op needing a fourth register.
    FusedFloat {
        rd: u8,
        rs1: u8,
        rs2: u8,
        rs3: u8,
        rm: u8,
    },
    /// A plain float R-type op (`rd = rs1 op rs2`), carrying a rounding mode.
    FloatR { rd: u8, rs1: u8, rs2: u8, rm: u8 },
    /// A float load/store: `mem[rs1 + imm] = rs2` / `rd = mem[rs1 + imm]`.
    FloatMem { reg: u8, rs1: u8, imm: i32 },
}

/// One decoded instruction slot: the operation, its operands, the instruction's length in
/// bytes (2 for compressed, 4 otherwise), and a count of how many further slots in this basic
/// block can run before the next branch-like instruction (spec.md §4.3's "batched instruction
/// counter" optimization).
#[derive(Clone, Copy, Debug)]
pub struct DecodedInstruction {
    pub bytecode: Bytecode,
    pub operands: Operands,
    pub length: u8,
    /// How many additional sequential slots (including this one) remain until a branch, jump,
    /// system instruction, or segment end. The dispatch loop may charge the whole run against
    /// the instruction counter in one step when it knows none of them can fault out of
    /// sequence.
    pub block_remaining: u16,
}

impl DecodedInstruction {
    fn invalid() -> Self {
        DecodedInstruction {
            bytecode: Bytecode::Invalid,
            operands: Operands::None,
            length: 4,
            block_remaining: 1,
        }
    }
}

/// A contiguous, decoded, executable guest address range: `[begin, end)` in guest address
/// space, plus one [`DecodedInstruction`] per instruction-aligned (2-byte, to allow for RVC)
/// offset within it.
pub struct DecodedSegment {
    pub id: SegmentId,
    pub begin: u64,
    pub end: u64,
    /// Indexed by `(addr - begin) / 2`; a slot is only meaningful at an offset that is
    /// actually the start of an instruction; others (the upper half of a 4-byte instruction
    /// when compressed decoding is enabled) are marked illegal.
    slots: Vec<DecodedInstruction>,
}

impl DecodedSegment {
    /// Decodes `bytes` (the raw executable contents of `[begin, end)`) into a new segment.
    /// `compressed_enabled` selects a 2-byte vs. 4-byte instruction stride.
    pub fn decode(
        id: SegmentId,
        begin: u64,
        bytes: &[u8],
        compressed_enabled: bool,
    ) -> Result<Self, Error> {
        let end = begin + bytes.len() as u64;
        let stride: usize = if compressed_enabled { 2 } else { 4 };
        let slot_count = (bytes.len() + stride - 1) / stride;
        let mut slots = vec![DecodedInstruction::invalid(); slot_count];

        let mut offset = 0usize;
        while offset < bytes.len() {
            let slot_index = offset / stride;
            let halfword = read_u16_le(bytes, offset);

            if compressed_enabled && encoding::is_compressed(halfword) {
                let decoded = compressed::decode(halfword)?;
                slots[slot_index] = decoded;
                offset += 2;
                continue;
            }

            if offset + 4 > bytes.len() {
                // A truncated trailing instruction; leave it marked invalid and stop.
                break;
            }
            let insn = read_u32_le(bytes, offset);
            let decoded = decode_full(insn)?;
            slots[slot_index] = decoded;
            offset += 4;

            // A 4-byte instruction occupies two 2-byte slots when compressed decoding is
            // enabled; the second slot stays `Invalid` so control never lands mid-instruction.
            if compressed_enabled && stride == 2 {
                // slots[slot_index + 1] already defaults to invalid()
            }
        }

        rewriter::fuse(&mut slots, stride);
        backfill_block_lengths(&mut slots);

        Ok(DecodedSegment {
            id,
            begin,
            end,
            slots,
        })
    }

    /// Whether `addr` falls within this segment's guest address range.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.begin && addr < self.end
    }

    /// Looks up the decoded slot for guest address `addr`. Returns `None` if out of range or
    /// not instruction-aligned for this segment's stride.
    pub fn slot_at(&self, addr: u64, stride: u64) -> Option<&DecodedInstruction> {
        if !self.contains(addr) || addr % stride != 0 {
            return None;
        }
        let index = ((addr - self.begin) / stride) as usize;
        self.slots.get(index)
    }
}

fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Decodes one full-width (4-byte) instruction.
fn decode_full(insn: u32) -> Result<DecodedInstruction, Error> {
    use encoding::*;
    use Bytecode::*;

    let op = opcode(insn);
    let f3 = funct3(insn);
    let f7 = funct7(insn);

    let (bytecode, operands): (Bytecode, Operands) = match op {
        // OP-IMM
        0x13 => {
            let rd = rd(insn);
            let rs1 = rs1(insn);
            match f3 {
                0x0 => (Addi, Operands::IType { rd, rs1, imm: imm_i(insn) }),
                0x2 => (Slti, Operands::IType { rd, rs1, imm: imm_i(insn) }),
                0x3 => (Sltiu, Operands::IType { rd, rs1, imm: imm_i(insn) }),
                0x4 => (Xori, Operands::IType { rd, rs1, imm: imm_i(insn) }),
                0x6 => (Ori, Operands::IType { rd, rs1, imm: imm_i(insn) }),
                0x7 => (Andi, Operands::IType { rd, rs1, imm: imm_i(insn) }),
                0x1 => (Slli, Operands::Shift { rd, rs1, shamt: shamt6(insn) }),
                0x5 if f7 & 0x20 == 0 => (Srli, Operands::Shift { rd, rs1, shamt: shamt6(insn) }),
                0x5 => (Srai, Operands::Shift { rd, rs1, shamt: shamt6(insn) }),
                _ => return Ok(DecodedInstruction::invalid()),
            }
        }
        // OP-IMM-32
        0x1b => {
            let rd = rd(insn);
            let rs1 = rs1(insn);
            match f3 {
                0x0 => (Addiw, Operands::IType { rd, rs1, imm: imm_i(insn) }),
                0x1 => (Slliw, Operands::Shift { rd, rs1, shamt: shamt5(insn) }),
                0x5 if f7 & 0x20 == 0 => (Srliw, Operands::Shift { rd, rs1, shamt: shamt5(insn) }),
                0x5 => (Sraiw, Operands::Shift { rd, rs1, shamt: shamt5(insn) }),
                _ => return Ok(DecodedInstruction::invalid()),
            }
        }
        // LUI / AUIPC
        0x37 => (Lui, Operands::UType { rd: rd(insn), imm: imm_u(insn) }),
        0x17 => (Auipc, Operands::UType { rd: rd(insn), imm: imm_u(insn) }),
        // OP / OP-32 (register-register, including M extension)
        0x33 => decode_op_register(insn, f3, f7, false)?,
        0x3b => decode_op_register(insn, f3, f7, true)?,
        // Loads
        0x03 => {
            let rd = rd(insn);
            let rs1 = rs1(insn);
            let imm = imm_i(insn);
            let bc = match f3 {
                0x0 => Lb,
                0x1 => Lh,
                0x2 => Lw,
                0x3 => Ld,
                0x4 => Lbu,
                0x5 => Lhu,
                0x6 => Lwu,
                _ => return Ok(DecodedInstruction::invalid()),
            };
            (bc, Operands::IType { rd, rs1, imm })
        }
        // Stores
        0x23 => {
            let rs1 = rs1(insn);
            let rs2 = rs2(insn);
            let imm = imm_s(insn);
            let bc = match f3 {
                0x0 => Sb,
                0x1 => Sh,
                0x2 => Sw,
                0x3 => Sd,
                _ => return Ok(DecodedInstruction::invalid()),
            };
            (bc, Operands::SType { rs1, rs2, imm })
        }
        // Branches
        0x63 => {
            let rs1 = rs1(insn);
            let rs2 = rs2(insn);
            let imm = imm_b(insn);
            let bc = match f3 {
                0x0 => Beq,
                0x1 => Bne,
                0x4 => Blt,
                0x5 => Bge,
                0x6 => Bltu,
                0x7 => Bgeu,
                _ => return Ok(DecodedInstruction::invalid()),
            };
            (bc, Operands::BType { rs1, rs2, imm })
        }
        // JAL
        0x6f => (Jal, Operands::JType { rd: rd(insn), imm: imm_j(insn) }),
        // JALR
        0x67 if f3 == 0 => (
            Jalr,
            Operands::IType { rd: rd(insn), rs1: rs1(insn), imm: imm_i(insn) },
        ),
        // MISC-MEM
        0x0f => match f3 {
            0x0 => (Fence, Operands::None),
            0x1 => (FenceI, Operands::None),
            _ => return Ok(DecodedInstruction::invalid()),
        },
        // SYSTEM
        0x73 => decode_system(insn, f3)?,
        // Float loads/stores
        0x07 if f3 == 0x2 => (
            Flw,
            Operands::FloatMem { reg: rd(insn), rs1: rs1(insn), imm: imm_i(insn) },
        ),
        0x07 if f3 == 0x3 => (
            Fld,
            Operands::FloatMem { reg: rd(insn), rs1: rs1(insn), imm: imm_i(insn) },
        ),
        0x27 if f3 == 0x2 => (
            Fsw,
            Operands::FloatMem { reg: rs2(insn), rs1: rs1(insn), imm: imm_s(insn) },
        ),
        0x27 if f3 == 0x3 => (
            Fsd,
            Operands::FloatMem { reg: rs2(insn), rs1: rs1(insn), imm: imm_s(insn) },
        ),
        // Float compute / fused-multiply-add / conversions
        0x43 | 0x47 | 0x4b | 0x4f => decode_float(insn, op)?,
        0x53 => decode_float_op(insn)?,
        _ => return Ok(DecodedInstruction::invalid()),
    };

    Ok(DecodedInstruction {
        bytecode,
        operands,
        length: 4,
        block_remaining: 1,
    })
}

fn decode_op_register(
    insn: u32,
    f3: u32,
    f7: u32,
    word: bool,
) -> Result<(Bytecode, Operands), Error> {
    use Bytecode::*;
    let rd = encoding::rd(insn);
    let rs1 = encoding::rs1(insn);
    let rs2 = encoding::rs2(insn);
    let operands = Operands::RType { rd, rs1, rs2 };

    let bc = if f7 == 0x01 {
        // M extension
        match (word, f3) {
            (false, 0x0) => Mul,
            (false, 0x1) => Mulh,
            (false, 0x2) => Mulhsu,
            (false, 0x3) => Mulhu,
            (false, 0x4) => Div,
            (false, 0x5) => Divu,
            (false, 0x6) => Rem,
            (false, 0x7) => Remu,
            (true, 0x0) => Mulw,
            (true, 0x4) => Divw,
            (true, 0x5) => Divuw,
            (true, 0x6) => Remw,
            (true, 0x7) => Remuw,
            _ => return Ok((Invalid, Operands::None)),
        }
    } else {
        match (word, f3, f7) {
            (false, 0x0, 0x00) => Add,
            (false, 0x0, 0x20) => Sub,
            (false, 0x1, 0x00) => Sll,
            (false, 0x2, 0x00) => Slt,
            (false, 0x3, 0x00) => Sltu,
            (false, 0x4, 0x00) => Xor,
            (false, 0x5, 0x00) => Srl,
            (false, 0x5, 0x20) => Sra,
            (false, 0x6, 0x00) => Or,
            (false, 0x7, 0x00) => And,
            (true, 0x0, 0x00) => Addw,
            (true, 0x0, 0x20) => Subw,
            (true, 0x1, 0x00) => Sllw,
            (true, 0x5, 0x00) => Srlw,
            (true, 0x5, 0x20) => Sraw,
            _ => return Ok((Invalid, Operands::None)),
        }
    };
    Ok((bc, operands))
}

fn decode_system(insn: u32, f3: u32) -> Result<(Bytecode, Operands), Error> {
    use Bytecode::*;
    match f3 {
        0x0 => {
            let imm = encoding::imm_i(insn) as u32;
            match imm {
                0x000 => Ok((Ecall, Operands::None)),
                0x001 => Ok((Ebreak, Operands::None)),
                // Reserved SYSTEM encoding used as the `vmcall` return sentinel (spec.md §6):
                // never emitted by a compiler, so it is safe to repurpose as "stop here".
                0x7ff => Ok((Stop, Operands::None)),
                _ => Ok((Invalid, Operands::None)),
            }
        }
        0x1 | 0x2 | 0x3 | 0x5 | 0x6 | 0x7 => {
            let rd = encoding::rd(insn);
            let rs1 = encoding::rs1(insn);
            let csr = encoding::csr(insn);
            let bc = match f3 {
                0x1 => Csrrw,
                0x2 => Csrrs,
                0x3 => Csrrc,
                0x5 => Csrrwi,
                0x6 => Csrrsi,
                0x7 => Csrrci,
                _ => unreachable!(),
            };
            Ok((bc, Operands::Csr { rd, rs1, csr }))
        }
        _ => Ok((Invalid, Operands::None)),
    }
}

fn decode_float(insn: u32, op: u32) -> Result<(Bytecode, Operands), Error> {
    use Bytecode::*;
    let rd = encoding::rd(insn);
    let rs1 = encoding::rs1(insn);
    let rs2 = encoding::rs2(insn);
    let rs3 = encoding::rs3(insn);
    let rm = encoding::rm(insn);
    let double = encoding::funct2(insn) == 0x1;

    let bc = match (op, double) {
        (0x43, false) => FmaddS,
        (0x43, true) => FmaddD,
        (0x47, false) => FmsubS,
        (0x47, true) => FmsubD,
        (0x4b, false) => FnmsubS,
        (0x4b, true) => FnmsubD,
        (0x4f, false) => FnmaddS,
        (0x4f, true) => FnmaddD,
        _ => return Ok((Invalid, Operands::None)),
    };
    Ok((bc, Operands::FusedFloat { rd, rs1, rs2, rs3, rm }))
}

fn decode_float_op(insn: u32) -> Result<(Bytecode, Operands), Error> {
    use Bytecode::*;
    let rd = encoding::rd(insn);
    let rs1 = encoding::rs1(insn);
    let rs2 = encoding::rs2(insn);
    let rm = encoding::rm(insn);
    let f7 = encoding::funct7(insn);

    let r = |bc| (bc, Operands::FloatR { rd, rs1, rs2, rm });

    Ok(match f7 {
        0x00 => r(FaddS),
        0x04 => r(FsubS),
        0x08 => r(FmulS),
        0x0c => r(FdivS),
        0x2c => r(FsqrtS),
        0x01 => r(FaddD),
        0x05 => r(FsubD),
        0x09 => r(FmulD),
        0x0d => r(FdivD),
        0x2d => r(FsqrtD),
        0x14 => match rm {
            0 => r(FminS),
            1 => r(FmaxS),
            _ => (Invalid, Operands::None),
        },
        0x15 => match rm {
            0 => r(FminD),
            1 => r(FmaxD),
            _ => (Invalid, Operands::None),
        },
        0x20 => r(FcvtSD),
        0x21 => r(FcvtDS),
        0x50 => match rm {
            0 => r(FleS),
            1 => r(FltS),
            2 => r(FeqS),
            _ => (Invalid, Operands::None),
        },
        0x51 => match rm {
            0 => r(FleD),
            1 => r(FltD),
            2 => r(FeqD),
            _ => (Invalid, Operands::None),
        },
        0x10 => match rm {
            0 => r(FsgnjS),
            1 => r(FsgnjnS),
            2 => r(FsgnjxS),
            _ => (Invalid, Operands::None),
        },
        0x11 => match rm {
            0 => r(FsgnjD),
            1 => r(FsgnjnD),
            2 => r(FsgnjxD),
            _ => (Invalid, Operands::None),
        },
        0x60 => match rs2 {
            0 => r(FcvtWS),
            1 => r(FcvtWuS),
            2 => r(FcvtLS),
            3 => r(FcvtLuS),
            _ => (Invalid, Operands::None),
        },
        0x61 => match rs2 {
            0 => r(FcvtWD),
            1 => r(FcvtWuD),
            2 => r(FcvtLD),
            3 => r(FcvtLuD),
            _ => (Invalid, Operands::None),
        },
        0x68 => match rs2 {
            0 => r(FcvtSW),
            1 => r(FcvtSWu),
            2 => r(FcvtSL),
            3 => r(FcvtSLu),
            _ => (Invalid, Operands::None),
        },
        0x69 => match rs2 {
            0 => r(FcvtDW),
            1 => r(FcvtDWu),
            2 => r(FcvtDL),
            3 => r(FcvtDLu),
            _ => (Invalid, Operands::None),
        },
        0x70 => match rm {
            0 => r(FmvXW),
            1 => r(FclassS),
            _ => (Invalid, Operands::None),
        },
        0x71 => match rm {
            0 => r(FmvXD),
            1 => r(FclassD),
            _ => (Invalid, Operands::None),
        },
        0x78 => r(FmvWX),
        0x79 => r(FmvDX),
        _ => (Invalid, Operands::None),
    })
}

/// Walks the slot array backwards, filling in `block_remaining`: the number of sequential
/// slots (this one included) that can run before control must leave straight-line execution.
/// A branch-like bytecode (anything that can redirect the PC, plus `Ecall`/`Ebreak`/`Stop`)
/// always has `block_remaining == 1`.
fn backfill_block_lengths(slots: &mut [DecodedInstruction]) {
    let mut run = 0u16;
    for slot in slots.iter_mut().rev() {
        if is_block_boundary(slot.bytecode) {
            run = 1;
        } else if slot.bytecode == Bytecode::Invalid {
            run = 1;
        } else {
            run = run.saturating_add(1);
        }
        slot.block_remaining = run;
    }
}

fn is_block_boundary(bc: Bytecode) -> bool {
    use Bytecode::*;
    matches!(
        bc,
        Beq | Bne
            | Blt
            | Bge
            | Bltu
            | Bgeu
            | BeqZero
            | BneZero
            | Jal
            | Jalr
            | FastJump
            | FastCall
            | Ecall
            | Ebreak
            | Stop
            | FenceI
    )
}

/// Converts a raw bytecode discriminant back into a [`Bytecode`], used when deserializing a
/// rewritten slot. Exposed for `rewriter` and tests.
pub(crate) fn bytecode_from_u16(raw: u16) -> Option<Bytecode> {
    Bytecode::from_u16(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_addi() {
        let insn: u32 = 0xfff0_0093; // addi x1, x0, -1
        let (bc, operands) = match decode_full(insn) {
            Ok(slot) => (slot.bytecode, slot.operands),
            Err(_) => panic!("decode failed"),
        };
        assert_eq!(bc, Bytecode::Addi);
        match operands {
            Operands::IType { rd, rs1, imm } => {
                assert_eq!(rd, 1);
                assert_eq!(rs1, 0);
                assert_eq!(imm, -1);
            }
            _ => panic!("wrong operand kind"),
        }
    }

    #[test]
    fn decodes_beq() {
        let insn: u32 = 0x0000_0463; // beq x0, x0, +8
        let slot = decode_full(insn).unwrap();
        assert_eq!(slot.bytecode, Bytecode::Beq);
    }

    #[test]
    fn unknown_opcode_is_invalid() {
        let insn: u32 = 0xffff_ffff;
        let slot = decode_full(insn).unwrap();
        assert_eq!(slot.bytecode, Bytecode::Invalid);
    }

    #[test]
    fn segment_decode_respects_range() {
        // Two addi instructions back to back.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x0000_0013u32.to_le_bytes()); // addi x0, x0, 0
        bytes.extend_from_slice(&0x0010_0093u32.to_le_bytes()); // addi x1, x0, 1
        let seg = DecodedSegment::decode(SegmentId(0), 0x1000, &bytes, false).unwrap();
        assert!(seg.contains(0x1000));
        assert!(seg.contains(0x1004));
        assert!(!seg.contains(0x1008));
        let slot = seg.slot_at(0x1004, 4).unwrap();
        assert_eq!(slot.bytecode, Bytecode::Addi);
    }
}
