//! Expansion of the 16-bit RVC (compressed) instruction encoding into the same
//! [`DecodedInstruction`](super::DecodedInstruction) representation used for full-width
//! instructions, so the dispatch loop never has to special-case instruction width.

use super::{Bytecode, DecodedInstruction, Operands};
use crate::error::Error;

/// RVC register fields name only `x8..x15`; this maps the compact 3-bit encoding to the full
/// 5-bit register number.
#[inline]
fn creg(bits: u16) -> u8 {
    8 + (bits & 0x7) as u8
}

/// Decodes one 16-bit compressed instruction into the shared decoded-slot representation.
/// Unrecognized encodings decode as [`Bytecode::Invalid`] rather than erroring, matching the
/// handling of an unrecognized full-width opcode.
pub fn decode(halfword: u16) -> Result<DecodedInstruction, Error> {
    let quadrant = halfword & 0x3;
    let funct3 = (halfword >> 13) & 0x7;

    let (bytecode, operands) = match (quadrant, funct3) {
        // C.ADDI4SPN -> addi rd', x2, nzuimm
        (0x0, 0x0) => {
            let rd = creg(halfword >> 2);
            let nzuimm = (((halfword >> 5) & 0x1) << 3)
                | (((halfword >> 6) & 0x1) << 2)
                | (((halfword >> 7) & 0xf) << 6)
                | (((halfword >> 11) & 0x3) << 4);
            if nzuimm == 0 {
                (Bytecode::Invalid, Operands::None)
            } else {
                (
                    Bytecode::Addi,
                    Operands::IType { rd, rs1: 2, imm: nzuimm as i32 },
                )
            }
        }
        // C.LW -> lw rd', offset(rs1')
        (0x0, 0x2) => {
            let rd = creg(halfword >> 2);
            let rs1 = creg(halfword >> 7);
            let imm = c_lw_offset(halfword);
            (Bytecode::Lw, Operands::IType { rd, rs1, imm })
        }
        // C.LD -> ld rd', offset(rs1')
        (0x0, 0x3) => {
            let rd = creg(halfword >> 2);
            let rs1 = creg(halfword >> 7);
            let imm = c_ld_offset(halfword);
            (Bytecode::Ld, Operands::IType { rd, rs1, imm })
        }
        // C.SW -> sw rs2', offset(rs1')
        (0x0, 0x6) => {
            let rs2 = creg(halfword >> 2);
            let rs1 = creg(halfword >> 7);
            let imm = c_lw_offset(halfword);
            (Bytecode::Sw, Operands::SType { rs1, rs2, imm })
        }
        // C.SD -> sd rs2', offset(rs1')
        (0x0, 0x7) => {
            let rs2 = creg(halfword >> 2);
            let rs1 = creg(halfword >> 7);
            let imm = c_ld_offset(halfword);
            (Bytecode::Sd, Operands::SType { rs1, rs2, imm })
        }
        // C.ADDI -> addi rd, rd, nzimm (also covers C.NOP when rd==0, imm==0)
        (0x1, 0x0) => {
            let rd = ((halfword >> 7) & 0x1f) as u8;
            let imm = c_addi_imm(halfword);
            (Bytecode::Addi, Operands::IType { rd, rs1: rd, imm })
        }
        // C.ADDIW -> addiw rd, rd, imm
        (0x1, 0x1) => {
            let rd = ((halfword >> 7) & 0x1f) as u8;
            let imm = c_addi_imm(halfword);
            (Bytecode::Addiw, Operands::IType { rd, rs1: rd, imm })
        }
        // C.LI -> addi rd, x0, imm
        (0x1, 0x2) => {
            let rd = ((halfword >> 7) & 0x1f) as u8;
            let imm = c_addi_imm(halfword);
            (Bytecode::LoadImmediate, Operands::IType { rd, rs1: 0, imm })
        }
        // C.LUI / C.ADDI16SP
        (0x1, 0x3) => {
            let rd = ((halfword >> 7) & 0x1f) as u8;
            if rd == 2 {
                let imm = c_addi16sp_imm(halfword);
                (Bytecode::Addi, Operands::IType { rd: 2, rs1: 2, imm })
            } else {
                let imm = c_lui_imm(halfword);
                (Bytecode::Lui, Operands::UType { rd, imm })
            }
        }
        // C.ALU group (SRLI/SRAI/ANDI/SUB/XOR/OR/AND and 64-bit *W variants)
        (0x1, 0x4) => decode_c_alu(halfword),
        // C.J -> fast unconditional jump
        (0x1, 0x5) => {
            let imm = c_j_offset(halfword);
            (Bytecode::FastJump, Operands::JType { rd: 0, imm })
        }
        // C.BEQZ -> beq rs1', x0, offset
        (0x1, 0x6) => {
            let rs1 = creg(halfword >> 7);
            let imm = c_branch_offset(halfword);
            (Bytecode::BeqZero, Operands::BType { rs1, rs2: 0, imm })
        }
        // C.BNEZ -> bne rs1', x0, offset
        (0x1, 0x7) => {
            let rs1 = creg(halfword >> 7);
            let imm = c_branch_offset(halfword);
            (Bytecode::BneZero, Operands::BType { rs1, rs2: 0, imm })
        }
        // C.SLLI
        (0x2, 0x0) => {
            let rd = ((halfword >> 7) & 0x1f) as u8;
            let shamt = c_shamt(halfword);
            (Bytecode::Slli, Operands::Shift { rd, rs1: rd, shamt })
        }
        // C.LWSP
        (0x2, 0x2) => {
            let rd = ((halfword >> 7) & 0x1f) as u8;
            let imm = c_lwsp_offset(halfword);
            (Bytecode::Lw, Operands::IType { rd, rs1: 2, imm })
        }
        // C.LDSP
        (0x2, 0x3) => {
            let rd = ((halfword >> 7) & 0x1f) as u8;
            let imm = c_ldsp_offset(halfword);
            (Bytecode::Ld, Operands::IType { rd, rs1: 2, imm })
        }
        // C.JR / C.MV / C.EBREAK / C.JALR / C.ADD
        (0x2, 0x4) => decode_c_jump_or_move(halfword),
        // C.SWSP
        (0x2, 0x6) => {
            let rs2 = ((halfword >> 2) & 0x1f) as u8;
            let imm = c_swsp_offset(halfword);
            (Bytecode::Sw, Operands::SType { rs1: 2, rs2, imm })
        }
        // C.SDSP
        (0x2, 0x7) => {
            let rs2 = ((halfword >> 2) & 0x1f) as u8;
            let imm = c_sdsp_offset(halfword);
            (Bytecode::Sd, Operands::SType { rs1: 2, rs2, imm })
        }
        _ => (Bytecode::Invalid, Operands::None),
    };

    Ok(DecodedInstruction {
        bytecode,
        operands,
        length: 2,
        block_remaining: 1,
    })
}

fn decode_c_alu(halfword: u16) -> (Bytecode, Operands) {
    let rd = creg(halfword >> 7);
    let sub_op = (halfword >> 10) & 0x3;
    match sub_op {
        0x0 => {
            let shamt = c_shamt(halfword);
            (Bytecode::Srli, Operands::Shift { rd, rs1: rd, shamt })
        }
        0x1 => {
            let shamt = c_shamt(halfword);
            (Bytecode::Srai, Operands::Shift { rd, rs1: rd, shamt })
        }
        0x2 => {
            let imm = c_andi_imm(halfword);
            (Bytecode::Andi, Operands::IType { rd, rs1: rd, imm })
        }
        _ => {
            let rs2 = creg(halfword >> 2);
            let wide = (halfword >> 12) & 0x1 == 1;
            let group = (halfword >> 5) & 0x3;
            let bc = match (wide, group) {
                (false, 0x0) => Bytecode::Sub,
                (false, 0x1) => Bytecode::Xor,
                (false, 0x2) => Bytecode::Or,
                (false, 0x3) => Bytecode::And,
                (true, 0x0) => Bytecode::Subw,
                (true, 0x1) => Bytecode::Addw,
                _ => return (Bytecode::Invalid, Operands::None),
            };
            (bc, Operands::RType { rd, rs1: rd, rs2 })
        }
    }
}

fn decode_c_jump_or_move(halfword: u16) -> (Bytecode, Operands) {
    let bit12 = (halfword >> 12) & 0x1;
    let rd_rs1 = ((halfword >> 7) & 0x1f) as u8;
    let rs2 = ((halfword >> 2) & 0x1f) as u8;

    match (bit12, rs2) {
        (0, 0) => (
            Bytecode::FastJump,
            Operands::IType { rd: 0, rs1: rd_rs1, imm: 0 },
        ),
        (0, _) => (
            Bytecode::Add,
            Operands::RType { rd: rd_rs1, rs1: 0, rs2 },
        ),
        (1, 0) if rd_rs1 == 0 => (Bytecode::Ebreak, Operands::None),
        (1, 0) => (
            Bytecode::FastCall,
            Operands::IType { rd: 1, rs1: rd_rs1, imm: 0 },
        ),
        (1, _) => (
            Bytecode::Add,
            Operands::RType { rd: rd_rs1, rs1: rd_rs1, rs2 },
        ),
        _ => (Bytecode::Invalid, Operands::None),
    }
}

fn c_shamt(halfword: u16) -> u8 {
    ((((halfword >> 12) & 0x1) << 5) | ((halfword >> 2) & 0x1f)) as u8
}

fn c_andi_imm(halfword: u16) -> i32 {
    sign_extend6((((halfword >> 12) & 0x1) << 5) | ((halfword >> 2) & 0x1f))
}

fn c_addi_imm(halfword: u16) -> i32 {
    sign_extend6((((halfword >> 12) & 0x1) << 5) | ((halfword >> 2) & 0x1f))
}

fn c_lui_imm(halfword: u16) -> i32 {
    let raw = (((halfword >> 12) & 0x1) << 17) | (((halfword >> 2) & 0x1f) << 12);
    if raw & (1 << 17) != 0 {
        (raw as i32) | !0x3_ffff
    } else {
        raw as i32
    }
}

fn c_addi16sp_imm(halfword: u16) -> i32 {
    let raw = (((halfword >> 12) & 0x1) << 9)
        | (((halfword >> 3) & 0x3) << 7)
        | (((halfword >> 5) & 0x1) << 6)
        | (((halfword >> 2) & 0x1) << 5)
        | (((halfword >> 6) & 0x1) << 4);
    sign_extend10(raw)
}

fn c_lw_offset(halfword: u16) -> i32 {
    ((((halfword >> 6) & 0x1) << 2)
        | (((halfword >> 10) & 0x7) << 3)
        | (((halfword >> 5) & 0x1) << 6)) as i32
}

fn c_ld_offset(halfword: u16) -> i32 {
    ((((halfword >> 10) & 0x7) << 3) | (((halfword >> 5) & 0x3) << 6)) as i32
}

fn c_lwsp_offset(halfword: u16) -> i32 {
    ((((halfword >> 4) & 0x7) << 2)
        | (((halfword >> 12) & 0x1) << 5)
        | (((halfword >> 2) & 0x3) << 6)) as i32
}

fn c_ldsp_offset(halfword: u16) -> i32 {
    ((((halfword >> 5) & 0x3) << 3)
        | (((halfword >> 12) & 0x1) << 5)
        | (((halfword >> 2) & 0x7) << 6)) as i32
}

fn c_swsp_offset(halfword: u16) -> i32 {
    ((((halfword >> 9) & 0xf) << 2) | (((halfword >> 7) & 0x3) << 6)) as i32
}

fn c_sdsp_offset(halfword: u16) -> i32 {
    ((((halfword >> 10) & 0x7) << 3) | (((halfword >> 7) & 0x7) << 6)) as i32
}

fn c_j_offset(halfword: u16) -> i32 {
    let raw = (((halfword >> 3) & 0x7) << 1)
        | (((halfword >> 11) & 0x1) << 4)
        | (((halfword >> 2) & 0x1) << 5)
        | (((halfword >> 7) & 0x1) << 6)
        | (((halfword >> 6) & 0x1) << 7)
        | (((halfword >> 9) & 0x3) << 8)
        | (((halfword >> 8) & 0x1) << 10)
        | (((halfword >> 12) & 0x1) << 11);
    sign_extend12(raw)
}

fn c_branch_offset(halfword: u16) -> i32 {
    let raw = (((halfword >> 3) & 0x3) << 1)
        | (((halfword >> 10) & 0x3) << 3)
        | (((halfword >> 2) & 0x1) << 5)
        | (((halfword >> 5) & 0x3) << 6)
        | (((halfword >> 12) & 0x1) << 8);
    sign_extend9(raw)
}

fn sign_extend6(v: u16) -> i32 {
    let shifted = (v as i32) << 26;
    shifted >> 26
}

fn sign_extend9(v: u16) -> i32 {
    let shifted = (v as i32) << 23;
    shifted >> 23
}

fn sign_extend10(v: u16) -> i32 {
    let shifted = (v as i32) << 22;
    shifted >> 22
}

fn sign_extend12(v: u16) -> i32 {
    let shifted = (v as i32) << 20;
    shifted >> 20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_nop_decodes_as_addi_x0() {
        // c.nop is c.addi x0, 0: 0b000_0_00000_00000_01
        let slot = decode(0x0001).unwrap();
        assert_eq!(slot.bytecode, Bytecode::Addi);
        assert_eq!(slot.length, 2);
    }

    #[test]
    fn c_li_decodes_as_load_immediate() {
        // c.li x1, 5: 010_0_00001_00101_01
        let halfword: u16 = 0b010_0_00001_00101_01;
        let slot = decode(halfword).unwrap();
        assert_eq!(slot.bytecode, Bytecode::LoadImmediate);
    }

    #[test]
    fn c_ebreak_decodes() {
        let halfword: u16 = 0b1001_0000_0000_0010;
        let slot = decode(halfword).unwrap();
        assert_eq!(slot.bytecode, Bytecode::Ebreak);
    }
}
