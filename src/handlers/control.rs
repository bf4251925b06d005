//! Branch and jump semantics. Handlers return the new program counter when control leaves
//! straight-line execution; the dispatch loop is responsible for the alignment check against
//! the fetched target (spec.md §4.4: a misaligned branch/jump target faults immediately,
//! before the target instruction is ever fetched).

use crate::cpu::Registers;

#[inline]
fn taken(pc: u64, length: u8, imm: i32) -> u64 {
    let _ = length;
    pc.wrapping_add(imm as i64 as u64)
}

#[inline]
fn not_taken(pc: u64, length: u8) -> u64 {
    pc.wrapping_add(length as u64)
}

pub fn beq(regs: &Registers, pc: u64, length: u8, rs1: u8, rs2: u8, imm: i32) -> u64 {
    if regs.get(rs1) == regs.get(rs2) {
        taken(pc, length, imm)
    } else {
        not_taken(pc, length)
    }
}

pub fn bne(regs: &Registers, pc: u64, length: u8, rs1: u8, rs2: u8, imm: i32) -> u64 {
    if regs.get(rs1) != regs.get(rs2) {
        taken(pc, length, imm)
    } else {
        not_taken(pc, length)
    }
}

pub fn blt(regs: &Registers, pc: u64, length: u8, rs1: u8, rs2: u8, imm: i32) -> u64 {
    if (regs.get(rs1) as i64) < (regs.get(rs2) as i64) {
        taken(pc, length, imm)
    } else {
        not_taken(pc, length)
    }
}

pub fn bge(regs: &Registers, pc: u64, length: u8, rs1: u8, rs2: u8, imm: i32) -> u64 {
    if (regs.get(rs1) as i64) >= (regs.get(rs2) as i64) {
        taken(pc, length, imm)
    } else {
        not_taken(pc, length)
    }
}

pub fn bltu(regs: &Registers, pc: u64, length: u8, rs1: u8, rs2: u8, imm: i32) -> u64 {
    if regs.get(rs1) < regs.get(rs2) {
        taken(pc, length, imm)
    } else {
        not_taken(pc, length)
    }
}

pub fn bgeu(regs: &Registers, pc: u64, length: u8, rs1: u8, rs2: u8, imm: i32) -> u64 {
    if regs.get(rs1) >= regs.get(rs2) {
        taken(pc, length, imm)
    } else {
        not_taken(pc, length)
    }
}

pub fn beq_zero(regs: &Registers, pc: u64, length: u8, rs1: u8, imm: i32) -> u64 {
    if regs.get(rs1) == 0 {
        taken(pc, length, imm)
    } else {
        not_taken(pc, length)
    }
}

pub fn bne_zero(regs: &Registers, pc: u64, length: u8, rs1: u8, imm: i32) -> u64 {
    if regs.get(rs1) != 0 {
        taken(pc, length, imm)
    } else {
        not_taken(pc, length)
    }
}

/// `jal`: writes `pc + length` into `rd`, returns the jump target.
pub fn jal(regs: &mut Registers, pc: u64, length: u8, rd: u8, imm: i32) -> u64 {
    regs.set(rd, pc.wrapping_add(length as u64));
    pc.wrapping_add(imm as i64 as u64)
}

/// `jalr`: writes `pc + length` into `rd`, returns the jump target (`rs1 + imm`, with bit 0
/// cleared per the ISA).
pub fn jalr(regs: &mut Registers, pc: u64, length: u8, rd: u8, rs1: u8, imm: i32) -> u64 {
    let target = regs.get(rs1).wrapping_add(imm as i64 as u64) & !1;
    regs.set(rd, pc.wrapping_add(length as u64));
    target
}

/// An unconditional jump that discards its link (fused form of `jal x0, imm`).
pub fn fast_jump(pc: u64, imm: i32) -> u64 {
    pc.wrapping_add(imm as i64 as u64)
}

/// An unconditional jump that writes a link register (fused form of `jal rd, imm` with
/// `rd != x0`).
pub fn fast_call(regs: &mut Registers, pc: u64, length: u8, rd: u8, imm: i32) -> u64 {
    regs.set(rd, pc.wrapping_add(length as u64));
    pc.wrapping_add(imm as i64 as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jal_writes_return_address_and_jumps() {
        let mut regs = Registers::default();
        let target = jal(&mut regs, 0x1000, 4, 1, 0x100);
        assert_eq!(target, 0x1100);
        assert_eq!(regs.get(1), 0x1004);
    }

    #[test]
    fn jalr_clears_low_bit_of_target() {
        let mut regs = Registers::default();
        regs.set(2, 0x2001);
        let target = jalr(&mut regs, 0x1000, 4, 0, 2, 0);
        assert_eq!(target, 0x2000);
    }

    #[test]
    fn beq_zero_matches_beq_against_x0() {
        let mut regs = Registers::default();
        regs.set(3, 0);
        assert_eq!(beq_zero(&regs, 0x1000, 4, 3, 8), beq(&regs, 0x1000, 4, 3, 0, 8));
    }
}
