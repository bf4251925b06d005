//! Peephole rewriting of decoded slots: fuses common instruction idioms into specialized
//! bytecodes the dispatch loop can execute in fewer steps, without ever touching the guest's
//! underlying bytes (self-modifying-code detection re-decodes from those bytes, never from
//! this rewritten form; see `crate::memory`).

use super::{Bytecode, DecodedInstruction, Operands};

/// Applies every fusion rule to `slots` in place. `stride` is 2 when compressed decoding is
/// enabled (so every other slot may be the unused second half of a 4-byte instruction) or 4
/// otherwise.
pub fn fuse(slots: &mut [DecodedInstruction], _stride: usize) {
    for slot in slots.iter_mut() {
        fuse_one(slot);
    }
}

fn fuse_one(slot: &mut DecodedInstruction) {
    match (slot.bytecode, slot.operands) {
        // addi rd, x0, imm -> a direct immediate load, skipping the "read rs1" step.
        (Bytecode::Addi, Operands::IType { rd, rs1: 0, imm }) => {
            slot.bytecode = Bytecode::LoadImmediate;
            slot.operands = Operands::IType { rd, rs1: 0, imm };
        }
        // beq/bne against x0 are extremely common (loop tests, null checks); specializing
        // drops the second register read.
        (Bytecode::Beq, Operands::BType { rs1, rs2: 0, imm }) => {
            slot.bytecode = Bytecode::BeqZero;
            slot.operands = Operands::BType { rs1, rs2: 0, imm };
        }
        (Bytecode::Bne, Operands::BType { rs1, rs2: 0, imm }) => {
            slot.bytecode = Bytecode::BneZero;
            slot.operands = Operands::BType { rs1, rs2: 0, imm };
        }
        // An unconditional jal that discards its link (rd == x0) never needs the
        // return-address write-back the general Jal handler performs.
        (Bytecode::Jal, Operands::JType { rd: 0, imm }) => {
            slot.bytecode = Bytecode::FastJump;
            slot.operands = Operands::JType { rd: 0, imm };
        }
        // jal ra, imm / jalr ra, rs1, 0 (ordinary calls) are common enough to special-case the
        // link write-back path.
        (Bytecode::Jal, Operands::JType { rd, imm }) if rd != 0 => {
            slot.bytecode = Bytecode::FastCall;
            slot.operands = Operands::JType { rd, imm };
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addi_from_zero_becomes_load_immediate() {
        let mut slots = [DecodedInstruction {
            bytecode: Bytecode::Addi,
            operands: Operands::IType { rd: 5, rs1: 0, imm: 42 },
            length: 4,
            block_remaining: 1,
        }];
        fuse(&mut slots, 4);
        assert_eq!(slots[0].bytecode, Bytecode::LoadImmediate);
    }

    #[test]
    fn beq_against_zero_specializes() {
        let mut slots = [DecodedInstruction {
            bytecode: Bytecode::Beq,
            operands: Operands::BType { rs1: 3, rs2: 0, imm: 8 },
            length: 4,
            block_remaining: 1,
        }];
        fuse(&mut slots, 4);
        assert_eq!(slots[0].bytecode, Bytecode::BeqZero);
    }

    #[test]
    fn unconditional_jal_without_link_becomes_fast_jump() {
        let mut slots = [DecodedInstruction {
            bytecode: Bytecode::Jal,
            operands: Operands::JType { rd: 0, imm: 100 },
            length: 4,
            block_remaining: 1,
        }];
        fuse(&mut slots, 4);
        assert_eq!(slots[0].bytecode, Bytecode::FastJump);
    }
}
