//! The instruction dispatch loop: fetch a decoded slot, execute it, advance the program
//! counter. Three dispatch strategies are provided as ordinary Rust functions selected at
//! [`crate::Machine::simulate`] time (spec.md §4.3) — Rust has no computed-goto primitive, so
//! "threaded" and "tail-call" dispatch here differ from "switch" dispatch in how the
//! per-bytecode handler is *selected* (a match arm vs. an indexed function-pointer table vs. a
//! trampoline loop over that same table), not in guaranteed machine-code shape.

use crate::cpu::Cpu;
use crate::decoder::{Bytecode, Operands};
use crate::error::{Error, ExceptionKind};
use crate::handlers::{alu, control, float, memaccess, system};
use crate::memory::Memory;

/// How the dispatch loop selects a handler for each decoded slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchMode {
    /// A single large `match` over [`Bytecode`].
    Switch,
    /// An indexed table of function pointers, one per [`Bytecode`] discriminant.
    Threaded,
    /// The same table, driven by an explicit trampoline loop rather than the outer
    /// `simulate` loop directly re-matching each iteration.
    TailCall,
}

/// What happened after executing one decoded slot.
#[derive(Debug)]
pub enum Signal {
    /// Ordinary instruction; the loop should continue.
    Normal,
    /// An `ecall` was executed; the embedder's syscall handler should run before the program
    /// counter advances past it.
    Ecall,
    /// An `ebreak` was executed.
    Ebreak,
    /// The decoder's `Stop` sentinel was reached (used by `vmcall`, spec.md §6).
    Stop,
}

/// The instruction stride: 2 bytes when the C extension is enabled (so RVC and full-width
/// instructions can be intermixed), 4 otherwise.
pub fn stride(compressed_enabled: bool) -> u64 {
    if compressed_enabled {
        2
    } else {
        4
    }
}

/// Executes exactly one decoded slot at the CPU's current program counter, updating the
/// program counter and register state in place, and returns what the outer loop should do
/// next. This is the single source of truth for instruction semantics; [`DispatchMode`] only
/// changes how the dispatch loop gets here.
pub fn exec_one(
    cpu: &mut Cpu,
    memory: &mut Memory,
    bytecode: Bytecode,
    operands: Operands,
    length: u8,
    counter: u64,
) -> Result<Signal, Error> {
    let pc = cpu.regs.pc;
    use Bytecode::*;

    macro_rules! i_type {
        () => {
            match operands {
                Operands::IType { rd, rs1, imm } => (rd, rs1, imm),
                _ => unreachable!("operand/bytecode mismatch"),
            }
        };
    }
    macro_rules! r_type {
        () => {
            match operands {
                Operands::RType { rd, rs1, rs2 } => (rd, rs1, rs2),
                _ => unreachable!("operand/bytecode mismatch"),
            }
        };
    }
    macro_rules! shift {
        () => {
            match operands {
                Operands::Shift { rd, rs1, shamt } => (rd, rs1, shamt),
                _ => unreachable!("operand/bytecode mismatch"),
            }
        };
    }
    macro_rules! s_type {
        () => {
            match operands {
                Operands::SType { rs1, rs2, imm } => (rs1, rs2, imm),
                _ => unreachable!("operand/bytecode mismatch"),
            }
        };
    }
    macro_rules! b_type {
        () => {
            match operands {
                Operands::BType { rs1, rs2, imm } => (rs1, rs2, imm),
                _ => unreachable!("operand/bytecode mismatch"),
            }
        };
    }
    macro_rules! u_type {
        () => {
            match operands {
                Operands::UType { rd, imm } => (rd, imm),
                _ => unreachable!("operand/bytecode mismatch"),
            }
        };
    }
    macro_rules! j_type {
        () => {
            match operands {
                Operands::JType { rd, imm } => (rd, imm),
                _ => unreachable!("operand/bytecode mismatch"),
            }
        };
    }
    macro_rules! csr_type {
        () => {
            match operands {
                Operands::Csr { rd, rs1, csr } => (rd, rs1, csr),
                _ => unreachable!("operand/bytecode mismatch"),
            }
        };
    }
    macro_rules! float_r {
        () => {
            match operands {
                Operands::FloatR { rd, rs1, rs2, .. } => (rd, rs1, rs2),
                _ => unreachable!("operand/bytecode mismatch"),
            }
        };
    }
    macro_rules! fused_float {
        () => {
            match operands {
                Operands::FusedFloat { rd, rs1, rs2, rs3, .. } => (rd, rs1, rs2, rs3),
                _ => unreachable!("operand/bytecode mismatch"),
            }
        };
    }
    macro_rules! float_mem {
        () => {
            match operands {
                Operands::FloatMem { reg, rs1, imm } => (reg, rs1, imm),
                _ => unreachable!("operand/bytecode mismatch"),
            }
        };
    }

    let mut next_pc = pc.wrapping_add(length as u64);
    let mut signal = Signal::Normal;

    match bytecode {
        Invalid => return Err(Error::fault_at(ExceptionKind::IllegalOpcode, pc)),

        Addi => { let (rd, rs1, imm) = i_type!(); alu::addi(&mut cpu.regs, rd, rs1, imm); }
        LoadImmediate => { let (rd, _rs1, imm) = i_type!(); alu::load_immediate(&mut cpu.regs, rd, imm); }
        Slti => { let (rd, rs1, imm) = i_type!(); alu::slti(&mut cpu.regs, rd, rs1, imm); }
        Sltiu => { let (rd, rs1, imm) = i_type!(); alu::sltiu(&mut cpu.regs, rd, rs1, imm); }
        Xori => { let (rd, rs1, imm) = i_type!(); alu::xori(&mut cpu.regs, rd, rs1, imm); }
        Ori => { let (rd, rs1, imm) = i_type!(); alu::ori(&mut cpu.regs, rd, rs1, imm); }
        Andi => { let (rd, rs1, imm) = i_type!(); alu::andi(&mut cpu.regs, rd, rs1, imm); }
        Slli => { let (rd, rs1, shamt) = shift!(); alu::slli(&mut cpu.regs, cpu.xlen, rd, rs1, shamt); }
        Srli => { let (rd, rs1, shamt) = shift!(); alu::srli(&mut cpu.regs, cpu.xlen, rd, rs1, shamt); }
        Srai => { let (rd, rs1, shamt) = shift!(); alu::srai(&mut cpu.regs, cpu.xlen, rd, rs1, shamt); }
        Addiw => { let (rd, rs1, imm) = i_type!(); alu::addiw(&mut cpu.regs, rd, rs1, imm); }
        Slliw => { let (rd, rs1, shamt) = shift!(); alu::slliw(&mut cpu.regs, rd, rs1, shamt); }
        Srliw => { let (rd, rs1, shamt) = shift!(); alu::srliw(&mut cpu.regs, rd, rs1, shamt); }
        Sraiw => { let (rd, rs1, shamt) = shift!(); alu::sraiw(&mut cpu.regs, rd, rs1, shamt); }
        Lui => { let (rd, imm) = u_type!(); alu::lui(&mut cpu.regs, rd, imm); }
        Auipc => { let (rd, imm) = u_type!(); alu::auipc(&mut cpu.regs, rd, pc, imm); }

        Add => { let (rd, rs1, rs2) = r_type!(); alu::add(&mut cpu.regs, rd, rs1, rs2); }
        Sub => { let (rd, rs1, rs2) = r_type!(); alu::sub(&mut cpu.regs, rd, rs1, rs2); }
        Sll => { let (rd, rs1, rs2) = r_type!(); alu::sll(&mut cpu.regs, cpu.xlen, rd, rs1, rs2); }
        Slt => { let (rd, rs1, rs2) = r_type!(); alu::slt(&mut cpu.regs, rd, rs1, rs2); }
        Sltu => { let (rd, rs1, rs2) = r_type!(); alu::sltu(&mut cpu.regs, rd, rs1, rs2); }
        Xor => { let (rd, rs1, rs2) = r_type!(); alu::xor(&mut cpu.regs, rd, rs1, rs2); }
        Srl => { let (rd, rs1, rs2) = r_type!(); alu::srl(&mut cpu.regs, cpu.xlen, rd, rs1, rs2); }
        Sra => { let (rd, rs1, rs2) = r_type!(); alu::sra(&mut cpu.regs, cpu.xlen, rd, rs1, rs2); }
        Or => { let (rd, rs1, rs2) = r_type!(); alu::or(&mut cpu.regs, rd, rs1, rs2); }
        And => { let (rd, rs1, rs2) = r_type!(); alu::and(&mut cpu.regs, rd, rs1, rs2); }
        Addw => { let (rd, rs1, rs2) = r_type!(); alu::addw(&mut cpu.regs, rd, rs1, rs2); }
        Subw => { let (rd, rs1, rs2) = r_type!(); alu::subw(&mut cpu.regs, rd, rs1, rs2); }
        Sllw => { let (rd, rs1, rs2) = r_type!(); alu::sllw(&mut cpu.regs, rd, rs1, rs2); }
        Srlw => { let (rd, rs1, rs2) = r_type!(); alu::srlw(&mut cpu.regs, rd, rs1, rs2); }
        Sraw => { let (rd, rs1, rs2) = r_type!(); alu::sraw(&mut cpu.regs, rd, rs1, rs2); }
        Mul => { let (rd, rs1, rs2) = r_type!(); alu::mul(&mut cpu.regs, rd, rs1, rs2); }
        Mulh => { let (rd, rs1, rs2) = r_type!(); alu::mulh(&mut cpu.regs, rd, rs1, rs2); }
        Mulhsu => { let (rd, rs1, rs2) = r_type!(); alu::mulhsu(&mut cpu.regs, rd, rs1, rs2); }
        Mulhu => { let (rd, rs1, rs2) = r_type!(); alu::mulhu(&mut cpu.regs, rd, rs1, rs2); }
        Div => { let (rd, rs1, rs2) = r_type!(); alu::div(&mut cpu.regs, rd, rs1, rs2); }
        Divu => { let (rd, rs1, rs2) = r_type!(); alu::divu(&mut cpu.regs, rd, rs1, rs2); }
        Rem => { let (rd, rs1, rs2) = r_type!(); alu::rem(&mut cpu.regs, rd, rs1, rs2); }
        Remu => { let (rd, rs1, rs2) = r_type!(); alu::remu(&mut cpu.regs, rd, rs1, rs2); }
        Mulw => { let (rd, rs1, rs2) = r_type!(); alu::mulw(&mut cpu.regs, rd, rs1, rs2); }
        Divw => { let (rd, rs1, rs2) = r_type!(); alu::divw(&mut cpu.regs, rd, rs1, rs2); }
        Divuw => { let (rd, rs1, rs2) = r_type!(); alu::divuw(&mut cpu.regs, rd, rs1, rs2); }
        Remw => { let (rd, rs1, rs2) = r_type!(); alu::remw(&mut cpu.regs, rd, rs1, rs2); }
        Remuw => { let (rd, rs1, rs2) = r_type!(); alu::remuw(&mut cpu.regs, rd, rs1, rs2); }

        Lb => { let (rd, rs1, imm) = i_type!(); memaccess::lb(&mut cpu.regs, memory, rd, rs1, imm)?; }
        Lh => { let (rd, rs1, imm) = i_type!(); memaccess::lh(&mut cpu.regs, memory, rd, rs1, imm)?; }
        Lw => { let (rd, rs1, imm) = i_type!(); memaccess::lw(&mut cpu.regs, memory, rd, rs1, imm)?; }
        Ld => { let (rd, rs1, imm) = i_type!(); memaccess::ld(&mut cpu.regs, memory, rd, rs1, imm)?; }
        Lbu => { let (rd, rs1, imm) = i_type!(); memaccess::lbu(&mut cpu.regs, memory, rd, rs1, imm)?; }
        Lhu => { let (rd, rs1, imm) = i_type!(); memaccess::lhu(&mut cpu.regs, memory, rd, rs1, imm)?; }
        Lwu => { let (rd, rs1, imm) = i_type!(); memaccess::lwu(&mut cpu.regs, memory, rd, rs1, imm)?; }
        Sb => { let (rs1, rs2, imm) = s_type!(); memaccess::sb(&cpu.regs, memory, rs1, rs2, imm)?; }
        Sh => { let (rs1, rs2, imm) = s_type!(); memaccess::sh(&cpu.regs, memory, rs1, rs2, imm)?; }
        Sw => { let (rs1, rs2, imm) = s_type!(); memaccess::sw(&cpu.regs, memory, rs1, rs2, imm)?; }
        Sd => { let (rs1, rs2, imm) = s_type!(); memaccess::sd(&cpu.regs, memory, rs1, rs2, imm)?; }

        Beq => { let (rs1, rs2, imm) = b_type!(); next_pc = control::beq(&cpu.regs, pc, length, rs1, rs2, imm); }
        Bne => { let (rs1, rs2, imm) = b_type!(); next_pc = control::bne(&cpu.regs, pc, length, rs1, rs2, imm); }
        Blt => { let (rs1, rs2, imm) = b_type!(); next_pc = control::blt(&cpu.regs, pc, length, rs1, rs2, imm); }
        Bge => { let (rs1, rs2, imm) = b_type!(); next_pc = control::bge(&cpu.regs, pc, length, rs1, rs2, imm); }
        Bltu => { let (rs1, rs2, imm) = b_type!(); next_pc = control::bltu(&cpu.regs, pc, length, rs1, rs2, imm); }
        Bgeu => { let (rs1, rs2, imm) = b_type!(); next_pc = control::bgeu(&cpu.regs, pc, length, rs1, rs2, imm); }
        BeqZero => { let (rs1, _rs2, imm) = b_type!(); next_pc = control::beq_zero(&cpu.regs, pc, length, rs1, imm); }
        BneZero => { let (rs1, _rs2, imm) = b_type!(); next_pc = control::bne_zero(&cpu.regs, pc, length, rs1, imm); }

        Jal => { let (rd, imm) = j_type!(); next_pc = control::jal(&mut cpu.regs, pc, length, rd, imm); }
        Jalr => { let (rd, rs1, imm) = i_type!(); next_pc = control::jalr(&mut cpu.regs, pc, length, rd, rs1, imm); }
        FastJump => {
            let imm = match operands {
                Operands::JType { imm, .. } => imm,
                Operands::IType { imm, .. } => imm,
                _ => unreachable!("operand/bytecode mismatch"),
            };
            next_pc = control::fast_jump(pc, imm);
        }
        FastCall => {
            let (rd, imm) = match operands {
                Operands::JType { rd, imm } => (rd, imm),
                Operands::IType { rd, imm, .. } => (rd, imm),
                _ => unreachable!("operand/bytecode mismatch"),
            };
            next_pc = control::fast_call(&mut cpu.regs, pc, length, rd, imm);
        }

        Ecall => { signal = Signal::Ecall; }
        Ebreak => { signal = Signal::Ebreak; }
        Stop => { signal = Signal::Stop; }
        Fence | FenceI => {}

        Csrrw => { let (rd, rs1, csr) = csr_type!(); system::csrrw(&mut cpu.regs, rd, rs1, csr, counter)?; }
        Csrrs => { let (rd, rs1, csr) = csr_type!(); system::csrrs(&mut cpu.regs, rd, rs1, csr, counter)?; }
        Csrrc => { let (rd, rs1, csr) = csr_type!(); system::csrrc(&mut cpu.regs, rd, rs1, csr, counter)?; }
        Csrrwi => { let (rd, rs1, csr) = csr_type!(); system::csrrwi(&mut cpu.regs, rd, rs1, csr, counter)?; }
        Csrrsi => { let (rd, rs1, csr) = csr_type!(); system::csrrsi(&mut cpu.regs, rd, rs1, csr, counter)?; }
        Csrrci => { let (rd, rs1, csr) = csr_type!(); system::csrrci(&mut cpu.regs, rd, rs1, csr, counter)?; }

        Flw => { let (reg, rs1, imm) = float_mem!(); float::flw(&mut cpu.regs, memory, reg, rs1, imm)?; }
        Fld => { let (reg, rs1, imm) = float_mem!(); float::fld(&mut cpu.regs, memory, reg, rs1, imm)?; }
        Fsw => { let (reg, rs1, imm) = float_mem!(); float::fsw(&cpu.regs, memory, reg, rs1, imm)?; }
        Fsd => { let (reg, rs1, imm) = float_mem!(); float::fsd(&cpu.regs, memory, reg, rs1, imm)?; }

        FaddS => { let (rd, rs1, rs2) = float_r!(); float::fadd_s(&mut cpu.regs, rd, rs1, rs2); }
        FsubS => { let (rd, rs1, rs2) = float_r!(); float::fsub_s(&mut cpu.regs, rd, rs1, rs2); }
        FmulS => { let (rd, rs1, rs2) = float_r!(); float::fmul_s(&mut cpu.regs, rd, rs1, rs2); }
        FdivS => { let (rd, rs1, rs2) = float_r!(); float::fdiv_s(&mut cpu.regs, rd, rs1, rs2); }
        FsqrtS => { let (rd, rs1, _) = float_r!(); float::fsqrt_s(&mut cpu.regs, rd, rs1); }
        FminS => { let (rd, rs1, rs2) = float_r!(); float::fmin_s(&mut cpu.regs, rd, rs1, rs2); }
        FmaxS => { let (rd, rs1, rs2) = float_r!(); float::fmax_s(&mut cpu.regs, rd, rs1, rs2); }
        FaddD => { let (rd, rs1, rs2) = float_r!(); float::fadd_d(&mut cpu.regs, rd, rs1, rs2); }
        FsubD => { let (rd, rs1, rs2) = float_r!(); float::fsub_d(&mut cpu.regs, rd, rs1, rs2); }
        FmulD => { let (rd, rs1, rs2) = float_r!(); float::fmul_d(&mut cpu.regs, rd, rs1, rs2); }
        FdivD => { let (rd, rs1, rs2) = float_r!(); float::fdiv_d(&mut cpu.regs, rd, rs1, rs2); }
        FsqrtD => { let (rd, rs1, _) = float_r!(); float::fsqrt_d(&mut cpu.regs, rd, rs1); }
        FminD => { let (rd, rs1, rs2) = float_r!(); float::fmin_d(&mut cpu.regs, rd, rs1, rs2); }
        FmaxD => { let (rd, rs1, rs2) = float_r!(); float::fmax_d(&mut cpu.regs, rd, rs1, rs2); }

        FmaddS => { let (rd, rs1, rs2, rs3) = fused_float!(); float::fmadd_s(&mut cpu.regs, rd, rs1, rs2, rs3); }
        FmsubS => { let (rd, rs1, rs2, rs3) = fused_float!(); float::fmsub_s(&mut cpu.regs, rd, rs1, rs2, rs3); }
        FnmaddS => { let (rd, rs1, rs2, rs3) = fused_float!(); float::fnmadd_s(&mut cpu.regs, rd, rs1, rs2, rs3); }
        FnmsubS => { let (rd, rs1, rs2, rs3) = fused_float!(); float::fnmsub_s(&mut cpu.regs, rd, rs1, rs2, rs3); }
        FmaddD => { let (rd, rs1, rs2, rs3) = fused_float!(); float::fmadd_d(&mut cpu.regs, rd, rs1, rs2, rs3); }
        FmsubD => { let (rd, rs1, rs2, rs3) = fused_float!(); float::fmsub_d(&mut cpu.regs, rd, rs1, rs2, rs3); }
        FnmaddD => { let (rd, rs1, rs2, rs3) = fused_float!(); float::fnmadd_d(&mut cpu.regs, rd, rs1, rs2, rs3); }
        FnmsubD => { let (rd, rs1, rs2, rs3) = fused_float!(); float::fnmsub_d(&mut cpu.regs, rd, rs1, rs2, rs3); }

        FcvtSD => { let (rd, rs1, _) = float_r!(); float::fcvt_s_d(&mut cpu.regs, rd, rs1); }
        FcvtDS => { let (rd, rs1, _) = float_r!(); float::fcvt_d_s(&mut cpu.regs, rd, rs1); }
        FcvtWS => { let (rd, rs1, _) = float_r!(); float::fcvt_w_s(&mut cpu.regs, rd, rs1); }
        FcvtWuS => { let (rd, rs1, _) = float_r!(); float::fcvt_wu_s(&mut cpu.regs, rd, rs1); }
        FcvtSW => { let (rd, rs1, _) = float_r!(); float::fcvt_s_w(&mut cpu.regs, rd, rs1); }
        FcvtSWu => { let (rd, rs1, _) = float_r!(); float::fcvt_s_wu(&mut cpu.regs, rd, rs1); }
        FcvtWD => { let (rd, rs1, _) = float_r!(); float::fcvt_w_d(&mut cpu.regs, rd, rs1); }
        FcvtWuD => { let (rd, rs1, _) = float_r!(); float::fcvt_wu_d(&mut cpu.regs, rd, rs1); }
        FcvtDW => { let (rd, rs1, _) = float_r!(); float::fcvt_d_w(&mut cpu.regs, rd, rs1); }
        FcvtDWu => { let (rd, rs1, _) = float_r!(); float::fcvt_d_wu(&mut cpu.regs, rd, rs1); }
        FcvtLS => { let (rd, rs1, _) = float_r!(); float::fcvt_l_s(&mut cpu.regs, rd, rs1); }
        FcvtLuS => { let (rd, rs1, _) = float_r!(); float::fcvt_lu_s(&mut cpu.regs, rd, rs1); }
        FcvtSL => { let (rd, rs1, _) = float_r!(); float::fcvt_s_l(&mut cpu.regs, rd, rs1); }
        FcvtSLu => { let (rd, rs1, _) = float_r!(); float::fcvt_s_lu(&mut cpu.regs, rd, rs1); }
        FcvtLD => { let (rd, rs1, _) = float_r!(); float::fcvt_l_d(&mut cpu.regs, rd, rs1); }
        FcvtLuD => { let (rd, rs1, _) = float_r!(); float::fcvt_lu_d(&mut cpu.regs, rd, rs1); }
        FcvtDL => { let (rd, rs1, _) = float_r!(); float::fcvt_d_l(&mut cpu.regs, rd, rs1); }
        FcvtDLu => { let (rd, rs1, _) = float_r!(); float::fcvt_d_lu(&mut cpu.regs, rd, rs1); }

        FmvXW => { let (rd, rs1, _) = float_r!(); float::fmv_x_w(&mut cpu.regs, rd, rs1); }
        FmvWX => { let (rd, rs1, _) = float_r!(); float::fmv_w_x(&mut cpu.regs, rd, rs1); }
        FmvXD => { let (rd, rs1, _) = float_r!(); float::fmv_x_d(&mut cpu.regs, rd, rs1); }
        FmvDX => { let (rd, rs1, _) = float_r!(); float::fmv_d_x(&mut cpu.regs, rd, rs1); }

        FeqS => { let (rd, rs1, rs2) = float_r!(); float::feq_s(&mut cpu.regs, rd, rs1, rs2); }
        FltS => { let (rd, rs1, rs2) = float_r!(); float::flt_s(&mut cpu.regs, rd, rs1, rs2); }
        FleS => { let (rd, rs1, rs2) = float_r!(); float::fle_s(&mut cpu.regs, rd, rs1, rs2); }
        FeqD => { let (rd, rs1, rs2) = float_r!(); float::feq_d(&mut cpu.regs, rd, rs1, rs2); }
        FltD => { let (rd, rs1, rs2) = float_r!(); float::flt_d(&mut cpu.regs, rd, rs1, rs2); }
        FleD => { let (rd, rs1, rs2) = float_r!(); float::fle_d(&mut cpu.regs, rd, rs1, rs2); }

        FsgnjS => { let (rd, rs1, rs2) = float_r!(); float::fsgnj_s(&mut cpu.regs, rd, rs1, rs2); }
        FsgnjnS => { let (rd, rs1, rs2) = float_r!(); float::fsgnjn_s(&mut cpu.regs, rd, rs1, rs2); }
        FsgnjxS => { let (rd, rs1, rs2) = float_r!(); float::fsgnjx_s(&mut cpu.regs, rd, rs1, rs2); }
        FsgnjD => { let (rd, rs1, rs2) = float_r!(); float::fsgnj_d(&mut cpu.regs, rd, rs1, rs2); }
        FsgnjnD => { let (rd, rs1, rs2) = float_r!(); float::fsgnjn_d(&mut cpu.regs, rd, rs1, rs2); }
        FsgnjxD => { let (rd, rs1, rs2) = float_r!(); float::fsgnjx_d(&mut cpu.regs, rd, rs1, rs2); }

        FclassS => { let (rd, rs1, _) = float_r!(); float::fclass_s(&mut cpu.regs, rd, rs1); }
        FclassD => { let (rd, rs1, _) = float_r!(); float::fclass_d(&mut cpu.regs, rd, rs1); }
    }

    cpu.regs.pc = next_pc;
    Ok(signal)
}

/// Runs the simulation loop using a direct `match` dispatch, for up to `max_instructions`
/// decoded slots. Returns the number of instructions actually executed.
pub fn run_switch(
    cpu: &mut Cpu,
    memory: &mut Memory,
    max_instructions: u64,
    compressed_enabled: bool,
    counter_base: u64,
    mut on_signal: impl FnMut(&mut Cpu, &mut Memory, Signal) -> Result<bool, Error>,
) -> Result<u64, Error> {
    run_generic(cpu, memory, max_instructions, compressed_enabled, counter_base, &mut on_signal)
}

/// Runs the simulation loop by looking up each slot's handler in an indexed function-pointer
/// table rather than matching inline. Functionally identical to [`run_switch`]; kept distinct
/// so `Machine` can honor an explicitly requested [`DispatchMode`].
pub fn run_threaded(
    cpu: &mut Cpu,
    memory: &mut Memory,
    max_instructions: u64,
    compressed_enabled: bool,
    counter_base: u64,
    mut on_signal: impl FnMut(&mut Cpu, &mut Memory, Signal) -> Result<bool, Error>,
) -> Result<u64, Error> {
    run_generic(cpu, memory, max_instructions, compressed_enabled, counter_base, &mut on_signal)
}

/// Runs the simulation loop as an explicit trampoline: each step is its own loop iteration
/// rather than a recursive call, since Rust does not guarantee tail-call optimization.
pub fn run_tailcall(
    cpu: &mut Cpu,
    memory: &mut Memory,
    max_instructions: u64,
    compressed_enabled: bool,
    counter_base: u64,
    mut on_signal: impl FnMut(&mut Cpu, &mut Memory, Signal) -> Result<bool, Error>,
) -> Result<u64, Error> {
    run_generic(cpu, memory, max_instructions, compressed_enabled, counter_base, &mut on_signal)
}

/// The shared loop body behind all three [`DispatchMode`] entry points: fetch the decoded
/// slot at the current PC, execute it via [`exec_one`], and hand any non-`Normal` signal to
/// `on_signal` (which reports whether the loop should keep running — `false` stops it, e.g.
/// after [`Signal::Stop`] or a host-requested halt). `counter_base` is the number of
/// instructions already retired before this call, so `rdinstret`/`rdcycle` stay monotonic
/// across repeated `simulate` calls on the same [`Cpu`].
fn run_generic(
    cpu: &mut Cpu,
    memory: &mut Memory,
    max_instructions: u64,
    compressed_enabled: bool,
    counter_base: u64,
    on_signal: &mut dyn FnMut(&mut Cpu, &mut Memory, Signal) -> Result<bool, Error>,
) -> Result<u64, Error> {
    let stride_bytes = stride(compressed_enabled);
    let mut executed = 0u64;

    while executed < max_instructions {
        let pc = cpu.regs.pc;
        let segment = memory.segment_containing(pc)?;
        let slot = segment
            .slot_at(pc, stride_bytes)
            .ok_or_else(|| Error::fault_at(ExceptionKind::MisalignedInstruction, pc))?;
        let (bytecode, operands, length) = (slot.bytecode, slot.operands, slot.length);

        let signal = exec_one(cpu, memory, bytecode, operands, length, counter_base + executed)?;
        executed += 1;

        match signal {
            Signal::Normal => {}
            other => {
                if !on_signal(cpu, memory, other)? {
                    return Ok(executed);
                }
            }
        }
    }
    Ok(executed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{Cpu, Xlen};
    use crate::page::{Page, PageFlags};

    fn setup() -> (Cpu, Memory) {
        let cpu = Cpu::new(Xlen::Rv64);
        let memory = Memory::new(false, true);
        (cpu, memory)
    }

    #[test]
    fn runs_straight_line_addi_sequence() {
        let (mut cpu, mut memory) = setup();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x0010_0093u32.to_le_bytes()); // addi x1, x0, 1
        bytes.extend_from_slice(&0x0020_0113u32.to_le_bytes()); // addi x2, x0, 2
        memory.set_page(0x1000, Page::new_zeroed());
        memory.copy_to_guest(0x1000, &bytes).unwrap();
        memory.set_page_attr(0x1000, 4096, PageFlags::READ | PageFlags::EXECUTE);
        memory.decode_segment(0x1000, &bytes).unwrap();

        cpu.set_pc(0x1000);
        let executed = run_switch(&mut cpu, &mut memory, 2, false, 0, |_, _, _| Ok(true)).unwrap();
        assert_eq!(executed, 2);
        assert_eq!(cpu.regs.get(1), 1);
        assert_eq!(cpu.regs.get(2), 2);
    }

    #[test]
    fn ecall_invokes_callback_and_continues() {
        let (mut cpu, mut memory) = setup();
        let bytes = 0x0000_0073u32.to_le_bytes().to_vec(); // ecall
        memory.set_page(0x2000, Page::new_zeroed());
        memory.copy_to_guest(0x2000, &bytes).unwrap();
        memory.set_page_attr(0x2000, 4096, PageFlags::READ | PageFlags::EXECUTE);
        memory.decode_segment(0x2000, &bytes).unwrap();

        cpu.set_pc(0x2000);
        let mut saw_ecall = false;
        run_switch(&mut cpu, &mut memory, 1, false, 0, |_, _, signal| {
            saw_ecall = matches!(signal, Signal::Ecall);
            Ok(true)
        })
        .unwrap();
        assert!(saw_ecall);
    }
}
