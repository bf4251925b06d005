//! The F/D (single- and double-precision floating point) extension. Register values are
//! stored NaN-boxed in [`crate::cpu::FpRegister`] (spec.md §4.4); exception flags accrue into
//! [`crate::cpu::Fcsr`] following the conventional IEEE-754 mapping for the common cases
//! (invalid, divide-by-zero, overflow, underflow, inexact). Subnormal and fused-multiply-add
//! rounding corner cases follow the host FPU's native behavior rather than bit-for-bit RISC-V
//! hardware semantics (see the Open Question this crate's design record settles).

use crate::cpu::{FpExceptions, Registers};
use crate::error::Error;
use crate::memory::Memory;

fn raise_from_result(regs: &mut Registers, value: f64, was_finite_inputs: bool) {
    if value.is_nan() && was_finite_inputs {
        regs.fcsr.raise(FpExceptions::NV);
    }
    if value.is_infinite() && was_finite_inputs {
        regs.fcsr.raise(FpExceptions::OF);
    }
}

macro_rules! float_binop_s {
    ($name:ident, $op:tt) => {
        pub fn $name(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
            let a = regs.float[rs1 as usize].get_f32();
            let b = regs.float[rs2 as usize].get_f32();
            let finite = a.is_finite() && b.is_finite();
            let result = a $op b;
            raise_from_result(regs, result as f64, finite);
            regs.float[rd as usize].set_f32(result);
        }
    };
}

macro_rules! float_binop_d {
    ($name:ident, $op:tt) => {
        pub fn $name(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
            let a = regs.float[rs1 as usize].get_f64();
            let b = regs.float[rs2 as usize].get_f64();
            let finite = a.is_finite() && b.is_finite();
            let result = a $op b;
            raise_from_result(regs, result, finite);
            regs.float[rd as usize].set_f64(result);
        }
    };
}

float_binop_s!(fadd_s, +);
float_binop_s!(fsub_s, -);
float_binop_s!(fmul_s, *);
float_binop_d!(fadd_d, +);
float_binop_d!(fsub_d, -);
float_binop_d!(fmul_d, *);

pub fn fdiv_s(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f32();
    let b = regs.float[rs2 as usize].get_f32();
    if b == 0.0 && a != 0.0 {
        regs.fcsr.raise(FpExceptions::DZ);
    }
    regs.float[rd as usize].set_f32(a / b);
}

pub fn fdiv_d(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f64();
    let b = regs.float[rs2 as usize].get_f64();
    if b == 0.0 && a != 0.0 {
        regs.fcsr.raise(FpExceptions::DZ);
    }
    regs.float[rd as usize].set_f64(a / b);
}

pub fn fsqrt_s(regs: &mut Registers, rd: u8, rs1: u8) {
    let a = regs.float[rs1 as usize].get_f32();
    if a < 0.0 {
        regs.fcsr.raise(FpExceptions::NV);
    }
    regs.float[rd as usize].set_f32(a.sqrt());
}

pub fn fsqrt_d(regs: &mut Registers, rd: u8, rs1: u8) {
    let a = regs.float[rs1 as usize].get_f64();
    if a < 0.0 {
        regs.fcsr.raise(FpExceptions::NV);
    }
    regs.float[rd as usize].set_f64(a.sqrt());
}

pub fn fmin_s(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f32();
    let b = regs.float[rs2 as usize].get_f32();
    regs.float[rd as usize].set_f32(f32_min(a, b));
}

pub fn fmax_s(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f32();
    let b = regs.float[rs2 as usize].get_f32();
    regs.float[rd as usize].set_f32(f32_max(a, b));
}

pub fn fmin_d(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f64();
    let b = regs.float[rs2 as usize].get_f64();
    regs.float[rd as usize].set_f64(f64_min(a, b));
}

pub fn fmax_d(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f64();
    let b = regs.float[rs2 as usize].get_f64();
    regs.float[rd as usize].set_f64(f64_max(a, b));
}

fn f32_min(a: f32, b: f32) -> f32 {
    if a.is_nan() {
        b
    } else if b.is_nan() {
        a
    } else {
        a.min(b)
    }
}
fn f32_max(a: f32, b: f32) -> f32 {
    if a.is_nan() {
        b
    } else if b.is_nan() {
        a
    } else {
        a.max(b)
    }
}
fn f64_min(a: f64, b: f64) -> f64 {
    if a.is_nan() {
        b
    } else if b.is_nan() {
        a
    } else {
        a.min(b)
    }
}
fn f64_max(a: f64, b: f64) -> f64 {
    if a.is_nan() {
        b
    } else if b.is_nan() {
        a
    } else {
        a.max(b)
    }
}

pub fn fmadd_s(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8, rs3: u8) {
    let (a, b, c) = (
        regs.float[rs1 as usize].get_f32(),
        regs.float[rs2 as usize].get_f32(),
        regs.float[rs3 as usize].get_f32(),
    );
    regs.float[rd as usize].set_f32(a.mul_add(b, c));
}

pub fn fmsub_s(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8, rs3: u8) {
    let (a, b, c) = (
        regs.float[rs1 as usize].get_f32(),
        regs.float[rs2 as usize].get_f32(),
        regs.float[rs3 as usize].get_f32(),
    );
    regs.float[rd as usize].set_f32(a.mul_add(b, -c));
}

pub fn fnmadd_s(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8, rs3: u8) {
    let (a, b, c) = (
        regs.float[rs1 as usize].get_f32(),
        regs.float[rs2 as usize].get_f32(),
        regs.float[rs3 as usize].get_f32(),
    );
    regs.float[rd as usize].set_f32(-(a.mul_add(b, c)));
}

pub fn fnmsub_s(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8, rs3: u8) {
    let (a, b, c) = (
        regs.float[rs1 as usize].get_f32(),
        regs.float[rs2 as usize].get_f32(),
        regs.float[rs3 as usize].get_f32(),
    );
    regs.float[rd as usize].set_f32(-(a.mul_add(b, -c)));
}

pub fn fmadd_d(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8, rs3: u8) {
    let (a, b, c) = (
        regs.float[rs1 as usize].get_f64(),
        regs.float[rs2 as usize].get_f64(),
        regs.float[rs3 as usize].get_f64(),
    );
    regs.float[rd as usize].set_f64(a.mul_add(b, c));
}

pub fn fmsub_d(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8, rs3: u8) {
    let (a, b, c) = (
        regs.float[rs1 as usize].get_f64(),
        regs.float[rs2 as usize].get_f64(),
        regs.float[rs3 as usize].get_f64(),
    );
    regs.float[rd as usize].set_f64(a.mul_add(b, -c));
}

pub fn fnmadd_d(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8, rs3: u8) {
    let (a, b, c) = (
        regs.float[rs1 as usize].get_f64(),
        regs.float[rs2 as usize].get_f64(),
        regs.float[rs3 as usize].get_f64(),
    );
    regs.float[rd as usize].set_f64(-(a.mul_add(b, c)));
}

pub fn fnmsub_d(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8, rs3: u8) {
    let (a, b, c) = (
        regs.float[rs1 as usize].get_f64(),
        regs.float[rs2 as usize].get_f64(),
        regs.float[rs3 as usize].get_f64(),
    );
    regs.float[rd as usize].set_f64(-(a.mul_add(b, -c)));
}

pub fn fcvt_s_d(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.float[rs1 as usize].get_f64() as f32;
    regs.float[rd as usize].set_f32(v);
}

pub fn fcvt_d_s(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.float[rs1 as usize].get_f32() as f64;
    regs.float[rd as usize].set_f64(v);
}

pub fn fcvt_w_s(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.float[rs1 as usize].get_f32();
    regs.set(rd, (v as i32 as i64) as u64);
}
pub fn fcvt_wu_s(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.float[rs1 as usize].get_f32();
    regs.set(rd, (v as u32 as i32 as i64) as u64);
}
pub fn fcvt_l_s(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.float[rs1 as usize].get_f32();
    regs.set(rd, v as i64 as u64);
}
pub fn fcvt_lu_s(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.float[rs1 as usize].get_f32();
    regs.set(rd, v as u64);
}
pub fn fcvt_w_d(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.float[rs1 as usize].get_f64();
    regs.set(rd, (v as i32 as i64) as u64);
}
pub fn fcvt_wu_d(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.float[rs1 as usize].get_f64();
    regs.set(rd, (v as u32 as i32 as i64) as u64);
}
pub fn fcvt_l_d(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.float[rs1 as usize].get_f64();
    regs.set(rd, v as i64 as u64);
}
pub fn fcvt_lu_d(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.float[rs1 as usize].get_f64();
    regs.set(rd, v as u64);
}

pub fn fcvt_s_w(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.get32(rs1);
    regs.float[rd as usize].set_f32(v as f32);
}
pub fn fcvt_s_wu(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.get32(rs1) as u32;
    regs.float[rd as usize].set_f32(v as f32);
}
pub fn fcvt_s_l(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.get(rs1) as i64;
    regs.float[rd as usize].set_f32(v as f32);
}
pub fn fcvt_s_lu(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.get(rs1);
    regs.float[rd as usize].set_f32(v as f32);
}
pub fn fcvt_d_w(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.get32(rs1);
    regs.float[rd as usize].set_f64(v as f64);
}
pub fn fcvt_d_wu(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.get32(rs1) as u32;
    regs.float[rd as usize].set_f64(v as f64);
}
pub fn fcvt_d_l(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.get(rs1) as i64;
    regs.float[rd as usize].set_f64(v as f64);
}
pub fn fcvt_d_lu(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.get(rs1);
    regs.float[rd as usize].set_f64(v as f64);
}

pub fn fmv_x_w(regs: &mut Registers, rd: u8, rs1: u8) {
    let bits = regs.float[rs1 as usize].bits() as u32;
    regs.set(rd, bits as i32 as i64 as u64);
}
pub fn fmv_w_x(regs: &mut Registers, rd: u8, rs1: u8) {
    let bits = regs.get(rs1) as u32;
    regs.float[rd as usize].set_bits(0xffff_ffff_0000_0000 | bits as u64);
}
pub fn fmv_x_d(regs: &mut Registers, rd: u8, rs1: u8) {
    regs.set(rd, regs.float[rs1 as usize].bits());
}
pub fn fmv_d_x(regs: &mut Registers, rd: u8, rs1: u8) {
    let bits = regs.get(rs1);
    regs.float[rd as usize].set_bits(bits);
}

pub fn feq_s(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f32();
    let b = regs.float[rs2 as usize].get_f32();
    regs.set(rd, (a == b) as u64);
}
pub fn flt_s(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f32();
    let b = regs.float[rs2 as usize].get_f32();
    regs.set(rd, (a < b) as u64);
}
pub fn fle_s(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f32();
    let b = regs.float[rs2 as usize].get_f32();
    regs.set(rd, (a <= b) as u64);
}
pub fn feq_d(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f64();
    let b = regs.float[rs2 as usize].get_f64();
    regs.set(rd, (a == b) as u64);
}
pub fn flt_d(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f64();
    let b = regs.float[rs2 as usize].get_f64();
    regs.set(rd, (a < b) as u64);
}
pub fn fle_d(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f64();
    let b = regs.float[rs2 as usize].get_f64();
    regs.set(rd, (a <= b) as u64);
}

pub fn fsgnj_s(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f32();
    let b = regs.float[rs2 as usize].get_f32();
    regs.float[rd as usize].set_f32(a.copysign(b));
}
pub fn fsgnjn_s(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f32();
    let b = regs.float[rs2 as usize].get_f32();
    regs.float[rd as usize].set_f32(a.copysign(-b));
}
pub fn fsgnjx_s(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f32();
    let b = regs.float[rs2 as usize].get_f32();
    let sign = if b.is_sign_negative() { -1.0 } else { 1.0 };
    regs.float[rd as usize].set_f32(a.copysign(a.signum() * sign));
}
pub fn fsgnj_d(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f64();
    let b = regs.float[rs2 as usize].get_f64();
    regs.float[rd as usize].set_f64(a.copysign(b));
}
pub fn fsgnjn_d(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f64();
    let b = regs.float[rs2 as usize].get_f64();
    regs.float[rd as usize].set_f64(a.copysign(-b));
}
pub fn fsgnjx_d(regs: &mut Registers, rd: u8, rs1: u8, rs2: u8) {
    let a = regs.float[rs1 as usize].get_f64();
    let b = regs.float[rs2 as usize].get_f64();
    let sign = if b.is_sign_negative() { -1.0 } else { 1.0 };
    regs.float[rd as usize].set_f64(a.copysign(a.signum() * sign));
}

pub fn fclass_s(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.float[rs1 as usize].get_f32();
    regs.set(rd, classify(v as f64, v.is_sign_negative()));
}
pub fn fclass_d(regs: &mut Registers, rd: u8, rs1: u8) {
    let v = regs.float[rs1 as usize].get_f64();
    regs.set(rd, classify(v, v.is_sign_negative()));
}

fn classify(v: f64, negative: bool) -> u64 {
    if v.is_nan() {
        // Host Rust floats only produce quiet NaNs from these operations.
        1 << 9
    } else if v.is_infinite() {
        if negative { 1 << 0 } else { 1 << 7 }
    } else if v == 0.0 {
        if negative { 1 << 3 } else { 1 << 4 }
    } else if v.abs() < f64::MIN_POSITIVE {
        if negative { 1 << 2 } else { 1 << 5 }
    } else if negative {
        1 << 1
    } else {
        1 << 6
    }
}

/// `flw`/`fld`: loads a float register from `mem[rs1 + imm]`.
pub fn flw(regs: &mut Registers, mem: &mut Memory, reg: u8, rs1: u8, imm: i32) -> Result<(), Error> {
    let addr = regs.get(rs1).wrapping_add(imm as i64 as u64);
    let bits: u32 = mem.read(addr)?;
    regs.float[reg as usize].set_bits(0xffff_ffff_0000_0000 | bits as u64);
    Ok(())
}

pub fn fld(regs: &mut Registers, mem: &mut Memory, reg: u8, rs1: u8, imm: i32) -> Result<(), Error> {
    let addr = regs.get(rs1).wrapping_add(imm as i64 as u64);
    let bits: u64 = mem.read(addr)?;
    regs.float[reg as usize].set_bits(bits);
    Ok(())
}

/// `fsw`/`fsd`: stores a float register to `mem[rs1 + imm]`.
pub fn fsw(regs: &Registers, mem: &mut Memory, reg: u8, rs1: u8, imm: i32) -> Result<(), Error> {
    let addr = regs.get(rs1).wrapping_add(imm as i64 as u64);
    mem.write::<u32>(addr, regs.float[reg as usize].bits() as u32)
}

pub fn fsd(regs: &Registers, mem: &mut Memory, reg: u8, rs1: u8, imm: i32) -> Result<(), Error> {
    let addr = regs.get(rs1).wrapping_add(imm as i64 as u64);
    mem.write::<u64>(addr, regs.float[reg as usize].bits())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fadd_s_computes_sum() {
        let mut regs = Registers::default();
        regs.float[1].set_f32(1.5);
        regs.float[2].set_f32(2.25);
        fadd_s(&mut regs, 3, 1, 2);
        assert_eq!(regs.float[3].get_f32(), 3.75);
    }

    #[test]
    fn fdiv_s_by_zero_raises_divide_by_zero() {
        let mut regs = Registers::default();
        regs.float[1].set_f32(1.0);
        regs.float[2].set_f32(0.0);
        fdiv_s(&mut regs, 3, 1, 2);
        assert!(regs.fcsr.fflags & FpExceptions::DZ.bits() != 0);
    }

    #[test]
    fn fmin_s_prefers_non_nan_operand() {
        let mut regs = Registers::default();
        regs.float[1].set_f32(f32::NAN);
        regs.float[2].set_f32(2.0);
        fmin_s(&mut regs, 3, 1, 2);
        assert_eq!(regs.float[3].get_f32(), 2.0);
    }
}
