//! This module provides [`Registers`] (the integer and floating-point register files) and
//! [`Cpu`] (the per-CPU execution state: registers, program counter, current segment).

use crate::decoder::SegmentId;

/// The machine's native word width.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Xlen {
    /// 32-bit registers and addresses.
    Rv32,
    /// 64-bit registers and addresses.
    Rv64,
}

impl Xlen {
    /// The width, in bytes, of one integer register under this `Xlen`.
    pub fn bytes(self) -> u32 {
        match self {
            Xlen::Rv32 => 4,
            Xlen::Rv64 => 8,
        }
    }

    /// The mask applied to a shift amount for a 32-bit-wide shift (low 5 bits).
    pub const SHIFT_MASK_32: u32 = 0x1f;
    /// The mask applied to a shift amount for a native-width shift on Rv64 (low 6 bits).
    pub const SHIFT_MASK_64: u32 = 0x3f;

    /// The mask to apply to a shift amount for a native-width (non-word) shift under this
    /// `Xlen`.
    pub fn shift_mask(self) -> u32 {
        match self {
            Xlen::Rv32 => Self::SHIFT_MASK_32,
            Xlen::Rv64 => Self::SHIFT_MASK_64,
        }
    }
}

/// Rounding modes recognized by the `frm` field of [`Fcsr`]. Only round-to-nearest-even is
/// actually honored by the floating-point handlers (spec.md §4.4); the others are tracked so
/// that `frrm`/`fsrm` round-trip correctly.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum RoundingMode {
    /// Round to nearest, ties to even (the default, and the only mode actually implemented).
    NearestEven = 0,
    /// Round towards zero.
    TowardZero = 1,
    /// Round down (towards negative infinity).
    Down = 2,
    /// Round up (towards positive infinity).
    Up = 3,
    /// Round to nearest, ties to max magnitude.
    NearestMaxMagnitude = 4,
    /// Use the rounding mode in the current instruction's `rm` field (decode-time only).
    Dynamic = 7,
}

impl RoundingMode {
    /// Reconstructs a `RoundingMode` from the 3-bit encoding used in the instruction stream
    /// and the `frm` CSR field.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x7 {
            0 => RoundingMode::NearestEven,
            1 => RoundingMode::TowardZero,
            2 => RoundingMode::Down,
            3 => RoundingMode::Up,
            4 => RoundingMode::NearestMaxMagnitude,
            _ => RoundingMode::Dynamic,
        }
    }
}

bitflags::bitflags! {
    /// Accrued floating-point exception flags (the `fflags` portion of `fcsr`).
    pub struct FpExceptions: u32 {
        /// Inexact.
        const NX = 1 << 0;
        /// Underflow.
        const UF = 1 << 1;
        /// Overflow.
        const OF = 1 << 2;
        /// Divide by zero.
        const DZ = 1 << 3;
        /// Invalid operation.
        const NV = 1 << 4;
    }
}

/// The floating-point control/status register: accrued exception flags plus rounding mode.
#[derive(Clone, Copy, Debug, Default)]
pub struct Fcsr {
    /// Accrued exception flags, as a bitmask (see [`FpExceptions`]).
    pub fflags: u32,
    /// The current rounding mode's 3-bit encoding.
    pub frm: u8,
}

impl Fcsr {
    /// Ors the given exception flags into the accrued set.
    pub fn raise(&mut self, flags: FpExceptions) {
        self.fflags |= flags.bits();
    }

    /// The whole `fcsr` register value (`frm` in bits [7:5], `fflags` in bits [4:0]).
    pub fn whole(&self) -> u32 {
        ((self.frm as u32) << 5) | (self.fflags & 0x1f)
    }

    /// Sets the whole `fcsr` register value.
    pub fn set_whole(&mut self, value: u32) {
        self.frm = ((value >> 5) & 0x7) as u8;
        self.fflags = value & 0x1f;
    }
}

/// One 64-bit floating-point register slot, carrying either a single- or double-precision
/// value. Writing a 32-bit (single-precision) value sets the upper 32 bits to all ones
/// (NaN-boxing, spec.md §4.4); reading a single-precision value out of a register whose upper
/// bits are *not* all ones yields the canonical quiet NaN.
#[derive(Clone, Copy, Debug, Default)]
pub struct FpRegister(u64);

const CANONICAL_NAN_F32: u32 = 0x7fc0_0000;
const CANONICAL_NAN_F64: u64 = 0x7ff8_0000_0000_0000;

impl FpRegister {
    /// Writes a single-precision value, NaN-boxing the upper 32 bits.
    pub fn set_f32(&mut self, value: f32) {
        self.0 = 0xffff_ffff_0000_0000 | (value.to_bits() as u64);
    }

    /// Writes a double-precision value, occupying the whole slot.
    pub fn set_f64(&mut self, value: f64) {
        self.0 = value.to_bits();
    }

    /// Reads a single-precision value. If the upper 32 bits are not the NaN-box pattern, the
    /// canonical quiet NaN is returned instead of the raw lower bits.
    pub fn get_f32(&self) -> f32 {
        if (self.0 >> 32) == 0xffff_ffff {
            f32::from_bits(self.0 as u32)
        } else {
            f32::from_bits(CANONICAL_NAN_F32)
        }
    }

    /// Reads a double-precision value.
    pub fn get_f64(&self) -> f64 {
        f64::from_bits(self.0)
    }

    /// Raw bit pattern, as stored.
    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Sets the raw bit pattern directly (used by `fmv.x.w`/`fmv.x.d`-adjacent handlers).
    pub fn set_bits(&mut self, bits: u64) {
        self.0 = bits;
    }
}

/// The integer and floating-point register files, plus the program counter and the
/// floating-point control/status register.
#[derive(Clone, Debug)]
pub struct Registers {
    /// The 32 integer registers. Register 0 always reads as zero; callers must not write to
    /// index 0 (handlers short-circuit this at decode time, not here).
    int: [u64; 32],
    /// The 32 floating-point registers, present regardless of `Xlen` (F/D are optional per
    /// segment but the storage always exists).
    pub float: [FpRegister; 32],
    /// The floating-point control/status register.
    pub fcsr: Fcsr,
    /// The program counter.
    pub pc: u64,
}

impl Default for Registers {
    fn default() -> Self {
        Registers {
            int: [0; 32],
            float: [FpRegister::default(); 32],
            fcsr: Fcsr::default(),
            pc: 0,
        }
    }
}

impl Registers {
    /// Reads integer register `idx`. Register 0 always reads as zero.
    #[inline]
    pub fn get(&self, idx: u8) -> u64 {
        if idx == 0 {
            0
        } else {
            self.int[idx as usize]
        }
    }

    /// Writes integer register `idx`. Writes to register 0 are silently dropped.
    #[inline]
    pub fn set(&mut self, idx: u8, value: u64) {
        if idx != 0 {
            self.int[idx as usize] = value;
        }
    }

    /// Reads integer register `idx` truncated to 32 bits and sign-extended, as used by word
    /// (`*w`) instructions on Rv64.
    #[inline]
    pub fn get32(&self, idx: u8) -> i32 {
        self.get(idx) as i32
    }

    /// All 32 integer registers, for snapshotting (thread-context-switch, debugging).
    pub fn integers(&self) -> &[u64; 32] {
        &self.int
    }

    /// Overwrites all 32 integer registers at once, e.g. when restoring a guest-thread
    /// snapshot. Register 0's slot is ignored on read, so restoring any value into it is
    /// harmless.
    pub fn set_integers(&mut self, values: [u64; 32]) {
        self.int = values;
    }
}

/// Per-CPU execution state: the register file and the currently-active executable segment.
/// Single-threaded: only one [`Registers`] snapshot is "live" at a time; guest multithreading
/// is implemented by swapping this snapshot (see [`crate::threads`]).
pub struct Cpu {
    /// The native word width.
    pub xlen: Xlen,
    /// The live register file.
    pub regs: Registers,
    /// The executable segment containing the current PC, if resolved.
    pub current_segment: Option<SegmentId>,
}

impl Cpu {
    /// Creates a new CPU with all registers zeroed.
    pub fn new(xlen: Xlen) -> Self {
        Cpu {
            xlen,
            regs: Registers::default(),
            current_segment: None,
        }
    }

    /// The current program counter.
    #[inline]
    pub fn pc(&self) -> u64 {
        self.regs.pc
    }

    /// Sets the program counter directly. Does not by itself resolve `current_segment`; the
    /// dispatch loop is responsible for that on segment transition.
    #[inline]
    pub fn set_pc(&mut self, pc: u64) {
        self.regs.pc = pc;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_zero_reads_as_zero_and_rejects_writes() {
        let mut regs = Registers::default();
        regs.set(0, 0xdead_beef);
        assert_eq!(regs.get(0), 0);
        regs.set(5, 42);
        assert_eq!(regs.get(5), 42);
    }

    #[test]
    fn nan_boxing_round_trips_single_precision() {
        let mut reg = FpRegister::default();
        reg.set_f32(1.5);
        assert_eq!(reg.get_f32(), 1.5);
        assert_eq!(reg.bits() >> 32, 0xffff_ffff);
    }

    #[test]
    fn unboxed_upper_bits_yield_canonical_nan() {
        let mut reg = FpRegister::default();
        reg.set_f64(3.25);
        assert!(reg.get_f32().is_nan());
    }
}
