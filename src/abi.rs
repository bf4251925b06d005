//! RISC-V Linux-compatible calling-convention and process-startup conventions: which
//! registers carry system-call numbers and arguments, and the `argc`/`argv`/`envp`/auxv
//! layout the core writes onto the guest stack before entering `_start`.

/// Integer argument/return registers in ABI order (`a0`..`a7` are x10..x17).
pub const ARG_REGS: [u8; 8] = [10, 11, 12, 13, 14, 15, 16, 17];
/// The register the ABI designates for the system-call number (`a7`, x17).
pub const SYSCALL_NUM_REG: u8 = 17;
/// The register that receives a system call's return value (`a0`, x10).
pub const RETURN_REG: u8 = 10;
/// The return-address register (`ra`, x1).
pub const RA_REG: u8 = 1;
/// The stack-pointer register (`sp`, x2).
pub const SP_REG: u8 = 2;
/// The thread-pointer register (`tp`, x4), used for TLS.
pub const TP_REG: u8 = 4;
/// Floating-point argument registers `fa0..fa7` (f10..f17).
pub const FLOAT_ARG_REGS: [u8; 8] = [10, 11, 12, 13, 14, 15, 16, 17];

/// An auxiliary-vector tag, as written onto the guest stack at process startup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u64)]
pub enum AuxvTag {
    /// Terminates the auxv array.
    Null = 0,
    /// System page size.
    PageSize = 6,
    /// Guest address of the program-header table.
    Phdr = 3,
    /// Size of one program-header entry.
    PhEnt = 4,
    /// Number of program-header entries.
    PhNum = 5,
    /// Base address (0 for non-relocated images).
    Base = 7,
    /// Processor-specific flags (always 0 here).
    Flags = 8,
    /// The ELF entry point.
    Entry = 9,
    /// User id.
    Uid = 11,
    /// Effective user id.
    EUid = 12,
    /// Group id.
    Gid = 13,
    /// Effective group id.
    EGid = 14,
    /// A bitmask of architecture hardware capabilities (unused, always 0).
    HwCap = 16,
    /// Clock ticks per second, for `times()`.
    ClkTck = 17,
    /// Guest address of a human-readable platform name string.
    Platform = 15,
    /// Whether the binary should be treated as "secure" (setuid-like); always 1.
    Secure = 23,
    /// Guest address of 16 random bytes.
    Random = 25,
}

/// One resolved `{tag, value}` auxv entry.
#[derive(Clone, Copy, Debug)]
pub struct AuxvEntry {
    /// The tag.
    pub tag: AuxvTag,
    /// The value (an integer, or a guest address, depending on tag).
    pub value: u64,
}

/// The platform identification string written to the guest stack for `AT_PLATFORM`.
pub const PLATFORM_STRING: &[u8] = b"RISC-V 64-bit\0";
/// The system page size reported via `AT_PAGESZ`.
pub const PAGE_SIZE: u64 = 4096;
/// Clock ticks per second reported via `AT_CLKTCK`.
pub const CLOCK_TICKS_PER_SEC: u64 = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_and_return_registers_are_a7_and_a0() {
        assert_eq!(SYSCALL_NUM_REG, 17);
        assert_eq!(RETURN_REG, 10);
    }
}
