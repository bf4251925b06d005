//! This module provides the [`Error`] type for the crate using the [`thiserror`] crate.
use thiserror::Error;

/// The kind of fault a [`Error::MachineException`] carries, without the address/value
/// payload. One discriminant per entry in the core's error taxonomy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExceptionKind {
    /// The decoded slot does not correspond to a defined instruction.
    IllegalOpcode,
    /// The operation cannot be performed, e.g. an unsupported width for this architecture.
    IllegalOperation,
    /// A read, write, or execute was attempted on a page whose attributes forbid it.
    ProtectionFault,
    /// The program counter left every known executable segment.
    ExecuteSpaceProtectionFault,
    /// A branch or jump target, or a data access under alignment checking, was misaligned.
    MisalignedInstruction,
    /// The build does not include the extension covering this slot.
    UnimplementedInstruction,
    /// The requested feature was compiled out of this build.
    FeatureDisabled,
    /// The decoder cache could not be allocated.
    OutOfMemory,
    /// A guest futex wait would block, but no other thread is runnable.
    DeadlockReached,
    /// ELF loading failed.
    InvalidProgram,
}

impl std::fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExceptionKind::IllegalOpcode => "illegal opcode",
            ExceptionKind::IllegalOperation => "illegal operation",
            ExceptionKind::ProtectionFault => "protection fault",
            ExceptionKind::ExecuteSpaceProtectionFault => "execute-space protection fault",
            ExceptionKind::MisalignedInstruction => "misaligned instruction",
            ExceptionKind::UnimplementedInstruction => "unimplemented instruction",
            ExceptionKind::FeatureDisabled => "feature disabled",
            ExceptionKind::OutOfMemory => "out of memory",
            ExceptionKind::DeadlockReached => "deadlock reached",
            ExceptionKind::InvalidProgram => "invalid program",
        };
        f.write_str(s)
    }
}

/// The `Error` type.
#[derive(Debug, Error)]
pub enum Error {
    /// A machine fault raised while decoding or executing guest instructions. Carries an
    /// optional 64-bit datum, usually the faulting address.
    #[error("{kind}{}", datum.map(|d| format!(" at {:#x}", d)).unwrap_or_default())]
    MachineException {
        /// The kind of fault.
        kind: ExceptionKind,
        /// An optional datum, usually the faulting guest address.
        datum: Option<u64>,
    },
    /// No system-call handler is installed at this index.
    #[error("no syscall handler installed at index {0}")]
    NoSyscallHandler(usize),
    /// The syscall table index is out of range of the configured table size.
    #[error("syscall index {0} out of range (table size {1})")]
    SyscallIndexOutOfRange(usize, usize),
    /// A symbol lookup failed.
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),
    /// Wraps an error from the [`goblin`] ELF parser.
    #[error(transparent)]
    Elf(#[from] goblin::error::Error),
}

impl Error {
    /// Constructs a [`Error::MachineException`] with the given kind and no datum.
    pub fn fault(kind: ExceptionKind) -> Self {
        Error::MachineException { kind, datum: None }
    }

    /// Constructs a [`Error::MachineException`] with the given kind and datum.
    pub fn fault_at(kind: ExceptionKind, datum: u64) -> Self {
        Error::MachineException {
            kind,
            datum: Some(datum),
        }
    }

    /// Returns the [`ExceptionKind`] of this error, if it is a [`Error::MachineException`].
    pub fn kind(&self) -> Option<ExceptionKind> {
        match self {
            Error::MachineException { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
