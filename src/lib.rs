//! `rvcore` is the core of a user-mode RISC-V instruction set emulator: it loads an
//! ELF-format RISC-V executable, decodes its instructions into an internal bytecode, and
//! executes that bytecode against a simulated register file and a paged guest virtual
//! address space, invoking host-provided callbacks when the guest executes an
//! environment-call instruction.
//!
//! This crate does not itself define Linux (or any other) system-call semantics, a
//! debugger, or a binary-translation backend — it defines the interfaces those
//! collaborators consume:
//!
//!  * [`Memory`] — a paged, copy-on-write guest address space with an ELF loader.
//!  * [`Machine`] — the top-level object embedders construct and drive via
//!    [`Machine::simulate`] and [`Machine::vmcall`].
//!  * [`threads::ThreadTable`] — a cooperative guest-thread multiplexer.
//!  * [`Arena`] — a separate-address-space first-fit allocator for guest malloc/free.

pub mod abi;
pub mod arena;
pub mod cpu;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod machine;
pub mod memory;
pub mod page;
pub mod threads;

pub use arena::Arena;
pub use cpu::{Cpu, Registers, Xlen};
pub use error::{Error, ExceptionKind};
pub use machine::{Machine, MachineOptions};
pub use memory::Memory;
pub use page::{Page, PageFlags};
