//! [`Machine`]: the top-level object an embedder constructs from a RISC-V ELF image and drives
//! via [`Machine::simulate`]/[`Machine::vmcall`]. It owns the [`Cpu`], the [`Memory`], the
//! installed system-call table, and the optional guest-thread multiplexer and [`Arena`],
//! mirroring the builder-then-own pattern of `VmBuilder`/`Vm` (see `vm.rs`) generalized from a
//! hardware VM handle to a software instruction-set interpreter.

use std::any::Any;

use crate::abi;
use crate::arena::Arena;
use crate::cpu::Cpu;
use crate::dispatch::{self, DispatchMode, Signal};
use crate::error::{Error, ExceptionKind};
use crate::memory::{elf, Memory};
use crate::page::PAGE_SIZE;
use crate::threads::ThreadTable;

/// Default number of system-call table slots (spec.md §4.5: "at least 512").
const DEFAULT_SYSCALL_TABLE_SIZE: usize = 512;
/// Default guest stack size: 8 MiB.
const DEFAULT_STACK_SIZE: u64 = 8 * 1024 * 1024;
/// Raw encoding of the decoder's reserved `vmcall` exit sentinel (`decoder::decode_system`):
/// `SYSTEM` opcode, `funct3 = 0`, `imm = 0x7ff`. Never emitted by a real compiler.
const STOP_SENTINEL: u32 = 0x7ff0_0073;

/// Builder-style configuration consumed by [`Machine::new`]. Mirrors `VmBuilder`'s
/// with-methods, adapted to a software core: there is no hypervisor handle to fail to acquire,
/// so these consume and return `Self` directly rather than a `Result`.
#[derive(Clone, Copy, Debug)]
pub struct MachineOptions {
    xlen: crate::cpu::Xlen,
    compressed_enabled: bool,
    misalignment_check: bool,
    dispatch_mode: DispatchMode,
    stack_size: u64,
    syscall_table_size: usize,
    /// When `true`, `ebreak` stops the machine directly instead of calling syscall slot 0
    /// (spec.md §4.4: "may be compiled to stop the machine instead").
    breakpoint_stops_machine: bool,
}

impl Default for MachineOptions {
    fn default() -> Self {
        MachineOptions {
            xlen: crate::cpu::Xlen::Rv64,
            compressed_enabled: true,
            misalignment_check: true,
            dispatch_mode: DispatchMode::Switch,
            stack_size: DEFAULT_STACK_SIZE,
            syscall_table_size: DEFAULT_SYSCALL_TABLE_SIZE,
            breakpoint_stops_machine: false,
        }
    }
}

impl MachineOptions {
    /// Sets the native register/address width.
    pub fn with_xlen(mut self, xlen: crate::cpu::Xlen) -> Self {
        self.xlen = xlen;
        self
    }

    /// Enables or disables RVC (16-bit compressed instruction) decoding.
    pub fn with_compressed(mut self, enabled: bool) -> Self {
        self.compressed_enabled = enabled;
        self
    }

    /// Enables or disables alignment checking on data accesses.
    pub fn with_misalignment_check(mut self, enabled: bool) -> Self {
        self.misalignment_check = enabled;
        self
    }

    /// Selects which of the three dispatch strategies `simulate` uses (spec.md §4.3). All three
    /// are observably equivalent in this port; the choice only changes how the interpreter gets
    /// from a decoded slot to its handler.
    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_mode = mode;
        self
    }

    /// Sets the guest stack size, in bytes (rounded up to a whole number of pages).
    pub fn with_stack_size(mut self, size: u64) -> Self {
        self.stack_size = size;
        self
    }

    /// Sets the number of system-call table slots. Clamped to at least
    /// [`DEFAULT_SYSCALL_TABLE_SIZE`].
    pub fn with_syscall_table_size(mut self, size: usize) -> Self {
        self.syscall_table_size = size;
        self
    }

    /// When set, `ebreak` stops the machine directly rather than invoking syscall slot 0.
    pub fn with_breakpoint_stops_machine(mut self, enabled: bool) -> Self {
        self.breakpoint_stops_machine = enabled;
        self
    }
}

/// One argument to [`Machine::vmcall`]. `Bytes` is pushed onto the guest stack before the call
/// and passed as a pointer, matching how a guest C function would receive a buffer or string.
pub enum VmArg<'a> {
    /// An integer argument, passed in the next integer argument register.
    Int(u64),
    /// A floating-point argument, passed in the next floating-point argument register.
    Float(f64),
    /// A byte buffer, copied onto the guest stack; the guest sees its address in the next
    /// integer argument register.
    Bytes(&'a [u8]),
}

enum ResolvedArg {
    Int(u64),
    Float(f64),
}

/// The disjoint slice of [`Machine`] state a syscall handler actually needs, bundled so a
/// handler can be `FnMut(&mut SyscallContext)` rather than `FnMut(&mut Machine)` — the latter
/// would require the handler (stored inside `Machine`) to borrow its own owner mutably while
/// already being called through it. See [`Machine::simulate`] for how this is assembled out of
/// `&mut Machine`'s disjoint fields.
pub struct SyscallContext<'a> {
    /// The CPU whose `ecall` is being serviced.
    pub cpu: &'a mut Cpu,
    /// The guest address space.
    pub memory: &'a mut Memory,
    /// The guest-thread multiplexer, if one was installed.
    pub threads: Option<&'a mut ThreadTable>,
    /// The guest malloc/free arena, if one was installed.
    pub arena: Option<&'a mut Arena>,
    user_data: &'a mut Option<Box<dyn Any>>,
    stop: &'a mut bool,
}

impl<'a> SyscallContext<'a> {
    /// Requests that [`Machine::simulate`] stop after this syscall returns.
    pub fn stop(&mut self) {
        *self.stop = true;
    }

    /// Borrows the embedder-installed user data, if it was set and matches `T`.
    pub fn user_data<T: 'static>(&self) -> Option<&T> {
        self.user_data.as_deref().and_then(<dyn Any>::downcast_ref)
    }

    /// Mutably borrows the embedder-installed user data, if it was set and matches `T`.
    pub fn user_data_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.user_data.as_deref_mut().and_then(<dyn Any>::downcast_mut)
    }

    /// Installs (or replaces) the embedder's user data.
    pub fn set_user_data<T: 'static>(&mut self, value: T) {
        *self.user_data = Some(Box::new(value));
    }
}

/// A host callback servicing one system-call table slot.
pub type SyscallHandler = Box<dyn FnMut(&mut SyscallContext) -> Result<(), Error>>;

/// The top-level object an embedder constructs from a RISC-V ELF image and drives.
///
/// `Machine` owns a [`Cpu`] and a [`Memory`] (spec.md §3), an indexed table of host syscall
/// handlers, an optional guest-thread multiplexer, an optional malloc/free [`Arena`], a slot for
/// embedder-defined user data, and a stack of destructor callbacks run in reverse-registration
/// order when the `Machine` is dropped (spec.md §4.5).
pub struct Machine {
    cpu: Cpu,
    memory: Memory,
    syscalls: Vec<Option<SyscallHandler>>,
    counter: u64,
    stop: bool,
    threads: Option<ThreadTable>,
    arena: Option<Arena>,
    user_data: Option<Box<dyn Any>>,
    destructors: Vec<Box<dyn FnMut(&mut Machine)>>,
    options: MachineOptions,
    trampoline_addr: u64,
}

impl Machine {
    /// Loads `elf_bytes` into a fresh [`Memory`], builds the initial Linux-compatible stack
    /// image (`argv`/`envp`/auxv) below the stack's top, and positions the program counter at
    /// the ELF entry point. `argv[0]` conventionally names the program.
    pub fn new(
        elf_bytes: &[u8],
        argv: &[&str],
        envp: &[&str],
        options: MachineOptions,
    ) -> Result<Self, Error> {
        let mut memory = Memory::new(options.compressed_enabled, options.misalignment_check);
        let image = elf::load(&mut memory, elf_bytes)?;

        let stack_top = match options.xlen {
            crate::cpu::Xlen::Rv64 => 0x0000_3fff_ffff_f000,
            crate::cpu::Xlen::Rv32 => 0xbfff_f000,
        };
        let stack_base = stack_top - options.stack_size;
        let mut page_no = stack_base;
        while page_no < stack_top {
            memory.set_page(page_no, crate::page::Page::new_zeroed());
            page_no += PAGE_SIZE as u64;
        }
        memory.set_page_attr(
            stack_base,
            options.stack_size,
            crate::page::PageFlags::READ | crate::page::PageFlags::WRITE,
        );

        let sp = elf::build_stack(&mut memory, stack_top, argv, envp, &image)?;

        let trampoline_addr = Self::install_trampoline(&mut memory)?;

        let mut cpu = Cpu::new(options.xlen);
        cpu.regs.set(abi::SP_REG, sp);
        cpu.set_pc(image.entry);

        let table_size = options.syscall_table_size.max(DEFAULT_SYSCALL_TABLE_SIZE);
        let mut syscalls = Vec::with_capacity(table_size);
        syscalls.resize_with(table_size, || None);

        Ok(Machine {
            cpu,
            memory,
            syscalls,
            counter: 0,
            stop: false,
            threads: None,
            arena: None,
            user_data: None,
            destructors: Vec::new(),
            options,
            trampoline_addr,
        })
    }

    /// Writes the `vmcall` exit sentinel into a dedicated guest page above the mmap watermark
    /// and registers it as a one-instruction executable segment, so `vmcall` can point `ra` at
    /// it and rely on [`Signal::Stop`] to end the call.
    fn install_trampoline(memory: &mut Memory) -> Result<u64, Error> {
        let addr = memory.mmap_alloc(PAGE_SIZE as u64);
        let bytes = STOP_SENTINEL.to_le_bytes();
        memory.copy_to_guest(addr, &bytes)?;
        memory.set_page_attr(
            addr,
            PAGE_SIZE as u64,
            crate::page::PageFlags::READ | crate::page::PageFlags::EXECUTE,
        );
        memory.decode_segment(addr, &bytes)?;
        Ok(addr)
    }

    /// The CPU's integer/floating-point register file and program counter.
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// A mutable view of the CPU, for embedders that need to poke register state directly
    /// (e.g. a debugger stepping the guest).
    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    /// The guest address space.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// A mutable view of the guest address space.
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Resolves a symbol name to its guest address, or `0` if the symbol is unknown.
    pub fn address_of(&self, name: &str) -> u64 {
        self.memory.address_of(name).unwrap_or(0)
    }

    /// Copies `data` into the guest address space at `addr`.
    pub fn copy_to_guest(&mut self, addr: u64, data: &[u8]) -> Result<(), Error> {
        self.memory.copy_to_guest(addr, data)
    }

    /// Copies `dst.len()` bytes out of the guest address space starting at `addr`.
    pub fn copy_from_guest(&mut self, dst: &mut [u8], addr: u64) -> Result<(), Error> {
        let bytes = self.memory.copy_from_guest(addr, dst.len())?;
        dst.copy_from_slice(&bytes);
        Ok(())
    }

    /// Installs (or replaces) the host callback for system-call table slot `index`.
    pub fn install_syscall_handler<F>(&mut self, index: usize, handler: F) -> Result<(), Error>
    where
        F: FnMut(&mut SyscallContext) -> Result<(), Error> + 'static,
    {
        let len = self.syscalls.len();
        let slot = self
            .syscalls
            .get_mut(index)
            .ok_or(Error::SyscallIndexOutOfRange(index, len))?;
        *slot = Some(Box::new(handler));
        Ok(())
    }

    /// Removes the host callback installed at `index`, if any.
    pub fn remove_syscall_handler(&mut self, index: usize) {
        if let Some(slot) = self.syscalls.get_mut(index) {
            *slot = None;
        }
    }

    /// Creates a malloc/free arena over a freshly `mmap`-allocated guest region of `size`
    /// bytes, replacing any arena previously installed. Returns the arena's base address.
    pub fn create_arena(&mut self, size: u64) -> u64 {
        let base = self.memory.mmap_alloc(size);
        self.arena = Some(Arena::new(base, base + size));
        base
    }

    /// The installed malloc/free arena, if any.
    pub fn arena(&self) -> Option<&Arena> {
        self.arena.as_ref()
    }

    /// A mutable view of the installed arena, if any.
    pub fn arena_mut(&mut self) -> Option<&mut Arena> {
        self.arena.as_mut()
    }

    /// Installs a guest-thread multiplexer seeded with the machine's current stack pointer as
    /// the main thread's, replacing any multiplexer previously installed.
    pub fn create_thread_table(&mut self, stack_base: u64, stack_size: u64) {
        let sp = self.cpu.regs.get(abi::SP_REG);
        self.threads = Some(ThreadTable::new(sp, stack_base, stack_size));
    }

    /// The installed guest-thread multiplexer, if any.
    pub fn threads(&self) -> Option<&ThreadTable> {
        self.threads.as_ref()
    }

    /// A mutable view of the installed guest-thread multiplexer, if any.
    pub fn threads_mut(&mut self) -> Option<&mut ThreadTable> {
        self.threads.as_mut()
    }

    /// Borrows the embedder-installed user data, if it was set and matches `T`.
    pub fn user_data<T: 'static>(&self) -> Option<&T> {
        self.user_data.as_deref().and_then(<dyn Any>::downcast_ref)
    }

    /// Mutably borrows the embedder-installed user data, if it was set and matches `T`.
    pub fn user_data_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.user_data.as_deref_mut().and_then(<dyn Any>::downcast_mut)
    }

    /// Installs (or replaces) the embedder's user data.
    pub fn set_user_data<T: 'static>(&mut self, value: T) {
        self.user_data = Some(Box::new(value));
    }

    /// Registers a callback run when this `Machine` is dropped. Callbacks run in the reverse of
    /// the order they were registered (spec.md §4.5).
    pub fn add_destructor_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut Machine) + 'static,
    {
        self.destructors.push(Box::new(callback));
    }

    /// Requests that [`Machine::simulate`] stop before its next instruction.
    pub fn stop(&mut self) {
        self.stop = true;
    }

    /// Whether a stop has been requested (by a syscall handler, or a prior `Signal::Stop`).
    pub fn stopped(&self) -> bool {
        self.stop
    }

    /// Total instructions retired across the lifetime of this `Machine`, as reported by
    /// `rdinstret`/`rdcycle`/`rdtime`.
    pub fn instructions_retired(&self) -> u64 {
        self.counter
    }

    /// Runs the dispatch loop for up to `max_instructions` decoded slots, or until a syscall
    /// handler or an internal `Signal::Stop` requests a stop. Returns the number of
    /// instructions actually executed by this call.
    ///
    /// An `ecall` reads the syscall index from `a7` and dispatches to the installed handler
    /// (spec.md §4.5); `NoSyscallHandler`/`SyscallIndexOutOfRange` propagate as errors rather
    /// than being silently ignored. An `ebreak` either stops the machine directly or invokes
    /// syscall slot 0, depending on [`MachineOptions::with_breakpoint_stops_machine`].
    pub fn simulate(&mut self, max_instructions: u64) -> Result<u64, Error> {
        self.stop = false;
        let counter_base = self.counter;
        let dispatch_mode = self.options.dispatch_mode;
        let compressed_enabled = self.options.compressed_enabled;
        let breakpoint_stops_machine = self.options.breakpoint_stops_machine;

        let Machine {
            ref mut cpu,
            ref mut memory,
            ref mut syscalls,
            ref mut threads,
            ref mut arena,
            ref mut user_data,
            ref mut stop,
            ..
        } = *self;

        let mut on_signal = |cpu: &mut Cpu, memory: &mut Memory, signal: Signal| -> Result<bool, Error> {
            let syscall_index = match signal {
                Signal::Normal => return Ok(true),
                Signal::Stop => {
                    *stop = true;
                    return Ok(false);
                }
                Signal::Ecall => cpu.regs.get(abi::SYSCALL_NUM_REG) as usize,
                Signal::Ebreak => {
                    if breakpoint_stops_machine {
                        *stop = true;
                        return Ok(false);
                    }
                    0
                }
            };

            dispatch_syscall(
                syscall_index,
                cpu,
                memory,
                syscalls,
                threads.as_mut(),
                arena.as_mut(),
                user_data,
                stop,
            )?;
            Ok(!*stop)
        };

        let executed = match dispatch_mode {
            DispatchMode::Switch => dispatch::run_switch(
                cpu,
                memory,
                max_instructions,
                compressed_enabled,
                counter_base,
                &mut on_signal,
            )?,
            DispatchMode::Threaded => dispatch::run_threaded(
                cpu,
                memory,
                max_instructions,
                compressed_enabled,
                counter_base,
                &mut on_signal,
            )?,
            DispatchMode::TailCall => dispatch::run_tailcall(
                cpu,
                memory,
                max_instructions,
                compressed_enabled,
                counter_base,
                &mut on_signal,
            )?,
        };

        self.counter += executed;
        Ok(executed)
    }

    /// Calls the guest function named `symbol` with `args`, blocking until it returns (the
    /// call's exit is detected via the `vmcall` trampoline's `Signal::Stop`, not an instruction
    /// ceiling), and returns its value out of `a0`.
    ///
    /// Integer and `Bytes` arguments share the integer argument registers (`a0..a7`); `Bytes`
    /// arguments are first copied onto the guest stack and passed by address. Floating-point
    /// arguments use `fa0..fa7` independently.
    pub fn vmcall(&mut self, symbol: &str, args: &[VmArg]) -> Result<u64, Error> {
        let target = self
            .memory
            .address_of(symbol)
            .ok_or_else(|| Error::SymbolNotFound(symbol.to_string()))?;

        let mut sp = self.cpu.regs.get(abi::SP_REG);
        let mut resolved = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                VmArg::Bytes(bytes) => {
                    sp -= bytes.len() as u64;
                    sp &= !0x7;
                    self.memory.copy_to_guest(sp, bytes)?;
                    resolved.push(ResolvedArg::Int(sp));
                }
                VmArg::Int(v) => resolved.push(ResolvedArg::Int(*v)),
                VmArg::Float(v) => resolved.push(ResolvedArg::Float(*v)),
            }
        }
        sp &= !0xf;

        let mut int_slot = 0usize;
        let mut float_slot = 0usize;
        for arg in resolved {
            match arg {
                ResolvedArg::Int(v) => {
                    let reg = *abi::ARG_REGS
                        .get(int_slot)
                        .ok_or_else(|| Error::fault(ExceptionKind::IllegalOperation))?;
                    self.cpu.regs.set(reg, v);
                    int_slot += 1;
                }
                ResolvedArg::Float(v) => {
                    let reg = *abi::FLOAT_ARG_REGS
                        .get(float_slot)
                        .ok_or_else(|| Error::fault(ExceptionKind::IllegalOperation))?;
                    self.cpu.regs.float[reg as usize].set_f64(v);
                    float_slot += 1;
                }
            }
        }

        self.cpu.regs.set(abi::SP_REG, sp);
        self.cpu.regs.set(abi::RA_REG, self.trampoline_addr);
        self.cpu.set_pc(target);

        self.simulate(u64::MAX)?;

        Ok(self.cpu.regs.get(abi::RETURN_REG))
    }
}

/// Looks up and invokes the handler installed at `index`, temporarily taking it out of the
/// table so it can itself receive `&mut` access to `syscalls` (e.g. to install a handler into
/// another slot) without aliasing the slot it was read from.
#[allow(clippy::too_many_arguments)]
fn dispatch_syscall(
    index: usize,
    cpu: &mut Cpu,
    memory: &mut Memory,
    syscalls: &mut [Option<SyscallHandler>],
    threads: Option<&mut ThreadTable>,
    arena: Option<&mut Arena>,
    user_data: &mut Option<Box<dyn Any>>,
    stop: &mut bool,
) -> Result<(), Error> {
    let slot = syscalls
        .get_mut(index)
        .ok_or(Error::SyscallIndexOutOfRange(index, syscalls.len()))?;
    let mut handler = slot.take().ok_or(Error::NoSyscallHandler(index))?;

    let mut ctx = SyscallContext {
        cpu,
        memory,
        threads,
        arena,
        user_data,
        stop,
    };
    let result = handler(&mut ctx);

    syscalls[index] = Some(handler);
    result
}

impl Drop for Machine {
    fn drop(&mut self) {
        while let Some(mut callback) = self.destructors.pop() {
            callback(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::Xlen;
    use crate::page::{Page, PageFlags};

    /// Builds a bare `Machine` without going through ELF loading, for tests that only need a
    /// CPU, a writable code page, and a syscall table.
    fn bare_machine(code: &[u8]) -> Machine {
        let mut memory = Memory::new(false, true);
        let mut page = Page::new_zeroed();
        page.flags = PageFlags::READ | PageFlags::EXECUTE;
        memory.set_page(0x1000, page);
        memory.copy_to_guest(0x1000, code).unwrap();
        memory.set_page_attr(0x1000, PAGE_SIZE as u64, PageFlags::READ | PageFlags::EXECUTE);
        memory.decode_segment(0x1000, code).unwrap();

        let trampoline_addr = Machine::install_trampoline(&mut memory).unwrap();
        let mut cpu = Cpu::new(Xlen::Rv64);
        cpu.set_pc(0x1000);

        let table_size = DEFAULT_SYSCALL_TABLE_SIZE;
        let mut syscalls = Vec::with_capacity(table_size);
        syscalls.resize_with(table_size, || None);

        Machine {
            cpu,
            memory,
            syscalls,
            counter: 0,
            stop: false,
            threads: None,
            arena: None,
            user_data: None,
            destructors: Vec::new(),
            options: MachineOptions::default(),
            trampoline_addr,
        }
    }

    #[test]
    fn arithmetic_round_trip() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x0050_0093u32.to_le_bytes()); // addi x1, x0, 5
        bytes.extend_from_slice(&0x0070_0113u32.to_le_bytes()); // addi x2, x0, 7
        bytes.extend_from_slice(&0x0020_81b3u32.to_le_bytes()); // add x3, x1, x2
        let mut machine = bare_machine(&bytes);
        machine.simulate(3).unwrap();
        assert_eq!(machine.cpu().regs.get(3), 12);
    }

    #[test]
    fn ecall_invokes_installed_handler_and_reads_a7() {
        let bytes = 0x0000_0073u32.to_le_bytes().to_vec(); // ecall
        let mut machine = bare_machine(&bytes);
        machine.cpu_mut().regs.set(abi::SYSCALL_NUM_REG, 3);
        machine
            .install_syscall_handler(3, |ctx| {
                ctx.cpu.regs.set(abi::RETURN_REG, 0x2a);
                Ok(())
            })
            .unwrap();
        machine.simulate(1).unwrap();
        assert_eq!(machine.cpu().regs.get(abi::RETURN_REG), 0x2a);
    }

    #[test]
    fn ecall_with_no_installed_handler_faults() {
        let bytes = 0x0000_0073u32.to_le_bytes().to_vec(); // ecall
        let mut machine = bare_machine(&bytes);
        machine.cpu_mut().regs.set(abi::SYSCALL_NUM_REG, 9);
        assert!(machine.simulate(1).is_err());
    }

    #[test]
    fn ecall_index_out_of_table_range_faults() {
        let bytes = 0x0000_0073u32.to_le_bytes().to_vec(); // ecall
        let mut machine = bare_machine(&bytes);
        machine.cpu_mut().regs.set(abi::SYSCALL_NUM_REG, 50_000);
        assert!(machine.simulate(1).is_err());
    }

    #[test]
    fn ebreak_defaults_to_syscall_slot_zero() {
        let bytes = 0x0010_0073u32.to_le_bytes().to_vec(); // ebreak
        let mut machine = bare_machine(&bytes);
        machine
            .install_syscall_handler(0, |ctx| {
                ctx.stop();
                Ok(())
            })
            .unwrap();
        machine.simulate(1).unwrap();
        assert!(machine.stopped());
    }

    #[test]
    fn vmcall_invokes_function_and_returns_a0() {
        // addi a0, a0, 1 ; ret (jalr x0, ra, 0)
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x0015_0513u32.to_le_bytes());
        bytes.extend_from_slice(&0x0000_8067u32.to_le_bytes());

        let mut machine = bare_machine(&bytes);
        machine.memory_mut().add_symbol("increment".to_string(), 0x1000);
        machine.cpu_mut().regs.set(abi::SP_REG, 0x8000);

        let result = machine.vmcall("increment", &[VmArg::Int(41)]).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn vmcall_unknown_symbol_is_an_error() {
        let mut machine = bare_machine(&0x0000_0073u32.to_le_bytes());
        assert!(machine.vmcall("nonexistent", &[]).is_err());
    }

    #[test]
    fn destructors_run_in_reverse_registration_order() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let bytes = 0x0000_0073u32.to_le_bytes().to_vec();
        let mut machine = bare_machine(&bytes);
        let order = Rc::new(RefCell::new(Vec::new()));

        let first = order.clone();
        machine.add_destructor_callback(move |_| first.borrow_mut().push(1));
        let second = order.clone();
        machine.add_destructor_callback(move |_| second.borrow_mut().push(2));

        drop(machine);
        assert_eq!(*order.borrow(), vec![2, 1]);
    }

    #[test]
    fn instruction_counter_is_monotonic_across_simulate_calls() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x0010_0093u32.to_le_bytes()); // addi x1, x0, 1
        bytes.extend_from_slice(&0x0010_0093u32.to_le_bytes()); // addi x1, x0, 1
        let mut machine = bare_machine(&bytes);
        machine.simulate(1).unwrap();
        assert_eq!(machine.instructions_retired(), 1);
        machine.cpu_mut().set_pc(0x1000);
        machine.simulate(1).unwrap();
        assert_eq!(machine.instructions_retired(), 2);
    }
}
