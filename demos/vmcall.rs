//! Loads a RISC-V ELF binary, installs a write(2)/exit(2) syscall pair, and calls a guest
//! function through `Machine::vmcall`. Mirrors `hy-rs`'s `examples/getting-started.rs`: a small
//! amount of setup, a single driving call, and a printed result.
//!
//! Run as `cargo run --example vmcall -- path/to/binary`.

use std::env;
use std::fs;
use std::io::Write;

use rvcore::abi;
use rvcore::machine::{Machine, MachineOptions, VmArg};
use rvcore::Error;

const SYS_WRITE: usize = 64;
const SYS_EXIT: usize = 93;

fn main() -> Result<(), Error> {
    env_logger::init();

    let path = env::args().nth(1).expect("usage: vmcall <elf-path>");
    let elf_bytes = fs::read(&path).expect("failed to read ELF image");
    log::info!("loading {path}");

    let mut machine = Machine::new(&elf_bytes, &[&path], &[], MachineOptions::default())?;

    // Plumb write(2) straight through to the host's stdout.
    machine.install_syscall_handler(SYS_WRITE, |ctx| {
        let fd = ctx.cpu.regs.get(abi::ARG_REGS[0]);
        let addr = ctx.cpu.regs.get(abi::ARG_REGS[1]);
        let len = ctx.cpu.regs.get(abi::ARG_REGS[2]) as usize;
        let bytes = ctx.memory.copy_from_guest(addr, len)?;
        if fd == 1 || fd == 2 {
            let _ = std::io::stdout().write_all(&bytes);
        }
        ctx.cpu.regs.set(abi::RETURN_REG, bytes.len() as u64);
        Ok(())
    })?;

    // exit(2) stops the machine and stashes the exit code as user data.
    machine.install_syscall_handler(SYS_EXIT, |ctx| {
        let code = ctx.cpu.regs.get(abi::ARG_REGS[0]) as i32;
        ctx.set_user_data(code);
        ctx.stop();
        Ok(())
    })?;

    // Run the loaded program's `_start` directly rather than a named symbol.
    machine.simulate(u64::MAX)?;

    let code = machine.user_data::<i32>().copied().unwrap_or(0);
    log::info!("guest exited with code {code} after {} instructions", machine.instructions_retired());
    println!("Exit code: {code}");

    // A guest function can also be invoked directly, by name, once the program is resident:
    // if the binary exports e.g. `int square(int)`, vmcall drives it to completion without
    // needing an instruction ceiling.
    if machine.address_of("square") != 0 {
        let result = machine.vmcall("square", &[VmArg::Int(7)])?;
        println!("square(7) = {result}");
    }

    Ok(())
}
