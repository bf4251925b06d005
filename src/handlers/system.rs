//! `SYSTEM` opcode semantics this core implements directly: the floating-point control/status
//! CSRs (`fflags`, `frm`, `fcsr`). `ecall`/`ebreak` are handled by the dispatch loop itself,
//! since they require access to the installed syscall table and the guest-thread scheduler
//! rather than just register state.

use crate::cpu::Registers;
use crate::error::{Error, ExceptionKind};

const CSR_FFLAGS: u16 = 0x001;
const CSR_FRM: u16 = 0x002;
const CSR_FCSR: u16 = 0x003;
/// Read-only cycle/time/instruction-retired counters (spec.md §4.2's system bytecode group).
/// This core is explicitly not cycle-accurate (spec.md §1 Non-goals), so all three alias the
/// dispatch loop's own instruction counter rather than tracking wall-clock time separately.
const CSR_CYCLE: u16 = 0xc00;
const CSR_TIME: u16 = 0xc01;
const CSR_INSTRET: u16 = 0xc02;

fn read_csr(regs: &Registers, csr: u16, counter: u64) -> Result<u64, Error> {
    match csr {
        CSR_FFLAGS => Ok((regs.fcsr.fflags & 0x1f) as u64),
        CSR_FRM => Ok((regs.fcsr.frm & 0x7) as u64),
        CSR_FCSR => Ok(regs.fcsr.whole() as u64),
        CSR_CYCLE | CSR_TIME | CSR_INSTRET => Ok(counter),
        _ => Err(Error::fault(ExceptionKind::IllegalOperation)),
    }
}

fn write_csr(regs: &mut Registers, csr: u16, value: u64) -> Result<(), Error> {
    match csr {
        CSR_FFLAGS => regs.fcsr.fflags = (value as u32) & 0x1f,
        CSR_FRM => regs.fcsr.frm = (value as u8) & 0x7,
        CSR_FCSR => regs.fcsr.set_whole(value as u32),
        CSR_CYCLE | CSR_TIME | CSR_INSTRET => {
            return Err(Error::fault(ExceptionKind::IllegalOperation))
        }
        _ => return Err(Error::fault(ExceptionKind::IllegalOperation)),
    }
    Ok(())
}

/// `csrrw rd, csr, rs1`: swaps the CSR's value with `rs1`. `counter` supplies the value read
/// back for the counter CSRs (cycle/time/instret).
pub fn csrrw(regs: &mut Registers, rd: u8, rs1: u8, csr: u16, counter: u64) -> Result<(), Error> {
    let old = read_csr(regs, csr, counter)?;
    write_csr(regs, csr, regs.get(rs1))?;
    regs.set(rd, old);
    Ok(())
}

/// `csrrs rd, csr, rs1`: sets the bits in `rs1` within the CSR. With `rs1 = x0` this is a pure
/// read, which is how `rdcycle`/`rdtime`/`rdinstret` are conventionally encoded.
pub fn csrrs(regs: &mut Registers, rd: u8, rs1: u8, csr: u16, counter: u64) -> Result<(), Error> {
    let old = read_csr(regs, csr, counter)?;
    if rs1 != 0 {
        write_csr(regs, csr, old | regs.get(rs1))?;
    }
    regs.set(rd, old);
    Ok(())
}

/// `csrrc rd, csr, rs1`: clears the bits in `rs1` within the CSR.
pub fn csrrc(regs: &mut Registers, rd: u8, rs1: u8, csr: u16, counter: u64) -> Result<(), Error> {
    let old = read_csr(regs, csr, counter)?;
    if rs1 != 0 {
        write_csr(regs, csr, old & !regs.get(rs1))?;
    }
    regs.set(rd, old);
    Ok(())
}

/// `csrrwi rd, csr, zimm`: swaps the CSR's value with the 5-bit immediate carried in the
/// `rs1` field.
pub fn csrrwi(regs: &mut Registers, rd: u8, zimm: u8, csr: u16, counter: u64) -> Result<(), Error> {
    let old = read_csr(regs, csr, counter)?;
    write_csr(regs, csr, zimm as u64)?;
    regs.set(rd, old);
    Ok(())
}

pub fn csrrsi(regs: &mut Registers, rd: u8, zimm: u8, csr: u16, counter: u64) -> Result<(), Error> {
    let old = read_csr(regs, csr, counter)?;
    if zimm != 0 {
        write_csr(regs, csr, old | zimm as u64)?;
    }
    regs.set(rd, old);
    Ok(())
}

pub fn csrrci(regs: &mut Registers, rd: u8, zimm: u8, csr: u16, counter: u64) -> Result<(), Error> {
    let old = read_csr(regs, csr, counter)?;
    if zimm != 0 {
        write_csr(regs, csr, old & !(zimm as u64))?;
    }
    regs.set(rd, old);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csrrw_swaps_fcsr() {
        let mut regs = Registers::default();
        regs.fcsr.frm = 2;
        csrrw(&mut regs, 5, 0, CSR_FRM, 0).unwrap();
        assert_eq!(regs.get(5), 2);
        assert_eq!(regs.fcsr.frm, 0);
    }

    #[test]
    fn unknown_csr_is_illegal() {
        let mut regs = Registers::default();
        assert!(csrrs(&mut regs, 5, 0, 0xf00, 0).is_err());
    }

    #[test]
    fn instret_reads_back_the_running_counter() {
        let mut regs = Registers::default();
        csrrs(&mut regs, 5, 0, CSR_INSTRET, 42).unwrap();
        assert_eq!(regs.get(5), 42);
    }

    #[test]
    fn counters_reject_writes() {
        let mut regs = Registers::default();
        assert!(csrrw(&mut regs, 5, 1, CSR_CYCLE, 0).is_err());
    }
}
