//! Load/store semantics: address computation (`rs1 + imm`) followed by a sign- or
//! zero-extending transfer through [`Memory`].

use crate::cpu::Registers;
use crate::error::Error;
use crate::memory::Memory;

#[inline]
fn addr(regs: &Registers, rs1: u8, imm: i32) -> u64 {
    regs.get(rs1).wrapping_add(imm as i64 as u64)
}

pub fn lb(regs: &mut Registers, mem: &mut Memory, rd: u8, rs1: u8, imm: i32) -> Result<(), Error> {
    let v: i8 = mem.read(addr(regs, rs1, imm))?;
    regs.set(rd, v as i64 as u64);
    Ok(())
}

pub fn lbu(regs: &mut Registers, mem: &mut Memory, rd: u8, rs1: u8, imm: i32) -> Result<(), Error> {
    let v: u8 = mem.read(addr(regs, rs1, imm))?;
    regs.set(rd, v as u64);
    Ok(())
}

pub fn lh(regs: &mut Registers, mem: &mut Memory, rd: u8, rs1: u8, imm: i32) -> Result<(), Error> {
    let v: i16 = mem.read(addr(regs, rs1, imm))?;
    regs.set(rd, v as i64 as u64);
    Ok(())
}

pub fn lhu(regs: &mut Registers, mem: &mut Memory, rd: u8, rs1: u8, imm: i32) -> Result<(), Error> {
    let v: u16 = mem.read(addr(regs, rs1, imm))?;
    regs.set(rd, v as u64);
    Ok(())
}

pub fn lw(regs: &mut Registers, mem: &mut Memory, rd: u8, rs1: u8, imm: i32) -> Result<(), Error> {
    let v: i32 = mem.read(addr(regs, rs1, imm))?;
    regs.set(rd, v as i64 as u64);
    Ok(())
}

pub fn lwu(regs: &mut Registers, mem: &mut Memory, rd: u8, rs1: u8, imm: i32) -> Result<(), Error> {
    let v: u32 = mem.read(addr(regs, rs1, imm))?;
    regs.set(rd, v as u64);
    Ok(())
}

pub fn ld(regs: &mut Registers, mem: &mut Memory, rd: u8, rs1: u8, imm: i32) -> Result<(), Error> {
    let v: i64 = mem.read(addr(regs, rs1, imm))?;
    regs.set(rd, v as u64);
    Ok(())
}

pub fn sb(regs: &Registers, mem: &mut Memory, rs1: u8, rs2: u8, imm: i32) -> Result<(), Error> {
    mem.write::<u8>(addr(regs, rs1, imm), regs.get(rs2) as u8)
}

pub fn sh(regs: &Registers, mem: &mut Memory, rs1: u8, rs2: u8, imm: i32) -> Result<(), Error> {
    mem.write::<u16>(addr(regs, rs1, imm), regs.get(rs2) as u16)
}

pub fn sw(regs: &Registers, mem: &mut Memory, rs1: u8, rs2: u8, imm: i32) -> Result<(), Error> {
    mem.write::<u32>(addr(regs, rs1, imm), regs.get(rs2) as u32)
}

pub fn sd(regs: &Registers, mem: &mut Memory, rs1: u8, rs2: u8, imm: i32) -> Result<(), Error> {
    mem.write::<u64>(addr(regs, rs1, imm), regs.get(rs2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Page;

    #[test]
    fn store_then_load_byte_sign_extends() {
        let mut regs = Registers::default();
        let mut mem = Memory::new(true, true);
        mem.set_page(0x1000, Page::new_zeroed());
        regs.set(1, 0x1000);
        regs.set(2, 0xff); // -1 as i8
        sb(&regs, &mut mem, 1, 2, 0).unwrap();
        lb(&mut regs, &mut mem, 3, 1, 0).unwrap();
        assert_eq!(regs.get(3) as i64, -1);
    }

    #[test]
    fn store_then_load_word_unsigned() {
        let mut regs = Registers::default();
        let mut mem = Memory::new(true, true);
        mem.set_page(0x2000, Page::new_zeroed());
        regs.set(1, 0x2000);
        regs.set(2, 0xffff_ffff);
        sw(&regs, &mut mem, 1, 2, 0).unwrap();
        lwu(&mut regs, &mut mem, 3, 1, 0).unwrap();
        assert_eq!(regs.get(3), 0xffff_ffff);
    }
}
