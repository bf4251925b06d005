//! Loads a RISC-V ELF executable into a fresh [`Memory`], and builds the Linux-compatible
//! initial stack image (`argv`/`envp`/auxv) a guest `_start` expects.

use super::Memory;
use crate::abi::{self, AuxvEntry, AuxvTag};
use crate::error::Error;
use crate::page::{Page, PageFlags, PAGE_SIZE};
use goblin::elf::program_header::{PT_LOAD, PT_PHDR};
use goblin::elf::Elf;

/// The guest address, on Rv64, at which the first loadable segment of a non-PIE executable is
/// expected to land. PIE binaries instead load at this same base with relocation skipped,
/// since this core does not perform dynamic relocation (spec.md Non-goals: no dynamic linker).
const DEFAULT_LOAD_BASE: u64 = 0x10000;

/// Everything callers need once an ELF image has been loaded: where to start executing and
/// where program-header metadata for the auxiliary vector landed.
pub struct LoadedImage {
    pub entry: u64,
    pub phdr_addr: u64,
    pub phent: u64,
    pub phnum: u64,
    pub xlen_is_64: bool,
}

/// Parses and loads `elf_bytes` into `memory`, mapping each `PT_LOAD` segment with the
/// attributes its program header requests, zero-filling the gap between a segment's file size
/// and its memory size (`.bss`), and registering every `PT_LOAD` segment marked executable
/// with the decoder.
pub fn load(memory: &mut Memory, elf_bytes: &[u8]) -> Result<LoadedImage, Error> {
    let elf = Elf::parse(elf_bytes)?;

    let base = if elf.header.e_type == goblin::elf::header::ET_DYN {
        DEFAULT_LOAD_BASE
    } else {
        0
    };

    let mut phdr_addr = 0u64;

    for phdr in &elf.program_headers {
        if phdr.p_type == PT_PHDR {
            phdr_addr = base + phdr.p_vaddr;
        }
        if phdr.p_type != PT_LOAD {
            continue;
        }

        let vaddr = base + phdr.p_vaddr;
        let mut flags = PageFlags::empty();
        if phdr.is_read() {
            flags |= PageFlags::READ;
        }
        if phdr.is_write() {
            flags |= PageFlags::WRITE;
        }
        if phdr.is_executable() {
            flags |= PageFlags::EXECUTE;
        }

        let file_range = phdr.file_range();
        let file_bytes = &elf_bytes[file_range.clone()];
        let mem_size = phdr.p_memsz;

        map_segment(memory, vaddr, file_bytes, mem_size, flags)?;

        if phdr.is_executable() {
            let page_start = vaddr & !(PAGE_SIZE as u64 - 1);
            let page_end = (vaddr + mem_size + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);
            let full_bytes = memory.copy_from_guest(page_start, (page_end - page_start) as usize)?;
            memory.decode_segment(page_start, &full_bytes)?;
        }
    }

    for sym in elf.syms.iter() {
        if sym.st_value == 0 {
            continue;
        }
        if let Some(name) = elf.strtab.get_at(sym.st_name) {
            if !name.is_empty() {
                memory.add_symbol(name.to_string(), base + sym.st_value);
            }
        }
    }

    let entry = base + elf.header.e_entry;
    memory.set_entry_point(entry);

    Ok(LoadedImage {
        entry,
        phdr_addr,
        phent: elf.header.e_phentsize as u64,
        phnum: elf.header.e_phnum as u64,
        xlen_is_64: elf.is_64,
    })
}

fn map_segment(
    memory: &mut Memory,
    vaddr: u64,
    file_bytes: &[u8],
    mem_size: u64,
    flags: PageFlags,
) -> Result<(), Error> {
    let page_start = vaddr & !(PAGE_SIZE as u64 - 1);
    let page_end = (vaddr + mem_size + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);

    let mut page_no = page_start;
    while page_no < page_end {
        memory.set_page(page_no, Page::new_zeroed());
        page_no += PAGE_SIZE as u64;
    }
    memory.set_page_attr(page_start, page_end - page_start, flags | PageFlags::WRITE);
    memory.copy_to_guest(vaddr, file_bytes)?;
    memory.set_page_attr(page_start, page_end - page_start, flags);
    Ok(())
}

/// Builds the initial stack image below `stack_top`, Linux-style: `argc`, `argv[]` (NUL
/// pointer terminated), `envp[]` (NUL pointer terminated), the auxiliary vector, then the
/// argument and environment strings themselves, all below a 16-byte-aligned initial stack
/// pointer.
pub fn build_stack(
    memory: &mut Memory,
    stack_top: u64,
    argv: &[&str],
    envp: &[&str],
    image: &LoadedImage,
) -> Result<u64, Error> {
    let mut cursor = stack_top;

    let mut random_bytes = [0u8; 16];
    for (i, b) in random_bytes.iter_mut().enumerate() {
        *b = (i as u8).wrapping_mul(0x9e);
    }
    cursor -= 16;
    let random_addr = cursor;
    memory.copy_to_guest(random_addr, &random_bytes)?;

    cursor -= abi::PLATFORM_STRING.len() as u64;
    let platform_addr = cursor;
    memory.copy_to_guest(platform_addr, abi::PLATFORM_STRING)?;

    let mut argv_addrs = Vec::with_capacity(argv.len());
    for arg in argv {
        let bytes_with_nul = nul_terminate(arg);
        cursor -= bytes_with_nul.len() as u64;
        memory.copy_to_guest(cursor, &bytes_with_nul)?;
        argv_addrs.push(cursor);
    }

    let mut envp_addrs = Vec::with_capacity(envp.len());
    for e in envp {
        let bytes_with_nul = nul_terminate(e);
        cursor -= bytes_with_nul.len() as u64;
        memory.copy_to_guest(cursor, &bytes_with_nul)?;
        envp_addrs.push(cursor);
    }

    cursor &= !0xf;

    let auxv = [
        AuxvEntry { tag: AuxvTag::PageSize, value: abi::PAGE_SIZE },
        AuxvEntry { tag: AuxvTag::Phdr, value: image.phdr_addr },
        AuxvEntry { tag: AuxvTag::PhEnt, value: image.phent },
        AuxvEntry { tag: AuxvTag::PhNum, value: image.phnum },
        AuxvEntry { tag: AuxvTag::Base, value: 0 },
        AuxvEntry { tag: AuxvTag::Flags, value: 0 },
        AuxvEntry { tag: AuxvTag::Entry, value: image.entry },
        AuxvEntry { tag: AuxvTag::Uid, value: 0 },
        AuxvEntry { tag: AuxvTag::EUid, value: 0 },
        AuxvEntry { tag: AuxvTag::Gid, value: 0 },
        AuxvEntry { tag: AuxvTag::EGid, value: 0 },
        AuxvEntry { tag: AuxvTag::HwCap, value: 0 },
        AuxvEntry { tag: AuxvTag::ClkTck, value: abi::CLOCK_TICKS_PER_SEC },
        AuxvEntry { tag: AuxvTag::Platform, value: platform_addr },
        AuxvEntry { tag: AuxvTag::Secure, value: 1 },
        AuxvEntry { tag: AuxvTag::Random, value: random_addr },
        AuxvEntry { tag: AuxvTag::Null, value: 0 },
    ];

    let total_u64_words = 1 // argc
        + argv_addrs.len() + 1 // argv + NULL
        + envp_addrs.len() + 1 // envp + NULL
        + auxv.len() * 2; // {tag, value} pairs

    cursor -= (total_u64_words as u64) * 8;
    cursor &= !0xf;
    let sp = cursor;

    memory.write::<u64>(cursor, argv_addrs.len() as u64)?;
    cursor += 8;
    for addr in &argv_addrs {
        memory.write::<u64>(cursor, *addr)?;
        cursor += 8;
    }
    memory.write::<u64>(cursor, 0)?;
    cursor += 8;

    for addr in &envp_addrs {
        memory.write::<u64>(cursor, *addr)?;
        cursor += 8;
    }
    memory.write::<u64>(cursor, 0)?;
    cursor += 8;

    for entry in &auxv {
        memory.write::<u64>(cursor, entry.tag as u64)?;
        cursor += 8;
        memory.write::<u64>(cursor, entry.value)?;
        cursor += 8;
    }

    memory.set_stack_top(stack_top);
    Ok(sp)
}

fn nul_terminate(s: &str) -> Vec<u8> {
    let mut v = s.as_bytes().to_vec();
    v.push(0);
    v
}
