//
// Shiva ELF interpreter and patch engine
//
//! Userland exec (spec §4.2): reproduces what the kernel's ELF loader would
//! have done for the target and the real dynamic linker, except both land
//! in Shiva's own address space instead of a fresh one. Segments are copied
//! in, a new stack is built underneath the linker with materialized
//! argv/envp/auxv, and control is handed off via `arch::enter_loader`,
//! which never returns.
use std::fs;
use std::path::Path;

use crate::elf_view::program_header::PT_LOAD;
use crate::elf_view::ElfImage;
use crate::error::RuntimeError;
use crate::mapping::{MappingTracker, Protection};
use crate::runtime::arch;
use crate::runtime::auxv::AuxvBuilder;
use crate::runtime::context::{ImageInfo, RuntimeContext, StackRegion};
use crate::util::math::{align_down, align_up};

const PAGE_SIZE: u64 = crate::config::PAGE_SIZE;

fn segment_protection(p_flags: u32) -> Protection {
    let mut prot = Protection::empty();
    if p_flags & 0x4 != 0 {
        prot |= Protection::READ;
    }
    if p_flags & 0x2 != 0 {
        prot |= Protection::WRITE;
    }
    if p_flags & 0x1 != 0 {
        prot |= Protection::EXEC;
    }
    prot
}

/// Maps every `PT_LOAD` segment of the ELF image at `path`, biased by
/// `base_bias`, into the tracker, and returns its load coordinates.
pub fn load_image(path: &Path, base_bias: u64, tracker: &mut MappingTracker) -> Result<ImageInfo, RuntimeError> {
    let data = fs::read(path)?;
    let image = ElfImage::new(data)?;
    let header = image.header()?;
    let loads: Vec<_> = image
        .program_headers()?
        .into_iter()
        .filter(|ph| ph.p_type == PT_LOAD)
        .collect();
    if loads.is_empty() {
        return Err(RuntimeError::NoLoadSegments);
    }

    for ph in &loads {
        let vaddr = base_bias + ph.p_vaddr;
        let map_addr = align_down(vaddr, PAGE_SIZE);
        let map_end = align_up(vaddr + ph.p_memsz, PAGE_SIZE);
        let len = (map_end - map_addr) as usize;

        tracker.mmap_fixed(map_addr, len, Protection::READ | Protection::WRITE)?;

        let file_start = ph.p_offset as usize;
        let file_end = file_start + ph.p_filesz as usize;
        let file_bytes = &image.data[file_start..file_end];
        let dest_offset = (vaddr - map_addr) as usize;
        // Safety: `dest_offset..dest_offset + file_bytes.len()` lies within
        // the mapping we just reserved at `map_addr` with length `len`.
        unsafe {
            std::ptr::copy_nonoverlapping(
                file_bytes.as_ptr(),
                (map_addr as *mut u8).add(dest_offset),
                file_bytes.len(),
            );
        }

        tracker.reprotect(map_addr, len, segment_protection(ph.p_flags))?;
    }

    Ok(ImageInfo {
        base: base_bias,
        entry: base_bias + header.e_entry,
        phdr_vaddr: base_bias + header.e_phoff,
        phnum: header.e_phnum,
        phent: header.e_phentsize,
    })
}

/// Computes the byte length of the argc/argv/envp/auxv header area that
/// precedes the string table on the new stack, given the string offsets
/// already assigned.
fn header_area_len(argc: usize, envc: usize, auxv_bytes_len: usize) -> usize {
    8 // argc
        + 8 * argc + 8 // argv pointers + NULL
        + 8 * envc + 8 // envp pointers + NULL
        + auxv_bytes_len
}

/// Reserves and populates the stack region underneath the linker: argc,
/// argv/envp pointer tables, the auxiliary vector, and the string data they
/// point into, following the standard SysV layout the kernel itself builds.
pub fn build_stack(
    tracker: &mut MappingTracker,
    stack_base: u64,
    stack_size: u64,
    argv: &[String],
    envp: &[String],
    auxv: &AuxvBuilder,
) -> Result<StackRegion, RuntimeError> {
    tracker.mmap_fixed(stack_base, stack_size as usize, Protection::READ | Protection::WRITE)?;

    let mut string_bytes = Vec::new();
    let mut argv_offsets = Vec::with_capacity(argv.len());
    for s in argv {
        argv_offsets.push(string_bytes.len());
        string_bytes.extend_from_slice(s.as_bytes());
        string_bytes.push(0);
    }
    let mut envp_offsets = Vec::with_capacity(envp.len());
    for s in envp {
        envp_offsets.push(string_bytes.len());
        string_bytes.extend_from_slice(s.as_bytes());
        string_bytes.push(0);
    }

    let auxv_bytes = auxv.to_bytes();
    let header_len = header_area_len(argv.len(), envp.len(), auxv_bytes.len());
    let total_len = align_up((header_len + string_bytes.len()) as u64, 16) as usize;
    let buffer_base = align_down(stack_base + stack_size - total_len as u64, 16);
    let string_area_base = buffer_base + header_len as u64;

    let mut buf = Vec::with_capacity(total_len);
    buf.extend_from_slice(&(argv.len() as u64).to_ne_bytes());
    for off in &argv_offsets {
        buf.extend_from_slice(&(string_area_base + *off as u64).to_ne_bytes());
    }
    buf.extend_from_slice(&0u64.to_ne_bytes());
    for off in &envp_offsets {
        buf.extend_from_slice(&(string_area_base + *off as u64).to_ne_bytes());
    }
    buf.extend_from_slice(&0u64.to_ne_bytes());
    buf.extend_from_slice(&auxv_bytes);
    buf.extend_from_slice(&string_bytes);
    buf.resize(total_len, 0);

    // Safety: `buffer_base..buffer_base + buf.len()` lies within the stack
    // region we just reserved.
    unsafe {
        std::ptr::copy_nonoverlapping(buf.as_ptr(), buffer_base as *mut u8, buf.len());
    }

    Ok(StackRegion {
        base: stack_base,
        size: stack_size,
        initial_sp: buffer_base,
    })
}

/// Runs the full userland-exec sequence: maps the target and the real
/// linker, builds the new stack, fixes up `AT_PHDR`/`AT_PHENT`/`AT_PHNUM`/
/// `AT_ENTRY`/`AT_BASE` to point at the freshly-mapped images, and jumps
/// into the linker's entry point. Never returns on success.
pub fn exec(
    ctx: &mut RuntimeContext,
    target_path: &Path,
    linker_path: &Path,
    target_base: u64,
    linker_base: u64,
    stack_base: u64,
    stack_size: u64,
    argv: &[String],
    envp: &[String],
) -> Result<(), RuntimeError> {
    ctx.target = load_image(target_path, target_base, &mut ctx.tracker)?;
    ctx.linker = load_image(linker_path, linker_base, &mut ctx.tracker)?;

    ctx.auxv.set(crate::runtime::auxv::AT_PHDR, ctx.target.phdr_vaddr);
    ctx.auxv.set(crate::runtime::auxv::AT_PHENT, ctx.target.phent as u64);
    ctx.auxv.set(crate::runtime::auxv::AT_PHNUM, ctx.target.phnum as u64);
    ctx.auxv.set(crate::runtime::auxv::AT_PAGESZ, PAGE_SIZE);
    ctx.auxv.set(crate::runtime::auxv::AT_ENTRY, ctx.target.entry);
    ctx.auxv.set(crate::runtime::auxv::AT_BASE, ctx.linker.base);

    ctx.stack = build_stack(&mut ctx.tracker, stack_base, stack_size, argv, envp, &ctx.auxv)?;

    // Safety: `ctx.linker.entry` is the entry point of an image we just
    // mapped executable, and `ctx.stack.initial_sp` points at a fully
    // populated argc/argv/envp/auxv block inside a mapping we own.
    unsafe {
        arch::enter_loader(ctx.linker.entry, ctx.stack.initial_sp);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_header_area_len_accounts_for_terminators() {
        let len = header_area_len(2, 1, 32);
        assert_eq!(len, 8 + (8 * 2 + 8) + (8 * 1 + 8) + 32);
    }

    #[test]
    fn test_segment_protection_maps_elf_flags() {
        assert_eq!(segment_protection(0x4), Protection::READ);
        assert_eq!(segment_protection(0x5), Protection::READ | Protection::EXEC);
        assert_eq!(segment_protection(0x6), Protection::READ | Protection::WRITE);
    }
}
