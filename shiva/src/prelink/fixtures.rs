//
// Shiva ELF interpreter and patch engine
//
//! Hand-built minimal ELF64 executables for prelinker tests, in the spirit
//! of `memfault_core_handler`'s `find_dynamic.rs` tests, which build byte
//! fixtures with `scroll::Pwrite` rather than invoking a real linker.
#![cfg(test)]

use goblin::elf64::dynamic::{Dyn, DT_DEBUG, DT_NULL};
use goblin::elf64::header::{Header, ELFCLASS64, ELFDATA2LSB, EM_X86_64, ET_EXEC, EV_CURRENT, SIZEOF_EHDR};
use goblin::elf64::program_header::{ProgramHeader, PF_R, PF_W, PF_X, PT_DYNAMIC, PT_INTERP, PT_LOAD, PT_NOTE, SIZEOF_PHDR};
use goblin::elf64::section_header::{SectionHeader, SHT_DYNAMIC, SHT_NULL, SHT_STRTAB};
use scroll::Pwrite;

const BASE_VADDR: u64 = 0x400000;
const PHNUM: usize = 4;
const SHNUM: usize = 3;

/// Builds a minimal but structurally valid dynamically-linked ELF64
/// executable: one PT_LOAD, a PT_INTERP pointing at `interp`, a PT_DYNAMIC
/// with a single real tag plus its terminator, a PT_NOTE placeholder
/// (the slot the prelinker repurposes), and a `.dynamic` section header.
pub fn build_dynamic_executable(interp: &str) -> Vec<u8> {
    let header_area = SIZEOF_EHDR + PHNUM * SIZEOF_PHDR + SHNUM * SectionHeader::size(true);
    let mut data = vec![0u8; header_area];

    let interp_offset = data.len();
    data.extend_from_slice(interp.as_bytes());
    data.push(0);

    let dynamic_offset = data.len();
    let dyn_entries = [
        Dyn {
            d_tag: DT_DEBUG as u64,
            d_val: 0,
        },
        Dyn {
            d_tag: DT_NULL as u64,
            d_val: 0,
        },
    ];
    for d in dyn_entries {
        let pos = data.len();
        data.resize(pos + std::mem::size_of::<Dyn>(), 0);
        data.pwrite(d, pos).unwrap();
    }
    let dynamic_filesz = (data.len() - dynamic_offset) as u64;

    let note_offset = data.len();
    data.extend_from_slice(&[0u8; 16]);
    let note_filesz = 16u64;

    let shstrtab_offset = data.len();
    let shstrtab: &[u8] = b"\0.dynamic\0.shstrtab\0";
    data.extend_from_slice(shstrtab);

    let file_size = data.len() as u64;

    let phdrs = [
        ProgramHeader {
            p_type: PT_LOAD,
            p_flags: PF_R | PF_X,
            p_offset: 0,
            p_vaddr: BASE_VADDR,
            p_paddr: BASE_VADDR,
            p_filesz: file_size,
            p_memsz: file_size,
            p_align: 0x1000,
        },
        ProgramHeader {
            p_type: PT_INTERP,
            p_flags: PF_R,
            p_offset: interp_offset as u64,
            p_vaddr: BASE_VADDR + interp_offset as u64,
            p_paddr: BASE_VADDR + interp_offset as u64,
            p_filesz: (interp.len() + 1) as u64,
            p_memsz: (interp.len() + 1) as u64,
            p_align: 1,
        },
        ProgramHeader {
            p_type: PT_DYNAMIC,
            p_flags: PF_R | PF_W,
            p_offset: dynamic_offset as u64,
            p_vaddr: BASE_VADDR + dynamic_offset as u64,
            p_paddr: BASE_VADDR + dynamic_offset as u64,
            p_filesz: dynamic_filesz,
            p_memsz: dynamic_filesz,
            p_align: 8,
        },
        ProgramHeader {
            p_type: PT_NOTE,
            p_flags: PF_R,
            p_offset: note_offset as u64,
            p_vaddr: BASE_VADDR + note_offset as u64,
            p_paddr: BASE_VADDR + note_offset as u64,
            p_filesz: note_filesz,
            p_memsz: note_filesz,
            p_align: 8,
        },
    ];

    let shdrs = [
        SectionHeader {
            sh_name: 0,
            sh_type: SHT_NULL,
            ..Default::default()
        },
        SectionHeader {
            sh_name: 1,
            sh_type: SHT_DYNAMIC,
            sh_flags: 0,
            sh_addr: BASE_VADDR + dynamic_offset as u64,
            sh_offset: dynamic_offset as u64,
            sh_size: dynamic_filesz,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 8,
            sh_entsize: std::mem::size_of::<Dyn>() as u64,
        },
        SectionHeader {
            sh_name: 10,
            sh_type: SHT_STRTAB,
            sh_flags: 0,
            sh_addr: 0,
            sh_offset: shstrtab_offset as u64,
            sh_size: shstrtab.len() as u64,
            sh_link: 0,
            sh_info: 0,
            sh_addralign: 1,
            sh_entsize: 0,
        },
    ];

    let mut e_ident = [0u8; 16];
    e_ident[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    e_ident[4] = ELFCLASS64;
    e_ident[5] = ELFDATA2LSB;
    e_ident[6] = EV_CURRENT as u8;

    let header = Header {
        e_ident,
        e_type: ET_EXEC,
        e_machine: EM_X86_64,
        e_version: EV_CURRENT as u32,
        e_entry: BASE_VADDR + 0x1000,
        e_phoff: SIZEOF_EHDR as u64,
        e_shoff: (SIZEOF_EHDR + PHNUM * SIZEOF_PHDR) as u64,
        e_flags: 0,
        e_ehsize: SIZEOF_EHDR as u16,
        e_phentsize: SIZEOF_PHDR as u16,
        e_phnum: PHNUM as u16,
        e_shentsize: SectionHeader::size(true) as u16,
        e_shnum: SHNUM as u16,
        e_shstrndx: 2,
    };

    data.pwrite(header, 0).unwrap();
    let mut offset = SIZEOF_EHDR;
    for ph in phdrs {
        data.pwrite(ph, offset).unwrap();
        offset += SIZEOF_PHDR;
    }
    let mut offset = SIZEOF_EHDR + PHNUM * SIZEOF_PHDR;
    for sh in shdrs {
        data.pwrite(sh, offset).unwrap();
        offset += SectionHeader::size(true);
    }

    data
}
