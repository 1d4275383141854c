//
// Shiva ELF interpreter and patch engine
//
//! Byte-level view over a mapped/in-memory ELF64 image.
//!
//! This is the "ELF-object library" contract the specification treats as an
//! external collaborator: segment/section iteration, symbol/relocation
//! enumeration, and raw byte read/write on the image. Shiva implements it as
//! a thin layer over `goblin`'s plain-old-data ELF structs (the same
//! `from_bytes`/`Pwrite` style `memfault_core_handler::core_reader` and
//! `core_elf_note` use), rather than pulling in a bespoke "libelfmaster"
//! equivalent.
use goblin::elf64::{
    dynamic::Dyn,
    header::{Header, ELFMAG, SELFMAG},
    program_header::{ProgramHeader, SIZEOF_PHDR},
    reloc::Rela,
    section_header::{SectionHeader, SHT_DYNAMIC},
    sym::Sym,
};
use scroll::{Pread, Pwrite};

use crate::error::PrelinkError;

/// Owning, mutable byte-level view over an ELF64 image.
pub struct ElfImage {
    pub data: Vec<u8>,
}

impl ElfImage {
    pub fn new(data: Vec<u8>) -> Result<Self, PrelinkError> {
        let image = Self { data };
        image.header()?;
        Ok(image)
    }

    pub fn header(&self) -> Result<Header, PrelinkError> {
        let header = self
            .data
            .pread::<Header>(0)
            .map_err(|e| PrelinkError::MalformedElf(e.to_string()))?;
        if &header.e_ident[0..SELFMAG] != ELFMAG {
            return Err(PrelinkError::MalformedElf(
                "missing ELF magic".to_string(),
            ));
        }
        Ok(header)
    }

    pub fn program_headers(&self) -> Result<Vec<ProgramHeader>, PrelinkError> {
        let header = self.header()?;
        let mut headers = Vec::with_capacity(header.e_phnum as usize);
        let mut offset = header.e_phoff as usize;
        for _ in 0..header.e_phnum {
            let ph = self
                .data
                .pread::<ProgramHeader>(offset)
                .map_err(|e| PrelinkError::MalformedElf(e.to_string()))?;
            headers.push(ph);
            offset += SIZEOF_PHDR;
        }
        Ok(headers)
    }

    pub fn write_program_header(
        &mut self,
        index: usize,
        ph: ProgramHeader,
    ) -> Result<(), PrelinkError> {
        let header = self.header()?;
        let offset = header.e_phoff as usize + index * SIZEOF_PHDR;
        self.data
            .pwrite(ph, offset)
            .map_err(|e| PrelinkError::MalformedElf(e.to_string()))?;
        Ok(())
    }

    pub fn section_headers(&self) -> Result<Vec<SectionHeader>, PrelinkError> {
        let header = self.header()?;
        let mut sections = Vec::with_capacity(header.e_shnum as usize);
        let mut offset = header.e_shoff as usize;
        for _ in 0..header.e_shnum {
            let sh = self
                .data
                .pread::<SectionHeader>(offset)
                .map_err(|e| PrelinkError::MalformedElf(e.to_string()))?;
            sections.push(sh);
            offset += SectionHeader::size(true);
        }
        Ok(sections)
    }

    pub fn write_section_header(
        &mut self,
        index: usize,
        sh: SectionHeader,
    ) -> Result<(), PrelinkError> {
        let header = self.header()?;
        let offset = header.e_shoff as usize + index * SectionHeader::size(true);
        self.data
            .pwrite(sh, offset)
            .map_err(|e| PrelinkError::MalformedElf(e.to_string()))?;
        Ok(())
    }

    /// Finds the index and header of the `.dynamic` (`SHT_DYNAMIC`) section.
    pub fn dynamic_section(&self) -> Result<Option<(usize, SectionHeader)>, PrelinkError> {
        Ok(self
            .section_headers()?
            .into_iter()
            .enumerate()
            .find(|(_, sh)| sh.sh_type == SHT_DYNAMIC))
    }

    pub fn program_header_of_type(
        &self,
        p_type: u32,
    ) -> Result<Option<(usize, ProgramHeader)>, PrelinkError> {
        Ok(self
            .program_headers()?
            .into_iter()
            .enumerate()
            .find(|(_, ph)| ph.p_type == p_type))
    }

    /// Reads the dynamic array (tag/value pairs) found at file `offset`,
    /// stopping at (and including) the terminating `DT_NULL` entry, or after
    /// `max_entries` if no terminator is found.
    pub fn read_dynamic_array(
        &self,
        offset: usize,
        max_entries: usize,
    ) -> Result<Vec<Dyn>, PrelinkError> {
        let mut entries = Vec::new();
        let mut cur = offset;
        for _ in 0..max_entries {
            let d = self
                .data
                .pread::<Dyn>(cur)
                .map_err(|e| PrelinkError::MalformedElf(e.to_string()))?;
            let is_terminator = d.d_tag == 0;
            entries.push(d);
            cur += std::mem::size_of::<Dyn>();
            if is_terminator {
                break;
            }
        }
        Ok(entries)
    }

    pub fn read_cstr(&self, offset: usize) -> Option<&str> {
        crate::util::cstr::read_cstr(&self.data, offset)
    }

    /// Overwrites the bytes at `offset` with `value`, failing if `value` is
    /// longer than `max_len` (used for in-place PT_INTERP rewriting, which
    /// must not grow the segment).
    pub fn write_cstr_in_place(
        &mut self,
        offset: usize,
        value: &str,
        max_len: usize,
    ) -> Result<(), PrelinkError> {
        if value.len() + 1 > max_len {
            return Err(PrelinkError::InterpOverflow {
                new_len: value.len(),
                orig_len: max_len.saturating_sub(1),
            });
        }
        let bytes = value.as_bytes();
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.data[offset + bytes.len()] = 0;
        Ok(())
    }
}

/// Iterates a module's relocation entries for a `SHT_RELA` section's raw
/// bytes (aarch64/x86_64 ELF64 only uses `Rela`, never `Rel`).
pub fn read_relas(data: &[u8], offset: usize, size: usize) -> Result<Vec<Rela>, PrelinkError> {
    let count = size / std::mem::size_of::<Rela>();
    let mut relas = Vec::with_capacity(count);
    let mut cur = offset;
    for _ in 0..count {
        let r = data
            .pread::<Rela>(cur)
            .map_err(|e| PrelinkError::MalformedElf(e.to_string()))?;
        relas.push(r);
        cur += std::mem::size_of::<Rela>();
    }
    Ok(relas)
}

pub fn read_syms(data: &[u8], offset: usize, count: usize) -> Result<Vec<Sym>, PrelinkError> {
    let mut syms = Vec::with_capacity(count);
    let mut cur = offset;
    for _ in 0..count {
        let s = data
            .pread::<Sym>(cur)
            .map_err(|e| PrelinkError::MalformedElf(e.to_string()))?;
        syms.push(s);
        cur += std::mem::size_of::<Sym>();
    }
    Ok(syms)
}

pub use goblin::elf64::{dynamic, header, note, program_header, reloc, section_header, sym};

#[cfg(test)]
mod test {
    use super::*;

    fn minimal_elf_bytes() -> Vec<u8> {
        let mut data = vec![0u8; SIZEOF_EHDR_TEST];
        data[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        data[4] = 2; // ELFCLASS64
        data[5] = 1; // little endian
        data[6] = 1; // EV_CURRENT
        data
    }

    const SIZEOF_EHDR_TEST: usize = 64;

    #[test]
    fn test_header_roundtrip() {
        let image = ElfImage::new(minimal_elf_bytes()).unwrap();
        let header = image.header().unwrap();
        assert_eq!(&header.e_ident[0..4], &[0x7f, b'E', b'L', b'F']);
    }

    #[test]
    fn test_rejects_non_elf() {
        let data = vec![0u8; 64];
        assert!(ElfImage::new(data).is_err());
    }
}
