//
// Shiva ELF interpreter and patch engine
//
//! Orchestrates loading one relocatable patch object: partitions its
//! loadable sections into text/data segments, reserves page-aligned
//! mappings for them, copies section bytes in, resolves every relocation,
//! and finalizes protections (spec §4.4).
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::analyzer::BranchSite;
use crate::elf_view::section_header::{SectionHeader, SHF_ALLOC, SHF_EXECINSTR, SHF_WRITE, SHT_NOBITS, SHT_RELA, SHT_SYMTAB};
use crate::elf_view::{read_relas, read_syms, ElfImage};
use crate::error::LoaderError;
use crate::mapping::tracker::MappingTracker;
use crate::mapping::mapping::Protection;
use crate::module::flags::ModuleFlags;
use crate::module::got::GotTable;
use crate::module::image::{ModuleImage, Segment, SectionPlacement, SegmentKind};
use crate::module::plt::PltTable;
use crate::module::reloc::{apply, classify, SymbolResolver, Width};
use crate::util::math::align_up;

const SEGMENT_ALIGN: u64 = 4096;

pub struct LoadRequest<'a> {
    pub path: &'a Path,
    pub text_base: u64,
    pub data_base: u64,
    pub plt_base: u64,
    pub got_base: u64,
    pub flags: ModuleFlags,
    pub shiva_exports: &'a HashMap<String, u64>,
    pub target_dynsyms: &'a HashMap<String, u64>,
    pub branch_sites: &'a [BranchSite],
}

pub fn load(req: LoadRequest, tracker: &mut MappingTracker) -> Result<ModuleImage, LoaderError> {
    let mut file = File::open(req.path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    let image = ElfImage::new(data).map_err(|e| LoaderError::MalformedObject(e.to_string()))?;

    let header = image.header().map_err(|e| LoaderError::MalformedObject(e.to_string()))?;
    let sections = image.section_headers().map_err(|e| LoaderError::MalformedObject(e.to_string()))?;

    let mut placements = Vec::new();
    let mut text_cursor = 0u64;
    let mut data_cursor = 0u64;

    for (index, sh) in sections.iter().enumerate() {
        if sh.sh_flags & SHF_ALLOC as u64 == 0 || sh.sh_size == 0 {
            continue;
        }
        let name = format!("section{index}");
        if sh.sh_flags & SHF_EXECINSTR as u64 != 0 {
            text_cursor = align_up(text_cursor, sh.sh_addralign.max(1));
            placements.push(SectionPlacement {
                section_index: index,
                name,
                segment: SegmentKind::Text,
                vaddr: req.text_base + text_cursor,
                offset_in_segment: text_cursor,
                size: sh.sh_size,
            });
            text_cursor += sh.sh_size;
        } else if sh.sh_flags & SHF_WRITE as u64 != 0 || sh.sh_type == SHT_NOBITS {
            data_cursor = align_up(data_cursor, sh.sh_addralign.max(1));
            placements.push(SectionPlacement {
                section_index: index,
                name,
                segment: SegmentKind::Data,
                vaddr: req.data_base + data_cursor,
                offset_in_segment: data_cursor,
                size: sh.sh_size,
            });
            data_cursor += sh.sh_size;
        } else {
            return Err(LoaderError::UnknownSectionAttribute {
                name: format!("section{index}"),
            });
        }
    }

    let text_size = align_up(text_cursor, SEGMENT_ALIGN).max(SEGMENT_ALIGN);
    let data_size = align_up(data_cursor, SEGMENT_ALIGN).max(SEGMENT_ALIGN);

    tracker.mmap_fixed(req.text_base, text_size as usize, Protection::READ | Protection::WRITE)?;
    tracker.mmap_fixed(req.data_base, data_size as usize, Protection::READ | Protection::WRITE)?;

    let mut text = Segment {
        vaddr: req.text_base,
        bytes: vec![0u8; text_size as usize],
    };
    let mut data_seg = Segment {
        vaddr: req.data_base,
        bytes: vec![0u8; data_size as usize],
    };

    for p in &placements {
        let sh = &sections[p.section_index];
        if sh.sh_type == SHT_NOBITS {
            continue; // .bss: zero-fill, nothing to copy from the file.
        }
        let src = &image.data[sh.sh_offset as usize..(sh.sh_offset + sh.sh_size) as usize];
        let dst = match p.segment {
            SegmentKind::Text => &mut text.bytes,
            SegmentKind::Data => &mut data_seg.bytes,
        };
        let off = p.offset_in_segment as usize;
        dst[off..off + src.len()].copy_from_slice(src);
    }

    let mut module = ModuleImage {
        path: req.path.to_path_buf(),
        text,
        data: data_seg,
        sections: placements,
        plt: PltTable::new(req.plt_base),
        got: GotTable::new(req.got_base),
        flags: req.flags,
        init_addr: None,
        exports: HashMap::new(),
    };

    let resolver = SymbolResolver {
        shiva_exports: req.shiva_exports,
        target_dynsyms: req.target_dynsyms,
        branch_sites: req.branch_sites,
    };

    for (sh_index, sh) in sections.iter().enumerate() {
        if sh.sh_type != SHT_RELA {
            continue;
        }
        let target_section_index = sh.sh_info as usize;
        let symtab_index = sh.sh_link as usize;
        let symtab_sh = sections
            .get(symtab_index)
            .ok_or_else(|| LoaderError::MalformedObject(format!("relocation section {sh_index} has invalid sh_link")))?;
        let strtab_sh = sections
            .get(symtab_sh.sh_link as usize)
            .ok_or_else(|| LoaderError::MalformedObject("symbol table has invalid sh_link".to_string()))?;

        let sym_count = symtab_sh.sh_size as usize / std::mem::size_of::<crate::elf_view::sym::Sym>();
        let syms = read_syms(&image.data, symtab_sh.sh_offset as usize, sym_count)
            .map_err(|e| LoaderError::MalformedObject(e.to_string()))?;

        let relas = read_relas(&image.data, sh.sh_offset as usize, sh.sh_size as usize)
            .map_err(|e| LoaderError::MalformedObject(e.to_string()))?;

        let placement = module
            .sections
            .iter()
            .find(|p| p.section_index == target_section_index)
            .cloned()
            .ok_or_else(|| LoaderError::MalformedObject(format!("relocation targets unplaced section {target_section_index}")))?;

        for rela in relas {
            let r_sym = (rela.r_info >> 32) as usize;
            let r_type = (rela.r_info & 0xffff_ffff) as u32;
            let sym = syms
                .get(r_sym)
                .ok_or_else(|| LoaderError::MalformedObject(format!("relocation references out-of-range symbol {r_sym}")))?;

            let width = classify(r_type)?;
            let site_offset = placement.offset_in_segment as usize + rela.r_offset as usize;
            let pc = placement.vaddr + rela.r_offset;
            let buf = match placement.segment {
                SegmentKind::Text => &mut module.text.bytes,
                SegmentKind::Data => &mut module.data.bytes,
            };

            let value = if sym.st_shndx == 0 {
                let name = image
                    .read_cstr(strtab_sh.sh_offset as usize + sym.st_name as usize)
                    .ok_or_else(|| LoaderError::MalformedObject("unterminated symbol name".to_string()))?;
                match resolver.resolve_external(name) {
                    Some(addr) => addr,
                    None => return Err(LoaderError::Relocation(crate::error::RelocationError::UnresolvedSymbol(name.to_string()))),
                }
            } else {
                module
                    .sections
                    .iter()
                    .find(|p| p.section_index == sym.st_shndx as usize)
                    .map(|p| (p.vaddr as i64 + sym.st_value as i64 + rela.r_addend) as u64)
                    .ok_or_else(|| LoaderError::MalformedObject("internal relocation to unplaced section".to_string()))?
            };

            match width {
                Width::Abs64 => apply(buf, site_offset, width, value, pc)?,
                Width::Pc32 | Width::Arm64Branch26 => {
                    if sym.st_shndx == 0 {
                        let name = image
                            .read_cstr(strtab_sh.sh_offset as usize + sym.st_name as usize)
                            .unwrap_or("");
                        let entry = module.plt.get_or_allocate(name)?.clone();
                        let idx = module.plt.iter().position(|e| e.symbol == entry.symbol).unwrap();
                        module.got.set(idx, value);
                        apply(buf, site_offset, width, entry.vaddr, pc)?;
                    } else {
                        apply(buf, site_offset, width, value, pc)?;
                    }
                }
            }
        }
    }

    module.exports = collect_exports(&image, &sections, &module)?;
    if module.flags.contains(ModuleFlags::INIT) {
        module.init_addr = module.exports.get(INIT_SYMBOL_NAME).copied();
    }

    let _ = header;
    tracker.reprotect(req.text_base, text_size as usize, Protection::READ | Protection::EXEC)?;
    tracker.reprotect(req.data_base, data_size as usize, Protection::READ | Protection::WRITE)?;

    Ok(module)
}

/// Name the interpreter looks for among a module's exports to find its init
/// function.
const INIT_SYMBOL_NAME: &str = "shiva_module_init";

/// Scans the module's own symbol table for every defined (non-`SHN_UNDEF`)
/// named symbol and resolves each to an absolute address via the section
/// it's defined in. A patch function is exported under the name of the
/// target function it replaces, so this doubles as the lookup the
/// interpreter uses to match a call site's symbol to its replacement.
fn collect_exports(
    image: &ElfImage,
    sections: &[SectionHeader],
    module: &ModuleImage,
) -> Result<HashMap<String, u64>, LoaderError> {
    let mut exports = HashMap::new();
    for symtab_sh in sections.iter().filter(|sh| sh.sh_type == SHT_SYMTAB) {
        let strtab_sh = sections
            .get(symtab_sh.sh_link as usize)
            .ok_or_else(|| LoaderError::MalformedObject("symbol table has invalid sh_link".to_string()))?;
        let sym_count = symtab_sh.sh_size as usize / std::mem::size_of::<crate::elf_view::sym::Sym>();
        let syms = read_syms(&image.data, symtab_sh.sh_offset as usize, sym_count)
            .map_err(|e| LoaderError::MalformedObject(e.to_string()))?;
        for sym in syms {
            if sym.st_shndx == 0 || sym.st_name == 0 {
                continue;
            }
            let name = image.read_cstr(strtab_sh.sh_offset as usize + sym.st_name as usize);
            let Some(name) = name else { continue };
            let addr = module
                .sections
                .iter()
                .find(|p| p.section_index == sym.st_shndx as usize)
                .map(|p| p.vaddr + sym.st_value);
            if let Some(addr) = addr {
                exports.insert(name.to_string(), addr);
            }
        }
    }
    Ok(exports)
}
