//
// Shiva ELF interpreter and patch engine
//
//! The prelink algorithm itself: rewrite PT_INTERP, repurpose a PT_NOTE slot
//! as a new PT_LOAD carrying a new PT_DYNAMIC, and point `.dynamic` at it.
//! Ported from `shiva_prelink()` in `tools/shiva-ld/shiva-ld.c`, with the
//! `PT_DYNAMIC`-precedes-`PT_NOTE` assumption kept (see DESIGN.md Open
//! Question).
use std::fs::File;
use std::io::{Read, Write};
use std::mem::size_of;
use std::path::Path;

use goblin::elf64::dynamic::{Dyn, DT_NULL};
use goblin::elf64::program_header::{ProgramHeader, PF_R, PF_W, PF_X, PT_DYNAMIC, PT_INTERP, PT_LOAD, PT_NOTE};
use scroll::Pwrite;

use crate::elf_view::ElfImage;
use crate::error::PrelinkError;
use crate::prelink::context::PrelinkContext;
use crate::prelink::tags::{
    DT_SHIVA_NEEDED, DT_SHIVA_ORIG_INTERP, DT_SHIVA_SEARCH, EI_PAD, NEW_DYN_COUNT, SHIVA_SIGNATURE,
};
use crate::util::math::align_up;

const SEGMENT_ALIGN: u64 = 4096;

/// Runs the full prelink algorithm and writes the result to
/// `ctx.output_exec`, atomically (temp file + rename).
pub fn prelink(ctx: &mut PrelinkContext) -> Result<(), PrelinkError> {
    let mut file = File::open(&ctx.input_exec)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    let orig_file_size = data.len() as u64;

    let mut image = ElfImage::new(data)?;

    let (interp_index, interp_ph) = image
        .program_header_of_type(PT_INTERP)?
        .ok_or_else(|| PrelinkError::MalformedElf("no PT_INTERP segment".to_string()))?;
    let orig_interp_path = image
        .read_cstr(interp_ph.p_offset as usize)
        .ok_or_else(|| PrelinkError::MalformedElf("unterminated PT_INTERP string".to_string()))?
        .to_string();
    ctx.orig_interp_path = orig_interp_path.clone();

    let (dynamic_index, dynamic_ph) = image
        .program_header_of_type(PT_DYNAMIC)?
        .ok_or(PrelinkError::StaticExecutable)?;

    let old_dyn_count = dynamic_ph.p_filesz as usize / size_of::<Dyn>();
    let old_dynamic_entries = image.read_dynamic_array(dynamic_ph.p_offset as usize, old_dyn_count)?;
    let dyn_size = ((old_dyn_count + NEW_DYN_COUNT) * size_of::<Dyn>()) as u64;

    let string_block_len = ctx.search_path.len()
        + 1
        + ctx.input_patch_basename.len()
        + 1
        + orig_interp_path.len()
        + 1;
    let new_segment_size = dyn_size + string_block_len as u64;

    ctx.new_segment.dyn_size = dyn_size;
    ctx.new_segment.search_path_offset = dyn_size;
    ctx.new_segment.needed_offset = dyn_size + ctx.search_path.len() as u64 + 1;
    ctx.new_segment.orig_interp_offset =
        ctx.new_segment.needed_offset + ctx.input_patch_basename.len() as u64 + 1;

    let (last_load_vaddr, last_load_memsz) = find_last_load(&image)?;
    let (note_index, _note_ph) = image
        .program_header_of_type(PT_NOTE)?
        .filter(|_| true)
        .ok_or(PrelinkError::MissingNote)?;

    let new_offset = align_up(orig_file_size, SEGMENT_ALIGN);
    let new_vaddr = align_up(last_load_vaddr + last_load_memsz, SEGMENT_ALIGN);

    ctx.new_segment.offset = new_offset;
    ctx.new_segment.vaddr = new_vaddr;
    ctx.new_segment.filesz = new_segment_size;
    ctx.new_segment.memsz = new_segment_size;

    let new_load_ph = ProgramHeader {
        p_type: PT_LOAD,
        p_flags: PF_R | PF_W | PF_X,
        p_offset: new_offset,
        p_vaddr: new_vaddr,
        p_paddr: new_vaddr,
        p_filesz: new_segment_size,
        p_memsz: new_segment_size,
        p_align: SEGMENT_ALIGN,
    };
    image.write_program_header(note_index, new_load_ph)?;

    let new_dynamic_ph = ProgramHeader {
        p_type: PT_DYNAMIC,
        p_flags: PF_R | PF_W,
        p_offset: new_offset,
        p_vaddr: new_vaddr,
        p_paddr: new_vaddr,
        p_filesz: dyn_size,
        p_memsz: dyn_size,
        p_align: 8,
    };
    image.write_program_header(dynamic_index, new_dynamic_ph)?;

    if let Some((sh_index, mut sh)) = image.dynamic_section()? {
        sh.sh_addr = new_vaddr;
        sh.sh_offset = new_offset;
        sh.sh_size = dyn_size;
        image.write_section_header(sh_index, sh)?;
    } else {
        return Err(PrelinkError::MissingDynamicSection);
    }

    // Overwrite PT_INTERP in place; refuse if the new path doesn't fit.
    image.write_cstr_in_place(
        interp_ph.p_offset as usize,
        &ctx.interp_path,
        interp_ph.p_filesz as usize,
    )?;

    image.data[EI_PAD..EI_PAD + 4].copy_from_slice(&SHIVA_SIGNATURE.to_le_bytes());

    let mut out = Vec::with_capacity(new_offset as usize + new_segment_size as usize);
    out.extend_from_slice(&image.data[..orig_file_size as usize]);
    out.resize(new_offset as usize, 0);

    for d in old_dynamic_entries.iter().filter(|d| d.d_tag != DT_NULL as u64) {
        let pos = out.len();
        out.resize(pos + size_of::<Dyn>(), 0);
        out.pwrite(*d, pos).map_err(elf_write_err)?;
    }
    append_dyn(&mut out, DT_SHIVA_SEARCH, new_vaddr + ctx.new_segment.search_path_offset)?;
    append_dyn(&mut out, DT_SHIVA_NEEDED, new_vaddr + ctx.new_segment.needed_offset)?;
    append_dyn(&mut out, DT_SHIVA_ORIG_INTERP, new_vaddr + ctx.new_segment.orig_interp_offset)?;
    append_dyn(&mut out, DT_NULL as u64, 0)?;

    append_cstr(&mut out, &ctx.search_path);
    append_cstr(&mut out, &ctx.input_patch_basename);
    append_cstr(&mut out, &orig_interp_path);

    write_atomically(&ctx.output_exec, &out)?;

    Ok(())
}

fn find_last_load(image: &ElfImage) -> Result<(u64, u64), PrelinkError> {
    let mut last = None;
    for ph in image.program_headers()? {
        if ph.p_type == PT_LOAD {
            last = Some((ph.p_vaddr, ph.p_memsz));
        }
    }
    last.ok_or_else(|| PrelinkError::MalformedElf("no PT_LOAD segments".to_string()))
}

fn append_dyn(out: &mut Vec<u8>, tag: u64, val: u64) -> Result<(), PrelinkError> {
    let entry = Dyn {
        d_tag: tag,
        d_val: val,
    };
    let pos = out.len();
    out.resize(pos + size_of::<Dyn>(), 0);
    out.pwrite(entry, pos).map_err(elf_write_err)?;
    Ok(())
}

fn append_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

fn elf_write_err(e: scroll::Error) -> PrelinkError {
    PrelinkError::MalformedElf(e.to_string())
}

/// Writes `data` to a temp file next to `path` then renames it into place,
/// so a failed write never clobbers an existing file at `path`.
fn write_atomically(path: &Path, data: &[u8]) -> Result<(), PrelinkError> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path)
        .map_err(|e| PrelinkError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prelink::fixtures::build_dynamic_executable;

    #[test]
    fn test_prelink_produces_signature_and_tags() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("hello");
        std::fs::write(&input_path, build_dynamic_executable("/lib64/ld-linux-x86-64.so.2")).unwrap();

        let output_path = dir.path().join("hello.shiva");
        let mut ctx = PrelinkContext::new(
            input_path,
            "noop.o".to_string(),
            "/opt/shiva/modules".to_string(),
            "/lib/shiva".to_string(),
            output_path.clone(),
        );

        prelink(&mut ctx).unwrap();

        let out_bytes = std::fs::read(&output_path).unwrap();
        let image = ElfImage::new(out_bytes).unwrap();
        let header = image.header().unwrap();
        assert_eq!(
            u32::from_le_bytes(header.e_ident[EI_PAD..EI_PAD + 4].try_into().unwrap()),
            SHIVA_SIGNATURE
        );

        let (_, interp_ph) = image.program_header_of_type(PT_INTERP).unwrap().unwrap();
        assert_eq!(image.read_cstr(interp_ph.p_offset as usize), Some("/lib/shiva"));

        let (_, dyn_ph) = image.program_header_of_type(PT_DYNAMIC).unwrap().unwrap();
        let entries = image
            .read_dynamic_array(dyn_ph.p_offset as usize, dyn_ph.p_filesz as usize / size_of::<Dyn>())
            .unwrap();
        let tags: Vec<u64> = entries.iter().map(|d| d.d_tag).collect();
        assert_eq!(
            &tags[tags.len() - 4..],
            &[DT_SHIVA_SEARCH, DT_SHIVA_NEEDED, DT_SHIVA_ORIG_INTERP, DT_NULL as u64]
        );
        assert_eq!(ctx.orig_interp_path, "/lib64/ld-linux-x86-64.so.2");
    }

    #[test]
    fn test_prelink_rejects_static_executable() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("static_bin");
        std::fs::write(&input_path, build_dynamic_executable_without_dynamic()).unwrap();

        let mut ctx = PrelinkContext::new(
            input_path,
            "noop.o".to_string(),
            "/opt/shiva/modules".to_string(),
            "/lib/shiva".to_string(),
            dir.path().join("out"),
        );

        let err = prelink(&mut ctx).unwrap_err();
        assert!(matches!(err, PrelinkError::StaticExecutable));
    }

    #[test]
    fn test_prelink_rejects_interp_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("hello");
        std::fs::write(&input_path, build_dynamic_executable("/lib64/ld-linux-x86-64.so.2")).unwrap();

        let mut ctx = PrelinkContext::new(
            input_path,
            "noop.o".to_string(),
            "/opt/shiva/modules".to_string(),
            "/a/much/longer/interpreter/path/than/the/original/ld-so".to_string(),
            dir.path().join("out"),
        );

        let err = prelink(&mut ctx).unwrap_err();
        assert!(matches!(err, PrelinkError::InterpOverflow { .. }));
    }

    fn build_dynamic_executable_without_dynamic() -> Vec<u8> {
        use scroll::Pread;

        let mut bytes = build_dynamic_executable("/lib64/ld-linux-x86-64.so.2");
        // Corrupt the PT_DYNAMIC header's type in-place so no dynamic segment is found.
        let image = ElfImage::new(bytes.clone()).unwrap();
        let header = image.header().unwrap();
        for i in 0..header.e_phnum as usize {
            let off = header.e_phoff as usize + i * goblin::elf64::program_header::SIZEOF_PHDR;
            let ph: ProgramHeader = bytes.pread(off).unwrap();
            if ph.p_type == PT_DYNAMIC {
                let mut corrupted = ph;
                corrupted.p_type = 0x6fffffff; // arbitrary non-PT_DYNAMIC value
                bytes.pwrite(corrupted, off).unwrap();
            }
        }
        bytes
    }
}
