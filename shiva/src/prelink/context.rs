//
// Shiva ELF interpreter and patch engine
//
use std::path::PathBuf;

/// Coordinates of the new segment being synthesized, computed while walking
/// the program headers (`shiva_prelink_ctx::new_segment` in the original
/// source).
#[derive(Debug, Default, Clone, Copy)]
pub struct NewSegment {
    pub vaddr: u64,
    pub offset: u64,
    pub filesz: u64,
    pub memsz: u64,
    /// Size in bytes of the new dynamic array (old entries + 3 + terminator).
    pub dyn_size: u64,
    /// Offset of the search-path string within the new segment.
    pub search_path_offset: u64,
    /// Offset of the patch-basename string within the new segment.
    pub needed_offset: u64,
    /// Offset of the original-interpreter string within the new segment.
    pub orig_interp_offset: u64,
}

/// Input and derived state for one prelink operation.
pub struct PrelinkContext {
    pub input_exec: PathBuf,
    pub input_patch_basename: String,
    pub search_path: String,
    pub interp_path: String,
    pub output_exec: PathBuf,

    pub orig_interp_path: String,
    pub new_segment: NewSegment,
}

impl PrelinkContext {
    pub fn new(
        input_exec: PathBuf,
        input_patch_basename: String,
        search_path: String,
        interp_path: String,
        output_exec: PathBuf,
    ) -> Self {
        Self {
            input_exec,
            input_patch_basename,
            search_path,
            interp_path,
            output_exec,
            orig_interp_path: String::new(),
            new_segment: NewSegment::default(),
        }
    }
}
