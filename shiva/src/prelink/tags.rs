//
// Shiva ELF interpreter and patch engine
//
//! Custom `DT_SHIVA_*` dynamic tags, drawn from the `DT_LOOS`-relative
//! OS-specific range (`SHIVA_DT_NEEDED`/`SHIVA_DT_SEARCH`/
//! `SHIVA_DT_ORIG_INTERP` in the original source).
use goblin::elf64::dynamic::DT_LOOS;

pub const DT_SHIVA_SEARCH: u64 = DT_LOOS + 11;
pub const DT_SHIVA_NEEDED: u64 = DT_LOOS + 10;
pub const DT_SHIVA_ORIG_INTERP: u64 = DT_LOOS + 12;

/// Number of non-terminator entries Shiva appends to the dynamic array.
pub const NEW_DYN_COUNT: usize = 3;

/// 32-bit magic value written into the ELF identification padding bytes
/// (`EI_PAD`) to mark an executable as Shiva-prelinked (`SHIVA_SIGNATURE` in
/// the original source).
pub const SHIVA_SIGNATURE: u32 = 0x0003_1f64;

/// Offset of `EI_PAD` within `e_ident`.
pub const EI_PAD: usize = 9;
