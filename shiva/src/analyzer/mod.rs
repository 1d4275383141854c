//
// Shiva ELF interpreter and patch engine
//
//! Disassembles the target's executable mappings and emits branch-site
//! records (spec §4.3b) consumed by the module loader (to resolve external
//! references against target functions) and the trace engine (to know
//! where a hook may legally be installed).
pub mod branch_site;
pub mod disasm;

pub use branch_site::{BranchSite, BranchType};
pub use disasm::analyze;
