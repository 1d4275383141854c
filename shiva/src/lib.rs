//
// Shiva ELF interpreter and patch engine
//
//! Shiva runs as the `PT_INTERP` of a prelinked ELF executable: it userland-
//! execs the target and the real dynamic linker into its own address space,
//! loads a relocatable patch object alongside them, and installs ptrace
//! breakpoints that redirect target callsites into the patch. This crate is
//! the library half shared by the `shiva-ld` prelinker and the `shiva`
//! interpreter binaries.
pub mod analyzer;
pub mod config;
pub mod elf_view;
pub mod error;
pub mod mapping;
pub mod module;
pub mod prelink;
pub mod runtime;
pub mod trace;
pub mod util;
