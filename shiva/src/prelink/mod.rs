//
// Shiva ELF interpreter and patch engine
//
//! Offline ELF rewriting: embeds Shiva's `DT_SHIVA_*` tags and a new
//! `PT_LOAD`/`PT_DYNAMIC` pair into a target executable, and repoints its
//! `PT_INTERP` at the Shiva interpreter so the kernel loads Shiva instead of
//! the original dynamic linker.
pub mod context;
pub mod tags;

mod rewriter;

#[cfg(test)]
mod fixtures;

pub use context::{NewSegment, PrelinkContext};
pub use rewriter::prelink;
