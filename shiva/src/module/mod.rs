//
// Shiva ELF interpreter and patch engine
//
//! Loads a relocatable patch object into the current process (spec §4.4):
//! section placement, PLT/GOT construction, and relocation resolution
//! against Shiva's own exports, the target's dynamic symbols, and symbols
//! the callsite analyzer discovered.
pub mod flags;
pub mod got;
pub mod image;
pub mod loader;
pub mod plt;
pub mod reloc;

pub use flags::ModuleFlags;
pub use image::ModuleImage;
pub use loader::{load, LoadRequest};
