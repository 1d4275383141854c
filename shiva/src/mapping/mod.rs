//
// Shiva ELF interpreter and patch engine
//
//! Authoritative list of this process's memory mappings (spec §4.3): seeded
//! from `/proc/self/maps` at startup, updated on every allocation or
//! protection change Shiva itself performs.
pub mod mapping;
pub mod tracker;

pub use mapping::{Mapping, Origin, Protection};
pub use tracker::MappingTracker;
