//
// Shiva ELF interpreter and patch engine
//
//! Userland exec and the live runtime context (spec §3, §4.2).
pub mod arch;
pub mod auxv;
pub mod context;
pub mod thread;
pub mod userland_exec;

pub use auxv::AuxvBuilder;
pub use context::{ImageInfo, RuntimeContext, StackRegion};
pub use thread::{ThreadFlags, TraceThread};
pub use userland_exec::{build_stack, exec, load_image};
