//
// Shiva ELF interpreter and patch engine
//
//! `SHIVA_MODULE_F_RUNTIME` / `SHIVA_MODULE_F_INIT` from the original
//! source's `shiva_module.h` (SPEC_FULL §4 supplemented feature).
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModuleFlags: u32 {
        /// This module provides Shiva's own exported helpers (e.g. the
        /// call-original trampoline) rather than patch code; resolved first
        /// in the external-symbol lookup order.
        const RUNTIME = 0b0000_0001;
        /// Invoke the module's init function once relocation completes.
        const INIT    = 0b0000_0010;
    }
}
