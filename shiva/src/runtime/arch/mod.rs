//
// Shiva ELF interpreter and patch engine
//
//! Per-architecture "enter loader" shim (DESIGN NOTES: the inline stack-swap
//! trampoline at the end of userland-exec is inherently architecture-specific
//! and belongs behind one operation: enter the loader at `entry` with stack
//! pointer `sp` and clean registers). Mirrors the `cfg_if!`-per-`target_arch`
//! dispatch `arch.rs` uses for `ElfGRegSet`/`get_stack_pointer`.
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use self::x86_64::enter_loader;
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub use self::aarch64::enter_loader;
    } else {
        /// No architecture shim available; callers must not reach this path
        /// on unsupported targets (the prelinker and module loader already
        /// restrict themselves to aarch64/x86_64 ELF machine types).
        pub unsafe fn enter_loader(_entry: u64, _sp: u64) -> ! {
            panic!("userland exec is only supported on aarch64 and x86_64");
        }
    }
}
