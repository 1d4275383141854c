//
// Shiva ELF interpreter and patch engine
//
use std::arch::asm;

/// Switches the stack pointer to `sp`, zeroes the general-purpose registers
/// the ABI doesn't require a value in, and jumps to `entry` (the real
/// dynamic linker's entry point). Never returns: control passes to the
/// loader, which locates the target via AT_PHDR/AT_ENTRY in the auxv Shiva
/// already built on `sp`.
///
/// # Safety
/// `sp` must point at the top of a valid, fully-populated process stack
/// (argc/argv/envp/auxv already written below it) and `entry` must be a
/// mapped, executable address.
pub unsafe fn enter_loader(entry: u64, sp: u64) -> ! {
    asm!(
        "mov rsp, {sp}",
        "xor rax, rax",
        "xor rbx, rbx",
        "xor rcx, rcx",
        "xor rdx, rdx",
        "xor rsi, rsi",
        "xor rdi, rdi",
        "xor rbp, rbp",
        "jmp {entry}",
        sp = in(reg) sp,
        entry = in(reg) entry,
        options(noreturn)
    );
}
