//
// Shiva ELF interpreter and patch engine
//
//! Per-subsystem error enums.
//!
//! Each subsystem returns its own `thiserror`-derived enum so that callers can
//! match on failure kind; the `shiva`/`shiva-ld` binaries collapse these into
//! `eyre::Report` at the outer boundary, in `main()`/`run()`.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrelinkError {
    #[error("static ELF unsupported")]
    StaticExecutable,
    #[error("no PT_NOTE segment found after PT_DYNAMIC to repurpose as the new PT_LOAD")]
    MissingNote,
    #[error("new interpreter path ({new_len} bytes) is longer than the original PT_INTERP slot ({orig_len} bytes)")]
    InterpOverflow { new_len: usize, orig_len: usize },
    #[error(".dynamic section header not found")]
    MissingDynamicSection,
    #[error("malformed ELF input: {0}")]
    MalformedElf(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("mmap failed at {addr:#x} (len {len:#x}): {source}")]
    Mmap {
        addr: u64,
        len: usize,
        source: nix::Error,
    },
    #[error("mprotect failed at {addr:#x} (len {len:#x}): {source}")]
    Mprotect {
        addr: u64,
        len: usize,
        source: nix::Error,
    },
    #[error("requested fixed address {addr:#x} conflicts with an existing mapping")]
    FixedAddressConflict { addr: u64 },
    #[error("address {0:#x} is not contained in any tracked mapping")]
    AddressNotMapped(u64),
    #[error("failed to read process memory map: {0}")]
    ProcRead(String),
}

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("malformed patch object: {0}")]
    MalformedObject(String),
    #[error("PLT entry cap of {cap} exceeded while resolving external symbols")]
    PltOverflow { cap: usize },
    #[error("section {name} has neither SHF_EXECINSTR nor SHF_ALLOC: unknown placement attribute")]
    UnknownSectionAttribute { name: String },
    #[error(transparent)]
    Relocation(#[from] RelocationError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum RelocationError {
    #[error("unsupported relocation type {0} for this architecture")]
    UnsupportedType(u32),
    #[error("unresolved external symbol: {0}")]
    UnresolvedSymbol(String),
    #[error("relocation target {0:#x} falls outside any tracked mapping")]
    TargetNotMapped(u64),
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("target ELF has no PT_LOAD segments")]
    NoLoadSegments,
    #[error("target ELF is not an executable or shared object Shiva can run")]
    UnsupportedObjectType,
    #[error("linker image for {0} has no entry point")]
    MissingEntryPoint(String),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Elf(#[from] PrelinkError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("address {0:#x} is not inside an executable mapping")]
    InvalidAddress(u64),
    #[error("failed to change protection at {0:#x}: {1}")]
    ProtectionChangeFailed(u64, #[source] nix::Error),
    #[error("unknown breakpoint type")]
    UnknownBreakpointType,
    #[error("no handler registered for breakpoint type {0:?}")]
    HandlerNotRegistered(crate::trace::handler::BreakpointKind),
    #[error("no breakpoint installed at {0:#x}")]
    NoSuchBreakpoint(u64),
    #[error("ptrace operation failed: {0}")]
    Ptrace(#[from] nix::Error),
}

/// End-of-sequence vs. structural failure, used by the iterator-shaped APIs
/// (`shiva_maps_iterator`, `shiva_callsite_iterator`, `shiva_auxv_iterator` in
/// the original source). Rust's `Iterator` already distinguishes "done" via
/// `None`; `IterError` is reserved for the cases that need to surface a
/// genuine structural problem (truncated table, bad alignment) instead of a
/// clean end-of-sequence.
#[derive(Error, Debug)]
pub enum IterError {
    #[error("truncated or misaligned table at offset {0:#x}")]
    Truncated(usize),
}
