//
// Shiva ELF interpreter and patch engine
//
//! The trace/hook engine (spec §4.5): ptrace plumbing, breakpoint
//! installation bookkeeping, instruction patch encode/decode, and the
//! call-original trampoline.
pub mod breakpoint;
pub mod handler;
pub mod patch;
pub mod ptrace;
pub mod trampoline;

pub use breakpoint::{register_handler, set_breakpoint};
pub use handler::{BreakpointKind, CallTarget, HandlerFn, InsnBytes, TraceBreakpoint, TraceHandler};
pub use ptrace::{read_memory, trace, write_memory, TraceOp, TraceResult};
pub use trampoline::{
    call_original_0, call_original_1, call_original_2, call_original_3, call_original_4,
    clear_current_breakpoint, set_current_breakpoint, with_current_breakpoint,
};
