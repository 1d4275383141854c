//
// Shiva ELF interpreter and patch engine
//
//! Breakpoint installation orchestration (spec §4.5
//! `register_handler`/`set_breakpoint`). `set_breakpoint` is the piece that
//! actually turns a `BranchSite` into a live interception: validate the site
//! is inside an executable mapping, snapshot the bytes it's about to
//! overwrite, encode the replacement, write it, and append the resulting
//! `TraceBreakpoint` to the handler's list.
use nix::unistd::Pid;

use crate::mapping::mapping::Protection;
use crate::runtime::RuntimeContext;
use crate::trace::handler::{BreakpointKind, CallTarget, HandlerFn, InsnBytes, TraceBreakpoint, TraceHandler};
use crate::trace::patch::{self, CALL_INSN_LEN, INT3_INSN_LEN, JMP_INSN_LEN};
use crate::trace::ptrace::{read_memory, write_memory};
use crate::error::TraceError;

/// Associates `handler` with `kind`, or no-ops if a handler of that kind is
/// already registered (spec §4.5 "record an association between a handler
/// and a breakpoint type").
pub fn register_handler(ctx: &mut RuntimeContext, kind: BreakpointKind, handler: HandlerFn) {
    if ctx.handler_for(kind).is_some() {
        return;
    }
    ctx.trace_handlers.push(TraceHandler::new(kind, handler));
}

/// Installs a breakpoint of `kind` at `addr`, redirecting it to
/// `replacement_target` (spec §4.5 `set_breakpoint(fn, addr)`): validates
/// `addr` is inside an executable mapping, records the original bytes,
/// computes and writes the replacement bytes, then appends the breakpoint
/// record to the registered handler's list.
pub fn set_breakpoint(
    ctx: &mut RuntimeContext,
    pid: Pid,
    kind: BreakpointKind,
    addr: u64,
    replacement_target: u64,
    symbol: Option<String>,
) -> Result<(), TraceError> {
    // Fail before touching the target at all if nothing would ever consume
    // this breakpoint (spec §4.5 failure mode: "no handler registered").
    if ctx.handler_for(kind).is_none() {
        return Err(TraceError::HandlerNotRegistered(kind));
    }

    let prot = ctx
        .tracker
        .protection_at(addr)
        .ok_or(TraceError::InvalidAddress(addr))?;
    if !prot.contains(Protection::EXEC) {
        return Err(TraceError::InvalidAddress(addr));
    }

    let insn_len = match kind {
        BreakpointKind::Call => CALL_INSN_LEN,
        BreakpointKind::Jmp => JMP_INSN_LEN,
        BreakpointKind::Int3 => INT3_INSN_LEN,
    };
    let original_bytes = read_memory(pid, addr, insn_len)?;

    let bp = match kind {
        BreakpointKind::Call | BreakpointKind::Jmp => {
            let saved_target = patch::decode_rel32_target(addr, &original_bytes)
                .map(CallTarget::Absolute)
                .ok_or(TraceError::InvalidAddress(addr))?;
            let replacement_bytes = if kind == BreakpointKind::Call {
                patch::encode_call(addr, replacement_target)
            } else {
                patch::encode_jmp(addr, replacement_target)
            };
            write_memory(pid, addr, &replacement_bytes, &mut ctx.tracker)?;
            let retaddr = addr + insn_len as u64;
            if kind == BreakpointKind::Call {
                TraceBreakpoint::Call {
                    addr,
                    original: InsnBytes(original_bytes),
                    replacement: InsnBytes(replacement_bytes),
                    saved_target,
                    symbol,
                    retaddr,
                }
            } else {
                TraceBreakpoint::Jmp {
                    addr,
                    original: InsnBytes(original_bytes),
                    replacement: InsnBytes(replacement_bytes),
                    saved_target,
                    symbol,
                    retaddr,
                }
            }
        }
        BreakpointKind::Int3 => {
            let replacement_byte = patch::encode_int3();
            write_memory(pid, addr, &[replacement_byte], &mut ctx.tracker)?;
            TraceBreakpoint::Int3 {
                addr,
                original_byte: original_bytes[0],
            }
        }
    };

    let handler = ctx
        .handler_for_mut(kind)
        .ok_or(TraceError::HandlerNotRegistered(kind))?;
    handler.install(bp)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::MappingError;
    use crate::mapping::tracker::{MappingTracker, SelfMaps};
    use crate::mapping::{Mapping, Origin};

    fn noop(_pid: i32, _bp: &TraceBreakpoint) -> Result<(), TraceError> {
        Ok(())
    }

    struct NoExecMaps;
    impl SelfMaps for NoExecMaps {
        fn read(&self) -> Result<Vec<Mapping>, MappingError> {
            Ok(vec![Mapping::new(0x401000, 0x1000, Protection::READ | Protection::WRITE, Origin::Observed)])
        }
    }

    #[test]
    fn test_set_breakpoint_rejects_non_executable_address() {
        let tracker = MappingTracker::from_self_maps(&NoExecMaps).unwrap();
        let mut ctx = RuntimeContext::new(tracker);
        register_handler(&mut ctx, BreakpointKind::Call, noop);
        let err = set_breakpoint(&mut ctx, Pid::this(), BreakpointKind::Call, 0x401000, 0x500000, None)
            .unwrap_err();
        assert!(matches!(err, TraceError::InvalidAddress(0x401000)));
    }

    #[test]
    fn test_set_breakpoint_requires_registered_handler() {
        struct ExecMaps;
        impl SelfMaps for ExecMaps {
            fn read(&self) -> Result<Vec<Mapping>, MappingError> {
                Ok(vec![Mapping::new(0x401000, 0x1000, Protection::READ | Protection::EXEC, Origin::Observed)])
            }
        }
        let tracker = MappingTracker::from_self_maps(&ExecMaps).unwrap();
        let mut ctx = RuntimeContext::new(tracker);
        // No handler registered for BreakpointKind::Jmp: must fail before
        // ever touching ptrace, since the target's kind has no consumer.
        let err = set_breakpoint(&mut ctx, Pid::this(), BreakpointKind::Jmp, 0x401000, 0x500000, None);
        assert!(err.is_err());
    }

    #[test]
    fn test_register_handler_is_idempotent_per_kind() {
        let tracker = MappingTracker::from_self_maps(&NoExecMaps).unwrap();
        let mut ctx = RuntimeContext::new(tracker);
        register_handler(&mut ctx, BreakpointKind::Int3, noop);
        register_handler(&mut ctx, BreakpointKind::Int3, noop);
        assert_eq!(ctx.trace_handlers.len(), 1);
    }
}
