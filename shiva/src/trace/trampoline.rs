//
// Shiva ELF interpreter and patch engine
//
//! The call-original trampoline (spec §4.5, DESIGN NOTES). A thread-local
//! reference to the currently-executing breakpoint is set on handler entry
//! and cleared on exit; `call_original_n` dereferences it to rebuild the
//! original call from the breakpoint's saved displacement/target and
//! invoke it. Re-entrancy at a given call site is serialized with a
//! per-breakpoint lock, matching the original's `SHIVA_HELPER_CALL_EXTERNAL`
//! macro family (`..._ARGS0`..`..._ARGSn`) — reimplemented here as arity-
//! specific functions generated by a local macro, since Rust has no
//! preprocessor.
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::TraceError;
use crate::trace::handler::{CallTarget, TraceBreakpoint};
use crate::trace::patch::CALL_INSN_LEN;

thread_local! {
    static CURRENT_BREAKPOINT: RefCell<Option<TraceBreakpoint>> = const { RefCell::new(None) };
}

/// Set on handler entry, before the hook body runs.
pub fn set_current_breakpoint(bp: TraceBreakpoint) {
    CURRENT_BREAKPOINT.with(|cell| *cell.borrow_mut() = Some(bp));
}

/// Cleared on handler exit, regardless of how the hook body returned.
pub fn clear_current_breakpoint() {
    CURRENT_BREAKPOINT.with(|cell| *cell.borrow_mut() = None);
}

pub fn with_current_breakpoint<R>(f: impl FnOnce(&TraceBreakpoint) -> R) -> Option<R> {
    CURRENT_BREAKPOINT.with(|cell| cell.borrow().as_ref().map(f))
}

fn site_locks() -> &'static Mutex<HashMap<u64, Arc<Mutex<()>>>> {
    static LOCKS: OnceLock<Mutex<HashMap<u64, Arc<Mutex<()>>>>> = OnceLock::new();
    LOCKS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock_for_site(addr: u64) -> Arc<Mutex<()>> {
    let mut map = site_locks().lock().expect("site lock table poisoned");
    map.entry(addr).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
}

fn resolve_original_target(bp: &TraceBreakpoint) -> Result<u64, TraceError> {
    match bp {
        TraceBreakpoint::Call { addr, saved_target, .. } | TraceBreakpoint::Jmp { addr, saved_target, .. } => {
            Ok(match saved_target {
                CallTarget::Absolute(target) => *target,
                CallTarget::Displacement(disp) => (*addr as i64 + CALL_INSN_LEN as i64 + disp) as u64,
            })
        }
        TraceBreakpoint::Int3 { .. } => Err(TraceError::UnknownBreakpointType),
    }
}

macro_rules! call_original_n {
    ($name:ident $(, $arg:ident : $ty:ty)*) => {
        /// # Safety
        /// `bp`'s saved target must be a valid, mapped function entry point
        /// whose calling convention matches the argument list given here.
        pub unsafe fn $name(bp: &TraceBreakpoint $(, $arg: $ty)*) -> Result<u64, TraceError> {
            let target = resolve_original_target(bp)?;
            let site_lock = lock_for_site(bp.addr());
            let _guard = site_lock.lock().expect("per-site trampoline lock poisoned");
            let f: extern "C" fn($($ty),*) -> u64 = std::mem::transmute::<*const c_void, extern "C" fn($($ty),*) -> u64>(target as *const c_void);
            Ok(f($($arg),*))
        }
    };
}

call_original_n!(call_original_0);
call_original_n!(call_original_1, a0: u64);
call_original_n!(call_original_2, a0: u64, a1: u64);
call_original_n!(call_original_3, a0: u64, a1: u64, a2: u64);
call_original_n!(call_original_4, a0: u64, a1: u64, a2: u64, a3: u64);
