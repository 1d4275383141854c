//
// Shiva ELF interpreter and patch engine
//
//! Per-thread bookkeeping for the target process (`shiva_trace_thread_t` in
//! the original source). The runtime context keeps an insertion-ordered list
//! of these, one per thread the trace engine knows about.
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadFlags: u32 {
        /// Currently attached via `PTRACE_ATTACH`.
        const TRACED         = 0b0000_0001;
        /// Stopped pending a trace operation.
        const PAUSED         = 0b0000_0010;
        /// Owned by a tracer outside Shiva (e.g. a debugger already attached).
        const EXTERN_TRACER  = 0b0000_0100;
        /// Mid coredump; breakpoint installation must be deferred.
        const COREDUMPING    = 0b0000_1000;
        /// Discovered since the last thread-list refresh, not yet handled.
        const NEW            = 0b0001_0000;
    }
}

#[derive(Debug, Clone)]
pub struct TraceThread {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub pid: i32,
    pub ppid: i32,
    /// pid of the external tracer, if `EXTERN_TRACER` is set.
    pub external_tracer_pid: Option<i32>,
    pub flags: ThreadFlags,
}

impl TraceThread {
    pub fn new(name: impl Into<String>, pid: i32, ppid: i32, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
            pid,
            ppid,
            external_tracer_pid: None,
            flags: ThreadFlags::NEW,
        }
    }

    pub fn is_traced(&self) -> bool {
        self.flags.contains(ThreadFlags::TRACED)
    }
}
