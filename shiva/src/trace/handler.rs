//
// Shiva ELF interpreter and patch engine
//
//! Breakpoint records and handlers (spec §4.5, §3). DESIGN NOTES: tagged
//! variants replace the source's single struct with conditionally-valid
//! fields — a `Call`/`Jmp` breakpoint carries the saved branch target used
//! to rebuild the original call; an `Int3` breakpoint only needs the one
//! byte it overwrote.
use crate::error::TraceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointKind {
    Call,
    Jmp,
    Int3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsnBytes(pub Vec<u8>);

impl InsnBytes {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What a `call`/`jmp` breakpoint overwrote: the original branch's
/// displacement (if it was a direct, PC-relative branch) or its resolved
/// absolute target (if it had already been resolved, e.g. written by the
/// module loader's relocation pass).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    Absolute(u64),
    Displacement(i64),
}

#[derive(Debug, Clone)]
pub enum TraceBreakpoint {
    Call {
        addr: u64,
        original: InsnBytes,
        replacement: InsnBytes,
        saved_target: CallTarget,
        symbol: Option<String>,
        retaddr: u64,
    },
    Jmp {
        addr: u64,
        original: InsnBytes,
        replacement: InsnBytes,
        saved_target: CallTarget,
        symbol: Option<String>,
        retaddr: u64,
    },
    Int3 {
        addr: u64,
        original_byte: u8,
    },
}

impl TraceBreakpoint {
    pub fn addr(&self) -> u64 {
        match self {
            TraceBreakpoint::Call { addr, .. } => *addr,
            TraceBreakpoint::Jmp { addr, .. } => *addr,
            TraceBreakpoint::Int3 { addr, .. } => *addr,
        }
    }

    pub fn kind(&self) -> BreakpointKind {
        match self {
            TraceBreakpoint::Call { .. } => BreakpointKind::Call,
            TraceBreakpoint::Jmp { .. } => BreakpointKind::Jmp,
            TraceBreakpoint::Int3 { .. } => BreakpointKind::Int3,
        }
    }

    /// Restores the bytes the breakpoint overwrote, as required by spec
    /// invariant: "after restoration it contains them again".
    pub fn original_bytes(&self) -> Vec<u8> {
        match self {
            TraceBreakpoint::Call { original, .. } => original.0.clone(),
            TraceBreakpoint::Jmp { original, .. } => original.0.clone(),
            TraceBreakpoint::Int3 { original_byte, .. } => vec![*original_byte],
        }
    }
}

pub type HandlerFn = fn(pid: i32, bp: &TraceBreakpoint) -> Result<(), TraceError>;

/// An installed handler, together with the live breakpoints using it
/// (spec §3 "Trace handler").
pub struct TraceHandler {
    pub kind: BreakpointKind,
    pub handler: HandlerFn,
    pub breakpoints: Vec<TraceBreakpoint>,
}

impl TraceHandler {
    pub fn new(kind: BreakpointKind, handler: HandlerFn) -> Self {
        Self {
            kind,
            handler,
            breakpoints: Vec::new(),
        }
    }

    pub fn install(&mut self, bp: TraceBreakpoint) -> Result<(), TraceError> {
        if bp.kind() != self.kind {
            return Err(TraceError::UnknownBreakpointType);
        }
        self.breakpoints.push(bp);
        Ok(())
    }

    pub fn find(&self, addr: u64) -> Option<&TraceBreakpoint> {
        self.breakpoints.iter().find(|bp| bp.addr() == addr)
    }

    pub fn remove(&mut self, addr: u64) -> Result<TraceBreakpoint, TraceError> {
        let index = self
            .breakpoints
            .iter()
            .position(|bp| bp.addr() == addr)
            .ok_or(TraceError::NoSuchBreakpoint(addr))?;
        Ok(self.breakpoints.remove(index))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn noop(_pid: i32, _bp: &TraceBreakpoint) -> Result<(), TraceError> {
        Ok(())
    }

    #[test]
    fn test_install_rejects_mismatched_kind() {
        let mut handler = TraceHandler::new(BreakpointKind::Call, noop);
        let err = handler
            .install(TraceBreakpoint::Int3 {
                addr: 0x1000,
                original_byte: 0x90,
            })
            .unwrap_err();
        assert!(matches!(err, TraceError::UnknownBreakpointType));
    }

    #[test]
    fn test_install_find_remove_roundtrip() {
        let mut handler = TraceHandler::new(BreakpointKind::Int3, noop);
        handler
            .install(TraceBreakpoint::Int3 {
                addr: 0x2000,
                original_byte: 0x55,
            })
            .unwrap();
        assert!(handler.find(0x2000).is_some());
        let removed = handler.remove(0x2000).unwrap();
        assert_eq!(removed.original_bytes(), vec![0x55]);
        assert!(handler.find(0x2000).is_none());
    }

    #[test]
    fn test_remove_missing_breakpoint_errors() {
        let mut handler = TraceHandler::new(BreakpointKind::Int3, noop);
        let err = handler.remove(0x3000).unwrap_err();
        assert!(matches!(err, TraceError::NoSuchBreakpoint(0x3000)));
    }
}
