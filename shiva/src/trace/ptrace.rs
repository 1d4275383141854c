//
// Shiva ELF interpreter and patch engine
//
//! Thin wrapper over `nix::sys::ptrace`, modeled as a `TraceOp` enum
//! (SPEC_FULL §4: `shiva_trace`'s operation set beyond the prose
//! description — `CONT`/`ATTACH`/`POKE`/`PEEK`/`GETREGS`/`SETREGS`/
//! `SETFPREGS`/`GETSIGINFO`/`SETSIGINFO`). `trace()` is the single entry
//! point spec §4.5 calls out (`trace(pid, op, ...)`); `write_memory` is the
//! separate `shiva_trace_write` contract.
use libc::user_regs_struct;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::error::TraceError;
use crate::mapping::mapping::Protection;
use crate::mapping::tracker::MappingTracker;

#[derive(Debug, Clone, Copy)]
pub enum TraceOp {
    Attach,
    Cont(Option<Signal>),
    Peek { addr: u64 },
    Poke { addr: u64, value: i64 },
    GetRegs,
    SetRegs(user_regs_struct),
    SetFpRegs(libc::user_fpregs_struct),
    GetSigInfo,
    SetSigInfo(libc::siginfo_t),
}

#[derive(Debug)]
pub enum TraceResult {
    Unit,
    Word(i64),
    Regs(user_regs_struct),
    SigInfo(libc::siginfo_t),
}

/// Dispatches one trace operation against `pid`, translating `nix::Error`
/// into `TraceError::Ptrace`.
pub fn trace(pid: Pid, op: TraceOp) -> Result<TraceResult, TraceError> {
    match op {
        TraceOp::Attach => {
            ptrace::attach(pid)?;
            Ok(TraceResult::Unit)
        }
        TraceOp::Cont(sig) => {
            ptrace::cont(pid, sig)?;
            Ok(TraceResult::Unit)
        }
        TraceOp::Peek { addr } => {
            let word = ptrace::read(pid, addr as ptrace::AddressType)?;
            Ok(TraceResult::Word(word))
        }
        TraceOp::Poke { addr, value } => {
            unsafe {
                ptrace::write(pid, addr as ptrace::AddressType, value as *mut std::ffi::c_void)?;
            }
            Ok(TraceResult::Unit)
        }
        TraceOp::GetRegs => {
            let regs = ptrace::getregs(pid)?;
            Ok(TraceResult::Regs(regs))
        }
        TraceOp::SetRegs(regs) => {
            ptrace::setregs(pid, regs)?;
            Ok(TraceResult::Unit)
        }
        TraceOp::SetFpRegs(mut regs) => {
            unsafe {
                ptrace::ptrace(
                    ptrace::Request::PTRACE_SETFPREGS,
                    pid,
                    std::ptr::null_mut(),
                    &mut regs as *mut _ as *mut std::ffi::c_void,
                )?;
            }
            Ok(TraceResult::Unit)
        }
        TraceOp::GetSigInfo => {
            let info = ptrace::getsiginfo(pid)?;
            Ok(TraceResult::SigInfo(info))
        }
        TraceOp::SetSigInfo(info) => {
            ptrace::setsiginfo(pid, &info)?;
            Ok(TraceResult::Unit)
        }
    }
}

/// Reads `len` bytes from `pid`'s address space at `addr`, word at a time.
/// Read-only: never writes, so no protection change or zero-fill concerns
/// apply (contrast `write_memory` below).
pub fn read_memory(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>, TraceError> {
    let mut out = Vec::with_capacity(len);
    let mut offset = 0usize;
    while offset < len {
        let word = match trace(pid, TraceOp::Peek { addr: addr + offset as u64 })? {
            TraceResult::Word(w) => w,
            _ => unreachable!("Peek always returns TraceResult::Word"),
        };
        let bytes = word.to_ne_bytes();
        let take = (len - offset).min(8);
        out.extend_from_slice(&bytes[..take]);
        offset += 8;
    }
    Ok(out)
}

/// Writes `buf` into `pid`'s address space at `addr`, temporarily making
/// the containing mapping writable if it wasn't, and restoring its
/// original protection afterward (spec §4.5 `write(pid, addr, buf, len)`).
pub fn write_memory(
    pid: Pid,
    addr: u64,
    buf: &[u8],
    tracker: &mut MappingTracker,
) -> Result<(), TraceError> {
    let original_prot = tracker
        .protection_at(addr)
        .ok_or(TraceError::InvalidAddress(addr))?;

    let needs_unlock = !original_prot.contains(Protection::WRITE);
    if needs_unlock {
        tracker
            .reprotect(addr, buf.len().max(1), original_prot | Protection::WRITE)
            .map_err(|e| TraceError::ProtectionChangeFailed(addr, protection_error_source(e)))?;
    }

    for (i, word) in buf.chunks(8).enumerate() {
        let word_addr = addr + (i as u64) * 8;
        let value = if word.len() == 8 {
            i64::from_ne_bytes(word.try_into().expect("chunk of 8 bytes"))
        } else {
            // Partial tail chunk: peek the word that's already there and
            // overlay just the bytes we're writing, so the untouched tail
            // bytes past addr+len survive instead of being zeroed.
            let existing = match trace(pid, TraceOp::Peek { addr: word_addr })? {
                TraceResult::Word(w) => w,
                _ => unreachable!("Peek always returns TraceResult::Word"),
            };
            let mut merged = existing.to_ne_bytes();
            merged[..word.len()].copy_from_slice(word);
            i64::from_ne_bytes(merged)
        };
        trace(pid, TraceOp::Poke { addr: word_addr, value })?;
    }

    if needs_unlock {
        tracker
            .reprotect(addr, buf.len().max(1), original_prot)
            .map_err(|e| TraceError::ProtectionChangeFailed(addr, protection_error_source(e)))?;
    }
    Ok(())
}

fn protection_error_source(e: crate::error::MappingError) -> nix::Error {
    match e {
        crate::error::MappingError::Mprotect { source, .. } => source,
        _ => nix::Error::UnknownErrno,
    }
}
