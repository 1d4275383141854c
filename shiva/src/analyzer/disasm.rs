//
// Shiva ELF interpreter and patch engine
//
//! Disassembles a target's executable segment and emits one `BranchSite`
//! per call/unconditional-jump/return instruction (spec §4.3b). The
//! disassembler is an out-of-scope external collaborator per the
//! specification (§1); Shiva uses `capstone` for it since the teacher
//! carries no disassembler dependency to imitate (see DESIGN.md).
use capstone::prelude::*;

use crate::analyzer::branch_site::{BranchSite, BranchType};
use crate::error::LoaderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    X86_64,
    Aarch64,
}

fn build_capstone(arch: TargetArch) -> capstone::CsResult<Capstone> {
    match arch {
        TargetArch::X86_64 => Capstone::new()
            .x86()
            .mode(arch::x86::ArchMode::Mode64)
            .detail(false)
            .build(),
        TargetArch::Aarch64 => Capstone::new()
            .arm64()
            .mode(arch::arm64::ArchMode::Arm)
            .detail(false)
            .build(),
    }
}

/// Disassembles `code` (bytes of one executable mapping) as if loaded at
/// `base_vaddr`, returning one record per call/jmp/ret instruction found.
/// Indirect branches (through a register) are recorded with
/// `target_vaddr: None`; direct branches resolve a PC-relative displacement
/// to an absolute address via the operand string capstone already renders
/// in hex.
pub fn analyze(code: &[u8], base_vaddr: u64, arch: TargetArch) -> Result<Vec<BranchSite>, LoaderError> {
    let cs = build_capstone(arch).map_err(|e| LoaderError::MalformedObject(format!("capstone init failed: {e}")))?;
    let insns = cs
        .disasm_all(code, base_vaddr)
        .map_err(|e| LoaderError::MalformedObject(format!("disassembly failed: {e}")))?;

    let mut sites = Vec::new();
    for insn in insns.iter() {
        let mnemonic = insn.mnemonic().unwrap_or("");
        let branch_type = match mnemonic {
            "call" | "bl" | "blr" => BranchType::Call,
            "jmp" | "b" => BranchType::Jmp,
            "ret" => BranchType::Ret,
            _ => continue,
        };
        let target_vaddr = match branch_type {
            BranchType::Ret => None,
            _ => parse_direct_target(insn.op_str().unwrap_or("")),
        };
        sites.push(BranchSite {
            symbol: None,
            branch_type,
            target_vaddr,
            site_vaddr: insn.address(),
        });
    }
    Ok(sites)
}

/// `op_str` for a direct branch is a single hex immediate (e.g. `0x401040`);
/// an indirect branch's operand is a register name and won't parse.
fn parse_direct_target(op_str: &str) -> Option<u64> {
    let trimmed = op_str.trim().strip_prefix("0x")?;
    u64::from_str_radix(trimmed, 16).ok()
}

#[cfg(test)]
mod test {
    use hex::decode;
    use insta::assert_debug_snapshot;

    use super::*;

    #[test]
    fn test_parse_direct_target() {
        assert_eq!(parse_direct_target("0x401040"), Some(0x401040));
        assert_eq!(parse_direct_target("rax"), None);
        assert_eq!(parse_direct_target(""), None);
    }

    #[test]
    fn test_analyze_x86_64_direct_call_and_ret() {
        // call 0x0 ; ret
        let code: [u8; 6] = [0xe8, 0x00, 0x00, 0x00, 0x00, 0xc3];
        let sites = analyze(&code, 0x1000, TargetArch::X86_64).unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].branch_type, BranchType::Call);
        assert_eq!(sites[0].site_vaddr, 0x1000);
        assert_eq!(sites[1].branch_type, BranchType::Ret);
        assert_eq!(sites[1].target_vaddr, None);
    }

    #[test]
    fn test_analyze_x86_64_branch_sites_snapshot() {
        // call 0x0 ; jmp 0x0 ; ret, built from a hex fixture the way the
        // teacher builds expected note buffers in core_elf_note.rs.
        let code = decode("e800000000eb00c3").unwrap();
        let sites = analyze(&code, 0x2000, TargetArch::X86_64).unwrap();
        assert_debug_snapshot!(sites);
    }
}
