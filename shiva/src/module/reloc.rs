//
// Shiva ELF interpreter and patch engine
//
//! Relocation resolution (spec §4.4). Internal references patch directly
//! against this module's own section placements; external references are
//! looked up in the documented three-tier order — Shiva's own exports, the
//! target's dynamic symbols, then symbols the callsite analyzer discovered
//! in the target — before falling back to a PLT/GOT stub or failing.
use std::collections::HashMap;

use crate::analyzer::BranchSite;
use crate::elf_view::reloc::{R_AARCH64_ABS64, R_AARCH64_CALL26, R_AARCH64_JUMP26, R_X86_64_64, R_X86_64_PC32, R_X86_64_PLT32};
use crate::error::RelocationError;

/// The three external-lookup tiers from spec §4.4, in order.
pub struct SymbolResolver<'a> {
    pub shiva_exports: &'a HashMap<String, u64>,
    pub target_dynsyms: &'a HashMap<String, u64>,
    pub branch_sites: &'a [BranchSite],
}

impl<'a> SymbolResolver<'a> {
    pub fn resolve_external(&self, name: &str) -> Option<u64> {
        if let Some(addr) = self.shiva_exports.get(name) {
            return Some(*addr);
        }
        if let Some(addr) = self.target_dynsyms.get(name) {
            return Some(*addr);
        }
        self.branch_sites
            .iter()
            .find(|b| b.symbol.as_deref() == Some(name))
            .and_then(|b| b.target_vaddr)
    }
}

/// Whether a relocation's target, once resolved, should be applied as an
/// absolute address or as a PC-relative displacement from the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Abs64,
    Pc32,
    Arm64Branch26,
}

pub fn classify(r_type: u32) -> Result<Width, RelocationError> {
    match r_type {
        R_X86_64_64 | R_AARCH64_ABS64 => Ok(Width::Abs64),
        R_X86_64_PC32 | R_X86_64_PLT32 => Ok(Width::Pc32),
        R_AARCH64_CALL26 | R_AARCH64_JUMP26 => Ok(Width::Arm64Branch26),
        other => Err(RelocationError::UnsupportedType(other)),
    }
}

/// Writes `value` at `buf[site_offset..]`, where `pc` is the relocation
/// site's own virtual address (needed for the PC-relative widths).
pub fn apply(buf: &mut [u8], site_offset: usize, width: Width, value: u64, pc: u64) -> Result<(), RelocationError> {
    match width {
        Width::Abs64 => {
            buf[site_offset..site_offset + 8].copy_from_slice(&value.to_le_bytes());
        }
        Width::Pc32 => {
            let disp = (value as i64).wrapping_sub(pc as i64) as i32;
            buf[site_offset..site_offset + 4].copy_from_slice(&disp.to_le_bytes());
        }
        Width::Arm64Branch26 => {
            let disp = (value as i64).wrapping_sub(pc as i64) >> 2;
            if !(-(1i64 << 25)..(1i64 << 25)).contains(&disp) {
                return Err(RelocationError::UnsupportedType(0));
            }
            let mut insn = u32::from_le_bytes(buf[site_offset..site_offset + 4].try_into().unwrap());
            insn = (insn & 0xfc00_0000) | (disp as u32 & 0x03ff_ffff);
            buf[site_offset..site_offset + 4].copy_from_slice(&insn.to_le_bytes());
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_classify_known_types() {
        assert_eq!(classify(R_X86_64_64).unwrap(), Width::Abs64);
        assert_eq!(classify(R_X86_64_PC32).unwrap(), Width::Pc32);
        assert_eq!(classify(R_AARCH64_CALL26).unwrap(), Width::Arm64Branch26);
    }

    #[test]
    fn test_classify_unknown_type_errors() {
        let err = classify(0xffff).unwrap_err();
        assert!(matches!(err, RelocationError::UnsupportedType(0xffff)));
    }

    #[test]
    fn test_apply_abs64_writes_little_endian() {
        let mut buf = [0u8; 8];
        apply(&mut buf, 0, Width::Abs64, 0x0102030405060708, 0).unwrap();
        assert_eq!(buf, [8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_apply_pc32_computes_displacement() {
        let mut buf = [0u8; 4];
        apply(&mut buf, 0, Width::Pc32, 0x2000, 0x1000).unwrap();
        assert_eq!(i32::from_le_bytes(buf), 0x1000);
    }

    #[test]
    fn test_resolver_tries_tiers_in_order() {
        let mut shiva_exports = HashMap::new();
        shiva_exports.insert("helper".to_string(), 0xaaaa);
        let mut target_dynsyms = HashMap::new();
        target_dynsyms.insert("auth_password".to_string(), 0xbbbb);
        let branch_sites = vec![BranchSite {
            symbol: Some("discovered_fn".to_string()),
            branch_type: crate::analyzer::BranchType::Call,
            target_vaddr: Some(0xcccc),
            site_vaddr: 0x1000,
        }];
        let resolver = SymbolResolver {
            shiva_exports: &shiva_exports,
            target_dynsyms: &target_dynsyms,
            branch_sites: &branch_sites,
        };
        assert_eq!(resolver.resolve_external("helper"), Some(0xaaaa));
        assert_eq!(resolver.resolve_external("auth_password"), Some(0xbbbb));
        assert_eq!(resolver.resolve_external("discovered_fn"), Some(0xcccc));
        assert_eq!(resolver.resolve_external("missing"), None);
    }
}
