//
// Shiva ELF interpreter and patch engine
//
//! Tagged branch-site record (DESIGN NOTES: tagged variants replace the
//! source's flat, conditionally-valid struct).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchType {
    Call,
    Jmp,
    Ret,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSite {
    pub symbol: Option<String>,
    pub branch_type: BranchType,
    /// Resolved absolute target, when the branch is direct (PC-relative
    /// displacement). `None` for indirect branches (through a register) and
    /// for `Ret`, which has no single target.
    pub target_vaddr: Option<u64>,
    pub site_vaddr: u64,
}

impl BranchSite {
    pub fn is_resolved(&self) -> bool {
        self.target_vaddr.is_some()
    }
}
