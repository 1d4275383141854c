//
// Shiva ELF interpreter and patch engine
//
//! The runtime context (spec §3): pointers into the mapped target and
//! linker images, the stack region built for them, the materialized
//! argv/envp/auxv arrays, and the insertion-ordered lists of mappings,
//! branch sites, threads, and trace handlers Shiva tracks for the lifetime
//! of the interpreted process.
use crate::analyzer::BranchSite;
use crate::mapping::MappingTracker;
use crate::runtime::auxv::AuxvBuilder;
use crate::runtime::thread::TraceThread;
use crate::trace::TraceHandler;

/// Load coordinates of one mapped ELF image (target or linker).
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageInfo {
    pub base: u64,
    pub entry: u64,
    pub phdr_vaddr: u64,
    pub phnum: u16,
    pub phent: u16,
}

impl ImageInfo {
    pub fn phdr_table_size(&self) -> u64 {
        self.phnum as u64 * self.phent as u64
    }
}

/// The region reserved for the new stack built underneath the real linker.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackRegion {
    pub base: u64,
    pub size: u64,
    /// Stack pointer value to hand to `enter_loader`, once argv/envp/auxv
    /// have been written below it.
    pub initial_sp: u64,
}

impl StackRegion {
    pub fn top(&self) -> u64 {
        self.base + self.size
    }
}

/// Everything Shiva needs to keep alive for the duration of the target
/// process: the mapping tracker, the analyzer's callsite table, the set of
/// traced threads, installed trace handlers, and the two images' load
/// coordinates.
pub struct RuntimeContext {
    pub tracker: MappingTracker,
    pub auxv: AuxvBuilder,
    pub stack: StackRegion,
    pub target: ImageInfo,
    pub linker: ImageInfo,
    pub branch_sites: Vec<BranchSite>,
    pub threads: Vec<TraceThread>,
    pub trace_handlers: Vec<TraceHandler>,
}

impl RuntimeContext {
    pub fn new(tracker: MappingTracker) -> Self {
        Self {
            tracker,
            auxv: AuxvBuilder::new(),
            stack: StackRegion::default(),
            target: ImageInfo::default(),
            linker: ImageInfo::default(),
            branch_sites: Vec::new(),
            threads: Vec::new(),
            trace_handlers: Vec::new(),
        }
    }

    pub fn record_branch_sites(&mut self, sites: impl IntoIterator<Item = BranchSite>) {
        self.branch_sites.extend(sites);
    }

    pub fn find_thread(&self, pid: i32) -> Option<&TraceThread> {
        self.threads.iter().find(|t| t.pid == pid)
    }

    pub fn handler_for(&self, kind: crate::trace::BreakpointKind) -> Option<&TraceHandler> {
        self.trace_handlers.iter().find(|h| h.kind == kind)
    }

    pub fn handler_for_mut(&mut self, kind: crate::trace::BreakpointKind) -> Option<&mut TraceHandler> {
        self.trace_handlers.iter_mut().find(|h| h.kind == kind)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mapping::{Mapping, Origin, Protection};
    use crate::mapping::tracker::SelfMaps;
    use crate::error::MappingError;

    struct EmptyMaps;
    impl SelfMaps for EmptyMaps {
        fn read(&self) -> Result<Vec<Mapping>, MappingError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_stack_top_accounts_for_size() {
        let stack = StackRegion { base: 0x7f0000000000, size: 4096 * 1000, initial_sp: 0 };
        assert_eq!(stack.top(), 0x7f0000000000 + 4096 * 1000);
    }

    #[test]
    fn test_record_branch_sites_appends() {
        let tracker = MappingTracker::from_self_maps(&EmptyMaps).unwrap();
        let mut ctx = RuntimeContext::new(tracker);
        assert!(ctx.branch_sites.is_empty());
        ctx.record_branch_sites(vec![BranchSite {
            symbol: None,
            branch_type: crate::analyzer::BranchType::Call,
            target_vaddr: Some(0x1000),
            site_vaddr: 0x2000,
        }]);
        assert_eq!(ctx.branch_sites.len(), 1);
    }

    #[test]
    fn test_find_thread_by_pid() {
        let tracker = MappingTracker::from_self_maps(&EmptyMaps).unwrap();
        let mut ctx = RuntimeContext::new(tracker);
        ctx.threads.push(TraceThread::new("target", 42, 1, 0, 0));
        assert!(ctx.find_thread(42).is_some());
        assert!(ctx.find_thread(99).is_none());
        let _ = Origin::Owned;
        let _ = Protection::READ;
    }
}
