//
// Shiva ELF interpreter and patch engine
//
//! Seeds and maintains the mapping list. Follows the same
//! "trait + production impl, mockable for tests" shape as the teacher's
//! `ProcMaps`/`ProcMapsImpl` (`cli/memfault_core_handler/procfs.rs`), with
//! `nix::sys::mman` wrappers for the allocation/protection side the teacher
//! doesn't need (memfaultd never maps memory into its own address space).
use std::num::NonZeroUsize;
use std::os::unix::io::BorrowedFd;

use nix::sys::mman::{mmap, mprotect, MapFlags, ProtFlags};
use procfs::process::MemoryMaps;

use crate::error::MappingError;
use crate::mapping::mapping::{Mapping, Origin, Protection};

/// Wrapper trait for reading this process's own memory map, mockable in
/// tests the way `MemfaultdServiceManager` is in the teacher.
#[cfg_attr(test, mockall::automock)]
pub trait SelfMaps {
    fn read(&self) -> Result<Vec<Mapping>, MappingError>;
}

#[derive(Debug, Default)]
pub struct ProcSelfMaps;

impl SelfMaps for ProcSelfMaps {
    fn read(&self) -> Result<Vec<Mapping>, MappingError> {
        let maps = MemoryMaps::from_path("/proc/self/maps")
            .map_err(|e| MappingError::ProcRead(e.to_string()))?;
        Ok(maps
            .memory_maps
            .iter()
            .map(|m| {
                Mapping::new(
                    m.address.0,
                    m.address.1 - m.address.0,
                    Protection::from_proc_maps_perms(&m.perms),
                    Origin::Observed,
                )
            })
            .collect())
    }
}

/// Authoritative list of this process's mappings (spec §4.3 invariants:
/// owned-vs-observed origin, stored protection tracks the kernel-visible
/// one).
#[derive(Debug, Default)]
pub struct MappingTracker {
    mappings: Vec<Mapping>,
}

impl MappingTracker {
    pub fn from_self_maps(source: &impl SelfMaps) -> Result<Self, MappingError> {
        Ok(Self {
            mappings: source.read()?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.iter()
    }

    pub fn protection_at(&self, addr: u64) -> Option<Protection> {
        self.mappings
            .iter()
            .find(|m| m.contains(addr))
            .map(|m| m.prot)
    }

    pub fn is_mapped(&self, addr: u64) -> bool {
        self.mappings.iter().any(|m| m.contains(addr))
    }

    fn conflicts(&self, addr: u64, len: u64) -> bool {
        let end = addr + len;
        self.mappings
            .iter()
            .any(|m| m.base < end && m.end() > addr)
    }

    /// Reserves a fixed-address anonymous mapping and records it as owned.
    /// Used by userland-exec to place the target and linker images and by
    /// the module loader to place a patch object's segments.
    pub fn mmap_fixed(&mut self, addr: u64, len: usize, prot: Protection) -> Result<u64, MappingError> {
        if self.conflicts(addr, len as u64) {
            return Err(MappingError::FixedAddressConflict { addr });
        }
        let nix_prot = to_nix_prot(prot);
        let flags = MapFlags::MAP_FIXED | MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS;
        let ptr = unsafe {
            mmap(
                NonZeroUsize::new(addr as usize),
                NonZeroUsize::new(len).unwrap_or(NonZeroUsize::new(1).unwrap()),
                nix_prot,
                flags,
                None::<BorrowedFd>,
                0,
            )
        }
        .map_err(|source| MappingError::Mmap {
            addr,
            len,
            source,
        })?;

        self.mappings.push(Mapping::new(
            ptr as u64,
            len as u64,
            prot,
            Origin::Owned,
        ));
        Ok(ptr as u64)
    }

    /// Changes protection on an already-tracked range and updates the
    /// stored entry to match.
    pub fn reprotect(&mut self, addr: u64, len: usize, prot: Protection) -> Result<(), MappingError> {
        let nix_prot = to_nix_prot(prot);
        unsafe {
            mprotect(
                std::ptr::NonNull::new(addr as *mut std::ffi::c_void).expect("non-null mprotect target"),
                len,
                nix_prot,
            )
        }
        .map_err(|source| MappingError::Mprotect { addr, len, source })?;

        if let Some(m) = self.mappings.iter_mut().find(|m| m.base == addr) {
            m.prot = prot;
        }
        Ok(())
    }
}

fn to_nix_prot(prot: Protection) -> ProtFlags {
    let mut flags = ProtFlags::PROT_NONE;
    if prot.contains(Protection::READ) {
        flags |= ProtFlags::PROT_READ;
    }
    if prot.contains(Protection::WRITE) {
        flags |= ProtFlags::PROT_WRITE;
    }
    if prot.contains(Protection::EXEC) {
        flags |= ProtFlags::PROT_EXEC;
    }
    flags
}

#[cfg(test)]
mod test {
    use super::*;

    fn mock_with(mappings: Vec<Mapping>) -> MockSelfMaps {
        let mut mock = MockSelfMaps::new();
        mock.expect_read().returning(move || Ok(mappings.clone()));
        mock
    }

    #[test]
    fn test_seeded_mappings_are_observed() {
        let mock = mock_with(vec![Mapping::new(0x1000, 0x1000, Protection::READ, Origin::Observed)]);
        let tracker = MappingTracker::from_self_maps(&mock).unwrap();
        assert!(tracker.is_mapped(0x1000));
        assert!(!tracker.is_mapped(0x2000));
        assert_eq!(tracker.protection_at(0x1000), Some(Protection::READ));
    }

    #[test]
    fn test_conflict_detection() {
        let mock = mock_with(vec![Mapping::new(0x1000, 0x1000, Protection::READ, Origin::Observed)]);
        let mut tracker = MappingTracker::from_self_maps(&mock).unwrap();
        assert!(tracker.conflicts(0x1500, 0x100));
        assert!(!tracker.conflicts(0x3000, 0x100));
        let _ = &mut tracker;
    }
}
