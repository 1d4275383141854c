//
// Shiva ELF interpreter and patch engine
//
//! A single tracked mapping. Extends the teacher's `MemoryRange`
//! (`cli/memfault_core_handler/memory_range.rs`) with the protection and
//! origin fields the tracker's invariants require: every mapping is either
//! owned by Shiva or merely observed from a kernel snapshot, and its stored
//! protection always equals the kernel-visible one.
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u8 {
        const READ  = 0b001;
        const WRITE = 0b010;
        const EXEC  = 0b100;
    }
}

impl Protection {
    pub fn from_proc_maps_perms(perms: &str) -> Self {
        let mut prot = Protection::empty();
        if perms.starts_with('r') {
            prot |= Protection::READ;
        }
        if perms.as_bytes().get(1) == Some(&b'w') {
            prot |= Protection::WRITE;
        }
        if perms.as_bytes().get(2) == Some(&b'x') {
            prot |= Protection::EXEC;
        }
        prot
    }
}

/// Whether a mapping was allocated by Shiva or merely observed from the
/// process's pre-existing memory map at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Owned,
    Observed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub base: u64,
    pub len: u64,
    pub prot: Protection,
    pub origin: Origin,
}

impl Mapping {
    pub fn new(base: u64, len: u64, prot: Protection, origin: Origin) -> Self {
        Self {
            base,
            len,
            prot,
            origin,
        }
    }

    pub fn end(&self) -> u64 {
        self.base + self.len
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("r-xp", Protection::READ | Protection::EXEC)]
    #[case("rw-p", Protection::READ | Protection::WRITE)]
    #[case("---p", Protection::empty())]
    #[case("rwxp", Protection::READ | Protection::WRITE | Protection::EXEC)]
    fn test_protection_from_perms(#[case] perms: &str, #[case] expected: Protection) {
        assert_eq!(Protection::from_proc_maps_perms(perms), expected);
    }

    #[test]
    fn test_contains() {
        let m = Mapping::new(0x1000, 0x1000, Protection::READ, Origin::Observed);
        assert!(m.contains(0x1000));
        assert!(m.contains(0x1fff));
        assert!(!m.contains(0x2000));
    }
}
