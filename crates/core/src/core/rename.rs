//! Register rename tables and free lists.
//!
//! Three maps coexist per register class:
//! 1. **Forward allocated** A\[arch\] → phys: the latest in-flight mapping.
//! 2. **Forward committed** C\[arch\] → phys: the last committed mapping, the
//!    recovery point on flush.
//! 3. **Reverse** R\[phys\] → arch: consulted at commit for ARF writeback.
//!
//! Entry 0 is never mapped in any direction. Condition registers are not
//! renamed; they have a free list and a last-used FIFO instead.

use std::collections::VecDeque;

use crate::config::{CC_LEN, FP_LEN, FP_PHYS, GP_LEN, GP_PHYS, VR_LEN, VR_PHYS};
use crate::uops::RegClass;

/// Rename state of one register class.
#[derive(Debug, Clone)]
pub struct ClassRename {
    /// Forward allocated table: arch → latest in-flight phys, 0 = unmapped.
    pub alloc: Vec<u8>,
    /// Forward committed table: arch → last committed phys.
    pub committed: Vec<u8>,
    /// Reverse table: phys → arch, 0 = unmapped.
    pub reverse: Vec<u8>,
    /// Unallocated physical registers, in allocation order.
    pub free: VecDeque<u8>,
}

impl ClassRename {
    fn new(arch: usize, phys: usize) -> Self {
        Self {
            alloc: vec![0; arch],
            committed: vec![0; arch],
            reverse: vec![0; phys],
            // all physical registers except p0 start out free
            free: (1..phys as u8).collect(),
        }
    }

    /// Number of free physical registers.
    #[inline]
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Takes the next free physical register and installs both mappings.
    pub fn allocate(&mut self, arch: u8) -> Option<u8> {
        let phys = self.free.pop_front()?;
        self.alloc[arch as usize] = phys;
        self.reverse[phys as usize] = arch;
        Some(phys)
    }

    /// Commit-time release of `phys`: records the committed mapping, returns
    /// the register to the free list, clears the reverse entry, and clears the
    /// forward mapping if this was the architectural register's last writer.
    pub fn release(&mut self, phys: u8) {
        let arch = self.reverse[phys as usize];
        self.committed[arch as usize] = phys;
        self.free.push_back(phys);
        self.reverse[phys as usize] = 0;
        if self.alloc[arch as usize] == phys {
            self.alloc[arch as usize] = 0;
        }
    }

    /// Restores the forward table from the committed snapshot and rebuilds the
    /// reverse table and free list to match. The caller must refresh the
    /// physical copies of the surviving mappings from the ARF.
    pub fn restore_committed(&mut self) {
        self.alloc.copy_from_slice(&self.committed);
        self.reverse.iter_mut().for_each(|r| *r = 0);
        let mut used = vec![false; self.reverse.len()];
        used[0] = true;
        for (arch, &phys) in self.alloc.iter().enumerate() {
            if phys != 0 {
                self.reverse[phys as usize] = arch as u8;
                used[phys as usize] = true;
            }
        }
        self.free = (1..self.reverse.len() as u8)
            .filter(|&p| !used[p as usize])
            .collect();
    }
}

/// Rename state of all classes plus the condition register lists.
#[derive(Debug, Clone)]
pub struct RenameTable {
    /// General purpose class.
    pub gp: ClassRename,
    /// Floating point class.
    pub fp: ClassRename,
    /// Vector class.
    pub vr: ClassRename,
    /// Usable condition registers.
    pub cc_free: VecDeque<u8>,
    /// Condition registers in set order; the back is the most recently set.
    pub cc_lastused: VecDeque<u8>,
}

impl Default for RenameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RenameTable {
    /// Creates the rename state with every physical register free.
    pub fn new() -> Self {
        Self {
            gp: ClassRename::new(GP_LEN, GP_PHYS),
            fp: ClassRename::new(FP_LEN, FP_PHYS),
            vr: ClassRename::new(VR_LEN, VR_PHYS),
            cc_free: (1..CC_LEN as u8).collect(),
            cc_lastused: VecDeque::new(),
        }
    }

    /// The rename state of a register class.
    pub fn class(&self, class: RegClass) -> &ClassRename {
        match class {
            RegClass::Gp => &self.gp,
            RegClass::Fp => &self.fp,
            RegClass::Vr => &self.vr,
        }
    }

    /// The rename state of a register class, mutable.
    pub fn class_mut(&mut self, class: RegClass) -> &mut ClassRename {
        match class {
            RegClass::Gp => &mut self.gp,
            RegClass::Fp => &mut self.fp,
            RegClass::Vr => &mut self.vr,
        }
    }

    /// Resets the condition register lists to the post-reset state.
    pub fn reset_cc(&mut self) {
        self.cc_free = (1..CC_LEN as u8).collect();
        self.cc_lastused.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A[R[p]] = p for every reverse-mapped p; free + mapped partitions the PRF.
    fn check_invariant(c: &ClassRename) {
        let mut seen = vec![false; c.reverse.len()];
        seen[0] = true;
        for p in 1..c.reverse.len() as u8 {
            let arch = c.reverse[p as usize];
            if arch != 0 {
                assert_eq!(c.alloc[arch as usize], p);
                assert!(!seen[p as usize]);
                seen[p as usize] = true;
            }
        }
        for &p in &c.free {
            assert_eq!(c.reverse[p as usize], 0);
        }
    }

    #[test]
    fn test_allocate_installs_both_maps() {
        let mut c = ClassRename::new(8, 16);
        let p = c.allocate(3).unwrap();
        assert_eq!(c.alloc[3], p);
        assert_eq!(c.reverse[p as usize], 3);
        check_invariant(&c);
    }

    #[test]
    fn test_release_last_writer_clears_forward() {
        let mut c = ClassRename::new(8, 16);
        let p = c.allocate(3).unwrap();
        c.release(p);
        assert_eq!(c.alloc[3], 0);
        assert_eq!(c.committed[3], p);
        assert_eq!(c.reverse[p as usize], 0);
        assert!(c.free.contains(&p));
    }

    #[test]
    fn test_release_overwritten_keeps_forward() {
        let mut c = ClassRename::new(8, 16);
        let p1 = c.allocate(3).unwrap();
        let p2 = c.allocate(3).unwrap(); // newer writer of the same register
        c.release(p1);
        assert_eq!(c.alloc[3], p2); // not the last writer, mapping survives
        check_invariant(&c);
    }

    #[test]
    fn test_restore_committed_rebuilds_partition() {
        let mut c = ClassRename::new(8, 16);
        let p1 = c.allocate(1).unwrap();
        c.release(p1); // committed[1] = p1
        let _p2 = c.allocate(2).unwrap(); // speculative, will be flushed
        let _p3 = c.allocate(1).unwrap();

        c.restore_committed();
        assert_eq!(c.alloc[1], p1);
        assert_eq!(c.alloc[2], 0);
        assert_eq!(c.reverse[p1 as usize], 1);
        assert!(!c.free.contains(&p1));
        check_invariant(&c);
        // alloc == committed is the flush round-trip law
        assert_eq!(c.alloc, c.committed);
    }

    #[test]
    fn test_exhaustion() {
        let mut c = ClassRename::new(4, 4);
        assert!(c.allocate(1).is_some());
        assert!(c.allocate(2).is_some());
        assert!(c.allocate(3).is_some());
        assert!(c.allocate(1).is_none()); // only p1..p3 exist
    }

    #[test]
    fn test_cc_lists() {
        let mut t = RenameTable::new();
        assert_eq!(t.cc_free.len(), CC_LEN - 1);
        let c = t.cc_free.pop_front().unwrap();
        t.cc_lastused.push_back(c);
        t.reset_cc();
        assert_eq!(t.cc_free.len(), CC_LEN - 1);
        assert!(t.cc_lastused.is_empty());
    }
}
