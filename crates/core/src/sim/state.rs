//! Shared simulator state.
//!
//! The mutable aggregate threaded through every stage: the clock, the
//! pipeline activity mask, the in-flight instruction trace, refetch
//! interlocks, and the architectural register file. The frontend appends to
//! `in_flight`/`seq_addrs`; commit and flush consume them.

use std::collections::VecDeque;

use crate::core::regfile::ArchRegFile;
use crate::stats::SimStats;

/// Pipeline activity bits.
pub mod act {
    /// Fetch.
    pub const IF: u16 = 0x0001;
    /// Predecode.
    pub const PD: u16 = 0x0002;
    /// Macro decode.
    pub const DE: u16 = 0x0004;

    /// Uop decode.
    pub const ID: u16 = 0x0100;
    /// Rename/allocate.
    pub const RA: u16 = 0x0200;
    /// Issue.
    pub const IS: u16 = 0x0400;
    /// Execute/memory.
    pub const EX: u16 = 0x0800;
    /// Commit.
    pub const CO: u16 = 0x1000;

    /// The entire frontend.
    pub const FRONTEND: u16 = IF | PD | DE;
    /// The entire core.
    pub const CORE: u16 = ID | RA | IS | EX | CO;
}

/// The simulator state aggregate.
pub struct SimulatorState {
    /// Current cycle.
    pub cycle: u64,
    /// Pipeline activity mask.
    pub active: u16,
    /// Current protection ring.
    pub ring: u8,

    /// Addresses of in-flight macro instructions, plus the predicted address
    /// after the youngest.
    pub in_flight: VecDeque<u64>,
    /// Sequential successor address for each in-flight macro instruction.
    pub seq_addrs: VecDeque<u64>,

    /// Refetch here when the uop at this address tries to commit.
    pub refetch_at: u64,
    /// Refetch interlock armed.
    pub refetch_active: bool,
    /// Exception the core halted with, 0 if none.
    pub exception: u32,

    /// Event counters.
    pub stats: SimStats,

    /// The visible architectural register file.
    pub arf: ArchRegFile,
}

impl SimulatorState {
    /// Fresh state with the whole pipeline active, starting at `entry`.
    pub fn new(ring: u8, entry: u64) -> Self {
        Self {
            cycle: 0,
            active: act::FRONTEND | act::CORE,
            ring,
            in_flight: VecDeque::from([entry]),
            seq_addrs: VecDeque::new(),
            refetch_at: 0,
            refetch_active: false,
            exception: 0,
            stats: SimStats::default(),
            arf: ArchRegFile::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let s = SimulatorState::new(3, 0x8000);
        assert_eq!(s.active, act::FRONTEND | act::CORE);
        assert_eq!(s.in_flight.front(), Some(&0x8000));
        assert!(s.seq_addrs.is_empty());
        assert_eq!(s.exception, 0);
    }

    #[test]
    fn test_masks_disjoint() {
        assert_eq!(act::FRONTEND & act::CORE, 0);
    }
}
