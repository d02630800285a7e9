//! Branch prediction.
//!
//! Only the contract matters to the rest of the machine: predict a next
//! fetch address, learn from resolved branches at commit.

use std::collections::HashMap;

use log::debug;

/// The prediction interface consumed by the frontends and commit.
pub trait BranchPredictor {
    /// Predicts the next fetch address for the branch at `rip`. `seq` is the
    /// sequential successor, `target` a target hint when one is decodable
    /// (`u64::MAX` when unknown).
    fn predict(&mut self, rip: u64, seq: u64, target: u64) -> u64;

    /// Records the resolved outcome of the branch at `rip`.
    fn update(&mut self, rip: u64, target: u64, taken: bool);
}

/// Always predicts the sequential successor.
#[derive(Default)]
pub struct SimplePredictor;

impl BranchPredictor for SimplePredictor {
    fn predict(&mut self, _rip: u64, seq: u64, _target: u64) -> u64 {
        seq
    }

    fn update(&mut self, _rip: u64, _target: u64, _taken: bool) {}
}

/// Branch target buffer: taken branches insert their target, not-taken
/// branches erase it. Cold lookups fall back to backward-taken,
/// forward-not-taken when the target hint is known.
pub struct BtbPredictor {
    btb: HashMap<u64, u64>,
    capacity: usize,
}

impl BtbPredictor {
    /// Creates a BTB bounded to `capacity` entries; all not taken at start.
    pub fn new(capacity: usize) -> Self {
        Self {
            btb: HashMap::new(),
            capacity,
        }
    }
}

impl BranchPredictor for BtbPredictor {
    fn predict(&mut self, rip: u64, seq: u64, target: u64) -> u64 {
        match self.btb.get(&rip) {
            Some(&t) => t,
            // backward taken, forward not taken
            None => {
                if rip < target {
                    seq
                } else {
                    target
                }
            }
        }
    }

    fn update(&mut self, rip: u64, target: u64, taken: bool) {
        if taken && self.btb.len() < self.capacity {
            self.btb.insert(rip, target);
        } else if !taken {
            self.btb.remove(&rip);
        }
        debug!(
            "BP__:   updated branch at {rip:#x} as {}",
            if taken { "taken" } else { "not taken" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_lookup_direction_heuristic() {
        let mut bp = BtbPredictor::new(16);
        // forward target: predict not taken (sequential)
        assert_eq!(bp.predict(0x1000, 0x1002, 0x2000), 0x1002);
        // backward target: predict taken
        assert_eq!(bp.predict(0x2000, 0x2002, 0x1000), 0x1000);
    }

    #[test]
    fn test_taken_inserts_not_taken_erases() {
        let mut bp = BtbPredictor::new(16);
        bp.update(0x1000, 0x4000, true);
        assert_eq!(bp.predict(0x1000, 0x1002, u64::MAX), 0x4000);
        bp.update(0x1000, 0x4000, false);
        // cold again, forward hint falls back to sequential
        assert_eq!(bp.predict(0x1000, 0x1002, u64::MAX), 0x1002);
    }

    #[test]
    fn test_capacity_bound() {
        let mut bp = BtbPredictor::new(2);
        bp.update(0x1, 0x10, true);
        bp.update(0x2, 0x20, true);
        bp.update(0x3, 0x30, true); // dropped, table full
        assert_eq!(bp.predict(0x3, 0x5, u64::MAX), 0x5);
    }
}
