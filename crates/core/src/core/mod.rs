//! Out-of-order backend.
//!
//! The core runs decode → rename/allocate → issue → execute → commit over a
//! reorder buffer, per-class physical register files with rename tables, a
//! typed reservation station, and a load queue. Commit is strictly in program
//! order; issue and execution reorder freely between true dependences.

/// Rename/allocate stage.
mod alloc;
/// Commit stage.
mod commit;
/// Decode stage.
mod decode;
/// Uop execution semantics.
mod exec;
/// Execute stage (load path and functional units).
mod execute;
/// Issue stage.
mod issue;
/// Architectural and physical register files.
pub mod regfile;
/// Rename tables and free lists.
pub mod rename;
/// Reservation station ports and functional units.
pub mod station;

use log::debug;

use crate::common::latch::Latch;
use crate::config::CoreConfig;
use crate::frontend::{Frontend, FrontendKind};
use crate::mem::{MemRef, MemoryManager};
use crate::sim::state::{act, SimulatorState};
use crate::uops::{RegClass, Uop};

use regfile::PhysRegFile;
use rename::RenameTable;
use station::{ReservationStation, RobTag};

/// Execution status of a ROB entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecStatus {
    /// Not yet issued to a functional unit.
    #[default]
    Waiting,
    /// Bound to a functional unit or finished executing.
    Running,
}

/// One reorder buffer entry: a post-rename uop and its in-flight state.
#[derive(Debug, Clone, Default)]
pub struct RobEntry {
    /// Load/store/branch metadata.
    pub mref: MemRef,
    /// The renamed uop.
    pub op: Uop,
    /// Cycle from which this entry may commit; 0 means not ready.
    pub c_ready: u64,
    /// Packed exception word; nonzero halts at commit.
    pub except: u32,
    /// Execution status.
    pub in_exec: ExecStatus,
    /// Condition register this uop reads, 0 if none.
    pub cc_use: u8,
    /// Condition register this uop defines, 0 if none.
    pub cc_set: u8,
}

/// The out-of-order core.
pub struct Core {
    pub(crate) cfg: CoreConfig,
    pub(crate) prf: PhysRegFile,
    pub(crate) rrt: RenameTable,
    pub(crate) rs: ReservationStation,
    /// Decode → rename/allocate latch.
    pub(crate) id_ra: Latch<Uop>,
    /// Reorder buffer; enqueue order is commit order.
    pub(crate) rob: Latch<RobEntry>,
    /// Tag of the current ROB head; tag = base + index.
    pub(crate) rob_base: u64,
    /// Load queue: one tag per in-flight load, ready cycle carries the delay.
    pub(crate) ldq: Latch<RobTag>,
    /// Index into `seq_addrs` for the bundle currently being allocated.
    pub(crate) seq_at_alloc: usize,
    /// Stages that deactivate at their next opportunity (mask).
    pub(crate) next_inactive: u16,
}

impl Core {
    /// Creates a core with empty pipeline state.
    pub fn new(cfg: &CoreConfig) -> Self {
        debug!("core initialized with:");
        debug!("        decode width: {}", cfg.decode_width);
        debug!("        alloc  width: {}", cfg.alloc_width);
        debug!("        issue  width: {}", cfg.issue_width);
        debug!("        commit width: {}", cfg.commit_width);
        Self {
            cfg: cfg.clone(),
            prf: PhysRegFile::default(),
            rrt: RenameTable::default(),
            rs: ReservationStation::default(),
            id_ra: Latch::new(cfg.id_ra_size + cfg.decode_width),
            rob: Latch::new(cfg.rob_size + cfg.alloc_width),
            rob_base: 0,
            ldq: Latch::new(cfg.lqueue_size + cfg.alloc_width),
            seq_at_alloc: 0,
            next_inactive: 0,
        }
    }

    /// One complete backend cycle.
    pub fn cycle(
        &mut self,
        state: &mut SimulatorState,
        mmu: &mut MemoryManager,
        uqueue: &mut Latch<Uop>,
        fe: &mut FrontendKind,
    ) {
        if let Err(e) = mmu.refresh(state.cycle) {
            log::error!("MMU_:   {e}; halting");
            state.active = 0;
            return;
        }

        if state.active & act::CORE == 0 {
            debug!("core inactive");
            return;
        }

        self.decode(state, uqueue);
        self.alloc(state);
        self.issue(state);
        self.execute(state, mmu);
        self.commit(state, mmu, fe);
    }

    /// Discards all speculative state. Architectural state and the pending
    /// store buffer survive; the oldest in-flight address is kept so commit
    /// and refetch interlocks can resume from it.
    pub fn flush(
        &mut self,
        state: &mut SimulatorState,
        mmu: &mut MemoryManager,
        fe: &mut FrontendKind,
    ) {
        // rewind the rename tables to the committed snapshots; this also
        // returns every register held by in-flight uops to the free lists,
        // then the physical copies of the surviving mappings are refreshed
        // from the ARF
        for class in [RegClass::Gp, RegClass::Fp, RegClass::Vr] {
            self.rrt.class_mut(class).restore_committed();
        }
        for arch in 0..self.rrt.gp.alloc.len() {
            let phys = self.rrt.gp.alloc[arch];
            if phys != 0 {
                self.prf.gp.copy_from(phys, &state.arf.gp, arch as u8);
            }
        }
        for arch in 0..self.rrt.fp.alloc.len() {
            let phys = self.rrt.fp.alloc[arch];
            if phys != 0 {
                self.prf.fp.copy_from(phys, &state.arf.fp, arch as u8);
            }
        }
        for arch in 0..self.rrt.vr.alloc.len() {
            let phys = self.rrt.vr.alloc[arch];
            if phys != 0 {
                self.prf.vr.copy_from(phys, &state.arf.vr, arch as u8);
            }
        }

        self.rrt.reset_cc();

        self.id_ra.clear();
        self.rob.clear();
        self.ldq.clear();
        mmu.clear_load_buffer();

        state.in_flight.truncate(1);
        state.seq_addrs.clear();
        state.refetch_at = 0;
        self.seq_at_alloc = 0;
        self.next_inactive = 0;

        self.rs.reset();
        fe.flush();

        state.stats.flushes += 1;
        debug!("core flushed ({} total)", state.stats.flushes);
    }

    /// Tag of the ROB entry at `index`.
    #[inline]
    pub(crate) fn tag_at(&self, index: usize) -> RobTag {
        RobTag(self.rob_base + index as u64)
    }

    /// ROB index of `tag`, if the entry is still live.
    #[inline]
    pub(crate) fn index_of(&self, tag: RobTag) -> Option<usize> {
        let idx = tag.0.checked_sub(self.rob_base)? as usize;
        (idx < self.rob.len()).then_some(idx)
    }

    /// Looks up a live ROB entry by tag, ignoring readiness.
    pub(crate) fn entry_mut(&mut self, tag: RobTag) -> Option<&mut RobEntry> {
        let idx = self.index_of(tag)?;
        self.rob.at_mut(u64::MAX, idx).ok()
    }

    /// Pops the ROB head and advances the tag base.
    pub(crate) fn pop_head(&mut self) -> Option<RobEntry> {
        let e = self.rob.pop_front()?;
        self.rob_base += 1;
        Some(e)
    }

    /// Number of uops currently in the reorder buffer.
    pub fn rob_len(&self) -> usize {
        self.rob.len()
    }
}
