//! Execute stage.
//!
//! Runs after issue each cycle. The load path submits address-resolved loads
//! to the memory manager and completes the ones whose data arrived; the
//! functional unit path counts down busy cycles and executes each bound uop
//! on its final one.

use log::debug;

use crate::mem::{MemRefState, MemoryManager, P_R};
use crate::sim::state::{act, SimulatorState};
use crate::uops::uop_info;

use super::station::RobTag;
use super::Core;

impl Core {
    pub(super) fn execute(&mut self, state: &mut SimulatorState, mmu: &mut MemoryManager) {
        let now = state.cycle;

        if self.next_inactive & act::EX != 0 {
            state.active &= !act::EX;
        }
        if state.active & act::EX == 0 {
            debug!("EX__:   execute inactive");
            return;
        }

        if self.rob.is_empty() && state.active & act::IS == 0 {
            debug!("EX__:   ROB is empty, no uops can be executed");
            self.next_inactive |= act::EX;
            return;
        }

        if let Err(e) = mmu.refresh(now) {
            log::error!("MMU_:   {e}; halting");
            state.active = 0;
            return;
        }

        // load path: submit resolved addresses, complete arrived data
        let tags: Vec<RobTag> = (0..self.ldq.len())
            .map_while(|i| self.ldq.at(now, i).ok().copied())
            .collect();
        for slot in 0..self.cfg.load_width {
            let mut submitted = false;
            for &tag in &tags {
                let Some(idx) = self.index_of(tag) else {
                    continue;
                };
                let entry = self.rob.at(u64::MAX, idx).unwrap();
                match entry.mref.ready {
                    MemRefState::ExReady if !submitted => {
                        debug!("LD.{slot}:   ready load queue entry found");
                        let (vaddr, size) = (entry.mref.vaddr, entry.mref.size);
                        match mmu.request_load(now, vaddr, size, P_R) {
                            Ok(id) => {
                                let e = self.rob.at_mut(u64::MAX, idx).unwrap();
                                e.mref.ready = MemRefState::InExec;
                                e.mref.req = Some(id);
                            }
                            Err(word) => {
                                let e = self.rob.at_mut(u64::MAX, idx).unwrap();
                                e.except = word;
                                e.mref.ready = MemRefState::ValReady;
                                e.c_ready = now;
                            }
                        }
                        submitted = true;
                    }
                    MemRefState::InExec => {
                        if let Some(id) = entry.mref.req {
                            if let Some(data) = mmu.poll_load(id) {
                                self.complete_load(tag, data, now);
                            }
                        }
                    }
                    MemRefState::ValReady => {
                        if entry.c_ready == 0 {
                            self.rob.at_mut(u64::MAX, idx).unwrap().c_ready = now;
                        }
                    }
                    _ => {}
                }
            }
            if !submitted {
                break;
            }
        }

        // functional unit path: start, count down, execute on the last cycle
        let rob_base = self.rob_base;
        let mut run_tags: Vec<RobTag> = Vec::new();
        for port in self.rs.ports.iter_mut() {
            for fu in port.fus.iter_mut() {
                let Some(tag) = fu.tag else {
                    continue;
                };
                if fu.start_cycle == now && fu.busy == 0 {
                    let latency = tag
                        .0
                        .checked_sub(rob_base)
                        .and_then(|i| self.rob.at(u64::MAX, i as usize).ok())
                        .and_then(|e| uop_info(e.op.opcode))
                        .map(|i| i.latency)
                        .unwrap_or(1);
                    fu.busy = latency;
                }
                if fu.busy > 0 {
                    debug!(
                        "EX__:   port {} ({}) in execution, {} cycle(s) left",
                        port.id,
                        fu.kind.name(),
                        fu.busy
                    );
                    if fu.busy == 1 {
                        run_tags.push(tag);
                        fu.tag = None;
                        fu.start_cycle = 0;
                    }
                    fu.busy -= 1;
                }
            }
        }
        for tag in run_tags {
            self.run_uop(tag, state, now);
        }
    }
}
