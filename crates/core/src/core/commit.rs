//! Commit stage.
//!
//! Retires up to `commit_width` uops per cycle, strictly head-first and in
//! program order. Commit is where speculation becomes architectural: ARF
//! writeback, rename table retirement, store submission, misspeculated-load
//! replay, branch resolution against the prediction, and the self-modifying
//! code refetch interlock all live here.

use log::{debug, error, info};

use crate::common::error::{except_code, except_num, Exception};
use crate::common::latch::LatchError;
use crate::frontend::{Frontend, FrontendKind};
use crate::mem::{MemRefMode, MemoryManager};
use crate::sim::state::{act, SimulatorState};
use crate::uops::{ctrl, is_branch, is_load, is_store, op, reg_class, RegClass, Uop, R_RC, R_RD};

use super::station::RobTag;
use super::{Core, ExecStatus, RobEntry};

impl Core {
    /// Copies a committing physical register into its architectural slot.
    fn writeback(&self, state: &mut SimulatorState, class: RegClass, phys: u8) {
        if phys == 0 {
            return;
        }
        match class {
            RegClass::Gp => {
                let arch = self.rrt.gp.reverse[phys as usize];
                state.arf.gp.copy_from(arch, &self.prf.gp, phys);
            }
            RegClass::Fp => {
                let arch = self.rrt.fp.reverse[phys as usize];
                state.arf.fp.copy_from(arch, &self.prf.fp, phys);
            }
            RegClass::Vr => {
                let arch = self.rrt.vr.reverse[phys as usize];
                state.arf.vr.copy_from(arch, &self.prf.vr, phys);
            }
        }
    }

    pub(super) fn commit(
        &mut self,
        state: &mut SimulatorState,
        mmu: &mut MemoryManager,
        fe: &mut FrontendKind,
    ) {
        let now = state.cycle;

        if self.next_inactive & act::CO != 0 {
            state.active &= !act::CO;
        }
        if state.active & act::CO == 0 {
            debug!("CO__:   commit inactive");
            return;
        }

        for slot in 0..self.cfg.commit_width {
            // something requested a refetch starting from this instruction
            // pointer; the uop bytes there may have been rewritten
            if state.refetch_active && state.in_flight.front() == Some(&state.refetch_at) {
                debug!("CO.{slot}:   refetch instruction pointer reached");
                fe.set_fetch_addr(state.refetch_at);
                self.flush(state, mmu, fe);
                state.active = act::FRONTEND | act::CORE;
                state.refetch_active = false;
                break;
            }

            match self.rob.front(now) {
                Err(LatchError::Empty) => {
                    debug!("CO.{slot}:   ROB is empty, no uop committed");
                    if state.active & act::EX == 0 {
                        self.next_inactive |= act::CO;
                    }
                    break;
                }
                Err(_) => break,
                Ok(head) => {
                    if head.c_ready == 0 || head.c_ready > now {
                        debug!("CO.{slot}:   ROB head not ready to commit");
                        break;
                    }
                }
            }

            let cur = self.pop_head().expect("head readiness was checked");

            // exceptions halt the machine; handler dispatch is out of scope
            if cur.except != 0 {
                let num = except_num(cur.except);
                info!(
                    "CO.{slot}:   exception {} {}, error code {:#06x}",
                    num,
                    Exception::from_num(num).name(),
                    except_code(cur.except)
                );
                state.active = 0;
                state.stats.committed_micro += 1;
                state.exception = cur.except;
                return;
            }

            let class = reg_class(&cur.op);
            let rd = cur.op.regs[R_RD];
            let rc = if cur.op.control & ctrl::RC_DEST != 0 {
                cur.op.regs[R_RC]
            } else {
                0
            };

            // invalidated loads skip writeback; they are replayed below
            let invalid_load = is_load(&cur.op) && cur.mref.mode == MemRefMode::Invalid;
            if !invalid_load {
                self.writeback(state, class, rc);
                self.writeback(state, class, rd);
                debug!("CO.{slot}:   ARF updated");
            }

            {
                let cls = self.rrt.class_mut(class);
                if rc != 0 {
                    cls.release(rc);
                }
                if rd != 0 {
                    cls.release(rd);
                }
            }

            // retire the oldest condition once a different one commits, and
            // make the committing condition architecturally visible
            if cur.cc_set != 0 {
                if self.rrt.cc_lastused.front() != Some(&cur.cc_set) {
                    if let Some(old) = self.rrt.cc_lastused.pop_front() {
                        self.rrt.cc_free.push_back(old);
                        debug!("CO.{slot}:   condition register {old} retired");
                    }
                }
                let v = self.prf.cc.read_u64(cur.cc_set);
                state.arf.cc.write_u64(v);
            }

            if is_load(&cur.op) {
                debug!("CO.{slot}:   load detected");
                if invalid_load {
                    // the value was loaded before an older store overwrote the
                    // address; refetch the bundle rather than chase the ROB
                    debug!("CO.{slot}:   load is invalid, replaying");
                    let front = *state.in_flight.front().expect("in_flight never empty");
                    fe.set_fetch_addr(front);
                    self.flush(state, mmu, fe);
                    state.active = act::FRONTEND | act::CORE;
                    break; // this load must not commit
                }
                self.ldq.pop_front();
            }

            if is_store(&cur.op) {
                debug!("CO.{slot}:   store detected");

                // any in-flight load overlapping this store read a stale
                // value; mark it for replay at its own commit
                let lq_tags: Vec<RobTag> = self.ldq.iter().copied().collect();
                for tag in lq_tags {
                    if let Some(i) = self.index_of(tag) {
                        let le = self.rob.at(u64::MAX, i).unwrap();
                        if le.mref.ready != crate::mem::MemRefState::Unavail
                            && mmu.is_alias(
                                le.mref.vaddr,
                                le.mref.size,
                                cur.mref.vaddr,
                                cur.mref.size,
                            )
                        {
                            debug!("CO.{slot}:     misspeculated load found, invalidated");
                            self.rob.at_mut(u64::MAX, i).unwrap().mref.mode = MemRefMode::Invalid;
                        }
                    }
                }

                if let Err(word) = mmu.request_store(now, cur.mref.vaddr, &cur.mref.data) {
                    // the store faulted: flush and let a synthetic int carry
                    // the exception out at the head
                    self.flush(state, mmu, fe);
                    let re = RobEntry {
                        op: Uop {
                            opcode: op::INT,
                            control: 0,
                            regs: [0; 4],
                            imm: word as u64,
                        },
                        c_ready: now,
                        except: word,
                        in_exec: ExecStatus::Running,
                        ..Default::default()
                    };
                    self.rob.push_front(now, re).expect("ROB was just flushed");
                    continue;
                }

                // does this store write over an in-flight instruction?
                for i in 0..state.seq_addrs.len() {
                    let at = state.in_flight[i];
                    let len = state.seq_addrs[i].wrapping_sub(at);
                    if mmu.is_alias(cur.mref.vaddr, cur.mref.size, at, len) {
                        state.refetch_at = at;
                        state.refetch_active = true;
                        debug!(
                            "CO.{slot}:   SMC at v.{at:016x} detected, target will be refetched"
                        );
                        break;
                    }
                }
            }

            if is_branch(&cur.op) {
                if cur.mref.mode != MemRefMode::Branch {
                    error!("CO.{slot}:   branch without branch reference; halting");
                    state.active = 0;
                    state.exception = crate::common::error::pack_except(Exception::Unspec, 0);
                    return;
                }
                let rip = *state.in_flight.front().expect("in_flight never empty");
                let mut nextrip = cur.mref.vaddr;
                debug!("CO.{slot}:   branch resolved to v.{nextrip:016x}");

                if cur.mref.size == u64::MAX {
                    // not taken, fall through to the recorded successor
                    fe.predictor_mut().update(rip, nextrip, false);
                    nextrip = state.seq_addrs.front().copied().unwrap_or(nextrip);
                } else {
                    fe.predictor_mut().update(rip, nextrip, true);
                }
                state.stats.bp_updates += 1;

                // the frontend predicted in_flight[1]; anything else refetches
                if state.in_flight.get(1) != Some(&nextrip) {
                    fe.set_fetch_addr(nextrip);
                    self.flush(state, mmu, fe);
                    state.in_flight.push_back(nextrip);
                    state.active = act::FRONTEND | act::CORE;
                    state.stats.bp_redirects += 1;
                }
            }

            // instruction pointers advance when the last uop of a bundle commits
            if cur.op.control & ctrl::MOP_LAST != 0 {
                state.in_flight.pop_front();
                if !state.seq_addrs.is_empty() {
                    state.seq_addrs.pop_front();
                    self.seq_at_alloc = self.seq_at_alloc.saturating_sub(1);
                }
                if let Some(&next) = state.in_flight.front() {
                    state.arf.ip.write_u64(next);
                }
                state.stats.committed_macro += 1;
            }

            debug!("CO.{slot}:   committed uop {:#06x}", cur.op.opcode);
            state.stats.committed_micro += 1;
        }

        if self.rob.is_empty() && self.next_inactive & act::IS != 0 {
            state.active &= !(act::IS | act::EX | act::CO);
        }
    }
}
