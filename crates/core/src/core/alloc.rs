//! Rename/allocate stage.
//!
//! Consumes the ID/RA latch head only when every resource is available:
//! enough free physical registers for first-use sources and destinations, a
//! condition register when one is defined, and load queue capacity for loads.
//! Sources rewrite to the forward-allocated mapping, first references copy the
//! architectural value into a fresh physical register, and destinations
//! install new mappings. Each consumed uop becomes a ROB entry.

use log::debug;

use crate::mem::{MemRef, MemRefMode};
use crate::sim::state::{act, SimulatorState};
use crate::uops::{ctrl, imm_delay, is_branch, is_load, reg_class, RegClass, R_RC, R_RD};

use super::{Core, ExecStatus, RobEntry};

impl Core {
    pub(super) fn alloc(&mut self, state: &mut SimulatorState) {
        let now = state.cycle;

        if self.next_inactive & act::RA != 0 {
            state.active &= !act::RA;
        }
        if state.active & act::RA == 0 {
            debug!("RA__:   rename/alloc inactive");
            return;
        }

        if !self.rob.ready(now) {
            debug!("RA__:   rename/allocate busy");
            return;
        }

        for slot in 0..self.cfg.alloc_width {
            if self.rob.len() >= self.cfg.rob_size + self.cfg.alloc_width {
                debug!("RA__: * no available ROB slots");
                break;
            }

            let peek = match self.id_ra.front(now) {
                Ok(u) => *u,
                Err(crate::common::latch::LatchError::Stall) => {
                    debug!("RA__: * ID/RA latch is not ready");
                    break;
                }
                Err(_) => {
                    debug!("RA__: * ID/RA latch is empty");
                    if state.active & act::ID == 0 {
                        self.next_inactive |= act::RA;
                    }
                    break;
                }
            };

            let class = reg_class(&peek);

            // count the free registers this uop would consume: sources seen
            // for the first time since reset plus one or two destinations
            let mut needed = 0usize;
            {
                let cls = self.rrt.class(class);
                for sreg in 0..3 {
                    if peek.regs[sreg] != 0
                        && peek.control & (ctrl::USE_RA << sreg) != 0
                        && cls.alloc[peek.regs[sreg] as usize] == 0
                    {
                        needed += 1;
                    }
                }
            }
            let rc = if peek.control & ctrl::RC_DEST != 0 {
                peek.regs[R_RC]
            } else {
                0
            };
            let rd = peek.regs[R_RD];
            needed += usize::from(rc != 0) + usize::from(rd != 0);

            if self.rrt.class(class).free_len() < needed {
                debug!("RA.{slot}: * not enough physical registers available");
                break;
            }

            if peek.control & ctrl::SET_COND != 0 && self.rrt.cc_free.is_empty() {
                debug!("RA.{slot}: * no condition register available");
                break;
            }

            if is_load(&peek) && self.ldq.len() >= self.cfg.lqueue_size + self.cfg.alloc_width {
                debug!("RA.{slot}: * load queue is full, pipeline stalled");
                break;
            }

            // resources available, take the uop from the latch
            let mut cur = self
                .id_ra
                .take_front(now)
                .expect("head readiness was checked");
            debug!("RA.{slot}:   got {:#06x} from latch", cur.opcode);

            // a used condition binds to the most recently set one; if none
            // was set, the dependence is silently discarded
            let ccu = if cur.control & ctrl::USE_COND != 0 {
                match self.rrt.cc_lastused.back() {
                    Some(&c) => c,
                    None => {
                        debug!("RA.{slot}: * no condition register was set");
                        cur.control &= !ctrl::USE_COND;
                        0
                    }
                }
            } else {
                0
            };
            let ccs = if cur.control & ctrl::SET_COND != 0 {
                let c = self.rrt.cc_free.pop_front().expect("checked above");
                self.rrt.cc_lastused.push_back(c);
                debug!("RA.{slot}:     condition register {c} set");
                c
            } else {
                0
            };

            // rename sources against the forward table, pulling first
            // references in from the ARF; destinations are installed after so
            // a uop reading its own destination sees the previous mapping
            for sreg in 0..3 {
                let arch = cur.regs[sreg];
                if arch == 0 || cur.control & (ctrl::USE_RA << sreg) == 0 {
                    continue;
                }
                let mapped = self.rrt.class(class).alloc[arch as usize];
                if mapped != 0 {
                    debug!("RA.{slot}:     src r{arch} is mapped to p{mapped}");
                    cur.regs[sreg] = mapped;
                } else {
                    let phys = self
                        .rrt
                        .class_mut(class)
                        .allocate(arch)
                        .expect("free count was checked");
                    match class {
                        RegClass::Gp => self.prf.gp.copy_from(phys, &state.arf.gp, arch),
                        RegClass::Fp => self.prf.fp.copy_from(phys, &state.arf.fp, arch),
                        RegClass::Vr => self.prf.vr.copy_from(phys, &state.arf.vr, arch),
                    }
                    debug!("RA.{slot}: *   src r{arch} not mapped yet, fetched from ARF into p{phys}");
                    cur.regs[sreg] = phys;
                }
            }

            if rc != 0 {
                let phys = self
                    .rrt
                    .class_mut(class)
                    .allocate(rc)
                    .expect("free count was checked");
                debug!("RA.{slot}:     dst r{rc} renamed to p{phys}");
                cur.regs[R_RC] = phys;
            }
            if rd != 0 {
                let phys = self
                    .rrt
                    .class_mut(class)
                    .allocate(rd)
                    .expect("free count was checked");
                debug!("RA.{slot}:     dst r{rd} renamed to p{phys}");
                cur.regs[R_RD] = phys;
            }

            // the sequential successor rides along for rip-relative address
            // calculations and branch reconstruction
            let mut mref = MemRef {
                vaddr: state
                    .seq_addrs
                    .get(self.seq_at_alloc)
                    .copied()
                    .unwrap_or(0),
                ..Default::default()
            };
            if is_branch(&cur) {
                mref.mode = MemRefMode::Branch;
            }

            if cur.control & ctrl::MOP_LAST != 0 {
                self.seq_at_alloc += 1;
            }

            let is_ld = is_load(&cur);
            let delay = if cur.control & ctrl::IMM_DELAY != 0 {
                imm_delay(&cur)
            } else {
                1
            };

            let entry = RobEntry {
                mref,
                op: cur,
                c_ready: 0,
                except: 0,
                in_exec: ExecStatus::Waiting,
                cc_use: ccu,
                cc_set: ccs,
            };
            let tag = self.tag_at(self.rob.len());
            self.rob
                .push_back(now + self.cfg.alloc_latency, entry)
                .expect("capacity was checked");
            debug!("RA.{slot}:   sent {:#06x} to ROB", cur.opcode);

            if is_ld {
                self.ldq
                    .push_back(now + delay, tag)
                    .expect("capacity was checked");
                debug!(
                    "RA.{slot}:   allocated load queue entry, additional delay {}",
                    delay.saturating_sub(1)
                );
            }
        }
    }
}
