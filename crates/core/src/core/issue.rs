//! Issue stage.
//!
//! Scans the visible ROB prefix for waiting uops whose source dependences are
//! resolved and binds them to a free functional unit of the required kind at
//! an unlocked port. The scan index runs across issue slots so each entry is
//! considered at most once per cycle; the oldest eligible entry wins.

use log::debug;

use crate::common::latch::LatchError;
use crate::sim::state::{act, SimulatorState};
use crate::uops::{ctrl, reg_class, uop_info, FuKind, R_RA, R_RB, R_RC, R_RD};

use super::{Core, ExecStatus};

impl Core {
    /// True if some older, not commit-ready entry produces a register or
    /// condition this candidate consumes.
    fn has_unavailable_dependence(&self, now: u64, index: usize) -> bool {
        let cand = match self.rob.at(now, index) {
            Ok(e) => e,
            Err(_) => return true,
        };
        let sources = [
            cand.op.regs[R_RA],
            cand.op.regs[R_RB],
            cand.op.regs[R_RC],
        ];
        let class = reg_class(&cand.op);
        let uses_cond = cand.op.control & ctrl::USE_COND != 0;

        for i in 0..index {
            let older = match self.rob.at(now, i) {
                Ok(e) => e,
                Err(_) => continue,
            };
            if older.c_ready != 0 {
                continue;
            }
            if reg_class(&older.op) == class {
                for (r, &src) in sources.iter().enumerate() {
                    if src == 0 || cand.op.control & (ctrl::USE_RA << r) == 0 {
                        continue;
                    }
                    let writes = older.op.regs[R_RD] == src
                        || (older.op.control & ctrl::RC_DEST != 0 && older.op.regs[R_RC] == src);
                    if writes {
                        debug!("IS__:     source p{src} not ready at ROB index {i}");
                        return true;
                    }
                }
            }
            if uses_cond && cand.cc_use == older.cc_set {
                debug!("IS__:     condition c{} not ready at ROB index {i}", cand.cc_use);
                return true;
            }
        }
        false
    }

    pub(super) fn issue(&mut self, state: &mut SimulatorState) {
        let now = state.cycle;

        // the ROB is drained and no more uops are coming, shut the backend down
        if self.next_inactive & act::IS != 0 {
            state.active &= !(act::IS | act::EX | act::CO);
        }
        if state.active & act::IS == 0 {
            debug!("IS__:   issue inactive");
            return;
        }

        for port in &mut self.rs.ports {
            port.lockout = port.lockout.saturating_sub(1);
        }

        let mut check_next = 0usize;
        let mut issued = 0u32;

        'slots: for slot in 0..self.cfg.issue_width {
            // find the next waiting, not-ready entry within the issue depth
            let mut candidate = None;
            let mut i = check_next;
            loop {
                if i > self.cfg.issue_depth {
                    debug!("IS.{slot}: * scheduler entries exhausted");
                    break 'slots;
                }
                match self.rob.at(now, i) {
                    Err(LatchError::Empty) => {
                        // scanning past the tail only; the issue stage winds
                        // down when the whole ROB has drained
                        if self.rob.is_empty() && state.active & act::RA == 0 {
                            self.next_inactive |= act::IS;
                        }
                        debug!("IS.{slot}: * no more uops to issue");
                        break 'slots;
                    }
                    Err(LatchError::Stall) => {
                        debug!("IS.{slot}: * ROB content is not ready");
                        break 'slots;
                    }
                    Err(LatchError::Full) => unreachable!(),
                    Ok(e) => {
                        check_next = i + 1;
                        if e.in_exec == ExecStatus::Waiting && e.c_ready == 0 {
                            if self.has_unavailable_dependence(now, i) {
                                i += 1;
                                continue; // not ready, find another uop
                            }
                            candidate = Some(i);
                            break;
                        }
                        i += 1;
                    }
                }
            }

            let index = match candidate {
                Some(i) => i,
                None => break,
            };

            let opcode = self.rob.at(now, index).unwrap().op.opcode;
            let info = uop_info(opcode).expect("decode rejects unknown opcodes");
            debug!("IS.{slot}:   trying to issue uop {opcode:#06x}");

            // first unlocked port hosting a free unit of the required kind
            let mut found = None;
            'ports: for port in self.rs.masked_ports(info.ports) {
                if port.lockout != 0 {
                    continue;
                }
                for (fi, fu) in port.fus.iter().enumerate() {
                    if fu.idle() && (info.fu == FuKind::Any || fu.kind == info.fu) {
                        found = Some((port.id, fi));
                        break 'ports;
                    }
                }
            }

            let (port_id, fu_idx) = match found {
                Some(f) => f,
                None => {
                    debug!("IS.{slot}: * no matching FU or port available");
                    continue; // the slot is spent, keep scanning
                }
            };

            let tag = self.tag_at(index);
            let port = &mut self.rs.ports[port_id as usize];
            port.lockout = (self.cfg.issue_latency as u16).max(1);
            let fu = &mut port.fus[fu_idx];
            fu.start_cycle = now + self.cfg.issue_latency;
            fu.tag = Some(tag);
            self.rob.at_mut(now, index).unwrap().in_exec = ExecStatus::Running;
            debug!("IS.{slot}:   issued to port {port_id}:{fu_idx}");
            issued += 1;
        }

        if issued > 0 {
            debug!("IS__:   {issued} uop(s) issued this cycle");
        }
    }
}
