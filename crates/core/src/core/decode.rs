//! Decode stage.
//!
//! Moves up to `decode_width` uops per cycle from the uQueue into the ID/RA
//! latch. Control bits are masked against the opcode's allowed set, unused
//! operands are normalized, register references are bounds-checked, and
//! undefined opcodes are replaced by synthetic `int` uops so the exception
//! stays precise.

use log::debug;

use crate::common::error::{pack_except, Exception};
use crate::common::latch::{Latch, LatchError};
use crate::sim::state::{act, SimulatorState};
use crate::uops::{arf_len, ctrl, op, uop_info, Uop};

use super::Core;

impl Core {
    /// Replaces `u` with a synthetic `int` carrying `word`.
    fn inject_int(u: &mut Uop, word: u32) {
        u.opcode = op::INT;
        u.control = ctrl::USE_IMM;
        u.regs = [0; 4];
        u.imm = word as u64;
    }

    pub(super) fn decode(&mut self, state: &mut SimulatorState, uqueue: &mut Latch<Uop>) {
        let now = state.cycle;

        if !self.id_ra.ready(now) {
            debug!("ID__:   decode busy");
            return;
        }

        if self.next_inactive & act::ID != 0 && state.active & act::FRONTEND == 0 {
            state.active &= !act::ID;
        }
        if state.active & act::ID == 0 {
            debug!("ID__:   decode inactive");
            return;
        }

        for slot in 0..self.cfg.decode_width {
            if self.id_ra.len() >= self.cfg.id_ra_size + self.cfg.decode_width {
                debug!("ID__: * ID/RA latch is full, not decoding");
                break;
            }

            let mut cur = match uqueue.take_front(now) {
                Ok(u) => u,
                Err(LatchError::Stall) => {
                    debug!("ID__: * uQueue content is not ready");
                    break;
                }
                Err(_) => {
                    debug!("ID__: * uQueue is empty");
                    if state.active & act::FRONTEND == 0 {
                        self.next_inactive |= act::ID;
                    }
                    break;
                }
            };

            match uop_info(cur.opcode) {
                None => {
                    debug!(
                        "ID.{slot}: * undefined opcode {:#06x}, injecting #UD",
                        cur.opcode
                    );
                    Self::inject_int(&mut cur, pack_except(Exception::Ud, 0));
                }
                Some(info) => {
                    // silently clear control bits outside the allowed mask
                    if cur.control | info.ctrl_mask != info.ctrl_mask {
                        debug!("ID.{slot}: * invalid control bits cleared");
                        cur.control &= info.ctrl_mask;
                    }

                    // rc is either a source or a destination
                    if cur.control & ctrl::RC_DEST != 0 {
                        cur.control &= !ctrl::USE_RC;
                    }

                    // clear unused operands and bits; zero is not a neutral
                    // element for every operation
                    let srcs = if cur.control & ctrl::RC_DEST != 0 { 2 } else { 3 };
                    for i in 0..srcs {
                        if cur.control & (ctrl::USE_RA << i) == 0 {
                            cur.regs[i] = 0;
                        }
                        if cur.regs[i] == 0 {
                            cur.control &= !(ctrl::USE_RA << i);
                        }
                    }
                    if cur.control & ctrl::USE_IMM == 0 {
                        cur.imm = 0;
                    }

                    // bounds-check register references against the class ARF
                    let limit = arf_len(&cur) as u8;
                    if cur.regs.iter().any(|&r| r >= limit) {
                        debug!("ID.{slot}: * invalid register reference, injecting #REG");
                        Self::inject_int(&mut cur, pack_except(Exception::Reg, 0));
                    }
                }
            }

            debug!("ID.{slot}:   decoded {:04x?}", cur.opcode);

            // size was checked above, this cannot fail
            let _ = self.id_ra.push_back(now + self.cfg.decode_latency, cur);
        }
    }
}
