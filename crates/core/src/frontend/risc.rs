//! RISC frontend: trivial fetch of fixed-width uop records.
//!
//! Every instruction is a single 16-byte uop; the first three fields are
//! big-endian on the wire. Each fetched uop is a standalone macro bundle.

use std::fmt::Write as _;

use log::debug;

use crate::common::error::{pack_except, pf_bits, Exception, MemError};
use crate::common::latch::Latch;
use crate::config::{Config, GP_LEN};
use crate::mem::{MemoryManager, P_X, PL_USER};
use crate::sim::state::{act, SimulatorState};
use crate::uops::{ctrl, is_branch, op, Uop};

use super::bpred::{BranchPredictor, BtbPredictor};
use super::Frontend;

/// Size of one fetched uop record in bytes.
const UOP_BYTES: u64 = 16;

/// The RISC frontend.
pub struct RiscFrontend {
    bp: BtbPredictor,
    fetch_addr: u64,
    fetch_width: usize,
    fetch_latency: u64,
    uqueue_size: usize,
    silent_halt: bool,
}

impl RiscFrontend {
    /// Creates the frontend; fetch starts wherever `set_fetch_addr` points it.
    pub fn new(config: &Config) -> Self {
        debug!("RISC frontend initialized");
        Self {
            bp: BtbPredictor::new(config.fetch.btb_size),
            fetch_addr: 0,
            fetch_width: config.fetch.fetch_width,
            fetch_latency: config.fetch.fetch_latency,
            uqueue_size: config.sim.uqueue_size,
            silent_halt: config.sim.silent_halt,
        }
    }

    fn pf_uop(ring: u8) -> Uop {
        let mut code = pf_bits::PRESENT | pf_bits::IFETCH;
        if ring == PL_USER {
            code |= pf_bits::USER;
        }
        Uop {
            opcode: op::INT,
            control: ctrl::MOP_FIRST | ctrl::MOP_LAST | ctrl::USE_IMM,
            regs: [0; 4],
            imm: pack_except(Exception::Pf, code) as u64,
        }
    }
}

impl Frontend for RiscFrontend {
    fn cycle(&mut self, state: &mut SimulatorState, mmu: &mut MemoryManager, uq: &mut Latch<Uop>) {
        if state.active & act::IF == 0 {
            debug!("IF__:   frontend inactive");
            return;
        }

        debug!("IF__:   fetching new instructions from memory");

        for _ in 0..self.fetch_width {
            if uq.len() >= self.uqueue_size {
                debug!("IF__: * uQueue is full, not fetching");
                break;
            }

            debug!("IF__:   fetchaddr: {:#018x}", self.fetch_addr);

            if mmu.is_busy(self.fetch_addr, UOP_BYTES) {
                debug!("IF__:   waiting for memory");
                break;
            }

            let mut buf = [0u8; UOP_BYTES as usize];
            let mut read_latency = 0;
            let cur = match mmu.read(self.fetch_addr, &mut buf, P_X) {
                Ok((lat, n)) if n == UOP_BYTES => {
                    read_latency = lat;
                    Uop {
                        opcode: u16::from_be_bytes([buf[0], buf[1]]),
                        // all uops are standalone bundles here
                        control: u16::from_be_bytes([buf[2], buf[3]])
                            | ctrl::MOP_FIRST
                            | ctrl::MOP_LAST,
                        regs: [buf[4], buf[5], buf[6], buf[7]],
                        imm: u64::from_be_bytes(buf[8..16].try_into().unwrap()),
                    }
                }
                Ok(_) | Err(MemError::InvalidAddr) => {
                    // read after the last mapped byte
                    state.active &= !act::FRONTEND;
                    if self.silent_halt && Some(&self.fetch_addr) == state.in_flight.back() {
                        debug!("IF__:   end of code reached");
                        break;
                    }
                    Self::pf_uop(state.ring)
                }
                Err(e) => {
                    debug!("IF__:   fetch {e}, injecting #PF");
                    Self::pf_uop(state.ring)
                }
            };

            debug!("IF__:   fetched instruction {:#06x}", cur.opcode);

            let seq = self.fetch_addr + UOP_BYTES;
            state.seq_addrs.push_back(seq);
            self.fetch_addr = if is_branch(&cur) {
                self.bp.predict(self.fetch_addr, seq, cur.imm)
            } else {
                seq
            };
            // predicted next instruction
            state.in_flight.push_back(self.fetch_addr);

            if uq
                .push_back(state.cycle + self.fetch_latency + read_latency, cur)
                .is_err()
            {
                debug!("IF__: * uQueue is full, not fetching");
                break;
            }
        }
    }

    fn flush(&mut self) {}

    fn set_fetch_addr(&mut self, rip: u64) {
        self.fetch_addr = rip;
    }

    fn predictor_mut(&mut self) -> &mut dyn BranchPredictor {
        &mut self.bp
    }

    fn summary(&self, state: &SimulatorState) -> String {
        let mut out = String::from("\n");
        out.push_str("ARF GP:\n");
        for i in 0..GP_LEN {
            let _ = write!(
                out,
                "r{:<3} {:016x}{}",
                i,
                state.arf.gp.read_u64(i as u8),
                if i % 4 == 3 { "\n" } else { " " }
            );
        }
        let _ = write!(out, "cc:  {:016x}\n", state.arf.cc.read_u64());
        out
    }
}
