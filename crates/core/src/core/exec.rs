//! Uop execution semantics.
//!
//! Executes one uop against the physical register files: operand folding over
//! the used sources, x86-64 flag computation, partial-write policy, address
//! generation for loads and stores, and branch resolution into the reorder
//! buffer's memory reference. Loads do not finish here; they resolve their
//! address and hand the reference to the load path.

use crate::common::error::{pack_except, Exception};
use crate::mem::{MemRefMode, MemRefState};
use crate::sim::state::SimulatorState;
use crate::uops::{
    cc, ctrl, lea_adsz, lea_displ, lea_scale, op, op_size, px, test_cc, RegClass, Uop,
    IMM_DST_HIGH, IMM_RIP_REL, IMM_SRC_HIGH, R_RA, R_RB, R_RC, R_RD,
};

use super::station::RobTag;
use super::{Core, RobEntry};

/// Value mask for an operand size in bytes.
#[inline]
fn mask(opsz: u8) -> u64 {
    if opsz >= 8 {
        u64::MAX
    } else {
        (1u64 << (opsz as u32 * 8)) - 1
    }
}

/// Sign-extends an `opsz`-byte value to 64 bits.
#[inline]
fn sx64(v: u64, opsz: u8) -> u64 {
    if opsz >= 8 {
        v
    } else {
        let shift = 64 - opsz as u32 * 8;
        (((v << shift) as i64) >> shift) as u64
    }
}

fn sign_bit(v: u64, opsz: u8) -> bool {
    v >> (opsz as u32 * 8 - 1) & 1 != 0
}

/// SF, ZF, and PF for a masked result.
fn flags_szp(r: u64, opsz: u8) -> u64 {
    let mut f = 0;
    if r & mask(opsz) == 0 {
        f |= cc::ZF;
    }
    if sign_bit(r, opsz) {
        f |= cc::SF;
    }
    if (r as u8).count_ones() % 2 == 0 {
        f |= cc::PF;
    }
    f
}

/// Addition with full flag output. Returns `(masked result, flags)`.
fn flags_add(a: u64, b: u64, carry_in: u64, opsz: u8) -> (u64, u64) {
    let m = mask(opsz);
    let wide = (a & m) as u128 + (b & m) as u128 + carry_in as u128;
    let r = wide as u64 & m;
    let mut f = flags_szp(r, opsz);
    if wide > m as u128 {
        f |= cc::CF;
    }
    if (a ^ b ^ r) >> 4 & 1 != 0 {
        f |= cc::AF;
    }
    if sign_bit(a, opsz) == sign_bit(b, opsz) && sign_bit(r, opsz) != sign_bit(a, opsz) {
        f |= cc::OF;
    }
    (r, f)
}

/// Subtraction with full flag output. Returns `(masked result, flags)`.
fn flags_sub(a: u64, b: u64, borrow_in: u64, opsz: u8) -> (u64, u64) {
    let m = mask(opsz);
    let r = (a & m).wrapping_sub(b & m).wrapping_sub(borrow_in) & m;
    let mut f = flags_szp(r, opsz);
    if (b & m) as u128 + borrow_in as u128 > (a & m) as u128 {
        f |= cc::CF;
    }
    if (a ^ b ^ r) >> 4 & 1 != 0 {
        f |= cc::AF;
    }
    if sign_bit(a, opsz) != sign_bit(b, opsz) && sign_bit(r, opsz) != sign_bit(a, opsz) {
        f |= cc::OF;
    }
    (r, f)
}

impl Core {
    /// Executes the uop bound to `tag`. The entry is updated in place.
    pub(super) fn run_uop(&mut self, tag: RobTag, state: &SimulatorState, now: u64) {
        let Some(idx) = self.index_of(tag) else {
            return; // flushed underneath the unit
        };
        let mut entry = self.rob.at(u64::MAX, idx).unwrap().clone();
        match crate::uops::reg_class(&entry.op) {
            RegClass::Gp => self.exec_gp(&mut entry, state, now),
            RegClass::Fp => self.exec_fp(&mut entry, now),
            RegClass::Vr => self.exec_vr(&mut entry, now),
        }
        *self.rob.at_mut(u64::MAX, idx).unwrap() = entry;
    }

    /// Completes a load whose data arrived: writes the destination register
    /// and makes the entry commit-ready.
    pub(super) fn complete_load(&mut self, tag: RobTag, data: Vec<u8>, now: u64) {
        let Some(idx) = self.index_of(tag) else {
            return;
        };
        let entry = self.rob.at(u64::MAX, idx).unwrap();
        let op_ = entry.op;
        let rd = op_.regs[R_RD];
        let cc_set = entry.cc_set;

        match crate::uops::reg_class(&op_) {
            RegClass::Gp => {
                if op_.opcode == op::POPX && op_.imm & 0xff == px::FLAGS {
                    let mut b = [0u8; 8];
                    let n = data.len().min(8);
                    b[..n].copy_from_slice(&data[..n]);
                    self.prf.cc.write_u64(cc_set, u64::from_le_bytes(b));
                } else if op_.opcode == op::LD64H
                    || (op_size(&op_) == 1 && op_.imm & IMM_DST_HIGH != 0)
                {
                    self.prf.gp.write_bytes_at(rd, 1, &data[..1.min(data.len())]);
                } else {
                    self.prf.gp.write_bytes_zeroed(rd, &data);
                }
            }
            RegClass::Fp => self.prf.fp.write_bytes_zeroed(rd, &data),
            RegClass::Vr => self.prf.vr.write_bytes_zeroed(rd, &data),
        }

        let e = self.rob.at_mut(u64::MAX, idx).unwrap();
        e.mref.ready = MemRefState::ValReady;
        e.mref.req = None;
        if e.c_ready == 0 {
            e.c_ready = now;
        }
    }

    /// Reads a source slot as an operand value: masked to the operand size,
    /// honoring the high-byte register aliases.
    fn src_val(&self, u: &Uop, slot: usize) -> u64 {
        let v = self.prf.gp.read_u64(u.regs[slot]);
        let opsz = op_size(u);
        let high = opsz == 1
            && ((slot == R_RA && u.imm & IMM_DST_HIGH != 0)
                || (slot != R_RA && u.imm & IMM_SRC_HIGH != 0));
        if high {
            (v >> 8) & 0xff
        } else {
            v & mask(opsz)
        }
    }

    /// Reads a source slot as a full-width value (addresses, stack math).
    fn src_full(&self, u: &Uop, slot: usize) -> u64 {
        self.prf.gp.read_u64(u.regs[slot])
    }

    /// The used source values in slot order, for operand folding.
    fn used_vals(&self, u: &Uop) -> Vec<u64> {
        (0..3)
            .filter(|&s| u.control & (ctrl::USE_RA << s) != 0 && u.regs[s] != 0)
            .map(|s| self.src_val(u, s))
            .collect()
    }

    /// Writes an execution result into the destination register, applying the
    /// operand-size and extend/resize policy. `old` is the full-width previous
    /// value of the destination (via its source dependence).
    fn write_result(&mut self, u: &Uop, preg: u8, value: u64, old: u64) {
        let opsz = op_size(u);
        let m = mask(opsz);
        let v = if opsz == 1 && u.imm & IMM_DST_HIGH != 0 {
            (old & !0xff00) | ((value & 0xff) << 8)
        } else if opsz >= 8 {
            value
        } else if u.control & ctrl::RD_EXTEND != 0 {
            // zero the untouched upper bytes
            value & m
        } else {
            // RD_RESIZE and plain partial writes keep the upper bytes
            (old & !m) | (value & m)
        };
        self.prf.gp.write_u64(preg, v);
    }

    /// Effective address for `lea`/`lda`: base + index·scale + displacement +
    /// segment base. A missing base with the RIP-relative flag substitutes the
    /// recorded sequential successor address.
    fn effective_addr(&self, u: &Uop, seq: u64) -> u64 {
        let base = if u.control & ctrl::USE_RA != 0 {
            self.src_full(u, R_RA)
        } else if u.imm & IMM_RIP_REL != 0 {
            seq
        } else {
            0
        };
        let index = if u.control & ctrl::USE_RB != 0 {
            self.src_full(u, R_RB)
        } else {
            0
        };
        let seg = if u.control & ctrl::USE_RC != 0 {
            self.src_full(u, R_RC)
        } else {
            0
        };
        let scale = (lea_scale(u) as u64).max(1);
        let mut addr = base
            .wrapping_add(index.wrapping_mul(scale))
            .wrapping_add(lea_displ(u) as u64)
            .wrapping_add(seg);
        if lea_adsz(u) == 4 {
            addr &= 0xffff_ffff;
        }
        addr
    }

    /// Register bytes for a store's data buffer.
    fn store_data(&self, u: &Uop, size: usize) -> Vec<u8> {
        if u.control & ctrl::USE_RB != 0 {
            self.prf.gp.bytes(u.regs[R_RB])[..size.min(8)].to_vec()
        } else {
            u.imm.to_le_bytes()[..size.min(8)].to_vec()
        }
    }

    fn exec_gp(&mut self, e: &mut RobEntry, state: &SimulatorState, now: u64) {
        let u = e.op;
        let opc = u.opcode;
        let opsz = op_size(&u);
        let m = mask(opsz);
        let imm_val = u.imm & m;
        let cc_in = self.prf.cc.read_u64(e.cc_use);
        let seq = e.mref.vaddr;
        let rd = u.regs[R_RD];
        let rc = u.regs[R_RC];
        let old = if u.control & ctrl::USE_RA != 0 {
            self.src_full(&u, R_RA)
        } else {
            0
        };

        let mut flags: Option<u64> = None;
        // loads resolve an address here and become ready via the load path
        let mut pending_load = false;

        match opc {
            op::NOP | op::NOP_A | op::RESERVED => {}

            op::INT => e.except = u.imm as u32,

            op::RDTSC => {
                self.prf.gp.write_u64(rd, state.cycle & 0xffff_ffff);
                if u.control & ctrl::RC_DEST != 0 {
                    self.prf.gp.write_u64(rc, state.cycle >> 32);
                }
            }

            op::ADD | op::ADC => {
                let vals = self.used_vals(&u);
                let a = vals.first().copied().unwrap_or(0);
                let mut b: u64 = vals.iter().skip(1).fold(0, |x, v| x.wrapping_add(*v));
                if u.control & ctrl::USE_IMM != 0 {
                    b = b.wrapping_add(imm_val);
                }
                let cin = u64::from(opc == op::ADC && cc_in & cc::CF != 0);
                let (r, f) = flags_add(a, b, cin, opsz);
                flags = Some(f);
                self.write_result(&u, rd, r, old);
            }

            op::SUB | op::SBB => {
                // the minuend is ra, or the loaded rc operand when the
                // destination side lives in memory
                let vals: Vec<u64> = [R_RA, R_RC, R_RB]
                    .into_iter()
                    .filter(|&s| u.control & (ctrl::USE_RA << s) != 0 && u.regs[s] != 0)
                    .map(|s| self.src_val(&u, s))
                    .collect();
                let a = vals.first().copied().unwrap_or(0);
                let mut b: u64 = vals.iter().skip(1).fold(0, |x, v| x.wrapping_add(*v));
                if u.control & ctrl::USE_IMM != 0 {
                    b = b.wrapping_add(imm_val);
                }
                let bin = u64::from(opc == op::SBB && cc_in & cc::CF != 0);
                let (r, f) = flags_sub(a, b, bin, opsz);
                flags = Some(f);
                self.write_result(&u, rd, r, old);
            }

            op::NEG => {
                let a = self.used_vals(&u).first().copied().unwrap_or(0);
                let (r, f) = flags_sub(0, a, 0, opsz);
                flags = Some(f);
                self.write_result(&u, rd, r, old);
            }

            op::AND | op::OR | op::XOR => {
                let mut vals = self.used_vals(&u);
                if u.control & ctrl::USE_IMM != 0 {
                    vals.push(imm_val);
                }
                let first = vals.first().copied().unwrap_or(0);
                let r = vals.iter().skip(1).fold(first, |x, v| match opc {
                    op::AND => x & v,
                    op::OR => x | v,
                    _ => x ^ v,
                }) & m;
                flags = Some(flags_szp(r, opsz));
                self.write_result(&u, rd, r, old);
            }

            op::NOT => {
                let a = self.used_vals(&u).first().copied().unwrap_or(0);
                self.write_result(&u, rd, !a & m, old);
            }

            op::MOVE => {
                let mut v = if u.control & ctrl::USE_RB != 0 {
                    self.src_val(&u, R_RB)
                } else {
                    self.src_val(&u, R_RA)
                };
                // a source width in the low immediate bits requests
                // sign-extension to the operand size (movsx, movsxd)
                let srcw = (u.imm & 0x7) as u8;
                if u.control & ctrl::RD_EXTEND != 0 && matches!(srcw, 1 | 2 | 4) && srcw < opsz {
                    v = sx64(v & mask(srcw), srcw) & m;
                }
                self.write_result(&u, rd, v, old);
            }

            op::COPY2 => {
                let a = self.src_val(&u, R_RA);
                let b = self.src_val(&u, R_RB);
                self.write_result(&u, rd, a, old);
                if u.control & ctrl::RC_DEST != 0 {
                    self.write_result(&u, rc, b, 0);
                }
            }

            op::XCHG => {
                let a = self.src_val(&u, R_RA);
                let b = self.src_val(&u, R_RB);
                self.write_result(&u, rd, b, old);
                if u.control & ctrl::RC_DEST != 0 {
                    self.write_result(&u, rc, a, 0);
                }
            }

            op::SET => self.write_result(&u, rd, u.imm, old),

            0x0050..=0x005f => {
                // conditional move: the old value flows through when the
                // condition does not hold
                let src = if u.control & ctrl::USE_RB != 0 {
                    self.src_val(&u, R_RB)
                } else {
                    0
                };
                let v = if test_cc((opc & 0xf) as u8, cc_in) {
                    src
                } else {
                    self.src_val(&u, R_RA)
                };
                self.write_result(&u, rd, v, old);
            }

            op::SETCOND => flags = Some(u.imm),
            op::CMC => flags = Some(cc_in ^ cc::CF),
            op::CLC => flags = Some(cc_in & !cc::CF),
            op::STC => flags = Some(cc_in | cc::CF),
            op::CLD => flags = Some(cc_in & !cc::DF),
            op::STD => flags = Some(cc_in | cc::DF),

            op::MUL | op::IMUL => {
                let mut vals = self.used_vals(&u);
                if u.control & ctrl::USE_IMM != 0 {
                    vals.push(imm_val);
                }
                let (lo, hi) = if opc == op::IMUL {
                    let p: i128 = vals.iter().fold(1i128, |x, &v| x * sx64(v, opsz) as i64 as i128);
                    ((p as u64) & m, ((p >> (opsz as u32 * 8)) as u64) & m)
                } else {
                    let p: u128 = vals.iter().fold(1u128, |x, &v| x * (v & m) as u128);
                    ((p as u64) & m, ((p >> (opsz as u32 * 8)) as u64) & m)
                };
                let overflow = if opc == op::IMUL {
                    // the high half must be the sign fill of the low half
                    hi != if sign_bit(lo, opsz) { m } else { 0 }
                } else {
                    hi != 0
                };
                let mut f = flags_szp(lo, opsz);
                if overflow {
                    f |= cc::CF | cc::OF;
                }
                flags = Some(f);
                self.write_result(&u, rd, lo, old);
                if u.control & ctrl::RC_DEST != 0 {
                    self.write_result(&u, rc, hi, 0);
                }
            }

            op::DIV8 | op::IDIV8 => {
                let dividend = self.src_full(&u, R_RA) & 0xffff;
                let divisor = self.used_vals(&u).get(1).copied().unwrap_or(0) & 0xff;
                match div8(dividend, divisor, opc == op::IDIV8) {
                    Some(v) => {
                        // quotient in the low byte, remainder in the high byte
                        let merged = (old & !0xffff) | v;
                        self.prf.gp.write_u64(rd, merged);
                    }
                    None => e.except = pack_except(Exception::De, 0),
                }
            }

            op::DIVQ | op::DIVR | op::IDIVQ | op::IDIVR => {
                let lo = self.src_full(&u, R_RA) & m;
                let hi = self.src_full(&u, R_RB) & m;
                let divisor = self.src_val(&u, R_RC);
                let signed = matches!(opc, op::IDIVQ | op::IDIVR);
                let want_rem = matches!(opc, op::DIVR | op::IDIVR);
                match div_wide(lo, hi, divisor, opsz, signed, want_rem) {
                    Some(v) => self.write_result(&u, rd, v, old),
                    None => e.except = pack_except(Exception::De, 0),
                }
            }

            op::LSL | op::RSL | op::RSA | op::ROL | op::ROR | op::RCL | op::RCR => {
                let v = self.used_vals(&u).first().copied().unwrap_or(0);
                let count_src = if u.control & ctrl::USE_RB != 0 {
                    self.src_full(&u, R_RB)
                } else {
                    u.imm
                };
                let count = (count_src & if opsz == 8 { 0x3f } else { 0x1f }) as u32;
                let (r, f) = shift_op(opc, v, count, cc_in, opsz);
                flags = Some(f);
                self.write_result(&u, rd, r, old);
            }

            // loads: resolve the address, the load path does the rest
            op::LD64 | op::LD64H => {
                let addr = if u.control & ctrl::USE_IMM != 0 {
                    // the high-byte flags never collide with a moffset address
                    u.imm & !(IMM_DST_HIGH | IMM_SRC_HIGH)
                } else {
                    self.src_full(&u, R_RA)
                };
                e.mref.vaddr = addr;
                e.mref.size = opsz as u64;
                e.mref.mode = MemRefMode::Read;
                e.mref.ready = MemRefState::ExReady;
                pending_load = true;
            }

            op::POP | op::POPX => {
                let sp = self.src_full(&u, R_RA);
                e.mref.vaddr = sp;
                e.mref.size = opsz as u64;
                e.mref.mode = MemRefMode::Read;
                e.mref.ready = MemRefState::ExReady;
                if u.control & ctrl::RC_DEST != 0 {
                    // the immediate carries extra release bytes (ret Iw)
                    let extra = if opc == op::POP && u.control & ctrl::USE_IMM != 0 {
                        u.imm & 0xffff
                    } else {
                        0
                    };
                    self.prf
                        .gp
                        .write_u64(rc, sp.wrapping_add(opsz as u64).wrapping_add(extra));
                }
                pending_load = true;
            }

            op::LDA => {
                e.mref.vaddr = self.effective_addr(&u, seq);
                e.mref.size = opsz as u64;
                e.mref.mode = MemRefMode::Read;
                e.mref.ready = MemRefState::ExReady;
                pending_load = true;
            }

            op::LEA => {
                let addr = self.effective_addr(&u, seq);
                self.write_result(&u, rd, addr, old);
            }

            op::ST => {
                let addr = if u.control & ctrl::USE_RA != 0 {
                    self.src_full(&u, R_RA)
                } else {
                    u.imm
                };
                e.mref.vaddr = addr;
                e.mref.size = opsz as u64;
                e.mref.mode = MemRefMode::Write;
                e.mref.ready = MemRefState::ValReady;
                e.mref.data = self.store_data(&u, opsz as usize);
            }

            op::PUSH | op::PUSHX => {
                let sp = self.src_full(&u, R_RA);
                let addr = sp.wrapping_sub(opsz as u64);
                let value = if opc == op::PUSHX {
                    match u.imm & 0xff {
                        px::RIP => seq,
                        px::FLAGS => cc_in,
                        _ => 0,
                    }
                } else if u.control & ctrl::USE_RB != 0 {
                    self.src_full(&u, R_RB)
                } else {
                    u.imm
                };
                e.mref.vaddr = addr;
                e.mref.size = opsz as u64;
                e.mref.mode = MemRefMode::Write;
                e.mref.ready = MemRefState::ValReady;
                e.mref.data = value.to_le_bytes()[..(opsz as usize).min(8)].to_vec();
                self.prf.gp.write_u64(rd, addr);
            }

            op::BRANCH => {
                e.mref.vaddr = self.src_full(&u, R_RA);
                e.mref.size = 0;
            }

            op::BRANCHR => {
                e.mref.vaddr = seq.wrapping_add(sx64(imm_val, opsz));
                e.mref.size = 0;
            }

            op::BRANCHRZ => {
                e.mref.vaddr = seq.wrapping_add(sx64(imm_val, opsz));
                e.mref.size = if self.src_full(&u, R_RA) == 0 {
                    0
                } else {
                    u64::MAX // not taken
                };
            }

            0x0070..=0x007f => {
                e.mref.vaddr = seq.wrapping_add(sx64(imm_val, opsz));
                e.mref.size = if test_cc((opc & 0xf) as u8, cc_in) {
                    0
                } else {
                    u64::MAX // not taken
                };
            }

            _ => e.except = pack_except(Exception::Ud, 0),
        }

        if let Some(f) = flags {
            if e.cc_set != 0 {
                self.prf.cc.write_u64(e.cc_set, f);
            }
        }
        if !pending_load && e.c_ready == 0 {
            e.c_ready = now + self.cfg.wb_latency;
        }
    }

    fn exec_fp(&mut self, e: &mut RobEntry, now: u64) {
        let u = e.op;
        let opsz = op_size(&u);
        let mut pending_load = false;
        match u.opcode {
            op::NOP_F => {}
            op::SET_F => {
                let rd = u.regs[R_RD];
                self.prf.fp.write_bytes_zeroed(rd, &u.imm.to_le_bytes());
            }
            op::LD_F => {
                e.mref.vaddr = u.imm;
                e.mref.size = opsz as u64;
                e.mref.mode = MemRefMode::Read;
                e.mref.ready = MemRefState::ExReady;
                pending_load = true;
            }
            op::ST_F => {
                e.mref.vaddr = u.imm;
                e.mref.size = opsz as u64;
                e.mref.mode = MemRefMode::Write;
                e.mref.ready = MemRefState::ValReady;
                e.mref.data =
                    self.prf.fp.bytes(u.regs[R_RB])[..(opsz as usize).min(16)].to_vec();
            }
            _ => e.except = pack_except(Exception::Ud, 0),
        }
        if !pending_load && e.c_ready == 0 {
            e.c_ready = now + self.cfg.wb_latency;
        }
    }

    fn exec_vr(&mut self, e: &mut RobEntry, now: u64) {
        let u = e.op;
        let opsz = op_size(&u);
        let mut pending_load = false;
        match u.opcode {
            op::NOP_V | op::NOP_VF => {}
            op::LD_V | op::LDU_V => {
                e.mref.vaddr = u.imm;
                e.mref.size = opsz as u64;
                e.mref.mode = MemRefMode::Read;
                e.mref.ready = MemRefState::ExReady;
                pending_load = true;
            }
            op::ST_V | op::STU_V => {
                e.mref.vaddr = u.imm;
                e.mref.size = opsz as u64;
                e.mref.mode = MemRefMode::Write;
                e.mref.ready = MemRefState::ValReady;
                e.mref.data =
                    self.prf.vr.bytes(u.regs[R_RB])[..(opsz as usize).min(64)].to_vec();
            }
            _ => e.except = pack_except(Exception::Ud, 0),
        }
        if !pending_load && e.c_ready == 0 {
            e.c_ready = now + self.cfg.wb_latency;
        }
    }
}

/// 8-bit divide: ax / divisor → (remainder << 8) | quotient, or `None` on a
/// divide error.
fn div8(dividend: u64, divisor: u64, signed: bool) -> Option<u64> {
    if divisor == 0 {
        return None;
    }
    if signed {
        let a = dividend as u16 as i16;
        let d = divisor as u8 as i8;
        let q = (a as i32) / (d as i32);
        let r = (a as i32) % (d as i32);
        if q > i8::MAX as i32 || q < i8::MIN as i32 {
            return None;
        }
        Some(((r as u8 as u64) << 8) | q as u8 as u64)
    } else {
        let q = dividend / divisor;
        let r = dividend % divisor;
        if q > 0xff {
            return None;
        }
        Some((r << 8) | q)
    }
}

/// Wide divide of a double-width dividend; `None` on divide error or quotient
/// overflow.
fn div_wide(lo: u64, hi: u64, divisor: u64, opsz: u8, signed: bool, want_rem: bool) -> Option<u64> {
    let m = mask(opsz);
    if divisor & m == 0 {
        return None;
    }
    let bits = opsz as u32 * 8;
    if signed {
        let dividend = ((sx64(hi & m, opsz) as i128) << bits) | (lo & m) as i128;
        let d = sx64(divisor & m, opsz) as i64 as i128;
        let q = dividend / d;
        let r = dividend % d;
        let lim = 1i128 << (bits - 1);
        if q >= lim || q < -lim {
            return None;
        }
        Some(if want_rem { r as u64 & m } else { q as u64 & m })
    } else {
        let dividend = ((hi & m) as u128) << bits | (lo & m) as u128;
        let d = (divisor & m) as u128;
        let q = dividend / d;
        let r = dividend % d;
        if q > m as u128 {
            return None;
        }
        Some(if want_rem { r as u64 } else { q as u64 })
    }
}

/// Shift and rotate unit. Returns `(masked result, flags)`.
fn shift_op(opc: u16, v: u64, count: u32, cc_in: u64, opsz: u8) -> (u64, u64) {
    let m = mask(opsz);
    let bits = opsz as u32 * 8;
    let v = v & m;
    if count == 0 {
        // a zero count leaves the value and flags alone
        return (v, cc_in);
    }
    let mut carry = cc_in & cc::CF != 0;
    let r = match opc {
        op::LSL => {
            carry = count <= bits && v >> (bits - count) & 1 != 0;
            v.checked_shl(count).unwrap_or(0)
        }
        op::RSL => {
            carry = v >> (count - 1).min(63) & 1 != 0;
            v.checked_shr(count).unwrap_or(0)
        }
        op::RSA => {
            carry = v >> (count - 1).min(63) & 1 != 0;
            (sx64(v, opsz) as i64 >> count.min(63)) as u64
        }
        op::ROL => {
            let c = count % bits;
            v.checked_shl(c).unwrap_or(0) | v.checked_shr(bits - c).unwrap_or(v)
        }
        op::ROR => {
            let c = count % bits;
            v.checked_shr(c).unwrap_or(0) | v.checked_shl(bits - c).unwrap_or(v)
        }
        op::RCL | op::RCR => {
            // rotate through the carry flag over width + 1 bits
            let wide = (u128::from(carry) << bits) | v as u128;
            let width = bits + 1;
            let c = count % width;
            let rot = if opc == op::RCL {
                (wide << c | wide >> (width - c)) & ((1u128 << width) - 1)
            } else {
                (wide >> c | wide << (width - c)) & ((1u128 << width) - 1)
            };
            carry = rot >> bits & 1 != 0;
            rot as u64
        }
        _ => v,
    } & m;

    let mut f = flags_szp(r, opsz);
    if carry {
        f |= cc::CF;
    }
    if count == 1 && opc == op::LSL && (sign_bit(r, opsz) != carry) {
        f |= cc::OF;
    }
    (r, f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_and_sx() {
        assert_eq!(mask(1), 0xff);
        assert_eq!(mask(8), u64::MAX);
        assert_eq!(sx64(0x80, 1), 0xffff_ffff_ffff_ff80);
        assert_eq!(sx64(0x7f, 1), 0x7f);
        assert_eq!(sx64(0xffff_fffb, 4), (-5i64) as u64);
    }

    #[test]
    fn test_flags_add() {
        let (r, f) = flags_add(0xff, 1, 0, 1);
        assert_eq!(r, 0);
        assert_ne!(f & cc::CF, 0);
        assert_ne!(f & cc::ZF, 0);

        let (r, f) = flags_add(0x7f, 1, 0, 1);
        assert_eq!(r, 0x80);
        assert_ne!(f & cc::OF, 0);
        assert_ne!(f & cc::SF, 0);
        assert_eq!(f & cc::CF, 0);
    }

    #[test]
    fn test_flags_sub() {
        let (r, f) = flags_sub(5, 5, 0, 8);
        assert_eq!(r, 0);
        assert_ne!(f & cc::ZF, 0);
        assert_eq!(f & cc::CF, 0);

        let (r, f) = flags_sub(0, 1, 0, 4);
        assert_eq!(r, 0xffff_ffff);
        assert_ne!(f & cc::CF, 0);
        assert_ne!(f & cc::SF, 0);
    }

    #[test]
    fn test_div8() {
        assert_eq!(div8(17, 5, false), Some((2 << 8) | 3));
        assert_eq!(div8(17, 0, false), None);
        assert_eq!(div8(0x1000, 1, false), None); // quotient overflow
        assert_eq!(div8((-7i16) as u16 as u64, 2, true), Some(((-1i8) as u8 as u64) << 8 | (-3i8) as u8 as u64));
    }

    #[test]
    fn test_div_wide() {
        // 2^64 + 10 divided by 16
        assert_eq!(div_wide(10, 1, 16, 8, false, false), Some(0x1000_0000_0000_0000));
        assert_eq!(div_wide(10, 1, 16, 8, false, true), Some(10));
        assert_eq!(div_wide(10, 1, 0, 8, false, false), None);
        // unsigned overflow: high half not below the divisor
        assert_eq!(div_wide(0, 2, 2, 8, false, false), None);
    }

    #[test]
    fn test_shift_basic() {
        let (r, f) = shift_op(op::LSL, 0x80, 1, 0, 1);
        assert_eq!(r, 0);
        assert_ne!(f & cc::CF, 0);

        let (r, f) = shift_op(op::RSL, 0x3, 1, 0, 1);
        assert_eq!(r, 1);
        assert_ne!(f & cc::CF, 0);

        let (r, _) = shift_op(op::RSA, 0x80, 1, 0, 1);
        assert_eq!(r, 0xc0);

        let (r, _) = shift_op(op::ROL, 0x81, 1, 0, 1);
        assert_eq!(r, 0x03);

        let (r, f) = shift_op(op::ROR, 0x01, 1, 0, 1);
        assert_eq!(r, 0x80, "{f:x}");
    }

    #[test]
    fn test_shift_zero_count_keeps_flags() {
        let (r, f) = shift_op(op::LSL, 0x42, 0, cc::ZF | cc::CF, 4);
        assert_eq!(r, 0x42);
        assert_eq!(f, cc::ZF | cc::CF);
    }
}
