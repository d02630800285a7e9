//! x86-64 frontend.
//!
//! Three cooperating pieces feed the uQueue:
//! 1. **Fetch/predecode:** a 16-byte aligned window walked by the streaming
//!    predecoder; partial instructions carry across windows.
//! 2. **Decode station:** four fast decoders, one complex, one microcode
//!    sequencer; instructions route by the predecoder's hint.
//! 3. **Cracker:** expands each macro instruction into an ordered uop bundle
//!    respecting the renamer's conventions.

/// Macro → micro expansion.
mod crack;
/// The streaming predecoder.
pub mod predecode;
/// Opcode tables.
pub mod tables;

use std::collections::VecDeque;
use std::fmt::Write as _;

use log::debug;

use crate::common::error::MemError;
use crate::common::latch::Latch;
use crate::config::{Config, X64_FETCH_BYTES};
use crate::mem::{MemoryManager, P_X};
use crate::sim::state::{act, SimulatorState};
use crate::uops::{BranchKind, Uop};

use super::bpred::{BranchPredictor, BtbPredictor};
use super::Frontend;

use predecode::{DecoderClass, Predecoder, X64Op};
use tables::modrm;

/// x86-64 general purpose register numbers in the GP register file. The
/// architectural file leaves index 0 as the hard-wired zero, so every x86
/// register maps to its number plus one.
pub mod reg64 {
    /// rax.
    pub const A: u8 = 0;
    /// rcx.
    pub const C: u8 = 1;
    /// rdx.
    pub const D: u8 = 2;
    /// rbx.
    pub const B: u8 = 3;
    /// rsp; doubles as ah with byte operands and no REX.
    pub const SP: u8 = 4;
    /// rbp; doubles as ch.
    pub const BP: u8 = 5;
    /// rsi; doubles as dh.
    pub const SI: u8 = 6;
    /// rdi; doubles as bh.
    pub const DI: u8 = 7;
    /// fs segment base.
    pub const FSBASE: u8 = 16;
    /// gs segment base.
    pub const GSBASE: u8 = 17;
    /// First temporary register for cracked bundles.
    pub const T0: u8 = 18;
    /// Last temporary register.
    pub const TMAX: u8 = 33;
    /// First vector temporary.
    pub const TMM0: u8 = 16;
    /// Last vector temporary.
    pub const TMMMAX: u8 = 31;
}

/// Register names for the architectural summary.
const X64_GP_NAMES: [&str; 18] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15", "fsbase", "gsbase",
];

/// Maps an x86 register number into the uop register space.
#[inline]
pub const fn ureg(r: u8) -> u8 {
    r + 1
}

/// Maps an x86 register number, or yields the invalid register 0.
#[inline]
pub const fn ureg_if(r: u8, valid: bool) -> u8 {
    if valid {
        r + 1
    } else {
        0
    }
}

/// Branch classification of a predecoded instruction.
fn branch_kind_x64(op: &X64Op) -> BranchKind {
    if op.bytes.is_empty() {
        return BranchKind::None;
    }
    let opcode = op.opcode();
    match op.meta.op_mode {
        0 => match opcode {
            0x70..=0x7f | 0xca | 0xcb => BranchKind::Cond,
            // rets and calls always jump
            0xc2 | 0xc3 | 0xe8 | 0xe9 | 0xeb => BranchKind::Uncond,
            0xff => {
                let reg = modrm::reg(op.modrm());
                if (0b010..=0b101).contains(&reg) {
                    BranchKind::Uncond
                } else {
                    BranchKind::None
                }
            }
            _ => BranchKind::None,
        },
        1 => match opcode {
            0x80..=0x8f => BranchKind::Cond,
            _ => BranchKind::None,
        },
        _ => BranchKind::None,
    }
}

/// One decoder in the station.
struct X64Decoder {
    kind: DecoderClass,
    busy: bool,
    op: X64Op,
}

/// The x86-64 frontend.
pub struct X64Frontend {
    bp: BtbPredictor,
    fetch_addr: u64,
    pd: Predecoder,
    iqueue: Latch<X64Op>,
    decoders: Vec<X64Decoder>,
    /// Decoder ids in uQueue emission order.
    next_decoder: VecDeque<usize>,
    /// Last used temporary GP register (ring).
    cur_tmp_gp: u8,
    /// Last used temporary vector register (ring).
    cur_tmp_vr: u8,
    fetch_latency: u64,
    decode_latency: u64,
    iqueue_size: usize,
    uqueue_size: usize,
    silent_halt: bool,
}

impl X64Frontend {
    /// Creates the frontend with the fixed decoder station.
    pub fn new(config: &Config) -> Self {
        let mut pd = Predecoder::default();
        pd.reset();
        debug!("x64 frontend initialized with:");
        debug!("        fetch block size: {X64_FETCH_BYTES}");
        debug!("        iQueue size:      {}", config.fetch.iqueue_size);
        Self {
            bp: BtbPredictor::new(config.fetch.btb_size),
            fetch_addr: 0,
            pd,
            iqueue: Latch::new(config.fetch.iqueue_size),
            decoders: vec![
                X64Decoder { kind: DecoderClass::Fast, busy: false, op: X64Op::default() },
                X64Decoder { kind: DecoderClass::Fast, busy: false, op: X64Op::default() },
                X64Decoder { kind: DecoderClass::Fast, busy: false, op: X64Op::default() },
                X64Decoder { kind: DecoderClass::Fast, busy: false, op: X64Op::default() },
                X64Decoder { kind: DecoderClass::Complex, busy: false, op: X64Op::default() },
                X64Decoder { kind: DecoderClass::Msrom, busy: false, op: X64Op::default() },
            ],
            next_decoder: VecDeque::new(),
            cur_tmp_gp: reg64::T0.wrapping_sub(1),
            cur_tmp_vr: reg64::TMM0.wrapping_sub(1),
            fetch_latency: config.fetch.fetch_latency,
            decode_latency: config.core.decode_latency,
            iqueue_size: config.fetch.iqueue_size,
            uqueue_size: config.sim.uqueue_size,
            silent_halt: config.sim.silent_halt,
        }
    }

    /// The next temporary register of a class; a ring over the tail range.
    /// Rename allocates a fresh physical register on each use, so the ring may
    /// wrap faster than the renamer exposes.
    pub(self) fn tmp_gp(&mut self) -> u8 {
        self.cur_tmp_gp =
            reg64::T0 + (self.cur_tmp_gp.wrapping_sub(reg64::T0).wrapping_add(1)
                % (reg64::TMAX - reg64::T0 + 1));
        self.cur_tmp_gp
    }

    /// Vector flavor of [`Self::tmp_gp`].
    #[allow(dead_code)]
    pub(self) fn tmp_vr(&mut self) -> u8 {
        self.cur_tmp_vr =
            reg64::TMM0 + (self.cur_tmp_vr.wrapping_sub(reg64::TMM0).wrapping_add(1)
                % (reg64::TMMMAX - reg64::TMM0 + 1));
        self.cur_tmp_vr
    }

    /// Fetches a window and streams the predecoder over it, pushing completed
    /// instructions into the iQueue with their prediction bookkeeping.
    fn fetch(&mut self, state: &mut SimulatorState, mmu: &mut MemoryManager) {
        if state.active & (act::IF | act::PD) == 0 {
            debug!("IFPD:   fetch/predecode inactive");
            return;
        }

        // worst case the window holds 16 one-byte instructions
        if self.iqueue.len() + 16 >= self.iqueue_size {
            debug!("IFPD: * instruction queue is full, stalling frontend");
            return;
        }

        let fetchbase = self.fetch_addr & !(X64_FETCH_BYTES as u64 - 1);
        let fetchoffs = (self.fetch_addr & (X64_FETCH_BYTES as u64 - 1)) as usize;
        debug!("IFPD:   fetchaddr {:#018x} (base {fetchbase:#x} offs {fetchoffs})", self.fetch_addr);

        if mmu.is_busy(fetchbase, X64_FETCH_BYTES as u64) {
            debug!("IFPD:   waiting for memory");
            return;
        }

        let mut block = [0u8; X64_FETCH_BYTES];
        // 0: none, 1: fault on this instruction, 2: fault after the current one
        let mut inject_pf = 0u8;
        let blocksz = match mmu.read(fetchbase, &mut block, P_X) {
            Ok((_, n)) => n as usize,
            Err(MemError::InvalidAddr) => {
                state.active &= !(act::IF | act::PD);
                if self.silent_halt {
                    debug!("IFPD:   end of code reached");
                } else {
                    inject_pf = if self.pd.part.bytes.is_empty() { 1 } else { 2 };
                }
                0
            }
            Err(e) => {
                debug!("IFPD:   fetch {e}, injecting #PF");
                inject_pf = 1;
                0
            }
        };

        if blocksz < X64_FETCH_BYTES {
            // the last bytes of the window are not instruction bytes
            debug!("IFPD:   end of code reached");
            state.active &= !(act::IF | act::PD);
        }

        let mut idx = fetchoffs.min(blocksz);
        loop {
            let complete = self.pd.parse(&block[..blocksz], &mut idx);

            if self.pd.ud_shutdown {
                state.active &= !(act::IF | act::PD);
            }

            if !complete {
                // instruction continues in the next window
                self.fetch_addr = fetchbase + X64_FETCH_BYTES as u64;
                debug!("IFPD:   instruction incomplete, fetching next block");
                if inject_pf == 0 {
                    break;
                }
            }

            let seq = state.in_flight.back().copied().unwrap_or(self.fetch_addr)
                + self.pd.part.bytes.len() as u64;
            state.seq_addrs.push_back(seq);

            let pred = if branch_kind_x64(&self.pd.part) != BranchKind::None {
                self.bp.predict(self.fetch_addr, seq, u64::MAX)
            } else {
                seq
            };

            if inject_pf == 1 {
                self.pd.part.len = 0xff; // decodes to int #PF
            } else if inject_pf == 2 {
                inject_pf = 1;
            }

            let part = std::mem::take(&mut self.pd.part);
            debug!("IFPD:   predecode yielded {} byte(s)", part.bytes.len());
            self.pd.part.bytes.reserve(15);
            let _ = self.iqueue.push_back(state.cycle + self.fetch_latency, part);

            if pred != seq {
                // fetch continues somewhere else, restart the predecoder
                self.fetch_addr = pred;
                state.active |= act::IF | act::PD;
                self.pd.reset();
                state.in_flight.push_back(pred);
                debug!("IFPD:   predicted rip {pred:#x}");
                break;
            }
            self.fetch_addr = seq;
            state.in_flight.push_back(pred);

            if inject_pf != 0 {
                break;
            }
            if idx >= blocksz {
                // completed exactly at the window end; continue in the next
                self.fetch_addr = fetchbase + X64_FETCH_BYTES as u64;
                break;
            }
        }

        if blocksz == 0 && inject_pf != 0 {
            let mut part = std::mem::take(&mut self.pd.part);
            part.len = 0xff;
            let _ = self.iqueue.push_back(state.cycle + 1, part);
            state.seq_addrs.push_back(self.fetch_addr);
            state.in_flight.push_back(self.fetch_addr);
        }
    }

    /// Assigns iQueue entries to idle decoders and drains finished bundles
    /// into the uQueue in assignment order.
    fn udecode(&mut self, state: &mut SimulatorState, uq: &mut Latch<Uop>) {
        if state.active & act::DE == 0 {
            debug!("DE__:   macro decode inactive");
            return;
        }
        let now = state.cycle;

        while self.iqueue.ready(now) && !self.iqueue.is_empty() {
            let class = match self.iqueue.front(now) {
                Ok(op) => op.meta.decoder,
                Err(_) => break,
            };
            let Some((id, dec)) = self
                .decoders
                .iter_mut()
                .enumerate()
                .find(|(_, d)| !d.busy && d.kind == class)
            else {
                break;
            };
            debug!("DE__:   matching decoder found: {id} {}", class.name());
            dec.op = self.iqueue.take_front(now).expect("readiness was checked");
            dec.busy = true;
            self.next_decoder.push_back(id);
        }

        while let Some(&id) = self.next_decoder.front() {
            if !self.decoders[id].busy {
                break;
            }
            // worst case a bundle holds four uops
            if uq.len() + 4 >= self.uqueue_size {
                debug!("DE__: * uQueue might overflow, stalling macro decode");
                break;
            }
            let op = std::mem::take(&mut self.decoders[id].op);
            debug!("DE.{id}:   decoding macro op ({} bytes)", op.bytes.len());
            let bundle = self.crack(&op);
            for u in bundle {
                let _ = uq.push_back(now + self.decode_latency, u);
            }
            self.decoders[id].busy = false;
            self.next_decoder.pop_front();
        }

        if self.iqueue.is_empty()
            && self.next_decoder.is_empty()
            && state.active & (act::IF | act::PD) == 0
        {
            state.active &= !act::DE;
        }
    }
}

impl Frontend for X64Frontend {
    fn cycle(&mut self, state: &mut SimulatorState, mmu: &mut MemoryManager, uq: &mut Latch<Uop>) {
        self.fetch(state, mmu);
        self.udecode(state, uq);
    }

    fn flush(&mut self) {
        debug!("FE64:   flushing all buffers");
        self.pd.reset();
        self.iqueue.clear();
        self.next_decoder.clear();
        for dec in &mut self.decoders {
            dec.busy = false;
            dec.op = X64Op::default();
        }
        self.cur_tmp_gp = reg64::T0.wrapping_sub(1);
        self.cur_tmp_vr = reg64::TMM0.wrapping_sub(1);
    }

    fn set_fetch_addr(&mut self, rip: u64) {
        self.fetch_addr = rip;
    }

    fn predictor_mut(&mut self) -> &mut dyn BranchPredictor {
        &mut self.bp
    }

    fn summary(&self, state: &SimulatorState) -> String {
        let mut out = String::from("\n");
        for (i, name) in X64_GP_NAMES.iter().enumerate() {
            let _ = write!(
                out,
                "{:<4} {:016x}{}",
                name,
                state.arf.gp.read_u64(ureg(i as u8)),
                if i % 4 == 3 { "\n" } else { " " }
            );
        }
        let _ = write!(out, "\nrflags {:016x}\n", state.arf.cc.read_u64());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tmp_ring_wraps() {
        let mut fe = X64Frontend::new(&Config::default());
        let first = fe.tmp_gp();
        assert_eq!(first, reg64::T0);
        let count = (reg64::TMAX - reg64::T0) as usize;
        for _ in 0..count {
            let t = fe.tmp_gp();
            assert!((reg64::T0..=reg64::TMAX).contains(&t));
        }
        // the ring wraps back to the start
        assert_eq!(fe.tmp_gp(), reg64::T0);
    }

    #[test]
    fn test_branch_kind() {
        let mut op = X64Op {
            bytes: vec![0x75, 0xfb],
            ..Default::default()
        };
        assert_eq!(branch_kind_x64(&op), BranchKind::Cond);
        op.bytes = vec![0xc3];
        assert_eq!(branch_kind_x64(&op), BranchKind::Uncond);
        op.bytes = vec![0x90];
        assert_eq!(branch_kind_x64(&op), BranchKind::None);
        op.bytes.clear();
        assert_eq!(branch_kind_x64(&op), BranchKind::None);
    }
}
