//! The top-level simulator.
//!
//! Construction maps the machine code image and the stack, seeds the
//! architectural state, and selects a frontend; `cycle` then advances the
//! frontend and the core one tick at a time until the activity mask clears
//! and the pending store buffer drains.

use log::{debug, info};

use crate::common::latch::Latch;
use crate::config::{Config, STACK_SIZE, STACK_START, USER_START, X64_FETCH_BYTES};
use crate::core::Core;
use crate::frontend::{Frontend, FrontendKind, RiscFrontend, X64Frontend};
use crate::mem::{MemoryManager, P_R, P_W, P_X, PL_USER};
use crate::frontend::x64::{reg64, ureg};
use crate::sim::state::SimulatorState;
use crate::uops::Uop;

/// Frontend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontendSelect {
    /// Fixed-width RISC records.
    #[default]
    Risc,
    /// x86-64 byte stream.
    X64,
}

/// The assembled machine.
pub struct Simulator {
    /// Shared state aggregate.
    pub state: SimulatorState,
    /// Memory manager.
    pub mmu: MemoryManager,
    /// Decoded uop queue between frontend and core.
    pub uqueue: Latch<Uop>,
    /// The selected frontend.
    pub frontend: FrontendKind,
    /// The out-of-order core.
    pub core: Core,
    max_cycles: u64,
}

impl Simulator {
    /// Builds a simulator around a flat machine-code image.
    pub fn new(code: &[u8], frontend: FrontendSelect, config: &Config) -> Result<Self, String> {
        if frontend == FrontendSelect::Risc && code.len() % 16 != 0 {
            return Err("machine code length is not a multiple of 16 bytes".into());
        }
        if code.is_empty() {
            return Err("machine code is empty".into());
        }

        let mut state = SimulatorState::new(PL_USER, USER_START);
        let mut mmu = MemoryManager::new(&config.mem, PL_USER);
        let uqueue = Latch::new(config.sim.uqueue_size + X64_FETCH_BYTES);
        let core = Core::new(&config.core);

        let mut fe = match frontend {
            FrontendSelect::Risc => FrontendKind::Risc(RiscFrontend::new(config)),
            FrontendSelect::X64 => {
                // initialize the stack pointer for the x86 convention
                state
                    .arf
                    .gp
                    .write_u64(ureg(reg64::SP), STACK_START + STACK_SIZE as u64);
                FrontendKind::X64(X64Frontend::new(config))
            }
        };

        state.arf.ip.write_u64(USER_START);
        fe.set_fetch_addr(USER_START);

        // map the entire code image; writable so programs may patch themselves
        let frames = mmu
            .mmap_frames(USER_START, code, PL_USER, P_R | P_W | P_X, ".text")
            .map_err(|e| e.to_string())?;
        for f in frames {
            mmu.map_page(f, f, true, PL_USER, P_R | P_W | P_X)
                .map_err(|e| e.to_string())?;
        }

        // map the stack with the recognizable fill pattern
        let stack: Vec<u8> = (0..STACK_SIZE).map(|i| i as u8).collect();
        let frames = mmu
            .mmap_frames(STACK_START, &stack, PL_USER, P_R | P_W, ".data")
            .map_err(|e| e.to_string())?;
        for f in frames {
            mmu.map_page(f, f, true, PL_USER, P_R | P_W)
                .map_err(|e| e.to_string())?;
        }

        Ok(Self {
            state,
            mmu,
            uqueue,
            frontend: fe,
            core,
            max_cycles: config.sim.max_cycles,
        })
    }

    /// Advances the machine one cycle. Returns false once everything has
    /// drained and the simulation is over.
    pub fn cycle(&mut self) -> bool {
        self.state.cycle += 1;
        debug!("entering cycle {}", self.state.cycle);

        self.frontend
            .cycle(&mut self.state, &mut self.mmu, &mut self.uqueue);
        self.core.cycle(
            &mut self.state,
            &mut self.mmu,
            &mut self.uqueue,
            &mut self.frontend,
        );

        // pending stores still execute after the pipeline went quiet
        self.state.active != 0 || self.mmu.is_active()
    }

    /// Runs until completion or the cycle bound. Returns the cycle count.
    pub fn run(&mut self) -> u64 {
        while self.state.cycle < self.max_cycles {
            if !self.cycle() {
                break;
            }
        }
        info!(
            "simulator exited after {} cycles with rip {:#x}",
            self.state.cycle,
            self.state.arf.ip.read_u64()
        );
        self.state.cycle
    }

    /// The end-of-run report: register summary and event counters.
    pub fn summary(&self) -> String {
        let mut out = self.frontend.summary(&self.state);
        out.push('\n');
        out.push_str(&self.state.stats.report(self.state.cycle, self.state.exception));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risc_image_length_check() {
        let err = Simulator::new(&[0u8; 15], FrontendSelect::Risc, &Config::default());
        assert!(err.is_err());
        assert!(Simulator::new(&[0u8; 16], FrontendSelect::Risc, &Config::default()).is_ok());
    }

    #[test]
    fn test_x64_initial_state() {
        let sim = Simulator::new(&[0xf4], FrontendSelect::X64, &Config::default()).unwrap();
        assert_eq!(sim.state.arf.ip.read_u64(), USER_START);
        assert_eq!(
            sim.state.arf.gp.read_u64(ureg(reg64::SP)),
            STACK_START + STACK_SIZE as u64
        );
        assert_eq!(sim.state.in_flight.front(), Some(&USER_START));
    }
}
