//! Instruction frontends.
//!
//! A frontend turns bytes at the fetch address into uops in the uQueue and
//! maintains the in-flight instruction trace. Two exist:
//! 1. **RISC:** trivial fetch of 16-byte fixed-width uop records.
//! 2. **x86-64:** streaming predecode, a decoder station, and a cracker that
//!    expands each macro instruction into a uop bundle.

/// Branch prediction interface and the BTB predictor.
pub mod bpred;
/// The fixed-width RISC frontend.
pub mod risc;
/// The x86-64 frontend.
pub mod x64;

use crate::common::latch::Latch;
use crate::mem::MemoryManager;
use crate::sim::state::SimulatorState;
use crate::uops::Uop;

use bpred::BranchPredictor;
pub use risc::RiscFrontend;
pub use x64::X64Frontend;

/// The capability every frontend provides to the simulator and the core.
pub trait Frontend {
    /// Advances the frontend by one cycle, pushing uops into the uQueue.
    fn cycle(&mut self, state: &mut SimulatorState, mmu: &mut MemoryManager, uq: &mut Latch<Uop>);

    /// Discards buffered fetch and decode state.
    fn flush(&mut self);

    /// Redirects fetch to `rip`.
    fn set_fetch_addr(&mut self, rip: u64);

    /// The branch predictor, for commit-time updates.
    fn predictor_mut(&mut self) -> &mut dyn BranchPredictor;

    /// Renders the architectural summary in this frontend's register naming.
    fn summary(&self, state: &SimulatorState) -> String;
}

/// The selected frontend, dispatched by enum.
pub enum FrontendKind {
    /// Fixed-width RISC fetch.
    Risc(RiscFrontend),
    /// Streaming x86-64 frontend.
    X64(X64Frontend),
}

impl Frontend for FrontendKind {
    fn cycle(&mut self, state: &mut SimulatorState, mmu: &mut MemoryManager, uq: &mut Latch<Uop>) {
        match self {
            Self::Risc(fe) => fe.cycle(state, mmu, uq),
            Self::X64(fe) => fe.cycle(state, mmu, uq),
        }
    }

    fn flush(&mut self) {
        match self {
            Self::Risc(fe) => fe.flush(),
            Self::X64(fe) => fe.flush(),
        }
    }

    fn set_fetch_addr(&mut self, rip: u64) {
        match self {
            Self::Risc(fe) => fe.set_fetch_addr(rip),
            Self::X64(fe) => fe.set_fetch_addr(rip),
        }
    }

    fn predictor_mut(&mut self) -> &mut dyn BranchPredictor {
        match self {
            Self::Risc(fe) => fe.predictor_mut(),
            Self::X64(fe) => fe.predictor_mut(),
        }
    }

    fn summary(&self, state: &SimulatorState) -> String {
        match self {
            Self::Risc(fe) => fe.summary(state),
            Self::X64(fe) => fe.summary(state),
        }
    }
}
