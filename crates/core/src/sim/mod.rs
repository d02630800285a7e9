//! Simulator shell.
//!
//! Owns the shared state aggregate, the memory manager, the selected
//! frontend, and the core, and steps them cycle by cycle.

/// The top-level simulator.
mod simulator;
/// The shared state aggregate.
pub mod state;

pub use simulator::{FrontendSelect, Simulator};
pub use state::SimulatorState;
