//! Cycle-accurate out-of-order core simulator library.
//!
//! This crate implements a superscalar, out-of-order microprocessor core model
//! with the following:
//! 1. **Core:** Decode, rename/allocate, issue, execute, and in-order commit over
//!    a reorder buffer, physical register files, and a typed reservation station.
//! 2. **Memory:** Two-level virtual memory (pages and frames) with protection,
//!    pending load/store buffers, alias detection, and self-modifying-code refetch.
//! 3. **Frontends:** A trivial fixed-width RISC fetch path and a streaming x86-64
//!    predecoder/decoder/cracker that expands macro instructions into uop bundles.
//! 4. **Simulation:** Shell state, clock loop, configuration, and statistics.

/// Common building blocks (latch buffers, exception and error types).
pub mod common;
/// Simulator configuration (defaults, enums, hierarchical config structures).
pub mod config;
/// Out-of-order backend (register files, rename tables, pipeline stages).
pub mod core;
/// Instruction frontends (RISC and x86-64) and branch prediction.
pub mod frontend;
/// Memory manager (pages, frames, pending request buffers).
pub mod mem;
/// Simulator shell (state aggregate, construction, cycle loop).
pub mod sim;
/// Simulation statistics collection and reporting.
pub mod stats;
/// Micro-op model (encoding, control bits, metadata table).
pub mod uops;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// Top-level simulator; construct with `Simulator::new` and drive with `cycle`.
pub use crate::sim::Simulator;
