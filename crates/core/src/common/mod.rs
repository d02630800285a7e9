//! Common building blocks shared across the simulator.
//!
//! This module provides:
//! 1. **Latch buffers:** The bounded ready-cycle queue every pipeline stage
//!    boundary is built from.
//! 2. **Error handling:** Architectural exception codes and the memory-manager
//!    error type.

/// Exception codes, the packed exception word, and memory errors.
pub mod error;
/// Bounded ordered buffer with per-entry ready cycles.
pub mod latch;

pub use error::{Exception, MemError};
pub use latch::{Latch, LatchError};
