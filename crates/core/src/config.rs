//! Configuration system for the simulator.
//!
//! This module defines all configuration structures and constants used to
//! parameterize the simulator. It provides:
//! 1. **Architectural constants:** Register-class geometry and the memory layout.
//!    These size fixed arrays and are not runtime-tunable.
//! 2. **Defaults:** Baseline pipeline widths, latencies, and queue sizes.
//! 3. **Structures:** Hierarchical config for the shell, core, memory, and fetch.
//!
//! Configuration is supplied as JSON via the CLI's `--config` flag or use
//! `Config::default()`, which matches the baseline machine.

use serde::Deserialize;

/// Implemented bits for canonical virtual addresses.
pub const ADDR_BITS: u32 = 48;

/// Virtual page size in bytes (equals the frame size).
pub const PAGE_SIZE: u64 = 4096;

/// Usable frame-number bits.
pub const PAGE_MASK: u64 = !(PAGE_SIZE - 1);

/// Highest mappable frame address.
pub const PADDR_LIMIT: u64 = 0xffff_ffff_0000_0000;

/// Highest mappable virtual address.
pub const VADDR_LIMIT: u64 = PADDR_LIMIT;

/// Start of the kernel mapping.
pub const KERNEL_START: u64 = 0x1000;

/// Start of userspace; machine code is mapped here.
pub const USER_START: u64 = 0x8000;

/// Stack base address.
pub const STACK_START: u64 = 0x10_0000;

/// Stack size in bytes.
pub const STACK_SIZE: usize = 16384;

/// GP register width in bytes.
pub const GP_SIZE: usize = 8;
/// Number of architectural GP registers (r0 is the hard-wired zero).
pub const GP_LEN: usize = 36;
/// Number of physical GP registers.
pub const GP_PHYS: usize = 180;

/// FP register width in bytes.
pub const FP_SIZE: usize = 16;
/// Number of architectural FP registers.
pub const FP_LEN: usize = 16;
/// Number of physical FP registers.
pub const FP_PHYS: usize = 64;

/// Vector register width in bytes (512-bit).
pub const VR_SIZE: usize = 64;
/// Number of architectural vector registers.
pub const VR_LEN: usize = 32;
/// Number of physical vector registers.
pub const VR_PHYS: usize = 128;

/// Condition register width in bytes (rflags).
pub const CC_SIZE: usize = 8;
/// Number of condition registers; condition registers are not renamed.
pub const CC_LEN: usize = 32;

/// Reservation station port count.
pub const RS_PORTS: usize = 8;

/// Bytes read from memory per x86-64 fetch and sent to predecode.
pub const X64_FETCH_BYTES: usize = 16;

const _: () = assert!(PAGE_SIZE.is_power_of_two());
const _: () = assert!(VADDR_LIMIT >= USER_START);
const _: () = assert!(GP_PHYS >= GP_LEN && FP_PHYS >= FP_LEN && VR_PHYS >= VR_LEN);

/// Default pipeline and machine parameters.
///
/// Widths and sizes should match if a true latch behavior (in = out) is
/// expected between adjacent stages.
mod defaults {
    /// Max cycles before a forced halt.
    pub const MAX_CYCLES: u64 = u64::MAX;
    /// Number of uops in the uQueue.
    pub const UQUEUE_SIZE: usize = 128;

    /// Instructions decoded each cycle.
    pub const DECODE_WIDTH: usize = 6;
    /// Cycles until a decoded uop is visible in the ID/RA latch.
    pub const DECODE_LATENCY: u64 = 1;
    /// Logical number of uops in the decode/rename latch.
    pub const ID_RA_SIZE: usize = 6;

    /// Uops renamed and allocated each cycle.
    pub const ALLOC_WIDTH: usize = 6;
    /// Latency before an allocated uop is visible in the ROB.
    pub const ALLOC_LATENCY: u64 = 1;
    /// Uops in the reorder buffer.
    pub const ROB_SIZE: usize = 224;

    /// Uops issued each cycle.
    pub const ISSUE_WIDTH: usize = 8;
    /// Latency before an issued uop may start execution.
    pub const ISSUE_LATENCY: u64 = 0;
    /// ROB entries searched for issue candidates ("RS entries").
    pub const ISSUE_DEPTH: usize = 97;

    /// Cycles until an executed uop is commit-ready at the ROB.
    pub const WB_LATENCY: u64 = 1;

    /// Max commits per cycle.
    pub const COMMIT_WIDTH: usize = 6;

    /// Loads executed each cycle.
    pub const LOAD_WIDTH: usize = 4;
    /// Entries in the load queue.
    pub const LQUEUE_SIZE: usize = ROB_SIZE;

    /// Store latency into memory.
    pub const ST_LATENCY: u64 = 0;
    /// Load latency from memory.
    pub const LD_LATENCY: u64 = 0;

    /// RISC instructions fetched each cycle.
    pub const FETCH_WIDTH: usize = 4;
    /// Fetch plus branch-prediction latency.
    pub const FETCH_LATENCY: u64 = 1;

    /// Branch target buffer capacity.
    pub const BTB_SIZE: usize = 4096;

    /// x86-64 instructions buffered in the instruction queue.
    pub const IQUEUE_SIZE: usize = 50;
}

/// Load execution ordering behind a busy (aliasing) pending store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum LoadReorder {
    /// A deferred load does not block independent younger loads (default).
    #[default]
    Relaxed,
    /// A deferred load defers every load behind it.
    Strict,
}

/// Shell-level parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Max cycles before a forced halt; debug use.
    pub max_cycles: u64,
    /// Stop without an exception when control runs off the mapped code.
    pub silent_halt: bool,
    /// Number of uops in the uQueue.
    pub uqueue_size: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_cycles: defaults::MAX_CYCLES,
            silent_halt: true,
            uqueue_size: defaults::UQUEUE_SIZE,
        }
    }
}

/// Backend pipeline parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Instructions decoded each cycle.
    pub decode_width: usize,
    /// Cycles until a decoded uop reaches the ID/RA latch.
    pub decode_latency: u64,
    /// Logical size of the decode/rename latch.
    pub id_ra_size: usize,
    /// Uops renamed and allocated each cycle.
    pub alloc_width: usize,
    /// Latency before an allocated uop is visible in the ROB.
    pub alloc_latency: u64,
    /// Reorder buffer capacity.
    pub rob_size: usize,
    /// Uops issued each cycle.
    pub issue_width: usize,
    /// Latency before an issued uop may start execution.
    pub issue_latency: u64,
    /// ROB entries scanned for issue candidates.
    pub issue_depth: usize,
    /// Cycles until an executed uop is commit-ready.
    pub wb_latency: u64,
    /// Max commits per cycle.
    pub commit_width: usize,
    /// Loads executed each cycle.
    pub load_width: usize,
    /// Load queue capacity.
    pub lqueue_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            decode_width: defaults::DECODE_WIDTH,
            decode_latency: defaults::DECODE_LATENCY,
            id_ra_size: defaults::ID_RA_SIZE,
            alloc_width: defaults::ALLOC_WIDTH,
            alloc_latency: defaults::ALLOC_LATENCY,
            rob_size: defaults::ROB_SIZE,
            issue_width: defaults::ISSUE_WIDTH,
            issue_latency: defaults::ISSUE_LATENCY,
            issue_depth: defaults::ISSUE_DEPTH,
            wb_latency: defaults::WB_LATENCY,
            commit_width: defaults::COMMIT_WIDTH,
            load_width: defaults::LOAD_WIDTH,
            lqueue_size: defaults::LQUEUE_SIZE,
        }
    }
}

/// Memory subsystem parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemConfig {
    /// Load latency from memory in cycles.
    pub ld_latency: u64,
    /// Store latency into memory in cycles.
    pub st_latency: u64,
    /// Load ordering behind pending stores.
    pub load_reorder: LoadReorder,
}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            ld_latency: defaults::LD_LATENCY,
            st_latency: defaults::ST_LATENCY,
            load_reorder: LoadReorder::Relaxed,
        }
    }
}

/// Frontend parameters shared by both frontends.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// RISC instructions fetched each cycle.
    pub fetch_width: usize,
    /// Fetch plus branch-prediction latency.
    pub fetch_latency: u64,
    /// Branch target buffer capacity.
    pub btb_size: usize,
    /// x86-64 instruction queue capacity.
    pub iqueue_size: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            fetch_width: defaults::FETCH_WIDTH,
            fetch_latency: defaults::FETCH_LATENCY,
            btb_size: defaults::BTB_SIZE,
            iqueue_size: defaults::IQUEUE_SIZE,
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell-level parameters.
    pub sim: SimConfig,
    /// Backend pipeline parameters.
    pub core: CoreConfig,
    /// Memory subsystem parameters.
    pub mem: MemConfig,
    /// Frontend parameters.
    pub fetch: FetchConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_baseline() {
        let c = Config::default();
        assert_eq!(c.core.decode_width, 6);
        assert_eq!(c.core.rob_size, 224);
        assert_eq!(c.core.issue_width, 8);
        assert_eq!(c.core.issue_depth, 97);
        assert_eq!(c.core.commit_width, 6);
        assert_eq!(c.core.lqueue_size, c.core.rob_size);
        assert_eq!(c.mem.load_reorder, LoadReorder::Relaxed);
        assert!(c.sim.silent_halt);
    }

    #[test]
    fn test_partial_json_overrides() {
        let json = r#"{ "core": { "rob_size": 64 }, "mem": { "ld_latency": 3 } }"#;
        let c: Config = serde_json::from_str(json).unwrap();
        assert_eq!(c.core.rob_size, 64);
        assert_eq!(c.mem.ld_latency, 3);
        // untouched fields keep their defaults
        assert_eq!(c.core.decode_width, 6);
        assert_eq!(c.mem.st_latency, 0);
    }
}
