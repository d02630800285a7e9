//! End-to-end RISC-frontend runs: raw uop records through the whole machine.

use o3sim_core::config::STACK_START;
use o3sim_core::sim::FrontendSelect;
use o3sim_core::uops::{ctrl, op, set_op_size};
use o3sim_core::{Config, Simulator};

/// Encodes one 16-byte wire record; the first three fields are big-endian.
fn record(opcode: u16, control: u16, regs: [u8; 4], imm: u64) -> Vec<u8> {
    let mut b = vec![0u8; 16];
    b[0..2].copy_from_slice(&opcode.to_be_bytes());
    b[2..4].copy_from_slice(&control.to_be_bytes());
    b[4..8].copy_from_slice(&regs);
    b[8..16].copy_from_slice(&imm.to_be_bytes());
    b
}

fn program(records: &[Vec<u8>]) -> Vec<u8> {
    records.concat()
}

fn run(code: &[u8]) -> Simulator {
    let mut sim = Simulator::new(code, FrontendSelect::Risc, &Config::default()).unwrap();
    sim.run();
    sim
}

const Q: u16 = set_op_size(8);

#[test]
fn test_set_register() {
    let code = program(&[record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 5], 42)]);
    let sim = run(&code);

    assert_eq!(sim.state.arf.gp.read_u64(5), 42);
    assert_eq!(sim.state.stats.committed_micro, 1);
    assert_eq!(sim.state.stats.committed_macro, 1);
    assert_eq!(sim.state.exception, 0);
}

#[test]
fn test_add_dependence_chain() {
    let code = program(&[
        record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 1], 5),
        record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 2], 7),
        record(op::ADD, Q | ctrl::USE_RA | ctrl::USE_RB, [1, 2, 0, 3], 0),
    ]);
    let sim = run(&code);

    assert_eq!(sim.state.arf.gp.read_u64(1), 5);
    assert_eq!(sim.state.arf.gp.read_u64(2), 7);
    assert_eq!(sim.state.arf.gp.read_u64(3), 12);
    assert_eq!(sim.state.stats.committed_micro, 3);
    assert_eq!(sim.state.exception, 0);
}

#[test]
fn test_zero_register_is_never_written() {
    let code = program(&[record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 0], 99)]);
    let sim = run(&code);

    assert_eq!(sim.state.arf.gp.read_u64(0), 0);
    assert_eq!(sim.state.exception, 0);
}

#[test]
fn test_store_then_load_roundtrip() {
    let addr = STACK_START + 0x10;
    let code = program(&[
        record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 1], 0x1234),
        record(op::ST, Q | ctrl::USE_RB | ctrl::USE_IMM, [0, 1, 0, 0], addr),
        record(op::LD64, Q | ctrl::USE_IMM, [0, 0, 0, 2], addr),
    ]);
    let sim = run(&code);

    assert_eq!(sim.state.arf.gp.read_u64(2), 0x1234);
    assert_eq!(sim.state.stats.committed_micro, 3);
    assert_eq!(sim.state.exception, 0);
}

#[test]
fn test_branch_misprediction_recovery() {
    // set r1 = 1; skip the next record; set r2 = 7
    let code = program(&[
        record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 1], 1),
        record(op::BRANCHR, Q | ctrl::USE_IMM, [0, 0, 0, 0], 16),
        record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 1], 99), // skipped
        record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 2], 7),
    ]);
    let sim = run(&code);

    assert_eq!(sim.state.arf.gp.read_u64(1), 1);
    assert_eq!(sim.state.arf.gp.read_u64(2), 7);
    assert!(sim.state.stats.flushes >= 1);
    assert_eq!(sim.state.exception, 0);
}

#[test]
fn test_branch_register_zero() {
    // r1 is nonzero, so the branch falls through and r2 is written
    let code = program(&[
        record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 1], 3),
        record(op::BRANCHRZ, Q | ctrl::USE_RA | ctrl::USE_IMM, [1, 0, 0, 0], 16),
        record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 2], 7),
    ]);
    let sim = run(&code);

    assert_eq!(sim.state.arf.gp.read_u64(2), 7);
    assert_eq!(sim.state.exception, 0);
}

#[test]
fn test_undefined_opcode_halts() {
    let code = program(&[
        record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 1], 1),
        record(0x0fff, Q, [0, 0, 0, 0], 0),
    ]);
    let sim = run(&code);

    assert_eq!(sim.state.exception & 0xffff, 0x01); // #UD
    assert_eq!(sim.state.stats.committed_micro, 2);
}

#[test]
fn test_invalid_register_reference() {
    // r40 exceeds the GP architectural file
    let code = program(&[record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 40], 1)]);
    let sim = run(&code);

    assert_eq!(sim.state.exception & 0xffff, 0x04); // #REG
}

#[test]
fn test_small_rob_still_correct() {
    let mut config = Config::default();
    config.core.rob_size = 4;
    config.core.issue_depth = 4;
    config.core.lqueue_size = 4;

    let code = program(&[
        record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 1], 5),
        record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 2], 7),
        record(op::ADD, Q | ctrl::USE_RA | ctrl::USE_RB, [1, 2, 0, 3], 0),
        record(op::ADD, Q | ctrl::USE_RA | ctrl::USE_RB, [3, 3, 0, 4], 0),
        record(op::ADD, Q | ctrl::USE_RA | ctrl::USE_RB, [4, 1, 0, 5], 0),
    ]);
    let mut sim = Simulator::new(&code, FrontendSelect::Risc, &config).unwrap();
    sim.run();

    assert_eq!(sim.state.arf.gp.read_u64(3), 12);
    assert_eq!(sim.state.arf.gp.read_u64(4), 24);
    assert_eq!(sim.state.arf.gp.read_u64(5), 29);
    assert_eq!(sim.state.stats.committed_micro, 5);
    assert_eq!(sim.state.exception, 0);
}

#[test]
fn test_flags_through_condition_chain() {
    // sub r3 = r1 - r2 with equal values sets ZF; the conditional move picks rb
    let code = program(&[
        record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 1], 9),
        record(op::SET, Q | ctrl::USE_IMM, [0, 0, 0, 2], 9),
        record(
            op::SUB,
            Q | ctrl::USE_RA | ctrl::USE_RB | ctrl::SET_COND,
            [1, 2, 0, 3],
            0,
        ),
        // movz r4 = r2 when ZF is set (subcode 4 = equal)
        record(
            op::MOVCC + 4,
            Q | ctrl::USE_RA | ctrl::USE_RB | ctrl::USE_COND,
            [4, 2, 0, 4],
            0,
        ),
    ]);
    let sim = run(&code);

    assert_eq!(sim.state.arf.gp.read_u64(3), 0);
    assert_eq!(sim.state.arf.gp.read_u64(4), 9);
    // ZF reached the architectural flags
    assert_ne!(sim.state.arf.cc.read_u64() & 0x40, 0);
    assert_eq!(sim.state.exception, 0);
}
