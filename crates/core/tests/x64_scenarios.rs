//! End-to-end x86-64 runs: byte streams through predecode, crack, and the
//! out-of-order backend.

use o3sim_core::common::error::{except_num, Exception};
use o3sim_core::frontend::x64::{reg64, ureg};
use o3sim_core::sim::FrontendSelect;
use o3sim_core::{Config, Simulator};

fn run(code: &[u8]) -> Simulator {
    let mut sim = Simulator::new(code, FrontendSelect::X64, &Config::default()).unwrap();
    sim.run();
    sim
}

fn gp(sim: &Simulator, reg: u8) -> u64 {
    sim.state.arf.gp.read_u64(ureg(reg))
}

#[test]
fn test_mov_add_halt() {
    // mov rax, 5; add rax, 3; hlt
    let code = [
        0x48, 0xc7, 0xc0, 0x05, 0x00, 0x00, 0x00, // mov rax, 5
        0x48, 0x83, 0xc0, 0x03, // add rax, 3
        0xf4, // hlt (no ring 0 -> #GP)
    ];
    let sim = run(&code);

    assert_eq!(gp(&sim, reg64::A), 8);
    assert_eq!(except_num(sim.state.exception), Exception::Gp as u16);
    assert_eq!(sim.state.stats.committed_micro, 3);
    assert_eq!(sim.state.stats.committed_macro, 2);
}

#[test]
fn test_dec_jnz_loop() {
    // mov rcx, 4; loop: dec rcx; jnz loop
    let code = [
        0x48, 0xc7, 0xc1, 0x04, 0x00, 0x00, 0x00, // mov rcx, 4
        0x48, 0xff, 0xc9, // dec rcx
        0x75, 0xfb, // jnz -5
    ];
    let sim = run(&code);

    assert_eq!(gp(&sim, reg64::C), 0);
    // init plus four iterations of dec + jnz
    assert_eq!(sim.state.stats.committed_macro, 9);
    assert_eq!(sim.state.stats.committed_micro, 9);
    // the final dec left ZF architecturally visible
    assert_ne!(sim.state.arf.cc.read_u64() & 0x40, 0);
    assert_eq!(sim.state.exception, 0);
}

#[test]
fn test_rip_relative_load() {
    // mov rax, [rip+0x10]; hlt; nop padding; 8 data bytes
    let mut code = vec![
        0x48, 0x8b, 0x05, 0x10, 0x00, 0x00, 0x00, // mov rax, [rip+0x10]
        0xf4, // hlt
    ];
    code.extend(std::iter::repeat(0x90).take(15)); // up to 0x8017
    code.extend(0xdead_beef_cafe_babe_u64.to_le_bytes());
    let sim = run(&code);

    assert_eq!(gp(&sim, reg64::A), 0xdead_beef_cafe_babe);
    assert_eq!(except_num(sim.state.exception), Exception::Gp as u16);
}

#[test]
fn test_self_modifying_code() {
    // mov byte [rip+0], 0x90 rewrites the following hlt into a nop; the
    // second hlt then stops the machine
    let code = [
        0xc6, 0x05, 0x00, 0x00, 0x00, 0x00, 0x90, // mov byte [rip+0], 0x90
        0xf4, // hlt, becomes nop
        0xf4, // hlt
    ];
    let sim = run(&code);

    assert!(sim.state.stats.flushes >= 1);
    assert_eq!(except_num(sim.state.exception), Exception::Gp as u16);
    // the store, the patched nop, and the final hlt all retired
    assert_eq!(sim.state.stats.committed_micro, 4);
    // the machine halted on the second hlt
    assert_eq!(sim.state.arf.ip.read_u64(), 0x8008);
}

#[test]
fn test_store_load_aliasing() {
    // mov rax, 0x1234; mov [rsp-8], rax; mov rbx, [rsp-8]; hlt
    let code = [
        0x48, 0xc7, 0xc0, 0x34, 0x12, 0x00, 0x00, // mov rax, 0x1234
        0x48, 0x89, 0x44, 0x24, 0xf8, // mov [rsp-8], rax
        0x48, 0x8b, 0x5c, 0x24, 0xf8, // mov rbx, [rsp-8]
        0xf4, // hlt
    ];
    let sim = run(&code);

    assert_eq!(gp(&sim, reg64::B), 0x1234);
    assert_eq!(gp(&sim, reg64::A), 0x1234);
    assert_eq!(except_num(sim.state.exception), Exception::Gp as u16);
    assert_eq!(sim.state.stats.committed_micro, 5);
}

#[test]
fn test_undefined_opcode() {
    // nop, then an invalid byte
    let code = [0x90, 0x0e];
    let sim = run(&code);

    assert_eq!(except_num(sim.state.exception), Exception::Ud as u16);
    assert_eq!(sim.state.stats.committed_micro, 2);
}

#[test]
fn test_instruction_spanning_fetch_windows() {
    // fifteen nops push the mov across the 16-byte window boundary
    let mut code = vec![0x90; 15];
    code.extend([0x48, 0xc7, 0xc0, 0x05, 0x00, 0x00, 0x00]); // mov rax, 5
    code.push(0xf4);
    let sim = run(&code);

    assert_eq!(gp(&sim, reg64::A), 5);
    assert_eq!(except_num(sim.state.exception), Exception::Gp as u16);
}

#[test]
fn test_push_pop_roundtrip() {
    // mov rax, 0x77; push rax; pop rbx; hlt
    let code = [
        0x48, 0xc7, 0xc0, 0x77, 0x00, 0x00, 0x00, // mov rax, 0x77
        0x50, // push rax
        0x5b, // pop rbx
        0xf4, // hlt
    ];
    let sim = run(&code);

    assert_eq!(gp(&sim, reg64::B), 0x77);
    // the stack pointer came back to its start value
    assert_eq!(
        gp(&sim, reg64::SP),
        o3sim_core::config::STACK_START + o3sim_core::config::STACK_SIZE as u64
    );
    assert_eq!(except_num(sim.state.exception), Exception::Gp as u16);
}

#[test]
fn test_call_and_ret() {
    // call +1 (skip the ud2 island? no: call forward over a nop), ret comes back
    //   0x8000 call +6 -> 0x800b
    //   0x8005 mov rcx, 1    (runs after the ret)
    //   ...    hlt? layout below
    let code = [
        0xe8, 0x06, 0x00, 0x00, 0x00, // 0x8000 call 0x800b
        0xb9, 0x01, 0x00, 0x00, 0x00, // 0x8005 mov ecx, 1
        0xf4, // 0x800a hlt
        0xc3, // 0x800b ret -> 0x8005
    ];
    let sim = run(&code);

    assert_eq!(gp(&sim, reg64::C), 1);
    assert_eq!(except_num(sim.state.exception), Exception::Gp as u16);
}

#[test]
fn test_memory_destination_add() {
    // mov rax, 40; mov [rsp-8], rax; add qword [rsp-8], 2; mov rbx, [rsp-8]
    let code = [
        0x48, 0xc7, 0xc0, 0x28, 0x00, 0x00, 0x00, // mov rax, 40
        0x48, 0x89, 0x44, 0x24, 0xf8, // mov [rsp-8], rax
        0x48, 0x83, 0x44, 0x24, 0xf8, 0x02, // add qword [rsp-8], 2
        0x48, 0x8b, 0x5c, 0x24, 0xf8, // mov rbx, [rsp-8]
        0xf4, // hlt
    ];
    let sim = run(&code);

    assert_eq!(gp(&sim, reg64::B), 42);
    assert_eq!(except_num(sim.state.exception), Exception::Gp as u16);
}
