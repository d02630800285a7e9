//! x86-64 macro → micro expansion.
//!
//! Each predecoded instruction becomes an ordered bundle of uops. Register
//! operands map straight onto uop registers; memory operands load through a
//! temporary register first, and memory destinations recompute the address
//! for a trailing store. The bundle is tagged `mop_first`/`mop_last` and
//! every unknown or unimplemented encoding collapses to a single `int #UD`.

use log::debug;

use crate::common::error::{pack_except, pf_bits, Exception};
use crate::uops::{
    ctrl, op, px, set_op_size, Uop, IMM_DST_HIGH, IMM_RIP_REL, IMM_SRC_HIGH,
};

use super::predecode::X64Op;
use super::tables::{
    is_immop, is_rmop, modrm, opgrp_1b, opgrp_2b, opinfo, op_bytes, reqpfx_1b, rmop, sib,
    Operand, REQPFX_2B,
};
use super::{reg64, ureg, ureg_if, X64Frontend};

/// Sign-extends a `from`-byte immediate and masks it to `to` bytes.
fn sx_bytes(v: u64, from: usize, to: u8) -> u64 {
    if from == 0 || from >= 8 {
        return v;
    }
    let shift = 64 - from as u32 * 8;
    let wide = (((v << shift) as i64) >> shift) as u64;
    if to >= 8 {
        wide
    } else {
        wide & ((1u64 << (to as u32 * 8)) - 1)
    }
}

/// True for instructions operating on the GP register file.
fn is_gp(op_: &X64Op) -> bool {
    match op_.meta.op_mode {
        0 => true,
        1 => matches!(
            op_.opcode(),
            0x05 | 0x07..=0x0a
                | 0x0d
                | 0x19
                | 0x1c..=0x1f
                | 0x31
                | 0x40..=0x4f
                | 0x80..=0x9f
                | 0xa0..=0xa5
                | 0xa8 | 0xa9
                | 0xab..=0xad
                | 0xaf
                | 0xb0..=0xbf
                | 0xc0 | 0xc1
                | 0xc8..=0xcf
                | 0xff
        ),
        _ => false,
    }
}

fn int_uop(word: u32) -> Uop {
    Uop {
        opcode: op::INT,
        control: ctrl::USE_IMM | ctrl::MOP_FIRST | ctrl::MOP_LAST,
        regs: [0; 4],
        imm: word as u64,
    }
}

impl X64Frontend {
    /// Expands one macro instruction into its uop bundle.
    pub(super) fn crack(&mut self, xop: &X64Op) -> Vec<Uop> {
        // a fetch page fault rode in as a length marker
        if xop.len == 0xff {
            debug!("DE__:   page fault injected");
            return vec![int_uop(pack_except(
                Exception::Pf,
                pf_bits::IFETCH | pf_bits::USER,
            ))];
        }
        if xop.len == 0 || xop.len > 15 {
            debug!("DE__:   invalid length {}", xop.len);
            return vec![int_uop(pack_except(Exception::Ud, 0))];
        }

        let opcode = xop.opcode();
        let op_mode = xop.meta.op_mode;
        let mrm = xop.modrm();
        let sb = xop.sib();
        let rex = xop.rex();
        let has_modrm = xop.off_modrm != 0;
        let has_sib = xop.off_sib != 0;

        let segbase = ureg_if(
            if xop.meta.has_g2 == 0x64 {
                reg64::FSBASE
            } else {
                reg64::GSBASE
            },
            xop.meta.has_g2 != 0,
        );

        // modrm-dependent fields, extended by REX
        let mod_reg = (if rex != 0 { (rex & super::tables::rex::R) << 1 } else { 0 })
            | modrm::reg(mrm);
        let mut sib_idx = (if rex != 0 { (rex & super::tables::rex::X) << 2 } else { 0 })
            | if has_sib { sib::index(sb) } else { 0 };
        if sib_idx & 0b111 == 0b100 {
            sib_idx = 0; // index 100b means no index
        }
        // rex.b extends modrm.rm, sib.base, or the opcode register field
        let rexb_ex = (if rex != 0 { (rex & super::tables::rex::B) << 3 } else { 0 })
            | if has_sib { sib::base(sb) } else { modrm::rm(mrm) };

        let mut sib_scl = 0u8;
        let mut sib_useb = false;
        let mut sib_usei = false;
        if has_sib {
            sib_scl = 1 << sib::scale(sb);
            sib_useb =
                sib::base(sb) != 0b101 || matches!(modrm::mode(mrm), 0b01 | 0b10);
            sib_usei = sib::index(sb) != 0b100;
        }

        // sign-extended displacement
        let mut displ = 0i64;
        if xop.off_displ != 0 {
            let end = if xop.off_imm != 0 {
                xop.off_imm as usize
            } else {
                xop.bytes.len()
            };
            let bytes = &xop.bytes[xop.off_displ as usize..end];
            let mut raw = [0u8; 8];
            raw[..bytes.len()].copy_from_slice(bytes);
            let shift = 64 - bytes.len() as u32 * 8;
            displ = ((i64::from_le_bytes(raw)) << shift) >> shift;
        }

        let mut imm = 0u64;
        let mut immbytes = 0usize;
        if xop.off_imm != 0 {
            let bytes = &xop.bytes[xop.off_imm as usize..];
            immbytes = bytes.len();
            let mut raw = [0u8; 8];
            raw[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);
            imm = u64::from_le_bytes(raw);
        }

        let has_rex_w = rex & super::tables::rex::W != 0;
        let mut opsz: u8 = if has_rex_w {
            8
        } else if xop.meta.has_66 {
            2
        } else {
            4
        };
        let adsz: u8 = if xop.meta.has_67 { 4 } else { 8 };
        let mut ldsz: u8 = 0;

        let opgrp = match op_mode {
            0 => opgrp_1b(opcode),
            _ => opgrp_2b(opcode),
        };
        let reqpfx = match op_mode {
            0 => reqpfx_1b(opcode) != 0,
            _ => REQPFX_2B[opcode as usize] != 0,
        };

        let mut opvec: Vec<u8> = Vec::with_capacity(4);
        if reqpfx && xop.meta.has_g1 != 0 {
            opvec.push(xop.meta.has_g1);
        }
        if op_mode == 1 {
            opvec.push(0x0f);
        }
        opvec.push(opcode);
        if opgrp != 0 {
            opvec.push(modrm::reg(mrm));
        }

        let info = opinfo(&opvec);
        let operands: &[Operand] = info.map(|i| i.operands).unwrap_or(&[]);
        if let Some(i) = info {
            debug!("        macro mnemonic: {}", i.mnemonic);
        }

        let reg_direct = modrm::mode(mrm) == 0b11;
        let mem_operand = has_modrm && !reg_direct;
        // the base register is invalid for a plain disp32, which is
        // rip-relative unless a SIB byte spelled it out
        let base_valid = if has_sib {
            sib_useb
        } else {
            !(modrm::mode(mrm) == 0b00 && modrm::rm(mrm) == 0b101)
        };
        let rip_rel = !has_sib && modrm::mode(mrm) == 0b00 && modrm::rm(mrm) == 0b101;

        let mut uops: Vec<Uop> = Vec::new();
        let mut raised_ud = false;

        // auxiliary registers for results not written to 'main' registers
        let mut load_reg: u8 = 0; // load target
        let mut storeimm = false; // store the immediate with the implicit store
        let mut opsrc: u8 = 0; // compute source
        let mut opdst: u8 = 0; // compute target
        let mut temp_op = false; // compute target is temporary (memory dest)
        let mut src_in_mem = false; // the rm source operand is in memory
        let mut extflag: u16 = 0;
        let mut high_flags: u64 = 0; // ah..bh alias markers for the immediate

        if is_gp(xop) {
            // the compute uop needs the target operand size, which may differ
            // from the load size; the first operand tells the direction
            if !operands.is_empty() {
                opsz = op_bytes(opsz, operands[0].ty);

                if is_immop(*operands.last().unwrap()) {
                    imm = sx_bytes(imm, immbytes, opsz);
                }

                // high byte registers: byte operand, no REX, register sp..di
                let is_high = |r: u8, needs_mod11: bool| {
                    opsz == 1
                        && rex == 0
                        && (!needs_mod11 || (has_modrm && reg_direct))
                        && (reg64::SP..=reg64::DI).contains(&r)
                };

                if is_rmop(operands[0]) {
                    if is_high(rexb_ex, true) {
                        opdst = rexb_ex - reg64::SP;
                        high_flags |= IMM_DST_HIGH;
                    } else {
                        opdst = rexb_ex;
                    }
                } else if is_high(mod_reg, false) {
                    opdst = mod_reg - reg64::SP;
                    high_flags |= IMM_DST_HIGH;
                } else {
                    opdst = mod_reg;
                }

                let rm_is_src = rmop(operands).map(|(_, pos)| pos).unwrap_or(0) != 0;
                if rm_is_src {
                    if is_high(rexb_ex, true) {
                        opsrc = rexb_ex - reg64::SP;
                        high_flags |= IMM_SRC_HIGH;
                    } else {
                        opsrc = rexb_ex;
                    }
                } else if is_high(mod_reg, false) {
                    opsrc = mod_reg - reg64::SP;
                    high_flags |= IMM_SRC_HIGH;
                } else {
                    opsrc = mod_reg;
                }
                // a memory source has no register operand in rb; the loaded
                // temporary in rc carries the value instead
                src_in_mem = rm_is_src && mem_operand;

                extflag = if opsz == 4 { ctrl::RD_EXTEND } else { ctrl::RD_RESIZE };

                // source equals destination for single-operand byte forms
                if operands.len() == 1 && opsz == 1 && high_flags & IMM_DST_HIGH != 0 {
                    high_flags |= IMM_SRC_HIGH;
                }
                imm |= high_flags;
            }

            // a memory operand loads into an auxiliary source first
            if !operands.is_empty() && mem_operand {
                load_reg = self.tmp_gp();
                ldsz = rmop(operands)
                    .map(|(o, _)| op_bytes(opsz, o.ty))
                    .unwrap_or(opsz);

                uops.push(Uop {
                    opcode: op::LDA,
                    control: set_op_size(ldsz)
                        | ctrl::USE_RA
                        | ctrl::USE_RB
                        | ctrl::USE_RC
                        | ctrl::USE_IMM,
                    regs: [
                        ureg_if(rexb_ex, base_valid),
                        ureg_if(sib_idx, sib_usei),
                        segbase,
                        ureg(load_reg),
                    ],
                    imm: (imm & (IMM_DST_HIGH | IMM_SRC_HIGH))
                        | if rip_rel { IMM_RIP_REL } else { 0 }
                        | ((adsz as u64) << 40)
                        | ((sib_scl as u64) << 32)
                        | (displ as u64 & 0xffff_ffff),
                });

                // destination in memory: the compute target is a temporary
                if is_rmop(operands[0]) {
                    opdst = self.tmp_gp();
                    temp_op = true; // no source dependence on the temporary
                }
            }
        }

        let seto = set_op_size(opsz);

        if op_mode == 0 {
            match opcode {
                // invalid opcodes are not detected by predecode
                0x06 | 0x07 | 0x0e | 0x16 | 0x17 | 0x1e | 0x1f | 0x26 | 0x27 | 0x2e | 0x2f
                | 0x36 | 0x37 | 0x3e | 0x3f | 0x60 | 0x61 | 0x62 | 0x64..=0x67 | 0x6c..=0x6f
                | 0x82 | 0x9a | 0x9e | 0x9f | 0xa4..=0xa7 | 0xaa..=0xaf | 0xc4 | 0xc5 | 0xce
                | 0xd4..=0xd7 | 0xd8..=0xdf | 0xe0..=0xe2 | 0xe4..=0xe7 | 0xea | 0xec..=0xef
                | 0xf0 | 0xf2 | 0xf3 => raised_ud = true,

                0x00..=0x03 | 0x08..=0x0b | 0x10..=0x13 | 0x18..=0x1b | 0x20..=0x23
                | 0x28..=0x2b | 0x30..=0x33 => {
                    // binary ALU forms Eb/Gb, Ev/Gv, Gb/Eb, Gv/Ev
                    let (uopcode, carry) = match opcode & 0x38 {
                        0x00 => (op::ADD, 0),
                        0x08 => (op::OR, 0),
                        0x10 => (op::ADC, ctrl::USE_COND),
                        0x18 => (op::SBB, ctrl::USE_COND),
                        0x20 => (op::AND, 0),
                        0x28 => (op::SUB, 0),
                        _ => (op::XOR, 0),
                    };
                    uops.push(Uop {
                        opcode: uopcode,
                        control: seto | ctrl::SET_COND | carry | extflag
                            | ctrl::USE_RA | ctrl::USE_RB | ctrl::USE_RC,
                        regs: [
                            ureg_if(opdst, !temp_op),
                            ureg_if(opsrc, !src_in_mem),
                            ureg_if(load_reg, load_reg != 0),
                            ureg(opdst),
                        ],
                        imm,
                    });
                }

                0x04 | 0x05 | 0x0c | 0x0d | 0x14 | 0x15 | 0x1c | 0x1d | 0x24 | 0x25 | 0x2c
                | 0x2d | 0x34 | 0x35 => {
                    // accumulator-immediate ALU forms Zb/Ib, Zv/Iz
                    let (uopcode, carry) = match opcode & 0x38 {
                        0x00 => (op::ADD, 0),
                        0x08 => (op::OR, 0),
                        0x10 => (op::ADC, ctrl::USE_COND),
                        0x18 => (op::SBB, ctrl::USE_COND),
                        0x20 => (op::AND, 0),
                        0x28 => (op::SUB, 0),
                        _ => (op::XOR, 0),
                    };
                    uops.push(Uop {
                        opcode: uopcode,
                        control: seto | ctrl::SET_COND | carry | extflag
                            | ctrl::USE_RA | ctrl::USE_IMM,
                        regs: [ureg(reg64::A), 0, 0, ureg(reg64::A)],
                        imm,
                    });
                }

                0x38..=0x3b => {
                    // cmp is sub without writing the destination
                    uops.push(Uop {
                        opcode: op::SUB,
                        control: seto | ctrl::SET_COND | extflag
                            | ctrl::USE_RA | ctrl::USE_RB | ctrl::USE_RC,
                        regs: [
                            ureg_if(opdst, !temp_op),
                            ureg_if(opsrc, !src_in_mem),
                            ureg_if(load_reg, load_reg != 0),
                            0,
                        ],
                        imm,
                    });
                }

                0x3c | 0x3d => {
                    uops.push(Uop {
                        opcode: op::SUB,
                        control: seto | ctrl::SET_COND | extflag | ctrl::USE_RA | ctrl::USE_IMM,
                        regs: [ureg(reg64::A), 0, 0, 0],
                        imm,
                    });
                }

                0x50..=0x57 => {
                    // register in the opcode field, extended by rex.b
                    let src = (if rex != 0 { (rex & super::tables::rex::B) << 3 } else { 0 })
                        | (opcode & 0b0111);
                    uops.push(Uop {
                        opcode: op::PUSH,
                        control: seto | ctrl::USE_RA | ctrl::USE_RB,
                        regs: [ureg(reg64::SP), ureg(src), 0, ureg(reg64::SP)],
                        imm,
                    });
                }

                0x58..=0x5f => {
                    let dest = (if rex != 0 { (rex & super::tables::rex::B) << 3 } else { 0 })
                        | (opcode & 0b0111);
                    uops.push(Uop {
                        opcode: op::POP,
                        control: seto | ctrl::USE_RA | ctrl::RC_DEST,
                        regs: [ureg(reg64::SP), 0, ureg(reg64::SP), ureg(dest)],
                        imm,
                    });
                }

                0x63 => {
                    // movsxd: source width rides in the immediate
                    uops.push(Uop {
                        opcode: op::MOVE,
                        control: seto | extflag | ctrl::RD_EXTEND | ctrl::USE_RA | ctrl::USE_RB,
                        regs: [
                            ureg_if(opdst, opsz & 0b11 != 0),
                            ureg(if load_reg != 0 { load_reg } else { opsrc }),
                            0,
                            ureg(opdst),
                        ],
                        imm: imm | if opsz == 2 { 2 } else { 4 },
                    });
                }

                0x68 | 0x6a => {
                    uops.push(Uop {
                        opcode: op::PUSH,
                        control: seto | ctrl::USE_RA | ctrl::USE_IMM,
                        regs: [ureg(reg64::SP), 0, 0, ureg(reg64::SP)],
                        imm,
                    });
                }

                0x69 | 0x6b => {
                    // imul Gv/Ev/Iz, Gv/Ev/Ib
                    uops.push(Uop {
                        opcode: op::IMUL,
                        control: seto | ctrl::SET_COND | extflag | ctrl::USE_RA | ctrl::USE_IMM,
                        regs: [
                            ureg(if load_reg != 0 { load_reg } else { opsrc }),
                            0,
                            0,
                            ureg(opdst),
                        ],
                        imm,
                    });
                }

                0x70..=0x7f => {
                    // jcc short; the condition code is the low opcode nibble
                    uops.push(Uop {
                        opcode: op::BRANCHCC + (opcode & 0xf) as u16,
                        control: seto | ctrl::USE_COND | ctrl::USE_IMM,
                        regs: [0; 4],
                        imm,
                    });
                }

                0x80 | 0x81 | 0x83 => {
                    let uopcode = match modrm::reg(mrm) {
                        0b000 => op::ADD,
                        0b001 => op::OR,
                        0b010 => op::ADC,
                        0b011 => op::SBB,
                        0b100 => op::AND,
                        0b101 => op::SUB,
                        0b110 => op::XOR,
                        _ => op::SUB, // cmp
                    };
                    let carry = if matches!(modrm::reg(mrm), 0b010 | 0b011) {
                        ctrl::USE_COND
                    } else {
                        0
                    };
                    uops.push(Uop {
                        opcode: uopcode,
                        control: seto | ctrl::SET_COND | carry | extflag
                            | ctrl::USE_RA | ctrl::USE_RC | ctrl::USE_IMM,
                        regs: [
                            ureg_if(opdst, !temp_op),
                            0,
                            ureg_if(load_reg, load_reg != 0),
                            ureg_if(opdst, modrm::reg(mrm) != 0b111),
                        ],
                        imm,
                    });
                }

                0x84 | 0x85 => {
                    // test is and without writing the destination
                    uops.push(Uop {
                        opcode: op::AND,
                        control: seto | ctrl::SET_COND | extflag
                            | ctrl::USE_RA | ctrl::USE_RB | ctrl::USE_RC,
                        regs: [
                            ureg_if(opdst, !temp_op),
                            ureg(opsrc),
                            ureg_if(load_reg, load_reg != 0),
                            0,
                        ],
                        imm,
                    });
                }

                0x86 | 0x87 => {
                    uops.push(Uop {
                        opcode: op::XCHG,
                        control: seto | extflag | ctrl::USE_RA | ctrl::USE_RB | ctrl::RC_DEST,
                        regs: [ureg(opdst), ureg(opsrc), ureg(opsrc), ureg(opdst)],
                        imm,
                    });
                    if temp_op {
                        uops.push(Uop {
                            opcode: op::MOVE,
                            control: seto | extflag | ctrl::USE_RA,
                            regs: [ureg(load_reg), 0, 0, ureg(opsrc)],
                            imm,
                        });
                    }
                }

                0x88..=0x8c => {
                    if load_reg != 0 && temp_op {
                        // the memory operand is the destination, no load needed
                        uops.clear();
                        // reg -> mem via the implicit store
                        opdst = opsrc;
                    } else if load_reg != 0 {
                        // mem -> reg: retarget the implicit load
                        if let Some(last) = uops.last_mut() {
                            last.regs[3] = ureg(opdst);
                        }
                    } else {
                        // reg -> reg
                        uops.push(Uop {
                            opcode: op::MOVE,
                            control: seto
                                | if opsz != 4 { ctrl::RD_RESIZE } else { 0 }
                                | ctrl::USE_RA
                                | ctrl::USE_RB,
                            // dependence for byte/word destinations
                            regs: [
                                ureg_if(opdst, opsz & 0b11 != 0),
                                ureg(opsrc),
                                0,
                                ureg(opdst),
                            ],
                            imm,
                        });
                    }
                }

                0x8d => {
                    // lea never loads; the address itself is the result
                    uops.clear();
                    uops.push(Uop {
                        opcode: op::LEA,
                        control: set_op_size(if ldsz != 0 { ldsz } else { opsz })
                            | ctrl::USE_RA | ctrl::USE_RB | ctrl::USE_RC | ctrl::USE_IMM,
                        regs: [
                            ureg_if(rexb_ex, base_valid),
                            ureg_if(sib_idx, sib_usei),
                            segbase,
                            ureg(mod_reg),
                        ],
                        imm: if rip_rel { IMM_RIP_REL } else { 0 }
                            | ((sib_scl as u64) << 32)
                            | (displ as u64 & 0xffff_ffff),
                    });
                }

                0x8e => {
                    // mov Sw, Ew: only fs and gs exist here
                    let seg_reg = modrm::reg(mrm); // rex.r ignored for segments
                    let dst = match seg_reg {
                        4 => reg64::FSBASE,
                        5 => reg64::GSBASE,
                        _ => 0,
                    };
                    if dst == 0 {
                        raised_ud = true;
                    } else if load_reg != 0 {
                        if let Some(last) = uops.last_mut() {
                            last.regs[3] = ureg(dst);
                        }
                    } else {
                        uops.push(Uop {
                            opcode: op::MOVE,
                            control: seto | ctrl::USE_RB,
                            regs: [0, ureg(opsrc), 0, ureg(dst)],
                            imm,
                        });
                    }
                }

                0x8f => match modrm::reg(mrm) {
                    0b000 => {
                        if load_reg == 0 {
                            uops.push(Uop {
                                opcode: op::POP,
                                control: seto | ctrl::USE_RA | ctrl::RC_DEST,
                                regs: [ureg(reg64::SP), 0, ureg(reg64::SP), ureg(opdst)],
                                imm,
                            });
                        } else {
                            // pop into the temporary, store it to the target
                            uops.clear();
                            uops.push(Uop {
                                opcode: op::POP,
                                control: seto | ctrl::USE_RA | ctrl::RC_DEST,
                                regs: [ureg(reg64::SP), 0, ureg(reg64::SP), ureg(load_reg)],
                                imm,
                            });
                            opdst = load_reg; // the implicit store writes it out
                        }
                    }
                    _ => raised_ud = true,
                },

                0x90..=0x97 => {
                    let dest = (if rex != 0 { (rex & super::tables::rex::B) << 3 } else { 0 })
                        | (opcode & 0b0111);
                    if dest == 0 {
                        // xchg rax, rax is the canonical nop
                        uops.push(Uop {
                            opcode: op::NOP,
                            control: ctrl::USE_IMM,
                            regs: [0; 4],
                            imm: 0x90,
                        });
                    } else {
                        uops.push(Uop {
                            opcode: op::XCHG,
                            control: seto | extflag | ctrl::USE_RA | ctrl::USE_RB | ctrl::RC_DEST,
                            regs: [ureg(reg64::A), ureg(dest), ureg(dest), ureg(reg64::A)],
                            imm,
                        });
                        if temp_op {
                            uops.push(Uop {
                                opcode: op::MOVE,
                                control: seto | extflag | ctrl::USE_RA,
                                regs: [ureg(load_reg), 0, 0, ureg(opsrc)],
                                imm,
                            });
                        }
                    }
                }

                // cbw/cwde/cdqe and cwd/cdq/cqo are not implemented
                0x98 | 0x99 => raised_ud = true,

                0x9c => {
                    uops.push(Uop {
                        opcode: op::PUSHX,
                        control: seto | ctrl::USE_COND | ctrl::USE_RA | ctrl::USE_IMM,
                        regs: [ureg(reg64::SP), 0, 0, ureg(reg64::SP)],
                        imm: px::FLAGS,
                    });
                }

                0x9d => {
                    uops.push(Uop {
                        opcode: op::POPX,
                        control: seto | ctrl::SET_COND | ctrl::USE_RA | ctrl::RC_DEST
                            | ctrl::USE_IMM,
                        regs: [ureg(reg64::SP), 0, ureg(reg64::SP), 0],
                        imm: px::FLAGS,
                    });
                }

                0xa0 | 0xa1 => {
                    // moffset load into the accumulator; the offset is in imm
                    uops.push(Uop {
                        opcode: op::LD64,
                        control: seto | ctrl::USE_RA | ctrl::USE_IMM,
                        regs: [0, 0, 0, ureg(reg64::A)],
                        imm,
                    });
                }

                0xa2 | 0xa3 => {
                    uops.push(Uop {
                        opcode: op::ST,
                        control: seto | ctrl::USE_RB | ctrl::USE_IMM,
                        regs: [0, ureg(reg64::A), 0, 0],
                        imm,
                    });
                }

                0xa8 | 0xa9 => {
                    uops.push(Uop {
                        opcode: op::AND,
                        control: seto | ctrl::SET_COND | extflag | ctrl::USE_RA | ctrl::USE_IMM,
                        regs: [ureg(reg64::A), 0, 0, 0],
                        imm,
                    });
                }

                0xb0..=0xb7 => {
                    let dest = (if rex != 0 { (rex & super::tables::rex::B) << 3 } else { 0 })
                        | (opcode & 0b0111);
                    // rb depends on the old register value for the byte write
                    uops.push(Uop {
                        opcode: op::SET,
                        control: ctrl::USE_IMM | ctrl::USE_RA,
                        regs: [ureg(dest), 0, 0, ureg(dest)],
                        imm,
                    });
                }

                0xb8..=0xbf => {
                    let dest = (if rex != 0 { (rex & super::tables::rex::B) << 3 } else { 0 })
                        | (opcode & 0b0111);
                    // r16 depends on the old value, r32/r64 do not
                    uops.push(Uop {
                        opcode: op::SET,
                        control: seto | ctrl::USE_IMM
                            | if opsz == 2 { ctrl::USE_RA } else { 0 },
                        regs: [ureg(dest), 0, 0, ureg(dest)],
                        imm,
                    });
                }

                0xc0 | 0xc1 | 0xd0 | 0xd1 | 0xd2 | 0xd3 => {
                    // shift group 2; counts mask inside the uop
                    let uopcode = match modrm::reg(mrm) {
                        0b000 => op::ROL,
                        0b001 => op::ROR,
                        0b010 => op::RCL,
                        0b011 => op::RCR,
                        0b100 => op::LSL,
                        0b101 => op::RSL,
                        0b111 => op::RSA,
                        _ => {
                            raised_ud = true; // no sal
                            0
                        }
                    };
                    if uopcode != 0 {
                        let carry = if matches!(modrm::reg(mrm), 0b010 | 0b011) {
                            ctrl::USE_COND
                        } else {
                            0
                        };
                        let (count_ctrl, count_regs, uimm) = match opcode {
                            // Eb/Ib, Ev/Ib
                            0xc0 | 0xc1 => (ctrl::USE_IMM, 0u8, imm),
                            // Eb/1, Ev/1
                            0xd0 | 0xd1 => (ctrl::USE_IMM, 0u8, imm | 0x1),
                            // Eb/cl, Ev/cl
                            _ => (ctrl::USE_RB, ureg(reg64::C), imm),
                        };
                        uops.push(Uop {
                            opcode: uopcode,
                            control: seto | ctrl::SET_COND | carry | extflag
                                | ctrl::USE_RA | count_ctrl,
                            regs: [
                                ureg(if load_reg != 0 { load_reg } else { opdst }),
                                count_regs,
                                0,
                                ureg(opdst),
                            ],
                            imm: uimm,
                        });
                    }
                }

                0xc2 | 0xc3 | 0xca | 0xcb => {
                    // ret pops into a temporary and branches through it
                    let tmp = self.tmp_gp();
                    uops.push(Uop {
                        opcode: op::POP,
                        control: set_op_size(8) | ctrl::USE_RA | ctrl::RC_DEST,
                        regs: [ureg(reg64::SP), 0, ureg(reg64::SP), ureg(tmp)],
                        imm,
                    });
                    uops.push(Uop {
                        opcode: op::BRANCH,
                        control: set_op_size(8) | ctrl::USE_RA | ctrl::USE_IMM,
                        regs: [ureg(tmp), 0, 0, 0],
                        imm,
                    });
                }

                0xc6 | 0xc7 => match modrm::reg(mrm) {
                    0b000 => {
                        uops.clear(); // never loads
                        if load_reg == 0 {
                            uops.push(Uop {
                                opcode: op::SET,
                                control: seto | extflag | ctrl::USE_IMM | ctrl::USE_RA,
                                regs: [ureg(opdst), 0, 0, ureg(opdst)],
                                imm,
                            });
                        } else {
                            storeimm = true; // the implicit lea+store carries it
                        }
                    }
                    _ => raised_ud = true,
                },

                // enter, leave, iret
                0xc8 | 0xc9 | 0xcf => raised_ud = true,

                0xcc => uops.push(Uop {
                    opcode: op::INT,
                    control: ctrl::USE_IMM,
                    regs: [0; 4],
                    imm: pack_except(Exception::Bp, 0) as u64,
                }),

                0xcd => uops.push(Uop {
                    opcode: op::INT,
                    control: ctrl::USE_IMM,
                    regs: [0; 4],
                    imm,
                }),

                0xe3 => {
                    // jrcxz
                    uops.push(Uop {
                        opcode: op::BRANCHRZ,
                        control: seto | ctrl::USE_RA | ctrl::USE_IMM,
                        regs: [ureg(reg64::C), 0, 0, 0],
                        imm,
                    });
                }

                0xe8 | 0xe9 | 0xeb => {
                    if opcode == 0xe8 {
                        // call pushes the full return address first
                        uops.push(Uop {
                            opcode: op::PUSHX,
                            control: set_op_size(8) | ctrl::USE_RA | ctrl::USE_IMM,
                            regs: [ureg(reg64::SP), 0, 0, ureg(reg64::SP)],
                            imm: px::RIP,
                        });
                    }
                    uops.push(Uop {
                        opcode: op::BRANCHR,
                        control: seto | ctrl::USE_IMM,
                        regs: [0; 4],
                        imm,
                    });
                }

                0xf1 => uops.push(Uop {
                    opcode: op::INT,
                    control: ctrl::USE_IMM,
                    regs: [0; 4],
                    imm: pack_except(Exception::Unspec, 0) as u64,
                }),

                0xf4 => uops.push(Uop {
                    opcode: op::INT,
                    control: ctrl::USE_IMM,
                    regs: [0; 4],
                    // halt is privileged and there is no ring 0
                    imm: pack_except(Exception::Gp, 0) as u64,
                }),

                0xf5 => uops.push(Uop {
                    opcode: op::CMC,
                    control: ctrl::USE_COND | ctrl::SET_COND,
                    regs: [0; 4],
                    imm: 0,
                }),

                0xf6 | 0xf7 => match modrm::reg(mrm) {
                    0b000 => {
                        uops.push(Uop {
                            opcode: op::AND,
                            control: seto | ctrl::SET_COND | extflag | ctrl::USE_RA
                                | ctrl::USE_IMM,
                            regs: [
                                ureg(if load_reg != 0 { load_reg } else { opdst }),
                                0,
                                0,
                                0,
                            ],
                            imm,
                        });
                    }
                    0b001 => raised_ud = true,
                    0b010 => {
                        uops.push(Uop {
                            opcode: op::NOT,
                            control: seto | extflag | ctrl::USE_RA,
                            regs: [
                                ureg(if load_reg != 0 { load_reg } else { opdst }),
                                0,
                                0,
                                ureg(opdst),
                            ],
                            imm,
                        });
                    }
                    0b011 => {
                        uops.push(Uop {
                            opcode: op::NEG,
                            control: seto | ctrl::SET_COND | extflag | ctrl::USE_RA,
                            regs: [
                                ureg(if load_reg != 0 { load_reg } else { opdst }),
                                0,
                                0,
                                ureg(opdst),
                            ],
                            imm,
                        });
                    }
                    0b100 | 0b101 => {
                        // widening multiply: a,src -> d:a
                        let mulop = if modrm::reg(mrm) == 0b100 { op::MUL } else { op::IMUL };
                        let cond = if mulop == op::IMUL { ctrl::SET_COND } else { 0 };
                        uops.push(Uop {
                            opcode: mulop,
                            control: seto | cond | extflag | ctrl::USE_RA | ctrl::USE_RB
                                | ctrl::RC_DEST,
                            regs: [
                                ureg(reg64::A),
                                ureg(if load_reg != 0 { load_reg } else { opdst }),
                                ureg(reg64::D),
                                ureg(reg64::A),
                            ],
                            imm,
                        });
                    }
                    0b110 | 0b111 => {
                        let signed = modrm::reg(mrm) == 0b111;
                        temp_op = false; // no store for divides
                        if opcode == 0xf6 {
                            uops.push(Uop {
                                opcode: if signed { op::IDIV8 } else { op::DIV8 },
                                control: seto | extflag | ctrl::USE_RA | ctrl::USE_RB,
                                regs: [
                                    ureg(reg64::A),
                                    ureg(if load_reg != 0 { load_reg } else { opdst }),
                                    0,
                                    ureg(reg64::A),
                                ],
                                imm,
                            });
                        } else {
                            // three inputs, two outputs: quotient and remainder
                            // compute into temporaries, then copy back as a pair
                            let tempq = self.tmp_gp();
                            let tempr = self.tmp_gp();
                            let (qop, rop) = if signed {
                                (op::IDIVQ, op::IDIVR)
                            } else {
                                (op::DIVQ, op::DIVR)
                            };
                            let src = ureg(if load_reg != 0 { load_reg } else { opdst });
                            uops.push(Uop {
                                opcode: qop,
                                control: seto | extflag
                                    | ctrl::USE_RA | ctrl::USE_RB | ctrl::USE_RC,
                                regs: [ureg(reg64::A), ureg(reg64::D), src, ureg(tempq)],
                                imm,
                            });
                            uops.push(Uop {
                                opcode: rop,
                                control: seto | extflag
                                    | ctrl::USE_RA | ctrl::USE_RB | ctrl::USE_RC,
                                regs: [ureg(reg64::A), ureg(reg64::D), src, ureg(tempr)],
                                imm,
                            });
                            uops.push(Uop {
                                opcode: op::COPY2,
                                control: seto | ctrl::USE_RA | ctrl::USE_RB | ctrl::RC_DEST,
                                regs: [ureg(tempq), ureg(tempr), ureg(reg64::D), ureg(reg64::A)],
                                imm,
                            });
                        }
                    }
                    _ => unreachable!(),
                },

                0xf8 | 0xf9 | 0xfc | 0xfd => {
                    // clc, stc, cld, std share an opcode row with the uops
                    uops.push(Uop {
                        opcode: op::CLC + (opcode & 0x7) as u16,
                        control: ctrl::USE_COND | ctrl::SET_COND,
                        regs: [0; 4],
                        imm: 0,
                    });
                }

                0xfa | 0xfb => {
                    // cli/sti have no I/O privilege to honor
                    uops.push(int_gp());
                }

                0xfe | 0xff => match modrm::reg(mrm) {
                    0b000 | 0b001 => {
                        let uopcode = if modrm::reg(mrm) == 0 { op::ADD } else { op::SUB };
                        uops.push(Uop {
                            opcode: uopcode,
                            control: seto | ctrl::SET_COND | extflag
                                | ctrl::USE_RA | ctrl::USE_RC | ctrl::USE_IMM,
                            regs: [
                                ureg_if(opdst, !temp_op),
                                0,
                                ureg_if(load_reg, load_reg != 0),
                                ureg(opdst),
                            ],
                            imm: 1,
                        });
                    }
                    0b010 if opcode == 0xff => {
                        uops.push(Uop {
                            opcode: op::PUSHX,
                            control: set_op_size(8) | ctrl::USE_RA | ctrl::USE_IMM,
                            regs: [ureg(reg64::SP), 0, 0, ureg(reg64::SP)],
                            imm: px::RIP,
                        });
                        uops.push(Uop {
                            opcode: op::BRANCH,
                            control: seto | ctrl::USE_RA,
                            regs: [
                                ureg(if load_reg != 0 { load_reg } else { opdst }),
                                0,
                                0,
                                0,
                            ],
                            imm,
                        });
                    }
                    0b100 if opcode == 0xff => {
                        uops.push(Uop {
                            opcode: op::BRANCH,
                            control: seto | ctrl::USE_RA,
                            regs: [
                                ureg(if load_reg != 0 { load_reg } else { opdst }),
                                0,
                                0,
                                0,
                            ],
                            imm,
                        });
                    }
                    // far call and far jmp carry segments
                    _ => raised_ud = true,
                },

                _ => raised_ud = true,
            }
        } else if op_mode == 1 {
            match opcode {
                // privileged or unimplemented rows
                0x05 | 0x07 | 0x08 | 0x09 | 0x0d => raised_ud = true,
                0x0a => raised_ud = true, // ud2

                0x19 | 0x1c..=0x1f => {
                    uops.push(Uop {
                        opcode: op::NOP,
                        control: ctrl::USE_IMM,
                        regs: [0; 4],
                        imm: opcode as u64,
                    });
                }

                0x31 => {
                    uops.push(Uop {
                        opcode: op::RDTSC,
                        control: ctrl::RC_DEST,
                        regs: [0, 0, ureg(reg64::D), ureg(reg64::A)],
                        imm: 0,
                    });
                }

                0x40..=0x4f => {
                    // cmov loads, then moves depending on the condition
                    uops.push(Uop {
                        opcode: op::MOVCC + (opcode & 0xf) as u16,
                        control: seto
                            | if opsz != 4 { ctrl::RD_RESIZE } else { 0 }
                            | ctrl::USE_COND | ctrl::USE_RA | ctrl::USE_RB,
                        // dependence for word destinations
                        regs: [
                            ureg_if(opdst, opsz == 2),
                            ureg(if load_reg != 0 { load_reg } else { opsrc }),
                            0,
                            ureg(opdst),
                        ],
                        imm,
                    });
                }

                0x80..=0x8f => {
                    uops.push(Uop {
                        opcode: op::BRANCHCC + (opcode & 0xf) as u16,
                        control: seto | ctrl::USE_COND | ctrl::USE_IMM,
                        regs: [0; 4],
                        imm,
                    });
                }

                // setcc is not the setcond uop
                0x90..=0x9f => raised_ud = true,

                0xa0 => {
                    uops.push(Uop {
                        opcode: op::PUSH,
                        control: seto | ctrl::USE_RA | ctrl::USE_RB,
                        regs: [ureg(reg64::SP), ureg(reg64::FSBASE), 0, ureg(reg64::SP)],
                        imm: 0,
                    });
                }
                0xa1 => {
                    uops.push(Uop {
                        opcode: op::POP,
                        control: seto | ctrl::USE_RA | ctrl::RC_DEST,
                        regs: [ureg(reg64::SP), 0, ureg(reg64::SP), ureg(reg64::FSBASE)],
                        imm,
                    });
                }
                0xa8 => {
                    uops.push(Uop {
                        opcode: op::PUSH,
                        control: seto | ctrl::USE_RA | ctrl::USE_RB,
                        regs: [ureg(reg64::SP), ureg(reg64::GSBASE), 0, ureg(reg64::SP)],
                        imm: 0,
                    });
                }
                0xa9 => {
                    uops.push(Uop {
                        opcode: op::POP,
                        control: seto | ctrl::USE_RA | ctrl::RC_DEST,
                        regs: [ureg(reg64::SP), 0, ureg(reg64::SP), ureg(reg64::GSBASE)],
                        imm,
                    });
                }

                0xaf => {
                    uops.push(Uop {
                        opcode: op::IMUL,
                        control: seto | ctrl::SET_COND | extflag | ctrl::USE_RA | ctrl::USE_RB,
                        regs: [
                            ureg(opdst),
                            ureg(if load_reg != 0 { load_reg } else { opsrc }),
                            0,
                            ureg(opdst),
                        ],
                        imm: 0,
                    });
                }

                0xbe | 0xbf => {
                    uops.push(Uop {
                        opcode: op::MOVE,
                        control: seto | extflag | ctrl::RD_EXTEND | ctrl::USE_RA | ctrl::USE_RB,
                        regs: [
                            ureg_if(opdst, opsz == 2),
                            ureg(if load_reg != 0 { load_reg } else { opsrc }),
                            0,
                            ureg(opdst),
                        ],
                        imm: imm | if opcode == 0xbe { 1 } else { 2 },
                    });
                }

                // bit tests, shld/shrd, cmpxchg, movzx, popcnt, bsf/bsr,
                // xadd, bswap, cpuid: unimplemented
                _ => raised_ud = true,
            }
        } else {
            raised_ud = true;
        }

        if raised_ud {
            debug!("DE__:   undefined instruction");
            return vec![int_uop(pack_except(Exception::Ud, 0))];
        }

        // a memory destination finishes with an address recompute and a store
        if is_gp(xop)
            && temp_op
            && !operands.is_empty()
            && mem_operand
            && is_rmop(operands[0])
        {
            let addr_reg = self.tmp_gp();
            uops.push(Uop {
                opcode: op::LEA,
                control: set_op_size(adsz)
                    | ctrl::USE_RA | ctrl::USE_RB | ctrl::USE_RC | ctrl::USE_IMM,
                regs: [
                    ureg_if(rexb_ex, base_valid),
                    ureg_if(sib_idx, sib_usei),
                    segbase,
                    ureg(addr_reg),
                ],
                imm: if rip_rel { IMM_RIP_REL } else { 0 }
                    | ((sib_scl as u64) << 32)
                    | (displ as u64 & 0xffff_ffff),
            });
            uops.push(Uop {
                opcode: op::ST,
                control: set_op_size(ldsz) | ctrl::USE_RA | ctrl::USE_RB,
                regs: [ureg(addr_reg), ureg_if(opdst, !storeimm), 0, 0],
                imm,
            });
        }

        // tag the bundle boundaries
        if let Some(first) = uops.first_mut() {
            first.control |= ctrl::MOP_FIRST;
        }
        if let Some(last) = uops.last_mut() {
            last.control |= ctrl::MOP_LAST;
        }

        // a nonzero immediate always marks itself usable (adjusted registers)
        for u in &mut uops {
            if u.imm != 0 {
                u.control |= ctrl::USE_IMM;
            }
        }

        debug!("        uop bundle: {} uop(s)", uops.len());
        uops
    }
}

/// A #GP interrupt uop for privileged stubs.
fn int_gp() -> Uop {
    Uop {
        opcode: op::INT,
        control: ctrl::USE_IMM,
        regs: [0; 4],
        imm: pack_except(Exception::Gp, 0) as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::except_num;
    use crate::config::Config;
    use crate::frontend::x64::predecode::Predecoder;
    use crate::frontend::x64::{reg64, ureg, X64Frontend};

    fn decode_one(bytes: &[u8]) -> Vec<Uop> {
        let mut pd = Predecoder::default();
        pd.reset();
        let mut idx = 0;
        assert!(pd.parse(bytes, &mut idx), "instruction did not complete");
        let mut fe = X64Frontend::new(&Config::default());
        fe.crack(&pd.part)
    }

    #[test]
    fn test_mov_reg_imm_is_one_set() {
        let b = decode_one(&[0x48, 0xc7, 0xc0, 0x05, 0x00, 0x00, 0x00]);
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].opcode, op::SET);
        assert_eq!(b[0].regs[3], ureg(reg64::A));
        assert_eq!(b[0].imm, 5);
        assert_ne!(b[0].control & ctrl::MOP_FIRST, 0);
        assert_ne!(b[0].control & ctrl::MOP_LAST, 0);
    }

    #[test]
    fn test_memory_source_add_loads_first() {
        // add rax, [rsp]
        let b = decode_one(&[0x48, 0x03, 0x04, 0x24]);
        assert_eq!(b.len(), 2);
        assert_eq!(b[0].opcode, op::LDA);
        assert_eq!(b[1].opcode, op::ADD);
        // the loaded temporary is the operand, not a register in rb
        assert_eq!(b[1].regs[1], 0);
        assert_eq!(b[1].regs[2], b[0].regs[3]);
        assert_eq!(b[1].regs[3], ureg(reg64::A));
        assert_ne!(b[0].control & ctrl::MOP_FIRST, 0);
        assert_ne!(b[1].control & ctrl::MOP_LAST, 0);
    }

    #[test]
    fn test_memory_destination_mov_is_lea_store() {
        // mov [rsp-8], rax
        let b = decode_one(&[0x48, 0x89, 0x44, 0x24, 0xf8]);
        assert_eq!(b.len(), 2);
        assert_eq!(b[0].opcode, op::LEA);
        assert_eq!(b[1].opcode, op::ST);
        assert_eq!(b[1].regs[1], ureg(reg64::A)); // the stored value
        assert_eq!(b[1].regs[0], b[0].regs[3]); // through the address temp
    }

    #[test]
    fn test_ret_expands_to_pop_branch() {
        let b = decode_one(&[0xc3]);
        assert_eq!(b.len(), 2);
        assert_eq!(b[0].opcode, op::POP);
        assert_eq!(b[1].opcode, op::BRANCH);
        assert_eq!(b[1].regs[0], b[0].regs[3]); // branches through the popped temp
    }

    #[test]
    fn test_jcc_short_condition_subcode() {
        let b = decode_one(&[0x75, 0xfb]); // jnz -5
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].opcode, op::BRANCHCC + 5);
        assert_eq!(b[0].imm, 0xfb);
        assert_ne!(b[0].control & ctrl::USE_COND, 0);
    }

    #[test]
    fn test_rip_relative_marks_base() {
        // mov rax, [rip+0x10]
        let b = decode_one(&[0x48, 0x8b, 0x05, 0x10, 0x00, 0x00, 0x00]);
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].opcode, op::LDA);
        assert_eq!(b[0].regs[0], 0); // no base register
        assert_ne!(b[0].imm & IMM_RIP_REL, 0);
        assert_eq!(b[0].imm & 0xffff_ffff, 0x10);
        assert_eq!(b[0].regs[3], ureg(reg64::A)); // retargeted load
    }

    #[test]
    fn test_invalid_byte_is_ud() {
        let b = decode_one(&[0x0e]);
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].opcode, op::INT);
        assert_eq!(except_num(b[0].imm as u32), Exception::Ud as u16);
    }

    #[test]
    fn test_wide_divide_triple_expansion() {
        // div rcx
        let b = decode_one(&[0x48, 0xf7, 0xf1]);
        assert_eq!(b.len(), 3);
        assert_eq!(b[0].opcode, op::DIVQ);
        assert_eq!(b[1].opcode, op::DIVR);
        assert_eq!(b[2].opcode, op::COPY2);
    }

    #[test]
    fn test_call_pushes_return_address() {
        let b = decode_one(&[0xe8, 0x06, 0x00, 0x00, 0x00]);
        assert_eq!(b.len(), 2);
        assert_eq!(b[0].opcode, op::PUSHX);
        assert_eq!(b[0].imm & 0xff, px::RIP);
        assert_eq!(b[1].opcode, op::BRANCHR);
        assert_eq!(b[1].imm, 6);
    }
}
