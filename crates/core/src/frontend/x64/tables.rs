//! x86-64 opcode tables.
//!
//! Dense 256-entry tables keyed on the opcode byte (ModR/M presence,
//! immediate sizes, mandatory prefixes, group numbers) plus the opcode-info
//! map from byte sequences to mnemonics and operand descriptors. Group
//! opcodes key on an extra ModR/M.reg byte.

/// Operand addressing modes (SDM appendix A conventions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    /// modrm.rm → gp register or memory.
    E,
    /// Flag register.
    F,
    /// modrm.reg → gp register.
    G,
    /// Immediate.
    I,
    /// RIP-relative offset.
    J,
    /// modrm.rm → memory only.
    M,
    /// Offset without modrm (moffset).
    O,
    /// modrm.rm → gp register only.
    R,
    /// modrm.reg → segment register.
    S,
    /// Fixed register operand.
    Z,
}

/// Operand type codes. Values above 127 depend on the effective operand size.
pub mod ty {
    /// One byte.
    pub const B: u8 = 1;
    /// Word.
    pub const W: u8 = 2;
    /// Word plus byte; only ENTER uses this.
    pub const E: u8 = 3;
    /// Dword.
    pub const D: u8 = 4;
    /// Qword.
    pub const Q: u8 = 8;
    /// Word, dword, or qword by operand size.
    pub const V: u8 = 129;
    /// Word or dword by operand size.
    pub const Z: u8 = 130;
    /// Word or qword by operand size (push/pop).
    pub const F: u8 = 131;
    /// Byte, word, or dword by operand size (cbw family).
    pub const G: u8 = 132;
}

/// One operand descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    /// Addressing mode.
    pub mode: AddrMode,
    /// Operand type code.
    pub ty: u8,
}

/// Macro-opcode metadata.
#[derive(Debug, PartialEq, Eq)]
pub struct OpInfo {
    /// Instruction mnemonic.
    pub mnemonic: &'static str,
    /// Operand descriptors in encoding order.
    pub operands: &'static [Operand],
}

/// True for a legacy prefix byte.
pub const fn is_legacy(b: u8) -> bool {
    matches!(b, 0xf0 | 0xf2 | 0xf3 | 0x64 | 0x65 | 0x66 | 0x67)
}

/// True for the first escape byte.
#[inline]
pub const fn is_esc1(b: u8) -> bool {
    b == 0x0f
}

/// True for a second escape byte (0f 38 / 0f 3a).
#[inline]
pub const fn is_esc2(b: u8) -> bool {
    b == 0x38 || b == 0x3a
}

/// True for a REX prefix.
#[inline]
pub const fn is_rex(b: u8) -> bool {
    b >= 0x40 && b < 0x50
}

/// True for a VEX marker.
#[inline]
pub const fn is_vex(b: u8) -> bool {
    b == 0xc4 || b == 0xc5
}

/// True for an EVEX marker.
#[inline]
pub const fn is_evex(b: u8) -> bool {
    b == 0x62
}

/// ModR/M field accessors.
pub mod modrm {
    /// rm field.
    #[inline]
    pub const fn rm(byte: u8) -> u8 {
        byte & 0x07
    }
    /// reg field.
    #[inline]
    pub const fn reg(byte: u8) -> u8 {
        (byte & 0x38) >> 3
    }
    /// mod field.
    #[inline]
    pub const fn mode(byte: u8) -> u8 {
        (byte & 0xc0) >> 6
    }
}

/// SIB field accessors.
pub mod sib {
    /// base field.
    #[inline]
    pub const fn base(byte: u8) -> u8 {
        byte & 0x07
    }
    /// index field.
    #[inline]
    pub const fn index(byte: u8) -> u8 {
        (byte & 0x38) >> 3
    }
    /// scale field.
    #[inline]
    pub const fn scale(byte: u8) -> u8 {
        (byte & 0xc0) >> 6
    }
}

/// REX bit masks.
pub mod rex {
    /// Extension of modrm.rm, sib.base, or the opcode register.
    pub const B: u8 = 0x1;
    /// Extension of sib.index.
    pub const X: u8 = 0x2;
    /// Extension of modrm.reg.
    pub const R: u8 = 0x4;
    /// 64-bit operand size.
    pub const W: u8 = 0x8;
}

/// One-byte opcode group identifiers.
pub const fn opgrp_1b(byte: u8) -> u8 {
    match byte {
        0x80..=0x83 => 1, // immediate group 1
        0x8f => 1,        // group 1a, only pop Ev for now
        0xc0 | 0xc1 | 0xd0..=0xd3 => 2, // shift group 2
        0xf6 | 0xf7 => 3, // unary group 3
        0xfe => 4,        // inc/dec group 4
        0xff => 5,        // inc/dec group 5
        0xc6 | 0xc7 => 11, // mov group 11
        _ => 0,
    }
}

/// Two-byte opcode group identifiers.
pub const fn opgrp_2b(byte: u8) -> u8 {
    match byte {
        0x00 => 6,
        0x01 => 7,
        0xba => 8,
        0xc7 => 9,
        0xb9 => 10,
        0x71 => 12,
        0x72 => 13,
        0x73 => 14,
        0xae => 15,
        0x18 => 16,
        _ => 0,
    }
}

const _T: u8 = 1;
const __: u8 = 0;

/// ModR/M presence for one-byte opcodes (SDM table A-2).
#[rustfmt::skip]
pub const MODRM_1B: [u8; 256] = [
    _T,_T,_T,_T,__,__,__,__,_T,_T,_T,_T,__,__,__,__,_T,_T,_T,_T,__,__,__,__,_T,_T,_T,_T,__,__,__,__, // 00 - 1f
    _T,_T,_T,_T,__,__,__,__,_T,_T,_T,_T,__,__,__,__,_T,_T,_T,_T,__,__,__,__,_T,_T,_T,_T,__,__,__,__, // 20 - 3f
    __,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__, // 40 - 5f
    __,__,_T,_T,__,__,__,__,__,_T,__,_T,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__, // 60 - 7f
    _T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__, // 80 - 9f
    __,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__, // a0 - bf
    _T,_T,__,__,_T,_T,_T,_T,__,__,__,__,__,__,__,__,_T,_T,_T,_T,__,__,__,__,_T,_T,_T,_T,_T,_T,_T,_T, // c0 - df
    __,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,_T,_T,__,__,__,__,__,__,_T,_T, // e0 - ff
];

/// ModR/M presence for two-byte opcodes (SDM table A-3).
#[rustfmt::skip]
pub const MODRM_2B: [u8; 256] = [
    _T,_T,_T,_T,__,__,__,__,__,__,__,__,__,_T,__,__,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T, // 00 - 1f
    _T,_T,_T,_T,__,__,__,__,_T,_T,_T,_T,_T,_T,_T,_T,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__, // 20 - 3f
    _T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T, // 40 - 5f
    _T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,__,_T,_T,__,__,_T,_T,_T,_T, // 60 - 7f
    __,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T, // 80 - 9f
    __,__,__,_T,_T,_T,__,__,__,__,__,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T, // a0 - bf
    _T,_T,_T,_T,_T,_T,_T,_T,__,__,__,__,__,__,__,__,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T, // c0 - df
    _T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,__, // e0 - ff
];

/// Immediate sizes for one-byte opcodes; group opcodes resolve through the
/// opcode-info map instead.
#[rustfmt::skip]
pub const IMMSZ_1B: [u8; 256] = {
    const B: u8 = ty::B; const W: u8 = ty::W; const E: u8 = ty::E;
    const Q: u8 = ty::Q; const V: u8 = ty::V; const Z: u8 = ty::Z;
    [
    __,__,__,__, B, Z,__,__,__,__,__,__, B, Z,__,__,__,__,__,__, B, Z,__,__,__,__,__,__, B, Z,__,__, // 00 - 1f
    __,__,__,__, B, Z,__,__,__,__,__,__, B, Z,__,__,__,__,__,__, B, Z,__,__,__,__,__,__, B, Z,__,__, // 20 - 3f
    __,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__, // 40 - 5f
    __,__,__,__,__,__,__,__, Z, Z, B, B,__,__,__,__, B, B, B, B, B, B, B, B, B, B, B, B, B, B, B, B, // 60 - 7f
     B, Z,__, B,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__, // 80 - 9f
     Q, Q, Q, Q,__,__,__,__, B, Z,__,__,__,__,__,__, B, B, B, B, B, B, B, B, V, V, V, V, V, V, V, V, // a0 - bf
     B, B, W,__,__,__, B, Z, E,__, W,__,__, B,__,__,__,__,__,__, B, B,__,__,__,__,__,__,__,__,__,__, // c0 - df
    __,__,__, B, B, B, B, B, Z, Z,__, B,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__, // e0 - ff
    ]
};

/// Immediate size code for two-byte opcodes; only jcc takes more than a byte.
pub const fn immsz_2b(byte: u8) -> u8 {
    if byte >= 0x80 && byte < 0x90 {
        return ty::Z;
    }
    let has_byte = (byte >= 0x70 && byte < 0x74)
        || byte == 0xba
        || byte == 0xc2
        || (byte >= 0xc4 && byte < 0xc7);
    if has_byte {
        ty::B
    } else {
        0
    }
}

/// Mandatory prefixes on one-byte opcodes: none exist.
pub const fn reqpfx_1b(_byte: u8) -> u8 {
    0
}

/// Mandatory-prefix presence for two-byte opcodes.
#[rustfmt::skip]
pub const REQPFX_2B: [u8; 256] = [
    __,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,_T,_T,_T,_T,_T,_T,_T,_T,_T,__,_T,_T,__,__,__,__, // 00 - 1f
    __,__,__,__,__,__,__,__,_T,_T,_T,_T,_T,_T,_T,_T,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__, // 20 - 3f
    __,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T, // 40 - 5f
    _T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,__,__,__,__,__,_T,_T,_T,_T, // 60 - 7f
    __,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__, // 80 - 9f
    __,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,__,_T,__,__,__,_T,_T,__,__, // a0 - bf
    __,__,_T,__,_T,_T,_T,_T,__,__,__,__,__,__,__,__,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T, // c0 - df
    _T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,_T,__, // e0 - ff
];

/// ModR/M presence for the main opcode byte.
pub const fn use_modrm(byte: u8, mode: u8) -> bool {
    match mode {
        0 => MODRM_1B[byte as usize] != 0,
        1 => MODRM_2B[byte as usize] != 0,
        _ => false,
    }
}

/// SIB is present when mod ≠ 11b and rm = 100b.
pub const fn use_sib(modrm_byte: u8) -> bool {
    modrm::mode(modrm_byte) != 0b11 && modrm::rm(modrm_byte) == 0b100
}

/// Displacement size in bytes from the ModR/M and SIB bytes. Long mode always
/// uses the 32-bit addressing column; sib.base = 101b also forces one.
pub const fn displ_size(modrm_byte: u8, sib_byte: u8) -> u8 {
    if use_sib(modrm_byte) && sib::base(sib_byte) == 0b101 {
        match modrm::mode(modrm_byte) {
            0b00 | 0b10 => 4,
            0b01 => 1,
            _ => 0,
        }
    } else {
        match modrm::mode(modrm_byte) {
            0b00 => {
                if modrm::rm(modrm_byte) == 0b101 {
                    4
                } else {
                    0
                }
            }
            0b01 => 1,
            0b10 => 4,
            _ => 0,
        }
    }
}

/// Resolves an operand-size-dependent type code to bytes.
pub const fn op_bytes(opsz: u8, optype: u8) -> u8 {
    match optype {
        ty::V => opsz,
        ty::Z => {
            if opsz == 2 {
                2
            } else {
                4
            }
        }
        ty::F => {
            if opsz == 2 {
                2
            } else {
                8
            }
        }
        ty::G => {
            if opsz == 8 {
                4
            } else {
                opsz
            }
        }
        _ => optype,
    }
}

/// True if the operand lives in modrm.rm with a possible memory form.
pub const fn is_rmop(o: Operand) -> bool {
    matches!(o.mode, AddrMode::E | AddrMode::M)
}

/// True for an immediate-class operand.
pub const fn is_immop(o: Operand) -> bool {
    matches!(o.mode, AddrMode::I | AddrMode::J)
}

/// The modrm.rm operand with a possible memory access, and its position.
pub fn rmop(operands: &[Operand]) -> Option<(Operand, usize)> {
    operands
        .iter()
        .enumerate()
        .find(|(_, o)| is_rmop(**o))
        .map(|(i, o)| (*o, i))
}

/// Immediate size in bytes for a main opcode, resolving group immediates
/// through the opcode-info map.
pub fn imm_size(byte: u8, opsz: u8, mode: u8, mod_reg: u8) -> u8 {
    match mode {
        0 => {
            let immtype = if opgrp_1b(byte) == 0 {
                IMMSZ_1B[byte as usize]
            } else {
                match opinfo(&[byte, mod_reg]) {
                    Some(info) => info
                        .operands
                        .iter()
                        .filter(|o| o.mode == AddrMode::I)
                        .map(|o| op_bytes(opsz, o.ty))
                        .sum(),
                    None => 0,
                }
            };
            op_bytes(opsz, immtype)
        }
        1 => op_bytes(opsz, immsz_2b(byte)),
        _ => 0,
    }
}

macro_rules! oi {
    ($mn:literal) => {
        Some(&OpInfo { mnemonic: $mn, operands: &[] })
    };
    ($mn:literal $(, ($m:ident, $t:ident))+) => {
        Some(&OpInfo {
            mnemonic: $mn,
            operands: &[$(Operand { mode: AddrMode::$m, ty: ty::$t }),+],
        })
    };
}

/// Opcode info keyed on the significant byte sequence: optional mandatory
/// prefix, optional 0x0f escape, the opcode byte, and for group opcodes the
/// ModR/M.reg value.
pub fn opinfo(key: &[u8]) -> Option<&'static OpInfo> {
    match key {
        // one byte
        [0x00] => oi!("add", (E, B), (G, B)),
        [0x01] => oi!("add", (E, V), (G, V)),
        [0x02] => oi!("add", (G, B), (E, B)),
        [0x03] => oi!("add", (G, V), (E, V)),
        [0x04] => oi!("add", (Z, B), (I, B)),
        [0x05] => oi!("add", (Z, V), (I, Z)),
        [0x08] => oi!("or", (E, B), (G, B)),
        [0x09] => oi!("or", (E, V), (G, V)),
        [0x0a] => oi!("or", (G, B), (E, B)),
        [0x0b] => oi!("or", (G, V), (E, V)),
        [0x0c] => oi!("or", (Z, B), (I, B)),
        [0x0d] => oi!("or", (Z, V), (I, Z)),

        [0x10] => oi!("adc", (E, B), (G, B)),
        [0x11] => oi!("adc", (E, V), (G, V)),
        [0x12] => oi!("adc", (G, B), (E, B)),
        [0x13] => oi!("adc", (G, V), (E, V)),
        [0x14] => oi!("adc", (Z, B), (I, B)),
        [0x15] => oi!("adc", (Z, V), (I, Z)),
        [0x18] => oi!("sbb", (E, B), (G, B)),
        [0x19] => oi!("sbb", (E, V), (G, V)),
        [0x1a] => oi!("sbb", (G, B), (E, B)),
        [0x1b] => oi!("sbb", (G, V), (E, V)),
        [0x1c] => oi!("sbb", (Z, B), (I, B)),
        [0x1d] => oi!("sbb", (Z, V), (I, Z)),

        [0x20] => oi!("and", (E, B), (G, B)),
        [0x21] => oi!("and", (E, V), (G, V)),
        [0x22] => oi!("and", (G, B), (E, B)),
        [0x23] => oi!("and", (G, V), (E, V)),
        [0x24] => oi!("and", (Z, B), (I, B)),
        [0x25] => oi!("and", (Z, V), (I, Z)),
        [0x28] => oi!("sub", (E, B), (G, B)),
        [0x29] => oi!("sub", (E, V), (G, V)),
        [0x2a] => oi!("sub", (G, B), (E, B)),
        [0x2b] => oi!("sub", (G, V), (E, V)),
        [0x2c] => oi!("sub", (Z, B), (I, B)),
        [0x2d] => oi!("sub", (Z, V), (I, Z)),

        [0x30] => oi!("xor", (E, B), (G, B)),
        [0x31] => oi!("xor", (E, V), (G, V)),
        [0x32] => oi!("xor", (G, B), (E, B)),
        [0x33] => oi!("xor", (G, V), (E, V)),
        [0x34] => oi!("xor", (Z, B), (I, B)),
        [0x35] => oi!("xor", (Z, V), (I, Z)),
        [0x38] => oi!("cmp", (E, B), (G, B)),
        [0x39] => oi!("cmp", (E, V), (G, V)),
        [0x3a] => oi!("cmp", (G, B), (E, B)),
        [0x3b] => oi!("cmp", (G, V), (E, V)),
        [0x3c] => oi!("cmp", (Z, B), (I, B)),
        [0x3d] => oi!("cmp", (Z, V), (I, Z)),

        [0x50..=0x57] => oi!("push", (Z, F)),
        [0x58..=0x5f] => oi!("pop", (Z, F)),

        [0x63] => oi!("movsxd", (G, V), (E, Z)),
        [0x68] => oi!("push", (I, F)),
        [0x69] => oi!("imul", (G, V), (E, V), (I, Z)),
        [0x6a] => oi!("push", (I, B)),
        [0x6b] => oi!("imul", (G, V), (E, V), (I, B)),

        // short jumps
        [0x70] => oi!("jo", (J, B)),
        [0x71] => oi!("jno", (J, B)),
        [0x72] => oi!("jb", (J, B)),
        [0x73] => oi!("jnb", (J, B)),
        [0x74] => oi!("jz", (J, B)),
        [0x75] => oi!("jnz", (J, B)),
        [0x76] => oi!("jbe", (J, B)),
        [0x77] => oi!("jnbe", (J, B)),
        [0x78] => oi!("js", (J, B)),
        [0x79] => oi!("jns", (J, B)),
        [0x7a] => oi!("jp", (J, B)),
        [0x7b] => oi!("jnp", (J, B)),
        [0x7c] => oi!("jl", (J, B)),
        [0x7d] => oi!("jnl", (J, B)),
        [0x7e] => oi!("jle", (J, B)),
        [0x7f] => oi!("jnle", (J, B)),

        // immediate group 1
        [0x80, 0b000] => oi!("add", (E, B), (I, B)),
        [0x80, 0b001] => oi!("or", (E, B), (I, B)),
        [0x80, 0b010] => oi!("adc", (E, B), (I, B)),
        [0x80, 0b011] => oi!("sbb", (E, B), (I, B)),
        [0x80, 0b100] => oi!("and", (E, B), (I, B)),
        [0x80, 0b101] => oi!("sub", (E, B), (I, B)),
        [0x80, 0b110] => oi!("xor", (E, B), (I, B)),
        [0x80, 0b111] => oi!("cmp", (E, B), (I, B)),
        [0x81, 0b000] => oi!("add", (E, V), (I, Z)),
        [0x81, 0b001] => oi!("or", (E, V), (I, Z)),
        [0x81, 0b010] => oi!("adc", (E, V), (I, Z)),
        [0x81, 0b011] => oi!("sbb", (E, V), (I, Z)),
        [0x81, 0b100] => oi!("and", (E, V), (I, Z)),
        [0x81, 0b101] => oi!("sub", (E, V), (I, Z)),
        [0x81, 0b110] => oi!("xor", (E, V), (I, Z)),
        [0x81, 0b111] => oi!("cmp", (E, V), (I, Z)),
        [0x83, 0b000] => oi!("add", (E, V), (I, B)),
        [0x83, 0b001] => oi!("or", (E, V), (I, B)),
        [0x83, 0b010] => oi!("adc", (E, V), (I, B)),
        [0x83, 0b011] => oi!("sbb", (E, V), (I, B)),
        [0x83, 0b100] => oi!("and", (E, V), (I, B)),
        [0x83, 0b101] => oi!("sub", (E, V), (I, B)),
        [0x83, 0b110] => oi!("xor", (E, V), (I, B)),
        [0x83, 0b111] => oi!("cmp", (E, V), (I, B)),

        [0x84] => oi!("test", (E, B), (G, B)),
        [0x85] => oi!("test", (E, V), (G, V)),
        [0x86] => oi!("xchg", (E, B), (G, B)),
        [0x87] => oi!("xchg", (E, V), (G, V)),
        [0x88] => oi!("mov", (E, B), (G, B)),
        [0x89] => oi!("mov", (E, V), (G, V)),
        [0x8a] => oi!("mov", (G, B), (E, B)),
        [0x8b] => oi!("mov", (G, V), (E, V)),
        [0x8c] => oi!("mov", (E, V), (S, W)),
        [0x8d] => oi!("lea", (G, V), (M, V)),
        [0x8e] => oi!("mov", (S, W), (E, W)),
        // group 1a
        [0x8f, 0b000] => oi!("pop", (E, F)),

        [0x90..=0x97] => oi!("xchg", (R, V), (R, V)),
        [0x98] => oi!("cbw", (Z, G)),
        [0x99] => oi!("cwd", (Z, V)),
        [0x9c] => oi!("pushf", (F, F)),
        [0x9d] => oi!("popf", (F, F)),

        // moffset moves, displ64
        [0xa0] => oi!("mov", (Z, B), (O, B)),
        [0xa1] => oi!("mov", (Z, V), (O, V)),
        [0xa2] => oi!("mov", (O, B), (Z, B)),
        [0xa3] => oi!("mov", (O, V), (Z, V)),
        [0xa8] => oi!("test", (Z, B), (I, B)),
        [0xa9] => oi!("test", (Z, V), (I, Z)),

        // immediate moves, registers encoded
        [0xb0..=0xb7] => oi!("mov", (Z, B), (I, B)),
        [0xb8..=0xbf] => oi!("mov", (Z, V), (I, V)),

        // shift group 2
        [0xc0, 0b000] => oi!("rol", (E, B), (I, B)),
        [0xc0, 0b001] => oi!("ror", (E, B), (I, B)),
        [0xc0, 0b010] => oi!("rcl", (E, B), (I, B)),
        [0xc0, 0b011] => oi!("rcr", (E, B), (I, B)),
        [0xc0, 0b100] => oi!("shl", (E, B), (I, B)),
        [0xc0, 0b101] => oi!("shr", (E, B), (I, B)),
        [0xc0, 0b111] => oi!("sar", (E, B), (I, B)),
        [0xc1, 0b000] => oi!("rol", (E, V), (I, B)),
        [0xc1, 0b001] => oi!("ror", (E, V), (I, B)),
        [0xc1, 0b010] => oi!("rcl", (E, V), (I, B)),
        [0xc1, 0b011] => oi!("rcr", (E, V), (I, B)),
        [0xc1, 0b100] => oi!("shl", (E, V), (I, B)),
        [0xc1, 0b101] => oi!("shr", (E, V), (I, B)),
        [0xc1, 0b111] => oi!("sar", (E, V), (I, B)),

        [0xc2] => oi!("ret", (I, W)),
        [0xc3] => oi!("ret"),
        // mov group 11
        [0xc6, 0b000] => oi!("mov", (E, B), (I, B)),
        [0xc7, 0b000] => oi!("mov", (E, V), (I, Z)),
        [0xc8] => oi!("enter", (I, W), (I, B)),
        [0xc9] => oi!("leave"),
        [0xca] => oi!("ret", (I, W)),
        [0xcb] => oi!("ret"),
        [0xcc] => oi!("int3"),
        [0xcd] => oi!("int", (I, B)),
        [0xcf] => oi!("iret"),

        // shift group 2 again
        [0xd0, 0b000] => oi!("rol", (E, B)),
        [0xd0, 0b001] => oi!("ror", (E, B)),
        [0xd0, 0b010] => oi!("rcl", (E, B)),
        [0xd0, 0b011] => oi!("rcr", (E, B)),
        [0xd0, 0b100] => oi!("shl", (E, B)),
        [0xd0, 0b101] => oi!("shr", (E, B)),
        [0xd0, 0b111] => oi!("sar", (E, B)),
        [0xd1, 0b000] => oi!("rol", (E, V)),
        [0xd1, 0b001] => oi!("ror", (E, V)),
        [0xd1, 0b010] => oi!("rcl", (E, V)),
        [0xd1, 0b011] => oi!("rcr", (E, V)),
        [0xd1, 0b100] => oi!("shl", (E, V)),
        [0xd1, 0b101] => oi!("shr", (E, V)),
        [0xd1, 0b111] => oi!("sar", (E, V)),
        [0xd2, 0b000] => oi!("rol", (E, B), (Z, B)),
        [0xd2, 0b001] => oi!("ror", (E, B), (Z, B)),
        [0xd2, 0b010] => oi!("rcl", (E, B), (Z, B)),
        [0xd2, 0b011] => oi!("rcr", (E, B), (Z, B)),
        [0xd2, 0b100] => oi!("shl", (E, B), (Z, B)),
        [0xd2, 0b101] => oi!("shr", (E, B), (Z, B)),
        [0xd2, 0b111] => oi!("sar", (E, B), (Z, B)),
        [0xd3, 0b000] => oi!("rol", (E, V), (Z, B)),
        [0xd3, 0b001] => oi!("ror", (E, V), (Z, B)),
        [0xd3, 0b010] => oi!("rcl", (E, V), (Z, B)),
        [0xd3, 0b011] => oi!("rcr", (E, V), (Z, B)),
        [0xd3, 0b100] => oi!("shl", (E, V), (Z, B)),
        [0xd3, 0b101] => oi!("shr", (E, V), (Z, B)),
        [0xd3, 0b111] => oi!("sar", (E, V), (Z, B)),

        [0xe3] => oi!("jrcxz", (J, B), (R, V)),
        [0xe8] => oi!("call", (J, Z)),
        [0xe9] => oi!("jmp", (J, Z)),
        [0xeb] => oi!("jmp", (J, B)),

        [0xf1] => oi!("int1"),
        [0xf4] => oi!("halt"),
        [0xf5] => oi!("cmc"),
        // unary group 3
        [0xf6, 0b000] => oi!("test", (E, B), (I, B)),
        [0xf6, 0b010] => oi!("not", (E, B)),
        [0xf6, 0b011] => oi!("neg", (E, B)),
        [0xf6, 0b100] => oi!("mul", (E, B)),
        [0xf6, 0b101] => oi!("imul", (E, B)),
        [0xf6, 0b110] => oi!("div", (E, B)),
        [0xf6, 0b111] => oi!("idiv", (E, B)),
        [0xf7, 0b000] => oi!("test", (E, V), (I, Z)),
        [0xf7, 0b010] => oi!("not", (E, V)),
        [0xf7, 0b011] => oi!("neg", (E, V)),
        [0xf7, 0b100] => oi!("mul", (E, V)),
        [0xf7, 0b101] => oi!("imul", (E, V)),
        [0xf7, 0b110] => oi!("div", (E, V)),
        [0xf7, 0b111] => oi!("idiv", (E, V)),
        [0xf8] => oi!("clc", (F, Q)),
        [0xf9] => oi!("stc", (F, Q)),
        [0xfa] => oi!("cli", (F, Q)),
        [0xfb] => oi!("sti", (F, Q)),
        [0xfc] => oi!("cld", (F, Q)),
        [0xfd] => oi!("std", (F, Q)),

        // inc/dec group 4
        [0xfe, 0b000] => oi!("inc", (E, B)),
        [0xfe, 0b001] => oi!("dec", (E, B)),
        // inc/dec group 5
        [0xff, 0b000] => oi!("inc", (E, V)),
        [0xff, 0b001] => oi!("dec", (E, V)),
        [0xff, 0b010] => oi!("call", (E, V)),
        [0xff, 0b011] => oi!("call", (E, V)),
        [0xff, 0b100] => oi!("jmp", (E, V)),
        [0xff, 0b101] => oi!("jmp", (M, V)),

        // two byte opcodes
        [0x0f, 0x08] => oi!("invd"),
        [0x0f, 0x09] => oi!("wbinvd"),
        [0x0f, 0x0a] => oi!("ud2"),
        [0x0f, 0x0d] => oi!("prefetchw", (E, V)),

        [0x0f, 0x19] => oi!("nop reserved"),
        [0x0f, 0x1c] => oi!("nop reserved"),
        [0x0f, 0x1d] => oi!("nop reserved"),
        [0x0f, 0x1e] => oi!("nop reserved"),
        [0x0f, 0x1f] => oi!("nop /0", (E, V)),

        [0x0f, 0x31] => oi!("rdtsc"),

        [0x0f, 0x40] => oi!("cmovo", (G, V), (E, V)),
        [0x0f, 0x41] => oi!("cmovno", (G, V), (E, V)),
        [0x0f, 0x42] => oi!("cmovb", (G, V), (E, V)),
        [0x0f, 0x43] => oi!("cmovnb", (G, V), (E, V)),
        [0x0f, 0x44] => oi!("cmovz", (G, V), (E, V)),
        [0x0f, 0x45] => oi!("cmovnz", (G, V), (E, V)),
        [0x0f, 0x46] => oi!("cmovbe", (G, V), (E, V)),
        [0x0f, 0x47] => oi!("cmovnbe", (G, V), (E, V)),
        [0x0f, 0x48] => oi!("cmovs", (G, V), (E, V)),
        [0x0f, 0x49] => oi!("cmovns", (G, V), (E, V)),
        [0x0f, 0x4a] => oi!("cmovp", (G, V), (E, V)),
        [0x0f, 0x4b] => oi!("cmovnp", (G, V), (E, V)),
        [0x0f, 0x4c] => oi!("cmovl", (G, V), (E, V)),
        [0x0f, 0x4d] => oi!("cmovnl", (G, V), (E, V)),
        [0x0f, 0x4e] => oi!("cmovle", (G, V), (E, V)),
        [0x0f, 0x4f] => oi!("cmovnle", (G, V), (E, V)),

        // long jumps
        [0x0f, 0x80] => oi!("jo", (J, D)),
        [0x0f, 0x81] => oi!("jno", (J, D)),
        [0x0f, 0x82] => oi!("jb", (J, D)),
        [0x0f, 0x83] => oi!("jnb", (J, D)),
        [0x0f, 0x84] => oi!("jz", (J, D)),
        [0x0f, 0x85] => oi!("jnz", (J, D)),
        [0x0f, 0x86] => oi!("jbe", (J, D)),
        [0x0f, 0x87] => oi!("jnbe", (J, D)),
        [0x0f, 0x88] => oi!("js", (J, D)),
        [0x0f, 0x89] => oi!("jns", (J, D)),
        [0x0f, 0x8a] => oi!("jp", (J, D)),
        [0x0f, 0x8b] => oi!("jnp", (J, D)),
        [0x0f, 0x8c] => oi!("jl", (J, D)),
        [0x0f, 0x8d] => oi!("jnl", (J, D)),
        [0x0f, 0x8e] => oi!("jle", (J, D)),
        [0x0f, 0x8f] => oi!("jnle", (J, D)),

        [0x0f, 0x90..=0x9f] => oi!("setcc", (E, B)),

        [0x0f, 0xa0] => oi!("pushfs", (Z, F)),
        [0x0f, 0xa1] => oi!("popfs", (Z, F)),
        [0x0f, 0xa2] => oi!("cpuid"),
        [0x0f, 0xa3] => oi!("bt", (E, V), (G, V)),
        [0x0f, 0xa4] => oi!("shld", (E, V), (G, V), (I, B)),
        [0x0f, 0xa5] => oi!("shld", (E, V), (G, V), (Z, B)),
        [0x0f, 0xa8] => oi!("pushgs", (Z, F)),
        [0x0f, 0xa9] => oi!("popgs", (Z, F)),
        [0x0f, 0xab] => oi!("bts", (E, V), (G, V)),
        [0x0f, 0xac] => oi!("shrd", (E, V), (G, V), (I, B)),
        [0x0f, 0xad] => oi!("shrd", (E, V), (G, V), (Z, B)),
        [0x0f, 0xaf] => oi!("imul", (G, V), (E, V)),

        [0x0f, 0xb0] => oi!("cmpxchg", (E, B), (G, B)),
        [0x0f, 0xb1] => oi!("cmpxchg", (E, V), (G, V)),
        [0x0f, 0xb3] => oi!("btr", (E, V), (G, V)),
        [0x0f, 0xb6] => oi!("movzx", (G, V), (E, B)),
        [0x0f, 0xb7] => oi!("movzx", (G, V), (E, W)),
        [0xf3, 0x0f, 0xb8] => oi!("popcnt", (G, V), (E, V)),
        [0x0f, 0xb9] => oi!("ud1"),

        // group 8
        [0x0f, 0xba, 0b100] => oi!("bt", (E, V), (I, B)),
        [0x0f, 0xba, 0b101] => oi!("bts", (E, V), (I, B)),
        [0x0f, 0xba, 0b110] => oi!("btr", (E, V), (I, B)),
        [0x0f, 0xba, 0b111] => oi!("btc", (E, V), (I, B)),
        [0x0f, 0xbb] => oi!("btc", (E, V), (G, V)),
        [0x0f, 0xbc] => oi!("bsf", (E, V), (G, V)),
        [0xf3, 0x0f, 0xbc] => oi!("tzcnt", (E, V), (G, V)),
        [0x0f, 0xbd] => oi!("bsr", (E, V), (G, V)),
        [0xf3, 0x0f, 0xbd] => oi!("lzcnt", (E, V), (G, V)),
        [0x0f, 0xbe] => oi!("movsx", (G, V), (E, B)),
        [0x0f, 0xbf] => oi!("movsx", (G, V), (E, W)),

        [0x0f, 0xc0] => oi!("xadd", (E, B), (G, B)),
        [0x0f, 0xc1] => oi!("xadd", (E, V), (G, V)),
        [0x0f, 0xc8..=0xcf] => oi!("bswap", (Z, V)),

        [0x0f, 0xff] => oi!("ud0"),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modrm_presence() {
        assert!(use_modrm(0x00, 0)); // add Eb, Gb
        assert!(!use_modrm(0x50, 0)); // push
        assert!(use_modrm(0xc7, 0)); // mov group 11
        assert!(use_modrm(0x40, 1)); // cmovo
        assert!(!use_modrm(0x80, 1)); // jcc long
    }

    #[test]
    fn test_sib_rule() {
        assert!(use_sib(0b00_000_100));
        assert!(use_sib(0b01_000_100));
        assert!(!use_sib(0b11_000_100)); // register direct
        assert!(!use_sib(0b00_000_101)); // rip-relative
    }

    #[test]
    fn test_displacement_size() {
        assert_eq!(displ_size(0b00_000_101, 0), 4); // disp32 (rip-relative)
        assert_eq!(displ_size(0b01_000_000, 0), 1); // disp8
        assert_eq!(displ_size(0b10_000_000, 0), 4); // disp32
        assert_eq!(displ_size(0b11_000_000, 0), 0); // register direct
        assert_eq!(displ_size(0b00_000_100, 0b00_000_101), 4); // sib base 101
    }

    #[test]
    fn test_imm_sizes() {
        // add al, imm8 / add eax, imm32 / add rax, imm32
        assert_eq!(imm_size(0x04, 1, 0, 0), 1);
        assert_eq!(imm_size(0x05, 4, 0, 0), 4);
        assert_eq!(imm_size(0x05, 8, 0, 0), 4);
        // mov r64, imm64
        assert_eq!(imm_size(0xb8, 8, 0, 0), 8);
        // group 1: 0x81 /0 takes Iz, 0x83 /0 takes Ib
        assert_eq!(imm_size(0x81, 8, 0, 0), 4);
        assert_eq!(imm_size(0x83, 8, 0, 0), 1);
        // jcc long takes Iz
        assert_eq!(imm_size(0x84, 4, 1, 0), 4);
        // no immediate
        assert_eq!(imm_size(0x01, 4, 0, 0), 0);
    }

    #[test]
    fn test_opinfo_lookup() {
        assert_eq!(opinfo(&[0xc3]).unwrap().mnemonic, "ret");
        assert_eq!(opinfo(&[0x80, 0b101]).unwrap().mnemonic, "sub");
        assert_eq!(opinfo(&[0x0f, 0x45]).unwrap().mnemonic, "cmovnz");
        assert!(opinfo(&[0x0e]).is_none());
        let lea = opinfo(&[0x8d]).unwrap();
        assert!(is_rmop(lea.operands[1]));
        assert!(!is_rmop(lea.operands[0]));
    }

    #[test]
    fn test_op_bytes() {
        assert_eq!(op_bytes(8, ty::V), 8);
        assert_eq!(op_bytes(2, ty::Z), 2);
        assert_eq!(op_bytes(8, ty::Z), 4);
        assert_eq!(op_bytes(8, ty::F), 8);
        assert_eq!(op_bytes(2, ty::F), 2);
        assert_eq!(op_bytes(4, ty::B), 1);
    }
}
