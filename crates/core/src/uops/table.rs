//! Uop metadata table.
//!
//! Maps every opcode to its mnemonic, the reservation station ports it may
//! issue from, the functional unit kind it runs on, the allowed control bits,
//! and its execution latency.

use super::op;

/// Functional unit kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuKind {
    /// Any unit accepts the uop.
    Any,
    /// Control.
    Ctrl,
    /// Integer ALU.
    Alu,
    /// Floating point.
    Fpu,
    /// Vector.
    Vec,
    /// Load.
    Ld,
    /// Store.
    St,
    /// Floating-point load.
    Ldf,
    /// Floating-point store.
    Stf,
    /// Vector load.
    Ldv,
    /// Vector store.
    Stv,
    /// Address generation.
    Agu,
    /// Branch.
    Brch,
    /// Divider.
    Div,
    /// Multiplier.
    Mul,
}

impl FuKind {
    /// Short unit name for logs.
    pub fn name(self) -> &'static str {
        match self {
            FuKind::Any => "any",
            FuKind::Ctrl => "ctrl",
            FuKind::Alu => "alu",
            FuKind::Fpu => "fpu",
            FuKind::Vec => "vec",
            FuKind::Ld => "ld",
            FuKind::St => "st",
            FuKind::Ldf => "ldf",
            FuKind::Stf => "stf",
            FuKind::Ldv => "ldv",
            FuKind::Stv => "stv",
            FuKind::Agu => "agu",
            FuKind::Brch => "brnch",
            FuKind::Div => "div",
            FuKind::Mul => "mul",
        }
    }
}

/// Port selection masks.
pub mod ports {
    /// Ports hosting control units.
    pub const CTRL: u8 = 0x09; // 0, 3
    /// Ports hosting integer ALUs.
    pub const ALU: u8 = 0x0f; // 0, 1, 2, 3
    /// Ports hosting address generation units.
    pub const AGU: u8 = 0xb4; // 2, 4, 5, 7
    /// Ports hosting load units.
    pub const LD: u8 = 0x30; // 4, 5
    /// Ports hosting the store unit.
    pub const ST: u8 = 0x40; // 6
    /// Ports hosting branch units.
    pub const BRCH: u8 = 0x09; // 0, 3
    /// All ports.
    pub const ANY: u8 = 0xff;
}

/// Uop metadata.
#[derive(Debug, Clone, Copy)]
pub struct UopInfo {
    /// Readable instruction name.
    pub mnemonic: &'static str,
    /// Ports this uop can issue from (mask).
    pub ports: u8,
    /// Functional unit kind this uop runs on.
    pub fu: FuKind,
    /// Allowed control bits.
    pub ctrl_mask: u16,
    /// Execution latency in cycles.
    pub latency: u8,
}

const fn info(mnemonic: &'static str, ports: u8, fu: FuKind, ctrl_mask: u16, latency: u8) -> UopInfo {
    UopInfo {
        mnemonic,
        ports,
        fu,
        ctrl_mask,
        latency,
    }
}

/// Looks up the metadata for an opcode. `None` means an undefined opcode.
pub fn uop_info(opcode: u16) -> Option<UopInfo> {
    use ports::*;
    use FuKind::*;
    let i = match opcode {
        // control instructions
        op::NOP => info("nop", ANY, Any, 0x0181, 1),
        op::INT => info("int", CTRL, Ctrl, 0xffff, 1),
        op::RDTSC => info("rdtsc", CTRL, Ctrl, 0xffff, 1),
        op::LD64 => info("ld", LD, Ld, 0xffff, 1),
        op::LD64H => info("ld", LD, Ld, 0xffff, 1),
        op::POP => info("pop", LD, Ld, 0xffff, 1),
        op::POPX => info("popx", LD, Ld, 0xffff, 1),
        op::LDA => info("lda", LD, Ld, 0xffff, 1),
        op::LEA => info("lea", AGU, Agu, 0xffff, 1),
        op::ST => info("st", ST, St, 0xffff, 1),
        op::PUSH => info("push", ST, St, 0xffff, 1),
        op::PUSHX => info("pushx", ST, St, 0xffff, 1),
        op::MOVE => info("move", ALU, Alu, 0xffff, 1),
        op::COPY2 => info("copy2", ALU, Alu, 0xffff, 1),
        op::XCHG => info("xchg", ALU, Alu, 0xffff, 1),
        op::SET => info("set", ALU, Alu, 0xffff, 1),
        0x0050..=0x005f => info("movcc", BRCH, Brch, 0xffff, 1),
        op::BRANCH => info("branch", BRCH, Brch, 0xffff, 1),
        op::BRANCHR => info("branchr", BRCH, Brch, 0xffff, 1),
        op::BRANCHRZ => info("branchrz", BRCH, Brch, 0xffff, 1),
        0x0070..=0x007f => info("branchcc", BRCH, Brch, 0xffff, 1),
        op::SETCOND => info("setcond", CTRL, Ctrl, 0xffff, 1),
        op::CMC => info("cmc", CTRL, Ctrl, 0xffff, 1),
        op::CLC => info("clc", CTRL, Ctrl, 0xffff, 1),
        op::STC => info("stc", CTRL, Ctrl, 0xffff, 1),
        op::CLD => info("cld", CTRL, Ctrl, 0xffff, 1),
        op::STD => info("std", CTRL, Ctrl, 0xffff, 1),

        // ALU instructions
        op::NOP_A => info("nop.a", ALU, Alu, 0xffff, 1),
        op::ADD => info("add", ALU, Alu, 0xffff, 1),
        op::ADC => info("adc", ALU, Alu, 0xffff, 1),
        op::SUB => info("sub", ALU, Alu, 0xffff, 1),
        op::SBB => info("sbb", ALU, Alu, 0xffff, 1),
        op::NEG => info("neg", ALU, Alu, 0xffff, 1),
        op::MUL => info("mul", ALU, Mul, 0xffff, 1),
        op::IMUL => info("imul", ALU, Mul, 0xffff, 3),
        op::DIV8 => info("div8", ALU, Div, 0xffff, 1),
        op::DIVQ => info("divq", ALU, Div, 0xffff, 1),
        op::DIVR => info("divr", ALU, Div, 0xffff, 1),
        op::IDIV8 => info("idiv8", ALU, Div, 0xffff, 1),
        op::IDIVQ => info("idivq", ALU, Div, 0xffff, 1),
        op::IDIVR => info("idivr", ALU, Div, 0xffff, 1),
        op::LSL => info("lsl", ALU, Alu, 0xffff, 1),
        op::RSL => info("rsl", ALU, Alu, 0xffff, 1),
        op::RSA => info("rsa", ALU, Alu, 0xffff, 1),
        op::ROL => info("rol", ALU, Alu, 0xffff, 1),
        op::ROR => info("ror", ALU, Alu, 0xffff, 1),
        op::RCL => info("rcl", ALU, Alu, 0xffff, 1),
        op::RCR => info("rcr", ALU, Alu, 0xffff, 1),
        op::NOT => info("not", ALU, Alu, 0xffff, 1),
        op::AND => info("and", ALU, Alu, 0xffff, 1),
        op::OR => info("or", ALU, Alu, 0xffff, 1),
        op::XOR => info("xor", ALU, Alu, 0xffff, 1),

        // FPU instructions
        op::NOP_F => info("nop.f", ANY, Fpu, 0xffff, 1),
        op::LD_F => info("ld.f", CTRL, Ldf, 0xffff, 1),
        op::ST_F => info("st.f", CTRL, Stf, 0xffff, 1),
        op::SET_F => info("set.f", CTRL, Ctrl, 0xffff, 1),

        // vector int
        op::NOP_V => info("nop.v", ANY, Vec, 0xffff, 1),
        op::LD_V => info("ld.v", CTRL, Ldv, 0xffff, 1),
        op::LDU_V => info("ldu.v", CTRL, Ldv, 0xffff, 1),
        op::ST_V => info("st.v", CTRL, Stv, 0xffff, 1),
        op::STU_V => info("stu.v", CTRL, Stv, 0xffff, 1),

        // vector fp, control encodes int/fp type
        op::NOP_VF => info("nop.vecf", ANY, Vec, 0xffff, 1),

        op::RESERVED => info("reserved", CTRL, Ctrl, 0xffff, 1),
        _ => return None,
    };
    Some(i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RS_PORTS;

    #[test]
    fn test_known_opcodes() {
        assert_eq!(uop_info(op::ADD).unwrap().mnemonic, "add");
        assert_eq!(uop_info(op::IMUL).unwrap().latency, 3);
        assert_eq!(uop_info(op::ST).unwrap().ports, ports::ST);
        assert_eq!(uop_info(op::LDA).unwrap().fu, FuKind::Ld);
        assert_eq!(uop_info(op::LEA).unwrap().fu, FuKind::Agu);
    }

    #[test]
    fn test_condition_ranges() {
        for sub in 0..16u16 {
            assert_eq!(uop_info(op::MOVCC + sub).unwrap().mnemonic, "movcc");
            assert_eq!(uop_info(op::BRANCHCC + sub).unwrap().mnemonic, "branchcc");
        }
    }

    #[test]
    fn test_undefined_opcodes() {
        assert!(uop_info(0x0fff).is_none());
        assert!(uop_info(0x1001).is_none());
        assert!(uop_info(0x5000).is_none());
    }

    #[test]
    fn test_port_masks_fit() {
        let all = ((1u16 << RS_PORTS) - 1) as u8;
        for mask in [
            ports::CTRL,
            ports::ALU,
            ports::AGU,
            ports::LD,
            ports::ST,
            ports::BRCH,
            ports::ANY,
        ] {
            assert_eq!(mask & !all, 0);
            assert_ne!(mask, 0);
        }
    }
}
