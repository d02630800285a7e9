//! Streaming x86-64 predecoder.
//!
//! A four-state machine (prefix → opcode → modrm → imm) that recovers
//! instruction boundaries from an unaligned fetch window. Each state may
//! consume zero or more bytes; when the window ends mid-instruction the
//! partial-instruction record carries the state into the next window.

use log::{debug, trace};

use super::tables::{
    displ_size, imm_size, is_esc1, is_esc2, is_evex, is_legacy, is_rex, is_vex, modrm, rex,
    use_modrm, use_sib,
};

/// Which decoder class an instruction routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderClass {
    /// Simple decoder: one uop.
    #[default]
    Fast,
    /// Complex decoder: up to four uops.
    Complex,
    /// Microcode sequencer: more than four uops.
    Msrom,
}

impl DecoderClass {
    /// Readable class name.
    pub fn name(self) -> &'static str {
        match self {
            DecoderClass::Fast => "fast",
            DecoderClass::Complex => "complex",
            DecoderClass::Msrom => "MSROM",
        }
    }
}

/// Prefix metadata gathered during predecode.
#[derive(Debug, Clone, Default)]
pub struct DecodeMeta {
    /// Last group-1 prefix byte (f0/f2/f3), 0 if none.
    pub has_g1: u8,
    /// Last group-2 segment prefix byte (64/65), 0 if none.
    pub has_g2: u8,
    /// Operand-size prefix 66 present.
    pub has_66: bool,
    /// Address-size prefix 67 present.
    pub has_67: bool,
    /// REX prefix present.
    pub has_rex: bool,
    /// Offset of the REX byte in the instruction bytes.
    pub off_rex: u8,
    /// Number of opcode escapes (0 = one-byte, 1 = two-byte map).
    pub op_mode: u8,
    /// Routing hint for the decoder station.
    pub decoder: DecoderClass,
}

/// A (possibly partial) predecoded instruction.
#[derive(Debug, Clone, Default)]
pub struct X64Op {
    /// Raw instruction bytes accumulated so far.
    pub bytes: Vec<u8>,
    /// Offset of the opcode (prefixes precede it).
    pub off_opcode: u8,
    /// Offset of the ModR/M byte, 0 if absent.
    pub off_modrm: u8,
    /// Offset of the SIB byte, 0 if absent.
    pub off_sib: u8,
    /// Offset of the displacement, 0 if absent.
    pub off_displ: u8,
    /// Offset of the immediate, 0 if absent.
    pub off_imm: u8,
    /// Instruction length; 0 or above 15 means #UD, 0xff a fetch page fault.
    pub len: u8,
    /// Prefix metadata and decoder routing.
    pub meta: DecodeMeta,
}

impl X64Op {
    /// The main opcode byte (after any escape).
    pub fn opcode(&self) -> u8 {
        self.bytes[(self.off_opcode + self.meta.op_mode) as usize]
    }

    /// The ModR/M byte, 0 if absent.
    pub fn modrm(&self) -> u8 {
        if self.off_modrm != 0 {
            self.bytes[self.off_modrm as usize]
        } else {
            0
        }
    }

    /// The SIB byte, 0 if absent.
    pub fn sib(&self) -> u8 {
        if self.off_sib != 0 {
            self.bytes[self.off_sib as usize]
        } else {
            0
        }
    }

    /// The REX byte, 0 if absent.
    pub fn rex(&self) -> u8 {
        if self.meta.has_rex {
            self.bytes[self.meta.off_rex as usize]
        } else {
            0
        }
    }
}

/// Predecoder parse states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PdState {
    /// Ready for a new instruction.
    #[default]
    Reset,
    /// Consuming prefixes.
    Prefix,
    /// Consuming opcode bytes.
    Opcode,
    /// Consuming ModR/M, SIB, and displacement.
    Modrm,
    /// Consuming immediate bytes.
    Imm,
}

/// The streaming predecoder. State persists across fetch windows.
#[derive(Debug, Default)]
pub struct Predecoder {
    /// Current parse state.
    pub state: PdState,
    /// Remaining displacement or immediate bytes to consume.
    pub remaining: u8,
    /// The instruction being assembled.
    pub part: X64Op,
    /// An unsupported encoding forced #UD; fetch and predecode shut down.
    pub ud_shutdown: bool,
}

impl Predecoder {
    /// Resets the partial-instruction state (keeps nothing).
    pub fn reset(&mut self) {
        self.state = PdState::Prefix;
        self.remaining = 0;
        self.part = X64Op::default();
        self.part.bytes.reserve(15);
        self.ud_shutdown = false;
    }

    /// Parses one instruction from `block` starting at `*idx`, leaving `*idx`
    /// at the start of the next instruction. Returns true when a complete
    /// instruction (or a forced-#UD stub) is available in `part`.
    pub fn parse(&mut self, block: &[u8], idx: &mut usize) -> bool {
        let from = match self.state {
            PdState::Reset | PdState::Prefix => 0,
            PdState::Opcode => 1,
            PdState::Modrm => 2,
            PdState::Imm => 3,
        };

        if from <= 0 {
            self.state = PdState::Prefix;
            if self.step_prefix(block, idx) {
                return self.state == PdState::Reset;
            }
        }
        if from <= 1 {
            self.state = PdState::Opcode;
            if self.step_opcode(block, idx) {
                return self.state == PdState::Reset;
            }
        }
        if from <= 2 {
            self.state = PdState::Modrm;
            if self.step_modrm(block, idx) {
                return false;
            }
        }
        self.state = PdState::Imm;
        self.step_imm(block, idx);
        self.state == PdState::Reset
    }

    /// Force the partial instruction to a zero-length #UD stub and stop.
    fn force_ud(&mut self, block: &[u8], idx: &mut usize) {
        self.part = X64Op::default();
        self.state = PdState::Reset;
        *idx = block.len();
        self.ud_shutdown = true;
    }

    fn push_byte(&mut self, b: u8, idx: &mut usize) {
        self.part.bytes.push(b);
        self.part.len += 1;
        *idx += 1;
    }

    fn step_prefix(&mut self, block: &[u8], idx: &mut usize) -> bool {
        trace!("          PD state PREFIX");
        while *idx < block.len() {
            let b = block[*idx];
            if is_legacy(b) || is_rex(b) {
                trace!("            prefix {b:#04x}");
                match b {
                    // group 1/2: the last prefix counts
                    0xf0 | 0xf2 | 0xf3 => self.part.meta.has_g1 = b,
                    0x64 | 0x65 => self.part.meta.has_g2 = b,
                    0x66 => self.part.meta.has_66 = true,
                    0x67 => {
                        self.part.meta.has_67 = true;
                        self.part.meta.decoder = DecoderClass::Complex;
                    }
                    _ => {}
                }
                self.push_byte(b, idx);
                self.part.off_opcode += 1;
            } else if is_vex(b) || is_evex(b) {
                // not supported, the zero-length stub decodes to #UD
                trace!("            VEX/EVEX {b:#04x} detected, #UD");
                self.force_ud(block, idx);
                return true;
            } else {
                break;
            }
        }

        // REX must be the last prefix before the escape or opcode
        if let Some(&last) = self.part.bytes.last() {
            if is_rex(last) {
                trace!("            REX is valid");
                self.part.meta.has_rex = true;
                self.part.meta.off_rex = self.part.len - 1;
            }
        }
        *idx >= block.len()
    }

    fn step_opcode(&mut self, block: &[u8], idx: &mut usize) -> bool {
        trace!("          PD state OPCODE");
        if *idx < block.len() && is_esc1(block[*idx]) {
            trace!("            esc1 {:#04x}", block[*idx]);
            let b = block[*idx];
            self.push_byte(b, idx);
        }

        if *idx < block.len()
            && self.part.bytes.last().is_some_and(|&b| is_esc1(b))
            && is_esc2(block[*idx])
        {
            // second escape means SSE3 and later, which raise #UD
            trace!("            esc2 {:#04x}, #UD", block[*idx]);
            self.force_ud(block, idx);
            return true;
        }

        if *idx >= block.len() {
            return true; // the escape was the last byte of the block
        }

        trace!("            opcode {:#04x}", block[*idx]);
        let b = block[*idx];
        self.push_byte(b, idx);
        self.part.meta.op_mode = self.part.len - self.part.off_opcode - 1;
        false
    }

    fn step_modrm(&mut self, block: &[u8], idx: &mut usize) -> bool {
        trace!("          PD state MODRM");
        let opcode = self.part.opcode();
        let op_mode = self.part.meta.op_mode;

        if self.part.off_modrm == 0 && *idx < block.len() && use_modrm(opcode, op_mode) {
            trace!("            modR/M {:#04x}", block[*idx]);
            let b = block[*idx];
            self.part.off_modrm = self.part.len;
            self.push_byte(b, idx);

            // at least one memory operand routes to the complex decoder
            if modrm::mode(b) != 0b11 {
                self.part.meta.decoder = DecoderClass::Complex;
            }
        }

        if self.part.off_sib == 0
            && self.part.off_modrm != 0
            && *idx < block.len()
            && use_sib(self.part.modrm())
        {
            trace!("            SIB {:#04x}", block[*idx]);
            let b = block[*idx];
            self.part.off_sib = self.part.len;
            self.push_byte(b, idx);
        }

        if self.part.off_modrm != 0 {
            if self.remaining == 0 {
                self.remaining = displ_size(self.part.modrm(), self.part.sib());
            }
            if self.remaining != 0 && *idx < block.len() {
                trace!("            displacement used");
                let count = (self.remaining as usize).min(block.len() - *idx);
                if self.part.off_displ == 0 {
                    self.part.off_displ = self.part.len;
                }
                for _ in 0..count {
                    let b = block[*idx];
                    self.push_byte(b, idx);
                }
                self.remaining -= count as u8;
            }
        }

        // carried when modrm, sib, or displacement bytes are still owed
        self.remaining != 0
            || (self.part.off_modrm == 0 && use_modrm(opcode, op_mode))
            || (self.part.off_sib == 0
                && self.part.off_modrm != 0
                && use_sib(self.part.modrm()))
    }

    fn step_imm(&mut self, block: &[u8], idx: &mut usize) -> bool {
        trace!("          PD state IMM");
        let rex_w = self.part.meta.has_rex && self.part.rex() & rex::W != 0;
        let has_66_67 = self.part.meta.has_66 || self.part.meta.has_67;
        let opsz = if rex_w {
            8
        } else if has_66_67 {
            2
        } else {
            4
        };

        if self.remaining == 0 {
            self.remaining = imm_size(
                self.part.opcode(),
                opsz,
                self.part.meta.op_mode,
                modrm::reg(self.part.modrm()),
            );
        }
        if self.remaining != 0 {
            if *idx >= block.len() {
                return true; // the immediate continues in the next block
            }
            trace!("            immediate used");
            let count = (self.remaining as usize).min(block.len() - *idx);
            if self.part.off_imm == 0 {
                self.part.off_imm = self.part.len;
            }
            for _ in 0..count {
                let b = block[*idx];
                self.push_byte(b, idx);
            }
            self.remaining -= count as u8;
        }

        if self.remaining == 0 {
            debug!("IFPD:     instruction decoded, state reset");
            self.state = PdState::Reset;
        } else {
            debug!("          {} bytes left", self.remaining);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(pd: &mut Predecoder, block: &[u8]) -> Vec<X64Op> {
        let mut out = Vec::new();
        let mut idx = 0;
        while idx < block.len() {
            if pd.parse(block, &mut idx) {
                out.push(std::mem::take(&mut pd.part));
                pd.state = PdState::Reset;
            }
        }
        out
    }

    #[test]
    fn test_single_byte_instruction() {
        let mut pd = Predecoder::default();
        pd.reset();
        let ops = parse_all(&mut pd, &[0xf4]); // hlt
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].len, 1);
        assert_eq!(ops[0].opcode(), 0xf4);
    }

    #[test]
    fn test_rex_imm_instruction() {
        let mut pd = Predecoder::default();
        pd.reset();
        // mov rax, 5: REX.W C7 /0 id
        let ops = parse_all(&mut pd, &[0x48, 0xc7, 0xc0, 0x05, 0x00, 0x00, 0x00]);
        assert_eq!(ops.len(), 1);
        let op = &ops[0];
        assert_eq!(op.len, 7);
        assert!(op.meta.has_rex);
        assert_eq!(op.meta.off_rex, 0);
        assert_eq!(op.off_opcode, 1);
        assert_eq!(op.off_modrm, 2);
        assert_eq!(op.off_imm, 3);
        assert_eq!(op.opcode(), 0xc7);
    }

    #[test]
    fn test_two_instructions_in_one_window() {
        let mut pd = Predecoder::default();
        pd.reset();
        // add rax, 3; hlt
        let ops = parse_all(&mut pd, &[0x48, 0x83, 0xc0, 0x03, 0xf4]);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].opcode(), 0x83);
        assert_eq!(ops[0].len, 4);
        assert_eq!(ops[1].opcode(), 0xf4);
    }

    #[test]
    fn test_instruction_spanning_windows() {
        let mut pd = Predecoder::default();
        pd.reset();
        // mov rax, imm64 split across two windows
        let full: Vec<u8> = vec![0x48, 0xb8, 1, 2, 3, 4, 5, 6, 7, 8];
        let (a, b) = full.split_at(4);

        let mut idx = 0;
        assert!(!pd.parse(a, &mut idx)); // carries into the next window
        assert_eq!(pd.part.len, 4);

        let mut idx = 0;
        assert!(pd.parse(b, &mut idx));
        assert_eq!(pd.part.len, 10);
        assert_eq!(pd.part.bytes, full);
        assert_eq!(pd.part.off_imm, 2);
    }

    #[test]
    fn test_modrm_sib_displacement() {
        let mut pd = Predecoder::default();
        pd.reset();
        // mov [rsp-8], rax: 48 89 44 24 f8
        let ops = parse_all(&mut pd, &[0x48, 0x89, 0x44, 0x24, 0xf8]);
        assert_eq!(ops.len(), 1);
        let op = &ops[0];
        assert_eq!(op.off_modrm, 2);
        assert_eq!(op.off_sib, 3);
        assert_eq!(op.off_displ, 4);
        assert_eq!(op.meta.decoder, DecoderClass::Complex);
    }

    #[test]
    fn test_rip_relative_disp32() {
        let mut pd = Predecoder::default();
        pd.reset();
        // mov rax, [rip+0x10]
        let ops = parse_all(&mut pd, &[0x48, 0x8b, 0x05, 0x10, 0x00, 0x00, 0x00]);
        assert_eq!(ops.len(), 1);
        let op = &ops[0];
        assert_eq!(op.off_modrm, 2);
        assert_eq!(op.off_sib, 0);
        assert_eq!(op.off_displ, 3);
        assert_eq!(op.len, 7);
    }

    #[test]
    fn test_vex_forces_shutdown() {
        let mut pd = Predecoder::default();
        pd.reset();
        let mut idx = 0;
        let done = pd.parse(&[0xc5, 0xf8, 0x10], &mut idx);
        assert!(done);
        assert!(pd.ud_shutdown);
        assert_eq!(pd.part.len, 0); // zero length decodes to #UD
    }

    #[test]
    fn test_esc2_forces_shutdown() {
        let mut pd = Predecoder::default();
        pd.reset();
        let mut idx = 0;
        let done = pd.parse(&[0x0f, 0x38, 0x00], &mut idx);
        assert!(done);
        assert!(pd.ud_shutdown);
    }

    #[test]
    fn test_jcc_short() {
        let mut pd = Predecoder::default();
        pd.reset();
        let ops = parse_all(&mut pd, &[0x75, 0xfb]); // jnz -5
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].len, 2);
        assert_eq!(ops[0].off_imm, 1);
    }
}
