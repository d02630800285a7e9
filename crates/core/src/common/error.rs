//! Exception and error definitions.
//!
//! Two tiers exist:
//! 1. **Architectural exceptions**: carried through the pipeline as a packed
//!    32-bit word (error code in the high 16 bits, exception number in the low
//!    16) and raised at commit.
//! 2. **Implementation failures**: `MemError`, returned by the memory manager;
//!    at commit these convert to synthetic `int` reinsertions, elsewhere they
//!    halt the simulation.

use thiserror::Error;

/// Core exception numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Exception {
    /// No exception.
    None = 0x00,
    /// Undefined opcode.
    Ud = 0x01,
    /// Unspecified protection violation.
    Gp = 0x02,
    /// Page fault.
    Pf = 0x03,
    /// Invalid register reference.
    Reg = 0x04,
    /// Alignment violation.
    Av = 0x05,
    /// Invalid uop control.
    Ctrl = 0x06,
    /// Breakpoint.
    Bp = 0x07,
    /// Halt.
    Halt = 0x08,
    /// Divide error.
    De = 0x09,
    /// Unspecified.
    Unspec = 0x0a,
}

impl Exception {
    /// Readable exception name.
    pub fn name(self) -> &'static str {
        match self {
            Exception::None => "none",
            Exception::Ud => "undefined opcode",
            Exception::Gp => "general protection violation",
            Exception::Pf => "page fault",
            Exception::Reg => "invalid register reference",
            Exception::Av => "alignment violation",
            Exception::Ctrl => "invalid control",
            Exception::Bp => "breakpoint",
            Exception::Halt => "halt",
            Exception::De => "divide error",
            Exception::Unspec => "unspecified",
        }
    }

    /// Maps an exception number back to its variant; unknown numbers are
    /// reported as `Unspec`.
    pub fn from_num(num: u16) -> Self {
        match num {
            0x00 => Exception::None,
            0x01 => Exception::Ud,
            0x02 => Exception::Gp,
            0x03 => Exception::Pf,
            0x04 => Exception::Reg,
            0x05 => Exception::Av,
            0x06 => Exception::Ctrl,
            0x07 => Exception::Bp,
            0x08 => Exception::Halt,
            0x09 => Exception::De,
            _ => Exception::Unspec,
        }
    }
}

/// Page-fault error-code bits (high half of the exception word).
pub mod pf_bits {
    /// Fault on a present page (protection, not absence).
    pub const PRESENT: u16 = 0x01;
    /// Faulting access was a write.
    pub const WRITE: u16 = 0x02;
    /// Faulting access came from user ring.
    pub const USER: u16 = 0x04;
    /// Reserved bit set in a paging structure.
    pub const RESERVED: u16 = 0x08;
    /// Faulting access was an instruction fetch.
    pub const IFETCH: u16 = 0x10;
}

/// Packs an exception number and error code into the 32-bit exception word.
#[inline]
pub const fn pack_except(ex: Exception, code: u16) -> u32 {
    ((code as u32) << 16) | ex as u32
}

/// Exception number from a packed exception word.
#[inline]
pub const fn except_num(word: u32) -> u16 {
    (word & 0xffff) as u16
}

/// Error code from a packed exception word.
#[inline]
pub const fn except_code(word: u32) -> u16 {
    (word >> 16) as u16
}

/// Memory-manager failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemError {
    /// Memory allocation failed.
    #[error("memory allocation failed")]
    AllocationFailed,
    /// A page or frame start address is not page-aligned or out of range.
    #[error("page start address not valid")]
    InvalidPageAddr,
    /// The address falls outside the bytes backing its frame.
    #[error("address not valid")]
    InvalidAddr,
    /// No frame is mapped at the physical address.
    #[error("memory location does not exist")]
    InvalidLocation,
    /// No page table entry covers the virtual address.
    #[error("page is not mapped")]
    PageNotMapped,
    /// The page or frame address is already mapped.
    #[error("address already mapped")]
    AlreadyMapped,
    /// The page table entry is marked not present.
    #[error("data not present in memory")]
    NotPresent,
    /// The access ring exceeds the page's protection level.
    #[error("page access protection violated")]
    ProtectionViolation,
    /// The access kind is not permitted by the rwx mask.
    #[error("access permissions do not match")]
    AccessViolation,
    /// A required alignment was violated.
    #[error("required address alignment violated")]
    AlignmentViolation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_roundtrip() {
        let w = pack_except(Exception::Pf, pf_bits::PRESENT | pf_bits::IFETCH);
        assert_eq!(except_num(w), Exception::Pf as u16);
        assert_eq!(except_code(w), 0x11);
        assert_eq!(Exception::from_num(except_num(w)), Exception::Pf);
    }

    #[test]
    fn test_unknown_number_is_unspec() {
        assert_eq!(Exception::from_num(0x80), Exception::Unspec);
        assert_eq!(Exception::from_num(0x0b), Exception::Unspec);
    }

    #[test]
    fn test_none_is_zero_word() {
        assert_eq!(pack_except(Exception::None, 0), 0);
    }
}
