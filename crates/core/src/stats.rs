//! Simulation statistics collection and reporting.
//!
//! Tracks the event counters surfaced in the end-of-run summary: committed
//! micro and macro operations, pipeline flushes, branch predictor activity,
//! and the trapped exception, if any.

use crate::common::error::{except_code, except_num, Exception};

/// Event counters accumulated over a run.
#[derive(Debug, Clone, Default)]
pub struct SimStats {
    /// Committed micro-operations.
    pub committed_micro: u64,
    /// Committed macro instructions (bundles whose last uop retired).
    pub committed_macro: u64,
    /// Pipeline flushes.
    pub flushes: u64,
    /// Branch predictor updates.
    pub bp_updates: u64,
    /// Branch redirects taken at commit (mispredictions).
    pub bp_redirects: u64,
}

impl SimStats {
    /// Renders the end-of-run summary lines.
    pub fn report(&self, cycles: u64, exception: u32) -> String {
        let cyc = cycles.max(1) as f64;
        let mut out = String::new();
        out.push_str(&format!(
            "Committed uops: {}. IPC: {:.4}\n",
            self.committed_micro,
            self.committed_micro as f64 / cyc
        ));
        out.push_str(&format!(
            "Committed mops: {}. IPC: {:.4}\n",
            self.committed_macro,
            self.committed_macro as f64 / cyc
        ));
        out.push_str(&format!("Flushes:        {}\n", self.flushes));
        if exception != 0 {
            let num = except_num(exception);
            out.push_str(&format!(
                "Core exception: {} {}, EC {:#06x}\n",
                num,
                Exception::from_num(num).name(),
                except_code(exception)
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::pack_except;

    #[test]
    fn test_report_without_exception() {
        let stats = SimStats {
            committed_micro: 10,
            committed_macro: 4,
            flushes: 1,
            ..Default::default()
        };
        let r = stats.report(20, 0);
        assert!(r.contains("Committed uops: 10"));
        assert!(r.contains("0.5000"));
        assert!(!r.contains("Core exception"));
    }

    #[test]
    fn test_report_with_exception() {
        let stats = SimStats::default();
        let r = stats.report(1, pack_except(Exception::Ud, 0));
        assert!(r.contains("undefined opcode"));
    }
}
