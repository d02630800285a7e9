//! Reservation station: issue ports and their functional units.
//!
//! Eight ports, each hosting a small ordered list of typed functional units.
//! A port enforces a post-issue lockout of at least one cycle; a unit counts
//! down its busy cycles and executes its bound uop on the last one.

use crate::uops::FuKind;

/// Stable reference to a reorder buffer entry.
///
/// Tags increase monotonically with allocation order, so they survive head
/// pops and compare by age; a flush invalidates all outstanding tags at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct RobTag(pub u64);

/// One functional unit at a port.
#[derive(Debug, Clone)]
pub struct Fu {
    /// Unit kind.
    pub kind: FuKind,
    /// Remaining busy cycles; the uop executes when this reaches one.
    pub busy: u8,
    /// Cycle at which execution starts.
    pub start_cycle: u64,
    /// Bound ROB entry, if any.
    pub tag: Option<RobTag>,
}

impl Fu {
    fn new(kind: FuKind) -> Self {
        Self {
            kind,
            busy: 0,
            start_cycle: 0,
            tag: None,
        }
    }

    /// True when no uop is bound.
    #[inline]
    pub fn idle(&self) -> bool {
        self.tag.is_none()
    }

    /// Drops any bound work.
    pub fn reset(&mut self) {
        self.busy = 0;
        self.start_cycle = 0;
        self.tag = None;
    }
}

/// One issue port.
#[derive(Debug, Clone)]
pub struct RsPort {
    /// Port number.
    pub id: u8,
    /// Remaining lockout cycles; the port cannot issue while nonzero.
    pub lockout: u16,
    /// Units hosted at this port.
    pub fus: Vec<Fu>,
}

impl RsPort {
    fn new(id: u8, kinds: &[FuKind]) -> Self {
        Self {
            id,
            lockout: 0,
            fus: kinds.iter().map(|&k| Fu::new(k)).collect(),
        }
    }
}

/// The reservation station with its fixed port topology.
#[derive(Debug, Clone)]
pub struct ReservationStation {
    /// The issue ports.
    pub ports: Vec<RsPort>,
}

impl Default for ReservationStation {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservationStation {
    /// Builds the fixed eight-port topology.
    pub fn new() -> Self {
        use FuKind::*;
        Self {
            ports: vec![
                RsPort::new(0, &[Alu, Div, Brch, Ctrl]),
                RsPort::new(1, &[Alu, Mul]),
                RsPort::new(2, &[Alu, Agu]),
                RsPort::new(3, &[Alu, Brch, Ctrl]),
                RsPort::new(4, &[Agu, Ld]),
                RsPort::new(5, &[Agu, Ld]),
                RsPort::new(6, &[St]),
                RsPort::new(7, &[Agu]),
            ],
        }
    }

    /// Ports selected by a port mask, in port order.
    pub fn masked_ports(&mut self, mask: u8) -> impl Iterator<Item = &mut RsPort> + '_ {
        self.ports
            .iter_mut()
            .filter(move |p| mask & (1 << p.id) != 0)
    }

    /// Clears all lockouts and unit bindings.
    pub fn reset(&mut self) {
        for port in &mut self.ports {
            port.lockout = 0;
            for fu in &mut port.fus {
                fu.reset();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uops::table::ports;

    #[test]
    fn test_topology() {
        let rs = ReservationStation::new();
        assert_eq!(rs.ports.len(), 8);
        assert_eq!(rs.ports[6].fus.len(), 1);
        assert_eq!(rs.ports[6].fus[0].kind, FuKind::St);
        assert_eq!(rs.ports[0].fus.len(), 4);
    }

    #[test]
    fn test_masked_ports() {
        let mut rs = ReservationStation::new();
        let ids: Vec<u8> = rs.masked_ports(ports::LD).map(|p| p.id).collect();
        assert_eq!(ids, vec![4, 5]);
        let ids: Vec<u8> = rs.masked_ports(ports::ST).map(|p| p.id).collect();
        assert_eq!(ids, vec![6]);
    }

    #[test]
    fn test_every_port_mask_reaches_its_kind() {
        let mut rs = ReservationStation::new();
        for (mask, kind) in [
            (ports::ALU, FuKind::Alu),
            (ports::AGU, FuKind::Agu),
            (ports::LD, FuKind::Ld),
            (ports::ST, FuKind::St),
            (ports::BRCH, FuKind::Brch),
            (ports::CTRL, FuKind::Ctrl),
        ] {
            assert!(
                rs.masked_ports(mask)
                    .any(|p| p.fus.iter().any(|f| f.kind == kind)),
                "no {kind:?} behind its mask"
            );
        }
    }

    #[test]
    fn test_reset_clears_state() {
        let mut rs = ReservationStation::new();
        rs.ports[0].lockout = 3;
        rs.ports[0].fus[0].busy = 2;
        rs.ports[0].fus[0].tag = Some(RobTag(7));
        rs.reset();
        assert_eq!(rs.ports[0].lockout, 0);
        assert!(rs.ports[0].fus[0].idle());
        assert_eq!(rs.ports[0].fus[0].busy, 0);
    }
}
