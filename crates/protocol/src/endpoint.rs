//! Endpoint descriptor model
//!
//! The session core never parses USB descriptors itself; the discovery
//! collaborator hands it a sequence of [`EndpointInfo`] values in descriptor
//! order. Only the fields the core needs are modeled: direction, transfer
//! type, address, max packet size, and polling interval.

use serde::{Deserialize, Serialize};

/// Direction bit mask in an endpoint address byte.
const ENDPOINT_DIR_MASK: u8 = 0x80;
/// Transfer-type mask in the bmAttributes byte.
const ENDPOINT_XFER_MASK: u8 = 0x3;

/// Endpoint direction, from the host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

impl Direction {
    /// Decode the direction bit of a raw endpoint address.
    pub fn from_address(address: u8) -> Self {
        if address & ENDPOINT_DIR_MASK != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
        }
    }
}

/// USB transfer type of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl TransferKind {
    /// Decode the transfer-type bits of a raw bmAttributes byte.
    pub fn from_attributes(attributes: u8) -> Self {
        match attributes & ENDPOINT_XFER_MASK {
            0 => TransferKind::Control,
            1 => TransferKind::Isochronous,
            2 => TransferKind::Bulk,
            _ => TransferKind::Interrupt,
        }
    }
}

/// One declared endpoint, as reported by enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// Raw endpoint address, direction bit included (e.g. `0x81`).
    pub address: u8,
    pub direction: Direction,
    pub transfer_kind: TransferKind,
    /// wMaxPacketSize, host byte order.
    pub max_packet_size: u16,
    /// bInterval polling interval, in frames.
    pub interval: u8,
}

impl EndpointInfo {
    /// Build an `EndpointInfo` from the raw descriptor bytes.
    pub fn from_raw(address: u8, attributes: u8, max_packet_size: u16, interval: u8) -> Self {
        EndpointInfo {
            address,
            direction: Direction::from_address(address),
            transfer_kind: TransferKind::from_attributes(attributes),
            max_packet_size,
            interval,
        }
    }

    /// True for an interrupt endpoint in the given direction.
    pub fn is_interrupt(&self, direction: Direction) -> bool {
        self.transfer_kind == TransferKind::Interrupt && self.direction == direction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_bit() {
        assert_eq!(Direction::from_address(0x81), Direction::In);
        assert_eq!(Direction::from_address(0x01), Direction::Out);
        assert_eq!(Direction::from_address(0x00), Direction::Out);
    }

    #[test]
    fn test_transfer_kind_bits() {
        assert_eq!(TransferKind::from_attributes(0x00), TransferKind::Control);
        assert_eq!(TransferKind::from_attributes(0x01), TransferKind::Isochronous);
        assert_eq!(TransferKind::from_attributes(0x02), TransferKind::Bulk);
        assert_eq!(TransferKind::from_attributes(0x03), TransferKind::Interrupt);
        // Upper bits (sync/usage for iso endpoints) must not leak into the kind.
        assert_eq!(TransferKind::from_attributes(0x0f), TransferKind::Interrupt);
    }

    #[test]
    fn test_from_raw() {
        let ep = EndpointInfo::from_raw(0x81, 0x03, 8, 10);
        assert!(ep.is_interrupt(Direction::In));
        assert!(!ep.is_interrupt(Direction::Out));
        assert_eq!(ep.max_packet_size, 8);
        assert_eq!(ep.interval, 10);

        let ep = EndpointInfo::from_raw(0x02, 0x03, 64, 1);
        assert!(ep.is_interrupt(Direction::Out));
    }
}
