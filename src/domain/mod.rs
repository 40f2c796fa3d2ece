//! Domain models for proxy DHCP boot decisions.
//!
//! This module contains the core domain types that are independent
//! of any socket or wire-format concerns.

mod dhcp;
mod offer;
mod pxe;

pub use dhcp::{DhcpMessageType, DhcpOption, DhcpPacket};
pub use offer::{BootOffer, BootTarget, DEFAULT_CLASS_IDENTIFIER};
pub use pxe::{EepromOuiTable, Oui, PxeClientArch, RASPBERRY_PI_OUIS};

#[cfg(test)]
pub(crate) use dhcp::test_packet;
