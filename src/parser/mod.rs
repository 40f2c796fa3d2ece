//! DHCP wire format.
//!
//! `DhcpParser` turns raw bytes into domain DHCP types and `OfferEncoder`
//! turns a `BootOffer` back into a reply datagram.

mod dhcp_parser;
mod offer_encoder;

pub use dhcp_parser::DhcpParser;
pub use offer_encoder::OfferEncoder;

/// DHCP option codes used by the proxy.
pub(crate) mod option_codes {
    pub const PAD: u8 = 0;
    pub const VENDOR_SPECIFIC: u8 = 43;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const CLASS_ID: u8 = 60;
    pub const TFTP_SERVER_NAME: u8 = 66;
    pub const BOOTFILE_NAME: u8 = 67;
    pub const USER_CLASS: u8 = 77;
    pub const CLIENT_ARCH: u8 = 93;
    pub const CLIENT_MACHINE_ID: u8 = 97;
    pub const END: u8 = 255;
}
