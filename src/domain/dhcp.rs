//! DHCP packet model.
//!
//! Only the BOOTP header fields and options that matter for PXE boot
//! decisions get their own types; wire encoding lives in `parser`.

use std::fmt;
use std::net::Ipv4Addr;

use macaddr::MacAddr6;

/// Option 53 values (RFC 2132 section 9.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl DhcpMessageType {
    const ALL: [Self; 8] = [
        Self::Discover,
        Self::Offer,
        Self::Request,
        Self::Decline,
        Self::Ack,
        Self::Nak,
        Self::Release,
        Self::Inform,
    ];

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_u8() == value)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for DhcpMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discover => "DHCPDISCOVER",
            Self::Offer => "DHCPOFFER",
            Self::Request => "DHCPREQUEST",
            Self::Decline => "DHCPDECLINE",
            Self::Ack => "DHCPACK",
            Self::Nak => "DHCPNAK",
            Self::Release => "DHCPRELEASE",
            Self::Inform => "DHCPINFORM",
        };
        f.write_str(name)
    }
}

/// Options the proxy reads or writes. Anything else is `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    /// 53
    MessageType(DhcpMessageType),
    /// 54
    ServerIdentifier(Ipv4Addr),
    /// 60, e.g. `PXEClient:Arch:00011:UNDI:003016`
    ClassIdentifier(Vec<u8>),
    /// 66
    TftpServerName(String),
    /// 67
    BootfileName(String),
    /// 77, compared byte for byte against the chain-load marker
    UserClass(Vec<u8>),
    /// 93, client system architectures in preference order
    ClientArch(Vec<u16>),
    /// 97, type byte followed by the machine UUID
    ClientMachineId(Vec<u8>),
    Unknown(u8, Vec<u8>),
}

/// A decoded BOOTP/DHCP message.
#[derive(Debug, Clone)]
pub struct DhcpPacket {
    /// 1 = BOOTREQUEST, 2 = BOOTREPLY
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    /// Bit 15 asks for a broadcast reply.
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    /// Next server; the TFTP host in our offers.
    pub siaddr: Ipv4Addr,
    /// Relay agent, copied into replies untouched.
    pub giaddr: Ipv4Addr,
    /// Full 16-byte chaddr; only the first `hlen` bytes are meaningful.
    pub chaddr: [u8; 16],
    pub sname: Option<String>,
    /// BOOTP `file` field.
    pub file: Option<String>,
    pub options: Vec<DhcpOption>,
}

impl DhcpPacket {
    const BOOTREQUEST: u8 = 1;
    const BOOTREPLY: u8 = 2;

    pub fn is_request(&self) -> bool {
        self.op == Self::BOOTREQUEST
    }

    pub fn is_reply(&self) -> bool {
        self.op == Self::BOOTREPLY
    }

    /// Ethernet address from the first six chaddr bytes.
    pub fn client_mac(&self) -> MacAddr6 {
        let [a, b, c, d, e, f, ..] = self.chaddr;
        MacAddr6::new(a, b, c, d, e, f)
    }

    /// First option `pick` accepts.
    fn find_option<'a, T>(&'a self, pick: impl Fn(&'a DhcpOption) -> Option<T>) -> Option<T> {
        self.options.iter().find_map(pick)
    }

    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.find_option(|opt| match opt {
            DhcpOption::MessageType(kind) => Some(*kind),
            _ => None,
        })
    }

    pub fn class_identifier(&self) -> Option<&[u8]> {
        self.find_option(|opt| match opt {
            DhcpOption::ClassIdentifier(class) => Some(class.as_slice()),
            _ => None,
        })
    }

    /// Option 93 as sent. Presence alone marks a PXE client, even when
    /// the list is empty.
    pub fn client_arch_list(&self) -> Option<&[u16]> {
        self.find_option(|opt| match opt {
            DhcpOption::ClientArch(archs) => Some(archs.as_slice()),
            _ => None,
        })
    }

    pub fn client_arch(&self) -> Option<u16> {
        self.client_arch_list()?.first().copied()
    }

    pub fn client_machine_id(&self) -> Option<&[u8]> {
        self.find_option(|opt| match opt {
            DhcpOption::ClientMachineId(guid) => Some(guid.as_slice()),
            _ => None,
        })
    }

    pub fn user_class(&self) -> Option<&[u8]> {
        self.find_option(|opt| match opt {
            DhcpOption::UserClass(class) => Some(class.as_slice()),
            _ => None,
        })
    }
}

/// BOOTREQUEST from aa:bb:cc:dd:ee:ff, xid 0x12345678, carrying `options`.
#[cfg(test)]
pub(crate) fn test_packet(options: Vec<DhcpOption>) -> DhcpPacket {
    let mut chaddr = [0u8; 16];
    chaddr[..6].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    DhcpPacket {
        op: 1,
        htype: 1,
        hlen: 6,
        hops: 0,
        xid: 0x12345678,
        secs: 0,
        flags: 0,
        ciaddr: Ipv4Addr::UNSPECIFIED,
        yiaddr: Ipv4Addr::UNSPECIFIED,
        siaddr: Ipv4Addr::UNSPECIFIED,
        giaddr: Ipv4Addr::UNSPECIFIED,
        chaddr,
        sname: None,
        file: None,
        options,
    }
}
