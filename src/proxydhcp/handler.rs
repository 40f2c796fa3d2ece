//! Proxy DHCP decision logic.
//!
//! Decides, for one inbound packet, whether to answer and which boot
//! target to hand back. No sockets here.

use std::fmt;
use std::net::Ipv4Addr;

use tracing::info;

use crate::domain::{
    BootOffer, BootTarget, DhcpMessageType, DhcpPacket, EepromOuiTable, PxeClientArch,
    DEFAULT_CLASS_IDENTIFIER,
};

/// Required length of option 97: one type byte plus a 16-byte UUID.
const GUID_LEN: usize = 17;

/// Boot binaries served over TFTP, per client family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootFileNames {
    /// UEFI ARM64 PXE clients.
    pub efi_arm64: String,
    /// Raspberry Pi boot EEPROM (reports `IntelX86Pc`).
    pub rpi_eeprom: String,
}

/// Static inputs of the handler; read-only once the server starts.
#[derive(Debug, Clone)]
pub struct ProxyDhcpConfig {
    pub server_ip: Ipv4Addr,
    /// URL handed to clients that carry the chain-load marker.
    pub chainload_url: String,
    /// Boot filename for UEFI HTTP boot clients.
    pub http_boot_filename: String,
    /// Exact user class (option 77) identifying our own iPXE build.
    pub chainload_marker: Vec<u8>,
    pub boot_files: BootFileNames,
    pub eeprom_ouis: EepromOuiTable,
}

/// Why a packet was dropped without a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotDiscover(Option<DhcpMessageType>),
    NotPxe,
    InvalidGuidLength(usize),
    MalformedGuid,
    UnsupportedArch(PxeClientArch),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotDiscover(Some(kind)) => write!(f, "{kind} is not a DHCPDISCOVER"),
            Self::NotDiscover(None) => write!(f, "no message type option"),
            Self::NotPxe => write!(f, "not a PXE request (no client architecture option)"),
            Self::InvalidGuidLength(len) => write!(f, "invalid client machine id length {len}"),
            Self::MalformedGuid => write!(f, "client machine id type byte is not zero"),
            Self::UnsupportedArch(arch) => write!(f, "unsupported architecture {arch}"),
        }
    }
}

/// Chooses a boot target for PXE discovers.
#[derive(Debug, Clone)]
pub struct ProxyDhcpHandler {
    config: ProxyDhcpConfig,
}

/// Architectures that pass the eligibility gate.
enum Eligibility {
    Arm64,
    Arm64Http,
    RpiEeprom,
}

impl ProxyDhcpHandler {
    pub fn new(config: ProxyDhcpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProxyDhcpConfig {
        &self.config
    }

    /// Run the gates in order and build the offer, or explain the drop.
    ///
    /// Rejections are logged at info level here so every caller gets the
    /// same trail.
    pub fn handle(&self, packet: &DhcpPacket) -> Result<BootOffer, Rejection> {
        let result = self.evaluate(packet);
        if let Err(rejection) = &result {
            info!(
                mac = %packet.client_mac(),
                xid = format_args!("0x{:08x}", packet.xid),
                reason = %rejection,
                "Ignoring DHCP packet"
            );
        }
        result
    }

    fn evaluate(&self, packet: &DhcpPacket) -> Result<BootOffer, Rejection> {
        match packet.message_type() {
            Some(DhcpMessageType::Discover) => {}
            other => return Err(Rejection::NotDiscover(other)),
        }

        if packet.client_arch_list().is_none() {
            return Err(Rejection::NotPxe);
        }

        let guid = packet
            .client_machine_id()
            .ok_or(Rejection::InvalidGuidLength(0))?;
        if guid.len() != GUID_LEN {
            return Err(Rejection::InvalidGuidLength(guid.len()));
        }
        if guid[0] != 0 {
            return Err(Rejection::MalformedGuid);
        }

        // An empty list carries no architecture; treat it as code 0.
        let arch = PxeClientArch::from_u16(packet.client_arch().unwrap_or(0));
        let eligibility = self.classify(arch, packet)?;

        let class_identifier = packet
            .class_identifier()
            .unwrap_or(DEFAULT_CLASS_IDENTIFIER)
            .to_vec();

        Ok(BootOffer {
            server_ip: self.config.server_ip,
            client_machine_id: guid.to_vec(),
            class_identifier,
            target: self.select_target(eligibility, packet),
        })
    }

    fn classify(&self, arch: PxeClientArch, packet: &DhcpPacket) -> Result<Eligibility, Rejection> {
        match arch {
            PxeClientArch::EfiArm64 => Ok(Eligibility::Arm64),
            PxeClientArch::EfiArm64Http => Ok(Eligibility::Arm64Http),
            PxeClientArch::IntelX86Pc if self.config.eeprom_ouis.contains(&packet.client_mac()) => {
                Ok(Eligibility::RpiEeprom)
            }
            other => Err(Rejection::UnsupportedArch(other)),
        }
    }

    /// Marker beats HTTP boot beats TFTP.
    fn select_target(&self, eligibility: Eligibility, packet: &DhcpPacket) -> BootTarget {
        if packet.user_class() == Some(self.config.chainload_marker.as_slice()) {
            return BootTarget::ChainloadUrl(self.config.chainload_url.clone());
        }

        let boot_file = match eligibility {
            Eligibility::Arm64Http => {
                return BootTarget::HttpBoot(self.config.http_boot_filename.clone());
            }
            Eligibility::Arm64 => &self.config.boot_files.efi_arm64,
            Eligibility::RpiEeprom => &self.config.boot_files.rpi_eeprom,
        };

        BootTarget::Tftp {
            server_name: self.config.server_ip.to_string(),
            boot_file: boot_file.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> ProxyDhcpConfig {
    ProxyDhcpConfig {
        server_ip: Ipv4Addr::new(192, 168, 1, 10),
        chainload_url: "http://192.168.1.10:8080/boot.ipxe".to_string(),
        http_boot_filename: "http://192.168.1.10:8080/arm64.efi".to_string(),
        chainload_marker: b"gobootme".to_vec(),
        boot_files: BootFileNames {
            efi_arm64: "arm64.efi".to_string(),
            rpi_eeprom: "start4.elf".to_string(),
        },
        eeprom_ouis: EepromOuiTable::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{test_packet, DhcpOption};

    fn valid_guid() -> Vec<u8> {
        let mut guid = vec![0u8; GUID_LEN];
        guid[1..].copy_from_slice(&[0x11; 16]);
        guid
    }

    fn discover(arch: u16, extra: Vec<DhcpOption>) -> DhcpPacket {
        let mut options = vec![
            DhcpOption::MessageType(DhcpMessageType::Discover),
            DhcpOption::ClientArch(vec![arch]),
            DhcpOption::ClientMachineId(valid_guid()),
        ];
        options.extend(extra);
        test_packet(options)
    }

    fn handler() -> ProxyDhcpHandler {
        ProxyDhcpHandler::new(test_config())
    }

    mod gate_tests {
        use super::*;

        #[test]
        fn test_request_is_ignored() {
            let mut packet = discover(11, vec![]);
            packet.options[0] = DhcpOption::MessageType(DhcpMessageType::Request);
            assert_eq!(
                handler().handle(&packet),
                Err(Rejection::NotDiscover(Some(DhcpMessageType::Request)))
            );
        }

        #[test]
        fn test_missing_message_type_is_ignored() {
            let mut packet = discover(11, vec![]);
            packet.options.remove(0);
            assert_eq!(handler().handle(&packet), Err(Rejection::NotDiscover(None)));
        }

        #[test]
        fn test_missing_arch_option_is_not_pxe() {
            let packet = test_packet(vec![
                DhcpOption::MessageType(DhcpMessageType::Discover),
                DhcpOption::ClientMachineId(valid_guid()),
            ]);
            assert_eq!(handler().handle(&packet), Err(Rejection::NotPxe));
        }

        #[test]
        fn test_missing_guid() {
            let packet = test_packet(vec![
                DhcpOption::MessageType(DhcpMessageType::Discover),
                DhcpOption::ClientArch(vec![11]),
            ]);
            assert_eq!(handler().handle(&packet), Err(Rejection::InvalidGuidLength(0)));
        }

        #[test]
        fn test_guid_length_must_be_17() {
            for len in [0usize, 1, 16, 18, 32] {
                let mut packet = discover(11, vec![]);
                packet.options[2] = DhcpOption::ClientMachineId(vec![0u8; len]);
                assert_eq!(
                    handler().handle(&packet),
                    Err(Rejection::InvalidGuidLength(len)),
                    "length {len}"
                );
            }
        }

        #[test]
        fn test_guid_first_byte_must_be_zero() {
            let mut guid = valid_guid();
            guid[0] = 1;
            let mut packet = discover(11, vec![]);
            packet.options[2] = DhcpOption::ClientMachineId(guid);
            assert_eq!(handler().handle(&packet), Err(Rejection::MalformedGuid));
        }

        #[test]
        fn test_guid_checked_before_arch() {
            let mut packet = discover(9, vec![]);
            packet.options[2] = DhcpOption::ClientMachineId(vec![0u8; 4]);
            assert_eq!(handler().handle(&packet), Err(Rejection::InvalidGuidLength(4)));
        }

        #[test]
        fn test_unsupported_arches() {
            for code in [6u16, 7, 9, 10, 16, 42] {
                let packet = discover(code, vec![]);
                assert_eq!(
                    handler().handle(&packet),
                    Err(Rejection::UnsupportedArch(PxeClientArch::from_u16(code))),
                    "arch {code}"
                );
            }
        }

        #[test]
        fn test_x86_bios_without_eeprom_oui_is_rejected() {
            // test_packet uses aa:bb:cc:..., not a Raspberry Pi prefix.
            let packet = discover(0, vec![]);
            assert_eq!(
                handler().handle(&packet),
                Err(Rejection::UnsupportedArch(PxeClientArch::IntelX86Pc))
            );
        }

        #[test]
        fn test_unsupported_arch_even_with_marker() {
            let packet = discover(9, vec![DhcpOption::UserClass(b"gobootme".to_vec())]);
            assert!(handler().handle(&packet).is_err());
        }
    }

    mod target_tests {
        use super::*;

        #[test]
        fn test_marker_returns_chainload_url() {
            let packet = discover(11, vec![DhcpOption::UserClass(b"gobootme".to_vec())]);
            let offer = handler().handle(&packet).unwrap();
            assert_eq!(
                offer.target,
                BootTarget::ChainloadUrl("http://192.168.1.10:8080/boot.ipxe".to_string())
            );
            assert_eq!(offer.target.tftp_server_name(), None);
        }

        #[test]
        fn test_marker_wins_over_http_boot() {
            let packet = discover(19, vec![DhcpOption::UserClass(b"gobootme".to_vec())]);
            let offer = handler().handle(&packet).unwrap();
            assert!(matches!(offer.target, BootTarget::ChainloadUrl(_)));
        }

        #[test]
        fn test_marker_must_match_exactly() {
            let packet = discover(11, vec![DhcpOption::UserClass(b"gobootme2".to_vec())]);
            let offer = handler().handle(&packet).unwrap();
            assert!(matches!(offer.target, BootTarget::Tftp { .. }));
        }

        #[test]
        fn test_http_boot_arch_gets_http_filename() {
            let packet = discover(19, vec![]);
            let offer = handler().handle(&packet).unwrap();
            assert_eq!(
                offer.target,
                BootTarget::HttpBoot("http://192.168.1.10:8080/arm64.efi".to_string())
            );
        }

        #[test]
        fn test_efi_arm64_gets_tftp() {
            let packet = discover(11, vec![]);
            let offer = handler().handle(&packet).unwrap();
            assert_eq!(
                offer.target,
                BootTarget::Tftp {
                    server_name: "192.168.1.10".to_string(),
                    boot_file: "arm64.efi".to_string(),
                }
            );
            assert_eq!(offer.server_ip, Ipv4Addr::new(192, 168, 1, 10));
        }

        #[test]
        fn test_rpi_eeprom_exception() {
            let mut packet = discover(0, vec![]);
            packet.chaddr[..6].copy_from_slice(&[0xdc, 0xa6, 0x32, 0x01, 0x02, 0x03]);
            let offer = handler().handle(&packet).unwrap();
            assert_eq!(
                offer.target,
                BootTarget::Tftp {
                    server_name: "192.168.1.10".to_string(),
                    boot_file: "start4.elf".to_string(),
                }
            );
        }

        #[test]
        fn test_first_arch_entry_is_used() {
            let mut packet = discover(11, vec![]);
            packet.options[1] = DhcpOption::ClientArch(vec![11, 9]);
            assert!(handler().handle(&packet).is_ok());

            packet.options[1] = DhcpOption::ClientArch(vec![9, 11]);
            assert!(handler().handle(&packet).is_err());
        }
    }

    mod reply_field_tests {
        use super::*;

        #[test]
        fn test_guid_is_copied() {
            let packet = discover(11, vec![]);
            let offer = handler().handle(&packet).unwrap();
            assert_eq!(offer.client_machine_id, valid_guid());
        }

        #[test]
        fn test_class_identifier_defaults_to_pxeclient() {
            let packet = discover(11, vec![]);
            let offer = handler().handle(&packet).unwrap();
            assert_eq!(offer.class_identifier, b"PXEClient".to_vec());
        }

        #[test]
        fn test_class_identifier_is_copied() {
            let class = b"PXEClient:Arch:00011:UNDI:003016".to_vec();
            let packet = discover(11, vec![DhcpOption::ClassIdentifier(class.clone())]);
            let offer = handler().handle(&packet).unwrap();
            assert_eq!(offer.class_identifier, class);
        }
    }
}
