//! Proxy DHCP offer encoding.

use crate::domain::{BootOffer, DhcpMessageType, DhcpPacket};

use super::dhcp_parser::{DHCP_HEADER_SIZE, DHCP_MAGIC_COOKIE};
use super::option_codes;

/// BOOTP minimum datagram size; some PXE ROMs drop shorter replies.
const MIN_REPLY_SIZE: usize = 300;

/// Length of the BOOTP `file` field.
const FILE_FIELD_LEN: usize = 128;

/// PXE vendor sub-option 6 (discovery control) = 8: skip boot server
/// discovery and use the boot filename directly.
const PXE_DISCOVERY_CONTROL: [u8; 3] = [6, 1, 8];

/// Serializes a `BootOffer` as a DHCPOFFER answering a specific discover.
pub struct OfferEncoder;

impl OfferEncoder {
    /// Build the reply datagram for `request`.
    pub fn encode(request: &DhcpPacket, offer: &BootOffer) -> Vec<u8> {
        let mut reply = vec![0u8; DHCP_HEADER_SIZE];

        // Op: BOOTREPLY
        reply[0] = 2;
        reply[1] = request.htype;
        reply[2] = request.hlen;
        reply[3] = request.hops;
        reply[4..8].copy_from_slice(&request.xid.to_be_bytes());
        reply[10..12].copy_from_slice(&request.flags.to_be_bytes());

        // ciaddr and yiaddr stay zero, the proxy never assigns addresses.
        reply[20..24].copy_from_slice(&offer.server_ip.octets());
        reply[24..28].copy_from_slice(&request.giaddr.octets());
        reply[28..44].copy_from_slice(&request.chaddr);

        // The file field must stay NUL terminated; longer names (URLs)
        // only travel in option 67.
        let boot_filename = offer.target.boot_filename().as_bytes();
        if boot_filename.len() < FILE_FIELD_LEN {
            reply[108..108 + boot_filename.len()].copy_from_slice(boot_filename);
        }

        reply[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);

        push_option(
            &mut reply,
            option_codes::MESSAGE_TYPE,
            &[DhcpMessageType::Offer.as_u8()],
        );
        push_option(&mut reply, option_codes::SERVER_ID, &offer.server_ip.octets());
        push_option(&mut reply, option_codes::CLASS_ID, &offer.class_identifier);
        push_option(
            &mut reply,
            option_codes::CLIENT_MACHINE_ID,
            &offer.client_machine_id,
        );
        if let Some(server_name) = offer.target.tftp_server_name() {
            push_option(
                &mut reply,
                option_codes::TFTP_SERVER_NAME,
                server_name.as_bytes(),
            );
        }
        push_option(&mut reply, option_codes::BOOTFILE_NAME, boot_filename);
        push_option(
            &mut reply,
            option_codes::VENDOR_SPECIFIC,
            &PXE_DISCOVERY_CONTROL,
        );
        reply.push(option_codes::END);

        if reply.len() < MIN_REPLY_SIZE {
            reply.resize(MIN_REPLY_SIZE, 0);
        }

        reply
    }
}

/// Append one TLV option, truncating values that do not fit a length byte.
fn push_option(buf: &mut Vec<u8>, code: u8, value: &[u8]) {
    let len = value.len().min(u8::MAX as usize);
    buf.push(code);
    buf.push(len as u8);
    buf.extend_from_slice(&value[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{test_packet, BootTarget, DhcpOption, DEFAULT_CLASS_IDENTIFIER};
    use crate::parser::DhcpParser;
    use std::net::Ipv4Addr;

    fn offer(target: BootTarget) -> BootOffer {
        let mut guid = vec![0u8; 17];
        guid[1] = 0x42;
        BootOffer {
            server_ip: Ipv4Addr::new(192, 168, 1, 10),
            client_machine_id: guid,
            class_identifier: DEFAULT_CLASS_IDENTIFIER.to_vec(),
            target,
        }
    }

    #[test]
    fn test_tftp_offer_fields() {
        let request = test_packet(vec![DhcpOption::MessageType(DhcpMessageType::Discover)]);
        let bytes = OfferEncoder::encode(
            &request,
            &offer(BootTarget::Tftp {
                server_name: "192.168.1.10".to_string(),
                boot_file: "arm64.efi".to_string(),
            }),
        );

        assert!(bytes.len() >= MIN_REPLY_SIZE);

        let reply = DhcpParser::new().parse(&bytes).unwrap();
        assert!(reply.is_reply());
        assert_eq!(reply.xid, request.xid);
        assert_eq!(reply.chaddr, request.chaddr);
        assert_eq!(reply.siaddr, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(reply.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(reply.message_type(), Some(DhcpMessageType::Offer));
        assert_eq!(reply.file.as_deref(), Some("arm64.efi"));
        assert_eq!(reply.class_identifier(), Some(DEFAULT_CLASS_IDENTIFIER));
        assert_eq!(reply.client_machine_id().map(|g| g[1]), Some(0x42));
        assert!(reply
            .options
            .contains(&DhcpOption::TftpServerName("192.168.1.10".to_string())));
        assert!(reply
            .options
            .contains(&DhcpOption::BootfileName("arm64.efi".to_string())));
        assert!(reply.options.contains(&DhcpOption::ServerIdentifier(Ipv4Addr::new(
            192, 168, 1, 10
        ))));
        assert!(reply
            .options
            .contains(&DhcpOption::Unknown(43, PXE_DISCOVERY_CONTROL.to_vec())));
    }

    #[test]
    fn test_short_offer_is_padded_to_minimum() {
        let request = test_packet(vec![]);
        let bytes = OfferEncoder::encode(&request, &offer(BootTarget::HttpBoot("a.efi".into())));

        assert_eq!(bytes.len(), MIN_REPLY_SIZE);
        let end = bytes
            .iter()
            .rposition(|&b| b == option_codes::END)
            .unwrap();
        assert!(end < MIN_REPLY_SIZE - 1);
        assert!(bytes[end + 1..].iter().all(|&b| b == 0));

        let reply = DhcpParser::new().parse(&bytes).unwrap();
        assert!(reply
            .options
            .contains(&DhcpOption::BootfileName("a.efi".to_string())));
    }

    #[test]
    fn test_chainload_offer_has_no_tftp_server() {
        let request = test_packet(vec![DhcpOption::MessageType(DhcpMessageType::Discover)]);
        let url = "http://192.168.1.10:8080/boot.ipxe";
        let bytes = OfferEncoder::encode(&request, &offer(BootTarget::ChainloadUrl(url.into())));

        let reply = DhcpParser::new().parse(&bytes).unwrap();
        assert!(reply
            .options
            .contains(&DhcpOption::BootfileName(url.to_string())));
        assert!(!reply
            .options
            .iter()
            .any(|opt| matches!(opt, DhcpOption::TftpServerName(_))));
    }

    #[test]
    fn test_long_url_only_in_option() {
        let request = test_packet(vec![]);
        let url = format!("http://boot.example.com/{}", "a".repeat(200));
        let bytes = OfferEncoder::encode(&request, &offer(BootTarget::ChainloadUrl(url.clone())));

        let reply = DhcpParser::new().parse(&bytes).unwrap();
        assert_eq!(reply.file, None);
        assert!(reply.options.contains(&DhcpOption::BootfileName(url)));
    }
}
