//! DHCP wire format decoding (RFC 2131 / RFC 2132).

use std::net::Ipv4Addr;

use bytes::Buf;

use crate::domain::{DhcpMessageType, DhcpOption, DhcpPacket};
use crate::error::ParseError;

use super::option_codes;

/// Marks the start of the options area.
pub(crate) const DHCP_MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Fixed BOOTP header plus the magic cookie.
pub(crate) const DHCP_HEADER_SIZE: usize = 240;

const SNAME_LEN: usize = 64;
const FILE_LEN: usize = 128;

/// Decodes UDP payloads into [`DhcpPacket`]s.
///
/// Unknown options are preserved; options we model but cannot make sense
/// of (a bad message type, a short server id) are skipped rather than
/// failing the whole packet.
#[derive(Debug, Default, Clone, Copy)]
pub struct DhcpParser;

impl DhcpParser {
    pub fn new() -> Self {
        Self
    }

    /// `data` is the UDP payload, without IP or UDP headers.
    pub fn parse(&self, data: &[u8]) -> Result<DhcpPacket, ParseError> {
        if data.len() < DHCP_HEADER_SIZE {
            return Err(ParseError::PacketTooShort {
                expected: DHCP_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let (header, options) = data.split_at(DHCP_HEADER_SIZE);
        let mut buf = header;

        let op = buf.get_u8();
        let htype = buf.get_u8();
        let hlen = buf.get_u8();
        let hops = buf.get_u8();
        let xid = buf.get_u32();
        let secs = buf.get_u16();
        let flags = buf.get_u16();
        let ciaddr = Ipv4Addr::from(buf.get_u32());
        let yiaddr = Ipv4Addr::from(buf.get_u32());
        let siaddr = Ipv4Addr::from(buf.get_u32());
        let giaddr = Ipv4Addr::from(buf.get_u32());

        let mut chaddr = [0u8; 16];
        buf.copy_to_slice(&mut chaddr);

        let sname = c_string(&buf[..SNAME_LEN]);
        buf.advance(SNAME_LEN);
        let file = c_string(&buf[..FILE_LEN]);
        buf.advance(FILE_LEN);

        if buf[..] != DHCP_MAGIC_COOKIE {
            return Err(ParseError::InvalidMagicCookie);
        }

        Ok(DhcpPacket {
            op,
            htype,
            hlen,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
            options: parse_options(options)?,
        })
    }
}

/// NUL-terminated field; `None` when empty or not UTF-8.
fn c_string(field: &[u8]) -> Option<String> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    match &field[..end] {
        [] => None,
        text => std::str::from_utf8(text).ok().map(str::to_owned),
    }
}

/// Walk the code/length/value list up to END or the end of the buffer.
fn parse_options(data: &[u8]) -> Result<Vec<DhcpOption>, ParseError> {
    let mut options = Vec::new();
    let mut rest = data;

    loop {
        let offset = data.len() - rest.len();
        match rest {
            [] | [option_codes::END, ..] => break,
            [option_codes::PAD, tail @ ..] => rest = tail,
            [_] => {
                return Err(ParseError::InvalidOption {
                    offset,
                    message: "option length missing".to_string(),
                });
            }
            [code, len, tail @ ..] => {
                let len = *len as usize;
                if tail.len() < len {
                    return Err(ParseError::InvalidOption {
                        offset,
                        message: format!(
                            "option {code} truncated: expected {len} bytes, have {}",
                            tail.len()
                        ),
                    });
                }
                let (value, tail) = tail.split_at(len);
                options.extend(decode_option(*code, value));
                rest = tail;
            }
        }
    }

    Ok(options)
}

fn decode_option(code: u8, value: &[u8]) -> Option<DhcpOption> {
    let option = match code {
        option_codes::MESSAGE_TYPE => {
            DhcpOption::MessageType(DhcpMessageType::from_u8(*value.first()?)?)
        }
        option_codes::SERVER_ID => {
            let octets: [u8; 4] = value.get(..4)?.try_into().ok()?;
            DhcpOption::ServerIdentifier(Ipv4Addr::from(octets))
        }
        option_codes::CLASS_ID => DhcpOption::ClassIdentifier(value.to_vec()),
        option_codes::TFTP_SERVER_NAME => {
            DhcpOption::TftpServerName(String::from_utf8_lossy(value).into_owned())
        }
        option_codes::BOOTFILE_NAME => {
            DhcpOption::BootfileName(String::from_utf8_lossy(value).into_owned())
        }
        option_codes::USER_CLASS => DhcpOption::UserClass(value.to_vec()),
        // Pairs of big-endian u16; an odd trailing byte is dropped.
        option_codes::CLIENT_ARCH => DhcpOption::ClientArch(
            value
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect(),
        ),
        option_codes::CLIENT_MACHINE_ID => DhcpOption::ClientMachineId(value.to_vec()),
        _ => DhcpOption::Unknown(code, value.to_vec()),
    };
    Some(option)
}
