//! Proxy DHCP boot offer.

use std::net::Ipv4Addr;

/// Class identifier sent when the client did not supply one.
pub const DEFAULT_CLASS_IDENTIFIER: &[u8] = b"PXEClient";

/// Where the client should go next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootTarget {
    /// Client carries the chain-load marker: hand back the iPXE script URL.
    ChainloadUrl(String),
    /// UEFI HTTP boot client: fixed HTTP boot filename.
    HttpBoot(String),
    /// Everyone else fetches a binary from our TFTP server.
    Tftp {
        server_name: String,
        boot_file: String,
    },
}

impl BootTarget {
    /// Value for option 67 and the BOOTP `file` field.
    pub fn boot_filename(&self) -> &str {
        match self {
            Self::ChainloadUrl(url) => url,
            Self::HttpBoot(filename) => filename,
            Self::Tftp { boot_file, .. } => boot_file,
        }
    }

    /// Value for option 66, only set for TFTP targets.
    pub fn tftp_server_name(&self) -> Option<&str> {
        match self {
            Self::Tftp { server_name, .. } => Some(server_name),
            _ => None,
        }
    }
}

/// Everything needed to encode a proxy DHCP offer for one discover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootOffer {
    pub server_ip: Ipv4Addr,
    /// Option 97 copied from the request.
    pub client_machine_id: Vec<u8>,
    /// Option 60 copied from the request, or `PXEClient`.
    pub class_identifier: Vec<u8>,
    pub target: BootTarget,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tftp_target() {
        let target = BootTarget::Tftp {
            server_name: "192.168.1.10".to_string(),
            boot_file: "arm64.efi".to_string(),
        };
        assert_eq!(target.boot_filename(), "arm64.efi");
        assert_eq!(target.tftp_server_name(), Some("192.168.1.10"));
    }

    #[test]
    fn test_url_targets_have_no_tftp_server() {
        let chain = BootTarget::ChainloadUrl("http://10.0.0.1:8080/boot.ipxe".to_string());
        assert_eq!(chain.boot_filename(), "http://10.0.0.1:8080/boot.ipxe");
        assert_eq!(chain.tftp_server_name(), None);

        let http = BootTarget::HttpBoot("http://10.0.0.1/arm64.efi".to_string());
        assert_eq!(http.tftp_server_name(), None);
    }
}
