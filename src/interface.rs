//! Network interface lookup.

use std::net::{IpAddr, Ipv4Addr};

use pnet::datalink::{self, NetworkInterface};

use crate::error::ConfigError;

/// First IPv4 address bound to the named interface.
///
/// Every listener binds to this address and proxy DHCP advertises it as
/// the boot server.
pub fn resolve_ipv4(name: &str) -> Result<Ipv4Addr, ConfigError> {
    let interface = datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .ok_or_else(|| ConfigError::InterfaceNotFound(name.to_string()))?;

    first_ipv4(&interface).ok_or_else(|| ConfigError::NoIpv4Address(name.to_string()))
}

fn first_ipv4(interface: &NetworkInterface) -> Option<Ipv4Addr> {
    interface.ips.iter().find_map(|network| match network.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(_) => None,
    })
}

/// Names of all interfaces, for error hints.
pub fn interface_names() -> Vec<String> {
    datalink::interfaces()
        .into_iter()
        .map(|iface| iface.name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_interface() {
        let result = resolve_ipv4("bootme-does-not-exist0");
        assert!(matches!(result, Err(ConfigError::InterfaceNotFound(name)) if name == "bootme-does-not-exist0"));
    }

    #[test]
    fn test_loopback_resolves_when_present() {
        let has_lo = datalink::interfaces()
            .iter()
            .any(|iface| iface.name == "lo" && first_ipv4(iface).is_some());
        if !has_lo {
            return;
        }
        assert_eq!(resolve_ipv4("lo").unwrap(), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_interface_names_lists_known_interfaces() {
        let names = interface_names();
        for name in &names {
            assert!(!name.is_empty());
        }
    }
}
