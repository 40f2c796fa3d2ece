//! ProxyDHCP server module.
//!
//! Provides PXE boot information without interfering with the main DHCP
//! server's IP allocation. `handler` decides, `server` does the I/O.

mod handler;
mod server;

pub use handler::{BootFileNames, ProxyDhcpConfig, ProxyDhcpHandler, Rejection};
pub use server::{ProxyDhcpServer, DHCP_SERVER_PORT};

#[cfg(test)]
pub(crate) use handler::test_config;
