//! ProxyDHCP server implementation.
//!
//! Listens for PXE discovers and answers with boot information only.
//! Works alongside the existing DHCP server without providing IP addresses.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::handler::ProxyDhcpHandler;
use crate::error::ProxyDhcpError;
use crate::parser::{DhcpParser, OfferEncoder};

/// DHCP server port.
pub const DHCP_SERVER_PORT: u16 = 67;

/// Largest datagram we accept; DHCP over Ethernet never exceeds this.
const MAX_DATAGRAM: usize = 1500;

/// ProxyDHCP server for PXE boot.
pub struct ProxyDhcpServer {
    socket: Arc<UdpSocket>,
    handler: Arc<ProxyDhcpHandler>,
    local_addr: SocketAddr,
}

impl ProxyDhcpServer {
    /// Bind the listening socket.
    ///
    /// `interface` pins the socket to one device on Linux so broadcasts
    /// from other segments are not answered. Must be called from within a
    /// tokio runtime.
    pub fn bind(
        addr: SocketAddrV4,
        interface: Option<&str>,
        handler: ProxyDhcpHandler,
    ) -> Result<Self, ProxyDhcpError> {
        use socket2::{Domain, Protocol, Socket, Type};

        let bind_failed = |source| ProxyDhcpError::BindFailed {
            addr: addr.into(),
            source,
        };

        let socket =
            Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_failed)?;
        socket.set_reuse_address(true).map_err(bind_failed)?;
        socket.set_broadcast(true).map_err(bind_failed)?;

        #[cfg(target_os = "linux")]
        if let Some(name) = interface {
            socket
                .bind_device(Some(name.as_bytes()))
                .map_err(|source| ProxyDhcpError::BindDevice {
                    interface: name.to_string(),
                    source,
                })?;
        }
        #[cfg(not(target_os = "linux"))]
        let _ = interface;

        socket.bind(&addr.into()).map_err(bind_failed)?;
        socket.set_nonblocking(true).map_err(bind_failed)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket).map_err(bind_failed)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket: Arc::new(socket),
            handler: Arc::new(handler),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the shutdown signal flips to `true`.
    ///
    /// Every datagram is handled in its own task; the loop itself only
    /// receives.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ProxyDhcpError> {
        let config = self.handler.config();
        info!(
            addr = %self.local_addr,
            server_ip = %config.server_ip,
            chainload_url = %config.chainload_url,
            efi_arm64 = %config.boot_files.efi_arm64,
            rpi_eeprom = %config.boot_files.rpi_eeprom,
            "ProxyDHCP server listening"
        );

        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, peer)) => {
                            let socket = Arc::clone(&self.socket);
                            let handler = Arc::clone(&self.handler);
                            let data = buf[..len].to_vec();
                            tokio::spawn(async move {
                                handle_datagram(&socket, &handler, &data, peer).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error receiving DHCP packet");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("ProxyDHCP server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for ProxyDhcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyDhcpServer")
            .field("local_addr", &self.local_addr)
            .field("server_ip", &self.handler.config().server_ip)
            .finish_non_exhaustive()
    }
}

/// Parse, decide and reply to a single datagram.
async fn handle_datagram(
    socket: &UdpSocket,
    handler: &ProxyDhcpHandler,
    data: &[u8],
    peer: SocketAddr,
) {
    let packet = match DhcpParser::new().parse(data) {
        Ok(packet) => packet,
        Err(e) => {
            debug!(peer = %peer, error = %e, "Dropping unparseable DHCP packet");
            return;
        }
    };

    if !packet.is_request() {
        debug!(peer = %peer, "Dropping non-BOOTREQUEST packet");
        return;
    }

    let offer = match handler.handle(&packet) {
        Ok(offer) => offer,
        Err(_) => return,
    };

    let reply = OfferEncoder::encode(&packet, &offer);
    let dest = reply_destination(peer);

    match socket.send_to(&reply, dest).await {
        Ok(_) => {
            info!(
                mac = %packet.client_mac(),
                dest = %dest,
                tftp_server = offer.target.tftp_server_name().unwrap_or("-"),
                boot_filename = offer.target.boot_filename(),
                "Sent proxy DHCP offer"
            );
        }
        Err(e) => {
            error!(
                mac = %packet.client_mac(),
                dest = %dest,
                error = %e,
                "Failed to send proxy DHCP offer"
            );
        }
    }
}

/// Clients without an address yet send from 0.0.0.0; answer those by
/// broadcast on the port they used.
fn reply_destination(peer: SocketAddr) -> SocketAddr {
    match peer {
        SocketAddr::V4(v4) if v4.ip().is_unspecified() => {
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, v4.port()))
        }
        other => other,
    }
}
