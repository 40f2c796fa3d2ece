//! TFTP server implementation.
//!
//! Read-only: files come from a `BootFileStore`, writes are acknowledged
//! and thrown away. Each request runs in its own task on its own
//! ephemeral socket.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::packet::{ErrorCode, TftpOptions, TftpPacket};
use crate::bootfiles::BootFileStore;
use crate::error::TftpError;

/// TFTP server port.
pub const TFTP_PORT: u16 = 69;

/// Default block size (RFC 1350).
pub const DEFAULT_BLOCK_SIZE: u16 = 512;

/// Block size bounds (RFC 2348).
pub const MIN_BLOCK_SIZE: u16 = 8;
pub const MAX_BLOCK_SIZE: u16 = 65464;

/// Per-packet timeout when the client does not negotiate one.
pub const DEFAULT_TIMEOUT_SECS: u8 = 5;

/// Retransmissions of a single packet before the transfer is dropped.
pub const MAX_RETRIES: u32 = 5;

/// Room for the largest DATA packet plus header.
const RECV_BUFFER: usize = MAX_BLOCK_SIZE as usize + 4;

/// TFTP server
pub struct TftpServer {
    socket: UdpSocket,
    local_addr: SocketAddr,
    store: Arc<dyn BootFileStore>,
}

impl TftpServer {
    /// Bind the request socket.
    pub async fn bind(addr: SocketAddr, store: Arc<dyn BootFileStore>) -> Result<Self, TftpError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TftpError::BindFailed { addr, source })?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            store,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the shutdown signal flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), TftpError> {
        info!(addr = %self.local_addr, "TFTP server listening");

        let mut buf = vec![0u8; RECV_BUFFER];

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, client)) => {
                            let data = buf[..len].to_vec();
                            let store = Arc::clone(&self.store);
                            let bind_ip = self.local_addr.ip();

                            tokio::spawn(async move {
                                if let Err(e) = handle_request(&data, client, bind_ip, store).await {
                                    debug!(client = %client, error = %e, "TFTP request ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error receiving TFTP packet");
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

        info!("TFTP server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for TftpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TftpServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

/// Dispatch one packet received on the well-known port.
async fn handle_request(
    data: &[u8],
    client: SocketAddr,
    bind_ip: IpAddr,
    store: Arc<dyn BootFileStore>,
) -> Result<(), TftpError> {
    let packet = match TftpPacket::parse(data) {
        Ok(packet) => packet,
        Err(e) => {
            debug!(client = %client, error = %e, "Dropping malformed TFTP packet");
            return Ok(());
        }
    };

    let socket = UdpSocket::bind(SocketAddr::new(bind_ip, 0)).await?;

    match packet {
        TftpPacket::ReadRequest {
            filename, options, ..
        } => serve_read(&socket, client, &filename, &options, store.as_ref()).await,
        TftpPacket::WriteRequest { filename, .. } => {
            discard_write(&socket, client, &filename).await
        }
        other => {
            debug!(client = %client, packet = ?other, "Unexpected packet on request port");
            send_error(&socket, client, ErrorCode::IllegalOperation, "Illegal TFTP operation")
                .await
        }
    }
}

/// Negotiated parameters for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TransferParams {
    block_size: u16,
    timeout: Duration,
}

impl TransferParams {
    fn negotiate(requested: &TftpOptions) -> Self {
        let block_size = requested
            .blksize
            .map(|b| b.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE))
            .unwrap_or(DEFAULT_BLOCK_SIZE);
        let timeout_secs = requested
            .timeout
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self {
            block_size,
            timeout: Duration::from_secs(u64::from(timeout_secs)),
        }
    }

    /// Options echoed back in the OACK: only those the client asked for.
    fn oack(&self, requested: &TftpOptions, file_size: u64) -> TftpOptions {
        TftpOptions {
            blksize: requested.blksize.map(|_| self.block_size),
            tsize: requested.tsize.map(|_| file_size),
            timeout: requested.timeout.filter(|t| *t > 0),
        }
    }
}

/// Serve a read request in lockstep.
async fn serve_read(
    socket: &UdpSocket,
    client: SocketAddr,
    requested: &str,
    options: &TftpOptions,
    store: &dyn BootFileStore,
) -> Result<(), TftpError> {
    let transaction_id = Uuid::new_v4();
    info!(
        transaction_id = %transaction_id,
        client = %client,
        requested = %requested,
        "TFTP read request"
    );

    let (resolved, data) = match store.resolve(requested) {
        Ok(found) => found,
        Err(e) => {
            warn!(
                transaction_id = %transaction_id,
                client = %client,
                requested = %requested,
                error = %e,
                "Boot file not found"
            );
            send_error(socket, client, ErrorCode::FileNotFound, "File not found").await?;
            return Err(e.into());
        }
    };

    let params = TransferParams::negotiate(options);

    // Only options we actually accept are acknowledged; with none left the
    // transfer starts with DATA as in plain RFC 1350.
    let accepted = params.oack(options, data.len() as u64);
    if !accepted.is_empty() {
        let oack = TftpPacket::Oack { options: accepted };
        exchange(socket, client, oack.encode(), 0, params.timeout, &resolved).await?;
    }

    let block_size = params.block_size as usize;
    let mut block: u16 = 1;
    let mut offset = 0usize;

    loop {
        let end = (offset + block_size).min(data.len());
        let packet = TftpPacket::Data {
            block,
            data: data.slice(offset..end),
        };
        exchange(socket, client, packet.encode(), block, params.timeout, &resolved).await?;

        // A short (possibly empty) block ends the transfer.
        if end - offset < block_size {
            break;
        }
        offset = end;
        block = block.wrapping_add(1);
    }

    info!(
        transaction_id = %transaction_id,
        client = %client,
        requested = %requested,
        resolved = %resolved,
        bytes = data.len(),
        "TFTP transfer complete"
    );
    Ok(())
}

/// Send `packet` and wait for the ACK of `expected`, retransmitting on
/// timeout. Stale ACKs and strays from other ports are ignored.
async fn exchange(
    socket: &UdpSocket,
    client: SocketAddr,
    packet: Bytes,
    expected: u16,
    per_try: Duration,
    filename: &str,
) -> Result<(), TftpError> {
    let mut buf = [0u8; 516];

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            debug!(client = %client, block = expected, attempt, "Retransmitting");
        }
        socket.send_to(&packet, client).await?;

        let deadline = Instant::now() + per_try;
        while let Ok(received) = timeout_at(deadline, socket.recv_from(&mut buf)).await {
            let (len, from) = received?;
            if from != client {
                let _ = send_error(socket, from, ErrorCode::UnknownTransferId, "Unknown transfer ID")
                    .await;
                continue;
            }

            match TftpPacket::parse(&buf[..len]) {
                Ok(TftpPacket::Ack { block }) if block == expected => return Ok(()),
                Ok(TftpPacket::Error { code, message }) => {
                    return Err(TftpError::Aborted {
                        reason: format!("{code:?}: {message}"),
                    });
                }
                _ => continue,
            }
        }
    }

    Err(TftpError::Timeout {
        filename: filename.to_string(),
    })
}

/// Accept a write and store nothing.
async fn discard_write(socket: &UdpSocket, client: SocketAddr, filename: &str) -> Result<(), TftpError> {
    let transaction_id = Uuid::new_v4();
    info!(
        transaction_id = %transaction_id,
        client = %client,
        requested = %filename,
        "Discarding TFTP write request"
    );

    let per_try = Duration::from_secs(u64::from(DEFAULT_TIMEOUT_SECS));
    let mut buf = vec![0u8; RECV_BUFFER];
    let mut last_ack: u16 = 0;
    let mut discarded = 0usize;
    let mut retries = 0u32;

    socket.send_to(&TftpPacket::ack(0).encode(), client).await?;

    loop {
        let (len, from) = match tokio::time::timeout(per_try, socket.recv_from(&mut buf)).await {
            Ok(received) => received?,
            Err(_) => {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(TftpError::Timeout {
                        filename: filename.to_string(),
                    });
                }
                socket.send_to(&TftpPacket::ack(last_ack).encode(), client).await?;
                continue;
            }
        };
        if from != client {
            continue;
        }

        match TftpPacket::parse(&buf[..len]) {
            Ok(TftpPacket::Data { block, data }) if block == last_ack.wrapping_add(1) => {
                retries = 0;
                last_ack = block;
                discarded += data.len();
                socket.send_to(&TftpPacket::ack(block).encode(), client).await?;
                if data.len() < DEFAULT_BLOCK_SIZE as usize {
                    break;
                }
            }
            Ok(TftpPacket::Data { block, .. }) if block == last_ack => {
                // Our ACK got lost.
                socket.send_to(&TftpPacket::ack(block).encode(), client).await?;
            }
            Ok(TftpPacket::Error { code, message }) => {
                return Err(TftpError::Aborted {
                    reason: format!("{code:?}: {message}"),
                });
            }
            _ => {}
        }
    }

    info!(
        transaction_id = %transaction_id,
        client = %client,
        requested = %filename,
        bytes = discarded,
        "TFTP write discarded"
    );
    Ok(())
}

async fn send_error(
    socket: &UdpSocket,
    client: SocketAddr,
    code: ErrorCode,
    message: &str,
) -> Result<(), TftpError> {
    socket
        .send_to(&TftpPacket::error(code, message).encode(), client)
        .await?;
    Ok(())
}
