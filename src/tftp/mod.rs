//! TFTP server module.
//!
//! Serves the read-only boot file set to PXE clients.

mod packet;
mod server;

pub use packet::{ErrorCode, TftpOptions, TftpPacket};
pub use server::{TftpServer, TFTP_PORT};
