//! bootme - network boot orchestrator.
//!
//! Three cooperating listeners bring bare-metal machines up over the
//! network:
//!
//! - a proxy DHCP responder that tells PXE firmware where to boot from
//!   without handing out addresses,
//! - a read-only TFTP server for the initial boot files,
//! - an HTTP endpoint that turns a per-machine decision from an upstream
//!   service into an iPXE script.

pub mod bootconfig;
pub mod bootfiles;
pub mod config;
pub mod domain;
pub mod error;
pub mod interface;
pub mod orchestrator;
pub mod parser;
pub mod proxydhcp;
pub mod routes;
pub mod tftp;

pub use error::{AppError, AppResult};
