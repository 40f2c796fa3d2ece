use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors raised while decoding a DHCP datagram.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("invalid DHCP magic cookie")]
    InvalidMagicCookie,

    #[error("invalid option at offset {offset}: {message}")]
    InvalidOption { offset: usize, message: String },
}

/// Errors raised while loading configuration at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("missing required setting: {0}")]
    Missing(String),

    #[error("network interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("network interface {0} has no IPv4 address")]
    NoIpv4Address(String),
}

/// Errors raised by the proxy DHCP listener.
#[derive(Error, Debug)]
pub enum ProxyDhcpError {
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind socket to interface {interface}: {source}")]
    BindDevice {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the boot file set.
#[derive(Error, Debug)]
pub enum BootFileError {
    #[error("boot file not found: {0}")]
    NotFound(String),

    #[error("failed to load boot files from {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the TFTP listener and its transfers.
#[derive(Error, Debug)]
pub enum TftpError {
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TFTP packet: {0}")]
    InvalidPacket(String),

    #[error(transparent)]
    BootFile(#[from] BootFileError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer timeout for {filename}")]
    Timeout { filename: String },

    #[error("transfer aborted by client: {reason}")]
    Aborted { reason: String },
}

/// Failure to resolve a boot configuration from the upstream decision service.
///
/// Cloneable so every caller coalesced onto one fetch observes the same value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("unexpected status code {0}")]
    Status(u16),

    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    #[error("upstream fetch was abandoned")]
    Abandoned,
}

/// Errors surfaced by the HTTP boot configuration endpoint.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("boot configuration unavailable for {mac}: {source}")]
    Resolve {
        mac: String,
        #[source]
        source: ResolveError,
    },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // The firmware only needs to know it should fall back; no detail.
        let status = match &self {
            AppError::Resolve { .. } => StatusCode::NOT_FOUND,
        };

        tracing::debug!(status = status.as_u16(), error = %self, "Responding with error");
        status.into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
