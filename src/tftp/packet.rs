//! TFTP packet codec (RFC 1350, options per RFC 2347/2348/2349).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::TftpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Rrq = 1,
    Wrq = 2,
    Data = 3,
    Ack = 4,
    Error = 5,
    Oack = 6,
}

impl TryFrom<u16> for Opcode {
    type Error = TftpError;

    fn try_from(value: u16) -> Result<Self, TftpError> {
        match value {
            1 => Ok(Opcode::Rrq),
            2 => Ok(Opcode::Wrq),
            3 => Ok(Opcode::Data),
            4 => Ok(Opcode::Ack),
            5 => Ok(Opcode::Error),
            6 => Ok(Opcode::Oack),
            other => Err(TftpError::InvalidPacket(format!("unknown opcode {other}"))),
        }
    }
}

/// TFTP error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    NotDefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTransferId = 5,
    FileAlreadyExists = 6,
    NoSuchUser = 7,
    OptionNegotiationFailed = 8,
}

impl ErrorCode {
    fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::FileNotFound,
            2 => Self::AccessViolation,
            3 => Self::DiskFull,
            4 => Self::IllegalOperation,
            5 => Self::UnknownTransferId,
            6 => Self::FileAlreadyExists,
            7 => Self::NoSuchUser,
            8 => Self::OptionNegotiationFailed,
            _ => Self::NotDefined,
        }
    }
}

/// Negotiable transfer options. Unknown options are dropped on parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TftpOptions {
    pub blksize: Option<u16>,
    pub tsize: Option<u64>,
    pub timeout: Option<u8>,
}

impl TftpOptions {
    pub fn is_empty(&self) -> bool {
        self.blksize.is_none() && self.tsize.is_none() && self.timeout.is_none()
    }

    fn parse<'a>(mut parts: impl Iterator<Item = &'a [u8]>) -> Self {
        let mut options = Self::default();
        while let (Some(key), Some(value)) = (parts.next(), parts.next()) {
            if key.is_empty() {
                break;
            }
            let key = String::from_utf8_lossy(key).to_ascii_lowercase();
            let value = String::from_utf8_lossy(value);
            match key.as_str() {
                "blksize" => options.blksize = value.parse().ok(),
                "tsize" => options.tsize = value.parse().ok(),
                "timeout" => options.timeout = value.parse().ok(),
                _ => {}
            }
        }
        options
    }

    fn encode(&self, buf: &mut BytesMut) {
        let mut put = |key: &[u8], value: String| {
            buf.put_slice(key);
            buf.put_u8(0);
            buf.put_slice(value.as_bytes());
            buf.put_u8(0);
        };
        if let Some(blksize) = self.blksize {
            put(b"blksize", blksize.to_string());
        }
        if let Some(tsize) = self.tsize {
            put(b"tsize", tsize.to_string());
        }
        if let Some(timeout) = self.timeout {
            put(b"timeout", timeout.to_string());
        }
    }
}

/// A decoded TFTP packet. The transfer mode is accepted but ignored,
/// everything is served as octet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TftpPacket {
    ReadRequest {
        filename: String,
        mode: String,
        options: TftpOptions,
    },
    WriteRequest {
        filename: String,
        mode: String,
        options: TftpOptions,
    },
    Data {
        block: u16,
        data: Bytes,
    },
    Ack {
        block: u16,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Oack {
        options: TftpOptions,
    },
}

impl TftpPacket {
    pub fn parse(data: &[u8]) -> Result<Self, TftpError> {
        if data.len() < 2 {
            return Err(TftpError::InvalidPacket("packet too short".to_string()));
        }

        let mut buf = data;
        let opcode = Opcode::try_from(buf.get_u16())?;

        match opcode {
            Opcode::Rrq | Opcode::Wrq => {
                let mut parts = buf.split(|&b| b == 0);
                let filename = match parts.next() {
                    Some(name) if !name.is_empty() => String::from_utf8_lossy(name).into_owned(),
                    _ => return Err(TftpError::InvalidPacket("missing filename".to_string())),
                };
                let mode = match parts.next() {
                    Some(mode) if !mode.is_empty() => {
                        String::from_utf8_lossy(mode).to_ascii_lowercase()
                    }
                    _ => return Err(TftpError::InvalidPacket("missing mode".to_string())),
                };
                let options = TftpOptions::parse(parts);

                if opcode == Opcode::Rrq {
                    Ok(Self::ReadRequest {
                        filename,
                        mode,
                        options,
                    })
                } else {
                    Ok(Self::WriteRequest {
                        filename,
                        mode,
                        options,
                    })
                }
            }
            Opcode::Data => {
                if buf.len() < 2 {
                    return Err(TftpError::InvalidPacket("data packet too short".to_string()));
                }
                let block = buf.get_u16();
                Ok(Self::Data {
                    block,
                    data: Bytes::copy_from_slice(buf),
                })
            }
            Opcode::Ack => {
                if buf.len() < 2 {
                    return Err(TftpError::InvalidPacket("ack packet too short".to_string()));
                }
                Ok(Self::Ack {
                    block: buf.get_u16(),
                })
            }
            Opcode::Error => {
                if buf.len() < 2 {
                    return Err(TftpError::InvalidPacket("error packet too short".to_string()));
                }
                let code = ErrorCode::from_u16(buf.get_u16());
                let message = buf
                    .split(|&b| b == 0)
                    .next()
                    .map(|m| String::from_utf8_lossy(m).into_owned())
                    .unwrap_or_default();
                Ok(Self::Error { code, message })
            }
            Opcode::Oack => Ok(Self::Oack {
                options: TftpOptions::parse(buf.split(|&b| b == 0)),
            }),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Self::ReadRequest {
                filename,
                mode,
                options,
            }
            | Self::WriteRequest {
                filename,
                mode,
                options,
            } => {
                let opcode = if matches!(self, Self::ReadRequest { .. }) {
                    Opcode::Rrq
                } else {
                    Opcode::Wrq
                };
                buf.put_u16(opcode as u16);
                buf.put_slice(filename.as_bytes());
                buf.put_u8(0);
                buf.put_slice(mode.as_bytes());
                buf.put_u8(0);
                options.encode(&mut buf);
            }
            Self::Data { block, data } => {
                buf.put_u16(Opcode::Data as u16);
                buf.put_u16(*block);
                buf.put_slice(data);
            }
            Self::Ack { block } => {
                buf.put_u16(Opcode::Ack as u16);
                buf.put_u16(*block);
            }
            Self::Error { code, message } => {
                buf.put_u16(Opcode::Error as u16);
                buf.put_u16(*code as u16);
                buf.put_slice(message.as_bytes());
                buf.put_u8(0);
            }
            Self::Oack { options } => {
                buf.put_u16(Opcode::Oack as u16);
                options.encode(&mut buf);
            }
        }

        buf.freeze()
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn ack(block: u16) -> Self {
        Self::Ack { block }
    }
}
