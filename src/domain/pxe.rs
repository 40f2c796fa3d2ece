//! PXE-specific domain models.

use std::fmt;
use std::str::FromStr;

use macaddr::MacAddr6;

use crate::error::ConfigError;

/// PXE client system architecture types (RFC 4578 and the IANA
/// "Processor Architecture Types" registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PxeClientArch {
    IntelX86Pc,
    NecPc98,
    EfiItanium,
    EfiIa32,
    EfiBc,
    EfiXscale,
    EfiX86_64,
    EfiArm32,
    EfiArm64,
    EfiX86_64Http,
    EfiArm64Http,
    Unknown(u16),
}

impl PxeClientArch {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::IntelX86Pc,
            1 => Self::NecPc98,
            2 => Self::EfiItanium,
            6 => Self::EfiIa32,
            7 => Self::EfiBc,
            8 => Self::EfiXscale,
            9 => Self::EfiX86_64,
            10 => Self::EfiArm32,
            11 => Self::EfiArm64,
            16 => Self::EfiX86_64Http,
            19 => Self::EfiArm64Http,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for PxeClientArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntelX86Pc => write!(f, "Intel x86PC"),
            Self::NecPc98 => write!(f, "NEC/PC98"),
            Self::EfiItanium => write!(f, "EFI Itanium"),
            Self::EfiIa32 => write!(f, "EFI IA32"),
            Self::EfiBc => write!(f, "EFI BC"),
            Self::EfiXscale => write!(f, "EFI Xscale"),
            Self::EfiX86_64 => write!(f, "EFI x86-64"),
            Self::EfiArm32 => write!(f, "EFI ARM32"),
            Self::EfiArm64 => write!(f, "EFI ARM64"),
            Self::EfiX86_64Http => write!(f, "EFI x86-64 HTTP"),
            Self::EfiArm64Http => write!(f, "EFI ARM64 HTTP"),
            Self::Unknown(code) => write!(f, "Unknown({code})"),
        }
    }
}

/// Organizationally unique identifier: the first three bytes of a MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oui([u8; 3]);

impl Oui {
    pub const fn new(a: u8, b: u8, c: u8) -> Self {
        Self([a, b, c])
    }

    pub fn of(mac: &MacAddr6) -> Self {
        let bytes = mac.as_bytes();
        Self([bytes[0], bytes[1], bytes[2]])
    }
}

impl fmt::Display for Oui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}:{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for Oui {
    type Err = ConfigError;

    /// Accepts `b8:27:eb`, `B8-27-EB` or `b827eb`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.trim().chars().filter(|c| *c != ':' && *c != '-').collect();
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::InvalidValue {
                key: "rpi_eeprom_ouis".to_string(),
                value: s.to_string(),
            });
        }

        let mut bytes = [0u8; 3];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| {
                ConfigError::InvalidValue {
                    key: "rpi_eeprom_ouis".to_string(),
                    value: s.to_string(),
                }
            })?;
        }
        Ok(Self(bytes))
    }
}

/// Raspberry Pi vendor prefixes. Maintained by hand and probably incomplete,
/// which is why the table can be replaced through configuration.
pub const RASPBERRY_PI_OUIS: &[Oui] = &[
    Oui::new(0x28, 0xcd, 0xc1),
    Oui::new(0x2c, 0xcf, 0x67),
    Oui::new(0xb8, 0x27, 0xeb),
    Oui::new(0xd8, 0x3a, 0xdd),
    Oui::new(0xdc, 0xa6, 0x32),
    Oui::new(0xe4, 0x5f, 0x01),
];

/// Allow-list of vendor prefixes whose boot EEPROM reports `IntelX86Pc`
/// even though the device is ARM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EepromOuiTable {
    ouis: Vec<Oui>,
}

impl EepromOuiTable {
    pub fn new(ouis: Vec<Oui>) -> Self {
        Self { ouis }
    }

    /// Parse a comma separated list of OUIs.
    pub fn parse_list(list: &str) -> Result<Self, ConfigError> {
        let ouis = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Oui::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ouis })
    }

    pub fn contains(&self, mac: &MacAddr6) -> bool {
        let oui = Oui::of(mac);
        self.ouis.contains(&oui)
    }

    pub fn len(&self) -> usize {
        self.ouis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ouis.is_empty()
    }
}

impl Default for EepromOuiTable {
    fn default() -> Self {
        Self::new(RASPBERRY_PI_OUIS.to_vec())
    }
}
