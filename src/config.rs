//! Startup configuration.
//!
//! Layered: built-in defaults, then an optional `key = value` file, then
//! environment variables, then command-line overrides. The result is
//! turned into a read-only `ServiceConfig` once the server IP is known.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::domain::EepromOuiTable;
use crate::error::ConfigError;
use crate::proxydhcp::{BootFileNames, ProxyDhcpConfig};
use crate::routes::BOOT_SCRIPT_PATH;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/bootme.conf";
const DEFAULT_INTERFACE: &str = "eth0";
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_HTTP_BOOT_FILENAME: &str = "arm64.efi";
const DEFAULT_CHAINLOAD_MARKER: &str = "gobootme";
const DEFAULT_BOOT_FILE_EFI_ARM64: &str = "arm64.efi";
const DEFAULT_BOOT_FILE_RPI_EEPROM: &str = "start4.elf";
const DEFAULT_BOOT_FILES_DIR: &str = "/usr/share/bootme/bootfiles";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Config file keys and the environment variables that override them.
const ENV_KEYS: &[(&str, &str)] = &[
    ("interface", "PROXY_DHCP_INTERFACE"),
    ("enable_proxy_dhcp", "ENABLE_PROXY_DHCP"),
    ("boot_endpoint_auto", "IPXE_BOOT_ENDPOINT_AUTO"),
    ("boot_endpoint", "IPXE_BOOT_ENDPOINT"),
    ("boot_decision_url", "BOOT_DECISION_URL"),
    ("http_port", "HTTP_PORT"),
    ("http_boot_filename", "HTTP_BOOT_FILENAME"),
    ("chainload_marker", "CHAINLOAD_MARKER"),
    ("boot_file_efi_arm64", "BOOT_FILE_EFI_ARM64"),
    ("boot_file_rpi_eeprom", "BOOT_FILE_RPI_EEPROM"),
    ("rpi_eeprom_ouis", "RPI_EEPROM_OUIS"),
    ("boot_files_dir", "BOOT_FILES_DIR"),
    ("log_level", "LOG_LEVEL"),
    ("log_mode", "LOG_MODE"),
];

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    #[default]
    Console,
    Json,
}

impl FromStr for LogMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(Self::Console),
            "json" => Ok(Self::Json),
            _ => Err(invalid("log_mode", s)),
        }
    }
}

impl fmt::Display for LogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Console => write!(f, "console"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub interface: String,
    pub enable_proxy_dhcp: bool,
    pub boot_endpoint_auto: bool,
    pub boot_endpoint: Option<String>,
    pub boot_decision_url: Option<String>,
    pub http_port: u16,
    pub http_boot_filename: String,
    pub chainload_marker: String,
    pub boot_file_efi_arm64: String,
    pub boot_file_rpi_eeprom: String,
    pub rpi_eeprom_ouis: EepromOuiTable,
    pub boot_files_dir: PathBuf,
    pub log_level: String,
    pub log_mode: LogMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            enable_proxy_dhcp: true,
            boot_endpoint_auto: true,
            boot_endpoint: None,
            boot_decision_url: None,
            http_port: DEFAULT_HTTP_PORT,
            http_boot_filename: DEFAULT_HTTP_BOOT_FILENAME.to_string(),
            chainload_marker: DEFAULT_CHAINLOAD_MARKER.to_string(),
            boot_file_efi_arm64: DEFAULT_BOOT_FILE_EFI_ARM64.to_string(),
            boot_file_rpi_eeprom: DEFAULT_BOOT_FILE_RPI_EEPROM.to_string(),
            rpi_eeprom_ouis: EepromOuiTable::default(),
            boot_files_dir: PathBuf::from(DEFAULT_BOOT_FILES_DIR),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_mode: LogMode::Console,
        }
    }
}

impl Config {
    /// Load from the process environment.
    ///
    /// An explicit `path` must exist; without one the default path is
    /// read only if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let contents = if required || path.exists() {
            Some(
                std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?,
            )
        } else {
            None
        };

        Self::from_sources(contents.as_deref(), |name| std::env::var(name).ok())
    }

    /// Defaults, then `file` contents, then whatever `env` returns.
    pub fn from_sources(
        file: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(contents) = file {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    config.set(key.trim(), value.trim())?;
                }
            }
        }

        for &(key, var) in ENV_KEYS {
            if let Some(value) = env(var) {
                config.set(key, &value)?;
            }
        }

        Ok(config)
    }

    /// Set one value by its config file key. Unknown keys are ignored.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "interface" => self.interface = value.to_string(),
            "enable_proxy_dhcp" => self.enable_proxy_dhcp = parse_bool(key, value)?,
            "boot_endpoint_auto" => self.boot_endpoint_auto = parse_bool(key, value)?,
            "boot_endpoint" => self.boot_endpoint = non_empty(value),
            "boot_decision_url" => self.boot_decision_url = non_empty(value),
            "http_port" => {
                self.http_port = value
                    .parse::<u16>()
                    .ok()
                    .filter(|port| *port != 0)
                    .ok_or_else(|| invalid(key, value))?;
            }
            "http_boot_filename" => self.http_boot_filename = value.to_string(),
            "chainload_marker" => self.chainload_marker = value.to_string(),
            "boot_file_efi_arm64" => self.boot_file_efi_arm64 = value.to_string(),
            "boot_file_rpi_eeprom" => self.boot_file_rpi_eeprom = value.to_string(),
            "rpi_eeprom_ouis" => self.rpi_eeprom_ouis = EepromOuiTable::parse_list(value)?,
            "boot_files_dir" => self.boot_files_dir = PathBuf::from(value),
            "log_level" => {
                let level = value.trim().to_ascii_lowercase();
                if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
                    return Err(invalid(key, value));
                }
                self.log_level = level;
            }
            "log_mode" => self.log_mode = value.parse()?,
            _ => {}
        }
        Ok(())
    }

    /// Chain-load URL handed to clients carrying the marker.
    pub fn chainload_url(&self, server_ip: Ipv4Addr) -> Result<String, ConfigError> {
        if self.boot_endpoint_auto {
            return Ok(format!(
                "http://{}:{}{}",
                server_ip, self.http_port, BOOT_SCRIPT_PATH
            ));
        }
        self.boot_endpoint
            .clone()
            .ok_or_else(|| ConfigError::Missing("boot_endpoint".to_string()))
    }

    /// UEFI HTTP boot clients need an absolute `http://` or `https://` URL
    /// in option 67; a bare file name leaves them with nothing to fetch.
    pub fn http_boot_is_url(&self) -> bool {
        let value = self.http_boot_filename.trim();
        ["http://", "https://"].iter().any(|scheme| {
            value
                .get(..scheme.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        })
    }

    /// Freeze into the runtime configuration for `server_ip`.
    pub fn into_service_config(self, server_ip: Ipv4Addr) -> Result<ServiceConfig, ConfigError> {
        let chainload_url = self.chainload_url(server_ip)?;
        if !self.http_boot_is_url() {
            tracing::warn!(
                http_boot_filename = %self.http_boot_filename,
                "http_boot_filename is not an http(s) URL; HTTP boot clients will not find it"
            );
        }

        Ok(ServiceConfig {
            server_ip,
            interface: self.interface,
            enable_proxy_dhcp: self.enable_proxy_dhcp,
            http_port: self.http_port,
            boot_decision_url: self.boot_decision_url,
            boot_files_dir: self.boot_files_dir,
            proxy_dhcp: ProxyDhcpConfig {
                server_ip,
                chainload_url,
                http_boot_filename: self.http_boot_filename,
                chainload_marker: self.chainload_marker.into_bytes(),
                boot_files: BootFileNames {
                    efi_arm64: self.boot_file_efi_arm64,
                    rpi_eeprom: self.boot_file_rpi_eeprom,
                },
                eeprom_ouis: self.rpi_eeprom_ouis,
            },
        })
    }
}

/// Resolved configuration shared read-only by all listeners.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub server_ip: Ipv4Addr,
    pub interface: String,
    pub enable_proxy_dhcp: bool,
    pub http_port: u16,
    /// HTTP listener runs only when this is set.
    pub boot_decision_url: Option<String>,
    pub boot_files_dir: PathBuf,
    pub proxy_dhcp: ProxyDhcpConfig,
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Ok(true),
        "0" | "f" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
