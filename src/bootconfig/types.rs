//! Boot decision request and response bodies.

use serde::{Deserialize, Serialize};

/// Body POSTed to the boot decision service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootConfigRequest {
    pub mac: String,
    pub arch: String,
    pub serial: String,
}

impl BootConfigRequest {
    pub fn new(mac: impl Into<String>, arch: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            arch: arch.into(),
            serial: serial.into(),
        }
    }
}

/// Kernel, arguments and initrd chosen by the boot decision service.
///
/// Fields the service leaves out are empty, e.g. no `kernel_args`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfigResponse {
    pub kernel: String,
    pub kernel_args: String,
    pub initrd: String,
}

impl BootConfigResponse {
    /// Render as an iPXE script.
    pub fn render_script(&self) -> String {
        format!(
            "#!ipxe\nkernel {} {}\ninitrd {}\nboot",
            self.kernel, self.kernel_args, self.initrd
        )
    }
}
