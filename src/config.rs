//! Configuration management for dhcpfront

use crate::error::{FrontendError, FrontendResult};
use crate::validation;
use crate::wire::dhcp::HostnameSource;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main dhcpfront configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendConfig {
    /// Channel to the main process
    #[serde(default)]
    pub ipc: IpcSettings,
    /// Read buffers
    #[serde(default)]
    pub capture: CaptureSettings,
    /// DHCP message contents
    #[serde(default)]
    pub dhcp: DhcpSettings,
    /// Interface eligibility
    #[serde(default)]
    pub interfaces: InterfaceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcSettings {
    /// Inherited descriptor of the pipe to the main process
    #[serde(default = "default_main_fd")]
    pub main_fd: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Per-interface capture read buffer (bytes)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Routing socket read buffer (bytes)
    #[serde(default = "default_route_buffer_size")]
    pub route_buffer_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpSettings {
    /// Include the host-name option
    #[serde(default = "default_send_hostname")]
    pub send_hostname: bool,
    /// Use instead of the system host name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSettings {
    /// Interfaces treated as autoconf-eligible on platforms without a
    /// kernel flag for it
    #[serde(default)]
    pub autoconf: Vec<String>,
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/dhcpfront.toml")
}

fn default_main_fd() -> i32 {
    3
}

fn default_buffer_size() -> usize {
    4096
}

fn default_route_buffer_size() -> usize {
    16384
}

fn default_send_hostname() -> bool {
    true
}

impl Default for IpcSettings {
    fn default() -> Self {
        Self {
            main_fd: default_main_fd(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            route_buffer_size: default_route_buffer_size(),
        }
    }
}

impl Default for DhcpSettings {
    fn default() -> Self {
        Self {
            send_hostname: default_send_hostname(),
            hostname: None,
        }
    }
}

impl FrontendConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> FrontendResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| FrontendError::ConfigError(format!("Failed to read config: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| FrontendError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults if the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> FrontendResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> FrontendResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FrontendError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| FrontendError::ConfigError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> FrontendResult<()> {
        if self.ipc.main_fd < 0 {
            return Err(FrontendError::InvalidParameter(format!(
                "Invalid main_fd {}",
                self.ipc.main_fd
            )));
        }
        validation::validate_capture_buffer(self.capture.buffer_size)?;
        validation::validate_route_buffer(self.capture.route_buffer_size)?;
        if let Some(hostname) = &self.dhcp.hostname {
            validation::validate_hostname(hostname)?;
        }
        for name in &self.interfaces.autoconf {
            validation::validate_interface_name(name)?;
        }
        Ok(())
    }

    /// Where the host-name option value comes from
    pub fn hostname_source(&self) -> HostnameSource {
        match (&self.dhcp.hostname, self.dhcp.send_hostname) {
            (_, false) => HostnameSource::Disabled,
            (Some(name), true) => HostnameSource::Fixed(name.clone()),
            (None, true) => HostnameSource::System,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FrontendConfig::default();
        assert_eq!(config.ipc.main_fd, 3);
        assert_eq!(config.capture.buffer_size, 4096);
        assert_eq!(config.capture.route_buffer_size, 16384);
        assert!(config.dhcp.send_hostname);
        assert_eq!(config.hostname_source(), HostnameSource::System);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dhcp]\nhostname = \"gw\"\n\n[interfaces]\nautoconf = [\"em0\", \"em1\"]").unwrap();

        let config = FrontendConfig::load(file.path()).unwrap();
        assert_eq!(config.ipc.main_fd, 3);
        assert_eq!(config.interfaces.autoconf, vec!["em0", "em1"]);
        assert_eq!(config.hostname_source(), HostnameSource::Fixed("gw".to_string()));
    }

    #[test]
    fn test_send_hostname_disabled() {
        let config: FrontendConfig =
            toml::from_str("[dhcp]\nsend_hostname = false\nhostname = \"gw\"").unwrap();
        assert_eq!(config.hostname_source(), HostnameSource::Disabled);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[capture]\nbuffer_size = 4").unwrap();
        assert!(matches!(
            FrontendConfig::load(file.path()),
            Err(FrontendError::InvalidParameter(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[interfaces]\nautoconf = [\"em0;reboot\"]").unwrap();
        assert!(FrontendConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ipc\nmain_fd = ").unwrap();
        assert!(matches!(
            FrontendConfig::load(file.path()),
            Err(FrontendError::ConfigError(_))
        ));
    }

    #[test]
    fn test_missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FrontendConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, FrontendConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dhcpfront.toml");
        let mut config = FrontendConfig::default();
        config.interfaces.autoconf.push("em0".to_string());
        config.save(&path).unwrap();
        assert_eq!(FrontendConfig::load(&path).unwrap(), config);
    }
}
