//! Configuration for the ConsoleCast daemon
//!
//! Loaded from a TOML file; every section has working defaults so a missing
//! file still yields a runnable daemon.

use crate::capture::framing::FailurePolicy;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub daemon: DaemonConfig,
    pub capture: CaptureConfig,
    pub usb: UsbConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

/// Which transport serves clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Device-serial control channel
    Usb,
    /// One TCP server per stream
    Tcp,
}

/// Daemon-wide settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub mode: TransportMode,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Usb,
        }
    }
}

/// Capture threads and backend
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture backend name
    pub source: String,
    /// Reaction to a failed video transfer
    pub failure_policy: FailurePolicy,
    /// Stack size of each capture thread in KiB
    pub thread_stack_kb: usize,
}

impl CaptureConfig {
    /// Capture thread stack size in bytes
    pub fn thread_stack_size(&self) -> usize {
        self.thread_stack_kb * 1024
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: "synthetic".to_string(),
            failure_policy: FailurePolicy::default(),
            thread_stack_kb: 64,
        }
    }
}

/// Device-serial transport
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UsbConfig {
    /// Gadget tty backing the vendor interface
    pub port: String,
    pub baud_rate: u32,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_name: String,
    pub manufacturer: String,
    /// Device serial number; looked up from the system when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyGS0".to_string(),
            baud_rate: 115200,
            vendor_id: 0x18D1,
            product_id: 0x4EE0,
            device_name: "ConsoleCast".to_string(),
            manufacturer: "consolecast".to_string(),
            serial_number: None,
        }
    }
}

/// Socket transport
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: Ipv4Addr,
    pub video_port: u16,
    pub audio_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: Ipv4Addr::UNSPECIFIED,
            video_port: 9911,
            audio_port: 9922,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use consolecast::config::AppConfig;
    ///
    /// let config = AppConfig::from_file("consolecast.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, falling back to defaults if the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            log::warn!("Config {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.capture.thread_stack_kb < 16 {
            return Err(Error::Config(format!(
                "capture.thread_stack_kb must be at least 16, got {}",
                self.capture.thread_stack_kb
            )));
        }
        if self.network.video_port == self.network.audio_port {
            return Err(Error::Config(format!(
                "network.video_port and network.audio_port must differ (both {})",
                self.network.video_port
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.daemon.mode, TransportMode::Usb);
        assert_eq!(config.capture.source, "synthetic");
        assert_eq!(config.capture.thread_stack_size(), 64 * 1024);
        assert_eq!(config.usb.vendor_id, 0x18D1);
        assert_eq!(config.usb.product_id, 0x4EE0);
        assert_eq!(config.network.video_port, 9911);
        assert_eq!(config.network.audio_port, 9922);
    }

    #[test]
    fn test_toml_serialization() {
        let config = AppConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[daemon]"));
        assert!(toml_string.contains("[capture]"));
        assert!(toml_string.contains("[usb]"));
        assert!(toml_string.contains("[network]"));
        assert!(toml_string.contains("[logging]"));
        assert!(toml_string.contains("mode = \"usb\""));
        assert!(!toml_string.contains("serial_number"));
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[daemon]
mode = "tcp"

[capture]
failure_policy = "drop"

[usb]
serial_number = "XAW10012345678"

[network]
bind_address = "127.0.0.1"
video_port = 19911

[logging]
level = "debug"
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.daemon.mode, TransportMode::Tcp);
        assert_eq!(config.capture.failure_policy, FailurePolicy::Drop);
        assert_eq!(config.capture.source, "synthetic");
        assert_eq!(config.usb.serial_number.as_deref(), Some("XAW10012345678"));
        assert_eq!(config.network.bind_address, Ipv4Addr::LOCALHOST);
        assert_eq!(config.network.video_port, 19911);
        assert_eq!(config.network.audio_port, 9922);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consolecast.toml");

        let mut config = AppConfig::default();
        config.daemon.mode = TransportMode::Tcp;
        config.network.audio_port = 20022;
        config.to_file(&path).unwrap();

        let loaded = AppConfig::from_file(&path).unwrap();
        assert_eq!(loaded.daemon.mode, TransportMode::Tcp);
        assert_eq!(loaded.network.audio_port, 20022);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.network.video_port, 9911);
    }

    #[test]
    fn test_rejects_shared_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[network]\nvideo_port = 7000\naudio_port = 7000\n").unwrap();

        assert!(matches!(AppConfig::from_file(&path), Err(Error::Config(_))));
    }
}
