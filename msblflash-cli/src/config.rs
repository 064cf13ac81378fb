//! Configuration file support for msblflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (MSBLFLASH_*)
//! 3. Local config file (./msblflash.toml)
//! 4. Global config file (~/.config/msblflash/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local config file name.
const LOCAL_CONFIG: &str = "msblflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port of the host MCU (e.g., "/dev/ttyACM0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
    /// Read timeout in seconds.
    pub timeout: Option<u64>,
}

/// Host MCU configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSection {
    /// Host-to-target interface ("uart", "i2c" or "spi").
    pub comm_interface: Option<String>,
    /// Command wait-time multiplier.
    pub delay_factor: Option<u8>,
    /// Enter the bootloader through the EBL GPIO pin.
    #[serde(default)]
    pub ebl_gpio: bool,
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Target name for raw images.
    pub target: Option<String>,
    /// Partial page send size.
    pub send_size: Option<u16>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Host MCU configuration.
    #[serde(default)]
    pub host: HostSection,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "msblflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        // Connection
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.connection.timeout.is_some() {
            self.connection.timeout = other.connection.timeout;
        }

        // Host
        if other.host.comm_interface.is_some() {
            self.host.comm_interface = other.host.comm_interface;
        }
        if other.host.delay_factor.is_some() {
            self.host.delay_factor = other.host.delay_factor;
        }
        if other.host.ebl_gpio {
            self.host.ebl_gpio = true;
        }

        // Flash
        if other.flash.target.is_some() {
            self.flash.target = other.flash.target;
        }
        if other.flash.send_size.is_some() {
            self.flash.send_size = other.flash.send_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.port.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.connection.timeout.is_none());
        assert!(config.host.comm_interface.is_none());
        assert!(!config.host.ebl_gpio);
        assert!(config.flash.target.is_none());
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_overrides() {
        let mut base = Config::default();
        base.connection.baud = Some(115200);

        let mut other = Config::default();
        other.connection.port = Some("/dev/ttyACM0".to_string());
        other.connection.baud = Some(921600);
        other.flash.target = Some("MAX78000".to_string());

        base.merge(other);
        assert_eq!(base.connection.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(base.connection.baud, Some(921600));
        assert_eq!(base.flash.target.as_deref(), Some("MAX78000"));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection.port = Some("/dev/ttyACM0".to_string());
        base.host.delay_factor = Some(4);
        base.host.ebl_gpio = true;

        base.merge(Config::default());

        assert_eq!(base.connection.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(base.host.delay_factor, Some(4));
        assert!(base.host.ebl_gpio);
    }

    // ---- TOML ----

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
port = "COM4"
baud = 115200
timeout = 30

[host]
comm_interface = "i2c"
delay_factor = 2
ebl_gpio = true

[flash]
target = "MAX32670"
send_size = 4096
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.port.as_deref(), Some("COM4"));
        assert_eq!(config.connection.timeout, Some(30));
        assert_eq!(config.host.comm_interface.as_deref(), Some("i2c"));
        assert_eq!(config.host.delay_factor, Some(2));
        assert!(config.host.ebl_gpio);
        assert_eq!(config.flash.target.as_deref(), Some("MAX32670"));
        assert_eq!(config.flash.send_size, Some(4096));
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: Config = toml::from_str("[host]\ndelay_factor = 3\n").unwrap();
        assert!(config.connection.port.is_none());
        assert_eq!(config.host.delay_factor, Some(3));
        assert!(!config.host.ebl_gpio);
    }

    // ---- load_from_path ----

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("msblflash.toml");
        fs::write(&path, "[connection]\nport = \"/dev/ttyUSB1\"\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB1"));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("broken.toml");
        fs::write(&path, "[connection\nport = 3").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            let p = p.to_string_lossy();
            assert!(p.contains("msblflash"));
            assert!(p.ends_with("config.toml"));
        }
    }
}
