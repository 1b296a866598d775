//! Configuration file support for samflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SAMFLASH_*)
//! 3. Local config file (./samflash.toml)
//! 4. Global config file (e.g. ~/.config/samflash/config.toml)
//!
//! ```toml
//! [connection]
//! port = "/dev/ttyACM0"
//! baud = 921600
//! flow_control = true
//!
//! [flash]
//! verify = true
//! boot = true
//! reset = true
//! ```

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-project config file.
const LOCAL_CONFIG: &str = "samflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub port: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// RTS/CTS flow control.
    pub flow_control: Option<bool>,
}

/// Defaults for the `flash` command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Read back every page after writing.
    pub verify: Option<bool>,
    /// Select boot from flash when done.
    pub boot: Option<bool>,
    /// Reset the device when done.
    pub reset: Option<bool>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Flash defaults.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from the global and local config files.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

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
        ProjectDirs::from("", "", "samflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values in `other` win.
    fn merge(&mut self, other: Self) {
        let Self { connection, flash } = other;

        if connection.port.is_some() {
            self.connection.port = connection.port;
        }
        self.connection.baud = connection.baud.or(self.connection.baud);
        self.connection.flow_control = connection.flow_control.or(self.connection.flow_control);

        self.flash.verify = flash.verify.or(self.flash.verify);
        self.flash.boot = flash.boot.or(self.flash.boot);
        self.flash.reset = flash.reset.or(self.flash.reset);
    }

    /// Whether RTS/CTS flow control is enabled (default on).
    pub fn flow_control(&self) -> bool {
        self.connection.flow_control.unwrap_or(true)
    }

    /// Whether pages are verified after writing (default on).
    pub fn verify(&self) -> bool {
        self.flash.verify.unwrap_or(true)
    }

    /// Whether boot from flash is selected after programming (default on).
    pub fn boot(&self) -> bool {
        self.flash.boot.unwrap_or(true)
    }

    /// Whether the device is reset after programming (default on).
    pub fn reset(&self) -> bool {
        self.flash.reset.unwrap_or(true)
    }
}
