//! TOML configuration
//!
//! Looked up at `<config_dir>/sensehat-bridge/config.toml` unless a path is
//! given on the command line. A missing file at the default location falls
//! back to defaults so the bridge runs out of the box on a stock Raspberry Pi.
//! A path named on the command line must exist, and a file that does not parse
//! is always an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::bridge::{BridgeSettings, DebounceSettings, IndicatorSettings, OutputSettings};
use crate::hat::sense_hat::{SenseHatSettings, DEFAULT_FRAMEBUFFER_NAME, DEFAULT_JOYSTICK_NAME};
use crate::mqtt::MqttSettings;

const CONFIG_DIR: &str = "sensehat-bridge";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Device names and optional fixed device nodes
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub joystick_name: String,
    pub framebuffer_name: String,
    pub joystick_path: Option<PathBuf>,
    pub framebuffer_path: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            joystick_name: DEFAULT_JOYSTICK_NAME.to_string(),
            framebuffer_name: DEFAULT_FRAMEBUFFER_NAME.to_string(),
            joystick_path: None,
            framebuffer_path: None,
        }
    }
}

impl DeviceConfig {
    pub fn hat_settings(&self) -> SenseHatSettings {
        SenseHatSettings {
            joystick_name: self.joystick_name.clone(),
            framebuffer_name: self.framebuffer_name.clone(),
            joystick_path: self.joystick_path.clone(),
            framebuffer_path: self.framebuffer_path.clone(),
            ..Default::default()
        }
    }
}

/// Command line switches that win over the file
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub no_debounce: bool,
    pub debounce_ms: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    pub poll_interval_ms: u64,
    pub debounce: DebounceSettings,
    pub indicator: IndicatorSettings,
    pub output: OutputSettings,
    pub device: DeviceConfig,
    pub mqtt: MqttSettings,
}

impl Default for Config {
    fn default() -> Self {
        let bridge = BridgeSettings::default();
        Self {
            poll_interval_ms: bridge.poll_interval_ms,
            debounce: bridge.debounce,
            indicator: bridge.indicator,
            output: bridge.output,
            device: DeviceConfig::default(),
            mqtt: MqttSettings::default(),
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads the file at the default location, using defaults when it is absent
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::read(path, false)
    }

    /// Loads a file the user asked for by name. A missing file is an error.
    pub fn load_required(path: &Path) -> Result<Self, ConfigError> {
        Self::read(path, true)
    }

    fn read(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded config from {}", path.display());
        debug!("Config: {:?}", config);
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(window_ms) = overrides.debounce_ms {
            debug!("Debounce window overridden to {} ms", window_ms);
            self.debounce.enabled = true;
            self.debounce.window_ms = window_ms;
        }
        if overrides.no_debounce {
            debug!("Debounce switched off from the command line");
            self.debounce.enabled = false;
        }
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            poll_interval_ms: self.poll_interval_ms,
            debounce: self.debounce.clone(),
            indicator: self.indicator.clone(),
            output: self.output.clone(),
        }
    }
}
