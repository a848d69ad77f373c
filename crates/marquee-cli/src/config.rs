//! Uploader configuration.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults
//! - TOML configuration file (`--config`, `marquee.toml`, `~/.config/marquee/marquee.toml`)
//! - Environment variables (`MARQUEE_DEVICE__ADDRESS`, `MARQUEE_TRANSFER__RETRY_LIMIT`, ...)
//! - Command line arguments

use anyhow::{Context, Result};
use marquee_core::{AckStrategy, SessionConfig};
use marquee_transport::{parse_characteristic, BtleConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const SEARCH_PATHS: [&str; 2] = ["marquee.toml", "~/.config/marquee/marquee.toml"];

/// Uploader configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target device.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Transfer tuning.
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Target device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// BLE address of the panel.
    #[serde(default = "default_address")]
    pub address: String,

    /// Upload characteristic UUID (full or 16-bit short form).
    #[serde(default)]
    pub write_characteristic: Option<String>,

    /// Scan time in seconds.
    #[serde(default = "default_scan_secs")]
    pub scan_secs: u64,
}

/// Transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Extra attempts per data frame.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Largest write in bytes.
    #[serde(default)]
    pub write_size: Option<usize>,

    /// Bound on a single write, in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Wait after each handshake packet, in milliseconds.
    #[serde(default = "default_handshake_settle")]
    pub handshake_settle_ms: u64,

    /// Wait for a frame acknowledgement, in milliseconds.
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// Times the completion packet is sent.
    #[serde(default = "default_completion_repeats")]
    pub completion_repeats: u8,
}

// Default value functions
fn default_address() -> String {
    "FF:24:06:18:41:5F".to_string()
}

fn default_scan_secs() -> u64 {
    5
}

fn default_retry_limit() -> u32 {
    2
}

fn default_write_timeout() -> u64 {
    2_000
}

fn default_handshake_settle() -> u64 {
    500
}

fn default_ack_timeout() -> u64 {
    750
}

fn default_completion_repeats() -> u8 {
    2
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            write_characteristic: None,
            scan_secs: default_scan_secs(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            write_size: None,
            write_timeout_ms: default_write_timeout(),
            handshake_settle_ms: default_handshake_settle(),
            ack_timeout_ms: default_ack_timeout(),
            completion_repeats: default_completion_repeats(),
        }
    }
}

impl Config {
    /// Load configuration from file, environment and defaults.
    ///
    /// An explicit path must exist; the search paths are optional.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be read or parsed, or an
    /// environment override has the wrong type.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::search(),
        };

        let base = match &file {
            Some(path) => {
                debug!("Loading config from {}", path.display());
                Self::from_file(path)?
            }
            None => Self::default(),
        };

        Self::with_env_overrides(base)
    }

    fn search() -> Option<PathBuf> {
        SEARCH_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply `MARQUEE_*` environment variables on top of `base`.
    fn with_env_overrides(base: Config) -> Result<Self> {
        Self::layer(
            base,
            config::Environment::with_prefix("MARQUEE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
    }

    fn layer<S>(base: Config, source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let defaults =
            config::Config::try_from(&base).context("Failed to serialize base config")?;
        config::Config::builder()
            .add_source(defaults)
            .add_source(source)
            .build()
            .and_then(|merged| merged.try_deserialize::<Config>())
            .context("Invalid configuration override")
    }

    /// Session settings for the upload.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        let t = &self.transfer;
        SessionConfig {
            handshake_ack: AckStrategy::Settle {
                delay: Duration::from_millis(t.handshake_settle_ms),
            },
            data_ack: AckStrategy::Notification {
                timeout: Duration::from_millis(t.ack_timeout_ms),
            },
            retry_limit: t.retry_limit,
            write_timeout: Duration::from_millis(t.write_timeout_ms),
            write_size: t.write_size,
            completion_repeats: Some(t.completion_repeats),
        }
    }

    /// BLE transport settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the write characteristic is not a valid UUID.
    pub fn btle_config(&self) -> Result<BtleConfig> {
        let mut btle = BtleConfig {
            scan_duration: Duration::from_secs(self.device.scan_secs),
            ..BtleConfig::default()
        };
        if let Some(size) = self.transfer.write_size {
            btle.write_size = size;
        }
        if let Some(uuid) = &self.device.write_characteristic {
            btle.write_characteristic = Some(parse_characteristic(uuid)?);
        }
        Ok(btle)
    }

    /// Write size used when the link does not say otherwise.
    #[must_use]
    pub fn write_size(&self) -> usize {
        self.transfer
            .write_size
            .unwrap_or(BtleConfig::default().write_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.device.address, "FF:24:06:18:41:5F");
        assert_eq!(config.transfer.retry_limit, 2);
        assert_eq!(config.write_size(), 243);
        assert_eq!(
            config.session_config(),
            SessionConfig {
                completion_repeats: Some(2),
                ..SessionConfig::default()
            }
        );
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [device]
            address = "AA:BB:CC:DD:EE:FF"
            write_characteristic = "fff2"

            [transfer]
            write_size = 182
            ack_timeout_ms = 1000
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(config.device.scan_secs, 5);
        assert_eq!(config.transfer.write_size, Some(182));
        assert_eq!(
            config.session_config().data_ack,
            AckStrategy::Notification {
                timeout: Duration::from_millis(1000)
            }
        );

        let btle = config.btle_config().unwrap();
        assert_eq!(btle.write_size, 182);
        assert!(btle.write_characteristic.is_some());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let base: Config = toml::from_str("[transfer]\nretry_limit = 5\n").unwrap();
        let env = HashMap::from([
            ("MARQUEE_TRANSFER__RETRY_LIMIT".to_string(), "7".to_string()),
            ("MARQUEE_DEVICE__ADDRESS".to_string(), "11:22:33:44:55:66".to_string()),
        ]);

        let config = Config::layer(
            base,
            config::Environment::with_prefix("MARQUEE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(env)),
        )
        .unwrap();

        assert_eq!(config.transfer.retry_limit, 7);
        assert_eq!(config.device.address, "11:22:33:44:55:66");
        assert_eq!(config.transfer.ack_timeout_ms, 750);
    }

    #[test]
    fn test_invalid_characteristic() {
        let mut config = Config::default();
        config.device.write_characteristic = Some("not-a-uuid".into());
        assert!(config.btle_config().is_err());
    }
}
