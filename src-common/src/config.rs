//! Configuration persistence for pcmout.
//!
//! This module handles loading and saving device configuration to a JSON file
//! in the user's configuration directory. It is shared between the engine and
//! the CLI so both see the same settings.

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;

/// Device configuration that persists across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// ALSA PCM name opened for playback
    #[serde(default = "default_alsa_device")]
    pub alsa_device: String,
    /// OSS device file; `None` discovers the default through `/dev/sndstat`
    #[serde(default)]
    pub oss_device: Option<PathBuf>,
    /// Value handed to `SNDCTL_DSP_SETFRAGMENT` (count << 16 | log2 size)
    #[serde(default = "default_oss_fragment")]
    pub oss_fragment: u32,
    /// Number of buffers in the pool
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,
    /// Duration of audio held by one buffer
    #[serde(default = "default_buffer_ms")]
    pub buffer_ms: u32,
    /// Poll interval used while waiting for the device to drain
    #[serde(default = "default_drain_poll_ms")]
    pub drain_poll_ms: u64,
}

fn default_alsa_device() -> String {
    "default".to_string()
}

fn default_oss_fragment() -> u32 {
    0x0020_0008
}

fn default_buffer_count() -> usize {
    8
}

fn default_buffer_ms() -> u32 {
    100
}

fn default_drain_poll_ms() -> u64 {
    200
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alsa_device: default_alsa_device(),
            oss_device: None,
            oss_fragment: default_oss_fragment(),
            buffer_count: default_buffer_count(),
            buffer_ms: default_buffer_ms(),
            drain_poll_ms: default_drain_poll_ms(),
        }
    }
}

/// Valid configuration key names.
pub const CONFIG_KEYS: &[&str] = &[
    "alsa_device",
    "oss_device",
    "oss_fragment",
    "buffer_count",
    "buffer_ms",
    "drain_poll_ms",
];

impl Config {
    /// Get the path to the configuration file.
    ///
    /// Returns platform-specific path:
    /// - Linux: ~/.config/pcmout/config.json
    /// - macOS: ~/Library/Application Support/pcmout/config.json
    /// - Windows: %APPDATA%\pcmout\config.json
    pub fn config_path() -> PathBuf {
        BaseDirs::new()
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pcmout")
            .join("config.json")
    }

    /// Load configuration from disk.
    ///
    /// Returns the loaded configuration, or a default configuration if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        let path = Self::config_path();

        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(contents) => Self::from_json(&contents),
            Err(_) => Self::default(),
        }
    }

    /// Parse a JSON document, falling back to defaults when it is malformed.
    pub fn from_json(contents: &str) -> Self {
        serde_json::from_str(contents).unwrap_or_default()
    }

    /// Save configuration to disk.
    ///
    /// Creates the configuration directory if it doesn't exist.
    pub fn save(&self) -> io::Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&path, contents)?;

        Ok(())
    }

    /// Render one value as text, or `None` for an unknown key.
    pub fn get_value(&self, key: &str) -> Option<String> {
        let value = match key {
            "alsa_device" => self.alsa_device.clone(),
            "oss_device" => self
                .oss_device
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "auto".to_string()),
            "oss_fragment" => format!("{:#010x}", self.oss_fragment),
            "buffer_count" => self.buffer_count.to_string(),
            "buffer_ms" => self.buffer_ms.to_string(),
            "drain_poll_ms" => self.drain_poll_ms.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Parse and store one value given as text.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "alsa_device" => {
                if value.trim().is_empty() {
                    return Err("alsa_device must not be empty".to_string());
                }
                self.alsa_device = value.trim().to_string();
            }
            "oss_device" => {
                self.oss_device = match value.trim() {
                    "" | "auto" => None,
                    path => Some(PathBuf::from(path)),
                };
            }
            "oss_fragment" => {
                let trimmed = value.trim();
                let parsed = match trimmed.strip_prefix("0x") {
                    Some(hex) => u32::from_str_radix(hex, 16),
                    None => trimmed.parse(),
                };
                self.oss_fragment =
                    parsed.map_err(|_| format!("Invalid value '{}' for oss_fragment", value))?;
            }
            "buffer_count" => {
                self.buffer_count = parse_positive(key, value)?;
            }
            "buffer_ms" => {
                self.buffer_ms = parse_positive(key, value)?;
            }
            "drain_poll_ms" => {
                self.drain_poll_ms = parse_positive(key, value)?;
            }
            _ => {
                return Err(format!(
                    "Unknown config key '{}'. Valid keys: {}",
                    key,
                    CONFIG_KEYS.join(", ")
                ))
            }
        }
        Ok(())
    }
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T, String>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match value.trim().parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => Err(format!(
            "Invalid value '{}' for {}. Expected a positive integer",
            value, key
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.alsa_device, "default");
        assert_eq!(config.oss_device, None);
        assert_eq!(config.buffer_count, 8);
        assert_eq!(config.drain_poll_ms, 200);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = Config::from_json(r#"{"alsa_device": "plughw:0,0", "buffer_count": 4}"#);
        assert_eq!(config.alsa_device, "plughw:0,0");
        assert_eq!(config.buffer_count, 4);
        assert_eq!(config.buffer_ms, 100);
        assert_eq!(config.oss_fragment, 0x0020_0008);
    }

    #[test]
    fn test_malformed_json_falls_back() {
        let config = Config::from_json("{ not json");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config {
            oss_device: Some(PathBuf::from("/dev/dsp1")),
            buffer_ms: 40,
            ..Default::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_set_and_get_values() {
        let mut config = Config::default();
        config.set_value("oss_device", "/dev/dsp2").unwrap();
        config.set_value("oss_fragment", "0x00100009").unwrap();
        config.set_value("buffer_count", "16").unwrap();

        assert_eq!(config.get_value("oss_device").as_deref(), Some("/dev/dsp2"));
        assert_eq!(config.oss_fragment, 0x0010_0009);
        assert_eq!(config.get_value("oss_fragment").as_deref(), Some("0x00100009"));
        assert_eq!(config.buffer_count, 16);

        config.set_value("oss_device", "auto").unwrap();
        assert_eq!(config.oss_device, None);
    }

    #[test]
    fn test_set_value_rejects_bad_input() {
        let mut config = Config::default();
        assert!(config.set_value("buffer_count", "0").is_err());
        assert!(config.set_value("buffer_ms", "-5").is_err());
        assert!(config.set_value("alsa_device", "  ").is_err());
        assert!(config.set_value("volume", "11").is_err());
        assert_eq!(config.get_value("volume"), None);
    }
}
