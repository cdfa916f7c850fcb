//! Updater configuration, optionally loaded from a JSON file

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When the block length is written to SUOTA_PATCH_LEN
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchLengthPolicy {
    /// Before every block
    #[default]
    EveryBlock,
    /// Only when the length differs from the last one written; the device
    /// keeps the previous value
    OnChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Wait for a read result, write confirmation or status notification
    #[serde(rename = "response_timeout_ms", with = "millis")]
    pub response_timeout: Duration,
    #[serde(rename = "scan_window_ms", with = "millis")]
    pub scan_window: Duration,
    #[serde(rename = "connect_window_ms", with = "millis")]
    pub connect_window: Duration,
    #[serde(rename = "connect_poll_interval_ms", with = "millis")]
    pub connect_poll_interval: Duration,
    pub browse_poll_attempts: u32,
    #[serde(rename = "browse_poll_interval_ms", with = "millis")]
    pub browse_poll_interval: Duration,
    /// Pause after a patch length write before the chunks follow
    #[serde(rename = "patch_length_settle_ms", with = "millis")]
    pub patch_length_settle: Duration,
    #[serde(rename = "block_settle_ms", with = "millis")]
    pub block_settle: Duration,
    /// Wait for the link to drop once the reboot command went out
    #[serde(rename = "reboot_timeout_ms", with = "millis")]
    pub reboot_timeout: Duration,
    pub patch_length_policy: PatchLengthPolicy,
    pub event_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(30),
            scan_window: Duration::from_secs(130),
            connect_window: Duration::from_secs(30),
            connect_poll_interval: Duration::from_millis(100),
            browse_poll_attempts: 250,
            browse_poll_interval: Duration::from_millis(100),
            patch_length_settle: Duration::from_millis(400),
            block_settle: Duration::from_millis(10),
            reboot_timeout: Duration::from_secs(30),
            patch_length_policy: PatchLengthPolicy::EveryBlock,
            event_queue_capacity: 64,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(data)?)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Config::from_json("{}").unwrap(), Config::default());
    }

    #[test]
    fn fields_override_defaults() {
        let config = Config::from_json(
            r#"{"response_timeout_ms": 5000, "patch_length_policy": "on_change", "browse_poll_attempts": 10}"#,
        )
        .unwrap();
        assert_eq!(config.response_timeout, Duration::from_secs(5));
        assert_eq!(config.patch_length_policy, PatchLengthPolicy::OnChange);
        assert_eq!(config.browse_poll_attempts, 10);
        assert_eq!(config.scan_window, Duration::from_secs(130));
    }

    #[test]
    fn serializes_as_milliseconds() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["scan_window_ms"], 130_000);
        assert_eq!(json["patch_length_policy"], "every_block");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Config::from_json(r#"{"patch_length_policy": "sometimes"}"#),
            Err(ConfigError::Parse(_))
        ));
    }
}
