//! Persistent configuration for the bridge.
//!
//! Stored in `~/.uiabridge/config.json`. Every field has a default, so a
//! missing or partial file is fine; command-line flags override whatever is
//! loaded here.
//!
//! # Example
//!
//! ```no_run
//! use uiabridge_core::config::BridgeConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let mut config = BridgeConfig::load();
//! config.escalate_errors = true;
//! config.save().unwrap();
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alert::AlertRule;

const CONFIG_FILENAME: &str = "config.json";

/// Returns the bridge's state directory (`~/.uiabridge/`).
///
/// Creates the directory if it doesn't exist. Falls back to the system temp
/// directory when there is no home directory.
pub fn bridge_dir() -> PathBuf {
    let dir = dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".uiabridge");
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Returns the logs directory path (`~/.uiabridge/logs/`).
pub fn logs_dir() -> PathBuf {
    let dir = bridge_dir().join("logs");
    std::fs::create_dir_all(&dir).ok();
    dir
}

fn default_peer_addr() -> String {
    "127.0.0.1:9123".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_exchange_timeout_secs() -> u64 {
    10
}

fn default_init_attempts() -> u32 {
    15
}

fn default_init_interval_ms() -> u64 {
    500
}

/// Session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Address of the controller's command endpoint.
    #[serde(default = "default_peer_addr")]
    pub peer_addr: String,

    /// End the session when no command arrives for this long.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Upper bound on one result-for-command exchange. Adjustable at runtime
    /// with `uia.set_cmd_fetch_delegate_timeout`.
    #[serde(default = "default_exchange_timeout_secs")]
    pub exchange_timeout_secs: u64,

    /// Where relative screenshot names are written. Cleared at session start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_dir: Option<PathBuf>,

    /// Terminate the session on the first command error.
    #[serde(default)]
    pub escalate_errors: bool,

    /// Alert rules installed at session start.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alert_rules: Vec<AlertRule>,

    /// What the alert handler reports for alerts no rule matches.
    #[serde(default)]
    pub alert_auto_handled: bool,

    /// How many times to poll for a populated foreground app before starting.
    #[serde(default = "default_init_attempts")]
    pub init_attempts: u32,

    #[serde(default = "default_init_interval_ms")]
    pub init_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            peer_addr: default_peer_addr(),
            idle_timeout_secs: default_idle_timeout_secs(),
            exchange_timeout_secs: default_exchange_timeout_secs(),
            screenshot_dir: None,
            escalate_errors: false,
            alert_rules: Vec::new(),
            alert_auto_handled: false,
            init_attempts: default_init_attempts(),
            init_interval_ms: default_init_interval_ms(),
        }
    }
}

impl BridgeConfig {
    /// Load config from `~/.uiabridge/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        Self::load_from(&bridge_dir().join(CONFIG_FILENAME))
    }

    /// Load config from an explicit path, with the same fallback as [`load`](Self::load).
    pub fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save config to `~/.uiabridge/config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&bridge_dir().join(CONFIG_FILENAME))
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    pub fn init_interval(&self) -> Duration {
        Duration::from_millis(self.init_interval_ms)
    }

    /// The configured screenshot directory, or `~/.uiabridge/screenshots`.
    pub fn screenshot_dir(&self) -> PathBuf {
        self.screenshot_dir
            .clone()
            .unwrap_or_else(|| bridge_dir().join("screenshots"))
    }

    /// Empties and recreates the screenshot directory, returning its path.
    pub fn prepare_screenshot_dir(&self) -> std::io::Result<PathBuf> {
        let dir = self.screenshot_dir();
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("uiabridge_cfg_{}_{}", tag, uuid::Uuid::new_v4().simple()))
    }

    #[test]
    fn defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.idle_timeout(), Duration::from_secs(600));
        assert_eq!(config.exchange_timeout(), Duration::from_secs(10));
        assert_eq!(config.init_attempts, 15);
        assert_eq!(config.init_interval(), Duration::from_millis(500));
        assert!(!config.escalate_errors);
        assert!(!config.alert_auto_handled);
    }

    #[test]
    fn deserialize_empty_json() {
        let loaded: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(loaded, BridgeConfig::default());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let loaded: BridgeConfig =
            serde_json::from_str(r#"{"idle_timeout_secs": 5, "alert_rules": [{"message_text": "Allow"}]}"#).unwrap();
        assert_eq!(loaded.idle_timeout_secs, 5);
        assert_eq!(loaded.exchange_timeout_secs, 10);
        assert_eq!(loaded.alert_rules.len(), 1);
        assert_eq!(loaded.alert_rules[0].button_text, None);
    }

    #[test]
    fn save_and_load_from_path() {
        let path = temp_path("roundtrip");
        let config = BridgeConfig {
            escalate_errors: true,
            screenshot_dir: Some(PathBuf::from("/tmp/shots")),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(BridgeConfig::load_from(&path), config);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn load_from_garbage_returns_default() {
        let path = temp_path("garbage");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(BridgeConfig::load_from(&path), BridgeConfig::default());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn prepare_screenshot_dir_clears_previous_files() {
        let dir = temp_path("shots");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("old.png"), b"x").unwrap();

        let config = BridgeConfig {
            screenshot_dir: Some(dir.clone()),
            ..Default::default()
        };
        let prepared = config.prepare_screenshot_dir().unwrap();
        assert_eq!(prepared, dir);
        assert!(dir.exists());
        assert!(!dir.join("old.png").exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
