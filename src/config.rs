//! Bridge configuration.
//!
//! Loaded from a TOML file, with broker settings overridable from the
//! environment. A watcher task polls the file and hands out freshly parsed
//! configurations so the bridge can rebuild its subscriptions.

use crate::error::{BridgeError, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// File name looked up when no path is given.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory under the user config dir holding the fallback config file.
pub const CONFIG_DIR_NAME: &str = "onvif-mqtt-bridge";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub onvif: Vec<DeviceConfig>,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Prefix for every published topic.
    pub base_topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "onvif-mqtt-bridge".to_string(),
            base_topic: "onvif2mqtt".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

/// Tuning of the ONVIF pull-point subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub pull_timeout_secs: u64,
    pub message_limit: u32,
    pub termination_secs: u64,
    pub reconnect_delay_secs: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            pull_timeout_secs: 10,
            message_limit: 10,
            termination_secs: 60,
            reconnect_delay_secs: 5,
        }
    }
}

impl SubscriptionConfig {
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }

    pub fn termination(&self) -> Duration {
        Duration::from_secs(self.termination_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Long polls must end before the renewal deadline at half the
    /// termination time.
    pub fn validate(&self) -> Result<()> {
        if self.pull_timeout_secs.saturating_mul(2) >= self.termination_secs {
            return Err(BridgeError::InvalidConfig(format!(
                "pull_timeout_secs ({}) must be less than half of termination_secs ({})",
                self.pull_timeout_secs, self.termination_secs
            )));
        }
        Ok(())
    }
}

/// One camera. `name` doubles as the device id in topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub hostname: String,
    #[serde(default = "default_onvif_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_onvif_port() -> u16 {
    80
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub templates: Vec<TemplateConfig>,
}

/// Additional per-event publication with `${key}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub subtopic: String,
    pub template: String,
    #[serde(default)]
    pub retain: bool,
}

impl Config {
    /// Load, apply environment overrides and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| BridgeError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config: Config =
            toml::from_str(&content).map_err(|source| BridgeError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override broker settings from variables resolved by `var`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = var("MQTT_PORT")
            && let Ok(p) = port.parse()
        {
            self.mqtt.port = p;
        }
        if let Some(username) = var("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = var("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Some(client_id) = var("MQTT_CLIENT_ID") {
            self.mqtt.client_id = client_id;
        }
        if let Some(base_topic) = var("MQTT_BASE_TOPIC") {
            self.mqtt.base_topic = base_topic;
        }
    }

    /// Subscription timing must be consistent; device names must be present
    /// and unique.
    pub fn validate(&self) -> Result<()> {
        self.subscription.validate()?;

        let mut seen = HashSet::new();
        for device in &self.onvif {
            if device.name.trim().is_empty() {
                return Err(BridgeError::InvalidConfig(format!(
                    "device at {} has an empty name",
                    device.hostname
                )));
            }
            if !seen.insert(device.name.as_str()) {
                return Err(BridgeError::InvalidConfig(format!(
                    "duplicate device name '{}'",
                    device.name
                )));
            }
        }
        Ok(())
    }
}

/// Resolve the config file location.
///
/// An explicit path wins; otherwise `./config.toml` if it exists, else the
/// file in the user's config directory.
pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }

    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .unwrap_or(local)
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Poll `path` every `interval` and emit the new config whenever the file's
/// modification time changes. Invalid edits are logged and skipped.
///
/// The task ends when the receiver is dropped.
pub fn watch(path: PathBuf, interval: Duration) -> (mpsc::Receiver<Config>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(4);

    let handle = tokio::spawn(async move {
        let mut last_modified = modified_time(&path);
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let modified = modified_time(&path);
            if modified == last_modified {
                continue;
            }
            last_modified = modified;

            match Config::from_file(&path) {
                Ok(config) => {
                    info!("[Config] {} changed, reloading", path.display());
                    if tx.send(config).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("[Config] Ignoring change to {}: {}", path.display(), e);
                }
            }
        }
    });

    (rx, handle)
}
