use std::{path::Path, time::Duration};

use serde_derive::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(String, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    Parse(String, toml::de::Error),
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub telegram: TelegramConfig,
    pub devices: DevicesConfig,
    pub rotation: Option<RotationConfig>,
    pub presence: Option<PresenceConfig>,
    pub assets_dir: Option<String>,
    pub antenna_list: Option<String>,
    pub lightning_map_url: Option<String>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(display.clone(), e))?;
        toml::de::from_str(&contents).map_err(|e| ConfigError::Parse(display, e))
    }

    pub fn assets_dir(&self) -> &str {
        self.assets_dir.as_deref().unwrap_or("assets")
    }

    pub fn lightning_map_url(&self) -> &str {
        self.lightning_map_url
            .as_deref()
            .unwrap_or(crate::flashes::DEFAULT_MAP_URL)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub keep_alive_seconds: Option<u64>,
    pub presence_topic: Option<String>,
    pub antenna_command_topic: Option<String>,
    pub antenna_result_topic: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: i64,
    pub api_url: Option<String>,
}

/// Host names or IP addresses of the station hardware.
#[derive(Deserialize, Debug, Clone)]
pub struct DevicesConfig {
    pub rotor: String,
    pub loop_rotor: String,
    pub webswitch: String,
    pub relay_channel: Option<u8>,
    pub request_timeout_seconds: Option<u64>,
}

impl DevicesConfig {
    pub fn relay_channel(&self) -> u8 {
        self.relay_channel.unwrap_or(1)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.unwrap_or(10))
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct RotationConfig {
    pub poll_interval_seconds: Option<u64>,
    pub max_attempts: Option<u32>,
}

impl RotationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.unwrap_or(2).max(1))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(90)
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct PresenceConfig {
    pub settle_delay_seconds: Option<u64>,
    pub announce_initial_state: Option<bool>,
}

impl PresenceConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_seconds.unwrap_or(3))
    }

    pub fn announce_initial_state(&self) -> bool {
        self.announce_initial_state.unwrap_or(true)
    }
}
