use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Identity announced to the relay. Generated at first start if unset.
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub call: CallSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_url")]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSettings {
    /// STUN servers handed to the transport engine for path discovery.
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
    /// Label of the application data channel.
    #[serde(default = "default_channel_label")]
    pub channel_label: String,
    /// A negotiation round that has not completed within this window is
    /// marked failed.
    #[serde(default = "default_negotiation_timeout_ms")]
    pub negotiation_timeout_ms: u64,
}

fn default_relay_url() -> String {
    "ws://127.0.0.1:9090".to_string()
}

fn default_stun_servers() -> Vec<String> {
    vec![
        "stun:23.21.150.121".to_string(),
        "stun:stun.l.google.com:19302".to_string(),
    ]
}

fn default_channel_label() -> String {
    "paircall-points".to_string()
}

fn default_negotiation_timeout_ms() -> u64 {
    30_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
        }
    }
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            stun_servers: default_stun_servers(),
            channel_label: default_channel_label(),
            negotiation_timeout_ms: default_negotiation_timeout_ms(),
        }
    }
}

impl Config {
    /// Load config from the default path, creating it with defaults on first
    /// start.
    pub fn load() -> Result<Self> {
        Self::load_from(get_config_path())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let content = fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(get_config_path())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Get the paircall directory (~/.paircall)
pub fn get_paircall_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".paircall")
}

/// Get the config file path (~/.paircall/config.toml)
pub fn get_config_path() -> PathBuf {
    get_paircall_dir().join("config.toml")
}

/// Generate a random identity for nodes that have none configured.
pub fn generate_identity() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..12)
        .map(|_| char::from_digit(rng.gen_range(0..36), 36).unwrap())
        .collect();
    format!("peer-{suffix}")
}
