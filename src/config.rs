use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alert::DEFAULT_ALERT_TEXT;
use crate::delivery::WebPushConfig;
use crate::dispatcher::DispatcherConfig;
use crate::error::ConfigError;

/// Where subscriptions are persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local; lost on restart.
    Memory,
    Redis {
        #[serde(default = "default_redis_url")]
        url: String,
        #[serde(default)]
        namespace: Option<String>,
    },
    Postgres {
        url: String,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Redis {
            url: default_redis_url(),
            namespace: None,
        }
    }
}

pub fn default_redis_url() -> String {
    "redis://redis:6379".to_string()
}

/// Push delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default)]
    pub vapid_private_key: Option<String>,

    #[serde(default = "default_vapid_subject")]
    pub vapid_subject: String,

    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_vapid_subject() -> String {
    "mailto:admin@localhost".to_string()
}

fn default_ttl_secs() -> u32 {
    86_400
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            vapid_private_key: None,
            vapid_subject: default_vapid_subject(),
            ttl_secs: default_ttl_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl PushConfig {
    pub fn web_push(&self) -> WebPushConfig {
        WebPushConfig {
            vapid_private_key: self.vapid_private_key.clone(),
            vapid_subject: self.vapid_subject.clone(),
            ttl: self.ttl_secs,
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
        }
    }
}

/// Broadcast settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default = "default_message")]
    pub default_message: String,
}

fn default_max_in_flight() -> usize {
    100
}

fn default_message() -> String {
    DEFAULT_ALERT_TEXT.to_string()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            default_message: default_message(),
        }
    }
}

impl DispatchConfig {
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_in_flight: self.max_in_flight,
            default_message: self.default_message.clone(),
        }
    }
}

/// Top-level server configuration, usually loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory with the browser client (index.html, service-worker.js).
    #[serde(default)]
    pub static_dir: Option<PathBuf>,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub push: PushConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3003
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            static_dir: None,
            store: StoreConfig::default(),
            push: PushConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
