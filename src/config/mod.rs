//! Configuration management
//!
//! Layered with the `config` crate: struct defaults, then an optional TOML
//! file, then `WEBPHONE_*` environment variables (`__` separates sections,
//! e.g. `WEBPHONE_ACCOUNT__ADDRESS`).

use crate::application::dispatch::DEFAULT_EVENT_CAPACITY;
use crate::domain::shared::{PhoneError, Result};
use crate::infrastructure::engine::LoopbackConfig;
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub account: AccountConfig,
    pub phone: PhoneConfig,
    pub logging: LoggingConfig,
    pub loopback: LoopbackConfig,
}

/// The identity tuple
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// SIP address, with or without the `sip:` scheme
    pub address: String,
    pub password: String,
    /// `ws://` or `wss://` URL of the SIP server
    pub ws_server: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            address: "alice@example.com".to_string(),
            password: String::new(),
            ws_server: "wss://sip.example.com/ws".to_string(),
        }
    }
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("address", &self.address)
            .field("password", &"****")
            .field("ws_server", &self.ws_server)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneConfig {
    /// Start registration as soon as the phone is connected
    pub register_on_connect: bool,
    /// Observer channel capacity
    pub event_capacity: usize,
    /// Engine event queue capacity
    pub engine_queue: usize,
    /// Offer video on outbound calls by default
    pub default_video: bool,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            register_on_connect: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            engine_queue: 128,
            default_video: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Defaults, then `path` (TOML) if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        builder
            .add_source(
                Environment::with_prefix("WEBPHONE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| PhoneError::Config(e.to_string()))
    }

    /// Parse an inline TOML document over the defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        config::Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| PhoneError::Config(e.to_string()))
    }
}
