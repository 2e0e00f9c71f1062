//! Bridge configuration settings

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main bridge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
}

/// Bridge identity and proxying policy
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSettings {
    /// Name the monitoring connection declares on each hub
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Description the monitoring connection declares
    #[serde(default = "default_client_description")]
    pub client_description: String,
    /// Proxy a hub's own administrative client onto remote hubs
    ///
    /// Policy switch, off by default: the hub's own client is rarely worth
    /// talking to from another hub.
    #[serde(default)]
    pub proxy_admin_client: bool,
}

fn default_client_name() -> String {
    "bridge".to_string()
}

fn default_client_description() -> String {
    "Forwards clients between message hubs".to_string()
}

impl Default for BridgeSettings {
    fn default() -> Self {
        BridgeSettings {
            client_name: default_client_name(),
            client_description: default_client_description(),
            proxy_admin_client: false,
        }
    }
}

/// Client registry settings
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySettings {
    /// How long an out-of-order event waits for its registration, in
    /// milliseconds
    #[serde(default = "default_pending_expiry_ms")]
    pub pending_expiry_ms: u64,
}

fn default_pending_expiry_ms() -> u64 {
    10_000
}

impl RegistrySettings {
    /// The pending-operation expiry window
    pub fn pending_expiry(&self) -> Duration {
        Duration::from_millis(self.pending_expiry_ms)
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        RegistrySettings {
            pending_expiry_ms: default_pending_expiry_ms(),
        }
    }
}

impl Settings {
    /// Load settings from file and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load settings from a specific config file path (without extension)
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("bridge.client_name", default_client_name())?
            .set_default("bridge.client_description", default_client_description())?
            .set_default("bridge.proxy_admin_client", false)?
            .set_default("registry.pending_expiry_ms", default_pending_expiry_ms() as i64)?
            // Add config file if it exists
            .add_source(File::with_name(config_path.to_str().unwrap_or("config")).required(false))
            // Add environment variables with prefix HUB_BRIDGE_
            .add_source(Environment::with_prefix("HUB_BRIDGE").separator("__"));

        builder.build()?.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bridge: BridgeSettings::default(),
            registry: RegistrySettings::default(),
        }
    }
}
