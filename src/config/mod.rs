use serde::Deserialize;

pub use crate::bridge::BackboneConfig;
pub use crate::registry::SlowConsumerPolicy;

/// Complete windsock configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WindsockConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backbone: BackboneConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// HTTP/WebSocket listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:4000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Snapshot broadcast and entity expiry tuning
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Snapshot cadence (seconds between ticks)
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Silence window after which an entity is considered gone (seconds)
    #[serde(default = "default_entity_expiry_seconds")]
    pub entity_expiry_seconds: u64,
}

fn default_interval_seconds() -> u64 {
    1
}

fn default_entity_expiry_seconds() -> u64 {
    60
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            entity_expiry_seconds: default_entity_expiry_seconds(),
        }
    }
}

/// Per-connection limits
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Bounded outbound queue capacity (frames)
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Join authorization timeout budget (seconds)
    #[serde(default = "default_join_timeout_seconds")]
    pub join_timeout_seconds: u64,
    /// What to do when a connection's outbound queue overflows
    #[serde(default)]
    pub slow_consumer_policy: SlowConsumerPolicy,
}

fn default_outbound_queue_capacity() -> usize {
    64
}

fn default_join_timeout_seconds() -> u64 {
    5
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            join_timeout_seconds: default_join_timeout_seconds(),
            slow_consumer_policy: SlowConsumerPolicy::default(),
        }
    }
}

/// Join authorization configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// When false, every join is granted and identity falls back to the
    /// connection id.
    #[serde(default)]
    pub enabled: bool,
    /// Bearer token required for POST /api/admin/publish. None = endpoint open.
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Static token -> identity table consumed by TokenAuthorizer
    #[serde(default)]
    pub tokens: std::collections::HashMap<String, String>,
}

impl Default for WindsockConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backbone: BackboneConfig::default(),
            broadcast: BroadcastConfig::default(),
            connection: ConnectionConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<WindsockConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: WindsockConfig = toml::from_str(&contents)?;
    Ok(config)
}
