//! # Configuration Management
//!
//! Centralized configuration for the transit library.
//!
//! This module provides structured configuration for node identity, the
//! transport backend, gossip and discovery periods, and liveness timing.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides
//!
//! ## Tuning Considerations
//! - `heartbeat_timeout` must dominate `heartbeat_interval` or every broker
//!   peer flaps offline between beacons
//! - `offline_timeout` bounds how long a dead peer stays in the table and
//!   therefore how long gossip keeps trying to resurrect it
//! - A static `urls` list pins membership: discovery and eviction are
//!   disabled so the bootstrap set can never be forgotten

use crate::core::codec::DEFAULT_MAX_PACKET_SIZE;
use crate::core::serialization::WireFormat;
use crate::error::{Result, TransitError};
use crate::mesh::table::SeedPeer;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default channel prefix (the cluster namespace)
pub const DEFAULT_PREFIX: &str = "mesh";

/// Default discovery multicast group
pub const DEFAULT_MULTICAST_HOST: &str = "230.0.0.0";

/// Default discovery multicast port
pub const DEFAULT_MULTICAST_PORT: u16 = 4445;

/// Main transit configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TransitConfig {
    /// Node identity configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Transport backend configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Gossip engine configuration
    #[serde(default)]
    pub gossip: GossipConfig,

    /// UDP discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Heartbeat and timeout configuration
    #[serde(default)]
    pub timing: TimingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TransitConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| TransitError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| TransitError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| TransitError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Start with defaults
        let mut config = Self::default();

        // Override with environment variables
        if let Ok(node_id) = std::env::var("MESH_TRANSIT_NODE_ID") {
            config.node.node_id = node_id;
        }

        if let Ok(prefix) = std::env::var("MESH_TRANSIT_PREFIX") {
            config.node.prefix = prefix;
        }

        if let Ok(port) = std::env::var("MESH_TRANSIT_PORT") {
            if let Ok(val) = port.parse::<u16>() {
                config.transport.port = val;
            }
        }

        if let Ok(urls) = std::env::var("MESH_TRANSIT_URLS") {
            config.transport.urls = urls
                .split(',')
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect();
        }

        if let Ok(period) = std::env::var("MESH_TRANSIT_GOSSIP_PERIOD_MS") {
            if let Ok(val) = period.parse::<u64>() {
                config.gossip.period = Duration::from_millis(val);
            }
        }

        if let Ok(interval) = std::env::var("MESH_TRANSIT_HEARTBEAT_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.timing.heartbeat_interval = Duration::from_millis(val);
            }
        }

        // Add more environment variables as needed

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TransitError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| TransitError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // Validate node identity
        errors.extend(self.node.validate());

        // Validate transport configuration
        errors.extend(self.transport.validate());

        // Validate gossip configuration
        errors.extend(self.gossip.validate());

        // Validate discovery configuration
        errors.extend(self.discovery.validate());

        // Validate timing configuration
        errors.extend(self.timing.validate());

        // Validate logging configuration
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TransitError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Node identity configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Unique node identifier within the cluster (may contain dots)
    pub node_id: String,

    /// Channel prefix shared by every node of the cluster
    pub prefix: String,

    /// Log every sent/received packet at debug level
    pub debug_packets: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: format!("node-{}", std::process::id()),
            prefix: String::from(DEFAULT_PREFIX),
            debug_packets: false,
        }
    }
}

impl NodeConfig {
    /// Validate node identity configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.node_id.is_empty() {
            errors.push("Node id cannot be empty".to_string());
        } else if self.node_id.len() > 256 {
            errors.push(format!(
                "Node id too long: {} characters (maximum: 256)",
                self.node_id.len()
            ));
        }

        if self.prefix.is_empty() {
            errors.push("Channel prefix cannot be empty".to_string());
        } else if self.prefix.contains('.') {
            errors.push(format!(
                "Channel prefix must not contain '.': '{}'",
                self.prefix
            ));
        }

        errors
    }
}

/// Transport backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// TCP listen port (0 = pick a free port)
    pub port: u16,

    /// Address advertised to peers in info blocks and hellos
    pub host: String,

    /// Static peer URLs (`tcp://host:port/nodeID`). A non-empty list pins
    /// membership: UDP discovery and offline eviction are disabled.
    #[serde(default)]
    pub urls: Vec<String>,

    /// Payload serialization format: "bincode", "json" or "msgpack"
    pub format: String,

    /// Maximum allowed packet size in bytes (frame header included)
    pub max_packet_size: usize,

    /// Maximum pooled outbound connections
    pub max_connections: usize,

    /// Idle time before a pooled outbound connection is reaped (0 = never)
    #[serde(with = "duration_serde")]
    pub keep_alive: Duration,

    /// Delay between reconnect attempts after a failed connect
    #[serde(with = "duration_serde")]
    pub reconnect_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 0,
            host: String::from("127.0.0.1"),
            urls: Vec::new(),
            format: String::from("bincode"),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            max_connections: 128,
            keep_alive: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl TransportConfig {
    /// Parsed wire format
    pub fn wire_format(&self) -> Result<WireFormat> {
        WireFormat::from_name(&self.format)
            .ok_or_else(|| TransitError::ConfigError(format!("Unknown format: {}", self.format)))
    }

    /// Parsed static peer list
    pub fn seed_peers(&self) -> Result<Vec<SeedPeer>> {
        self.urls.iter().map(|u| u.parse()).collect()
    }

    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.is_empty() {
            errors.push("Advertised host cannot be empty".to_string());
        }

        if WireFormat::from_name(&self.format).is_none() {
            errors.push(format!(
                "Unknown serialization format: '{}' (expected: bincode, json or msgpack)",
                self.format
            ));
        }

        // Validate max packet size
        if self.max_packet_size < 1024 {
            errors.push("Max packet size too small (minimum: 1 KB)".to_string());
        } else if self.max_packet_size > 256 * 1024 * 1024 {
            errors.push(format!(
                "Max packet size too large: {} bytes (maximum: 256 MB)",
                self.max_packet_size
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        }

        if self.reconnect_delay.as_millis() < 10 {
            errors.push("Reconnect delay too short (minimum: 10ms)".to_string());
        } else if self.reconnect_delay.as_secs() > 300 {
            errors.push("Reconnect delay too long (maximum: 300s)".to_string());
        }

        // Validate static peer URLs
        for url in &self.urls {
            if let Err(e) = url.parse::<SeedPeer>() {
                errors.push(format!("Invalid peer URL '{url}': {e}"));
            }
        }

        errors
    }
}

/// Gossip engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GossipConfig {
    /// Interval between anti-entropy rounds
    #[serde(with = "duration_serde")]
    pub period: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(2),
        }
    }
}

impl GossipConfig {
    /// Validate gossip configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.period.as_millis() < 100 {
            errors.push("Gossip period too short (minimum: 100ms)".to_string());
        } else if self.period.as_secs() > 60 {
            errors.push("Gossip period too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// UDP discovery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Whether the UDP locator runs at all (ignored when `urls` is set)
    pub enabled: bool,

    /// Multicast group address
    pub multicast_host: String,

    /// Multicast port
    pub multicast_port: u16,

    /// Interval between hello beacons
    #[serde(with = "duration_serde")]
    pub period: Duration,

    /// Stop the beacon after this many packets (0 = run forever)
    pub max_packets: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            multicast_host: String::from(DEFAULT_MULTICAST_HOST),
            multicast_port: DEFAULT_MULTICAST_PORT,
            period: Duration::from_secs(30),
            max_packets: 0,
        }
    }
}

impl DiscoveryConfig {
    /// Validate discovery configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match self.multicast_host.parse::<std::net::Ipv4Addr>() {
            Ok(addr) => {
                if !addr.is_multicast() {
                    errors.push(format!(
                        "Discovery group is not a multicast address: '{}'",
                        self.multicast_host
                    ));
                }
            }
            Err(_) => errors.push(format!(
                "Invalid multicast address: '{}'",
                self.multicast_host
            )),
        }

        if self.multicast_port == 0 {
            errors.push("Multicast port cannot be 0".to_string());
        }

        if self.period.as_secs() < 1 {
            errors.push("Discovery period too short (minimum: 1s)".to_string());
        }

        errors
    }
}

/// Heartbeat and timeout configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingConfig {
    /// Interval between heartbeat beacons (broker backends)
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// Silence after which an online peer is marked offline
    #[serde(with = "duration_serde")]
    pub heartbeat_timeout: Duration,

    /// Offline time after which a peer is evicted from the table
    #[serde(with = "duration_serde")]
    pub offline_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(30),
            offline_timeout: Duration::from_secs(180),
        }
    }
}

impl TimingConfig {
    /// Validate timing configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.heartbeat_interval.as_millis() < 100 {
            errors.push("Heartbeat interval too short (minimum: 100ms)".to_string());
        } else if self.heartbeat_interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        if self.heartbeat_timeout <= self.heartbeat_interval {
            errors.push("Heartbeat timeout must exceed the heartbeat interval".to_string());
        }

        if self.offline_timeout <= self.heartbeat_timeout {
            errors.push("Offline timeout must exceed the heartbeat timeout".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("mesh-transit"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // Validate app name
        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        // Validate file logging configuration
        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                // Check if parent directory exists (if path is absolute)
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        // Validate at least one output is enabled
        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
