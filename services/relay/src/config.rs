use serde::Deserialize;

/// Main configuration for the relay service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Relay behaviour
    #[serde(default)]
    pub relay: RelayConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Relay behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Messages queued per connection before further ones are dropped
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

/// HTTP/WebSocket listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// Listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_service_name() -> String {
    "rehab-relay".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8443
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/relay").required(false))
            .add_source(config::File::with_name("/etc/rehab/relay").required(false))
            // RELAY__RELAY__OUTBOUND_BUFFER -> relay.outbound_buffer
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}
