use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the videos service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Upload handling configuration
    #[serde(default)]
    pub upload: UploadConfig,
    /// Video management behaviour
    #[serde(default)]
    pub videos: VideosConfig,
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

/// S3-compatible object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding guide videos and json files
    pub bucket: String,
    /// Region passed to the SDK
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (NCloud, MinIO, LocalStack, ...)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Base of the public object URLs; bucket and key are appended
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Upload handling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Directory for temporary copies of uploaded files (system temp dir if unset)
    pub temp_dir: Option<PathBuf>,
    /// Maximum multipart request body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// How a two-ord swap treats the case where both ords are taken
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SwapPolicy {
    /// Only the first ord's row moves; the second row keeps its ord
    #[default]
    Literal,
    /// Both rows exchange ords in one transaction
    Symmetric,
}

/// Video management behaviour
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideosConfig {
    #[serde(default)]
    pub swap_policy: SwapPolicy,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "rehab-videos".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "kr-standard".to_string()
}

fn default_public_base_url() -> String {
    "https://kr.object.ncloudstorage.com".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_max_upload_bytes() -> usize {
    200 * 1024 * 1024 // 200MB
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "rehab-videos")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/videos").required(false))
            .add_source(config::File::with_name("/etc/rehab/videos").required(false))
            // VIDEOS__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("VIDEOS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl DatabaseConfig {
    /// Pool acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Idle connection timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl UploadConfig {
    /// Directory where temporary upload copies are written
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
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

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            max_upload_bytes: default_max_upload_bytes(),
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
