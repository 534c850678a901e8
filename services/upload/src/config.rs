use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Smallest part size S3 accepts for every part but the last.
const S3_MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Longest validity SigV4 presigned URLs accept (7 days).
const S3_MAX_PRESIGN_EXPIRY_SECS: u64 = 7 * 24 * 3600;

/// Main configuration for the upload service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Upload limits and staging
    #[serde(default)]
    pub upload: UploadConfig,
    /// External media tools
    #[serde(default)]
    pub media: MediaToolsConfig,
    /// Database configuration
    pub database: DatabaseConfig,
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

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for published media
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
    /// Files larger than this are sent as a multipart upload
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Limits and staging location for inbound bodies
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum accepted video body in bytes
    #[serde(default = "default_max_video_bytes")]
    pub max_video_bytes: u64,
    /// Maximum accepted thumbnail body in bytes
    #[serde(default = "default_max_thumbnail_bytes")]
    pub max_thumbnail_bytes: u64,
    /// Directory for temporary files (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,
}

/// Paths and limits for the ffprobe/ffmpeg child processes
#[derive(Debug, Clone, Deserialize)]
pub struct MediaToolsConfig {
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Maximum number of tool processes running at once
    #[serde(default = "default_tool_concurrency")]
    pub tool_concurrency: usize,
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
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// API configuration
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
    "upload-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    300
}

fn default_multipart_threshold() -> usize {
    64 * 1024 * 1024 // 64MB
}

fn default_part_size() -> usize {
    16 * 1024 * 1024 // 16MB
}

fn default_max_video_bytes() -> u64 {
    1 << 30 // 1GiB
}

fn default_max_thumbnail_bytes() -> u64 {
    10 << 20 // 10MiB
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_tool_concurrency() -> usize {
    4
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
            .set_default("service.name", "upload-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/upload").required(false))
            .add_source(config::File::with_name("/etc/vidstash/upload").required(false))
            // UPLOAD__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("UPLOAD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would only fail later, mid-request
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.s3.bucket.trim().is_empty() {
            anyhow::bail!("s3.bucket must not be empty");
        }
        if self.s3.bucket.contains(',') {
            anyhow::bail!("s3.bucket must not contain ','");
        }
        if self.s3.part_size_bytes < S3_MIN_PART_SIZE {
            anyhow::bail!(
                "s3.part_size_bytes must be at least {} bytes",
                S3_MIN_PART_SIZE
            );
        }
        if self.upload.max_video_bytes == 0 || self.upload.max_thumbnail_bytes == 0 {
            anyhow::bail!("upload size caps must be greater than zero");
        }
        if self.media.tool_concurrency == 0 {
            anyhow::bail!("media.tool_concurrency must be greater than zero");
        }
        if self.s3.presigned_url_expiry_secs == 0
            || self.s3.presigned_url_expiry_secs > S3_MAX_PRESIGN_EXPIRY_SECS
        {
            anyhow::bail!(
                "s3.presigned_url_expiry_secs must be between 1 and {}",
                S3_MAX_PRESIGN_EXPIRY_SECS
            );
        }
        Ok(())
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.presigned_url_expiry_secs)
    }

    /// Temporary directory for landed and remuxed files
    pub fn temp_dir(&self) -> PathBuf {
        self.upload
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
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
            max_video_bytes: default_max_video_bytes(),
            max_thumbnail_bytes: default_max_thumbnail_bytes(),
            temp_dir: None,
        }
    }
}

impl Default for MediaToolsConfig {
    fn default() -> Self {
        Self {
            ffprobe_path: default_ffprobe_path(),
            ffmpeg_path: default_ffmpeg_path(),
            tool_concurrency: default_tool_concurrency(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}
