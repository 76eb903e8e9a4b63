use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the image service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Detection thresholds
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Content policy keywords
    #[serde(default)]
    pub policy: PolicyConfig,
    /// PostgreSQL backend (absent = not registered)
    pub postgres: Option<PostgresConfig>,
    /// MongoDB backend (absent = not registered)
    pub mongo: Option<MongoConfig>,
    /// Exception reporting
    pub sentry: Option<SentryConfig>,
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
    /// Largest accepted multipart body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding uploaded images
    pub bucket: String,
    /// AWS region, shared with the detection client
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Host used when building public object URLs
    #[serde(default = "default_public_host")]
    pub public_host: String,
    /// Static access key; the default credential chain is used when absent
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Confidence thresholds, all strict greater-than
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_label_confidence")]
    pub label_min_confidence: f32,
    #[serde(default = "default_text_confidence")]
    pub text_min_confidence: f32,
    #[serde(default = "default_moderation_confidence")]
    pub moderation_min_confidence: f32,
}

/// Content policy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Reproduce the historical "any non-empty list matches" behavior
    #[serde(default)]
    pub legacy_keyword_matching: bool,
    #[serde(default = "default_moderation_keywords")]
    pub moderation_keywords: Vec<String>,
    #[serde(default = "default_error_keywords")]
    pub error_keywords: Vec<String>,
    #[serde(default = "default_bug_keywords")]
    pub bug_keywords: Vec<String>,
}

/// PostgreSQL configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
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

/// MongoDB configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    /// Connection string, e.g. mongodb+srv://user:pw@cluster/
    pub uri: String,
    #[serde(default = "default_mongo_database")]
    pub database: String,
    #[serde(default = "default_mongo_collection")]
    pub collection: String,
    #[serde(default = "default_max_connections")]
    pub max_pool_size: u32,
    #[serde(default = "default_min_connections")]
    pub min_pool_size: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Sentry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SentryConfig {
    pub dsn: Option<String>,
    pub environment: Option<String>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f32,
}

// Default value functions
fn default_service_name() -> String {
    "image-api".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    15 * 1024 * 1024 // Rekognition limit for S3-hosted images
}

fn default_region() -> String {
    "us-east-2".to_string()
}

fn default_public_host() -> String {
    "s3.amazonaws.com".to_string()
}

fn default_label_confidence() -> f32 {
    80.0
}

fn default_text_confidence() -> f32 {
    80.0
}

fn default_moderation_confidence() -> f32 {
    50.0
}

fn default_moderation_keywords() -> Vec<String> {
    vec!["suggestive".into(), "underwear".into(), "revealing".into()]
}

fn default_error_keywords() -> Vec<String> {
    vec!["error".into(), "errors".into()]
}

fn default_bug_keywords() -> Vec<String> {
    vec!["bug".into(), "insect".into()]
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_mongo_database() -> String {
    "Images".to_string()
}

fn default_mongo_collection() -> String {
    "vite_demo_images".to_string()
}

fn default_sample_rate() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from `.env`, config files and the environment
    pub fn load() -> anyhow::Result<Self> {
        // A missing .env is fine; real deployments inject the environment directly
        let _ = dotenv::dotenv();

        let config = config::Config::builder()
            .set_default("service.name", "image-api")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/images").required(false))
            .add_source(config::File::with_name("/etc/image-api/images").required(false))
            // IMAGES__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("IMAGES")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("api.cors_origins"),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Whether at least one persistence backend is configured
    pub fn has_backend(&self) -> bool {
        self.postgres.is_some() || self.mongo.is_some()
    }
}

impl PostgresConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
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

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            label_min_confidence: default_label_confidence(),
            text_min_confidence: default_text_confidence(),
            moderation_min_confidence: default_moderation_confidence(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            legacy_keyword_matching: false,
            moderation_keywords: default_moderation_keywords(),
            error_keywords: default_error_keywords(),
            bug_keywords: default_bug_keywords(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_label_confidence(), 80.0);
        assert_eq!(default_text_confidence(), 80.0);
        assert_eq!(default_moderation_confidence(), 50.0);
        assert_eq!(default_public_host(), "s3.amazonaws.com");
    }

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config = parse(
            r#"
            [s3]
            bucket = "gallery"

            [mongo]
            uri = "mongodb://localhost:27017"
            "#,
        );

        assert_eq!(config.s3.bucket, "gallery");
        assert_eq!(config.s3.region, "us-east-2");
        assert_eq!(config.api.port, 8080);
        assert!(!config.policy.legacy_keyword_matching);
        assert_eq!(config.policy.bug_keywords, vec!["bug", "insect"]);

        let mongo = config.mongo.as_ref().unwrap();
        assert_eq!(mongo.database, "Images");
        assert_eq!(mongo.collection, "vite_demo_images");

        assert!(config.postgres.is_none());
        assert!(config.has_backend());
    }

    #[test]
    fn test_no_backend_configured() {
        let config = parse(
            r#"
            [s3]
            bucket = "gallery"
            "#,
        );
        assert!(!config.has_backend());
    }

    #[test]
    fn test_postgres_timeouts() {
        let config = parse(
            r#"
            [s3]
            bucket = "gallery"

            [postgres]
            url = "postgres://localhost/images"
            connect_timeout_secs = 5
            "#,
        );

        let pg = config.postgres.unwrap();
        assert_eq!(pg.connect_timeout(), Duration::from_secs(5));
        assert_eq!(pg.idle_timeout(), Duration::from_secs(600));
        assert!(pg.run_migrations);
    }
}
