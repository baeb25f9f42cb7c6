//! Configuration module
//!
//! Every setting is read from the environment once at startup (after loading a
//! `.env` file if present) and then injected into the components that need it.
//! Nothing below the binary reads process state on its own.

use std::env;
use std::time::Duration;

use crate::constants;
use crate::storage_types::StorageBackend;

const DEFAULT_PORT: u16 = 4000;
const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const MAX_ARTIFACT_SIZE_MB: usize = 20;
const REPLICATE_REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_CONCURRENT_RUNS: usize = 4;
const LEASE_TTL_SECS: u64 = 300;
const RECOVERY_INTERVAL_SECS: u64 = 60;
const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Where generated artifacts are stored.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO, R2, ...)
    pub s3_endpoint: Option<String>,
    /// Public URL prefix for stored objects; defaults to the virtual-hosted bucket URL
    pub s3_public_base_url: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub max_artifact_size_bytes: usize,
}

/// Credentials and request shape for the image generation service.
#[derive(Clone, Debug)]
pub struct GenerationConfig {
    pub api_token: String,
    pub model_version: String,
    pub api_base: String,
    pub request_timeout_secs: u64,
    pub width: u32,
    pub height: u32,
}

/// Timing and concurrency of workflow runs.
#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub poll_interval_ms: u64,
    pub poll_timeout_ms: u64,
    pub max_concurrent_runs: usize,
    pub lease_ttl_secs: u64,
    pub recover_on_start: bool,
    /// How often to look for running checkpoints whose driver went away. 0 disables the sweep.
    pub recovery_interval_secs: u64,
    /// How long shutdown waits for in-flight runs.
    pub shutdown_grace_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: constants::POLL_INTERVAL_MS,
            poll_timeout_ms: constants::POLL_TIMEOUT_MS,
            max_concurrent_runs: MAX_CONCURRENT_RUNS,
            lease_ttl_secs: LEASE_TTL_SECS,
            recover_on_start: true,
            recovery_interval_secs: RECOVERY_INTERVAL_SECS,
            shutdown_grace_secs: SHUTDOWN_GRACE_SECS,
        }
    }
}

impl WorkflowConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn recovery_interval(&self) -> Option<Duration> {
        (self.recovery_interval_secs > 0).then(|| Duration::from_secs(self.recovery_interval_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Upper bound on status polls for a full budget: ceil(timeout / interval).
    pub fn max_polls(&self) -> u64 {
        if self.poll_interval_ms == 0 {
            return 0;
        }
        self.poll_timeout_ms.div_ceil(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!(
                "THUMBNAIL_POLL_INTERVAL_MS must be greater than zero"
            ));
        }
        if self.poll_timeout_ms < self.poll_interval_ms {
            return Err(anyhow::anyhow!(
                "THUMBNAIL_POLL_TIMEOUT_MS must be at least THUMBNAIL_POLL_INTERVAL_MS"
            ));
        }
        if self.max_concurrent_runs == 0 {
            return Err(anyhow::anyhow!(
                "WORKFLOW_MAX_CONCURRENT_RUNS must be greater than zero"
            ));
        }
        // A lease must outlive the poll budget or a second run could take over mid-poll.
        if self.lease_ttl_secs.saturating_mul(1000) <= self.poll_timeout_ms {
            return Err(anyhow::anyhow!(
                "WORKFLOW_LEASE_TTL_SECS must exceed the poll timeout"
            ));
        }
        Ok(())
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    /// `text` or `json`
    pub log_format: String,
    pub server_port: u16,
    /// Allowed CORS origins; `*` allows any.
    pub cors_origins: Vec<String>,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub storage: StorageConfig,
    pub generation: GenerationConfig,
    pub workflow: WorkflowConfig,
}

fn env_or<T: std::str::FromStr + ToString>(key: &str, default: T) -> T {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse::<StorageBackend>()?,
            Err(_) => StorageBackend::S3,
        };

        let max_artifact_size_mb = env_or("MAX_ARTIFACT_SIZE_MB", MAX_ARTIFACT_SIZE_MB);

        let storage = StorageConfig {
            backend: storage_backend,
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            s3_public_base_url: env::var("S3_PUBLIC_BASE_URL").ok(),
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL").ok(),
            max_artifact_size_bytes: max_artifact_size_mb * 1024 * 1024,
        };

        let generation = GenerationConfig {
            api_token: env::var("REPLICATE_API_TOKEN")
                .map_err(|_| anyhow::anyhow!("REPLICATE_API_TOKEN must be set"))?,
            model_version: env::var("REPLICATE_MODEL_VERSION")
                .map_err(|_| anyhow::anyhow!("REPLICATE_MODEL_VERSION must be set"))?,
            api_base: env::var("REPLICATE_API_BASE")
                .unwrap_or_else(|_| constants::REPLICATE_API_BASE.to_string()),
            request_timeout_secs: env_or(
                "REPLICATE_REQUEST_TIMEOUT_SECS",
                REPLICATE_REQUEST_TIMEOUT_SECS,
            ),
            width: env_or("THUMBNAIL_WIDTH", constants::THUMBNAIL_WIDTH),
            height: env_or("THUMBNAIL_HEIGHT", constants::THUMBNAIL_HEIGHT),
        };

        let defaults = WorkflowConfig::default();
        let workflow = WorkflowConfig {
            poll_interval_ms: env_or("THUMBNAIL_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            poll_timeout_ms: env_or("THUMBNAIL_POLL_TIMEOUT_MS", defaults.poll_timeout_ms),
            max_concurrent_runs: env_or(
                "WORKFLOW_MAX_CONCURRENT_RUNS",
                defaults.max_concurrent_runs,
            ),
            lease_ttl_secs: env_or("WORKFLOW_LEASE_TTL_SECS", defaults.lease_ttl_secs),
            recover_on_start: env::var("WORKFLOW_RECOVER_ON_START")
                .unwrap_or_else(|_| "true".to_string())
                .to_lowercase()
                .parse()
                .unwrap_or(true),
            recovery_interval_secs: env_or(
                "WORKFLOW_RECOVERY_INTERVAL_SECS",
                defaults.recovery_interval_secs,
            ),
            shutdown_grace_secs: env_or(
                "WORKFLOW_SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace_secs,
            ),
        };

        Ok(Config {
            environment,
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            cors_origins: env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            server_port: env::var("PORT")
                .unwrap_or_else(|_| DEFAULT_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: env_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            storage,
            generation,
            workflow,
        })
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgresql://")
            && !self.database_url.starts_with("postgres://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.generation.api_token.trim().is_empty() {
            return Err(anyhow::anyhow!("REPLICATE_API_TOKEN must not be empty"));
        }
        if self.generation.model_version.trim().is_empty() {
            return Err(anyhow::anyhow!("REPLICATE_MODEL_VERSION must not be empty"));
        }
        if self.generation.width == 0 || self.generation.height == 0 {
            return Err(anyhow::anyhow!(
                "THUMBNAIL_WIDTH and THUMBNAIL_HEIGHT must be greater than zero"
            ));
        }

        match self.storage.backend {
            StorageBackend::S3 => {
                if self.storage.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.storage.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.storage.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.storage.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
            }
        }

        self.workflow.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> Config {
        Config {
            environment: "test".to_string(),
            log_format: "text".to_string(),
            cors_origins: vec!["*".to_string()],
            server_port: DEFAULT_PORT,
            database_url: "postgres://localhost/thumbsmith".to_string(),
            db_max_connections: MAX_CONNECTIONS,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            storage: StorageConfig {
                backend: StorageBackend::Local,
                s3_bucket: None,
                s3_region: None,
                s3_endpoint: None,
                s3_public_base_url: None,
                local_storage_path: Some("/tmp/thumbsmith".to_string()),
                local_storage_base_url: Some("http://localhost:4000/media".to_string()),
                max_artifact_size_bytes: MAX_ARTIFACT_SIZE_MB * 1024 * 1024,
            },
            generation: GenerationConfig {
                api_token: "r8_token".to_string(),
                model_version: "sdxl:1234".to_string(),
                api_base: constants::REPLICATE_API_BASE.to_string(),
                request_timeout_secs: REPLICATE_REQUEST_TIMEOUT_SECS,
                width: constants::THUMBNAIL_WIDTH,
                height: constants::THUMBNAIL_HEIGHT,
            },
            workflow: WorkflowConfig::default(),
        }
    }

    #[test]
    fn default_poll_budget_allows_forty_polls() {
        let workflow = WorkflowConfig::default();
        assert_eq!(workflow.max_polls(), 40);
        assert_eq!(workflow.poll_interval(), Duration::from_millis(1_500));
        assert_eq!(workflow.poll_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn valid_local_config_passes() {
        assert!(local_config().validate().is_ok());
    }

    #[test]
    fn rejects_non_postgres_database_url() {
        let mut config = local_config();
        config.database_url = "mysql://localhost/db".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn s3_backend_requires_bucket_and_region() {
        let mut config = local_config();
        config.storage.backend = StorageBackend::S3;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("S3_BUCKET"));

        config.storage.s3_bucket = Some("thumbs".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("S3_REGION"));

        config.storage.s3_region = Some("eu-west-1".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn lease_must_outlive_poll_budget() {
        let mut config = local_config();
        config.workflow.lease_ttl_secs = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_recovery_interval_disables_sweep() {
        let mut workflow = WorkflowConfig::default();
        assert_eq!(workflow.recovery_interval(), Some(Duration::from_secs(60)));
        workflow.recovery_interval_secs = 0;
        assert_eq!(workflow.recovery_interval(), None);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut workflow = WorkflowConfig::default();
        workflow.poll_interval_ms = 0;
        assert_eq!(workflow.max_polls(), 0);
        assert!(workflow.validate().is_err());
    }
}
