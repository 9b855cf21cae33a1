//! Configuration module
//!
//! Typed configuration for the upload engine, loaded from environment variables
//! (optionally seeded from a `.env` file). Every section has sensible defaults so a
//! bare `Config::from_env()` yields a working local setup.

use std::env;
use std::path::PathBuf;

use crate::duration::parse_duration;
use crate::models::FileNameFormat;
use crate::storage_types::StorageBackend;

const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const SERVER_PORT: u16 = 3000;
const RETURN_URL: &str = "http://localhost:3000";
const FILE_NAME_LENGTH: usize = 6;
const MAX_FILE_SIZE_MB: u64 = 100;
const DATE_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const SESSION_TIMEOUT_SECS: u64 = 3600;
const LOCAL_STORAGE_PATH: &str = "./uploads";
const TASK_INTERVAL_SECS: u64 = 1800;
const PARTIAL_SWEEP_INTERVAL_SECS: u64 = 300;
const THUMBNAIL_THREADS: usize = 4;
const THUMBNAIL_QUEUE_CAPACITY: usize = 64;

/// Server, database and public URL settings.
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub environment: String,
    /// `None` selects the in-memory repository.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    /// Public base URL used to build links when no domain override is given.
    pub return_url: String,
}

/// Upload naming and validation defaults.
#[derive(Clone, Debug)]
pub struct FilesConfig {
    pub default_format: FileNameFormat,
    pub default_expiration: Option<chrono::Duration>,
    /// Length of generated random names.
    pub length: usize,
    pub max_file_size_bytes: u64,
    /// strftime pattern for the `date` name format.
    pub default_date_format: String,
}

/// Chunked upload session settings.
#[derive(Clone, Debug)]
pub struct ChunkConfig {
    pub temp_directory: PathBuf,
    pub session_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub local_storage_path: String,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    pub s3_force_path_style: bool,
    /// Prefix applied to every key on the backend.
    pub subdirectory: Option<String>,
}

/// Periods of the scheduled lifecycle tasks and thumbnail pool sizing.
#[derive(Clone, Debug)]
pub struct TasksConfig {
    pub delete_interval_secs: u64,
    pub max_views_interval_secs: u64,
    pub thumbnails_interval_secs: u64,
    pub metrics_interval_secs: u64,
    pub partial_sweep_interval_secs: u64,
    pub thumbnail_threads: usize,
    pub thumbnail_queue_capacity: usize,
    pub ffmpeg_path: String,
}

#[derive(Clone, Debug, Default)]
pub struct SkycloudConfig {
    pub base: BaseConfig,
    pub files: FilesConfig,
    pub chunks: ChunkConfig,
    pub storage: StorageConfig,
    pub tasks: TasksConfig,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<SkycloudConfig>);

impl Config {
    fn inner(&self) -> &SkycloudConfig {
        &self.0
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = SkycloudConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    pub fn is_production(&self) -> bool {
        matches!(
            self.inner().base.environment.to_lowercase().as_str(),
            "production" | "prod"
        )
    }

    pub fn server_port(&self) -> u16 {
        self.inner().base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.inner().base.environment
    }

    pub fn database_url(&self) -> Option<&str> {
        self.inner().base.database_url.as_deref()
    }

    pub fn db_max_connections(&self) -> u32 {
        self.inner().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.inner().base.db_timeout_seconds
    }

    pub fn return_url(&self) -> &str {
        &self.inner().base.return_url
    }

    pub fn files(&self) -> &FilesConfig {
        &self.inner().files
    }

    pub fn chunks(&self) -> &ChunkConfig {
        &self.inner().chunks
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.inner().storage
    }

    pub fn tasks(&self) -> &TasksConfig {
        &self.inner().tasks
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.inner().storage.backend
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.inner().files.max_file_size_bytes
    }
}

impl From<SkycloudConfig> for Config {
    fn from(config: SkycloudConfig) -> Self {
        Config(Box::new(config))
    }
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            server_port: SERVER_PORT,
            environment: "development".to_string(),
            database_url: None,
            db_max_connections: MAX_CONNECTIONS,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            return_url: RETURN_URL.to_string(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            default_format: FileNameFormat::Random,
            default_expiration: None,
            length: FILE_NAME_LENGTH,
            max_file_size_bytes: MAX_FILE_SIZE_MB * 1024 * 1024,
            default_date_format: DATE_FORMAT.to_string(),
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            temp_directory: env::temp_dir().join("skycloud"),
            session_timeout_secs: SESSION_TIMEOUT_SECS,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_storage_path: LOCAL_STORAGE_PATH.to_string(),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            s3_access_key_id: None,
            s3_secret_access_key: None,
            s3_force_path_style: false,
            subdirectory: None,
        }
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            delete_interval_secs: TASK_INTERVAL_SECS,
            max_views_interval_secs: TASK_INTERVAL_SECS,
            thumbnails_interval_secs: TASK_INTERVAL_SECS,
            metrics_interval_secs: TASK_INTERVAL_SECS,
            partial_sweep_interval_secs: PARTIAL_SWEEP_INTERVAL_SECS,
            thumbnail_threads: THUMBNAIL_THREADS,
            thumbnail_queue_capacity: THUMBNAIL_QUEUE_CAPACITY,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

/// Reads an optional variable, treating empty values as unset.
fn env_opt(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, anyhow::Error> {
    match env_opt(name) {
        Some(value) => value
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number, got '{}'", name, value)),
        None => Ok(default),
    }
}

impl SkycloudConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let base = BaseConfig {
            server_port: env_parse("PORT", SERVER_PORT)?,
            environment: env_opt("ENVIRONMENT")
                .or_else(|| env_opt("APP_ENV"))
                .unwrap_or_else(|| "development".to_string()),
            database_url: env_opt("DATABASE_URL"),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", MAX_CONNECTIONS)?,
            db_timeout_seconds: env_parse("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS)?,
            return_url: env_opt("CORE_RETURN_URL")
                .unwrap_or_else(|| RETURN_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        };

        let default_format = match env_opt("FILES_DEFAULT_FORMAT") {
            Some(value) => value.parse()?,
            None => FileNameFormat::Random,
        };

        let default_expiration = match env_opt("FILES_DEFAULT_EXPIRATION") {
            Some(value) => Some(parse_duration(&value).ok_or_else(|| {
                anyhow::anyhow!("FILES_DEFAULT_EXPIRATION is not a valid duration: {}", value)
            })?),
            None => None,
        };

        let files = FilesConfig {
            default_format,
            default_expiration,
            length: env_parse("FILES_LENGTH", FILE_NAME_LENGTH)?,
            max_file_size_bytes: env_parse("FILES_MAX_FILE_SIZE_MB", MAX_FILE_SIZE_MB)?
                * 1024
                * 1024,
            default_date_format: env_opt("FILES_DEFAULT_DATE_FORMAT")
                .unwrap_or_else(|| DATE_FORMAT.to_string()),
        };

        let chunks = ChunkConfig {
            temp_directory: env_opt("CHUNKS_TEMP_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("skycloud")),
            session_timeout_secs: env_parse("CHUNKS_SESSION_TIMEOUT_SECS", SESSION_TIMEOUT_SECS)?,
        };

        let backend = match env_opt("STORAGE_BACKEND") {
            Some(value) => value.to_lowercase().parse()?,
            None => StorageBackend::Local,
        };

        let storage = StorageConfig {
            backend,
            local_storage_path: env_opt("LOCAL_STORAGE_PATH")
                .unwrap_or_else(|| LOCAL_STORAGE_PATH.to_string()),
            s3_bucket: env_opt("S3_BUCKET"),
            s3_region: env_opt("S3_REGION").or_else(|| env_opt("AWS_REGION")),
            s3_endpoint: env_opt("S3_ENDPOINT"),
            s3_access_key_id: env_opt("S3_ACCESS_KEY_ID")
                .or_else(|| env_opt("AWS_ACCESS_KEY_ID")),
            s3_secret_access_key: env_opt("S3_SECRET_ACCESS_KEY")
                .or_else(|| env_opt("AWS_SECRET_ACCESS_KEY")),
            s3_force_path_style: env_opt("S3_FORCE_PATH_STYLE")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            subdirectory: env_opt("STORAGE_SUBDIRECTORY"),
        };

        let tasks = TasksConfig {
            delete_interval_secs: env_parse("TASKS_DELETE_INTERVAL_SECS", TASK_INTERVAL_SECS)?,
            max_views_interval_secs: env_parse("TASKS_MAX_VIEWS_INTERVAL_SECS", TASK_INTERVAL_SECS)?,
            thumbnails_interval_secs: env_parse(
                "TASKS_THUMBNAILS_INTERVAL_SECS",
                TASK_INTERVAL_SECS,
            )?,
            metrics_interval_secs: env_parse("TASKS_METRICS_INTERVAL_SECS", TASK_INTERVAL_SECS)?,
            partial_sweep_interval_secs: env_parse(
                "TASKS_PARTIAL_SWEEP_INTERVAL_SECS",
                PARTIAL_SWEEP_INTERVAL_SECS,
            )?,
            thumbnail_threads: env_parse("TASKS_THUMBNAIL_THREADS", THUMBNAIL_THREADS)?,
            thumbnail_queue_capacity: env_parse(
                "TASKS_THUMBNAIL_QUEUE_CAPACITY",
                THUMBNAIL_QUEUE_CAPACITY,
            )?,
            ffmpeg_path: env_opt("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
        };

        Ok(SkycloudConfig {
            base,
            files,
            chunks,
            storage,
            tasks,
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if let Some(url) = &self.base.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        }

        if !self.base.return_url.starts_with("http://")
            && !self.base.return_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!(
                "CORE_RETURN_URL must start with http:// or https://"
            ));
        }

        if self.files.length == 0 {
            return Err(anyhow::anyhow!("FILES_LENGTH must be greater than zero"));
        }

        if let Some(expiration) = self.files.default_expiration {
            if expiration <= chrono::Duration::zero() {
                return Err(anyhow::anyhow!(
                    "FILES_DEFAULT_EXPIRATION must be a positive duration"
                ));
            }
        }

        match self.storage.backend {
            StorageBackend::S3 => {
                if self.storage.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.storage.s3_region.is_none() && self.storage.s3_endpoint.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or S3_ENDPOINT must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.storage.local_storage_path.is_empty() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
            }
        }

        let intervals = [
            ("TASKS_DELETE_INTERVAL_SECS", self.tasks.delete_interval_secs),
            ("TASKS_MAX_VIEWS_INTERVAL_SECS", self.tasks.max_views_interval_secs),
            ("TASKS_THUMBNAILS_INTERVAL_SECS", self.tasks.thumbnails_interval_secs),
            ("TASKS_METRICS_INTERVAL_SECS", self.tasks.metrics_interval_secs),
            ("TASKS_PARTIAL_SWEEP_INTERVAL_SECS", self.tasks.partial_sweep_interval_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(anyhow::anyhow!("{} must be greater than zero", name));
        }

        if self.tasks.thumbnail_threads == 0 || self.tasks.thumbnail_queue_capacity == 0 {
            return Err(anyhow::anyhow!(
                "TASKS_THUMBNAIL_THREADS and TASKS_THUMBNAIL_QUEUE_CAPACITY must be greater than zero"
            ));
        }

        Ok(())
    }
}
