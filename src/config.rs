use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, read from environment variables with defaults.
/// All state lives under `~/.driftsync` unless `DATA_ROOT` points elsewhere.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_path: PathBuf,
    pub blob_root: PathBuf,
    pub reconcile_workers: usize,
    pub demand_interval: Duration,
    /// Promote chunk-chain validation failures from log-only to hard
    /// failures that skip the current-flag flip.
    pub enforce_chain_validation: bool,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_dir: PathBuf,
    pub log_max_files: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let data_root = std::env::var("DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_data_root());

        Self {
            port: env_parse("PORT", 9191),
            database_path: std::env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_root.join("meta.db")),
            blob_root: std::env::var("BLOB_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_root.join("blobs")),
            reconcile_workers: env_parse("RECONCILE_WORKERS", 10),
            demand_interval: Duration::from_millis(env_parse("DEMAND_INTERVAL_MS", 2000)),
            enforce_chain_validation: env_flag("ENFORCE_CHAIN_VALIDATION", false),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_to_file: env_flag("LOG_TO_FILE", true),
            log_dir: std::env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_root.join("logs")),
            log_max_files: env_parse("LOG_MAX_FILES", 5),
        }
    }

    fn default_data_root() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".driftsync")
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "TRUE" | "yes"),
        Err(_) => default,
    }
}
