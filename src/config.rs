use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

/// Immutable, process-wide configuration snapshot derived from the
/// environment at startup (`spec.md` §6 Configuration).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,

    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,

    pub max_upload_size: u64,
    pub allowed_extensions: HashSet<String>,

    pub processing_timeout: Duration,
    pub max_concurrent_jobs: usize,

    pub file_retention_hours: i64,
    pub cleanup_interval_minutes: u64,

    pub log_level: String,
    pub json_logs: bool,

    pub cors_origins: Vec<String>,

    pub api_auth_enabled: bool,
    pub api_key_header: String,
    pub api_keys: HashMap<String, String>,

    pub default_start_at_layer: u32,
    pub default_extrusion_multiplier: f64,
    pub min_extrusion_multiplier: f64,
    pub max_extrusion_multiplier: f64,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    env_var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

/// Parses the `name1:hash1,name2:hash2` format used by `API_KEYS`.
fn parse_api_keys(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(name, hash)| (name.trim().to_string(), hash.trim().to_string()))
        .collect()
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let api_keys = env_var("API_KEYS").map(|raw| parse_api_keys(&raw)).unwrap_or_default();

        Self {
            host: env_var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: env_parsed("PORT", 8000u16),

            upload_dir: PathBuf::from(env_var("UPLOAD_DIR").unwrap_or_else(|| "temp/uploads".into())),
            output_dir: PathBuf::from(env_var("OUTPUT_DIR").unwrap_or_else(|| "temp/outputs".into())),

            max_upload_size: env_parsed("MAX_UPLOAD_SIZE", 50 * 1024 * 1024u64),
            allowed_extensions: env_var("ALLOWED_EXTENSIONS")
                .map(|v| v.split(',').map(|s| s.trim().to_lowercase()).collect())
                .unwrap_or_else(|| [".gcode", ".gco", ".g"].iter().map(|s| s.to_string()).collect()),

            processing_timeout: Duration::from_secs(env_parsed("PROCESSING_TIMEOUT", 900u64)),
            max_concurrent_jobs: env_parsed("MAX_CONCURRENT_JOBS", 5usize),

            file_retention_hours: env_parsed("FILE_RETENTION_HOURS", 24i64),
            cleanup_interval_minutes: env_parsed("CLEANUP_INTERVAL_MINUTES", 60u64),

            log_level: env_var("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            json_logs: env_bool("JSON_LOGS", false),

            cors_origins: env_var("CORS_ORIGINS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| vec!["*".into()]),

            api_auth_enabled: env_bool("API_AUTH_ENABLED", false),
            api_key_header: env_var("API_KEY_HEADER").unwrap_or_else(|| "X-API-Key".into()),
            api_keys,

            default_start_at_layer: 3,
            default_extrusion_multiplier: 1.05,
            min_extrusion_multiplier: 1.0,
            max_extrusion_multiplier: 1.2,
        }
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.upload_dir)?;
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }
}
