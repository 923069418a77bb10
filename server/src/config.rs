// Configuration constants for the server

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub engine_timeout_secs: u64,
    pub converter_timeout_secs: u64,
    pub output_ttl_secs: u64,
    pub engine_binary: PathBuf,
    pub converter_binary: PathBuf,
    pub voices_dir: PathBuf,
    pub voice_map: Option<PathBuf>,
    pub cache_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub output_dir: PathBuf,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            rate_limit_per_minute: 60,
            request_timeout_secs: 60,
            engine_timeout_secs: 30,
            converter_timeout_secs: 10,
            output_ttl_secs: 3600,
            engine_binary: PathBuf::from("/opt/piper/piper/piper"),
            converter_binary: PathBuf::from("sox"),
            voices_dir: PathBuf::from("/app/voices"),
            voice_map: None,
            cache_dir: PathBuf::from("/app/cache"),
            scratch_dir: PathBuf::from("/app/scratch"),
            output_dir: PathBuf::from("/app/output"),
            cors_allowed_origins: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| origins.split(',').map(|s| s.trim().to_string()).collect());

        Self {
            port: env_parse("PORT", defaults.port),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            engine_timeout_secs: env_parse("ENGINE_TIMEOUT_SECS", defaults.engine_timeout_secs),
            converter_timeout_secs: env_parse(
                "CONVERTER_TIMEOUT_SECS",
                defaults.converter_timeout_secs,
            ),
            output_ttl_secs: env_parse("OUTPUT_TTL_SECS", defaults.output_ttl_secs),
            engine_binary: env_path("ENGINE_BINARY", defaults.engine_binary),
            converter_binary: env_path("CONVERTER_BINARY", defaults.converter_binary),
            voices_dir: env_path("VOICES_DIR", defaults.voices_dir),
            voice_map: std::env::var("VOICE_MAP").ok().map(PathBuf::from),
            cache_dir: env_path("CACHE_DIR", defaults.cache_dir),
            scratch_dir: env_path("SCRATCH_DIR", defaults.scratch_dir),
            output_dir: env_path("OUTPUT_DIR", defaults.output_dir),
            cors_allowed_origins,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn converter_timeout(&self) -> Duration {
        Duration::from_secs(self.converter_timeout_secs)
    }

    /// Retention limit for files in the most-recent-outputs area.
    pub fn output_ttl(&self) -> Duration {
        Duration::from_secs(self.output_ttl_secs)
    }
}
