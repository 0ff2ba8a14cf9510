use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Load environment-specific file (e.g., development.toml, production.toml)
            .add_source(
                File::with_name(&format!("config/{}", run_mode))
                    .format(FileFormat::Toml)
                    .required(true),
            )
            // Add environment variables (e.g., APP_API__CLIENT_ID=...)
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineSettings {
    #[serde(default = "default_max_concurrent_reports")]
    pub max_concurrent_reports: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_completed_job_ttl_seconds")]
    pub completed_job_ttl_seconds: u64,
    #[serde(default = "default_fast_return_threshold_ms")]
    pub fast_return_threshold_ms: u64,
    #[serde(default = "default_job_timeout_seconds")]
    pub job_timeout_seconds: u64,
    #[serde(default = "default_max_inflight_per_job")]
    pub max_inflight_per_job: usize,
    #[serde(default = "default_token_refresh_margin_seconds")]
    pub token_refresh_margin_seconds: u64,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_reports: default_max_concurrent_reports(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            completed_job_ttl_seconds: default_completed_job_ttl_seconds(),
            fast_return_threshold_ms: default_fast_return_threshold_ms(),
            job_timeout_seconds: default_job_timeout_seconds(),
            max_inflight_per_job: default_max_inflight_per_job(),
            token_refresh_margin_seconds: default_token_refresh_margin_seconds(),
            page_limit: default_page_limit(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    #[serde(default = "default_log_directory")]
    pub directory: String,
    #[serde(default = "default_log_filename")]
    pub filename: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            filename: default_log_filename(),
            log_level: default_log_level(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.warcraftlogs.com".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_max_concurrent_reports() -> usize {
    2
}

fn default_cache_capacity() -> usize {
    64
}

fn default_cache_ttl_seconds() -> u64 {
    1800
}

fn default_completed_job_ttl_seconds() -> u64 {
    600
}

fn default_fast_return_threshold_ms() -> u64 {
    750
}

fn default_job_timeout_seconds() -> u64 {
    600
}

fn default_max_inflight_per_job() -> usize {
    4
}

fn default_token_refresh_margin_seconds() -> u64 {
    60
}

fn default_page_limit() -> u32 {
    10_000
}

fn default_log_directory() -> String {
    "logs".to_string()
}

fn default_log_filename() -> String {
    "raidlens.log".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults_match_documented_values() {
        let engine = EngineSettings::default();
        assert_eq!(engine.max_concurrent_reports, 2);
        assert_eq!(engine.cache_capacity, 64);
        assert_eq!(engine.cache_ttl_seconds, 1_800);
        assert_eq!(engine.completed_job_ttl_seconds, 600);
        assert_eq!(engine.fast_return_threshold_ms, 750);
        assert_eq!(engine.job_timeout_seconds, 600);
        assert_eq!(engine.max_inflight_per_job, 4);
        assert_eq!(engine.token_refresh_margin_seconds, 60);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let toml = r#"
            [api]
            client_id = "id"
            client_secret = "secret"
        "#;
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.api.base_url, "https://www.warcraftlogs.com");
        assert_eq!(settings.engine.max_concurrent_reports, 2);
        assert_eq!(settings.logging.log_level, "info");
    }
}
