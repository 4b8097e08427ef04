use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if a value is present but malformed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. Without it the in-memory store is used.
    pub database_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
    /// Base URL of a search-volume API. Without it volumes come from the offline estimator.
    pub volume_api_url: Option<String>,
    pub volume_api_key: Option<String>,
    pub volume_api_timeout_secs: u64,
    pub max_keywords_per_request: usize,
    pub seed_sample_volumes: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: optional_env("DATABASE_URL"),
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            volume_api_url: optional_env("VOLUME_API_URL"),
            volume_api_key: optional_env("VOLUME_API_KEY"),
            volume_api_timeout_secs: parse_env("VOLUME_API_TIMEOUT_SECS", 10)?,
            max_keywords_per_request: parse_env("MAX_KEYWORDS_PER_REQUEST", 50)?,
            seed_sample_volumes: parse_env("SEED_SAMPLE_VOLUMES", false)?,
        })
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has invalid value '{raw}'")),
        None => Ok(default),
    }
}
