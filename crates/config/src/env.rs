use fieldsync_common::error::{FieldsyncError, FieldsyncResult};
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub log_level: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> FieldsyncResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            log_level: get_var_or("LOG_LEVEL", "info"),
        })
    }
}

pub(crate) fn get_var(key: &str) -> FieldsyncResult<String> {
    env::var(key).map_err(|_| FieldsyncError::Config(format!("{key} is required but not set")))
}

pub(crate) fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Read an optional, non-blank variable.
pub fn get_opt_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Parse a variable, falling back to `default` when unset.
/// A set-but-unparseable value is a configuration error rather than a silent default.
pub fn parse_var_or<T>(key: &str, default: T) -> FieldsyncResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_opt_var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| FieldsyncError::Config(format!("invalid {key}: {e}"))),
        None => Ok(default),
    }
}
