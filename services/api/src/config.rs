//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development. Credentials for the hosted services are
//! only ever read from here, never compiled in.

use plantai_core::MAX_FREE_CREDITS;
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_api_base: String,
    pub max_free_credits: u32,
    pub jpeg_quality: u8,
    pub max_upload_bytes: usize,
    pub allowed_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| lookup(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()));
        let or_default = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        // --- Server and Database Settings ---
        let bind_address_str = or_default("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = required("DATABASE_URL")?;

        let log_level_str = or_default("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Hosted Auth ---
        let supabase_url = required("SUPABASE_URL")?.trim_end_matches('/').to_string();
        let supabase_anon_key = required("SUPABASE_ANON_KEY")?;

        // --- Inference (key is optional here, the server refuses to start without it) ---
        let gemini_api_key = lookup("GEMINI_API_KEY").filter(|k| !k.trim().is_empty());
        let gemini_model = or_default("GEMINI_MODEL", "gemini-3-flash-preview");
        let gemini_api_base = or_default("GEMINI_API_BASE", "https://generativelanguage.googleapis.com")
            .trim_end_matches('/')
            .to_string();

        // --- Entitlement and Upload Limits ---
        let max_free_credits = parse_var(&lookup, "MAX_FREE_CREDITS", MAX_FREE_CREDITS)?;
        let jpeg_quality: u8 = parse_var(&lookup, "JPEG_QUALITY", 85)?;
        if !(1..=100).contains(&jpeg_quality) {
            return Err(ConfigError::InvalidValue(
                "JPEG_QUALITY".to_string(),
                format!("{} is outside 1-100", jpeg_quality),
            ));
        }
        let max_upload_bytes = parse_var(&lookup, "MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?;
        let allowed_origin = or_default("ALLOWED_ORIGIN", "http://localhost:3000");

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            supabase_url,
            supabase_anon_key,
            gemini_api_key,
            gemini_model,
            gemini_api_base,
            max_free_credits,
            jpeg_quality,
            max_upload_bytes,
            allowed_origin,
        })
    }
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("DATABASE_URL", "postgres://localhost/plantai"),
        ("SUPABASE_URL", "https://demo.supabase.co/"),
        ("SUPABASE_ANON_KEY", "anon"),
    ];

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.supabase_url, "https://demo.supabase.co");
        assert_eq!(config.max_free_credits, 3);
        assert_eq!(config.jpeg_quality, 85);
        assert_eq!(config.gemini_model, "gemini-3-flash-preview");
        assert!(config.gemini_api_key.is_none());
    }

    #[test]
    fn missing_database_url_is_reported() {
        let err = Config::from_lookup(lookup(&REQUIRED[1..])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(name) if name == "DATABASE_URL"));
    }

    #[test]
    fn out_of_range_jpeg_quality_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("JPEG_QUALITY", "0"));
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(name, _) if name == "JPEG_QUALITY"));
    }

    #[test]
    fn credit_quota_is_overridable() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("MAX_FREE_CREDITS", "5"));
        vars.push(("GEMINI_API_KEY", "key"));
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.max_free_credits, 5);
        assert_eq!(config.gemini_api_key.as_deref(), Some("key"));
    }
}
