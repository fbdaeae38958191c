//! Configuration types, built from environment variables.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Signing secret used when `JWT_SECRET_KEY` is unset. Refused in production.
pub const DEV_JWT_SECRET: &str = "dev-secret-key-change-in-production";

/// Origin always allowed by CORS (local frontend).
pub const LOCAL_FRONTEND_ORIGIN: &str = "http://localhost:3000";

/// Token signing and verification settings.
#[derive(Debug)]
pub struct AuthConfig {
    pub jwt_secret: SecretString,
    /// Lifetime of issued tokens.
    pub token_ttl: Duration,
}

/// Fixed-window rate limiting settings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    /// Key clients by the first `X-Forwarded-For` hop instead of the peer
    /// address. Only safe behind a proxy that overwrites the header.
    pub trust_forwarded: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
            trust_forwarded: false,
        }
    }
}

/// Application configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub db_path: String,
    pub host: String,
    pub port: u16,
    /// `development`, `production`, ...
    pub environment: String,
    pub cors_origins: Vec<String>,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("TASKFLOW_DB_PATH").unwrap_or_else(|| "./data/taskflow.db".to_string());
        let host = lookup("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_or(&lookup, "API_PORT", 8000)?;
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let mut cors_origins: Vec<String> = lookup("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !cors_origins.iter().any(|o| o == LOCAL_FRONTEND_ORIGIN) {
            cors_origins.push(LOCAL_FRONTEND_ORIGIN.to_string());
        }

        let jwt_secret = lookup("JWT_SECRET_KEY").unwrap_or_else(|| DEV_JWT_SECRET.to_string());
        let ttl_minutes: u64 = parse_or(&lookup, "JWT_EXPIRATION_MINUTES", 10_080)?;

        let max_requests: u32 = parse_or(&lookup, "RATE_LIMIT_MAX_REQUESTS", 100)?;
        let window_secs: u64 = parse_or(&lookup, "RATE_LIMIT_WINDOW_SECS", 60)?;
        let trust_forwarded: bool = parse_or(&lookup, "RATE_LIMIT_TRUST_FORWARDED", false)?;
        if max_requests == 0 || window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_MAX_REQUESTS/RATE_LIMIT_WINDOW_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            db_path,
            host,
            port,
            environment,
            cors_origins,
            auth: AuthConfig {
                jwt_secret: SecretString::from(jwt_secret),
                token_ttl: Duration::from_secs(ttl_minutes * 60),
            },
            rate_limit: RateLimitConfig {
                max_requests,
                window: Duration::from_secs(window_secs),
                trust_forwarded,
            },
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Refuse an empty signing secret, and the default one in production.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let secret = self.auth.jwt_secret.expose_secret();
        if secret.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "JWT_SECRET_KEY".to_string(),
                hint: "Set it to a non-empty value.".to_string(),
            });
        }
        if self.is_production() && secret == DEV_JWT_SECRET {
            return Err(ConfigError::InvalidValue {
                key: "JWT_SECRET_KEY".to_string(),
                message: "still has the development default".to_string(),
            });
        }
        Ok(())
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}
