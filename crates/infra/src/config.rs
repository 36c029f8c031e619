//! Process configuration from the environment (optionally a `.env` file).

use std::env;
use std::net::SocketAddr;

use thiserror::Error;
use tracing::warn;

const DEV_JWT_SECRET: &str = "dev-secret";
const DEV_ADMIN_KEY: &str = "dev-admin-key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// Shared credential exchanged for an admin token.
    pub admin_key: String,
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("CLASSBOOK_BIND_ADDR must be a socket address (got '{0}')")]
    InvalidBindAddr(String),

    #[error("CLASSBOOK_DB_MAX_CONNECTIONS must be a positive integer (got '{0}')")]
    InvalidMaxConnections(String),
}

impl AppConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Missing secrets fall back to insecure dev
    /// defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw_addr = get("CLASSBOOK_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let bind_addr = raw_addr
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddr(raw_addr.clone()))?;

        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let admin_key = get("CLASSBOOK_ADMIN_KEY").unwrap_or_else(|| {
            warn!("CLASSBOOK_ADMIN_KEY not set; using insecure dev default");
            DEV_ADMIN_KEY.to_string()
        });

        let database = match get("DATABASE_URL") {
            None => None,
            Some(url) => {
                let max_connections = match get("CLASSBOOK_DB_MAX_CONNECTIONS") {
                    None => 5,
                    Some(raw) => raw
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or(ConfigError::InvalidMaxConnections(raw))?,
                };
                Some(DatabaseConfig {
                    url,
                    max_connections,
                })
            }
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            admin_key,
            database,
        })
    }
}
