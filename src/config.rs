use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_host: String,
    pub http_port: u16,
    /// Without a database url the service keeps its inventory in memory.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub lock_timeout: Duration,
    pub audit_retention: i64,
    /// Reject anonymous submissions instead of skipping their audit records.
    pub require_identity: bool,
    pub inventory_seed: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let http_port = var("HTTP_PORT").ok_or(ConfigError::Missing("HTTP_PORT"))?;
        let http_port = parse("HTTP_PORT", &http_port)?;

        Ok(Config {
            http_host: var("HTTP_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            http_port,
            database_url: var("DATABASE_URL"),
            db_max_connections: var("DB_MAX_CONNECTIONS")
                .map(|v| parse("DB_MAX_CONNECTIONS", &v))
                .transpose()?
                .unwrap_or(10),
            lock_timeout: Duration::from_millis(
                var("LOCK_TIMEOUT_MS")
                    .map(|v| parse("LOCK_TIMEOUT_MS", &v))
                    .transpose()?
                    .unwrap_or(5_000),
            ),
            audit_retention: match var("AUDIT_RETENTION") {
                Some(v) => match parse::<i64>("AUDIT_RETENTION", &v)? {
                    n if n > 0 => n,
                    _ => {
                        return Err(ConfigError::Invalid {
                            name: "AUDIT_RETENTION",
                            value: v,
                        })
                    }
                },
                None => 200,
            },
            require_identity: var("REQUIRE_IDENTITY")
                .map(|v| parse_flag("REQUIRE_IDENTITY", &v))
                .transpose()?
                .unwrap_or(false),
            inventory_seed: var("INVENTORY_SEED").map(PathBuf::from),
        })
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}
