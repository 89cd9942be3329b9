//! Driver-provided configuration.
//!
//! The miner needs three values: a thread count, a pool `host:port`, and
//! the username/address to mine to. They come from an optional TOML file,
//! overridden by environment variables, and are validated before any
//! connection attempt so bad input fails fast.

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Config file looked up in the working directory by default.
pub const DEFAULT_CONFIG_FILE: &str = "keystone-miner.toml";

const DEFAULT_POOL: &str = "127.0.0.1:8501";

/// Validated miner configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerConfig {
    /// Number of CPU worker threads.
    pub threads: usize,

    /// Pool host name or address.
    pub host: String,

    /// Pool port.
    pub port: u16,

    /// Username/address to mine to.
    pub username: String,
}

/// Configuration errors, surfaced to the operator before connecting.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML.
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Thread count missing, unparsable, or not positive.
    #[error("thread count must be a positive integer, got {0:?}")]
    InvalidThreads(String),

    /// Pool endpoint not a valid `host:port` pair.
    #[error("pool must be host:port with port 1-65535, got {0:?}")]
    InvalidPool(String),

    /// No username configured.
    #[error("username/address must not be empty")]
    MissingUsername,
}

/// Raw values from the config file.
#[derive(Debug, Default, Deserialize)]
struct FileValues {
    threads: Option<i64>,
    pool: Option<String>,
    username: Option<String>,
}

/// Raw values from the environment.
#[derive(Debug, Default)]
struct EnvValues {
    threads: Option<String>,
    pool: Option<String>,
    username: Option<String>,
}

impl MinerConfig {
    /// Load configuration from `path` (if it exists) with
    /// `KEYSTONE_THREADS` / `KEYSTONE_POOL` / `KEYSTONE_USER` overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = if path.exists() {
            toml::from_str(&fs::read_to_string(path)?)?
        } else {
            FileValues::default()
        };

        Self::resolve(file, env_values())
    }

    fn resolve(file: FileValues, env: EnvValues) -> Result<Self, ConfigError> {
        let threads = match (env.threads, file.threads) {
            (Some(s), _) => s
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidThreads(s.clone()))?,
            (None, Some(n)) => n,
            (None, None) => 1,
        };
        if threads < 1 {
            return Err(ConfigError::InvalidThreads(threads.to_string()));
        }

        let pool = env
            .pool
            .or(file.pool)
            .unwrap_or_else(|| DEFAULT_POOL.to_string());
        let (host, port) = parse_pool(&pool)?;

        let username = env
            .username
            .or(file.username)
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingUsername)?;

        Ok(Self {
            threads: threads as usize,
            host,
            port,
            username,
        })
    }
}

/// Split and validate a `host:port` pair. Port 0 is rejected.
fn parse_pool(pool: &str) -> Result<(String, u16), ConfigError> {
    let invalid = || ConfigError::InvalidPool(pool.to_string());

    let (host, port) = pool.split_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.contains(':') {
        return Err(invalid());
    }

    let port: u16 = port.parse().map_err(|_| invalid())?;
    if port == 0 {
        return Err(invalid());
    }

    Ok((host.to_string(), port))
}

fn env_values() -> EnvValues {
    EnvValues {
        threads: env::var("KEYSTONE_THREADS").ok(),
        pool: env::var("KEYSTONE_POOL").ok(),
        username: env::var("KEYSTONE_USER").ok(),
    }
}
