//! Runtime configuration

use serde::Deserialize;

use crate::constants::{DEFAULT_BIND_ADDR, DEFAULT_CACHE_CAPACITY, DEFAULT_DB_PATH, DEFAULT_LOCK_ATTEMPTS};
use crate::error::{GrantError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: String,
    pub bind_addr: String,
    /// Users memoized by the grant cache; 0 disables it
    pub cache_capacity: usize,
    pub lock_attempts: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: DEFAULT_DB_PATH.to_string(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            lock_attempts: DEFAULT_LOCK_ATTEMPTS,
        }
    }
}

impl Config {
    /// Read `GRANTWARD_*` variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as `from_env` over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();
        if let Some(v) = lookup("GRANTWARD_DB") {
            cfg.db_path = v;
        }
        if let Some(v) = lookup("GRANTWARD_BIND") {
            cfg.bind_addr = v;
        }
        if let Some(v) = lookup("GRANTWARD_CACHE_CAPACITY") {
            cfg.cache_capacity = number("GRANTWARD_CACHE_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("GRANTWARD_LOCK_ATTEMPTS") {
            cfg.lock_attempts = number("GRANTWARD_LOCK_ATTEMPTS", &v)?;
        }
        Ok(cfg)
    }
}

fn number(var: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| GrantError::validation(format!("{} must be a non-negative integer, got '{}'", var, value)))
}
