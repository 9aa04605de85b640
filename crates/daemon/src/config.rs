// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server configuration
//!
//! Loaded from an optional JSON file; unknown keys are ignored so configs
//! can carry options for other tools in the fleet.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Default listen port
pub const DEFAULT_PORT: u16 = 45625;

/// Default ceiling applied to non-zero lease timeouts (24 hours)
pub const DEFAULT_MAX_TIMEOUT_MS: u64 = 86_400_000;

/// Errors that can occur loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Daemon configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ServerConfig {
    /// Listen port; 0 means "use the command-line flag"
    pub port: u16,
    /// Global cap on concurrent holders per semaphore; 0 = unlimited
    pub lock_limit: i64,
    /// Ceiling for non-zero lease timeouts; 0 = unclamped
    pub max_timeout_ms: u64,
    /// Username to password map; empty disables authentication
    pub authentication: HashMap<String, String>,
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log file path; empty logs to stdout
    pub to: String,
    /// Filter level (e.g. "info", "debug"); empty means "info"
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            lock_limit: 0,
            max_timeout_ms: DEFAULT_MAX_TIMEOUT_MS,
            authentication: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn auth_enabled(&self) -> bool {
        !self.authentication.is_empty()
    }

    /// Clamp a requested lease timeout. Zero stays zero (hold forever).
    pub fn clamp_timeout(&self, timeout_ms: u64) -> u64 {
        if timeout_ms == 0 || self.max_timeout_ms == 0 {
            timeout_ms
        } else {
            timeout_ms.min(self.max_timeout_ms)
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
