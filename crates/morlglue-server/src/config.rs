//! Glue server configuration

use std::time::Duration;

use anyhow::{Context, Result};
use morlglue_common::DEFAULT_PORT;
use morlglue_network::DecodeStrategy;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Glue server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlueConfig {
    /// Bind address
    pub host: String,
    /// Listening port
    pub port: u16,
    /// Per-operation socket timeout; `None` blocks forever
    pub io_timeout_ms: Option<u64>,
    /// Storage policy for decoded records
    pub decode_strategy: DecodeStrategy,
}

impl Default for GlueConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            io_timeout_ms: None,
            decode_strategy: DecodeStrategy::default(),
        }
    }
}

impl GlueConfig {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        // An unset, unparsable or zero port falls back to the default
        if let Some(port) = lookup("RLGLUE_PORT") {
            match port.trim().parse::<u16>() {
                Ok(p) if p != 0 => cfg.port = p,
                _ => warn!(value = %port, default = DEFAULT_PORT, "Ignoring invalid RLGLUE_PORT"),
            }
        }

        if let Some(host) = lookup("MORLGLUE_HOST") {
            cfg.host = host;
        }

        if let Some(val) = lookup("MORLGLUE_IO_TIMEOUT_MS") {
            let ms: u64 = val
                .trim()
                .parse()
                .with_context(|| format!("MORLGLUE_IO_TIMEOUT_MS must be milliseconds, got '{}'", val))?;
            cfg.io_timeout_ms = (ms > 0).then_some(ms);
        }

        if let Some(val) = lookup("MORLGLUE_DECODE_STRATEGY") {
            cfg.decode_strategy = val.parse()?;
        }

        Ok(cfg)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }
}
