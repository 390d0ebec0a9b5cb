//! Configuration management for jsonbridge
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

use crate::datasource::InstanceSettings;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Upstream client configuration
    pub upstream: UpstreamConfig,

    /// Datasource instances served by this process
    pub datasources: Vec<DatasourceConfig>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Enable CORS for API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,
}

/// Upstream client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Overall request timeout in seconds
    pub request_timeout_secs: u64,

    /// Connect timeout in seconds, TLS handshake included
    pub connect_timeout_secs: u64,

    /// Maximum idle connections kept per upstream host
    pub pool_max_idle_per_host: usize,

    /// Idle connection lifetime in seconds
    pub pool_idle_timeout_secs: u64,

    /// User agent string
    pub user_agent: String,
}

/// One datasource instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasourceConfig {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    /// Base URL of the upstream JSON service
    pub url: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 100,
            pool_idle_timeout_secs: 90,
            user_agent: format!("jsonbridge/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// `JSONBRIDGE_DATASOURCE_URL` registers a single datasource with id 1.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let bind_address = match std::env::var("JSONBRIDGE_BIND_ADDRESS") {
            Ok(addr) => addr
                .parse()
                .with_context(|| format!("Invalid JSONBRIDGE_BIND_ADDRESS: {addr}"))?,
            Err(_) => defaults.server.bind_address,
        };

        let upstream = UpstreamConfig {
            request_timeout_secs: env_parse("JSONBRIDGE_REQUEST_TIMEOUT")
                .unwrap_or(defaults.upstream.request_timeout_secs),
            connect_timeout_secs: env_parse("JSONBRIDGE_CONNECT_TIMEOUT")
                .unwrap_or(defaults.upstream.connect_timeout_secs),
            pool_max_idle_per_host: env_parse("JSONBRIDGE_POOL_MAX_IDLE")
                .unwrap_or(defaults.upstream.pool_max_idle_per_host),
            pool_idle_timeout_secs: env_parse("JSONBRIDGE_POOL_IDLE_TIMEOUT")
                .unwrap_or(defaults.upstream.pool_idle_timeout_secs),
            user_agent: std::env::var("JSONBRIDGE_USER_AGENT")
                .unwrap_or(defaults.upstream.user_agent),
        };

        let datasources = std::env::var("JSONBRIDGE_DATASOURCE_URL")
            .ok()
            .map(|url| {
                vec![DatasourceConfig {
                    id: 1,
                    name: String::from("default"),
                    url,
                }]
            })
            .unwrap_or_default();

        let logging = LoggingConfig {
            level: std::env::var("JSONBRIDGE_LOG_LEVEL").unwrap_or(defaults.logging.level),
            format: std::env::var("JSONBRIDGE_LOG_FORMAT").unwrap_or(defaults.logging.format),
        };

        Ok(Self {
            server: ServerConfig {
                bind_address,
                ..defaults.server
            },
            upstream,
            datasources,
            logging,
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.upstream.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }

        if self.upstream.connect_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be 'text' or 'json', got '{}'", self.logging.format);
        }

        let mut ids = HashSet::new();
        for ds in &self.datasources {
            if !ids.insert(ds.id) {
                anyhow::bail!("duplicate datasource id {}", ds.id);
            }
            ds.to_settings()?;
        }

        Ok(())
    }

    /// Resolved settings for every configured datasource
    pub fn instance_settings(&self) -> Result<Vec<InstanceSettings>> {
        self.datasources
            .iter()
            .map(DatasourceConfig::to_settings)
            .collect()
    }
}

impl DatasourceConfig {
    /// Turn this entry into validated instance settings
    pub fn to_settings(&self) -> Result<InstanceSettings> {
        let name = if self.name.is_empty() {
            format!("datasource-{}", self.id)
        } else {
            self.name.clone()
        };
        InstanceSettings::new(self.id, name, &self.url)
            .with_context(|| format!("Invalid datasource {}", self.id))
    }
}
