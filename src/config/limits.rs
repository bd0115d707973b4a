//! Request and connection limits
//!
//! Durations are configured as fractional seconds in TOML and exposed as
//! `Duration` accessors for the forwarder.

use serde::Deserialize;
use std::time::Duration;

/// Body size ceiling, connection pool sizing, timeouts, tool warning threshold
#[derive(Debug, Clone, PartialEq)]
pub struct LimitsConfig {
    /// Largest accepted request body in bytes (50 MiB)
    pub max_body_size: usize,
    /// Concurrent upstream requests per provider
    pub max_connections: usize,
    /// Idle connections kept per host
    pub max_keepalive: usize,
    pub keepalive_expiry: f64,
    pub connect_timeout: f64,
    /// Wait for a free connection slot before failing with 503
    pub pool_timeout: f64,
    /// Wait for upstream response headers
    pub header_timeout: f64,
    /// Total budget for a messages exchange, streaming included
    pub message_timeout: f64,
    pub token_count_timeout: f64,
    /// Subagent tool-use count at which the soft warning fires (0 disables)
    pub subagent_tool_warning: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 50 * 1024 * 1024,
            max_connections: 100,
            max_keepalive: 20,
            keepalive_expiry: 30.0,
            connect_timeout: 10.0,
            pool_timeout: 30.0,
            header_timeout: 120.0,
            message_timeout: 600.0,
            token_count_timeout: 30.0,
            subagent_tool_warning: 30,
        }
    }
}

/// Limits section as loaded from file
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileLimits {
    pub max_body_size: Option<usize>,
    pub max_connections: Option<usize>,
    pub max_keepalive: Option<usize>,
    pub keepalive_expiry: Option<f64>,
    pub connect_timeout: Option<f64>,
    pub pool_timeout: Option<f64>,
    pub header_timeout: Option<f64>,
    pub message_timeout: Option<f64>,
    pub token_count_timeout: Option<f64>,
    pub subagent_tool_warning: Option<u32>,
}

impl LimitsConfig {
    pub fn from_file(file: Option<FileLimits>) -> Self {
        let file = file.unwrap_or_default();
        let d = Self::default();

        Self {
            max_body_size: file.max_body_size.unwrap_or(d.max_body_size),
            max_connections: file.max_connections.unwrap_or(d.max_connections),
            max_keepalive: file.max_keepalive.unwrap_or(d.max_keepalive),
            keepalive_expiry: file.keepalive_expiry.unwrap_or(d.keepalive_expiry),
            connect_timeout: file.connect_timeout.unwrap_or(d.connect_timeout),
            pool_timeout: file.pool_timeout.unwrap_or(d.pool_timeout),
            header_timeout: file.header_timeout.unwrap_or(d.header_timeout),
            message_timeout: file.message_timeout.unwrap_or(d.message_timeout),
            token_count_timeout: file.token_count_timeout.unwrap_or(d.token_count_timeout),
            subagent_tool_warning: file
                .subagent_tool_warning
                .unwrap_or(d.subagent_tool_warning),
        }
    }

    pub fn keepalive_expiry(&self) -> Duration {
        secs(self.keepalive_expiry)
    }

    pub fn connect_timeout(&self) -> Duration {
        secs(self.connect_timeout)
    }

    pub fn pool_timeout(&self) -> Duration {
        secs(self.pool_timeout)
    }

    pub fn header_timeout(&self) -> Duration {
        secs(self.header_timeout)
    }

    pub fn message_timeout(&self) -> Duration {
        secs(self.message_timeout)
    }

    pub fn token_count_timeout(&self) -> Duration {
        secs(self.token_count_timeout)
    }
}

/// Negative or NaN values collapse to zero instead of panicking
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
