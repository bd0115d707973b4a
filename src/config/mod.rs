//! Configuration for the routing proxy
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/zroute/config.toml)
//! 3. Built-in defaults (lowest priority)
//!
//! The proxy core treats the resolved `Config` as immutable: it is built once at
//! startup, validated, and shared read-only with every request.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod limits;
mod observability;
mod providers;
mod routing;
mod sanitize;
mod serialization;

#[cfg(test)]
mod tests;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (maintain public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use limits::{FileLimits, LimitsConfig};
pub use observability::{EventLogConfig, FileEventLog, FileLogging, LogRotation, LoggingConfig};
pub use providers::{FileProvider, ProviderConfig};
#[cfg(test)]
pub use providers::{AuthMethod, ProviderAuth};
pub use routing::{FileRouting, RoutingConfig};
pub use sanitize::{FileSanitize, SanitizeConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_BIND: &str = "127.0.0.1:8082";

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the proxy server to
    pub bind_addr: SocketAddr,

    /// Main-session provider (Anthropic-compatible)
    pub anthropic: ProviderConfig,

    /// Subagent provider (z.ai, Anthropic-compatible wire format)
    pub zai: ProviderConfig,

    /// Marker lists used to classify requests
    pub routing: RoutingConfig,

    /// Body size ceiling, pool limits, timeouts, tool warning threshold
    pub limits: LimitsConfig,

    /// Request sanitization settings
    pub sanitize: SanitizeConfig,

    /// Tracing configuration
    pub logging: LoggingConfig,

    /// Structured per-request event log (JSON Lines)
    pub events: EventLogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8082)),
            anthropic: ProviderConfig::anthropic_default(),
            zai: ProviderConfig::zai_default(),
            routing: RoutingConfig::default(),
            limits: LimitsConfig::default(),
            sanitize: SanitizeConfig::default(),
            logging: LoggingConfig::default(),
            events: EventLogConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure; every field optional so partial files merge over defaults
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileConfig {
    /// Optional [proxy] section
    pub proxy: Option<FileProxy>,

    /// Optional [anthropic] section
    pub anthropic: Option<FileProvider>,

    /// Optional [zai] section
    pub zai: Option<FileProvider>,

    /// Optional [routing] section
    pub routing: Option<FileRouting>,

    /// Optional [limits] section
    pub limits: Option<FileLimits>,

    /// Optional [sanitize] section
    pub sanitize: Option<FileSanitize>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,

    /// Optional [events] section
    pub events: Option<FileEventLog>,
}

/// Proxy server settings as loaded from file
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileProxy {
    pub bind_addr: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Get the config file path: ~/.config/zroute/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("zroute").join("config.toml"))
    }

    /// Create config file with defaults if it doesn't exist
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        if path.exists() {
            return;
        }

        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }

        // Ignore errors - the file is a convenience template
        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    /// Read and parse a config file. A missing file yields defaults;
    /// an unreadable or malformed file is an error.
    pub(crate) fn read_file_config(path: &Path) -> Result<FileConfig> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => Err(e).with_context(|| format!("Cannot read config file {}", path.display())),
        }
    }

    /// Load configuration: file -> env vars -> defaults
    pub fn load() -> Result<Self> {
        let file = match Self::config_path() {
            Some(path) => Self::read_file_config(&path)?,
            None => FileConfig::default(),
        };
        let config = Self::from_sources(file, |name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Merge a parsed file config with environment overrides
    ///
    /// `env` is injected so tests can supply variables without touching the process env.
    pub(crate) fn from_sources<F>(file: FileConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = env("ZROUTE_BIND")
            .or(file.proxy.and_then(|p| p.bind_addr))
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse()
            .context("Invalid bind address")?;

        let mut anthropic =
            ProviderConfig::from_file(file.anthropic, ProviderConfig::anthropic_default());
        if let Some(url) = env("ANTHROPIC_BASE_URL") {
            anthropic.base_url = url;
        }

        let mut zai = ProviderConfig::from_file(file.zai, ProviderConfig::zai_default());
        if let Some(url) = env("ZAI_BASE_URL") {
            zai.base_url = url;
        }

        let mut limits = LimitsConfig::from_file(file.limits);
        if let Some(threshold) = env("ZROUTE_TOOL_WARNING").and_then(|v| v.parse().ok()) {
            limits.subagent_tool_warning = threshold;
        }

        let mut events = EventLogConfig::from_file(file.events);
        if let Some(dir) = env("ZROUTE_LOG_DIR") {
            events.dir = PathBuf::from(dir);
        }

        Ok(Self {
            bind_addr,
            anthropic,
            zai,
            routing: RoutingConfig::from_file(file.routing),
            limits,
            sanitize: SanitizeConfig::from_file(file.sanitize),
            logging: LoggingConfig::from_file(file.logging),
            events,
        })
    }

    /// Reject configurations the proxy cannot run with
    ///
    /// Marker patterns are compiled here so a bad regex fails at startup
    /// rather than silently never matching.
    pub fn validate(&self) -> Result<()> {
        crate::proxy::routing::RuleTable::from_config(&self.routing)
            .context("Invalid [routing] markers")?;
        crate::proxy::routing::MarkerSet::compile(&self.sanitize.strip_claude_md_markers)
            .context("Invalid [sanitize] strip_claude_md_markers")?;

        if self.limits.max_connections == 0 {
            anyhow::bail!("[limits] max_connections must be at least 1");
        }
        if self.limits.max_connections > tokio::sync::Semaphore::MAX_PERMITS {
            anyhow::bail!(
                "[limits] max_connections must be at most {}",
                tokio::sync::Semaphore::MAX_PERMITS
            );
        }
        if self.limits.max_body_size == 0 {
            anyhow::bail!("[limits] max_body_size must be at least 1");
        }
        for (name, url) in [
            ("anthropic", &self.anthropic.base_url),
            ("zai", &self.zai.base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("[{}] base_url must be an http(s) URL, got {:?}", name, url);
            }
        }
        Ok(())
    }
}
