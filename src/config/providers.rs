//! Upstream provider configuration
//!
//! Two providers are known to the proxy: the main-session Anthropic API and
//! the z.ai subagent endpoint. Both speak the Anthropic Messages wire format
//! but authenticate differently.

use serde::Deserialize;

// ─────────────────────────────────────────────────────────────────────────────
// Authentication
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication method for provider APIs
///
/// - Anthropic (OAuth subscription): pass the client's own credentials through
/// - z.ai: `x-api-key` header with a key from the environment
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Forward the client's `authorization` / `x-api-key` headers unchanged
    #[default]
    Passthrough,
    /// OAuth-style: `Authorization: Bearer {key}`
    Bearer,
    /// Anthropic-style: `x-api-key: {key}`
    XApiKey,
}

impl AuthMethod {
    /// Convert to lowercase string for TOML serialization
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passthrough => "passthrough",
            Self::Bearer => "bearer",
            Self::XApiKey => "x_api_key",
        }
    }
}

/// Provider authentication configuration
///
/// Keys can be sourced from environment variables (preferred) or config.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProviderAuth {
    #[serde(default)]
    pub method: AuthMethod,

    /// API key value (direct, less secure - prefer key_env)
    pub key: Option<String>,

    /// Environment variable name to read key from (preferred)
    pub key_env: Option<String>,
}

impl ProviderAuth {
    pub fn is_passthrough(&self) -> bool {
        self.method == AuthMethod::Passthrough
    }

    /// Resolve the API key from env var or direct value
    /// Returns None if no key configured or passthrough mode
    pub fn resolve_key(&self) -> Option<String> {
        if self.is_passthrough() {
            return None;
        }

        // Priority: env var > direct value
        if let Some(env_name) = &self.key_env {
            if let Ok(value) = std::env::var(env_name) {
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }

        self.key.clone().filter(|k| !k.is_empty())
    }

    /// Build the authentication header (name, value) for this config
    /// Returns None if passthrough or no key available
    pub fn build_header(&self) -> Option<(&'static str, String)> {
        let key = self.resolve_key()?;

        match self.method {
            AuthMethod::Passthrough => None,
            AuthMethod::Bearer => Some(("authorization", format!("Bearer {}", key))),
            AuthMethod::XApiKey => Some(("x-api-key", key)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// A single upstream provider backend
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// Base URL; endpoint paths (`/v1/messages`) are appended
    pub base_url: String,

    pub auth: ProviderAuth,

    /// Model substituted for subagent requests (z.ai only)
    pub model: Option<String>,

    /// Cheaper model used when the subagent prompt matches `air_model_patterns`
    pub air_model: Option<String>,
}

/// Provider section as loaded from file
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileProvider {
    pub base_url: Option<String>,
    pub auth: Option<ProviderAuth>,
    pub model: Option<String>,
    pub air_model: Option<String>,
}

impl ProviderConfig {
    pub fn anthropic_default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            auth: ProviderAuth::default(),
            model: None,
            air_model: None,
        }
    }

    pub fn zai_default() -> Self {
        Self {
            base_url: "https://api.z.ai/api/anthropic".to_string(),
            auth: ProviderAuth {
                method: AuthMethod::XApiKey,
                key: None,
                key_env: Some("ZAI_API_KEY".to_string()),
            },
            model: None,
            air_model: Some("glm-4.5-air".to_string()),
        }
    }

    /// Overlay a file section on top of the provider's defaults
    pub fn from_file(file: Option<FileProvider>, defaults: Self) -> Self {
        let Some(file) = file else {
            return defaults;
        };

        Self {
            base_url: file
                .base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            auth: file.auth.unwrap_or(defaults.auth),
            model: file.model.or(defaults.model),
            air_model: file.air_model.or(defaults.air_model),
        }
    }
}
