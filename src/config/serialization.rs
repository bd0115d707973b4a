//! Config serialization to TOML
//!
//! Single source of truth for config file format.

use super::{Config, ProviderConfig};
use std::path::Path;

/// Quote a string as a TOML basic string
fn quote(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

fn quote_path(path: &Path) -> String {
    quote(&path.display().to_string())
}

/// Render a string list as a TOML inline array
fn string_array(values: &[String]) -> String {
    let items: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("[{}]", items.join(", "))
}

impl Config {
    /// Serialize one provider section (`[name]` plus its `[name.auth]` table)
    fn provider_to_toml(name: &str, provider: &ProviderConfig) -> String {
        let mut output = format!("[{}]\nbase_url = {}\n", name, quote(&provider.base_url));

        match &provider.model {
            Some(model) => output.push_str(&format!("model = {}\n", quote(model))),
            None if name == "zai" => output.push_str("# model = \"glm-4.6\"\n"),
            None => {}
        }
        if let Some(air) = &provider.air_model {
            output.push_str(&format!("air_model = {}\n", quote(air)));
        }

        output.push_str(&format!(
            "\n[{}.auth]\nmethod = \"{}\"  # passthrough, bearer, x_api_key\n",
            name,
            provider.auth.method.as_str()
        ));
        if let Some(key_env) = &provider.auth.key_env {
            output.push_str(&format!("key_env = {}\n", quote(key_env)));
        }
        if let Some(key) = &provider.auth.key {
            output.push_str(&format!("key = {}\n", quote(key)));
        }
        output
    }

    /// Serialize config to TOML string (single source of truth for format)
    pub fn to_toml(&self) -> String {
        let system_prompt_file = match &self.sanitize.system_prompt_file {
            Some(path) => format!("system_prompt_file = {}", quote_path(path)),
            None => "# system_prompt_file = \"~/.config/zroute/system.md\"".to_string(),
        };

        format!(
            r#"# zroute configuration
#
# Environment overrides: ZROUTE_BIND, ANTHROPIC_BASE_URL, ZAI_BASE_URL,
# ZROUTE_LOG_DIR, ZROUTE_TOOL_WARNING

[proxy]
bind_addr = "{bind}"

# ─────────────────────────────────────────────────────────────────────────────
# UPSTREAM PROVIDERS
# ─────────────────────────────────────────────────────────────────────────────
# Main-session traffic goes to [anthropic], subagent traffic to [zai].

{anthropic}
{zai}
# ─────────────────────────────────────────────────────────────────────────────
# ROUTING
# ─────────────────────────────────────────────────────────────────────────────
# Markers are substrings of the system prompt; prefix with "re:" for a regex.
# anthropic_markers win over subagent_markers.
[routing]
subagent_markers = {subagent_markers}
anthropic_markers = {anthropic_markers}
air_model_patterns = {air_model_patterns}

# Durations in seconds. subagent_tool_warning = 0 disables tool-usage warnings.
[limits]
max_body_size = {max_body_size}
max_connections = {max_connections}
max_keepalive = {max_keepalive}
keepalive_expiry = {keepalive_expiry:?}
connect_timeout = {connect_timeout:?}
pool_timeout = {pool_timeout:?}
header_timeout = {header_timeout:?}
message_timeout = {message_timeout:?}
token_count_timeout = {token_count_timeout:?}
subagent_tool_warning = {tool_warning}

[sanitize]
hidden_tools = {hidden_tools}
stripped_agents = {stripped_agents}
strip_claude_md_markers = {strip_claude_md}
{system_prompt_file}

# Logging configuration (RUST_LOG env var overrides level)
[logging]
level = {log_level}
json = {log_json}
file_enabled = {log_file_enabled}
file_dir = {log_file_dir}
file_rotation = "{log_file_rotation}"  # hourly, daily, never
file_prefix = {log_file_prefix}

# Per-request JSON Lines event log
[events]
enabled = {events_enabled}
dir = {events_dir}
channel_buffer = {events_buffer}
"#,
            bind = self.bind_addr,
            anthropic = Self::provider_to_toml("anthropic", &self.anthropic),
            zai = Self::provider_to_toml("zai", &self.zai),
            subagent_markers = string_array(&self.routing.subagent_markers),
            anthropic_markers = string_array(&self.routing.anthropic_markers),
            air_model_patterns = string_array(&self.routing.air_model_patterns),
            max_body_size = self.limits.max_body_size,
            max_connections = self.limits.max_connections,
            max_keepalive = self.limits.max_keepalive,
            keepalive_expiry = self.limits.keepalive_expiry,
            connect_timeout = self.limits.connect_timeout,
            pool_timeout = self.limits.pool_timeout,
            header_timeout = self.limits.header_timeout,
            message_timeout = self.limits.message_timeout,
            token_count_timeout = self.limits.token_count_timeout,
            tool_warning = self.limits.subagent_tool_warning,
            hidden_tools = string_array(&self.sanitize.hidden_tools),
            stripped_agents = string_array(&self.sanitize.stripped_agents),
            strip_claude_md = string_array(&self.sanitize.strip_claude_md_markers),
            system_prompt_file = system_prompt_file,
            log_level = quote(&self.logging.level),
            log_json = self.logging.json,
            log_file_enabled = self.logging.file_enabled,
            log_file_dir = quote_path(&self.logging.file_dir),
            log_file_rotation = self.logging.file_rotation.as_str(),
            log_file_prefix = quote(&self.logging.file_prefix),
            events_enabled = self.events.enabled,
            events_dir = quote_path(&self.events.dir),
            events_buffer = self.events.channel_buffer,
        )
    }
}
