//! Routing marker configuration
//!
//! Markers are plain substrings unless prefixed with `re:`, in which case the
//! remainder is compiled as a regular expression at startup.
//!
//! ```toml
//! [routing]
//! subagent_markers = ["READ-ONLY MODE", "re:^<role>"]
//! anthropic_markers = ["Plan mode is active"]
//! air_model_patterns = ["file search specialist"]
//! ```

use serde::Deserialize;

/// Marker lists consumed by the route decider
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingConfig {
    /// Patterns identifying Task-tool subagent system prompts (route to z.ai)
    pub subagent_markers: Vec<String>,
    /// Patterns forcing main-session routing; these win over subagent markers
    pub anthropic_markers: Vec<String>,
    /// Subagent prompts matching these use the cheaper z.ai model
    pub air_model_patterns: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            subagent_markers: vec![
                "READ-ONLY MODE".to_string(),
                "re:^\\s*<role>".to_string(),
                "You are an agent for Claude Code".to_string(),
            ],
            anthropic_markers: Vec::new(),
            air_model_patterns: vec!["file search specialist".to_string()],
        }
    }
}

/// Routing section as loaded from file
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileRouting {
    pub subagent_markers: Option<Vec<String>>,
    pub anthropic_markers: Option<Vec<String>>,
    pub air_model_patterns: Option<Vec<String>>,
}

impl RoutingConfig {
    pub fn from_file(file: Option<FileRouting>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            subagent_markers: file.subagent_markers.unwrap_or(defaults.subagent_markers),
            anthropic_markers: file
                .anthropic_markers
                .unwrap_or(defaults.anthropic_markers),
            air_model_patterns: file
                .air_model_patterns
                .unwrap_or(defaults.air_model_patterns),
        }
    }
}
