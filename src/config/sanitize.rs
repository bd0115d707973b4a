//! Request sanitization settings

use serde::Deserialize;
use std::path::PathBuf;

/// Which tools and agents are hidden from the client, and prompt overrides
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizeConfig {
    /// Tools removed from every request's tool list
    pub hidden_tools: Vec<String>,
    /// Built-in agents removed from the Task tool's agent list
    pub stripped_agents: Vec<String>,
    /// When the system prompt matches any of these, CLAUDE.md context is dropped for z.ai
    pub strip_claude_md_markers: Vec<String>,
    /// Replacement main-session system prompt; the built-in template when unset
    pub system_prompt_file: Option<PathBuf>,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            hidden_tools: ["NotebookEdit", "WebFetch", "WebSearch"]
                .map(String::from)
                .to_vec(),
            stripped_agents: [
                "general-purpose",
                "statusline-setup",
                "Explore",
                "Plan",
                "claude-code-guide",
            ]
            .map(String::from)
            .to_vec(),
            strip_claude_md_markers: Vec::new(),
            system_prompt_file: None,
        }
    }
}

/// Sanitize section as loaded from file
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileSanitize {
    pub hidden_tools: Option<Vec<String>>,
    pub stripped_agents: Option<Vec<String>>,
    pub strip_claude_md_markers: Option<Vec<String>>,
    pub system_prompt_file: Option<String>,
}

impl SanitizeConfig {
    pub fn from_file(file: Option<FileSanitize>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            hidden_tools: file.hidden_tools.unwrap_or(defaults.hidden_tools),
            stripped_agents: file.stripped_agents.unwrap_or(defaults.stripped_agents),
            strip_claude_md_markers: file
                .strip_claude_md_markers
                .unwrap_or(defaults.strip_claude_md_markers),
            system_prompt_file: file
                .system_prompt_file
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .or(defaults.system_prompt_file),
        }
    }
}
