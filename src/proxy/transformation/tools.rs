//! Tool-set stripping
//!
//! Removes hidden tools everywhere, and MCP tools outside the allowed server
//! prefixes for Anthropic-bound traffic. Subagents forced onto Anthropic by an
//! exclusion marker keep their full tool set.

use super::patterns::{MCP_ALLOWED_PREFIXES, MCP_TOOL_PREFIX};
use super::{StepOutcome, TransformContext, TransformStep};
use crate::proxy::routing::Provider;
use serde_json::Value;
use std::collections::HashSet;

pub struct ToolStripper {
    hidden: HashSet<String>,
}

impl ToolStripper {
    pub fn new(hidden_tools: &[String]) -> Self {
        Self {
            hidden: hidden_tools.iter().cloned().collect(),
        }
    }
}

impl TransformStep for ToolStripper {
    fn name(&self) -> &'static str {
        "strip_tools"
    }

    fn should_apply(&self, ctx: &TransformContext) -> bool {
        !ctx.decision.is_excluded_subagent()
    }

    fn apply(&self, body: &mut Value, ctx: &TransformContext) -> StepOutcome {
        let strip_mcp = ctx.decision.provider() == Provider::Anthropic;
        let removed = strip_tools(body, &self.hidden, strip_mcp);
        if !removed.is_empty() {
            tracing::debug!(
                request_id = ctx.request_id,
                removed = ?removed,
                "Stripped {} tools",
                removed.len()
            );
        }
        StepOutcome::from_changed(!removed.is_empty())
    }
}

fn should_strip(tool: &Value, hidden: &HashSet<String>, strip_mcp: bool) -> bool {
    let Some(name) = tool.get("name").and_then(|n| n.as_str()) else {
        return false;
    };
    if hidden.contains(name) {
        return true;
    }
    strip_mcp
        && name.starts_with(MCP_TOOL_PREFIX)
        && !MCP_ALLOWED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Remove unwanted tools in place; returns the removed names
///
/// Idempotent: a second pass over the result removes nothing. A `tool_choice`
/// that names a removed tool is dropped so the request stays valid.
pub fn strip_tools(body: &mut Value, hidden: &HashSet<String>, strip_mcp: bool) -> Vec<String> {
    let Some(tools) = super::tools_mut(body) else {
        return Vec::new();
    };

    let mut removed = Vec::new();
    tools.retain(|tool| {
        if should_strip(tool, hidden, strip_mcp) {
            if let Some(name) = tool.get("name").and_then(|n| n.as_str()) {
                removed.push(name.to_string());
            }
            false
        } else {
            true
        }
    });

    let choice_removed = body
        .get("tool_choice")
        .and_then(|c| c.get("name"))
        .and_then(|n| n.as_str())
        .map(|name| removed.iter().any(|r| r == name) || hidden.contains(name))
        .unwrap_or(false);
    if choice_removed {
        if let Some(obj) = body.as_object_mut() {
            obj.remove("tool_choice");
        }
    }

    removed
}
