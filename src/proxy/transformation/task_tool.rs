//! Task tool description rewriting
//!
//! Replaces the stock opening with a delegation guide, drops built-in agents the
//! deployment does not want spawned, trims guidance and example sections, and
//! narrows the Bash agent to git/system commands.

use super::patterns::{
    agent_entry_pattern, AGENT_TOOLS_SUFFIX, BASH_AGENT_DESC, BASH_AGENT_NEW_DESC,
    NEW_TASK_OPENING, TASK_CONTEXT_SECTION, TASK_EXAMPLE_SECTION, TASK_OPENING, TASK_TOOL,
};
use super::{StepOutcome, TransformContext, TransformStep};
use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;

pub struct TaskToolRewriter {
    agents: Vec<(String, Regex)>,
}

impl TaskToolRewriter {
    pub fn new(stripped_agents: &[String]) -> Result<Self> {
        let agents = stripped_agents
            .iter()
            .map(|agent| {
                agent_entry_pattern(agent)
                    .map(|re| (agent.clone(), re))
                    .with_context(|| format!("invalid agent name {:?}", agent))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { agents })
    }

    /// Apply every description edit to the given text
    pub fn rewrite_description(&self, description: &str) -> String {
        let mut text = TASK_OPENING
            .replace(description, regex::NoExpand(NEW_TASK_OPENING))
            .into_owned();

        for (_, pattern) in &self.agents {
            text = pattern.replace_all(&text, "").into_owned();
        }

        text = TASK_CONTEXT_SECTION.replace_all(&text, "").into_owned();
        text = TASK_EXAMPLE_SECTION.replace_all(&text, "").into_owned();
        text = AGENT_TOOLS_SUFFIX.replace_all(&text, "").into_owned();
        BASH_AGENT_DESC
            .replace_all(&text, regex::NoExpand(BASH_AGENT_NEW_DESC))
            .into_owned()
    }

    /// Drop stripped agents from a `subagent_type` enum, if the schema has one
    fn strip_agent_enum(&self, tool: &mut Value) -> bool {
        let Some(variants) = tool
            .pointer_mut("/input_schema/properties/subagent_type/enum")
            .and_then(|e| e.as_array_mut())
        else {
            return false;
        };
        let before = variants.len();
        variants.retain(|v| {
            v.as_str()
                .map(|name| !self.agents.iter().any(|(agent, _)| agent == name))
                .unwrap_or(true)
        });
        variants.len() != before
    }
}

impl TransformStep for TaskToolRewriter {
    fn name(&self) -> &'static str {
        "task_tool"
    }

    fn apply(&self, body: &mut Value, _ctx: &TransformContext) -> StepOutcome {
        let described = super::edit_tool_description(body, TASK_TOOL, |d| {
            self.rewrite_description(d)
        });
        let enum_trimmed = super::tool_named_mut(body, TASK_TOOL)
            .map(|tool| self.strip_agent_enum(tool))
            .unwrap_or(false);
        StepOutcome::from_changed(described || enum_trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STOCK: &str = "Launch a new agent to handle complex, multi-step tasks autonomously. \n\nThe Task tool launches specialized agents (subprocesses) that autonomously handle complex tasks. Each agent type has specific capabilities and tools available to it.\n\nAvailable agent types and the tools they have access to:\n- general-purpose: General-purpose agent for researching. (Tools: *)\n- Bash: Command execution specialist for running bash commands. Use this for git operations, command execution, and other terminal tasks. (Tools: Bash)\n- Explore: Fast agent specialized for exploring codebases. (Tools: Glob, Grep, Read)\n- code-reviewer: Reviews diffs (Tools: Read, Grep)\n\n- Agents with \"access to current context\" can see the full conversation history before the tool call. When using these agents, you can write concise prompts that reference earlier context instead of repeating information. The agent will receive all prior messages and understand the context.\n\nUsage notes:\n- Launch multiple agents concurrently\n\nExample usage:\n<example>\nuser: hi\n</example>\n";

    fn rewriter() -> TaskToolRewriter {
        TaskToolRewriter::new(&["general-purpose".to_string(), "Explore".to_string()]).unwrap()
    }

    #[test]
    fn test_rewrite_description() {
        let out = rewriter().rewrite_description(STOCK);

        assert!(out.starts_with("Delegate work to agents that run in isolation."));
        assert!(!out.contains("general-purpose:"));
        assert!(!out.contains("Explore:"));
        assert!(out.contains("- code-reviewer: Reviews diffs\n"));
        assert!(out.contains("- Bash: Git and system commands ONLY."));
        assert!(!out.contains("(Tools:"));
        assert!(!out.contains("access to current context"));
        assert!(!out.contains("Example usage"));
        assert!(out.contains("Launch multiple agents concurrently"));
    }

    #[test]
    fn test_rewrite_is_stable() {
        let r = rewriter();
        let once = r.rewrite_description(STOCK);
        assert_eq!(r.rewrite_description(&once), once);
    }

    #[test]
    fn test_agent_enum_trimmed() {
        let mut body = json!({"tools": [{
            "name": "Task",
            "description": "custom",
            "input_schema": {"properties": {"subagent_type": {
                "type": "string",
                "enum": ["general-purpose", "code-reviewer", "Explore"]
            }}}
        }]});
        let decision = crate::proxy::routing::RoutingDecision::main_session();
        let ctx = TransformContext {
            decision: &decision,
            system_text: "",
            request_id: "t",
        };
        assert_eq!(rewriter().apply(&mut body, &ctx), StepOutcome::Modified);
        assert_eq!(
            body["tools"][0]["input_schema"]["properties"]["subagent_type"]["enum"],
            json!(["code-reviewer"])
        );
    }

    #[test]
    fn test_no_task_tool_is_noop() {
        let mut body = json!({"tools": [{"name": "Read", "description": "Reads"}]});
        let decision = crate::proxy::routing::RoutingDecision::main_session();
        let ctx = TransformContext {
            decision: &decision,
            system_text: "",
            request_id: "t",
        };
        assert_eq!(rewriter().apply(&mut body, &ctx), StepOutcome::Unchanged);
    }
}
