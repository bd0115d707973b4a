//! Tool description micro-edits
//!
//! - Grep/Glob: prefer semantic search for code understanding
//! - Edit/Write: accept semantic-search context in place of a prior Read
//! - Bash: short fixed description

use super::patterns::{
    BASH_BACKGROUND_SUFFIX, EDIT_READ_REPLACEMENT, EDIT_READ_RULE, GLOB_PRIORITY_PREFIX,
    GREP_ALWAYS_DIRECTIVE, GREP_PRIORITY_PREFIX, MINIMAL_BASH_DESCRIPTION,
    MINIMAL_DESCRIPTION_PARAM, WRITE_READ_REPLACEMENT, WRITE_READ_RULE,
};
use super::{edit_tool_description, StepOutcome, TransformContext, TransformStep};
use serde_json::Value;

fn with_prefix(prefix: &str, description: &str) -> String {
    if description.starts_with(prefix) {
        return description.to_string();
    }
    format!("{}{}", prefix, description.trim_start())
}

// ============================================================================
// Search tools
// ============================================================================

pub struct SearchToolNotice;

impl TransformStep for SearchToolNotice {
    fn name(&self) -> &'static str {
        "search_tools"
    }

    fn apply(&self, body: &mut Value, _ctx: &TransformContext) -> StepOutcome {
        let grep = edit_tool_description(body, "Grep", |d| {
            if d.starts_with(GREP_PRIORITY_PREFIX) {
                return d.to_string();
            }
            let without_directive = GREP_ALWAYS_DIRECTIVE.replace_all(d, "");
            with_prefix(GREP_PRIORITY_PREFIX, &without_directive)
        });
        let glob = edit_tool_description(body, "Glob", |d| with_prefix(GLOB_PRIORITY_PREFIX, d));
        StepOutcome::from_changed(grep || glob)
    }
}

// ============================================================================
// Edit / Write
// ============================================================================

pub struct ReadRuleRelaxer;

impl TransformStep for ReadRuleRelaxer {
    fn name(&self) -> &'static str {
        "edit_tools"
    }

    fn apply(&self, body: &mut Value, _ctx: &TransformContext) -> StepOutcome {
        let edit = edit_tool_description(body, "Edit", |d| {
            EDIT_READ_RULE
                .replace_all(d, regex::NoExpand(EDIT_READ_REPLACEMENT))
                .into_owned()
        });
        let write = edit_tool_description(body, "Write", |d| {
            WRITE_READ_RULE
                .replace_all(d, regex::NoExpand(WRITE_READ_REPLACEMENT))
                .into_owned()
        });
        StepOutcome::from_changed(edit || write)
    }
}

// ============================================================================
// Bash
// ============================================================================

pub struct BashDescriptionMinimizer;

impl BashDescriptionMinimizer {
    fn description(has_task_output: bool) -> String {
        let mut description = MINIMAL_BASH_DESCRIPTION.to_string();
        if has_task_output {
            description.push_str(BASH_BACKGROUND_SUFFIX);
        }
        description
    }
}

impl TransformStep for BashDescriptionMinimizer {
    fn name(&self) -> &'static str {
        "bash_description"
    }

    fn apply(&self, body: &mut Value, _ctx: &TransformContext) -> StepOutcome {
        let has_task_output = body
            .get("tools")
            .and_then(|t| t.as_array())
            .is_some_and(|tools| {
                tools
                    .iter()
                    .any(|t| t.get("name").and_then(|n| n.as_str()) == Some("TaskOutput"))
            });

        let Some(bash) = super::tool_named_mut(body, "Bash") else {
            return StepOutcome::Unchanged;
        };
        let Some(tool) = bash.as_object_mut() else {
            return StepOutcome::Unchanged;
        };

        let mut changed = false;
        let description = Self::description(has_task_output);
        if tool.get("description").and_then(|d| d.as_str()) != Some(description.as_str()) {
            tool.insert("description".to_string(), Value::String(description));
            changed = true;
        }

        if let Some(param) = tool
            .get_mut("input_schema")
            .and_then(|s| s.pointer_mut("/properties/description"))
            .and_then(|p| p.as_object_mut())
        {
            if param
                .get("description")
                .is_some_and(|d| d.as_str() != Some(MINIMAL_DESCRIPTION_PARAM))
            {
                param.insert(
                    "description".to_string(),
                    Value::String(MINIMAL_DESCRIPTION_PARAM.to_string()),
                );
                changed = true;
            }
        }

        StepOutcome::from_changed(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::routing::RoutingDecision;
    use serde_json::json;

    fn run(step: &dyn TransformStep, body: &mut Value) -> StepOutcome {
        let decision = RoutingDecision::main_session();
        let ctx = TransformContext {
            decision: &decision,
            system_text: "",
            request_id: "t",
        };
        step.apply(body, &ctx)
    }

    #[test]
    fn test_grep_directive_removed_and_prefixed_once() {
        let mut body = json!({"tools": [{
            "name": "Grep",
            "description": "A powerful search tool\n  - ALWAYS use Grep for search tasks. NEVER invoke grep via Bash.\n  - Supports regex"
        }]});
        assert_eq!(run(&SearchToolNotice, &mut body), StepOutcome::Modified);
        let once = body["tools"][0]["description"].as_str().unwrap().to_string();
        assert!(once.starts_with("⚠️ STOP: Before using Grep"));
        assert!(!once.contains("ALWAYS use Grep"));
        assert!(once.contains("Supports regex"));

        assert_eq!(run(&SearchToolNotice, &mut body), StepOutcome::Unchanged);
        assert_eq!(body["tools"][0]["description"], once.as_str());
    }

    #[test]
    fn test_glob_prefixed() {
        let mut body = json!({"tools": [{"name": "Glob", "description": "Fast file pattern matching"}]});
        run(&SearchToolNotice, &mut body);
        let d = body["tools"][0]["description"].as_str().unwrap();
        assert!(d.starts_with("For understanding code"));
        assert!(d.ends_with("Fast file pattern matching"));
    }

    #[test]
    fn test_edit_and_write_read_rule_relaxed() {
        let mut body = json!({"tools": [
            {"name": "Edit", "description": "Usage:\n- You must use your `Read` tool at least once in the conversation before editing. This tool will error if you attempt an edit without reading the file. \n- Preserve indentation"},
            {"name": "Write", "description": "- If this is an existing file, you MUST use the Read tool first to read the file's contents. This tool will fail if you did not read the file first.\n- Prefer editing"}
        ]});
        assert_eq!(run(&ReadRuleRelaxer, &mut body), StepOutcome::Modified);
        let edit = body["tools"][0]["description"].as_str().unwrap();
        let write = body["tools"][1]["description"].as_str().unwrap();
        assert!(edit.contains("Semantic search results"));
        assert!(!edit.contains("You must use your `Read` tool"));
        assert!(edit.contains("- Preserve indentation"));
        assert!(write.contains("you need context about its contents first"));
        assert!(!write.contains("MUST use the Read tool first"));
    }

    #[test]
    fn test_bash_minimal_without_task_output() {
        let mut body = json!({"tools": [{
            "name": "Bash",
            "description": "very long",
            "input_schema": {"properties": {"description": {"type": "string", "description": "Clear, concise description..."}}}
        }]});
        assert_eq!(run(&BashDescriptionMinimizer, &mut body), StepOutcome::Modified);
        let tool = &body["tools"][0];
        assert_eq!(tool["description"], MINIMAL_BASH_DESCRIPTION);
        assert_eq!(
            tool["input_schema"]["properties"]["description"]["description"],
            MINIMAL_DESCRIPTION_PARAM
        );
        assert_eq!(run(&BashDescriptionMinimizer, &mut body), StepOutcome::Unchanged);
    }

    #[test]
    fn test_bash_background_note_with_task_output() {
        let mut body = json!({"tools": [{"name": "TaskOutput"}, {"name": "Bash", "description": "x"}]});
        run(&BashDescriptionMinimizer, &mut body);
        assert!(body["tools"][1]["description"]
            .as_str()
            .unwrap()
            .contains("run_in_background"));
    }
}
