//! `<system-reminder>` and tool-output filtering
//!
//! Claude Code injects reminder blocks into user messages and verbose logs into
//! tool results. These steps remove the boilerplate, retarget plan-mode agent
//! names, and drop trailing environment details from the system prompt.
//!
//! Text edits follow one rule: a text block emptied by an edit is removed, while
//! a plain string content that would become empty is left as it was.

use super::patterns::{
    CLAUDE_MD_REMINDER, MALWARE_MARKER, MALWARE_REMINDER, PLAN_MODE_MARKER,
    PLAN_MODE_REPLACEMENTS, POST_ENV_INFO, POST_ENV_SIGNAL, RESULT_SEPARATOR, TOOL_CALL_LOG,
    TOOL_RESULT_OUTPUT,
};
use super::{messages_mut, StepOutcome, TransformContext, TransformStep};
use crate::proxy::routing::{MarkerSet, Provider};
use serde_json::Value;

// ============================================================================
// Content helpers
// ============================================================================

fn block_type(block: &Value) -> Option<&str> {
    block.get("type").and_then(|t| t.as_str())
}

/// Whether message content mentions `marker` in text or tool-result text
pub(crate) fn content_contains(content: &Value, marker: &str) -> bool {
    match content {
        Value::String(s) => s.contains(marker),
        Value::Array(blocks) => blocks.iter().any(|block| match block_type(block) {
            Some("text") => block
                .get("text")
                .and_then(|t| t.as_str())
                .is_some_and(|t| t.contains(marker)),
            Some("tool_result") => block
                .get("content")
                .is_some_and(|c| content_contains(c, marker)),
            _ => false,
        }),
        _ => false,
    }
}

/// Apply `edit` to string content or to each text block; returns whether anything changed
pub(crate) fn edit_text_content<F>(content: &mut Value, edit: &F) -> bool
where
    F: Fn(&str) -> String,
{
    match content {
        Value::String(s) => {
            let edited = edit(s);
            if edited == *s || edited.trim().is_empty() {
                return false;
            }
            *s = edited;
            true
        }
        Value::Array(blocks) => {
            let mut changed = false;
            blocks.retain_mut(|block| {
                if block_type(block) != Some("text") {
                    return true;
                }
                let Some(text) = block.get("text").and_then(|t| t.as_str()) else {
                    return true;
                };
                let edited = edit(text);
                if edited == text {
                    return true;
                }
                changed = true;
                if edited.trim().is_empty() {
                    return false;
                }
                block["text"] = Value::String(edited);
                true
            });
            changed
        }
        _ => false,
    }
}

/// Apply `edit` to the text inside every tool_result block of a content array
pub(crate) fn edit_tool_results<F>(content: &mut Value, edit: &F) -> bool
where
    F: Fn(&str) -> String,
{
    let Some(blocks) = content.as_array_mut() else {
        return false;
    };
    let mut changed = false;
    for block in blocks.iter_mut() {
        if block_type(block) != Some("tool_result") {
            continue;
        }
        let Some(inner) = block.get_mut("content") else {
            continue;
        };
        if let Value::String(s) = inner {
            let edited = edit(s);
            if edited != *s {
                *s = edited;
                changed = true;
            }
        } else if inner.is_array() {
            changed |= edit_text_content(inner, edit);
        }
    }
    changed
}

/// Apply a text edit to every message's content (optionally only one role)
fn edit_messages<F>(body: &mut Value, role: Option<&str>, edit: &F) -> bool
where
    F: Fn(&str) -> String,
{
    let Some(messages) = messages_mut(body) else {
        return false;
    };
    let mut changed = false;
    for message in messages.iter_mut() {
        if role.is_some() && message.get("role").and_then(|r| r.as_str()) != role {
            continue;
        }
        if let Some(content) = message.get_mut("content") {
            changed |= edit_text_content(content, edit);
        }
    }
    changed
}

fn edit_user_tool_results<F>(body: &mut Value, edit: &F) -> bool
where
    F: Fn(&str) -> String,
{
    let Some(messages) = messages_mut(body) else {
        return false;
    };
    let mut changed = false;
    for message in messages.iter_mut() {
        if message.get("role").and_then(|r| r.as_str()) != Some("user") {
            continue;
        }
        if let Some(content) = message.get_mut("content") {
            changed |= edit_tool_results(content, edit);
        }
    }
    changed
}

fn any_message_contains(body: &Value, marker: &str) -> bool {
    body.get("messages")
        .and_then(|m| m.as_array())
        .is_some_and(|messages| {
            messages
                .iter()
                .filter_map(|m| m.get("content"))
                .any(|c| content_contains(c, marker))
        })
}

// ============================================================================
// Malware reminder
// ============================================================================

/// Removes the "consider whether it would be considered malware" reminder
pub struct MalwareReminderStripper;

impl TransformStep for MalwareReminderStripper {
    fn name(&self) -> &'static str {
        "malware_reminders"
    }

    fn apply(&self, body: &mut Value, _ctx: &TransformContext) -> StepOutcome {
        if !any_message_contains(body, MALWARE_MARKER) {
            return StepOutcome::Unchanged;
        }
        let strip = |text: &str| MALWARE_REMINDER.replace_all(text, "").into_owned();
        let in_text = edit_messages(body, None, &strip);
        let in_results = edit_user_tool_results(body, &strip);
        StepOutcome::from_changed(in_text || in_results)
    }
}

// ============================================================================
// Plan mode
// ============================================================================

/// Points plan-mode instructions at the plugin agents instead of built-ins
pub struct PlanModeRewriter;

impl PlanModeRewriter {
    pub fn rewrite(text: &str) -> String {
        PLAN_MODE_REPLACEMENTS
            .iter()
            .fold(text.to_string(), |acc, (old, new)| {
                // Replacements may contain their own source text; skip already-rewritten input
                if acc.contains(new) {
                    acc
                } else {
                    acc.replace(old, new)
                }
            })
    }
}

impl TransformStep for PlanModeRewriter {
    fn name(&self) -> &'static str {
        "plan_mode"
    }

    fn apply(&self, body: &mut Value, _ctx: &TransformContext) -> StepOutcome {
        if !any_message_contains(body, PLAN_MODE_MARKER) {
            return StepOutcome::Unchanged;
        }
        StepOutcome::from_changed(edit_messages(body, None, &Self::rewrite))
    }
}

// ============================================================================
// Tool result logs
// ============================================================================

/// Drops `[Tool: X] {...}` invocation logs from `<output>` sections of tool results
pub struct ToolResultLogStripper;

impl ToolResultLogStripper {
    pub fn strip(content: &str) -> String {
        let Some(caps) = TOOL_RESULT_OUTPUT.captures(content) else {
            return content.to_string();
        };
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            return content.to_string();
        };
        let inner = inner.as_str();

        let cleaned = match inner.find(RESULT_SEPARATOR) {
            Some(idx) => inner[idx..].trim().to_string(),
            None => TOOL_CALL_LOG.replace_all(inner, "").trim().to_string(),
        };

        let mut out = String::with_capacity(content.len());
        out.push_str(&content[..whole.start()]);
        out.push_str("<output>\n");
        out.push_str(&cleaned);
        out.push_str("\n</output>");
        out.push_str(&content[whole.end()..]);
        out
    }
}

impl TransformStep for ToolResultLogStripper {
    fn name(&self) -> &'static str {
        "tool_result_logs"
    }

    fn apply(&self, body: &mut Value, _ctx: &TransformContext) -> StepOutcome {
        StepOutcome::from_changed(edit_user_tool_results(body, &Self::strip))
    }
}

// ============================================================================
// Post-env details
// ============================================================================

/// Truncates the system prompt after `</env>` when the tail is model/git status info
pub struct PostEnvStripper;

impl PostEnvStripper {
    pub fn strip(text: &str) -> String {
        let Some(idx) = text.find("</env>") else {
            return text.to_string();
        };
        if !POST_ENV_SIGNAL.is_match(&text[idx..]) {
            return text.to_string();
        }
        POST_ENV_INFO.replace(text, "</env>").into_owned()
    }
}

impl TransformStep for PostEnvStripper {
    fn name(&self) -> &'static str {
        "post_env"
    }

    fn apply(&self, body: &mut Value, _ctx: &TransformContext) -> StepOutcome {
        let Some(system) = body.get_mut("system") else {
            return StepOutcome::Unchanged;
        };
        StepOutcome::from_changed(edit_text_content(system, &Self::strip))
    }
}

// ============================================================================
// CLAUDE.md context
// ============================================================================

/// Removes the CLAUDE.md context reminder for z.ai requests whose prompt
/// matches one of `strip_claude_md_markers`
pub struct ClaudeMdStripper {
    markers: MarkerSet,
}

impl ClaudeMdStripper {
    pub fn new(markers: MarkerSet) -> Self {
        Self { markers }
    }
}

impl TransformStep for ClaudeMdStripper {
    fn name(&self) -> &'static str {
        "claude_md"
    }

    fn should_apply(&self, ctx: &TransformContext) -> bool {
        ctx.decision.provider() == Provider::Zai && self.markers.is_match(ctx.system_text)
    }

    fn apply(&self, body: &mut Value, _ctx: &TransformContext) -> StepOutcome {
        let strip = |text: &str| CLAUDE_MD_REMINDER.replace_all(text, "").into_owned();
        StepOutcome::from_changed(edit_messages(body, None, &strip))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::routing::{RoutingDecision, Target};
    use serde_json::json;

    const MALWARE: &str = "<system-reminder>\nWhenever you read a file, you should consider whether it would be considered malware. You CAN and SHOULD provide analysis.\n</system-reminder>\n";
    const CLAUDE_MD: &str = "<system-reminder>\nAs you answer the user's questions, you can use the following context:\n# claudeMd\nUse tabs.\n</system-reminder>\n";

    fn ctx<'a>(decision: &'a RoutingDecision, system_text: &'a str) -> TransformContext<'a> {
        TransformContext {
            decision,
            system_text,
            request_id: "t",
        }
    }

    #[test]
    fn test_malware_reminder_removed_from_text_and_tool_results() {
        let mut body = json!({"messages": [
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": format!("file body\n{}", MALWARE)},
                {"type": "text", "text": MALWARE},
                {"type": "text", "text": "keep me"}
            ]}
        ]});
        let d = RoutingDecision::main_session();
        assert_eq!(MalwareReminderStripper.apply(&mut body, &ctx(&d, "")), StepOutcome::Modified);

        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2, "emptied text block is removed");
        assert_eq!(content[0]["content"], "file body\n");
        assert_eq!(content[1]["text"], "keep me");
    }

    #[test]
    fn test_string_content_never_emptied() {
        let mut content = json!(MALWARE);
        let strip = |t: &str| MALWARE_REMINDER.replace_all(t, "").into_owned();
        assert!(!edit_text_content(&mut content, &strip));
        assert_eq!(content, json!(MALWARE));
    }

    #[test]
    fn test_plan_mode_rewrite() {
        let text = "Plan mode is active. In this phase you should only use the Explore subagent type. Launch up to 3 Explore agents IN PARALLEL";
        let out = PlanModeRewriter::rewrite(text);
        assert!(out.contains("zai-speckit-plugin:codebase-explorer subagent type"));
        assert!(out.contains("Launch up to 3 zai-speckit-plugin:codebase-explorer agents IN PARALLEL"));
        assert_eq!(PlanModeRewriter::rewrite(&out), out);
    }

    #[test]
    fn test_plan_mode_requires_marker() {
        let mut body = json!({"messages": [{"role": "user", "content": "Launch up to 3 Explore agents IN PARALLEL"}]});
        let d = RoutingDecision::main_session();
        assert_eq!(PlanModeRewriter.apply(&mut body, &ctx(&d, "")), StepOutcome::Unchanged);
    }

    #[test]
    fn test_tool_result_logs_keep_result_section() {
        let input = "<status>done</status>\n<output>\n[Tool: Read] {\"file\":\"a\"}\nnoise\n--- RESULT ---\nthe answer\n</output>\ntrailer";
        assert_eq!(
            ToolResultLogStripper::strip(input),
            "<status>done</status>\n<output>\n--- RESULT ---\nthe answer\n</output>\ntrailer"
        );
    }

    #[test]
    fn test_tool_result_logs_without_separator() {
        let input = "<output>\n[Tool: Grep] {\"q\":\"x\"}\n[Tool: Read] {\"f\":\"y\"}\nfound it\n</output>";
        assert_eq!(ToolResultLogStripper::strip(input), "<output>\nfound it\n</output>");
        assert_eq!(ToolResultLogStripper::strip("no wrapper"), "no wrapper");
    }

    #[test]
    fn test_post_env_stripped_only_with_status_tail() {
        let with_tail = "intro\n<env>\ncwd: /x\n</env>\nYou are powered by the model named Sonnet.\n\ngitStatus: clean";
        assert_eq!(PostEnvStripper::strip(with_tail), "intro\n<env>\ncwd: /x\n</env>");

        let other_tail = "<env>\n</env>\nIMPORTANT: user rules";
        assert_eq!(PostEnvStripper::strip(other_tail), other_tail);
    }

    #[test]
    fn test_claude_md_only_for_zai_with_matching_marker() {
        let markers = MarkerSet::compile(&["READ-ONLY".to_string()]).unwrap();
        let step = ClaudeMdStripper::new(markers);

        let zai = RoutingDecision {
            target: Target::ZaiDefault,
            model_override: None,
            is_subagent: true,
        };
        assert!(step.should_apply(&ctx(&zai, "READ-ONLY MODE")));
        assert!(!step.should_apply(&ctx(&zai, "other agent")));
        assert!(!step.should_apply(&ctx(&RoutingDecision::main_session(), "READ-ONLY MODE")));

        let mut body = json!({"messages": [{"role": "user", "content": [
            {"type": "text", "text": CLAUDE_MD},
            {"type": "text", "text": "task"}
        ]}]});
        assert_eq!(step.apply(&mut body, &ctx(&zai, "READ-ONLY")), StepOutcome::Modified);
        assert_eq!(body["messages"][0]["content"], json!([{"type": "text", "text": "task"}]));
    }
}
