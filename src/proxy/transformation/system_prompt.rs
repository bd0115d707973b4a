//! Main-session system prompt replacement
//!
//! The block carrying the interactive-CLI sentinel is replaced by the configured
//! template. The template's `<env>…</env>` section is filled with the client's
//! own env block so working directory, platform and date survive. Other system
//! blocks (e.g. the OAuth identity line) are left in place.

use super::patterns::SYSTEM_PROMPT_SENTINEL;
use super::{StepOutcome, TransformContext, TransformStep};
use serde_json::Value;

pub struct SystemPromptReplacer {
    template: String,
}

impl SystemPromptReplacer {
    pub fn new(template: String) -> Self {
        Self { template }
    }

    /// Template with its env section swapped for the one found in `original`
    pub fn render(&self, original: &str) -> String {
        let Some(original_env) = extract_env_block(original) else {
            return self.template.clone();
        };
        match extract_env_block(&self.template) {
            Some(template_env) => self.template.replacen(template_env, original_env, 1),
            None => self.template.clone(),
        }
    }
}

/// `<env>…</env>` including both tags
pub(crate) fn extract_env_block(text: &str) -> Option<&str> {
    let start = text.find("<env>")?;
    let end = text[start..].find("</env>")? + start + "</env>".len();
    Some(&text[start..end])
}

impl TransformStep for SystemPromptReplacer {
    fn name(&self) -> &'static str {
        "system_prompt"
    }

    fn apply(&self, body: &mut Value, ctx: &TransformContext) -> StepOutcome {
        let Some(system) = body.get_mut("system") else {
            return StepOutcome::Unchanged;
        };

        let replaced = match system {
            Value::String(text) if text.contains(SYSTEM_PROMPT_SENTINEL) => {
                let rendered = self.render(text);
                let changed = rendered != *text;
                *text = rendered;
                Some(changed)
            }
            Value::Array(blocks) => blocks
                .iter_mut()
                .find(|b| {
                    b.get("text")
                        .and_then(|t| t.as_str())
                        .is_some_and(|t| t.contains(SYSTEM_PROMPT_SENTINEL))
                })
                .and_then(|block| {
                    let original = block.get("text")?.as_str()?;
                    let rendered = self.render(original);
                    let changed = rendered != original;
                    block["text"] = Value::String(rendered);
                    Some(changed)
                }),
            _ => None,
        };

        match replaced {
            Some(changed) => StepOutcome::from_changed(changed),
            // Subagent prompts never carry the sentinel
            None if ctx.decision.is_subagent => StepOutcome::Unchanged,
            None => StepOutcome::Degraded("system prompt sentinel not found".to_string()),
        }
    }
}
