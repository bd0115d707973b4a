//! z.ai compatibility branch
//!
//! z.ai accepts the Anthropic wire format but rejects or ignores some of its
//! extensions. For z.ai-bound requests the metadata object and every
//! `cache_control` marker are removed, noise reminder blocks are dropped (the
//! CLAUDE.md context reminder is kept), and the configured model is substituted.

use super::patterns::{CLAUDE_MD_MARKER, NOISE_REMINDER_MARKERS, REMINDER_OPEN};
use super::{messages_mut, StepOutcome, TransformContext, TransformStep};
use crate::proxy::routing::Provider;
use serde_json::Value;

fn remove_key(value: &mut Value, key: &str) -> bool {
    value
        .as_object_mut()
        .is_some_and(|obj| obj.remove(key).is_some())
}

/// A text block that is a system reminder carrying no user instruction
fn is_noise_reminder(block: &Value) -> bool {
    if block.get("type").and_then(|t| t.as_str()) != Some("text") {
        return false;
    }
    let Some(text) = block.get("text").and_then(|t| t.as_str()) else {
        return false;
    };
    if !text.contains(REMINDER_OPEN) || text.contains(CLAUDE_MD_MARKER) {
        return false;
    }
    NOISE_REMINDER_MARKERS.iter().any(|m| text.contains(m))
}

/// Remove `metadata` and `cache_control` everywhere z.ai might reject them
///
/// Also used on token-count bodies, which otherwise bypass sanitization.
pub fn strip_anthropic_features(body: &mut Value) -> bool {
    let mut changed = remove_key(body, "metadata");

    if let Some(blocks) = body.get_mut("system").and_then(|s| s.as_array_mut()) {
        for block in blocks.iter_mut() {
            changed |= remove_key(block, "cache_control");
        }
    }

    if let Some(messages) = messages_mut(body) {
        for message in messages.iter_mut() {
            let Some(blocks) = message.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for block in blocks.iter_mut() {
                changed |= remove_key(block, "cache_control");
            }
        }
    }

    if let Some(tools) = super::tools_mut(body) {
        for tool in tools.iter_mut() {
            changed |= remove_key(tool, "cache_control");
        }
    }

    changed
}

fn strip_noise_reminders(body: &mut Value) -> bool {
    let Some(messages) = messages_mut(body) else {
        return false;
    };
    let mut changed = false;
    for message in messages.iter_mut() {
        let Some(blocks) = message.get_mut("content").and_then(|c| c.as_array_mut()) else {
            continue;
        };
        let before = blocks.len();
        blocks.retain(|b| !is_noise_reminder(b));
        changed |= blocks.len() != before;
    }
    changed
}

// ============================================================================
// Steps
// ============================================================================

pub struct ZaiCompat;

impl TransformStep for ZaiCompat {
    fn name(&self) -> &'static str {
        "zai_compat"
    }

    fn should_apply(&self, ctx: &TransformContext) -> bool {
        ctx.decision.provider() == Provider::Zai
    }

    fn apply(&self, body: &mut Value, _ctx: &TransformContext) -> StepOutcome {
        let features = strip_anthropic_features(body);
        let noise = strip_noise_reminders(body);
        StepOutcome::from_changed(features || noise)
    }
}

/// Substitutes the decided z.ai model
pub struct ModelOverride;

impl TransformStep for ModelOverride {
    fn name(&self) -> &'static str {
        "model_override"
    }

    fn should_apply(&self, ctx: &TransformContext) -> bool {
        ctx.decision.model_override.is_some()
    }

    fn apply(&self, body: &mut Value, ctx: &TransformContext) -> StepOutcome {
        let (Some(model), Some(obj)) = (&ctx.decision.model_override, body.as_object_mut()) else {
            return StepOutcome::Unchanged;
        };
        let previous = obj.insert("model".to_string(), Value::String(model.clone()));
        tracing::info!(
            request_id = ctx.request_id,
            "Model {} (was {})",
            model,
            previous
                .as_ref()
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
        StepOutcome::from_changed(previous.as_ref().and_then(|m| m.as_str()) != Some(model.as_str()))
    }
}
