//! Request sanitization pipeline
//!
//! Every `/v1/messages` body passes through an ordered list of steps before it
//! is forwarded upstream. The pipeline takes ownership of the parsed body (the
//! only copy of the inbound request), and each step mutates that value in place.
//!
//! # Architecture
//!
//! ```text
//! owned body → [strip_tools → task_tool → reminders… → system_prompt
//!               → descriptions… → provider branch] → SanitizedRequest
//! ```
//!
//! # Step Outcomes
//!
//! - **Unchanged**: step found nothing to do
//! - **Modified**: step rewrote part of the body
//! - **Degraded**: an expected marker was missing; logged at warn, pipeline continues
//!
//! # Fail-Safe Guarantee
//!
//! Steps only touch values whose shape they recognise. A body with missing or
//! oddly typed fields passes through with whatever steps could apply.

mod descriptions;
mod patterns;
mod provider;
mod system_prompt;
mod system_reminder;
mod task_tool;
mod tools;

pub use descriptions::{BashDescriptionMinimizer, ReadRuleRelaxer, SearchToolNotice};
pub use provider::{strip_anthropic_features, ModelOverride, ZaiCompat};
pub use system_prompt::SystemPromptReplacer;
pub use system_reminder::{
    ClaudeMdStripper, MalwareReminderStripper, PlanModeRewriter, PostEnvStripper,
    ToolResultLogStripper,
};
pub use task_tool::TaskToolRewriter;
pub use tools::ToolStripper;

use crate::config::SanitizeConfig;
use crate::proxy::routing::{MarkerSet, RoutingDecision};
use anyhow::{Context, Result};
use serde_json::Value;

// ============================================================================
// Step Outcome
// ============================================================================

/// Result of running one step against the body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Unchanged,
    Modified,
    /// Expected content was absent; the step was a no-op
    Degraded(String),
}

impl StepOutcome {
    pub fn from_changed(changed: bool) -> Self {
        if changed {
            Self::Modified
        } else {
            Self::Unchanged
        }
    }
}

// ============================================================================
// Transform Context
// ============================================================================

/// Read-only request facts available to every step
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    /// Routing outcome; steps trust it unconditionally
    pub decision: &'a RoutingDecision,

    /// System prompt text as received (blocks joined with a space)
    pub system_text: &'a str,

    /// Proxy-assigned request id for log correlation
    pub request_id: &'a str,
}

// ============================================================================
// Transform Step Trait
// ============================================================================

/// One in-place rewrite of the request body
///
/// Steps are synchronous and must not panic on unexpected shapes; return
/// `Unchanged` instead.
pub trait TransformStep: Send + Sync {
    /// Stable name for logs and events
    fn name(&self) -> &'static str;

    /// Fast-path filter; skipped steps are not reported
    fn should_apply(&self, _ctx: &TransformContext) -> bool {
        true
    }

    fn apply(&self, body: &mut Value, ctx: &TransformContext) -> StepOutcome;
}

// ============================================================================
// Sanitized Request
// ============================================================================

/// Request body after the pipeline, with a record of what changed
#[derive(Debug, Clone)]
pub struct SanitizedRequest {
    body: Value,
    /// Steps that modified the body, in execution order
    pub applied: Vec<&'static str>,
    /// Steps that degraded to identity
    pub degraded: Vec<&'static str>,
}

impl SanitizedRequest {
    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Value {
        &mut self.body
    }

    pub fn is_streaming(&self) -> bool {
        self.body
            .get("stream")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[cfg(test)]
impl SanitizedRequest {
    pub fn tools(&self) -> Option<&Vec<Value>> {
        self.body.get("tools")?.as_array()
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.body.get("metadata")
    }
}

// ============================================================================
// Transformation Pipeline
// ============================================================================

/// Fixed-order list of sanitization steps
pub struct TransformationPipeline {
    steps: Vec<Box<dyn TransformStep>>,
}

impl TransformationPipeline {
    /// Create an empty pipeline (passthrough)
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Build the standard step order from config
    ///
    /// Order matters: reminder and env stripping read the original prompt
    /// layout, so they run before the system prompt is replaced; description
    /// edits assume the final tool list.
    pub fn from_config(config: &SanitizeConfig) -> Result<Self> {
        let template = match &config.system_prompt_file {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Cannot read system prompt file {}", path.display()))?,
            None => patterns::DEFAULT_SYSTEM_PROMPT.to_string(),
        };
        let claude_md_markers = MarkerSet::compile(&config.strip_claude_md_markers)?;

        let mut pipeline = Self::new();
        pipeline.register(ToolStripper::new(&config.hidden_tools));
        pipeline.register(TaskToolRewriter::new(&config.stripped_agents)?);
        pipeline.register(MalwareReminderStripper);
        pipeline.register(PlanModeRewriter);
        pipeline.register(ToolResultLogStripper);
        pipeline.register(PostEnvStripper);
        pipeline.register(ClaudeMdStripper::new(claude_md_markers));
        pipeline.register(SystemPromptReplacer::new(template));
        pipeline.register(SearchToolNotice);
        pipeline.register(ReadRuleRelaxer);
        pipeline.register(BashDescriptionMinimizer);
        pipeline.register(ZaiCompat);
        pipeline.register(ModelOverride);
        Ok(pipeline)
    }

    /// Append a step; steps run in registration order
    pub fn register(&mut self, step: impl TransformStep + 'static) {
        self.steps.push(Box::new(step));
    }

    /// Run every applicable step over the owned body
    pub fn transform(&self, mut body: Value, ctx: &TransformContext) -> SanitizedRequest {
        let mut applied = Vec::new();
        let mut degraded = Vec::new();

        for step in &self.steps {
            if !step.should_apply(ctx) {
                continue;
            }

            match step.apply(&mut body, ctx) {
                StepOutcome::Unchanged => {}
                StepOutcome::Modified => {
                    tracing::trace!(
                        request_id = ctx.request_id,
                        step = step.name(),
                        "Request body transformed"
                    );
                    applied.push(step.name());
                }
                StepOutcome::Degraded(reason) => {
                    tracing::warn!(
                        request_id = ctx.request_id,
                        step = step.name(),
                        reason = %reason,
                        "Transform step {} skipped: {}",
                        step.name(),
                        reason
                    );
                    degraded.push(step.name());
                }
            }
        }

        SanitizedRequest {
            body,
            applied,
            degraded,
        }
    }

    /// Registered step names, in order
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

impl Default for TransformationPipeline {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Shared body accessors
// ============================================================================

pub(crate) fn tools_mut(body: &mut Value) -> Option<&mut Vec<Value>> {
    body.get_mut("tools")?.as_array_mut()
}

pub(crate) fn messages_mut(body: &mut Value) -> Option<&mut Vec<Value>> {
    body.get_mut("messages")?.as_array_mut()
}

/// Find a tool definition by name
pub(crate) fn tool_named_mut<'a>(body: &'a mut Value, name: &str) -> Option<&'a mut Value> {
    tools_mut(body)?
        .iter_mut()
        .find(|t| t.get("name").and_then(|n| n.as_str()) == Some(name))
}

/// Rewrite a tool's string description; returns whether it changed
pub(crate) fn edit_tool_description<F>(body: &mut Value, name: &str, edit: F) -> bool
where
    F: FnOnce(&str) -> String,
{
    let Some(tool) = tool_named_mut(body, name) else {
        return false;
    };
    let Some(description) = tool.get("description").and_then(|d| d.as_str()) else {
        return false;
    };
    if description.is_empty() {
        return false;
    }
    let edited = edit(description);
    if edited == description {
        return false;
    }
    tool["description"] = Value::String(edited);
    true
}

// ============================================================================
// Tests
// ============================================================================
