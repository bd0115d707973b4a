//! Subagent tool-usage tracking
//!
//! Counts the distinct `tool_use` ids seen per conversation and escalates a
//! warning once the count crosses the configured threshold:
//!
//! ```text
//! count ≥ threshold       → Soft
//! count ≥ threshold + 10  → Strong
//! count ≥ threshold + 20  → Critical
//! ```
//!
//! Tiers are monotonic per conversation and each tier is handed out once. All
//! reads and writes go through one mutex, so concurrent requests for the same
//! conversation cannot lose increments or inject the same tier twice. Counting
//! by id makes repeated observations of the same history idempotent.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

const STRONG_STEP: usize = 10;
const CRITICAL_STEP: usize = 20;

// ============================================================================
// Warning Tier
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningTier {
    #[default]
    None,
    Soft,
    Strong,
    Critical,
}

impl WarningTier {
    /// Tier reached by `count` tool uses under `threshold` (0 disables)
    pub fn for_count(count: usize, threshold: u32) -> Self {
        let threshold = threshold as usize;
        if threshold == 0 || count < threshold {
            Self::None
        } else if count >= threshold + CRITICAL_STEP {
            Self::Critical
        } else if count >= threshold + STRONG_STEP {
            Self::Strong
        } else {
            Self::Soft
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Soft => "soft",
            Self::Strong => "strong",
            Self::Critical => "critical",
        }
    }

    /// Reminder text for this tier, `None` for `WarningTier::None`
    pub fn message(&self, count: usize, threshold: u32) -> Option<String> {
        let threshold = threshold as usize;
        let text = match self {
            Self::None => return None,
            Self::Soft => format!(
                "Tool usage notice: You have used {} tools (threshold: {}). Consider wrapping up \
                 your current task and returning your status to the main session. It's better to \
                 return partial progress than to continue indefinitely.",
                count, threshold
            ),
            Self::Strong => format!(
                "WARNING: You have used {} tools (threshold: {}). You should wrap up your current \
                 task now and return your status to the main session. Finish what you're doing \
                 and report back - don't start new work.",
                count,
                threshold + STRONG_STEP
            ),
            Self::Critical => format!(
                "CRITICAL: You have used {} tools (limit: {}). You MUST stop now and return your \
                 status to the main session immediately. Report what you've completed and what \
                 remains. Do not use any more tools.",
                count,
                threshold + CRITICAL_STEP
            ),
        };
        Some(format!("<system-reminder>{}</system-reminder>", text))
    }
}

// ============================================================================
// Tracker
// ============================================================================

#[derive(Debug, Default)]
struct ConversationUsage {
    tool_ids: HashSet<String>,
    last_tier: WarningTier,
}

/// Outcome of observing a request for one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Distinct tool uses seen so far
    pub count: usize,
    /// Tier newly crossed by this observation; inject it exactly once
    pub crossed: Option<WarningTier>,
    /// Tier delivered before this observation, restored by `release`
    pub previous: WarningTier,
}

/// Process-wide per-conversation counters, owned by the proxy state
#[derive(Debug)]
pub struct ToolUsageTracker {
    threshold: u32,
    conversations: Mutex<HashMap<String, ConversationUsage>>,
}

impl ToolUsageTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_enabled(&self) -> bool {
        self.threshold > 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConversationUsage>> {
        // A panic while holding the lock leaves counts intact
        self.conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Merge tool-use ids from an outgoing request and claim any newly reached tier
    ///
    /// The returned tier is marked as delivered before the lock is released, so
    /// concurrent callers never both receive it.
    pub fn observe<I, S>(&self, key: &str, tool_use_ids: I) -> Observation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.is_enabled() {
            return Observation {
                count: 0,
                crossed: None,
                previous: WarningTier::None,
            };
        }

        let mut conversations = self.lock();
        let mut ids = tool_use_ids.into_iter().map(Into::into).peekable();
        if ids.peek().is_none() && !conversations.contains_key(key) {
            return Observation {
                count: 0,
                crossed: None,
                previous: WarningTier::None,
            };
        }

        let usage = conversations.entry(key.to_string()).or_default();
        usage.tool_ids.extend(ids);

        let count = usage.tool_ids.len();
        let previous = usage.last_tier;
        let tier = WarningTier::for_count(count, self.threshold);
        let crossed = if tier > usage.last_tier {
            usage.last_tier = tier;
            Some(tier)
        } else {
            None
        };

        Observation {
            count,
            crossed,
            previous,
        }
    }

    /// Hand back a tier claimed by `observe` that could not be injected
    ///
    /// Only rolls back if no later observation has moved the tier on.
    pub fn release(&self, key: &str, observation: &Observation) {
        let Some(crossed) = observation.crossed else {
            return;
        };
        if let Some(usage) = self.lock().get_mut(key) {
            if usage.last_tier == crossed {
                usage.last_tier = observation.previous;
            }
        }
    }

    /// Record tool-use ids seen in a response; tiers are evaluated on the next request
    pub fn record<I, S>(&self, key: &str, tool_use_ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.is_enabled() {
            return 0;
        }
        let mut ids = tool_use_ids.into_iter().map(Into::into).peekable();
        if ids.peek().is_none() {
            return self.count(key);
        }
        let mut conversations = self.lock();
        let usage = conversations.entry(key.to_string()).or_default();
        usage.tool_ids.extend(ids);
        usage.tool_ids.len()
    }

    pub fn count(&self, key: &str) -> usize {
        self.lock()
            .get(key)
            .map(|u| u.tool_ids.len())
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn tier(&self, key: &str) -> WarningTier {
        self.lock()
            .get(key)
            .map(|u| u.last_tier)
            .unwrap_or_default()
    }

    pub fn conversation_count(&self) -> usize {
        self.lock().len()
    }

    /// Forget every conversation
    pub fn reset(&self) {
        self.lock().clear();
    }
}

// ============================================================================
// Body helpers
// ============================================================================

/// `tool_use` ids in the request's assistant messages
pub fn request_tool_use_ids(body: &Value) -> Vec<String> {
    let Some(messages) = body.get("messages").and_then(|m| m.as_array()) else {
        return Vec::new();
    };
    messages
        .iter()
        .filter(|m| m.get("role").and_then(|r| r.as_str()) == Some("assistant"))
        .filter_map(|m| m.get("content").and_then(|c| c.as_array()))
        .flatten()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_use"))
        .filter_map(|b| b.get("id").and_then(|id| id.as_str()).map(String::from))
        .collect()
}

/// `tool_use` ids in a buffered (non-streaming) response message
pub fn response_tool_use_ids(message: &Value) -> Vec<String> {
    message
        .get("content")
        .and_then(|c| c.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_use"))
                .filter_map(|b| b.get("id").and_then(|id| id.as_str()).map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// Prepend the tier's reminder to the last user message; returns whether it was injected
pub fn inject(body: &mut Value, tier: WarningTier, count: usize, threshold: u32) -> bool {
    let Some(reminder) = tier.message(count, threshold) else {
        return false;
    };
    let Some(message) = body
        .get_mut("messages")
        .and_then(|m| m.as_array_mut())
        .and_then(|messages| {
            messages
                .iter_mut()
                .rev()
                .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("user"))
        })
        .and_then(|m| m.as_object_mut())
    else {
        return false;
    };

    let content = match message.remove("content") {
        Some(Value::String(text)) => Value::String(format!("{}\n\n{}", reminder, text)),
        Some(Value::Array(mut blocks)) => {
            blocks.insert(0, json!({"type": "text", "text": reminder}));
            Value::Array(blocks)
        }
        _ => Value::String(reminder),
    };
    message.insert("content".to_string(), content);
    true
}

// ============================================================================
// Tests
// ============================================================================
