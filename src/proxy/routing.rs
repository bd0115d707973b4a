//! Request classification: which upstream handles a request
//!
//! Classification is a pure function of the system-prompt text and the
//! configured marker lists. Markers are compiled once at startup into an
//! ordered rule table; the decider evaluates every rule against the prompt
//! and resolves the hits by precedence.
//!
//! ```text
//! anthropic_markers hit ──────────────► Anthropic   (exclusion wins)
//! subagent_markers hit ─┬─ air hit ──► ZaiAirModel
//!                       └──────────────► ZaiDefault
//! no hit ─────────────────────────────► Anthropic   (main session)
//! ```

use crate::config::{Config, RoutingConfig};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

const REGEX_PREFIX: &str = "re:";

// ============================================================================
// Pattern Matcher
// ============================================================================

/// A single configured marker
#[derive(Debug, Clone)]
pub enum Marker {
    Substring(String),
    Pattern(Regex),
}

impl Marker {
    /// Parse a raw config marker; `re:` selects regex mode
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.strip_prefix(REGEX_PREFIX) {
            Some(pattern) => Regex::new(pattern)
                .map(Self::Pattern)
                .with_context(|| format!("invalid marker regex {:?}", pattern)),
            None => Ok(Self::Substring(raw.to_string())),
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            // An empty substring would match everything
            Self::Substring(s) => !s.is_empty() && text.contains(s.as_str()),
            Self::Pattern(re) => re.is_match(text),
        }
    }
}

/// An unordered set of markers; matches when any member matches
#[derive(Debug, Clone, Default)]
pub struct MarkerSet {
    markers: Vec<Marker>,
}

impl MarkerSet {
    pub fn compile(raw: &[String]) -> Result<Self> {
        let markers = raw
            .iter()
            .map(|m| Marker::parse(m))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { markers })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.markers.iter().any(|m| m.is_match(text))
    }
}

// ============================================================================
// Routing Decision
// ============================================================================

/// Upstream provider identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Anthropic,
    Zai,
}

impl Provider {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Anthropic => "Anthropic",
            Self::Zai => "z.ai",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Route chosen for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Anthropic,
    ZaiDefault,
    ZaiAirModel,
}

impl Target {
    pub fn provider(&self) -> Provider {
        match self {
            Self::Anthropic => Provider::Anthropic,
            Self::ZaiDefault | Self::ZaiAirModel => Provider::Zai,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::ZaiDefault => "zai",
            Self::ZaiAirModel => "zai_air",
        }
    }
}

/// Immutable per-request routing outcome; computed once, trusted downstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub target: Target,
    /// Model substituted into the forwarded body, if any
    pub model_override: Option<String>,
    /// A subagent marker matched (even when an anthropic marker won)
    pub is_subagent: bool,
}

impl RoutingDecision {
    /// Main-session decision with no override
    pub fn main_session() -> Self {
        Self {
            target: Target::Anthropic,
            model_override: None,
            is_subagent: false,
        }
    }

    pub fn provider(&self) -> Provider {
        self.target.provider()
    }

    /// Subagent that was forced onto Anthropic by an exclusion marker
    pub fn is_excluded_subagent(&self) -> bool {
        self.is_subagent && self.target == Target::Anthropic
    }
}

// ============================================================================
// Rule Table
// ============================================================================

/// What a rule's hit means
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleKind {
    /// Forces Anthropic; evaluated first
    ForceAnthropic,
    /// Marks the request as a subagent
    Subagent,
    /// Downgrades a subagent to the air model
    AirModel,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub marker: Marker,
    pub kind: RuleKind,
}

/// Which rule kinds matched a prompt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleHits {
    pub force_anthropic: bool,
    pub subagent: bool,
    pub air_model: bool,
}

/// Ordered marker rules, sorted by precedence
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    pub fn from_config(config: &RoutingConfig) -> Result<Self> {
        let mut rules = Vec::new();
        for (raw, kind) in [
            (&config.anthropic_markers, RuleKind::ForceAnthropic),
            (&config.subagent_markers, RuleKind::Subagent),
            (&config.air_model_patterns, RuleKind::AirModel),
        ] {
            for marker in raw {
                rules.push(Rule {
                    marker: Marker::parse(marker)?,
                    kind,
                });
            }
        }
        rules.sort_by_key(|r| r.kind);
        Ok(Self { rules })
    }

    /// Evaluate every rule against the prompt text
    pub fn evaluate(&self, text: &str) -> RuleHits {
        let mut hits = RuleHits::default();
        for rule in &self.rules {
            let slot = match rule.kind {
                RuleKind::ForceAnthropic => &mut hits.force_anthropic,
                RuleKind::Subagent => &mut hits.subagent,
                RuleKind::AirModel => &mut hits.air_model,
            };
            if !*slot && rule.marker.is_match(text) {
                *slot = true;
            }
        }
        hits
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

// ============================================================================
// Route Decider
// ============================================================================

/// Request attributes the decider may consult besides the prompt
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestAttributes<'a> {
    /// Model named by the client
    pub model: Option<&'a str>,
}

/// Pure classifier built from configuration at startup
#[derive(Debug, Clone)]
pub struct RouteDecider {
    table: RuleTable,
    zai_model: Option<String>,
    air_model: Option<String>,
}

impl RouteDecider {
    pub fn new(table: RuleTable, zai_model: Option<String>, air_model: Option<String>) -> Self {
        Self {
            table,
            zai_model,
            air_model,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            RuleTable::from_config(&config.routing)?,
            config.zai.model.clone(),
            config.zai.air_model.clone(),
        ))
    }

    /// Classify a request by its system-prompt text
    pub fn decide(&self, system_text: &str, attrs: RequestAttributes<'_>) -> RoutingDecision {
        let hits = self.table.evaluate(system_text);

        let target = if hits.force_anthropic || !hits.subagent {
            Target::Anthropic
        } else if hits.air_model && self.air_model.is_some() {
            Target::ZaiAirModel
        } else {
            Target::ZaiDefault
        };

        let model_override = match target {
            Target::Anthropic => None,
            Target::ZaiDefault => self.zai_model.clone(),
            Target::ZaiAirModel => self.air_model.clone(),
        }
        // Overriding with the same name is a no-op
        .filter(|m| attrs.model != Some(m.as_str()));

        RoutingDecision {
            target,
            model_override,
            is_subagent: hits.subagent,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.table.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
