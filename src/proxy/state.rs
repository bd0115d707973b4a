//! Proxy state shared by every request handler

use std::sync::Arc;

use anyhow::Result;

use crate::config::{Config, ProviderConfig};
use crate::events::ProxyEvent;
use crate::logging::EventSink;

use super::routing::{Provider, RouteDecider};
use super::tracker::ToolUsageTracker;
use super::transformation::TransformationPipeline;
use super::upstream::UpstreamForwarder;

// ─────────────────────────────────────────────────────────────────────────────
// Proxy State
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a request needs, built once at startup
///
/// Only the tracker and the forwarder's slot accounting are mutable; the
/// rest is read-only for the life of the process.
#[derive(Clone)]
pub struct ProxyState {
    /// Resolved configuration
    pub(crate) config: Arc<Config>,
    /// Pure request classifier
    pub(crate) decider: Arc<RouteDecider>,
    /// Sanitization steps in fixed order
    pub(crate) pipeline: Arc<TransformationPipeline>,
    /// Per-conversation subagent tool counts
    pub(crate) tracker: Arc<ToolUsageTracker>,
    /// Per-provider pools and slot ceilings
    pub(crate) forwarder: Arc<UpstreamForwarder>,
    /// Fire-and-forget structured event output
    pub(crate) events: EventSink,
}

impl ProxyState {
    pub fn from_config(config: Config, events: EventSink) -> Result<Self> {
        let decider = RouteDecider::from_config(&config)?;
        let pipeline = TransformationPipeline::from_config(&config.sanitize)?;
        let tracker = ToolUsageTracker::new(config.limits.subagent_tool_warning);
        let forwarder = UpstreamForwarder::from_config(&config)?;

        Ok(Self {
            config: Arc::new(config),
            decider: Arc::new(decider),
            pipeline: Arc::new(pipeline),
            tracker: Arc::new(tracker),
            forwarder: Arc::new(forwarder),
            events,
        })
    }

    pub(crate) fn provider_config(&self, provider: Provider) -> &ProviderConfig {
        match provider {
            Provider::Anthropic => &self.config.anthropic,
            Provider::Zai => &self.config.zai,
        }
    }

    /// Send an event to the event log; never blocks
    pub(crate) fn emit(&self, event: ProxyEvent) {
        self.events.emit(event);
    }
}
