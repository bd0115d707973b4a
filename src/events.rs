// Events emitted by the proxy for the JSONL request log
//
// One request produces a short, ordered series of events sharing a
// `request_id`: Request → RouteDecided → TransformsApplied → (ToolWarning) →
// Response, or Rejected / UpstreamError when it fails. Using an enum keeps the
// sink and the writer type-safe.

use crate::proxy::routing::{Provider, Target};
use crate::proxy::tracker::WarningTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured per-request event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")] // {"type": "route_decided", ...}
pub enum ProxyEvent {
    /// A request arrived at an inbound endpoint
    Request {
        request_id: String,
        timestamp: DateTime<Utc>,
        endpoint: String,
        body_size: usize,
        model: Option<String>,
        stream: bool,
    },

    /// The route chosen for a request
    RouteDecided {
        request_id: String,
        timestamp: DateTime<Utc>,
        target: Target,
        provider: Provider,
        is_subagent: bool,
        model_override: Option<String>,
    },

    /// Sanitization steps that changed (or failed to change) the body
    TransformsApplied {
        request_id: String,
        timestamp: DateTime<Utc>,
        applied: Vec<String>,
        degraded: Vec<String>,
        bytes_before: usize,
        bytes_after: usize,
    },

    /// A subagent crossed a tool-usage tier and was warned
    ToolWarning {
        request_id: String,
        timestamp: DateTime<Utc>,
        conversation: String,
        tier: WarningTier,
        tool_count: usize,
    },

    /// Upstream answered (any status)
    Response {
        request_id: String,
        timestamp: DateTime<Utc>,
        provider: Provider,
        status: u16,
        streaming: bool,
        /// Time until upstream headers arrived
        header_latency_ms: u64,
        /// Total time including a buffered body (streams end later)
        duration_ms: u64,
    },

    /// Transport-level failure talking to a provider
    UpstreamError {
        request_id: String,
        timestamp: DateTime<Utc>,
        provider: Provider,
        status: u16,
        message: String,
    },

    /// Rejected before forwarding (size, JSON)
    Rejected {
        request_id: String,
        timestamp: DateTime<Utc>,
        status: u16,
        reason: String,
    },
}

impl ProxyEvent {
    pub fn request_id(&self) -> &str {
        match self {
            Self::Request { request_id, .. }
            | Self::RouteDecided { request_id, .. }
            | Self::TransformsApplied { request_id, .. }
            | Self::ToolWarning { request_id, .. }
            | Self::Response { request_id, .. }
            | Self::UpstreamError { request_id, .. }
            | Self::Rejected { request_id, .. } => request_id,
        }
    }
}

/// Event tagged with the proxy run it belongs to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedEvent {
    pub run_id: String,
    #[serde(flatten)]
    pub event: ProxyEvent,
}

impl TrackedEvent {
    pub fn new(run_id: impl Into<String>, event: ProxyEvent) -> Self {
        Self {
            run_id: run_id.into(),
            event,
        }
    }
}

/// Helper to generate unique IDs for correlating requests/responses
pub fn generate_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let count = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}", Utc::now().timestamp_millis(), count)
}

/// Run id: YYYYMMDD-HHMMSS-XXXX
pub fn generate_run_id() -> String {
    let now = Utc::now();
    format!(
        "{}-{:04x}",
        now.format("%Y%m%d-%H%M%S"),
        now.timestamp_subsec_micros() & 0xffff
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case_tag() {
        let event = ProxyEvent::RouteDecided {
            request_id: "r1".into(),
            timestamp: Utc::now(),
            target: Target::ZaiAirModel,
            provider: Provider::Zai,
            is_subagent: true,
            model_override: Some("glm-4.5-air".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "route_decided");
        assert_eq!(json["target"], "zai_air_model");
        assert_eq!(json["provider"], "zai");
        assert_eq!(event.request_id(), "r1");
    }

    #[test]
    fn test_tracked_event_is_flat() {
        let tracked = TrackedEvent::new(
            "run",
            ProxyEvent::ToolWarning {
                request_id: "r2".into(),
                timestamp: Utc::now(),
                conversation: "s-abc".into(),
                tier: WarningTier::Strong,
                tool_count: 40,
            },
        );
        let json = serde_json::to_value(&tracked).unwrap();
        assert_eq!(json["run_id"], "run");
        assert_eq!(json["type"], "tool_warning");
        assert_eq!(json["tier"], "strong");
    }

    #[test]
    fn test_generated_ids_unique() {
        assert_ne!(generate_id(), generate_id());
        assert_eq!(generate_run_id().len(), "20260101-120000-abcd".len());
    }
}
