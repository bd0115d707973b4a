//! Request handlers
//!
//! `/v1/messages` runs the full sequence:
//!
//! ```text
//! size check → decide route → sanitize → (z.ai) track + warn → forward → relay
//!                                                                  └─ tap → scan tool uses → tracker
//! ```
//!
//! `/v1/messages/count_tokens` is routed the same way but skips sanitization
//! and tracking. Failures are answered with `ProxyError`; upstream application
//! errors are relayed untouched.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Response, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::events::{generate_id, ProxyEvent};

use super::error::ProxyError;
use super::helpers::{
    build_upstream_headers, conversation_key, read_body_limited, system_prompt_text,
};
use super::routing::{Provider, RequestAttributes, RoutingDecision};
use super::sse::{self, SseLineBuffer};
use super::state::ProxyState;
use super::tracker::{self, ToolUsageTracker};
use super::transformation::{strip_anthropic_features, TransformContext};
use super::upstream::{Endpoint, ForwardRequest, Forwarded, ForwardedBody};

// ─────────────────────────────────────────────────────────────────────────────
// Endpoints
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) async fn messages(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    body: Body,
) -> Response<Body> {
    let request_id = generate_id();
    respond(
        &state,
        &request_id,
        state.handle_messages(&request_id, &headers, body).await,
    )
}

pub(crate) async fn count_tokens(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    body: Body,
) -> Response<Body> {
    let request_id = generate_id();
    respond(
        &state,
        &request_id,
        state.handle_count_tokens(&request_id, &headers, body).await,
    )
}

/// Client telemetry batches are accepted and dropped
pub(crate) async fn event_logging_batch(State(state): State<ProxyState>, body: Body) -> StatusCode {
    // Drained so keep-alive connections stay usable, within the same ceiling as messages
    match read_body_limited(body, state.config.limits.max_body_size).await {
        Ok(_) => StatusCode::NO_CONTENT,
        Err(err) => err.status(),
    }
}

pub(crate) async fn health(State(state): State<ProxyState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": crate::config::VERSION,
        "tracked_conversations": state.tracker.conversation_count(),
        "available_slots": {
            "anthropic": state.forwarder.available_slots(Provider::Anthropic),
            "zai": state.forwarder.available_slots(Provider::Zai),
        },
    }))
}

fn respond(
    state: &ProxyState,
    request_id: &str,
    result: Result<Response<Body>, ProxyError>,
) -> Response<Body> {
    match result {
        Ok(response) => response,
        Err(err) => {
            let status = err.status().as_u16();
            let event = match err.provider() {
                Some(provider) => ProxyEvent::UpstreamError {
                    request_id: request_id.to_string(),
                    timestamp: Utc::now(),
                    provider,
                    status,
                    message: err.to_string(),
                },
                None => ProxyEvent::Rejected {
                    request_id: request_id.to_string(),
                    timestamp: Utc::now(),
                    status,
                    reason: err.to_string(),
                },
            };
            state.emit(event);
            err.into_response()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestration
// ─────────────────────────────────────────────────────────────────────────────

impl ProxyState {
    /// Read the body, reject oversize bodies, parse JSON
    ///
    /// Nothing reaches a provider before this succeeds.
    async fn read_json(
        &self,
        request_id: &str,
        endpoint: Endpoint,
        body: Body,
    ) -> Result<(Value, usize), ProxyError> {
        let bytes = read_body_limited(body, self.config.limits.max_body_size).await?;

        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| ProxyError::InvalidJson(e.to_string()))?;

        self.emit(ProxyEvent::Request {
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
            endpoint: endpoint.path().to_string(),
            body_size: bytes.len(),
            model: value.get("model").and_then(|m| m.as_str()).map(String::from),
            stream: value.get("stream").and_then(|s| s.as_bool()).unwrap_or(false),
        });

        Ok((value, bytes.len()))
    }

    fn decide(&self, request_id: &str, body: &Value) -> (RoutingDecision, String) {
        let system_text = system_prompt_text(body);
        let attrs = RequestAttributes {
            model: body.get("model").and_then(|m| m.as_str()),
        };
        let decision = self.decider.decide(&system_text, attrs);

        tracing::info!(
            request_id,
            route = decision.target.as_str(),
            subagent = decision.is_subagent,
            "Routing to {}",
            decision.provider().display_name()
        );
        self.emit(ProxyEvent::RouteDecided {
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
            target: decision.target,
            provider: decision.provider(),
            is_subagent: decision.is_subagent,
            model_override: decision.model_override.clone(),
        });

        (decision, system_text)
    }

    pub(crate) async fn handle_messages(
        &self,
        request_id: &str,
        headers: &HeaderMap,
        body: Body,
    ) -> Result<Response<Body>, ProxyError> {
        let started = Instant::now();
        let (body, bytes_before) = self.read_json(request_id, Endpoint::Messages, body).await?;
        let (decision, system_text) = self.decide(request_id, &body);
        let provider = decision.provider();

        // Keyed before sanitization; the z.ai branch removes metadata
        let tracking = provider == Provider::Zai && self.tracker.is_enabled();
        let key = tracking.then(|| conversation_key(&body));

        let ctx = TransformContext {
            decision: &decision,
            system_text: &system_text,
            request_id,
        };
        let mut sanitized = self.pipeline.transform(body, &ctx);

        if let Some(key) = &key {
            let observation =
                self.tracker.observe(key, tracker::request_tool_use_ids(sanitized.body()));
            if let Some(tier) = observation.crossed {
                if tracker::inject(
                    sanitized.body_mut(),
                    tier,
                    observation.count,
                    self.tracker.threshold(),
                ) {
                    tracing::info!(
                        request_id,
                        tier = tier.as_str(),
                        "Subagent at {} tools, injected {} warning",
                        observation.count,
                        tier.as_str()
                    );
                    self.emit(ProxyEvent::ToolWarning {
                        request_id: request_id.to_string(),
                        timestamp: Utc::now(),
                        conversation: key.clone(),
                        tier,
                        tool_count: observation.count,
                    });
                } else {
                    tracing::debug!(
                        request_id,
                        tier = tier.as_str(),
                        "No user message to carry the warning, deferring"
                    );
                    self.tracker.release(key, &observation);
                }
            }
        }

        let streaming = sanitized.is_streaming();
        let applied = sanitized.applied.iter().map(|s| s.to_string()).collect();
        let degraded = sanitized.degraded.iter().map(|s| s.to_string()).collect();
        let payload = serde_json::to_vec(sanitized.body())
            .map_err(|e| ProxyError::ResponseBuild(e.to_string()))?;

        self.emit(ProxyEvent::TransformsApplied {
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
            applied,
            degraded,
            bytes_before,
            bytes_after: payload.len(),
        });

        let tap = key.as_ref().filter(|_| streaming).map(|key| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(scan_tool_uses(rx, self.tracker.clone(), key.clone()));
            tx
        });

        let request = ForwardRequest {
            provider,
            endpoint: Endpoint::Messages,
            body: Bytes::from(payload),
            headers: build_upstream_headers(headers, provider, self.provider_config(provider)),
            streaming,
        };
        let forwarded = self.forwarder.forward(request, tap).await?;
        self.record_response(request_id, provider, &forwarded, started);

        if let (Some(key), ForwardedBody::Buffered(bytes)) = (&key, &forwarded.body) {
            if forwarded.status.is_success() {
                if let Ok(message) = serde_json::from_slice::<Value>(bytes) {
                    self.tracker
                        .record(key, tracker::response_tool_use_ids(&message));
                }
            }
        }

        forwarded.into_response()
    }

    pub(crate) async fn handle_count_tokens(
        &self,
        request_id: &str,
        headers: &HeaderMap,
        body: Body,
    ) -> Result<Response<Body>, ProxyError> {
        let started = Instant::now();
        let (mut body, _) = self
            .read_json(request_id, Endpoint::CountTokens, body)
            .await?;
        let (decision, _) = self.decide(request_id, &body);
        let provider = decision.provider();

        if provider == Provider::Zai {
            strip_anthropic_features(&mut body);
        }
        let payload =
            serde_json::to_vec(&body).map_err(|e| ProxyError::ResponseBuild(e.to_string()))?;

        let request = ForwardRequest {
            provider,
            endpoint: Endpoint::CountTokens,
            body: Bytes::from(payload),
            headers: build_upstream_headers(headers, provider, self.provider_config(provider)),
            streaming: false,
        };
        let forwarded = self.forwarder.forward(request, None).await?;
        self.record_response(request_id, provider, &forwarded, started);
        forwarded.into_response()
    }

    fn record_response(
        &self,
        request_id: &str,
        provider: Provider,
        forwarded: &Forwarded,
        started: Instant,
    ) {
        self.emit(ProxyEvent::Response {
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
            provider,
            status: forwarded.status.as_u16(),
            streaming: forwarded.is_streaming(),
            header_latency_ms: forwarded.header_latency.as_millis() as u64,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }
}

/// Side-channel consumer of a relayed stream
///
/// Ids are recorded as soon as each `content_block_start` line completes, so a
/// follow-up request arriving right after the stream already sees them.
async fn scan_tool_uses(
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    tracker: Arc<ToolUsageTracker>,
    key: String,
) {
    let mut buffer = SseLineBuffer::new();
    let mut model_seen = false;
    while let Some(chunk) = rx.recv().await {
        let lines = buffer.push(&chunk);
        if !model_seen {
            if let Some(model) = lines.iter().find_map(|line| sse::extract_model(line)) {
                tracing::debug!(conversation = %key, "Upstream serving {}", model);
                model_seen = true;
            }
        }
        let ids: Vec<String> = lines
            .iter()
            .filter_map(|line| sse::extract_tool_use(line))
            .map(|(id, _name)| id)
            .collect();
        if !ids.is_empty() {
            tracker.record(&key, ids);
        }
    }
    if let Some((id, _name)) = buffer.finish().as_deref().and_then(sse::extract_tool_use) {
        tracker.record(&key, [id]);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
