//! Upstream forwarding
//!
//! One `reqwest::Client` (and therefore one connection pool) per provider. The
//! client's own pool caps idle connections only, so a semaphore per provider
//! enforces `max_connections`: excess requests queue for up to `pool_timeout`
//! and then fail with 503.
//!
//! Successful streaming responses are relayed chunk by chunk. Each chunk is
//! also copied to an optional tap channel for the tool-use scanner. The slot
//! permit lives inside the relayed stream, so it is released when the stream
//! finishes or when the client disconnects and axum drops the body.

use crate::config::{Config, LimitsConfig, ProviderConfig};
use crate::proxy::error::ProxyError;
use crate::proxy::routing::Provider;
use crate::proxy::sse;
use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Response, StatusCode},
};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

// ============================================================================
// Endpoints
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Messages,
    CountTokens,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Messages => "/v1/messages",
            Self::CountTokens => "/v1/messages/count_tokens",
        }
    }
}

// ============================================================================
// Provider Target
// ============================================================================

/// Pool and slot accounting for one provider
pub struct ProviderTarget {
    provider: Provider,
    base_url: String,
    client: reqwest::Client,
    slots: Arc<Semaphore>,
}

impl ProviderTarget {
    pub fn new(provider: Provider, config: &ProviderConfig, limits: &LimitsConfig) -> Result<Self> {
        if limits.max_connections > Semaphore::MAX_PERMITS {
            anyhow::bail!(
                "max_connections {} exceeds the limit of {}",
                limits.max_connections,
                Semaphore::MAX_PERMITS
            );
        }
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(limits.max_keepalive)
            .pool_idle_timeout(limits.keepalive_expiry())
            .connect_timeout(limits.connect_timeout())
            // Force HTTP/1.1 to avoid HTTP/2 connection reset issues with some providers
            .http1_only()
            .build()
            .with_context(|| {
                format!("Failed to create HTTP client for {}", provider.display_name())
            })?;

        Ok(Self {
            provider,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            slots: Arc::new(Semaphore::new(limits.max_connections)),
        })
    }

    pub fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    async fn acquire(&self, wait: Duration) -> Result<OwnedSemaphorePermit, ProxyError> {
        match tokio::time::timeout(wait, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            // Closed semaphore is treated like exhaustion
            Ok(Err(_)) | Err(_) => Err(ProxyError::PoolTimeout {
                provider: self.provider,
                waited_secs: wait.as_secs_f64(),
            }),
        }
    }
}

// ============================================================================
// Forwarded Response
// ============================================================================

pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

pub enum ForwardedBody {
    /// Whole body read (non-streaming, token count, or upstream error)
    Buffered(Bytes),
    /// Live relay of a successful SSE stream
    Streaming(ByteStream),
}

pub struct Forwarded {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: ForwardedBody,
    /// Time until upstream response headers arrived
    pub header_latency: Duration,
}

impl std::fmt::Debug for Forwarded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarded")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field(
                "body",
                &match &self.body {
                    ForwardedBody::Buffered(b) => format!("Buffered({} bytes)", b.len()),
                    ForwardedBody::Streaming(_) => "Streaming".to_string(),
                },
            )
            .finish()
    }
}

impl Forwarded {
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ForwardedBody::Streaming(_))
    }

    /// Status, content type and body as received; nothing else is copied
    pub fn into_response(self) -> Result<Response<Body>, ProxyError> {
        let default_type = match self.body {
            ForwardedBody::Streaming(_) => "text/event-stream",
            ForwardedBody::Buffered(_) => "application/json",
        };
        let content_type = self
            .content_type
            .unwrap_or_else(|| HeaderValue::from_static(default_type));

        let body = match self.body {
            ForwardedBody::Buffered(bytes) => Body::from(bytes),
            ForwardedBody::Streaming(stream) => Body::from_stream(stream),
        };

        Response::builder()
            .status(self.status)
            .header(header::CONTENT_TYPE, content_type)
            .body(body)
            .map_err(|e| ProxyError::ResponseBuild(e.to_string()))
    }
}

/// A sanitized request ready to send
#[derive(Debug)]
pub struct ForwardRequest {
    pub provider: Provider,
    pub endpoint: Endpoint,
    pub body: Bytes,
    pub headers: HeaderMap,
    pub streaming: bool,
}

// ============================================================================
// Forwarder
// ============================================================================

pub struct UpstreamForwarder {
    anthropic: ProviderTarget,
    zai: ProviderTarget,
    pool_timeout: Duration,
    header_timeout: Duration,
    message_timeout: Duration,
    token_count_timeout: Duration,
}

impl UpstreamForwarder {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            anthropic: ProviderTarget::new(Provider::Anthropic, &config.anthropic, &config.limits)?,
            zai: ProviderTarget::new(Provider::Zai, &config.zai, &config.limits)?,
            pool_timeout: config.limits.pool_timeout(),
            header_timeout: config.limits.header_timeout(),
            message_timeout: config.limits.message_timeout(),
            token_count_timeout: config.limits.token_count_timeout(),
        })
    }

    pub fn target(&self, provider: Provider) -> &ProviderTarget {
        match provider {
            Provider::Anthropic => &self.anthropic,
            Provider::Zai => &self.zai,
        }
    }

    pub fn available_slots(&self, provider: Provider) -> usize {
        self.target(provider).available_slots()
    }

    /// Send one request upstream
    ///
    /// Transport failures are returned as `ProxyError` and never retried or
    /// redirected to the other provider. Non-2xx answers are returned as
    /// buffered bodies for verbatim relay.
    pub async fn forward(
        &self,
        request: ForwardRequest,
        tap: Option<mpsc::UnboundedSender<Bytes>>,
    ) -> Result<Forwarded, ProxyError> {
        let provider = request.provider;
        let target = self.target(provider);
        let name = provider.display_name();
        let permit = target.acquire(self.pool_timeout).await?;

        let total_timeout = match request.endpoint {
            Endpoint::Messages => self.message_timeout,
            Endpoint::CountTokens => self.token_count_timeout,
        };
        let header_timeout = self.header_timeout.min(total_timeout);

        let started = Instant::now();
        let send = target
            .client
            .post(target.url(request.endpoint))
            .headers(request.headers)
            .body(request.body)
            .timeout(total_timeout)
            .send();

        let response = match tokio::time::timeout(header_timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                tracing::error!("{} request failed: {}", name, err);
                return Err(ProxyError::from_transport(provider, &err));
            }
            Err(_) => {
                tracing::error!("{} sent no response headers within {:?}", name, header_timeout);
                return Err(ProxyError::UpstreamTimeout {
                    provider,
                    message: format!(
                        "no response headers within {:.1}s",
                        header_timeout.as_secs_f64()
                    ),
                });
            }
        };
        let header_latency = started.elapsed();

        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let is_stream =
            request.streaming && status.is_success() && sse::is_sse_response(response.headers());

        if !is_stream {
            let body = response.bytes().await.map_err(|err| {
                tracing::error!("{} response body failed: {}", name, err);
                ProxyError::from_transport(provider, &err)
            })?;
            drop(permit);

            if !status.is_success() {
                tracing::warn!(
                    "{} returned {}: {}",
                    name,
                    status.as_u16(),
                    String::from_utf8_lossy(&body[..body.len().min(512)])
                );
            }

            return Ok(Forwarded {
                status,
                content_type,
                body: ForwardedBody::Buffered(body),
                header_latency,
            });
        }

        let mut upstream = response.bytes_stream();
        let relay = async_stream::stream! {
            let _permit = permit;
            while let Some(chunk) = upstream.next().await {
                match chunk {
                    Ok(bytes) => {
                        if let Some(tap) = &tap {
                            // Scanner gone means nobody is counting; keep relaying
                            let _ = tap.send(bytes.clone());
                        }
                        yield Ok::<Bytes, std::io::Error>(bytes);
                    }
                    Err(err) => {
                        tracing::error!("{} stream interrupted: {}", name, err);
                        yield Ok(sse::error_event(
                            "api_error",
                            &format!("Upstream stream from {} interrupted: {}", name, err),
                        ));
                        break;
                    }
                }
            }
        };

        Ok(Forwarded {
            status,
            content_type,
            body: ForwardedBody::Streaming(relay.boxed()),
            header_latency,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::test_support::{sse_with_tool_uses, Behavior, FakeUpstream};
    use serde_json::json;

    fn config_for(upstream: &FakeUpstream, limits: LimitsConfig) -> Config {
        let mut config = Config::default();
        config.anthropic.base_url = upstream.base_url();
        config.zai.base_url = upstream.base_url();
        config.limits = limits;
        config
    }

    fn request(provider: Provider, streaming: bool) -> ForwardRequest {
        ForwardRequest {
            provider,
            endpoint: Endpoint::Messages,
            body: Bytes::from(json!({"model": "m", "stream": streaming}).to_string()),
            headers: HeaderMap::new(),
            streaming,
        }
    }

    async fn collect(stream: ByteStream) -> String {
        let chunks: Vec<_> = stream.collect().await;
        let bytes: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        String::from_utf8(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_buffered_json_response() {
        let upstream = FakeUpstream::spawn(Behavior::Json(json!({"id": "msg_1"}))).await;
        let forwarder =
            UpstreamForwarder::from_config(&config_for(&upstream, LimitsConfig::default())).unwrap();

        let forwarded = forwarder.forward(request(Provider::Zai, false), None).await.unwrap();
        assert_eq!(forwarded.status, StatusCode::OK);
        match forwarded.body {
            ForwardedBody::Buffered(bytes) => {
                let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
                assert_eq!(body["id"], "msg_1");
            }
            ForwardedBody::Streaming(_) => panic!("expected buffered body"),
        }
        assert_eq!(upstream.last_path().as_deref(), Some("/v1/messages"));
        assert_eq!(forwarder.available_slots(Provider::Zai), 100);
    }

    #[tokio::test]
    async fn test_application_error_passed_through() {
        let error = json!({"type": "error", "error": {"type": "invalid_request_error", "message": "bad"}});
        let upstream = FakeUpstream::spawn(Behavior::Status(400, error.clone())).await;
        let forwarder =
            UpstreamForwarder::from_config(&config_for(&upstream, LimitsConfig::default())).unwrap();

        let forwarded = forwarder.forward(request(Provider::Anthropic, true), None).await.unwrap();
        assert_eq!(forwarded.status, StatusCode::BAD_REQUEST);
        assert!(!forwarded.is_streaming());
        let response = forwarded.into_response().unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, error);
    }

    #[tokio::test]
    async fn test_stream_relayed_and_tapped() {
        let chunks = sse_with_tool_uses(&["toolu_a", "toolu_b"]);
        let upstream = FakeUpstream::spawn(Behavior::Sse(chunks.clone())).await;
        let forwarder =
            UpstreamForwarder::from_config(&config_for(&upstream, LimitsConfig::default())).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let forwarded = forwarder.forward(request(Provider::Zai, true), Some(tx)).await.unwrap();
        let ForwardedBody::Streaming(stream) = forwarded.body else {
            panic!("expected stream");
        };
        assert_eq!(collect(stream).await, chunks.concat());

        let mut tapped = Vec::new();
        while let Some(chunk) = rx.recv().await {
            tapped.extend_from_slice(&chunk);
        }
        assert_eq!(String::from_utf8(tapped).unwrap(), chunks.concat());
        assert_eq!(forwarder.available_slots(Provider::Zai), 100);
    }

    #[tokio::test]
    async fn test_mid_stream_reset_yields_error_event_and_frees_slot() {
        let chunks = sse_with_tool_uses(&["toolu_a"]);
        let upstream = FakeUpstream::spawn(Behavior::ResetAfter(chunks[..2].to_vec())).await;
        let limits = LimitsConfig {
            max_connections: 2,
            ..Default::default()
        };
        let forwarder = UpstreamForwarder::from_config(&config_for(&upstream, limits)).unwrap();

        let forwarded = forwarder.forward(request(Provider::Zai, true), None).await.unwrap();
        assert_eq!(forwarder.available_slots(Provider::Zai), 1);
        let ForwardedBody::Streaming(stream) = forwarded.body else {
            panic!("expected stream");
        };
        let text = collect(stream).await;

        assert!(text.starts_with(&chunks[0]));
        assert!(text.contains("event: error\ndata: "));
        assert!(text.contains("\"api_error\""));
        assert!(text.ends_with("\n\n"));
        assert_eq!(forwarder.available_slots(Provider::Zai), 2);
    }

    #[test]
    fn test_oversized_connection_ceiling_is_error() {
        let mut config = Config::default();
        config.limits.max_connections = usize::MAX;
        assert!(UpstreamForwarder::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_pool_ceiling_queues_then_times_out() {
        let upstream = FakeUpstream::spawn(Behavior::Stall(vec!["event: ping\n\n".into()])).await;
        let limits = LimitsConfig {
            max_connections: 1,
            pool_timeout: 0.2,
            ..Default::default()
        };
        let forwarder = UpstreamForwarder::from_config(&config_for(&upstream, limits)).unwrap();

        let held = forwarder.forward(request(Provider::Zai, true), None).await.unwrap();
        assert_eq!(forwarder.available_slots(Provider::Zai), 0);

        let err = forwarder
            .forward(request(Provider::Zai, true), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::PoolTimeout { .. }));
        assert_eq!(upstream.calls(), 1);

        // Providers have separate ceilings
        assert_eq!(forwarder.available_slots(Provider::Anthropic), 1);

        // Client disconnect drops the relay and returns the slot
        drop(held);
        assert_eq!(forwarder.available_slots(Provider::Zai), 1);
    }

    #[tokio::test]
    async fn test_header_timeout() {
        let upstream = FakeUpstream::spawn(Behavior::Json(json!({}))).await;
        let limits = LimitsConfig {
            header_timeout: 0.0,
            ..Default::default()
        };
        let forwarder = UpstreamForwarder::from_config(&config_for(&upstream, limits)).unwrap();
        let err = forwarder
            .forward(request(Provider::Zai, false), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamTimeout { .. }));
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(forwarder.available_slots(Provider::Zai), 100);
    }

    #[tokio::test]
    async fn test_connection_refused_is_bad_gateway() {
        // Bind then drop to get a port with no listener
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = Config::default();
        config.zai.base_url = format!("http://{}", addr);
        let forwarder = UpstreamForwarder::from_config(&config).unwrap();

        let err = forwarder
            .forward(request(Provider::Zai, false), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamConnection { .. }));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_count_tokens_endpoint_path() {
        let upstream = FakeUpstream::spawn(Behavior::Json(json!({"input_tokens": 12}))).await;
        let forwarder =
            UpstreamForwarder::from_config(&config_for(&upstream, LimitsConfig::default())).unwrap();
        let mut req = request(Provider::Anthropic, false);
        req.endpoint = Endpoint::CountTokens;
        forwarder.forward(req, None).await.unwrap();
        assert_eq!(upstream.last_path().as_deref(), Some("/v1/messages/count_tokens"));
    }
}
