//! Utility functions for request/response processing

use crate::config::ProviderConfig;
use crate::proxy::error::ProxyError;
use crate::proxy::routing::Provider;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde_json::Value;
use sha2::{Digest, Sha256};

const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// Session id used when a request carries no `metadata.user_id`
const ANONYMOUS_SESSION: &str = "anonymous";

// ─────────────────────────────────────────────────────────────────────────────
// Request Body
// ─────────────────────────────────────────────────────────────────────────────

/// Collect an inbound body, failing as soon as more than `limit` bytes arrive
///
/// The client may still be sending when the error is returned; the rest of
/// the body is never read.
pub(crate) async fn read_body_limited(body: Body, limit: usize) -> Result<Bytes, ProxyError> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ProxyError::BodyRead(e.to_string()))?;
        let received = buf.len() + chunk.len();
        if received > limit {
            return Err(ProxyError::PayloadTooLarge {
                size: received,
                limit,
            });
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf.freeze())
}

/// Flatten the system prompt (string or block array) into one string
///
/// Blocks are joined with a single space; non-text blocks are ignored.
pub(crate) fn system_prompt_text(body: &Value) -> String {
    match body.get("system") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

/// Text of the first user message (the subagent's task prompt)
pub(crate) fn first_user_text(body: &Value) -> Option<String> {
    let messages = body.get("messages")?.as_array()?;
    let first_user = messages
        .iter()
        .find(|msg| msg.get("role").and_then(|r| r.as_str()) == Some("user"))?;

    match first_user.get("content")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let text: Vec<&str> = parts
                .iter()
                .filter_map(|p| {
                    if p.get("type")?.as_str()? == "text" {
                        p.get("text")?.as_str()
                    } else {
                        None
                    }
                })
                .collect();
            (!text.is_empty()).then(|| text.join("\n"))
        }
        _ => None,
    }
}

/// Session id from `metadata.user_id` (`user_…_account_…_session_<id>`)
pub(crate) fn session_id(body: &Value) -> Option<&str> {
    let user_id = body.get("metadata")?.get("user_id")?.as_str()?;
    let (_, session) = user_id.split_once("session_")?;
    (!session.is_empty()).then_some(session)
}

/// Key identifying one subagent conversation for tool-usage tracking
///
/// Several subagents run concurrently inside one session, so the session id
/// alone is not enough; the first user message (the delegated task) tells
/// them apart and stays constant for the conversation's lifetime.
pub(crate) fn conversation_key(body: &Value) -> String {
    let session = session_id(body).unwrap_or(ANONYMOUS_SESSION);
    let task = first_user_text(body).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(task.as_bytes());
    let hash = hasher.finalize();

    format!("{}-{}", session, &format!("{:x}", hash)[..16])
}

// ─────────────────────────────────────────────────────────────────────────────
// Headers
// ─────────────────────────────────────────────────────────────────────────────

/// Check if a header carries client credentials
pub(crate) fn is_auth_header(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower == "authorization" || lower == "x-api-key"
}

/// Check if a header is Anthropic-specific (`anthropic-version`, `anthropic-beta`, …)
pub(crate) fn is_anthropic_header(name: &str) -> bool {
    name.to_lowercase().starts_with("anthropic-")
}

/// Headers for the upstream request
///
/// - Anthropic: client credentials and every `anthropic-*` header pass through
/// - z.ai: only `anthropic-version` is kept; credentials come from config
///
/// A provider configured with a key (not passthrough) never sees the client's
/// own credentials.
pub(crate) fn build_upstream_headers(
    incoming: &HeaderMap,
    provider: Provider,
    config: &ProviderConfig,
) -> HeaderMap {
    let mut upstream = HeaderMap::new();
    upstream.insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    let passthrough_auth = config.auth.is_passthrough();

    for (name, value) in incoming.iter() {
        let keep = if is_auth_header(name.as_str()) {
            passthrough_auth
        } else if is_anthropic_header(name.as_str()) {
            provider == Provider::Anthropic || name.as_str() == "anthropic-version"
        } else {
            false
        };
        if keep {
            upstream.append(name.clone(), value.clone());
        }
    }

    if !upstream.contains_key("anthropic-version") {
        upstream.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(DEFAULT_ANTHROPIC_VERSION),
        );
    }

    if let Some((name, value)) = config.auth.build_header() {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                upstream.insert(HeaderName::from_static(name), value);
            }
            Err(_) => {
                tracing::warn!(
                    "{} credential contains invalid header characters; sending without it",
                    provider.display_name()
                );
            }
        }
    } else if !passthrough_auth {
        tracing::warn!(
            "No API key resolved for {}; request will be sent unauthenticated",
            provider.display_name()
        );
    }

    upstream
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_read_body_limited_within_limit() {
        let bytes = read_body_limited(Body::from("0123456789"), 10).await.unwrap();
        assert_eq!(&bytes[..], b"0123456789");
    }

    #[tokio::test]
    async fn test_read_body_limited_stops_at_first_excess_chunk() {
        // The body never ends; the reader must give up on the overflow alone
        let chunks = stream::iter([
            Ok::<_, std::io::Error>(Bytes::from(vec![b'a'; 8])),
            Ok(Bytes::from(vec![b'b'; 8])),
        ])
        .chain(stream::pending());

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            read_body_limited(Body::from_stream(chunks), 10),
        )
        .await
        .expect("reader waited for the rest of the body");

        match result {
            Err(ProxyError::PayloadTooLarge { size, limit }) => {
                assert_eq!(size, 16);
                assert_eq!(limit, 10);
            }
            other => panic!("expected PayloadTooLarge, got {:?}", other),
        }
    }
    use crate::config::{AuthMethod, ProviderAuth};
    use serde_json::json;

    fn incoming() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer oauth-token"));
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert("anthropic-beta", HeaderValue::from_static("oauth-2025-04-20"));
        headers.insert("user-agent", HeaderValue::from_static("claude-cli/2.0"));
        headers.insert("host", HeaderValue::from_static("localhost:8082"));
        headers
    }

    #[test]
    fn test_system_prompt_text() {
        assert_eq!(system_prompt_text(&json!({"system": "plain"})), "plain");
        assert_eq!(
            system_prompt_text(&json!({"system": [
                {"type": "text", "text": "a"},
                {"type": "image"},
                {"type": "text", "text": "b"}
            ]})),
            "a b"
        );
        assert_eq!(system_prompt_text(&json!({"system": 5})), "");
        assert_eq!(system_prompt_text(&json!({})), "");
    }

    #[test]
    fn test_session_id() {
        let body = json!({"metadata": {"user_id": "user_abc_account_def_session_1234-5678"}});
        assert_eq!(session_id(&body), Some("1234-5678"));
        assert_eq!(session_id(&json!({"metadata": {"user_id": "user_abc"}})), None);
        assert_eq!(session_id(&json!({"metadata": {"user_id": "x_session_"}})), None);
        assert_eq!(session_id(&json!({})), None);
    }

    #[test]
    fn test_conversation_key_separates_subagents() {
        let task = |text: &str| {
            json!({
                "metadata": {"user_id": "user_a_session_s1"},
                "messages": [
                    {"role": "user", "content": [{"type": "text", "text": text}]},
                    {"role": "assistant", "content": "ok"},
                    {"role": "user", "content": "later turn"}
                ]
            })
        };
        let a = conversation_key(&task("find the config loader"));
        let b = conversation_key(&task("review the parser"));
        assert!(a.starts_with("s1-"));
        assert_eq!(a.len(), "s1-".len() + 16);
        assert_ne!(a, b);
        assert_eq!(a, conversation_key(&task("find the config loader")));
    }

    #[test]
    fn test_conversation_key_without_metadata() {
        let key = conversation_key(&json!({"messages": []}));
        assert!(key.starts_with("anonymous-"));
    }

    #[test]
    fn test_anthropic_headers_pass_through() {
        let headers = build_upstream_headers(
            &incoming(),
            Provider::Anthropic,
            &ProviderConfig::anthropic_default(),
        );
        assert_eq!(headers["authorization"], "Bearer oauth-token");
        assert_eq!(headers["anthropic-beta"], "oauth-2025-04-20");
        assert_eq!(headers["content-type"], "application/json");
        assert!(headers.get("host").is_none());
        assert!(headers.get("user-agent").is_none());
    }

    #[test]
    fn test_zai_headers_use_configured_key() {
        let config = ProviderConfig {
            auth: ProviderAuth {
                method: AuthMethod::XApiKey,
                key: Some("zai-secret".to_string()),
                key_env: None,
            },
            ..ProviderConfig::zai_default()
        };
        let headers = build_upstream_headers(&incoming(), Provider::Zai, &config);
        assert_eq!(headers["x-api-key"], "zai-secret");
        assert_eq!(headers["anthropic-version"], "2023-06-01");
        assert!(headers.get("authorization").is_none());
        assert!(headers.get("anthropic-beta").is_none());
    }

    #[test]
    fn test_zai_default_version_when_client_sends_none() {
        let config = ProviderConfig {
            auth: ProviderAuth {
                method: AuthMethod::XApiKey,
                key: Some("k".to_string()),
                key_env: None,
            },
            ..ProviderConfig::zai_default()
        };
        let headers = build_upstream_headers(&HeaderMap::new(), Provider::Zai, &config);
        assert_eq!(headers["anthropic-version"], DEFAULT_ANTHROPIC_VERSION);
    }
}
