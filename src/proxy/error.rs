//! Proxy error types and response handling

use axum::{
    body::Body,
    http::{header, Response, StatusCode},
    response::IntoResponse,
};
use serde_json::json;

use super::routing::Provider;

/// Errors that can occur during proxying
///
/// Upstream application errors (non-2xx with a body) are not represented here;
/// they are relayed to the client unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("request body exceeds the {limit} byte limit ({size} bytes received)")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("request body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("no upstream connection available to {provider} within {waited_secs}s")]
    PoolTimeout { provider: Provider, waited_secs: f64 },

    #[error("{provider} did not respond in time: {message}")]
    UpstreamTimeout { provider: Provider, message: String },

    #[error("could not reach {provider}: {message}")]
    UpstreamConnection { provider: Provider, message: String },

    #[error("failed to build response: {0}")]
    ResponseBuild(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidJson(_) | Self::BodyRead(_) => StatusCode::BAD_REQUEST,
            Self::PoolTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamConnection { .. } => StatusCode::BAD_GATEWAY,
            Self::ResponseBuild(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// `error.type` in the Anthropic error envelope
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::PayloadTooLarge { .. } => "request_too_large",
            Self::InvalidJson(_) | Self::BodyRead(_) => "invalid_request_error",
            Self::PoolTimeout { .. } => "overloaded_error",
            Self::UpstreamTimeout { .. } | Self::UpstreamConnection { .. } => "api_error",
            Self::ResponseBuild(_) => "api_error",
        }
    }

    /// Map a reqwest transport failure onto the taxonomy
    pub fn from_transport(provider: Provider, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout {
                provider,
                message: err.to_string(),
            }
        } else {
            Self::UpstreamConnection {
                provider,
                message: err.to_string(),
            }
        }
    }

    /// Provider involved, for transport failures
    pub fn provider(&self) -> Option<Provider> {
        match self {
            Self::PoolTimeout { provider, .. }
            | Self::UpstreamTimeout { provider, .. }
            | Self::UpstreamConnection { provider, .. } => Some(*provider),
            _ => None,
        }
    }

    pub fn envelope(&self) -> serde_json::Value {
        json!({
            "type": "error",
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
            }
        })
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!("Proxy error: {} - {}", status, self);
        } else {
            tracing::warn!("Rejected request: {} - {}", status, self);
        }

        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(self.envelope().to_string()))
            .unwrap_or_else(|_| Response::new(Body::from("Internal error building error response")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ProxyError::PayloadTooLarge { size: 2, limit: 1 }, 413),
            (ProxyError::InvalidJson("x".into()), 400),
            (ProxyError::PoolTimeout { provider: Provider::Zai, waited_secs: 1.0 }, 503),
            (
                ProxyError::UpstreamTimeout { provider: Provider::Zai, message: "x".into() },
                504,
            ),
            (
                ProxyError::UpstreamConnection { provider: Provider::Anthropic, message: "x".into() },
                502,
            ),
            (ProxyError::ResponseBuild("x".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(err.status().as_u16(), status, "{:?}", err);
        }
    }

    #[test]
    fn test_envelope_shape() {
        let err = ProxyError::PayloadTooLarge {
            size: 62_914_560,
            limit: 52_428_800,
        };
        let envelope = err.envelope();
        assert_eq!(envelope["type"], "error");
        assert_eq!(envelope["error"]["type"], "request_too_large");
        assert!(envelope["error"]["message"]
            .as_str()
            .unwrap()
            .contains("52428800"));
    }

    #[tokio::test]
    async fn test_into_response_is_json() {
        let response = ProxyError::InvalidJson("expected value".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }
}
