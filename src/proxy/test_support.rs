//! In-process fake upstream for forwarder and handler tests

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    response::Response,
    routing::any,
    Router,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the fake answers with
#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    /// 200 with a JSON body
    Json(Value),
    /// 200 SSE stream made of these chunks
    Sse(Vec<String>),
    /// SSE chunks, then the connection is torn down mid-body
    ResetAfter(Vec<String>),
    /// SSE chunks, then the stream never ends
    Stall(Vec<String>),
    /// Application error passed through verbatim
    Status(u16, Value),
}

#[derive(Debug)]
struct FakeState {
    behavior: Behavior,
    calls: AtomicUsize,
    last_path: Mutex<Option<String>>,
    last_body: Mutex<Option<Value>>,
    last_headers: Mutex<Option<HeaderMap>>,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeUpstream {
    pub addr: SocketAddr,
    state: Arc<FakeState>,
}

impl FakeUpstream {
    pub async fn spawn(behavior: Behavior) -> Self {
        let state = Arc::new(FakeState {
            behavior,
            calls: AtomicUsize::new(0),
            last_path: Mutex::new(None),
            last_body: Mutex::new(None),
            last_headers: Mutex::new(None),
        });

        let app = Router::new()
            .route("/*path", any(handle))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn last_path(&self) -> Option<String> {
        self.state.last_path.lock().unwrap().clone()
    }

    pub fn last_body(&self) -> Option<Value> {
        self.state.last_body.lock().unwrap().clone()
    }

    pub fn last_headers(&self) -> Option<HeaderMap> {
        self.state.last_headers.lock().unwrap().clone()
    }
}

async fn handle(State(state): State<Arc<FakeState>>, req: Request<Body>) -> Response<Body> {
    state.calls.fetch_add(1, Ordering::SeqCst);
    *state.last_path.lock().unwrap() = Some(req.uri().path().to_string());
    *state.last_headers.lock().unwrap() = Some(req.headers().clone());
    let bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    *state.last_body.lock().unwrap() = serde_json::from_slice(&bytes).ok();

    match state.behavior.clone() {
        Behavior::Json(value) => json_response(StatusCode::OK, &value),
        Behavior::Status(status, value) => {
            json_response(StatusCode::from_u16(status).unwrap(), &value)
        }
        Behavior::Sse(chunks) => {
            let stream = futures::stream::iter(
                chunks
                    .into_iter()
                    .map(|c| Ok::<Bytes, std::io::Error>(Bytes::from(c))),
            );
            sse_response(Body::from_stream(stream))
        }
        Behavior::ResetAfter(chunks) => {
            let stream = async_stream::stream! {
                for chunk in chunks {
                    yield Ok::<Bytes, std::io::Error>(Bytes::from(chunk));
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                yield Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                ));
            };
            sse_response(Body::from_stream(stream))
        }
        Behavior::Stall(chunks) => {
            let stream = async_stream::stream! {
                for chunk in chunks {
                    yield Ok::<Bytes, std::io::Error>(Bytes::from(chunk));
                }
                futures::future::pending::<()>().await;
            };
            sse_response(Body::from_stream(stream))
        }
    }
}

fn json_response(status: StatusCode, value: &Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

fn sse_response(body: Body) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .body(body)
        .unwrap()
}

/// Minimal SSE transcript announcing the given tool uses
pub(crate) fn sse_with_tool_uses(ids: &[&str]) -> Vec<String> {
    let mut chunks = vec![
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"glm-4.6\"}}\n\n".to_string(),
    ];
    for (index, id) in ids.iter().enumerate() {
        chunks.push(format!(
            "event: content_block_start\ndata: {{\"type\":\"content_block_start\",\"index\":{},\"content_block\":{{\"type\":\"tool_use\",\"id\":\"{}\",\"name\":\"Read\",\"input\":{{}}}}}}\n\n",
            index, id
        ));
    }
    chunks.push("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n".to_string());
    chunks
}
