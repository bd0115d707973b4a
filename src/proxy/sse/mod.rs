// SSE (Server-Sent Events) helpers
//
// Upstream streams are relayed to the client byte-for-byte. A copy of each
// chunk is scanned line by line on the side so tool_use ids can be counted
// without holding the stream back.
//
// Each SSE line has the form:
// ```
// event: <event_type>
// data: <json_payload>
// ```
//
// Only `content_block_start` events matter here: they announce a new tool_use
// block together with its id.

use bytes::Bytes;
use serde_json::json;

// ============================================================================
// SSE Detection
// ============================================================================

/// Check if a response is SSE based on content-type header
pub fn is_sse_response(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false)
}

// ============================================================================
// Line-Level Extractors
// ============================================================================

/// Extract tool_use ID and name from an SSE data line
///
/// Returns `Some((id, name))` if this line starts a tool_use block.
pub fn extract_tool_use(line: &str) -> Option<(String, String)> {
    let data = parse_sse_data_line(line)?;

    if data.get("type")?.as_str()? != "content_block_start" {
        return None;
    }

    let content_block = data.get("content_block")?;
    if content_block.get("type")?.as_str()? != "tool_use" {
        return None;
    }

    let id = content_block.get("id")?.as_str()?.to_string();
    let name = content_block.get("name")?.as_str()?.to_string();

    Some((id, name))
}

/// Extract model name from SSE message_start event
pub fn extract_model(line: &str) -> Option<String> {
    let data = parse_sse_data_line(line)?;

    if data.get("type")?.as_str()? != "message_start" {
        return None;
    }

    data.get("message")?
        .get("model")?
        .as_str()
        .map(String::from)
}

// ============================================================================
// Incremental Line Buffer
// ============================================================================

/// Reassembles SSE lines from arbitrarily split byte chunks
///
/// Network chunks rarely align with line boundaries; bytes after the last
/// newline are held until the next chunk completes them.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed (without terminators)
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                String::from_utf8_lossy(line).into_owned()
            })
            .collect()
    }

    /// Whatever remains once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&std::mem::take(&mut self.pending)).into_owned();
        Some(line.trim_end_matches('\r').to_string())
    }
}

// ============================================================================
// Synthesized Events
// ============================================================================

/// Terminal SSE error event in the Anthropic wire format
///
/// Sent when the upstream stream breaks after the client has already received
/// a status line, so the client sees an explicit failure rather than a
/// truncated message.
pub fn error_event(error_type: &str, message: &str) -> Bytes {
    let data = json!({
        "type": "error",
        "error": {
            "type": error_type,
            "message": message,
        }
    });
    Bytes::from(format!("event: error\ndata: {}\n\n", data))
}

// ============================================================================
// Internal Helpers
// ============================================================================

/// Parse an SSE "data:" line into JSON
///
/// Returns None if:
/// - Line doesn't start with "data:"
/// - Data is empty or "[DONE]"
/// - JSON parsing fails
fn parse_sse_data_line(line: &str) -> Option<serde_json::Value> {
    let json_str = line.strip_prefix("data:")?.trim();
    if json_str.is_empty() || json_str == "[DONE]" {
        return None;
    }
    serde_json::from_str(json_str).ok()
}
