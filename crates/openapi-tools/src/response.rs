//! Upstream response (or transport failure) -> invocation result -> protocol result.

use crate::error::InvocationError;
use crate::executor::{TransportError, UpstreamResponse};
use mcpbridge_http_tools::content::{base64_encode, is_image_content_type, is_json_content_type};
use mcpbridge_http_tools::response_shaping::{ResponseShapingConfig, ShapingOverrides};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use rmcp::model::{CallToolResult, Content};
use serde_json::{Value, json};

/// A decoded upstream body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Binary {
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
}

impl ResponseBody {
    /// Decode a success body. JSON content types are parsed (falling back to text when the
    /// payload is not JSON); images and non-UTF-8 payloads stay binary.
    #[must_use]
    pub fn decode(bytes: &[u8], content_type: Option<&str>) -> Self {
        if bytes.is_empty() {
            return Self::Text(String::new());
        }
        if is_image_content_type(content_type) {
            return Self::binary(bytes, content_type);
        }
        if is_json_content_type(content_type)
            && let Ok(v) = serde_json::from_slice(bytes)
        {
            return Self::Json(v);
        }
        Self::text_or_binary(bytes, content_type)
    }

    /// Decode an error body: JSON whenever it parses, whatever the declared type.
    #[must_use]
    pub fn decode_error(bytes: &[u8], content_type: Option<&str>) -> Self {
        if bytes.is_empty() {
            return Self::Text(String::new());
        }
        match serde_json::from_slice(bytes) {
            Ok(v) => Self::Json(v),
            Err(_) => Self::text_or_binary(bytes, content_type),
        }
    }

    fn text_or_binary(bytes: &[u8], content_type: Option<&str>) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(s) => Self::Text(s.to_string()),
            Err(_) => Self::binary(bytes, content_type),
        }
    }

    fn binary(bytes: &[u8], content_type: Option<&str>) -> Self {
        Self::Binary {
            content_type: content_type.map(str::to_string),
            bytes: bytes.to_vec(),
        }
    }

    /// JSON form used in structured results; binary becomes a base64 envelope.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Json(v) => v.clone(),
            Self::Text(s) => Value::String(s.clone()),
            Self::Binary {
                content_type,
                bytes,
            } => json!({
                "encoding": "base64",
                "mimeType": content_type,
                "data": base64_encode(bytes),
            }),
        }
    }
}

/// Outcome of one tool call: exactly one of success or error.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    Success {
        status: u16,
        headers: HeaderMap,
        body: ResponseBody,
    },
    Error(InvocationError),
}

impl InvocationResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// HTTP status, when the upstream answered.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Success { status, .. } => Some(*status),
            Self::Error(e) => e.status(),
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&InvocationError> {
        match self {
            Self::Success { .. } => None,
            Self::Error(e) => Some(e),
        }
    }
}

impl From<InvocationError> for InvocationResult {
    fn from(e: InvocationError) -> Self {
        Self::Error(e)
    }
}

/// Maps transport outcomes into [`InvocationResult`]s and renders them for the protocol.
#[derive(Debug, Clone, Default)]
pub struct ResponseMapper {
    shaping: ResponseShapingConfig,
}

impl ResponseMapper {
    #[must_use]
    pub fn new(shaping: ResponseShapingConfig) -> Self {
        Self { shaping }
    }

    #[must_use]
    pub fn map(
        &self,
        outcome: std::result::Result<UpstreamResponse, TransportError>,
    ) -> InvocationResult {
        let response = match outcome {
            Ok(r) => r,
            Err(e) => {
                if let Some(limit) = e.body_limit {
                    return InvocationResult::Error(InvocationError::response_too_large(limit));
                }
                let message = if e.timed_out {
                    format!("Upstream request timed out: {}", e.message)
                } else {
                    format!("Upstream request failed: {}", e.message)
                };
                return InvocationResult::Error(InvocationError::unreachable(message, e.timed_out));
            }
        };

        let content_type = response.content_type().map(str::to_string);
        if (200..300).contains(&response.status) {
            let body = ResponseBody::decode(&response.body, content_type.as_deref());
            return InvocationResult::Success {
                status: response.status,
                headers: response.headers,
                body,
            };
        }

        let reason = StatusCode::from_u16(response.status)
            .ok()
            .and_then(|s| s.canonical_reason());
        let body = ResponseBody::decode_error(&response.body, content_type.as_deref());
        InvocationResult::Error(InvocationError::upstream(response.status, reason, body))
    }

    /// Render for `tools/call`. `structured` is set when the tool advertises an output schema.
    #[must_use]
    pub fn render(&self, result: &InvocationResult, structured: bool) -> CallToolResult {
        self.render_with(result, structured, &ShapingOverrides::default())
    }

    /// [`Self::render`] with per-call shaping. Overrides change the text content only; the
    /// structured content still carries the full body.
    #[must_use]
    pub fn render_with(
        &self,
        result: &InvocationResult,
        structured: bool,
        overrides: &ShapingOverrides,
    ) -> CallToolResult {
        match result {
            InvocationResult::Success { status, body, .. } => {
                let content = match body {
                    ResponseBody::Binary {
                        content_type: Some(ct),
                        bytes,
                    } if is_image_content_type(Some(ct)) => {
                        // Response shaping doesn't apply to binary.
                        Content::image(base64_encode(bytes), ct.clone())
                    }
                    other => Content::text(self.shape(other, overrides)),
                };
                let structured_content =
                    structured.then(|| json!({ "status": status, "body": body.to_json() }));
                CallToolResult {
                    content: vec![content],
                    structured_content,
                    is_error: Some(false),
                    meta: None,
                }
            }
            InvocationResult::Error(e) => {
                let mut text = e.message.clone();
                if let crate::error::ErrorKind::UpstreamError { body, .. } = &e.kind
                    && *body != ResponseBody::Text(String::new())
                {
                    text.push_str(": ");
                    text.push_str(&self.shape(body, &ShapingOverrides::default()));
                }
                CallToolResult {
                    content: vec![Content::text(text)],
                    structured_content: Some(e.to_structured()),
                    is_error: Some(true),
                    meta: None,
                }
            }
        }
    }

    fn shape(&self, body: &ResponseBody, overrides: &ShapingOverrides) -> String {
        match body {
            ResponseBody::Json(v) => self.shaping.shape_json_with(v, overrides),
            ResponseBody::Text(s) => self.shaping.shape_text(s),
            binary @ ResponseBody::Binary { .. } => self.shaping.shape_json(&binary.to_json()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, StatusClass};
    use reqwest::header::{CONTENT_TYPE, HeaderValue};
    use rmcp::model::RawContent;

    fn response(status: u16, content_type: Option<&'static str>, body: &[u8]) -> UpstreamResponse {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        UpstreamResponse {
            status,
            headers,
            body: body.to_vec(),
        }
    }

    fn first_text(result: &CallToolResult) -> String {
        match result.content.first().map(|c| &c.raw) {
            Some(RawContent::Text(t)) => t.text.clone(),
            _ => String::new(),
        }
    }

    #[test]
    fn success_bodies_decode_by_content_type() {
        let mapper = ResponseMapper::default();

        let r = mapper.map(Ok(response(200, Some("application/json"), br#"{"name":"Rex"}"#)));
        assert!(matches!(
            r,
            InvocationResult::Success { status: 200, body: ResponseBody::Json(ref v), .. } if v["name"] == "Rex"
        ));

        let r = mapper.map(Ok(response(200, Some("application/problem+json; charset=utf-8"), b"{}")));
        assert!(matches!(r, InvocationResult::Success { body: ResponseBody::Json(_), .. }));

        let r = mapper.map(Ok(response(200, Some("application/json"), b"not json")));
        assert!(matches!(r, InvocationResult::Success { body: ResponseBody::Text(ref s), .. } if s == "not json"));

        let r = mapper.map(Ok(response(204, None, b"")));
        assert!(matches!(r, InvocationResult::Success { status: 204, body: ResponseBody::Text(ref s), .. } if s.is_empty()));

        let r = mapper.map(Ok(response(200, Some("application/octet-stream"), &[0xff, 0xfe])));
        assert!(matches!(r, InvocationResult::Success { body: ResponseBody::Binary { .. }, .. }));
    }

    #[test]
    fn non_success_statuses_are_classified() {
        let mapper = ResponseMapper::default();

        let r = mapper.map(Ok(response(404, Some("text/plain"), br#"{"message":"no pet"}"#)));
        let err = r.error().expect("error");
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "Upstream returned 404 Not Found");
        match &err.kind {
            ErrorKind::UpstreamError { class, body, .. } => {
                assert_eq!(*class, StatusClass::Client);
                assert_eq!(body.to_json()["message"], "no pet");
            }
            other => panic!("unexpected kind {other:?}"),
        }

        let r = mapper.map(Ok(response(503, None, b"down")));
        assert!(r.error().expect("error").kind.is_retryable());

        let r = mapper.map(Ok(response(302, None, b"")));
        assert!(matches!(
            r.error().map(|e| &e.kind),
            Some(ErrorKind::UpstreamError { class: StatusClass::Unexpected, .. })
        ));
    }

    #[test]
    fn transport_failures_are_unreachable() {
        let r = ResponseMapper::default().map(Err(TransportError {
            message: "operation timed out".to_string(),
            timed_out: true,
            body_limit: None,
        }));
        assert_eq!(
            r.error().map(|e| e.kind.clone()),
            Some(ErrorKind::UpstreamUnreachable { timed_out: true })
        );

        let r = ResponseMapper::default().map(Err(TransportError {
            message: "response body exceeds 8 bytes".to_string(),
            timed_out: false,
            body_limit: Some(8),
        }));
        let err = r.error().expect("error");
        assert_eq!(err.kind, ErrorKind::ResponseTooLarge { limit: 8 });
        assert_eq!(err.to_structured()["error"]["limit"], 8);
    }

    #[test]
    fn render_success_with_structured_content() {
        let mapper = ResponseMapper::default();
        let result = mapper.map(Ok(response(200, Some("application/json"), br#"{"name":"Rex"}"#)));

        let rendered = mapper.render(&result, true);
        assert_eq!(rendered.is_error, Some(false));
        assert_eq!(
            rendered.structured_content,
            Some(json!({"status": 200, "body": {"name": "Rex"}}))
        );
        assert_eq!(first_text(&rendered), r#"{"name":"Rex"}"#);

        let rendered = mapper.render(&result, false);
        assert!(rendered.structured_content.is_none());
    }

    #[test]
    fn render_shapes_text_and_keeps_images() {
        let mapper = ResponseMapper::new(ResponseShapingConfig {
            max_chars: 10,
            ..ResponseShapingConfig::default()
        });
        let result = mapper.map(Ok(response(200, Some("text/plain"), b"0123456789abcdef")));
        assert_eq!(first_text(&mapper.render(&result, false)), "0123456789...[truncated]");

        let image = mapper.map(Ok(response(200, Some("image/png"), &[0x89, b'P', b'N', b'G'])));
        let rendered = mapper.render(&image, false);
        assert!(matches!(rendered.content[0].raw, RawContent::Image(_)));
    }

    #[test]
    fn overrides_narrow_the_text_but_not_the_structured_body() {
        let mapper = ResponseMapper::default();
        let result = mapper.map(Ok(response(
            200,
            Some("application/json"),
            br#"{"items":[{"name":"Rex"},{"name":"Tom"}],"count":2}"#,
        )));
        let overrides = ShapingOverrides {
            projection: Some("$.items[*].name".to_string()),
            ..ShapingOverrides::default()
        };

        let rendered = mapper.render_with(&result, true, &overrides);
        assert_eq!(first_text(&rendered), r#"["Rex","Tom"]"#);
        assert_eq!(rendered.structured_content.expect("structured")["body"]["count"], 2);

        let missed = ShapingOverrides {
            projection: Some("$.owner".to_string()),
            ..ShapingOverrides::default()
        };
        let text = first_text(&mapper.render_with(&result, false, &missed));
        assert!(text.contains("projectionWarning"), "{text}");
    }

    #[test]
    fn render_error_is_flagged_and_structured() {
        let mapper = ResponseMapper::default();
        let result = mapper.map(Ok(response(500, Some("application/json"), br#"{"error":"boom"}"#)));
        let rendered = mapper.render(&result, true);
        assert_eq!(rendered.is_error, Some(true));
        let structured = rendered.structured_content.clone().expect("structured");
        assert_eq!(structured["error"]["status"], 500);
        assert_eq!(structured["error"]["class"], "server");
        assert_eq!(structured["error"]["retryable"], true);
        assert!(first_text(&rendered).starts_with("Upstream returned 500 Internal Server Error"));
    }
}
