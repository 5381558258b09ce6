//! Error types for `mcpbridge-openapi-tools`.

use crate::response::ResponseBody;
use serde_json::{Value, json};
use thiserror::Error;

/// Load / build time errors. Per-operation problems never surface here; they end up in the
/// registry's skip list instead.
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// Invalid configuration (fail fast at load).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The document could not be turned into operations at all.
    #[error("OpenAPI document parse error: {0}")]
    DocumentParse(String),

    #[error("OpenAPI document hash mismatch. Expected: {expected}, Got: {actual}")]
    SpecHashMismatch { expected: String, actual: String },

    #[error("OpenAPI error: failed to read document file '{path}': {source}")]
    DocumentReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// HTTP client construction errors.
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type alias for `OpenAPI` tooling operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;

/// Why a schema (or a component reached through `$ref`) could not be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaResolutionError {
    #[error("unresolved $ref '{reference}': no value at that pointer")]
    MissingTarget { reference: String },

    #[error("unsupported $ref '{reference}': only document-internal '#/...' references are resolved")]
    UnsupportedReference { reference: String },

    #[error("cyclic $ref chain through '{reference}'")]
    Cycle { reference: String },

    #[error("$ref '{reference}' does not point to a valid {expected}: {message}")]
    TypeMismatch {
        reference: String,
        expected: &'static str,
        message: String,
    },
}

/// Class of a non-2xx upstream status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 4xx
    Client,
    /// 5xx
    Server,
    /// 1xx / 3xx
    Unexpected,
}

impl StatusClass {
    #[must_use]
    pub fn of(status: u16) -> Self {
        match status {
            400..=499 => Self::Client,
            500..=599 => Self::Server,
            _ => Self::Unexpected,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Unexpected => "unexpected",
        }
    }
}

/// Distinguishable invocation failure kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    ToolNotFound,
    MissingRequiredArgument { argument: String },
    /// A risky tool was called without the configured `_confirm` token.
    ConfirmationRequired,
    RequestConstruction,
    /// Connect refused, DNS failure, timeout, body read error.
    UpstreamUnreachable { timed_out: bool },
    /// The upstream body was larger than `maxResponseBytes`.
    ResponseTooLarge { limit: usize },
    /// The upstream answered with a non-2xx status.
    UpstreamError {
        status: u16,
        class: StatusClass,
        body: ResponseBody,
    },
}

impl ErrorKind {
    /// Stable snake_case identifier used in structured tool results.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ToolNotFound => "tool_not_found",
            Self::MissingRequiredArgument { .. } => "missing_required_argument",
            Self::ConfirmationRequired => "confirmation_required",
            Self::RequestConstruction => "request_construction",
            Self::UpstreamUnreachable { .. } => "upstream_unreachable",
            Self::ResponseTooLarge { .. } => "response_too_large",
            Self::UpstreamError { .. } => "upstream_error",
        }
    }

    /// Whether the caller may reasonably retry the same call. The bridge itself never retries.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::UpstreamUnreachable { .. } => true,
            Self::UpstreamError { class, .. } => *class == StatusClass::Server,
            _ => false,
        }
    }
}

/// A failed tool invocation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct InvocationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl InvocationError {
    #[must_use]
    pub fn tool_not_found(name: &str) -> Self {
        Self {
            kind: ErrorKind::ToolNotFound,
            message: format!("Tool not found: {name}"),
        }
    }

    #[must_use]
    pub fn missing_argument(argument: &str) -> Self {
        Self {
            kind: ErrorKind::MissingRequiredArgument {
                argument: argument.to_string(),
            },
            message: format!("Missing required argument: {argument}"),
        }
    }

    #[must_use]
    pub fn confirmation_required(token: &str) -> Self {
        Self {
            kind: ErrorKind::ConfirmationRequired,
            message: format!("Confirmation is required. Provide _confirm=\"{token}\""),
        }
    }

    /// `invoke_api_by_intent` found no tool scoring above the threshold.
    #[must_use]
    pub fn no_matching_tool(query: &str) -> Self {
        Self {
            kind: ErrorKind::ToolNotFound,
            message: format!("No matching API tool found for query: {query}"),
        }
    }

    #[must_use]
    pub fn request_construction(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::RequestConstruction,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unreachable(message: impl Into<String>, timed_out: bool) -> Self {
        Self {
            kind: ErrorKind::UpstreamUnreachable { timed_out },
            message: message.into(),
        }
    }

    #[must_use]
    pub fn response_too_large(limit: usize) -> Self {
        Self {
            kind: ErrorKind::ResponseTooLarge { limit },
            message: format!("Upstream response exceeded the {limit} byte limit"),
        }
    }

    #[must_use]
    pub fn upstream(status: u16, reason: Option<&str>, body: ResponseBody) -> Self {
        let reason = reason.unwrap_or("Unknown");
        Self {
            kind: ErrorKind::UpstreamError {
                status,
                class: StatusClass::of(status),
                body,
            },
            message: format!("Upstream returned {status} {reason}"),
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match &self.kind {
            ErrorKind::UpstreamError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// `{"error": {kind, message, status?, body?, retryable}}`
    #[must_use]
    pub fn to_structured(&self) -> Value {
        let mut error = json!({
            "kind": self.kind.name(),
            "message": self.message,
            "retryable": self.kind.is_retryable(),
        });
        match &self.kind {
            ErrorKind::UpstreamError {
                status,
                class,
                body,
            } => {
                error["status"] = json!(status);
                error["class"] = json!(class.as_str());
                error["body"] = body.to_json();
            }
            ErrorKind::MissingRequiredArgument { argument } => {
                error["argument"] = json!(argument);
            }
            ErrorKind::UpstreamUnreachable { timed_out } => {
                error["timedOut"] = json!(timed_out);
            }
            ErrorKind::ResponseTooLarge { limit } => {
                error["limit"] = json!(limit);
            }
            ErrorKind::ToolNotFound
            | ErrorKind::ConfirmationRequired
            | ErrorKind::RequestConstruction => {}
        }
        json!({ "error": error })
    }
}
