//! HTTP method semantics.
//!
//! Tools generated from HTTP operations advertise MCP `ToolAnnotations` derived from RFC 9110
//! method properties (safe / idempotent). Operations flagged as risky by the caller's policy are
//! always reported as destructive.

use reqwest::Method;
use rmcp::model::ToolAnnotations;

/// RFC 9110 properties of a request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSemantics {
    /// The method does not change server state.
    pub safe: bool,
    /// Repeating the request has the same effect as sending it once.
    ///
    /// `None` when the method does not promise either way (PATCH, extension methods).
    pub idempotent: Option<bool>,
}

impl MethodSemantics {
    #[must_use]
    pub fn of(method: &Method) -> Option<Self> {
        let semantics = match *method {
            Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE => Self {
                safe: true,
                idempotent: Some(true),
            },
            Method::PUT | Method::DELETE => Self {
                safe: false,
                idempotent: Some(true),
            },
            Method::POST => Self {
                safe: false,
                idempotent: Some(false),
            },
            Method::PATCH => Self {
                safe: false,
                idempotent: None,
            },
            _ => return None,
        };
        Some(semantics)
    }
}

/// Build MCP tool annotations for an HTTP-backed tool.
///
/// `openWorldHint` is always `true`: every call reaches an external system. Extension methods
/// only get `openWorldHint` (plus `destructiveHint` when `risky`).
#[must_use]
pub fn annotations_for_operation(
    method: &Method,
    title: Option<&str>,
    risky: bool,
) -> ToolAnnotations {
    let semantics = MethodSemantics::of(method);

    let read_only_hint = semantics.map(|s| s.safe && !risky);
    let destructive_hint = match semantics {
        _ if risky => Some(true),
        // POST creates; it does not overwrite or remove.
        Some(_) if *method == Method::POST => Some(false),
        Some(s) => Some(!s.safe),
        None => None,
    };
    let idempotent_hint = semantics.and_then(|s| s.idempotent);

    ToolAnnotations {
        title: title.map(str::to_string),
        read_only_hint,
        destructive_hint,
        idempotent_hint,
        open_world_hint: Some(true),
    }
}
