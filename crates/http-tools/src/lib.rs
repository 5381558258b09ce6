//! Protocol-agnostic HTTP helpers for the OpenAPI MCP bridge.
//!
//! This crate is used by `mcpbridge-openapi-tools` for everything that is about HTTP itself
//! rather than about `OpenAPI` documents:
//! - query/path percent-encoding and `OpenAPI` query style serialization
//! - media type classification of request/response bodies
//! - HTTP method semantics (MCP tool annotations)
//! - response shaping and projection for agent-facing text output
//! - error/URL redaction
//!
//! It contains no `OpenAPI` document logic.

pub mod content;
pub mod encoding;
pub mod projection;
pub mod response_shaping;
pub mod safety;
pub mod semantics;
