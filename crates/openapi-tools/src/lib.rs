//! `OpenAPI` -> MCP tool bridge.
//!
//! Turns the operations of an `OpenAPI` 3.0 document into MCP tools and turns tool calls back
//! into HTTP requests against the described service:
//!
//! ```text
//! OpenApiDocument -> SchemaResolver -> ToolSchemaConverter -> ToolRegistry
//!   tool call -> InvocationBridge -> HttpExecutor -> ResponseMapper -> CallToolResult
//! ```
//!
//! [`runtime::ToolBridge`] ties the pieces together behind `list_tools` / `call_tool`. The MCP
//! transport itself is out of scope for this crate.

pub mod config;
pub mod converter;
pub mod document;
pub mod error;
pub mod executor;
pub mod invocation;
pub mod policy;
pub mod registry;
pub mod resolver;
pub mod response;
pub mod runtime;
pub mod selector;

pub use config::BridgeConfig;
pub use converter::{SkipReason, ToolDefinition};
pub use document::OpenApiDocument;
pub use error::{ErrorKind, InvocationError, OpenApiToolsError, Result};
pub use executor::{HttpExecutor, ReqwestExecutor};
pub use invocation::{HttpRequestDescriptor, InvocationContext};
pub use registry::{RegisteredTool, SkippedOperation, ToolRegistry};
pub use response::{InvocationResult, ResponseBody};
pub use runtime::{ReloadOutcome, ToolBridge};
