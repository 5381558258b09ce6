//! Tool call -> HTTP request.
//!
//! Building the request is pure; the network step lives behind
//! [`crate::executor::HttpExecutor`].

use crate::config::BridgeConfig;
use crate::converter::BODY_ARGUMENT;
use crate::document::ParameterLocation;
use crate::error::{InvocationError, OpenApiToolsError, Result};
use crate::registry::{RegisteredTool, ToolRegistry};
use mcpbridge_http_tools::content::MediaKind;
use mcpbridge_http_tools::encoding::{
    build_query_string, encode_path_segment, form_urlencode, path_param_to_string,
    serialize_query_param, value_to_string,
};
use mcpbridge_http_tools::safety::redact_url;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;

const DEFAULT_ACCEPT: &str = "application/json, */*";

/// Transport-level data that came with a tool call.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    headers: HeaderMap,
}

impl InvocationContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Incoming headers (e.g. from a streamable HTTP MCP request).
    #[must_use]
    pub fn from_headers(headers: HeaderMap) -> Self {
        Self { headers }
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// Encoded request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Fully built upstream request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequestDescriptor {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
}

/// Rebuilds HTTP requests from tool arguments.
#[derive(Debug, Clone)]
pub struct InvocationBridge {
    base_url: Url,
    default_headers: HeaderMap,
    passthrough: Vec<HeaderName>,
    timeout: Duration,
}

impl InvocationBridge {
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::Config`] if a configured header is invalid.
    pub fn new(base_url: Url, config: &BridgeConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                OpenApiToolsError::Config(format!("invalid default header name '{name}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                OpenApiToolsError::Config(format!("invalid value for default header '{name}': {e}"))
            })?;
            default_headers.insert(name, value);
        }

        let passthrough = config
            .passthrough_headers
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    OpenApiToolsError::Config(format!("invalid passthrough header '{name}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            base_url,
            default_headers,
            passthrough,
            timeout: config.timeout(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Look up `name` and build its request.
    ///
    /// # Errors
    ///
    /// `ToolNotFound`, `MissingRequiredArgument` or `RequestConstruction`.
    pub fn build_request(
        &self,
        registry: &ToolRegistry,
        name: &str,
        arguments: &Value,
        ctx: &InvocationContext,
    ) -> std::result::Result<HttpRequestDescriptor, InvocationError> {
        let tool = registry
            .lookup(name)
            .ok_or_else(|| InvocationError::tool_not_found(name))?;
        self.build_for_tool(tool, arguments, ctx)
    }

    /// Build the request for an already looked-up tool.
    ///
    /// # Errors
    ///
    /// `MissingRequiredArgument` or `RequestConstruction`.
    pub fn build_for_tool(
        &self,
        tool: &RegisteredTool,
        arguments: &Value,
        ctx: &InvocationContext,
    ) -> std::result::Result<HttpRequestDescriptor, InvocationError> {
        let empty = Map::new();
        let args = match arguments {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(InvocationError::request_construction(format!(
                    "Arguments for '{}' must be a JSON object, got {}",
                    tool.definition.name,
                    json_type_name(other)
                )));
            }
        };

        for required in tool.definition.required_arguments() {
            if args.get(required).is_none_or(Value::is_null) {
                return Err(InvocationError::missing_argument(required));
            }
        }

        let op = &tool.operation;
        let present = |name: &str| args.get(name).filter(|v| !v.is_null());

        let mut path = op.path.clone();
        let mut query = Vec::new();
        let mut param_headers: Vec<(HeaderName, HeaderValue)> = Vec::new();

        for param in &op.parameters {
            match param.location {
                ParameterLocation::Path => {
                    if let Some(value) = present(&param.name) {
                        let raw = path_param_to_string(value);
                        if raw.is_empty() || raw == "." || raw == ".." {
                            return Err(InvocationError::request_construction(format!(
                                "Invalid value for path parameter '{}': '{raw}'",
                                param.name
                            )));
                        }
                        path = path.replace(
                            &format!("{{{}}}", param.name),
                            &encode_path_segment(&raw),
                        );
                    }
                }
                ParameterLocation::Query => {
                    if let Some(value) = args.get(&param.name) {
                        let settings = param.query.clone().unwrap_or_default();
                        query.extend(serialize_query_param(
                            &param.name,
                            value,
                            param.required,
                            &settings,
                        ));
                    }
                }
                ParameterLocation::Header => {
                    if let Some(value) = present(&param.name) {
                        let name = HeaderName::from_bytes(param.name.as_bytes()).map_err(|e| {
                            InvocationError::request_construction(format!(
                                "Invalid header name '{}': {e}",
                                param.name
                            ))
                        })?;
                        let value = HeaderValue::from_str(&path_param_to_string(value))
                            .map_err(|e| {
                                InvocationError::request_construction(format!(
                                    "Invalid value for header '{}': {e}",
                                    param.name
                                ))
                            })?;
                        param_headers.push((name, value));
                    }
                }
                ParameterLocation::Cookie => {}
            }
        }

        if let Some(start) = path.find('{')
            && path[start..].contains('}')
        {
            return Err(InvocationError::request_construction(format!(
                "Unresolved path placeholder in '{path}'"
            )));
        }

        let mut url = Url::parse(&format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            path
        ))
        .map_err(|e| InvocationError::request_construction(format!("Invalid request URL: {e}")))?;
        if !query.is_empty() {
            url.set_query(Some(&build_query_string(&query)));
        }

        let mut headers = self.default_headers.clone();
        for name in &self.passthrough {
            let incoming: Vec<HeaderValue> = ctx.headers().get_all(name).iter().cloned().collect();
            if incoming.is_empty() {
                continue;
            }
            headers.remove(name);
            for value in incoming {
                headers.append(name.clone(), value);
            }
        }
        for (name, value) in param_headers {
            headers.insert(name, value);
        }
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        }

        let body = match (&op.request_body, present(BODY_ARGUMENT)) {
            (Some(desc), Some(value)) => Some(encode_body(&desc.media_type, value)?),
            _ => None,
        };
        if let Some(body) = &body {
            let value = HeaderValue::from_str(&body.content_type).map_err(|e| {
                InvocationError::request_construction(format!(
                    "Invalid content type '{}': {e}",
                    body.content_type
                ))
            })?;
            headers.insert(CONTENT_TYPE, value);
        }

        tracing::debug!(
            tool = %tool.definition.name,
            method = %op.method,
            url = %redact_url(&url),
            "Built upstream request"
        );

        Ok(HttpRequestDescriptor {
            method: op.method.clone(),
            url,
            headers,
            body,
            timeout: self.timeout,
        })
    }
}

fn encode_body(
    media_type: &str,
    value: &Value,
) -> std::result::Result<RequestBody, InvocationError> {
    // A wildcard range cannot be sent as a content type; JSON is the closest match.
    if media_type.contains('*') {
        return encode_body("application/json", value);
    }

    let bytes = match MediaKind::classify(media_type) {
        MediaKind::Json => serde_json::to_vec(value).map_err(|e| {
            InvocationError::request_construction(format!("Failed to encode JSON body: {e}"))
        })?,
        MediaKind::Form => form_urlencode(value)
            .ok_or_else(|| {
                InvocationError::request_construction(format!(
                    "Body for '{media_type}' must be a JSON object"
                ))
            })?
            .into_bytes(),
        MediaKind::Text => value_to_string(value).into_bytes(),
        MediaKind::Image | MediaKind::Other => match value {
            Value::String(s) => s.clone().into_bytes(),
            other => serde_json::to_vec(other).map_err(|e| {
                InvocationError::request_construction(format!("Failed to encode body: {e}"))
            })?,
        },
    };

    Ok(RequestBody {
        content_type: media_type.to_string(),
        bytes,
    })
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
