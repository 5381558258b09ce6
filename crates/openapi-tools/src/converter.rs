//! Operation -> MCP tool definition.

use crate::config::{BridgeConfig, MAX_TOOL_NAME_LEN};
use crate::document::{OperationDescriptor, ParameterDescriptor, ParameterLocation};
use crate::error::SchemaResolutionError;
use mcpbridge_http_tools::semantics::annotations_for_operation;
use regex::Regex;
use rmcp::model::{JsonObject, Tool, ToolAnnotations};
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

/// Reserved input property carrying the request body.
pub const BODY_ARGUMENT: &str = "body";

/// Confirmation token argument of risky tools.
pub const CONFIRM_ARGUMENT: &str = "_confirm";

const EXAMPLE_DEPTH_LIMIT: usize = 8;

static PATH_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^}]+)\}").expect("valid regex"));
static NON_ALNUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// Why an operation is not exposed as a tool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error(transparent)]
    Resolution(#[from] SchemaResolutionError),

    #[error("required cookie parameter '{name}' is not supported")]
    RequiredCookie { name: String },

    #[error("a parameter named 'body' conflicts with the request body argument")]
    BodyNameConflict,

    #[error("parameter '{name}' conflicts with a control argument")]
    ControlArgumentConflict { name: String },

    #[error("parameter '{name}' is declared in more than one location")]
    DuplicateParameter { name: String },

    #[error("path is outside basePath '{base_path}'")]
    OutsideBasePath { base_path: String },

    #[error("not matched by any operations.include pattern")]
    NotIncluded,

    #[error("matched operations.exclude pattern '{pattern}'")]
    Excluded { pattern: String },

    #[error("path matches security.blockedPaths pattern '{pattern}'")]
    Blocked { pattern: String },

    #[error("risky operation hidden because security.exposeRiskyTools is false")]
    RiskyHidden,
}

/// A generated tool, before it is turned into the protocol's `Tool`.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Arc<JsonObject>,
    pub output_schema: Option<Arc<JsonObject>>,
    pub annotations: ToolAnnotations,
}

impl ToolDefinition {
    #[must_use]
    pub fn to_tool(&self) -> Tool {
        let mut tool = Tool::new(
            self.name.clone(),
            self.description.clone(),
            self.input_schema.clone(),
        );
        tool.output_schema.clone_from(&self.output_schema);
        tool.annotations = Some(self.annotations.clone());
        tool
    }

    /// Names listed in the input schema's `required` array.
    #[must_use]
    pub fn required_arguments(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Tool names are restricted to `[A-Za-z0-9_]{1,64}`.
#[must_use]
pub fn is_legal_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TOOL_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `get /pets/{id}` -> `get_pets_id`.
#[must_use]
pub fn canonical_name(method: &str, path: &str) -> String {
    let name = format!("{}_{}", method, path).to_lowercase();
    let name = PATH_PARAM_RE.replace_all(&name, "_$1");
    let name = NON_ALNUM_RE.replace_all(&name, "_");
    name.trim_matches('_').to_string()
}

/// Cut to at most `max` bytes; names are ASCII so this never splits a character.
fn truncate_name(name: &str, max: usize) -> String {
    name.chars().take(max).collect::<String>()
}

/// Underscore-prefixed arguments added next to the operation's own.
#[derive(Debug, Clone, Default)]
pub struct ControlArguments {
    /// Response shaping arguments, on every tool.
    pub shaping: Vec<(&'static str, Value)>,
    /// When set, risky tools require `_confirm` with this token.
    pub confirmation_token: Option<String>,
}

impl ControlArguments {
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            shaping: config.response.control_arguments(),
            confirmation_token: config
                .security
                .require_confirmation
                .then(|| config.security.confirmation_token.clone()),
        }
    }

    fn for_tool(&self, risky: bool) -> Vec<(&'static str, Value, bool)> {
        let mut args: Vec<_> = self
            .shaping
            .iter()
            .map(|(name, schema)| (*name, schema.clone(), false))
            .collect();
        if risky && let Some(token) = &self.confirmation_token {
            args.push((
                CONFIRM_ARGUMENT,
                json!({
                    "type": "string",
                    "description": format!("Confirmation token required for this risky operation: {token}")
                }),
                true,
            ));
        }
        args
    }
}

/// Converts resolved operations into tool definitions.
#[derive(Debug, Clone, Default)]
pub struct ToolSchemaConverter {
    prefix: String,
    controls: ControlArguments,
}

impl ToolSchemaConverter {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            controls: ControlArguments::default(),
        }
    }

    #[must_use]
    pub fn with_controls(mut self, controls: ControlArguments) -> Self {
        self.controls = controls;
        self
    }

    /// Preferred tool name before collision handling: the operation id when it forms a legal
    /// name with the prefix, else the canonical method+path name.
    #[must_use]
    pub fn base_name(&self, op: &OperationDescriptor) -> String {
        if let Some(id) = &op.operation_id {
            let candidate = format!("{}{id}", self.prefix);
            if is_legal_tool_name(&candidate) {
                return candidate;
            }
        }
        let canonical = canonical_name(op.method.as_str(), &op.path);
        let name = format!("{}{canonical}", self.prefix);
        truncate_name(&name, MAX_TOOL_NAME_LEN)
    }

    /// Build the tool definition for `op`, named by [`Self::base_name`].
    ///
    /// # Errors
    ///
    /// Returns the [`SkipReason`] when the operation cannot be expressed as a tool.
    pub fn convert(
        &self,
        op: &OperationDescriptor,
        risky: bool,
    ) -> Result<ToolDefinition, SkipReason> {
        let input_schema = build_input_schema(op, &self.controls.for_tool(risky))?;
        let output_schema = op.success_json_schema().map(wrap_output_schema);

        Ok(ToolDefinition {
            name: self.base_name(op),
            description: tool_description(op),
            input_schema: Arc::new(input_schema),
            output_schema,
            annotations: annotations_for_operation(&op.method, op.summary.as_deref(), risky),
        })
    }
}

fn tool_description(op: &OperationDescriptor) -> String {
    op.summary
        .clone()
        .or_else(|| op.description.clone())
        .unwrap_or_else(|| op.display_key())
}

/// Parameters that become tool arguments, in declaration order.
///
/// Optional cookie parameters are dropped here.
fn argument_parameters(
    op: &OperationDescriptor,
) -> Result<Vec<&ParameterDescriptor>, SkipReason> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut params = Vec::with_capacity(op.parameters.len());

    for p in &op.parameters {
        if p.location == ParameterLocation::Cookie {
            if p.required {
                return Err(SkipReason::RequiredCookie {
                    name: p.name.clone(),
                });
            }
            tracing::debug!(
                method = %op.method,
                path = %op.path,
                parameter = %p.name,
                "Dropping optional cookie parameter"
            );
            continue;
        }
        if op.request_body.is_some() && p.name == BODY_ARGUMENT {
            return Err(SkipReason::BodyNameConflict);
        }
        if !seen.insert(p.name.as_str()) {
            return Err(SkipReason::DuplicateParameter {
                name: p.name.clone(),
            });
        }
        params.push(p);
    }
    Ok(params)
}

fn build_input_schema(
    op: &OperationDescriptor,
    controls: &[(&'static str, Value, bool)],
) -> Result<JsonObject, SkipReason> {
    let mut properties = Map::new();
    let mut required: Vec<String> = Vec::new();

    for param in argument_parameters(op)? {
        if controls.iter().any(|(name, _, _)| *name == param.name) {
            return Err(SkipReason::ControlArgumentConflict {
                name: param.name.clone(),
            });
        }
        properties.insert(param.name.clone(), parameter_property(param));
        if param.required {
            required.push(param.name.clone());
        }
    }

    if let Some(body) = &op.request_body {
        let mut schema = body.schema.clone();
        if let (Value::Object(map), Some(desc)) = (&mut schema, &body.description) {
            map.entry("description")
                .or_insert_with(|| Value::String(desc.clone()));
        }
        properties.insert(BODY_ARGUMENT.to_string(), schema);
        if body.required {
            required.push(BODY_ARGUMENT.to_string());
        }
    }

    for (name, schema, is_required) in controls {
        properties.insert((*name).to_string(), schema.clone());
        if *is_required {
            required.push((*name).to_string());
        }
    }

    let mut schema = Map::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), json!(required));
    }
    schema.insert("additionalProperties".to_string(), json!(false));
    Ok(schema)
}

fn parameter_property(param: &ParameterDescriptor) -> Value {
    let mut schema = param.schema.clone();
    if let Value::Object(map) = &mut schema {
        if let Some(desc) = &param.description {
            map.entry("description")
                .or_insert_with(|| Value::String(desc.clone()));
        }
        if let Some(example) = &param.example {
            map.entry("examples")
                .or_insert_with(|| Value::Array(vec![example.clone()]));
        }
    }
    schema
}

/// MCP requires an object at the root of an output schema.
fn wrap_output_schema(body_schema: &Value) -> Arc<JsonObject> {
    let wrapped = json!({
        "type": "object",
        "required": ["status", "body"],
        "properties": {
            "status": {"type": "integer"},
            "body": body_schema.clone(),
        }
    });
    Arc::new(wrapped.as_object().cloned().unwrap_or_default())
}

/// Synthesise an argument object for `op`: every required argument, optional parameters that
/// carry an explicit example, and the body when one is declared.
#[must_use]
pub fn example_arguments(op: &OperationDescriptor) -> Value {
    let mut args = Map::new();
    for p in &op.parameters {
        if p.location == ParameterLocation::Cookie {
            continue;
        }
        if let Some(example) = &p.example {
            args.insert(p.name.clone(), example.clone());
        } else if p.required {
            args.insert(p.name.clone(), example_for_schema(&p.schema, 0));
        }
    }
    if let Some(body) = &op.request_body {
        args.insert(
            BODY_ARGUMENT.to_string(),
            example_for_schema(&body.schema, 0),
        );
    }
    Value::Object(args)
}

fn example_for_schema(schema: &Value, depth: usize) -> Value {
    let Some(map) = schema.as_object() else {
        return json!({});
    };
    if let Some(first) = map
        .get("examples")
        .and_then(Value::as_array)
        .and_then(|e| e.first())
    {
        return first.clone();
    }
    for key in ["default", "const"] {
        if let Some(v) = map.get(key) {
            return v.clone();
        }
    }
    if let Some(first) = map
        .get("enum")
        .and_then(Value::as_array)
        .and_then(|e| e.first())
    {
        return first.clone();
    }
    if depth >= EXAMPLE_DEPTH_LIMIT {
        return json!({});
    }

    let ty = match map.get("type") {
        Some(Value::String(t)) => Some(t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null"),
        _ => None,
    };
    let ty = ty.or_else(|| map.contains_key("properties").then_some("object"));

    match ty {
        Some("string") => example_string(map),
        Some("integer") => json!(example_number(map).round() as i64),
        Some("number") => json!(example_number(map)),
        Some("boolean") => json!(true),
        Some("null") => Value::Null,
        Some("array") => {
            let item = map
                .get("items")
                .map_or_else(|| json!("example"), |items| example_for_schema(items, depth + 1));
            let min = map.get("minItems").and_then(Value::as_u64).unwrap_or(1).max(1);
            let count = usize::try_from(min).unwrap_or(1);
            Value::Array(vec![item; count])
        }
        Some("object") => example_object(map, depth),
        _ => json!({}),
    }
}

fn example_object(map: &Map<String, Value>, depth: usize) -> Value {
    let properties = map.get("properties").and_then(Value::as_object);
    let required: Vec<&str> = map
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut out = Map::new();
    if let Some(properties) = properties {
        for (name, prop) in properties {
            if required.is_empty() || required.contains(&name.as_str()) {
                out.insert(name.clone(), example_for_schema(prop, depth + 1));
            }
        }
    }
    Value::Object(out)
}

fn example_string(map: &Map<String, Value>) -> Value {
    let base = match map.get("format").and_then(Value::as_str) {
        Some("date-time") => "2024-01-01T00:00:00Z",
        Some("date") => "2024-01-01",
        Some("uuid") => "00000000-0000-0000-0000-000000000000",
        Some("email") => "user@example.com",
        Some("uri" | "url") => "https://example.com",
        _ => "example",
    };
    let mut s = base.to_string();
    let min = map
        .get("minLength")
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0);
    while s.chars().count() < min {
        s.push('x');
    }
    if let Some(max) = map
        .get("maxLength")
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
    {
        s = s.chars().take(max).collect();
    }
    Value::String(s)
}

fn example_number(map: &Map<String, Value>) -> f64 {
    let mut v = map.get("minimum").and_then(Value::as_f64).unwrap_or(1.0);
    if let Some(exclusive) = map.get("exclusiveMinimum").and_then(Value::as_f64) {
        v = v.max(exclusive + 1.0);
    }
    if let Some(max) = map.get("maximum").and_then(Value::as_f64)
        && v > max
    {
        v = max;
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::RequestBodyDescriptor;
    use reqwest::Method;

    fn param(name: &str, location: ParameterLocation, required: bool, schema: Value) -> ParameterDescriptor {
        ParameterDescriptor {
            name: name.to_string(),
            location,
            required,
            description: None,
            schema,
            example: None,
            query: None,
        }
    }

    fn op(method: Method, path: &str) -> OperationDescriptor {
        OperationDescriptor {
            operation_id: None,
            method,
            path: path.to_string(),
            summary: None,
            description: None,
            tags: Vec::new(),
            deprecated: false,
            parameters: Vec::new(),
            request_body: None,
            responses: Vec::new(),
        }
    }

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("GET", "/pets/{id}"), "get_pets_id");
        assert_eq!(
            canonical_name("post", "/v1/users/{user-id}/Orders"),
            "post_v1_users_user_id_orders"
        );
        assert_eq!(canonical_name("DELETE", "/"), "delete");
    }

    #[test]
    fn operation_id_wins_when_legal() {
        let converter = ToolSchemaConverter::new("api_");
        let mut o = op(Method::GET, "/pets/{id}");
        o.operation_id = Some("getPet".to_string());
        assert_eq!(converter.base_name(&o), "api_getPet");

        o.operation_id = Some("get-pet".to_string());
        assert_eq!(converter.base_name(&o), "api_get_pets_id");

        o.operation_id = Some("x".repeat(70));
        assert_eq!(converter.base_name(&o), "api_get_pets_id");
    }

    #[test]
    fn long_paths_are_truncated() {
        let converter = ToolSchemaConverter::default();
        let o = op(Method::GET, &format!("/{}", "segment/".repeat(20)));
        let name = converter.base_name(&o);
        assert_eq!(name.len(), MAX_TOOL_NAME_LEN);
        assert!(is_legal_tool_name(&name));
    }

    #[test]
    fn input_schema_embeds_parameters_and_body() {
        let mut o = op(Method::POST, "/pets/{id}");
        let mut id = param("id", ParameterLocation::Path, true, json!({"type": "integer"}));
        id.description = Some("Pet id".to_string());
        id.example = Some(json!(7));
        o.parameters = vec![
            id,
            param("limit", ParameterLocation::Query, false, json!({"type": "integer"})),
            param("session", ParameterLocation::Cookie, false, json!({"type": "string"})),
        ];
        o.request_body = Some(RequestBodyDescriptor {
            media_type: "application/json".to_string(),
            required: true,
            description: None,
            schema: json!({"type": "object", "properties": {"name": {"type": "string"}}}),
        });

        let def = ToolSchemaConverter::default().convert(&o, true).expect("converts");
        let schema = Value::Object((*def.input_schema).clone());
        assert_eq!(schema["properties"]["id"]["description"], "Pet id");
        assert_eq!(schema["properties"]["id"]["examples"], json!([7]));
        assert!(schema["properties"].get("session").is_none());
        assert_eq!(schema["properties"]["body"]["properties"]["name"]["type"], "string");
        assert_eq!(schema["required"], json!(["id", "body"]));
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(def.description, "POST /pets/{id}");
        assert_eq!(def.annotations.destructive_hint, Some(true));
        assert!(def.output_schema.is_none());
    }

    #[test]
    fn skip_reasons() {
        let converter = ToolSchemaConverter::default();

        let mut o = op(Method::GET, "/a");
        o.parameters = vec![param("sid", ParameterLocation::Cookie, true, json!({}))];
        assert!(matches!(
            converter.convert(&o, false),
            Err(SkipReason::RequiredCookie { .. })
        ));

        let mut o = op(Method::GET, "/a/{x}");
        o.parameters = vec![
            param("x", ParameterLocation::Path, true, json!({})),
            param("x", ParameterLocation::Query, false, json!({})),
        ];
        assert!(matches!(
            converter.convert(&o, false),
            Err(SkipReason::DuplicateParameter { .. })
        ));

        let mut o = op(Method::PUT, "/a");
        o.parameters = vec![param("body", ParameterLocation::Query, false, json!({}))];
        o.request_body = Some(RequestBodyDescriptor {
            media_type: "application/json".to_string(),
            required: false,
            description: None,
            schema: json!({}),
        });
        assert_eq!(converter.convert(&o, false).unwrap_err(), SkipReason::BodyNameConflict);
    }

    #[test]
    fn control_arguments_extend_the_input_schema() {
        let mut config = BridgeConfig::default();
        config.response.projection_argument_enabled = true;
        config.security.require_confirmation = true;
        let converter = ToolSchemaConverter::new("").with_controls(ControlArguments::from_config(&config));

        let mut o = op(Method::DELETE, "/pets/{id}");
        o.parameters = vec![param("id", ParameterLocation::Path, true, json!({"type": "integer"}))];
        let risky = converter.convert(&o, true).expect("converts");
        let schema = Value::Object((*risky.input_schema).clone());
        assert_eq!(schema["properties"]["_projection"]["type"], "string");
        assert!(
            schema["properties"]["_confirm"]["description"]
                .as_str()
                .is_some_and(|d| d.ends_with("CONFIRM"))
        );
        assert_eq!(risky.required_arguments(), vec!["id", "_confirm"]);

        let safe = converter.convert(&op(Method::GET, "/pets"), false).expect("converts");
        assert!(safe.input_schema["properties"].get("_confirm").is_none());
        assert!(safe.input_schema["properties"].get("_projection").is_some());

        let mut clash = op(Method::GET, "/search");
        clash.parameters = vec![param("_projection", ParameterLocation::Query, false, json!({}))];
        assert_eq!(
            converter.convert(&clash, false).unwrap_err(),
            SkipReason::ControlArgumentConflict {
                name: "_projection".to_string()
            }
        );
        assert!(ToolSchemaConverter::default().convert(&clash, false).is_ok());
    }

    #[test]
    fn example_arguments_follow_schema_hints() {
        let mut o = op(Method::POST, "/pets/{id}");
        o.parameters = vec![
            param("id", ParameterLocation::Path, true, json!({"type": "integer", "minimum": 10})),
            param("kind", ParameterLocation::Query, true, json!({"type": "string", "enum": ["cat", "dog"]})),
            param("verbose", ParameterLocation::Query, false, json!({"type": "boolean"})),
        ];
        o.request_body = Some(RequestBodyDescriptor {
            media_type: "application/json".to_string(),
            required: true,
            description: None,
            schema: json!({
                "type": "object",
                "required": ["name"],
                "properties": {
                    "name": {"type": "string", "minLength": 10},
                    "age": {"type": "integer"}
                }
            }),
        });

        let args = example_arguments(&o);
        assert_eq!(args["id"], json!(10));
        assert_eq!(args["kind"], json!("cat"));
        assert!(args.get("verbose").is_none());
        assert_eq!(args["body"], json!({"name": "examplexxx"}));
    }
}
