//! The loaded `OpenAPI` document and the read-only operation model derived from it.

use crate::config::HashPolicy;
use crate::error::{OpenApiToolsError, Result, SchemaResolutionError};
use crate::resolver::SchemaResolver;
use mcpbridge_http_tools::content::{MediaKind, preferred_request_media_type};
use mcpbridge_http_tools::encoding::QuerySerialization;
use openapiv3::{
    OpenAPI, Operation, Parameter, ParameterSchemaOrContent, PathItem, ReferenceOr, RequestBody,
    Response, StatusCode,
};
use reqwest::Method;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

/// A parsed `OpenAPI` 3.0 document.
///
/// Keeps both the typed `openapiv3` model (for walking paths and operations) and the raw value
/// (for resolving `$ref` pointers exactly as written).
#[derive(Debug, Clone)]
pub struct OpenApiDocument {
    raw: Value,
    spec: OpenAPI,
    fingerprint: String,
}

impl OpenApiDocument {
    /// Build from an already-parsed JSON/YAML value.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::DocumentParse`] if the value is not an `OpenAPI` 3.x document.
    pub fn from_value(raw: Value) -> Result<Self> {
        let fingerprint = canonical_json_sha256(&raw);
        Self::from_parts(raw, fingerprint)
    }

    /// Parse JSON or YAML text (JSON is a valid subset of YAML, so `serde_yaml` alone is enough).
    ///
    /// Paths keep their source order. The fingerprint is the hash of the text itself, so it
    /// matches `sha256sum` of the file.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::DocumentParse`] if the text is not an `OpenAPI` 3.x document.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: Value = serde_yaml::from_str(text)
            .map_err(|e| OpenApiToolsError::DocumentParse(e.to_string()))?;
        let fingerprint = format!("sha256:{}", hex::encode(Sha256::digest(text)));
        Self::from_parts(raw, fingerprint)
    }

    /// Read and parse a document file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!("Loading OpenAPI document from {}", path.display());
        let text =
            std::fs::read_to_string(path).map_err(|e| OpenApiToolsError::DocumentReadFile {
                path: path.display().to_string(),
                source: e,
            })?;
        Self::parse(&text)
    }

    fn from_parts(raw: Value, fingerprint: String) -> Result<Self> {
        let version = raw
            .get("openapi")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                OpenApiToolsError::DocumentParse(
                    "missing 'openapi' version field (only OpenAPI 3.x documents are supported)"
                        .to_string(),
                )
            })?;
        if !version.starts_with("3.") {
            return Err(OpenApiToolsError::DocumentParse(format!(
                "unsupported OpenAPI version '{version}' (expected 3.x)"
            )));
        }
        if !version.starts_with("3.0") {
            tracing::warn!(
                version,
                "OpenAPI document is not 3.0; converting it with 3.0 semantics"
            );
        }

        let spec: OpenAPI = serde_json::from_value(raw.clone())
            .map_err(|e| OpenApiToolsError::DocumentParse(e.to_string()))?;
        Ok(Self {
            raw,
            spec,
            fingerprint,
        })
    }

    /// Compare the document hash against an expected `sha256:<hex>` value.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::SpecHashMismatch`] on mismatch under [`HashPolicy::Fail`].
    pub fn verify_hash(&self, expected: Option<&str>, policy: HashPolicy) -> Result<()> {
        let Some(expected) = expected else {
            return Ok(());
        };
        if expected == self.fingerprint {
            return Ok(());
        }
        match policy {
            HashPolicy::Fail => Err(OpenApiToolsError::SpecHashMismatch {
                expected: expected.to_string(),
                actual: self.fingerprint.clone(),
            }),
            HashPolicy::Warn => {
                tracing::warn!(
                    expected,
                    actual = %self.fingerprint,
                    "OpenAPI document hash mismatch"
                );
                Ok(())
            }
            HashPolicy::Ignore => Ok(()),
        }
    }

    #[must_use]
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    #[must_use]
    pub fn spec(&self) -> &OpenAPI {
        &self.spec
    }

    /// `sha256:<hex>` of the document.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.spec.info.title
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.spec.info.version
    }

    /// The first `servers` entry with `{variables}` replaced by their defaults.
    #[must_use]
    pub fn server_url(&self) -> Option<String> {
        let server = self.spec.servers.first()?;
        let mut url = server.url.clone();
        if let Some(vars) = &server.variables {
            for (name, var) in vars {
                url = url.replace(&format!("{{{name}}}"), &var.default);
            }
        }
        Some(url)
    }
}

/// `sha256:<hex>` over the key-sorted JSON serialization of `v`.
pub(crate) fn canonical_json_sha256(v: &Value) -> String {
    let serialized = canonicalize_json(v).to_string();
    format!("sha256:{}", hex::encode(Sha256::digest(serialized.as_bytes())))
}

pub(crate) fn canonicalize_json(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                if let Some(val) = map.get(&k) {
                    out.insert(k, canonicalize_json(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(canonicalize_json).collect()),
        other => other.clone(),
    }
}

/// Where a parameter goes in the HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParameterLocation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    pub name: String,
    pub location: ParameterLocation,
    /// Always `true` for path parameters.
    pub required: bool,
    pub description: Option<String>,
    /// Fully resolved JSON Schema.
    pub schema: Value,
    pub example: Option<Value>,
    /// Query serialization settings, for query parameters only.
    pub query: Option<QuerySerialization>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestBodyDescriptor {
    /// The media type the bridge sends (JSON preferred when several are declared).
    pub media_type: String,
    pub required: bool,
    pub description: Option<String>,
    pub schema: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseDescriptor {
    /// `"200"`, `"2XX"` or `"default"`.
    pub status: String,
    pub description: String,
    /// JSON media type, when the response declares one.
    pub media_type: Option<String>,
    pub schema: Option<Value>,
}

/// One HTTP method + path entry, with every schema resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    pub operation_id: Option<String>,
    pub method: Method,
    /// Path template, e.g. `/pets/{id}`.
    pub path: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub deprecated: bool,
    /// Path-item parameters merged with operation parameters (operation wins), in order.
    pub parameters: Vec<ParameterDescriptor>,
    pub request_body: Option<RequestBodyDescriptor>,
    /// In document order, `default` last.
    pub responses: Vec<ResponseDescriptor>,
}

impl OperationDescriptor {
    /// `"GET /pets/{id}"`, the form include/exclude patterns are matched against.
    #[must_use]
    pub fn display_key(&self) -> String {
        format!("{} {}", self.method.as_str(), self.path)
    }

    /// Schema of the lowest explicit 2xx JSON response, else of a `2XX` range response.
    #[must_use]
    pub fn success_json_schema(&self) -> Option<&Value> {
        let mut explicit: Vec<(u16, &ResponseDescriptor)> = self
            .responses
            .iter()
            .filter_map(|r| r.status.parse::<u16>().ok().map(|code| (code, r)))
            .filter(|(code, _)| (200..300).contains(code))
            .collect();
        explicit.sort_by_key(|(code, _)| *code);

        let chosen = explicit
            .first()
            .map(|(_, r)| *r)
            .or_else(|| self.responses.iter().find(|r| r.status == "2XX"))?;
        chosen.schema.as_ref()
    }
}

/// The fixed order methods are visited in within one path item.
pub(crate) fn path_operations(item: &PathItem) -> Vec<(Method, &Operation)> {
    [
        (Method::GET, &item.get),
        (Method::PUT, &item.put),
        (Method::POST, &item.post),
        (Method::DELETE, &item.delete),
        (Method::OPTIONS, &item.options),
        (Method::HEAD, &item.head),
        (Method::PATCH, &item.patch),
        (Method::TRACE, &item.trace),
    ]
    .into_iter()
    .filter_map(|(method, op)| op.as_ref().map(|op| (method, op)))
    .collect()
}

/// Resolve one operation into its descriptor.
///
/// # Errors
///
/// Returns the first [`SchemaResolutionError`] met in its parameters, body or responses.
pub fn describe_operation(
    resolver: &mut SchemaResolver<'_>,
    path: &str,
    method: Method,
    path_item_params: &[ReferenceOr<Parameter>],
    operation: &Operation,
) -> std::result::Result<OperationDescriptor, SchemaResolutionError> {
    let merged = merge_parameters(resolver, path_item_params, &operation.parameters)?;
    let parameters = merged
        .iter()
        .filter(|p| {
            let ignored = is_ignored_header_parameter(p);
            if ignored {
                tracing::debug!(
                    %method,
                    path,
                    parameter = %p.parameter_data_ref().name,
                    "Ignoring header parameter owned by the bridge"
                );
            }
            !ignored
        })
        .map(|p| describe_parameter(resolver, p))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let request_body = match &operation.request_body {
        Some(body) => {
            let body: RequestBody = resolver.resolve_component(body, "request body")?;
            describe_request_body(resolver, &body)?
        }
        None => None,
    };

    let mut responses = Vec::new();
    let default = operation
        .responses
        .default
        .as_ref()
        .map(|r| ("default".to_string(), r));
    let statuses = operation
        .responses
        .responses
        .iter()
        .map(|(code, r)| (status_label(code), r))
        .chain(default);
    for (status, response) in statuses {
        let response: Response = resolver.resolve_component(response, "response")?;
        responses.push(describe_response(resolver, status, &response)?);
    }

    Ok(OperationDescriptor {
        operation_id: operation.operation_id.clone(),
        method,
        path: path.to_string(),
        summary: non_empty(operation.summary.as_deref()),
        description: non_empty(operation.description.as_deref()),
        tags: operation.tags.clone(),
        deprecated: operation.deprecated,
        parameters,
        request_body,
        responses,
    })
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn status_label(code: &StatusCode) -> String {
    match code {
        StatusCode::Code(n) => n.to_string(),
        StatusCode::Range(n) => format!("{n}XX"),
    }
}

/// Header parameters named `Accept`, `Content-Type` or `Authorization` are ignored; the
/// response media type, the body encoding and passthrough credentials set those headers.
fn is_ignored_header_parameter(param: &Parameter) -> bool {
    const IGNORED: [&str; 3] = ["accept", "content-type", "authorization"];
    matches!(param, Parameter::Header { .. })
        && IGNORED
            .iter()
            .any(|h| param.parameter_data_ref().name.eq_ignore_ascii_case(h))
}

fn merge_parameters(
    resolver: &SchemaResolver<'_>,
    path_item_params: &[ReferenceOr<Parameter>],
    operation_params: &[ReferenceOr<Parameter>],
) -> std::result::Result<Vec<Parameter>, SchemaResolutionError> {
    fn key_for(p: &Parameter) -> (ParameterLocation, String) {
        let loc = match p {
            Parameter::Path { .. } => ParameterLocation::Path,
            Parameter::Query { .. } => ParameterLocation::Query,
            Parameter::Header { .. } => ParameterLocation::Header,
            Parameter::Cookie { .. } => ParameterLocation::Cookie,
        };
        (loc, p.parameter_data_ref().name.clone())
    }

    let mut merged: Vec<Parameter> = Vec::new();
    let mut index: HashMap<(ParameterLocation, String), usize> = HashMap::new();

    for p in path_item_params {
        let rp: Parameter = resolver.resolve_component(p, "parameter")?;
        index.insert(key_for(&rp), merged.len());
        merged.push(rp);
    }

    for p in operation_params {
        let rp: Parameter = resolver.resolve_component(p, "parameter")?;
        let k = key_for(&rp);
        if let Some(i) = index.get(&k).copied() {
            merged[i] = rp;
        } else {
            index.insert(k, merged.len());
            merged.push(rp);
        }
    }

    Ok(merged)
}

fn describe_parameter(
    resolver: &mut SchemaResolver<'_>,
    param: &Parameter,
) -> std::result::Result<ParameterDescriptor, SchemaResolutionError> {
    let data = param.parameter_data_ref();
    let (location, required, query) = match param {
        Parameter::Path { .. } => (ParameterLocation::Path, true, None),
        Parameter::Query {
            style,
            allow_reserved,
            allow_empty_value,
            ..
        } => (
            ParameterLocation::Query,
            data.required,
            Some(QuerySerialization::new(
                style.clone(),
                data.explode,
                *allow_reserved,
                allow_empty_value.unwrap_or(false),
            )),
        ),
        Parameter::Header { .. } => (ParameterLocation::Header, data.required, None),
        Parameter::Cookie { .. } => (ParameterLocation::Cookie, data.required, None),
    };

    let schema = match &data.format {
        ParameterSchemaOrContent::Schema(schema) => resolver.resolve_openapi_schema(schema)?,
        ParameterSchemaOrContent::Content(content) => {
            match content.values().find_map(|m| m.schema.as_ref()) {
                Some(schema) => resolver.resolve_openapi_schema(schema)?,
                None => json!({"type": "string"}),
            }
        }
    };

    Ok(ParameterDescriptor {
        name: data.name.clone(),
        location,
        required,
        description: non_empty(data.description.as_deref()),
        schema,
        example: data.example.clone(),
        query,
    })
}

fn describe_request_body(
    resolver: &mut SchemaResolver<'_>,
    body: &RequestBody,
) -> std::result::Result<Option<RequestBodyDescriptor>, SchemaResolutionError> {
    let Some(media_type) = preferred_request_media_type(body.content.keys().map(String::as_str))
    else {
        return Ok(None);
    };
    let schema = match body.content.get(media_type).and_then(|m| m.schema.as_ref()) {
        Some(schema) => resolver.resolve_openapi_schema(schema)?,
        None => match MediaKind::classify(media_type) {
            MediaKind::Text => json!({"type": "string"}),
            MediaKind::Form => json!({"type": "object"}),
            _ => json!({}),
        },
    };
    Ok(Some(RequestBodyDescriptor {
        media_type: media_type.to_string(),
        required: body.required,
        description: non_empty(body.description.as_deref()),
        schema,
    }))
}

fn describe_response(
    resolver: &mut SchemaResolver<'_>,
    status: String,
    response: &Response,
) -> std::result::Result<ResponseDescriptor, SchemaResolutionError> {
    let json_media = response
        .content
        .get_key_value("application/json")
        .or_else(|| {
            response
                .content
                .iter()
                .find(|(k, _)| MediaKind::classify(k) == MediaKind::Json)
        });

    let (media_type, schema) = match json_media {
        Some((k, media)) => {
            let schema = match &media.schema {
                Some(s) => Some(resolver.resolve_openapi_schema(s)?),
                None => None,
            };
            (Some(k.clone()), schema)
        }
        None => (None, None),
    };

    Ok(ResponseDescriptor {
        status,
        description: response.description.clone(),
        media_type,
        schema,
    })
}
