//! The immutable set of tools generated from one document load.

use crate::config::{BridgeConfig, MAX_TOOL_NAME_LEN};
use crate::converter::{
    CONFIRM_ARGUMENT, ControlArguments, SkipReason, ToolDefinition, ToolSchemaConverter,
    example_arguments,
};
use crate::document::{
    OpenApiDocument, OperationDescriptor, canonicalize_json, describe_operation, path_operations,
};
use crate::error::Result;
use crate::policy::{SecurityPolicy, check_operation_filters};
use crate::resolver::SchemaResolver;
use crate::selector::{ToolSelector, discovery_tool, intent_tool};
use openapiv3::PathItem;
use rmcp::model::Tool;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// One exposed tool and the operation it calls.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub operation: OperationDescriptor,
    /// Flagged by the security policy.
    pub risky: bool,
    /// Arguments synthesised from the operation's examples and schema hints.
    pub example_arguments: Value,
}

/// An operation that did not become a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedOperation {
    /// `"GET"`, or `"*"` when the whole path item could not be read.
    pub method: String,
    pub path: String,
    pub operation_id: Option<String>,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
    skipped: Vec<SkippedOperation>,
    fingerprint: String,
    discovery_tool: Option<String>,
    intent_tool: Option<String>,
    /// API tools are left out of [`ToolRegistry::list_tools`].
    gateway_only: bool,
    selector: Option<ToolSelector>,
}

impl ToolRegistry {
    /// Convert every operation of `document` that passes the configured filters.
    ///
    /// Operations are visited in document order (paths as written, methods as get, put, post,
    /// delete, options, head, patch, trace), so the same input always yields the same names.
    ///
    /// # Errors
    ///
    /// Per-operation failures are recorded in [`ToolRegistry::skipped`]; this only fails when
    /// the document itself is unusable.
    pub fn build(document: &OpenApiDocument, config: &BridgeConfig) -> Result<Self> {
        let mut registry = Self {
            fingerprint: document.fingerprint().to_string(),
            ..Self::default()
        };
        if !config.enabled {
            tracing::info!("OpenAPI bridge is disabled; no tools exposed");
            return Ok(registry);
        }

        // Reserved names are claimed before any operation.
        let mut names: HashSet<String> = HashSet::new();
        registry.discovery_tool = config.discovery_tool_name();
        registry.intent_tool = config.intent_tool_name();
        registry.gateway_only = config.discovery.gateway_only;
        for name in registry.discovery_tool.iter().chain(&registry.intent_tool) {
            names.insert(name.clone());
        }

        let confirmation_token = config
            .security
            .require_confirmation
            .then_some(config.security.confirmation_token.as_str());
        let converter = ToolSchemaConverter::new(config.tool_name_prefix.clone())
            .with_controls(ControlArguments::from_config(config));
        let policy = SecurityPolicy::from_config(&config.security);
        let mut resolver = SchemaResolver::new(document.raw(), config.max_schema_depth);

        for (path, item) in &document.spec().paths.paths {
            let item: PathItem = match resolver.resolve_component(item, "path item") {
                Ok(item) => item,
                Err(e) => {
                    registry.skip("*", path, None, SkipReason::Resolution(e));
                    continue;
                }
            };

            for (method, operation) in path_operations(&item) {
                if let Some(base_path) = &config.base_path
                    && !within_base_path(path, base_path)
                {
                    registry.skip(
                        method.as_str(),
                        path,
                        operation.operation_id.clone(),
                        SkipReason::OutsideBasePath {
                            base_path: base_path.clone(),
                        },
                    );
                    continue;
                }

                let descriptor = match describe_operation(
                    &mut resolver,
                    path,
                    method.clone(),
                    &item.parameters,
                    operation,
                ) {
                    Ok(d) => d,
                    Err(e) => {
                        registry.skip(
                            method.as_str(),
                            path,
                            operation.operation_id.clone(),
                            SkipReason::Resolution(e),
                        );
                        continue;
                    }
                };

                match Self::prepare(&converter, &policy, config, &descriptor) {
                    Ok((mut definition, risky)) => {
                        definition.name = reserve_unique_tool_name(&mut names, &definition.name);
                        let mut examples = example_arguments(&descriptor);
                        if risky
                            && let (Some(token), Value::Object(args)) =
                                (confirmation_token, &mut examples)
                        {
                            args.insert(CONFIRM_ARGUMENT.to_string(), Value::String(token.to_string()));
                        }
                        registry.register(RegisteredTool {
                            example_arguments: examples,
                            definition,
                            operation: descriptor,
                            risky,
                        });
                    }
                    Err(reason) => registry.skip(
                        method.as_str(),
                        path,
                        descriptor.operation_id.clone(),
                        reason,
                    ),
                }
            }
        }

        if registry.discovery_tool.is_some() {
            registry.selector = Some(ToolSelector::new(&registry.tools, &config.discovery));
        }

        tracing::info!(
            title = document.title(),
            tools = registry.tools.len(),
            skipped = registry.skipped.len(),
            "Built tool registry"
        );
        Ok(registry)
    }

    fn prepare(
        converter: &ToolSchemaConverter,
        policy: &SecurityPolicy,
        config: &BridgeConfig,
        op: &OperationDescriptor,
    ) -> std::result::Result<(ToolDefinition, bool), SkipReason> {
        check_operation_filters(config, op)?;
        let risky = policy.exposure(op)?;
        let definition = converter.convert(op, risky)?;
        Ok((definition, risky))
    }

    fn register(&mut self, tool: RegisteredTool) {
        tracing::debug!(
            tool = %tool.definition.name,
            method = %tool.operation.method,
            path = %tool.operation.path,
            "Registered tool"
        );
        self.index
            .insert(tool.definition.name.clone(), self.tools.len());
        self.tools.push(tool);
    }

    fn skip(&mut self, method: &str, path: &str, operation_id: Option<String>, reason: SkipReason) {
        match &reason {
            // Configured filters are expected; anything else means the operation is unusable.
            SkipReason::OutsideBasePath { .. }
            | SkipReason::NotIncluded
            | SkipReason::Excluded { .. }
            | SkipReason::Blocked { .. }
            | SkipReason::RiskyHidden => {
                tracing::debug!(method, path, reason = %reason, "Operation filtered out");
            }
            _ => {
                tracing::warn!(method, path, reason = %reason, "Skipping operation");
            }
        }
        self.skipped.push(SkippedOperation {
            method: method.to_string(),
            path: path.to_string(),
            operation_id,
            reason,
        });
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Tools in registration order.
    #[must_use]
    pub fn tools(&self) -> &[RegisteredTool] {
        &self.tools
    }

    #[must_use]
    pub fn skipped(&self) -> &[SkippedOperation] {
        &self.skipped
    }

    /// Fingerprint of the document this registry was built from.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    #[must_use]
    pub fn discovery_tool_name(&self) -> Option<&str> {
        self.discovery_tool.as_deref()
    }

    #[must_use]
    pub fn intent_tool_name(&self) -> Option<&str> {
        self.intent_tool.as_deref()
    }

    /// Only the meta-tools are listed and API tools cannot be called by name.
    #[must_use]
    pub fn is_gateway_only(&self) -> bool {
        self.gateway_only
    }

    #[must_use]
    pub fn selector(&self) -> Option<&ToolSelector> {
        self.selector.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Protocol tool list; the meta-tools, when enabled, come first.
    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        let api_tools = if self.gateway_only { &[][..] } else { &self.tools[..] };
        self.discovery_tool
            .as_deref()
            .map(discovery_tool)
            .into_iter()
            .chain(self.intent_tool.as_deref().map(intent_tool))
            .chain(api_tools.iter().map(|t| t.definition.to_tool()))
            .collect()
    }

    /// `sha256:<hex>` over the listed tools, independent of registration order.
    ///
    /// Two registries with the same hash advertise identical tools.
    #[must_use]
    pub fn contract_hash(&self) -> String {
        let mut entries: Vec<(String, Value)> = self
            .list_tools()
            .into_iter()
            .map(|t| {
                let name = t.name.to_string();
                let value = serde_json::to_value(&t).unwrap_or(Value::Null);
                (name, canonicalize_json(&value))
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Sha256::new();
        for (_, value) in entries {
            hasher.update(value.to_string().as_bytes());
            hasher.update(b"\n");
        }
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}

/// `path` equals `base_path` or lies below it on a segment boundary (`/api` covers `/api/pets`
/// but not `/apiary`).
fn within_base_path(path: &str, base_path: &str) -> bool {
    let base = base_path.trim_end_matches('/');
    if base.is_empty() {
        return true;
    }
    path.strip_prefix(base)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Claim `base`, or the first free `base_2`, `base_3`, ... (base cut so the name fits).
fn reserve_unique_tool_name(names: &mut HashSet<String>, base: &str) -> String {
    if names.insert(base.to_string()) {
        return base.to_string();
    }

    let mut counter = 2usize;
    loop {
        let suffix = format!("_{counter}");
        let keep = MAX_TOOL_NAME_LEN.saturating_sub(suffix.len());
        let stem: String = base.chars().take(keep).collect();
        let candidate = format!("{stem}{suffix}");
        if names.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(paths: Value) -> OpenApiDocument {
        OpenApiDocument::from_value(json!({
            "openapi": "3.0.3",
            "info": {"title": "Test", "version": "1"},
            "paths": paths,
            "components": {
                "schemas": {
                    "Node": {
                        "type": "object",
                        "properties": {
                            "value": {"type": "string"},
                            "next": {"$ref": "#/components/schemas/Node"}
                        }
                    }
                }
            }
        }))
        .expect("valid document")
    }

    #[test]
    fn test_reserve_unique_tool_name() {
        let mut names = HashSet::new();
        assert_eq!(reserve_unique_tool_name(&mut names, "a"), "a");
        assert_eq!(reserve_unique_tool_name(&mut names, "a"), "a_2");
        assert_eq!(reserve_unique_tool_name(&mut names, "a"), "a_3");

        let long = "x".repeat(MAX_TOOL_NAME_LEN);
        assert_eq!(reserve_unique_tool_name(&mut names, &long), long);
        let second = reserve_unique_tool_name(&mut names, &long);
        assert_eq!(second.len(), MAX_TOOL_NAME_LEN);
        assert!(second.ends_with("_2"));
    }

    #[test]
    fn sanitised_collisions_get_suffixes_in_document_order() {
        let doc = OpenApiDocument::parse(
            r"
openapi: 3.0.3
info: {title: Test, version: '1'}
paths:
  /a-b:
    get: {responses: {'200': {description: ok}}}
  /a_b:
    get: {responses: {'200': {description: ok}}}
  /a/b:
    get: {responses: {'200': {description: ok}}}
",
        )
        .expect("valid document");
        let registry = ToolRegistry::build(&doc, &BridgeConfig::default()).expect("builds");
        let names: Vec<_> = registry
            .tools()
            .iter()
            .map(|t| t.definition.name.as_str())
            .collect();
        assert_eq!(names, vec!["get_a_b", "get_a_b_2", "get_a_b_3"]);
        assert_eq!(
            registry.lookup("get_a_b_2").map(|t| t.operation.path.as_str()),
            Some("/a_b")
        );
    }

    #[test]
    fn collisions_follow_document_order_when_built_from_a_value() {
        let doc = document(json!({
            "/a_b": {"get": {"responses": {"200": {"description": "ok"}}}},
            "/a-b": {"get": {"responses": {"200": {"description": "ok"}}}}
        }));
        let registry = ToolRegistry::build(&doc, &BridgeConfig::default()).expect("builds");
        let paths: Vec<_> = registry
            .tools()
            .iter()
            .map(|t| (t.definition.name.as_str(), t.operation.path.as_str()))
            .collect();
        assert_eq!(paths, vec![("get_a_b", "/a_b"), ("get_a_b_2", "/a-b")]);
    }

    #[test]
    fn base_path_matches_whole_segments() {
        assert!(within_base_path("/api", "/api"));
        assert!(within_base_path("/api/pets", "/api"));
        assert!(within_base_path("/api/pets", "/api/"));
        assert!(within_base_path("/anything", "/"));
        assert!(!within_base_path("/apiary", "/api"));
        assert!(!within_base_path("/v1/api", "/api"));

        let doc = document(json!({
            "/api/pets": {"get": {"responses": {"200": {"description": "ok"}}}},
            "/apiary": {"get": {"responses": {"200": {"description": "ok"}}}}
        }));
        let config = BridgeConfig {
            base_path: Some("/api".to_string()),
            ..BridgeConfig::default()
        };
        let registry = ToolRegistry::build(&doc, &config).expect("builds");
        let names: Vec<_> = registry.tools().iter().map(|t| t.definition.name.as_str()).collect();
        assert_eq!(names, vec!["get_api_pets"]);
        assert_eq!(registry.skipped()[0].path, "/apiary");
        assert!(matches!(
            registry.skipped()[0].reason,
            SkipReason::OutsideBasePath { .. }
        ));
    }

    #[test]
    fn discovery_name_is_reserved_first() {
        let doc = document(json!({
            "/x": {"get": {"operationId": "discover_api_tools", "responses": {"200": {"description": "ok"}}}}
        }));
        let mut config = BridgeConfig::default();
        config.discovery.enabled = true;
        let registry = ToolRegistry::build(&doc, &config).expect("builds");
        assert_eq!(registry.tools()[0].definition.name, "discover_api_tools_2");
        let listed: Vec<_> = registry.list_tools().into_iter().map(|t| t.name.to_string()).collect();
        assert_eq!(
            listed,
            vec!["discover_api_tools", "invoke_api_by_intent", "discover_api_tools_2"]
        );
    }

    #[test]
    fn gateway_only_lists_just_the_meta_tools() {
        let doc = document(json!({
            "/pets": {"get": {"operationId": "invoke_api_by_intent", "responses": {"200": {"description": "ok"}}}}
        }));
        let mut config = BridgeConfig::default();
        config.discovery.enabled = true;
        config.discovery.gateway_only = true;
        let registry = ToolRegistry::build(&doc, &config).expect("builds");
        assert!(registry.is_gateway_only());
        assert_eq!(registry.intent_tool_name(), Some("invoke_api_by_intent"));
        assert!(registry.lookup("invoke_api_by_intent_2").is_some());

        let listed: Vec<_> = registry.list_tools().into_iter().map(|t| t.name.to_string()).collect();
        assert_eq!(listed, vec!["discover_api_tools", "invoke_api_by_intent"]);
    }

    #[test]
    fn confirmed_examples_carry_the_token() {
        let doc = document(json!({
            "/pets": {
                "get": {"responses": {"200": {"description": "ok"}}},
                "post": {"responses": {"201": {"description": "created"}}}
            }
        }));
        let mut config = BridgeConfig::default();
        config.security.require_confirmation = true;
        config.security.confirmation_token = "YES".to_string();
        let registry = ToolRegistry::build(&doc, &config).expect("builds");

        let post = registry.lookup("post_pets").expect("post");
        assert!(post.risky);
        assert_eq!(post.example_arguments, json!({"_confirm": "YES"}));
        assert_eq!(registry.lookup("get_pets").expect("get").example_arguments, json!({}));
    }

    #[test]
    fn broken_operations_are_skipped_not_fatal() {
        let doc = document(json!({
            "/ok": {"get": {"responses": {"200": {"description": "ok"}}}},
            "/missing": {"get": {
                "parameters": [{"$ref": "#/components/parameters/Nope"}],
                "responses": {"200": {"description": "ok"}}
            }},
            "/cookie": {"get": {
                "parameters": [{"name": "sid", "in": "cookie", "required": true, "schema": {"type": "string"}}],
                "responses": {"200": {"description": "ok"}}
            }},
            "/list": {"get": {
                "parameters": [{"name": "n", "in": "query", "schema": {"$ref": "#/components/schemas/Node"}}],
                "responses": {"200": {"description": "ok"}}
            }}
        }));
        let registry = ToolRegistry::build(&doc, &BridgeConfig::default()).expect("builds");
        assert!(registry.lookup("get_ok").is_some());
        assert!(registry.lookup("get_list").is_some());
        assert_eq!(registry.len(), 2);

        let reason_for = |path: &str| {
            registry
                .skipped()
                .iter()
                .find(|s| s.path == path)
                .map(|s| s.reason.clone())
        };
        assert!(matches!(reason_for("/missing"), Some(SkipReason::Resolution(_))));
        assert!(matches!(reason_for("/cookie"), Some(SkipReason::RequiredCookie { .. })));

        for tool in registry.tools() {
            let schema = Value::Object((*tool.definition.input_schema).clone());
            assert!(!crate::resolver::contains_ref(&schema));
        }
    }

    #[test]
    fn filters_and_disabled_bridge() {
        let doc = document(json!({
            "/api/pets": {
                "get": {"responses": {"200": {"description": "ok"}}},
                "delete": {"responses": {"204": {"description": "gone"}}}
            },
            "/health": {"get": {"responses": {"200": {"description": "ok"}}}}
        }));

        let mut config = BridgeConfig {
            base_path: Some("/api".to_string()),
            ..BridgeConfig::default()
        };
        config.security.expose_risky_tools = false;
        let registry = ToolRegistry::build(&doc, &config).expect("builds");
        let names: Vec<_> = registry.tools().iter().map(|t| t.definition.name.as_str()).collect();
        assert_eq!(names, vec!["get_api_pets"]);
        assert_eq!(registry.skipped().len(), 2);

        let disabled = BridgeConfig {
            enabled: false,
            ..BridgeConfig::default()
        };
        let registry = ToolRegistry::build(&doc, &disabled).expect("builds");
        assert!(registry.is_empty());
        assert!(registry.list_tools().is_empty());
    }

    #[test]
    fn contract_hash_is_stable_and_sensitive() {
        let paths = json!({"/pets": {"get": {"summary": "List pets", "responses": {"200": {"description": "ok"}}}}});
        let a = ToolRegistry::build(&document(paths.clone()), &BridgeConfig::default()).expect("a");
        let b = ToolRegistry::build(&document(paths), &BridgeConfig::default()).expect("b");
        assert_eq!(a.contract_hash(), b.contract_hash());

        let changed = json!({"/pets": {"get": {"summary": "List all pets", "responses": {"200": {"description": "ok"}}}}});
        let c = ToolRegistry::build(&document(changed), &BridgeConfig::default()).expect("c");
        assert_ne!(a.contract_hash(), c.contract_hash());
    }
}
