//! `ToolBridge`: the protocol-facing surface (`list_tools`, `call_tool`, `reload`).

use crate::config::{BridgeConfig, parse_base_url};
use crate::converter::CONFIRM_ARGUMENT;
use crate::document::OpenApiDocument;
use crate::error::{InvocationError, OpenApiToolsError, Result};
use crate::executor::{HttpExecutor, ReqwestExecutor};
use crate::invocation::{HttpRequestDescriptor, InvocationBridge, InvocationContext};
use crate::policy::SecurityPolicy;
use crate::registry::{RegisteredTool, ToolRegistry};
use crate::response::{InvocationResult, ResponseMapper};
use crate::selector::ToolSelector;
use parking_lot::RwLock;
use rmcp::model::{CallToolResult, Content, RawContent, Tool};
use serde_json::{Value, json};
use std::sync::Arc;
use url::Url;

/// Everything derived from one document load.
#[derive(Debug)]
struct BridgeState {
    registry: Arc<ToolRegistry>,
    /// `None` only for a disabled bridge, whose registry is empty.
    invocation: Option<InvocationBridge>,
}

/// Result of [`ToolBridge::reload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadOutcome {
    /// The advertised tool list differs from before.
    pub changed: bool,
    pub tools: usize,
    pub contract_hash: String,
}

/// Serves tool listing and tool calls for one `OpenAPI` document.
///
/// The registry is immutable; [`ToolBridge::reload`] swaps in a new one while in-flight calls
/// finish against the registry they started with.
pub struct ToolBridge {
    config: BridgeConfig,
    state: RwLock<Arc<BridgeState>>,
    executor: Arc<dyn HttpExecutor>,
    mapper: ResponseMapper,
    policy: SecurityPolicy,
}

impl std::fmt::Debug for ToolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBridge")
            .field("tools", &self.state.read().registry.len())
            .finish_non_exhaustive()
    }
}

impl ToolBridge {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the document hash check fails under
    /// the `fail` policy, or no absolute base URL can be determined.
    pub fn new(
        document: &OpenApiDocument,
        config: BridgeConfig,
        executor: Arc<dyn HttpExecutor>,
    ) -> Result<Self> {
        config.validate()?;
        let state = Self::load_state(document, &config)?;
        Ok(Self {
            mapper: ResponseMapper::new(config.response.clone()),
            policy: SecurityPolicy::from_config(&config.security),
            state: RwLock::new(Arc::new(state)),
            executor,
            config,
        })
    }

    /// Like [`ToolBridge::new`] with a [`ReqwestExecutor`] honouring `connectTimeoutSecs`.
    ///
    /// # Errors
    ///
    /// Same as [`ToolBridge::new`], plus HTTP client construction failures.
    pub fn with_reqwest(document: &OpenApiDocument, config: BridgeConfig) -> Result<Self> {
        let executor = ReqwestExecutor::new(config.connect_timeout(), config.max_response_bytes)?;
        Self::new(document, config, Arc::new(executor))
    }

    fn load_state(document: &OpenApiDocument, config: &BridgeConfig) -> Result<BridgeState> {
        document.verify_hash(config.spec_hash.as_deref(), config.spec_hash_policy)?;
        let registry = ToolRegistry::build(document, config)?;
        let invocation = if config.enabled {
            let base_url = resolve_base_url(document, config)?;
            tracing::info!(base_url = %base_url, "Resolved upstream base URL");
            Some(InvocationBridge::new(base_url, config)?)
        } else {
            None
        };
        Ok(BridgeState {
            registry: Arc::new(registry),
            invocation,
        })
    }

    fn snapshot(&self) -> Arc<BridgeState> {
        self.state.read().clone()
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The current registry.
    #[must_use]
    pub fn registry(&self) -> Arc<ToolRegistry> {
        self.snapshot().registry.clone()
    }

    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.snapshot().registry.list_tools()
    }

    /// Build the upstream request without sending it.
    ///
    /// # Errors
    ///
    /// `ToolNotFound`, `MissingRequiredArgument` or `RequestConstruction`.
    pub fn build_request(
        &self,
        name: &str,
        arguments: &Value,
        ctx: &InvocationContext,
    ) -> std::result::Result<HttpRequestDescriptor, InvocationError> {
        let state = self.snapshot();
        let invocation = state
            .invocation
            .as_ref()
            .filter(|_| !state.registry.is_gateway_only())
            .ok_or_else(|| InvocationError::tool_not_found(name))?;
        invocation.build_request(&state.registry, name, arguments, ctx)
    }

    /// Call an API tool and return the typed outcome.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Value,
        ctx: &InvocationContext,
    ) -> InvocationResult {
        let state = self.snapshot();
        let Some(tool) = directly_callable(&state.registry, name) else {
            return InvocationError::tool_not_found(name).into();
        };
        self.invoke_tool(&state, tool, &arguments, ctx).await
    }

    async fn invoke_tool(
        &self,
        state: &BridgeState,
        tool: &RegisteredTool,
        arguments: &Value,
        ctx: &InvocationContext,
    ) -> InvocationResult {
        let Some(invocation) = &state.invocation else {
            return InvocationError::tool_not_found(&tool.definition.name).into();
        };
        if let Err(e) = self.policy.check_confirmation(tool.risky, arguments) {
            tracing::warn!(tool = %tool.definition.name, "Risky call without confirmation");
            return e.into();
        }
        let request = match invocation.build_for_tool(tool, arguments, ctx) {
            Ok(r) => r,
            Err(e) => return e.into(),
        };
        let outcome = self.executor.execute(request).await;
        self.mapper.map(outcome)
    }

    /// `tools/call`: never fails; errors come back as `is_error` results.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        ctx: &InvocationContext,
    ) -> CallToolResult {
        let state = self.snapshot();

        if state.registry.discovery_tool_name() == Some(name) {
            return self.discover(&state.registry, &arguments);
        }
        if state.registry.intent_tool_name() == Some(name) {
            return self.invoke_by_intent(&state, &arguments, ctx).await;
        }

        let Some(tool) = directly_callable(&state.registry, name) else {
            tracing::warn!(tool = name, "Tool not found");
            return self.render_error(InvocationError::tool_not_found(name));
        };
        self.call_registered(&state, tool, &arguments, ctx).await
    }

    async fn call_registered(
        &self,
        state: &BridgeState,
        tool: &RegisteredTool,
        arguments: &Value,
        ctx: &InvocationContext,
    ) -> CallToolResult {
        let name = tool.definition.name.as_str();
        self.policy.audit_start(name, &tool.operation, arguments);
        let result = self.invoke_tool(state, tool, arguments, ctx).await;
        self.policy
            .audit_finish(name, result.is_success(), result.status());

        if let Some(err) = result.error() {
            tracing::warn!(tool = name, kind = err.kind.name(), error = %err, "Tool call failed");
        }
        let overrides = self.config.response.overrides_from(arguments);
        self.mapper
            .render_with(&result, tool.definition.output_schema.is_some(), &overrides)
    }

    fn render_error(&self, error: InvocationError) -> CallToolResult {
        self.mapper.render(&error.into(), false)
    }

    fn discover(&self, registry: &ToolRegistry, arguments: &Value) -> CallToolResult {
        let Some(selector) = registry.selector() else {
            let name = registry.discovery_tool_name().unwrap_or_default();
            return self.render_error(InvocationError::tool_not_found(name));
        };
        let Some(query) = arguments.get("query").and_then(Value::as_str) else {
            return self.render_error(InvocationError::missing_argument("query"));
        };
        let top_k = requested_top_k(arguments, selector);

        let tools: Vec<Value> = selector
            .select(query, top_k)
            .into_iter()
            .filter_map(|m| {
                let tool = registry.lookup(&m.name)?;
                Some(json!({
                    "name": m.name,
                    "score": m.score,
                    "description": tool.definition.description,
                    "method": tool.operation.method.as_str(),
                    "path": tool.operation.path,
                    "exampleArguments": tool.example_arguments,
                }))
            })
            .collect();
        tracing::debug!(query, matches = tools.len(), "Tool discovery");

        let body = json!({ "query": query, "tools": tools });
        CallToolResult {
            content: vec![Content::text(body.to_string())],
            structured_content: Some(body),
            is_error: Some(false),
            meta: None,
        }
    }

    /// Pick the best-scoring tool for `query` and call it with the nested `arguments`.
    async fn invoke_by_intent(
        &self,
        state: &BridgeState,
        arguments: &Value,
        ctx: &InvocationContext,
    ) -> CallToolResult {
        let registry = &state.registry;
        let Some(selector) = registry.selector() else {
            let name = registry.intent_tool_name().unwrap_or_default();
            return self.render_error(InvocationError::tool_not_found(name));
        };
        let Some(query) = arguments
            .get("query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
        else {
            return self.render_error(InvocationError::missing_argument("query"));
        };

        let best = selector
            .select(query, requested_top_k(arguments, selector))
            .into_iter()
            .next();
        let Some((best, tool)) = best.and_then(|m| registry.lookup(&m.name).map(|t| (m, t))) else {
            tracing::info!(query, "No tool matched intent");
            return self.render_error(InvocationError::no_matching_tool(query));
        };

        let mut delegated = arguments
            .get("arguments")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        if let Some(confirm) = arguments.get(CONFIRM_ARGUMENT) {
            delegated
                .entry(CONFIRM_ARGUMENT)
                .or_insert_with(|| confirm.clone());
        }
        tracing::info!(query, tool = %best.name, score = best.score, "Intent selected tool");

        let result = self
            .call_registered(state, tool, &Value::Object(delegated), ctx)
            .await;
        let text = result
            .content
            .iter()
            .find_map(|c| match &c.raw {
                RawContent::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .unwrap_or_default();
        let inner = result
            .structured_content
            .clone()
            .unwrap_or_else(|| Value::String(text.to_string()));

        CallToolResult {
            content: vec![Content::text(format!("Selected tool: {}\n{text}", best.name))],
            structured_content: Some(json!({
                "selectedTool": best.name,
                "score": best.score,
                "result": inner,
            })),
            is_error: result.is_error,
            meta: None,
        }
    }

    /// Rebuild from a new document and swap the registry in.
    ///
    /// # Errors
    ///
    /// On error the previous registry stays active.
    pub fn reload(&self, document: &OpenApiDocument) -> Result<ReloadOutcome> {
        let state = Self::load_state(document, &self.config)?;
        let contract_hash = state.registry.contract_hash();
        let tools = state.registry.len();

        let previous = {
            let mut guard = self.state.write();
            std::mem::replace(&mut *guard, Arc::new(state))
        };
        let changed = previous.registry.contract_hash() != contract_hash;

        tracing::info!(tools, changed, "Reloaded OpenAPI document");
        Ok(ReloadOutcome {
            changed,
            tools,
            contract_hash,
        })
    }
}

/// API tools are not callable by name in gateway-only mode.
fn directly_callable<'a>(registry: &'a ToolRegistry, name: &str) -> Option<&'a RegisteredTool> {
    registry.lookup(name).filter(|_| !registry.is_gateway_only())
}

fn requested_top_k(arguments: &Value, selector: &ToolSelector) -> usize {
    arguments
        .get("topK")
        .and_then(Value::as_u64)
        .and_then(|k| usize::try_from(k).ok())
        .unwrap_or_else(|| selector.default_top_k())
}

/// Configured `baseUrl`, else the document's first server.
fn resolve_base_url(document: &OpenApiDocument, config: &BridgeConfig) -> Result<Url> {
    let raw = config
        .base_url
        .clone()
        .or_else(|| document.server_url())
        .ok_or_else(|| {
            OpenApiToolsError::Config(
                "no baseUrl configured and the document declares no servers".to_string(),
            )
        })?;
    parse_base_url(&raw)
}
