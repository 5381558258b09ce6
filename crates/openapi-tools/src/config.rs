use crate::error::{OpenApiToolsError, Result};
use mcpbridge_http_tools::response_shaping::ResponseShapingConfig;
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default cap on an upstream response body (10 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// Longest tool name accepted by MCP clients.
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Bridge configuration.
///
/// Loaded from YAML or JSON (camelCase keys; unknown keys are rejected) and validated at load.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct BridgeConfig {
    /// A disabled bridge exposes no tools.
    pub enabled: bool,

    /// Override the base URL from the document's `servers`.
    pub base_url: Option<String>,

    /// Only operations whose path starts with this prefix are exposed.
    pub base_path: Option<String>,

    pub operations: OperationFilterConfig,

    /// Nesting limit for inlined schemas; deeper subtrees become a placeholder.
    pub max_schema_depth: usize,

    /// Prepended to every tool name.
    pub tool_name_prefix: String,

    /// Incoming headers forwarded to the upstream call (case-insensitive).
    pub passthrough_headers: Vec<String>,

    /// Headers sent with every upstream call.
    pub default_headers: BTreeMap<String, String>,

    /// Per-call timeout.
    pub timeout_secs: u64,

    pub connect_timeout_secs: u64,

    /// Upstream bodies larger than this fail the call instead of being buffered.
    pub max_response_bytes: usize,

    pub response: ResponseShapingConfig,

    pub discovery: DiscoveryConfig,

    pub security: SecurityConfig,

    /// Optional document hash (`sha256:<hex>`).
    pub spec_hash: Option<String>,

    /// Hash policy: warn, fail, or ignore.
    pub spec_hash_policy: HashPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            base_path: None,
            operations: OperationFilterConfig::default(),
            max_schema_depth: 32,
            tool_name_prefix: String::new(),
            passthrough_headers: vec!["authorization".to_string()],
            default_headers: BTreeMap::new(),
            timeout_secs: 30,
            connect_timeout_secs: 3,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            response: ResponseShapingConfig::default(),
            discovery: DiscoveryConfig::default(),
            security: SecurityConfig::default(),
            spec_hash: None,
            spec_hash_policy: HashPolicy::default(),
        }
    }
}

/// Include / exclude glob patterns, matched against `"METHOD /path"` and the operation id.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct OperationFilterConfig {
    /// Empty means every operation is included.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// The `discover_api_tools` and `invoke_api_by_intent` meta-tools.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub default_top_k: usize,
    pub min_score: f64,
    /// List only the meta-tools; API tools are reached through `invoke_api_by_intent`.
    pub gateway_only: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_top_k: 8,
            min_score: 0.08,
            gateway_only: false,
        }
    }
}

/// Exposure policy for operations.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SecurityConfig {
    /// Path globs that are never exposed.
    pub blocked_paths: Vec<String>,
    /// Methods that make an operation risky.
    pub risky_methods: Vec<String>,
    /// Path globs that make an operation risky.
    pub risky_paths: Vec<String>,
    /// When false, risky operations are hidden.
    pub expose_risky_tools: bool,
    /// Log start/finish of every tool call at `info`.
    pub audit_log: bool,
    /// Risky tools take a required `_confirm` argument that must equal `confirmationToken`.
    pub require_confirmation: bool,
    pub confirmation_token: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            blocked_paths: Vec::new(),
            risky_methods: ["POST", "PUT", "PATCH", "DELETE"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            risky_paths: Vec::new(),
            expose_risky_tools: true,
            audit_log: true,
            require_confirmation: false,
            confirmation_token: "CONFIRM".to_string(),
        }
    }
}

/// Hash verification policy.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    /// Log warning if hash doesn't match.
    #[default]
    Warn,
    /// Fail loading if hash doesn't match.
    Fail,
    /// Ignore hash verification.
    Ignore,
}

impl BridgeConfig {
    /// Parse and validate a YAML (or JSON) configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid YAML/JSON, contains unknown keys, or fails
    /// [`BridgeConfig::validate`].
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| OpenApiToolsError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the configuration is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            OpenApiToolsError::Config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Check every option against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::Config`] naming the first invalid option.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(OpenApiToolsError::Config(msg));

        if !self
            .tool_name_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return invalid(format!(
                "toolNamePrefix '{}' may only contain [A-Za-z0-9_]",
                self.tool_name_prefix
            ));
        }
        if self.tool_name_prefix.len() >= MAX_TOOL_NAME_LEN {
            return invalid(format!(
                "toolNamePrefix must be shorter than {MAX_TOOL_NAME_LEN} characters"
            ));
        }
        if self.timeout_secs == 0 {
            return invalid("timeoutSecs must be greater than 0".to_string());
        }
        if self.connect_timeout_secs == 0 {
            return invalid("connectTimeoutSecs must be greater than 0".to_string());
        }
        if self.max_response_bytes == 0 {
            return invalid("maxResponseBytes must be greater than 0".to_string());
        }
        if self.max_schema_depth == 0 {
            return invalid("maxSchemaDepth must be greater than 0".to_string());
        }
        if let Some(base_url) = &self.base_url {
            parse_base_url(base_url)?;
        }
        if let Some(base_path) = &self.base_path
            && !base_path.starts_with('/')
        {
            return invalid(format!("basePath '{base_path}' must start with '/'"));
        }
        for name in &self.passthrough_headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                OpenApiToolsError::Config(format!("invalid passthrough header '{name}': {e}"))
            })?;
        }
        for (name, value) in &self.default_headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                OpenApiToolsError::Config(format!("invalid default header name '{name}': {e}"))
            })?;
            HeaderValue::from_str(value).map_err(|e| {
                OpenApiToolsError::Config(format!("invalid value for default header '{name}': {e}"))
            })?;
        }
        for method in &self.security.risky_methods {
            Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|e| {
                OpenApiToolsError::Config(format!("invalid security.riskyMethods entry '{method}': {e}"))
            })?;
        }
        if !self.discovery.min_score.is_finite() || self.discovery.min_score < 0.0 {
            return invalid("discovery.minScore must be a non-negative number".to_string());
        }
        if self.discovery.default_top_k == 0 {
            return invalid("discovery.defaultTopK must be greater than 0".to_string());
        }
        if self.discovery.gateway_only && !self.discovery.enabled {
            return invalid("discovery.gatewayOnly requires discovery.enabled".to_string());
        }
        if self.security.require_confirmation && self.security.confirmation_token.trim().is_empty() {
            return invalid(
                "security.confirmationToken must not be empty when requireConfirmation is set"
                    .to_string(),
            );
        }
        if let Some(hash) = &self.spec_hash
            && !hash.starts_with("sha256:")
        {
            return invalid(format!("specHash '{hash}' must have the form 'sha256:<hex>'"));
        }
        self.response
            .validate()
            .map_err(OpenApiToolsError::Config)?;
        Ok(())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Name of the discovery meta-tool, when enabled.
    #[must_use]
    pub fn discovery_tool_name(&self) -> Option<String> {
        self.discovery.enabled.then(|| {
            format!(
                "{}{}",
                self.tool_name_prefix,
                crate::selector::DISCOVERY_TOOL_NAME
            )
        })
    }

    /// Name of the intent meta-tool; enabled together with discovery.
    #[must_use]
    pub fn intent_tool_name(&self) -> Option<String> {
        self.discovery.enabled.then(|| {
            format!(
                "{}{}",
                self.tool_name_prefix,
                crate::selector::INTENT_TOOL_NAME
            )
        })
    }
}

/// An absolute http(s) URL with no query or fragment; request paths are appended to it.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::Config`] describing what is wrong with `raw`.
pub(crate) fn parse_base_url(raw: &str) -> Result<Url> {
    let invalid = |why: String| {
        Err(OpenApiToolsError::Config(format!(
            "invalid base URL '{raw}': {why} (set baseUrl to an absolute http(s) URL)"
        )))
    };
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(e) => return invalid(e.to_string()),
    };
    if !matches!(url.scheme(), "http" | "https") {
        return invalid("must be an http(s) URL".to_string());
    }
    if url.query().is_some() || url.fragment().is_some() {
        return invalid("must not carry a query or fragment".to_string());
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = BridgeConfig::default();
        cfg.validate().expect("defaults validate");
        assert_eq!(cfg.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(3));
        assert!(cfg.discovery_tool_name().is_none());
        assert!(cfg.intent_tool_name().is_none());
        assert!(!cfg.security.require_confirmation);
    }

    #[test]
    fn parses_camel_case_yaml() {
        let cfg = BridgeConfig::from_yaml_str(
            r"
baseUrl: http://localhost:8080/api
toolNamePrefix: pets_
passthroughHeaders: [authorization, x-request-id]
defaultHeaders:
  x-client: mcpbridge
operations:
  exclude: ['DELETE *']
discovery:
  enabled: true
  defaultTopK: 3
  gatewayOnly: true
security:
  exposeRiskyTools: false
  requireConfirmation: true
  confirmationToken: YES
response:
  maxChars: 100
  projectionArgumentEnabled: true
",
        )
        .expect("valid config");
        assert_eq!(cfg.tool_name_prefix, "pets_");
        assert_eq!(cfg.operations.exclude, vec!["DELETE *".to_string()]);
        assert_eq!(cfg.discovery.default_top_k, 3);
        assert!(!cfg.security.expose_risky_tools);
        assert_eq!(cfg.security.risky_methods.len(), 4);
        assert_eq!(cfg.response.max_chars, 100);
        assert!(cfg.response.projection_argument_enabled);
        assert!(cfg.discovery.gateway_only);
        assert!(cfg.security.require_confirmation);
        assert_eq!(cfg.security.confirmation_token, "YES");
        assert_eq!(
            cfg.discovery_tool_name().as_deref(),
            Some("pets_discover_api_tools")
        );
        assert_eq!(
            cfg.intent_tool_name().as_deref(),
            Some("pets_invoke_api_by_intent")
        );
    }

    #[test]
    fn base_url_keeps_its_path() {
        let url = parse_base_url("https://api.example.com/v1/").expect("valid");
        assert_eq!(url.path(), "/v1/");
        let err = parse_base_url("https://api.example.com/v1?token=x").unwrap_err();
        assert!(err.to_string().contains("query or fragment"), "{err}");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = BridgeConfig::from_yaml_str("timeoutSecs: 5\nretries: 3\n").unwrap_err();
        assert!(err.to_string().contains("retries"), "{err}");
    }

    #[test]
    fn invalid_values_fail_fast() {
        for yaml in [
            "toolNamePrefix: 'bad-prefix'",
            "timeoutSecs: 0",
            "maxSchemaDepth: 0",
            "maxResponseBytes: 0",
            "baseUrl: ftp://example.com",
            "baseUrl: /relative",
            "baseUrl: 'http://example.com/api?key=1'",
            "baseUrl: 'http://example.com/api#top'",
            "basePath: api",
            "defaultHeaders: {'bad header': x}",
            "discovery: {minScore: -1}",
            "discovery: {gatewayOnly: true}",
            "security: {requireConfirmation: true, confirmationToken: ' '}",
            "specHash: md5:abc",
            "response: {maxDepth: 0}",
        ] {
            assert!(
                BridgeConfig::from_yaml_str(yaml).is_err(),
                "expected '{yaml}' to be rejected"
            );
        }
    }
}
