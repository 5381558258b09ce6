//! Operation exposure policy and audit logging.

use crate::config::{BridgeConfig, SecurityConfig};
use crate::converter::{CONFIRM_ARGUMENT, SkipReason};
use crate::document::OperationDescriptor;
use crate::error::InvocationError;
use reqwest::Method;
use serde_json::Value;

/// Decides which operations are exposed and which count as risky.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    blocked_paths: Vec<String>,
    risky_methods: Vec<Method>,
    risky_paths: Vec<String>,
    expose_risky: bool,
    audit_log: bool,
    confirmation_token: Option<String>,
}

impl SecurityPolicy {
    #[must_use]
    pub fn from_config(config: &SecurityConfig) -> Self {
        Self {
            blocked_paths: config.blocked_paths.clone(),
            // Entries were validated at config load.
            risky_methods: config
                .risky_methods
                .iter()
                .filter_map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
                .collect(),
            risky_paths: config.risky_paths.clone(),
            expose_risky: config.expose_risky_tools,
            audit_log: config.audit_log,
            confirmation_token: config
                .require_confirmation
                .then(|| config.confirmation_token.clone()),
        }
    }

    /// The first blocked-path pattern matching `path`.
    #[must_use]
    pub fn blocked_by(&self, path: &str) -> Option<&str> {
        self.blocked_paths
            .iter()
            .find(|p| glob_match(p, path))
            .map(String::as_str)
    }

    #[must_use]
    pub fn is_risky(&self, method: &Method, path: &str) -> bool {
        self.risky_methods.contains(method) || self.risky_paths.iter().any(|p| glob_match(p, path))
    }

    /// `Ok(risky)` when the operation may be exposed.
    ///
    /// # Errors
    ///
    /// Returns the [`SkipReason`] when the policy hides the operation.
    pub fn exposure(&self, op: &OperationDescriptor) -> Result<bool, SkipReason> {
        if let Some(pattern) = self.blocked_by(&op.path) {
            return Err(SkipReason::Blocked {
                pattern: pattern.to_string(),
            });
        }
        let risky = self.is_risky(&op.method, &op.path);
        if risky && !self.expose_risky {
            return Err(SkipReason::RiskyHidden);
        }
        Ok(risky)
    }

    /// Risky calls must carry the configured `_confirm` token, when one is required.
    ///
    /// # Errors
    ///
    /// Returns a `ConfirmationRequired` error naming the expected token.
    pub fn check_confirmation(&self, risky: bool, arguments: &Value) -> Result<(), InvocationError> {
        let Some(token) = self.confirmation_token.as_deref().filter(|_| risky) else {
            return Ok(());
        };
        let given = arguments.get(CONFIRM_ARGUMENT).and_then(Value::as_str);
        if given == Some(token) {
            Ok(())
        } else {
            Err(InvocationError::confirmation_required(token))
        }
    }

    pub fn audit_start(&self, tool: &str, op: &OperationDescriptor, arguments: &Value) {
        if !self.audit_log {
            return;
        }
        let arg_keys: Vec<&str> = arguments
            .as_object()
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default();
        tracing::info!(
            tool,
            method = %op.method,
            path = %op.path,
            arg_keys = ?arg_keys,
            "Tool execution started"
        );
    }

    pub fn audit_finish(&self, tool: &str, success: bool, status: Option<u16>) {
        if !self.audit_log {
            return;
        }
        tracing::info!(tool, success, status, "Tool execution finished");
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::from_config(&SecurityConfig::default())
    }
}

/// Include / exclude filtering from `operations.*`.
///
/// Patterns are matched against `"METHOD /path"` and the operation id; exclude wins.
///
/// # Errors
///
/// Returns [`SkipReason::Excluded`] or [`SkipReason::NotIncluded`].
pub fn check_operation_filters(
    config: &BridgeConfig,
    op: &OperationDescriptor,
) -> Result<(), SkipReason> {
    let key = op.display_key();
    let matches = |pattern: &String| {
        matches_pattern(pattern, &key)
            || op
                .operation_id
                .as_deref()
                .is_some_and(|id| matches_pattern(pattern, id))
    };

    if let Some(pattern) = config.operations.exclude.iter().find(|p| matches(*p)) {
        return Err(SkipReason::Excluded {
            pattern: pattern.clone(),
        });
    }
    if !config.operations.include.is_empty() && !config.operations.include.iter().any(matches) {
        return Err(SkipReason::NotIncluded);
    }
    Ok(())
}

/// Method names in patterns are matched case-insensitively (`get /pets*` == `GET /pets*`).
fn matches_pattern(pattern: &str, operation: &str) -> bool {
    match (pattern.split_once(' '), operation.split_once(' ')) {
        (Some((pm, pp)), Some((om, op))) => glob_match(&pm.to_ascii_uppercase(), om) && glob_match(pp, op),
        _ => glob_match(pattern, operation),
    }
}

/// Simple glob matching on bytes: `*` is any sequence, `?` any single byte.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_bytes = pattern.as_bytes();
    let text_bytes = text.as_bytes();

    let mut pattern_index = 0usize;
    let mut text_index = 0usize;

    let mut star_index: Option<usize> = None;
    let mut star_text_index: usize = 0;

    while text_index < text_bytes.len() {
        match pattern_bytes.get(pattern_index) {
            Some(b'*') => {
                star_index = Some(pattern_index);
                pattern_index += 1;
                star_text_index = text_index;
            }
            Some(b'?') => {
                pattern_index += 1;
                text_index += 1;
            }
            Some(&b) if b == text_bytes[text_index] => {
                pattern_index += 1;
                text_index += 1;
            }
            _ => {
                let Some(si) = star_index else {
                    return false;
                };

                pattern_index = si + 1;
                star_text_index += 1;
                text_index = star_text_index;
            }
        }
    }

    while matches!(pattern_bytes.get(pattern_index), Some(b'*')) {
        pattern_index += 1;
    }

    pattern_index == pattern_bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(method: Method, path: &str, id: Option<&str>) -> OperationDescriptor {
        OperationDescriptor {
            operation_id: id.map(str::to_string),
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
    fn test_glob_match() {
        assert!(glob_match("GET /pets*", "GET /pets/{id}"));
        assert!(glob_match("* /admin/*", "DELETE /admin/users"));
        assert!(glob_match("/pets/?", "/pets/1"));
        assert!(!glob_match("/pets/?", "/pets/12"));
        assert!(!glob_match("GET /users", "GET /users/1"));
    }

    #[test]
    fn exclude_wins_over_include() {
        let mut config = BridgeConfig::default();
        config.operations.include = vec!["get /pets*".to_string()];
        config.operations.exclude = vec!["deletePet".to_string(), "GET /pets/admin".to_string()];

        assert!(check_operation_filters(&config, &op(Method::GET, "/pets", None)).is_ok());
        assert_eq!(
            check_operation_filters(&config, &op(Method::GET, "/users", None)),
            Err(SkipReason::NotIncluded)
        );
        assert!(matches!(
            check_operation_filters(&config, &op(Method::GET, "/pets/admin", None)),
            Err(SkipReason::Excluded { .. })
        ));
        assert!(matches!(
            check_operation_filters(&config, &op(Method::DELETE, "/pets/{id}", Some("deletePet"))),
            Err(SkipReason::Excluded { .. })
        ));
    }

    #[test]
    fn risky_and_blocked_operations() {
        let policy = SecurityPolicy::from_config(&SecurityConfig {
            blocked_paths: vec!["/internal/*".to_string()],
            risky_paths: vec!["*/reset".to_string()],
            expose_risky_tools: false,
            ..SecurityConfig::default()
        });

        assert!(matches!(
            policy.exposure(&op(Method::GET, "/internal/metrics", None)),
            Err(SkipReason::Blocked { .. })
        ));
        assert_eq!(
            policy.exposure(&op(Method::POST, "/pets", None)),
            Err(SkipReason::RiskyHidden)
        );
        assert_eq!(
            policy.exposure(&op(Method::GET, "/cache/reset", None)),
            Err(SkipReason::RiskyHidden)
        );
        assert_eq!(policy.exposure(&op(Method::GET, "/pets", None)), Ok(false));

        let exposed = SecurityPolicy::default();
        assert_eq!(exposed.exposure(&op(Method::DELETE, "/pets/1", None)), Ok(true));
    }

    #[test]
    fn risky_calls_need_the_confirmation_token() {
        use serde_json::json;

        let unguarded = SecurityPolicy::default();
        assert!(unguarded.check_confirmation(true, &json!({})).is_ok());

        let policy = SecurityPolicy::from_config(&SecurityConfig {
            require_confirmation: true,
            confirmation_token: "YES".to_string(),
            ..SecurityConfig::default()
        });
        assert!(policy.check_confirmation(false, &json!({})).is_ok());
        assert!(policy.check_confirmation(true, &json!({"_confirm": "YES"})).is_ok());
        for args in [json!({}), json!({"_confirm": "yes"}), json!({"_confirm": true}), Value::Null] {
            let err = policy.check_confirmation(true, &args).unwrap_err();
            assert_eq!(err.kind, crate::error::ErrorKind::ConfirmationRequired);
            assert_eq!(err.message, "Confirmation is required. Provide _confirm=\"YES\"");
        }
    }
}
