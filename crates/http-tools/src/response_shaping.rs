//! Response shaping for agent-facing text output.
//!
//! Upstream bodies can be far larger than an agent needs. Shaping only affects the *text*
//! rendering of a result: large JSON is summarized (depth, array, object and string limits) and
//! the final text is capped at `maxChars` with a truncation marker. Structured results keep the
//! faithful body.
//!
//! Callers may adjust shaping per call through underscore-prefixed control arguments
//! (`_projection`, `_summarize`, `_maxDepth`, `_maxArrayItems`, `_maxObjectEntries`) when the
//! configuration enables them.

use crate::projection::project_or_report;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const TRUNCATION_MARKER: &str = "...[truncated]";
const DEPTH_MARKER: &str = "[truncated-depth]";

pub const PROJECTION_ARGUMENT: &str = "_projection";
pub const SUMMARIZE_ARGUMENT: &str = "_summarize";
pub const MAX_DEPTH_ARGUMENT: &str = "_maxDepth";
pub const MAX_ARRAY_ITEMS_ARGUMENT: &str = "_maxArrayItems";
pub const MAX_OBJECT_ENTRIES_ARGUMENT: &str = "_maxObjectEntries";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ResponseShapingConfig {
    /// Hard cap on the rendered text (characters). `0` disables the cap.
    pub max_chars: usize,
    /// JSON bodies whose serialized form reaches this many characters are summarized.
    pub summarize_threshold_chars: usize,
    /// Summarize every JSON body regardless of size.
    pub summarize_by_default: bool,
    pub max_depth: usize,
    pub max_object_entries: usize,
    pub max_array_items: usize,
    pub truncate_strings_at: usize,
    /// Accept a `_projection` argument (JSONPath subset or JSON Pointer) on every tool.
    pub projection_argument_enabled: bool,
    /// Accept `_summarize`, `_maxDepth`, `_maxArrayItems` and `_maxObjectEntries` on every tool.
    pub summarize_arguments_enabled: bool,
}

/// Per-call shaping adjustments read from control arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapingOverrides {
    pub projection: Option<String>,
    /// Force summarization on or off.
    pub summarize: Option<bool>,
    pub max_depth: Option<usize>,
    pub max_array_items: Option<usize>,
    pub max_object_entries: Option<usize>,
}

impl Default for ResponseShapingConfig {
    fn default() -> Self {
        Self {
            max_chars: 8000,
            summarize_threshold_chars: 4000,
            summarize_by_default: false,
            max_depth: 4,
            max_object_entries: 20,
            max_array_items: 20,
            truncate_strings_at: 1024,
            projection_argument_enabled: false,
            summarize_arguments_enabled: false,
        }
    }
}

impl ResponseShapingConfig {
    /// # Errors
    ///
    /// Returns a message naming the first summarization limit that is zero.
    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [
            ("maxDepth", self.max_depth),
            ("maxObjectEntries", self.max_object_entries),
            ("maxArrayItems", self.max_array_items),
            ("truncateStringsAt", self.truncate_strings_at),
        ] {
            if v == 0 {
                return Err(format!("response.{name} must be greater than 0"));
            }
        }
        Ok(())
    }

    /// Control arguments this configuration accepts, as `(name, JSON Schema)` pairs.
    #[must_use]
    pub fn control_arguments(&self) -> Vec<(&'static str, Value)> {
        let mut args = Vec::new();
        if self.projection_argument_enabled {
            args.push((
                PROJECTION_ARGUMENT,
                serde_json::json!({
                    "type": "string",
                    "description": "Return only part of a JSON response: a JSONPath such as $.items[*].name, or a JSON Pointer"
                }),
            ));
        }
        if self.summarize_arguments_enabled {
            args.push((
                SUMMARIZE_ARGUMENT,
                serde_json::json!({"type": "boolean", "description": "Force response summarization on or off"}),
            ));
            for (name, what) in [
                (MAX_DEPTH_ARGUMENT, "depth"),
                (MAX_ARRAY_ITEMS_ARGUMENT, "array items"),
                (MAX_OBJECT_ENTRIES_ARGUMENT, "object entries"),
            ] {
                args.push((
                    name,
                    serde_json::json!({
                        "type": "integer",
                        "minimum": 1,
                        "description": format!("Override the summary's maximum {what}")
                    }),
                ));
            }
        }
        args
    }

    /// Read the enabled control arguments from a call's arguments. Values that do not parse
    /// (or limits of zero) are ignored.
    #[must_use]
    pub fn overrides_from(&self, arguments: &Value) -> ShapingOverrides {
        let mut overrides = ShapingOverrides::default();
        let Some(args) = arguments.as_object() else {
            return overrides;
        };
        if self.projection_argument_enabled {
            overrides.projection = args
                .get(PROJECTION_ARGUMENT)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string);
        }
        if self.summarize_arguments_enabled {
            overrides.summarize = args.get(SUMMARIZE_ARGUMENT).and_then(lenient_bool);
            overrides.max_depth = args.get(MAX_DEPTH_ARGUMENT).and_then(lenient_limit);
            overrides.max_array_items = args.get(MAX_ARRAY_ITEMS_ARGUMENT).and_then(lenient_limit);
            overrides.max_object_entries =
                args.get(MAX_OBJECT_ENTRIES_ARGUMENT).and_then(lenient_limit);
        }
        overrides
    }

    /// Render a JSON body as text, summarizing it first when it is large.
    #[must_use]
    pub fn shape_json(&self, value: &Value) -> String {
        self.shape_json_with(value, &ShapingOverrides::default())
    }

    /// [`Self::shape_json`] after applying a projection and per-call limits.
    #[must_use]
    pub fn shape_json_with(&self, value: &Value, overrides: &ShapingOverrides) -> String {
        let projected;
        let value = match &overrides.projection {
            Some(expression) => {
                projected = project_or_report(value, expression);
                &projected
            }
            None => value,
        };

        let text = value.to_string();
        let summarize = overrides.summarize.unwrap_or_else(|| {
            self.summarize_by_default || text.chars().count() >= self.summarize_threshold_chars
        });
        if !summarize {
            return truncate_chars(&text, self.max_chars);
        }
        let limits = Self {
            max_depth: overrides.max_depth.unwrap_or(self.max_depth),
            max_array_items: overrides.max_array_items.unwrap_or(self.max_array_items),
            max_object_entries: overrides.max_object_entries.unwrap_or(self.max_object_entries),
            ..self.clone()
        };
        truncate_chars(&limits.summarize(value).to_string(), self.max_chars)
    }

    /// Render a non-JSON body: only the `maxChars` cap applies.
    #[must_use]
    pub fn shape_text(&self, text: &str) -> String {
        truncate_chars(text, self.max_chars)
    }

    /// Reduce a JSON value to the configured depth / breadth / string limits.
    #[must_use]
    pub fn summarize(&self, value: &Value) -> Value {
        self.summarize_at(value, 0)
    }

    fn summarize_at(&self, value: &Value, depth: usize) -> Value {
        if value.is_null() {
            return Value::Null;
        }
        if depth >= self.max_depth {
            return Value::String(DEPTH_MARKER.to_string());
        }
        match value {
            Value::Object(map) => {
                let mut out = Map::new();
                for (i, (k, v)) in map.iter().enumerate() {
                    if i >= self.max_object_entries {
                        out.insert(
                            "_truncated".to_string(),
                            Value::String("remaining keys omitted".to_string()),
                        );
                        break;
                    }
                    out.insert(k.clone(), self.summarize_at(v, depth + 1));
                }
                Value::Object(out)
            }
            Value::Array(arr) => {
                let limit = self.max_array_items.min(arr.len());
                let mut out: Vec<Value> = arr[..limit]
                    .iter()
                    .map(|v| self.summarize_at(v, depth + 1))
                    .collect();
                if arr.len() > limit {
                    out.push(Value::String(format!(
                        "[truncated {} items]",
                        arr.len() - limit
                    )));
                }
                Value::Array(out)
            }
            Value::String(s) => Value::String(truncate_chars(s, self.truncate_strings_at)),
            other => other.clone(),
        }
    }
}

fn lenient_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

fn lenient_limit(v: &Value) -> Option<usize> {
    let n = match v {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    usize::try_from(n).ok().filter(|n| *n > 0)
}

/// Cap `s` at `max_chars` characters, appending [`TRUNCATION_MARKER`] when cut. `0` means no
/// limit.
#[must_use]
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return s.to_string();
    }
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((idx, _)) => format!("{}{TRUNCATION_MARKER}", &s[..idx]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn small_limits() -> ResponseShapingConfig {
        ResponseShapingConfig {
            max_chars: 0,
            summarize_threshold_chars: 0,
            summarize_by_default: true,
            max_depth: 2,
            max_object_entries: 2,
            max_array_items: 2,
            truncate_strings_at: 3,
            ..ResponseShapingConfig::default()
        }
    }

    #[test]
    fn small_json_is_rendered_verbatim() {
        let cfg = ResponseShapingConfig::default();
        let v = json!({"name": "Rex"});
        assert_eq!(cfg.shape_json(&v), r#"{"name":"Rex"}"#);
    }

    #[test]
    fn summarize_limits_arrays_objects_strings_and_depth() {
        let cfg = small_limits();
        let v = json!({
            "a": [1, 2, 3, 4],
            "b": "abcdef",
            "c": true
        });
        let s = cfg.summarize(&v);
        assert_eq!(s["a"], json!(["[truncated-depth]", "[truncated-depth]", "[truncated 2 items]"]));
        assert_eq!(s["b"], json!("abc...[truncated]"));
        assert_eq!(s["_truncated"], json!("remaining keys omitted"));
        assert!(s.get("c").is_none());
    }

    #[test]
    fn large_bodies_are_summarized_past_threshold() {
        let cfg = ResponseShapingConfig {
            summarize_threshold_chars: 10,
            max_array_items: 1,
            ..ResponseShapingConfig::default()
        };
        let text = cfg.shape_json(&json!([1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(text, r#"[1,"[truncated 7 items]"]"#);
    }

    #[test]
    fn control_arguments_follow_the_enabled_flags() {
        let off = ResponseShapingConfig::default();
        assert!(off.control_arguments().is_empty());
        let args = json!({"_projection": "$.a", "_summarize": true, "_maxDepth": 2});
        assert_eq!(off.overrides_from(&args), ShapingOverrides::default());

        let on = ResponseShapingConfig {
            projection_argument_enabled: true,
            summarize_arguments_enabled: true,
            ..ResponseShapingConfig::default()
        };
        let names: Vec<_> = on.control_arguments().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["_projection", "_summarize", "_maxDepth", "_maxArrayItems", "_maxObjectEntries"]
        );
        let overrides = on.overrides_from(&json!({
            "_projection": " $.a ",
            "_summarize": "TRUE",
            "_maxDepth": "3",
            "_maxArrayItems": 0,
            "_maxObjectEntries": "many"
        }));
        assert_eq!(
            overrides,
            ShapingOverrides {
                projection: Some("$.a".to_string()),
                summarize: Some(true),
                max_depth: Some(3),
                max_array_items: None,
                max_object_entries: None,
            }
        );
    }

    #[test]
    fn overrides_project_then_summarize() {
        let cfg = ResponseShapingConfig::default();
        let body = json!({"items": [{"name": "Rex"}, {"name": "Tom"}, {"name": "Kit"}], "total": 3});

        let projected = ShapingOverrides {
            projection: Some("$.items[*].name".to_string()),
            ..ShapingOverrides::default()
        };
        assert_eq!(cfg.shape_json_with(&body, &projected), r#"["Rex","Tom","Kit"]"#);

        let summarized = ShapingOverrides {
            summarize: Some(true),
            max_array_items: Some(1),
            ..projected
        };
        assert_eq!(
            cfg.shape_json_with(&body, &summarized),
            r#"["Rex","[truncated 2 items]"]"#
        );

        let forced_off = ResponseShapingConfig {
            summarize_by_default: true,
            max_array_items: 1,
            ..ResponseShapingConfig::default()
        };
        let off = ShapingOverrides {
            summarize: Some(false),
            ..ShapingOverrides::default()
        };
        assert_eq!(forced_off.shape_json_with(&json!([1, 2]), &off), "[1,2]");
    }

    #[test]
    fn text_is_capped_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé...[truncated]");
        assert_eq!(truncate_chars("hi", 2), "hi");
        assert_eq!(truncate_chars("anything", 0), "anything");
    }

    #[test]
    fn config_is_camel_case_and_rejects_unknown_keys() {
        let cfg: ResponseShapingConfig =
            serde_json::from_value(json!({"maxChars": 10})).expect("valid config");
        assert_eq!(cfg.max_chars, 10);
        assert_eq!(cfg.max_depth, 4);
        assert!(serde_json::from_value::<ResponseShapingConfig>(json!({"bogus": 1})).is_err());
    }

    #[test]
    fn zero_limits_fail_validation() {
        let cfg = ResponseShapingConfig {
            max_depth: 0,
            ..ResponseShapingConfig::default()
        };
        assert!(cfg.validate().unwrap_err().contains("maxDepth"));
    }
}
