//! The `discover_api_tools` and `invoke_api_by_intent` meta-tools: rank registered tools
//! against a free-text query, and optionally call the best match.

use crate::config::DiscoveryConfig;
use crate::registry::RegisteredTool;
use regex::Regex;
use rmcp::model::Tool;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

pub const DISCOVERY_TOOL_NAME: &str = "discover_api_tools";
pub const INTENT_TOOL_NAME: &str = "invoke_api_by_intent";

const OVERLAP_WEIGHT: f64 = 0.65;
const COVERAGE_WEIGHT: f64 = 0.2;
const CONTAINS_BONUS: f64 = 0.45;

static SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    search_text: String,
    tokens: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTool {
    pub name: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct ToolSelector {
    candidates: Vec<Candidate>,
    default_top_k: usize,
    min_score: f64,
}

impl ToolSelector {
    #[must_use]
    pub fn new(tools: &[RegisteredTool], config: &DiscoveryConfig) -> Self {
        let candidates = tools
            .iter()
            .map(|t| {
                let search_text = search_text(t);
                Candidate {
                    name: t.definition.name.clone(),
                    tokens: tokenize(&search_text),
                    search_text,
                }
            })
            .collect();
        Self {
            candidates,
            default_top_k: config.default_top_k,
            min_score: config.min_score,
        }
    }

    #[must_use]
    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Best matches first; ties keep registration order.
    #[must_use]
    pub fn select(&self, query: &str, top_k: usize) -> Vec<ScoredTool> {
        let query_tokens = tokenize(query);
        let normalized = normalize(query);
        if query_tokens.is_empty() && normalized.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<ScoredTool> = self
            .candidates
            .iter()
            .map(|c| ScoredTool {
                name: c.name.clone(),
                score: score(&query_tokens, &normalized, c),
            })
            .filter(|s| s.score > 0.0 && s.score >= self.min_score)
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k.max(1));
        scored
    }
}

fn score(query_tokens: &HashSet<String>, normalized_query: &str, candidate: &Candidate) -> f64 {
    if candidate.tokens.is_empty() {
        return 0.0;
    }
    let overlap = query_tokens
        .iter()
        .filter(|t| candidate.tokens.contains(*t))
        .count() as f64;
    let overlap_score = if query_tokens.is_empty() {
        0.0
    } else {
        overlap / query_tokens.len() as f64
    };
    let coverage_score = overlap / candidate.tokens.len() as f64;
    let contains_score =
        if !normalized_query.is_empty() && candidate.search_text.contains(normalized_query) {
            CONTAINS_BONUS
        } else {
            0.0
        };
    overlap_score * OVERLAP_WEIGHT + coverage_score * COVERAGE_WEIGHT + contains_score
}

fn search_text(tool: &RegisteredTool) -> String {
    let op = &tool.operation;
    let mut parts: Vec<&str> = vec![&tool.definition.name];
    if let Some(id) = &op.operation_id {
        parts.push(id);
    }
    parts.push(op.method.as_str());
    parts.push(&op.path);
    parts.push(&tool.definition.description);
    parts.extend(op.tags.iter().map(String::as_str));
    normalize(&parts.join(" "))
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn tokenize(s: &str) -> HashSet<String> {
    SPLIT_RE
        .split(&normalize(s))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Protocol definition of the meta-tool.
#[must_use]
pub fn discovery_tool(name: &str) -> Tool {
    let schema = json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "What you want to do, in plain words"
            },
            "topK": {
                "type": "integer",
                "minimum": 1,
                "description": "Maximum number of tools to return"
            }
        },
        "required": ["query"],
        "additionalProperties": false
    });
    let mut tool = Tool::new(
        name.to_string(),
        "Find the API tools most relevant to a task description. Returns tool names, scores and example arguments.",
        Arc::new(schema.as_object().cloned().unwrap_or_default()),
    );
    tool.annotations = Some(rmcp::model::ToolAnnotations {
        title: Some("Discover API tools".to_string()),
        read_only_hint: Some(true),
        destructive_hint: Some(false),
        idempotent_hint: Some(true),
        open_world_hint: Some(false),
    });
    tool
}

/// Protocol definition of the intent meta-tool.
#[must_use]
pub fn intent_tool(name: &str) -> Tool {
    let schema = json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "What you want to do, in plain words"
            },
            "topK": {
                "type": "integer",
                "minimum": 1,
                "description": "Number of candidate tools to consider"
            },
            "arguments": {
                "type": "object",
                "additionalProperties": true,
                "description": "Arguments passed to the selected tool"
            },
            "_confirm": {
                "type": "string",
                "description": "Confirmation token, when the selected tool is risky"
            }
        },
        "required": ["query"],
        "additionalProperties": false
    });
    let mut tool = Tool::new(
        name.to_string(),
        "Pick the API tool that best matches a task description and call it with the given arguments.",
        Arc::new(schema.as_object().cloned().unwrap_or_default()),
    );
    tool.annotations = Some(rmcp::model::ToolAnnotations {
        title: Some("Invoke API by intent".to_string()),
        read_only_hint: Some(false),
        destructive_hint: None,
        idempotent_hint: Some(false),
        open_world_hint: Some(true),
    });
    tool
}
