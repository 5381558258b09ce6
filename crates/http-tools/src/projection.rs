//! Response projection: pick part of a JSON body before it is rendered.
//!
//! Two expression forms are accepted:
//! - JSON Pointer (`/items/0/name`), resolved with [`Value::pointer`]
//! - a JSONPath subset rooted at `$`: `.name`, `['name']`, `[3]`, `[-1]`, `[*]` and `.*`
//!
//! A path without wildcards is *definite* and yields one value; a path with wildcards yields
//! the array of every match.

use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProjectionError {
    #[error("invalid projection: {0}")]
    Syntax(String),

    #[error("no value matched expression")]
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(i64),
    Wildcard,
}

/// Evaluate `expression` against `value`.
///
/// # Errors
///
/// [`ProjectionError::Syntax`] for a malformed expression, [`ProjectionError::NoMatch`] when a
/// definite path selects nothing.
pub fn project(value: &Value, expression: &str) -> Result<Value, ProjectionError> {
    let expression = expression.trim();
    if expression.starts_with('/') {
        return value.pointer(expression).cloned().ok_or(ProjectionError::NoMatch);
    }

    let segments = parse(expression)?;
    let definite = !segments.contains(&Segment::Wildcard);
    let mut current = vec![value];
    for segment in &segments {
        current = current
            .into_iter()
            .flat_map(|v| select(v, segment))
            .collect();
    }

    if definite {
        current.first().map(|v| (*v).clone()).ok_or(ProjectionError::NoMatch)
    } else {
        Ok(Value::Array(current.into_iter().cloned().collect()))
    }
}

/// Like [`project`], but failures become a small explanatory object so the caller still gets
/// an answer: `{"projectionWarning"|"projectionError": ..., "projection": expression}`.
#[must_use]
pub fn project_or_report(value: &Value, expression: &str) -> Value {
    match project(value, expression) {
        Ok(v) => v,
        Err(ProjectionError::NoMatch) => json!({
            "projectionWarning": ProjectionError::NoMatch.to_string(),
            "projection": expression,
        }),
        Err(e) => json!({
            "projectionError": e.to_string(),
            "projection": expression,
        }),
    }
}

fn select<'a>(value: &'a Value, segment: &Segment) -> Vec<&'a Value> {
    match (segment, value) {
        (Segment::Key(key), Value::Object(map)) => map.get(key).into_iter().collect(),
        (Segment::Index(index), Value::Array(items)) => {
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let index = if *index < 0 { len + index } else { *index };
            usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i))
                .into_iter()
                .collect()
        }
        (Segment::Wildcard, Value::Object(map)) => map.values().collect(),
        (Segment::Wildcard, Value::Array(items)) => items.iter().collect(),
        _ => Vec::new(),
    }
}

fn parse(expression: &str) -> Result<Vec<Segment>, ProjectionError> {
    let syntax = |msg: String| ProjectionError::Syntax(msg);
    let rest = expression
        .strip_prefix('$')
        .ok_or_else(|| syntax(format!("'{expression}' must start with '$' or '/'")))?;

    let mut segments = Vec::new();
    let mut i = 0;
    while i < rest.len() {
        let tail = &rest[i..];
        if let Some(after_dot) = tail.strip_prefix('.') {
            if after_dot.starts_with('.') {
                return Err(syntax("recursive descent '..' is not supported".to_string()));
            }
            let len = after_dot.find(['.', '[']).unwrap_or(after_dot.len());
            let name = &after_dot[..len];
            if name.is_empty() {
                return Err(syntax(format!("empty member name in '{expression}'")));
            }
            segments.push(if name == "*" {
                Segment::Wildcard
            } else {
                Segment::Key(name.to_string())
            });
            i += 1 + len;
        } else if let Some(after_bracket) = tail.strip_prefix('[') {
            let (segment, consumed) = parse_bracket(after_bracket)
                .ok_or_else(|| syntax(format!("malformed bracket in '{expression}'")))?;
            segments.push(segment);
            i += 1 + consumed;
        } else {
            return Err(syntax(format!(
                "unexpected '{}' in '{expression}'",
                tail.chars().next().unwrap_or_default()
            )));
        }
    }
    Ok(segments)
}

/// Parse the inside of `[...]`; returns the segment and the bytes consumed including `]`.
fn parse_bracket(s: &str) -> Option<(Segment, usize)> {
    if let Some(quote) = s.chars().next().filter(|c| matches!(c, '\'' | '"')) {
        let close = s[1..].find(&format!("{quote}]"))? + 1;
        return Some((Segment::Key(s[1..close].to_string()), close + 2));
    }
    let close = s.find(']')?;
    let inner = s[..close].trim();
    let segment = if inner == "*" {
        Segment::Wildcard
    } else {
        Segment::Index(inner.parse().ok()?)
    };
    Some((segment, close + 1))
}
