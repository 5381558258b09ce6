//! `OpenAPI` `$ref` resolver.
//!
//! The `openapiv3` crate models `$ref`s using `ReferenceOr<T>` but does not resolve them. This
//! resolver works on the raw document value and handles document-internal references (`#/...`)
//! only; external references are reported as [`SchemaResolutionError::UnsupportedReference`].
//!
//! Schemas are fully inlined into self-contained JSON Schema trees:
//! - a `$ref` already on the current resolution path (a cycle) becomes a placeholder schema
//! - nesting deeper than `max_depth` becomes a placeholder schema
//! - acyclic references are resolved once and memoized
//! - `OpenAPI`-only keywords are rewritten to JSON Schema (`nullable`, `example`, boolean
//!   exclusive bounds) or dropped
//! - `allOf` / `oneOf` / `anyOf` over plain object schemas are merged into one object schema
//!
//! Non-schema components (parameters, request bodies, responses, path items) are followed
//! through `$ref` chains with [`SchemaResolver::resolve_component`]; a cycle there is an error.

use crate::error::SchemaResolutionError;
use openapiv3::ReferenceOr;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};

/// Keywords whose value is a single subschema.
const SUBSCHEMA_KEYS: &[&str] = &["items", "not", "additionalProperties"];
/// Keywords whose value is a map of subschemas.
const SUBSCHEMA_MAP_KEYS: &[&str] = &["properties", "patternProperties"];
/// Keywords whose value is a list of subschemas.
const COMPOSITION_KEYS: &[&str] = &["allOf", "oneOf", "anyOf"];
/// `OpenAPI` keywords with no JSON Schema counterpart.
const DROPPED_KEYS: &[&str] = &["discriminator", "xml", "externalDocs", "nullable", "example"];

type ResolveResult<T> = std::result::Result<T, SchemaResolutionError>;

/// Build the opaque schema substituted where resolution stops.
///
/// It has no `type`, so it accepts any value.
#[must_use]
pub fn placeholder_schema(description: impl Into<String>) -> Value {
    json!({ "description": description.into() })
}

/// True when `schema` is a placeholder produced by the resolver.
#[must_use]
pub fn is_placeholder(schema: &Value) -> bool {
    schema.as_object().is_some_and(is_placeholder_map)
}

const PLACEHOLDER_PREFIX: &str = "Unresolved schema";

#[derive(Debug)]
pub struct SchemaResolver<'a> {
    doc: &'a Value,
    max_depth: usize,
    /// Resolved acyclic references, with the nesting height of the resolved tree.
    memo: HashMap<String, (Value, usize)>,
    /// References on the current resolution path.
    in_progress: HashSet<String>,
    /// Number of placeholders emitted so far. A reference is only memoized when resolving it
    /// emitted none, since cycle and depth cut-offs depend on the path it was reached from.
    cutoffs: usize,
}

impl<'a> SchemaResolver<'a> {
    #[must_use]
    pub fn new(doc: &'a Value, max_depth: usize) -> Self {
        Self {
            doc,
            max_depth,
            memo: HashMap::new(),
            in_progress: HashSet::new(),
            cutoffs: 0,
        }
    }

    /// Resolve a raw schema node into a self-contained schema with no `$ref`.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference is external or points at nothing.
    pub fn resolve_schema(&mut self, schema: &Value) -> ResolveResult<Value> {
        self.resolve_node(schema, 0)
    }

    /// Resolve a schema held as an `openapiv3` value.
    ///
    /// # Errors
    ///
    /// Same as [`SchemaResolver::resolve_schema`].
    pub fn resolve_openapi_schema(
        &mut self,
        schema: &ReferenceOr<openapiv3::Schema>,
    ) -> ResolveResult<Value> {
        let raw = serde_json::to_value(schema).map_err(|e| SchemaResolutionError::TypeMismatch {
            reference: "#".to_string(),
            expected: "schema",
            message: e.to_string(),
        })?;
        self.resolve_schema(&raw)
    }

    /// Follow a `$ref` chain for a non-schema component.
    ///
    /// # Errors
    ///
    /// Returns an error for external, dangling or cyclic references, or if the target does not
    /// deserialize as `T`.
    pub fn resolve_component<T>(
        &self,
        component: &ReferenceOr<T>,
        expected: &'static str,
    ) -> ResolveResult<T>
    where
        T: Clone + DeserializeOwned,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut cur: ReferenceOr<T> = component.clone();

        loop {
            match cur {
                ReferenceOr::Item(item) => return Ok(item),
                ReferenceOr::Reference { reference } => {
                    if !seen.insert(reference.clone()) {
                        return Err(SchemaResolutionError::Cycle { reference });
                    }
                    let value = self.lookup(&reference)?;
                    cur = serde_json::from_value(value.clone()).map_err(|e| {
                        SchemaResolutionError::TypeMismatch {
                            reference: reference.clone(),
                            expected,
                            message: e.to_string(),
                        }
                    })?;
                }
            }
        }
    }

    fn lookup(&self, reference: &str) -> ResolveResult<&'a Value> {
        let Some(pointer) = reference.strip_prefix('#') else {
            return Err(SchemaResolutionError::UnsupportedReference {
                reference: reference.to_string(),
            });
        };
        if !pointer.starts_with('/') {
            return Err(SchemaResolutionError::UnsupportedReference {
                reference: reference.to_string(),
            });
        }
        self.doc
            .pointer(pointer)
            .ok_or_else(|| SchemaResolutionError::MissingTarget {
                reference: reference.to_string(),
            })
    }

    fn cutoff(&mut self, description: String) -> Value {
        self.cutoffs += 1;
        placeholder_schema(description)
    }

    fn resolve_node(&mut self, node: &Value, depth: usize) -> ResolveResult<Value> {
        if depth > self.max_depth {
            return Ok(self.cutoff(format!(
                "{PLACEHOLDER_PREFIX}: nested deeper than {} levels; any value is accepted",
                self.max_depth
            )));
        }

        let Value::Object(map) = node else {
            // Boolean schemas and malformed nodes pass through unchanged.
            return Ok(node.clone());
        };

        if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
            let mut resolved = self.resolve_ref(reference, depth)?;
            // Sibling `description` next to a `$ref` refines the target's.
            if let (Some(desc), Some(obj)) = (map.get("description"), resolved.as_object_mut())
                && !is_placeholder_map(obj)
            {
                obj.insert("description".to_string(), desc.clone());
            }
            return Ok(resolved);
        }

        let mut out = Map::new();
        for (key, value) in map {
            let key_str = key.as_str();
            if DROPPED_KEYS.contains(&key_str) || key_str.starts_with("x-") {
                continue;
            }
            let resolved = if SUBSCHEMA_MAP_KEYS.contains(&key_str) {
                match value {
                    Value::Object(children) => {
                        let mut resolved_children = Map::new();
                        for (name, child) in children {
                            resolved_children
                                .insert(name.clone(), self.resolve_node(child, depth + 1)?);
                        }
                        Value::Object(resolved_children)
                    }
                    other => other.clone(),
                }
            } else if SUBSCHEMA_KEYS.contains(&key_str) {
                self.resolve_node(value, depth + 1)?
            } else if COMPOSITION_KEYS.contains(&key_str) {
                match value {
                    Value::Array(branches) => Value::Array(
                        branches
                            .iter()
                            .map(|b| self.resolve_node(b, depth + 1))
                            .collect::<ResolveResult<Vec<_>>>()?,
                    ),
                    other => other.clone(),
                }
            } else {
                value.clone()
            };
            out.insert(key.clone(), resolved);
        }

        if let Some(example) = map.get("example")
            && !out.contains_key("examples")
        {
            out.insert("examples".to_string(), Value::Array(vec![example.clone()]));
        }
        if map.get("nullable") == Some(&Value::Bool(true)) {
            make_nullable(&mut out);
        }
        rewrite_exclusive_bound(&mut out, "exclusiveMinimum", "minimum");
        rewrite_exclusive_bound(&mut out, "exclusiveMaximum", "maximum");

        Ok(self.merge_compositions(out))
    }

    fn resolve_ref(&mut self, reference: &str, depth: usize) -> ResolveResult<Value> {
        if self.in_progress.contains(reference) {
            return Ok(self.cutoff(format!(
                "{PLACEHOLDER_PREFIX}: recursive reference to '{reference}'; any value is accepted"
            )));
        }
        if let Some((value, height)) = self.memo.get(reference)
            && depth + height <= self.max_depth
        {
            return Ok(value.clone());
        }

        let target = self.lookup(reference)?;
        let before = self.cutoffs;
        self.in_progress.insert(reference.to_string());
        let resolved = self.resolve_node(target, depth);
        self.in_progress.remove(reference);
        let resolved = resolved?;

        if self.cutoffs == before {
            let height = schema_height(&resolved);
            self.memo
                .insert(reference.to_string(), (resolved.clone(), height));
        }
        Ok(resolved)
    }

    /// Merge `allOf` / `oneOf` / `anyOf` over plain object schemas into a single object schema.
    ///
    /// `allOf` unions properties and `required`; `oneOf` / `anyOf` union properties and keep
    /// only the names every branch requires. A single-branch composition is inlined with its
    /// sibling keywords merged in. Anything
    /// else (non-object branches, conflicting property definitions) becomes a placeholder.
    fn merge_compositions(&mut self, mut schema: Map<String, Value>) -> Value {
        for key in COMPOSITION_KEYS {
            let Some(Value::Array(branches)) = schema.remove(*key) else {
                continue;
            };

            if branches.len() == 1
                && let Some(Value::Object(only)) = branches.first()
            {
                schema = inline_single_branch(only.clone(), std::mem::take(&mut schema));
                continue;
            }

            if !branches.iter().all(is_plain_object_schema) {
                return self.cutoff(format!(
                    "{PLACEHOLDER_PREFIX}: '{key}' over non-object schemas; any value is accepted"
                ));
            }

            let mut properties: Map<String, Value> = schema
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let mut required: Vec<String> = string_list(schema.get("required"));
            let mut shared_required: Option<Vec<String>> = None;

            for branch in &branches {
                if let Some(props) = branch.get("properties").and_then(Value::as_object) {
                    for (name, prop) in props {
                        match properties.get(name) {
                            Some(existing) if existing != prop => {
                                return self.cutoff(format!(
                                    "{PLACEHOLDER_PREFIX}: conflicting definitions of property '{name}' in '{key}'; any value is accepted"
                                ));
                            }
                            Some(_) => {}
                            None => {
                                properties.insert(name.clone(), prop.clone());
                            }
                        }
                    }
                }
                let branch_required = string_list(branch.get("required"));
                if *key == "allOf" {
                    for r in branch_required {
                        if !required.contains(&r) {
                            required.push(r);
                        }
                    }
                } else {
                    shared_required = Some(match shared_required {
                        None => branch_required,
                        Some(acc) => acc
                            .into_iter()
                            .filter(|r| branch_required.contains(r))
                            .collect(),
                    });
                }
            }
            for r in shared_required.unwrap_or_default() {
                if !required.contains(&r) {
                    required.push(r);
                }
            }

            if schema.get("description").is_none()
                && let Some(desc) = branches.iter().find_map(|b| b.get("description"))
            {
                schema.insert("description".to_string(), desc.clone());
            }
            schema.insert("type".to_string(), json!("object"));
            schema.insert("properties".to_string(), Value::Object(properties));
            if required.is_empty() {
                schema.remove("required");
            } else {
                schema.insert("required".to_string(), json!(required));
            }
        }
        Value::Object(schema)
    }
}

/// Fold the keywords next to a one-element composition into that element. `properties` and
/// `required` are unioned (siblings win on a clash); other sibling keywords override.
fn inline_single_branch(
    mut branch: Map<String, Value>,
    siblings: Map<String, Value>,
) -> Map<String, Value> {
    for (key, value) in siblings {
        match (key.as_str(), value) {
            ("properties", Value::Object(extra)) => {
                if let Some(Value::Object(base)) = branch.get_mut("properties") {
                    base.extend(extra);
                } else {
                    branch.insert("properties".to_string(), Value::Object(extra));
                }
            }
            ("required", Value::Array(extra)) => {
                if let Some(Value::Array(base)) = branch.get_mut("required") {
                    for name in extra {
                        if !base.contains(&name) {
                            base.push(name);
                        }
                    }
                } else {
                    branch.insert("required".to_string(), Value::Array(extra));
                }
            }
            (other, value) => {
                branch.insert(other.to_string(), value);
            }
        }
    }
    branch
}

fn is_placeholder_map(map: &Map<String, Value>) -> bool {
    map.len() == 1
        && map
            .get("description")
            .and_then(Value::as_str)
            .is_some_and(|d| d.starts_with(PLACEHOLDER_PREFIX))
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    v.and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// An object schema with no composition of its own: `type` is absent or `object` and it
/// declares `properties` or `type: object`.
fn is_plain_object_schema(schema: &Value) -> bool {
    let Some(map) = schema.as_object() else {
        return false;
    };
    if COMPOSITION_KEYS.iter().any(|k| map.contains_key(*k)) || is_placeholder_map(map) {
        return false;
    }
    match map.get("type") {
        None => map.contains_key("properties"),
        Some(Value::String(t)) => t == "object",
        Some(_) => false,
    }
}

/// `OpenAPI` 3.0 boolean bounds (`exclusiveMinimum: true` next to `minimum`) become the
/// numeric JSON Schema form.
fn rewrite_exclusive_bound(schema: &mut Map<String, Value>, exclusive_key: &str, bound_key: &str) {
    let Some(Value::Bool(exclusive)) = schema.get(exclusive_key) else {
        return;
    };
    let exclusive = *exclusive;
    schema.remove(exclusive_key);
    if exclusive && let Some(bound) = schema.remove(bound_key) {
        schema.insert(exclusive_key.to_string(), bound);
    }
}

fn make_nullable(schema: &mut Map<String, Value>) {
    let widened = match schema.get("type") {
        Some(Value::String(t)) => Some(json!([t, "null"])),
        Some(Value::Array(types)) if !types.iter().any(|t| t == "null") => {
            let mut types = types.clone();
            types.push(json!("null"));
            Some(Value::Array(types))
        }
        _ => None,
    };
    if let Some(types) = widened {
        schema.insert("type".to_string(), types);
    }
    if let Some(Value::Array(values)) = schema.get_mut("enum")
        && !values.iter().any(Value::is_null)
    {
        values.push(Value::Null);
    }
}

/// Nesting height of a resolved schema, counted the way [`SchemaResolver`] counts depth.
fn schema_height(schema: &Value) -> usize {
    let Value::Object(map) = schema else {
        return 0;
    };
    let mut height = 0;
    for (key, value) in map {
        let key = key.as_str();
        let child = if SUBSCHEMA_MAP_KEYS.contains(&key) {
            value
                .as_object()
                .map(|m| m.values().map(schema_height).max().unwrap_or(0) + 1)
                .unwrap_or(0)
        } else if SUBSCHEMA_KEYS.contains(&key) {
            schema_height(value) + 1
        } else if COMPOSITION_KEYS.contains(&key) {
            value
                .as_array()
                .map(|a| a.iter().map(schema_height).max().unwrap_or(0) + 1)
                .unwrap_or(0)
        } else {
            0
        };
        height = height.max(child);
    }
    height
}

/// True when `value` contains a `$ref` key anywhere.
#[must_use]
pub fn contains_ref(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.contains_key("$ref") || map.values().any(contains_ref),
        Value::Array(arr) => arr.iter().any(contains_ref),
        _ => false,
    }
}
