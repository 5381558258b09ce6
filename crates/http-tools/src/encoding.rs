//! Request encoding helpers: path segment substitution, `OpenAPI` query serialization styles,
//! and form bodies.

use openapiv3::QueryStyle;
use serde_json::{Map, Value};

/// How one query parameter is serialized (`OpenAPI` `style` / `explode` / `allowReserved` /
/// `allowEmptyValue`).
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySerialization {
    pub style: QueryStyle,
    pub explode: bool,
    pub allow_reserved: bool,
    pub allow_empty_value: bool,
}

impl QuerySerialization {
    /// Build settings from the document's values. A missing `explode` takes the style default
    /// (`true` for `form` and `deepObject`).
    #[must_use]
    pub fn new(
        style: QueryStyle,
        explode: Option<bool>,
        allow_reserved: bool,
        allow_empty_value: bool,
    ) -> Self {
        let explode = explode.unwrap_or_else(|| default_query_explode(&style));
        Self {
            style,
            explode,
            allow_reserved,
            allow_empty_value,
        }
    }
}

impl Default for QuerySerialization {
    fn default() -> Self {
        Self::new(QueryStyle::Form, None, false, false)
    }
}

/// One `key=value` pair of a query string, before percent-encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPair {
    pub key: String,
    pub value: String,
    pub allow_reserved: bool,
}

impl QueryPair {
    fn new(key: impl Into<String>, value: impl Into<String>, allow_reserved: bool) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            allow_reserved,
        }
    }
}

#[must_use]
pub fn default_query_explode(style: &QueryStyle) -> bool {
    matches!(style, QueryStyle::Form | QueryStyle::DeepObject)
}

/// Serialize one query parameter value into zero or more pairs.
///
/// Empty values (`null`, `""`, `[]`, `{}`) are only sent when the parameter is required or
/// declares `allowEmptyValue`.
#[must_use]
pub fn serialize_query_param(
    name: &str,
    value: &Value,
    required: bool,
    ser: &QuerySerialization,
) -> Vec<QueryPair> {
    let allow_reserved = ser.allow_reserved;

    if query_value_is_empty(value) {
        if ser.allow_empty_value || required {
            return vec![QueryPair::new(name, "", allow_reserved)];
        }
        return Vec::new();
    }

    match value {
        Value::Array(arr) => serialize_query_array(name, arr, ser),
        Value::Object(map) => serialize_query_object(name, map, ser),
        _ => vec![QueryPair::new(name, value_to_string(value), allow_reserved)],
    }
}

fn query_value_is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

fn serialize_query_array(name: &str, arr: &[Value], ser: &QuerySerialization) -> Vec<QueryPair> {
    let items: Vec<String> = arr.iter().map(value_to_string).collect();
    let joined = |sep: &str| vec![QueryPair::new(name, items.join(sep), ser.allow_reserved)];
    match ser.style {
        QueryStyle::Form if ser.explode => items
            .iter()
            .map(|v| QueryPair::new(name, v.as_str(), ser.allow_reserved))
            .collect(),
        QueryStyle::SpaceDelimited => joined(" "),
        QueryStyle::PipeDelimited => joined("|"),
        // deepObject is undefined for arrays; fall back to the non-exploded form encoding.
        QueryStyle::Form | QueryStyle::DeepObject => joined(","),
    }
}

fn serialize_query_object(
    name: &str,
    map: &Map<String, Value>,
    ser: &QuerySerialization,
) -> Vec<QueryPair> {
    let allow_reserved = ser.allow_reserved;
    match ser.style {
        QueryStyle::DeepObject => map
            .iter()
            .map(|(k, v)| QueryPair::new(format!("{name}[{k}]"), value_to_string(v), allow_reserved))
            .collect(),
        QueryStyle::Form if ser.explode => map
            .iter()
            .map(|(k, v)| QueryPair::new(k.as_str(), value_to_string(v), allow_reserved))
            .collect(),
        QueryStyle::Form => vec![QueryPair::new(
            name,
            flatten_object(map).join(","),
            allow_reserved,
        )],
        QueryStyle::SpaceDelimited => vec![QueryPair::new(
            name,
            flatten_object(map).join(" "),
            allow_reserved,
        )],
        QueryStyle::PipeDelimited => vec![QueryPair::new(
            name,
            flatten_object(map).join("|"),
            allow_reserved,
        )],
    }
}

fn flatten_object(map: &Map<String, Value>) -> Vec<String> {
    let mut parts = Vec::with_capacity(map.len() * 2);
    for (k, v) in map {
        parts.push(k.clone());
        parts.push(value_to_string(v));
    }
    parts
}

/// Join pairs into a percent-encoded query string (without the leading `?`).
#[must_use]
pub fn build_query_string(pairs: &[QueryPair]) -> String {
    let mut query = String::new();
    for (i, p) in pairs.iter().enumerate() {
        if i > 0 {
            query.push('&');
        }
        query.push_str(&encode_query_component(&p.key, false));
        query.push('=');
        query.push_str(&encode_query_component(&p.value, p.allow_reserved));
    }
    query
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn percent_encode_with(s: &str, keep: impl Fn(u8) -> bool) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if keep(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

/// Percent-encode a query key or value.
///
/// With `allow_reserved`, RFC 3986 reserved characters are kept except `&`, `=` and `#`, which
/// would break the pair structure.
#[must_use]
pub fn encode_query_component(s: &str, allow_reserved: bool) -> String {
    percent_encode_with(s, |b| {
        is_unreserved(b) || (allow_reserved && is_reserved_but_safe_in_pairs(b))
    })
}

/// Percent-encode a value substituted into a single path segment. `/`, `?` and `#` are always
/// encoded.
#[must_use]
pub fn encode_path_segment(s: &str) -> String {
    percent_encode_with(s, |b| is_unreserved(b) || is_segment_sub_delim(b))
}

fn is_unreserved(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~')
}

fn is_reserved_but_safe_in_pairs(b: u8) -> bool {
    matches!(
        b,
        b':' | b'/'
            | b'?'
            | b'['
            | b']'
            | b'@'
            | b'!'
            | b'$'
            | b'\''
            | b'('
            | b')'
            | b'*'
            | b'+'
            | b','
            | b';'
    )
}

fn is_segment_sub_delim(b: u8) -> bool {
    matches!(
        b,
        b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'=' | b':' | b'@'
    )
}

/// String form of a path parameter (`simple` style): scalars verbatim, arrays comma-joined,
/// objects as `k,v,k,v`.
#[must_use]
pub fn path_param_to_string(value: &Value) -> String {
    match value {
        Value::Array(arr) => arr
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(map) => flatten_object(map).join(","),
        other => value_to_string(other),
    }
}

/// Render a JSON value as a plain string: strings unquoted, `null` empty, containers as JSON.
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

/// Encode a JSON object as an `application/x-www-form-urlencoded` body. Array members repeat
/// their key; `null` members are omitted.
///
/// Returns `None` when `value` is not an object.
#[must_use]
pub fn form_urlencode(value: &Value) -> Option<String> {
    let map = value.as_object()?;
    let mut ser = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in map {
        match v {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    ser.append_pair(k, &value_to_string(item));
                }
            }
            other => {
                ser.append_pair(k, &value_to_string(other));
            }
        }
    }
    Some(ser.finish())
}
