//! Media type classification for request and response bodies.

use base64::Engine as _;
use mime::Mime;
use serde_json::{Value, json};

/// How a body of a given media type is encoded or decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// `application/json` and any `+json` suffix.
    Json,
    /// `application/x-www-form-urlencoded`.
    Form,
    /// `text/*`.
    Text,
    /// `image/*`.
    Image,
    Other,
}

impl MediaKind {
    /// Classify a `Content-Type` value. Parameters such as `charset` are ignored; unparseable
    /// values classify as [`MediaKind::Other`].
    #[must_use]
    pub fn classify(content_type: &str) -> Self {
        let Ok(m) = content_type.trim().parse::<Mime>() else {
            return Self::Other;
        };
        if m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON) {
            return Self::Json;
        }
        if m.type_() == mime::APPLICATION && m.subtype() == mime::WWW_FORM_URLENCODED {
            return Self::Form;
        }
        if m.type_() == mime::TEXT {
            return Self::Text;
        }
        if m.type_() == mime::IMAGE {
            return Self::Image;
        }
        Self::Other
    }
}

#[must_use]
pub fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| MediaKind::classify(ct) == MediaKind::Json)
}

#[must_use]
pub fn is_image_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| MediaKind::classify(ct) == MediaKind::Image)
}

/// The `type/subtype` part of a content type, lower-cased, without parameters.
#[must_use]
pub fn essence(content_type: &str) -> String {
    content_type
        .parse::<Mime>()
        .map_or_else(
            |_| {
                content_type
                    .split(';')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_ascii_lowercase()
            },
            |m| m.essence_str().to_ascii_lowercase(),
        )
}

/// Pick the request body media type to send when an operation declares several.
///
/// JSON wins, then form, then text; otherwise the first declared type.
#[must_use]
pub fn preferred_request_media_type<'a, I>(declared: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let declared: Vec<&str> = declared.into_iter().collect();
    for wanted in [MediaKind::Json, MediaKind::Form, MediaKind::Text] {
        if let Some(ct) = declared.iter().find(|ct| MediaKind::classify(ct) == wanted) {
            return Some(ct);
        }
    }
    declared.first().copied()
}

/// Render bytes as a JSON value: a string when they are UTF-8, otherwise a base64 envelope.
#[must_use]
pub fn bytes_to_text_or_base64_json(bytes: &[u8], content_type: Option<&str>) -> Value {
    if let Ok(s) = std::str::from_utf8(bytes) {
        Value::String(s.to_string())
    } else {
        json!({
            "encoding": "base64",
            "mimeType": content_type,
            "data": base64_encode(bytes),
        })
    }
}

#[must_use]
pub fn base64_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
