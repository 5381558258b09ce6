//! Redaction of secrets in URLs, transport errors and headers before they reach logs or tool
//! results.

use url::Url;

/// Header names whose values are never logged.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "api-key",
];

const REDACTED: &str = "***REDACTED***";

#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    // Best-effort: drop credentials + query + fragment.
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

/// Like [`redact_url`] for a string; unparseable input is returned without its query part.
#[must_use]
pub fn redact_url_str(url: &str) -> String {
    match Url::parse(url) {
        Ok(u) => redact_url(&u),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    }
}

/// Render a transport error with any URL it carries redacted.
#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    msg
}

#[must_use]
pub fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
        || name.to_ascii_lowercase().contains("token")
        || name.to_ascii_lowercase().contains("secret")
}

/// Copy headers for logging, masking sensitive values.
#[must_use]
pub fn redact_headers<'a, I>(headers: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .map(|(k, v)| {
            let v = if is_sensitive_header(k) { REDACTED } else { v };
            (k.to_string(), v.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_url_drops_credentials_and_query() {
        let url = Url::parse("https://user:pw@api.example.com/v1/pets?api_key=s3cret#frag")
            .expect("url");
        assert_eq!(redact_url(&url), "https://api.example.com/v1/pets");
    }

    #[test]
    fn redact_url_str_handles_unparseable_input() {
        assert_eq!(redact_url_str("/relative?token=x"), "/relative");
        assert_eq!(
            redact_url_str("http://localhost:8080/a?b=c"),
            "http://localhost:8080/a"
        );
    }

    #[test]
    fn sensitive_headers_are_masked() {
        let out = redact_headers([
            ("Authorization", "Bearer abc"),
            ("X-Request-Id", "r1"),
            ("X-Auth-Token", "t"),
        ]);
        assert_eq!(out[0].1, REDACTED);
        assert_eq!(out[1].1, "r1");
        assert_eq!(out[2].1, REDACTED);
    }

    #[tokio::test]
    async fn sanitized_transport_errors_hide_query_strings() {
        let client = reqwest::Client::new();
        let err = client
            .get("http://127.0.0.1:1/never?api_key=s3cret")
            .send()
            .await
            .expect_err("port 1 refuses connections");
        let msg = sanitize_reqwest_error(&err);
        assert!(!msg.contains("s3cret"), "{msg}");
    }
}
