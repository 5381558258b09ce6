//! The single network step of a tool call.

use crate::error::{OpenApiToolsError, Result};
use crate::invocation::HttpRequestDescriptor;
use async_trait::async_trait;
use mcpbridge_http_tools::safety::{redact_headers, redact_url, sanitize_reqwest_error};
use reqwest::header::HeaderMap;
use std::time::Duration;

/// Raw upstream answer, any status.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// The request never produced a complete response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// Already redacted.
    pub message: String,
    pub timed_out: bool,
    /// Set when the body outgrew this many bytes and was not read to the end.
    pub body_limit: Option<usize>,
}

impl TransportError {
    fn body_too_large(limit: usize) -> Self {
        Self {
            message: format!("response body exceeds {limit} bytes"),
            timed_out: false,
            body_limit: Some(limit),
        }
    }
}

/// Sends a built request. Implementations must not retry.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(
        &self,
        request: HttpRequestDescriptor,
    ) -> std::result::Result<UpstreamResponse, TransportError>;
}

/// [`HttpExecutor`] over a shared `reqwest` connection pool.
///
/// Bodies are read chunk by chunk and abandoned once they pass `max_body_bytes`.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl ReqwestExecutor {
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::Http`] if the client cannot be built.
    pub fn new(connect_timeout: Duration, max_body_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| OpenApiToolsError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, max_body_bytes))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, max_body_bytes: usize) -> Self {
        Self {
            client,
            max_body_bytes,
        }
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(
        &self,
        request: HttpRequestDescriptor,
    ) -> std::result::Result<UpstreamResponse, TransportError> {
        let transport = |e: reqwest::Error| TransportError {
            message: sanitize_reqwest_error(&e),
            timed_out: e.is_timeout(),
            body_limit: None,
        };

        tracing::debug!(
            method = %request.method,
            url = %redact_url(&request.url),
            headers = ?redact_headers(
                request
                    .headers
                    .iter()
                    .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str(), v)))
            ),
            "Sending upstream request"
        );

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .timeout(request.timeout);
        if let Some(body) = request.body {
            builder = builder.body(body.bytes);
        }

        let mut response = builder.send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();

        let limit = self.max_body_bytes;
        let declared_limit = u64::try_from(limit).unwrap_or(u64::MAX);
        if response.content_length().is_some_and(|len| len > declared_limit) {
            return Err(TransportError::body_too_large(limit));
        }
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            if body.len() + chunk.len() > limit {
                tracing::warn!(status, limit, "Upstream response body over the size limit");
                return Err(TransportError::body_too_large(limit));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
