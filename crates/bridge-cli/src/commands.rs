//! Subcommand bodies. Output goes to the given writer; logs go to stderr.

use anyhow::Context as _;
use mcpbridge_http_tools::safety::{redact_headers, redact_url};
use mcpbridge_openapi_tools::{InvocationContext, OpenApiDocument, ToolBridge};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::RawContent;
use serde_json::{Value, json};
use std::io::Write;
use std::process::ExitCode;

pub fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected 'Name: value', got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("expected 'Name: value', got '{s}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

pub fn parse_arguments(text: &str) -> anyhow::Result<Value> {
    let value: Value = serde_json::from_str(text).context("--args is not valid JSON")?;
    anyhow::ensure!(value.is_object(), "--args must be a JSON object");
    Ok(value)
}

pub fn context_from_headers(headers: &[(String, String)]) -> anyhow::Result<InvocationContext> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name '{name}'"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header '{name}'"))?;
        map.append(name, value);
    }
    Ok(InvocationContext::from_headers(map))
}

pub fn list(bridge: &ToolBridge, as_json: bool, out: &mut impl Write) -> anyhow::Result<ExitCode> {
    let tools = bridge.list_tools();
    if as_json {
        serde_json::to_writer_pretty(&mut *out, &tools)?;
        writeln!(out)?;
        return Ok(ExitCode::SUCCESS);
    }
    for tool in &tools {
        let description = tool.description.as_deref().unwrap_or_default();
        let first_line = description.lines().next().unwrap_or_default();
        writeln!(out, "{}\t{first_line}", tool.name)?;
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn call(
    bridge: &ToolBridge,
    tool: &str,
    arguments: Value,
    ctx: &InvocationContext,
    out: &mut impl Write,
) -> anyhow::Result<ExitCode> {
    let result = bridge.call_tool(tool, arguments, ctx).await;
    if let Some(structured) = &result.structured_content {
        serde_json::to_writer_pretty(&mut *out, structured)?;
        writeln!(out)?;
    } else {
        for content in &result.content {
            match &content.raw {
                RawContent::Text(t) => writeln!(out, "{}", t.text)?,
                RawContent::Image(i) => {
                    writeln!(out, "<image {} ({} base64 chars)>", i.mime_type, i.data.len())?;
                }
                _ => {}
            }
        }
    }
    Ok(if result.is_error == Some(true) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

pub fn dry_run(
    bridge: &ToolBridge,
    tool: &str,
    arguments: &Value,
    ctx: &InvocationContext,
    out: &mut impl Write,
) -> anyhow::Result<ExitCode> {
    let request = match bridge.build_request(tool, arguments, ctx) {
        Ok(r) => r,
        Err(e) => {
            serde_json::to_writer_pretty(&mut *out, &e.to_structured())?;
            writeln!(out)?;
            return Ok(ExitCode::FAILURE);
        }
    };

    let headers: serde_json::Map<String, Value> = redact_headers(
        request
            .headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str(), v))),
    )
    .into_iter()
    .map(|(k, v)| (k, Value::String(v)))
    .collect();
    let body = request
        .body
        .as_ref()
        .map(|b| String::from_utf8_lossy(&b.bytes).into_owned());

    let printed = json!({
        "method": request.method.as_str(),
        "url": redact_url(&request.url),
        "headers": headers,
        "body": body,
        "timeoutSecs": request.timeout.as_secs(),
    });
    serde_json::to_writer_pretty(&mut *out, &printed)?;
    writeln!(out)?;
    Ok(ExitCode::SUCCESS)
}

pub fn check(
    bridge: &ToolBridge,
    document: &OpenApiDocument,
    strict: bool,
    out: &mut impl Write,
) -> anyhow::Result<ExitCode> {
    let registry = bridge.registry();
    writeln!(
        out,
        "document: {} {}",
        document.title(),
        document.version()
    )?;
    writeln!(out, "fingerprint: {}", document.fingerprint())?;
    writeln!(out, "tools: {}", registry.len())?;
    writeln!(out, "contract: {}", registry.contract_hash())?;
    writeln!(out, "skipped: {}", registry.skipped().len())?;
    for skipped in registry.skipped() {
        let id = skipped
            .operation_id
            .as_deref()
            .map(|id| format!(" ({id})"))
            .unwrap_or_default();
        writeln!(
            out,
            "  {} {}{id}: {}",
            skipped.method, skipped.path, skipped.reason
        )?;
    }

    Ok(if strict && !registry.skipped().is_empty() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
