#![allow(dead_code)]

use anyhow::Context as _;
use async_trait::async_trait;
use mcpbridge_openapi_tools::executor::{HttpExecutor, TransportError, UpstreamResponse};
use mcpbridge_openapi_tools::{BridgeConfig, HttpRequestDescriptor, OpenApiDocument, ToolBridge};
use serde_json::{Value, json};
use std::sync::Arc;

pub use mcpbridge_test_support::{MockUpstream, pick_unused_port};

/// Fails the test if any request reaches the network step.
pub struct PanickingExecutor;

#[async_trait]
impl HttpExecutor for PanickingExecutor {
    async fn execute(
        &self,
        request: HttpRequestDescriptor,
    ) -> Result<UpstreamResponse, TransportError> {
        panic!("executor must not be called, got {} {}", request.method, request.url);
    }
}

/// `GET /pets/{id}` plus `POST /pets` with a JSON body.
pub fn petstore() -> Value {
    json!({
        "openapi": "3.0.3",
        "info": {"title": "Petstore", "version": "1.0.0"},
        "paths": {
            "/pets/{id}": {
                "get": {
                    "summary": "Get a pet by id",
                    "parameters": [
                        {"name": "id", "in": "path", "required": true, "schema": {"type": "integer"}}
                    ],
                    "responses": {
                        "200": {
                            "description": "The pet",
                            "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Pet"}}}
                        },
                        "404": {"description": "No such pet"}
                    }
                }
            },
            "/pets": {
                "post": {
                    "summary": "Create a pet",
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": {
                                "schema": {"type": "object", "properties": {"name": {"type": "string"}}}
                            }
                        }
                    },
                    "responses": {"201": {"description": "Created"}}
                }
            }
        },
        "components": {
            "schemas": {
                "Pet": {"type": "object", "properties": {"name": {"type": "string"}}}
            }
        }
    })
}

pub fn config_for(base_url: &str) -> BridgeConfig {
    BridgeConfig {
        base_url: Some(base_url.to_string()),
        ..BridgeConfig::default()
    }
}

/// A reqwest-backed bridge for `document` against `base_url`.
pub fn bridge(document: Value, config: BridgeConfig) -> anyhow::Result<ToolBridge> {
    let doc = OpenApiDocument::from_value(document).context("parse document")?;
    ToolBridge::with_reqwest(&doc, config).context("build bridge")
}

pub fn offline_bridge(document: Value) -> anyhow::Result<ToolBridge> {
    let doc = OpenApiDocument::from_value(document).context("parse document")?;
    ToolBridge::new(
        &doc,
        config_for("http://unused.invalid"),
        Arc::new(PanickingExecutor),
    )
    .context("build bridge")
}
