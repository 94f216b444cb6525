//! Request forwarding against a discovered IDE endpoint.
//!
//! `fetch_tools_list` surfaces failures to its caller as typed errors;
//! `forward_tool_call` never fails — every failure becomes an error-flagged
//! result, because the client expects a result envelope for tool invocations,
//! not a transport exception.

use std::time::Duration;

use rust_mcp_sdk::schema::{CallToolResult, TextContent, Tool};
use serde_json::Value as JsonValue;

use super::endpoint::IdeEndpoint;
use super::error::ForwardError;
use super::protocol::{RpcRequest, RpcResponse};

/// Fetch the IDE's tool list.
///
/// Runs with its own timeout, longer than the discovery probe's: this is a
/// user-facing operation, not a liveness check.
pub async fn fetch_tools_list(
    http: &reqwest::Client,
    endpoint: &IdeEndpoint,
    timeout: Duration,
) -> Result<Vec<Tool>, ForwardError> {
    tracing::debug!("fetching tools list from {endpoint}");
    let response = http
        .post(endpoint.url())
        .timeout(timeout)
        .json(&RpcRequest::list_tools())
        .send()
        .await
        .map_err(|e| ForwardError::Http {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(ForwardError::Http {
            endpoint: endpoint.to_string(),
            reason: format!("status {status}"),
        });
    }
    let body = response.text().await.map_err(|e| ForwardError::Http {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    let envelope: RpcResponse =
        serde_json::from_str(&body).map_err(|e| ForwardError::InvalidResponse {
            reason: e.to_string(),
        })?;
    if let Some(error) = envelope.error {
        if let Some(data) = &error.data {
            tracing::debug!("IDE error data: {data}");
        }
        return Err(ForwardError::Ide {
            code: error.code,
            message: error.message,
        });
    }
    let Some(result) = envelope.result else {
        return Err(ForwardError::MalformedResult {
            reason: "envelope carries neither result nor error".to_string(),
        });
    };
    let Some(tools_value) = result.get("tools").cloned() else {
        return Err(ForwardError::MalformedResult {
            reason: "result carries no tools array".to_string(),
        });
    };
    let tools: Vec<Tool> =
        serde_json::from_value(tools_value).map_err(|e| ForwardError::MalformedResult {
            reason: e.to_string(),
        })?;
    tracing::info!("IDE returned {} tool(s)", tools.len());
    Ok(tools)
}

/// Forward a tool invocation to the IDE.
///
/// Uses the longest timeout of the three forwarded operations, since the
/// invocation may run arbitrary IDE-side work. Always returns a well-formed
/// result; failures come back with `is_error` set and a readable message.
pub async fn forward_tool_call(
    http: &reqwest::Client,
    name: &str,
    arguments: JsonValue,
    endpoint: &IdeEndpoint,
    timeout: Duration,
) -> CallToolResult {
    tracing::debug!("forwarding tool call '{name}' to {endpoint}");
    match try_tool_call(http, name, arguments, endpoint, timeout).await {
        Ok(result) => result,
        Err(message) => {
            tracing::warn!("tool call '{name}' failed: {message}");
            error_result(message)
        }
    }
}

async fn try_tool_call(
    http: &reqwest::Client,
    name: &str,
    arguments: JsonValue,
    endpoint: &IdeEndpoint,
    timeout: Duration,
) -> Result<CallToolResult, String> {
    let response = http
        .post(endpoint.url())
        .timeout(timeout)
        .json(&RpcRequest::call_tool(name, arguments))
        .send()
        .await
        .map_err(|e| format!("request to the IDE failed: {e}"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("IDE answered with status {status}"));
    }
    let body = response
        .text()
        .await
        .map_err(|e| format!("failed reading the IDE response: {e}"))?;
    let envelope: RpcResponse = serde_json::from_str(&body)
        .map_err(|e| format!("IDE response was not valid JSON-RPC: {e}"))?;
    if let Some(error) = envelope.error {
        if let Some(data) = &error.data {
            tracing::debug!("IDE error data: {data}");
        }
        return Err(format!(
            "IDE reported an error (code {}): {}",
            error.code, error.message
        ));
    }
    // String results pass through verbatim; anything else is rendered as JSON
    // text. An absent or null result is a failure, not an empty success.
    let text = match envelope.result {
        None | Some(JsonValue::Null) => return Err("IDE returned an empty result".to_string()),
        Some(JsonValue::String(s)) => s,
        Some(other) => other.to_string(),
    };
    tracing::info!("tool call '{name}' completed");
    let mut result = CallToolResult::text_content(vec![TextContent::from(text)]);
    result.is_error = Some(false);
    Ok(result)
}

fn error_result(message: String) -> CallToolResult {
    let mut result = CallToolResult::text_content(vec![TextContent::from(message)]);
    result.is_error = Some(true);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ide::testutil::{StubResponse, spawn_stub};

    fn client() -> reqwest::Client {
        reqwest::Client::new()
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn as_json(result: &CallToolResult) -> JsonValue {
        serde_json::to_value(result).expect("serialize result")
    }

    fn first_text(value: &JsonValue) -> &str {
        value["content"][0]["text"].as_str().expect("text content")
    }

    #[tokio::test]
    async fn lists_tools_from_valid_envelope() {
        let body = r#"{"jsonrpc":"2.0","id":"1","result":{"tools":[
            {"name":"open_file","description":"Open a file","inputSchema":{"type":"object"}}
        ]}}"#;
        let stub = spawn_stub(vec![StubResponse::ok(body)]).await;
        let ep = IdeEndpoint::new("127.0.0.1", stub.port);
        let tools = fetch_tools_list(&client(), &ep, TIMEOUT).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "open_file");
    }

    #[tokio::test]
    async fn lists_zero_tools() {
        let body = r#"{"jsonrpc":"2.0","id":"1","result":{"tools":[]}}"#;
        let stub = spawn_stub(vec![StubResponse::ok(body)]).await;
        let ep = IdeEndpoint::new("127.0.0.1", stub.port);
        let tools = fetch_tools_list(&client(), &ep, TIMEOUT).await.unwrap();
        assert!(tools.is_empty());
    }

    #[tokio::test]
    async fn list_maps_http_failure() {
        let stub = spawn_stub(vec![StubResponse::status(500)]).await;
        let ep = IdeEndpoint::new("127.0.0.1", stub.port);
        let err = fetch_tools_list(&client(), &ep, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ForwardError::Http { .. }));
    }

    #[tokio::test]
    async fn list_maps_non_json_body() {
        let stub = spawn_stub(vec![StubResponse::ok("<html>busy</html>")]).await;
        let ep = IdeEndpoint::new("127.0.0.1", stub.port);
        let err = fetch_tools_list(&client(), &ep, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ForwardError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn list_maps_ide_error_object() {
        let body = r#"{"jsonrpc":"2.0","id":"1","error":{"code":-32000,"message":"indexing"}}"#;
        let stub = spawn_stub(vec![StubResponse::ok(body)]).await;
        let ep = IdeEndpoint::new("127.0.0.1", stub.port);
        let err = fetch_tools_list(&client(), &ep, TIMEOUT).await.unwrap_err();
        match err {
            ForwardError::Ide { code, message } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "indexing");
            }
            other => panic!("expected Ide error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_maps_result_without_tools() {
        let body = r#"{"jsonrpc":"2.0","id":"1","result":{"status":"ok"}}"#;
        let stub = spawn_stub(vec![StubResponse::ok(body)]).await;
        let ep = IdeEndpoint::new("127.0.0.1", stub.port);
        let err = fetch_tools_list(&client(), &ep, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ForwardError::MalformedResult { .. }));
    }

    #[tokio::test]
    async fn call_passes_string_result_through() {
        let body = r#"{"jsonrpc":"2.0","id":"1","result":"file opened"}"#;
        let stub = spawn_stub(vec![StubResponse::ok(body)]).await;
        let ep = IdeEndpoint::new("127.0.0.1", stub.port);
        let result =
            forward_tool_call(&client(), "open_file", serde_json::json!({}), &ep, TIMEOUT).await;
        let json = as_json(&result);
        assert_eq!(json["isError"], false);
        assert_eq!(first_text(&json), "file opened");
    }

    #[tokio::test]
    async fn call_renders_object_result_as_json_text() {
        let body = r#"{"jsonrpc":"2.0","id":"1","result":{"status":"done"}}"#;
        let stub = spawn_stub(vec![StubResponse::ok(body)]).await;
        let ep = IdeEndpoint::new("127.0.0.1", stub.port);
        let result =
            forward_tool_call(&client(), "reformat", serde_json::json!({}), &ep, TIMEOUT).await;
        let json = as_json(&result);
        assert_eq!(json["isError"], false);
        assert!(first_text(&json).contains("done"));
    }

    // Tool invocation must always come back as a result envelope: HTTP 500,
    // a non-JSON body, and a provider error object all map to an error-flagged
    // result with a non-empty message instead of a raised error.
    #[tokio::test]
    async fn call_never_fails_on_bad_provider_behavior() {
        let cases = vec![
            StubResponse::status(500),
            StubResponse::ok("not json at all"),
            StubResponse::ok(r#"{"jsonrpc":"2.0","id":"1","error":{"message":"boom","code":-1}}"#),
        ];
        for case in cases {
            let stub = spawn_stub(vec![case]).await;
            let ep = IdeEndpoint::new("127.0.0.1", stub.port);
            let result =
                forward_tool_call(&client(), "open_file", serde_json::json!({}), &ep, TIMEOUT)
                    .await;
            let json = as_json(&result);
            assert_eq!(json["isError"], true);
            assert!(!first_text(&json).is_empty());
        }
    }

    #[tokio::test]
    async fn call_flags_empty_result_as_error() {
        let body = r#"{"jsonrpc":"2.0","id":"1","result":null}"#;
        let stub = spawn_stub(vec![StubResponse::ok(body)]).await;
        let ep = IdeEndpoint::new("127.0.0.1", stub.port);
        let result =
            forward_tool_call(&client(), "open_file", serde_json::json!({}), &ep, TIMEOUT).await;
        let json = as_json(&result);
        assert_eq!(json["isError"], true);
        assert!(first_text(&json).contains("empty"));
    }

    #[tokio::test]
    async fn call_flags_unreachable_endpoint_as_error() {
        let ep = IdeEndpoint::new("127.0.0.1", crate::ide::testutil::free_port().await);
        let result =
            forward_tool_call(&client(), "open_file", serde_json::json!({}), &ep, TIMEOUT).await;
        let json = as_json(&result);
        assert_eq!(json["isError"], true);
        assert!(!first_text(&json).is_empty());
    }
}
