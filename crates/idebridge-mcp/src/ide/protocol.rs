//! JSON-RPC 2.0 envelope types for the IDE plugin protocol.
//!
//! The IDE plugin serves `tools/list` and `tools/call` over plain HTTP POST
//! with JSON-RPC bodies; responses carry either `result` or `error`. Unknown
//! envelope fields are ignored on the way in.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// JSON-RPC request message sent to the IDE plugin.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
}

impl RpcRequest {
    fn new(id: impl Into<String>, method: &str, params: Option<JsonValue>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }

    /// The liveness request sent by discovery probes. Uses a fixed id so probe
    /// traffic is recognizable in IDE-side logs.
    pub fn discovery_probe() -> Self {
        Self::new("discovery-check", "tools/list", None)
    }

    /// A client-facing `tools/list` request.
    pub fn list_tools() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), "tools/list", None)
    }

    /// A `tools/call` invocation with a unique id.
    pub fn call_tool(name: &str, arguments: JsonValue) -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "tools/call",
            Some(serde_json::json!({ "name": name, "arguments": arguments })),
        )
    }
}

/// JSON-RPC response envelope (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    pub result: Option<JsonValue>,
    pub error: Option<RpcErrorObject>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<JsonValue>,
}
