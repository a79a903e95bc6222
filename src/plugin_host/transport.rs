// JSON-RPC 2.0 message shapes and the transport seam plugin processes are
// reached through. The wire framing (newline-delimited JSON over stdio) is
// fixed at this layer; `PluginTransport` itself is transport-agnostic so a
// future non-stdio transport can implement the same trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HostError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(id),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Request/response correlation id. Untagged so either numeric or string ids
/// round-trip, matching what plugin binaries written against other JSON-RPC
/// clients may emit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

/// The seam a plugin call goes through. A call is one request/response
/// round trip; the caller is responsible for applying its own timeout.
#[async_trait]
pub trait PluginTransport: Send + Sync {
    async fn send_request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse, HostError>;
    fn is_connected(&self) -> bool;
    async fn close(&mut self) -> Result<(), HostError>;
}
