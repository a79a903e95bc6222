// RPC client wrapping one plugin subprocess: handshake, Call/GetDefinition/
// version-triple/health-check, and the agent-context push. Transport-agnostic
// over `PluginTransport` so tests can swap in a stub.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::error::HostError;
use crate::plugin_host::protocol::{
    AgentContextRequest, CallRequest, CallResponse, FunctionDefinition, VersionResponse,
    METHOD_CALL, METHOD_GET_API_VERSION, METHOD_GET_DEFINITION, METHOD_GET_MAX_HOST_VERSION,
    METHOD_GET_MIN_HOST_VERSION, METHOD_GET_VERSION, METHOD_HEALTH_CHECK, METHOD_SET_AGENT_CONTEXT,
};
use crate::plugin_host::transport::{JsonRpcRequest, PluginTransport};

/// Standard JSON-RPC 2.0 "method not found" error code.
const JSONRPC_METHOD_NOT_FOUND: i64 = -32601;

/// The compatibility triple a plugin declares at handshake (spec §3, §4.A).
#[derive(Debug, Clone)]
pub struct PluginCompatibility {
    pub version: String,
    pub min_host_version: String,
    pub max_host_version: String,
    pub api_version: String,
}

/// A connected plugin: one RPC round trip per call, caller applies its own timeout.
pub struct PluginClient<T: PluginTransport> {
    transport: T,
    next_id: AtomicU64,
}

impl<T: PluginTransport> PluginClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport, next_id: AtomicU64::new(1) }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn call_method(&mut self, method: &str, params: Option<Value>) -> Result<Value, HostError> {
        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id, method, params);
        let response = self.transport.send_request(request).await?;

        if let Some(error) = response.error {
            return Err(HostError::ToolCallTransport(format!(
                "{} ({})",
                error.message, error.code
            )));
        }

        response
            .result
            .ok_or_else(|| HostError::ToolCallTransport(format!("{method}: empty result")))
    }

    /// Same as `call_method`, but surfaces the raw JSON-RPC error code
    /// instead of collapsing it into a `HostError` — used by `health_check`
    /// to tell "method not implemented" apart from an actual transport
    /// failure (spec §4.C: absence of `HealthCheck` means "healthy").
    async fn call_method_raw(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Result<Value, crate::plugin_host::transport::JsonRpcError>, HostError> {
        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id, method, params);
        let response = self.transport.send_request(request).await?;

        if let Some(error) = response.error {
            return Ok(Err(error));
        }

        Ok(Ok(response
            .result
            .ok_or_else(|| HostError::ToolCallTransport(format!("{method}: empty result")))?))
    }

    /// Handshake sequence: `GetDefinition` then the compatibility triple.
    /// Any failure here is the caller's cue to kill the subprocess and
    /// report `PluginStartupFailed`.
    pub async fn initialize(&mut self) -> Result<(FunctionDefinition, PluginCompatibility), HostError> {
        let definition = self.get_definition().await?;
        let version = self.get_version().await?;
        let min_host = self.get_min_host_version().await.unwrap_or_default();
        let max_host = self.get_max_host_version().await.unwrap_or_default();
        let api_version = self.get_api_version().await.unwrap_or_default();

        Ok((
            definition,
            PluginCompatibility {
                version,
                min_host_version: min_host,
                max_host_version: max_host,
                api_version,
            },
        ))
    }

    pub async fn get_definition(&mut self) -> Result<FunctionDefinition, HostError> {
        let result = self.call_method(METHOD_GET_DEFINITION, None).await?;
        serde_json::from_value(result)
            .map_err(|e| HostError::ToolCallTransport(format!("bad GetDefinition result: {e}")))
    }

    pub async fn get_version(&mut self) -> Result<String, HostError> {
        let result = self.call_method(METHOD_GET_VERSION, None).await?;
        let parsed: VersionResponse = serde_json::from_value(result)
            .map_err(|e| HostError::ToolCallTransport(format!("bad GetVersion result: {e}")))?;
        Ok(parsed.version)
    }

    pub async fn get_min_host_version(&mut self) -> Result<String, HostError> {
        let result = self.call_method(METHOD_GET_MIN_HOST_VERSION, None).await?;
        let parsed: VersionResponse = serde_json::from_value(result)
            .map_err(|e| HostError::ToolCallTransport(format!("bad GetMinHostVersion result: {e}")))?;
        Ok(parsed.version)
    }

    pub async fn get_max_host_version(&mut self) -> Result<String, HostError> {
        let result = self.call_method(METHOD_GET_MAX_HOST_VERSION, None).await?;
        let parsed: VersionResponse = serde_json::from_value(result)
            .map_err(|e| HostError::ToolCallTransport(format!("bad GetMaxHostVersion result: {e}")))?;
        Ok(parsed.version)
    }

    pub async fn get_api_version(&mut self) -> Result<String, HostError> {
        let result = self.call_method(METHOD_GET_API_VERSION, None).await?;
        let parsed: VersionResponse = serde_json::from_value(result)
            .map_err(|e| HostError::ToolCallTransport(format!("bad GetAPIVersion result: {e}")))?;
        Ok(parsed.version)
    }

    /// One-way notification; the plugin may ignore it. Errors are surfaced
    /// but never fatal to the caller's turn.
    pub async fn set_agent_context(&mut self, context: AgentContextRequest) -> Result<(), HostError> {
        let params = serde_json::to_value(context)
            .map_err(|e| HostError::ToolCallTransport(format!("bad SetAgentContext params: {e}")))?;
        self.call_method(METHOD_SET_AGENT_CONTEXT, Some(params)).await?;
        Ok(())
    }

    /// `HealthCheck() -> errorString`. A plugin that never implements the
    /// method reports JSON-RPC "method not found" (-32601), which spec §4.C
    /// says to treat as "healthy" rather than a failure; any other error
    /// response or transport failure is a real health-check failure.
    pub async fn health_check(&mut self) -> Result<(), HostError> {
        match self.call_method_raw(METHOD_HEALTH_CHECK, None).await? {
            Ok(result) => {
                let error: Option<String> = serde_json::from_value(result).unwrap_or(None);
                match error {
                    Some(message) if !message.is_empty() => Err(HostError::ToolCallFailed(message)),
                    _ => Ok(()),
                }
            }
            Err(rpc_error) if rpc_error.code == JSONRPC_METHOD_NOT_FOUND => Ok(()),
            Err(rpc_error) => {
                Err(HostError::ToolCallTransport(format!("{} ({})", rpc_error.message, rpc_error.code)))
            }
        }
    }

    /// `Call(argsJSON) -> (resultJSON, errorString)`. A non-empty plugin
    /// error string surfaces as `ToolCallFailed`; transport failure as
    /// `ToolCallTransport`. A successful call yields the raw JSON result.
    pub async fn call(&mut self, args: Value) -> Result<Value, HostError> {
        let params = serde_json::to_value(CallRequest { args_json: args })
            .map_err(|e| HostError::ToolCallTransport(format!("bad Call params: {e}")))?;
        let result = self.call_method(METHOD_CALL, Some(params)).await?;
        let response: CallResponse = serde_json::from_value(result)
            .map_err(|e| HostError::ToolCallTransport(format!("bad Call result: {e}")))?;

        if let Some(error) = response.error {
            if !error.is_empty() {
                return Err(HostError::ToolCallFailed(error));
            }
        }

        Ok(response.result_json.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin_host::transport::{JsonRpcError, JsonRpcResponse, RequestId};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct StubTransport {
        responses: StdMutex<VecDeque<JsonRpcResponse>>,
    }

    impl StubTransport {
        fn new(responses: Vec<JsonRpcResponse>) -> Self {
            Self { responses: StdMutex::new(responses.into()) }
        }
    }

    #[async_trait]
    impl PluginTransport for StubTransport {
        async fn send_request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse, HostError> {
            let mut guard = self.responses.lock().unwrap();
            let mut response = guard
                .pop_front()
                .ok_or_else(|| HostError::ToolCallTransport("no more stubbed responses".to_string()))?;
            response.id = request.id;
            Ok(response)
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn close(&mut self) -> Result<(), HostError> {
            Ok(())
        }
    }

    fn ok_response(result: Value) -> JsonRpcResponse {
        JsonRpcResponse { jsonrpc: "2.0".to_string(), id: RequestId::Number(0), result: Some(result), error: None }
    }

    #[tokio::test]
    async fn call_returns_result_json_on_success() {
        let transport = StubTransport::new(vec![ok_response(
            serde_json::json!({"resultJSON": 42, "error": null}),
        )]);
        let mut client = PluginClient::new(transport);
        let result = client.call(serde_json::json!({"a": 1})).await.unwrap();
        assert_eq!(result, serde_json::json!(42));
    }

    #[tokio::test]
    async fn call_surfaces_plugin_error_as_tool_call_failed() {
        let transport = StubTransport::new(vec![ok_response(
            serde_json::json!({"error": "division by zero"}),
        )]);
        let mut client = PluginClient::new(transport);
        let err = client.call(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, HostError::ToolCallFailed(msg) if msg == "division by zero"));
    }

    #[tokio::test]
    async fn transport_level_error_surfaces_as_tool_call_transport() {
        let transport = StubTransport::new(vec![JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(0),
            result: None,
            error: Some(JsonRpcError { code: -32000, message: "boom".to_string(), data: None }),
        }]);
        let mut client = PluginClient::new(transport);
        let err = client.call(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, HostError::ToolCallTransport(_)));
    }

    #[tokio::test]
    async fn initialize_collects_definition_and_compatibility_triple() {
        let transport = StubTransport::new(vec![
            ok_response(serde_json::json!({
                "name": "math", "description": "adds numbers", "parametersJSON": {}
            })),
            ok_response(serde_json::json!({"version": "1.0.0"})),
            ok_response(serde_json::json!({"version": "0.1.0"})),
            ok_response(serde_json::json!({"version": ""})),
            ok_response(serde_json::json!({"version": "v1"})),
        ]);
        let mut client = PluginClient::new(transport);
        let (definition, compat) = client.initialize().await.unwrap();
        assert_eq!(definition.name, "math");
        assert_eq!(compat.version, "1.0.0");
        assert_eq!(compat.api_version, "v1");
    }

    #[tokio::test]
    async fn health_check_treats_method_not_found_as_healthy() {
        let transport = StubTransport::new(vec![JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(0),
            result: None,
            error: Some(JsonRpcError { code: -32601, message: "method not found".to_string(), data: None }),
        }]);
        let mut client = PluginClient::new(transport);
        assert!(client.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn health_check_surfaces_other_errors_as_transport_failure() {
        let transport = StubTransport::new(vec![JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(0),
            result: None,
            error: Some(JsonRpcError { code: -32000, message: "plugin crashed".to_string(), data: None }),
        }]);
        let mut client = PluginClient::new(transport);
        let err = client.health_check().await.unwrap_err();
        assert!(matches!(err, HostError::ToolCallTransport(_)));
    }

    #[tokio::test]
    async fn health_check_surfaces_nonempty_plugin_error_string() {
        let transport = StubTransport::new(vec![ok_response(serde_json::json!("disk full"))]);
        let mut client = PluginClient::new(transport);
        let err = client.health_check().await.unwrap_err();
        assert!(matches!(err, HostError::ToolCallFailed(msg) if msg == "disk full"));
    }
}
