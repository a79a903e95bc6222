// Message shapes and method names for the plugin RPC schema (spec §6).
// Simplified from a general-purpose MCP surface down to exactly what this
// host needs: one tool definition per plugin, one call method, a version
// triple, agent-context push, and an optional health check. No
// resources/prompts/logging capability negotiation.

use serde::{Deserialize, Serialize};

pub const METHOD_GET_DEFINITION: &str = "GetDefinition";
pub const METHOD_CALL: &str = "Call";
pub const METHOD_GET_VERSION: &str = "GetVersion";
pub const METHOD_GET_MIN_HOST_VERSION: &str = "GetMinHostVersion";
pub const METHOD_GET_MAX_HOST_VERSION: &str = "GetMaxHostVersion";
pub const METHOD_GET_API_VERSION: &str = "GetAPIVersion";
pub const METHOD_SET_AGENT_CONTEXT: &str = "SetAgentContext";
pub const METHOD_HEALTH_CHECK: &str = "HealthCheck";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Empty {}

/// Result of `GetDefinition`: the tool schema the plugin exposes to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "parametersJSON")]
    pub parameters_json: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    #[serde(rename = "argsJSON")]
    pub args_json: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResponse {
    #[serde(rename = "resultJSON", default, skip_serializing_if = "Option::is_none")]
    pub result_json: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContextRequest {
    pub name: String,
    #[serde(rename = "configPath")]
    pub config_path: String,
    #[serde(rename = "settingsPath")]
    pub settings_path: String,
    #[serde(rename = "agentDir")]
    pub agent_dir: String,
}

/// Parsed handshake line: `protocol|port|transport|cookie`, printed by the
/// plugin process on stdout within the startup timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeLine {
    pub protocol: String,
    pub port: String,
    pub transport: String,
    pub cookie: String,
}

impl HandshakeLine {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let mut parts = line.splitn(4, '|');
        Some(Self {
            protocol: parts.next()?.to_string(),
            port: parts.next()?.to_string(),
            transport: parts.next()?.to_string(),
            cookie: parts.next()?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_handshake_line() {
        let line = "1|0|stdio|abc123\n";
        let parsed = HandshakeLine::parse(line).unwrap();
        assert_eq!(parsed.protocol, "1");
        assert_eq!(parsed.transport, "stdio");
        assert_eq!(parsed.cookie, "abc123");
    }

    #[test]
    fn rejects_line_missing_fields() {
        assert!(HandshakeLine::parse("1|0|stdio").is_none());
    }

    #[test]
    fn call_response_round_trips_success_and_error() {
        let ok = CallResponse { result_json: Some(serde_json::json!(42)), error: None };
        let json = serde_json::to_string(&ok).unwrap();
        assert!(!json.contains("\"error\""));

        let err = CallResponse { result_json: None, error: Some("boom".to_string()) };
        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("resultJSON"));
    }
}
