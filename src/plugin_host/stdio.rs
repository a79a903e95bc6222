// Stdio transport for plugin subprocesses: newline-delimited JSON-RPC 2.0
// over stdin/stdout, with a handshake line read once at startup before the
// RPC loop begins.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::error::HostError;
use crate::plugin_host::protocol::HandshakeLine;
use crate::plugin_host::transport::{JsonRpcRequest, JsonRpcResponse, PluginTransport};

/// What the host needs to spawn a plugin binary.
#[derive(Debug, Clone)]
pub struct PluginProcessConfig {
    pub name: String,
    pub executable_path: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

pub struct StdioTransport {
    config: PluginProcessConfig,
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Arc<Mutex<Option<BufReader<ChildStdout>>>>,
    connected: bool,
}

impl StdioTransport {
    pub fn new(config: PluginProcessConfig) -> Self {
        Self {
            config,
            process: None,
            stdin: None,
            stdout: Arc::new(Mutex::new(None)),
            connected: false,
        }
    }

    /// Spawns the process and reads its handshake line. Does not yet issue
    /// any RPC call — that's `PluginClient::initialize`'s job.
    pub async fn start(&mut self) -> Result<HandshakeLine, HostError> {
        let mut cmd = Command::new(&self.config.executable_path);
        cmd.args(&self.config.args);
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| {
            HostError::PluginStartupFailed(format!(
                "failed to spawn plugin '{}': {e} (path: {})",
                self.config.name, self.config.executable_path
            ))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            HostError::PluginStartupFailed("failed to capture plugin stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            HostError::PluginStartupFailed("failed to capture plugin stdout".to_string())
        })?;

        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        reader.read_line(&mut line).await.map_err(|e| {
            HostError::PluginStartupFailed(format!("failed to read handshake line: {e}"))
        })?;

        let handshake = HandshakeLine::parse(&line).ok_or_else(|| {
            HostError::PluginStartupFailed(format!("malformed handshake line: {line:?}"))
        })?;

        self.stdin = Some(stdin);
        *self.stdout.lock().await = Some(reader);
        self.process = Some(child);
        self.connected = true;

        Ok(handshake)
    }

    async fn read_response(&self) -> Result<JsonRpcResponse, HostError> {
        let mut guard = self.stdout.lock().await;
        let reader = guard
            .as_mut()
            .ok_or_else(|| HostError::ToolCallTransport("plugin stdout not available".to_string()))?;

        let mut line = String::new();
        reader.read_line(&mut line).await.map_err(|e| {
            HostError::ToolCallTransport(format!("failed to read from plugin: {e}"))
        })?;

        if line.is_empty() {
            return Err(HostError::ToolCallTransport(
                "plugin connection closed (EOF)".to_string(),
            ));
        }

        serde_json::from_str(&line)
            .map_err(|e| HostError::ToolCallTransport(format!("invalid JSON-RPC response: {e}")))
    }

    async fn write_request(&mut self, request: &JsonRpcRequest) -> Result<(), HostError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| HostError::ToolCallTransport("plugin stdin not available".to_string()))?;

        let json = serde_json::to_string(request)
            .map_err(|e| HostError::ToolCallTransport(format!("failed to serialize request: {e}")))?;

        stdin
            .write_all(json.as_bytes())
            .await
            .map_err(|e| HostError::ToolCallTransport(format!("failed to write to plugin: {e}")))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| HostError::ToolCallTransport(format!("failed to write newline: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| HostError::ToolCallTransport(format!("failed to flush stdin: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl PluginTransport for StdioTransport {
    async fn send_request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse, HostError> {
        if !self.connected {
            return Err(HostError::ToolCallTransport("plugin not connected".to_string()));
        }
        self.write_request(&request).await?;
        self.read_response().await
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) -> Result<(), HostError> {
        self.connected = false;

        if let Some(mut process) = self.process.take() {
            // Close stdin first so a well-behaved plugin sees EOF and exits
            // on its own; only kill if it doesn't.
            self.stdin = None;
            tokio::select! {
                _ = process.wait() => {}
                _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {
                    let _ = process.kill().await;
                    let _ = process.wait().await;
                }
            }
        }

        *self.stdout.lock().await = None;
        Ok(())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(command: &str) -> PluginProcessConfig {
        PluginProcessConfig {
            name: "test".to_string(),
            executable_path: command.to_string(),
            args: vec![],
            env: HashMap::new(),
        }
    }

    #[test]
    fn not_connected_until_started() {
        let transport = StdioTransport::new(config("echo"));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn send_request_fails_when_not_started() {
        let mut transport = StdioTransport::new(config("echo"));
        let req = JsonRpcRequest::new(1, "GetVersion", None);
        let result = transport.send_request(req).await;
        assert!(result.is_err());
    }
}
