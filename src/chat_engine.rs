// The turn loop (spec §4.G): send history to the LLM, dispatch tool calls
// concurrently, append results in request order, and re-enter until the
// model returns a plain message or the iteration cap is hit.
//
// Grounded on `api.rs`'s `RustbotApi::send_message` /
// `AgentResponse::NeedsToolExecution` handling (a one-shot, sequential
// version of this loop already exists there) and `tool_executor.rs`'s
// `ToolExecutor` trait as the dispatch seam, generalized to a bounded,
// concurrent loop backed by the plugin host instead of specialist sub-agents.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::agent_store::{AgentStore, Turn};
use crate::error::HostError;
use crate::llm::{AdapterRegistry, LlmRequest, Message as LlmMessage, Tool, ToolCall};
use crate::plugin_host::PluginHost;

pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 8;
pub const DEFAULT_TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PROVIDER: &str = "openrouter";

pub struct ChatEngine {
    agent_store: Arc<AgentStore>,
    plugin_host: Arc<PluginHost>,
    adapters: Arc<AdapterRegistry>,
    max_tool_iterations: usize,
}

/// Outcome of one full chat turn.
pub struct ChatTurnResult {
    pub text: String,
    /// Set when the tool-iteration limit was hit (spec §7 `ToolLoopExhausted`
    /// — surfaced as 200 with a warning, not a hard failure).
    pub tool_loop_exhausted: bool,
}

impl ChatEngine {
    pub fn new(agent_store: Arc<AgentStore>, plugin_host: Arc<PluginHost>, adapters: Arc<AdapterRegistry>) -> Self {
        Self { agent_store, plugin_host, adapters, max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS }
    }

    pub fn with_max_tool_iterations(mut self, max: usize) -> Self {
        self.max_tool_iterations = max;
        self
    }

    /// Builds the tool schemas advertised to the model, plus a tool-name to
    /// plugin-name map: a plugin's `FunctionDefinition.name` (what the model
    /// calls) is not required to match the name it's bound under, so
    /// dispatch has to go through this map rather than re-keying `ToolCall`s
    /// by `agent.plugins` directly.
    async fn build_tool_schemas(&self, agent: &crate::agent_store::Agent) -> (Vec<Tool>, HashMap<String, String>) {
        let mut tools = Vec::new();
        let mut tool_to_plugin = HashMap::new();
        for (plugin_name, binding) in &agent.plugins {
            if !binding.enabled {
                continue;
            }
            if let Some(definition) = self.plugin_host.definition(plugin_name).await {
                tool_to_plugin.insert(definition.name.clone(), plugin_name.clone());
                tools.push(Tool {
                    name: definition.name,
                    description: definition.description,
                    parameters: definition.parameters_json,
                });
            }
        }
        (tools, tool_to_plugin)
    }

    fn provider_name(agent: &crate::agent_store::Agent) -> String {
        agent
            .settings
            .provider_options
            .get("provider")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_PROVIDER)
            .to_string()
    }

    /// Runs one full turn: steps 1-6 of spec §4.G. `cancel` propagates into
    /// both the LLM call and every tool call (spec §5 Cancellation); on
    /// cancellation the conversation is rolled back to its pre-turn state.
    pub async fn send_message(
        &self,
        agent_name: &str,
        user_message: &str,
        cancel: CancellationToken,
    ) -> Result<ChatTurnResult, HostError> {
        // Step 1: load the agent.
        let agent = self.agent_store.get(agent_name).await?;

        // Step 2: acquire the per-agent turn lock; other turns queue FIFO.
        let turn_lock = self.agent_store.turn_lock(agent_name).await?;
        let _guard = turn_lock.lock().await;

        let pre_turn_snapshot = self
            .agent_store
            .with_conversation(agent_name, |c| c.snapshot())
            .await?;

        let result = self.run_turn(&agent, agent_name, user_message, cancel.clone()).await;

        if cancel.is_cancelled() {
            self.agent_store
                .with_conversation(agent_name, |c| c.restore(pre_turn_snapshot))
                .await?;
            return Err(HostError::Cancelled);
        }

        if result.is_err() {
            self.agent_store
                .with_conversation(agent_name, |c| c.restore(pre_turn_snapshot))
                .await?;
        }

        result
    }

    async fn run_turn(
        &self,
        agent: &crate::agent_store::Agent,
        agent_name: &str,
        user_message: &str,
        cancel: CancellationToken,
    ) -> Result<ChatTurnResult, HostError> {
        // Step 3: append the user message.
        self.agent_store
            .with_conversation(agent_name, |c| c.push(Turn::User(user_message.to_string())))
            .await?;

        // Step 4: tool schemas for bound-and-enabled plugins.
        let (tool_schemas, tool_to_plugin) = self.build_tool_schemas(agent).await;

        let adapter = self
            .adapters
            .get(&Self::provider_name(agent))
            .await
            .ok_or_else(|| HostError::ProviderError(format!("no provider registered for agent '{agent_name}'")))?;

        // Step 5: bounded tool-iteration loop.
        for _iteration in 0..self.max_tool_iterations {
            if cancel.is_cancelled() {
                return Err(HostError::Cancelled);
            }

            let history: Vec<LlmMessage> = self
                .agent_store
                .with_conversation(agent_name, |c| c.to_llm_messages())
                .await?;

            let mut request = LlmRequest::new(history)
                .with_model(agent.settings.model.clone())
                .with_tools(tool_schemas.clone());
            request.temperature = Some(agent.settings.temperature);

            let response = tokio::select! {
                result = adapter.complete_chat(request) => result.map_err(HostError::from)?,
                _ = cancel.cancelled() => return Err(HostError::Cancelled),
            };

            let tool_calls = response.tool_calls.clone().unwrap_or_default();

            if tool_calls.is_empty() {
                // Step 5b: terminal assistant message.
                self.agent_store
                    .with_conversation(agent_name, |c| {
                        c.push(Turn::Assistant { content: response.content.clone(), tool_calls: vec![] });
                        if let Some(usage) = response.usage {
                            c.record_tokens(usage.input_tokens, usage.output_tokens, usage.cost_usd);
                        }
                    })
                    .await?;

                return Ok(ChatTurnResult { text: response.content, tool_loop_exhausted: false });
            }

            // Step 5c: append the assistant-with-tool-calls message, then
            // dispatch every tool call concurrently.
            self.agent_store
                .with_conversation(agent_name, |c| {
                    c.push(Turn::Assistant { content: response.content.clone(), tool_calls: tool_calls.clone() });
                })
                .await?;

            let results = self.dispatch_tool_calls(agent, &tool_calls, &tool_to_plugin, cancel.clone()).await?;

            // Step 5d: append tool-result turns in the original request order.
            self.agent_store
                .with_conversation(agent_name, |c| {
                    for (call_id, payload, is_error) in results {
                        c.push(Turn::ToolResult { call_id, payload, is_error });
                    }
                })
                .await?;
        }

        // Step 6: iteration limit exhausted.
        let message = "tool iteration limit reached".to_string();
        self.agent_store
            .with_conversation(agent_name, |c| {
                c.push(Turn::Assistant { content: message.clone(), tool_calls: vec![] });
            })
            .await?;

        Ok(ChatTurnResult { text: message, tool_loop_exhausted: true })
    }

    /// Tool calls within a single assistant message execute concurrently;
    /// their results are collected in the original call order so downstream
    /// determinism is preserved (spec §4.G step c, §5 ordering guarantee).
    async fn dispatch_tool_calls(
        &self,
        agent: &crate::agent_store::Agent,
        tool_calls: &[ToolCall],
        tool_to_plugin: &HashMap<String, String>,
        cancel: CancellationToken,
    ) -> Result<Vec<(String, String, bool)>, HostError> {
        let timeout = agent
            .settings
            .tool_call_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOOL_CALL_TIMEOUT);

        let futures = tool_calls.iter().map(|call| {
            let plugin_host = Arc::clone(&self.plugin_host);
            let call = call.clone();
            let cancel = cancel.clone();
            // The model calls tools by the name the plugin advertised, which
            // need not equal the name it's bound under (spec §3 "plugin
            // bindings" vs §4.A `FunctionDefinition.name`).
            let plugin_name = tool_to_plugin.get(&call.name).cloned();
            let binding_enabled =
                plugin_name.as_ref().and_then(|p| agent.plugins.get(p)).map(|b| b.enabled).unwrap_or(false);

            async move {
                let Some(plugin_name) = plugin_name.filter(|_| binding_enabled) else {
                    return (
                        call.id.clone(),
                        format!("tool '{}' is not enabled for this agent", call.name),
                        true,
                    );
                };

                let outcome = tokio::select! {
                    result = plugin_host.call_tool_with_timeout(&plugin_name, call.arguments.clone(), timeout) => result,
                    _ = cancel.cancelled() => Err(HostError::Cancelled),
                };

                match outcome {
                    Ok(value) => (call.id.clone(), value.to_string(), false),
                    Err(e) => (call.id.clone(), e.to_string(), true),
                }
            }
        });

        Ok(join_all(futures).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_store::CreateAgentConfig;
    use crate::llm::{LlmAdapter, LlmResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct ScriptedAdapter {
        responses: std::sync::Mutex<Vec<LlmResponse>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmAdapter for ScriptedAdapter {
        async fn stream_chat(&self, _r: LlmRequest, _tx: mpsc::UnboundedSender<String>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn complete_chat(&self, _request: LlmRequest) -> anyhow::Result<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut guard = self.responses.lock().unwrap();
            if guard.is_empty() {
                anyhow::bail!("no more scripted responses");
            }
            Ok(guard.remove(0))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn plain_response(text: &str) -> LlmResponse {
        LlmResponse { content: text.to_string(), tool_calls: None, finish_reason: Some("stop".to_string()), usage: None }
    }

    async fn engine_with(adapter: ScriptedAdapter) -> (ChatEngine, Arc<AgentStore>) {
        let store = Arc::new(AgentStore::new("/tmp/unused.json"));
        store.create("a1", CreateAgentConfig::default()).await.unwrap();
        let plugin_host = Arc::new(PluginHost::new("1.0.0", "v1"));
        let adapters = Arc::new(AdapterRegistry::new());
        adapters.register("openrouter", Arc::new(adapter)).await;
        let engine = ChatEngine::new(store.clone(), plugin_host, adapters);
        (engine, store)
    }

    #[tokio::test]
    async fn create_and_chat_appends_one_assistant_message() {
        let adapter = ScriptedAdapter { responses: std::sync::Mutex::new(vec![plain_response("hello there")]), calls: AtomicUsize::new(0) };
        let (engine, store) = engine_with(adapter).await;

        let result = engine.send_message("a1", "hello", CancellationToken::new()).await.unwrap();
        assert_eq!(result.text, "hello there");
        assert!(!result.tool_loop_exhausted);

        let count = store.with_conversation("a1", |c| c.message_count()).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn missing_agent_is_not_found() {
        let adapter = ScriptedAdapter { responses: std::sync::Mutex::new(vec![]), calls: AtomicUsize::new(0) };
        let (engine, _store) = engine_with(adapter).await;
        let err = engine.send_message("nope", "hi", CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, HostError::NotFound(_)));
    }

    #[tokio::test]
    async fn tool_call_for_disabled_plugin_is_recovered_as_tool_result() {
        let tool_call = ToolCall { id: "call_1".to_string(), name: "math".to_string(), arguments: serde_json::json!({}) };
        let with_tool_call = LlmResponse {
            content: String::new(),
            tool_calls: Some(vec![tool_call]),
            finish_reason: Some("tool_calls".to_string()),
            usage: None,
        };
        let adapter = ScriptedAdapter {
            responses: std::sync::Mutex::new(vec![with_tool_call, plain_response("done")]),
            calls: AtomicUsize::new(0),
        };
        let (engine, _store) = engine_with(adapter).await;

        let result = engine.send_message("a1", "use math", CancellationToken::new()).await.unwrap();
        assert_eq!(result.text, "done");
    }

    #[tokio::test]
    async fn exhausting_the_tool_loop_returns_synthetic_message() {
        let tool_call = ToolCall { id: "call_1".to_string(), name: "math".to_string(), arguments: serde_json::json!({}) };
        let looping = LlmResponse {
            content: String::new(),
            tool_calls: Some(vec![tool_call]),
            finish_reason: Some("tool_calls".to_string()),
            usage: None,
        };
        let responses: Vec<_> = (0..DEFAULT_MAX_TOOL_ITERATIONS).map(|_| looping.clone()).collect();
        let adapter = ScriptedAdapter { responses: std::sync::Mutex::new(responses), calls: AtomicUsize::new(0) };
        let (engine, _store) = engine_with(adapter).await;

        let result = engine.send_message("a1", "loop forever", CancellationToken::new()).await.unwrap();
        assert!(result.tool_loop_exhausted);
        assert_eq!(result.text, "tool iteration limit reached");
    }
}
