use super::types::*;
use super::LlmAdapter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_MODEL: &str = "anthropic/claude-3.5-sonnet";

pub struct OpenRouterAdapter {
    client: Client,
    api_key: String,
}

impl OpenRouterAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
        }
    }

    async fn send_request(&self, request: &ApiRequest) -> Result<reqwest::Response> {
        self.client
            .post(OPENROUTER_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .context("Failed to send request to OpenRouter")
    }

    fn build_request(&self, request: LlmRequest, stream: bool) -> ApiRequest {
        ApiRequest {
            model: request.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            messages: request.messages.into_iter().map(ApiMessage::from).collect(),
            stream,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: request.tools.map(|tools| tools.into_iter().map(ApiTool::from).collect()),
        }
    }
}

#[async_trait]
impl LlmAdapter for OpenRouterAdapter {
    async fn stream_chat(
        &self,
        request: LlmRequest,
        tx: mpsc::UnboundedSender<String>,
    ) -> Result<()> {
        let api_request = self.build_request(request, true);

        let response = self.send_request(&api_request).await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenRouter API error {}: {}", status, error_text);
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed to read chunk from stream")?;
            let chunk_str = String::from_utf8_lossy(&chunk);
            buffer.push_str(&chunk_str);

            // Process complete SSE messages
            while let Some(pos) = buffer.find("\n\n") {
                let message = buffer[..pos].to_string();
                buffer = buffer[pos + 2..].to_string();

                if message.trim().is_empty() {
                    continue;
                }

                // Parse SSE format: "data: {json}"
                for line in message.lines() {
                    if line.starts_with("data: ") {
                        let data = &line[6..];

                        if data == "[DONE]" {
                            return Ok(());
                        }

                        match serde_json::from_str::<StreamResponse>(data) {
                            Ok(response) => {
                                if let Some(choice) = response.choices.first() {
                                    if let Some(delta) = &choice.delta {
                                        if let Some(content) = &delta.content {
                                            if tx.send(content.clone()).is_err() {
                                                return Ok(()); // Receiver dropped
                                            }
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!("Failed to parse chunk: {} - data: {}", e, data);
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn complete_chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let api_request = self.build_request(request, false);

        let response = self.send_request(&api_request).await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenRouter API error {}: {}", status, error_text);
        }

        let completion: CompletionResponse = response.json().await?;

        let choice = completion
            .choices
            .first()
            .context("No choices in response")?;

        let tool_calls = choice.message.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|c| ToolCall {
                    id: c.id.clone(),
                    name: c.function.name.clone(),
                    arguments: serde_json::from_str(&c.function.arguments)
                        .unwrap_or(serde_json::Value::Null),
                })
                .collect()
        });

        let usage = completion.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cost_usd: u.total_cost.unwrap_or(0.0),
        });

        Ok(LlmResponse {
            content: choice.message.content.clone().unwrap_or_default(),
            tool_calls,
            finish_reason: choice.finish_reason.clone(),
            usage,
        })
    }

    fn name(&self) -> &str {
        "OpenRouter"
    }
}

// Internal API types, matching the OpenAI-compatible chat completions wire format.

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<Message> for ApiMessage {
    fn from(m: Message) -> Self {
        Self {
            role: m.role,
            content: if m.content.is_empty() { None } else { Some(m.content) },
            tool_calls: m.tool_calls.map(|calls| calls.into_iter().map(ApiToolCall::from).collect()),
            tool_call_id: m.tool_call_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type", default = "default_tool_type")]
    kind: String,
    function: ApiFunctionCall,
}

fn default_tool_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ApiFunctionCall {
    name: String,
    arguments: String,
}

impl From<ToolCall> for ApiToolCall {
    fn from(tc: ToolCall) -> Self {
        Self {
            id: tc.id,
            kind: "function".to_string(),
            function: ApiFunctionCall {
                name: tc.name,
                arguments: tc.arguments.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiTool {
    #[serde(rename = "type")]
    kind: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

impl From<Tool> for ApiTool {
    fn from(t: Tool) -> Self {
        Self {
            kind: "function".to_string(),
            function: ApiToolFunction {
                name: t.name,
                description: t.description,
                parameters: t.parameters,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_message_drops_empty_content() {
        let m = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall { id: "1".into(), name: "search".into(), arguments: serde_json::json!({}) }],
        );
        let api: ApiMessage = m.into();
        assert!(api.content.is_none());
        assert_eq!(api.tool_calls.unwrap().len(), 1);
    }

    #[test]
    fn tool_call_arguments_roundtrip_through_string() {
        let tc = ToolCall {
            id: "call_1".into(),
            name: "lookup".into(),
            arguments: serde_json::json!({"key": "value"}),
        };
        let api = ApiToolCall::from(tc);
        assert_eq!(api.function.arguments, r#"{"key":"value"}"#);
    }

    #[test]
    fn response_message_tool_calls_parse_back_to_json() {
        let raw = r#"{
            "content": null,
            "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "search", "arguments": "{\"q\":\"rust\"}"}}]
        }"#;
        let msg: ResponseMessage = serde_json::from_str(raw).unwrap();
        let calls = msg.tool_calls.unwrap();
        assert_eq!(calls[0].function.name, "search");
        let args: serde_json::Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(args["q"], "rust");
    }
}
