use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::LlmAdapter;

/// Name-keyed registry of available LLM adapters, looked up case-insensitively
/// by provider name (as agents reference them in their settings).
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn LlmAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
        }
    }

    fn key(name: &str) -> String {
        name.to_lowercase()
    }

    pub async fn register(&self, name: impl Into<String>, adapter: Arc<dyn LlmAdapter>) {
        let mut guard = self.adapters.write().await;
        guard.insert(Self::key(&name.into()), adapter);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn LlmAdapter>> {
        let guard = self.adapters.read().await;
        guard.get(&Self::key(name)).cloned()
    }

    pub async fn remove(&self, name: &str) -> Option<Arc<dyn LlmAdapter>> {
        let mut guard = self.adapters.write().await;
        guard.remove(&Self::key(name))
    }

    pub async fn list(&self) -> Vec<String> {
        let guard = self.adapters.read().await;
        guard.keys().cloned().collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmRequest, LlmResponse};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct StubAdapter;

    #[async_trait]
    impl LlmAdapter for StubAdapter {
        async fn stream_chat(&self, _request: LlmRequest, _tx: mpsc::UnboundedSender<String>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn complete_chat(&self, _request: LlmRequest) -> anyhow::Result<LlmResponse> {
            Ok(LlmResponse { content: String::new(), tool_calls: None, finish_reason: None, usage: None })
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn register_and_lookup_is_case_insensitive() {
        let registry = AdapterRegistry::new();
        registry.register("OpenRouter", Arc::new(StubAdapter)).await;

        assert!(registry.get("openrouter").await.is_some());
        assert!(registry.get("OPENROUTER").await.is_some());
        assert!(registry.get("anthropic").await.is_none());
    }

    #[tokio::test]
    async fn remove_drops_entry() {
        let registry = AdapterRegistry::new();
        registry.register("openrouter", Arc::new(StubAdapter)).await;
        assert!(registry.remove("OpenRouter").await.is_some());
        assert!(registry.get("openrouter").await.is_none());
    }

    #[tokio::test]
    async fn list_returns_registered_keys() {
        let registry = AdapterRegistry::new();
        registry.register("OpenRouter", Arc::new(StubAdapter)).await;
        registry.register("Ollama", Arc::new(StubAdapter)).await;
        let mut names = registry.list().await;
        names.sort();
        assert_eq!(names, vec!["ollama".to_string(), "openrouter".to_string()]);
    }
}
