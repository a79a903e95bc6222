//! Library interface for the agent host.
//!
//! Exposes the agent registry and persistence, plugin lifecycle/RPC,
//! LLM adapters, the chat turn loop, the event bus, host settings, and
//! the REST surface as a set of crates that `main.rs` wires together and
//! that integration tests can drive directly.

pub mod agent_store;
pub mod chat_engine;
pub mod error;
pub mod events;
pub mod http;
pub mod llm;
pub mod plugin_host;
pub mod settings;
pub mod version;
pub mod version_compat;

pub use chat_engine::{ChatEngine, ChatTurnResult};
pub use error::HostError;
pub use events::{Event, EventBus, EventKind};
pub use llm::{LlmAdapter, LlmRequest, LlmResponse};
