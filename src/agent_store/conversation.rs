// Per-agent conversation state (spec §3 "Conversation turn", §4.F). Not
// persisted to disk. Grounded on `api.rs`'s `message_history` trimming loop
// in `send_message`, generalized to preserve the leading system prompt and
// never split an assistant/tool-result pair (spec §4.F).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::{Message as LlmMessage, ToolCall};

/// One entry in the conversation log (spec §3 "Conversation turn").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Turn {
    System(String),
    User(String),
    Assistant { content: String, tool_calls: Vec<ToolCall> },
    ToolResult { call_id: String, payload: String, is_error: bool },
}

impl Turn {
    pub fn is_system(&self) -> bool {
        matches!(self, Turn::System(_))
    }

    /// True for turns that count toward `Agent.statistics.messageCount`
    /// (spec §8 property: user, assistant, tool-result messages).
    pub fn counts_toward_message_count(&self) -> bool {
        !matches!(self, Turn::System(_))
    }

    /// Renders this turn as the LLM-facing message shape.
    pub fn to_llm_message(&self) -> LlmMessage {
        match self {
            Turn::System(content) => LlmMessage::system(content.clone()),
            Turn::User(content) => LlmMessage::user(content.clone()),
            Turn::Assistant { content, tool_calls } => {
                if tool_calls.is_empty() {
                    LlmMessage::new("assistant", content.clone())
                } else {
                    LlmMessage::assistant_with_tool_calls(content.clone(), tool_calls.clone())
                }
            }
            Turn::ToolResult { call_id, payload, .. } => LlmMessage::tool_result(call_id.clone(), payload.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenStats {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub message_count: u64,
    pub average_tokens: f64,
    pub last_active: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Ordered turn log plus its dedicated statistics lock (spec §4.F: updated
/// under a small dedicated lock each turn, independent of the agent store's
/// reader-writer lock).
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: VecDeque<Turn>,
    pub max_history: usize,
    pub stats: TokenStats,
}

impl Conversation {
    pub fn new(max_history: usize) -> Self {
        Self { turns: VecDeque::new(), max_history, stats: TokenStats::default() }
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        self.trim();
    }

    /// Drops the oldest non-system turns once over `max_history`, preserving
    /// the leading system prompt and never splitting an assistant/tool-result
    /// pair (spec §4.F). An assistant turn with tool calls is kept together
    /// with every immediately following tool-result turn that answers it.
    fn trim(&mut self) {
        if self.max_history == 0 || self.turns.len() <= self.max_history {
            return;
        }

        let system_prefix: Vec<Turn> = self.turns.iter().take_while(|t| t.is_system()).cloned().collect();
        let mut rest: VecDeque<Turn> = self.turns.iter().skip(system_prefix.len()).cloned().collect();

        while system_prefix.len() + rest.len() > self.max_history {
            match rest.front() {
                Some(Turn::Assistant { tool_calls, .. }) if !tool_calls.is_empty() => {
                    let call_ids: std::collections::HashSet<String> =
                        tool_calls.iter().map(|tc| tc.id.clone()).collect();
                    rest.pop_front();
                    while let Some(Turn::ToolResult { call_id, .. }) = rest.front() {
                        if call_ids.contains(call_id) {
                            rest.pop_front();
                        } else {
                            break;
                        }
                    }
                }
                Some(_) => {
                    rest.pop_front();
                }
                None => break,
            }
        }

        let mut result: VecDeque<Turn> = system_prefix.into();
        result.extend(rest);
        self.turns = result;
    }

    /// Builds the message list to send to the LLM: every turn in order.
    pub fn to_llm_messages(&self) -> Vec<LlmMessage> {
        self.turns.iter().map(Turn::to_llm_message).collect()
    }

    pub fn message_count(&self) -> u64 {
        self.turns.iter().filter(|t| t.counts_toward_message_count()).count() as u64
    }

    /// `RecordTokens(input, output, cost)` (spec §4.F).
    pub fn record_tokens(&mut self, input: u64, output: u64, cost: f64) {
        self.stats.total_input_tokens += input;
        self.stats.total_output_tokens += output;
        self.stats.total_cost_usd += cost;
        self.stats.message_count = self.message_count();
        let total = self.stats.total_input_tokens + self.stats.total_output_tokens;
        self.stats.average_tokens = if self.stats.message_count == 0 {
            0.0
        } else {
            total as f64 / self.stats.message_count as f64
        };
        let now = Utc::now();
        self.stats.last_active = Some(now);
        self.stats.updated_at = Some(now);
    }

    /// Snapshot for rollback when an in-flight turn is cancelled (spec §5
    /// Cancellation: partial results are discarded and the conversation
    /// rolled back to the pre-turn state).
    pub fn snapshot(&self) -> Conversation {
        self.clone()
    }

    pub fn restore(&mut self, snapshot: Conversation) {
        *self = snapshot;
    }
}
