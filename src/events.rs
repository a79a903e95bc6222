// Event bus for asynchronous communication between host subsystems.
// Also backs the per-agent activity log (spec: Activity-log entry, in-memory only).

use std::fmt;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// An envelope carrying one activity-log entry or transient status update.
#[derive(Debug, Clone)]
pub struct Event {
    pub source: String,
    pub destination: String,
    pub kind: EventKind,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Event {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, kind: EventKind) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            kind,
            timestamp: chrono::Utc::now(),
        }
    }

    /// `destination == "broadcast"` reaches every subscriber regardless of target.
    pub fn is_for(&self, target: &str) -> bool {
        self.destination == "broadcast" || self.destination == target
    }
}

/// Activity-log event kinds (spec §3) plus transient, non-persisted status kinds.
#[derive(Debug, Clone)]
pub enum EventKind {
    AgentCreated { agent_id: String },
    AgentUpdated { agent_id: String },
    AgentDeleted { agent_id: String },
    MessageSent { agent_id: String },
    PluginEnabled { agent_id: String, plugin_name: String },
    PluginDisabled { agent_id: String, plugin_name: String },
    StatusChanged { agent_id: String, status: AgentActivity },
    Plugin(PluginEvent),
}

/// Plugin lifecycle events, for the transient health/status signal (spec §4.C).
#[derive(Debug, Clone)]
pub enum PluginEvent {
    Started { plugin_name: String, tool_count: usize },
    Stopped { plugin_name: String },
    Error { plugin_name: String, message: String },
    HealthStatus { plugin_name: String, status: PluginHealthStatus },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginHealthStatus {
    Healthy,
    Unresponsive,
    Dead,
}

/// Transient per-turn activity, broadcast for UI-style observers.
/// Distinct from the persisted `Agent.status` lifecycle field (agent_store::types::AgentStatus).
#[derive(Debug, Clone)]
pub enum AgentActivity {
    Idle,
    Thinking,
    Responding,
    ExecutingTool(String),
    Error(String),
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) -> Result<usize, EventError> {
        self.tx.send(event).map_err(|_| EventError::SendFailed)
    }

    pub fn sender(&self) -> broadcast::Sender<Event> {
        self.tx.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub enum EventError {
    SendFailed,
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::SendFailed => write!(f, "failed to send event: no subscribers"),
        }
    }
}

impl std::error::Error for EventError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_targeting() {
        let targeted = Event::new("user", "agent1", EventKind::MessageSent { agent_id: "agent1".into() });
        assert!(targeted.is_for("agent1"));
        assert!(!targeted.is_for("agent2"));

        let broadcast = Event::new("system", "broadcast", EventKind::AgentCreated { agent_id: "a".into() });
        assert!(broadcast.is_for("agent1"));
        assert!(broadcast.is_for("anyone"));
    }

    #[test]
    fn bus_publish_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let event = Event::new("test", "dest", EventKind::AgentDeleted { agent_id: "a".into() });
        bus.publish(event).unwrap();

        let received = rx.try_recv().unwrap();
        assert_eq!(received.source, "test");
        assert_eq!(received.destination, "dest");
    }

    #[test]
    fn bus_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let event = Event::new("sender", "broadcast", EventKind::StatusChanged {
            agent_id: "a".into(),
            status: AgentActivity::Thinking,
        });
        bus.publish(event).unwrap();

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn publish_with_no_subscribers_errors() {
        let bus = EventBus::new();
        let event = Event::new("s", "broadcast", EventKind::AgentCreated { agent_id: "a".into() });
        assert!(bus.publish(event).is_err());
    }
}
