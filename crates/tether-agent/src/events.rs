//! Observability events

use serde::{Deserialize, Serialize};

use crate::error::FailureKind;
use crate::operations::OperationKind;
use crate::usage::Usage;

/// Events emitted while a conversation runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A pending turn was persisted and folded into the transcript
    TurnReceived { name: String, message: String },

    /// The think step produced a thought
    Thought { thought: String },

    /// The think step produced a final answer
    Answer { answer: String },

    /// A capability is about to be invoked
    ActionStart {
        name: String,
        input: serde_json::Value,
    },

    /// A capability invocation finished (errors arrive as payloads)
    ActionEnd {
        name: String,
        result: String,
        is_error: bool,
    },

    /// The observe step folded the action result back
    Observation { observation: String },

    /// The transcript was replaced by its condensation
    Compacted {
        entries_before: usize,
        entries_after: usize,
    },

    /// The conversation handed its state to a fresh instance
    Continued { epoch: u32 },

    /// A snapshot was written to the store
    Checkpointed { epoch: u32 },

    /// The conversation stopped at a suspension point and can be resumed
    Suspended,

    /// Any failure, fatal or recovered
    Failure {
        kind: FailureKind,
        operation: Option<OperationKind>,
        message: String,
    },

    /// The conversation finished
    Exited { usage: Usage },
}

impl AgentEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Exited { .. } | AgentEvent::Suspended)
    }
}

/// An event tagged with the conversation it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEvent {
    pub conversation_id: String,
    #[serde(flatten)]
    pub event: AgentEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_flat() {
        let event = ConversationEvent {
            conversation_id: "c1".into(),
            event: AgentEvent::Continued { epoch: 2 },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"conversation_id": "c1", "type": "continued", "epoch": 2})
        );
    }

    #[test]
    fn test_failure_event_roundtrip() {
        let event = AgentEvent::Failure {
            kind: FailureKind::CapabilityLogical,
            operation: Some(OperationKind::Act),
            message: "Capability with name nope not found.".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"failure\""));
        let back: AgentEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_terminal_events() {
        assert!(AgentEvent::Exited { usage: Usage::default() }.is_terminal());
        assert!(AgentEvent::Suspended.is_terminal());
        assert!(!AgentEvent::Thought { thought: "x".into() }.is_terminal());
    }
}
