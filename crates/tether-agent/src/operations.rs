//! Contracts for the collaborators the orchestrator drives.
//!
//! The reasoning operations, transcript persistence and the history-size
//! advisory are all implemented outside this crate.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capability::CapabilitySpec;
use crate::config::HistoryLimits;
use crate::error::OperationError;
use crate::usage::Usage;

/// The externally invoked operations, for reporting and retry bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Think,
    Act,
    Observe,
    Compact,
    Persist,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Think => "think",
            OperationKind::Act => "act",
            OperationKind::Observe => "observe",
            OperationKind::Compact => "compact",
            OperationKind::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// A capability invocation requested by the think step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub name: String,
    pub reason: String,
    /// Structured object or plain string
    pub input: serde_json::Value,
}

/// Raw think output as decoded from the model.
///
/// Exactly one of `answer` / `action` must be set; [`ThinkOutput::into_step`]
/// enforces that.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThinkOutput {
    #[serde(default)]
    pub thought: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ThinkOutput {
    pub fn answer(thought: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            thought: thought.into(),
            answer: Some(answer.into()),
            ..Default::default()
        }
    }

    pub fn action(thought: impl Into<String>, action: ActionRequest) -> Self {
        Self {
            thought: thought.into(),
            action: Some(action),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Validate the tag. Returns the violation reason on failure.
    pub fn into_step(self) -> Result<Step, String> {
        match (self.answer, self.action) {
            (Some(answer), None) => Ok(Step::Answer {
                thought: self.thought,
                answer,
                usage: self.usage,
            }),
            (None, Some(action)) => Ok(Step::Action {
                thought: self.thought,
                action,
                usage: self.usage,
            }),
            (None, None) => Err("result has neither an answer nor an action".to_string()),
            (Some(_), Some(_)) => Err("result has both an answer and an action".to_string()),
        }
    }
}

/// A validated think result
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Answer {
        thought: String,
        answer: String,
        usage: Option<Usage>,
    },
    Action {
        thought: String,
        action: ActionRequest,
        usage: Option<Usage>,
    },
}

impl Step {
    pub fn thought(&self) -> &str {
        match self {
            Step::Answer { thought, .. } | Step::Action { thought, .. } => thought,
        }
    }

    pub fn usage(&self) -> Option<Usage> {
        match self {
            Step::Answer { usage, .. } | Step::Action { usage, .. } => *usage,
        }
    }
}

/// Output of the observe operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub observations: String,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Output of the compact operation: the condensed entry only.
/// Recent raw entries are spliced back in by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condensation {
    pub summary: String,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// The reasoning operations (model calls live behind this trait)
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Produce a thought plus either an answer or an action request
    async fn think(
        &self,
        context: &[String],
        catalog: &[CapabilitySpec],
    ) -> Result<ThinkOutput, OperationError>;

    /// Fold a capability result back into prose
    async fn observe(&self, context: &[String], act_result: &str)
        -> Result<Observation, OperationError>;

    /// Condense the full transcript into a single entry
    async fn compact(&self, transcript: &[String]) -> Result<Condensation, OperationError>;
}

/// A message handed to the persistence collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum PersistedMessage {
    User {
        name: String,
        message: String,
        date: String,
    },
    Assistant {
        message: String,
    },
}

/// Durable transcript storage. Best-effort from the loop's point of view.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn persist(&self, messages: &[PersistedMessage]) -> Result<(), OperationError>;
}

/// Sink that only writes messages to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl TranscriptSink for LogSink {
    async fn persist(&self, messages: &[PersistedMessage]) -> Result<(), OperationError> {
        for msg in messages {
            match msg {
                PersistedMessage::User { name, message, date } => {
                    tracing::info!("{} ({}): {}", name, date, message);
                }
                PersistedMessage::Assistant { message } => {
                    tracing::info!("assistant: {}", message);
                }
            }
        }
        Ok(())
    }
}

/// What the host knows about the current execution record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionInfo {
    pub conversation_id: String,
    /// Continuation count; 0 for a fresh conversation
    pub epoch: u32,
    /// Operations invoked since this epoch started
    pub steps: u64,
    pub transcript_entries: usize,
    pub estimated_tokens: u32,
}

/// Host advisory: "your recorded history is large, continue under a fresh state"
pub trait HistoryAdvisor: Send + Sync {
    fn history_large(&self, info: &ExecutionInfo) -> bool;
}

impl<F> HistoryAdvisor for F
where
    F: Fn(&ExecutionInfo) -> bool + Send + Sync,
{
    fn history_large(&self, info: &ExecutionInfo) -> bool {
        self(info)
    }
}

/// Advises continuation once either the step count or the transcript size
/// passes its limit.
#[derive(Debug, Clone)]
pub struct HistoryThreshold {
    limits: HistoryLimits,
}

impl HistoryThreshold {
    pub fn new(limits: HistoryLimits) -> Self {
        Self { limits }
    }
}

impl HistoryAdvisor for HistoryThreshold {
    fn history_large(&self, info: &ExecutionInfo) -> bool {
        info.steps >= self.limits.max_steps
            || info.estimated_tokens >= self.limits.max_estimated_tokens
    }
}
