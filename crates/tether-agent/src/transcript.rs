//! The ordered reasoning context of a conversation.
//!
//! Entries are opaque rendered text. Order is chronological and is never
//! changed; compaction replaces the whole sequence at once.

use serde::{Deserialize, Serialize};

use crate::inbox::PendingTurn;
use crate::operations::ActionRequest;

/// Ordered sequence of rendered entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    /// Drop entries appended after `len`; used to roll back a failed step.
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Replace every entry (compaction)
    pub fn replace(&mut self, entries: Vec<String>) {
        self.entries = entries;
    }

    pub fn into_entries(self) -> Vec<String> {
        self.entries
    }
}

impl From<Vec<String>> for Transcript {
    fn from(entries: Vec<String>) -> Self {
        Self { entries }
    }
}

// --- Entry rendering ---

pub fn user_entry(turn: &PendingTurn) -> String {
    format!(
        "<user_message name=\"{}\" date=\"{}\">\n{}\n</user_message>",
        turn.name, turn.timestamp, turn.message
    )
}

pub fn answer_entry(answer: &str) -> String {
    format!("<answer>\n{}\n</answer>", answer)
}

pub fn thought_entry(thought: &str) -> String {
    format!("<thought>\n{}\n</thought>", thought)
}

/// Render an action request; string inputs are JSON-quoted like any other input.
pub fn action_entry(action: &ActionRequest) -> String {
    format!(
        "<action><reason>\n{}\n</reason><name>{}</name><input>{}</input></action>",
        action.reason, action.name, action.input
    )
}

pub fn observation_entry(observation: &str) -> String {
    format!("<observation>\n{}\n</observation>", observation)
}
