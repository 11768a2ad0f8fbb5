//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_agent::{
    CapabilityRegistry, CapabilitySpec, Condensation, Observation, OperationError,
    OperationGateway, OrchestratorConfig, PersistedMessage, Reasoner, RetryPolicy, ThinkOutput,
    TranscriptSink, Usage,
};

/// Reasoner that replays canned think results and records every call.
#[derive(Default)]
pub struct ScriptedReasoner {
    pub thoughts: Mutex<Vec<ThinkOutput>>,
    pub think_contexts: Mutex<Vec<Vec<String>>>,
    pub observe_inputs: Mutex<Vec<String>>,
    pub compact_inputs: Mutex<Vec<Vec<String>>>,
    pub summary: Mutex<String>,
}

impl ScriptedReasoner {
    pub fn new(thoughts: Vec<ThinkOutput>) -> Arc<Self> {
        Arc::new(Self {
            thoughts: Mutex::new(thoughts),
            summary: Mutex::new("C".to_string()),
            ..Default::default()
        })
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn think(
        &self,
        context: &[String],
        _catalog: &[CapabilitySpec],
    ) -> Result<ThinkOutput, OperationError> {
        self.think_contexts.lock().push(context.to_vec());
        let mut thoughts = self.thoughts.lock();
        if thoughts.is_empty() {
            return Err(OperationError::failed("script exhausted"));
        }
        Ok(thoughts.remove(0))
    }

    async fn observe(
        &self,
        _context: &[String],
        act_result: &str,
    ) -> Result<Observation, OperationError> {
        self.observe_inputs.lock().push(act_result.to_string());
        Ok(Observation {
            observations: format!("noted: {}", act_result),
            usage: Some(Usage::new(4, 1)),
        })
    }

    async fn compact(&self, transcript: &[String]) -> Result<Condensation, OperationError> {
        self.compact_inputs.lock().push(transcript.to_vec());
        Ok(Condensation {
            summary: self.summary.lock().clone(),
            usage: Some(Usage::new(8, 2)),
        })
    }
}

/// Sink that keeps every persisted batch
#[derive(Default)]
pub struct RecordingSink {
    pub batches: Mutex<Vec<Vec<PersistedMessage>>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<PersistedMessage> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl TranscriptSink for RecordingSink {
    async fn persist(&self, messages: &[PersistedMessage]) -> Result<(), OperationError> {
        self.batches.lock().push(messages.to_vec());
        Ok(())
    }
}

pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        },
        ..Default::default()
    }
}

pub fn gateway(reasoner: Arc<ScriptedReasoner>, sink: Arc<RecordingSink>) -> OperationGateway {
    OperationGateway::new(
        reasoner,
        Arc::new(CapabilityRegistry::new()),
        sink,
        fast_config().retry,
    )
}
