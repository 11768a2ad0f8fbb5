//! tether-agent: durable conversation orchestration
//!
//! This crate provides the think → act → observe loop behind a conversational
//! agent, the inbox that feeds it user turns, token-budget truncation of the
//! context it reasons over, and compaction with continuation so a
//! conversation can run indefinitely and survive restarts.
//!
//! The reasoning operations, capabilities and transcript persistence are
//! supplied by the caller through the traits in [`operations`] and
//! [`capability`].

pub mod capability;
pub mod compaction;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod gateway;
pub mod inbox;
pub mod operations;
pub mod orchestrator;
pub mod runtime;
pub mod snapshot;
pub mod transcript;
pub mod usage;

pub use capability::{BoxedCapability, Capability, CapabilityRegistry, CapabilitySource, CapabilitySpec};
pub use config::{HistoryLimits, OrchestratorConfig, RetryPolicy};
pub use error::{CapabilityError, Error, FailureKind, OperationError, Result};
pub use events::{AgentEvent, ConversationEvent};
pub use gateway::{ActResult, OperationGateway};
pub use inbox::{Inbox, InboxSender, PendingTurn};
pub use operations::{
    ActionRequest, Condensation, ExecutionInfo, HistoryAdvisor, HistoryThreshold, LogSink,
    Observation, OperationKind, PersistedMessage, Reasoner, Step, ThinkOutput, TranscriptSink,
};
pub use orchestrator::{Orchestrator, Outcome, Phase};
pub use runtime::{Completion, ConversationHandle, FailurePolicy, Runtime};
pub use snapshot::{
    ConversationSnapshot, FileSnapshotStore, MemorySnapshotStore, ResumePoint, SnapshotInfo,
    SnapshotStore,
};
pub use usage::{Usage, UsageLedger};
