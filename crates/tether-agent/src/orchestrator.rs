//! The conversation state machine.
//!
//! One orchestrator drives one conversation epoch: it drains the inbox, runs
//! think → (answer | act → observe), and either pauses for the next turn,
//! terminates on exit, or hands its condensed state to a fresh instance once
//! the host reports that the execution history is large.
//!
//! All state (transcript, usage, pending turns) is mutated only here. Signals
//! from outside reach it through the [`Inbox`] and are merged at suspension
//! points and loop-top checks.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::compaction;
use crate::config::OrchestratorConfig;
use crate::context;
use crate::error::{Error, FailureKind, Result};
use crate::events::{AgentEvent, ConversationEvent};
use crate::gateway::OperationGateway;
use crate::inbox::{Inbox, Wakeup};
use crate::operations::{
    ActionRequest, ExecutionInfo, HistoryAdvisor, HistoryThreshold, OperationKind,
    PersistedMessage, Step,
};
use crate::snapshot::{ConversationSnapshot, ResumePoint, SnapshotStore};
use crate::transcript::{self, Transcript};
use crate::usage::{Usage, UsageLedger};

/// Observable position of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingFirstTurn,
    Draining,
    Thinking,
    Answering,
    Acting,
    Observing,
    CompactionCheck,
    Continuing,
    Exited,
    Suspended,
    Failed,
}

/// How a call to [`Orchestrator::run`] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Exit was requested with no turn pending; carries the usage total
    Exited(Usage),
    /// The state was condensed; continue with [`Orchestrator::hand_off`]
    Continued,
    /// The host cancelled the conversation at a suspension point
    Suspended,
}

/// Internal states, carrying what the next state needs
enum State {
    Await,
    LoopTop,
    Draining,
    Thinking,
    Answering { answer: String },
    Acting { thought: String, action: ActionRequest },
    Observing { act_result: String },
    CompactionCheck,
}

/// Drives a single conversation epoch
pub struct Orchestrator {
    id: String,
    epoch: u32,
    config: OrchestratorConfig,
    gateway: OperationGateway,
    advisor: Arc<dyn HistoryAdvisor>,
    store: Option<Arc<dyn SnapshotStore>>,
    events: broadcast::Sender<ConversationEvent>,
    cancel: CancellationToken,

    inbox: Inbox,
    transcript: Transcript,
    usage: UsageLedger,
    resume_at: ResumePoint,
    phase: Phase,

    /// Operations invoked this epoch
    steps: u64,
    /// Answers and observations completed this epoch
    rounds: u64,
    /// Transcript/usage lengths to roll back to if the current step fails
    mark: (usize, usize),
}

impl Orchestrator {
    /// Create an orchestrator for a fresh conversation
    pub fn new(
        id: impl Into<String>,
        config: OrchestratorConfig,
        gateway: OperationGateway,
        inbox: Inbox,
    ) -> Self {
        Self::from_snapshot(ConversationSnapshot::new(id), config, gateway, inbox)
    }

    /// Rebuild an orchestrator from a snapshot.
    ///
    /// The snapshot's pending turns are placed ahead of anything already
    /// delivered to `inbox`.
    pub fn from_snapshot(
        snapshot: ConversationSnapshot,
        config: OrchestratorConfig,
        gateway: OperationGateway,
        mut inbox: Inbox,
    ) -> Self {
        inbox.seed(snapshot.pending);
        let (events, _) = broadcast::channel(256);
        let advisor: Arc<dyn HistoryAdvisor> =
            Arc::new(HistoryThreshold::new(config.history.clone()));

        Self {
            id: snapshot.conversation_id,
            epoch: snapshot.epoch,
            config,
            gateway,
            advisor,
            store: None,
            events,
            cancel: CancellationToken::new(),
            inbox,
            transcript: Transcript::from(snapshot.transcript),
            usage: UsageLedger::from(snapshot.usage),
            resume_at: snapshot.resume_at,
            phase: Phase::AwaitingFirstTurn,
            steps: 0,
            rounds: 0,
            mark: (0, 0),
        }
    }

    /// Replace the history-size advisory
    pub fn with_advisor(mut self, advisor: Arc<dyn HistoryAdvisor>) -> Self {
        self.advisor = advisor;
        self
    }

    /// Write checkpoints to `store`
    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Publish events on an existing channel
    pub fn with_events(mut self, events: broadcast::Sender<ConversationEvent>) -> Self {
        self.events = events;
        self
    }

    /// Suspend (rather than wait) at suspension points once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Subscribe to this conversation's events
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn usage(&self) -> &UsageLedger {
        &self.usage
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Current state as a snapshot; pending turns are copied, not taken.
    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation_id: self.id.clone(),
            epoch: self.epoch,
            transcript: self.transcript.entries().to_vec(),
            usage: self.usage.records().to_vec(),
            pending: self.inbox.pending().cloned().collect(),
            resume_at: self.resume_at,
            saved_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Consume the orchestrator, moving its state into a snapshot and
    /// returning the inbox so a successor can keep receiving signals.
    pub fn hand_off(mut self) -> (ConversationSnapshot, Inbox) {
        self.inbox.collect();
        let mut snapshot = self.snapshot();
        snapshot.pending = self.inbox.take_pending();
        (snapshot, self.inbox)
    }

    /// Run until exit, continuation, suspension or a fatal failure.
    ///
    /// On failure the transcript and usage are rolled back to where they stood
    /// before the failed step, so [`Orchestrator::snapshot`] can seed a retry.
    pub async fn run(&mut self) -> Result<Outcome> {
        match self.run_loop().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn run_loop(&mut self) -> Result<Outcome> {
        let mut state = match self.resume_at {
            ResumePoint::AwaitTurn => State::Await,
            ResumePoint::Reason => State::LoopTop,
        };

        loop {
            state = match state {
                State::Await => {
                    self.enter(Phase::AwaitingFirstTurn);
                    match self.inbox.wait_for_work(&self.cancel).await {
                        Wakeup::Work => State::LoopTop,
                        Wakeup::Cancelled => return Ok(self.suspend().await),
                    }
                }
                State::LoopTop => {
                    self.inbox.collect();
                    if self.inbox.exit_requested() && self.inbox.pending_len() == 0 {
                        return Ok(self.exit());
                    }
                    State::Draining
                }
                State::Draining => {
                    if self.drain().await > 0 {
                        // Accepted turns must outlive a crash mid-round.
                        self.resume_at = ResumePoint::Reason;
                        self.checkpoint().await;
                    }
                    State::Thinking
                }
                State::Thinking => self.think().await?,
                State::Answering { answer } => {
                    self.answer(answer).await;
                    State::Await
                }
                State::Acting { thought, action } => self.act(thought, action).await?,
                State::Observing { act_result } => self.observe(act_result).await?,
                State::CompactionCheck => {
                    self.enter(Phase::CompactionCheck);
                    self.mark_step();
                    if self.advisor.history_large(&self.execution_info()) {
                        self.continue_as_new().await?;
                        return Ok(Outcome::Continued);
                    }
                    State::LoopTop
                }
            };
        }
    }

    /// Persist and fold every pending turn, oldest first. Returns how many.
    async fn drain(&mut self) -> usize {
        self.enter(Phase::Draining);
        let mut drained = 0;
        while let Some(turn) = self.inbox.pop_turn() {
            drained += 1;
            let message = PersistedMessage::User {
                name: turn.name.clone(),
                message: turn.message.clone(),
                date: turn.timestamp.clone(),
            };
            self.persist(message).await;
            self.transcript.push(transcript::user_entry(&turn));
            tracing::info!(name = %turn.name, "turn received");
            self.emit(AgentEvent::TurnReceived {
                name: turn.name,
                message: turn.message,
            });
        }
        drained
    }

    async fn think(&mut self) -> Result<State> {
        self.enter(Phase::Thinking);
        self.mark_step();

        let window = context::truncate(self.transcript.entries(), self.config.max_context_tokens);
        let step = self.gateway.think(window).await?;
        self.steps += 1;
        self.usage.record(step.usage());

        self.emit(AgentEvent::Thought {
            thought: step.thought().to_string(),
        });

        Ok(match step {
            Step::Answer { answer, .. } => State::Answering { answer },
            Step::Action { thought, action, .. } => State::Acting { thought, action },
        })
    }

    async fn answer(&mut self, answer: String) {
        self.enter(Phase::Answering);
        self.persist(PersistedMessage::Assistant {
            message: answer.clone(),
        })
        .await;
        self.transcript.push(transcript::answer_entry(&answer));
        self.rounds += 1;
        tracing::info!("answer produced");
        self.emit(AgentEvent::Answer { answer });

        self.resume_at = ResumePoint::AwaitTurn;
        if self.config.checkpoint_on_answer {
            self.checkpoint().await;
        }
    }

    async fn act(&mut self, thought: String, action: ActionRequest) -> Result<State> {
        self.enter(Phase::Acting);
        self.transcript.push(transcript::thought_entry(&thought));
        self.transcript.push(transcript::action_entry(&action));
        self.emit(AgentEvent::ActionStart {
            name: action.name.clone(),
            input: action.input.clone(),
        });

        let result = self.gateway.act(&action).await?;
        self.steps += 1;

        if let Some(error) = &result.error {
            self.report(
                FailureKind::CapabilityLogical,
                Some(OperationKind::Act),
                error.to_string(),
            );
        }
        self.emit(AgentEvent::ActionEnd {
            name: action.name,
            result: result.output.clone(),
            is_error: result.is_error(),
        });

        Ok(State::Observing {
            act_result: result.output,
        })
    }

    async fn observe(&mut self, act_result: String) -> Result<State> {
        self.enter(Phase::Observing);

        let window = context::truncate(self.transcript.entries(), self.config.max_context_tokens);
        let observation = self.gateway.observe(window, &act_result).await?;
        self.steps += 1;
        self.usage.record(observation.usage);

        self.transcript
            .push(transcript::observation_entry(&observation.observations));
        self.rounds += 1;
        self.emit(AgentEvent::Observation {
            observation: observation.observations,
        });

        Ok(State::CompactionCheck)
    }

    /// Compact the full transcript and prepare the continuation seed.
    async fn continue_as_new(&mut self) -> Result<()> {
        self.enter(Phase::Continuing);

        let condensation = self.gateway.compact(self.transcript.entries()).await?;
        self.steps += 1;
        self.usage.record(condensation.usage);

        let result = compaction::splice(condensation.summary, self.transcript.entries());
        let entries_after = result.entries.len();
        self.transcript.replace(result.entries);
        self.emit(AgentEvent::Compacted {
            entries_before: result.entries_before,
            entries_after,
        });

        // Signals delivered while compacting belong to the seed.
        self.inbox.collect();

        // The successor waits for work like any fresh instance; carried
        // pending turns wake it immediately.
        self.epoch += 1;
        self.resume_at = ResumePoint::AwaitTurn;
        tracing::info!(
            epoch = self.epoch,
            entries_before = result.entries_before,
            entries_after,
            "continuing under condensed state"
        );
        self.checkpoint().await;
        self.emit(AgentEvent::Continued { epoch: self.epoch });
        Ok(())
    }

    fn exit(&mut self) -> Outcome {
        self.enter(Phase::Exited);
        let usage = self.usage.total();
        tracing::info!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            total_tokens = usage.total_tokens,
            "conversation exited"
        );
        self.emit(AgentEvent::Exited { usage });
        Outcome::Exited(usage)
    }

    async fn suspend(&mut self) -> Outcome {
        self.enter(Phase::Suspended);
        self.resume_at = ResumePoint::AwaitTurn;
        self.checkpoint().await;
        self.emit(AgentEvent::Suspended);
        Outcome::Suspended
    }

    /// Roll back the failed step and report it.
    fn fail(&mut self, error: &Error) {
        self.enter(Phase::Failed);
        let (entries, records) = self.mark;
        self.transcript.truncate(entries);
        self.usage.truncate(records);
        self.resume_at = ResumePoint::AwaitTurn;

        tracing::error!("conversation step failed: {}", error);
        self.report(error.kind(), error.operation(), error.to_string());
    }

    /// Persistence is best-effort: a failure is reported and the loop goes on.
    async fn persist(&mut self, message: PersistedMessage) {
        match self.gateway.persist(std::slice::from_ref(&message)).await {
            Ok(()) => self.steps += 1,
            Err(e) => {
                tracing::warn!("persist failed, continuing: {}", e);
                self.report(e.kind(), Some(OperationKind::Persist), e.to_string());
            }
        }
    }

    /// Best-effort snapshot write.
    async fn checkpoint(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let snapshot = self.snapshot();
        match store.save(&snapshot).await {
            Ok(()) => {
                tracing::debug!(epoch = self.epoch, "checkpoint saved");
                self.emit(AgentEvent::Checkpointed { epoch: self.epoch });
            }
            Err(e) => {
                tracing::warn!("checkpoint failed: {}", e);
                self.report(FailureKind::TransientInfra, None, e.to_string());
            }
        }
    }

    fn execution_info(&self) -> ExecutionInfo {
        ExecutionInfo {
            conversation_id: self.id.clone(),
            epoch: self.epoch,
            steps: self.steps,
            transcript_entries: self.transcript.len(),
            estimated_tokens: context::estimate_total_tokens(self.transcript.entries()),
        }
    }

    fn mark_step(&mut self) {
        self.mark = (self.transcript.len(), self.usage.len());
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(conversation = %self.id, ?phase, "phase");
        self.phase = phase;
    }

    fn report(&self, kind: FailureKind, operation: Option<OperationKind>, message: String) {
        self.emit(AgentEvent::Failure {
            kind,
            operation,
            message,
        });
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(ConversationEvent {
            conversation_id: self.id.clone(),
            event,
        });
    }
}
