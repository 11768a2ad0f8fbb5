//! Host for many concurrent conversations.
//!
//! The runtime owns the snapshot store and the shared collaborators. Each
//! conversation runs on its own task; when an orchestrator asks to continue
//! under a condensed state, the runtime rebuilds it in-process from the
//! hand-off snapshot, keeping the same inbox so no signal is lost.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::events::ConversationEvent;
use crate::gateway::OperationGateway;
use crate::inbox::{self, Inbox, InboxSender};
use crate::operations::{HistoryAdvisor, HistoryThreshold};
use crate::orchestrator::{Orchestrator, Outcome};
use crate::snapshot::{self, ConversationSnapshot, SnapshotStore};
use crate::usage::Usage;

/// What happens when a conversation step fails fatally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// End the conversation with the error. Its last snapshot is kept.
    #[default]
    Abort,
    /// Roll back the failed step and wait for the next turn, giving up after
    /// `max_consecutive` failures without a completed round in between.
    Resume { max_consecutive: u32 },
}

/// How a conversation task finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Exited(Usage),
    Suspended,
}

/// A running conversation
pub struct ConversationHandle {
    id: String,
    sender: InboxSender,
    task: JoinHandle<Result<Completion>>,
}

impl ConversationHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// A sender for this conversation's inbox
    pub fn sender(&self) -> InboxSender {
        self.sender.clone()
    }

    pub fn enqueue_turn(
        &self,
        name: impl Into<String>,
        message: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Result<()> {
        self.sender.enqueue_turn(name, message, timestamp)
    }

    pub fn request_exit(&self) -> Result<()> {
        self.sender.request_exit()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task immediately, without a checkpoint. The last stored
    /// snapshot is what a later `resume` sees.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the conversation to exit, suspend or fail
    pub async fn join(self) -> Result<Completion> {
        self.task.await.map_err(|e| Error::Task(e.to_string()))?
    }
}

type Registry = Arc<Mutex<HashMap<String, InboxSender>>>;

/// Spawns and supervises conversations
pub struct Runtime {
    config: OrchestratorConfig,
    gateway: OperationGateway,
    advisor: Arc<dyn HistoryAdvisor>,
    store: Arc<dyn SnapshotStore>,
    failure_policy: FailurePolicy,
    events: broadcast::Sender<ConversationEvent>,
    shutdown: CancellationToken,
    running: Registry,
}

impl Runtime {
    pub fn new(
        config: OrchestratorConfig,
        gateway: OperationGateway,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let advisor = Arc::new(HistoryThreshold::new(config.history.clone()));
        let (events, _) = broadcast::channel(1024);
        Self {
            config,
            gateway,
            advisor,
            store,
            failure_policy: FailurePolicy::default(),
            events,
            shutdown: CancellationToken::new(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn HistoryAdvisor>) -> Self {
        self.advisor = advisor;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Events from every conversation this runtime hosts
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Inbox sender for a running conversation
    pub fn sender(&self, conversation_id: &str) -> Option<InboxSender> {
        self.running.lock().get(conversation_id).cloned()
    }

    /// Ids of the conversations currently running
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.running.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Start a conversation under a fresh id
    pub async fn start_new(&self) -> Result<ConversationHandle> {
        self.start(uuid::Uuid::new_v4().to_string()).await
    }

    /// Start `conversation_id`, picking up its stored snapshot if it has one.
    pub async fn start(&self, conversation_id: impl Into<String>) -> Result<ConversationHandle> {
        let conversation_id = conversation_id.into();
        snapshot::validate_conversation_id(&conversation_id)?;
        let snapshot = self
            .store
            .load(&conversation_id)
            .await?
            .unwrap_or_else(|| ConversationSnapshot::new(conversation_id.clone()));
        self.spawn(snapshot)
    }

    /// Restart a conversation from its stored snapshot; fails if there is none.
    pub async fn resume(&self, conversation_id: &str) -> Result<ConversationHandle> {
        let snapshot = self
            .store
            .load(conversation_id)
            .await?
            .ok_or_else(|| Error::Snapshot(format!("no snapshot for {}", conversation_id)))?;
        self.spawn(snapshot)
    }

    /// Restart every stored conversation that is not already running.
    pub async fn resume_all(&self) -> Result<Vec<ConversationHandle>> {
        let mut handles = Vec::new();
        for info in self.store.list().await? {
            if self.sender(&info.conversation_id).is_some() {
                continue;
            }
            match self.resume(&info.conversation_id).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    tracing::warn!("Failed to resume {}: {}", info.conversation_id, e);
                }
            }
        }
        tracing::info!(count = handles.len(), "resumed conversations");
        Ok(handles)
    }

    /// Ask every conversation to suspend at its next suspension point.
    ///
    /// Conversations mid-round finish the round first. Each one checkpoints
    /// before its task ends, so all of them can be resumed later. Shutdown is
    /// final: starting or resuming afterwards fails with [`Error::ShutDown`].
    pub fn shutdown(&self) {
        tracing::info!("suspending all conversations");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn spawn(&self, snapshot: ConversationSnapshot) -> Result<ConversationHandle> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        let id = snapshot.conversation_id.clone();
        let (sender, inbox) = inbox::channel();
        {
            let mut running = self.running.lock();
            if running.get(&id).is_some_and(|tx| !tx.is_closed()) {
                return Err(Error::AlreadyRunning(id));
            }
            running.insert(id.clone(), sender.clone());
        }

        let driver = Driver {
            id: id.clone(),
            config: self.config.clone(),
            gateway: self.gateway.clone(),
            advisor: Arc::clone(&self.advisor),
            store: Arc::clone(&self.store),
            failure_policy: self.failure_policy,
            events: self.events.clone(),
            shutdown: self.shutdown.child_token(),
            running: Arc::clone(&self.running),
        };
        let span = tracing::info_span!("conversation", id = %id);
        let task = tokio::spawn(driver.drive(snapshot, inbox).instrument(span));

        Ok(ConversationHandle { id, sender, task })
    }
}

/// Everything one conversation task needs, detached from the runtime
struct Driver {
    id: String,
    config: OrchestratorConfig,
    gateway: OperationGateway,
    advisor: Arc<dyn HistoryAdvisor>,
    store: Arc<dyn SnapshotStore>,
    failure_policy: FailurePolicy,
    events: broadcast::Sender<ConversationEvent>,
    shutdown: CancellationToken,
    running: Registry,
}

impl Driver {
    async fn drive(self, mut snapshot: ConversationSnapshot, mut inbox: Inbox) -> Result<Completion> {
        tracing::info!(epoch = snapshot.epoch, "conversation started");
        let mut failures = 0u32;

        loop {
            let mut orchestrator = self.build(snapshot, inbox);
            match orchestrator.run().await {
                Ok(Outcome::Exited(usage)) => {
                    if let Err(e) = self.store.remove(&self.id).await {
                        tracing::warn!("Failed to remove snapshot: {}", e);
                    }
                    self.unregister();
                    return Ok(Completion::Exited(usage));
                }
                Ok(Outcome::Continued) => {
                    failures = 0;
                    (snapshot, inbox) = orchestrator.hand_off();
                }
                Ok(Outcome::Suspended) => {
                    self.unregister();
                    return Ok(Completion::Suspended);
                }
                Err(e) => {
                    if orchestrator.rounds() > 0 {
                        failures = 0;
                    }
                    failures += 1;

                    if self.should_resume(failures) {
                        tracing::warn!(
                            "Resuming after failure ({} consecutive): {}",
                            failures,
                            e
                        );
                        (snapshot, inbox) = orchestrator.hand_off();
                        continue;
                    }

                    // Keep the rolled-back state so the conversation can be
                    // restarted by hand.
                    if let Err(save_err) = self.store.save(&orchestrator.snapshot()).await {
                        tracing::warn!("Failed to save snapshot after failure: {}", save_err);
                    }
                    self.unregister();
                    return Err(e);
                }
            }
        }
    }

    fn build(&self, snapshot: ConversationSnapshot, inbox: Inbox) -> Orchestrator {
        Orchestrator::from_snapshot(snapshot, self.config.clone(), self.gateway.clone(), inbox)
            .with_advisor(Arc::clone(&self.advisor))
            .with_store(Arc::clone(&self.store))
            .with_events(self.events.clone())
            .with_cancel(self.shutdown.clone())
    }

    fn should_resume(&self, failures: u32) -> bool {
        match self.failure_policy {
            FailurePolicy::Abort => false,
            FailurePolicy::Resume { max_consecutive } => {
                failures <= max_consecutive && !self.shutdown.is_cancelled()
            }
        }
    }

    fn unregister(&self) {
        self.running.lock().remove(&self.id);
    }
}
