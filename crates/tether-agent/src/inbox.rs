//! Mailbox for inbound user turns and exit requests.
//!
//! External callers hold a cloneable [`InboxSender`]; the orchestrator owns the
//! single [`Inbox`] consumer and merges delivered signals only at its own
//! suspension points and loop-top checks.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A user turn waiting to be folded into the transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTurn {
    pub name: String,
    pub message: String,
    pub timestamp: String,
}

impl PendingTurn {
    pub fn new(
        name: impl Into<String>,
        message: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            timestamp: timestamp.into(),
        }
    }
}

/// Signals delivered from outside the loop
#[derive(Debug, Clone, PartialEq, Eq)]
enum Signal {
    EnqueueTurn(PendingTurn),
    RequestExit,
}

/// Why [`Inbox::wait_for_work`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// A turn is pending or exit was requested
    Work,
    /// The host asked the conversation to suspend
    Cancelled,
}

/// Cloneable producer side of a conversation's inbox.
#[derive(Debug, Clone)]
pub struct InboxSender {
    tx: mpsc::UnboundedSender<Signal>,
}

impl InboxSender {
    /// Enqueue a user turn. Fails only if the conversation is gone.
    pub fn enqueue_turn(
        &self,
        name: impl Into<String>,
        message: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Result<()> {
        self.send(Signal::EnqueueTurn(PendingTurn::new(name, message, timestamp)))
    }

    /// Ask the conversation to finish once no turn is pending. Idempotent.
    pub fn request_exit(&self) -> Result<()> {
        self.send(Signal::RequestExit)
    }

    /// Whether the consuming side has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, signal: Signal) -> Result<()> {
        self.tx.send(signal).map_err(|_| Error::Closed)
    }
}

/// Consumer side of a conversation's inbox, owned by the orchestrator.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Signal>,
    pending: VecDeque<PendingTurn>,
    exit_requested: bool,
}

/// Create a connected sender/inbox pair
pub fn channel() -> (InboxSender, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        InboxSender { tx },
        Inbox {
            rx,
            pending: VecDeque::new(),
            exit_requested: false,
        },
    )
}

impl Inbox {
    /// Put turns carried over from a snapshot ahead of anything delivered since.
    pub fn seed(&mut self, turns: Vec<PendingTurn>) {
        for turn in turns.into_iter().rev() {
            self.pending.push_front(turn);
        }
    }

    /// Merge every signal delivered so far without blocking.
    pub fn collect(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(signal) => self.apply(signal),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.on_disconnect();
                    break;
                }
            }
        }
    }

    /// Suspend until a turn is pending or exit has been requested.
    ///
    /// Returns immediately if there is already work. Cancellation is only
    /// honoured while no work is available.
    pub async fn wait_for_work(&mut self, cancel: &CancellationToken) -> Wakeup {
        loop {
            self.collect();
            if self.has_work() {
                return Wakeup::Work;
            }

            tokio::select! {
                biased;
                signal = self.rx.recv() => match signal {
                    Some(signal) => self.apply(signal),
                    None => self.on_disconnect(),
                },
                _ = cancel.cancelled() => return Wakeup::Cancelled,
            }
        }
    }

    pub fn has_work(&self) -> bool {
        !self.pending.is_empty() || self.exit_requested
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Take the oldest pending turn
    pub fn pop_turn(&mut self) -> Option<PendingTurn> {
        self.pending.pop_front()
    }

    /// Oldest pending turn without removing it
    pub fn peek_turn(&self) -> Option<&PendingTurn> {
        self.pending.front()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingTurn> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Move every merged pending turn out, oldest first
    pub fn take_pending(&mut self) -> Vec<PendingTurn> {
        self.pending.drain(..).collect()
    }

    fn apply(&mut self, signal: Signal) {
        match signal {
            Signal::EnqueueTurn(turn) => {
                tracing::debug!(name = %turn.name, "turn enqueued");
                self.pending.push_back(turn);
            }
            Signal::RequestExit => {
                if !self.exit_requested {
                    tracing::debug!("exit requested");
                }
                self.exit_requested = true;
            }
        }
    }

    /// With every sender gone nobody can request exit any more; treat it as one.
    fn on_disconnect(&mut self) {
        if !self.exit_requested {
            tracing::warn!("all inbox senders dropped, treating as exit request");
        }
        self.exit_requested = true;
    }
}
