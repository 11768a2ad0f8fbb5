mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{RecordingSink, ScriptedReasoner, fast_config, gateway};
use tether_agent::{
    ActionRequest, AgentEvent, ConversationSnapshot, Error, ExecutionInfo, FailureKind,
    MemorySnapshotStore, Orchestrator, Outcome, PersistedMessage, SnapshotStore, ThinkOutput,
    Usage, inbox,
};

fn never_large() -> Arc<dyn tether_agent::HistoryAdvisor> {
    Arc::new(|_: &ExecutionInfo| false)
}

// ===== End to end =====

#[tokio::test]
async fn test_single_turn_answer_then_waits() {
    let reasoner = ScriptedReasoner::new(vec![
        ThinkOutput::answer("simple math", "4").with_usage(Usage::new(12, 3)),
    ]);
    let sink = Arc::new(RecordingSink::default());
    let (tx, inbox) = inbox::channel();
    let mut orchestrator = Orchestrator::new(
        "alice-chat",
        fast_config(),
        gateway(reasoner.clone(), sink.clone()),
        inbox,
    )
    .with_advisor(never_large());
    let mut events = orchestrator.subscribe();

    let task = tokio::spawn(async move {
        let outcome = orchestrator.run().await;
        (orchestrator, outcome)
    });

    tx.enqueue_turn("alice", "What is 2+2?", "t0").unwrap();

    // Wait for the answer to come out
    let answer = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let AgentEvent::Answer { answer } = events.recv().await.unwrap().event {
                return answer;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(answer, "4");

    // The loop is parked waiting for the next turn or an exit
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!task.is_finished());
    assert_eq!(
        sink.messages(),
        vec![
            PersistedMessage::User {
                name: "alice".into(),
                message: "What is 2+2?".into(),
                date: "t0".into(),
            },
            PersistedMessage::Assistant {
                message: "4".into()
            },
        ]
    );

    tx.request_exit().unwrap();
    let (orchestrator, outcome) = task.await.unwrap();
    assert_eq!(outcome.unwrap(), Outcome::Exited(Usage::new(12, 3)));
    assert_eq!(orchestrator.transcript().len(), 2);
    assert_eq!(
        orchestrator.transcript().entries()[0],
        "<user_message name=\"alice\" date=\"t0\">\nWhat is 2+2?\n</user_message>"
    );
    assert_eq!(orchestrator.transcript().entries()[1], "<answer>\n4\n</answer>");
}

// ===== Inbox semantics =====

#[tokio::test]
async fn test_turns_enqueued_mid_round_keep_fifo_order() {
    let reasoner = ScriptedReasoner::new(vec![
        ThinkOutput::answer("t", "first"),
        ThinkOutput::answer("t", "second"),
    ]);
    let sink = Arc::new(RecordingSink::default());
    let (tx, inbox) = inbox::channel();
    let mut orchestrator =
        Orchestrator::new("fifo", fast_config(), gateway(reasoner, sink.clone()), inbox)
            .with_advisor(never_large());
    let mut events = orchestrator.subscribe();

    let task = tokio::spawn(async move { orchestrator.run().await });

    tx.enqueue_turn("u", "A", "t0").unwrap();
    // B and C arrive after A has been folded
    loop {
        if let AgentEvent::TurnReceived { .. } = events.recv().await.unwrap().event {
            break;
        }
    }
    tx.enqueue_turn("u", "B", "t1").unwrap();
    tx.enqueue_turn("u", "C", "t2").unwrap();
    tx.request_exit().unwrap();

    task.await.unwrap().unwrap();

    let users: Vec<String> = sink
        .messages()
        .into_iter()
        .filter_map(|m| match m {
            PersistedMessage::User { message, .. } => Some(message),
            PersistedMessage::Assistant { .. } => None,
        })
        .collect();
    assert_eq!(users, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_exit_and_turn_together_drain_first() {
    let reasoner = ScriptedReasoner::new(vec![ThinkOutput::answer("greet", "hello")]);
    let (tx, inbox) = inbox::channel();
    let mut orchestrator = Orchestrator::new(
        "exit-race",
        fast_config(),
        gateway(reasoner, Arc::default()),
        inbox,
    );

    tx.request_exit().unwrap();
    tx.enqueue_turn("u", "hi", "t0").unwrap();

    assert!(matches!(orchestrator.run().await, Ok(Outcome::Exited(_))));
    assert!(
        orchestrator
            .transcript()
            .entries()
            .iter()
            .any(|e| e.contains("\nhi\n"))
    );
}

// ===== Failure classes =====

#[tokio::test]
async fn test_missing_capability_reaches_observe() {
    let reasoner = ScriptedReasoner::new(vec![
        ThinkOutput::action(
            "try the tool",
            ActionRequest {
                name: "nope".into(),
                reason: "curious".into(),
                input: serde_json::json!({"q": 1}),
            },
        ),
        ThinkOutput::answer("tool missing", "cannot do that"),
    ]);
    let (tx, inbox) = inbox::channel();
    let mut orchestrator = Orchestrator::new(
        "nope",
        fast_config(),
        gateway(reasoner.clone(), Arc::default()),
        inbox,
    )
    .with_advisor(never_large());

    tx.enqueue_turn("u", "use nope", "t0").unwrap();
    tx.request_exit().unwrap();
    assert!(matches!(orchestrator.run().await, Ok(Outcome::Exited(_))));

    let observed = reasoner.observe_inputs.lock().clone();
    assert_eq!(observed.len(), 1);
    let payload: serde_json::Value = serde_json::from_str(&observed[0]).unwrap();
    assert_eq!(payload["name"], "nope");
    assert_eq!(payload["error"], "Capability with name nope not found.");
}

#[tokio::test]
async fn test_think_without_answer_or_action_is_fatal() {
    let reasoner = ScriptedReasoner::new(vec![ThinkOutput {
        thought: "hmm".into(),
        ..Default::default()
    }]);
    let (tx, inbox) = inbox::channel();
    let mut orchestrator = Orchestrator::new(
        "broken",
        fast_config(),
        gateway(reasoner.clone(), Arc::default()),
        inbox,
    );
    let mut events = orchestrator.subscribe();

    tx.enqueue_turn("u", "hi", "t0").unwrap();
    let err = orchestrator.run().await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::ContractViolation);
    assert!(matches!(err, Error::ContractViolation { .. }));

    // No answer or action entry made it into the transcript
    assert_eq!(orchestrator.transcript().len(), 1);
    // Not retried
    assert_eq!(reasoner.think_contexts.lock().len(), 1);

    let kinds: Vec<FailureKind> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|ev| match ev.event {
            AgentEvent::Failure { kind, .. } => Some(kind),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec![FailureKind::ContractViolation]);
}

// ===== Compaction =====

#[tokio::test]
async fn test_compaction_keeps_condensed_plus_last_three() {
    let reasoner = ScriptedReasoner::new(vec![ThinkOutput::action(
        "search",
        ActionRequest {
            name: "web_search".into(),
            reason: "facts".into(),
            input: serde_json::json!("rust"),
        },
    )]);
    let store = Arc::new(MemorySnapshotStore::new());
    let (tx, inbox) = inbox::channel();
    let seed = ConversationSnapshot {
        transcript: (1..=6).map(|i| format!("entry{}", i)).collect(),
        ..ConversationSnapshot::new("compact-me")
    };
    let mut orchestrator = Orchestrator::from_snapshot(
        seed,
        fast_config(),
        gateway(reasoner.clone(), Arc::default()),
        inbox,
    )
    .with_advisor(Arc::new(|info: &ExecutionInfo| info.transcript_entries >= 10))
    .with_store(store.clone());

    tx.enqueue_turn("u", "search", "t0").unwrap();
    assert_eq!(orchestrator.run().await.unwrap(), Outcome::Continued);

    let before = reasoner.compact_inputs.lock()[0].clone();
    assert_eq!(before.len(), 10);

    let (snapshot, _inbox) = orchestrator.hand_off();
    assert_eq!(snapshot.transcript.len(), 4);
    assert_eq!(snapshot.transcript[0], "C");
    assert_eq!(&snapshot.transcript[1..], &before[7..]);
    assert_eq!(snapshot.epoch, 1);

    let stored = store.load("compact-me").await.unwrap().unwrap();
    assert_eq!(stored.transcript, snapshot.transcript);
    // observe + compact
    assert_eq!(stored.total_usage(), Usage::new(12, 3));
}
