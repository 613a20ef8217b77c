//! Interrupt and resume across whole runs

mod common;

use common::{init_tracing, Counter};
use serde_json::{json, Value};
use stategraph_core::{
    interrupt, CheckpointSaver, CompiledGraph, GraphError, InMemoryCheckpointSaver, PendingKind,
    Resume, RunConfig, RunOutcome, StateGraph, END,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn age_graph() -> CompiledGraph {
    let mut graph = StateGraph::new();
    graph.add_node("get_age", |_| async {
        let mut prompt = "Please enter your age".to_string();
        loop {
            let answer = interrupt(json!(prompt))?;
            let text = answer.as_str().unwrap_or_default().to_string();
            match text.parse::<i64>() {
                Ok(age) if age >= 0 => return Ok(json!({ "age": age })),
                Ok(_) => {
                    prompt = format!("'{}' is negative. Please enter a non-negative age.", text)
                }
                Err(_) => {
                    prompt = format!("'{}' is not a number. Please enter your age in digits.", text)
                }
            }
        }
    });
    graph.set_entry("get_age");
    graph.add_edge("get_age", END);
    graph.compile().unwrap()
}

fn payload(outcome: &RunOutcome) -> Value {
    outcome
        .interrupted()
        .and_then(|i| i.payload())
        .cloned()
        .unwrap_or(Value::Null)
}

#[tokio::test]
async fn test_validating_node_reprompts_until_valid() {
    init_tracing();
    let graph = age_graph();
    let config = RunConfig::new("age");

    let first = graph.invoke(json!({}), &config).await.unwrap();
    assert_eq!(payload(&first), json!("Please enter your age"));

    let second = graph.resume(&config, "not a number").await.unwrap();
    assert_eq!(
        payload(&second),
        json!("'not a number' is not a number. Please enter your age in digits.")
    );

    let third = graph.resume(&config, "-10").await.unwrap();
    assert_eq!(payload(&third), json!("'-10' is negative. Please enter a non-negative age."));
    assert_eq!(third.interrupted().unwrap().node_id(), Some("get_age"));

    let done = graph.resume(&config, "25").await.unwrap();
    assert_eq!(done, RunOutcome::Complete(json!({ "age": 25 })));
}

#[tokio::test]
async fn test_replay_count_and_answer_order() {
    let executions = Counter::new();
    let counter = executions.clone();

    let mut graph = StateGraph::new();
    graph.add_node("survey", move |_| {
        let counter = counter.clone();
        async move {
            counter.hit();
            let mut answers = Vec::new();
            for question in ["q1", "q2", "q3"] {
                answers.push(interrupt(question)?);
            }
            Ok(json!({ "answers": answers }))
        }
    });
    graph.set_entry("survey");
    graph.add_edge("survey", END);
    let graph = graph.compile().unwrap();
    let config = RunConfig::new("survey");

    let mut outcome = graph.invoke(json!({}), &config).await.unwrap();
    for (expected_prompt, answer) in [("q1", "a"), ("q2", "b"), ("q3", "c")] {
        assert_eq!(payload(&outcome), json!(expected_prompt));
        outcome = graph.resume(&config, answer).await.unwrap();
    }

    assert_eq!(outcome, RunOutcome::Complete(json!({ "answers": ["a", "b", "c"] })));
    assert_eq!(executions.get(), 4);
}

#[tokio::test]
async fn test_pending_entry_records_call_index_and_attempt() {
    let graph = age_graph();
    let config = RunConfig::new("record");

    graph.invoke(json!({}), &config).await.unwrap();
    graph.resume(&config, "abc").await.unwrap();

    let snapshot = graph.get_state("record", false).await.unwrap();
    assert_eq!(snapshot.next, vec!["get_age".to_string()]);
    let task = &snapshot.pending_tasks[0];
    assert_eq!(task.node_id, "get_age");
    assert_eq!(task.call_index, 1);
    assert_eq!(task.attempt, 2);
    assert_eq!(task.kind, PendingKind::Interrupt);
}

#[tokio::test]
async fn test_resume_without_pending_is_rejected_without_mutation() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let mut graph = StateGraph::new();
    graph.add_node("work", |_| async { Ok(json!({ "done": true })) });
    graph.set_entry("work");
    graph.add_edge("work", END);
    let graph = graph.compile().unwrap().with_checkpointer(saver.clone());

    // Unknown thread
    let err = graph.resume(&RunConfig::new("fresh"), "x").await.unwrap_err();
    assert!(matches!(err, GraphError::InvalidResumeState(_)));
    assert_eq!(saver.checkpoint_count().await, 0);

    // Completed thread
    let config = RunConfig::new("done");
    graph.invoke(json!({}), &config).await.unwrap();
    let before = saver.checkpoint_count().await;
    let state_before = graph.get_state("done", false).await.unwrap();

    let err = graph.resume(&config, "x").await.unwrap_err();
    assert!(matches!(err, GraphError::InvalidResumeState(_)));
    assert_eq!(saver.checkpoint_count().await, before);
    assert_eq!(graph.get_state("done", false).await.unwrap(), state_before);
}

#[tokio::test]
async fn test_interrupt_outside_node() {
    assert!(matches!(interrupt(json!("hi")), Err(GraphError::InterruptOutsideNode)));
}

fn fork_graph() -> CompiledGraph {
    let mut graph = StateGraph::new();
    graph.add_node("fork", |_| async { Ok(json!({ "forked": true })) });
    graph.add_node("left", |_| async {
        let answer = interrupt("left?")?;
        Ok(json!({ "left": answer }))
    });
    graph.add_node("right", |_| async {
        let answer = interrupt("right?")?;
        Ok(json!({ "right": answer }))
    });
    graph.add_node("join", |state: Value| async move {
        Ok(json!({ "joined": format!("{}+{}", state["left"], state["right"]) }))
    });
    graph.set_entry("fork");
    graph.add_edge("fork", "left");
    graph.add_edge("fork", "right");
    graph.add_edge("left", "join");
    graph.add_edge("right", "join");
    graph.add_edge("join", END);
    graph.compile().unwrap()
}

#[tokio::test]
async fn test_parallel_pending_nodes_resumed_by_node() {
    let graph = fork_graph();
    let config = RunConfig::new("fork");

    let outcome = graph.invoke(json!({}), &config).await.unwrap();
    let interrupted = outcome.interrupted().unwrap();
    let pending: Vec<&str> = interrupted.interrupts.iter().map(|i| i.node_id.as_str()).collect();
    assert_eq!(pending, vec!["left", "right"]);
    assert_eq!(interrupted.state, json!({ "forked": true }));

    // A single value is ambiguous with two pending nodes
    let err = graph.resume(&config, "both").await.unwrap_err();
    assert!(matches!(err, GraphError::InvalidResumeState(_)));

    let outcome = graph
        .resume(&config, BTreeMap::from([("left".to_string(), json!("L"))]))
        .await
        .unwrap();
    let interrupted = outcome.interrupted().unwrap();
    assert_eq!(interrupted.node_id(), Some("right"));
    assert_eq!(interrupted.payload(), Some(&json!("right?")));
    assert_eq!(interrupted.state["left"], json!("L"));

    let outcome = graph.resume(&config, Resume::Value(json!("R"))).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Complete(json!({
            "forked": true,
            "left": "L",
            "right": "R",
            "joined": "\"L\"+\"R\"",
        }))
    );
}

#[tokio::test]
async fn test_unanswered_interrupt_stays_pending_on_continue() {
    let graph = age_graph();
    let config = RunConfig::new("continue");

    graph.invoke(json!({}), &config).await.unwrap();
    let again = graph.invoke(Value::Null, &config).await.unwrap();
    assert_eq!(payload(&again), json!("Please enter your age"));

    let done = graph.resume(&config, "40").await.unwrap();
    assert_eq!(done.state()["age"], json!(40));
}

#[tokio::test]
async fn test_threads_are_isolated() {
    let graph = age_graph();
    let alice = RunConfig::new("alice");
    let bob = RunConfig::new("bob");

    let (a, b) = tokio::join!(graph.invoke(json!({}), &alice), graph.invoke(json!({}), &bob));
    assert!(a.unwrap().is_interrupted());
    assert!(b.unwrap().is_interrupted());

    let (a, b) = tokio::join!(graph.resume(&alice, "31"), graph.resume(&bob, "47"));
    assert_eq!(a.unwrap().state()["age"], json!(31));
    assert_eq!(b.unwrap().state()["age"], json!(47));
}

#[tokio::test]
async fn test_same_thread_calls_serialize() {
    use stategraph_core::{StateSchema, SumReducer};

    let schema = StateSchema::new().with_reducer("total", SumReducer);
    let mut graph = StateGraph::new().with_schema(schema);
    graph.add_node("count", |_| async {
        tokio::task::yield_now().await;
        Ok(json!({ "total": 1 }))
    });
    graph.set_entry("count");
    graph.add_edge("count", END);
    let graph = graph.compile().unwrap();
    let config = RunConfig::new("shared");

    let (first, second) = tokio::join!(
        graph.invoke(json!({}), &config),
        graph.invoke(json!({}), &config)
    );
    first.unwrap();
    second.unwrap();

    let snapshot = graph.get_state("shared", false).await.unwrap();
    assert_eq!(snapshot.values["total"], json!(2));

    let history = graph.get_state_history("shared").await.unwrap();
    let steps: Vec<u64> = history.iter().map(|s| s.step_seq).collect();
    assert_eq!(steps, vec![4, 3, 2, 1]);
}

#[tokio::test]
async fn test_corrupt_thread_does_not_affect_others() {
    let saver = Arc::new(InMemoryCheckpointSaver::new());
    let graph = age_graph().with_checkpointer(saver.clone());

    saver
        .append_raw(
            &stategraph_core::CheckpointConfig::new("broken"),
            br#"{"thread_id": "broken", "step_seq": 1}"#.to_vec(),
        )
        .await;

    let err = graph.invoke(json!({}), &RunConfig::new("broken")).await.unwrap_err();
    assert!(matches!(err, GraphError::CheckpointCorruption { ref thread_id, .. } if thread_id == "broken"));
    assert!(matches!(
        graph.get_state("broken", false).await,
        Err(GraphError::CheckpointCorruption { .. })
    ));

    let outcome = graph.invoke(json!({}), &RunConfig::new("healthy")).await.unwrap();
    assert!(outcome.is_interrupted());
    assert!(saver
        .get_latest(&stategraph_core::CheckpointConfig::new("healthy"))
        .await
        .unwrap()
        .is_some());
}
