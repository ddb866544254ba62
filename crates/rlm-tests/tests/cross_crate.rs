//! Cross-crate integration tests: `rlm-core`'s engine wired against a real
//! `rlm-trace` event bus, trace registry and durable JSONL store, verifying
//! the two crates cooperate the way `rlm-core::supervisor` assembles them.

use std::sync::Arc;
use std::time::Duration;

use rlm_core::interp::ScriptedStep;
use rlm_core::llm::ChatReply;
use rlm_core::{EngineSupervisor, MockInterpreterAdapter, MockLlmAdapter, RunOpts, SystemPromptTemplates, Usage};
use serde_json::json;

fn reply(reasoning: &str, code: &str) -> ChatReply {
    ChatReply {
        text: json!({"reasoning": reasoning, "code": code}).to_string(),
        usage: Usage::default(),
    }
}

#[tokio::test]
async fn a_run_appends_its_trace_events_to_the_registry() {
    let llm = MockLlmAdapter::new().with_reply(reply("answer directly", "final_answer = 5"));
    let interp = MockInterpreterAdapter::new();
    interp.script("final_answer = 5", vec![ScriptedStep::SetFinalAnswer(json!(5))]);

    let engine = EngineSupervisor::start(
        rlm_core::Config::default().with_eval_timeout(Duration::from_secs(5)),
        Arc::new(llm),
        Arc::new(interp),
        SystemPromptTemplates::defaults(),
    );

    let outcome = engine.run("", "five please", RunOpts::default()).await.unwrap();

    // Trace events are appended asynchronously off the "runs" broadcast
    // topic; give the subscriber task a moment to drain the last few.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let run_id: rlm_trace::RunId = outcome.run_id.clone().into();
    let log = engine.trace_registry().get(&run_id);
    assert!(log.is_some(), "expected a trace log for the completed run");
    let events = log.unwrap().events();
    assert!(events.iter().any(|e| matches!(e.kind, rlm_trace::TraceEventKind::TurnComplete)));

    engine.shutdown();
}

#[tokio::test]
async fn durable_store_persists_events_past_an_in_memory_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("traces.jsonl");

    let llm = MockLlmAdapter::new().with_reply(reply("answer directly", "final_answer = 11"));
    let interp = MockInterpreterAdapter::new();
    interp.script("final_answer = 11", vec![ScriptedStep::SetFinalAnswer(json!(11))]);

    let engine = EngineSupervisor::start_with_durable_store(
        rlm_core::Config::default().with_eval_timeout(Duration::from_secs(5)),
        Arc::new(llm),
        Arc::new(interp),
        SystemPromptTemplates::defaults(),
        Some(&store_path),
    );

    let outcome = engine.run("", "eleven please", RunOpts::default()).await.unwrap();
    assert_eq!(outcome.answer, json!(11));

    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.shutdown();

    let persisted = std::fs::read_to_string(&store_path).unwrap();
    assert!(!persisted.trim().is_empty(), "expected at least one persisted trace line");
    assert!(persisted.contains(&outcome.run_id));
}

#[tokio::test]
async fn event_bus_fans_out_to_multiple_subscribers() {
    let llm = MockLlmAdapter::new().with_reply(reply("answer directly", "final_answer = 1"));
    let interp = MockInterpreterAdapter::new();
    interp.script("final_answer = 1", vec![ScriptedStep::SetFinalAnswer(json!(1))]);

    let engine = EngineSupervisor::start(
        rlm_core::Config::default().with_eval_timeout(Duration::from_secs(5)),
        Arc::new(llm),
        Arc::new(interp),
        SystemPromptTemplates::defaults(),
    );

    let mut extra_subscriber = engine.event_bus().subscribe("runs");

    let _ = engine.run("", "one please", RunOpts::default()).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), extra_subscriber.recv())
        .await
        .expect("subscriber should see at least one event before timing out");
    assert!(received.is_some());

    engine.shutdown();
}
