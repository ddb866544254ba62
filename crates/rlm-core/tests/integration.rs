//! End-to-end tests for the public `RlmEngine` facade, driving real
//! `Worker`/`Run` machinery behind scripted mock adapters.

use std::time::Duration;

use rlm_core::interp::ScriptedStep;
use rlm_core::llm::ChatReply;
use rlm_core::{
    EngineSupervisor, MockInterpreterAdapter, MockLlmAdapter, ModelSize, RunOpts, SessionOpts,
    SystemPromptTemplates, Usage,
};
use serde_json::json;
use std::sync::Arc;

fn reply(reasoning: &str, code: &str) -> ChatReply {
    ChatReply {
        text: json!({"reasoning": reasoning, "code": code}).to_string(),
        usage: Usage::default(),
    }
}

fn start_engine(
    llm: MockLlmAdapter,
    interp: MockInterpreterAdapter,
) -> rlm_core::RlmEngine {
    EngineSupervisor::start(
        rlm_core::Config::default().with_eval_timeout(Duration::from_secs(5)),
        Arc::new(llm),
        Arc::new(interp),
        SystemPromptTemplates::defaults(),
    )
}

#[tokio::test]
async fn one_shot_run_returns_the_final_answer() {
    let llm = MockLlmAdapter::new().with_reply(reply("answer directly", "final_answer = 7"));
    let interp = MockInterpreterAdapter::new();
    interp.script("final_answer = 7", vec![ScriptedStep::SetFinalAnswer(json!(7))]);

    let engine = start_engine(llm, interp);
    let outcome = engine.run("", "what is three plus four", RunOpts::default()).await.unwrap();
    assert_eq!(outcome.answer, json!(7));
    engine.shutdown();
}

#[tokio::test]
async fn run_iterates_across_multiple_turns_before_answering() {
    let llm = MockLlmAdapter::new()
        .with_reply(reply("think first", "x = 1"))
        .with_reply(reply("now answer", "final_answer = x + 1"));
    let interp = MockInterpreterAdapter::new();
    interp.script("x = 1", vec![ScriptedStep::SetBinding("x".to_string(), json!(1))]);
    interp.script(
        "final_answer = x + 1",
        vec![ScriptedStep::SetFinalAnswer(json!(2))],
    );

    let engine = start_engine(llm, interp);
    let outcome = engine.run("", "count to two", RunOpts::default()).await.unwrap();
    assert_eq!(outcome.answer, json!(2));
    engine.shutdown();
}

#[tokio::test]
async fn spawn_subcall_recurses_into_a_child_worker() {
    let llm = MockLlmAdapter::new()
        .with_reply(reply("delegate", "child = spawn_subcall('sub question')"))
        .with_reply(reply("child answers", "final_answer = 'child done'"))
        .with_reply(reply("use child result", "final_answer = child"));
    let interp = MockInterpreterAdapter::new();
    interp.script(
        "child = spawn_subcall('sub question')",
        vec![ScriptedStep::Subcall {
            text: "sub question".to_string(),
            model_size: ModelSize::Large,
            binding: "child".to_string(),
        }],
    );
    interp.script(
        "final_answer = 'child done'",
        vec![ScriptedStep::SetFinalAnswer(json!("child done"))],
    );
    interp.script(
        "final_answer = child",
        vec![ScriptedStep::SetBinding("final_answer".to_string(), json!("child done"))],
    );

    let engine = start_engine(llm, interp);
    let outcome = engine.run("", "delegate this", RunOpts::default()).await.unwrap();
    assert_eq!(outcome.answer, json!("child done"));
    engine.shutdown();
}

#[tokio::test]
async fn direct_query_returns_a_schema_constrained_value_without_spawning_a_child() {
    let llm = MockLlmAdapter::new()
        .with_reply(reply(
            "ask directly",
            "v = direct_query('pick a number', schema)",
        ))
        .with_reply(reply("use it", "final_answer = v"));
    let interp = MockInterpreterAdapter::new();
    interp.script(
        "v = direct_query('pick a number', schema)",
        vec![ScriptedStep::DirectQuery {
            text: "pick a number".to_string(),
            model_size: ModelSize::Small,
            schema: Some(json!({"type": "integer"})),
            binding: "v".to_string(),
        }],
    );
    interp.script(
        "final_answer = v",
        vec![ScriptedStep::SetBinding("final_answer".to_string(), json!(9))],
    );

    let engine = start_engine(llm, interp);
    let outcome = engine.run("", "pick a number please", RunOpts::default()).await.unwrap();
    assert_eq!(outcome.answer, json!(9));
    engine.shutdown();
}

#[tokio::test]
async fn eval_failure_surfaces_as_a_run_error() {
    let llm = MockLlmAdapter::new().with_reply(reply("break", "raise('boom')"));
    let interp = MockInterpreterAdapter::new();
    interp.script("raise('boom')", vec![ScriptedStep::Fail("boom".to_string())]);

    let engine = start_engine(llm, interp);
    let result = engine.run("", "break it", RunOpts::default()).await;
    // A single eval error alone doesn't end the run; it's reported back to
    // the model as feedback. Since the mock LLM queue is now exhausted, the
    // worker's next turn fails and the whole run surfaces that as an error.
    assert!(result.is_err());
    engine.shutdown();
}

#[tokio::test]
async fn interactive_session_carries_history_across_turns() {
    let llm = MockLlmAdapter::new()
        .with_reply(reply("first turn", "final_answer = 1"))
        .with_reply(reply("second turn", "final_answer = 2"));
    let interp = MockInterpreterAdapter::new();
    interp.script("final_answer = 1", vec![ScriptedStep::SetFinalAnswer(json!(1))]);
    interp.script("final_answer = 2", vec![ScriptedStep::SetFinalAnswer(json!(2))]);

    let engine = start_engine(llm, interp);
    let session = engine.start_session(SessionOpts::default()).await.unwrap();

    let first = engine.send_message(&session, "one", Duration::from_secs(5)).await.unwrap();
    assert_eq!(first, json!(1));
    let second = engine.send_message(&session, "two", Duration::from_secs(5)).await.unwrap();
    assert_eq!(second, json!(2));

    let history = engine.history(&session).await.unwrap();
    assert!(history.iter().any(|m| m.content.contains("one")));
    assert!(history.iter().any(|m| m.content.contains("two")));

    engine.shutdown();
}

#[tokio::test]
async fn depth_budget_rejects_a_subcall_past_the_configured_limit() {
    let llm = MockLlmAdapter::new()
        .with_reply(reply("try to recurse", "child = spawn_subcall('go deeper')"))
        .with_reply(reply("report what happened", "final_answer = child"));
    let interp = MockInterpreterAdapter::new();
    interp.script(
        "child = spawn_subcall('go deeper')",
        vec![ScriptedStep::CatchSubcall {
            text: "go deeper".to_string(),
            model_size: ModelSize::Large,
            binding: "child".to_string(),
        }],
    );
    interp.script(
        "final_answer = child",
        vec![ScriptedStep::SetBinding(
            "final_answer".to_string(),
            json!({"error": "maximum recursion depth (0) exceeded"}),
        )],
    );

    let engine = EngineSupervisor::start(
        rlm_core::Config::default()
            .with_eval_timeout(Duration::from_secs(5))
            .with_max_depth(0),
        Arc::new(llm),
        Arc::new(interp),
        SystemPromptTemplates::defaults(),
    );

    let outcome = engine.run("", "recurse past the limit", RunOpts::default()).await.unwrap();
    assert_eq!(outcome.answer, json!({"error": "maximum recursion depth (0) exceeded"}));
    engine.shutdown();
}

#[tokio::test]
async fn zero_concurrent_subcalls_rejects_a_direct_query_without_contacting_the_llm_for_it() {
    let llm = Arc::new(
        MockLlmAdapter::new()
            .with_reply(reply("ask directly", "v = direct_query('pick a number', schema)"))
            .with_reply(reply("report what happened", "final_answer = v")),
    );
    let interp = MockInterpreterAdapter::new();
    interp.script(
        "v = direct_query('pick a number', schema)",
        vec![ScriptedStep::CatchDirectQuery {
            text: "pick a number".to_string(),
            model_size: ModelSize::Small,
            schema: Some(json!({"type": "integer"})),
            binding: "v".to_string(),
        }],
    );
    interp.script(
        "final_answer = v",
        vec![ScriptedStep::SetBinding(
            "final_answer".to_string(),
            json!({"error": "max concurrent subcalls (0) reached"}),
        )],
    );

    let engine = EngineSupervisor::start(
        rlm_core::Config::default()
            .with_eval_timeout(Duration::from_secs(5))
            .with_max_concurrent_subcalls(0),
        llm.clone(),
        Arc::new(interp),
        SystemPromptTemplates::defaults(),
    );

    let outcome = engine.run("", "pick a number please", RunOpts::default()).await.unwrap();
    assert_eq!(outcome.answer, json!({"error": "max concurrent subcalls (0) reached"}));
    // The rejection happens before any LLM call is made for the direct
    // query itself: only the two scripted root-turn replies were consumed.
    assert_eq!(llm.request_count(), 2);
    engine.shutdown();
}

#[tokio::test]
async fn max_iterations_budget_terminates_the_run_with_an_exact_error() {
    let llm = MockLlmAdapter::new().with_reply(reply("keep going", "x = 1"));
    let interp = MockInterpreterAdapter::new();
    interp.script("x = 1", vec![ScriptedStep::SetBinding("x".to_string(), json!(1))]);

    let engine = EngineSupervisor::start(
        rlm_core::Config::default()
            .with_eval_timeout(Duration::from_secs(5))
            .with_max_iterations(1),
        Arc::new(llm),
        Arc::new(interp),
        SystemPromptTemplates::defaults(),
    );

    let result = engine.run("", "never finish", RunOpts::default()).await;
    assert_eq!(result.unwrap_err(), "maximum iterations (1) reached");
    engine.shutdown();
}
