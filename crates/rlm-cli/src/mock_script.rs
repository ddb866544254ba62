//! Loads a JSON-scripted conversation for `--mock` runs.
//!
//! Absent a real LLM vendor client or sandboxed interpreter, the CLI drives
//! the engine with [`rlm_core::MockLlmAdapter`] and
//! [`rlm_core::MockInterpreterAdapter`] queued from a script file. Each turn
//! pairs the program text the mock LLM "writes" with the steps the mock
//! interpreter runs when it sees that exact program, so a whole session can
//! be scripted and replayed without a live backend.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rlm_core::interp::ScriptedStep as CoreStep;
use rlm_core::{ModelSize, MockInterpreterAdapter, MockLlmAdapter};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct MockScript {
    pub turns: Vec<MockTurn>,
}

#[derive(Debug, Deserialize)]
pub struct MockTurn {
    #[serde(default)]
    pub reasoning: String,
    pub code: String,
    #[serde(default)]
    pub steps: Vec<MockStep>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MockStep {
    SetFinalAnswer { value: Value },
    SetBinding { name: String, value: Value },
    Print { text: String },
    Subcall { text: String, #[serde(default)] small: bool, binding: String },
    DirectQuery {
        text: String,
        #[serde(default)]
        small: bool,
        #[serde(default)]
        schema: Option<Value>,
        binding: String,
    },
    Fail { reason: String },
}

impl MockStep {
    fn into_core(self) -> CoreStep {
        match self {
            MockStep::SetFinalAnswer { value } => CoreStep::SetFinalAnswer(value),
            MockStep::SetBinding { name, value } => CoreStep::SetBinding(name, value),
            MockStep::Print { text } => CoreStep::Print(text),
            MockStep::Subcall { text, small, binding } => CoreStep::Subcall {
                text,
                model_size: model_size(small),
                binding,
            },
            MockStep::DirectQuery { text, small, schema, binding } => CoreStep::DirectQuery {
                text,
                model_size: model_size(small),
                schema,
                binding,
            },
            MockStep::Fail { reason } => CoreStep::Fail(reason),
        }
    }
}

fn model_size(small: bool) -> ModelSize {
    if small {
        ModelSize::Small
    } else {
        ModelSize::Large
    }
}

impl MockScript {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read mock script: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse mock script: {}", path.display()))
    }

    /// Build adapters queued to play back exactly this script: one LLM
    /// reply and one registered interpreter program per turn, in order.
    pub fn build_adapters(self) -> (Arc<MockLlmAdapter>, Arc<MockInterpreterAdapter>) {
        let interp = MockInterpreterAdapter::new();
        let mut llm = MockLlmAdapter::new();
        for turn in self.turns {
            let reply_json = serde_json::json!({
                "reasoning": turn.reasoning,
                "code": turn.code,
            });
            llm = llm.with_text(reply_json.to_string());
            interp.script(turn.code, turn.steps.into_iter().map(MockStep::into_core).collect());
        }
        (Arc::new(llm), Arc::new(interp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_turn_script() {
        let json = r#"{
            "turns": [
                { "reasoning": "answer directly", "code": "final_answer = 42",
                  "steps": [{"op": "set_final_answer", "value": 42}] }
            ]
        }"#;
        let script: MockScript = serde_json::from_str(json).unwrap();
        assert_eq!(script.turns.len(), 1);
        assert_eq!(script.turns[0].code, "final_answer = 42");
    }

    #[test]
    fn build_adapters_queues_one_reply_per_turn() {
        let json = r#"{
            "turns": [
                { "reasoning": "a", "code": "final_answer = 1",
                  "steps": [{"op": "set_final_answer", "value": 1}] },
                { "reasoning": "b", "code": "final_answer = 2",
                  "steps": [{"op": "set_final_answer", "value": 2}] }
            ]
        }"#;
        let script: MockScript = serde_json::from_str(json).unwrap();
        let (llm, _interp) = script.build_adapters();
        assert_eq!(llm.request_count(), 0);
    }
}
