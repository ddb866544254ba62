//! Prompt assembly: pure functions that build the messages shown to the
//! model, with no I/O beyond the one-time template load.

use std::fs;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::interp::BindingSummary;
use crate::llm::ChatMessage;

/// A program-writing/REPL-paradigm system prompt, loaded once at worker
/// start. Falls back to a hardcoded constant describing the
/// iterate/eval/sub-query loop if the configured file is missing or
/// unreadable.
const DEFAULT_ROOT_PROMPT: &str = "\
You are a program-writing assistant. Each turn, you write a short program \
in the sandboxed language available to you. The program is evaluated and \
you receive its stdout, any error, and a summary of the resulting \
variable bindings. Assign a value to `final_answer` when you are done; it \
may recursively call `spawn_subcall(text)` to delegate a sub-question to a \
fresh child session, or `direct_query(text, schema)` for a single \
schema-constrained answer without spawning a child. Keep programs small \
and inspect their output before committing to a final answer.";

const DEFAULT_CHILD_PROMPT: &str = "\
You are a child session spawned to answer one focused sub-question. Write \
small programs the same way a top-level session would: inspect feedback, \
iterate, and assign `final_answer` once you have it. You may spawn further \
sub-calls if your own question decomposes further, subject to the \
remaining depth budget.";

pub struct SystemPromptTemplates {
    root: String,
    child: String,
}

impl SystemPromptTemplates {
    /// Read `root_path`/`child_path` once; any file that can't be read
    /// falls back to the hardcoded default rather than failing startup.
    pub fn load(root_path: Option<&Path>, child_path: Option<&Path>) -> Self {
        let root = root_path
            .and_then(|p| fs::read_to_string(p).ok())
            .unwrap_or_else(|| DEFAULT_ROOT_PROMPT.to_string());
        let child = child_path
            .and_then(|p| fs::read_to_string(p).ok())
            .unwrap_or_else(|| DEFAULT_CHILD_PROMPT.to_string());
        Self { root, child }
    }

    pub fn defaults() -> Self {
        Self {
            root: DEFAULT_ROOT_PROMPT.to_string(),
            child: DEFAULT_CHILD_PROMPT.to_string(),
        }
    }
}

pub fn system_message(depth: u32, templates: &SystemPromptTemplates) -> ChatMessage {
    let text = if depth == 0 { &templates.root } else { &templates.child };
    ChatMessage::system(text.clone())
}

pub fn user_message(
    query: &str,
    context_bytes: usize,
    context_lines: usize,
    context_preview: &str,
) -> ChatMessage {
    #[derive(Serialize)]
    struct UserPayload<'a> {
        query: &'a str,
        context_bytes: usize,
        context_lines: usize,
        context_preview: &'a str,
    }
    let payload = UserPayload {
        query,
        context_bytes,
        context_lines,
        context_preview,
    };
    ChatMessage::user(serde_json::to_string(&payload).expect("UserPayload always serializes"))
}

/// What a feedback message reports. `Skipped` covers an iteration where no
/// program ran at all (e.g. the model replied with empty code); `Nudge`
/// covers the loop-detection warning — both still ride the same structured
/// `eval_status` schema the model already parses for `Stdout`/`Error`.
pub enum StdoutOrError {
    Stdout(String),
    Error(String),
    Skipped(String),
    Nudge(String),
}

pub fn feedback_message(
    outcome: StdoutOrError,
    bindings: &[BindingSummary],
    final_answer_set: bool,
) -> ChatMessage {
    #[derive(Serialize)]
    struct BindingPayload<'a> {
        name: &'a str,
        #[serde(rename = "type")]
        ty: &'a str,
        bytes: usize,
    }
    #[derive(Serialize)]
    struct FeedbackPayload<'a> {
        eval_status: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        stdout: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_output: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<&'a str>,
        bindings: Vec<BindingPayload<'a>>,
        final_answer_set: bool,
    }

    let (eval_status, stdout, error_output, note) = match &outcome {
        StdoutOrError::Stdout(s) => ("ok", Some(s.as_str()), None, None),
        StdoutOrError::Error(e) => ("error", None, Some(e.as_str()), None),
        StdoutOrError::Skipped(msg) => ("skipped", None, None, Some(msg.as_str())),
        StdoutOrError::Nudge(msg) => ("nudge", None, None, Some(msg.as_str())),
    };

    let payload = FeedbackPayload {
        eval_status,
        stdout,
        error_output,
        note,
        bindings: bindings
            .iter()
            .map(|b| BindingPayload {
                name: &b.name,
                ty: &b.ty,
                bytes: b.bytes,
            })
            .collect(),
        final_answer_set,
    };

    ChatMessage::user(serde_json::to_string(&payload).expect("FeedbackPayload always serializes"))
}

pub fn compaction_addendum(preview: &str) -> ChatMessage {
    ChatMessage::user(format!(
        "{{\"compacted\": true, \"history_preview\": {}}}",
        serde_json::to_string(preview).unwrap_or_else(|_| "\"\"".to_string())
    ))
}

pub fn final_answer_unwrap_one_level(value: Value) -> Value {
    if let Value::Object(ref obj) = value {
        if let Some(v) = obj.get("ok") {
            return v.clone();
        }
    }
    value
}
