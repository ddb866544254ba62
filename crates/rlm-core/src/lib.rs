//! rlm-core: the concurrent execution substrate for recursive LLM program
//! evaluation.
//!
//! An LLM writes a small program each turn; the program is evaluated in a
//! sandboxed interpreter behind the [`interp::InterpreterAdapter`] trait,
//! and the evaluated code can recursively spawn child sessions
//! (`spawn_subcall`) or make one-shot schema-constrained queries
//! (`direct_query`) as function calls back into its own owning
//! [`worker::Worker`]. [`run::Run`] supervises the flat tree of workers
//! spawned for one query, and [`api::RlmEngine`] is the embedder-facing
//! facade tying configuration, adapters, and the trace/event
//! infrastructure in `rlm-trace` together.

pub mod api;
pub mod config;
pub mod error;
pub mod interp;
pub mod llm;
pub mod prompt;
pub mod run;
pub mod supervisor;
pub mod worker;

pub use api::{RlmEngine, RunOpts, RunOutcome, SessionId, SessionOpts};
pub use config::Config;
pub use error::{BudgetExceededError, BudgetType, Result, RlmError};
pub use interp::{Bindings, EvalOutcome, HostCallbacks, InterpreterAdapter, MockInterpreterAdapter, ModelSize};
pub use llm::{ChatMessage, ChatOpts, ChatReply, LlmAdapter, LlmError, MockLlmAdapter, Role, Usage};
pub use prompt::SystemPromptTemplates;
pub use supervisor::EngineSupervisor;
pub use worker::{SessionStatus, WorkerStatus};

/// Apply the engine's configured head/tail truncation to `s`.
pub fn truncate_message(s: &str, head: usize, tail: usize) -> String {
    rlm_trace::truncate(s, head, tail)
}
