//! Error taxonomy for the execution engine.
//!
//! Every error that can cross the public API boundary reduces to one of
//! these buckets; no adapter-specific exception type is ever exposed to a
//! caller.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RlmError>;

#[derive(Debug, Error)]
pub enum RlmError {
    /// Rejected before any work started: depth/concurrency limits, an
    /// unknown session id, or a message sent to a busy worker.
    #[error("admission error: {0}")]
    Admission(String),

    /// A configured resource limit was exceeded mid-run.
    #[error("budget exceeded: {0}")]
    Budget(#[from] BudgetExceededError),

    /// The LLM adapter could not be reached or timed out.
    #[error("transport error: {0}")]
    Transport(String),

    /// A response could not be parsed into the shape the engine expects.
    #[error("format error: {0}")]
    Format(String),

    /// The interpreter adapter reported a normal evaluation failure
    /// (syntax/runtime error in the evaluated program).
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// The eval task itself crashed (panicked or was aborted) rather than
    /// returning a normal error outcome.
    #[error("eval task crashed: {0}")]
    EvalCrash(String),

    /// A worker crashed outside of a normal eval-failure path.
    #[error("worker crashed: {0}")]
    WorkerCrash(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Error)]
#[error("{budget_type:?} budget exceeded: {actual} > {limit}")]
pub struct BudgetExceededError {
    pub budget_type: BudgetType,
    pub limit: u64,
    pub actual: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetType {
    Iterations,
    Depth,
    ConcurrentSubcalls,
    EvalTimeout,
    LlmTimeout,
    SubcallTimeout,
    RunTimeout,
}

impl From<serde_json::Error> for RlmError {
    fn from(e: serde_json::Error) -> Self {
        RlmError::Format(e.to_string())
    }
}

impl From<std::io::Error> for RlmError {
    fn from(e: std::io::Error) -> Self {
        RlmError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_error_displays_reason() {
        let err = RlmError::Admission("max depth reached".to_string());
        assert_eq!(err.to_string(), "admission error: max depth reached");
    }

    #[test]
    fn budget_exceeded_display_includes_numbers() {
        let err = BudgetExceededError {
            budget_type: BudgetType::Depth,
            limit: 5,
            actual: 6,
        };
        assert_eq!(err.to_string(), "Depth budget exceeded: 6 > 5");
        let wrapped: RlmError = err.into();
        assert!(wrapped.to_string().contains("budget exceeded"));
    }
}
