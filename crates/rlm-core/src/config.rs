//! Engine-wide configuration, cloned onto every run.

use std::collections::HashMap;
use std::time::Duration;

/// Bounds and timeouts shared by every run started from one [`Config`].
#[derive(Debug, Clone)]
pub struct Config {
    pub model_large: String,
    pub model_small: String,
    pub max_iterations: u32,
    pub max_depth: u32,
    pub max_concurrent_subcalls: u32,
    pub truncation_head: usize,
    pub truncation_tail: usize,
    pub eval_timeout: Duration,
    pub llm_timeout: Duration,
    pub subcall_timeout: Duration,
    pub context_windows: HashMap<String, u32>,
    pub capture_trace: bool,
}

impl Default for Config {
    fn default() -> Self {
        let mut context_windows = HashMap::new();
        context_windows.insert("large".to_string(), 128_000);
        context_windows.insert("small".to_string(), 32_000);

        Self {
            model_large: "large".to_string(),
            model_small: "small".to_string(),
            max_iterations: 20,
            max_depth: 5,
            max_concurrent_subcalls: 3,
            truncation_head: 4_000,
            truncation_tail: 2_000,
            eval_timeout: Duration::from_secs(60),
            llm_timeout: Duration::from_secs(60),
            subcall_timeout: Duration::from_secs(90),
            context_windows,
            capture_trace: true,
        }
    }
}

impl Config {
    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_max_depth(mut self, n: u32) -> Self {
        self.max_depth = n;
        self
    }

    pub fn with_max_concurrent_subcalls(mut self, n: u32) -> Self {
        self.max_concurrent_subcalls = n;
        self
    }

    pub fn with_truncation(mut self, head: usize, tail: usize) -> Self {
        self.truncation_head = head;
        self.truncation_tail = tail;
        self
    }

    pub fn with_eval_timeout(mut self, d: Duration) -> Self {
        self.eval_timeout = d;
        self
    }

    pub fn with_models(mut self, large: impl Into<String>, small: impl Into<String>) -> Self {
        self.model_large = large.into();
        self.model_small = small.into();
        self
    }

    /// Total budget allowed for a single public-API call: twice the
    /// per-iteration eval timeout.
    pub fn run_timeout(&self) -> Duration {
        self.eval_timeout * 2
    }

    /// Estimated context window for `model`, falling back to the smaller
    /// of the two configured windows if the model isn't recognized.
    pub fn context_window(&self, model: &str) -> u32 {
        self.context_windows.get(model).copied().unwrap_or_else(|| {
            self.context_windows
                .values()
                .copied()
                .min()
                .unwrap_or(32_000)
        })
    }
}
