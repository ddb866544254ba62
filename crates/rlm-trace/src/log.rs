//! Per-run append-only trace log and its tree projection.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::ids::{Clock, RunId, SpanId};

/// The kind of lifecycle event a trace record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventKind {
    NodeStart,
    NodeStop,
    IterationStart,
    IterationStop,
    LlmRequestStart,
    LlmRequestStop,
    LlmRequestException,
    EvalStart,
    EvalStop,
    EvalException,
    SubcallSpawn,
    SubcallResult,
    DirectQueryStart,
    DirectQueryStop,
    CompactionRun,
    TurnComplete,
}

/// A single trace record. Storage shape — the tree projection in
/// [`TraceLog::tree`] is derived from these, not stored directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub kind: TraceEventKind,
    pub timestamp_us: i64,
    pub run_id: RunId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub depth: u32,
    pub payload: serde_json::Value,
}

/// One node's current state in a run's worker tree, as reconstructed from
/// its events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub parent_span_id: Option<SpanId>,
    pub depth: u32,
    pub model: Option<String>,
    pub status: String,
    pub iterations: u32,
    pub started_at_us: i64,
    pub duration_ms: Option<u64>,
    pub result_preview: Option<String>,
}

/// Append-only event buffer for a single run, plus an incrementally
/// maintained tree projection.
pub struct TraceLog {
    events: RwLock<Vec<TraceEvent>>,
    tree: RwLock<HashMap<SpanId, TreeNode>>,
    pub(crate) created_at: Instant,
}

impl TraceLog {
    fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            tree: RwLock::new(HashMap::new()),
            created_at: Instant::now(),
        }
    }

    pub fn append(&self, event: TraceEvent) {
        self.project(&event);
        self.events.write().unwrap().push(event);
    }

    fn project(&self, event: &TraceEvent) {
        let mut tree = self.tree.write().unwrap();
        match event.kind {
            TraceEventKind::NodeStart => {
                tree.insert(
                    event.span_id.clone(),
                    TreeNode {
                        parent_span_id: event.parent_span_id.clone(),
                        depth: event.depth,
                        model: event
                            .payload
                            .get("model")
                            .and_then(|v| v.as_str())
                            .map(String::from),
                        status: "running".to_string(),
                        iterations: 0,
                        started_at_us: event.timestamp_us,
                        duration_ms: None,
                        result_preview: None,
                    },
                );
            }
            TraceEventKind::IterationStop => {
                if let Some(node) = tree.get_mut(&event.span_id) {
                    node.iterations += 1;
                }
            }
            TraceEventKind::NodeStop => {
                if let Some(node) = tree.get_mut(&event.span_id) {
                    node.status = event
                        .payload
                        .get("status")
                        .and_then(|v| v.as_str())
                        .unwrap_or("done")
                        .to_string();
                    node.duration_ms = event
                        .payload
                        .get("duration_ms")
                        .and_then(|v| v.as_u64());
                    node.result_preview = event
                        .payload
                        .get("result_preview")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                }
            }
            _ => {}
        }
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.read().unwrap().clone()
    }

    pub fn tree(&self) -> HashMap<SpanId, TreeNode> {
        self.tree.read().unwrap().clone()
    }

    pub fn to_jsonl(&self) -> String {
        self.events
            .read()
            .unwrap()
            .iter()
            .map(|e| serde_json::to_string(e).expect("TraceEvent always serializes"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Creates and owns one [`TraceLog`] per run, lazily.
#[derive(Default)]
pub struct TraceRegistry {
    logs: RwLock<HashMap<RunId, Arc<TraceLog>>>,
}

impl TraceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_for(&self, run_id: &RunId) -> Arc<TraceLog> {
        if let Some(log) = self.logs.read().unwrap().get(run_id) {
            return log.clone();
        }
        let mut logs = self.logs.write().unwrap();
        logs.entry(run_id.clone())
            .or_insert_with(|| Arc::new(TraceLog::new()))
            .clone()
    }

    pub fn get(&self, run_id: &RunId) -> Option<Arc<TraceLog>> {
        self.logs.read().unwrap().get(run_id).cloned()
    }

    /// Drop in-memory logs whose run has been idle longer than `ttl`.
    pub fn sweep_older_than(&self, ttl: Duration) {
        let mut logs = self.logs.write().unwrap();
        logs.retain(|_, log| log.created_at.elapsed() < ttl);
    }

    pub fn run_ids(&self) -> Vec<RunId> {
        self.logs.read().unwrap().keys().cloned().collect()
    }
}

/// Convenience constructor for a [`TraceEvent`] using a [`Clock`] for its
/// timestamp.
pub fn event(
    clock: &dyn Clock,
    kind: TraceEventKind,
    run_id: RunId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    depth: u32,
    payload: serde_json::Value,
) -> TraceEvent {
    TraceEvent {
        kind,
        timestamp_us: clock.now_us(),
        run_id,
        span_id,
        parent_span_id,
        depth,
        payload,
    }
}
